//! Versioned components and the stamps that identify their versions.

use logicterm_logic::{LogicalExpression, NodeCodec, Nid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

// ============================================================================
// Stamps
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    Active,
    Inactive,
}

impl Status {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Status::Active => 1,
            Status::Inactive => 0,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Status::Active),
            0 => Some(Status::Inactive),
            _ => None,
        }
    }
}

/// Author, module and path under which edits are made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EditCoordinate {
    pub author: Nid,
    pub module: Nid,
    pub path: Nid,
}

impl EditCoordinate {
    pub fn new(author: Nid, module: Nid, path: Nid) -> Self {
        Self {
            author,
            module,
            path,
        }
    }
}

/// Provenance of one version: status, time, author, module and path.
///
/// Time is milliseconds since the Unix epoch. Versions that have not been
/// committed carry [`Stamp::UNCOMMITTED_TIME`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub status: Status,
    pub time: i64,
    pub author: Nid,
    pub module: Nid,
    pub path: Nid,
}

impl Stamp {
    pub const UNCOMMITTED_TIME: i64 = i64::MAX;

    pub fn uncommitted(status: Status, coordinate: EditCoordinate) -> Self {
        Self {
            status,
            time: Self::UNCOMMITTED_TIME,
            author: coordinate.author,
            module: coordinate.module,
            path: coordinate.path,
        }
    }

    pub fn is_uncommitted(&self) -> bool {
        self.time == Self::UNCOMMITTED_TIME
    }

    pub fn committed_at(self, time: i64) -> Self {
        Self { time, ..self }
    }
}

// ============================================================================
// Chronologies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptVersion {
    pub stamp: Stamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SememePayload {
    Description {
        text: String,
        language: Nid,
        description_type: Nid,
    },
    /// Node records of a logical expression in internal encoding.
    LogicGraph { data: Vec<Vec<u8>> },
    Membership,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SememeVersion {
    pub stamp: Stamp,
    pub payload: SememePayload,
}

/// Operations shared by every versioned component.
pub trait Chronology {
    fn nid(&self) -> Nid;

    fn stamps(&self) -> Vec<&Stamp>;

    fn stamps_mut(&mut self) -> Vec<&mut Stamp>;

    /// Drop versions for which `keep` returns false.
    fn retain_versions(&mut self, keep: &dyn Fn(&Stamp) -> bool);

    fn has_uncommitted(&self) -> bool {
        self.stamps().iter().any(|s| s.is_uncommitted())
    }

    fn uncommitted_authors(&self) -> BTreeSet<Nid> {
        self.stamps()
            .into_iter()
            .filter(|s| s.is_uncommitted())
            .map(|s| s.author)
            .collect()
    }

    /// Stamp uncommitted versions with `time`, limited to `author` when given.
    /// Returns the resulting committed stamps, deduplicated.
    fn commit_versions(&mut self, author: Option<Nid>, time: i64) -> BTreeSet<Stamp> {
        let mut committed = BTreeSet::new();
        for stamp in self.stamps_mut() {
            if stamp.is_uncommitted() && author.map_or(true, |a| a == stamp.author) {
                *stamp = stamp.committed_at(time);
                committed.insert(*stamp);
            }
        }
        committed
    }

    /// Drop the uncommitted versions made by `author`. Returns how many were dropped.
    fn cancel_versions(&mut self, author: Nid) -> usize {
        let before = self.stamps().len();
        self.retain_versions(&|s| !(s.is_uncommitted() && s.author == author));
        before - self.stamps().len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptChronology {
    pub nid: Nid,
    pub primordial_uuid: Uuid,
    pub versions: Vec<ConceptVersion>,
}

impl ConceptChronology {
    pub fn new(nid: Nid, primordial_uuid: Uuid) -> Self {
        Self {
            nid,
            primordial_uuid,
            versions: Vec::new(),
        }
    }

    pub fn add_version(&mut self, stamp: Stamp) {
        self.versions.push(ConceptVersion { stamp });
    }
}

impl Chronology for ConceptChronology {
    fn nid(&self) -> Nid {
        self.nid
    }

    fn stamps(&self) -> Vec<&Stamp> {
        self.versions.iter().map(|v| &v.stamp).collect()
    }

    fn stamps_mut(&mut self) -> Vec<&mut Stamp> {
        self.versions.iter_mut().map(|v| &mut v.stamp).collect()
    }

    fn retain_versions(&mut self, keep: &dyn Fn(&Stamp) -> bool) {
        self.versions.retain(|v| keep(&v.stamp));
    }
}

/// A typed statement attached to a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SememeChronology {
    pub nid: Nid,
    pub primordial_uuid: Uuid,
    /// The assemblage (refset) this sememe belongs to.
    pub assemblage: Nid,
    pub referenced_component: Nid,
    pub versions: Vec<SememeVersion>,
}

impl SememeChronology {
    pub fn new(nid: Nid, primordial_uuid: Uuid, assemblage: Nid, referenced_component: Nid) -> Self {
        Self {
            nid,
            primordial_uuid,
            assemblage,
            referenced_component,
            versions: Vec::new(),
        }
    }

    pub fn add_version(&mut self, stamp: Stamp, payload: SememePayload) {
        self.versions.push(SememeVersion { stamp, payload });
    }

    /// Latest committed version, by stamp time.
    pub fn latest_committed(&self) -> Option<&SememeVersion> {
        self.versions
            .iter()
            .filter(|v| !v.stamp.is_uncommitted())
            .max_by_key(|v| v.stamp.time)
    }

    /// Decode the latest committed logic-graph version, if there is one.
    pub fn latest_logic_graph(&self) -> logicterm_logic::Result<Option<LogicalExpression>> {
        match self.latest_committed().map(|v| &v.payload) {
            Some(SememePayload::LogicGraph { data }) => Ok(Some(LogicalExpression::from_data(
                self.referenced_component,
                data,
                NodeCodec::internal(),
            )?)),
            _ => Ok(None),
        }
    }
}

impl Chronology for SememeChronology {
    fn nid(&self) -> Nid {
        self.nid
    }

    fn stamps(&self) -> Vec<&Stamp> {
        self.versions.iter().map(|v| &v.stamp).collect()
    }

    fn stamps_mut(&mut self) -> Vec<&mut Stamp> {
        self.versions.iter_mut().map(|v| &mut v.stamp).collect()
    }

    fn retain_versions(&mut self, keep: &dyn Fn(&Stamp) -> bool) {
        self.versions.retain(|v| keep(&v.stamp));
    }
}

// ============================================================================
// Components
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Concept,
    Sememe,
}

impl ComponentKind {
    pub fn name(self) -> &'static str {
        match self {
            ComponentKind::Concept => "concept",
            ComponentKind::Sememe => "sememe",
        }
    }
}

/// Anything the commit engine tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Component {
    Concept(ConceptChronology),
    Sememe(SememeChronology),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Concept(_) => ComponentKind::Concept,
            Component::Sememe(_) => ComponentKind::Sememe,
        }
    }

    fn chronology(&self) -> &dyn Chronology {
        match self {
            Component::Concept(c) => c,
            Component::Sememe(s) => s,
        }
    }

    fn chronology_mut(&mut self) -> &mut dyn Chronology {
        match self {
            Component::Concept(c) => c,
            Component::Sememe(s) => s,
        }
    }

    pub fn nid(&self) -> Nid {
        self.chronology().nid()
    }

    pub fn has_uncommitted(&self) -> bool {
        self.chronology().has_uncommitted()
    }

    pub fn commit_versions(&mut self, author: Option<Nid>, time: i64) -> BTreeSet<Stamp> {
        self.chronology_mut().commit_versions(author, time)
    }

    pub fn cancel_versions(&mut self, author: Nid) -> usize {
        self.chronology_mut().cancel_versions(author)
    }
}

impl From<ConceptChronology> for Component {
    fn from(concept: ConceptChronology) -> Self {
        Component::Concept(concept)
    }
}

impl From<SememeChronology> for Component {
    fn from(sememe: SememeChronology) -> Self {
        Component::Sememe(sememe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: EditCoordinate = EditCoordinate {
        author: 1,
        module: 10,
        path: 20,
    };
    const BOB: EditCoordinate = EditCoordinate {
        author: 2,
        module: 10,
        path: 20,
    };

    fn concept_with_edits() -> ConceptChronology {
        let mut concept = ConceptChronology::new(-100, Uuid::new_v4());
        concept.add_version(Stamp::uncommitted(Status::Active, ALICE).committed_at(1_000));
        concept.add_version(Stamp::uncommitted(Status::Active, ALICE));
        concept.add_version(Stamp::uncommitted(Status::Inactive, BOB));
        concept
    }

    #[test]
    fn commit_limited_to_author() {
        let mut concept = concept_with_edits();
        let committed = concept.commit_versions(Some(ALICE.author), 2_000);
        assert_eq!(committed.len(), 1);
        assert!(concept.has_uncommitted());
        assert_eq!(concept.uncommitted_authors(), BTreeSet::from([BOB.author]));

        let committed = concept.commit_versions(None, 3_000);
        assert_eq!(committed.iter().next().map(|s| s.time), Some(3_000));
        assert!(!concept.has_uncommitted());
    }

    #[test]
    fn cancel_keeps_committed_versions() {
        let mut component = Component::from(concept_with_edits());
        assert_eq!(component.cancel_versions(ALICE.author), 1);
        assert_eq!(component.cancel_versions(ALICE.author), 0);
        let Component::Concept(concept) = &component else {
            unreachable!()
        };
        assert_eq!(concept.versions.len(), 2);
        assert_eq!(concept.versions[0].stamp.time, 1_000);
    }

    #[test]
    fn latest_logic_graph_ignores_uncommitted() {
        let mut b = logicterm_logic::LogicalExpressionBuilder::new(-100);
        let c = b.concept(-7);
        let and = b.and(&[c]);
        b.necessary_set(&[and]);
        let expression = b.build().unwrap();
        let data = expression.to_data(NodeCodec::internal()).unwrap();

        let mut sememe = SememeChronology::new(-200, Uuid::new_v4(), -300, -100);
        assert!(sememe.latest_logic_graph().unwrap().is_none());
        sememe.add_version(
            Stamp::uncommitted(Status::Active, ALICE),
            SememePayload::LogicGraph { data: data.clone() },
        );
        assert!(sememe.latest_logic_graph().unwrap().is_none());

        sememe.commit_versions(None, 5);
        let decoded = sememe.latest_logic_graph().unwrap().unwrap();
        assert_eq!(decoded, expression);
    }
}
