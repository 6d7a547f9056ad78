//! Uncommitted-set bookkeeping.
//!
//! Four sets of component sequences: concepts and sememes, each split by
//! whether checkers run on them. All four sit behind one lock so a sequence
//! is never in both sets of its kind.

use crate::model::ComponentKind;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UncommittedSet {
    ConceptsWithChecks,
    ConceptsNoChecks,
    SememesWithChecks,
    SememesNoChecks,
}

impl UncommittedSet {
    pub const ALL: [UncommittedSet; 4] = [
        UncommittedSet::ConceptsWithChecks,
        UncommittedSet::ConceptsNoChecks,
        UncommittedSet::SememesWithChecks,
        UncommittedSet::SememesNoChecks,
    ];

    pub fn of(kind: ComponentKind, checks: bool) -> Self {
        match (kind, checks) {
            (ComponentKind::Concept, true) => UncommittedSet::ConceptsWithChecks,
            (ComponentKind::Concept, false) => UncommittedSet::ConceptsNoChecks,
            (ComponentKind::Sememe, true) => UncommittedSet::SememesWithChecks,
            (ComponentKind::Sememe, false) => UncommittedSet::SememesNoChecks,
        }
    }

    pub fn kind(self) -> ComponentKind {
        match self {
            UncommittedSet::ConceptsWithChecks | UncommittedSet::ConceptsNoChecks => {
                ComponentKind::Concept
            }
            UncommittedSet::SememesWithChecks | UncommittedSet::SememesNoChecks => {
                ComponentKind::Sememe
            }
        }
    }

    pub fn with_checks(self) -> bool {
        matches!(
            self,
            UncommittedSet::ConceptsWithChecks | UncommittedSet::SememesWithChecks
        )
    }

    fn sibling(self) -> Self {
        Self::of(self.kind(), !self.with_checks())
    }
}

/// Point-in-time copy of the four sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UncommittedSnapshot {
    pub concepts_with_checks: RoaringBitmap,
    pub concepts_no_checks: RoaringBitmap,
    pub sememes_with_checks: RoaringBitmap,
    pub sememes_no_checks: RoaringBitmap,
}

impl UncommittedSnapshot {
    pub fn set(&self, set: UncommittedSet) -> &RoaringBitmap {
        match set {
            UncommittedSet::ConceptsWithChecks => &self.concepts_with_checks,
            UncommittedSet::ConceptsNoChecks => &self.concepts_no_checks,
            UncommittedSet::SememesWithChecks => &self.sememes_with_checks,
            UncommittedSet::SememesNoChecks => &self.sememes_no_checks,
        }
    }

    fn set_mut(&mut self, set: UncommittedSet) -> &mut RoaringBitmap {
        match set {
            UncommittedSet::ConceptsWithChecks => &mut self.concepts_with_checks,
            UncommittedSet::ConceptsNoChecks => &mut self.concepts_no_checks,
            UncommittedSet::SememesWithChecks => &mut self.sememes_with_checks,
            UncommittedSet::SememesNoChecks => &mut self.sememes_no_checks,
        }
    }

    /// Every (set, sequence) pair, set by set in [`UncommittedSet::ALL`] order.
    pub fn entries(&self) -> impl Iterator<Item = (UncommittedSet, u32)> + '_ {
        UncommittedSet::ALL
            .into_iter()
            .flat_map(move |set| self.set(set).iter().map(move |sequence| (set, sequence)))
    }

    pub fn len(&self) -> u64 {
        UncommittedSet::ALL.iter().map(|s| self.set(*s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct UncommittedTracker {
    sets: Mutex<UncommittedSnapshot>,
}

impl UncommittedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: UncommittedSnapshot) -> Self {
        Self {
            sets: Mutex::new(snapshot),
        }
    }

    /// Put `sequence` in `set`, taking it out of the other set of its kind.
    pub fn track(&self, set: UncommittedSet, sequence: u32) {
        let mut sets = self.sets.lock();
        sets.set_mut(set.sibling()).remove(sequence);
        sets.set_mut(set).insert(sequence);
    }

    /// Remove `sequence` from both sets of `kind`. Returns the set it was in.
    pub fn untrack(&self, kind: ComponentKind, sequence: u32) -> Option<UncommittedSet> {
        let mut sets = self.sets.lock();
        let mut found = None;
        for checks in [true, false] {
            let set = UncommittedSet::of(kind, checks);
            if sets.set_mut(set).remove(sequence) {
                found = Some(set);
            }
        }
        found
    }

    /// The set holding `sequence`, if any.
    pub fn tracked_in(&self, kind: ComponentKind, sequence: u32) -> Option<UncommittedSet> {
        let sets = self.sets.lock();
        [true, false]
            .into_iter()
            .map(|checks| UncommittedSet::of(kind, checks))
            .find(|set| sets.set(*set).contains(sequence))
    }

    pub fn snapshot(&self) -> UncommittedSnapshot {
        self.sets.lock().clone()
    }
}
