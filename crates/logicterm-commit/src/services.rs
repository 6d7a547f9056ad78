//! Collaborators the engine writes through.
//!
//! Durable storage and identifier assignment live outside the engine. The
//! in-memory implementations here back the tests and the CLI.

use crate::model::{ConceptChronology, SememeChronology};
use anyhow::bail;
use dashmap::DashMap;
use logicterm_logic::Nid;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub trait ConceptService: Send + Sync {
    fn write_concept(&self, concept: &ConceptChronology) -> anyhow::Result<()>;

    fn concept(&self, nid: Nid) -> Option<ConceptChronology>;
}

pub trait SememeService: Send + Sync {
    fn write_sememe(&self, sememe: &SememeChronology) -> anyhow::Result<()>;

    fn sememe(&self, nid: Nid) -> Option<SememeChronology>;
}

/// Maps nids to the dense sequences used in uncommitted sets and commit records.
pub trait IdentifierService: Send + Sync {
    fn concept_sequence(&self, nid: Nid) -> u32;

    fn sememe_sequence(&self, nid: Nid) -> u32;

    fn concept_nid(&self, sequence: u32) -> Option<Nid>;

    fn sememe_nid(&self, sequence: u32) -> Option<Nid>;
}

/// The three collaborators an engine is constructed with.
#[derive(Clone)]
pub struct Collaborators {
    pub concepts: Arc<dyn ConceptService>,
    pub sememes: Arc<dyn SememeService>,
    pub identifiers: Arc<dyn IdentifierService>,
}

impl Collaborators {
    pub fn in_memory() -> Self {
        Self {
            concepts: Arc::new(MemoryConceptService::default()),
            sememes: Arc::new(MemorySememeService::default()),
            identifiers: Arc::new(MemoryIdentifierService::default()),
        }
    }
}

// ============================================================================
// In-memory implementations
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryConceptService {
    concepts: DashMap<Nid, ConceptChronology>,
    fail_writes: AtomicBool,
}

impl MemoryConceptService {
    /// Make every following write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

impl ConceptService for MemoryConceptService {
    fn write_concept(&self, concept: &ConceptChronology) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("concept store rejected write of {}", concept.nid);
        }
        self.concepts.insert(concept.nid, concept.clone());
        Ok(())
    }

    fn concept(&self, nid: Nid) -> Option<ConceptChronology> {
        self.concepts.get(&nid).map(|c| c.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemorySememeService {
    sememes: DashMap<Nid, SememeChronology>,
}

impl MemorySememeService {
    pub fn len(&self) -> usize {
        self.sememes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sememes.is_empty()
    }
}

impl SememeService for MemorySememeService {
    fn write_sememe(&self, sememe: &SememeChronology) -> anyhow::Result<()> {
        self.sememes.insert(sememe.nid, sememe.clone());
        Ok(())
    }

    fn sememe(&self, nid: Nid) -> Option<SememeChronology> {
        self.sememes.get(&nid).map(|s| s.clone())
    }
}

#[derive(Debug, Default)]
struct SequenceMap {
    by_nid: DashMap<Nid, u32>,
    by_sequence: DashMap<u32, Nid>,
    next: AtomicU32,
}

impl SequenceMap {
    fn sequence(&self, nid: Nid) -> u32 {
        *self.by_nid.entry(nid).or_insert_with(|| {
            let sequence = self.next.fetch_add(1, Ordering::SeqCst);
            self.by_sequence.insert(sequence, nid);
            sequence
        })
    }

    fn nid(&self, sequence: u32) -> Option<Nid> {
        self.by_sequence.get(&sequence).map(|n| *n)
    }
}

/// Assigns sequences on first use, starting at zero.
#[derive(Debug, Default)]
pub struct MemoryIdentifierService {
    concepts: SequenceMap,
    sememes: SequenceMap,
}

impl IdentifierService for MemoryIdentifierService {
    fn concept_sequence(&self, nid: Nid) -> u32 {
        self.concepts.sequence(nid)
    }

    fn sememe_sequence(&self, nid: Nid) -> u32 {
        self.sememes.sequence(nid)
    }

    fn concept_nid(&self, sequence: u32) -> Option<Nid> {
        self.concepts.nid(sequence)
    }

    fn sememe_nid(&self, sequence: u32) -> Option<Nid> {
        self.sememes.nid(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn sequences_are_stable_and_reversible() {
        let ids = MemoryIdentifierService::default();
        let a = ids.concept_sequence(-5);
        let b = ids.concept_sequence(-9);
        assert_ne!(a, b);
        assert_eq!(ids.concept_sequence(-5), a);
        assert_eq!(ids.concept_nid(b), Some(-9));
        // Sememe sequences are a separate space.
        assert_eq!(ids.sememe_sequence(-5), 0);
        assert_eq!(ids.sememe_nid(1), None);
    }

    #[test]
    fn failing_writes_surface_as_errors() {
        let service = MemoryConceptService::default();
        let concept = ConceptChronology::new(-1, Uuid::new_v4());
        service.set_fail_writes(true);
        assert!(service.write_concept(&concept).is_err());
        assert!(service.is_empty());
        service.set_fail_writes(false);
        service.write_concept(&concept).unwrap();
        assert_eq!(service.concept(-1), Some(concept));
    }
}
