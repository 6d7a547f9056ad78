//! Interning of committed stamps to dense stamp sequences.

use crate::model::Stamp;
use ahash::AHashMap;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Interned {
    stamps: Vec<Stamp>,
    index: AHashMap<Stamp, u32>,
}

/// Stamp sequences start at 1; sequence `n` is `stamps[n - 1]`.
#[derive(Debug, Default)]
pub struct StampSequencer {
    inner: RwLock<Interned>,
}

impl StampSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stamps in sequence order, as returned by [`Self::snapshot`].
    pub fn from_stamps(stamps: Vec<Stamp>) -> Self {
        let index = stamps
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i as u32 + 1))
            .collect();
        Self {
            inner: RwLock::new(Interned { stamps, index }),
        }
    }

    pub fn sequence_for(&self, stamp: Stamp) -> u32 {
        if let Some(sequence) = self.inner.read().index.get(&stamp) {
            return *sequence;
        }
        let mut inner = self.inner.write();
        if let Some(sequence) = inner.index.get(&stamp) {
            return *sequence;
        }
        inner.stamps.push(stamp);
        let sequence = inner.stamps.len() as u32;
        inner.index.insert(stamp, sequence);
        sequence
    }

    pub fn stamp(&self, sequence: u32) -> Option<Stamp> {
        let index = sequence.checked_sub(1)? as usize;
        self.inner.read().stamps.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Stamp> {
        self.inner.read().stamps.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EditCoordinate, Status};

    #[test]
    fn interning_is_idempotent() {
        let coordinate = EditCoordinate::new(1, 2, 3);
        let a = Stamp::uncommitted(Status::Active, coordinate).committed_at(10);
        let b = a.committed_at(11);

        let sequencer = StampSequencer::new();
        assert_eq!(sequencer.sequence_for(a), 1);
        assert_eq!(sequencer.sequence_for(b), 2);
        assert_eq!(sequencer.sequence_for(a), 1);
        assert_eq!(sequencer.stamp(2), Some(b));
        assert_eq!(sequencer.stamp(0), None);

        let restored = StampSequencer::from_stamps(sequencer.snapshot());
        assert_eq!(restored.sequence_for(b), 2);
        assert_eq!(restored.len(), 2);
    }
}
