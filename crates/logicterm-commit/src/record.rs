//! What a commit produced.

use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub commit_time: DateTime<Utc>,
    /// Stamp sequences of the committed versions.
    pub stamps_in_commit: BTreeSet<u32>,
    /// Stamp aliases recorded at commit time as (stamp, alias) pairs.
    pub stamp_aliases: Vec<(u32, u32)>,
    /// Concept sequences.
    pub concepts_in_commit: RoaringBitmap,
    /// Sememe sequences.
    pub sememes_in_commit: RoaringBitmap,
    pub comment: Option<String>,
}

impl CommitRecord {
    pub fn new(commit_time: DateTime<Utc>, comment: Option<String>) -> Self {
        Self {
            commit_time,
            stamps_in_commit: BTreeSet::new(),
            stamp_aliases: Vec::new(),
            concepts_in_commit: RoaringBitmap::new(),
            sememes_in_commit: RoaringBitmap::new(),
            comment,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stamps_in_commit.is_empty()
            && self.concepts_in_commit.is_empty()
            && self.sememes_in_commit.is_empty()
    }
}
