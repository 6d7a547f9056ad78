//! Stamp alias and stamp comment maps.

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct AliasLinks {
    forward: AHashMap<u32, u32>,
    reverse: AHashMap<u32, Vec<u32>>,
}

/// Alias links between stamp sequences.
///
/// Each stamp has at most one forward alias. Aliasing a stamp that already
/// has one extends the chain from its last link instead.
#[derive(Debug, Default)]
pub struct StampAliasMap {
    links: RwLock<AliasLinks>,
}

impl StampAliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_alias(&self, stamp: u32, alias: u32) {
        let mut links = self.links.write();
        let mut tail = stamp;
        let mut seen = AHashSet::new();
        while let Some(next) = links.forward.get(&tail).copied() {
            if next == alias || !seen.insert(tail) {
                return;
            }
            tail = next;
        }
        if tail == alias || reachable(&links, tail).contains(&alias) {
            return;
        }
        links.forward.insert(tail, alias);
        links.reverse.entry(alias).or_default().push(tail);
    }

    /// Every stamp reachable from `stamp` through alias links in either
    /// direction, not including `stamp` itself.
    pub fn aliases(&self, stamp: u32) -> BTreeSet<u32> {
        reachable(&self.links.read(), stamp)
    }

    pub fn len(&self) -> usize {
        self.links.read().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forward links sorted by stamp.
    pub fn entries(&self) -> Vec<(u32, u32)> {
        let mut entries: Vec<_> = self
            .links
            .read()
            .forward
            .iter()
            .map(|(s, a)| (*s, *a))
            .collect();
        entries.sort_unstable();
        entries
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let map = Self::new();
        for (stamp, alias) in entries {
            map.add_alias(stamp, alias);
        }
        map
    }
}

fn reachable(links: &AliasLinks, stamp: u32) -> BTreeSet<u32> {
    let mut found = BTreeSet::new();
    let mut pending = vec![stamp];
    while let Some(current) = pending.pop() {
        let forward = links.forward.get(&current).into_iter().copied();
        let reverse = links.reverse.get(&current).into_iter().flatten().copied();
        for next in forward.chain(reverse) {
            if next != stamp && found.insert(next) {
                pending.push(next);
            }
        }
    }
    found
}

#[derive(Debug, Default)]
pub struct StampCommentMap {
    comments: RwLock<AHashMap<u32, String>>,
}

impl StampCommentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` removes the comment.
    pub fn set_comment(&self, stamp: u32, comment: Option<String>) {
        let mut comments = self.comments.write();
        match comment {
            Some(comment) => {
                comments.insert(stamp, comment);
            }
            None => {
                comments.remove(&stamp);
            }
        }
    }

    pub fn comment(&self, stamp: u32) -> Option<String> {
        self.comments.read().get(&stamp).cloned()
    }

    pub fn len(&self) -> usize {
        self.comments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<(u32, String)> {
        let mut entries: Vec<_> = self
            .comments
            .read()
            .iter()
            .map(|(s, c)| (*s, c.clone()))
            .collect();
        entries.sort_unstable();
        entries
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (u32, String)>) -> Self {
        Self {
            comments: RwLock::new(entries.into_iter().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_chains_are_transitive_both_ways() {
        let map = StampAliasMap::new();
        map.add_alias(1, 2);
        map.add_alias(2, 3);
        assert_eq!(map.aliases(1), BTreeSet::from([2, 3]));
        assert_eq!(map.aliases(3), BTreeSet::from([1, 2]));
        assert_eq!(map.aliases(2), BTreeSet::from([1, 3]));
    }

    #[test]
    fn aliasing_an_aliased_stamp_extends_the_chain() {
        let map = StampAliasMap::new();
        map.add_alias(1, 2);
        map.add_alias(1, 5);
        assert_eq!(map.entries(), vec![(1, 2), (2, 5)]);
        assert_eq!(map.aliases(5), BTreeSet::from([1, 2]));
    }

    #[test]
    fn cycles_and_self_aliases_are_ignored() {
        let map = StampAliasMap::new();
        map.add_alias(4, 4);
        assert!(map.is_empty());
        map.add_alias(1, 2);
        map.add_alias(2, 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.aliases(7), BTreeSet::new());
    }

    #[test]
    fn none_deletes_a_comment() {
        let map = StampCommentMap::new();
        map.set_comment(3, Some("initial load".into()));
        assert_eq!(map.comment(3).as_deref(), Some("initial load"));
        map.set_comment(3, None);
        assert_eq!(map.comment(3), None);
        assert!(map.is_empty());
    }
}
