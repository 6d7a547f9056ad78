//! Candidate node correspondences between two expressions.

use crate::visit::TreeNodeVisitData;
use ahash::{AHashMap, AHashSet};
use roaring::RoaringBitmap;
use std::cmp::Ordering;
use std::fmt;

/// Score of a solution that maps two reference nodes to one comparison node.
pub const ILLEGAL_DUPLICATE_SCORE: i32 = -1;
/// Score of a solution that splits a sibling group across comparison parents.
pub const ILLEGAL_SIBLING_SCORE: i32 = -2;

/// `solution[reference index] = comparison index`, scored on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsomorphicSolution {
    solution: Vec<Option<usize>>,
    score: i32,
}

impl IsomorphicSolution {
    /// Check legality and score `solution` against the two traversals.
    ///
    /// The score of a legal solution is the number of mapped nodes plus one
    /// for every distinct parent pairing that the solution also maps.
    pub fn new(
        solution: Vec<Option<usize>>,
        reference: &TreeNodeVisitData,
        comparison: &TreeNodeVisitData,
    ) -> Self {
        let score = score(&solution, reference, comparison);
        Self { solution, score }
    }

    pub fn solution(&self) -> &[Option<usize>] {
        &self.solution
    }

    pub fn into_solution(self) -> Vec<Option<usize>> {
        self.solution
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn is_legal(&self) -> bool {
        self.score >= 0
    }

    pub fn comparison_index(&self, reference: usize) -> Option<usize> {
        self.solution.get(reference).copied().flatten()
    }

    pub fn mapped_count(&self) -> usize {
        self.solution.iter().flatten().count()
    }

    /// Reference indices with a correspondence, ascending.
    pub fn mapped_references(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.solution
            .iter()
            .enumerate()
            .filter_map(|(reference, comparison)| comparison.map(|c| (reference, c)))
    }

    /// Rank by score, then prefer the lexicographically smaller mapping so
    /// that ties break deterministically.
    pub fn rank(&self, other: &IsomorphicSolution) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.solution.cmp(&self.solution))
    }
}

impl fmt::Display for IsomorphicSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "score {} [", self.score)?;
        for (i, entry) in self.solution.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match entry {
                Some(c) => write!(f, "{i}->{c}")?,
                None => write!(f, "{i}->-")?,
            }
        }
        write!(f, "]")
    }
}

fn score(
    solution: &[Option<usize>],
    reference: &TreeNodeVisitData,
    comparison: &TreeNodeVisitData,
) -> i32 {
    let mut used = RoaringBitmap::new();
    for comparison_index in solution.iter().flatten() {
        if !used.insert(*comparison_index as u32) {
            return ILLEGAL_DUPLICATE_SCORE;
        }
    }

    let mut group_map: AHashMap<Option<usize>, Option<usize>> = AHashMap::new();
    for (reference_index, comparison_index) in solution.iter().enumerate() {
        let Some(comparison_index) = comparison_index else {
            continue;
        };
        let reference_group = reference.sibling_group(reference_index);
        let comparison_group = comparison.sibling_group(*comparison_index);
        match group_map.get(&reference_group) {
            Some(mapped) if *mapped != comparison_group => return ILLEGAL_SIBLING_SCORE,
            Some(_) => {}
            None => {
                group_map.insert(reference_group, comparison_group);
            }
        }
    }

    let mut parent_pairs: AHashSet<(usize, usize)> = AHashSet::new();
    for (reference_index, comparison_index) in solution.iter().enumerate() {
        let Some(comparison_index) = comparison_index else {
            continue;
        };
        let (Some(reference_parent), Some(comparison_parent)) = (
            reference.predecessor(reference_index),
            comparison.predecessor(*comparison_index),
        ) else {
            continue;
        };
        if solution.get(reference_parent).copied().flatten() == Some(comparison_parent) {
            parent_pairs.insert((reference_parent, comparison_parent));
        }
    }

    (used.len() as usize + parent_pairs.len()) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LogicalExpressionBuilder;
    use crate::expression::LogicalExpression;

    fn pair() -> (LogicalExpression, LogicalExpression) {
        let build = |nid| {
            let mut b = LogicalExpressionBuilder::new(nid);
            let a = b.concept(1);
            let c = b.concept(2);
            let and = b.and(&[a, c]);
            let d = b.concept(3);
            let role = b.some_role(9, d);
            b.necessary_set(&[and]);
            b.sufficient_set(&[role]);
            b.build().unwrap()
        };
        (build(1), build(2))
    }

    #[test]
    fn identity_mapping_scores_nodes_plus_parent_pairs() {
        let (r, c) = pair();
        let (rd, cd) = (r.visit_data().unwrap(), c.visit_data().unwrap());
        let n = r.slot_count();
        let s = IsomorphicSolution::new((0..n).map(Some).collect(), &rd, &cd);
        assert!(s.is_legal());
        // Parents: root, necessary set, and, sufficient set, role.
        assert_eq!(s.score(), n as i32 + 5);
        assert_eq!(s.mapped_count(), n);
    }

    #[test]
    fn duplicate_targets_are_illegal() {
        let (r, c) = pair();
        let (rd, cd) = (r.visit_data().unwrap(), c.visit_data().unwrap());
        let mut solution = vec![None; r.slot_count()];
        solution[3] = Some(3);
        solution[4] = Some(3);
        let s = IsomorphicSolution::new(solution, &rd, &cd);
        assert!(!s.is_legal());
        assert_eq!(s.score(), ILLEGAL_DUPLICATE_SCORE);
    }

    #[test]
    fn split_sibling_groups_are_illegal() {
        let (r, c) = pair();
        let (rd, cd) = (r.visit_data().unwrap(), c.visit_data().unwrap());
        // Reference 3 and 4 are siblings under And; comparison 3 is under And,
        // comparison 7 under the role.
        let mut solution = vec![None; r.slot_count()];
        solution[3] = Some(3);
        solution[4] = Some(7);
        let s = IsomorphicSolution::new(solution, &rd, &cd);
        assert_eq!(s.score(), ILLEGAL_SIBLING_SCORE);
    }

    #[test]
    fn rank_prefers_higher_score() {
        let (r, c) = pair();
        let (rd, cd) = (r.visit_data().unwrap(), c.visit_data().unwrap());
        let full = IsomorphicSolution::new((0..r.slot_count()).map(Some).collect(), &rd, &cd);
        let mut partial = full.solution().to_vec();
        partial[3] = None;
        let partial = IsomorphicSolution::new(partial, &rd, &cd);
        assert_eq!(full.rank(&partial), Ordering::Greater);
    }
}
