//! Leaf-to-root enumeration solver.
//!
//! Starts from the leaves of both expressions and climbs one level per round.
//! In each round every frontier node of the reference is paired with the
//! comparison frontier nodes that share its search key and payload; all
//! combinations are enumerated and only the highest scoring legal ones survive.
//! Parents of the nodes matched in a round form the next frontier, keyed by
//! the comparison index of the child they were reached through, so a parent
//! pair can only match when the child pair below it did.
//!
//! Tied solutions of a round all climb to the next one. Identical leaves under
//! different parents score the same until their parents are paired, so
//! settling on one of them early would pin the wrong parent pairing.

use super::{IsomorphismSolver, SolverContext};
use crate::error::Result;
use crate::expression::LogicalExpression;
use crate::hash;
use crate::node::{Nid, NodeSemantic};
use crate::solution::IsomorphicSolution;
use crate::visit::TreeNodeVisitData;
use crate::DEPTH_LIMIT;
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, BTreeSet};

/// Fields compare in declaration order, so a range over everything but
/// `node` finds all candidates with an equal key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SearchKey {
    semantic: NodeSemantic,
    /// Comparison index of the matched child below, `-1` for leaves.
    child_node: i64,
    concepts_size: usize,
    concepts_hash: u64,
    concepts: Vec<Nid>,
    node: usize,
}

impl SearchKey {
    fn new(
        data: &TreeNodeVisitData,
        semantic: NodeSemantic,
        node: usize,
        child_node: Option<usize>,
    ) -> Self {
        let concepts: Vec<Nid> = data.concepts_at_or_above(node).iter().copied().collect();
        let mut bytes = Vec::with_capacity(concepts.len() * 4);
        for nid in &concepts {
            bytes.extend_from_slice(&nid.to_le_bytes());
        }
        Self {
            semantic,
            child_node: child_node.map_or(-1, |child| child as i64),
            concepts_size: concepts.len(),
            concepts_hash: hash::fnv1a64(&bytes),
            concepts,
            node,
        }
    }

    fn with_node(&self, node: usize) -> Self {
        Self {
            node,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BottomUpSolver;

impl IsomorphismSolver for BottomUpSolver {
    fn name(&self) -> &'static str {
        "bottom-up"
    }

    fn solve(&self, context: &SolverContext<'_>, seed: &IsomorphicSolution) -> Result<IsomorphicSolution> {
        let used: RoaringBitmap = seed.solution().iter().flatten().map(|c| *c as u32).collect();
        let reference_frontier = leaf_keys(context.reference, &context.reference_data, |node| {
            seed.comparison_index(node).is_none()
        });
        let comparison_frontier = leaf_keys(context.comparison, &context.comparison_data, |node| {
            !used.contains(node as u32)
        });
        let mut climbing = vec![Branch {
            solution: seed.clone(),
            used,
            reference_frontier,
            comparison_frontier,
        }];
        let mut settled = Vec::new();

        while !climbing.is_empty() {
            let mut next = Vec::new();
            for branch in climbing {
                match branch.climb(context) {
                    Some(levels) => next.extend(levels),
                    None => settled.push(branch.solution),
                }
            }
            climbing = keep_best(next, CARRIED_BRANCHES);
        }

        Ok(settled
            .into_iter()
            .max_by(|a, b| a.rank(b))
            .unwrap_or_else(|| seed.clone()))
    }
}

/// Tied solutions carried from one round to the next.
const CARRIED_BRANCHES: usize = 32;

/// One partial solution with the frontiers it climbs from.
#[derive(Debug, Clone)]
struct Branch {
    solution: IsomorphicSolution,
    used: RoaringBitmap,
    reference_frontier: BTreeSet<SearchKey>,
    comparison_frontier: BTreeSet<SearchKey>,
}

impl Branch {
    /// Run one round. `None` when nothing more can be matched from here.
    fn climb(&self, context: &SolverContext<'_>) -> Option<Vec<Branch>> {
        if self.reference_frontier.is_empty() || self.comparison_frontier.is_empty() {
            return None;
        }
        let candidates = candidates(
            context,
            &self.solution,
            &self.used,
            &self.reference_frontier,
            &self.comparison_frontier,
        );
        if candidates.is_empty() {
            return None;
        }
        let levels: Vec<Branch> = enumerate(context, &self.solution, &candidates)
            .into_iter()
            .filter_map(|level| self.advance(context, level))
            .collect();
        (!levels.is_empty()).then_some(levels)
    }

    /// The branch one level up, or `None` if `level` matched nothing new.
    fn advance(&self, context: &SolverContext<'_>, level: IsomorphicSolution) -> Option<Branch> {
        let newly_matched: Vec<(usize, usize)> = level
            .mapped_references()
            .filter(|(reference, _)| self.solution.comparison_index(*reference).is_none())
            .collect();
        if newly_matched.is_empty() {
            return None;
        }
        let mut used = self.used.clone();
        for (_, comparison) in &newly_matched {
            used.insert(*comparison as u32);
        }

        let mut reference_frontier = BTreeSet::new();
        let mut comparison_frontier = BTreeSet::new();
        for (reference, comparison) in &newly_matched {
            if let Some(parent) = context.reference_data.predecessor(*reference) {
                if level.comparison_index(parent).is_none() {
                    if let Some(node) = context.reference.get(parent) {
                        reference_frontier.insert(SearchKey::new(
                            &context.reference_data,
                            node.semantic(),
                            parent,
                            Some(*comparison),
                        ));
                    }
                }
            }
            if let Some(parent) = context.comparison_data.predecessor(*comparison) {
                if !used.contains(parent as u32) {
                    if let Some(node) = context.comparison.get(parent) {
                        comparison_frontier.insert(SearchKey::new(
                            &context.comparison_data,
                            node.semantic(),
                            parent,
                            Some(*comparison),
                        ));
                    }
                }
            }
        }

        Some(Branch {
            solution: level,
            used,
            reference_frontier,
            comparison_frontier,
        })
    }
}

/// Keep the highest scoring branches, best ranked first, without duplicates.
fn keep_best(mut branches: Vec<Branch>, width: usize) -> Vec<Branch> {
    let Some(max) = branches.iter().map(|branch| branch.solution.score()).max() else {
        return branches;
    };
    branches.retain(|branch| branch.solution.score() == max);
    branches.sort_by(|a, b| b.solution.rank(&a.solution));
    branches.dedup_by(|a, b| a.solution == b.solution);
    branches.truncate(width);
    branches
}

fn leaf_keys(
    expression: &LogicalExpression,
    data: &TreeNodeVisitData,
    open: impl Fn(usize) -> bool,
) -> BTreeSet<SearchKey> {
    data.leaf_nodes()
        .iter()
        .map(|leaf| leaf as usize)
        .filter(|leaf| open(*leaf))
        .filter_map(|leaf| {
            expression
                .get(leaf)
                .map(|node| SearchKey::new(data, node.semantic(), leaf, None))
        })
        .collect()
}

/// Comparison candidates per reference node, ascending by reference index.
fn candidates(
    context: &SolverContext<'_>,
    base: &IsomorphicSolution,
    used: &RoaringBitmap,
    reference_frontier: &BTreeSet<SearchKey>,
    comparison_frontier: &BTreeSet<SearchKey>,
) -> BTreeMap<usize, Vec<usize>> {
    let mut candidates: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for key in reference_frontier {
        let low = key.with_node(0);
        let high = key.with_node(usize::MAX);
        for candidate in comparison_frontier.range(low..=high) {
            if !context.data_equals(key.node, candidate.node)
                || !ancestors_agree(context, base, used, key.node, candidate.node)
            {
                continue;
            }
            let options = candidates.entry(key.node).or_default();
            if !options.contains(&candidate.node) {
                options.push(candidate.node);
            }
        }
    }
    candidates
}

/// A pairing is only possible when the ancestor chains agree: walking up
/// both sides in step, open ancestors must carry the same payload until the
/// first already-paired reference ancestor, which must be paired with the
/// comparison ancestor at the same height.
fn ancestors_agree(
    context: &SolverContext<'_>,
    base: &IsomorphicSolution,
    used: &RoaringBitmap,
    reference: usize,
    comparison: usize,
) -> bool {
    let mut reference_ancestor = context.reference_data.predecessor(reference);
    let mut comparison_ancestor = context.comparison_data.predecessor(comparison);
    for _ in 0..=DEPTH_LIMIT {
        match (reference_ancestor, comparison_ancestor) {
            (None, None) => return true,
            (Some(r), Some(c)) => match base.comparison_index(r) {
                Some(mapped) => return mapped == c,
                None => {
                    if used.contains(c as u32) || !context.data_equals(r, c) {
                        return false;
                    }
                }
            },
            _ => return false,
        }
        reference_ancestor = reference_ancestor.and_then(|r| context.reference_data.predecessor(r));
        comparison_ancestor = comparison_ancestor.and_then(|c| context.comparison_data.predecessor(c));
    }
    false
}

/// Try every pairing, one reference node at a time, keeping only the
/// maximal-score legal partial solutions (at most `max_candidate_solutions`),
/// best ranked first.
fn enumerate(
    context: &SolverContext<'_>,
    base: &IsomorphicSolution,
    candidates: &BTreeMap<usize, Vec<usize>>,
) -> Vec<IsomorphicSolution> {
    let width = context.config.max_candidate_solutions.max(1);
    let mut partials = vec![base.clone()];

    for (reference, options) in candidates {
        let mut expanded = Vec::with_capacity(partials.len() * options.len());
        for partial in &partials {
            let mut extended = false;
            for comparison in options {
                if partial.solution().contains(&Some(*comparison))
                    || has_open_twin(context, partial, options, *comparison)
                {
                    continue;
                }
                let mut solution = partial.solution().to_vec();
                solution[*reference] = Some(*comparison);
                let scored = context.score(solution);
                if scored.is_legal() {
                    expanded.push(scored);
                    extended = true;
                }
            }
            if !extended {
                expanded.push(partial.clone());
            }
        }

        let Some(max) = expanded.iter().map(IsomorphicSolution::score).max() else {
            continue;
        };
        expanded.retain(|solution| solution.score() == max);
        expanded.sort_by(|a, b| b.rank(a));
        expanded.dedup();
        expanded.truncate(width);
        partials = expanded;
    }

    partials
}

/// Whether an earlier, still unpaired option is a leaf with the same parent
/// and payload as `comparison`. Such leaves are interchangeable, so only the
/// first open one is tried.
fn has_open_twin(
    context: &SolverContext<'_>,
    partial: &IsomorphicSolution,
    options: &[usize],
    comparison: usize,
) -> bool {
    let Some(node) = context.comparison.get(comparison).filter(|node| node.is_leaf()) else {
        return false;
    };
    let parent = context.comparison_data.predecessor(comparison);
    options
        .iter()
        .take_while(|earlier| **earlier != comparison)
        .filter(|earlier| !partial.solution().contains(&Some(**earlier)))
        .filter(|earlier| context.comparison_data.predecessor(**earlier) == parent)
        .filter_map(|earlier| context.comparison.get(*earlier))
        .any(|twin| twin.is_leaf() && twin.data_equals(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LogicalExpressionBuilder;
    use crate::isomorphism::IsomorphismConfig;

    fn with_roles(nid: Nid, roles: &[(Nid, Nid)]) -> LogicalExpression {
        let mut b = LogicalExpressionBuilder::new(nid);
        let mut children = vec![b.concept(64572001)];
        for (role, value) in roles {
            let value = b.concept(*value);
            children.push(b.some_role(*role, value));
        }
        let and = b.and(&children);
        b.necessary_set(&[and]);
        b.build().unwrap()
    }

    fn solve(r: &LogicalExpression, c: &LogicalExpression) -> IsomorphicSolution {
        let config = IsomorphismConfig::default();
        let context = SolverContext::new(r, c, &config).unwrap();
        let seed = crate::isomorphism::seed_solution(&context).unwrap();
        BottomUpSolver.solve(&context, &seed).unwrap()
    }

    #[test]
    fn climbs_from_leaves_through_roles() {
        let r = with_roles(1, &[(10, 100), (20, 200)]);
        let c = with_roles(2, &[(20, 200), (10, 100)]);
        let solution = solve(&r, &c);
        assert!(solution.is_legal());
        assert_eq!(solution.mapped_count(), r.node_count());
        for (reference, comparison) in solution.mapped_references() {
            assert!(r.node(reference).unwrap().data_equals(c.node(comparison).unwrap()));
        }
    }

    #[test]
    fn shared_leaves_follow_their_own_sets() {
        // The disorder concept appears under both sets, so the leaf round
        // alone cannot tell which comparison set each copy belongs to.
        let sets = |nid: Nid, sites: &[Nid]| {
            let mut b = LogicalExpressionBuilder::new(nid);
            let mut ands = Vec::new();
            for site in sites {
                let disorder = b.concept(64572001);
                let value = b.concept(*site);
                let role = b.some_role(363698007, value);
                ands.push(b.and(&[disorder, role]));
            }
            for and in ands {
                b.necessary_set(&[and]);
            }
            b.build().unwrap()
        };
        let r = sets(1, &[39607008, 71854001]);
        let c = sets(1, &[71854001, 39607008]);
        let solution = solve(&r, &c);
        assert!(solution.is_legal());
        assert_eq!(solution.mapped_count(), r.node_count());
    }

    #[test]
    fn same_type_roles_pair_by_value() {
        let r = with_roles(1, &[(10, 100), (10, 200)]);
        let c = with_roles(1, &[(10, 200), (10, 100)]);
        let solution = solve(&r, &c);
        assert!(solution.is_legal());
        assert_eq!(solution.mapped_count(), r.node_count());
    }

    #[test]
    fn repeated_leaves_pair_in_order() {
        let build = |nid: Nid| {
            let mut b = LogicalExpressionBuilder::new(nid);
            let leaves: Vec<_> = (0..4).map(|_| b.concept(64572001)).collect();
            let and = b.and(&leaves);
            b.necessary_set(&[and]);
            b.build().unwrap()
        };
        let (r, c) = (build(1), build(2));
        let config = IsomorphismConfig::default();
        let context = SolverContext::new(&r, &c, &config).unwrap();
        let seed = crate::isomorphism::seed_solution(&context).unwrap();
        let leaves: Vec<usize> = c.nodes().filter(|n| n.is_leaf()).map(|n| n.index()).collect();
        let candidates: BTreeMap<usize, Vec<usize>> = r
            .nodes()
            .filter(|n| n.is_leaf())
            .map(|n| (n.index(), leaves.clone()))
            .collect();
        // One pairing instead of every permutation of the four leaves.
        let levels = enumerate(&context, &seed, &candidates);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].mapped_count(), r.node_count());
    }

    #[test]
    fn tied_branches_are_deduplicated() {
        let r = with_roles(1, &[(10, 100)]);
        let config = IsomorphismConfig::default();
        let context = SolverContext::new(&r, &r, &config).unwrap();
        let branch = Branch {
            solution: context.score(vec![None; r.slot_count()]),
            used: RoaringBitmap::new(),
            reference_frontier: BTreeSet::new(),
            comparison_frontier: BTreeSet::new(),
        };
        let kept = keep_best(vec![branch.clone(), branch], CARRIED_BRANCHES);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn changed_role_value_leaves_role_unmatched() {
        let r = with_roles(1, &[(10, 100)]);
        let c = with_roles(1, &[(10, 101)]);
        let solution = solve(&r, &c);
        // Root, set, and, the disorder concept.
        assert_eq!(solution.mapped_count(), 4);
    }

    #[test]
    fn search_keys_order_by_semantic_first() {
        let r = with_roles(1, &[(10, 100)]);
        let config = IsomorphismConfig::default();
        let context = SolverContext::new(&r, &r, &config).unwrap();
        let concept = SearchKey::new(&context.reference_data, NodeSemantic::Concept, 3, None);
        let role = SearchKey::new(&context.reference_data, NodeSemantic::RoleSome, 4, Some(5));
        assert!(role < concept);
        assert_eq!(concept.child_node, -1);
    }
}
