//! Root-to-leaf solver guided by lineage hashes.
//!
//! Walks matched pairs from the roots down. For the children of a matched
//! pair, lineage-hash hits (same payloads all the way from the root) with a
//! single candidate are taken first. Children whose lineage hash names several
//! candidates, and children left over for the semantic-hash fallback among the
//! comparison parent's remaining children, are resolved by trying each
//! candidate on its own snapshot of the state and keeping the branch with the
//! highest resulting score.

use super::{IsomorphismSolver, SolverContext};
use crate::error::{LogicError, Result};
use crate::solution::IsomorphicSolution;
use crate::DEPTH_LIMIT;
use roaring::RoaringBitmap;

#[derive(Debug, Clone)]
struct State {
    solution: Vec<Option<usize>>,
    used: RoaringBitmap,
}

impl State {
    fn from_seed(seed: &IsomorphicSolution) -> Self {
        Self {
            solution: seed.solution().to_vec(),
            used: seed.solution().iter().flatten().map(|c| *c as u32).collect(),
        }
    }

    fn map(&mut self, reference: usize, comparison: usize) {
        self.solution[reference] = Some(comparison);
        self.used.insert(comparison as u32);
    }

    fn is_used(&self, comparison: usize) -> bool {
        self.used.contains(comparison as u32)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathHashSolver;

impl IsomorphismSolver for PathHashSolver {
    fn name(&self) -> &'static str {
        "path-hash"
    }

    fn solve(&self, context: &SolverContext<'_>, seed: &IsomorphicSolution) -> Result<IsomorphicSolution> {
        let reference_root = context.reference.root_node()?.index();
        let Some(comparison_root) = seed.comparison_index(reference_root) else {
            return Ok(seed.clone());
        };
        let state = solve_pair(context, reference_root, comparison_root, State::from_seed(seed), 0)?;
        Ok(context.score(state.solution))
    }
}

fn solve_pair(
    context: &SolverContext<'_>,
    reference: usize,
    comparison: usize,
    mut state: State,
    depth: usize,
) -> Result<State> {
    if depth > DEPTH_LIMIT {
        return Err(LogicError::DepthLimitExceeded {
            node: reference,
            limit: DEPTH_LIMIT,
        });
    }
    let reference_children = context.reference.node(reference)?.children();
    let comparison_children = context.comparison.node(comparison)?.children();

    let mut open = Vec::new();
    for child in reference_children {
        match state.solution.get(*child).copied().flatten() {
            Some(mapped) if comparison_children.contains(&mapped) => {
                state = solve_pair(context, *child, mapped, state, depth + 1)?;
            }
            // Shared node already placed under another parent.
            Some(_) => {}
            None => open.push(*child),
        }
    }

    let mut ambiguous = Vec::new();
    let mut remaining = Vec::new();
    for child in open {
        match lineage_matches(context, &state, child, comparison_children).as_slice() {
            [] => remaining.push(child),
            [target] => {
                state.map(child, *target);
                state = solve_pair(context, child, *target, state, depth + 1)?;
            }
            _ => ambiguous.push(child),
        }
    }

    // Equal lineage hashes mean equal payloads from the root down, so any
    // candidate fits locally; the subtrees below decide.
    for child in ambiguous {
        let targets = lineage_matches(context, &state, child, comparison_children);
        match best_branch(context, &state, child, &targets, depth)? {
            Some(branch) => state = branch,
            None => remaining.push(child),
        }
    }

    for child in remaining {
        let targets = semantic_matches(context, &state, child, comparison, comparison_children);
        if let Some(branch) = best_branch(context, &state, child, &targets, depth)? {
            state = branch;
        }
    }

    Ok(state)
}

/// Map `reference` to each target in turn, solve below it, and return the
/// highest scoring legal branch. Ties keep the earliest target.
fn best_branch(
    context: &SolverContext<'_>,
    state: &State,
    reference: usize,
    targets: &[usize],
    depth: usize,
) -> Result<Option<State>> {
    let mut best: Option<(i32, State)> = None;
    for target in targets {
        let mut branch = state.clone();
        branch.map(reference, *target);
        let branch = solve_pair(context, reference, *target, branch, depth + 1)?;
        let score = context.score(branch.solution.clone()).score();
        if score >= 0 && best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, branch));
        }
    }
    Ok(best.map(|(_, branch)| branch))
}

fn lineage_matches(
    context: &SolverContext<'_>,
    state: &State,
    reference: usize,
    comparison_children: &[usize],
) -> Vec<usize> {
    let Some(lineage) = context.reference_data.lineage_hash(reference) else {
        return Vec::new();
    };
    context
        .comparison_data
        .nodes_with_lineage_hash(lineage)
        .iter()
        .copied()
        .filter(|candidate| {
            comparison_children.contains(candidate)
                && !state.is_used(*candidate)
                && context.data_equals(reference, *candidate)
        })
        .collect()
}

fn semantic_matches(
    context: &SolverContext<'_>,
    state: &State,
    reference: usize,
    comparison_parent: usize,
    comparison_children: &[usize],
) -> Vec<usize> {
    let (Some(semantic), Some(parent_depth)) = (
        context.reference_data.semantic_hash(reference),
        context.comparison_data.depth(comparison_parent),
    ) else {
        return Vec::new();
    };
    context
        .comparison_data
        .nodes_with_semantic_hash(parent_depth + 1, semantic)
        .iter()
        .copied()
        .filter(|candidate| {
            comparison_children.contains(candidate)
                && !state.is_used(*candidate)
                && context.data_equals(reference, *candidate)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LogicalExpressionBuilder;
    use crate::expression::LogicalExpression;
    use crate::isomorphism::{seed_solution, IsomorphismConfig};
    use crate::node::Nid;

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
        let seed = seed_solution(&context).unwrap();
        PathHashSolver.solve(&context, &seed).unwrap()
    }

    #[test]
    fn lineage_hits_match_reordered_children() {
        let r = with_roles(1, &[(10, 100), (20, 200)]);
        let c = with_roles(2, &[(20, 200), (10, 100)]);
        let solution = solve(&r, &c);
        assert_eq!(solution.mapped_count(), r.node_count());
        assert!(solution.is_legal());
    }

    /// Two necessary sets sharing a parent concept, listed in the given order.
    fn two_sets(nid: Nid, sites: &[Nid]) -> LogicalExpression {
        let mut b = LogicalExpressionBuilder::new(nid);
        let mut sets = Vec::new();
        for site in sites {
            let parent = b.concept(64572001);
            let value = b.concept(*site);
            let role = b.some_role(363698007, value);
            let and = b.and(&[parent, role]);
            sets.push(and);
        }
        for and in sets {
            b.necessary_set(&[and]);
        }
        b.build().unwrap()
    }

    #[test]
    fn swapped_sets_map_completely() {
        let r = two_sets(1, &[39607008, 71854001]);
        let c = two_sets(1, &[71854001, 39607008]);
        let solution = solve(&r, &c);
        assert!(solution.is_legal());
        assert_eq!(solution.mapped_count(), r.node_count());
    }

    #[test]
    fn duplicate_sibling_payloads_follow_their_subtrees() {
        // Both roles carry the same type; only their values differ.
        let r = with_roles(1, &[(10, 100), (10, 200)]);
        let c = with_roles(1, &[(10, 200), (10, 100)]);
        let solution = solve(&r, &c);
        assert!(solution.is_legal());
        assert_eq!(solution.mapped_count(), r.node_count());
    }

    #[test]
    fn changed_restriction_keeps_the_role() {
        let r = with_roles(1, &[(10, 100)]);
        let c = with_roles(1, &[(10, 101)]);
        let solution = solve(&r, &c);
        // Everything but the restriction concept.
        assert_eq!(solution.mapped_count(), r.node_count() - 1);
    }

    #[test]
    fn missing_root_pairing_returns_seed() {
        let r = with_roles(1, &[]);
        let config = IsomorphismConfig::default();
        let context = SolverContext::new(&r, &r, &config).unwrap();
        let seed = context.score(vec![None; r.slot_count()]);
        assert_eq!(PathHashSolver.solve(&context, &seed).unwrap(), seed);
    }
}
