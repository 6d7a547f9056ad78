//! Best-effort structural correspondence between two versions of a
//! logical expression, with the diff and merge derived from it.
//!
//! A run is a fixed sequence of stages:
//!
//! 1. hashed visit data for both expressions
//! 2. a seed solution: roots, then uniquely matching set nodes and their
//!    single `And` children
//! 3. the chosen [`IsomorphismSolver`] grows the seed
//! 4. the best legal solution wins (the seed if the solver found nothing legal)
//! 5. inverse map and the isomorphic expression
//! 6. addition and deletion roots
//! 7. the merged expression: the reference plus grafted deletion fragments
//!
//! The reference expression is the current (new) definition, the comparison
//! expression the stored (old) one.

mod bottom_up;
mod path_hash;

pub use bottom_up::BottomUpSolver;
pub use path_hash::PathHashSolver;

use crate::error::{LogicError, Result};
use crate::expression::LogicalExpression;
use crate::node::NodeSemantic;
use crate::solution::IsomorphicSolution;
use crate::visit::TreeNodeVisitData;
use crate::DEPTH_LIMIT;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    /// Leaf-to-root enumeration over matching keys.
    #[default]
    BottomUp,
    /// Root-to-leaf matching guided by lineage hashes.
    PathHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsomorphismConfig {
    pub solver: SolverKind,
    /// Candidate solutions kept per enumeration step of the bottom-up solver.
    pub max_candidate_solutions: usize,
    /// Depth bound for the structural equality check of the result.
    pub equality_max_depth: usize,
}

impl Default for IsomorphismConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::BottomUp,
            max_candidate_solutions: 512,
            equality_max_depth: DEPTH_LIMIT,
        }
    }
}

impl IsomorphismConfig {
    pub fn with_solver(solver: SolverKind) -> Self {
        Self {
            solver,
            ..Self::default()
        }
    }
}

// ============================================================================
// Solver seam
// ============================================================================

/// Inputs shared by every solver for one run.
#[derive(Debug)]
pub struct SolverContext<'a> {
    pub reference: &'a LogicalExpression,
    pub comparison: &'a LogicalExpression,
    pub reference_data: TreeNodeVisitData,
    pub comparison_data: TreeNodeVisitData,
    pub config: &'a IsomorphismConfig,
}

impl<'a> SolverContext<'a> {
    pub fn new(
        reference: &'a LogicalExpression,
        comparison: &'a LogicalExpression,
        config: &'a IsomorphismConfig,
    ) -> Result<Self> {
        Ok(Self {
            reference,
            comparison,
            reference_data: reference.hashed_visit_data()?,
            comparison_data: comparison.hashed_visit_data()?,
            config,
        })
    }

    /// Score `solution` against this run's visit data.
    pub fn score(&self, solution: Vec<Option<usize>>) -> IsomorphicSolution {
        IsomorphicSolution::new(solution, &self.reference_data, &self.comparison_data)
    }

    /// Same semantic and payload on both sides.
    pub(crate) fn data_equals(&self, reference: usize, comparison: usize) -> bool {
        match (self.reference.get(reference), self.comparison.get(comparison)) {
            (Some(r), Some(c)) => r.data_equals(c),
            _ => false,
        }
    }
}

/// Grows a seed solution into the best correspondence it can find.
///
/// A solver never fails for lack of a match: nodes it cannot place stay
/// unmapped and surface as additions or deletions.
pub trait IsomorphismSolver {
    fn name(&self) -> &'static str;

    fn solve(&self, context: &SolverContext<'_>, seed: &IsomorphicSolution) -> Result<IsomorphicSolution>;
}

fn solver_for(kind: SolverKind) -> Box<dyn IsomorphismSolver + Send + Sync> {
    match kind {
        SolverKind::BottomUp => Box::new(BottomUpSolver),
        SolverKind::PathHash => Box::new(PathHashSolver),
    }
}

// ============================================================================
// Result
// ============================================================================

/// Outcome of comparing a reference expression against a comparison expression.
#[derive(Debug, Clone)]
pub struct IsomorphismResult {
    solution: IsomorphicSolution,
    comparison_to_reference: BTreeMap<usize, usize>,
    isomorphic_expression: LogicalExpression,
    isomorphic_addition_roots: BTreeSet<usize>,
    addition_roots: BTreeSet<usize>,
    deletion_roots: BTreeSet<usize>,
    merged_expression: LogicalExpression,
    merged_deletion_roots: BTreeSet<usize>,
    solver: &'static str,
}

impl IsomorphismResult {
    pub fn solution(&self) -> &IsomorphicSolution {
        &self.solution
    }

    /// Inverse of the solution: comparison index to reference index.
    pub fn comparison_to_reference(&self) -> &BTreeMap<usize, usize> {
        &self.comparison_to_reference
    }

    /// The reference expression renumbered into the comparison's index space:
    /// matched nodes take their comparison index, new nodes are appended.
    pub fn isomorphic_expression(&self) -> &LogicalExpression {
        &self.isomorphic_expression
    }

    /// Addition roots, as indices into the isomorphic expression.
    pub fn isomorphic_addition_roots(&self) -> &BTreeSet<usize> {
        &self.isomorphic_addition_roots
    }

    /// Highest unmatched reference nodes (reference indices).
    pub fn addition_roots(&self) -> &BTreeSet<usize> {
        &self.addition_roots
    }

    /// Highest unmatched comparison nodes (comparison indices).
    pub fn deletion_roots(&self) -> &BTreeSet<usize> {
        &self.deletion_roots
    }

    /// The reference expression with every deleted fragment grafted back under
    /// its matched parent.
    pub fn merged_expression(&self) -> &LogicalExpression {
        &self.merged_expression
    }

    /// Roots of the grafted fragments, as indices into the merged expression.
    pub fn merged_deletion_roots(&self) -> &BTreeSet<usize> {
        &self.merged_deletion_roots
    }

    pub fn solver(&self) -> &'static str {
        self.solver
    }

    /// No additions and no deletions.
    pub fn equivalent(&self) -> bool {
        self.addition_roots.is_empty() && self.deletion_roots.is_empty()
    }
}

// ============================================================================
// Driver
// ============================================================================

impl LogicalExpression {
    /// Compare this (reference) expression against `comparison`.
    pub fn find_isomorphisms(
        &self,
        comparison: &LogicalExpression,
        config: &IsomorphismConfig,
    ) -> Result<IsomorphismResult> {
        find_isomorphisms(self, comparison, config)
    }
}

/// Run the configured solver; failures are wrapped with the concept nid.
pub fn find_isomorphisms(
    reference: &LogicalExpression,
    comparison: &LogicalExpression,
    config: &IsomorphismConfig,
) -> Result<IsomorphismResult> {
    run(reference, comparison, config).map_err(|source| LogicError::Isomorphism {
        concept_nid: reference.concept_nid(),
        source: Box::new(source),
    })
}

/// Diff independent pairs in parallel. Each pair runs single-threaded.
pub fn find_isomorphisms_batch(
    pairs: &[(LogicalExpression, LogicalExpression)],
    config: &IsomorphismConfig,
) -> Vec<Result<IsomorphismResult>> {
    pairs
        .par_iter()
        .map(|(reference, comparison)| find_isomorphisms(reference, comparison, config))
        .collect()
}

fn run(
    reference: &LogicalExpression,
    comparison: &LogicalExpression,
    config: &IsomorphismConfig,
) -> Result<IsomorphismResult> {
    let context = SolverContext::new(reference, comparison, config)?;
    let solver = solver_for(config.solver);

    let seed = seed_solution(&context)?;
    let solved = solver.solve(&context, &seed)?;
    let solution = if solved.is_legal() && solved.score() >= seed.score() {
        solved
    } else {
        debug!(
            concept_nid = reference.concept_nid(),
            solver = solver.name(),
            score = solved.score(),
            "solver result rejected, keeping seed"
        );
        seed
    };

    let comparison_to_reference: BTreeMap<usize, usize> = solution
        .mapped_references()
        .map(|(r, c)| (c, r))
        .collect();

    let addition_roots = unmatched_roots(&context.reference_data, |node| {
        solution.comparison_index(node).is_some()
    });
    let deletion_roots = unmatched_roots(&context.comparison_data, |node| {
        comparison_to_reference.contains_key(&node)
    });

    let isomorphic_solution = isomorphic_placement(&context, &solution);
    let isomorphic_expression = LogicalExpression::with_solution(reference, &isomorphic_solution)?;
    let isomorphic_addition_roots = addition_roots
        .iter()
        .filter_map(|r| isomorphic_solution.get(*r).copied().flatten())
        .collect();

    let (merged_expression, merged_deletion_roots) =
        merge(&context, &comparison_to_reference, &deletion_roots)?;

    debug!(
        concept_nid = reference.concept_nid(),
        solver = solver.name(),
        score = solution.score(),
        additions = addition_roots.len(),
        deletions = deletion_roots.len(),
        "isomorphism computed"
    );

    Ok(IsomorphismResult {
        solution,
        comparison_to_reference,
        isomorphic_expression,
        isomorphic_addition_roots,
        addition_roots,
        deletion_roots,
        merged_expression,
        merged_deletion_roots,
        solver: solver.name(),
    })
}

/// Roots map to roots; set nodes that are the only one of their semantic on
/// both sides map to each other, and so do their single `And` children.
fn seed_solution(context: &SolverContext<'_>) -> Result<IsomorphicSolution> {
    let reference_root = context.reference.root_node()?;
    let comparison_root = context.comparison.root_node()?;

    let mut solution = vec![None; context.reference.slot_count()];
    solution[reference_root.index()] = Some(comparison_root.index());

    for semantic in [
        NodeSemantic::NecessarySet,
        NodeSemantic::SufficientSet,
        NodeSemantic::PropertySet,
    ] {
        let (Some(reference_set), Some(comparison_set)) = (
            unique_child(context.reference, reference_root.children(), semantic),
            unique_child(context.comparison, comparison_root.children(), semantic),
        ) else {
            continue;
        };
        solution[reference_set] = Some(comparison_set);

        let reference_children = context.reference.node(reference_set)?.children();
        let comparison_children = context.comparison.node(comparison_set)?.children();
        if let ([reference_and], [comparison_and]) = (reference_children, comparison_children) {
            let both_and = context.reference.node(*reference_and)?.semantic() == NodeSemantic::And
                && context.comparison.node(*comparison_and)?.semantic() == NodeSemantic::And;
            if both_and && solution[*reference_and].is_none() {
                solution[*reference_and] = Some(*comparison_and);
            }
        }
    }

    Ok(context.score(solution))
}

fn unique_child(
    expression: &LogicalExpression,
    children: &[usize],
    semantic: NodeSemantic,
) -> Option<usize> {
    let mut matching = children
        .iter()
        .copied()
        .filter(|child| expression.get(*child).is_some_and(|n| n.semantic() == semantic));
    let first = matching.next()?;
    matching.next().is_none().then_some(first)
}

/// Visited nodes that are unmatched while their predecessor is matched (or
/// that have no predecessor at all).
fn unmatched_roots(data: &TreeNodeVisitData, matched: impl Fn(usize) -> bool) -> BTreeSet<usize> {
    data.visited_nodes()
        .iter()
        .map(|node| node as usize)
        .filter(|node| !matched(*node))
        .filter(|node| data.predecessor(*node).map_or(true, &matched))
        .collect()
}

/// Matched reference nodes take their comparison index; unmatched reachable
/// nodes are appended after the comparison's slots, shallowest first.
fn isomorphic_placement(context: &SolverContext<'_>, solution: &IsomorphicSolution) -> Vec<Option<usize>> {
    let mut placement = solution.solution().to_vec();
    let mut next = context.comparison.slot_count();
    for depth in 0..=context.reference_data.max_depth() {
        for node in context.reference_data.nodes_at_depth(depth) {
            if placement[*node].is_none() {
                placement[*node] = Some(next);
                next += 1;
            }
        }
    }
    placement
}

fn merge(
    context: &SolverContext<'_>,
    comparison_to_reference: &BTreeMap<usize, usize>,
    deletion_roots: &BTreeSet<usize>,
) -> Result<(LogicalExpression, BTreeSet<usize>)> {
    let mut merged = context.reference.clone();
    let include: Vec<Option<usize>> = (0..context.comparison.slot_count()).map(Some).collect();
    let mut grafted = BTreeSet::new();
    for deletion_root in deletion_roots {
        let mut fragment = *deletion_root;
        let mut comparison_parent = context
            .comparison_data
            .predecessor(fragment)
            .ok_or(LogicError::MissingRoot)?;
        let mut reference_parent = *comparison_to_reference
            .get(&comparison_parent)
            .ok_or(LogicError::MissingNode(comparison_parent))?;
        // A role or feature keeps exactly one restriction: graft a copy of the
        // whole comparison restriction one level up instead.
        while context.reference.node(reference_parent)?.semantic().requires_single_child() {
            fragment = comparison_parent;
            comparison_parent = context
                .comparison_data
                .predecessor(fragment)
                .ok_or(LogicError::MissingRoot)?;
            reference_parent = *comparison_to_reference
                .get(&comparison_parent)
                .ok_or(LogicError::MissingNode(comparison_parent))?;
        }
        let added = merged.add_nodes(context.comparison, &include, &[fragment])?;
        for fragment in added {
            merged.attach_child(reference_parent, fragment)?;
            grafted.insert(fragment);
        }
    }
    Ok((merged, grafted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LogicalExpressionBuilder;

    fn definition(nid: i32, concepts: &[i32]) -> LogicalExpression {
        let mut b = LogicalExpressionBuilder::new(nid);
        let children: Vec<_> = concepts.iter().map(|c| b.concept(*c)).collect();
        let and = b.and(&children);
        b.necessary_set(&[and]);
        b.build().unwrap()
    }

    #[test]
    fn seed_matches_root_set_and_conjunction() {
        let r = definition(1, &[10, 20]);
        let c = definition(1, &[30]);
        let config = IsomorphismConfig::default();
        let context = SolverContext::new(&r, &c, &config).unwrap();
        let seed = seed_solution(&context).unwrap();
        assert_eq!(&seed.solution()[..3], &[Some(0), Some(1), Some(2)]);
        assert_eq!(seed.mapped_count(), 3);
    }

    #[test]
    fn unmatched_roots_stop_at_highest_unmatched() {
        let r = definition(1, &[10, 20]);
        let c = definition(1, &[10]);
        for solver in [SolverKind::BottomUp, SolverKind::PathHash] {
            let result = r
                .find_isomorphisms(&c, &IsomorphismConfig::with_solver(solver))
                .unwrap();
            assert_eq!(result.addition_roots().len(), 1, "{solver:?}");
            assert!(result.deletion_roots().is_empty(), "{solver:?}");
            assert!(!result.equivalent());
        }
    }

    #[test]
    fn merge_grafts_deleted_fragments() {
        let r = definition(1, &[10]);
        let c = definition(1, &[10, 99]);
        let result = r.find_isomorphisms(&c, &IsomorphismConfig::default()).unwrap();
        assert_eq!(result.deletion_roots().len(), 1);
        let merged = result.merged_expression();
        assert!(merged.contains_concept(99));
        assert_eq!(result.merged_deletion_roots().len(), 1);
        merged.validate().unwrap();
    }

    #[test]
    fn failures_are_wrapped_with_the_concept() {
        let r = LogicalExpression::new(5);
        let c = definition(5, &[1]);
        let err = r.find_isomorphisms(&c, &IsomorphismConfig::default()).unwrap_err();
        assert!(matches!(err, LogicError::Isomorphism { concept_nid: 5, .. }));
    }

    #[test]
    fn batch_runs_every_pair() {
        let pairs = vec![
            (definition(1, &[1, 2]), definition(1, &[1, 2])),
            (definition(2, &[1, 2]), definition(2, &[1])),
        ];
        let results = find_isomorphisms_batch(&pairs, &IsomorphismConfig::default());
        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().unwrap().equivalent());
        assert!(!results[1].as_ref().unwrap().equivalent());
    }

    #[test]
    fn config_parses_kebab_case_solver() {
        let config: IsomorphismConfig = serde_json::from_str(r#"{"solver":"path-hash"}"#).unwrap();
        assert_eq!(config.solver, SolverKind::PathHash);
        assert_eq!(config.max_candidate_solutions, 512);
    }
}
