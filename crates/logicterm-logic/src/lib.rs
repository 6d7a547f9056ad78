//! # Logicterm Logic
//!
//! Logical-expression graphs for concept definitions.
//!
//! A [`LogicalExpression`] is an arena of [`LogicNode`]s addressed by index,
//! with a single `Root`. This crate provides:
//!
//! - the node model ([`node`]) and a binary node-array codec ([`codec`])
//! - depth-first traversal with per-node annotations ([`TreeNodeVisitData`])
//! - node removal with compaction through explicit old→new solutions
//! - builder-style construction ([`LogicalExpressionBuilder`])
//! - isomorphism, diff, and merge between two versions of a definition
//!   ([`isomorphism`])
//!
//! ## Example
//!
//! ```
//! use logicterm_logic::{IsomorphismConfig, LogicalExpressionBuilder};
//!
//! let build = |concepts: &[i32]| {
//!     let mut b = LogicalExpressionBuilder::new(1);
//!     let children: Vec<_> = concepts.iter().map(|c| b.concept(*c)).collect();
//!     let and = b.and(&children);
//!     b.necessary_set(&[and]);
//!     b.build().unwrap()
//! };
//!
//! let current = build(&[10, 20, 30]);
//! let stored = build(&[10, 20]);
//! let result = current.find_isomorphisms(&stored, &IsomorphismConfig::default()).unwrap();
//! assert_eq!(result.addition_roots().len(), 1);
//! assert!(!result.equivalent());
//! ```

pub mod builder;
pub mod codec;
pub mod error;
pub mod expression;
mod hash;
pub mod isomorphism;
pub mod node;
pub mod solution;
pub mod visit;

pub use builder::{Axiom, LogicalExpressionBuilder};
pub use codec::{ConceptIdentity, DataSource, MemoryConceptIdentity, NodeCodec, FORMAT_VERSION};
pub use error::{LogicError, Result};
pub use expression::{
    role_termination_errors, CommitState, LogicalExpression, SubstitutionContext, SubstitutionValue,
};
pub use isomorphism::{
    find_isomorphisms, find_isomorphisms_batch, BottomUpSolver, IsomorphismConfig,
    IsomorphismResult, IsomorphismSolver, PathHashSolver, SolverContext, SolverKind,
};
pub use node::{
    ConcreteDomainOperator, LiteralValue, LogicNode, Nid, NodeKind, NodeSemantic,
    SubstitutionFieldSpec, SubstitutionKind, ROLE_TERMINATION_SENTINEL,
};
pub use solution::IsomorphicSolution;
pub use visit::TreeNodeVisitData;

/// Maximum traversal depth. Exceeding it means the children form a cycle.
pub const DEPTH_LIMIT: usize = 100;
