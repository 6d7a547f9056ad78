//! Builder-style construction of logical expressions.
//!
//! ```
//! use logicterm_logic::LogicalExpressionBuilder;
//!
//! let mut b = LogicalExpressionBuilder::new(1);
//! let disorder = b.concept(64572001);
//! let site = b.concept(39057004);
//! let finding_site = b.some_role(363698007, site);
//! let and = b.and(&[disorder, finding_site]);
//! b.necessary_set(&[and]);
//! let expression = b.build().unwrap();
//! assert_eq!(expression.node_count(), 6);
//! ```

use crate::error::{LogicError, Result};
use crate::expression::LogicalExpression;
use crate::node::{
    ConcreteDomainOperator, LiteralValue, Nid, NodeKind, SubstitutionFieldSpec, SubstitutionKind,
};
use chrono::{DateTime, Utc};

/// Handle to a pending node inside one builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Axiom(usize);

#[derive(Debug, Clone)]
struct PendingAxiom {
    kind: NodeKind,
    children: Vec<Axiom>,
}

#[derive(Debug, Clone)]
pub struct LogicalExpressionBuilder {
    concept_nid: Nid,
    pending: Vec<PendingAxiom>,
    root_children: Vec<Axiom>,
}

impl LogicalExpressionBuilder {
    pub fn new(concept_nid: Nid) -> Self {
        Self {
            concept_nid,
            pending: Vec::new(),
            root_children: Vec::new(),
        }
    }

    fn push(&mut self, kind: NodeKind, children: &[Axiom]) -> Axiom {
        self.pending.push(PendingAxiom {
            kind,
            children: children.to_vec(),
        });
        Axiom(self.pending.len() - 1)
    }

    fn push_set(&mut self, kind: NodeKind, children: &[Axiom]) -> Axiom {
        let set = self.push(kind, children);
        self.root_children.push(set);
        set
    }

    // Sets hang directly off the root.

    pub fn necessary_set(&mut self, children: &[Axiom]) -> Axiom {
        self.push_set(NodeKind::NecessarySet, children)
    }

    pub fn sufficient_set(&mut self, children: &[Axiom]) -> Axiom {
        self.push_set(NodeKind::SufficientSet, children)
    }

    pub fn property_set(&mut self, children: &[Axiom]) -> Axiom {
        self.push_set(NodeKind::PropertySet, children)
    }

    pub fn and(&mut self, children: &[Axiom]) -> Axiom {
        self.push(NodeKind::And, children)
    }

    pub fn or(&mut self, children: &[Axiom]) -> Axiom {
        self.push(NodeKind::Or, children)
    }

    pub fn disjoint_with(&mut self, children: &[Axiom]) -> Axiom {
        self.push(NodeKind::DisjointWith, children)
    }

    pub fn some_role(&mut self, role_type: Nid, restriction: Axiom) -> Axiom {
        self.push(NodeKind::RoleSome { role_type }, &[restriction])
    }

    pub fn all_role(&mut self, role_type: Nid, restriction: Axiom) -> Axiom {
        self.push(NodeKind::RoleAll { role_type }, &[restriction])
    }

    pub fn feature(
        &mut self,
        feature_type: Nid,
        measure_semantic: Nid,
        operator: ConcreteDomainOperator,
        restriction: Axiom,
    ) -> Axiom {
        self.push(
            NodeKind::Feature {
                feature_type,
                measure_semantic,
                operator,
            },
            &[restriction],
        )
    }

    pub fn concept(&mut self, concept: Nid) -> Axiom {
        self.push(NodeKind::Concept { concept }, &[])
    }

    pub fn template(&mut self, template: Nid, assemblage: Nid) -> Axiom {
        self.push(
            NodeKind::Template {
                template,
                assemblage,
            },
            &[],
        )
    }

    pub fn property_pattern_implication(&mut self, pattern: Vec<Nid>, implication: Nid) -> Axiom {
        self.push(
            NodeKind::PropertyPatternImplication {
                pattern,
                implication,
            },
            &[],
        )
    }

    pub fn boolean(&mut self, value: bool) -> Axiom {
        self.push(NodeKind::Literal(LiteralValue::Boolean(value)), &[])
    }

    pub fn double(&mut self, value: f64) -> Axiom {
        self.push(NodeKind::Literal(LiteralValue::Double(value)), &[])
    }

    pub fn instant(&mut self, value: DateTime<Utc>) -> Axiom {
        self.push(NodeKind::Literal(LiteralValue::Instant(value)), &[])
    }

    pub fn integer(&mut self, value: i32) -> Axiom {
        self.push(NodeKind::Literal(LiteralValue::Integer(value)), &[])
    }

    pub fn string(&mut self, value: impl Into<String>) -> Axiom {
        self.push(NodeKind::Literal(LiteralValue::String(value.into())), &[])
    }

    pub fn substitution(&mut self, kind: SubstitutionKind, field: impl Into<String>) -> Axiom {
        self.push(
            NodeKind::Substitution {
                kind,
                field: SubstitutionFieldSpec::new(field),
            },
            &[],
        )
    }

    /// Emit the expression in preorder (root at index 0) and validate it.
    /// An axiom used in several places is copied at each use.
    pub fn build(&self) -> Result<LogicalExpression> {
        let mut expression = LogicalExpression::new(self.concept_nid);
        let root = expression.reserve_slot();
        let children = self
            .root_children
            .iter()
            .map(|set| self.emit(&mut expression, *set))
            .collect::<Result<Vec<_>>>()?;
        expression.fill_slot(root, NodeKind::Root, children)?;
        expression.validate()?;
        Ok(expression)
    }

    fn emit(&self, expression: &mut LogicalExpression, axiom: Axiom) -> Result<usize> {
        let pending = self
            .pending
            .get(axiom.0)
            .ok_or_else(|| LogicError::malformed(format!("axiom {} is not from this builder", axiom.0)))?;
        let index = expression.reserve_slot();
        let children = pending
            .children
            .iter()
            .map(|child| self.emit(expression, *child))
            .collect::<Result<Vec<_>>>()?;
        expression.fill_slot(index, pending.kind.clone(), children)?;
        Ok(index)
    }
}
