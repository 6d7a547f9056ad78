//! Logic node model.
//!
//! A logical expression is an arena of [`LogicNode`] records. Every node has a
//! stable index inside its owning expression, a semantic tag, an ordered list
//! of child indices, and a kind-specific payload. Nodes never hold references to
//! other nodes; the child index list is the only link.

use crate::codec;
use crate::error::{LogicError, Result};
use crate::hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Native (local) integer identifier of a concept or other component.
pub type Nid = i32;

/// Payload stored in the literal child that replaces a role restriction lost
/// while pruning a subtree.
pub const ROLE_TERMINATION_SENTINEL: &str = "role termination error";

/// Semantic tag of a node. The discriminant is the wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeSemantic {
    Root = 0,
    NecessarySet = 1,
    SufficientSet = 2,
    PropertySet = 3,
    And = 4,
    Or = 5,
    DisjointWith = 6,
    RoleAll = 7,
    RoleSome = 8,
    Feature = 9,
    Template = 10,
    Concept = 11,
    PropertyPatternImplication = 12,
    LiteralBoolean = 13,
    LiteralDouble = 14,
    LiteralInstant = 15,
    LiteralInteger = 16,
    LiteralString = 17,
    SubstitutionBoolean = 18,
    SubstitutionConcept = 19,
    SubstitutionDouble = 20,
    SubstitutionInstant = 21,
    SubstitutionInteger = 22,
    SubstitutionString = 23,
}

impl NodeSemantic {
    /// All semantics, ordered by wire byte.
    pub const ALL: [NodeSemantic; 24] = [
        NodeSemantic::Root,
        NodeSemantic::NecessarySet,
        NodeSemantic::SufficientSet,
        NodeSemantic::PropertySet,
        NodeSemantic::And,
        NodeSemantic::Or,
        NodeSemantic::DisjointWith,
        NodeSemantic::RoleAll,
        NodeSemantic::RoleSome,
        NodeSemantic::Feature,
        NodeSemantic::Template,
        NodeSemantic::Concept,
        NodeSemantic::PropertyPatternImplication,
        NodeSemantic::LiteralBoolean,
        NodeSemantic::LiteralDouble,
        NodeSemantic::LiteralInstant,
        NodeSemantic::LiteralInteger,
        NodeSemantic::LiteralString,
        NodeSemantic::SubstitutionBoolean,
        NodeSemantic::SubstitutionConcept,
        NodeSemantic::SubstitutionDouble,
        NodeSemantic::SubstitutionInstant,
        NodeSemantic::SubstitutionInteger,
        NodeSemantic::SubstitutionString,
    ];

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        Self::ALL
            .get(byte as usize)
            .copied()
            .ok_or(LogicError::UnsupportedSemantic(byte))
    }

    /// Necessary, sufficient, and property sets: the direct children of the root.
    pub fn is_set(self) -> bool {
        matches!(
            self,
            NodeSemantic::NecessarySet | NodeSemantic::SufficientSet | NodeSemantic::PropertySet
        )
    }

    /// Nodes whose children form an unordered group.
    pub fn is_connective(self) -> bool {
        self.is_set()
            || matches!(
                self,
                NodeSemantic::Root | NodeSemantic::And | NodeSemantic::Or | NodeSemantic::DisjointWith
            )
    }

    pub fn is_role(self) -> bool {
        matches!(self, NodeSemantic::RoleAll | NodeSemantic::RoleSome)
    }

    /// Roles and features restrict exactly one child.
    pub fn requires_single_child(self) -> bool {
        self.is_role() || self == NodeSemantic::Feature
    }

    pub fn is_literal(self) -> bool {
        matches!(
            self,
            NodeSemantic::LiteralBoolean
                | NodeSemantic::LiteralDouble
                | NodeSemantic::LiteralInstant
                | NodeSemantic::LiteralInteger
                | NodeSemantic::LiteralString
        )
    }

    pub fn is_substitution(self) -> bool {
        matches!(
            self,
            NodeSemantic::SubstitutionBoolean
                | NodeSemantic::SubstitutionConcept
                | NodeSemantic::SubstitutionDouble
                | NodeSemantic::SubstitutionInstant
                | NodeSemantic::SubstitutionInteger
                | NodeSemantic::SubstitutionString
        )
    }

    /// Semantics that never carry children.
    pub fn is_terminal(self) -> bool {
        self.is_literal()
            || self.is_substitution()
            || matches!(
                self,
                NodeSemantic::Concept | NodeSemantic::Template | NodeSemantic::PropertyPatternImplication
            )
    }
}

/// Comparison operator of a feature (concrete domain) restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConcreteDomainOperator {
    Equals = 0,
    LessThan = 1,
    LessThanEquals = 2,
    GreaterThan = 3,
    GreaterThanEquals = 4,
}

impl ConcreteDomainOperator {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Equals),
            1 => Ok(Self::LessThan),
            2 => Ok(Self::LessThanEquals),
            3 => Ok(Self::GreaterThan),
            4 => Ok(Self::GreaterThanEquals),
            other => Err(LogicError::malformed(format!(
                "unknown concrete domain operator {other}"
            ))),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::LessThan => "<",
            Self::LessThanEquals => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanEquals => ">=",
        }
    }
}

/// Value carried by a literal node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LiteralValue {
    Boolean(bool),
    Double(f64),
    Instant(DateTime<Utc>),
    Integer(i32),
    String(String),
}

impl LiteralValue {
    pub fn semantic(&self) -> NodeSemantic {
        match self {
            LiteralValue::Boolean(_) => NodeSemantic::LiteralBoolean,
            LiteralValue::Double(_) => NodeSemantic::LiteralDouble,
            LiteralValue::Instant(_) => NodeSemantic::LiteralInstant,
            LiteralValue::Integer(_) => NodeSemantic::LiteralInteger,
            LiteralValue::String(_) => NodeSemantic::LiteralString,
        }
    }
}

// Doubles compare by bit pattern so that equality stays reflexive.
impl PartialEq for LiteralValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LiteralValue::Boolean(a), LiteralValue::Boolean(b)) => a == b,
            (LiteralValue::Double(a), LiteralValue::Double(b)) => a.to_bits() == b.to_bits(),
            (LiteralValue::Instant(a), LiteralValue::Instant(b)) => a == b,
            (LiteralValue::Integer(a), LiteralValue::Integer(b)) => a == b,
            (LiteralValue::String(a), LiteralValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LiteralValue {}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Boolean(v) => write!(f, "{v}"),
            LiteralValue::Double(v) => write!(f, "{v}"),
            LiteralValue::Instant(v) => write!(f, "{}", v.to_rfc3339()),
            LiteralValue::Integer(v) => write!(f, "{v}"),
            LiteralValue::String(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Value type a substitution node stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubstitutionKind {
    Boolean,
    Concept,
    Double,
    Instant,
    Integer,
    String,
}

impl SubstitutionKind {
    pub fn semantic(self) -> NodeSemantic {
        match self {
            SubstitutionKind::Boolean => NodeSemantic::SubstitutionBoolean,
            SubstitutionKind::Concept => NodeSemantic::SubstitutionConcept,
            SubstitutionKind::Double => NodeSemantic::SubstitutionDouble,
            SubstitutionKind::Instant => NodeSemantic::SubstitutionInstant,
            SubstitutionKind::Integer => NodeSemantic::SubstitutionInteger,
            SubstitutionKind::String => NodeSemantic::SubstitutionString,
        }
    }

    pub(crate) fn from_semantic(semantic: NodeSemantic) -> Option<Self> {
        match semantic {
            NodeSemantic::SubstitutionBoolean => Some(Self::Boolean),
            NodeSemantic::SubstitutionConcept => Some(Self::Concept),
            NodeSemantic::SubstitutionDouble => Some(Self::Double),
            NodeSemantic::SubstitutionInstant => Some(Self::Instant),
            NodeSemantic::SubstitutionInteger => Some(Self::Integer),
            NodeSemantic::SubstitutionString => Some(Self::String),
            _ => None,
        }
    }
}

/// Names the template field a substitution node is filled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubstitutionFieldSpec(pub String);

impl SubstitutionFieldSpec {
    pub fn new(field: impl Into<String>) -> Self {
        Self(field.into())
    }

    pub fn field(&self) -> &str {
        &self.0
    }
}

/// Kind-specific payload of a node. The variant determines the semantic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    NecessarySet,
    SufficientSet,
    PropertySet,
    And,
    Or,
    DisjointWith,
    RoleAll {
        role_type: Nid,
    },
    RoleSome {
        role_type: Nid,
    },
    Feature {
        feature_type: Nid,
        measure_semantic: Nid,
        operator: ConcreteDomainOperator,
    },
    Template {
        template: Nid,
        assemblage: Nid,
    },
    Concept {
        concept: Nid,
    },
    PropertyPatternImplication {
        pattern: Vec<Nid>,
        implication: Nid,
    },
    Literal(LiteralValue),
    Substitution {
        kind: SubstitutionKind,
        field: SubstitutionFieldSpec,
    },
}

impl NodeKind {
    pub fn semantic(&self) -> NodeSemantic {
        match self {
            NodeKind::Root => NodeSemantic::Root,
            NodeKind::NecessarySet => NodeSemantic::NecessarySet,
            NodeKind::SufficientSet => NodeSemantic::SufficientSet,
            NodeKind::PropertySet => NodeSemantic::PropertySet,
            NodeKind::And => NodeSemantic::And,
            NodeKind::Or => NodeSemantic::Or,
            NodeKind::DisjointWith => NodeSemantic::DisjointWith,
            NodeKind::RoleAll { .. } => NodeSemantic::RoleAll,
            NodeKind::RoleSome { .. } => NodeSemantic::RoleSome,
            NodeKind::Feature { .. } => NodeSemantic::Feature,
            NodeKind::Template { .. } => NodeSemantic::Template,
            NodeKind::Concept { .. } => NodeSemantic::Concept,
            NodeKind::PropertyPatternImplication { .. } => NodeSemantic::PropertyPatternImplication,
            NodeKind::Literal(value) => value.semantic(),
            NodeKind::Substitution { kind, .. } => kind.semantic(),
        }
    }

    /// Visit every concept nid carried by this node's own payload.
    pub fn for_each_concept(&self, mut f: impl FnMut(Nid)) {
        match self {
            NodeKind::RoleAll { role_type } | NodeKind::RoleSome { role_type } => f(*role_type),
            NodeKind::Feature {
                feature_type,
                measure_semantic,
                ..
            } => {
                f(*feature_type);
                f(*measure_semantic);
            }
            NodeKind::Template {
                template,
                assemblage,
            } => {
                f(*template);
                f(*assemblage);
            }
            NodeKind::Concept { concept } => f(*concept),
            NodeKind::PropertyPatternImplication {
                pattern,
                implication,
            } => {
                for nid in pattern {
                    f(*nid);
                }
                f(*implication);
            }
            NodeKind::Root
            | NodeKind::NecessarySet
            | NodeKind::SufficientSet
            | NodeKind::PropertySet
            | NodeKind::And
            | NodeKind::Or
            | NodeKind::DisjointWith
            | NodeKind::Literal(_)
            | NodeKind::Substitution { .. } => {}
        }
    }

    /// Mutable counterpart of [`NodeKind::for_each_concept`].
    pub fn for_each_concept_mut(&mut self, mut f: impl FnMut(&mut Nid)) {
        match self {
            NodeKind::RoleAll { role_type } | NodeKind::RoleSome { role_type } => f(role_type),
            NodeKind::Feature {
                feature_type,
                measure_semantic,
                ..
            } => {
                f(feature_type);
                f(measure_semantic);
            }
            NodeKind::Template {
                template,
                assemblage,
            } => {
                f(template);
                f(assemblage);
            }
            NodeKind::Concept { concept } => f(concept),
            NodeKind::PropertyPatternImplication {
                pattern,
                implication,
            } => {
                for nid in pattern.iter_mut() {
                    f(nid);
                }
                f(implication);
            }
            NodeKind::Root
            | NodeKind::NecessarySet
            | NodeKind::SufficientSet
            | NodeKind::PropertySet
            | NodeKind::And
            | NodeKind::Or
            | NodeKind::DisjointWith
            | NodeKind::Literal(_)
            | NodeKind::Substitution { .. } => {}
        }
    }

    pub fn role_termination_sentinel() -> Self {
        NodeKind::Literal(LiteralValue::String(ROLE_TERMINATION_SENTINEL.to_string()))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Root => write!(f, "Root"),
            NodeKind::NecessarySet => write!(f, "Necessary set"),
            NodeKind::SufficientSet => write!(f, "Sufficient set"),
            NodeKind::PropertySet => write!(f, "Property set"),
            NodeKind::And => write!(f, "And"),
            NodeKind::Or => write!(f, "Or"),
            NodeKind::DisjointWith => write!(f, "Disjoint with"),
            NodeKind::RoleAll { role_type } => write!(f, "All role [{role_type}]"),
            NodeKind::RoleSome { role_type } => write!(f, "Some role [{role_type}]"),
            NodeKind::Feature {
                feature_type,
                measure_semantic,
                operator,
            } => write!(
                f,
                "Feature [{feature_type}] {} (measure {measure_semantic})",
                operator.symbol()
            ),
            NodeKind::Template {
                template,
                assemblage,
            } => write!(f, "Template [{template}] from [{assemblage}]"),
            NodeKind::Concept { concept } => write!(f, "Concept [{concept}]"),
            NodeKind::PropertyPatternImplication {
                pattern,
                implication,
            } => write!(f, "Property pattern {pattern:?} implies [{implication}]"),
            NodeKind::Literal(value) => write!(f, "Literal {value}"),
            NodeKind::Substitution { kind, field } => {
                write!(f, "Substitution {kind:?} <{}>", field.field())
            }
        }
    }
}

/// One node of a logical expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicNode {
    index: usize,
    kind: NodeKind,
    children: Vec<usize>,
}

impl LogicNode {
    pub(crate) fn new(index: usize, kind: NodeKind, children: Vec<usize>) -> Self {
        Self {
            index,
            kind,
            children,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn semantic(&self) -> NodeSemantic {
        self.kind.semantic()
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Same semantic and same payload; children are not compared.
    pub fn data_equals(&self, other: &LogicNode) -> bool {
        self.kind == other.kind
    }

    /// Hash of semantic and payload, excluding children and index.
    pub fn semantic_hash(&self) -> u64 {
        hash::fnv1a64(&codec::identity_bytes(&self.kind))
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<usize> {
        &mut self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_bytes_round_trip() {
        for semantic in NodeSemantic::ALL {
            assert_eq!(NodeSemantic::from_byte(semantic.to_byte()).unwrap(), semantic);
        }
        assert!(matches!(
            NodeSemantic::from_byte(200),
            Err(LogicError::UnsupportedSemantic(200))
        ));
    }

    #[test]
    fn nan_literals_are_equal_to_themselves() {
        let a = LiteralValue::Double(f64::NAN);
        assert_eq!(a, a.clone());
        assert_ne!(LiteralValue::Double(1.0), LiteralValue::Integer(1));
    }

    #[test]
    fn concept_visitors_cover_payloads() {
        let mut kind = NodeKind::PropertyPatternImplication {
            pattern: vec![1, 2],
            implication: 3,
        };
        let mut seen = Vec::new();
        kind.for_each_concept(|nid| seen.push(nid));
        assert_eq!(seen, vec![1, 2, 3]);

        kind.for_each_concept_mut(|nid| *nid += 10);
        let mut seen = Vec::new();
        kind.for_each_concept(|nid| seen.push(nid));
        assert_eq!(seen, vec![11, 12, 13]);
    }

    #[test]
    fn semantic_hash_ignores_index_and_children() {
        let a = LogicNode::new(0, NodeKind::RoleSome { role_type: 7 }, vec![1]);
        let b = LogicNode::new(5, NodeKind::RoleSome { role_type: 7 }, vec![9]);
        let c = LogicNode::new(5, NodeKind::RoleSome { role_type: 8 }, vec![9]);
        assert_eq!(a.semantic_hash(), b.semantic_hash());
        assert_ne!(a.semantic_hash(), c.semantic_hash());
        assert!(a.data_equals(&b));
    }
}
