//! Logical expressions: an index-addressed arena of logic nodes.
//!
//! Nodes live in a growable vector of slots and address each other only by
//! slot index. Removing a node leaves holes that are reclaimed by renumbering
//! through an explicit old→new solution array ([`LogicalExpression::with_solution`]).

use crate::codec;
use crate::error::{LogicError, Result};
use crate::node::{
    LiteralValue, LogicNode, Nid, NodeKind, NodeSemantic, SubstitutionFieldSpec, SubstitutionKind,
};
use crate::visit::TreeNodeVisitData;
use crate::DEPTH_LIMIT;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitState {
    Uncommitted,
    Committed,
}

// ============================================================================
// Role termination repair
// ============================================================================

static ROLE_TERMINATION_ERRORS: AtomicU64 = AtomicU64::new(0);

/// Occurrences logged at `warn` before demoting to `debug`.
const ROLE_TERMINATION_WARN_LIMIT: u64 = 100;

/// Number of role or feature nodes repaired with a sentinel child since start.
pub fn role_termination_errors() -> u64 {
    ROLE_TERMINATION_ERRORS.load(Ordering::Relaxed)
}

fn record_role_termination(concept_nid: Nid, node: usize) {
    let occurrence = ROLE_TERMINATION_ERRORS.fetch_add(1, Ordering::Relaxed) + 1;
    if occurrence <= ROLE_TERMINATION_WARN_LIMIT {
        warn!(
            concept_nid,
            node,
            occurrence,
            "role termination error: restriction pruned, substituting sentinel literal"
        );
    } else {
        debug!(
            concept_nid,
            node,
            occurrence,
            "role termination error: restriction pruned, substituting sentinel literal"
        );
    }
}

// ============================================================================
// Substitution
// ============================================================================

/// Value bound to a substitution field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubstitutionValue {
    Concept(Nid),
    Literal(LiteralValue),
}

/// Field bindings used by [`LogicalExpression::substitute`].
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    values: BTreeMap<SubstitutionFieldSpec, SubstitutionValue>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: SubstitutionValue) -> Self {
        self.insert(SubstitutionFieldSpec::new(field), value);
        self
    }

    pub fn insert(&mut self, field: SubstitutionFieldSpec, value: SubstitutionValue) {
        self.values.insert(field, value);
    }

    pub fn get(&self, field: &SubstitutionFieldSpec) -> Option<&SubstitutionValue> {
        self.values.get(field)
    }
}

fn substitution_accepts(kind: SubstitutionKind, value: &SubstitutionValue) -> bool {
    matches!(
        (kind, value),
        (SubstitutionKind::Concept, SubstitutionValue::Concept(_))
            | (SubstitutionKind::Boolean, SubstitutionValue::Literal(LiteralValue::Boolean(_)))
            | (SubstitutionKind::Double, SubstitutionValue::Literal(LiteralValue::Double(_)))
            | (SubstitutionKind::Instant, SubstitutionValue::Literal(LiteralValue::Instant(_)))
            | (SubstitutionKind::Integer, SubstitutionValue::Literal(LiteralValue::Integer(_)))
            | (SubstitutionKind::String, SubstitutionValue::Literal(LiteralValue::String(_)))
    )
}

const NODE_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_6769_6374_6572_6d2d_6e6f_6465_0001);

// ============================================================================
// LogicalExpression
// ============================================================================

/// Formal definition of one concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalExpression {
    pub(crate) concept_nid: Nid,
    pub(crate) nodes: Vec<Option<LogicNode>>,
    pub(crate) root: Option<usize>,
    pub(crate) commit_state: CommitState,
}

impl LogicalExpression {
    /// Empty, uncommitted expression defining `concept_nid`.
    pub fn new(concept_nid: Nid) -> Self {
        Self {
            concept_nid,
            nodes: Vec::new(),
            root: None,
            commit_state: CommitState::Uncommitted,
        }
    }

    pub fn concept_nid(&self) -> Nid {
        self.concept_nid
    }

    pub fn set_concept_nid(&mut self, concept_nid: Nid) {
        self.concept_nid = concept_nid;
    }

    pub fn commit_state(&self) -> CommitState {
        self.commit_state
    }

    pub fn mark_committed(&mut self) {
        self.commit_state = CommitState::Committed;
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn root_node(&self) -> Result<&LogicNode> {
        let root = self.root.ok_or(LogicError::MissingRoot)?;
        self.node(root)
    }

    /// Number of slots, holes included.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of occupied slots.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn has_holes(&self) -> bool {
        self.nodes.iter().any(Option::is_none)
    }

    pub fn get(&self, index: usize) -> Option<&LogicNode> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    pub fn node(&self, index: usize) -> Result<&LogicNode> {
        self.get(index).ok_or(LogicError::MissingNode(index))
    }

    /// Occupied nodes in index order.
    pub fn nodes(&self) -> impl Iterator<Item = &LogicNode> + '_ {
        self.nodes.iter().flatten()
    }

    /// Append a node. Children must already exist; the first `Root` becomes the
    /// root. Marks the expression uncommitted.
    pub fn add_node(&mut self, kind: NodeKind, children: Vec<usize>) -> Result<usize> {
        let index = self.nodes.len();
        for child in &children {
            if self.get(*child).is_none() {
                return Err(LogicError::DanglingChild {
                    parent: index,
                    child: *child,
                });
            }
        }
        if kind == NodeKind::Root {
            if self.root.is_some() {
                return Err(LogicError::malformed("expression already has a root"));
            }
            self.root = Some(index);
        }
        self.nodes.push(Some(LogicNode::new(index, kind, children)));
        self.commit_state = CommitState::Uncommitted;
        Ok(index)
    }

    pub(crate) fn push_node(&mut self, node: LogicNode) {
        if node.semantic() == NodeSemantic::Root && self.root.is_none() {
            self.root = Some(node.index());
        }
        self.nodes.push(Some(node));
    }

    /// Reserve an empty slot so a parent can be numbered before its children.
    pub(crate) fn reserve_slot(&mut self) -> usize {
        self.nodes.push(None);
        self.nodes.len() - 1
    }

    pub(crate) fn fill_slot(&mut self, index: usize, kind: NodeKind, children: Vec<usize>) -> Result<()> {
        let slot = self
            .nodes
            .get_mut(index)
            .ok_or(LogicError::MissingNode(index))?;
        if slot.is_some() {
            return Err(LogicError::malformed(format!("slot {index} is already occupied")));
        }
        if kind == NodeKind::Root {
            if self.root.is_some() {
                return Err(LogicError::malformed("expression already has a root"));
            }
            self.root = Some(index);
        }
        *slot = Some(LogicNode::new(index, kind, children));
        self.commit_state = CommitState::Uncommitted;
        Ok(())
    }

    fn node_mut(&mut self, index: usize) -> Result<&mut LogicNode> {
        self.nodes
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(LogicError::MissingNode(index))
    }

    // ------------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------------

    /// Visit `start` and then its children in child order, annotating `data`.
    ///
    /// Each node inherits its predecessor's referenced concepts before the
    /// visitor runs. Fails once `depth` passes [`DEPTH_LIMIT`], which can only
    /// happen if the children form a cycle.
    pub fn depth_first_visit(
        &self,
        visitor: Option<&mut dyn FnMut(&LogicNode, &TreeNodeVisitData)>,
        start: usize,
        data: &mut TreeNodeVisitData,
        depth: usize,
    ) -> Result<()> {
        let mut ignore = |_: &LogicNode, _: &TreeNodeVisitData| {};
        let visitor: &mut dyn FnMut(&LogicNode, &TreeNodeVisitData) = match visitor {
            Some(visitor) => visitor,
            None => &mut ignore,
        };
        self.visit_from(visitor, start, data, depth)
    }

    fn visit_from(
        &self,
        visitor: &mut dyn FnMut(&LogicNode, &TreeNodeVisitData),
        index: usize,
        data: &mut TreeNodeVisitData,
        depth: usize,
    ) -> Result<()> {
        if depth > DEPTH_LIMIT {
            return Err(LogicError::DepthLimitExceeded {
                node: index,
                limit: DEPTH_LIMIT,
            });
        }
        if index >= data.slot_count() {
            return Err(LogicError::malformed(format!(
                "visit data sized for {} slots cannot hold node {index}",
                data.slot_count()
            )));
        }
        let node = self.node(index)?;
        data.begin_node(node, depth);
        visitor(node, data);
        for child in node.children() {
            if self.get(*child).is_none() {
                return Err(LogicError::DanglingChild {
                    parent: index,
                    child: *child,
                });
            }
            data.link_child(index, *child);
            self.visit_from(visitor, *child, data, depth + 1)?;
        }
        Ok(())
    }

    /// Visit data for a traversal from the root.
    pub fn visit_data(&self) -> Result<TreeNodeVisitData> {
        let root = self.root.ok_or(LogicError::MissingRoot)?;
        let mut data = TreeNodeVisitData::new(self.slot_count());
        self.depth_first_visit(None, root, &mut data, 0)?;
        Ok(data)
    }

    /// Visit data with lineage and semantic hashes.
    pub fn hashed_visit_data(&self) -> Result<TreeNodeVisitData> {
        let root = self.root.ok_or(LogicError::MissingRoot)?;
        let mut data = TreeNodeVisitData::hashed(self.slot_count());
        self.depth_first_visit(None, root, &mut data, 0)?;
        Ok(data)
    }

    pub(crate) fn check_acyclic(&self) -> Result<()> {
        self.visit_data().map(|_| ())
    }

    /// Derived parent links, indexed by slot. Nodes with several parents
    /// report the first one reached in depth-first order.
    pub fn parent_map(&self) -> Result<Vec<Option<usize>>> {
        let data = self.visit_data()?;
        Ok((0..self.slot_count()).map(|i| data.predecessor(i)).collect())
    }

    // ------------------------------------------------------------------------
    // Construction from another expression
    // ------------------------------------------------------------------------

    /// Copy the nodes of `another` that have an entry in `solution`, placing
    /// old node `i` at new index `solution[i]`.
    ///
    /// Children without an entry are dropped. Unused target indices stay as
    /// holes. A role or feature whose restriction was dropped gets a sentinel
    /// literal child appended after the placed nodes.
    pub fn with_solution(another: &LogicalExpression, solution: &[Option<usize>]) -> Result<Self> {
        let old_root = another.root.ok_or(LogicError::MissingRoot)?;
        let new_root = solution
            .get(old_root)
            .copied()
            .flatten()
            .ok_or(LogicError::MissingRoot)?;
        let len = solution.iter().flatten().max().map_or(0, |max| max + 1);

        let mut nodes: Vec<Option<LogicNode>> = vec![None; len];
        let mut pruned = Vec::new();
        for (old, new) in solution.iter().enumerate() {
            let Some(new) = *new else {
                continue;
            };
            let source = another.node(old)?;
            if nodes[new].is_some() {
                return Err(LogicError::malformed(format!(
                    "solution maps more than one node to index {new}"
                )));
            }
            let children: Vec<usize> = source
                .children()
                .iter()
                .filter_map(|child| solution.get(*child).copied().flatten())
                .collect();
            if children.is_empty()
                && !source.children().is_empty()
                && source.semantic().requires_single_child()
            {
                pruned.push(new);
            }
            nodes[new] = Some(LogicNode::new(new, source.kind().clone(), children));
        }

        let mut expression = Self {
            concept_nid: another.concept_nid,
            nodes,
            root: Some(new_root),
            commit_state: CommitState::Uncommitted,
        };
        for index in pruned {
            expression.terminate_role(index)?;
        }
        Ok(expression)
    }

    /// Copy the subtrees rooted at `old_ids` from `another` into this
    /// expression, skipping every descendant whose `solution` entry is `None`.
    ///
    /// Returns the new indices of the `old_ids` themselves, in order.
    pub fn add_nodes(
        &mut self,
        another: &LogicalExpression,
        solution: &[Option<usize>],
        old_ids: &[usize],
    ) -> Result<Vec<usize>> {
        old_ids
            .iter()
            .map(|old| self.add_subtree(another, solution, *old, 0))
            .collect()
    }

    fn add_subtree(
        &mut self,
        another: &LogicalExpression,
        solution: &[Option<usize>],
        old: usize,
        depth: usize,
    ) -> Result<usize> {
        if depth > DEPTH_LIMIT {
            return Err(LogicError::DepthLimitExceeded {
                node: old,
                limit: DEPTH_LIMIT,
            });
        }
        let source = another.node(old)?;
        let mut children = Vec::with_capacity(source.children().len());
        for child in source.children() {
            if solution.get(*child).copied().flatten().is_some() {
                children.push(self.add_subtree(another, solution, *child, depth + 1)?);
            }
        }
        let pruned = children.is_empty()
            && !source.children().is_empty()
            && source.semantic().requires_single_child();
        let index = self.add_node(source.kind().clone(), children)?;
        if pruned {
            self.terminate_role(index)?;
        }
        Ok(index)
    }

    pub(crate) fn attach_child(&mut self, parent: usize, child: usize) -> Result<()> {
        self.node(child)?;
        self.node_mut(parent)?.children_mut().push(child);
        self.commit_state = CommitState::Uncommitted;
        Ok(())
    }

    fn terminate_role(&mut self, index: usize) -> Result<()> {
        let sentinel = self.nodes.len();
        self.node_mut(index)?.children_mut().push(sentinel);
        self.nodes.push(Some(LogicNode::new(
            sentinel,
            NodeKind::role_termination_sentinel(),
            Vec::new(),
        )));
        record_role_termination(self.concept_nid, index);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Removal and compaction
    // ------------------------------------------------------------------------

    /// Preorder numbering of every node reachable from the root.
    fn preorder_solution(&self) -> Result<Vec<Option<usize>>> {
        let root = self.root.ok_or(LogicError::MissingRoot)?;
        let mut solution = vec![None; self.nodes.len()];
        let mut next = 0;
        self.number_preorder(root, 0, &mut solution, &mut next)?;
        Ok(solution)
    }

    fn number_preorder(
        &self,
        index: usize,
        depth: usize,
        solution: &mut [Option<usize>],
        next: &mut usize,
    ) -> Result<()> {
        if depth > DEPTH_LIMIT {
            return Err(LogicError::DepthLimitExceeded {
                node: index,
                limit: DEPTH_LIMIT,
            });
        }
        let node = self.node(index)?;
        if solution[index].is_some() {
            return Ok(());
        }
        solution[index] = Some(*next);
        *next += 1;
        for child in node.children() {
            self.number_preorder(*child, depth + 1, solution, next)?;
        }
        Ok(())
    }

    /// Renumber reachable nodes to contiguous preorder indices, root at 0.
    pub fn compacted(&self) -> Result<Self> {
        let solution = self.preorder_solution()?;
        let mut compacted = Self::with_solution(self, &solution)?;
        compacted.commit_state = self.commit_state;
        Ok(compacted)
    }

    /// Detach `index` from its parents, drop it and every descendant no longer
    /// reachable, then compact.
    pub fn remove_node(&mut self, index: usize) -> Result<()> {
        self.node(index)?;
        if self.root == Some(index) {
            return Err(LogicError::malformed("the root node cannot be removed"));
        }

        let mut orphaned = Vec::new();
        for node in self.nodes.iter_mut().flatten() {
            let before = node.children().len();
            node.children_mut().retain(|child| *child != index);
            if node.children().len() != before
                && node.children().is_empty()
                && node.semantic().requires_single_child()
            {
                orphaned.push(node.index());
            }
        }

        let reachable: RoaringBitmap = self
            .preorder_solution()?
            .iter()
            .enumerate()
            .filter(|(_, new)| new.is_some())
            .map(|(old, _)| old as u32)
            .collect();
        for slot in self.nodes.iter_mut() {
            if slot
                .as_ref()
                .is_some_and(|node| !reachable.contains(node.index() as u32))
            {
                *slot = None;
            }
        }
        for role in orphaned {
            if self.get(role).is_some() {
                self.terminate_role(role)?;
            }
        }

        let mut compacted = self.compacted()?;
        compacted.commit_state = CommitState::Uncommitted;
        *self = compacted;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Concept queries and rewriting
    // ------------------------------------------------------------------------

    pub fn contains_concept(&self, concept: Nid) -> bool {
        self.nodes().any(|node| {
            let mut found = false;
            node.kind().for_each_concept(|nid| found |= nid == concept);
            found
        })
    }

    pub fn referenced_concepts(&self) -> BTreeSet<Nid> {
        let mut concepts = BTreeSet::new();
        for node in self.nodes() {
            node.kind().for_each_concept(|nid| {
                concepts.insert(nid);
            });
        }
        concepts
    }

    pub fn nodes_of_semantic(&self, semantic: NodeSemantic) -> Vec<usize> {
        self.nodes()
            .filter(|node| node.semantic() == semantic)
            .map(LogicNode::index)
            .collect()
    }

    /// Replace every reference to `old` by `new`; returns the number replaced.
    pub fn replace_all_concept_occurrences(&mut self, old: Nid, new: Nid) -> usize {
        let mut replaced = 0;
        for node in self.nodes.iter_mut().flatten() {
            node.kind_mut().for_each_concept_mut(|nid| {
                if *nid == old {
                    *nid = new;
                    replaced += 1;
                }
            });
        }
        if replaced > 0 {
            self.commit_state = CommitState::Uncommitted;
        }
        replaced
    }

    /// Copy with bound substitution nodes replaced by concept or literal nodes.
    /// Unbound substitutions are kept.
    pub fn substitute(&self, context: &SubstitutionContext) -> Result<LogicalExpression> {
        let mut substituted = self.clone();
        for node in substituted.nodes.iter_mut().flatten() {
            let replacement = match node.kind() {
                NodeKind::Substitution { kind, field } => match context.get(field) {
                    Some(value) if substitution_accepts(*kind, value) => match value {
                        SubstitutionValue::Concept(concept) => NodeKind::Concept { concept: *concept },
                        SubstitutionValue::Literal(literal) => NodeKind::Literal(literal.clone()),
                    },
                    Some(value) => {
                        return Err(LogicError::malformed(format!(
                            "substitution field <{}> expects {kind:?}, bound to {value:?}",
                            field.field()
                        )))
                    }
                    None => continue,
                },
                _ => continue,
            };
            *node.kind_mut() = replacement;
        }
        substituted.commit_state = CommitState::Uncommitted;
        Ok(substituted)
    }

    // ------------------------------------------------------------------------
    // Validation and equality
    // ------------------------------------------------------------------------

    /// Structural well-formedness check.
    pub fn validate(&self) -> Result<()> {
        let root = self.root_node()?;
        if root.semantic() != NodeSemantic::Root {
            return Err(LogicError::malformed(format!(
                "root node {} has semantic {:?}",
                root.index(),
                root.semantic()
            )));
        }
        for (slot, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else {
                continue;
            };
            if node.index() != slot {
                return Err(LogicError::malformed(format!(
                    "node in slot {slot} claims index {}",
                    node.index()
                )));
            }
            for child in node.children() {
                let child_node = self.get(*child).ok_or(LogicError::DanglingChild {
                    parent: slot,
                    child: *child,
                })?;
                if child_node.semantic() == NodeSemantic::Root {
                    return Err(LogicError::malformed(format!(
                        "node {slot} has the root as a child"
                    )));
                }
            }
            let semantic = node.semantic();
            if semantic.requires_single_child() && node.children().len() != 1 {
                return Err(LogicError::malformed(format!(
                    "{semantic:?} node {slot} must have exactly one child, found {}",
                    node.children().len()
                )));
            }
            if semantic.is_terminal() && !node.is_leaf() {
                return Err(LogicError::malformed(format!(
                    "{semantic:?} node {slot} cannot have children"
                )));
            }
        }

        let data = self.visit_data()?;
        if let Some(unreachable) = self.nodes().find(|node| !data.visited(node.index())) {
            return Err(LogicError::malformed(format!(
                "node {} is not reachable from the root",
                unreachable.index()
            )));
        }
        Ok(())
    }

    /// Identity of the subtree at `index`: payload plus the sorted identities
    /// of its children, down to `max_depth` levels.
    pub fn node_uuid(&self, index: usize, max_depth: usize) -> Result<Uuid> {
        self.node_uuid_at(index, 0, max_depth)
    }

    fn node_uuid_at(&self, index: usize, depth: usize, max_depth: usize) -> Result<Uuid> {
        if depth > DEPTH_LIMIT {
            return Err(LogicError::DepthLimitExceeded {
                node: index,
                limit: DEPTH_LIMIT,
            });
        }
        let node = self.node(index)?;
        let mut bytes = codec::identity_bytes(node.kind());
        if depth < max_depth {
            let mut children = node
                .children()
                .iter()
                .map(|child| self.node_uuid_at(*child, depth + 1, max_depth))
                .collect::<Result<Vec<_>>>()?;
            children.sort_unstable();
            for child in children {
                bytes.extend_from_slice(child.as_bytes());
            }
        }
        Ok(Uuid::new_v5(&NODE_NAMESPACE, &bytes))
    }

    /// Graph equality up to child reordering, compared `max_depth` levels deep.
    /// Node indices and the concept nid are ignored.
    pub fn structurally_equal(&self, other: &LogicalExpression, max_depth: usize) -> bool {
        match (self.root, other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => matches!(
                (self.node_uuid(a, max_depth), other.node_uuid(b, max_depth)),
                (Ok(x), Ok(y)) if x == y
            ),
            _ => false,
        }
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, index: usize, depth: usize) -> fmt::Result {
        let width = (depth + 1) * 2;
        if depth > DEPTH_LIMIT {
            return writeln!(f, "{:width$}...", "");
        }
        match self.get(index) {
            Some(node) => {
                writeln!(f, "{:width$}{index}: {}", "", node.kind())?;
                for child in node.children() {
                    self.fmt_node(f, *child, depth + 1)?;
                }
                Ok(())
            }
            None => writeln!(f, "{:width$}{index}: <missing>", ""),
        }
    }
}

impl PartialEq for LogicalExpression {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equal(other, DEPTH_LIMIT)
    }
}

impl fmt::Display for LogicalExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Logical expression for concept {}:", self.concept_nid)?;
        match self.root {
            Some(root) => self.fmt_node(f, root, 0),
            None => writeln!(f, "  <empty>"),
        }
    }
}
