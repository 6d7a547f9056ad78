//! Per-traversal annotation store.
//!
//! Rebuilt for every depth-first visit and indexed by node slot. The hashed
//! variant also keeps, for each node, a lineage hash (over the path from the
//! root) and a semantic-identity hash, with lookup tables so that solvers can
//! find candidates without pairwise comparison.

use crate::hash;
use crate::node::{LogicNode, Nid};
use ahash::AHashMap;
use roaring::RoaringBitmap;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
struct PathHashes {
    lineage: Vec<u64>,
    semantic: Vec<u64>,
    by_lineage: AHashMap<u64, Vec<usize>>,
    by_semantic_at_depth: Vec<AHashMap<u64, Vec<usize>>>,
}

#[derive(Debug, Clone)]
pub struct TreeNodeVisitData {
    visited: RoaringBitmap,
    leaves: RoaringBitmap,
    predecessor: Vec<Option<usize>>,
    sibling_group: Vec<Option<usize>>,
    depth: Vec<Option<usize>>,
    concepts_at_or_above: Vec<BTreeSet<Nid>>,
    nodes_by_depth: Vec<Vec<usize>>,
    hashes: Option<PathHashes>,
}

const NO_NODES: &[usize] = &[];

impl TreeNodeVisitData {
    pub fn new(slot_count: usize) -> Self {
        Self {
            visited: RoaringBitmap::new(),
            leaves: RoaringBitmap::new(),
            predecessor: vec![None; slot_count],
            sibling_group: vec![None; slot_count],
            depth: vec![None; slot_count],
            concepts_at_or_above: vec![BTreeSet::new(); slot_count],
            nodes_by_depth: Vec::new(),
            hashes: None,
        }
    }

    /// Visit data that also records lineage and semantic hashes.
    pub fn hashed(slot_count: usize) -> Self {
        let mut data = Self::new(slot_count);
        data.hashes = Some(PathHashes {
            lineage: vec![0; slot_count],
            semantic: vec![0; slot_count],
            ..PathHashes::default()
        });
        data
    }

    pub fn is_hashed(&self) -> bool {
        self.hashes.is_some()
    }

    pub fn slot_count(&self) -> usize {
        self.predecessor.len()
    }

    // ------------------------------------------------------------------------
    // Recording (driven by LogicalExpression::depth_first_visit)
    // ------------------------------------------------------------------------

    /// Record entry into `node`; inherits the concepts of its predecessor.
    pub(crate) fn begin_node(&mut self, node: &LogicNode, depth: usize) {
        let index = node.index();
        let first_visit = self.depth[index].is_none();
        self.visited.insert(index as u32);
        if first_visit {
            self.depth[index] = Some(depth);
            if self.nodes_by_depth.len() <= depth {
                self.nodes_by_depth.resize_with(depth + 1, Vec::new);
            }
            self.nodes_by_depth[depth].push(index);
        }

        if let Some(parent) = self.predecessor[index] {
            let inherited = self.concepts_at_or_above[parent].clone();
            self.concepts_at_or_above[index].extend(inherited);
        }
        let own = &mut self.concepts_at_or_above[index];
        node.kind().for_each_concept(|nid| {
            own.insert(nid);
        });

        if node.is_leaf() {
            self.leaves.insert(index as u32);
        }

        if let Some(hashes) = self.hashes.as_mut() {
            if first_visit {
                let semantic = node.semantic_hash();
                let parent_lineage = self.predecessor[index]
                    .map(|parent| hashes.lineage[parent])
                    .unwrap_or(hash::FNV_OFFSET_BASIS);
                let lineage = hash::chain(parent_lineage, semantic);
                hashes.semantic[index] = semantic;
                hashes.lineage[index] = lineage;
                hashes.by_lineage.entry(lineage).or_default().push(index);
                if hashes.by_semantic_at_depth.len() <= depth {
                    hashes
                        .by_semantic_at_depth
                        .resize_with(depth + 1, AHashMap::default);
                }
                hashes.by_semantic_at_depth[depth]
                    .entry(semantic)
                    .or_default()
                    .push(index);
            }
        }
    }

    /// Record the parent link of `child`. The first parent seen wins.
    pub(crate) fn link_child(&mut self, parent: usize, child: usize) {
        if self.predecessor[child].is_none() {
            self.predecessor[child] = Some(parent);
            self.sibling_group[child] = Some(parent);
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn visited(&self, node: usize) -> bool {
        self.visited.contains(node as u32)
    }

    pub fn visited_nodes(&self) -> &RoaringBitmap {
        &self.visited
    }

    pub fn node_count(&self) -> usize {
        self.visited.len() as usize
    }

    pub fn predecessor(&self, node: usize) -> Option<usize> {
        self.predecessor.get(node).copied().flatten()
    }

    /// Id shared by all children of the same parent; `None` for the root.
    pub fn sibling_group(&self, node: usize) -> Option<usize> {
        self.sibling_group.get(node).copied().flatten()
    }

    pub fn depth(&self, node: usize) -> Option<usize> {
        self.depth.get(node).copied().flatten()
    }

    pub fn max_depth(&self) -> usize {
        self.nodes_by_depth.len().saturating_sub(1)
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.leaves.contains(node as u32)
    }

    pub fn leaf_nodes(&self) -> &RoaringBitmap {
        &self.leaves
    }

    /// Concepts referenced at `node` or any of its ancestors.
    pub fn concepts_at_or_above(&self, node: usize) -> &BTreeSet<Nid> {
        &self.concepts_at_or_above[node]
    }

    pub fn nodes_at_depth(&self, depth: usize) -> &[usize] {
        self.nodes_by_depth
            .get(depth)
            .map(Vec::as_slice)
            .unwrap_or(NO_NODES)
    }

    pub fn lineage_hash(&self, node: usize) -> Option<u64> {
        let hashes = self.hashes.as_ref()?;
        self.visited(node).then(|| hashes.lineage[node])
    }

    pub fn semantic_hash(&self, node: usize) -> Option<u64> {
        let hashes = self.hashes.as_ref()?;
        self.visited(node).then(|| hashes.semantic[node])
    }

    pub fn nodes_with_lineage_hash(&self, lineage: u64) -> &[usize] {
        self.hashes
            .as_ref()
            .and_then(|hashes| hashes.by_lineage.get(&lineage))
            .map(Vec::as_slice)
            .unwrap_or(NO_NODES)
    }

    pub fn nodes_with_semantic_hash(&self, depth: usize, semantic: u64) -> &[usize] {
        self.hashes
            .as_ref()
            .and_then(|hashes| hashes.by_semantic_at_depth.get(depth))
            .and_then(|table| table.get(&semantic))
            .map(Vec::as_slice)
            .unwrap_or(NO_NODES)
    }
}
