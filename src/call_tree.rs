//! Merging sampled stack suffixes into a call tree
//!
//! Records are ordered by comparing frames from the outermost caller inward,
//! which places every record directly after the records sharing its callers.
//! A single pass then threads them into a tree, keeping the path from the
//! root to the last inserted node as a stack of node ids. Nodes live in an
//! arena and refer to their children by index.

use crate::aggregate::SampleRecord;
use std::cmp::Ordering;

/// Order two stacks (innermost first) from the outermost frame inward.
///
/// The first differing frame decides, lower address first; when one stack
/// is the other's outer part, the shorter stack sorts first.
pub fn compare_stacks(a: &[u64], b: &[u64]) -> Ordering {
    a.iter().rev().cmp(b.iter().rev())
}

/// Number of outermost frames two stacks share
pub fn common_count(a: &[u64], b: &[u64]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Index of a node in its tree's arena
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTreeNode {
    /// `None` only for the root
    pub record: Option<SampleRecord>,
    pub children: Vec<NodeId>,
}

impl CallTreeNode {
    pub fn address(&self) -> Option<u64> {
        self.record.as_ref().map(SampleRecord::address)
    }

    pub fn sample_count(&self) -> u64 {
        self.record.as_ref().map_or(0, |r| r.sample_count)
    }
}

/// Arena-backed call tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTree {
    nodes: Vec<CallTreeNode>,
}

impl Default for CallTree {
    fn default() -> Self {
        Self {
            nodes: vec![CallTreeNode {
                record: None,
                children: Vec::new(),
            }],
        }
    }
}

impl CallTree {
    pub const ROOT: NodeId = 0;

    /// Sort records, merge shared callers, then order siblings by count
    pub fn build(records: Vec<SampleRecord>) -> Self {
        let mut tree = Self::from_records(records);
        tree.sort_by_count();
        tree
    }

    /// Merge records into a tree without reordering siblings by count
    pub fn from_records(mut records: Vec<SampleRecord>) -> Self {
        records.retain(|r| !r.frames.is_empty());
        records.sort_by(|a, b| compare_stacks(&a.frames, &b.frames));

        let mut tree = Self::default();
        // path[d] is the open node at depth d; path[0] is the root
        let mut path: Vec<NodeId> = vec![Self::ROOT];
        let mut previous: Option<Vec<u64>> = None;

        for record in records {
            let depth = record.frames.len();
            let common = previous
                .as_deref()
                .map_or(0, |prev| common_count(prev, &record.frames))
                .min(depth - 1);

            path.truncate(common + 1);

            // Callers missing from the table get a node carrying this
            // record's count; the record itself sits innermost
            for k in (common + 1)..depth {
                let frames = record.frames[depth - k..].to_vec();
                let id = tree.push_child(
                    path[path.len() - 1],
                    SampleRecord::new(frames, record.sample_count),
                );
                path.push(id);
            }

            previous = Some(record.frames.clone());
            let id = tree.push_child(path[path.len() - 1], record);
            path.push(id);
        }

        tree
    }

    fn push_child(&mut self, parent: NodeId, record: SampleRecord) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(CallTreeNode {
            record: Some(record),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Order every node's children by descending sample count, keeping the
    /// merge order among equal counts
    pub fn sort_by_count(&mut self) {
        for id in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[id].children);
            children.sort_by(|&a, &b| {
                self.nodes[b]
                    .sample_count()
                    .cmp(&self.nodes[a].sample_count())
            });
            self.nodes[id].children = children;
        }
    }

    pub fn node(&self, id: NodeId) -> &CallTreeNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &CallTreeNode {
        &self.nodes[Self::ROOT]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    /// Number of nodes, excluding the root
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the top-level nodes' counts
    pub fn total_samples(&self) -> u64 {
        self.root()
            .children
            .iter()
            .map(|&id| self.nodes[id].sample_count())
            .sum()
    }

    /// Visit every node except the root in pre-order with its depth
    /// (top-level nodes have depth 1)
    pub fn walk(&self) -> Vec<(NodeId, usize)> {
        let mut order = Vec::with_capacity(self.len());
        let mut pending: Vec<(NodeId, usize)> = self
            .root()
            .children
            .iter()
            .rev()
            .map(|&id| (id, 1))
            .collect();

        while let Some((id, depth)) = pending.pop() {
            order.push((id, depth));
            pending.extend(self.nodes[id].children.iter().rev().map(|&c| (c, depth + 1)));
        }

        order
    }

    /// Addresses from the root down to `id`, outermost first
    pub fn path_to(&self, id: NodeId) -> Option<Vec<u64>> {
        let record = self.nodes.get(id)?.record.as_ref()?;
        Some(record.frames.iter().rev().copied().collect())
    }
}
