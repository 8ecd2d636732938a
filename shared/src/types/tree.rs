//! In-memory stack tree
//!
//! Nodes live in an arena indexed by `NodeId`; each node keeps a parent link
//! so merges can bubble totals up the spine without cyclic ownership. Child
//! order is insertion order and merges never reorder siblings, which keeps
//! rendering and flamebearer encoding deterministic.

use std::fmt;
use std::sync::Arc;

/// Index of a node inside its owning [`Tree`] arena.
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct Node {
    pub name: Arc<str>,
    pub self_value: i64,
    pub total: i64,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A forest of call-stack roots.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

/// A resolved call stack paired with its sample value.
///
/// `locations[0]` is the leaf (innermost) frame.
#[derive(Debug, Clone)]
pub struct StackSample {
    pub locations: Vec<Arc<str>>,
    pub value: i64,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: Arc<str>, self_value: i64, total: i64) -> NodeId {
        let id = self.push(name, self_value, total, None);
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, name: Arc<str>, self_value: i64, total: i64) -> NodeId {
        let id = self.push(name, self_value, total, Some(parent));
        self.nodes[parent].children.push(id);
        id
    }

    fn push(&mut self, name: Arc<str>, self_value: i64, total: i64, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name,
            self_value,
            total,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Sum of all root totals.
    pub fn total(&self) -> i64 {
        self.roots.iter().map(|&r| self.nodes[r].total).sum()
    }

    /// Builds the spine tree for a single stack, leaf first.
    ///
    /// The leaf carries the sample value as both self and total; every
    /// caller frame wraps it with self 0 and the same total.
    pub fn from_stack(locations: &[Arc<str>], value: i64) -> Tree {
        let mut tree = Tree::new();
        let mut parent: Option<NodeId> = None;
        for (depth, name) in locations.iter().rev().enumerate() {
            let is_leaf = depth == locations.len() - 1;
            let self_value = if is_leaf { value } else { 0 };
            let id = match parent {
                None => tree.add_root(Arc::clone(name), self_value, value),
                Some(p) => tree.add_child(p, Arc::clone(name), self_value, value),
            };
            parent = Some(id);
        }
        tree
    }

    /// Merges `src` into `self`, top down.
    ///
    /// For each source root the walk follows the single-child spine of the
    /// source against matching names in the destination. An unmatched root
    /// is grafted as an independent tree; a divergent tail is spliced under
    /// the deepest match and its total bubbled to every ancestor; a fully
    /// absorbed spine adds the terminal's self value to the matched node and
    /// the terminal's total to the ancestors above it.
    pub fn merge(&mut self, src: &Tree) {
        for &root in src.roots() {
            let (last_parent, found, to_merge) = self.seek(src, root);
            match found {
                None => match last_parent {
                    None => {
                        let id = self.graft(src, to_merge, None);
                        self.roots.push(id);
                    }
                    Some(parent) => {
                        let id = self.graft(src, to_merge, Some(parent));
                        self.nodes[parent].children.push(id);
                        let grafted_total = self.nodes[id].total;
                        let mut cursor = Some(parent);
                        while let Some(p) = cursor {
                            self.nodes[p].total += grafted_total;
                            cursor = self.nodes[p].parent;
                        }
                    }
                },
                Some(found) => {
                    let merged = &src.nodes[to_merge];
                    let (merged_self, merged_total) = (merged.self_value, merged.total);
                    self.nodes[found].total += merged_self;
                    self.nodes[found].self_value += merged_self;
                    let mut cursor = self.nodes[found].parent;
                    while let Some(p) = cursor {
                        self.nodes[p].total += merged_total;
                        cursor = self.nodes[p].parent;
                    }
                }
            }
        }
    }

    /// Walks the source spine against this tree.
    ///
    /// Returns the deepest matched destination node reached before the
    /// source ran out (`found`, with its parent chain intact), or the
    /// destination parent under which the first unmatched source node
    /// (`to_merge`) must be spliced.
    fn seek(&self, src: &Tree, src_root: NodeId) -> (Option<NodeId>, Option<NodeId>, NodeId) {
        let mut current = src_root;
        let mut last_parent: Option<NodeId> = None;
        let mut siblings: &[NodeId] = &self.roots;
        loop {
            let matched = siblings
                .iter()
                .copied()
                .find(|&id| self.nodes[id].name == src.nodes[current].name);
            let Some(id) = matched else {
                return (last_parent, None, current);
            };
            if src.nodes[current].children.is_empty() {
                return (last_parent, Some(id), current);
            }
            last_parent = Some(id);
            siblings = &self.nodes[id].children;
            current = src.nodes[current].children[0];
        }
    }

    /// Deep-copies a subtree out of `src` into this arena.
    fn graft(&mut self, src: &Tree, src_node: NodeId, parent: Option<NodeId>) -> NodeId {
        let node = &src.nodes[src_node];
        let id = self.push(Arc::clone(&node.name), node.self_value, node.total, parent);
        for &child in &node.children {
            let copied = self.graft(src, child, Some(id));
            self.nodes[id].children.push(copied);
        }
        id
    }
}

impl fmt::Display for Tree {
    /// Deterministic indented rendering in insertion order, for diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn render(
            tree: &Tree,
            id: NodeId,
            depth: usize,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            let node = &tree.nodes[id];
            writeln!(
                f,
                "{:indent$}{}: self {} total {}",
                "",
                node.name,
                node.self_value,
                node.total,
                indent = depth * 2
            )?;
            for &child in &node.children {
                render(tree, child, depth + 1, f)?;
            }
            Ok(())
        }
        for &root in &self.roots {
            render(self, root, 0, f)?;
        }
        Ok(())
    }
}

/// Folds many samples into one tree, skipping zero-value samples.
pub fn stacks_to_tree<I>(stacks: I) -> Tree
where
    I: IntoIterator<Item = StackSample>,
{
    let mut tree = Tree::new();
    for stack in stacks {
        if stack.value == 0 {
            continue;
        }
        tree.merge(&Tree::from_stack(&stack.locations, stack.value));
    }
    tree
}
