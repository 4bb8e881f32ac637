//! read-only operations on trees
use super::BTree;
use crate::{
    node::{Key, Node, NodeRef, Value},
    novelty::Novelty,
    store::{Link, ReadOnlyStore},
};
use anyhow::Result;
use std::{collections::BTreeMap, io};
use tracing::error;

pub type GraphEdges = Vec<(usize, usize)>;
pub type GraphNodes<S> = BTreeMap<usize, S>;

type Visitor<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> bool;

impl<L: Link, S: ReadOnlyStore<L>> BTree<L, S> {
    /// value for a key, or `None` if the key is not in the tree
    pub fn get(&self, novelty: &impl Novelty, key: &[u8]) -> Result<Option<Value>> {
        let mut node = self.load_node(novelty, &self.root)?;
        loop {
            match node {
                Node::Leaf(mut leaf) => {
                    return Ok(leaf.search(key).ok().map(|i| leaf.entries.swap_remove(i).value))
                }
                Node::Branch(branch) => node = self.load_node(novelty, &branch.child_for(key))?,
            }
        }
    }

    pub fn contains_key(&self, novelty: &impl Novelty, key: &[u8]) -> Result<bool> {
        Ok(self.get(novelty, key)?.is_some())
    }

    /// Visits all entries in ascending key order.
    ///
    /// Stops as soon as `f` returns false. Returns true if all entries were visited.
    pub fn for_each(
        &self,
        novelty: &impl Novelty,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<bool> {
        self.for_each0(novelty, &self.root, None, &mut f)
    }

    /// Like [BTree::for_each], but only visits entries with a key >= `start`.
    pub fn for_each_from(
        &self,
        novelty: &impl Novelty,
        start: &[u8],
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<bool> {
        self.for_each0(novelty, &self.root, Some(start), &mut f)
    }

    fn for_each0(
        &self,
        novelty: &impl Novelty,
        node: &NodeRef<L>,
        start: Option<&[u8]>,
        f: Visitor<'_>,
    ) -> Result<bool> {
        match self.load_node(novelty, node)? {
            Node::Leaf(leaf) => {
                let from = start.map(|s| leaf.lower_bound(s)).unwrap_or_default();
                for entry in &leaf.entries[from..] {
                    if !f(&entry.key[..], &entry.value[..]) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Node::Branch(branch) => {
                let from = start.map(|s| branch.child_index(s)).unwrap_or_default();
                for child in &branch.children[from..] {
                    if !self.for_each0(novelty, child, start, f)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// smallest key in the tree
    pub fn first_key(&self, novelty: &impl Novelty) -> Result<Option<Key>> {
        let mut node = self.load_node(novelty, &self.root)?;
        loop {
            match node {
                Node::Leaf(leaf) => return Ok(leaf.first_key().cloned()),
                Node::Branch(branch) => {
                    node = self.load_node(novelty, &branch.first_child())?
                }
            }
        }
    }

    /// largest key in the tree
    pub fn last_key(&self, novelty: &impl Novelty) -> Result<Option<Key>> {
        let mut node = self.load_node(novelty, &self.root)?;
        loop {
            match node {
                Node::Leaf(leaf) => return Ok(leaf.last_key().cloned()),
                Node::Branch(branch) => node = self.load_node(novelty, &branch.last_child())?,
            }
        }
    }

    /// number of entries. This traverses the entire tree.
    pub fn len(&self, novelty: &impl Novelty) -> Result<usize> {
        let mut count = 0;
        self.for_each(novelty, |_, _| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    pub fn is_empty(&self, novelty: &impl Novelty) -> Result<bool> {
        Ok(self.first_key(novelty)?.is_none())
    }

    /// number of levels, 1 for a tree that is a single leaf
    pub fn height(&self, novelty: &impl Novelty) -> Result<usize> {
        let mut height = 1;
        let mut node = self.load_node(novelty, &self.root)?;
        while let Node::Branch(branch) = node {
            node = self.load_node(novelty, &branch.first_child())?;
            height += 1;
        }
        Ok(height)
    }

    /// Checks the structural invariants of the tree and returns a description of each violation
    pub fn check_invariants(&self, novelty: &impl Novelty) -> Result<Vec<String>> {
        let mut msgs = Vec::new();
        let mut leaf_depth = None;
        self.check_invariants0(
            novelty,
            &self.root,
            0,
            (None, None),
            &mut leaf_depth,
            &mut msgs,
        )?;
        Ok(msgs)
    }

    #[allow(clippy::type_complexity)]
    fn check_invariants0(
        &self,
        novelty: &impl Novelty,
        node_ref: &NodeRef<L>,
        depth: usize,
        bounds: (Option<&[u8]>, Option<&[u8]>),
        leaf_depth: &mut Option<usize>,
        msgs: &mut Vec<String>,
    ) -> Result<()> {
        macro_rules! check {
            ($expression:expr) => {
                if !$expression {
                    let text = stringify!($expression);
                    msgs.push(format!("{} at {}", text, node_ref));
                }
            };
        }
        let node = self.load_node(novelty, node_ref)?;
        let is_root = depth == 0;
        let (lower, upper) = bounds;
        check!(node.len() <= self.config.order);
        if !is_root {
            check!(node.len() >= self.config.min_len());
        }
        match &node {
            Node::Leaf(leaf) => {
                check!(leaf.entries.windows(2).all(|w| w[0].key < w[1].key));
                if let Some(lower) = lower {
                    check!(leaf.entries.iter().all(|e| &e.key[..] >= lower));
                }
                if let Some(upper) = upper {
                    check!(leaf.entries.iter().all(|e| &e.key[..] < upper));
                }
                match *leaf_depth {
                    Some(expected) => check!(depth == expected),
                    None => *leaf_depth = Some(depth),
                }
            }
            Node::Branch(branch) => {
                check!(branch.children.len() >= 2);
                check!(branch.keys.windows(2).all(|w| w[0] < w[1]));
                if node_ref.is_storage() {
                    check!(branch.children.iter().all(|child| child.is_storage()));
                }
                for (i, child) in branch.children.iter().enumerate() {
                    let lower = if i == 0 {
                        lower
                    } else {
                        Some(&branch.keys[i - 1][..])
                    };
                    let upper = if i < branch.keys.len() {
                        Some(&branch.keys[i][..])
                    } else {
                        upper
                    };
                    self.check_invariants0(
                        novelty,
                        child,
                        depth + 1,
                        (lower, upper),
                        leaf_depth,
                        msgs,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Checks invariants and panics if any of them is violated
    pub fn assert_invariants(&self, novelty: &impl Novelty) -> Result<()> {
        let msgs = self.check_invariants(novelty)?;
        if !msgs.is_empty() {
            let invariants = msgs.join(",");
            for msg in msgs {
                error!("Invariant failed: {}", msg);
            }
            panic!("assert_invariants failed {}", invariants);
        }
        Ok(())
    }

    /// Writes an indented rendering of the tree structure.
    ///
    /// Entries are rendered with `renderer`, separator keys with their debug representation.
    pub fn dump<W: io::Write>(
        &self,
        novelty: &impl Novelty,
        out: &mut W,
        renderer: impl Fn(&[u8], &[u8]) -> String,
    ) -> Result<()> {
        self.dump0(novelty, &self.root, "", out, &renderer)
    }

    fn dump0<W: io::Write>(
        &self,
        novelty: &impl Novelty,
        node_ref: &NodeRef<L>,
        prefix: &str,
        out: &mut W,
        renderer: &dyn Fn(&[u8], &[u8]) -> String,
    ) -> Result<()> {
        match self.load_node(novelty, node_ref)? {
            Node::Leaf(leaf) => {
                writeln!(out, "{}Leaf({}, count={})", prefix, node_ref, leaf.len())?;
                for entry in &leaf.entries {
                    writeln!(out, "{}  {}", prefix, renderer(&entry.key[..], &entry.value[..]))?;
                }
            }
            Node::Branch(branch) => {
                writeln!(
                    out,
                    "{}Branch({}, keys={:?})",
                    prefix, node_ref, branch.keys
                )?;
                let prefix = prefix.to_string() + "  ";
                for child in &branch.children {
                    self.dump0(novelty, child, &prefix, out, renderer)?;
                }
            }
        }
        Ok(())
    }

    /// dumps the tree structure as numbered nodes and parent to child edges
    pub fn dump_graph<T>(
        &self,
        novelty: &impl Novelty,
        f: impl Fn((usize, &NodeRef<L>, &Node<L>)) -> T,
    ) -> Result<(GraphEdges, GraphNodes<T>)> {
        let mut edges = Vec::new();
        let mut nodes = BTreeMap::new();
        self.dump_graph0(novelty, None, &self.root, &f, &mut edges, &mut nodes)?;
        Ok((edges, nodes))
    }

    fn dump_graph0<T>(
        &self,
        novelty: &impl Novelty,
        parent_id: Option<usize>,
        node_ref: &NodeRef<L>,
        f: &dyn Fn((usize, &NodeRef<L>, &Node<L>)) -> T,
        edges: &mut GraphEdges,
        nodes: &mut GraphNodes<T>,
    ) -> Result<()> {
        let id = nodes.len();
        let node = self.load_node(novelty, node_ref)?;
        nodes.insert(id, f((id, node_ref, &node)));
        if let Some(p) = parent_id {
            edges.push((p, id));
        }
        if let Node::Branch(branch) = &node {
            for child in &branch.children {
                self.dump_graph0(novelty, Some(id), child, f, edges, nodes)?;
            }
        }
        Ok(())
    }
}
