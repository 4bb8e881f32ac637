//! mutating operations and commit
//!
//! Every node on the path of a mutation is *forked*: decoded from wherever it lives, edited in
//! memory and then written back into the novelty arena. A novelty page whose encoded size did
//! not change is updated in place, any other write allocates a fresh page and frees the old one.
//! Storage blocks are never touched, so committed snapshots stay valid.
use super::BTree;
use crate::{
    codec,
    error::Error,
    node::{Branch, Entry, Key, Leaf, Node, NodeRef, NoveltyAddr, Value},
    novelty::Novelty,
    store::{BlockWriter, Link, ReadOnlyStore},
};
use anyhow::Result;
use std::mem;
use tracing::{debug, info, trace};

/// A node that was loaded for modification, together with where it came from
struct Fork<L> {
    origin: NodeRef<L>,
    /// size of the page at `origin`, if it is a novelty page
    page_len: Option<usize>,
    node: Node<L>,
}

impl<L: Link> Fork<L> {
    /// writes the edited node to the arena and returns its new location
    fn write(self, novelty: &impl Novelty) -> Result<NodeRef<L>> {
        let page = codec::encode_page(&self.node)?;
        match (self.origin, self.page_len) {
            (NodeRef::Novelty(addr), Some(len)) if len == page.len() => {
                novelty.update(addr, page)?;
                Ok(self.origin)
            }
            (NodeRef::Novelty(addr), _) => {
                let new_addr = novelty.alloc(page)?;
                novelty.free(addr)?;
                trace!("reallocated {} as {}", addr, new_addr);
                Ok(NodeRef::Novelty(new_addr))
            }
            (NodeRef::Storage(link), _) => {
                let new_addr = novelty.alloc(page)?;
                trace!("forked {} into {}", link, new_addr);
                Ok(NodeRef::Novelty(new_addr))
            }
        }
    }
}

/// Result of inserting into a subtree
enum Insert<L> {
    /// the subtree now lives at the given reference
    Done(NodeRef<L>),
    /// the subtree was split into two halves, with a separator key between them
    Split(NodeRef<L>, Key, NodeRef<L>),
}

impl<L: Link, S: ReadOnlyStore<L>> BTree<L, S> {
    /// Inserts or replaces the value for a key.
    ///
    /// Always returns true. Running out of arena space is an error, not a normal outcome.
    pub fn put(
        &mut self,
        novelty: &impl Novelty,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Result<bool> {
        match self.insert0(novelty, self.root, key.into(), value.into())? {
            Insert::Done(root) => self.root = root,
            Insert::Split(left, separator, right) => {
                let root = Node::Branch(Branch::new(vec![separator], vec![left, right]));
                self.root = alloc_node(novelty, &root)?;
                debug!("root split, new root {}", self.root);
            }
        }
        Ok(true)
    }

    /// Removes a key. Returns false if the key was not present, in which case nothing changes.
    pub fn delete(&mut self, novelty: &impl Novelty, key: &[u8]) -> Result<bool> {
        let mut root = self.fork(novelty, self.root)?;
        if !self.remove0(novelty, &mut root.node, key)? {
            return Ok(false);
        }
        let single_child = match &root.node {
            Node::Branch(branch) if branch.len() == 1 => Some(branch.first_child()),
            _ => None,
        };
        self.root = match single_child {
            Some(child) => {
                discard(novelty, root.origin)?;
                debug!("root collapsed into {}", child);
                child
            }
            None => root.write(novelty)?,
        };
        Ok(true)
    }

    /// loads a node for modification. This does not allocate.
    fn fork(&self, novelty: &impl Novelty, node_ref: NodeRef<L>) -> Result<Fork<L>> {
        let (page_len, node) = match node_ref {
            NodeRef::Novelty(addr) => {
                let page = novelty.lookup(addr)?;
                (Some(page.len()), codec::decode_page(&page)?)
            }
            NodeRef::Storage(link) => (None, self.load_stored(&link)?),
        };
        Ok(Fork {
            origin: node_ref,
            page_len,
            node,
        })
    }

    fn insert0(
        &self,
        novelty: &impl Novelty,
        node_ref: NodeRef<L>,
        key: Key,
        value: Value,
    ) -> Result<Insert<L>> {
        let mut fork = self.fork(novelty, node_ref)?;
        let order = self.config.order;
        match &mut fork.node {
            Node::Leaf(leaf) => {
                match leaf.search(&key) {
                    Ok(i) if leaf.entries[i].value == value => return Ok(Insert::Done(node_ref)),
                    Ok(i) => leaf.entries[i].value = value,
                    Err(i) => leaf.entries.insert(i, Entry { key, value }),
                }
                if leaf.len() > order {
                    let right = leaf.entries.split_off(leaf.len() / 2);
                    let separator = right[0].key.clone();
                    debug!(
                        "leaf split {} + {} at {:?}",
                        leaf.len(),
                        right.len(),
                        separator
                    );
                    let right = alloc_node(novelty, &Node::Leaf(Leaf::new(right)))?;
                    let left = fork.write(novelty)?;
                    return Ok(Insert::Split(left, separator, right));
                }
            }
            Node::Branch(branch) => {
                let i = branch.child_index(&key);
                let child = branch.children[i];
                match self.insert0(novelty, child, key, value)? {
                    // child updated in place or not at all, so this node is unchanged
                    Insert::Done(new_child) if new_child == child => {
                        return Ok(Insert::Done(node_ref))
                    }
                    Insert::Done(new_child) => branch.children[i] = new_child,
                    Insert::Split(left, separator, right) => {
                        branch.children[i] = left;
                        branch.children.insert(i + 1, right);
                        branch.keys.insert(i, separator);
                    }
                }
                if branch.len() > order {
                    let mid = branch.children.len() / 2;
                    let right_children = branch.children.split_off(mid);
                    let mut right_keys = branch.keys.split_off(mid - 1);
                    let separator = right_keys.remove(0);
                    debug!(
                        "branch split {} + {} at {:?}",
                        branch.len(),
                        right_children.len(),
                        separator
                    );
                    let right = Node::Branch(Branch::new(right_keys, right_children));
                    let right = alloc_node(novelty, &right)?;
                    let left = fork.write(novelty)?;
                    return Ok(Insert::Split(left, separator, right));
                }
            }
        }
        Ok(Insert::Done(fork.write(novelty)?))
    }

    /// removes a key from an already forked node. The caller writes the node.
    fn remove0(&self, novelty: &impl Novelty, node: &mut Node<L>, key: &[u8]) -> Result<bool> {
        match node {
            Node::Leaf(leaf) => match leaf.search(key) {
                Ok(i) => {
                    leaf.entries.remove(i);
                    Ok(true)
                }
                Err(_) => Ok(false),
            },
            Node::Branch(branch) => {
                let i = branch.child_index(key);
                let mut child = self.fork(novelty, branch.children[i])?;
                if !self.remove0(novelty, &mut child.node, key)? {
                    return Ok(false);
                }
                if child.node.len() >= self.config.min_len() {
                    branch.children[i] = child.write(novelty)?;
                } else {
                    self.rebalance(novelty, branch, i, child)?;
                }
                Ok(true)
            }
        }
    }

    /// Fixes the underflow of the child at index `i`.
    ///
    /// Borrows from the left sibling, then from the right sibling. If neither has an entry to
    /// spare, merges with the left sibling, or with the right one if there is no left sibling.
    fn rebalance(
        &self,
        novelty: &impl Novelty,
        branch: &mut Branch<L>,
        i: usize,
        mut child: Fork<L>,
    ) -> Result<()> {
        let min_len = self.config.min_len();
        let left = match i.checked_sub(1) {
            Some(j) => Some(self.fork(novelty, branch.children[j])?),
            None => None,
        };
        let right = match branch.children.get(i + 1) {
            Some(right) => Some(self.fork(novelty, *right)?),
            None => None,
        };
        match (left, right) {
            (Some(mut left), _) if left.node.len() > min_len => {
                debug!("borrowing from left sibling {}", left.origin);
                borrow_from_left(&mut left.node, &mut child.node, &mut branch.keys[i - 1])?;
                branch.children[i - 1] = left.write(novelty)?;
                branch.children[i] = child.write(novelty)?;
            }
            (_, Some(mut right)) if right.node.len() > min_len => {
                debug!("borrowing from right sibling {}", right.origin);
                borrow_from_right(&mut child.node, &mut right.node, &mut branch.keys[i])?;
                branch.children[i] = child.write(novelty)?;
                branch.children[i + 1] = right.write(novelty)?;
            }
            (Some(mut left), _) => {
                debug!("merging {} into left sibling {}", child.origin, left.origin);
                let separator = branch.keys.remove(i - 1);
                merge(&mut left.node, child.node, separator)?;
                discard(novelty, child.origin)?;
                branch.children.remove(i);
                branch.children[i - 1] = left.write(novelty)?;
            }
            (_, Some(right)) => {
                debug!("merging right sibling {} into {}", right.origin, child.origin);
                let separator = branch.keys.remove(i);
                merge(&mut child.node, right.node, separator)?;
                discard(novelty, right.origin)?;
                branch.children.remove(i + 1);
                branch.children[i] = child.write(novelty)?;
            }
            (None, None) => return Err(Error::Invalid("branch with a single child").into()),
        }
        Ok(())
    }
}

impl<L: Link, S: ReadOnlyStore<L> + BlockWriter<L>> BTree<L, S> {
    /// Commits all uncommitted pages to storage and returns the link of the new root.
    ///
    /// Subtrees that are already in storage are shared, not written again. The root block
    /// always carries the order of the tree. Committed pages are freed from the arena.
    pub fn store(&mut self, novelty: &impl Novelty) -> Result<L> {
        let mut committed = Vec::new();
        let link = self.store0(novelty, self.root, Some(self.config.order), &mut committed)?;
        for addr in &committed {
            novelty.free(*addr)?;
        }
        self.root = NodeRef::Storage(link);
        info!("committed {} pages, root {}", committed.len(), link);
        Ok(link)
    }

    fn store0(
        &self,
        novelty: &impl Novelty,
        node_ref: NodeRef<L>,
        order: Option<usize>,
        committed: &mut Vec<NoveltyAddr>,
    ) -> Result<L> {
        match node_ref {
            // unchanged subtree
            NodeRef::Storage(link) if order.is_none() => return Ok(link),
            NodeRef::Storage(_) => {}
            NodeRef::Novelty(addr) => committed.push(addr),
        }
        let mut node = self.load_node(novelty, &node_ref)?;
        if let Node::Branch(branch) = &mut node {
            for child in branch.children.iter_mut() {
                *child = NodeRef::Storage(self.store0(novelty, *child, None, committed)?);
            }
        }
        let block = codec::encode_block(&node, order, self.config.zstd_level)?;
        let link = self.put_block(block)?;
        self.cache.put(link, node);
        Ok(link)
    }

    fn put_block(&self, data: Vec<u8>) -> Result<L> {
        #[cfg(feature = "metrics")]
        let _timer = super::prom::BLOCK_PUT_HIST.start_timer();
        #[cfg(feature = "metrics")]
        super::prom::BLOCK_PUT_SIZE_HIST.observe(data.len() as f64);
        self.storage.put(data)
    }
}

fn alloc_node<L: Link>(novelty: &impl Novelty, node: &Node<L>) -> Result<NodeRef<L>> {
    let page = codec::encode_page(node)?;
    Ok(NodeRef::Novelty(novelty.alloc(page)?))
}

/// releases a node that is no longer reachable. Storage blocks are left alone.
fn discard<L>(novelty: &impl Novelty, node_ref: NodeRef<L>) -> Result<()> {
    if let NodeRef::Novelty(addr) = node_ref {
        novelty.free(addr)?;
    }
    Ok(())
}

fn borrow_from_left<L>(left: &mut Node<L>, child: &mut Node<L>, separator: &mut Key) -> Result<()> {
    match (left, child) {
        (Node::Leaf(left), Node::Leaf(child)) => {
            let entry = left.entries.pop().ok_or(Error::Invalid("empty leaf"))?;
            child.entries.insert(0, entry);
            *separator = child.entries[0].key.clone();
        }
        (Node::Branch(left), Node::Branch(child)) => {
            let moved = left.children.pop().ok_or(Error::Invalid("empty branch"))?;
            let key = left.keys.pop().ok_or(Error::Invalid("empty branch"))?;
            child.children.insert(0, moved);
            child.keys.insert(0, mem::replace(separator, key));
        }
        _ => return Err(Error::Invalid("siblings at different levels").into()),
    }
    Ok(())
}

fn borrow_from_right<L>(
    child: &mut Node<L>,
    right: &mut Node<L>,
    separator: &mut Key,
) -> Result<()> {
    match (child, right) {
        (Node::Leaf(child), Node::Leaf(right)) => {
            if right.entries.len() < 2 {
                return Err(Error::Invalid("sibling has nothing to spare").into());
            }
            child.entries.push(right.entries.remove(0));
            *separator = right.entries[0].key.clone();
        }
        (Node::Branch(child), Node::Branch(right)) => {
            if right.keys.is_empty() {
                return Err(Error::Invalid("sibling has nothing to spare").into());
            }
            let moved = right.children.remove(0);
            let key = right.keys.remove(0);
            child.children.push(moved);
            child.keys.push(mem::replace(separator, key));
        }
        _ => return Err(Error::Invalid("siblings at different levels").into()),
    }
    Ok(())
}

/// appends `right` to `left`. `separator` is the parent key between the two.
fn merge<L>(left: &mut Node<L>, right: Node<L>, separator: Key) -> Result<()> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => left.entries.extend(right.entries),
        (Node::Branch(left), Node::Branch(right)) => {
            left.keys.push(separator);
            left.keys.extend(right.keys);
            left.children.extend(right.children);
        }
        _ => return Err(Error::Invalid("siblings at different levels").into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{novelty::MemNovelty, store::MemStore, Config};
    use std::hash::Hasher;

    fn fnv_digest(data: &[u8]) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(data);
        hasher.finish()
    }

    fn key(i: u32) -> Vec<u8> {
        format!("{:04}", i).into_bytes()
    }

    #[test]
    fn split_and_merge_keep_invariants() -> anyhow::Result<()> {
        let novelty = MemNovelty::default();
        let store = MemStore::new(usize::max_value(), fnv_digest);
        let mut tree = BTree::create(&novelty, store, Config::debug())?;
        for i in 0..100 {
            tree.put(&novelty, key(i), key(i))?;
            tree.assert_invariants(&novelty)?;
        }
        assert!(tree.height(&novelty)? > 2);
        for i in (0..100).step_by(3) {
            assert!(tree.delete(&novelty, &key(i))?);
            tree.assert_invariants(&novelty)?;
        }
        for i in 0..100 {
            assert_eq!(tree.contains_key(&novelty, &key(i))?, i % 3 != 0);
        }
        for i in 0..100 {
            tree.delete(&novelty, &key(i))?;
            tree.assert_invariants(&novelty)?;
        }
        assert!(tree.is_empty(&novelty)?);
        assert_eq!(tree.height(&novelty)?, 1);
        // only the empty root leaf is left
        assert_eq!(novelty.page_count(), 1);
        Ok(())
    }

    #[test]
    fn identical_value_forks_nothing() -> anyhow::Result<()> {
        let novelty = MemNovelty::default();
        let store = MemStore::new(usize::max_value(), fnv_digest);
        let mut tree = BTree::create(&novelty, store, Config::debug())?;
        for i in 0..20 {
            tree.put(&novelty, key(i), "x")?;
        }
        let link = tree.store(&novelty)?;
        assert_eq!(novelty.page_count(), 0);
        tree.put(&novelty, key(7), "x")?;
        assert_eq!(novelty.page_count(), 0);
        assert_eq!(tree.link(), Some(link));
        Ok(())
    }

    #[test]
    fn failed_delete_forks_nothing() -> anyhow::Result<()> {
        let novelty = MemNovelty::default();
        let store = MemStore::new(usize::max_value(), fnv_digest);
        let mut tree = BTree::create(&novelty, store, Config::debug())?;
        for i in 0..20 {
            tree.put(&novelty, key(i), "x")?;
        }
        tree.store(&novelty)?;
        assert!(!tree.delete(&novelty, b"nope")?);
        assert_eq!(novelty.page_count(), 0);
        assert!(!tree.is_dirty());
        Ok(())
    }
}
