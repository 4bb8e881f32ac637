//! The node data structures for the tree
//!
//! Nodes never live as shared objects. A node is always either a page in the transient
//! [Novelty](crate::novelty::Novelty) arena or a block in the durable, content-addressed store,
//! and is decoded into the types in this module only for the duration of an operation.
//!
//! # Leaves
//!
//! A leaf holds an ordered sequence of [Entry] values. Keys are unique within a tree and are
//! ordered by unsigned lexicographic byte comparison.
//!
//! # Branches
//!
//! A branch holds `n` separator keys and `n + 1` child references. All keys reachable through
//! `children[i]` are smaller than `keys[i]`, and all keys reachable through `children[i + 1]`
//! are greater than or equal to `keys[i]`.
//!
//! # References
//!
//! Children are referenced by a [NodeRef], which is tagged with where the child lives. A page in
//! storage never references a page in the arena.
use derive_more::{Display, From};
use serde::{
    de::{self, SeqAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{fmt, ops::Deref};

/// Handle of a page in a novelty arena
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[display(fmt = "#{}", _0)]
pub struct NoveltyAddr(u64);

impl NoveltyAddr {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// A tagged reference to a node, either in the novelty arena or in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef<L> {
    /// uncommitted page in the arena of the current generation
    Novelty(NoveltyAddr),
    /// committed, immutable block in storage
    Storage(L),
}

impl<L> NodeRef<L> {
    pub fn is_novelty(&self) -> bool {
        matches!(self, NodeRef::Novelty(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, NodeRef::Storage(_))
    }

    pub fn storage_link(&self) -> Option<&L> {
        match self {
            NodeRef::Storage(link) => Some(link),
            NodeRef::Novelty(_) => None,
        }
    }
}

impl<L: fmt::Display> fmt::Display for NodeRef<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Novelty(addr) => write!(f, "novelty:{}", addr),
            NodeRef::Storage(link) => write!(f, "storage:{}", link),
        }
    }
}

/// An immutable byte string, used for keys and values.
///
/// Serialized as a cbor byte string, so the encoded size only depends on the length.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, From)]
pub struct Bytes(Box<[u8]>);

pub type Key = Bytes;
pub type Value = Bytes;

impl Bytes {
    pub fn into_inner(self) -> Box<[u8]> {
        self.0
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Bytes {
    fn from(value: &[u8]) -> Self {
        Self(value.into())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into_boxed_slice())
    }
}

impl From<&str> for Bytes {
    fn from(value: &str) -> Self {
        value.as_bytes().into()
    }
}

impl From<String> for Bytes {
    fn from(value: String) -> Self {
        value.into_bytes().into()
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b\"")?;
        for byte in self.0.iter() {
            for c in std::ascii::escape_default(*byte) {
                write!(f, "{}", c as char)?;
            }
        }
        write!(f, "\"")
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

struct BytesVisitor;

impl<'de> Visitor<'de> for BytesVisitor {
    type Value = Bytes;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a byte string")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Bytes, E> {
        Ok(v.into())
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Bytes, E> {
        Ok(v.into())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bytes, A::Error> {
        let mut res = Vec::with_capacity(seq.size_hint().unwrap_or_default());
        while let Some(byte) = seq.next_element::<u8>()? {
            res.push(byte);
        }
        Ok(res.into())
    }
}

/// A key value pair held in a leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A leaf node, an ordered sequence of entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub entries: Vec<Entry>,
}

impl Leaf {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// binary search for an exact key match
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.as_ref().cmp(key))
    }

    /// index of the first entry with a key >= `key`
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.entries.partition_point(|e| e.key.as_ref() < key)
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.search(key).ok().map(|i| &self.entries[i].value)
    }

    pub fn first_key(&self) -> Option<&Key> {
        self.entries.first().map(|e| &e.key)
    }

    pub fn last_key(&self) -> Option<&Key> {
        self.entries.last().map(|e| &e.key)
    }
}

/// A branch node, separator keys and one more child than keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch<L> {
    pub keys: Vec<Key>,
    pub children: Vec<NodeRef<L>>,
}

impl<L: Copy> Branch<L> {
    pub fn new(keys: Vec<Key>, children: Vec<NodeRef<L>>) -> Self {
        Self { keys, children }
    }

    /// number of children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// index of the child whose key range contains `key`
    ///
    /// A key equal to a separator belongs to the child right of it.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|s| s.as_ref() <= key)
    }

    pub fn child_for(&self, key: &[u8]) -> NodeRef<L> {
        self.children[self.child_index(key)]
    }

    pub fn first_child(&self) -> NodeRef<L> {
        self.children[0]
    }

    pub fn last_child(&self) -> NodeRef<L> {
        self.children[self.children.len() - 1]
    }
}

/// Either a leaf or a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node<L> {
    Leaf(Leaf),
    Branch(Branch<L>),
}

impl<L> Node<L> {
    pub fn empty_leaf() -> Self {
        Node::Leaf(Leaf::default())
    }

    /// number of entries of a leaf or number of children of a branch
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.entries.len(),
            Node::Branch(branch) => branch.children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// checks the shape constraints that can be checked without looking at children
    pub(crate) fn validate(&self) -> Result<(), crate::error::Error> {
        if let Node::Branch(branch) = self {
            if branch.children.is_empty() {
                return Err(crate::error::Error::Invalid("branch without children"));
            }
            if branch.children.len() != branch.keys.len() + 1 {
                return Err(crate::error::Error::Invalid(
                    "branch must have one more child than keys",
                ));
            }
        }
        Ok(())
    }

    /// rough heap usage, for the page cache
    pub(crate) fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + match self {
                Node::Leaf(leaf) => leaf
                    .entries
                    .iter()
                    .map(|e| std::mem::size_of::<Entry>() + e.key.len() + e.value.len())
                    .sum::<usize>(),
                Node::Branch(branch) => {
                    branch
                        .keys
                        .iter()
                        .map(|k| std::mem::size_of::<Key>() + k.len())
                        .sum::<usize>()
                        + branch.children.len() * std::mem::size_of::<NodeRef<L>>()
                }
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[&str]) -> Leaf {
        Leaf::new(keys.iter().map(|k| Entry::new(*k, *k)).collect())
    }

    #[test]
    fn bytes_order_is_unsigned_lexicographic() {
        let a = Bytes::from(&b"ab"[..]);
        let b = Bytes::from(&b"abc"[..]);
        let c = Bytes::from(&[0xffu8][..]);
        assert!(a < b);
        assert!(b < c);
        assert!(Bytes::default() < a);
    }

    #[test]
    fn separator_ties_go_right() {
        let branch = Branch::<u64>::new(
            vec!["b".into(), "d".into()],
            vec![NodeRef::Storage(0), NodeRef::Storage(1), NodeRef::Storage(2)],
        );
        assert_eq!(branch.child_index(b"a"), 0);
        assert_eq!(branch.child_index(b"b"), 1);
        assert_eq!(branch.child_index(b"c"), 1);
        assert_eq!(branch.child_index(b"d"), 2);
        assert_eq!(branch.child_index(b"zzz"), 2);
        assert_eq!(branch.child_for(b"d"), NodeRef::Storage(2));
    }

    #[test]
    fn leaf_search() {
        let leaf = leaf(&["1", "11", "111", "2"]);
        assert_eq!(leaf.search(b"11"), Ok(1));
        assert_eq!(leaf.search(b"12"), Err(3));
        assert_eq!(leaf.lower_bound(b"110"), 2);
        assert_eq!(leaf.lower_bound(b"3"), 4);
        assert_eq!(leaf.get(b"111").map(|v| v.as_ref()), Some(&b"111"[..]));
        assert_eq!(leaf.get(b"0"), None);
    }

    #[quickcheck]
    fn child_index_matches_linear_scan(keys: Vec<Vec<u8>>, key: Vec<u8>) -> bool {
        let mut keys = keys;
        keys.sort();
        keys.dedup();
        let children = (0..=keys.len() as u64).map(NodeRef::Storage).collect();
        let branch = Branch::<u64>::new(
            keys.iter().map(|k| k.as_slice().into()).collect(),
            children,
        );
        let expected = keys.iter().filter(|s| s.as_slice() <= key.as_slice()).count();
        branch.child_index(&key) == expected
    }

    #[test]
    fn validate_branch_shape() {
        let ok = Node::Branch(Branch::<u64>::new(
            vec!["m".into()],
            vec![NodeRef::Storage(0), NodeRef::Storage(1)],
        ));
        assert!(ok.validate().is_ok());
        let bad = Node::Branch(Branch::<u64>::new(vec!["m".into()], vec![NodeRef::Storage(0)]));
        assert!(bad.validate().is_err());
        let empty = Node::Branch(Branch::<u64>::new(vec![], vec![]));
        assert!(empty.validate().is_err());
    }
}
