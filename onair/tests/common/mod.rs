#![allow(dead_code)]
//! helper methods for the tests
use onair::{novelty::MemNovelty, store::MemStore, BTree, Config};
use quickcheck::{Arbitrary, Gen};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, convert::TryInto, fmt};

/// For tests, we use a Sha2-256 digest as a link
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        Sha256Digest(result.as_slice().try_into().unwrap())
    }
}

impl AsRef<[u8]> for Sha256Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_ref()))
    }
}

pub type Store = MemStore<Sha256Digest>;
pub type Tree = BTree<Sha256Digest, Store>;

pub fn store() -> Store {
    MemStore::new(usize::max_value(), Sha256Digest::digest)
}

/// a fresh arena, store and empty tree
pub fn empty_tree(config: Config) -> anyhow::Result<(MemNovelty, Store, Tree)> {
    let novelty = MemNovelty::default();
    let store = store();
    let tree = BTree::create(&novelty, store.clone(), config)?;
    Ok((novelty, store, tree))
}

/// commits the tree and reopens it from the returned link
pub fn reopen(novelty: &MemNovelty, store: &Store, tree: &mut Tree) -> anyhow::Result<Tree> {
    let link = tree.store(novelty)?;
    BTree::load(store.clone(), *tree.config(), link)
}

/// all entries of a tree, in traversal order
pub fn entries(novelty: &MemNovelty, tree: &Tree) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut res = Vec::new();
    tree.for_each(novelty, |k, v| {
        res.push((k.to_vec(), v.to_vec()));
        true
    })?;
    Ok(res)
}

pub fn to_vec(model: &BTreeMap<Vec<u8>, Vec<u8>>) -> Vec<(Vec<u8>, Vec<u8>)> {
    model.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// A small key, so that random operations hit existing keys often
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SmallKey(pub Vec<u8>);

impl Arbitrary for SmallKey {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = u8::arbitrary(g) % 3;
        Self((0..len).map(|_| u8::arbitrary(g) % 8).collect())
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(self.0.shrink().map(SmallKey))
    }
}

/// An operation on a tree
#[derive(Debug, Clone)]
pub enum Op {
    Put(SmallKey, Vec<u8>),
    Delete(SmallKey),
    /// store and reload
    Commit,
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        match u8::arbitrary(g) % 10 {
            0..=5 => Op::Put(SmallKey::arbitrary(g), Vec::arbitrary(g)),
            6..=8 => Op::Delete(SmallKey::arbitrary(g)),
            _ => Op::Commit,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        match self {
            Op::Put(k, v) => {
                let k = k.clone();
                Box::new(v.shrink().map(move |v| Op::Put(k.clone(), v)))
            }
            Op::Delete(k) => Box::new(k.shrink().map(Op::Delete)),
            Op::Commit => quickcheck::empty_shrinker(),
        }
    }
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
