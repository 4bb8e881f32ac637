//! # Onair trees
//!
//! Onair trees are persistent, copy-on-write [B-Trees] of byte string keys and values.
//!
//! A tree separates its *mutable working state* from its *immutable durable state*.
//!
//! ## Novelty
//!
//! Pages that were created or modified since the last commit live in a transient, address
//! allocated arena, the [Novelty](novelty::Novelty). Pages in the arena are mutated in place when
//! their encoded size does not change, and reallocated otherwise. The arena is never owned by a
//! tree but passed explicitly to every operation, so its lifecycle is up to the caller.
//!
//! ## Storage
//!
//! Committing a tree with [BTree::store] writes all pages of the current generation into a
//! content-addressed store, keyed by a hash of their bytes. Pages are [CBOR] encoded and [zstd]
//! compressed. Subtrees that were not touched since the last commit are referenced, not copied,
//! so each commit only writes the pages on the paths that changed.
//!
//! A committed tree can be reopened from its root link with [BTree::load]. Since storage blocks
//! are immutable, a committed root is a consistent snapshot no matter what happens to newer
//! generations of the same tree.
//!
//! ## References
//!
//! Children are referenced with a [NodeRef], which is either `Novelty` or `Storage`. A page in
//! storage never references a page in the arena.
//!
//! [CBOR]: https://en.wikipedia.org/wiki/CBOR
//! [zstd]: https://en.wikipedia.org/wiki/Zstandard
//! [B-Trees]: https://en.wikipedia.org/wiki/B-tree
pub mod btree;
mod codec;
pub mod error;
pub mod node;
pub mod novelty;
pub mod store;

pub use btree::{BTree, Config, GraphEdges, GraphNodes};
pub use error::Error;
pub use node::{Bytes, Entry, Key, Node, NodeRef, NoveltyAddr, Value};

/// registers the histograms of this crate with a prometheus registry
#[cfg(feature = "metrics")]
pub fn register_metrics(registry: &prometheus::Registry) -> anyhow::Result<()> {
    btree::register(registry)
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;
    use crate::{novelty::MemNovelty, store::MemStore};

    #[test]
    fn metrics_are_registered() -> anyhow::Result<()> {
        let novelty = MemNovelty::default();
        let store = MemStore::new(usize::max_value(), |data: &[u8]| fnv_digest(data));
        let mut tree = BTree::create(&novelty, store.clone(), Config::debug())?;
        for i in 0u32..50 {
            tree.put(&novelty, i.to_be_bytes().to_vec(), "x")?;
        }
        let link = tree.store(&novelty)?;
        BTree::load(store, Config::debug(), link)?;

        let registry = prometheus::Registry::new();
        register_metrics(&registry)?;
        let names = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect::<Vec<_>>();
        assert!(names.contains(&"onair_block_put_time".to_string()));
        assert!(names.contains(&"onair_block_get_size".to_string()));
        // registering the same histograms twice is an error
        assert!(register_metrics(&registry).is_err());
        Ok(())
    }

    fn fnv_digest(data: &[u8]) -> u64 {
        use std::hash::Hasher;
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(data);
        hasher.finish()
    }
}

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
