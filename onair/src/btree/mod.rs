//! creation and resolution of copy-on-write b-trees
//!
//! A [BTree] only holds its configuration, its storage and a single root [NodeRef]. All nodes
//! of the current generation live in a [Novelty] arena that is passed to every operation.
use crate::{
    codec,
    error::Error,
    node::{Node, NodeRef},
    novelty::Novelty,
    store::{Link, PageCache, ReadOnlyStore},
};
use anyhow::Result;
use tracing::debug;
#[cfg(feature = "metrics")]
mod prom;
mod read;
mod write;

#[cfg(feature = "metrics")]
pub(crate) use prom::register;
pub use read::{GraphEdges, GraphNodes};

/// Configuration for a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// maximum number of entries in a leaf and of children in a branch
    pub order: usize,
    /// zstd level to use for compressing storage blocks
    pub zstd_level: i32,
}

impl Config {
    pub fn new(order: usize) -> Self {
        Self {
            order,
            zstd_level: 10,
        }
    }

    /// config that will produce deep trees with few entries
    pub fn debug() -> Self {
        Self {
            order: 4,
            zstd_level: 1,
        }
    }

    /// config that will produce shallow trees, but still compresses fast
    pub fn debug_fast() -> Self {
        Self {
            order: 64,
            zstd_level: 1,
        }
    }

    /// minimum number of entries or children of every node but the root
    pub fn min_len(&self) -> usize {
        (self.order + 1) / 2
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.order >= 3, "order must be at least 3");
        anyhow::ensure!(self.order <= 1 << 16, "order must be at most 65536");
        anyhow::ensure!(self.zstd_level >= 1 && self.zstd_level <= 22);
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(32)
    }
}

/// A b-tree of byte string keys and values.
///
/// The root is either a page in the novelty arena, if the tree has uncommitted changes, or a
/// block in storage.
#[derive(Debug)]
pub struct BTree<L: Link, S> {
    config: Config,
    storage: S,
    cache: PageCache<L>,
    root: NodeRef<L>,
}

impl<L: Link, S: ReadOnlyStore<L>> BTree<L, S> {
    /// creates a new, empty tree. The root is a freshly allocated, empty leaf page.
    pub fn create(novelty: &impl Novelty, storage: S, config: Config) -> Result<Self> {
        config.validate()?;
        let page = codec::encode_page(&Node::<L>::empty_leaf())?;
        let root = NodeRef::Novelty(novelty.alloc(page)?);
        debug!("created tree of order {} at {}", config.order, root);
        Ok(Self {
            config,
            storage,
            cache: PageCache::default(),
            root,
        })
    }

    /// reopens a tree that was committed with [BTree::store].
    ///
    /// Fails with [Error::OrderMismatch] if the tree was committed with a different order.
    pub fn load(storage: S, config: Config, link: L) -> Result<Self> {
        config.validate()?;
        let tree = Self {
            config,
            storage,
            cache: PageCache::default(),
            root: NodeRef::Storage(link),
        };
        let (order, node) = tree.load_block(&link)?;
        match order {
            Some(stored) if stored != config.order => {
                return Err(Error::OrderMismatch {
                    stored,
                    requested: config.order,
                }
                .into())
            }
            None => return Err(Error::Invalid("block is not a tree root").into()),
            Some(_) => {}
        }
        tree.cache.put(link, node);
        debug!("loaded tree of order {} from {}", config.order, link);
        Ok(tree)
    }

    /// replaces the page cache, e.g. to share one cache between several trees
    pub fn with_cache(mut self, cache: PageCache<L>) -> Self {
        self.cache = cache;
        self
    }

    pub fn root(&self) -> NodeRef<L> {
        self.root
    }

    /// link of the committed root, if the tree has no uncommitted changes
    pub fn link(&self) -> Option<L> {
        self.root.storage_link().copied()
    }

    /// true if the tree has changes that are not yet committed
    pub fn is_dirty(&self) -> bool {
        self.root.is_novelty()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// resolves a reference according to its tag
    pub(crate) fn load_node(&self, novelty: &impl Novelty, node: &NodeRef<L>) -> Result<Node<L>> {
        match node {
            NodeRef::Novelty(addr) => {
                let page = novelty.lookup(*addr)?;
                #[cfg(feature = "metrics")]
                let _timer = prom::PAGE_DECODE_HIST.start_timer();
                Ok(codec::decode_page(&page)?)
            }
            NodeRef::Storage(link) => self.load_stored(link),
        }
    }

    /// loads a storage block, going through the cache
    pub(crate) fn load_stored(&self, link: &L) -> Result<Node<L>> {
        if let Some(node) = self.cache.get(link) {
            return Ok(node);
        }
        let (_, node) = self.load_block(link)?;
        self.cache.put(*link, node.clone());
        Ok(node)
    }

    fn load_block(&self, link: &L) -> Result<(Option<usize>, Node<L>)> {
        #[cfg(feature = "metrics")]
        let _timer = prom::BLOCK_GET_HIST.start_timer();
        let data = self.storage.get(link)?;
        #[cfg(feature = "metrics")]
        prom::BLOCK_GET_SIZE_HIST.observe(data.len() as f64);
        Ok(codec::decode_block(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(Config::debug().validate().is_ok());
        assert!(Config::debug_fast().validate().is_ok());
        assert!(Config::default().validate().is_ok());
        assert!(Config::new(2).validate().is_err());
        assert!(Config::new(1 << 17).validate().is_err());
        let mut config = Config::new(8);
        config.zstd_level = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_len_is_half_rounded_up() {
        assert_eq!(Config::new(3).min_len(), 2);
        assert_eq!(Config::new(4).min_len(), 2);
        assert_eq!(Config::new(5).min_len(), 3);
        assert_eq!(Config::new(64).min_len(), 32);
    }
}
