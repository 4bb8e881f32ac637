//! interface to a content-addressed store
use crate::node::Node;
use anyhow::Result;
use core::hash::Hash;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::{Debug, Display},
    num::NonZeroUsize,
    sync::Arc,
};
use weight_cache::{Weighable, WeightCache};
mod mem_store;

pub use mem_store::MemStore;

/// Link type used to address blocks in storage.
///
/// Links are opaque to the tree, it only compares them for equality and persists them inside
/// branch blocks.
pub trait Link:
    Debug + Display + Hash + Eq + Copy + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> Link for T where
    T: Debug + Display + Hash + Eq + Copy + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

pub trait BlockWriter<L>: Send + Sync {
    /// adds a block to the store and returns its content address
    ///
    /// Storing identical bytes twice must yield the same link. Storing different bytes under an
    /// existing link must fail with [AddressCollision](crate::error::Error::AddressCollision).
    fn put(&self, data: Vec<u8>) -> Result<L>;
}

pub trait ReadOnlyStore<L> {
    /// gets a block. Fails with [StorageIntegrity](crate::error::Error::StorageIntegrity) if the
    /// link is unknown.
    fn get(&self, link: &L) -> Result<Box<[u8]>>;
}

impl<L, S: BlockWriter<L> + ?Sized> BlockWriter<L> for Arc<S> {
    fn put(&self, data: Vec<u8>) -> Result<L> {
        self.as_ref().put(data)
    }
}

impl<L, S: ReadOnlyStore<L> + ?Sized> ReadOnlyStore<L> for Arc<S> {
    fn get(&self, link: &L) -> Result<Box<[u8]>> {
        self.as_ref().get(link)
    }
}

impl<L> Weighable for Node<L> {
    fn measure(value: &Self) -> usize {
        value.estimated_size()
    }
}

type CacheOrBypass<L> = Option<Arc<Mutex<WeightCache<L, Node<L>>>>>;

/// Cache for decoded storage pages.
///
/// Storage pages are immutable, so the cache never has to be invalidated.
#[derive(Debug, Clone)]
pub struct PageCache<L: Link>(CacheOrBypass<L>);

impl<L: Link> Default for PageCache<L> {
    fn default() -> Self {
        Self::new(64 << 20)
    }
}

impl<L: Link> PageCache<L> {
    /// Passing a capacity of 0 disables the cache.
    pub fn new(capacity: usize) -> Self {
        Self(
            NonZeroUsize::new(capacity)
                .map(|capacity| Arc::new(Mutex::new(WeightCache::new(capacity)))),
        )
    }

    pub fn get(&self, link: &L) -> Option<Node<L>> {
        self.0.as_ref().and_then(|x| x.lock().get(link).cloned())
    }

    pub fn put(&self, link: L, node: Node<L>) {
        if let Some(Err(e)) = self.0.as_ref().map(|x| x.lock().put(link, node)) {
            tracing::warn!("Adding {} to cache failed: {}", link, e);
        }
    }

    pub fn reset(&self, capacity: NonZeroUsize) {
        if let Some(cache) = self.0.as_ref() {
            let mut cache = cache.lock();
            *cache = WeightCache::new(capacity);
        }
    }
}
