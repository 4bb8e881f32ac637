use super::{BlockWriter, Link, ReadOnlyStore};
use crate::error::Error;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A MemStore is a pure in memory content-addressed store. Mostly useful for testing.
#[derive(Clone)]
pub struct MemStore<L>(Arc<Inner<L>>);

struct Inner<L> {
    blocks: Mutex<Blocks<L>>,
    digest: Arc<dyn Fn(&[u8]) -> L + Send + Sync>,
    max_size: usize,
}

impl<L: std::fmt::Debug> std::fmt::Debug for MemStore<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("blocks", &*self.0.blocks.lock())
            .field("max_size", &self.0.max_size)
            .finish()
    }
}

#[derive(Debug)]
struct Blocks<L> {
    map: FnvHashMap<L, Box<[u8]>>,
    current_size: usize,
}

impl<L: Link> MemStore<L> {
    pub fn new(max_size: usize, digest: impl Fn(&[u8]) -> L + Send + Sync + 'static) -> Self {
        Self(Arc::new(Inner {
            digest: Arc::new(digest),
            blocks: Mutex::new(Blocks {
                map: FnvHashMap::default(),
                current_size: 0,
            }),
            max_size,
        }))
    }

    /// number of distinct blocks
    pub fn len(&self) -> usize {
        self.0.blocks.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// total size of all distinct blocks
    pub fn current_size(&self) -> usize {
        self.0.blocks.lock().current_size
    }

    pub fn contains(&self, link: &L) -> bool {
        self.0.blocks.lock().map.contains_key(link)
    }

    fn get0(&self, link: &L) -> Option<Box<[u8]>> {
        let blocks = self.0.as_ref().blocks.lock();
        blocks.map.get(link).cloned()
    }

    fn put0(&self, data: Vec<u8>) -> anyhow::Result<L> {
        let digest = (self.0.digest)(&data);
        let mut blocks = self.0.blocks.lock();
        if let Some(existing) = blocks.map.get(&digest) {
            if existing.as_ref() != data.as_slice() {
                return Err(Error::AddressCollision(digest.to_string()).into());
            }
            return Ok(digest);
        }
        if blocks.current_size.saturating_add(data.len()) > self.0.max_size {
            return Err(Error::StorageFull.into());
        }
        blocks.current_size += data.len();
        blocks.map.insert(digest, data.into());
        std::mem::drop(blocks);
        Ok(digest)
    }
}

impl<L: Link> ReadOnlyStore<L> for MemStore<L> {
    fn get(&self, link: &L) -> anyhow::Result<Box<[u8]>> {
        if let Some(value) = self.get0(link) {
            Ok(value)
        } else {
            Err(Error::StorageIntegrity(link.to_string()).into())
        }
    }
}

impl<L: Link> BlockWriter<L> for MemStore<L> {
    fn put(&self, data: Vec<u8>) -> anyhow::Result<L> {
        self.put0(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;

    fn fnv_digest(data: &[u8]) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(data);
        hasher.finish()
    }

    #[test]
    fn identical_blocks_are_deduplicated() -> anyhow::Result<()> {
        let store = MemStore::new(usize::max_value(), fnv_digest);
        let a = store.put(b"block".to_vec())?;
        let b = store.put(b"block".to_vec())?;
        let c = store.put(b"other".to_vec())?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
        assert_eq!(store.current_size(), 10);
        assert_eq!(&store.get(&a)?[..], b"block");
        Ok(())
    }

    #[test]
    fn collision_is_fatal() -> anyhow::Result<()> {
        // a deliberately terrible hash
        let store = MemStore::new(usize::max_value(), |data: &[u8]| data.len() as u64);
        store.put(b"abc".to_vec())?;
        let err = store.put(b"xyz".to_vec()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::AddressCollision(_))
        ));
        assert_eq!(&store.get(&3)?[..], b"abc");
        Ok(())
    }

    #[test]
    fn missing_block_is_an_integrity_error() {
        let store = MemStore::new(usize::max_value(), fnv_digest);
        let err = store.get(&42).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StorageIntegrity(_))
        ));
    }

    #[test]
    fn full() -> anyhow::Result<()> {
        let store = MemStore::new(4, fnv_digest);
        store.put(b"abc".to_vec())?;
        // already there, so it does not count
        store.put(b"abc".to_vec())?;
        let err = store.put(b"de".to_vec()).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::StorageFull)));
        Ok(())
    }
}
