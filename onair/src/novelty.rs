//! interface to the transient page arena
//!
//! The novelty arena holds the pages of the current, uncommitted generation of a tree. Pages are
//! addressed by an opaque [NoveltyAddr] handed out by [Novelty::alloc]. The arena is passed
//! explicitly to every tree operation, it is not owned by the tree.
use crate::{error::Error, node::NoveltyAddr};
use anyhow::Result;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;

pub trait Novelty: Send + Sync {
    /// stores a new page and returns a freshly minted address for it
    fn alloc(&self, data: Vec<u8>) -> Result<NoveltyAddr>;

    /// reads a page. Fails with [Error::ArenaIntegrity] if the page was freed.
    fn lookup(&self, addr: NoveltyAddr) -> Result<Box<[u8]>>;

    /// overwrites a page in place.
    ///
    /// Fails with [Error::PageSizeMismatch] if the new data does not have exactly the length of
    /// the allocation.
    fn update(&self, addr: NoveltyAddr, data: Vec<u8>) -> Result<()>;

    /// releases a page. Fails with [Error::ArenaIntegrity] if the page is not allocated.
    fn free(&self, addr: NoveltyAddr) -> Result<()>;
}

impl<N: Novelty + ?Sized> Novelty for Arc<N> {
    fn alloc(&self, data: Vec<u8>) -> Result<NoveltyAddr> {
        self.as_ref().alloc(data)
    }

    fn lookup(&self, addr: NoveltyAddr) -> Result<Box<[u8]>> {
        self.as_ref().lookup(addr)
    }

    fn update(&self, addr: NoveltyAddr, data: Vec<u8>) -> Result<()> {
        self.as_ref().update(addr, data)
    }

    fn free(&self, addr: NoveltyAddr) -> Result<()> {
        self.as_ref().free(addr)
    }
}

/// A MemNovelty is a pure in memory arena.
///
/// Addresses are never reused, so any access to a freed page is detected.
#[derive(Debug, Clone)]
pub struct MemNovelty(Arc<Mutex<Pages>>);

#[derive(Debug)]
struct Pages {
    map: FnvHashMap<NoveltyAddr, Box<[u8]>>,
    next: u64,
    current_size: usize,
    max_size: usize,
}

impl MemNovelty {
    /// creates an arena that fails allocations once `max_size` bytes are occupied
    pub fn new(max_size: usize) -> Self {
        Self(Arc::new(Mutex::new(Pages {
            map: FnvHashMap::default(),
            next: 0,
            current_size: 0,
            max_size,
        })))
    }

    /// total number of bytes in allocated pages
    pub fn occupied_bytes(&self) -> usize {
        self.0.lock().current_size
    }

    /// number of allocated pages
    pub fn page_count(&self) -> usize {
        self.0.lock().map.len()
    }

    /// addresses of all allocated pages, in allocation order
    pub fn addresses(&self) -> Vec<NoveltyAddr> {
        let mut res = self.0.lock().map.keys().copied().collect::<Vec<_>>();
        res.sort_unstable();
        res
    }
}

impl Default for MemNovelty {
    fn default() -> Self {
        Self::new(usize::max_value())
    }
}

impl Novelty for MemNovelty {
    fn alloc(&self, data: Vec<u8>) -> Result<NoveltyAddr> {
        let mut pages = self.0.lock();
        if pages.current_size.saturating_add(data.len()) > pages.max_size {
            return Err(Error::NoveltyFull.into());
        }
        let addr = NoveltyAddr::new(pages.next);
        pages.next += 1;
        pages.current_size += data.len();
        pages.map.insert(addr, data.into());
        Ok(addr)
    }

    fn lookup(&self, addr: NoveltyAddr) -> Result<Box<[u8]>> {
        let pages = self.0.lock();
        match pages.map.get(&addr) {
            Some(data) => Ok(data.clone()),
            None => Err(Error::ArenaIntegrity(addr).into()),
        }
    }

    fn update(&self, addr: NoveltyAddr, data: Vec<u8>) -> Result<()> {
        let mut pages = self.0.lock();
        let page = pages
            .map
            .get_mut(&addr)
            .ok_or(Error::ArenaIntegrity(addr))?;
        if page.len() != data.len() {
            return Err(Error::PageSizeMismatch {
                addr,
                allocated: page.len(),
                actual: data.len(),
            }
            .into());
        }
        page.copy_from_slice(&data);
        Ok(())
    }

    fn free(&self, addr: NoveltyAddr) -> Result<()> {
        let mut pages = self.0.lock();
        let page = pages.map.remove(&addr).ok_or(Error::ArenaIntegrity(addr))?;
        pages.current_size -= page.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(result: Result<impl std::fmt::Debug>) -> Error {
        result
            .unwrap_err()
            .downcast::<Error>()
            .expect("expected an onair error")
    }

    #[test]
    fn alloc_lookup_update_free() -> anyhow::Result<()> {
        let novelty = MemNovelty::default();
        let a = novelty.alloc(b"hello".to_vec())?;
        let b = novelty.alloc(b"world!".to_vec())?;
        assert_ne!(a, b);
        assert_eq!(novelty.occupied_bytes(), 11);
        novelty.update(a, b"HELLO".to_vec())?;
        assert_eq!(&novelty.lookup(a)?[..], b"HELLO");
        novelty.free(a)?;
        assert_eq!(novelty.occupied_bytes(), 6);
        assert_eq!(novelty.page_count(), 1);
        assert_eq!(novelty.addresses(), vec![b]);
        Ok(())
    }

    #[test]
    fn use_after_free_is_detected() -> anyhow::Result<()> {
        let novelty = MemNovelty::default();
        let a = novelty.alloc(vec![1, 2, 3])?;
        novelty.free(a)?;
        assert!(matches!(error(novelty.lookup(a)), Error::ArenaIntegrity(x) if x == a));
        assert!(matches!(
            error(novelty.update(a, vec![1, 2, 3])),
            Error::ArenaIntegrity(_)
        ));
        assert!(matches!(error(novelty.free(a)), Error::ArenaIntegrity(_)));
        // addresses are not reused
        let b = novelty.alloc(vec![1, 2, 3])?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn update_must_keep_size() -> anyhow::Result<()> {
        let novelty = MemNovelty::default();
        let a = novelty.alloc(vec![0; 8])?;
        match error(novelty.update(a, vec![0; 9])) {
            Error::PageSizeMismatch {
                addr,
                allocated,
                actual,
            } => {
                assert_eq!(addr, a);
                assert_eq!(allocated, 8);
                assert_eq!(actual, 9);
            }
            other => panic!("unexpected error {}", other),
        }
        Ok(())
    }

    #[test]
    fn capacity_is_enforced() -> anyhow::Result<()> {
        let novelty = MemNovelty::new(10);
        novelty.alloc(vec![0; 6])?;
        assert!(matches!(
            error(novelty.alloc(vec![0; 5])),
            Error::NoveltyFull
        ));
        novelty.alloc(vec![0; 4])?;
        Ok(())
    }
}
