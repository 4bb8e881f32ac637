use crate::node::NoveltyAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Novelty address {} is not allocated", .0)]
    ArenaIntegrity(NoveltyAddr),

    #[error(
        "Page size mismatch at {}: allocated {} bytes, update has {}",
        .addr,
        .allocated,
        .actual
    )]
    PageSizeMismatch {
        addr: NoveltyAddr,
        allocated: usize,
        actual: usize,
    },

    #[error("Block {} not found in storage", .0)]
    StorageIntegrity(String),

    #[error("Address collision for block {}", .0)]
    AddressCollision(String),

    #[error("Novelty arena is full")]
    NoveltyFull,

    #[error("Storage is full")]
    StorageFull,

    #[error("Tree was stored with order {}, not {}", .stored, .requested)]
    OrderMismatch { stored: usize, requested: usize },

    #[error("Invalid: {}", .0)]
    Invalid(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cbor(#[from] serde_cbor::Error),

    #[cfg(feature = "metrics")]
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}
