//! Utilities to work with onair trees: a sha2-256 link type and graphviz rendering.
pub mod digest;
pub mod dump;

pub use digest::Sha256Digest;
