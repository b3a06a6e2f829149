//! Metadata cache persistence for typescope with Zstd compression
//!
//! This crate provides the on-disk store behind the repository metadata
//! cache: one file per key, namespaced per repository root, written
//! atomically and compressed with Zstd.

pub mod compression;
pub mod error;
pub mod store;


pub use compression::CompressionLevel;
pub use compression::Compressor;
pub use error::PersistenceError;
pub use error::Result;
pub use store::CacheStore;

/// Header for typescope cache entries
pub const TSCP_MAGIC: &[u8] = b"TSCP";

/// Current entry format version
pub const FORMAT_VERSION: u16 = 1;
