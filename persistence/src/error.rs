use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode cache value: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),

    #[error("failed to decode cache value: {0}")]
    BincodeDecode(#[from] bincode::error::DecodeError),

    #[error("zstd: {0}")]
    Compression(String),

    #[error("entry does not start with the TSCP magic")]
    InvalidMagic,

    /// Found version, supported version.
    #[error("entry format version {0} is not supported (expected {1})")]
    UnsupportedVersion(u16, u16),

    #[error("corrupt cache entry: {0}")]
    CorruptData(String),

    #[error("failed to persist entry {key}: {message}")]
    PersistFailed { key: String, message: String },
}

impl PersistenceError {
    /// True when the entry's contents are unreadable, as opposed to the file
    /// system failing.
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::BincodeDecode(_)
                | Self::Compression(_)
                | Self::InvalidMagic
                | Self::UnsupportedVersion(..)
                | Self::CorruptData(_)
        )
    }
}
