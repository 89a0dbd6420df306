//! Cache error types

use std::path::PathBuf;

use academy_crypto::{CipherError, KeyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Cached file is not UTF-8 text")]
    NotText,

    #[error("Key rotation aborted, old key still active: {0}")]
    Rotation(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
