use std::path::PathBuf;

use cfgcache_codec::{DecodeError, EncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("load failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("cannot access {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A stored graph did not re-encode to the same bytes after a reload.
    #[error("round-trip verification failed: {0}")]
    Verification(String),
}

impl CacheError {
    /// The cache artifact involved in the failed operation must not be used.
    ///
    /// Configuration errors happen before any artifact is touched, and a
    /// cancelled load leaves its artifact as it was.
    pub fn is_invalidating(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Decode(DecodeError::Cancelled) => false,
            _ => true,
        }
    }

    /// The operation stopped because its cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Encode(EncodeError::Cancelled) | Self::Decode(DecodeError::Cancelled)
        )
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use cfgcache_codec::FormatError;

    #[test]
    fn classification() {
        let format = CacheError::from(DecodeError::from(FormatError::TrailingBytes));
        assert!(format.is_invalidating());
        assert!(!format.is_cancelled());

        let cancelled_load = CacheError::from(DecodeError::Cancelled);
        assert!(!cancelled_load.is_invalidating());
        assert!(cancelled_load.is_cancelled());

        let cancelled_store = CacheError::from(EncodeError::Cancelled);
        assert!(cancelled_store.is_invalidating());
        assert!(cancelled_store.is_cancelled());

        assert!(!CacheError::Config("bad".into()).is_invalidating());
    }

    #[test]
    fn messages_carry_cause() {
        let err = CacheError::from(DecodeError::from(FormatError::VersionMismatch {
            expected: 2,
            found: 1,
        }));
        assert_eq!(
            err.to_string(),
            "load failed: schema version mismatch: stream 1, engine 2"
        );
    }
}
