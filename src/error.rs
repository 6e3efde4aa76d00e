//! Error types shared across the crate.
//!
//! Nothing in this crate treats a failure as fatal to the reader. Errors are
//! returned so hosts can decide whether to surface them, but every component
//! degrades to "fewer highlights" or "coarser progress" on its own.

use core::fmt;

use crate::cfi::CfiError;

/// Top-level error for position and anchoring operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnchorError {
    /// A rendition or book was used before it reported ready.
    NotReady,
    /// Table-of-contents parsing failed.
    Navigation(String),
    /// Content XHTML could not be walked.
    Xhtml(String),
    /// A locator string was not a valid CFI.
    Cfi(CfiError),
    /// Location index generation, load, or save failed.
    Index(IndexError),
    /// A key-value store operation failed.
    Store(StoreError),
    /// A book section could not be read during generation.
    Section { index: usize, message: String },
    /// The rendering engine rejected a command.
    Rendition(String),
    /// Configuration payload was malformed.
    Config(String),
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "book or rendition used before ready"),
            Self::Navigation(msg) => write!(f, "navigation error: {}", msg),
            Self::Xhtml(msg) => write!(f, "xhtml error: {}", msg),
            Self::Cfi(err) => write!(f, "cfi error: {}", err),
            Self::Index(err) => write!(f, "location index error: {}", err),
            Self::Store(err) => write!(f, "store error: {}", err),
            Self::Section { index, message } => {
                write!(f, "section {} unavailable: {}", index, message)
            }
            Self::Rendition(msg) => write!(f, "rendition error: {}", msg),
            Self::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for AnchorError {}

impl From<CfiError> for AnchorError {
    fn from(value: CfiError) -> Self {
        Self::Cfi(value)
    }
}

impl From<IndexError> for AnchorError {
    fn from(value: IndexError) -> Self {
        Self::Index(value)
    }
}

impl From<StoreError> for AnchorError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Location index failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexError {
    /// Generation produced, or a blob contained, zero break points.
    Empty,
    /// Blob could not be decoded or failed a structural check.
    Corrupt(String),
    /// Blob was written by an incompatible schema version.
    Version { found: u8, expected: u8 },
    /// Blob belongs to different book content than requested.
    Stale,
    /// Generation exceeded a configured limit.
    LimitExceeded {
        kind: &'static str,
        actual: usize,
        limit: usize,
    },
    /// Encoding the blob failed.
    Encode(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "index has no locations"),
            Self::Corrupt(msg) => write!(f, "corrupt index blob: {}", msg),
            Self::Version { found, expected } => {
                write!(f, "index schema {} (expected {})", found, expected)
            }
            Self::Stale => write!(f, "index fingerprint does not match book content"),
            Self::LimitExceeded {
                kind,
                actual,
                limit,
            } => write!(
                f,
                "index limit exceeded: {} (actual={} limit={})",
                kind, actual, limit
            ),
            Self::Encode(msg) => write!(f, "index encode failed: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {}

/// Key-value store failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying I/O failed.
    Io(String),
    /// Stored payload could not be decoded.
    Corrupt(String),
    /// Payload exceeds the store's size cap.
    TooLarge { actual: usize, limit: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "i/o: {}", msg),
            Self::Corrupt(msg) => write!(f, "corrupt entry: {}", msg),
            Self::TooLarge { actual, limit } => {
                write!(f, "entry too large (actual={} limit={})", actual, limit)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Progress persistence failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncError {
    /// Remote rejected or could not be reached.
    Remote(String),
    /// Session expired; the write needs fresh credentials.
    Unauthorized,
    /// Record could not be encoded.
    Encode(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(msg) => write!(f, "progress write failed: {}", msg),
            Self::Unauthorized => write!(f, "progress write unauthorized"),
            Self::Encode(msg) => write!(f, "progress encode failed: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

/// Chapter description fetch failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchError {
    /// Extraction for the chapter is still running on the backend.
    InProgress { retry_after_ms: Option<u64> },
    /// Backend unreachable or returned an error.
    Unavailable(String),
    /// Request was aborted or superseded.
    Cancelled,
    /// Payload did not decode.
    Malformed(String),
    /// Still in progress after every allowed attempt.
    Exhausted { attempts: u32 },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress { retry_after_ms } => match retry_after_ms {
                Some(ms) => write!(f, "extraction in progress (retry after {}ms)", ms),
                None => write!(f, "extraction in progress"),
            },
            Self::Unavailable(msg) => write!(f, "descriptions unavailable: {}", msg),
            Self::Cancelled => write!(f, "chapter load cancelled"),
            Self::Malformed(msg) => write!(f, "malformed chapter bundle: {}", msg),
            Self::Exhausted { attempts } => {
                write!(f, "extraction still in progress after {} attempts", attempts)
            }
        }
    }
}

impl std::error::Error for FetchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_limit_context() {
        let err = AnchorError::from(IndexError::LimitExceeded {
            kind: "max_locations",
            actual: 12,
            limit: 10,
        });
        let text = err.to_string();
        assert!(text.contains("max_locations"));
        assert!(text.contains("actual=12"));
    }

    #[test]
    fn store_error_converts_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(ref msg) if msg.contains("gone")));
    }

    #[test]
    fn fetch_error_mentions_retry_hint() {
        let err = FetchError::InProgress {
            retry_after_ms: Some(1500),
        };
        assert!(err.to_string().contains("1500ms"));
        assert_eq!(
            FetchError::Exhausted { attempts: 4 }.to_string(),
            "extraction still in progress after 4 attempts"
        );
    }
}
