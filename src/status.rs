//! Tagged outcome type threaded through every public path.

use thiserror::Error;

/// Crate-wide result alias. Every API method returns this; iterators carry
/// a sticky `Status` via [`crate::iterators::RecordIterator::status`].
pub type Result<T> = std::result::Result<T, Status>;

/// Structural and I/O failure modes.
///
/// `NotFound` is reserved for "the key is absent or its most recent record
/// is a tombstone" (user-visible, not an error). `Corruption` covers wrong
/// sizes and malformed `DB_INIT`. `IoError` covers driver faults. The rest
/// round out `NotSupported` / `InvalidArgument` / `Empty` for API callers
/// that need to distinguish them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Status {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("empty")]
    Empty,

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Status {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Status::NotFound(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Status::Corruption(_))
    }

    pub fn is_io_error(&self) -> bool {
        matches!(self, Status::IoError(_))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Status::NotFound(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Status::Corruption(msg.into())
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Status::IoError(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Status::InvalidArgument(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Status::NotSupported(msg.into())
    }
}

/// Driver I/O failures surface through `anyhow` internally; translate them
/// to `Status::IoError` at the API boundary.
impl From<anyhow::Error> for Status {
    fn from(e: anyhow::Error) -> Self {
        Status::IoError(e.to_string())
    }
}
