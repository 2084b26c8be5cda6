//! Error type shared by every dongle crate.
//!
//! Transient radio conditions (short packets, duplicates, out-of-range
//! sequence numbers) are not errors; they are reported as dispositions and
//! counted. `DongleError` covers the conditions a caller has to act on:
//! flash driver failures, inconsistent persisted state, and bad
//! configuration.

use std::fmt;

/// Flash operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Erase,
    Write,
    Read,
}

impl fmt::Display for FlashOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Erase => "erase",
            Self::Write => "write",
            Self::Read => "read",
        };
        f.write_str(label)
    }
}

/// Primary error type for the dongle core.
#[derive(Debug, thiserror::Error)]
pub enum DongleError {
    /// The flash driver reported a failure.
    #[error("flash {op} failed at {addr:#x}: {detail}")]
    Flash {
        op: FlashOp,
        addr: u32,
        detail: String,
    },

    /// A program operation targeted bytes that were not erased.
    #[error("flash write at {addr:#x} targets programmed bytes; erase first")]
    NotErased { addr: u32 },

    /// A value fell outside the range the operation accepts.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: String, value: String },

    /// Persisted state failed validation.
    #[error("corrupt persisted state: {detail}")]
    Corrupt { detail: String },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// The counter store rejected a read or write.
    #[error("counter store failure on {key}: {detail}")]
    Counter { key: String, detail: String },

    /// A download operation was invoked in the wrong state.
    #[error("download: {detail}")]
    Download { detail: String },

    /// Invariant violation inside the core.
    #[error("internal error: {0}")]
    Internal(String),

    /// Host I/O failure (simulator only).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DongleError {
    /// Build an [`DongleError::Internal`] from any message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build an [`DongleError::OutOfRange`] from a label and a displayable value.
    pub fn out_of_range(what: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::OutOfRange {
            what: what.into(),
            value: value.to_string(),
        }
    }

    /// Build an [`DongleError::InvalidConfig`].
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// Whether the error came from the flash medium (erase/write/read or a
    /// program over non-erased bytes).
    #[must_use]
    pub const fn is_flash_failure(&self) -> bool {
        matches!(self, Self::Flash { .. } | Self::NotErased { .. })
    }
}

/// Result alias used throughout the dongle crates.
pub type Result<T> = std::result::Result<T, DongleError>;
