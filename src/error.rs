//! Error types for the emulator core.

use thiserror::Error;

/// Errors surfaced by the scheduler and memory manager.
#[derive(Debug, Error)]
pub enum Error {
    /// A virtual address past the process's requirement, or a physical
    /// address past emulated memory. In-band simulated accesses log and
    /// ignore this; API callers see it directly.
    #[error("invalid address {addr:#x}")]
    InvalidAddress {
        /// The offending address (virtual or physical, per context).
        addr: usize,
    },

    /// Admission refused: bad size, duplicate name, or an invalid program.
    /// No process is created.
    #[error("admission rejected: {reason}")]
    AdmissionRejected {
        /// Human-readable refusal reason.
        reason: String,
    },

    /// A scheduler operation was attempted before `initialize`.
    #[error("scheduler is not initialized")]
    NotInitialized,

    /// A recognized configuration key carried an unparseable value.
    #[error("config key {key:?} has unparseable value {value:?}")]
    ConfigParse {
        /// The recognized key.
        key: String,
        /// The raw value text.
        value: String,
    },

    /// Backing-store file could not be opened or created.
    #[error("backing store I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Error::AdmissionRejected {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
