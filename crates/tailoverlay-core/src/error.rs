//! Error types for TailOverlay.
//!
//! This module provides a unified error type for all workspace operations.
//! Rejections a caller can branch on carry a stable error code so that the
//! HTTP layer and clients never have to match on message text.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for TailOverlay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for TailOverlay.
#[derive(Error, Debug)]
pub enum Error {
    /// Workspace code did not match (E001)
    #[error("invalid workspace code")]
    InvalidCode,

    /// The caller's identity could not be resolved (E002)
    #[error("identity unavailable for caller")]
    IdentityUnavailable,

    /// The caller resolved but is not admitted to the workspace (E003)
    #[error("caller is not a member of this workspace")]
    NotAMember,

    /// Join request unknown, already resolved or expired (E004)
    #[error("join request not found")]
    RequestNotFound,

    /// Join request belongs to a different identity (E005)
    #[error("join request belongs to a different identity")]
    RequestNotAuthorizedForCaller,

    /// Privileged operation attempted by a non-local caller (E006)
    #[error("operation is only available to the local host")]
    Forbidden,

    /// Upload did not contain a file (E007)
    #[error("no file uploaded")]
    NoContent,

    /// Requested content does not exist (E008)
    #[error("content not found: {0}")]
    ContentNotFound(String),

    /// Malformed workspace code
    #[error("invalid code format: {0}")]
    InvalidCodeFormat(String),

    /// Malformed chat text or live-stream message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The host service is already running
    #[error("workspace host is already running")]
    AlreadyRunning,

    /// The listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Address that was requested
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidCode => Some("E001"),
            Self::IdentityUnavailable => Some("E002"),
            Self::NotAMember => Some("E003"),
            Self::RequestNotFound => Some("E004"),
            Self::RequestNotAuthorizedForCaller => Some("E005"),
            Self::Forbidden => Some("E006"),
            Self::NoContent => Some("E007"),
            Self::ContentNotFound(_) => Some("E008"),
            _ => None,
        }
    }

    /// Returns whether the caller may retry the same operation later.
    ///
    /// Only resolver failures are transient; retrying is the caller's job.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::IdentityUnavailable | Self::Io(_))
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::IdentityUnavailable => Some(
                "Make sure Tailscale is running and logged in on both devices:\n\
                   tailscale status",
            ),
            Self::NotAMember => Some("Ask the host to approve a join request first."),
            Self::BindFailed { .. } => Some(
                "Another process is using the port. Stop it or pass --port to pick another.",
            ),
            _ => None,
        }
    }
}
