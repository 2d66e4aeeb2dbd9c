//! Error types for the record server.

use thiserror::Error;
use zonesync_protocol::{ProtocolError, ShareId, ZoneId};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the record server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The change token is from an older epoch or points into compacted
    /// history.
    #[error("change token expired for zone {zone}")]
    TokenExpired {
        /// Affected zone.
        zone: ZoneId,
    },

    /// Service temporarily unavailable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Share does not exist.
    #[error("unknown share: {0}")]
    ShareNotFound(ShareId),

    /// Token encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::TokenExpired { .. }
                | ServerError::InvalidRequest(_)
                | ServerError::NotAuthorized(_)
                | ServerError::ShareNotFound(_)
                | ServerError::Codec(_)
        )
    }

    /// Returns true if the request may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServerError::Unavailable(_))
    }
}
