//! Error types for session lifecycle and security operations.

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error taxonomy for the session subsystem.
///
/// Security-relevant failures (`SessionExpired`, `SessionInvalid`,
/// `RateLimitExceeded`) carry messages safe to show to a client. Store
/// transport failures (`StoreUnavailable`) are recovered at the store/manager
/// boundary and must never reach the authentication path raw.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    // ═══════════════════════════════════════════════════════════
    // Session Errors
    // ═══════════════════════════════════════════════════════════
    /// Session or refresh token is past its expiry. The user must fully
    /// re-authenticate.
    #[error("Session has expired")]
    SessionExpired,

    /// A security check failed; the session has been actively terminated.
    #[error("Session is no longer valid: {reason}")]
    SessionInvalid {
        /// Reason for invalidation (client-safe).
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Rate Limiting
    // ═══════════════════════════════════════════════════════════
    /// Too many security-sensitive operations from one identifier.
    #[error("Too many attempts, please retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // Token Errors
    // ═══════════════════════════════════════════════════════════
    /// Bearer token failed verification or claim extraction. The reason
    /// distinguishes which claim was missing or malformed.
    #[error("Invalid token: {reason}")]
    InvalidToken {
        /// Which verification or claim-extraction step failed.
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════
    /// The backing store could not be reached or the circuit breaker is open.
    /// Callers must treat this as "state unknown," never as "absent."
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    /// Session payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SessionError {
    /// Returns `true` if this error may be surfaced to the client as-is.
    pub const fn is_client_safe(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired | Self::SessionInvalid { .. } | Self::RateLimitExceeded { .. }
        )
    }

    /// Message suitable for an end user.
    ///
    /// Internal failures collapse to a generic re-authentication prompt so
    /// transport details never leak.
    pub fn client_message(&self) -> String {
        match self {
            Self::SessionExpired | Self::SessionInvalid { .. } => {
                "Please log in again".to_string()
            }
            Self::RateLimitExceeded { .. } => "Too many attempts, slow down".to_string(),
            Self::InvalidToken { .. } | Self::StoreUnavailable(_) | Self::Serialization(_) => {
                "Authentication failed".to_string()
            }
        }
    }
}
