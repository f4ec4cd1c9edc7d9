//! Session state types.
//!
//! Core data model for the session subsystem: identifier newtypes, the
//! session record itself, its security context, and audit events. All types
//! are `Clone` and serializable so they can round-trip through the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Unique identifier for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub uuid::Uuid);

impl TenantId {
    /// Generate a new random `TenantId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    /// Generate a new random `UserId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a session.
///
/// Globally unique within a (tenant, user) pair at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    /// Generate a new random `SessionId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Device Metadata
// ═══════════════════════════════════════════════════════════════════════

/// Coarse device classification from the User-Agent string.
///
/// Best-effort string matching only. Never use this for a security
/// decision; the fingerprint hash is the continuity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Phone-class device.
    Mobile,
    /// Tablet-class device.
    Tablet,
    /// Anything else.
    Desktop,
}

impl DeviceType {
    /// Device type as a lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
        }
    }
}

/// Parsed device metadata (advisory only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable device id derived from the fingerprint hash.
    pub device_id: String,
    /// Coarse classification.
    pub device_type: DeviceType,
    /// OS family, if recognized.
    pub os_name: Option<String>,
    /// OS version, if recognized.
    pub os_version: Option<String>,
    /// Browser family, if recognized.
    pub browser_name: Option<String>,
    /// Browser version, if recognized.
    pub browser_version: Option<String>,
}

impl DeviceInfo {
    /// Empty-but-valid metadata for requests with no User-Agent.
    #[must_use]
    pub const fn unknown(device_id: String) -> Self {
        Self {
            device_id,
            device_type: DeviceType::Desktop,
            os_name: None,
            os_version: None,
            browser_name: None,
            browser_version: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════

/// Per-session security flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityFlags {
    /// A session with this flag set must fail validation.
    pub suspicious_activity: bool,
    /// The user must re-authenticate before sensitive operations.
    pub requires_reauth: bool,
    /// MFA step-up is required.
    pub mfa_required: bool,
    /// Count of failed security checks against this session.
    pub failed_attempts: u32,
    /// When the flags were last mutated by a security check.
    pub last_security_check: Option<DateTime<Utc>>,
}

/// Server-side record binding a user+tenant to live tokens and security
/// metadata.
///
/// Sessions are ephemeral: stored with a TTL matching `expires_at`. Removal
/// from the store is the deletion; there is no soft-delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub session_id: SessionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning user.
    pub user_id: UserId,
    /// Role label (not hierarchical).
    pub role: String,

    /// Current short-lived access token.
    pub access_token: String,
    /// Current refresh token. Exactly one at a time; rotated, not
    /// accumulated.
    pub refresh_token: Option<String>,

    /// Fingerprint hash derived from request headers.
    pub device_fingerprint: Option<String>,
    /// Parsed device metadata (advisory).
    pub device_info: DeviceInfo,
    /// Client IP at session creation.
    pub ip_address: Option<std::net::IpAddr>,
    /// Raw User-Agent at session creation.
    pub user_agent: Option<String>,
    /// Mutable security state.
    pub security_flags: SecurityFlags,

    /// Session creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub last_access: DateTime<Utc>,
    /// Access-token expiry. Always set before persistence.
    pub expires_at: DateTime<Utc>,
    /// Refresh-token expiry. Always set before persistence.
    pub refresh_expires_at: DateTime<Utc>,
    /// Monotonically increasing request counter.
    pub request_count: u64,
    /// Timestamp of the most recent counted request.
    pub last_request_time: Option<DateTime<Utc>>,
}

impl Session {
    /// `true` if `expires_at` is now or in the past.
    ///
    /// The boundary is inclusive: exactly-now is treated as expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// `true` if the refresh token is past `refresh_expires_at`.
    #[must_use]
    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at <= now
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Audit Events
// ═══════════════════════════════════════════════════════════════════════

/// Category of a session lifecycle/security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    /// Session was created.
    SessionCreated,
    /// Session was deleted (logout, eviction, or security invalidation).
    SessionTerminated,
    /// Refresh-token rotation succeeded.
    TokenRefreshed,
    /// A security check flagged the session.
    SuspiciousActivity,
    /// A rate limit rejected a session-creation attempt.
    RateLimitExceeded,
}

impl AuditEventType {
    /// Event type as an upper-snake label for external sinks.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "SESSION_CREATED",
            Self::SessionTerminated => "SESSION_TERMINATED",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }
}

/// Immutable, append-only record of a session lifecycle/security event.
///
/// Written once; retention and purging belong to the external audit store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Session the event concerns.
    pub session_id: SessionId,
    /// Owning user.
    pub user_id: UserId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Event category.
    pub event_type: AuditEventType,
    /// Client IP, if known.
    pub ip_address: Option<std::net::IpAddr>,
    /// Serialized device metadata snapshot.
    pub device_info: serde_json::Value,
    /// Free-text detail (e.g. termination reason).
    pub details: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event from a session snapshot.
    #[must_use]
    pub fn for_session(session: &Session, event_type: AuditEventType, details: String) -> Self {
        Self {
            session_id: session.session_id,
            user_id: session.user_id,
            tenant_id: session.tenant_id,
            event_type,
            ip_address: session.ip_address,
            device_info: serde_json::to_value(&session.device_info)
                .unwrap_or(serde_json::Value::Null),
            details,
            timestamp: Utc::now(),
        }
    }
}
