//! Session lifecycle manager.
//!
//! Orchestrates the session state machine (non-existent → active →
//! refreshed* → terminated) over the provider traits. Policy decisions are
//! delegated to [`SecurityEvaluator`]; this module owns ordering, eviction,
//! token rotation, and the fail-closed conversion of store trouble into
//! "no session".

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::fingerprint::{self, RequestMeta};
use crate::providers::{AuditSink, RateLimiter, SessionStore, TokenClaims, TokenIssuer};
use crate::security::SecurityEvaluator;
use crate::state::{
    AuditEvent, AuditEventType, SecurityFlags, Session, SessionId, TenantId, UserId,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;

/// Lifecycle orchestrator for multi-tenant sessions.
pub struct SessionManager<S, R, T, A> {
    store: Arc<S>,
    token_issuer: Arc<T>,
    audit: Arc<A>,
    security: SecurityEvaluator<S, R, A>,
    config: SessionConfig,
}

/// 256-bit opaque token, URL-safe base64 without padding.
fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl<S, R, T, A> SessionManager<S, R, T, A>
where
    S: SessionStore,
    R: RateLimiter,
    T: TokenIssuer,
    A: AuditSink,
{
    /// Create a manager over shared providers.
    pub fn new(
        store: Arc<S>,
        limiter: Arc<R>,
        token_issuer: Arc<T>,
        audit: Arc<A>,
        config: SessionConfig,
    ) -> Self {
        let security = SecurityEvaluator::new(
            Arc::clone(&store),
            Arc::clone(&limiter),
            Arc::clone(&audit),
            config.clone(),
        );
        Self {
            store,
            token_issuer,
            audit,
            security,
            config,
        }
    }

    /// The policy layer, shared with middleware.
    pub const fn security(&self) -> &SecurityEvaluator<S, R, A> {
        &self.security
    }

    /// Active configuration.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session for an authenticated principal.
    ///
    /// Runs the creation rate-limit gate first, evicts the oldest sessions
    /// while the user is at the concurrent cap, stamps both TTLs from
    /// config, persists, and emits SESSION_CREATED. The session is returned
    /// even when the store write fails: the caller's authentication already
    /// succeeded, and an unanchored session simply will not survive the
    /// next lookup.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` when the client IP is over the creation
    /// threshold.
    pub async fn create_session(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        role: &str,
        access_token: &str,
        meta: &RequestMeta,
    ) -> Result<Session> {
        self.create_session_with_id(SessionId::new(), tenant_id, user_id, role, access_token, meta)
            .await
    }

    /// Create a session under a caller-chosen id.
    ///
    /// Used when the session id is already fixed by an outstanding bearer
    /// token: synthesizing a replacement under that id lets the token's
    /// claims resolve on the next request instead of minting a fresh
    /// session per request.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` when the client IP is over the creation
    /// threshold.
    pub async fn create_session_with_id(
        &self,
        session_id: SessionId,
        tenant_id: TenantId,
        user_id: UserId,
        role: &str,
        access_token: &str,
        meta: &RequestMeta,
    ) -> Result<Session> {
        let ip = fingerprint::client_ip(meta);
        let ip_label = ip.map_or_else(|| "unknown".to_string(), |a| a.to_string());

        if let Err(e) = self.security.validate_creation(&ip_label).await {
            if matches!(e, SessionError::RateLimitExceeded { .. }) {
                self.record_audit(AuditEvent {
                    session_id: SessionId(uuid::Uuid::nil()),
                    user_id,
                    tenant_id,
                    event_type: AuditEventType::RateLimitExceeded,
                    ip_address: ip,
                    device_info: serde_json::Value::Null,
                    details: "session creation rate limit exceeded".to_string(),
                    timestamp: Utc::now(),
                })
                .await;
            }
            return Err(e);
        }

        self.evict_to_cap(tenant_id, user_id).await;

        let now = Utc::now();
        let session = Session {
            session_id,
            tenant_id,
            user_id,
            role: role.to_string(),
            access_token: access_token.to_string(),
            refresh_token: Some(generate_refresh_token()),
            device_fingerprint: Some(fingerprint::generate_fingerprint(meta)),
            device_info: fingerprint::extract_device_info(meta),
            ip_address: ip,
            user_agent: meta.header("user-agent").map(ToString::to_string),
            security_flags: SecurityFlags::default(),
            created_at: now,
            last_access: now,
            expires_at: now + self.config.access_ttl,
            refresh_expires_at: now + self.config.refresh_ttl,
            request_count: 0,
            last_request_time: None,
        };

        if let Err(e) = self.store.put(&session).await {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "session write failed, returning unanchored session"
            );
        }

        self.record_audit(AuditEvent::for_session(
            &session,
            AuditEventType::SessionCreated,
            "session created".to_string(),
        ))
        .await;

        tracing::info!(
            session_id = %session.session_id,
            tenant_id = %tenant_id,
            user_id = %user_id,
            device_type = session.device_info.device_type.as_str(),
            "session created"
        );
        Ok(session)
    }

    /// Fetch and validate a session.
    ///
    /// Fail-closed on every path: a session that fails validation is
    /// invalidated and reported absent, and store trouble yields `None`
    /// with a warning rather than an error the caller might mistake for
    /// "absent but healthy".
    pub async fn get_session(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        session_id: SessionId,
    ) -> Option<Session> {
        let fetched = match self.store.get(tenant_id, user_id, session_id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "session fetch failed, failing closed"
                );
                return None;
            }
        };
        let mut session = fetched?;

        match self.security.validate(&mut session).await {
            Ok(true) => Some(session),
            Ok(false) => {
                if let Err(e) = self
                    .invalidate_session(tenant_id, user_id, session_id, "failed validation")
                    .await
                {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "failed to invalidate rejected session"
                    );
                }
                None
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "session validation unavailable, failing closed"
                );
                None
            }
        }
    }

    /// Blacklist check for the request path.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` on transport failure; callers on the
    /// authentication path must fail closed on it.
    pub async fn is_token_blacklisted(&self, token: &str) -> Result<bool> {
        self.store.is_token_blacklisted(token).await
    }

    /// Record request activity on a session.
    ///
    /// Designed to run off the response path (callers typically spawn it).
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the updated session cannot be written.
    pub async fn update_last_access(&self, session: &mut Session) -> Result<()> {
        let now = Utc::now();
        session.last_access = now;
        session.request_count += 1;
        session.last_request_time = Some(now);
        self.store.put(session).await
    }

    /// Terminate a session: delete it, blacklist its still-live tokens, and
    /// emit SESSION_TERMINATED.
    ///
    /// Idempotent: invalidating an absent session is a no-op with no audit
    /// event. Already-expired tokens are not blacklisted; their expiry is
    /// enforcement enough.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the session cannot be fetched or
    /// deleted. Blacklist failures are logged, not propagated: the session
    /// record is already gone.
    pub async fn invalidate_session(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        session_id: SessionId,
        reason: &str,
    ) -> Result<()> {
        let Some(session) = self.store.get(tenant_id, user_id, session_id).await? else {
            return Ok(());
        };

        self.store.delete(tenant_id, user_id, session_id).await?;

        let now = Utc::now();
        if !session.is_expired(now) {
            if let Err(e) = self
                .store
                .blacklist_token(&session.access_token, session.expires_at - now)
                .await
            {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "failed to blacklist access token"
                );
            }
        }
        if let Some(refresh_token) = &session.refresh_token {
            if !session.is_refresh_expired(now) {
                if let Err(e) = self
                    .store
                    .blacklist_token(refresh_token, session.refresh_expires_at - now)
                    .await
                {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "failed to blacklist refresh token"
                    );
                }
            }
        }

        self.record_audit(AuditEvent::for_session(
            &session,
            AuditEventType::SessionTerminated,
            reason.to_string(),
        ))
        .await;

        tracing::info!(
            session_id = %session_id,
            tenant_id = %tenant_id,
            user_id = %user_id,
            reason = %reason,
            "session terminated"
        );
        Ok(())
    }

    /// Terminate every session for a user, optionally sparing one
    /// (typically the caller's own).
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the user's sessions cannot be listed.
    /// Individual terminations that fail are logged and skipped.
    pub async fn invalidate_all_user_sessions(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        except: Option<SessionId>,
    ) -> Result<usize> {
        let sessions = self.store.list_by_user(tenant_id, user_id).await?;
        let mut terminated = 0;
        for session in sessions {
            if Some(session.session_id) == except {
                continue;
            }
            match self
                .invalidate_session(tenant_id, user_id, session.session_id, "bulk invalidation")
                .await
            {
                Ok(()) => terminated += 1,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "failed to terminate session during bulk invalidation"
                    );
                }
            }
        }
        Ok(terminated)
    }

    /// Rotate a refresh token.
    ///
    /// The presented token must be unblacklisted, resolvable, within its
    /// refresh window, and (when enforcement is on) accompanied by the
    /// session's device fingerprint. On success the presented token is
    /// blacklisted for its remaining lifetime before its successor is
    /// minted, making each refresh token single-use.
    ///
    /// # Errors
    ///
    /// `SessionExpired` for a blacklisted, unknown, or out-of-window token;
    /// `SessionInvalid` for a fingerprint mismatch (the session is
    /// terminated); `StoreUnavailable` if the rotation cannot be made
    /// durable.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        presented_fingerprint: Option<&str>,
    ) -> Result<Session> {
        if self.store.is_token_blacklisted(refresh_token).await? {
            tracing::warn!("refresh attempted with blacklisted token");
            return Err(SessionError::SessionExpired);
        }

        let Some(mut session) = self.store.find_by_refresh_token(refresh_token).await? else {
            return Err(SessionError::SessionExpired);
        };

        let stored = session.refresh_token.clone().unwrap_or_default();
        if !constant_time_eq::constant_time_eq(stored.as_bytes(), refresh_token.as_bytes()) {
            return Err(SessionError::SessionExpired);
        }

        let now = Utc::now();
        if session.is_refresh_expired(now) {
            if let Err(e) = self
                .invalidate_session(
                    session.tenant_id,
                    session.user_id,
                    session.session_id,
                    "refresh token expired",
                )
                .await
            {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "failed to clean up refresh-expired session"
                );
            }
            return Err(SessionError::SessionExpired);
        }

        if !self
            .security
            .verify_fingerprint(&session, presented_fingerprint)
        {
            if let Err(e) = self
                .security
                .record_suspicious_activity(&mut session, "fingerprint mismatch on refresh")
                .await
            {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "failed to persist suspicious flag"
                );
            }
            if let Err(e) = self
                .invalidate_session(
                    session.tenant_id,
                    session.user_id,
                    session.session_id,
                    "fingerprint mismatch on refresh",
                )
                .await
            {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "failed to terminate session after fingerprint mismatch"
                );
            }
            return Err(SessionError::SessionInvalid {
                reason: "device fingerprint mismatch".to_string(),
            });
        }

        // Retire the presented token before minting its successor; a
        // concurrent refresh of the same token now loses at the blacklist
        // check instead of succeeding twice.
        self.store
            .blacklist_token(refresh_token, session.refresh_expires_at - now)
            .await?;

        session.refresh_token = Some(generate_refresh_token());
        session.expires_at = now + self.config.access_ttl;
        session.refresh_expires_at = now + self.config.refresh_ttl;
        session.last_access = now;

        let claims = TokenClaims {
            user_id: session.user_id,
            tenant_id: session.tenant_id,
            role: session.role.clone(),
            session_id: Some(session.session_id),
        };
        session.access_token = self
            .token_issuer
            .issue(&claims, self.config.access_ttl)
            .await?;

        self.store.put(&session).await?;

        self.record_audit(AuditEvent::for_session(
            &session,
            AuditEventType::TokenRefreshed,
            "refresh token rotated".to_string(),
        ))
        .await;

        tracing::info!(
            session_id = %session.session_id,
            tenant_id = %session.tenant_id,
            user_id = %session.user_id,
            "session refreshed"
        );
        Ok(session)
    }

    /// Evict oldest-first until the user is below the concurrent cap.
    ///
    /// Best-effort: eviction trouble is logged and creation proceeds, since
    /// blocking a legitimate login on cap bookkeeping would invert the
    /// feature's purpose.
    async fn evict_to_cap(&self, tenant_id: TenantId, user_id: UserId) {
        let cap = u64::from(self.config.max_concurrent_sessions);
        let active = match self.store.count_active(tenant_id, user_id).await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(error = %e, "failed to count active sessions, skipping eviction");
                return;
            }
        };
        if active < cap {
            return;
        }

        let overflow = active - cap + 1;
        for _ in 0..overflow {
            let oldest = match self.store.oldest(tenant_id, user_id).await {
                Ok(Some(oldest)) => oldest,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to resolve oldest session for eviction");
                    return;
                }
            };
            if let Err(e) = self
                .invalidate_session(
                    tenant_id,
                    user_id,
                    oldest.session_id,
                    "concurrent session limit reached",
                )
                .await
            {
                tracing::warn!(
                    session_id = %oldest.session_id,
                    error = %e,
                    "failed to evict oldest session"
                );
                return;
            }
        }
    }

    async fn record_audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!(error = %e, "failed to record audit event");
        }
    }
}
