//! Security policy evaluation.
//!
//! The evaluator owns every non-lifecycle security decision: creation rate
//! limiting, session validation, suspicious-activity flagging, and device
//! fingerprint verification. The lifecycle manager and middleware call into
//! it rather than encoding policy themselves.

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::providers::{AuditSink, RateLimitOperation, RateLimiter, SessionStore};
use crate::state::{AuditEvent, AuditEventType, Session};
use chrono::Utc;
use std::sync::Arc;

/// Policy layer for session security checks.
pub struct SecurityEvaluator<S, R, A> {
    store: Arc<S>,
    limiter: Arc<R>,
    audit: Arc<A>,
    config: SessionConfig,
}

impl<S, R, A> SecurityEvaluator<S, R, A>
where
    S: SessionStore,
    R: RateLimiter,
    A: AuditSink,
{
    /// Create an evaluator over shared providers.
    pub const fn new(
        store: Arc<S>,
        limiter: Arc<R>,
        audit: Arc<A>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            audit,
            config,
        }
    }

    /// Gate a session-creation attempt by client IP.
    ///
    /// Must run before any store write for the new session.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` when the per-IP creation counter is over
    /// its window threshold.
    pub async fn validate_creation(&self, client_ip: &str) -> Result<()> {
        let limited = self
            .limiter
            .is_rate_limited(client_ip, RateLimitOperation::SessionCreate)
            .await?;
        if limited {
            tracing::warn!(
                client_ip = %client_ip,
                "session creation rate limit exceeded"
            );
            return Err(SessionError::RateLimitExceeded {
                retry_after: self.config.rate_limits.window,
            });
        }
        Ok(())
    }

    /// Full validity check for an already-fetched session.
    ///
    /// A session is invalid when it is expired, its access token is
    /// blacklisted, it is flagged suspicious, or its per-session request
    /// counter is over threshold. The last check flags the session
    /// suspicious as a side effect, so the next validation fails fast
    /// without consulting the limiter.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the blacklist cannot be consulted.
    /// Callers must fail closed on that, not assume validity.
    pub async fn validate(&self, session: &mut Session) -> Result<bool> {
        let now = Utc::now();
        if session.is_expired(now) {
            tracing::info!(session_id = %session.session_id, "session expired");
            return Ok(false);
        }

        if session.security_flags.suspicious_activity {
            tracing::warn!(
                session_id = %session.session_id,
                "session flagged suspicious, rejecting"
            );
            return Ok(false);
        }

        if self
            .store
            .is_token_blacklisted(&session.access_token)
            .await?
        {
            tracing::warn!(
                session_id = %session.session_id,
                "access token blacklisted, rejecting"
            );
            return Ok(false);
        }

        let over_rate = self
            .limiter
            .is_rate_limited(
                &session.session_id.to_string(),
                RateLimitOperation::SessionRequest,
            )
            .await?;
        if over_rate {
            self.record_suspicious_activity(session, "per-session request rate exceeded")
                .await?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Flag a session as suspicious and persist the updated flags.
    ///
    /// Emits exactly one SUSPICIOUS_ACTIVITY audit event per call.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the flagged session cannot be
    /// persisted. The audit event is recorded either way.
    pub async fn record_suspicious_activity(
        &self,
        session: &mut Session,
        reason: &str,
    ) -> Result<()> {
        session.security_flags.suspicious_activity = true;
        session.security_flags.failed_attempts += 1;
        session.security_flags.last_security_check = Some(Utc::now());

        tracing::warn!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            tenant_id = %session.tenant_id,
            failed_attempts = session.security_flags.failed_attempts,
            reason = %reason,
            "suspicious activity recorded"
        );

        if let Err(e) = self
            .audit
            .record(AuditEvent::for_session(
                session,
                AuditEventType::SuspiciousActivity,
                reason.to_string(),
            ))
            .await
        {
            tracing::warn!(error = %e, "failed to record suspicious-activity audit event");
        }

        self.store.put(session).await
    }

    /// Verify a presented fingerprint against the session's stored one.
    ///
    /// With enforcement disabled this always passes. With enforcement on,
    /// both values must be present and equal; a missing value on either
    /// side is a mismatch.
    #[must_use]
    pub fn verify_fingerprint(&self, session: &Session, presented: Option<&str>) -> bool {
        if !self.config.enforce_fingerprint {
            return true;
        }
        match (session.device_fingerprint.as_deref(), presented) {
            (Some(stored), Some(presented)) => {
                constant_time_eq::constant_time_eq(stored.as_bytes(), presented.as_bytes())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::mocks::{MockAuditSink, MockRateLimiter, MockSessionStore};
    use crate::state::{DeviceInfo, SecurityFlags, SessionId, TenantId, UserId};
    use chrono::Duration;

    fn test_session() -> Session {
        let now = Utc::now();
        Session {
            session_id: SessionId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            role: "member".to_string(),
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            device_fingerprint: Some("fp-abc".to_string()),
            device_info: DeviceInfo::unknown("dev".to_string()),
            ip_address: None,
            user_agent: None,
            security_flags: SecurityFlags::default(),
            created_at: now,
            last_access: now,
            expires_at: now + Duration::hours(1),
            refresh_expires_at: now + Duration::hours(24),
            request_count: 0,
            last_request_time: None,
        }
    }

    fn evaluator(
        store: MockSessionStore,
        limiter: MockRateLimiter,
        audit: MockAuditSink,
        config: SessionConfig,
    ) -> SecurityEvaluator<MockSessionStore, MockRateLimiter, MockAuditSink> {
        SecurityEvaluator::new(Arc::new(store), Arc::new(limiter), Arc::new(audit), config)
    }

    #[tokio::test]
    async fn test_valid_session_passes() {
        let eval = evaluator(
            MockSessionStore::new(),
            MockRateLimiter::default(),
            MockAuditSink::new(),
            SessionConfig::default(),
        );
        let mut session = test_session();
        assert_eq!(eval.validate(&mut session).await, Ok(true));
    }

    #[tokio::test]
    async fn test_expired_session_fails() {
        let eval = evaluator(
            MockSessionStore::new(),
            MockRateLimiter::default(),
            MockAuditSink::new(),
            SessionConfig::default(),
        );
        let mut session = test_session();
        session.expires_at = Utc::now();
        assert_eq!(eval.validate(&mut session).await, Ok(false));
    }

    #[tokio::test]
    async fn test_suspicious_flag_fails() {
        let eval = evaluator(
            MockSessionStore::new(),
            MockRateLimiter::default(),
            MockAuditSink::new(),
            SessionConfig::default(),
        );
        let mut session = test_session();
        session.security_flags.suspicious_activity = true;
        assert_eq!(eval.validate(&mut session).await, Ok(false));
    }

    #[tokio::test]
    async fn test_blacklisted_access_token_fails() {
        let store = MockSessionStore::new();
        let mut session = test_session();
        store
            .blacklist_token(&session.access_token, Duration::hours(1))
            .await
            .unwrap_or(());
        let eval = evaluator(
            store,
            MockRateLimiter::default(),
            MockAuditSink::new(),
            SessionConfig::default(),
        );
        assert_eq!(eval.validate(&mut session).await, Ok(false));
    }

    #[tokio::test]
    async fn test_request_rate_overrun_flags_suspicious() {
        let audit = MockAuditSink::new();
        let limiter =
            MockRateLimiter::new(RateLimitConfig::default().with_max_session_requests(0));
        let eval = evaluator(
            MockSessionStore::new(),
            limiter,
            audit.clone(),
            SessionConfig::default(),
        );
        let mut session = test_session();

        assert_eq!(eval.validate(&mut session).await, Ok(false));
        assert!(session.security_flags.suspicious_activity);
        assert_eq!(session.security_flags.failed_attempts, 1);
        assert_eq!(audit.count_of(AuditEventType::SuspiciousActivity), 1);
    }

    #[tokio::test]
    async fn test_creation_rate_limit() {
        let limiter =
            MockRateLimiter::new(RateLimitConfig::default().with_max_session_creations(2));
        let eval = evaluator(
            MockSessionStore::new(),
            limiter,
            MockAuditSink::new(),
            SessionConfig::default(),
        );

        assert!(eval.validate_creation("203.0.113.7").await.is_ok());
        assert!(eval.validate_creation("203.0.113.7").await.is_ok());
        let err = eval.validate_creation("203.0.113.7").await;
        assert!(matches!(err, Err(SessionError::RateLimitExceeded { .. })));
        // A different IP has its own counter.
        assert!(eval.validate_creation("203.0.113.8").await.is_ok());
    }

    #[tokio::test]
    async fn test_record_suspicious_persists_and_audits_once() {
        let store = MockSessionStore::new();
        let audit = MockAuditSink::new();
        let eval = evaluator(
            store.clone(),
            MockRateLimiter::default(),
            audit.clone(),
            SessionConfig::default(),
        );
        let mut session = test_session();
        store.put(&session).await.unwrap_or(());

        let result = eval
            .record_suspicious_activity(&mut session, "fingerprint mismatch")
            .await;
        assert!(result.is_ok());
        assert_eq!(audit.count_of(AuditEventType::SuspiciousActivity), 1);

        let stored = store
            .get(session.tenant_id, session.user_id, session.session_id)
            .await
            .unwrap_or(None);
        assert!(stored.is_some_and(|s| s.security_flags.suspicious_activity));
    }

    #[tokio::test]
    async fn test_fingerprint_verification_policy() {
        let eval = evaluator(
            MockSessionStore::new(),
            MockRateLimiter::default(),
            MockAuditSink::new(),
            SessionConfig::default(),
        );
        let session = test_session();

        assert!(eval.verify_fingerprint(&session, Some("fp-abc")));
        assert!(!eval.verify_fingerprint(&session, Some("fp-other")));
        assert!(!eval.verify_fingerprint(&session, None));

        let relaxed = evaluator(
            MockSessionStore::new(),
            MockRateLimiter::default(),
            MockAuditSink::new(),
            SessionConfig::default().with_fingerprint_enforcement(false),
        );
        assert!(relaxed.verify_fingerprint(&session, None));
        assert!(relaxed.verify_fingerprint(&session, Some("anything")));
    }

    #[tokio::test]
    async fn test_validate_propagates_store_unavailable() {
        let store = MockSessionStore::new();
        store.set_unavailable(true);
        let eval = evaluator(
            store,
            MockRateLimiter::default(),
            MockAuditSink::new(),
            SessionConfig::default(),
        );
        let mut session = test_session();
        assert!(matches!(
            eval.validate(&mut session).await,
            Err(SessionError::StoreUnavailable(_))
        ));
    }
}
