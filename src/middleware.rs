//! Request authentication middleware.
//!
//! Bridges bearer tokens to sessions for the request path. The transport
//! layer (HTTP or otherwise) extracts the bearer token and request metadata
//! and hands them here; everything below is transport-agnostic.
//!
//! Authentication never errors: every failure mode degrades to
//! [`AuthOutcome::Anonymous`] so the caller can decide what anonymous
//! access means for the route at hand.

use crate::fingerprint::{self, RequestMeta};
use crate::manager::SessionManager;
use crate::providers::{AuditSink, RateLimiter, SessionStore, TokenIssuer};
use crate::state::{Session, SessionId, TenantId, UserId};
use std::sync::Arc;

tokio::task_local! {
    static CURRENT_CONTEXT: RequestContext;
}

/// Identity established for one request.
///
/// An explicit value, passed or scoped, never ambient mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Tenant the request acts within.
    pub tenant_id: TenantId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Role label from the verified token.
    pub role: String,
    /// Session backing this request.
    pub session_id: SessionId,
}

/// Scoped installation of a [`RequestContext`] in a tokio task-local.
///
/// The context exists exactly for the duration of the scoped future and is
/// dropped on every exit path, including panics, because the task-local
/// slot dies with the scope.
pub struct RequestScope;

impl RequestScope {
    /// Run `fut` with `context` installed as the current request context.
    pub async fn enter<F>(context: RequestContext, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        CURRENT_CONTEXT.scope(context, fut).await
    }

    /// The current request context, if the caller is inside a scope.
    #[must_use]
    pub fn current() -> Option<RequestContext> {
        CURRENT_CONTEXT.try_with(Clone::clone).ok()
    }
}

/// Result of authenticating one request.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// A verified token backed by a live session.
    Authenticated {
        /// Identity for the request.
        context: RequestContext,
        /// The resolved session snapshot.
        session: Box<Session>,
    },
    /// No token, or a token that failed any verification step.
    Anonymous,
}

/// Token-to-session resolver for the request path.
pub struct RequestAuthenticator<S, R, T, A> {
    manager: Arc<SessionManager<S, R, T, A>>,
    token_issuer: Arc<T>,
}

impl<S, R, T, A> RequestAuthenticator<S, R, T, A>
where
    S: SessionStore + 'static,
    R: RateLimiter + 'static,
    T: TokenIssuer + 'static,
    A: AuditSink + 'static,
{
    /// Create an authenticator over a shared manager and token issuer.
    pub const fn new(manager: Arc<SessionManager<S, R, T, A>>, token_issuer: Arc<T>) -> Self {
        Self {
            manager,
            token_issuer,
        }
    }

    /// Authenticate one request.
    ///
    /// Verification order: blacklist, signature/claims, session resolution.
    /// A token whose claims verify but whose session is gone gets a fresh
    /// session synthesized from the request's own fingerprint and device
    /// data. A fingerprint mismatch on an existing session is recorded as
    /// suspicious but does not block the request; detection, not denial.
    pub async fn authenticate(&self, bearer: Option<&str>, meta: &RequestMeta) -> AuthOutcome {
        let Some(token) = bearer else {
            return AuthOutcome::Anonymous;
        };

        match self.manager.is_token_blacklisted(token).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::warn!("request presented a blacklisted token");
                return AuthOutcome::Anonymous;
            }
            Err(e) => {
                tracing::warn!(error = %e, "blacklist check unavailable, failing closed");
                return AuthOutcome::Anonymous;
            }
        }

        let claims = match self.token_issuer.verify(token).await {
            Ok(claims) => claims,
            Err(e) => {
                tracing::info!(error = %e, "token verification failed");
                return AuthOutcome::Anonymous;
            }
        };

        let session = match self.resolve_session(&claims, token, meta).await {
            Some(session) => session,
            None => return AuthOutcome::Anonymous,
        };

        // Activity bookkeeping runs off the response path.
        let manager = Arc::clone(&self.manager);
        let mut to_update = session.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.update_last_access(&mut to_update).await {
                tracing::warn!(
                    session_id = %to_update.session_id,
                    error = %e,
                    "failed to record session activity"
                );
            }
        });

        let context = RequestContext {
            tenant_id: session.tenant_id,
            user_id: session.user_id,
            role: session.role.clone(),
            session_id: session.session_id,
        };
        AuthOutcome::Authenticated {
            context,
            session: Box::new(session),
        }
    }

    /// Resolve the claims to a live session, synthesizing one when the
    /// claims carry no session id or the referenced session is gone.
    async fn resolve_session(
        &self,
        claims: &crate::providers::TokenClaims,
        token: &str,
        meta: &RequestMeta,
    ) -> Option<Session> {
        if let Some(session_id) = claims.session_id {
            if let Some(mut session) = self
                .manager
                .get_session(claims.tenant_id, claims.user_id, session_id)
                .await
            {
                let presented = fingerprint::generate_fingerprint(meta);
                if !self
                    .manager
                    .security()
                    .verify_fingerprint(&session, Some(&presented))
                {
                    if let Err(e) = self
                        .manager
                        .security()
                        .record_suspicious_activity(&mut session, "fingerprint mismatch")
                        .await
                    {
                        tracing::warn!(
                            session_id = %session.session_id,
                            error = %e,
                            "failed to record fingerprint mismatch"
                        );
                    }
                }
                return Some(session);
            }
            tracing::info!(
                session_id = %session_id,
                "token references an absent session, synthesizing"
            );
        }

        // Keep the claims' session id when there is one, so the same token
        // resolves this session on its next request instead of minting a
        // new one every time.
        let created = match claims.session_id {
            Some(session_id) => {
                self.manager
                    .create_session_with_id(
                        session_id,
                        claims.tenant_id,
                        claims.user_id,
                        &claims.role,
                        token,
                        meta,
                    )
                    .await
            }
            None => {
                self.manager
                    .create_session(claims.tenant_id, claims.user_id, &claims.role, token, meta)
                    .await
            }
        };
        match created {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "failed to synthesize session for verified token");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::mocks::{MockAuditSink, MockRateLimiter, MockSessionStore, MockTokenIssuer};
    use crate::providers::TokenClaims;
    use crate::state::AuditEventType;
    use chrono::Duration;

    struct Harness {
        authenticator:
            RequestAuthenticator<MockSessionStore, MockRateLimiter, MockTokenIssuer, MockAuditSink>,
        manager:
            Arc<SessionManager<MockSessionStore, MockRateLimiter, MockTokenIssuer, MockAuditSink>>,
        issuer: Arc<MockTokenIssuer>,
        store: MockSessionStore,
        audit: MockAuditSink,
    }

    fn harness() -> Harness {
        let store = MockSessionStore::new();
        let audit = MockAuditSink::new();
        let issuer = Arc::new(MockTokenIssuer::new());
        let manager = Arc::new(SessionManager::new(
            Arc::new(store.clone()),
            Arc::new(MockRateLimiter::default()),
            Arc::clone(&issuer),
            Arc::new(audit.clone()),
            SessionConfig::default(),
        ));
        Harness {
            authenticator: RequestAuthenticator::new(Arc::clone(&manager), Arc::clone(&issuer)),
            manager,
            issuer,
            store,
            audit,
        }
    }

    fn meta() -> RequestMeta {
        RequestMeta::new()
            .with_header("User-Agent", "Mozilla/5.0 (Windows NT 10.0) Chrome/120.0.0.0")
            .with_header("Accept-Language", "en-US")
            .with_header("X-Forwarded-For", "203.0.113.9")
    }

    async fn issue_for(h: &Harness, session: &Session) -> String {
        h.issuer
            .issue(
                &TokenClaims {
                    user_id: session.user_id,
                    tenant_id: session.tenant_id,
                    role: session.role.clone(),
                    session_id: Some(session.session_id),
                },
                Duration::hours(1),
            )
            .await
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_missing_bearer_is_anonymous() {
        let h = harness();
        assert!(matches!(
            h.authenticator.authenticate(None, &meta()).await,
            AuthOutcome::Anonymous
        ));
    }

    #[tokio::test]
    async fn test_unknown_token_is_anonymous() {
        let h = harness();
        assert!(matches!(
            h.authenticator.authenticate(Some("garbage"), &meta()).await,
            AuthOutcome::Anonymous
        ));
    }

    #[tokio::test]
    async fn test_claim_failure_is_anonymous_not_error() {
        let h = harness();
        h.issuer.plant_failure("half-valid", "missing tenant claim");
        assert!(matches!(
            h.authenticator
                .authenticate(Some("half-valid"), &meta())
                .await,
            AuthOutcome::Anonymous
        ));
    }

    #[tokio::test]
    async fn test_blacklisted_token_is_anonymous() {
        let h = harness();
        let session = h
            .manager
            .create_session(TenantId::new(), UserId::new(), "member", "seed", &meta())
            .await
            .unwrap_or_else(|e| panic!("create failed: {e}"));
        let token = issue_for(&h, &session).await;
        h.store
            .blacklist_token(&token, Duration::hours(1))
            .await
            .unwrap_or(());

        assert!(matches!(
            h.authenticator.authenticate(Some(&token), &meta()).await,
            AuthOutcome::Anonymous
        ));
    }

    #[tokio::test]
    async fn test_resolves_existing_session() {
        let h = harness();
        let session = h
            .manager
            .create_session(TenantId::new(), UserId::new(), "admin", "seed", &meta())
            .await
            .unwrap_or_else(|e| panic!("create failed: {e}"));
        let token = issue_for(&h, &session).await;

        match h.authenticator.authenticate(Some(&token), &meta()).await {
            AuthOutcome::Authenticated { context, session: resolved } => {
                assert_eq!(context.session_id, session.session_id);
                assert_eq!(context.role, "admin");
                assert_eq!(resolved.session_id, session.session_id);
            }
            AuthOutcome::Anonymous => panic!("expected authenticated outcome"),
        }
    }

    #[tokio::test]
    async fn test_synthesizes_session_when_claims_carry_none() {
        let h = harness();
        let token = h
            .issuer
            .issue(
                &TokenClaims {
                    user_id: UserId::new(),
                    tenant_id: TenantId::new(),
                    role: "member".to_string(),
                    session_id: None,
                },
                Duration::hours(1),
            )
            .await
            .unwrap_or_default();

        match h.authenticator.authenticate(Some(&token), &meta()).await {
            AuthOutcome::Authenticated { session, .. } => {
                assert!(session.device_fingerprint.is_some());
            }
            AuthOutcome::Anonymous => panic!("expected synthesized session"),
        }
        assert!(h.store.session_count() >= 1);
    }

    #[tokio::test]
    async fn test_stale_token_resolves_to_one_synthesized_session() {
        let h = harness();
        let tenant = TenantId::new();
        let user = UserId::new();
        let session = h
            .manager
            .create_session(tenant, user, "member", "seed", &meta())
            .await
            .unwrap_or_else(|e| panic!("create failed: {e}"));
        let token = issue_for(&h, &session).await;

        // The claims now reference a terminated session.
        h.manager
            .invalidate_session(tenant, user, session.session_id, "logout")
            .await
            .unwrap_or(());

        // Repeated requests with the same token must converge on one
        // synthesized session under the claims' id, not mint a new
        // session per request.
        for _ in 0..3 {
            match h.authenticator.authenticate(Some(&token), &meta()).await {
                AuthOutcome::Authenticated { context, .. } => {
                    assert_eq!(context.session_id, session.session_id);
                }
                AuthOutcome::Anonymous => panic!("expected synthesized session"),
            }
        }
        assert_eq!(h.store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_detects_but_does_not_block() {
        let h = harness();
        let session = h
            .manager
            .create_session(TenantId::new(), UserId::new(), "member", "seed", &meta())
            .await
            .unwrap_or_else(|e| panic!("create failed: {e}"));
        let token = issue_for(&h, &session).await;

        let other_device = RequestMeta::new()
            .with_header("User-Agent", "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Safari/604.1")
            .with_header("X-Forwarded-For", "203.0.113.9");

        let outcome = h
            .authenticator
            .authenticate(Some(&token), &other_device)
            .await;
        assert!(matches!(outcome, AuthOutcome::Authenticated { .. }));
        assert_eq!(h.audit.count_of(AuditEventType::SuspiciousActivity), 1);
    }

    #[tokio::test]
    async fn test_scope_installs_and_clears_context() {
        let context = RequestContext {
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            role: "member".to_string(),
            session_id: SessionId::new(),
        };

        assert!(RequestScope::current().is_none());
        let seen = RequestScope::enter(context.clone(), async {
            RequestScope::current()
        })
        .await;
        assert_eq!(seen, Some(context));
        assert!(RequestScope::current().is_none());
    }

    #[tokio::test]
    async fn test_scope_clears_context_on_panic() {
        let context = RequestContext {
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            role: "member".to_string(),
            session_id: SessionId::new(),
        };

        let handle = tokio::spawn(RequestScope::enter(context, async {
            panic!("request handler blew up");
        }));
        assert!(handle.await.is_err());
        assert!(RequestScope::current().is_none());
    }
}
