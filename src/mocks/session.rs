//! In-memory session store with failure injection.

use crate::error::{Result, SessionError};
use crate::providers::SessionStore;
use crate::state::{Session, SessionId, TenantId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type SessionKey = (TenantId, UserId, SessionId);

/// In-memory [`SessionStore`].
///
/// Semantics mirror the Redis store: absence is `Ok(None)`, and flipping
/// [`set_unavailable`](Self::set_unavailable) makes every call return
/// `StoreUnavailable` so degraded-store paths can be exercised.
#[derive(Debug, Clone, Default)]
pub struct MockSessionStore {
    sessions: Arc<Mutex<HashMap<SessionKey, Session>>>,
    blacklist: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockSessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or restore
    /// normal service).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total stored sessions across all users.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SessionError::StoreUnavailable(
                "mock store offline".to_string(),
            ));
        }
        Ok(())
    }
}

impl SessionStore for MockSessionStore {
    async fn put(&self, session: &Session) -> Result<()> {
        self.check_available()?;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (session.tenant_id, session.user_id, session.session_id),
                session.clone(),
            );
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<Option<Session>> {
        self.check_available()?;
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(tenant_id, user_id, session_id))
            .cloned())
    }

    async fn list_by_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<Session>> {
        self.check_available()?;
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count_active(&self, tenant_id: TenantId, user_id: UserId) -> Result<u64> {
        let sessions = self.list_by_user(tenant_id, user_id).await?;
        Ok(sessions.len() as u64)
    }

    async fn oldest(&self, tenant_id: TenantId, user_id: UserId) -> Result<Option<Session>> {
        let sessions = self.list_by_user(tenant_id, user_id).await?;
        Ok(sessions.into_iter().min_by_key(|s| s.created_at))
    }

    async fn delete(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<()> {
        self.check_available()?;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(tenant_id, user_id, session_id));
        Ok(())
    }

    async fn blacklist_token(&self, token: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.blacklist
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), Utc::now() + ttl);
        Ok(())
    }

    async fn is_token_blacklisted(&self, token: &str) -> Result<bool> {
        self.check_available()?;
        let mut blacklist = self
            .blacklist
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match blacklist.get(token) {
            Some(expiry) if *expiry > Utc::now() => Ok(true),
            Some(_) => {
                // Expired entry; mimic Redis key expiry.
                blacklist.remove(token);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Session>> {
        self.check_available()?;
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|s| {
                s.refresh_token.as_deref().is_some_and(|stored| {
                    constant_time_eq::constant_time_eq(stored.as_bytes(), token.as_bytes())
                })
            })
            .cloned())
    }
}
