//! Redis-based session store implementation.
//!
//! # Key layout
//!
//! - `session:{tenant}:{user}:{session}` → bincode-serialized [`Session`],
//!   TTL = time until `expires_at`
//! - `sessions:index:{tenant}:{user}` → set of session-id strings, same TTL
//!   plus a one-hour buffer so the index outlives its members
//! - `refresh:{token}` → `"{tenant}:{user}:{session}"`, TTL = time until
//!   `refresh_expires_at`
//! - `blacklist:{token}` → marker, TTL = remaining token lifetime
//!
//! # Resilience
//!
//! Hard-path calls go through a [`StoreGuard`]: bounded retry with backoff,
//! a per-call timeout, and a circuit breaker. While the breaker is open the
//! store reports [`SessionError::StoreUnavailable`] immediately; callers
//! degrade to treating the session as not found (fail-closed) rather than
//! hanging on a dead Redis. Best-effort writes (index, refresh pointer,
//! index pruning) skip the retry/breaker but still carry a timeout; no
//! call blocks unboundedly.

use crate::error::{Result, SessionError};
use crate::providers::SessionStore;
use crate::resilience::StoreGuard;
use crate::state::{Session, SessionId, TenantId, UserId};
use chrono::{Duration, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Upper bound on keys examined by the refresh-token scan fallback.
const REFRESH_SCAN_LIMIT: usize = 512;

/// Time bound on best-effort writes (index, refresh pointer, index
/// pruning). These skip the guard's retry/breaker but must still not hang.
const BEST_EFFORT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Redis-based session store with TTL expiration, per-user indexing, and a
/// token blacklist.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn_manager: ConnectionManager,
    guard: StoreGuard,
}

impl RedisSessionStore {
    /// Create a new Redis session store with default resilience policies.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the connection to Redis fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_guard(redis_url, StoreGuard::default()).await
    }

    /// Create a store with explicit resilience policies.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the connection to Redis fails.
    pub async fn with_guard(redis_url: &str, guard: StoreGuard) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            SessionError::StoreUnavailable(format!("failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            SessionError::StoreUnavailable(format!(
                "failed to create Redis connection manager: {e}"
            ))
        })?;

        Ok(Self { conn_manager, guard })
    }

    fn session_key(tenant_id: TenantId, user_id: UserId, session_id: SessionId) -> String {
        format!("session:{tenant_id}:{user_id}:{session_id}")
    }

    fn index_key(tenant_id: TenantId, user_id: UserId) -> String {
        format!("sessions:index:{tenant_id}:{user_id}")
    }

    fn refresh_key(token: &str) -> String {
        format!("refresh:{token}")
    }

    fn blacklist_key(token: &str) -> String {
        format!("blacklist:{token}")
    }

    fn unavailable(context: &str, e: &redis::RedisError) -> SessionError {
        SessionError::StoreUnavailable(format!("{context}: {e}"))
    }

    #[allow(clippy::cast_sign_loss)]
    fn ttl_seconds(until: chrono::DateTime<Utc>) -> u64 {
        // SETEX rejects a zero TTL; clamp to one second for writes racing
        // their own expiry.
        until.signed_duration_since(Utc::now()).num_seconds().max(1) as u64
    }

    fn parse_pointer(value: &str) -> Option<(TenantId, UserId, SessionId)> {
        let mut parts = value.splitn(3, ':');
        let tenant = uuid::Uuid::parse_str(parts.next()?).ok()?;
        let user = uuid::Uuid::parse_str(parts.next()?).ok()?;
        let session = uuid::Uuid::parse_str(parts.next()?).ok()?;
        Some((TenantId(tenant), UserId(user), SessionId(session)))
    }

    /// Fallback resolution when the refresh pointer is missing: bounded scan
    /// over session payloads comparing refresh tokens. The store is allowed
    /// to be eventually consistent between pointer and payload.
    async fn scan_for_refresh_token(&self, token: &str) -> Result<Option<Session>> {
        let mut conn = self.conn_manager.clone();
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>("session:*")
                .await
                .map_err(|e| Self::unavailable("failed to scan session keys", &e))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
                if keys.len() >= REFRESH_SCAN_LIMIT {
                    break;
                }
            }
            keys
        };

        for key in keys {
            let bytes: Option<Vec<u8>> = conn
                .get(&key)
                .await
                .map_err(|e| Self::unavailable("failed to read session during scan", &e))?;
            let Some(bytes) = bytes else { continue };
            let Ok(session) = bincode::deserialize::<Session>(&bytes) else {
                continue;
            };
            let matches = session.refresh_token.as_deref().is_some_and(|stored| {
                constant_time_eq::constant_time_eq(stored.as_bytes(), token.as_bytes())
            });
            if matches {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }
}

impl SessionStore for RedisSessionStore {
    async fn put(&self, session: &Session) -> Result<()> {
        let session_bytes = bincode::serialize(session)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        let session_key =
            Self::session_key(session.tenant_id, session.user_id, session.session_id);
        let ttl_seconds = Self::ttl_seconds(session.expires_at);

        // Payload write is the one hard failure; it carries retry + breaker.
        self.guard
            .execute("session_put", || {
                let mut conn = self.conn_manager.clone();
                let session_key = session_key.clone();
                let session_bytes = session_bytes.clone();
                async move {
                    let _: () = conn
                        .set_ex(&session_key, session_bytes, ttl_seconds)
                        .await
                        .map_err(|e| Self::unavailable("failed to write session", &e))?;
                    Ok(())
                }
            })
            .await?;

        // Index and refresh-pointer writes are best-effort and independent:
        // a partial failure leaves an eventually consistent store, never a
        // failed caller.
        let mut conn = self.conn_manager.clone();
        let index_key = Self::index_key(session.tenant_id, session.user_id);
        #[allow(clippy::cast_possible_wrap)]
        let index_ttl = (ttl_seconds + 3600) as i64;
        let index_write = async {
            let result: std::result::Result<(), redis::RedisError> = redis::pipe()
                .atomic()
                .sadd(&index_key, session.session_id.to_string())
                .ignore()
                .expire(&index_key, index_ttl)
                .ignore()
                .query_async(&mut conn)
                .await;
            result
        };
        match tokio::time::timeout(BEST_EFFORT_TIMEOUT, index_write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "failed to update session index (best-effort)"
                );
            }
            Err(_) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    "session index update timed out (best-effort)"
                );
            }
        }

        if let Some(refresh_token) = &session.refresh_token {
            let pointer = format!(
                "{}:{}:{}",
                session.tenant_id, session.user_id, session.session_id
            );
            let refresh_ttl = Self::ttl_seconds(session.refresh_expires_at);
            let pointer_write =
                conn.set_ex::<_, _, ()>(Self::refresh_key(refresh_token), pointer, refresh_ttl);
            match tokio::time::timeout(BEST_EFFORT_TIMEOUT, pointer_write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "failed to write refresh-token pointer (best-effort)"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        "refresh-token pointer write timed out (best-effort)"
                    );
                }
            }
        }

        tracing::debug!(
            session_id = %session.session_id,
            tenant_id = %session.tenant_id,
            user_id = %session.user_id,
            ttl_seconds = ttl_seconds,
            "wrote session to Redis"
        );

        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<Option<Session>> {
        let session_key = Self::session_key(tenant_id, user_id, session_id);
        self.guard
            .execute("session_get", || {
                let mut conn = self.conn_manager.clone();
                let session_key = session_key.clone();
                async move {
                    let bytes: Option<Vec<u8>> = conn
                        .get(&session_key)
                        .await
                        .map_err(|e| Self::unavailable("failed to read session", &e))?;
                    match bytes {
                        Some(bytes) => bincode::deserialize(&bytes)
                            .map(Some)
                            .map_err(|e| SessionError::Serialization(e.to_string())),
                        None => Ok(None),
                    }
                }
            })
            .await
    }

    async fn list_by_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<Vec<Session>> {
        let index_key = Self::index_key(tenant_id, user_id);
        let ids: Vec<String> = self
            .guard
            .execute("session_list", || {
                let mut conn = self.conn_manager.clone();
                let index_key = index_key.clone();
                async move {
                    conn.smembers(&index_key)
                        .await
                        .map_err(|e| Self::unavailable("failed to read session index", &e))
                }
            })
            .await?;

        // Fan out individual gets, discarding entries that no longer
        // resolve, and prune their index references while here.
        let mut sessions = Vec::with_capacity(ids.len());
        let mut conn = self.conn_manager.clone();
        for id_str in ids {
            let Ok(raw) = uuid::Uuid::parse_str(&id_str) else {
                continue;
            };
            match self.get(tenant_id, user_id, SessionId(raw)).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {
                    let prune = conn.srem::<_, _, ()>(&index_key, &id_str);
                    match tokio::time::timeout(BEST_EFFORT_TIMEOUT, prune).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::debug!(
                                session_id = %id_str,
                                error = %e,
                                "failed to prune dead index entry"
                            );
                        }
                        Err(_) => {
                            tracing::debug!(
                                session_id = %id_str,
                                "index prune timed out (best-effort)"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %id_str,
                        error = %e,
                        "skipping unresolvable session during list"
                    );
                }
            }
        }
        Ok(sessions)
    }

    async fn count_active(&self, tenant_id: TenantId, user_id: UserId) -> Result<u64> {
        let index_key = Self::index_key(tenant_id, user_id);
        self.guard
            .execute("session_count", || {
                let mut conn = self.conn_manager.clone();
                let index_key = index_key.clone();
                async move {
                    conn.scard(&index_key)
                        .await
                        .map_err(|e| Self::unavailable("failed to count sessions", &e))
                }
            })
            .await
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
        // Fetch first so the refresh-token pointer can be removed with the
        // payload. An absent session still gets its index entry pruned.
        let refresh_token = self
            .get(tenant_id, user_id, session_id)
            .await?
            .and_then(|s| s.refresh_token);

        let session_key = Self::session_key(tenant_id, user_id, session_id);
        let index_key = Self::index_key(tenant_id, user_id);

        self.guard
            .execute("session_delete", || {
                let mut conn = self.conn_manager.clone();
                let session_key = session_key.clone();
                let index_key = index_key.clone();
                let refresh_token = refresh_token.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic()
                        .del(&session_key)
                        .ignore()
                        .srem(&index_key, session_id.to_string())
                        .ignore();
                    if let Some(token) = &refresh_token {
                        pipe.del(Self::refresh_key(token)).ignore();
                    }
                    let _: () = pipe
                        .query_async(&mut conn)
                        .await
                        .map_err(|e| Self::unavailable("failed to delete session", &e))?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!(
            session_id = %session_id,
            tenant_id = %tenant_id,
            "deleted session from Redis"
        );
        Ok(())
    }

    async fn blacklist_token(&self, token: &str, ttl: Duration) -> Result<()> {
        #[allow(clippy::cast_sign_loss)]
        let ttl_seconds = ttl.num_seconds().max(1) as u64;
        let key = Self::blacklist_key(token);
        self.guard
            .execute("token_blacklist", || {
                let mut conn = self.conn_manager.clone();
                let key = key.clone();
                async move {
                    let _: () = conn
                        .set_ex(&key, 1u8, ttl_seconds)
                        .await
                        .map_err(|e| Self::unavailable("failed to blacklist token", &e))?;
                    Ok(())
                }
            })
            .await
    }

    async fn is_token_blacklisted(&self, token: &str) -> Result<bool> {
        let key = Self::blacklist_key(token);
        self.guard
            .execute("token_blacklist_check", || {
                let mut conn = self.conn_manager.clone();
                let key = key.clone();
                async move {
                    conn.exists(&key)
                        .await
                        .map_err(|e| Self::unavailable("failed to check blacklist", &e))
                }
            })
            .await
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Session>> {
        let key = Self::refresh_key(token);
        let pointer: Option<String> = self
            .guard
            .execute("refresh_resolve", || {
                let mut conn = self.conn_manager.clone();
                let key = key.clone();
                async move {
                    conn.get(&key)
                        .await
                        .map_err(|e| Self::unavailable("failed to read refresh pointer", &e))
                }
            })
            .await?;

        match pointer.as_deref().and_then(Self::parse_pointer) {
            Some((tenant_id, user_id, session_id)) => {
                self.get(tenant_id, user_id, session_id).await
            }
            None => {
                self.guard
                    .execute("refresh_scan", || self.scan_for_refresh_token(token))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeviceInfo, SecurityFlags};

    // These tests require a running Redis instance:
    // docker run -d -p 6379:6379 redis:7-alpine

    fn test_session() -> Session {
        let now = Utc::now();
        Session {
            session_id: SessionId::new(),
            tenant_id: TenantId::new(),
            user_id: UserId::new(),
            role: "member".to_string(),
            access_token: format!("access-{}", uuid::Uuid::new_v4()),
            refresh_token: Some(format!("refresh-{}", uuid::Uuid::new_v4())),
            device_fingerprint: Some("fp".to_string()),
            device_info: DeviceInfo::unknown("dev".to_string()),
            ip_address: None,
            user_agent: Some("Test".to_string()),
            security_flags: SecurityFlags::default(),
            created_at: now,
            last_access: now,
            expires_at: now + Duration::hours(1),
            refresh_expires_at: now + Duration::hours(24),
            request_count: 0,
            last_request_time: None,
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_put_get_roundtrip() {
        let store = RedisSessionStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let session = test_session();

        store.put(&session).await.unwrap();
        let fetched = store
            .get(session.tenant_id, session.user_id, session.session_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched.session_id, session.session_id);
        assert_eq!(fetched.access_token, session.access_token);
        assert_eq!(fetched.refresh_token, session.refresh_token);

        store
            .delete(session.tenant_id, session.user_id, session.session_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_index_tracks_user_sessions() {
        let store = RedisSessionStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let tenant_id = TenantId::new();
        let user_id = UserId::new();

        let mut sessions = Vec::new();
        for _ in 0..3 {
            let mut s = test_session();
            s.tenant_id = tenant_id;
            s.user_id = user_id;
            store.put(&s).await.unwrap();
            sessions.push(s);
        }

        assert_eq!(store.count_active(tenant_id, user_id).await.unwrap(), 3);
        let oldest = store.oldest(tenant_id, user_id).await.unwrap().unwrap();
        assert_eq!(oldest.session_id, sessions[0].session_id);

        for s in &sessions {
            store.delete(tenant_id, user_id, s.session_id).await.unwrap();
        }
        assert_eq!(store.count_active(tenant_id, user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_refresh_token_resolution() {
        let store = RedisSessionStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let session = test_session();
        let token = session.refresh_token.clone().unwrap();

        store.put(&session).await.unwrap();
        let found = store.find_by_refresh_token(&token).await.unwrap().unwrap();
        assert_eq!(found.session_id, session.session_id);

        store
            .delete(session.tenant_id, session.user_id, session.session_id)
            .await
            .unwrap();
        assert!(store.find_by_refresh_token(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)]
    async fn test_blacklist_expires_naturally() {
        let store = RedisSessionStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        let token = format!("bl-{}", uuid::Uuid::new_v4());

        store
            .blacklist_token(&token, Duration::seconds(2))
            .await
            .unwrap();
        assert!(store.is_token_blacklisted(&token).await.unwrap());

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(!store.is_token_blacklisted(&token).await.unwrap());
    }
}
