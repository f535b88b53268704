//! TTL-bounded exclusive locks over the KV service.
//!
//! Holders receive a random token and may only release with that token, so a
//! holder whose lease expired cannot release the next holder's lock. There is
//! no queue: acquisition that outlasts the bounded wait fails and the caller
//! retries the whole command.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::kv::KvStore;

const ACQUIRE_SPIN: Duration = Duration::from_millis(50);
const ACQUIRE_WAIT_CAP: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn fresh() -> Self {
        Self(Uuid::new_v4().as_hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct LockManager {
    kv: Arc<dyn KvStore>,
    session_ttl: Duration,
    contact_ttl: Duration,
}

impl LockManager {
    pub fn new(kv: Arc<dyn KvStore>, session_ttl_ms: u64, contact_ttl_ms: u64) -> Self {
        Self {
            kv,
            session_ttl: Duration::from_millis(session_ttl_ms),
            contact_ttl: Duration::from_millis(contact_ttl_ms),
        }
    }

    pub fn session_key(session_id: &str) -> String {
        format!("lock:session:{session_id}")
    }

    pub fn contact_key(contact_id: &str) -> String {
        format!("lock:contact:{contact_id}")
    }

    pub async fn acquire_session(&self, session_id: &str) -> anyhow::Result<Option<LockToken>> {
        self.acquire(&Self::session_key(session_id), self.session_ttl)
            .await
    }

    pub async fn acquire_contact(&self, contact_id: &str) -> anyhow::Result<Option<LockToken>> {
        self.acquire(&Self::contact_key(contact_id), self.contact_ttl)
            .await
    }

    /// Try to take `key` for `ttl`. Spins briefly on contention, then gives
    /// up and returns `None`.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> anyhow::Result<Option<LockToken>> {
        let token = LockToken::fresh();
        let deadline = tokio::time::Instant::now() + ACQUIRE_WAIT_CAP;

        loop {
            if self.kv.set_nx(key, token.as_str(), ttl).await? {
                debug!(key, "lock acquired");
                return Ok(Some(token));
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(key, "lock acquisition timed out");
                return Ok(None);
            }

            tokio::time::sleep(ACQUIRE_SPIN).await;
        }
    }

    /// Release `key` if still held with `token`. A false return means the
    /// lease already expired (and may be held by someone else now).
    pub async fn release(&self, key: &str, token: &LockToken) -> anyhow::Result<bool> {
        let released = self.kv.delete_if_eq(key, token.as_str()).await?;
        if !released {
            warn!(key, "lock token mismatch on release; lease expired?");
        }
        Ok(released)
    }

    /// True while the lease is still ours. The coordinator checks this after
    /// CRM writes: a lapsed lease means a write may have raced a retry, so
    /// success must be re-verified by reading the booking back.
    pub async fn still_held(&self, key: &str, token: &LockToken) -> anyhow::Result<bool> {
        Ok(self
            .kv
            .get(key)
            .await?
            .is_some_and(|v| v == token.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;

    fn mgr() -> LockManager {
        LockManager::new(Arc::new(MemoryKv::new()), 15_000, 10_000)
    }

    #[tokio::test]
    async fn acquire_then_release() {
        let locks = mgr();
        let token = locks.acquire_session("s1").await.unwrap().unwrap();
        assert!(locks.still_held(&LockManager::session_key("s1"), &token).await.unwrap());

        assert!(locks
            .release(&LockManager::session_key("s1"), &token)
            .await
            .unwrap());
        assert!(!locks.still_held(&LockManager::session_key("s1"), &token).await.unwrap());
    }

    #[tokio::test]
    async fn contention_fails_within_bounded_wait() {
        let locks = mgr();
        let _held = locks.acquire_session("s1").await.unwrap().unwrap();

        let second = locks.acquire_session("s1").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_a_noop() {
        let locks = mgr();
        let token = locks.acquire_contact("c1").await.unwrap().unwrap();

        let stranger = LockToken::fresh();
        assert!(!locks
            .release(&LockManager::contact_key("c1"), &stranger)
            .await
            .unwrap());

        // Original holder can still release.
        assert!(locks
            .release(&LockManager::contact_key("c1"), &token)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_reacquirable() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let locks = LockManager::new(kv, 20, 20);

        let first = locks.acquire_session("s1").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!locks.still_held(&LockManager::session_key("s1"), &first).await.unwrap());
        let second = locks.acquire_session("s1").await.unwrap();
        assert!(second.is_some());
    }
}
