pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

/// Key/value service used for TTL locks and the read cache.
///
/// The in-process [`memory::MemoryKv`] satisfies this for single-instance
/// deployments and tests; multi-instance deployments swap in a distributed
/// implementation behind the same trait.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Set only if the key is absent. Returns true when the value was stored.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Delete only when the stored value matches `expected`.
    /// Returns true when a deletion happened.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> anyhow::Result<bool>;

    /// Delete every key matching `pattern` (`{prefix}*` only).
    /// Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64>;
}
