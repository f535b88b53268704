use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::KvStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process KV store with lazy TTL expiry.
#[derive(Default)]
pub struct MemoryKv {
    map: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(map: &mut HashMap<String, Entry>, now: Instant) {
        map.retain(|_, e| !e.is_expired(now));
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let mut map = self.map.lock();

        match map.get(key) {
            Some(e) if e.is_expired(now) => {
                map.remove(key);
                Ok(None)
            }
            Some(e) => Ok(Some(e.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut map = self.map.lock();
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut map = self.map.lock();

        if map.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Ok(false);
        }

        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.map.lock().remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut map = self.map.lock();

        let matches = map
            .get(key)
            .is_some_and(|e| !e.is_expired(now) && e.value == expected);

        if matches {
            map.remove(key);
        }
        Ok(matches)
    }

    async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let now = Instant::now();
        let mut map = self.map.lock();

        Self::purge_expired(&mut map, now);

        let before = map.len();
        map.retain(|k, _| !k.starts_with(prefix));
        Ok((before - map.len()) as u64)
    }
}
