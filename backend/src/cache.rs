//! Read cache with per-namespace TTLs and pattern invalidation.
//!
//! Cache failures are never allowed to fail the caller: a broken read is a
//! miss, a broken write or invalidation is logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::booking::model::BookingFilter;
use crate::ids;
use crate::kv::KvStore;

#[derive(Clone, Copy, Debug)]
pub struct CacheTtls {
    /// Per-contact booking lists under the `upcoming` filter.
    pub upcoming: Duration,
    /// Per-contact booking lists otherwise.
    pub default: Duration,
    /// Session listings, aggregates, and detail.
    pub listing: Duration,
}

impl CacheTtls {
    pub fn from_ms(upcoming: u64, default: u64, listing: u64) -> Self {
        Self {
            upcoming: Duration::from_millis(upcoming),
            default: Duration::from_millis(default),
            listing: Duration::from_millis(listing),
        }
    }
}

#[derive(Clone)]
pub struct ReadCache {
    kv: Arc<dyn KvStore>,
    ttls: CacheTtls,
}

impl ReadCache {
    pub fn new(kv: Arc<dyn KvStore>, ttls: CacheTtls) -> Self {
        Self { kv, ttls }
    }

    pub fn booking_list_ttl(&self, filter: BookingFilter) -> Duration {
        match filter {
            BookingFilter::Upcoming => self.ttls.upcoming,
            _ => self.ttls.default,
        }
    }

    pub fn listing_ttl(&self) -> Duration {
        self.ttls.listing
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(v) => {
                    debug!(key, "cache hit");
                    Some(v)
                }
                Err(e) => {
                    warn!(key, error = %e, "cache payload unreadable; treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache serialization failed");
                return;
            }
        };

        if let Err(e) = self.kv.set(key, &raw, Some(ttl)).await {
            warn!(key, error = %e, "cache write failed");
        }
    }

    pub async fn invalidate(&self, patterns: &[String]) {
        for pattern in patterns {
            match self.kv.delete_pattern(pattern).await {
                Ok(n) => debug!(pattern = pattern.as_str(), removed = n, "cache invalidated"),
                Err(e) => {
                    warn!(pattern = pattern.as_str(), error = %e, "cache invalidation failed")
                }
            }
        }
    }

    /// Invalidation set for any write touching bookings: the contact's
    /// booking lists, each touched session, and the session listings.
    pub async fn invalidate_booking_write(&self, contact_id: &str, session_ids: &[&str]) {
        let mut patterns = vec![ids::bookings_contact_pattern(contact_id)];
        for sid in session_ids {
            patterns.push(ids::session_pattern(sid));
        }
        patterns.push(ids::sessions_list_pattern());
        patterns.push(ids::sessions_aggregates_pattern());

        self.invalidate(&patterns).await;
    }

    /// Invalidation set for session admin writes and activation sweeps.
    pub async fn invalidate_session_write(&self, session_ids: &[&str]) {
        let mut patterns: Vec<String> =
            session_ids.iter().map(|sid| ids::session_pattern(sid)).collect();
        patterns.push(ids::sessions_list_pattern());
        patterns.push(ids::sessions_aggregates_pattern());

        self.invalidate(&patterns).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;

    fn cache() -> ReadCache {
        ReadCache::new(
            Arc::new(MemoryKv::new()),
            CacheTtls::from_ms(30_000, 180_000, 120_000),
        )
    }

    #[tokio::test]
    async fn json_round_trip() {
        let cache = cache();
        cache
            .put_json("k", &vec![1u32, 2, 3], Duration::from_secs(5))
            .await;
        assert_eq!(cache.get_json::<Vec<u32>>("k").await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn booking_write_invalidates_all_namespaces() {
        let cache = cache();
        let ttl = Duration::from_secs(60);

        cache.put_json("bookings:contact:c1:all:page1:limit20", &1u8, ttl).await;
        cache.put_json("session:s1:detail", &1u8, ttl).await;
        cache.put_json("sessions:list:abcd", &1u8, ttl).await;
        cache.put_json("sessions:aggregates:abcd", &1u8, ttl).await;
        cache.put_json("bookings:contact:c2:all:page1:limit20", &1u8, ttl).await;

        cache.invalidate_booking_write("c1", &["s1"]).await;

        assert_eq!(
            cache
                .get_json::<u8>("bookings:contact:c1:all:page1:limit20")
                .await,
            None
        );
        assert_eq!(cache.get_json::<u8>("session:s1:detail").await, None);
        assert_eq!(cache.get_json::<u8>("sessions:list:abcd").await, None);
        assert_eq!(cache.get_json::<u8>("sessions:aggregates:abcd").await, None);
        // other contacts untouched
        assert_eq!(
            cache
                .get_json::<u8>("bookings:contact:c2:all:page1:limit20")
                .await,
            Some(1)
        );
    }

    #[tokio::test]
    async fn ttl_selection_by_filter() {
        let cache = cache();
        assert_eq!(
            cache.booking_list_ttl(BookingFilter::Upcoming),
            Duration::from_secs(30)
        );
        assert_eq!(
            cache.booking_list_ttl(BookingFilter::All),
            Duration::from_secs(180)
        );
        assert_eq!(
            cache.booking_list_ttl(BookingFilter::Past),
            Duration::from_secs(180)
        );
    }
}
