//! Deterministic identifier derivation.
//!
//! Everything here is a pure function: booking ids for duplicate detection,
//! idempotency fingerprints for duplicate collapse, and the colon-delimited
//! cache key namespaces used for reads and pattern invalidation.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::session::model::MockType;

/// Human-meaningful booking id: `{mock_type}-{sanitized_name} - {Month D, YYYY}`.
///
/// Duplicate detection compares this string against Active bookings only, so
/// cancelled homonyms never block a re-booking.
pub fn booking_id(mock_type: MockType, name: &str, exam_date: NaiveDate) -> String {
    format!(
        "{}-{} - {}",
        mock_type.as_str(),
        sanitize_name(name),
        format_exam_date(exam_date)
    )
}

/// Collapses whitespace and strips everything but alphanumerics, spaces and
/// hyphens. Keeps the result stable across cosmetic variations of a name.
pub fn sanitize_name(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Month D, YYYY` without a zero-padded day, e.g. `March 5, 2026`.
pub fn format_exam_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// Inputs of an idempotency fingerprint.
#[derive(Clone, Debug)]
pub struct IdempotencyParts<'a> {
    pub contact_id: &'a str,
    pub session_id: &'a str,
    pub exam_date: &'a str,
    pub mock_type: MockType,
    pub now_ms: u64,
    pub bucket_ms: u64,
    /// Bumps the bucket so a retry after a cancellation produces a fresh key.
    pub bucket_offset: u64,
    pub retry_after_cancel: bool,
}

/// `idem_` + first 32 hex chars of SHA-256 over the canonical JSON payload.
///
/// The payload keys are serialized in lexicographic order (serde_json maps
/// are BTree-backed), so the fingerprint is stable across callers.
pub fn idempotency_key(parts: &IdempotencyParts<'_>) -> String {
    let bucket = parts.now_ms / parts.bucket_ms + parts.bucket_offset;

    let mut payload = serde_json::Map::new();
    payload.insert("bucket".into(), bucket.into());
    payload.insert("contact_id".into(), parts.contact_id.into());
    payload.insert("exam_date".into(), parts.exam_date.into());
    payload.insert("mock_type".into(), parts.mock_type.as_str().into());
    payload.insert("session_id".into(), parts.session_id.into());
    if parts.retry_after_cancel {
        payload.insert("retry_after_cancel".into(), true.into());
    }

    let json = serde_json::Value::Object(payload).to_string();
    format!("idem_{}", &sha256_hex(json.as_bytes())[..32])
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/* =========================
Cache keys & patterns
========================= */

pub fn bookings_contact_key(contact_id: &str, filter: &str, page: u32, limit: u32) -> String {
    format!("bookings:contact:{contact_id}:{filter}:page{page}:limit{limit}")
}

pub fn bookings_contact_pattern(contact_id: &str) -> String {
    format!("bookings:contact:{contact_id}:*")
}

pub fn session_detail_key(session_id: &str) -> String {
    format!("session:{session_id}:detail")
}

pub fn session_bookings_key(session_id: &str) -> String {
    format!("session:{session_id}:bookings")
}

pub fn session_pattern(session_id: &str) -> String {
    format!("session:{session_id}:*")
}

pub fn sessions_list_key(filter_hash: &str) -> String {
    format!("sessions:list:{filter_hash}")
}

pub fn sessions_list_pattern() -> String {
    "sessions:list:*".to_string()
}

pub fn sessions_aggregates_key(filter_hash: &str) -> String {
    format!("sessions:aggregates:{filter_hash}")
}

pub fn sessions_aggregates_pattern() -> String {
    "sessions:aggregates:*".to_string()
}

/// Short stable hash for listing cache keys derived from a serialized filter.
pub fn filter_hash(serialized_filter: &str) -> String {
    sha256_hex(serialized_filter.as_bytes())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parts(now_ms: u64, offset: u64, retry: bool) -> IdempotencyParts<'static> {
        IdempotencyParts {
            contact_id: "201",
            session_id: "301",
            exam_date: "2026-09-12",
            mock_type: MockType::SituationalJudgment,
            now_ms,
            bucket_ms: 300_000,
            bucket_offset: offset,
            retry_after_cancel: retry,
        }
    }

    #[test]
    fn booking_id_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(
            booking_id(MockType::ClinicalSkills, "Jane  O'Brien", date),
            "Clinical Skills-Jane OBrien - March 5, 2026"
        );
    }

    #[test]
    fn sanitize_collapses_and_strips() {
        assert_eq!(sanitize_name("  Ana-Maria \t Lopez! "), "Ana-Maria Lopez");
        assert_eq!(sanitize_name("X."), "X");
    }

    #[test]
    fn same_bucket_same_key() {
        let a = idempotency_key(&parts(1_000_000, 0, false));
        let b = idempotency_key(&parts(1_200_000, 0, false));
        // both fall in bucket 1_000_000 / 300_000 == 1_200_000 / 300_000
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_boundary_changes_key() {
        let a = idempotency_key(&parts(299_999, 0, false));
        let b = idempotency_key(&parts(300_000, 0, false));
        assert_ne!(a, b);
    }

    #[test]
    fn retry_after_cancel_produces_fresh_key() {
        let original = idempotency_key(&parts(1_000_000, 0, false));
        let retried = idempotency_key(&parts(1_000_000, 1, true));
        assert_ne!(original, retried);
        assert!(retried.starts_with("idem_"));
        assert_eq!(retried.len(), "idem_".len() + 32);
    }

    #[test]
    fn cache_keys_are_namespaced() {
        assert_eq!(
            bookings_contact_key("c1", "upcoming", 2, 20),
            "bookings:contact:c1:upcoming:page2:limit20"
        );
        assert_eq!(session_pattern("s9"), "session:s9:*");
        assert_eq!(sessions_list_pattern(), "sessions:list:*");
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(name in ".{0,64}") {
            let once = sanitize_name(&name);
            prop_assert_eq!(sanitize_name(&once), once);
        }

        #[test]
        fn key_is_deterministic(now in 0u64..10_000_000_000) {
            let a = idempotency_key(&parts(now, 0, false));
            let b = idempotency_key(&parts(now, 0, false));
            prop_assert_eq!(a, b);
        }
    }
}
