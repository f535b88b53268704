use std::time::Duration;

pub use common::logger::{child_span, init_logger, root_span};
pub use common::TraceId;

/// Awaits `fut` and emits a warning if it ran longer than `max`.
/// Used around store and CRM calls on the booking hot path.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
