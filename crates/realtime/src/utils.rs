use std::time::Duration;
use tokio::time::Instant;

/// Roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`, saturating at a far-future instant.
pub(crate) fn deadline(start: Instant, after: Duration) -> Instant {
    start.checked_add(after).unwrap_or_else(|| start + FAR_FUTURE)
}
