use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Health check payloads.
pub mod health;
/// Session requests, responses and viewer projections.
pub mod session;
/// Payloads of the session event stream.
pub mod sse;
/// Shared field validators.
pub mod validation;

/// RFC 3339 rendering of an epoch-millis timestamp, `None` when out of range.
fn format_epoch_millis(millis: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()?
        .format(&Rfc3339)
        .ok()
}
