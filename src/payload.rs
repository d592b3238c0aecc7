//! Timestamp payload carried by every message.
//!
//! The payload is the UTF-8 decimal form of a signed 64-bit count of
//! nanoseconds since the Unix epoch, with no other framing.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};

/// Encode `at` as decimal nanoseconds since the epoch.
pub fn encode_timestamp(at: DateTime<Utc>) -> Result<String> {
    at.timestamp_nanos_opt()
        .map(|nanos| nanos.to_string())
        .ok_or_else(|| anyhow!("timestamp {} does not fit in i64 nanoseconds", at))
}

/// Decode a payload produced by [`encode_timestamp`].
pub fn decode_timestamp(data: &[u8]) -> Result<DateTime<Utc>> {
    let text = std::str::from_utf8(data).context("payload is not valid UTF-8")?;
    let nanos: i64 = text
        .parse()
        .with_context(|| format!("payload {:?} is not a nanosecond timestamp", text))?;
    Ok(DateTime::from_timestamp_nanos(nanos))
}

/// Elapsed time from `sent` to `now`. Negative when the clocks disagree.
pub fn latency(sent: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    now.signed_duration_since(sent)
}

/// Render a latency the way humans read durations: `2s`, `1.5ms`, `-3µs`.
pub fn format_latency(delta: TimeDelta) -> String {
    match delta.to_std() {
        Ok(elapsed) => format!("{:?}", elapsed),
        Err(_) => format!("-{:?}", delta.abs().to_std().unwrap_or_default()),
    }
}
