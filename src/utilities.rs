//! Internal utility functions.
//!
//! Timestamp conversion shared by the coordinator, the decoder invocation
//! and the command-line tool.

use std::time::Duration;

/// Convert a frame index to a presentation time using the frame rate.
///
/// Callers validate `frames_per_second` beforehand; a non-positive rate
/// yields [`Duration::ZERO`] and a time past [`Duration::MAX`] saturates.
pub fn frame_index_to_timestamp(frame_index: u64, frames_per_second: f64) -> Duration {
    if !is_valid_frame_rate(frames_per_second) {
        return Duration::ZERO;
    }
    checked_frame_index_to_timestamp(frame_index, frames_per_second).unwrap_or(Duration::MAX)
}

/// Like [`frame_index_to_timestamp`], but `None` when the rate is unusable
/// or the time does not fit in a [`Duration`].
pub fn checked_frame_index_to_timestamp(
    frame_index: u64,
    frames_per_second: f64,
) -> Option<Duration> {
    if !is_valid_frame_rate(frames_per_second) {
        return None;
    }
    Duration::try_from_secs_f64(frame_index as f64 / frames_per_second).ok()
}

/// Convert a presentation time to the index of the frame showing at that time.
pub fn timestamp_to_frame_index(timestamp: Duration, frames_per_second: f64) -> u64 {
    (timestamp.as_secs_f64() * frames_per_second) as u64
}

/// Format a duration as decimal seconds with millisecond precision, the
/// form FFmpeg accepts for `-ss`.
pub fn format_seek_seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Returns `true` if `value` is a usable frame rate.
pub(crate) fn is_valid_frame_rate(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
