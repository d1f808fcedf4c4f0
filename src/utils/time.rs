use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

pub(crate) fn get_duration_since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// return milliseconds since the Unix epoch
pub fn get_now_as_millis() -> u64 {
    get_duration_since_epoch().as_millis() as u64
}

/// Milliseconds as a float, keeping sub-millisecond precision for latency math
pub(crate) fn duration_as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
