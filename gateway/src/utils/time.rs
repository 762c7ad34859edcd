use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. Clocks set before 1970 read as zero.
pub fn now_sec() -> u64 {
    since_epoch().as_secs()
}

pub fn now_millis() -> u128 {
    since_epoch().as_millis()
}

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
