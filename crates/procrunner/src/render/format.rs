//! Human-facing duration formatting.

use std::time::Duration;

/// Compact elapsed time: `4s`, `3m 4s`, `2h 3m 4s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// How long ago something happened, in the largest whole unit.
pub fn format_recency(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (amount, unit) = match secs {
        0 => return "just now".to_string(),
        1..60 => (secs, "second"),
        60..3600 => (secs / 60, "minute"),
        3600..86_400 => (secs / 3600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural} ago")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(4_900)), "4s");
        assert_eq!(format_duration(Duration::from_secs(184)), "3m 4s");
        assert_eq!(format_duration(Duration::from_secs(7_384)), "2h 3m 4s");
    }

    #[test]
    fn recency() {
        assert_eq!(format_recency(Duration::from_millis(300)), "just now");
        assert_eq!(format_recency(Duration::from_secs(1)), "1 second ago");
        assert_eq!(format_recency(Duration::from_secs(42)), "42 seconds ago");
        assert_eq!(format_recency(Duration::from_secs(60)), "1 minute ago");
        assert_eq!(format_recency(Duration::from_secs(7_200)), "2 hours ago");
        assert_eq!(format_recency(Duration::from_secs(3 * 86_400)), "3 days ago");
    }
}
