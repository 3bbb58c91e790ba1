use chrono::Duration;

/// Format a duration compactly for display, e.g. `45s`, `4m 30s`, `1h 20m`, `2d 3h`.
/// Negative durations are formatted by magnitude.
pub fn format_remaining(duration: Duration) -> String {
    let secs = duration.num_seconds().abs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let minutes = secs / 60;
        let remaining_secs = secs % 60;
        if remaining_secs == 0 {
            format!("{}m", minutes)
        } else {
            format!("{}m {}s", minutes, remaining_secs)
        }
    } else if secs < 86_400 {
        let hours = secs / 3600;
        let remaining_mins = (secs % 3600) / 60;
        if remaining_mins == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, remaining_mins)
        }
    } else {
        let days = secs / 86_400;
        let remaining_hours = (secs % 86_400) / 3600;
        if remaining_hours == 0 {
            format!("{}d", days)
        } else {
            format!("{}d {}h", days, remaining_hours)
        }
    }
}

/// Shorten a bearer token for logs: keep the first few characters only.
pub fn mask_token(token: &str) -> String {
    const VISIBLE: usize = 8;
    if token.chars().count() <= VISIBLE {
        "***".to_string()
    } else {
        let prefix: String = token.chars().take(VISIBLE).collect();
        format!("{}...", prefix)
    }
}
