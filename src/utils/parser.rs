//! Parsing helpers shared by command plugins and moderation handlers.

/// Escape HTML special characters.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Format a duration in seconds as human-readable text.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{} seconds", secs)
    } else if secs < 3600 {
        format!("{} minutes", secs / 60)
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{} hours {} minutes", hours, mins)
        } else {
            format!("{} hours", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{} days {} hours", days, hours)
        } else {
            format!("{} days", days)
        }
    }
}

/// Parse duration string (e.g., "1h", "30m", "1d").
///
/// Supported units:
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
/// - w: weeks
pub fn parse_duration(input: &str) -> Option<std::time::Duration> {
    let input = input.trim();
    if input.len() < 2 {
        return None;
    }

    let (digits, unit) = input.split_at(input.len() - 1);
    let amount: u64 = digits.parse().ok()?;

    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86400,
        "w" => amount * 604800,
        _ => return None,
    };

    Some(std::time::Duration::from_secs(seconds))
}
