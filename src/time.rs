use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: i64 = 86_400;

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parses the RFC 3339 timestamps management APIs emit (`2024-05-01T10:00:00.000Z`).
/// Returns `None` for anything unparseable or before the epoch.
pub fn parse_rfc3339_unix(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = humantime::parse_rfc3339_weak(trimmed).ok()?;
    parsed
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs() as i64)
}

pub fn format_unix(timestamp: i64) -> String {
    if timestamp < 0 {
        return "-".to_string();
    }
    let st = UNIX_EPOCH + std::time::Duration::from_secs(timestamp as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}

/// Next instant strictly after `now` that falls `offset_secs` after UTC midnight.
pub fn next_daily_run(now: i64, offset_secs: i64) -> i64 {
    let day_start = now - now.rem_euclid(SECS_PER_DAY);
    let candidate = day_start + offset_secs;
    if candidate > now {
        candidate
    } else {
        candidate + SECS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_api_timestamps() {
        assert_eq!(parse_rfc3339_unix("1970-01-02T00:00:00Z"), Some(86_400));
        assert_eq!(
            parse_rfc3339_unix("2024-01-01T00:00:00.000Z"),
            Some(1_704_067_200)
        );
        assert_eq!(parse_rfc3339_unix("not a date"), None);
        assert_eq!(parse_rfc3339_unix(""), None);
    }

    #[test]
    fn next_daily_run_rolls_over() {
        let seven = 7 * 3600;
        // 1970-01-02 06:00 -> same day 07:00
        assert_eq!(next_daily_run(86_400 + 6 * 3600, seven), 86_400 + seven);
        // exactly 07:00 -> next day
        assert_eq!(next_daily_run(86_400 + seven, seven), 2 * 86_400 + seven);
        // 23:00 -> next day
        assert_eq!(next_daily_run(86_400 + 23 * 3600, seven), 2 * 86_400 + seven);
    }

    #[test]
    fn formats_unix_seconds() {
        assert_eq!(format_unix(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_unix(-1), "-");
    }
}
