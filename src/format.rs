//! Human-readable renderings shared by the CLI and the browser.

use chrono::{DateTime, Utc};

const DAY_SECS: i64 = 24 * 60 * 60;

fn days_ceil(secs: i64) -> i64 {
    (secs + DAY_SECS - 1).div_euclid(DAY_SECS)
}

/// How long ago a listing went up.
pub fn posted_ago(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - created).num_days().abs();
    match days {
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        d if d < 7 => format!("{d} days ago"),
        d if d < 30 => plural(d / 7, "week", "ago"),
        d => plural(d / 30, "month", "ago"),
    }
}

/// Remaining time as shown to seekers; `None` once the listing has lapsed.
pub fn expires_in(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<String> {
    let secs = (expires? - now).num_seconds();
    if secs <= 0 {
        return None;
    }
    Some(match days_ceil(secs) {
        1 => "last day".to_string(),
        d if d <= 30 => format!("{d} days left"),
        d => plural(d / 7, "week", "left"),
    })
}

/// Remaining time as shown to the employer who owns the listing.
pub fn expiry_label(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<String> {
    let secs = (expires? - now).num_seconds();
    Some(if secs < 0 {
        "expired".to_string()
    } else if secs < DAY_SECS {
        "ends today".to_string()
    } else if secs < 2 * DAY_SECS {
        "ends tomorrow".to_string()
    } else {
        format!("{} days left", days_ceil(secs))
    })
}

fn plural(n: i64, unit: &str, suffix: &str) -> String {
    if n == 1 {
        format!("1 {unit} {suffix}")
    } else {
        format!("{n} {unit}s {suffix}")
    }
}

/// Shorten to at most `max` characters, marking the cut with "...".
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max < 3 {
        s.chars().take(max).collect()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

pub fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

pub fn date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

pub fn date_range(
    start: Option<chrono::NaiveDate>,
    end: Option<chrono::NaiveDate>,
    is_current: bool,
) -> String {
    let fmt = |d: chrono::NaiveDate| d.format("%b %Y").to_string();
    match (start, end, is_current) {
        (Some(s), _, true) => format!("{} - present", fmt(s)),
        (Some(s), Some(e), false) => format!("{} - {}", fmt(s), fmt(e)),
        (Some(s), None, false) => fmt(s),
        (None, Some(e), _) => format!("until {}", fmt(e)),
        (None, None, true) => "present".to_string(),
        (None, None, false) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_posted_ago() {
        let now = now();
        assert_eq!(posted_ago(now - Duration::hours(5), now), "today");
        assert_eq!(posted_ago(now - Duration::hours(30), now), "yesterday");
        assert_eq!(posted_ago(now - Duration::days(4), now), "4 days ago");
        assert_eq!(posted_ago(now - Duration::days(7), now), "1 week ago");
        assert_eq!(posted_ago(now - Duration::days(20), now), "2 weeks ago");
        assert_eq!(posted_ago(now - Duration::days(65), now), "2 months ago");
    }

    #[test]
    fn test_expires_in() {
        let now = now();
        assert_eq!(expires_in(None, now), None);
        assert_eq!(expires_in(Some(now - Duration::hours(1)), now), None);
        assert_eq!(expires_in(Some(now + Duration::hours(3)), now).as_deref(), Some("last day"));
        assert_eq!(expires_in(Some(now + Duration::hours(25)), now).as_deref(), Some("2 days left"));
        assert_eq!(expires_in(Some(now + Duration::days(30)), now).as_deref(), Some("30 days left"));
        assert_eq!(expires_in(Some(now + Duration::days(60)), now).as_deref(), Some("8 weeks left"));
    }

    #[test]
    fn test_expiry_label() {
        let now = now();
        assert_eq!(expiry_label(None, now), None);
        assert_eq!(expiry_label(Some(now - Duration::minutes(1)), now).as_deref(), Some("expired"));
        assert_eq!(expiry_label(Some(now + Duration::hours(2)), now).as_deref(), Some("ends today"));
        assert_eq!(expiry_label(Some(now + Duration::hours(36)), now).as_deref(), Some("ends tomorrow"));
        assert_eq!(expiry_label(Some(now + Duration::days(10)), now).as_deref(), Some("10 days left"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Yazılım Geliştirici", 10), "Yazılım...");
    }

    #[test]
    fn test_truncate_never_exceeds_max() {
        assert_eq!(truncate("Kafkas", 2), "Ka");
        assert_eq!(truncate("Kafkas", 0), "");
        assert_eq!(truncate("Kafkas", 3), "...");
        for max in 0..8 {
            assert!(truncate("Çerkes Derneği", max).chars().count() <= max);
        }
    }

    #[test]
    fn test_date_range() {
        let d = |y, m| NaiveDate::from_ymd_opt(y, m, 1);
        assert_eq!(date_range(d(2020, 1), d(2021, 6), false), "Jan 2020 - Jun 2021");
        assert_eq!(date_range(d(2022, 3), None, true), "Mar 2022 - present");
        assert_eq!(date_range(None, None, false), "");
    }
}
