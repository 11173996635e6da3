use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use std::sync::OnceLock;

// Review timestamps only ever appear as relative labels ("3 weeks ago",
// "2 недели назад"). Matching order matters: the "yesterday" forms carry no
// unit word, so they go first; after that each unit class spans the
// supported languages in one pattern.

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("invalid date pattern"))
}

fn yesterday_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\b(yesterday|вчера)\b")
}

fn minutes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\b(min|mins|minute|minutes|мин|минуту|минуты|минут|минута)\b")
}

fn hours_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\b(hour|hours|час|часа|часов)\b")
}

fn days_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\b(day|days|день|дня|дней)\b")
}

fn weeks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\b(week|weeks|неделя|недели|неделю|недель)\b")
}

fn months_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\b(month|months|месяц|месяца|месяцев)\b")
}

fn years_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\b(year|years|год|года|лет)\b")
}

fn magnitude(s: &str) -> i64 {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"(\d+)")
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1)
}

/// Converts a relative-time label to an absolute instant anchored at `now`.
/// Unrecognized input yields `None`; dates are non-critical metadata and
/// must never fail a record.
pub fn relative_to_utc(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    if yesterday_re().is_match(&s) {
        return Some(now - Duration::days(1));
    }

    let n = magnitude(&s);
    if minutes_re().is_match(&s) {
        return Some(now - Duration::minutes(n));
    }
    if hours_re().is_match(&s) {
        return Some(now - Duration::hours(n));
    }
    if days_re().is_match(&s) {
        return Some(now - Duration::days(n));
    }
    if weeks_re().is_match(&s) {
        return Some(now - Duration::weeks(n));
    }
    if months_re().is_match(&s) {
        return now.checked_sub_months(Months::new(n.max(0) as u32));
    }
    if years_re().is_match(&s) {
        return now.checked_sub_months(Months::new((n.max(0) as u32).saturating_mul(12)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_hours_ago() {
        assert_eq!(
            relative_to_utc("3 hours ago", now()),
            Some(now() - Duration::hours(3))
        );
    }

    #[test]
    fn test_yesterday_means_one_day() {
        assert_eq!(
            relative_to_utc("Yesterday", now()),
            Some(now() - Duration::days(1))
        );
        assert_eq!(
            relative_to_utc("вчера", now()),
            Some(now() - Duration::days(1))
        );
    }

    #[test]
    fn test_magnitude_defaults_to_one() {
        assert_eq!(
            relative_to_utc("a week ago", now()),
            Some(now() - Duration::weeks(1))
        );
    }

    #[test]
    fn test_russian_units() {
        assert_eq!(
            relative_to_utc("2 недели назад", now()),
            Some(now() - Duration::weeks(2))
        );
        assert_eq!(
            relative_to_utc("5 минут назад", now()),
            Some(now() - Duration::minutes(5))
        );
    }

    #[test]
    fn test_months_and_years_are_calendar_aware() {
        assert_eq!(
            relative_to_utc("2 months ago", now()),
            now().checked_sub_months(Months::new(2))
        );
        assert_eq!(
            relative_to_utc("год назад", now()),
            now().checked_sub_months(Months::new(12))
        );
    }

    #[test]
    fn test_unrecognized_returns_none() {
        assert_eq!(relative_to_utc("", now()), None);
        assert_eq!(relative_to_utc("just now or so", now()), None);
        assert_eq!(relative_to_utc("May 3, 2021", now()), None);
    }
}
