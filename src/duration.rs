//! Parsing for the `^\d+[smhd]$` duration strings used by analyzer schedules
//! and decision durations.

use std::time::Duration;

/// Parse a duration string like `"30s"`, `"10m"`, `"3h"`, `"1d"` into a
/// [`Duration`]. Returns `None` on malformed input — callers treat a
/// malformed duration the same way invalid regex/CIDR are treated in the
/// filter engine: downgraded to a no-op rather than a panic.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, unit) = s.split_at(s.len() - 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => n,
        "m" => n.checked_mul(60)?,
        "h" => n.checked_mul(3_600)?,
        "d" => n.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Like [`parse_duration`] but restricted to the `^\d+[smh]$` grammar used by
/// the manual-ban operator endpoint (no day unit).
pub fn parse_duration_no_days(s: &str) -> Option<Duration> {
    if s.ends_with('d') {
        return None;
    }
    parse_duration(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_hours_is_10_800_000_ms() {
        let d = parse_duration("3h").unwrap();
        assert_eq!(d.as_millis(), 10_800_000);
    }

    #[test]
    fn one_day_is_86_400_000_ms() {
        let d = parse_duration("1d").unwrap();
        assert_eq!(d.as_millis(), 86_400_000);
    }

    #[test]
    fn zero_hours_parses_but_is_zero() {
        let d = parse_duration("0h").unwrap();
        assert_eq!(d.as_secs(), 0);
    }

    #[test]
    fn rejects_missing_unit() {
        assert!(parse_duration("30").is_none());
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration("30w").is_none());
    }

    #[test]
    fn rejects_negative_looking_input() {
        assert!(parse_duration("-5s").is_none());
    }

    #[test]
    fn no_days_rejects_day_unit() {
        assert!(parse_duration_no_days("1d").is_none());
        assert!(parse_duration_no_days("1h").is_some());
    }
}
