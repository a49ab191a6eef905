//! Producer timestamp parsing.
//!
//! Timestamps in creation events are free text. Parsing is strict (a fixed
//! set of formats) and never fails outward: anything unrecognised resolves
//! to the worker's processing time.

use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// A resolved event timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedTimestamp {
    /// Instant to persist.
    pub at: DateTime<Utc>,
    /// `true` when the raw value was unusable and `at` is processing time.
    pub fallback: bool,
}

/// Strictly parse a producer timestamp.
///
/// Accepted: RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS[.f] ±HHMM`,
/// and offset-less `YYYY-MM-DD[ T]HH:MM:SS[.f]` (optionally suffixed with
/// ` UTC`), read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = raw.strip_suffix(" UTC").unwrap_or(raw);
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Parse `raw`, falling back to `now` on any failure.
pub fn resolve_or(raw: &str, now: DateTime<Utc>) -> ResolvedTimestamp {
    match parse_timestamp(raw) {
        Some(at) => ResolvedTimestamp { at, fallback: false },
        None => ResolvedTimestamp { at: now, fallback: true },
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn expected() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 8, 0, 15, 15).unwrap()
    }

    #[test]
    fn parses_rfc3339() {
        assert_eq!(parse_timestamp("2025-11-08T00:15:15Z"), Some(expected()));
        assert_eq!(parse_timestamp("2025-11-08T02:15:15+02:00"), Some(expected()));
    }

    #[test]
    fn parses_rfc3339_nanos() {
        let parsed = parse_timestamp("2025-11-08T00:15:15.123456789Z").unwrap();
        assert_eq!(parsed.timestamp(), expected().timestamp());
        assert_eq!(parsed.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn parses_ruby_time_to_s() {
        assert_eq!(parse_timestamp("2025-11-08 00:15:15 +0000"), Some(expected()));
        assert_eq!(parse_timestamp("2025-11-08 01:15:15 +0100"), Some(expected()));
    }

    #[test]
    fn parses_utc_suffixed_and_naive() {
        assert_eq!(parse_timestamp("2025-11-08 00:15:15 UTC"), Some(expected()));
        assert_eq!(parse_timestamp("2025-11-08T00:15:15"), Some(expected()));
    }

    #[test]
    fn parses_rfc2822() {
        assert_eq!(parse_timestamp("Sat, 08 Nov 2025 00:15:15 +0000"), Some(expected()));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp("bad-value"), None);
        assert_eq!(parse_timestamp("invalid time"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2025-13-45T99:99:99Z"), None);
    }

    #[test]
    fn resolve_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let resolved = resolve_or("bad-value", now);
        assert!(resolved.fallback);
        assert_eq!(resolved.at, now);

        let resolved = resolve_or("2025-11-08T00:15:15Z", now);
        assert!(!resolved.fallback);
        assert_eq!(resolved.at, expected());
    }

    proptest! {
        #[test]
        fn resolve_never_panics(raw in ".*") {
            let now = Utc::now();
            let resolved = resolve_or(&raw, now);
            if resolved.fallback {
                prop_assert_eq!(resolved.at, now);
            }
        }
    }
}
