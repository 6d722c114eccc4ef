use chrono::{DateTime, Duration, TimeZone, Utc};

use super::AppError;

/// Window used when `from` is missing or lies after `to`.
const DEFAULT_SPAN_SECS: i64 = 3600;

/// Parses an optional unix-seconds bound. Empty means absent.
pub fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    let secs: i64 = raw
        .parse()
        .map_err(|e| AppError::BadRequest(format!("time {name} invalid: {e}")))?;

    Utc.timestamp_opt(secs, 0)
        .single()
        .map(Some)
        .ok_or_else(|| AppError::BadRequest(format!("time {name} invalid: {secs} is out of range")))
}

/// Read-side window policy: `to` is clamped to `now`; `from` defaults to
/// one hour before `to` when absent or after it.
///
/// Fails when that default would fall before the earliest representable
/// time.
pub fn resolve(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let to = match to {
        Some(to) if to <= now => to,
        _ => now,
    };
    let from = match from {
        Some(from) if from <= to => from,
        _ => to
            .checked_sub_signed(Duration::seconds(DEFAULT_SPAN_SECS))
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "time to invalid: {} leaves no room for a window",
                    to.timestamp()
                ))
            })?,
    };
    Ok((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn defaults_to_last_hour() {
        let now = at(100_000);
        assert_eq!(resolve(None, None, now).unwrap(), (at(96_400), now));
    }

    #[test]
    fn future_to_is_clamped() {
        let now = at(100_000);
        assert_eq!(resolve(Some(at(99_000)), Some(at(200_000)), now).unwrap(), (at(99_000), now));
    }

    #[test]
    fn from_after_to_falls_back() {
        let now = at(100_000);
        assert_eq!(resolve(Some(at(5_000)), Some(at(4_000)), now).unwrap(), (at(400), at(4_000)));
    }

    #[test]
    fn explicit_window_is_kept() {
        let now = at(100_000);
        assert_eq!(resolve(Some(at(800)), Some(at(1000)), now).unwrap(), (at(800), at(1000)));
    }

    #[test]
    fn earliest_to_without_from_is_a_bad_request() {
        let earliest = DateTime::<Utc>::MIN_UTC.timestamp().to_string();
        let to = parse_bound("to", Some(&earliest)).unwrap();
        assert!(to.is_some());

        let err = resolve(None, to, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.starts_with("time to invalid")));

        // An explicit `from` at the same instant needs no default.
        assert!(resolve(to, to, Utc::now()).is_ok());
    }

    #[test]
    fn bounds_parse() {
        assert_eq!(parse_bound("from", None).unwrap(), None);
        assert_eq!(parse_bound("from", Some("")).unwrap(), None);
        assert_eq!(parse_bound("from", Some("900")).unwrap(), Some(at(900)));

        let err = parse_bound("to", Some("yesterday")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.starts_with("time to invalid")));

        assert!(parse_bound("to", Some(&i64::MAX.to_string())).is_err());
    }
}
