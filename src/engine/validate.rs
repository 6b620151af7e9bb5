use chrono::{DateTime, Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(EngineError::InvalidSlot("end must be after start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// A bookable slot: well-formed, not in the past, not longer than a day.
pub(crate) fn validate_booking_slot(span: &Span, now: Ms) -> Result<(), EngineError> {
    validate_span(span)?;
    if span.duration_ms() > MAX_SESSION_DURATION_MS {
        return Err(EngineError::LimitExceeded("session too long"));
    }
    if span.start < now {
        return Err(EngineError::InvalidSlot("slot is in the past"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    value: &Option<String>,
    max: usize,
    msg: &'static str,
) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(msg)),
        _ => Ok(()),
    }
}

pub(crate) fn validate_offset(utc_offset_minutes: i32) -> Result<(), EngineError> {
    if utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(EngineError::InvalidRequest("utc offset out of range"));
    }
    Ok(())
}

/// `[00:00, 24:00)` of `date` in a zone `utc_offset_minutes` ahead of UTC.
pub fn local_day_span(date: NaiveDate, utc_offset_minutes: i32) -> Option<Span> {
    let midnight = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
    let start = midnight - utc_offset_minutes as Ms * MINUTE_MS;
    Some(Span::new(start, start + 24 * 60 * MINUTE_MS))
}

/// Local calendar date of an instant.
pub fn local_date(at: Ms, utc_offset_minutes: i32) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(at + utc_offset_minutes as Ms * MINUTE_MS)
        .map(|dt| dt.date_naive())
}

pub fn first_of_month(date: NaiveDate) -> MonthKey {
    date.with_day(1).unwrap_or(date)
}

/// Month key of an instant in coach-local time.
pub fn month_of(at: Ms, utc_offset_minutes: i32) -> Option<MonthKey> {
    local_date(at, utc_offset_minutes).map(first_of_month)
}

/// 0 = Monday .. 6 = Sunday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn validate_span_rejects_inverted() {
        let span = Span { start: 2000, end: 1000 };
        assert_eq!(
            validate_span(&span),
            Err(EngineError::InvalidSlot("end must be after start"))
        );
        let empty = Span { start: 1000, end: 1000 };
        assert!(validate_span(&empty).is_err());
    }

    #[test]
    fn validate_span_far_future() {
        let span = Span::new(MAX_VALID_TIMESTAMP_MS, MAX_VALID_TIMESTAMP_MS + 1);
        assert!(matches!(validate_span(&span), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn booking_slot_in_past_rejected() {
        let span = Span::new(1000, 2000);
        assert_eq!(
            validate_booking_slot(&span, 1500),
            Err(EngineError::InvalidSlot("slot is in the past"))
        );
        assert!(validate_booking_slot(&span, 1000).is_ok());
    }

    #[test]
    fn booking_slot_too_long() {
        let span = Span::new(0, MAX_SESSION_DURATION_MS + 1);
        assert!(matches!(
            validate_booking_slot(&span, 0),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn day_span_utc() {
        let span = local_day_span(date(1970, 1, 2), 0).unwrap();
        assert_eq!(span, Span::new(24 * H, 48 * H));
    }

    #[test]
    fn day_span_shifts_with_offset() {
        // UTC+2: local midnight is 22:00 UTC the previous day.
        let span = local_day_span(date(1970, 1, 2), 120).unwrap();
        assert_eq!(span.start, 22 * H);
        // UTC-5: local midnight is 05:00 UTC.
        let span = local_day_span(date(1970, 1, 2), -300).unwrap();
        assert_eq!(span.start, 29 * H);
    }

    #[test]
    fn month_key_respects_offset() {
        // 1970-01-31T23:30Z is already February in UTC+1.
        let at = 30 * 24 * H + 23 * H + 30 * 60_000;
        assert_eq!(month_of(at, 0), Some(date(1970, 1, 1)));
        assert_eq!(month_of(at, 60), Some(date(1970, 2, 1)));
    }

    #[test]
    fn weekday_numbering() {
        assert_eq!(weekday_index(date(2030, 1, 7)), 0); // Monday
        assert_eq!(weekday_index(date(2030, 1, 13)), 6); // Sunday
    }

    #[test]
    fn text_limits() {
        assert!(validate_text(&None, 3, "x").is_ok());
        assert!(validate_text(&Some("abc".into()), 3, "x").is_ok());
        assert_eq!(
            validate_text(&Some("abcd".into()), 3, "x"),
            Err(EngineError::LimitExceeded("x"))
        );
    }
}
