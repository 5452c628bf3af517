//! Utility functions for the forecast_engine crate

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DAY_FIRST_FORMATS: [&str; 6] = [
    "%d/%m/%y", "%d-%m-%y", "%d.%m.%y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y",
];

const MONTH_FIRST_FORMATS: [&str; 6] = [
    "%m/%d/%y", "%m-%d-%y", "%m.%d.%y", "%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y",
];

const YEAR_FIRST_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d"];

const MONTH_NAME_FORMATS: [&str; 8] = [
    "%d %b %Y", "%d %B %Y", "%d-%b-%Y", "%d-%b-%y", "%b %d, %Y", "%B %d, %Y", "%b %d %Y",
    "%B %d %Y",
];

const TIME_SUFFIXES: [&str; 6] = [
    " %H:%M",
    " %H:%M:%S",
    " %H:%M:%S%.f",
    "T%H:%M",
    "T%H:%M:%S",
    "T%H:%M:%S%.f",
];

/// Parse a date or datetime written in any of the common layouts
///
/// Numeric layouts are tried day-first before month-first when `day_first`
/// is set, so `03/04/2023` is the 3rd of April while `02/13/2023` still
/// parses as the 13th of February. RFC 3339 values with an offset are
/// converted to UTC. Returns `None` for anything unrecognised.
pub fn parse_datetime(text: &str, day_first: bool) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }

    let (first, second) = if day_first {
        (&DAY_FIRST_FORMATS, &MONTH_FIRST_FORMATS)
    } else {
        (&MONTH_FIRST_FORMATS, &DAY_FIRST_FORMATS)
    };

    let date_formats = first
        .iter()
        .chain(YEAR_FIRST_FORMATS.iter())
        .chain(second.iter())
        .chain(MONTH_NAME_FORMATS.iter());

    for format in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
        for suffix in TIME_SUFFIXES {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, &format!("{format}{suffix}")) {
                return Some(dt);
            }
        }
    }

    parse_partial_date(text)
}

/// Year-month (`2023-01`, `2023/01`) and bare year (`2023`) values
fn parse_partial_date(text: &str) -> Option<NaiveDateTime> {
    if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = text.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0);
    }
    for separator in ['-', '/'] {
        let padded = format!("{text}{separator}01");
        let format = format!("%Y{separator}%m{separator}%d");
        if let Ok(date) = NaiveDate::parse_from_str(&padded, &format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Parse a numeric cell, `None` for blanks, text and non-finite values
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Split time-ordered items into leading and trailing parts
///
/// The trailing part holds `ceil(len * test_ratio)` items. A ratio outside
/// `(0, 1)` leaves everything in the leading part.
pub fn train_test_split<T>(data: &[T], test_ratio: f64) -> (&[T], &[T]) {
    if data.is_empty() || test_ratio <= 0.0 || test_ratio >= 1.0 {
        return (data, &data[data.len()..]);
    }

    let test_size = ((data.len() as f64 * test_ratio - 1e-9).ceil() as usize).min(data.len());
    data.split_at(data.len() - test_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[rstest]
    #[case("31/01/2023", ymd(2023, 1, 31))]
    #[case("03/04/2023", ymd(2023, 4, 3))]
    #[case("02/13/2023", ymd(2023, 2, 13))]
    #[case("31-01-23", ymd(2023, 1, 31))]
    #[case("31.01.2023", ymd(2023, 1, 31))]
    #[case("2023-01-31", ymd(2023, 1, 31))]
    #[case("2023/01/31", ymd(2023, 1, 31))]
    #[case("20230131", ymd(2023, 1, 31))]
    #[case("2023-01", ymd(2023, 1, 1))]
    #[case("2023", ymd(2023, 1, 1))]
    #[case("31 Jan 2023", ymd(2023, 1, 31))]
    #[case("January 31, 2023", ymd(2023, 1, 31))]
    fn test_parse_dates(#[case] text: &str, #[case] expected: NaiveDateTime) {
        assert_eq!(parse_datetime(text, true), Some(expected));
    }

    #[test]
    fn test_parse_datetimes_with_time() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 31)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(parse_datetime("2023-01-31 14:30:00", true), Some(expected));
        assert_eq!(parse_datetime("2023-01-31T14:30", true), Some(expected));
        assert_eq!(parse_datetime("31/01/2023 14:30", true), Some(expected));
        assert_eq!(parse_datetime("2023-01-31T16:30:00+02:00", true), Some(expected));
    }

    #[test]
    fn test_month_first_preference() {
        assert_eq!(parse_datetime("03/04/2023", false), Some(ymd(2023, 3, 4)));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("not a date")]
    #[case("2023-13-45")]
    fn test_unparseable_dates(#[case] text: &str) {
        assert_eq!(parse_datetime(text, true), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_train_test_split() {
        let data: Vec<f64> = (0..10).map(f64::from).collect();
        let (train, test) = train_test_split(&data, 0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(test, &[8.0, 9.0]);

        let (train, test) = train_test_split(&data, 0.0);
        assert_eq!(train.len(), 10);
        assert!(test.is_empty());

        let (train, test) = train_test_split(&data[..7], 0.2);
        assert_eq!((train.len(), test.len()), (5, 2));
    }
}
