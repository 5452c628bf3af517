//! Sampling frequency inference and forecast index generation
//!
//! A [`Frequency`] is either a fixed spacing in seconds (minutes, hours,
//! days, weeks), a calendar spacing in months anchored to the start, end or
//! same day of the month, or business days. Frequencies print as and parse
//! from pandas-style aliases (`D`, `W`, `H`, `min`, `M`, `MS`, `Q`, `QS`,
//! `Y`, `YS`, `B`), with an optional integer multiplier (`2D`, `3MS`).
//! Same-day monthly spacing, which pandas has no alias for, uses `MD`,
//! `QD` and `YD`.

use crate::error::{ForecastError, Result};
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_WEEK: i64 = 604_800;

/// Average month length in days, used when a calendar spacing must be
/// expressed as a duration
const DAYS_PER_MONTH: f64 = 30.436_875;

/// Share of intervals a spacing must cover to count as dominant
const DOMINANT_SHARE: f64 = 0.5;

/// Which day of the month a calendar frequency lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonthAnchor {
    /// First day of the month
    Start,
    /// Last day of the month
    End,
    /// Day of month of the reference timestamp, clamped to the month length
    SameDay,
}

/// Spacing between consecutive observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    /// Fixed spacing in seconds
    Fixed { seconds: i64 },
    /// Spacing of whole calendar months
    Calendar { months: u32, anchor: MonthAnchor },
    /// Monday to Friday, skipping weekends
    BusinessDay,
}

impl Frequency {
    pub fn minutely() -> Self {
        Frequency::Fixed {
            seconds: SECONDS_PER_MINUTE,
        }
    }

    pub fn hourly() -> Self {
        Frequency::Fixed {
            seconds: SECONDS_PER_HOUR,
        }
    }

    pub fn daily() -> Self {
        Frequency::Fixed {
            seconds: SECONDS_PER_DAY,
        }
    }

    pub fn weekly() -> Self {
        Frequency::Fixed {
            seconds: SECONDS_PER_WEEK,
        }
    }

    /// One calendar month, same day of month as the reference timestamp
    pub fn monthly() -> Self {
        Frequency::Calendar {
            months: 1,
            anchor: MonthAnchor::SameDay,
        }
    }

    pub fn month_start() -> Self {
        Frequency::Calendar {
            months: 1,
            anchor: MonthAnchor::Start,
        }
    }

    pub fn month_end() -> Self {
        Frequency::Calendar {
            months: 1,
            anchor: MonthAnchor::End,
        }
    }

    pub fn quarterly(anchor: MonthAnchor) -> Self {
        Frequency::Calendar { months: 3, anchor }
    }

    pub fn yearly(anchor: MonthAnchor) -> Self {
        Frequency::Calendar { months: 12, anchor }
    }

    /// Approximate length of one period in days
    pub fn approx_days(&self) -> f64 {
        match *self {
            Frequency::Fixed { seconds } => seconds as f64 / SECONDS_PER_DAY as f64,
            Frequency::Calendar { months, .. } => months as f64 * DAYS_PER_MONTH,
            Frequency::BusinessDay => 7.0 / 5.0,
        }
    }

    /// The `n`-th timestamp after `base` at this spacing
    ///
    /// Calendar offsets are computed from `base` rather than by repeated
    /// stepping, so a series anchored on the 31st keeps landing on month
    /// ends after passing through shorter months.
    pub fn nth_after(&self, base: NaiveDateTime, n: u32) -> Option<NaiveDateTime> {
        match *self {
            Frequency::Fixed { seconds } => {
                let offset = Duration::try_seconds(seconds.checked_mul(i64::from(n))?)?;
                base.checked_add_signed(offset)
            }
            Frequency::Calendar { months, anchor } => {
                let shifted = base.checked_add_months(Months::new(months.checked_mul(n)?))?;
                let date = match anchor {
                    MonthAnchor::SameDay => shifted.date(),
                    MonthAnchor::Start => shifted.date().with_day(1)?,
                    MonthAnchor::End => last_day_of_month(shifted.date())?,
                };
                Some(date.and_time(shifted.time()))
            }
            Frequency::BusinessDay => {
                let mut current = base;
                for _ in 0..n {
                    current = next_business_day(current)?;
                }
                Some(current)
            }
        }
    }

    /// `horizon` timestamps following `last`, one period apart
    pub fn future_index(&self, last: NaiveDateTime, horizon: usize) -> Result<Vec<NaiveDateTime>> {
        (1..=horizon)
            .map(|step| {
                u32::try_from(step)
                    .ok()
                    .and_then(|step| self.nth_after(last, step))
                    .ok_or_else(|| {
                        ForecastError::Forecasting(format!(
                            "cannot place forecast step {step} after {last} at frequency {self}"
                        ))
                    })
            })
            .collect()
    }

    /// Infer the spacing of sorted, unique timestamps
    ///
    /// Exact spacings are preferred; irregular data falls back to the
    /// spacing covering the majority of intervals. Returns `None` when
    /// there are fewer than two timestamps or no spacing dominates.
    pub fn infer(timestamps: &[NaiveDateTime]) -> Option<Self> {
        if timestamps.len() < 2 {
            return None;
        }

        let month_steps: Vec<i64> = timestamps
            .windows(2)
            .map(|w| month_index(w[1]) - month_index(w[0]))
            .collect();
        let seconds: Vec<i64> = timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_seconds())
            .collect();
        if seconds.iter().any(|&s| s <= 0) {
            return None;
        }
        let anchor = calendar_anchor(timestamps);

        if let Some(anchor) = anchor {
            if let Some(months) = all_equal(&month_steps).filter(|&m| m > 0) {
                return Some(Frequency::Calendar {
                    months: u32::try_from(months).ok()?,
                    anchor,
                });
            }
        }

        if let Some(step) = all_equal(&seconds) {
            return Some(Frequency::Fixed { seconds: step });
        }

        if is_business_daily(timestamps, &seconds) {
            return Some(Frequency::BusinessDay);
        }

        if let Some(anchor) = anchor {
            if month_steps.iter().all(|&m| m > 0) {
                if let Some(months) = dominant(&month_steps) {
                    return Some(Frequency::Calendar {
                        months: u32::try_from(months).ok()?,
                        anchor,
                    });
                }
            }
        }

        dominant(&seconds).map(|step| Frequency::Fixed { seconds: step })
    }
}

fn month_index(ts: NaiveDateTime) -> i64 {
    i64::from(ts.year()) * 12 + i64::from(ts.month0())
}

fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    let first = date.with_day(1)?;
    first.checked_add_months(Months::new(1))?.pred_opt()
}

fn is_month_end(date: NaiveDate) -> bool {
    date.succ_opt().is_some_and(|next| next.day() == 1)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn next_business_day(ts: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut current = ts.checked_add_signed(Duration::days(1))?;
    while is_weekend(current.date()) {
        current = current.checked_add_signed(Duration::days(1))?;
    }
    Some(current)
}

/// The month anchor shared by every timestamp, if any
fn calendar_anchor(timestamps: &[NaiveDateTime]) -> Option<MonthAnchor> {
    let first = timestamps.first()?;
    if timestamps.iter().any(|ts| ts.time() != first.time()) {
        return None;
    }
    if timestamps.iter().all(|ts| ts.day() == 1) {
        Some(MonthAnchor::Start)
    } else if timestamps.iter().all(|ts| is_month_end(ts.date())) {
        Some(MonthAnchor::End)
    } else if timestamps.iter().all(|ts| ts.day() == first.day()) {
        Some(MonthAnchor::SameDay)
    } else {
        None
    }
}

fn is_business_daily(timestamps: &[NaiveDateTime], seconds: &[i64]) -> bool {
    if timestamps.iter().any(|ts| is_weekend(ts.date())) {
        return false;
    }
    let mut saw_weekend_gap = false;
    for (window, &step) in timestamps.windows(2).zip(seconds) {
        match step {
            SECONDS_PER_DAY => {}
            s if s == 3 * SECONDS_PER_DAY && window[0].weekday() == Weekday::Fri => {
                saw_weekend_gap = true;
            }
            _ => return false,
        }
    }
    saw_weekend_gap
}

fn all_equal(values: &[i64]) -> Option<i64> {
    let first = *values.first()?;
    values.iter().all(|&v| v == first).then_some(first)
}

fn dominant(values: &[i64]) -> Option<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for &v in values {
        *counts.entry(v).or_default() += 1;
    }
    // ties go to the smaller spacing so the result does not depend on hash order
    let (value, count) = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;
    (count as f64 / values.len() as f64 > DOMINANT_SHARE).then_some(value)
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn with_multiple(f: &mut fmt::Formatter<'_>, n: i64, unit: &str) -> fmt::Result {
            if n == 1 {
                write!(f, "{unit}")
            } else {
                write!(f, "{n}{unit}")
            }
        }

        match *self {
            Frequency::Fixed { seconds } => {
                if seconds % SECONDS_PER_WEEK == 0 {
                    with_multiple(f, seconds / SECONDS_PER_WEEK, "W")
                } else if seconds % SECONDS_PER_DAY == 0 {
                    with_multiple(f, seconds / SECONDS_PER_DAY, "D")
                } else if seconds % SECONDS_PER_HOUR == 0 {
                    with_multiple(f, seconds / SECONDS_PER_HOUR, "H")
                } else if seconds % SECONDS_PER_MINUTE == 0 {
                    with_multiple(f, seconds / SECONDS_PER_MINUTE, "min")
                } else {
                    with_multiple(f, seconds, "s")
                }
            }
            Frequency::Calendar { months, anchor } => {
                let suffix = match anchor {
                    MonthAnchor::End => "",
                    MonthAnchor::Start => "S",
                    MonthAnchor::SameDay => "D",
                };
                let months = i64::from(months);
                if months % 12 == 0 {
                    with_multiple(f, months / 12, &format!("Y{suffix}"))
                } else if months % 3 == 0 {
                    with_multiple(f, months / 3, &format!("Q{suffix}"))
                } else {
                    with_multiple(f, months, &format!("M{suffix}"))
                }
            }
            Frequency::BusinessDay => write!(f, "B"),
        }
    }
}

impl FromStr for Frequency {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        let invalid = || ForecastError::InvalidParameter(format!("Unsupported frequency: {s}"));

        let n: u32 = if digits.is_empty() {
            1
        } else {
            digits.parse().map_err(|_| invalid())?
        };
        if n == 0 {
            return Err(invalid());
        }

        let overflow = || {
            ForecastError::InvalidParameter(format!("Frequency multiple is too large: {s}"))
        };
        let fixed = |unit_seconds: i64| {
            unit_seconds
                .checked_mul(i64::from(n))
                .map(|seconds| Frequency::Fixed { seconds })
                .ok_or_else(overflow)
        };
        let calendar = |months: u32, anchor: MonthAnchor| {
            months
                .checked_mul(n)
                .map(|months| Frequency::Calendar { months, anchor })
                .ok_or_else(overflow)
        };

        let frequency = match unit {
            "s" | "S" => fixed(1)?,
            "min" | "T" => fixed(SECONDS_PER_MINUTE)?,
            "H" | "h" => fixed(SECONDS_PER_HOUR)?,
            "D" | "d" => fixed(SECONDS_PER_DAY)?,
            "W" | "w" => fixed(SECONDS_PER_WEEK)?,
            "B" => {
                if n != 1 {
                    return Err(invalid());
                }
                Frequency::BusinessDay
            }
            "M" | "ME" => calendar(1, MonthAnchor::End)?,
            "MS" => calendar(1, MonthAnchor::Start)?,
            "MD" => calendar(1, MonthAnchor::SameDay)?,
            "Q" | "QE" => calendar(3, MonthAnchor::End)?,
            "QS" => calendar(3, MonthAnchor::Start)?,
            "QD" => calendar(3, MonthAnchor::SameDay)?,
            "Y" | "A" | "YE" => calendar(12, MonthAnchor::End)?,
            "YS" | "AS" => calendar(12, MonthAnchor::Start)?,
            "YD" => calendar(12, MonthAnchor::SameDay)?,
            _ => return Err(invalid()),
        };
        Ok(frequency)
    }
}

impl TryFrom<String> for Frequency {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_infer_month_start() {
        let index: Vec<_> = (1..=6).map(|m| ts(2023, m, 1)).collect();
        assert_eq!(Frequency::infer(&index), Some(Frequency::month_start()));
    }

    #[test]
    fn test_infer_month_end() {
        let index = vec![ts(2023, 1, 31), ts(2023, 2, 28), ts(2023, 3, 31), ts(2023, 4, 30)];
        assert_eq!(Frequency::infer(&index), Some(Frequency::month_end()));
    }

    #[test]
    fn test_infer_daily_and_weekly() {
        let daily: Vec<_> = (1..=10).map(|d| ts(2023, 1, d)).collect();
        assert_eq!(Frequency::infer(&daily), Some(Frequency::daily()));

        let weekly: Vec<_> = (0..5).map(|w| ts(2023, 1, 2 + 7 * w)).collect();
        assert_eq!(Frequency::infer(&weekly), Some(Frequency::weekly()));
    }

    #[test]
    fn test_infer_business_days() {
        // Wed 2023-01-04 .. Tue 2023-01-10, skipping the weekend
        let index = vec![
            ts(2023, 1, 4),
            ts(2023, 1, 5),
            ts(2023, 1, 6),
            ts(2023, 1, 9),
            ts(2023, 1, 10),
        ];
        assert_eq!(Frequency::infer(&index), Some(Frequency::BusinessDay));
    }

    #[test]
    fn test_infer_dominant_monthly_with_gap() {
        let index = vec![
            ts(2023, 1, 1),
            ts(2023, 2, 1),
            ts(2023, 3, 1),
            ts(2023, 5, 1),
            ts(2023, 6, 1),
        ];
        assert_eq!(Frequency::infer(&index), Some(Frequency::month_start()));
    }

    #[test]
    fn test_infer_fails_on_single_point_and_chaos() {
        assert_eq!(Frequency::infer(&[ts(2023, 1, 1)]), None);
        let chaos = vec![ts(2023, 1, 1), ts(2023, 1, 3), ts(2023, 1, 10), ts(2023, 2, 27)];
        assert_eq!(Frequency::infer(&chaos), None);
    }

    #[test]
    fn test_month_end_future_index() {
        let future = Frequency::month_end().future_index(ts(2023, 1, 31), 3).unwrap();
        assert_eq!(future, vec![ts(2023, 2, 28), ts(2023, 3, 31), ts(2023, 4, 30)]);
    }

    #[test]
    fn test_same_day_keeps_anchor_through_short_months() {
        let future = Frequency::monthly().future_index(ts(2023, 1, 31), 3).unwrap();
        assert_eq!(future, vec![ts(2023, 2, 28), ts(2023, 3, 31), ts(2023, 4, 30)]);
    }

    #[test]
    fn test_business_day_future_index_skips_weekend() {
        let future = Frequency::BusinessDay.future_index(ts(2023, 1, 6), 2).unwrap();
        assert_eq!(future, vec![ts(2023, 1, 9), ts(2023, 1, 10)]);
    }

    #[test]
    fn test_alias_round_trip() {
        for alias in ["D", "2D", "W", "H", "15min", "M", "MS", "MD", "Q", "QS", "Y", "YS", "B"] {
            let parsed: Frequency = alias.parse().unwrap();
            assert_eq!(parsed.to_string(), alias);
        }
        assert!("fortnightly".parse::<Frequency>().is_err());
        assert!("0D".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_oversized_multiple_is_rejected() {
        for alias in ["400000000Y", "2000000000QS", "1431655766Q"] {
            let err = alias.parse::<Frequency>().unwrap_err();
            assert!(matches!(err, ForecastError::InvalidParameter(_)), "{alias}: {err}");
        }
        let largest: Frequency = "357913941Y".parse().unwrap();
        assert_eq!(
            largest,
            Frequency::Calendar {
                months: 4_294_967_292,
                anchor: MonthAnchor::End
            }
        );
    }
}
