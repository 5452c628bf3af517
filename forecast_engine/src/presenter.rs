//! Output contract consumed by plotting and export layers

use crate::data::TimeSeries;
use crate::error::{ForecastError, Result};
use crate::models::ForecastResult;
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One forecast step with its optional bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: NaiveDateTime,
    pub value: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl ForecastResult {
    /// Forecast steps zipped with their timestamps and bounds
    pub fn points(&self) -> Vec<ForecastPoint> {
        let bounds = self.bounds();
        self.index()
            .iter()
            .zip(self.values())
            .enumerate()
            .map(|(step, (&timestamp, &value))| ForecastPoint {
                timestamp,
                value,
                lower: bounds.map(|b| b.lower[step]),
                upper: bounds.map(|b| b.upper[step]),
            })
            .collect()
    }

    /// Pretty-printed JSON of the whole result
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the forecast points as CSV with a header row
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for point in self.points() {
            csv_writer.serialize(point)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

/// History followed by forecast, ready for a line chart with a shaded band
///
/// Columns: `timestamp`, `value`, `kind` (`history` or `forecast`), `lower`
/// and `upper`. Bounds are null for history rows and for forecasts without
/// bounds.
pub fn plot_frame(history: &TimeSeries, result: &ForecastResult) -> Result<DataFrame> {
    if let (Some(last), Some(first)) = (history.last_timestamp(), result.index().first()) {
        if *first <= last {
            return Err(ForecastError::Forecasting(format!(
                "Forecast starts at {first}, not after the last observation {last}"
            )));
        }
    }

    let points = result.points();
    let rows = history.len() + points.len();
    let mut timestamps = Vec::with_capacity(rows);
    let mut values = Vec::with_capacity(rows);
    let mut kinds = Vec::with_capacity(rows);
    let mut lower: Vec<Option<f64>> = Vec::with_capacity(rows);
    let mut upper: Vec<Option<f64>> = Vec::with_capacity(rows);

    for (timestamp, &value) in history.timestamps().iter().zip(history.values()) {
        timestamps.push(timestamp.format(TIMESTAMP_FORMAT).to_string());
        values.push(value);
        kinds.push("history");
        lower.push(None);
        upper.push(None);
    }
    for point in points {
        timestamps.push(point.timestamp.format(TIMESTAMP_FORMAT).to_string());
        values.push(point.value);
        kinds.push("forecast");
        lower.push(point.lower);
        upper.push(point.upper);
    }

    let frame = DataFrame::new(vec![
        Series::new("timestamp", timestamps),
        Series::new("value", values),
        Series::new("kind", kinds),
        Series::new("lower", lower),
        Series::new("upper", upper),
    ])?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceBounds, StrategyKind};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bounded_result() -> ForecastResult {
        ForecastResult::new(StrategyKind::Prophet, vec![day(4), day(5)], vec![10.0, 11.0])
            .unwrap()
            .with_bounds(ConfidenceBounds {
                lower: vec![9.0, 9.5],
                upper: vec![11.0, 12.5],
                level: 0.8,
            })
            .unwrap()
    }

    #[test]
    fn test_points_carry_bounds() {
        let points = bounded_result().points();
        assert_eq!(
            points[1],
            ForecastPoint {
                timestamp: day(5),
                value: 11.0,
                lower: Some(9.5),
                upper: Some(12.5),
            }
        );
    }

    #[test]
    fn test_csv_has_header_and_one_row_per_step() {
        let mut buffer = Vec::new();
        bounded_result().write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,value,lower,upper");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2024-03-04T00:00:00,10.0,9.0,11.0"));
    }

    #[test]
    fn test_json_names_the_strategy() {
        let json = bounded_result().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["strategy"], "prophet");
        assert_eq!(value["values"][0], 10.0);
    }

    #[test]
    fn test_plot_frame_stacks_history_and_forecast() {
        let history = TimeSeries::new(vec![day(1), day(2), day(3)], vec![7.0, 8.0, 9.0]).unwrap();
        let frame = plot_frame(&history, &bounded_result()).unwrap();
        assert_eq!(frame.height(), 5);
        assert_eq!(
            frame.get_column_names(),
            vec!["timestamp", "value", "kind", "lower", "upper"]
        );
        let kinds: Vec<Option<&str>> = frame.column("kind").unwrap().utf8().unwrap().into_iter().collect();
        assert_eq!(kinds[2], Some("history"));
        assert_eq!(kinds[3], Some("forecast"));
        assert_eq!(frame.column("lower").unwrap().null_count(), 3);
    }

    #[test]
    fn test_plot_frame_rejects_overlapping_forecast() {
        let history = TimeSeries::new(vec![day(4), day(6)], vec![1.0, 2.0]).unwrap();
        assert!(plot_frame(&history, &bounded_result()).is_err());
    }
}
