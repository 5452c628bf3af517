use chrono::{NaiveDate, NaiveDateTime};
use forecast_engine::config::{DuplicatePolicy, IngestConfig};
use forecast_engine::{DataFrameIngestor, ErrorKind, ForecastError, Frequency, MonthAnchor};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::io::Write;
use tempfile::NamedTempFile;

fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

// Helper function to write a CSV fixture
fn csv_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}

#[test]
fn test_messy_upload_keeps_only_complete_rows() {
    let file = csv_file(&[
        "Date,Sales,Region",
        "03/01/2023,120.5,north",
        "01/01/2023,100.0,north",
        "not a date,999,north",
        "02/01/2023,,north",
        "04/01/2023,abc,north",
        "05/01/2023,130,north",
        "06/01/2023, 140.25 ,north",
    ]);

    let series = DataFrameIngestor::default()
        .ingest_csv_path(file.path(), "Date", "Sales")
        .unwrap();

    // day-first: 03/01/2023 is the third of January
    assert_eq!(
        series.timestamps(),
        &[ymd(2023, 1, 1), ymd(2023, 1, 3), ymd(2023, 1, 5), ymd(2023, 1, 6)]
    );
    assert_eq!(series.values(), &[100.0, 120.5, 130.0, 140.25]);
    assert_eq!(series.name(), "Sales");
    assert!(series.timestamps().windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_ingestion_is_idempotent() {
    let bytes = b"ds,y\n2023-01-31,1\n2023-02-28,2\n2023-03-31,3\n2023-04-30,5\n";
    let ingestor = DataFrameIngestor::default();
    let first = ingestor.ingest_csv_bytes(bytes, "ds", "y").unwrap();
    assert_eq!(first.frequency(), Frequency::month_end());

    let again = ingestor
        .ingest(&first.to_dataframe().unwrap(), "date", "y")
        .unwrap();
    assert_eq!(again, first);
}

#[test]
fn test_missing_column_is_a_validation_error() {
    let err = DataFrameIngestor::default()
        .ingest_csv_bytes(b"date,value\n2023-01-01,1\n", "date", "sales")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataValidation);
    assert!(err.to_string().contains("sales"));
}

#[rstest]
#[case(b"date,value\nx,1\ny,2\n".as_slice(), "no parseable dates")]
#[case(b"date,value\n2023-01-01,a\n2023-01-02,b\n".as_slice(), "no numeric values")]
#[case(b"date,value\n2023-01-01,\nfoo,2\n".as_slice(), "remain after cleaning")]
fn test_unusable_columns(#[case] bytes: &[u8], #[case] message: &str) {
    let err = DataFrameIngestor::default()
        .ingest_csv_bytes(bytes, "date", "value")
        .unwrap_err();
    assert!(matches!(err, ForecastError::DataValidation(_)));
    assert!(err.to_string().contains(message), "{err}");
}

#[rstest]
#[case(DuplicatePolicy::KeepLast, vec![3.0, 5.0])]
#[case(DuplicatePolicy::Mean, vec![2.0, 5.0])]
fn test_duplicate_policies(#[case] policy: DuplicatePolicy, #[case] expected: Vec<f64>) {
    let bytes = b"date,value\n2023-01-01,1\n2023-01-01,3\n2023-01-02,5\n";
    let reject = DataFrameIngestor::default().ingest_csv_bytes(bytes, "date", "value");
    assert!(matches!(reject, Err(ForecastError::DataValidation(_))));

    let ingestor = DataFrameIngestor::new(IngestConfig {
        duplicates: policy,
        ..IngestConfig::default()
    });
    let series = ingestor.ingest_csv_bytes(bytes, "date", "value").unwrap();
    assert_eq!(series.values(), expected.as_slice());
}

#[test]
fn test_single_row_falls_back_to_default_frequency() {
    let ingestor = DataFrameIngestor::new(IngestConfig {
        default_frequency: Frequency::month_start(),
        ..IngestConfig::default()
    });
    let series = ingestor
        .ingest_csv_bytes(b"date,value\n2023-05-01,1\n", "date", "value")
        .unwrap();
    assert!(!series.frequency_inferred());
    assert_eq!(
        series.frequency(),
        Frequency::Calendar {
            months: 1,
            anchor: MonthAnchor::Start
        }
    );
    assert_eq!(series.future_index(1).unwrap(), vec![ymd(2023, 6, 1)]);
}

#[test]
fn test_column_detection() {
    let df = DataFrameIngestor::read_csv_bytes(
        b"store,when,units,price\na,2023-01-01,3,1.5\na,2023-01-02,4,1.5\n",
    )
    .unwrap();
    let columns = DataFrameIngestor::default().detect_columns(&df).unwrap();
    assert_eq!(columns.date_column, "when");
    assert_eq!(columns.target_column, "units");
}
