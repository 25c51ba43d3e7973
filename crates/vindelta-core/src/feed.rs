// crates/vindelta-core/src/feed.rs

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::types::{COL_PROCESSED, FEED_COLUMNS};

/// Reads the semicolon-separated delivery feed. A missing or zero-byte file
/// is not an error: it signals that no feed landed today and the run should
/// fall back to queue-only processing.
pub fn read_feed(path: &Path) -> Result<Option<DataFrame>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => {
            info!(path = %path.display(), "Feed file is empty");
            return Ok(None);
        }
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "Feed file not found");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    }

    // infer_schema_length of zero keeps every column Utf8. Dealer codes and
    // phone numbers would otherwise round-trip through integers.
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_separator(b';'))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|err| PipelineError::FeedRead(err.to_string()))?
        .finish()
        .map_err(|err| PipelineError::FeedRead(err.to_string()))?;

    let mut df = select_feed_columns(df)?;
    df.with_column(Column::new(
        COL_PROCESSED.into(),
        vec!["false"; df.height()],
    ))?;
    info!(rows = df.height(), "Feed ingested");
    Ok(Some(df))
}

fn select_feed_columns(df: DataFrame) -> Result<DataFrame> {
    for name in FEED_COLUMNS {
        if df.column(name).is_err() {
            return Err(PipelineError::FeedRead(format!(
                "feed is missing required column '{name}'"
            )));
        }
    }
    Ok(df.select(FEED_COLUMNS)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::empty_record_frame;

    #[test]
    fn missing_file_is_not_an_error() {
        let result = read_feed(Path::new("/nonexistent/feed.csv")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn extra_columns_are_dropped_and_order_is_fixed() {
        let scrambled = empty_record_frame();
        // reverse the column order and bolt on an unexpected column
        let mut names: Vec<String> = scrambled
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        names.reverse();
        let mut df = scrambled.select(names).unwrap();
        df.with_column(Column::new("surprise".into(), Vec::<String>::new()))
            .unwrap();

        let selected = select_feed_columns(df).unwrap();
        let got: Vec<String> = selected
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(got, FEED_COLUMNS.to_vec());
    }

    #[test]
    fn missing_column_is_a_feed_error() {
        let df = empty_record_frame().drop("vin").unwrap();
        let err = select_feed_columns(df).unwrap_err();
        assert!(err.to_string().contains("vin"));
    }
}
