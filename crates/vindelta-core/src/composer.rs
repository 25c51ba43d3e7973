// crates/vindelta-core/src/composer.rs

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use polars::prelude::*;
use tracing::info;

use crate::error::Result;
use crate::types::{RuleConfig, COL_PROCESSED, COL_VEHICLE_TYPE};

/// Final shaping of the outbound feed: drop the transient processed marker,
/// filter out public-service vehicles, collapse exact-duplicate rows.
pub fn compose_outbound(df: &DataFrame, rules: &RuleConfig) -> Result<DataFrame> {
    let mut out = df.clone();
    if out.column(COL_PROCESSED).is_ok() {
        out = out.drop(COL_PROCESSED)?;
    }

    let flags: Vec<bool> = {
        let vehicle_types = out.column(COL_VEHICLE_TYPE)?.str()?;
        (0..out.height())
            .map(|idx| vehicle_types.get(idx).unwrap_or("") != rules.public_service_code)
            .collect()
    };
    let mask = BooleanChunked::from_slice("keep".into(), &flags);
    let out = out.filter(&mask)?;
    dedupe_rows(&out)
}

/// Drops rows identical across every column, keeping the first occurrence.
pub fn dedupe_rows(df: &DataFrame) -> Result<DataFrame> {
    if df.height() == 0 {
        return Ok(df.clone());
    }
    let flags: Vec<bool> = {
        let columns: Vec<&StringChunked> = df
            .get_columns()
            .iter()
            .map(|column| Ok(column.str()?))
            .collect::<Result<_>>()?;
        let mut seen: HashSet<Vec<&str>> = HashSet::with_capacity(df.height());
        (0..df.height())
            .map(|idx| {
                let key: Vec<&str> = columns
                    .iter()
                    .map(|column| column.get(idx).unwrap_or(""))
                    .collect();
                seen.insert(key)
            })
            .collect()
    };
    let mask = BooleanChunked::from_slice("first".into(), &flags);
    Ok(df.filter(&mask)?)
}

/// Writes the corrected feed in the same semicolon-separated layout it was
/// ingested in.
pub fn write_feed(df: &DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .with_separator(b';')
        .finish(&mut df.clone())?;
    info!(path = %path.display(), rows = df.height(), "Outbound feed written");
    Ok(())
}

pub fn write_manifest(df: &DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).finish(&mut df.clone())?;
    info!(path = %path.display(), rows = df.height(), "Manifest written");
    Ok(())
}

/// Snapshots the ingested set under a timestamped name before the corrected
/// feed replaces the original file.
pub fn write_backup(df: &DataFrame, backup_dir: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let path = backup_dir.join(backup_file_name(now));
    let mut file = File::create(&path)?;
    CsvWriter::new(&mut file)
        .with_separator(b';')
        .finish(&mut df.clone())?;
    info!(path = %path.display(), "Feed backup written");
    Ok(path)
}

fn backup_file_name(now: DateTime<Local>) -> String {
    format!("feed_backup_{}.csv", now.format("%d%m%Y.%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn public_service_rows_and_marker_are_dropped() {
        let df = df! {
            "vin" => ["VF1A", "VU1"],
            "vehicle_type" => ["VP", "VU"],
            "processed" => ["false", "true"],
        }
        .unwrap();

        let out = compose_outbound(&df, &RuleConfig::default()).unwrap();
        assert_eq!(out.height(), 1);
        assert!(out.column("processed").is_err());
        let vins = out.column("vin").unwrap().str().unwrap();
        assert_eq!(vins.get(0), Some("VF1A"));
    }

    #[test]
    fn only_fully_identical_rows_collapse() {
        let df = df! {
            "vin" => ["VF1A", "VF1A", "VF1A"],
            "delivery_date" => ["01/01/2024", "01/01/2024", "02/01/2024"],
        }
        .unwrap();

        let out = dedupe_rows(&df).unwrap();
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn backup_names_carry_the_run_timestamp() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(backup_file_name(now), "feed_backup_07032024.140509.csv");
    }
}
