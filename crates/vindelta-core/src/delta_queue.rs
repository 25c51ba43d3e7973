// crates/vindelta-core/src/delta_queue.rs

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use polars::prelude::*;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::info;

use crate::db::DbPool;
use crate::error::{PipelineError, Result};
use crate::types::{RuleConfig, COL_PROCESSED, COL_VEHICLE_TYPE, COL_VIN, FEED_COLUMNS};

/// Persistent queue of delivery records waiting for a confirmation. Rows are
/// inserted pending, rehydrated by the carryover queries, and retired once
/// they have been emitted downstream.
#[async_trait]
pub trait DeltaQueue: Send + Sync {
    /// Queues the given records as pending. A VIN that already has a pending
    /// row is skipped, never duplicated. Returns the number of rows actually
    /// inserted. All-or-nothing: on error no row of the batch is kept.
    async fn insert_pending(&self, records: &DataFrame) -> Result<usize>;

    /// Pending private-use rows whose VIN gained a confirmation inside the
    /// lookback window.
    async fn confirmed_pending(&self) -> Result<DataFrame>;

    /// Pending non-private rows with any confirmation, capped at `limit`.
    async fn public_service_pending(&self, limit: i64) -> Result<DataFrame>;

    /// Pending private-use rows flagged for a resend.
    async fn resend_pending(&self) -> Result<DataFrame>;

    /// Retires pending rows for the given VINs. Returns how many changed.
    async fn mark_consumed(&self, vins: &[String]) -> Result<u64>;
}

const INSERT_SQL: &str = "INSERT INTO delta_queue (vin, delivery_dealer_code, \
     selling_dealer_code, vehicle_type, delivery_date, valid_from_date, \
     last_update_ts, survey_agreement, survey_agreement_date, consent_email, \
     consent_post, consent_phone, consent_sms, phone_1, phone_2, \
     customer_email, state) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
     $15, $16, 0) \
     ON CONFLICT (vin) WHERE state = 0 DO NOTHING";

const QUEUE_COLUMNS: &str = "q.vin, q.delivery_dealer_code, \
     q.selling_dealer_code, q.vehicle_type, q.delivery_date, \
     q.valid_from_date, q.last_update_ts, q.survey_agreement, \
     q.survey_agreement_date, q.consent_email, q.consent_post, \
     q.consent_phone, q.consent_sms, q.phone_1, q.phone_2, q.customer_email";

pub struct PgDeltaQueue {
    pool: DbPool,
    rules: RuleConfig,
}

impl PgDeltaQueue {
    pub fn new(pool: DbPool, rules: RuleConfig) -> Self {
        Self { pool, rules }
    }
}

#[async_trait]
impl DeltaQueue for PgDeltaQueue {
    async fn insert_pending(&self, records: &DataFrame) -> Result<usize> {
        if records.height() == 0 {
            return Ok(0);
        }
        let columns = feed_column_handles(records)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| PipelineError::QueueInsert(err.to_string()))?;

        let mut inserted = 0usize;
        for idx in 0..records.height() {
            let mut query = sqlx::query(INSERT_SQL);
            for column in &columns {
                query = query.bind(column.get(idx));
            }
            let outcome = query
                .execute(&mut *tx)
                .await
                .map_err(|err| PipelineError::QueueInsert(err.to_string()))?;
            inserted += outcome.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|err| PipelineError::QueueInsert(err.to_string()))?;
        info!(
            queued = inserted,
            skipped = records.height() - inserted,
            "Unconfirmed records queued"
        );
        Ok(inserted)
    }

    async fn confirmed_pending(&self) -> Result<DataFrame> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM delta_queue q \
             JOIN delivery_confirmations c ON c.vin = q.vin \
             WHERE q.state = 0 \
               AND q.vehicle_type = $1 \
               AND c.confirmed_on >= CURRENT_DATE - $2::int"
        );
        let rows = sqlx::query(&sql)
            .bind(&self.rules.private_use_code)
            .bind(self.rules.confirmation_lookback_days)
            .fetch_all(&self.pool)
            .await?;
        rows_to_frame(&rows)
    }

    async fn public_service_pending(&self, limit: i64) -> Result<DataFrame> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM delta_queue q \
             JOIN delivery_confirmations c ON c.vin = q.vin \
             WHERE q.state = 0 \
               AND q.vehicle_type <> $1 \
             ORDER BY q.queued_at \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(&self.rules.private_use_code)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows_to_frame(&rows)
    }

    async fn resend_pending(&self) -> Result<DataFrame> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM delta_queue q \
             JOIN resend_requests r ON r.vin = q.vin \
             WHERE q.state = 0 \
               AND q.vehicle_type = $1"
        );
        let rows = sqlx::query(&sql)
            .bind(&self.rules.private_use_code)
            .fetch_all(&self.pool)
            .await?;
        rows_to_frame(&rows)
    }

    async fn mark_consumed(&self, vins: &[String]) -> Result<u64> {
        if vins.is_empty() {
            return Ok(0);
        }
        let outcome =
            sqlx::query("UPDATE delta_queue SET state = 1 WHERE state = 0 AND vin = ANY($1)")
                .bind(vins)
                .execute(&self.pool)
                .await?;
        Ok(outcome.rows_affected())
    }
}

fn feed_column_handles(df: &DataFrame) -> Result<Vec<&StringChunked>> {
    FEED_COLUMNS
        .iter()
        .map(|name| Ok(df.column(name)?.str()?))
        .collect()
}

fn rows_to_frame(rows: &[PgRow]) -> Result<DataFrame> {
    let mut values: Vec<Vec<Option<String>>> = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = Vec::with_capacity(FEED_COLUMNS.len());
        for name in FEED_COLUMNS {
            record.push(row.try_get::<Option<String>, _>(name)?);
        }
        values.push(record);
    }
    frame_from_records(values)
}

/// Builds a feed-shaped frame from row-major values. Queue rows already went
/// through a prior run, so they carry the processed marker.
pub(crate) fn frame_from_records(records: Vec<Vec<Option<String>>>) -> Result<DataFrame> {
    let mut columns: Vec<Column> = Vec::with_capacity(FEED_COLUMNS.len() + 1);
    for (pos, name) in FEED_COLUMNS.iter().enumerate() {
        let series: Vec<Option<String>> =
            records.iter().map(|record| record[pos].clone()).collect();
        columns.push(Column::new((*name).into(), series));
    }
    columns.push(Column::new(
        COL_PROCESSED.into(),
        vec!["true"; records.len()],
    ));
    Ok(DataFrame::new(columns)?)
}

struct MemoryEntry {
    values: Vec<Option<String>>,
    pending: bool,
}

/// In-memory queue used by the integration tests. Confirmations and resend
/// flags are injected directly instead of joined from tables, but the
/// lookback window is applied the same way the store queries do.
pub struct MemoryDeltaQueue {
    rules: RuleConfig,
    entries: Mutex<Vec<MemoryEntry>>,
    confirmed: Mutex<HashMap<String, NaiveDate>>,
    resend: Mutex<HashSet<String>>,
}

impl MemoryDeltaQueue {
    pub fn new(rules: RuleConfig) -> Self {
        Self {
            rules,
            entries: Mutex::new(Vec::new()),
            confirmed: Mutex::new(HashMap::new()),
            resend: Mutex::new(HashSet::new()),
        }
    }

    pub fn confirm(&self, vin: &str) {
        self.confirm_on(vin, Local::now().date_naive());
    }

    pub fn confirm_on(&self, vin: &str, confirmed_on: NaiveDate) {
        self.confirmed
            .lock()
            .unwrap()
            .insert(vin.to_string(), confirmed_on);
    }

    pub fn request_resend(&self, vin: &str) {
        self.resend.lock().unwrap().insert(vin.to_string());
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.pending)
            .count()
    }

    fn vin_of(values: &[Option<String>]) -> &str {
        let pos = column_index(COL_VIN);
        values[pos].as_deref().unwrap_or("")
    }

    fn vehicle_type_of(values: &[Option<String>]) -> &str {
        let pos = column_index(COL_VEHICLE_TYPE);
        values[pos].as_deref().unwrap_or("")
    }

    fn collect_pending<F>(&self, keep: F, limit: Option<i64>) -> Result<DataFrame>
    where
        F: Fn(&MemoryEntry) -> bool,
    {
        let entries = self.entries.lock().unwrap();
        let mut records = Vec::new();
        for entry in entries.iter() {
            if !entry.pending || !keep(entry) {
                continue;
            }
            if let Some(limit) = limit {
                if records.len() as i64 >= limit {
                    break;
                }
            }
            records.push(entry.values.clone());
        }
        frame_from_records(records)
    }
}

fn column_index(name: &str) -> usize {
    FEED_COLUMNS
        .iter()
        .position(|col| *col == name)
        .unwrap_or(0)
}

#[async_trait]
impl DeltaQueue for MemoryDeltaQueue {
    async fn insert_pending(&self, records: &DataFrame) -> Result<usize> {
        let columns = feed_column_handles(records)?;
        let mut entries = self.entries.lock().unwrap();
        let mut inserted = 0usize;
        for idx in 0..records.height() {
            let values: Vec<Option<String>> = columns
                .iter()
                .map(|column| column.get(idx).map(str::to_string))
                .collect();
            let vin = Self::vin_of(&values).to_string();
            let already_pending = entries
                .iter()
                .any(|entry| entry.pending && Self::vin_of(&entry.values) == vin);
            if !already_pending {
                entries.push(MemoryEntry {
                    values,
                    pending: true,
                });
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn confirmed_pending(&self) -> Result<DataFrame> {
        let confirmed = self.confirmed.lock().unwrap().clone();
        let private = self.rules.private_use_code.clone();
        let window_start = Local::now().date_naive()
            - Duration::days(i64::from(self.rules.confirmation_lookback_days));
        self.collect_pending(
            |entry| {
                Self::vehicle_type_of(&entry.values) == private
                    && confirmed
                        .get(Self::vin_of(&entry.values))
                        .is_some_and(|confirmed_on| *confirmed_on >= window_start)
            },
            None,
        )
    }

    async fn public_service_pending(&self, limit: i64) -> Result<DataFrame> {
        let confirmed = self.confirmed.lock().unwrap().clone();
        let private = self.rules.private_use_code.clone();
        self.collect_pending(
            |entry| {
                Self::vehicle_type_of(&entry.values) != private
                    && confirmed.contains_key(Self::vin_of(&entry.values))
            },
            Some(limit),
        )
    }

    async fn resend_pending(&self) -> Result<DataFrame> {
        let resend = self.resend.lock().unwrap().clone();
        let private = self.rules.private_use_code.clone();
        self.collect_pending(
            |entry| {
                Self::vehicle_type_of(&entry.values) == private
                    && resend.contains(Self::vin_of(&entry.values))
            },
            None,
        )
    }

    async fn mark_consumed(&self, vins: &[String]) -> Result<u64> {
        let targets: HashSet<&str> = vins.iter().map(String::as_str).collect();
        let mut entries = self.entries.lock().unwrap();
        let mut changed = 0u64;
        for entry in entries.iter_mut() {
            if entry.pending && targets.contains(Self::vin_of(&entry.values)) {
                entry.pending = false;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::empty_record_frame;

    fn record(vin: &str, vehicle_type: &str) -> DataFrame {
        let mut records = vec![vec![None; FEED_COLUMNS.len()]];
        records[0][column_index(COL_VIN)] = Some(vin.to_string());
        records[0][column_index(COL_VEHICLE_TYPE)] = Some(vehicle_type.to_string());
        frame_from_records(records).unwrap()
    }

    #[tokio::test]
    async fn pending_vins_are_not_duplicated() {
        let queue = MemoryDeltaQueue::new(RuleConfig::default());
        assert_eq!(queue.insert_pending(&record("VF1A", "VP")).await.unwrap(), 1);
        assert_eq!(queue.insert_pending(&record("VF1A", "VP")).await.unwrap(), 0);
        assert_eq!(queue.pending_count(), 1);
    }

    #[tokio::test]
    async fn consumed_rows_never_resurface() {
        let queue = MemoryDeltaQueue::new(RuleConfig::default());
        queue.insert_pending(&record("VF1A", "VP")).await.unwrap();
        queue.confirm("VF1A");

        let hits = queue.confirmed_pending().await.unwrap();
        assert_eq!(hits.height(), 1);
        assert_eq!(
            queue.mark_consumed(&["VF1A".to_string()]).await.unwrap(),
            1
        );
        assert_eq!(queue.confirmed_pending().await.unwrap().height(), 0);

        // the VIN may be queued again afterwards
        assert_eq!(queue.insert_pending(&record("VF1A", "VP")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn confirmations_outside_the_lookback_window_stay_pending() {
        let queue = MemoryDeltaQueue::new(RuleConfig::default());
        queue.insert_pending(&record("VF1A", "VP")).await.unwrap();

        let stale = Local::now().date_naive() - Duration::days(45);
        queue.confirm_on("VF1A", stale);
        assert_eq!(queue.confirmed_pending().await.unwrap().height(), 0);
        assert_eq!(queue.pending_count(), 1);

        queue.confirm_on("VF1A", Local::now().date_naive());
        assert_eq!(queue.confirmed_pending().await.unwrap().height(), 1);
    }

    #[tokio::test]
    async fn public_service_batch_is_capped() {
        let queue = MemoryDeltaQueue::new(RuleConfig::default());
        for n in 0..4 {
            let vin = format!("VU{n}");
            queue.insert_pending(&record(&vin, "VU")).await.unwrap();
            queue.confirm(&vin);
        }
        let hits = queue.public_service_pending(2).await.unwrap();
        assert_eq!(hits.height(), 2);
    }

    #[tokio::test]
    async fn resend_only_returns_private_use() {
        let queue = MemoryDeltaQueue::new(RuleConfig::default());
        queue.insert_pending(&record("VF1A", "VP")).await.unwrap();
        queue.insert_pending(&record("VU1", "VU")).await.unwrap();
        queue.request_resend("VF1A");
        queue.request_resend("VU1");

        let hits = queue.resend_pending().await.unwrap();
        assert_eq!(hits.height(), 1);
        let vins = hits.column(COL_VIN).unwrap().str().unwrap();
        assert_eq!(vins.get(0), Some("VF1A"));
    }

    #[test]
    fn rehydrated_frames_match_the_feed_schema() {
        let frame = frame_from_records(Vec::new()).unwrap();
        assert_eq!(
            frame.get_column_names(),
            empty_record_frame().get_column_names()
        );
    }
}
