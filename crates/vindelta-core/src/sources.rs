// crates/vindelta-core/src/sources.rs

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::*;
use sqlx::Row;

use crate::db::DbPool;
use crate::error::{PipelineError, Result};
use crate::types::COL_VIN;

/// Columns of the contact frame backing the reporting manifest.
pub const CONTACT_COLUMNS: [&str; 17] = [
    COL_VIN,
    "customer_id",
    "first_name",
    "last_name",
    "email",
    "service_type",
    "dealer_code",
    "dealer_name",
    "delivery_date",
    "reason",
    "consent_email",
    "consent_post",
    "consent_phone",
    "consent_sms",
    "person_type",
    "policy_description",
    "confirmed_on",
];

/// A confirmed delivery date reported by the dealer network.
#[derive(Debug, Clone)]
pub struct ConfirmationDate {
    pub vin: String,
    pub confirmed_on: NaiveDate,
}

impl ConfirmationDate {
    pub fn date_string(&self) -> String {
        self.confirmed_on.format("%d/%m/%Y").to_string()
    }

    /// The upstream system stores timestamps without a real time of day.
    /// Noon keeps the date stable across timezone round trips.
    pub fn datetime_string(&self) -> String {
        format!("{} 12:00:00", self.date_string())
    }
}

/// Read-only view over dealer-reported delivery confirmations.
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// The subset of `vins` that has a confirmation, at any date.
    async fn confirmed_vins(&self, vins: &[String]) -> Result<HashSet<String>>;

    /// Authoritative confirmation dates for the given VINs. VINs without a
    /// confirmation are simply absent.
    async fn confirmation_dates(&self, vins: &[String]) -> Result<Vec<ConfirmationDate>>;
}

/// Read-only view over customer contact details, used to enrich the manifest.
#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn contacts(&self, vins: &[String]) -> Result<DataFrame>;
}

pub struct PgConfirmationSource {
    pool: DbPool,
}

impl PgConfirmationSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn source_error(source_name: &'static str, err: sqlx::Error) -> PipelineError {
    PipelineError::SourceQuery {
        source_name,
        detail: err.to_string(),
    }
}

#[async_trait]
impl ConfirmationSource for PgConfirmationSource {
    async fn confirmed_vins(&self, vins: &[String]) -> Result<HashSet<String>> {
        if vins.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query("SELECT vin FROM delivery_confirmations WHERE vin = ANY($1)")
            .bind(vins)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| source_error("confirmation source", err))?;
        let mut confirmed = HashSet::with_capacity(rows.len());
        for row in rows {
            confirmed.insert(row.try_get("vin")?);
        }
        Ok(confirmed)
    }

    async fn confirmation_dates(&self, vins: &[String]) -> Result<Vec<ConfirmationDate>> {
        if vins.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT vin, confirmed_on FROM delivery_confirmations WHERE vin = ANY($1)",
        )
        .bind(vins)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| source_error("confirmation source", err))?;

        let mut dates = Vec::with_capacity(rows.len());
        for row in rows {
            dates.push(ConfirmationDate {
                vin: row.try_get("vin")?,
                confirmed_on: row.try_get("confirmed_on")?,
            });
        }
        Ok(dates)
    }
}

/// One manifest contact row. Fields map one-to-one onto [`CONTACT_COLUMNS`]
/// minus the VIN.
#[derive(Debug, Clone, Default)]
pub struct ContactRecord {
    pub vin: String,
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub service_type: String,
    pub dealer_code: String,
    pub dealer_name: String,
    pub delivery_date: String,
    pub reason: String,
    pub consent_email: String,
    pub consent_post: String,
    pub consent_phone: String,
    pub consent_sms: String,
    pub person_type: String,
    pub policy_description: String,
    pub confirmed_on: String,
}

impl ContactRecord {
    fn values(&self) -> [&str; 17] {
        [
            &self.vin,
            &self.customer_id,
            &self.first_name,
            &self.last_name,
            &self.email,
            &self.service_type,
            &self.dealer_code,
            &self.dealer_name,
            &self.delivery_date,
            &self.reason,
            &self.consent_email,
            &self.consent_post,
            &self.consent_phone,
            &self.consent_sms,
            &self.person_type,
            &self.policy_description,
            &self.confirmed_on,
        ]
    }
}

pub fn contacts_frame(records: &[ContactRecord]) -> Result<DataFrame> {
    let mut columns: Vec<Column> = Vec::with_capacity(CONTACT_COLUMNS.len());
    for (pos, name) in CONTACT_COLUMNS.iter().enumerate() {
        let series: Vec<String> = records
            .iter()
            .map(|record| record.values()[pos].to_string())
            .collect();
        columns.push(Column::new((*name).into(), series));
    }
    Ok(DataFrame::new(columns)?)
}

pub struct PgContactSource {
    pool: DbPool,
}

impl PgContactSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactSource for PgContactSource {
    async fn contacts(&self, vins: &[String]) -> Result<DataFrame> {
        if vins.is_empty() {
            return contacts_frame(&[]);
        }
        let rows = sqlx::query(
            "SELECT c.vin, c.customer_id, c.first_name, c.last_name, c.email, \
                    c.service_type, c.dealer_code, c.dealer_name, \
                    c.delivery_date, c.reason, c.consent_email, c.consent_post, \
                    c.consent_phone, c.consent_sms, c.person_type, \
                    c.policy_description, conf.confirmed_on \
             FROM customer_contacts c \
             LEFT JOIN delivery_confirmations conf ON conf.vin = c.vin \
             WHERE c.vin = ANY($1)",
        )
        .bind(vins)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| source_error("contact source", err))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let confirmed_on: Option<NaiveDate> = row.try_get("confirmed_on")?;
            records.push(ContactRecord {
                vin: row.try_get::<Option<String>, _>("vin")?.unwrap_or_default(),
                customer_id: text_field(&row, "customer_id")?,
                first_name: text_field(&row, "first_name")?,
                last_name: text_field(&row, "last_name")?,
                email: text_field(&row, "email")?,
                service_type: text_field(&row, "service_type")?,
                dealer_code: text_field(&row, "dealer_code")?,
                dealer_name: text_field(&row, "dealer_name")?,
                delivery_date: text_field(&row, "delivery_date")?,
                reason: text_field(&row, "reason")?,
                consent_email: text_field(&row, "consent_email")?,
                consent_post: text_field(&row, "consent_post")?,
                consent_phone: text_field(&row, "consent_phone")?,
                consent_sms: text_field(&row, "consent_sms")?,
                person_type: text_field(&row, "person_type")?,
                policy_description: text_field(&row, "policy_description")?,
                confirmed_on: confirmed_on
                    .map(|date| date.format("%d/%m/%Y").to_string())
                    .unwrap_or_default(),
            });
        }
        contacts_frame(&records)
    }
}

fn text_field(row: &sqlx::postgres::PgRow, name: &str) -> Result<String> {
    Ok(row.try_get::<Option<String>, _>(name)?.unwrap_or_default())
}

/// In-memory confirmation source for tests.
#[derive(Default)]
pub struct MemoryConfirmationSource {
    dates: HashMap<String, NaiveDate>,
}

impl MemoryConfirmationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm(&mut self, vin: &str, confirmed_on: NaiveDate) {
        self.dates.insert(vin.to_string(), confirmed_on);
    }
}

#[async_trait]
impl ConfirmationSource for MemoryConfirmationSource {
    async fn confirmed_vins(&self, vins: &[String]) -> Result<HashSet<String>> {
        Ok(vins
            .iter()
            .filter(|vin| self.dates.contains_key(*vin))
            .cloned()
            .collect())
    }

    async fn confirmation_dates(&self, vins: &[String]) -> Result<Vec<ConfirmationDate>> {
        Ok(vins
            .iter()
            .filter_map(|vin| {
                self.dates.get(vin).map(|confirmed_on| ConfirmationDate {
                    vin: vin.clone(),
                    confirmed_on: *confirmed_on,
                })
            })
            .collect())
    }
}

/// In-memory contact source for tests.
#[derive(Default)]
pub struct MemoryContactSource {
    records: Vec<ContactRecord>,
}

impl MemoryContactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: ContactRecord) {
        self.records.push(record);
    }
}

#[async_trait]
impl ContactSource for MemoryContactSource {
    async fn contacts(&self, vins: &[String]) -> Result<DataFrame> {
        let wanted: HashSet<&str> = vins.iter().map(String::as_str).collect();
        let hits: Vec<ContactRecord> = self
            .records
            .iter()
            .filter(|record| wanted.contains(record.vin.as_str()))
            .cloned()
            .collect();
        contacts_frame(&hits)
    }
}
