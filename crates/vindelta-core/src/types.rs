// crates/vindelta-core/src/types.rs

use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Natural key for every reconciliation step.
pub const COL_VIN: &str = "vin";

pub const COL_DELIVERY_DEALER: &str = "delivery_dealer_code";
pub const COL_SELLING_DEALER: &str = "selling_dealer_code";
pub const COL_VEHICLE_TYPE: &str = "vehicle_type";
pub const COL_DELIVERY_DATE: &str = "delivery_date";
pub const COL_VALID_FROM: &str = "valid_from_date";
pub const COL_LAST_UPDATE: &str = "last_update_ts";
pub const COL_SURVEY_AGREEMENT: &str = "survey_agreement";
pub const COL_SURVEY_AGREEMENT_DATE: &str = "survey_agreement_date";
pub const COL_CONSENT_EMAIL: &str = "consent_email";
pub const COL_CONSENT_POST: &str = "consent_post";
pub const COL_CONSENT_PHONE: &str = "consent_phone";
pub const COL_CONSENT_SMS: &str = "consent_sms";
pub const COL_PHONE_1: &str = "phone_1";
pub const COL_PHONE_2: &str = "phone_2";
pub const COL_CUSTOMER_EMAIL: &str = "customer_email";

/// Transient marker appended at ingestion and stripped before any sink write.
/// `"false"` for freshly ingested rows, `"true"` for rows rehydrated from the
/// delta queue.
pub const COL_PROCESSED: &str = "processed";

/// Canonical column order of the feed. Every frame that flows through the
/// pipeline carries exactly these columns (plus [`COL_PROCESSED`]), all Utf8.
pub const FEED_COLUMNS: [&str; 16] = [
    COL_VIN,
    COL_DELIVERY_DEALER,
    COL_SELLING_DEALER,
    COL_VEHICLE_TYPE,
    COL_DELIVERY_DATE,
    COL_VALID_FROM,
    COL_LAST_UPDATE,
    COL_SURVEY_AGREEMENT,
    COL_SURVEY_AGREEMENT_DATE,
    COL_CONSENT_EMAIL,
    COL_CONSENT_POST,
    COL_CONSENT_PHONE,
    COL_CONSENT_SMS,
    COL_PHONE_1,
    COL_PHONE_2,
    COL_CUSTOMER_EMAIL,
];

/// The four communication-consent channels evaluated by the consent rule.
pub const CONSENT_CHANNELS: [&str; 4] = [
    COL_CONSENT_EMAIL,
    COL_CONSENT_POST,
    COL_CONSENT_PHONE,
    COL_CONSENT_SMS,
];

/// Shared business-rule constants, passed into each component instead of
/// free-floating so the predicates stay testable in isolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Vehicle-type code for private-use vehicles ("VP").
    pub private_use_code: String,
    /// Vehicle-type code for public-service vehicles ("VU"); excluded from
    /// the outbound feed but still reported.
    pub public_service_code: String,
    /// Lookback window (days) on the confirmed-pending query.
    pub confirmation_lookback_days: i32,
    /// Maximum public-service entries resolved per run.
    pub public_service_batch_limit: i64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            private_use_code: "VP".to_string(),
            public_service_code: "VU".to_string(),
            confirmation_lookback_days: 30,
            public_service_batch_limit: 500,
        }
    }
}

/// Provenance tag stamped on every manifest entry. The rendered strings are
/// part of the report contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvenanceTag {
    /// Never confirmed; the record was queued for future runs.
    NeverConfirmed,
    /// Confirmed at ingestion, or via the public-service path.
    Confirmed,
    /// Resolved from the delta queue on a later run.
    Resolved,
    /// Re-flagged for inclusion by the resend-request source.
    Resend,
}

impl ProvenanceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceTag::NeverConfirmed => "No",
            ProvenanceTag::Confirmed => "Si",
            ProvenanceTag::Resolved => "Procesado",
            ProvenanceTag::Resend => "Reenvio",
        }
    }
}

impl fmt::Display for ProvenanceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies which carryover state transition failed, so the run report can
/// name the stage whose downstream consumers never received the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarryoverPhase {
    ConfirmedPending,
    PublicService,
    Resend,
}

impl fmt::Display for CarryoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CarryoverPhase::ConfirmedPending => "confirmed-pending",
            CarryoverPhase::PublicService => "public-service",
            CarryoverPhase::Resend => "resend",
        };
        f.write_str(name)
    }
}

/// An empty frame with the full record schema (feed columns + the transient
/// marker), used wherever an absent partition still needs a merge-compatible
/// shape.
pub fn empty_record_frame() -> DataFrame {
    let mut columns: Vec<Column> = Vec::with_capacity(FEED_COLUMNS.len() + 1);
    for name in FEED_COLUMNS {
        columns.push(Column::new(name.into(), Vec::<String>::new()));
    }
    columns.push(Column::new(COL_PROCESSED.into(), Vec::<String>::new()));
    DataFrame::new(columns).expect("empty record frame schema is fixed")
}

/// Extracts the VIN column as an owned list, skipping nulls.
pub fn vin_list(df: &DataFrame) -> Result<Vec<String>> {
    let vins = df.column(COL_VIN)?.str()?;
    Ok(vins.iter().flatten().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_tags_render_report_strings() {
        assert_eq!(ProvenanceTag::NeverConfirmed.as_str(), "No");
        assert_eq!(ProvenanceTag::Confirmed.as_str(), "Si");
        assert_eq!(ProvenanceTag::Resolved.as_str(), "Procesado");
        assert_eq!(ProvenanceTag::Resend.as_str(), "Reenvio");
    }

    #[test]
    fn empty_record_frame_has_full_schema() {
        let frame = empty_record_frame();
        assert_eq!(frame.width(), FEED_COLUMNS.len() + 1);
        assert_eq!(frame.height(), 0);
        assert!(frame.column(COL_PROCESSED).is_ok());
    }
}
