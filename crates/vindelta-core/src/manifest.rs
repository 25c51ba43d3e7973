// crates/vindelta-core/src/manifest.rs

use std::collections::{HashMap, HashSet};

use polars::prelude::*;

use crate::error::{PipelineError, Result};
use crate::sources::{ContactSource, CONTACT_COLUMNS};
use crate::types::{vin_list, ProvenanceTag, COL_VIN};

pub const MANIFEST_TAG_COLUMN: &str = "delivery_confirmed";
pub const MANIFEST_CONSENT_COLUMN: &str = "consent_rule_applied";

/// The five provenance partitions a run produces. Partitions must be
/// disjoint on VIN; [`tagged_vins`] refuses to emit a manifest otherwise.
pub struct ManifestPartitions<'a> {
    pub unconfirmed: &'a DataFrame,
    pub confirmed: &'a DataFrame,
    pub carried: &'a DataFrame,
    pub resend: &'a DataFrame,
    pub public_service: &'a DataFrame,
}

/// Flattens the partitions into one `(vin, tag)` list. A VIN showing up in
/// two partitions is a logic error upstream and aborts the run.
pub fn tagged_vins(partitions: &ManifestPartitions<'_>) -> Result<Vec<(String, ProvenanceTag)>> {
    let groups: [(&DataFrame, ProvenanceTag); 5] = [
        (partitions.unconfirmed, ProvenanceTag::NeverConfirmed),
        (partitions.confirmed, ProvenanceTag::Confirmed),
        (partitions.carried, ProvenanceTag::Resolved),
        (partitions.resend, ProvenanceTag::Resend),
        (partitions.public_service, ProvenanceTag::Confirmed),
    ];

    let mut tagged = Vec::new();
    let mut seen: HashMap<String, ProvenanceTag> = HashMap::new();
    for (df, tag) in groups {
        for vin in vin_list(df)? {
            match seen.get(&vin) {
                None => {
                    seen.insert(vin.clone(), tag);
                    tagged.push((vin, tag));
                }
                // the same row can legitimately repeat inside a partition
                Some(prior) if *prior == tag => {}
                Some(_) => return Err(PipelineError::DuplicateProvenance(vin)),
            }
        }
    }
    Ok(tagged)
}

/// Builds the reporting manifest: one row per VIN touched by the run, tagged
/// with its provenance, enriched with customer contact details, and marked
/// when the consent rule rewrote its survey agreement.
pub async fn assemble(
    partitions: &ManifestPartitions<'_>,
    contact_source: &dyn ContactSource,
    consent_changed: &[String],
) -> Result<DataFrame> {
    let tagged = tagged_vins(partitions)?;
    let vins: Vec<String> = tagged.iter().map(|(vin, _)| vin.clone()).collect();
    let contacts = contact_source.contacts(&vins).await?;

    let changed: HashSet<&str> = consent_changed.iter().map(String::as_str).collect();
    let contact_index: HashMap<String, usize> = {
        let contact_vins = contacts.column(COL_VIN)?.str()?;
        (0..contacts.height())
            .filter_map(|idx| contact_vins.get(idx).map(|vin| (vin.to_string(), idx)))
            .collect()
    };

    let mut vin_col = Vec::with_capacity(tagged.len());
    let mut tag_col = Vec::with_capacity(tagged.len());
    let mut consent_col = Vec::with_capacity(tagged.len());
    for (vin, tag) in &tagged {
        vin_col.push(vin.clone());
        tag_col.push(tag.as_str().to_string());
        consent_col.push(if changed.contains(vin.as_str()) { "Si" } else { "No" }.to_string());
    }

    let mut columns: Vec<Column> = vec![
        Column::new(COL_VIN.into(), vin_col),
        Column::new(MANIFEST_TAG_COLUMN.into(), tag_col),
        Column::new(MANIFEST_CONSENT_COLUMN.into(), consent_col),
    ];

    // contact details keyed by VIN; unknown VINs get blanks
    for name in CONTACT_COLUMNS.iter().filter(|name| **name != COL_VIN) {
        let source = contacts.column(name)?.str()?;
        let values: Vec<String> = tagged
            .iter()
            .map(|(vin, _)| {
                contact_index
                    .get(vin)
                    .and_then(|idx| source.get(*idx))
                    .unwrap_or("")
                    .to_string()
            })
            .collect();
        columns.push(Column::new((*name).into(), values));
    }

    Ok(DataFrame::new(columns)?)
}
