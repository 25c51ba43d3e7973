use polars::prelude::*;

use crate::error::Result;
use crate::types::{RuleConfig, CONSENT_CHANNELS, COL_SURVEY_AGREEMENT, COL_VEHICLE_TYPE, COL_VIN};

pub struct ConsentRuleOutcome {
    pub records: DataFrame,
    /// VINs whose survey agreement was flipped from N to Y.
    pub changed_vins: Vec<String>,
}

/// Flips the survey agreement from N to Y for private-use vehicles whose
/// owner consented on all four contact channels. Nothing else is touched:
/// a Y stays Y, and a missing flag stays missing.
pub fn apply(df: &DataFrame, rules: &RuleConfig) -> Result<ConsentRuleOutcome> {
    if df.height() == 0 {
        return Ok(ConsentRuleOutcome {
            records: df.clone(),
            changed_vins: Vec::new(),
        });
    }

    let mut agreement = Vec::with_capacity(df.height());
    let mut changed_vins = Vec::new();
    {
        let vins = df.column(COL_VIN)?.str()?;
        let vehicle_types = df.column(COL_VEHICLE_TYPE)?.str()?;
        let flags = df.column(COL_SURVEY_AGREEMENT)?.str()?;
        let channels: Vec<&StringChunked> = CONSENT_CHANNELS
            .iter()
            .map(|name| Ok(df.column(name)?.str()?))
            .collect::<Result<_>>()?;

        for idx in 0..df.height() {
            let current = flags.get(idx).unwrap_or("");
            let eligible = current == "N"
                && vehicle_types.get(idx).unwrap_or("") == rules.private_use_code
                && channels
                    .iter()
                    .all(|channel| channel.get(idx).unwrap_or("") == "Y");
            if eligible {
                changed_vins.push(vins.get(idx).unwrap_or("").to_string());
                agreement.push("Y".to_string());
            } else {
                agreement.push(current.to_string());
            }
        }
    }

    let mut records = df.clone();
    records.with_column(Series::new(COL_SURVEY_AGREEMENT.into(), agreement))?;
    Ok(ConsentRuleOutcome {
        records,
        changed_vins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(vehicle_type: &str, flag: &str, consents: [&str; 4]) -> DataFrame {
        df! {
            "vin" => ["VF1A"],
            "vehicle_type" => [vehicle_type],
            "survey_agreement" => [flag],
            "consent_email" => [consents[0]],
            "consent_post" => [consents[1]],
            "consent_phone" => [consents[2]],
            "consent_sms" => [consents[3]],
        }
        .unwrap()
    }

    #[test]
    fn full_consent_on_private_use_flips_the_flag() {
        let outcome = apply(
            &frame("VP", "N", ["Y", "Y", "Y", "Y"]),
            &RuleConfig::default(),
        )
        .unwrap();
        let flags = outcome.records.column("survey_agreement").unwrap().str().unwrap();
        assert_eq!(flags.get(0), Some("Y"));
        assert_eq!(outcome.changed_vins, vec!["VF1A".to_string()]);
    }

    #[test]
    fn one_missing_channel_leaves_the_flag_alone() {
        let outcome = apply(
            &frame("VP", "N", ["Y", "Y", "N", "Y"]),
            &RuleConfig::default(),
        )
        .unwrap();
        let flags = outcome.records.column("survey_agreement").unwrap().str().unwrap();
        assert_eq!(flags.get(0), Some("N"));
        assert!(outcome.changed_vins.is_empty());
    }

    #[test]
    fn public_service_vehicles_are_never_flipped() {
        let outcome = apply(
            &frame("VU", "N", ["Y", "Y", "Y", "Y"]),
            &RuleConfig::default(),
        )
        .unwrap();
        let flags = outcome.records.column("survey_agreement").unwrap().str().unwrap();
        assert_eq!(flags.get(0), Some("N"));
    }

    #[test]
    fn existing_yes_and_blank_flags_pass_through() {
        for flag in ["Y", ""] {
            let outcome = apply(
                &frame("VP", flag, ["Y", "Y", "Y", "Y"]),
                &RuleConfig::default(),
            )
            .unwrap();
            let flags = outcome.records.column("survey_agreement").unwrap().str().unwrap();
            assert_eq!(flags.get(0), Some(flag));
            assert!(outcome.changed_vins.is_empty());
        }
    }
}
