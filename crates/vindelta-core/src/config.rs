use std::env;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};
use crate::types::RuleConfig;

/// Runtime settings for one batch run, read from the environment. The binary
/// loads `.env` before calling [`Settings::from_env`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path the ingested feed is read from.
    pub feed_path: PathBuf,
    /// Path the corrected outbound feed is written to. Defaults to the feed
    /// path: the corrected file replaces the ingested one.
    pub outbound_path: PathBuf,
    /// Path the reporting manifest is written to.
    pub manifest_path: PathBuf,
    /// Directory receiving the timestamped backup of the ingested set.
    pub backup_dir: PathBuf,
    pub rules: RuleConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let feed_path = PathBuf::from(env::var("VINDELTA_FEED_PATH")?);
        let outbound_path = env::var("VINDELTA_OUTBOUND_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| feed_path.clone());
        let manifest_path = PathBuf::from(env::var("VINDELTA_MANIFEST_PATH")?);
        let backup_dir = PathBuf::from(env::var("VINDELTA_BACKUP_DIR")?);

        let mut rules = RuleConfig::default();
        if let Ok(days) = env::var("VINDELTA_LOOKBACK_DAYS") {
            rules.confirmation_lookback_days = parse_env("VINDELTA_LOOKBACK_DAYS", &days)?;
        }
        if let Ok(limit) = env::var("VINDELTA_PUBLIC_BATCH_LIMIT") {
            rules.public_service_batch_limit = parse_env("VINDELTA_PUBLIC_BATCH_LIMIT", &limit)?;
        }

        Ok(Self {
            feed_path,
            outbound_path,
            manifest_path,
            backup_dir,
            rules,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        PipelineError::Validation(format!("{name} must be a number, got '{raw}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_rejects_garbage() {
        let parsed: Result<i32> = parse_env("VINDELTA_LOOKBACK_DAYS", "soon");
        assert!(parsed.is_err());
        let parsed: i32 = parse_env("VINDELTA_LOOKBACK_DAYS", "45").unwrap();
        assert_eq!(parsed, 45);
    }
}
