use std::collections::HashSet;

use polars::prelude::*;

use crate::error::Result;
use crate::types::COL_VIN;

/// The ingested feed split against the confirmation source.
pub struct Partition {
    /// Rows whose VIN has no delivery confirmation yet. These are queued.
    pub unconfirmed: DataFrame,
    /// Rows whose VIN is already confirmed. These go straight out.
    pub confirmed: DataFrame,
}

pub fn partition_by_confirmation(
    df: &DataFrame,
    confirmed_vins: &HashSet<String>,
) -> Result<Partition> {
    let flags: Vec<bool> = {
        let vins = df.column(COL_VIN)?.str()?;
        (0..df.height())
            .map(|idx| confirmed_vins.contains(vins.get(idx).unwrap_or("")))
            .collect()
    };
    let confirmed_mask = BooleanChunked::from_slice("confirmed".into(), &flags);
    let confirmed = df.filter(&confirmed_mask)?;

    let inverted: Vec<bool> = flags.iter().map(|flag| !flag).collect();
    let unconfirmed_mask = BooleanChunked::from_slice("unconfirmed".into(), &inverted);
    let unconfirmed = df.filter(&unconfirmed_mask)?;

    Ok(Partition {
        unconfirmed,
        confirmed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_land_exactly_once() {
        let df = df! {
            "vin" => ["VF1A", "VF1B", "VF1C"],
            "vehicle_type" => ["VP", "VP", "VU"],
        }
        .unwrap();
        let confirmed: HashSet<String> = ["VF1B".to_string()].into_iter().collect();

        let partition = partition_by_confirmation(&df, &confirmed).unwrap();
        assert_eq!(partition.confirmed.height(), 1);
        assert_eq!(partition.unconfirmed.height(), 2);
        let vins = partition.confirmed.column("vin").unwrap().str().unwrap();
        assert_eq!(vins.get(0), Some("VF1B"));
    }

    #[test]
    fn empty_confirmation_set_leaves_everything_unconfirmed() {
        let df = df! { "vin" => ["VF1A"] }.unwrap();
        let partition = partition_by_confirmation(&df, &HashSet::new()).unwrap();
        assert_eq!(partition.unconfirmed.height(), 1);
        assert_eq!(partition.confirmed.height(), 0);
    }
}
