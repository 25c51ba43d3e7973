use std::collections::HashMap;

use polars::prelude::*;

use crate::error::Result;
use crate::sources::ConfirmationDate;
use crate::types::{
    COL_DELIVERY_DATE, COL_LAST_UPDATE, COL_SURVEY_AGREEMENT_DATE, COL_VALID_FROM, COL_VIN,
};

/// Overlays dealer-confirmed dates onto outbound rows. Where the dealer
/// reported a date it wins over whatever the feed carried; VINs the dealer
/// never reported keep their feed values untouched.
pub fn overlay_confirmation_dates(
    df: &DataFrame,
    dates: &[ConfirmationDate],
) -> Result<DataFrame> {
    if df.height() == 0 || dates.is_empty() {
        return Ok(df.clone());
    }
    let by_vin: HashMap<&str, &ConfirmationDate> =
        dates.iter().map(|date| (date.vin.as_str(), date)).collect();

    let mut delivery = Vec::with_capacity(df.height());
    let mut valid_from = Vec::with_capacity(df.height());
    let mut survey_date = Vec::with_capacity(df.height());
    let mut last_update = Vec::with_capacity(df.height());
    {
        let vins = df.column(COL_VIN)?.str()?;
        let feed_delivery = df.column(COL_DELIVERY_DATE)?.str()?;
        let feed_valid_from = df.column(COL_VALID_FROM)?.str()?;
        let feed_survey = df.column(COL_SURVEY_AGREEMENT_DATE)?.str()?;
        let feed_update = df.column(COL_LAST_UPDATE)?.str()?;

        for idx in 0..df.height() {
            match vins.get(idx).and_then(|vin| by_vin.get(vin)) {
                Some(confirmed) => {
                    delivery.push(confirmed.date_string());
                    valid_from.push(confirmed.date_string());
                    survey_date.push(confirmed.date_string());
                    last_update.push(confirmed.datetime_string());
                }
                None => {
                    delivery.push(feed_delivery.get(idx).unwrap_or("").to_string());
                    valid_from.push(feed_valid_from.get(idx).unwrap_or("").to_string());
                    survey_date.push(feed_survey.get(idx).unwrap_or("").to_string());
                    last_update.push(feed_update.get(idx).unwrap_or("").to_string());
                }
            }
        }
    }

    let mut out = df.clone();
    out.with_column(Series::new(COL_DELIVERY_DATE.into(), delivery))?;
    out.with_column(Series::new(COL_VALID_FROM.into(), valid_from))?;
    out.with_column(Series::new(COL_SURVEY_AGREEMENT_DATE.into(), survey_date))?;
    out.with_column(Series::new(COL_LAST_UPDATE.into(), last_update))?;
    Ok(out)
}
