use polars::prelude::*;

use crate::error::Result;
use crate::types::{COL_DELIVERY_DEALER, COL_PHONE_1, COL_PHONE_2, COL_SELLING_DEALER};

/// Columns that carry integer codes but arrive as text. Upstream exports run
/// them through a float stage, so "3104" shows up as "3104.0".
const INTEGER_CODED_COLUMNS: [&str; 4] = [
    COL_PHONE_1,
    COL_PHONE_2,
    COL_DELIVERY_DEALER,
    COL_SELLING_DEALER,
];

/// Replaces nulls with empty strings across the whole frame and strips the
/// trailing `.0` float artifact from integer-coded columns.
pub fn normalize(df: &DataFrame) -> Result<DataFrame> {
    let mut out = df.clone();
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    for name in names {
        let integer_coded = INTEGER_CODED_COLUMNS.contains(&name.as_str());
        let cleaned: Vec<String> = {
            let values = out.column(&name)?.str()?;
            values
                .iter()
                .map(|value| clean_value(value, integer_coded))
                .collect()
        };
        out.with_column(Series::new(name.as_str().into(), cleaned))?;
    }
    Ok(out)
}

fn clean_value(value: Option<&str>, integer_coded: bool) -> String {
    let Some(raw) = value else {
        return String::new();
    };
    if integer_coded {
        strip_float_artifact(raw).to_string()
    } else {
        raw.to_string()
    }
}

/// "3104.0" -> "3104". Anything that is not digits-dot-zeros is left alone,
/// so formatted numbers like "31.04" or free text survive untouched.
fn strip_float_artifact(raw: &str) -> &str {
    match raw.split_once('.') {
        Some((head, tail))
            if !head.is_empty()
                && !tail.is_empty()
                && head.chars().all(|c| c.is_ascii_digit())
                && tail.chars().all(|c| c == '0') =>
        {
            head
        }
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_artifacts_are_stripped() {
        assert_eq!(strip_float_artifact("3104.0"), "3104");
        assert_eq!(strip_float_artifact("3104.000"), "3104");
        assert_eq!(strip_float_artifact("31.04"), "31.04");
        assert_eq!(strip_float_artifact("3104"), "3104");
        assert_eq!(strip_float_artifact(".0"), ".0");
        assert_eq!(strip_float_artifact("abc.0"), "abc.0");
    }

    #[test]
    fn nulls_become_empty_strings() {
        let df = df! {
            "vin" => [Some("VF1A"), None],
            "phone_1" => [Some("660001122.0"), None],
        }
        .unwrap();

        let out = normalize(&df).unwrap();
        let vins = out.column("vin").unwrap().str().unwrap();
        assert_eq!(vins.get(1), Some(""));
        let phones = out.column("phone_1").unwrap().str().unwrap();
        assert_eq!(phones.get(0), Some("660001122"));
        assert_eq!(phones.get(1), Some(""));
    }
}
