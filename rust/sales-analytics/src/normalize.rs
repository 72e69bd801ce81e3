//! Post-processing for rows read back from the store.
//!
//! Every aggregate is selected as text so the numeric contract lives here:
//! values are parsed explicitly, parse failures become zero, and ratio
//! fields are rendered as fixed-decimal strings.

use std::collections::HashMap;

/// Parses a driver value as a float, defaulting to `0.0`.
pub fn float_or_zero(raw: Option<&str>) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Parses a driver value as a float, keeping SQL NULL as `None`.
pub fn float_or_null(raw: Option<&str>) -> Option<f64> {
    raw.map(|value| float_or_zero(Some(value)))
}

/// Parses a driver value as an integer, defaulting to `0`. Decimal text such
/// as `"12.00"` is truncated toward zero.
pub fn int_or_zero(raw: Option<&str>) -> i64 {
    let Some(value) = raw.map(str::trim) else {
        return 0;
    };
    value
        .parse::<i64>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|parsed| parsed.is_finite())
                .map(|parsed| parsed.trunc() as i64)
        })
        .unwrap_or(0)
}

/// Renders `value` with exactly `decimals` fractional digits, rounding ties
/// away from zero. A negative value keeps its sign even when it rounds to
/// zero, so `-0.001` renders as `"-0.00"`.
pub fn fixed(value: f64, decimals: usize) -> String {
    let magnitude = round_half_up(value.abs(), decimals);
    let rendered = format!("{:.*}", decimals, magnitude);
    if value < 0.0 {
        format!("-{rendered}")
    } else {
        rendered
    }
}

fn round_half_up(magnitude: f64, decimals: usize) -> f64 {
    let Ok(exponent) = i32::try_from(decimals) else {
        return magnitude;
    };
    let factor = 10f64.powi(exponent);
    let scaled = magnitude * factor;
    if scaled.is_finite() && factor.is_finite() {
        scaled.round() / factor
    } else {
        magnitude
    }
}

/// Parse-or-zero followed by two-decimal rendering.
pub fn decimal_string(raw: Option<&str>) -> String {
    fixed(float_or_zero(raw), 2)
}

/// Percentage with one decimal and a literal `%` suffix, e.g. `"99.5%"`.
pub fn percent_label(value: f64) -> String {
    format!("{}%", fixed(value, 1))
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `numerator / denominator`, or `None` when the denominator is zero.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// `(current - previous) / previous * 100` rounded to two decimals. A zero or
/// missing previous value yields `None`.
pub fn percent_delta(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let previous = previous?;
    let current = current?;
    ratio(current - previous, previous).map(|delta| round_to(delta * 100.0, 2))
}

/// Emits one row per label in `labels`, in that order, taking the matching
/// row from `rows` when present and `empty(label)` otherwise. Rows whose label
/// is not in the fixed list are dropped.
pub fn complete_bins<T, L, E>(labels: &[&str], rows: Vec<T>, label_of: L, empty: E) -> Vec<T>
where
    L: Fn(&T) -> &str,
    E: Fn(&str) -> T,
{
    let mut by_label: HashMap<String, T> = rows
        .into_iter()
        .map(|row| (label_of(&row).to_string(), row))
        .collect();

    labels
        .iter()
        .map(|label| by_label.remove(*label).unwrap_or_else(|| empty(*label)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn driver_strings_are_parsed_or_zeroed() {
        assert_eq!(float_or_zero(Some("600.00")), 600.0);
        assert_eq!(float_or_zero(Some(" 12.5 ")), 12.5);
        assert_eq!(float_or_zero(Some("NaN")), 0.0);
        assert_eq!(float_or_zero(Some("abc")), 0.0);
        assert_eq!(float_or_zero(None), 0.0);
        assert_eq!(float_or_null(None), None);
        assert_eq!(float_or_null(Some("7.25")), Some(7.25));
    }

    #[test]
    fn integers_accept_numeric_text() {
        assert_eq!(int_or_zero(Some("42")), 42);
        assert_eq!(int_or_zero(Some("12.00")), 12);
        assert_eq!(int_or_zero(Some("")), 0);
        assert_eq!(int_or_zero(None), 0);
    }

    #[test]
    fn formatting_literals() {
        assert_eq!(fixed(100.0 / 3.0, 2), "33.33");
        assert_eq!(decimal_string(Some("1500")), "1500.00");
        assert_eq!(decimal_string(Some("25")), "25.00");
        assert_eq!(decimal_string(None), "0.00");
        assert_eq!(percent_label(100.0), "100.0%");
        assert_eq!(percent_label(99.5), "99.5%");
    }

    #[test]
    fn ties_round_away_from_zero() {
        assert_eq!(decimal_string(Some("1.1250000000000000")), "1.13");
        assert_eq!(percent_label(99.25), "99.3%");
        assert_eq!(fixed(0.125, 2), "0.13");
        assert_eq!(fixed(2.5, 0), "3");
        assert_eq!(fixed(-1.125, 2), "-1.13");
        assert_eq!(fixed(1.005, 2), "1.00");
        assert_eq!(fixed(18.456, 2), "18.46");
    }

    #[test]
    fn negative_values_keep_their_sign() {
        assert_eq!(fixed(-0.001, 2), "-0.00");
        assert_eq!(fixed(-0.0, 2), "0.00");
        assert_eq!(fixed(-12.5, 1), "-12.5");
        assert_eq!(decimal_string(Some("-3.333")), "-3.33");
    }

    #[test]
    fn delta_is_null_when_previous_is_zero() {
        assert_eq!(percent_delta(Some(600.0), Some(0.0)), None);
        assert_eq!(percent_delta(Some(600.0), None), None);
        assert_eq!(percent_delta(None, Some(100.0)), None);
        assert_eq!(percent_delta(Some(150.0), Some(100.0)), Some(50.0));
        assert_eq!(percent_delta(Some(200.0), Some(300.0)), Some(-33.33));
    }

    #[test]
    fn bins_are_completed_in_fixed_order() {
        let labels = ["$0-500", "$500-1K", "$1K-2K", "$2K-3K", "$3K+"];
        let rows = vec![("$3K+", 4), ("$0-500", 2)];
        let completed = complete_bins(&labels, rows, |row| row.0, |label| {
            (labels.iter().find(|l| **l == label).copied().unwrap(), 0)
        });
        assert_eq!(
            completed,
            vec![
                ("$0-500", 2),
                ("$500-1K", 0),
                ("$1K-2K", 0),
                ("$2K-3K", 0),
                ("$3K+", 4)
            ]
        );
    }

    #[test]
    fn unknown_bin_labels_are_dropped() {
        let labels = ["1-3", "4-6"];
        let rows = vec![("unexpected".to_string(), 9)];
        let completed = complete_bins(&labels, rows, |row| row.0.as_str(), |label| {
            (label.to_string(), 0)
        });
        assert_eq!(
            completed,
            vec![("1-3".to_string(), 0), ("4-6".to_string(), 0)]
        );
    }
}
