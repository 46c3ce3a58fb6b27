use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::error::LabError;
use crate::io::cds::CdsQuote;
use crate::model::{Series, WideFrame};

/// The week-ending date for `date` when weeks close on `anchor`.
///
/// A date that already falls on the anchor weekday is its own week end.
pub fn anchor_date(date: NaiveDate, anchor: Weekday) -> NaiveDate {
    let today = date.weekday().num_days_from_monday() as i64;
    let target = anchor.num_days_from_monday() as i64;
    date + Duration::days((target - today).rem_euclid(7))
}

/// Weekly resample keeping the last finite value of each column per week.
///
/// The output covers every week from the first to the last anchor date,
/// so a week with no data is present and NaN.
pub fn resample_weekly_last(frame: &WideFrame, anchor: Weekday) -> Result<WideFrame, LabError> {
    let (Some(first), Some(last)) = (frame.first_date(), frame.last_date()) else {
        return Ok(WideFrame::default());
    };
    let start = anchor_date(first, anchor);
    let end = anchor_date(last, anchor);
    let weeks: Vec<NaiveDate> = std::iter::successors(Some(start), |d| {
        let next = *d + Duration::days(7);
        (next <= end).then_some(next)
    })
    .collect();
    let slot: BTreeMap<NaiveDate, usize> = weeks.iter().enumerate().map(|(i, d)| (*d, i)).collect();
    let row_slots: Vec<usize> = frame
        .dates()
        .iter()
        .map(|d| slot[&anchor_date(*d, anchor)])
        .collect();

    let columns = frame
        .columns()
        .map(|(name, values)| {
            let mut out = vec![f64::NAN; weeks.len()];
            for (row, value) in values.iter().enumerate() {
                if value.is_finite() {
                    out[row_slots[row]] = *value;
                }
            }
            (name.to_string(), out)
        })
        .collect();
    WideFrame::from_columns(weeks, columns)
}

/// `x[t] / x[t-1] - 1` over the forward-filled series.
///
/// Gaps carry the last finite level forward, so a missing week reads as a
/// flat return and the next quote is measured against the last one seen.
/// Leading gaps and a zero previous level stay NaN.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    let mut last: Option<f64> = None;
    for (t, &cur) in values.iter().enumerate() {
        let filled = if cur.is_finite() { Some(cur) } else { last };
        if t > 0 {
            if let (Some(prev), Some(now)) = (last, filled) {
                if prev != 0.0 {
                    out[t] = now / prev - 1.0;
                }
            }
        }
        last = filled;
    }
    out
}

pub fn simple_returns(frame: &WideFrame) -> WideFrame {
    frame.map_columns(pct_change)
}

/// Lags a series by `periods`; the first `periods` values become NaN.
pub fn shift(values: &[f64], periods: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if periods < n {
        out[periods..].copy_from_slice(&values[..n - periods]);
    }
    out
}

/// Pivots long CDS quotes into a date × ticker par-spread frame.
///
/// A repeated (date, ticker) pair is rejected rather than silently resolved.
pub fn cds_wide_parspread(quotes: &[CdsQuote]) -> Result<WideFrame, LabError> {
    let mut seen: BTreeSet<(NaiveDate, &str)> = BTreeSet::new();
    let mut observations: BTreeMap<String, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    for quote in quotes {
        if !seen.insert((quote.date, quote.ticker.as_str())) {
            return Err(LabError::Validation(format!(
                "duplicate CDS quote for {} on {}",
                quote.ticker, quote.date
            )));
        }
        observations
            .entry(quote.ticker.clone())
            .or_default()
            .push((quote.date, quote.parspread));
    }
    Ok(WideFrame::from_observations(&observations))
}

/// Restricts the three return sets to their common dates.
pub fn align_weekly_returns(
    cds_ret: &WideFrame,
    eq_ret: &WideFrame,
    market_ret: &Series,
) -> (WideFrame, WideFrame, Series) {
    let eq_dates: BTreeSet<NaiveDate> = eq_ret.dates().iter().copied().collect();
    let market_dates: BTreeSet<NaiveDate> = market_ret.dates.iter().copied().collect();
    let common: BTreeSet<NaiveDate> = cds_ret
        .dates()
        .iter()
        .copied()
        .filter(|d| eq_dates.contains(d) && market_dates.contains(d))
        .collect();

    let cds = cds_ret.take_rows(&positions(cds_ret.dates(), &common));
    let eq = eq_ret.take_rows(&positions(eq_ret.dates(), &common));
    let keep = positions(&market_ret.dates, &common);
    let market = Series::new(
        market_ret.name.clone(),
        keep.iter().map(|&i| market_ret.dates[i]).collect(),
        keep.iter().map(|&i| market_ret.values[i]).collect(),
    );
    (cds, eq, market)
}

fn positions(dates: &[NaiveDate], keep: &BTreeSet<NaiveDate>) -> Vec<usize> {
    dates
        .iter()
        .enumerate()
        .filter(|(_, d)| keep.contains(d))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_rolls_forward_to_wednesday() {
        let mon = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let wed = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let thu = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        assert_eq!(anchor_date(mon, Weekday::Wed), wed);
        assert_eq!(anchor_date(wed, Weekday::Wed), wed);
        assert_eq!(anchor_date(thu, Weekday::Wed), NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[test]
    fn shift_lags_by_one() {
        let out = shift(&[1.0, 2.0, 3.0], 1);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.0, 2.0]);
        assert!(shift(&[1.0], 3)[0].is_nan());
    }

    #[test]
    fn pct_change_bridges_gaps_with_last_level() {
        let out = pct_change(&[100.0, f64::NAN, 110.0, 121.0]);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 0.1).abs() < 1e-12);
        assert!((out[3] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn pct_change_keeps_leading_gaps() {
        let out = pct_change(&[f64::NAN, f64::NAN, 50.0, 55.0]);
        assert!(out[0].is_nan() && out[1].is_nan() && out[2].is_nan());
        assert!((out[3] - 0.1).abs() < 1e-12);
    }
}
