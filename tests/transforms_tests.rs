use std::collections::BTreeMap;

use basis_lab::io::CdsQuote;
use basis_lab::model::{Series, WideFrame};
use basis_lab::transforms::{
    align_weekly_returns, cds_wide_parspread, pct_change, resample_weekly_last, simple_returns,
};
use chrono::{NaiveDate, Weekday};

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, day).unwrap()
}

fn quote(date: NaiveDate, ticker: &str, spread: f64) -> CdsQuote {
    CdsQuote {
        date,
        ticker: ticker.to_string(),
        tenor: "5Y".to_string(),
        currency: "USD".to_string(),
        parspread: spread,
    }
}

#[test]
/// Verifies weekly resampling keeps the last finite value per week, labels
/// weeks by their Wednesday, and keeps empty weeks as NaN rows.
fn weekly_resample_keeps_last_finite_value() {
    // Mon 1 Jan .. Fri 26 Jan 2024, with the week ending 17 Jan left empty
    let dates = vec![d(1, 1), d(1, 2), d(1, 3), d(1, 4), d(1, 5), d(1, 19), d(1, 26)];
    let mut cols = BTreeMap::new();
    cols.insert("X".to_string(), vec![1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0, 7.0]);
    let frame = WideFrame::from_columns(dates, cols).unwrap();

    let weekly = resample_weekly_last(&frame, Weekday::Wed).unwrap();
    assert_eq!(weekly.dates(), &[d(1, 3), d(1, 10), d(1, 17), d(1, 24), d(1, 31)]);
    let x = weekly.column("X").unwrap();
    assert_eq!(x[0], 2.0);
    assert_eq!(x[1], 5.0);
    assert!(x[2].is_nan());
    assert_eq!(x[3], 6.0);
    assert_eq!(x[4], 7.0);
}

#[test]
/// Verifies a missing level is forward-filled before the return is taken,
/// and a zero previous level gives NaN.
fn returns_forward_fill_missing_levels() {
    let r = pct_change(&[2.0, 0.0, 1.0, 1.5]);
    assert!(r[0].is_nan());
    assert_eq!(r[1], -1.0);
    assert!(r[2].is_nan());
    assert!((r[3] - 0.5).abs() < 1e-12);

    let bridged = pct_change(&[100.0, f64::NAN, f64::NAN, 120.0]);
    assert_eq!(&bridged[1..3], &[0.0, 0.0]);
    assert!((bridged[3] - 0.2).abs() < 1e-12);

    let mut cols = BTreeMap::new();
    cols.insert("Y".to_string(), vec![100.0, 110.0]);
    let frame = WideFrame::from_columns(vec![d(2, 7), d(2, 14)], cols).unwrap();
    let ret = simple_returns(&frame);
    assert!((ret.column("Y").unwrap()[1] - 0.1).abs() < 1e-12);
}

#[test]
/// Verifies long quotes pivot to one column per ticker and duplicates are rejected.
fn cds_quotes_pivot_and_reject_duplicates() {
    let quotes = vec![
        quote(d(3, 1), "AAA", 100.0),
        quote(d(3, 1), "BBB", 200.0),
        quote(d(3, 4), "AAA", 101.0),
    ];
    let wide = cds_wide_parspread(&quotes).unwrap();
    assert_eq!(wide.column_names(), vec!["AAA", "BBB"]);
    assert_eq!(wide.dates(), &[d(3, 1), d(3, 4)]);
    assert!(wide.column("BBB").unwrap()[1].is_nan());

    let mut dup = quotes.clone();
    dup.push(quote(d(3, 1), "AAA", 99.0));
    assert!(cds_wide_parspread(&dup).is_err());
}

#[test]
/// Verifies alignment keeps only the weeks all three return sets share.
fn alignment_intersects_dates() {
    let mut cds_cols = BTreeMap::new();
    cds_cols.insert("AAA".to_string(), vec![0.1, 0.2, 0.3]);
    let cds = WideFrame::from_columns(vec![d(1, 3), d(1, 10), d(1, 17)], cds_cols).unwrap();
    let mut eq_cols = BTreeMap::new();
    eq_cols.insert("AAA".to_string(), vec![1.0, 2.0, 3.0]);
    let eq = WideFrame::from_columns(vec![d(1, 10), d(1, 17), d(1, 24)], eq_cols).unwrap();
    let market = Series::new("m", vec![d(1, 3), d(1, 17), d(1, 24)], vec![5.0, 6.0, 7.0]);

    let (cds, eq, market) = align_weekly_returns(&cds, &eq, &market);
    assert_eq!(cds.dates(), &[d(1, 17)]);
    assert_eq!(eq.dates(), &[d(1, 17)]);
    assert_eq!(market.dates, vec![d(1, 17)]);
    assert_eq!(cds.column("AAA").unwrap(), &[0.3]);
    assert_eq!(eq.column("AAA").unwrap(), &[2.0]);
    assert_eq!(market.values, vec![6.0]);
}
