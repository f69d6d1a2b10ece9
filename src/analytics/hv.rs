// src/analytics/hv.rs
//
// Realized-volatility estimation from an underlying's historical closes.
//
// Recomputed from the full series on every build; there is no incremental
// state to get out of sync.

use crate::models::{date_int, HistoricalPricePoint, VolatilityEstimate};
use std::collections::BTreeMap;

/// Sigma used when an underlying has no usable history.
pub const DEFAULT_VOL: f64 = 0.3;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Estimates HV30/HV90/HV252 for one underlying from the shared historical
/// table.
///
/// Rows are matched on exact identity, deduplicated by date (latest record
/// wins), sorted ascending, and reduced to log returns between consecutive
/// positive closes. HV30 needs at least 30 returns and HV90 at least 90;
/// HV252 is defined from the full return set whenever one return exists.
/// `selected` averages whichever estimates are defined, falling back to
/// `DEFAULT_VOL` when none are.
pub fn estimate(series: &[HistoricalPricePoint], underlying_id: &str) -> VolatilityEstimate {
    let wanted = underlying_id.trim();

    // Dedup by normalized date; the BTreeMap doubles as the ascending sort.
    let mut by_date: BTreeMap<u32, Option<f64>> = BTreeMap::new();
    for point in series {
        if point.id.trim() != wanted {
            continue;
        }
        if let Some(d) = date_int(&point.date) {
            by_date.insert(d, point.last);
        }
    }

    let prices: Vec<f64> = by_date
        .values()
        .filter_map(|p| *p)
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();

    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    if returns.is_empty() {
        return VolatilityEstimate::fallback();
    }

    let hv30 = trailing_vol(&returns, 30);
    let hv90 = trailing_vol(&returns, 90);
    let hv252 = Some(annualized(&returns));

    let defined: Vec<f64> = [hv30, hv90, hv252].into_iter().flatten().collect();
    let selected = if defined.is_empty() {
        DEFAULT_VOL
    } else {
        defined.iter().sum::<f64>() / defined.len() as f64
    };

    VolatilityEstimate {
        hv30,
        hv90,
        hv252,
        selected,
    }
}

/// Annualized vol over the trailing `window` returns; `None` when the
/// series is shorter than the window.
fn trailing_vol(returns: &[f64], window: usize) -> Option<f64> {
    if returns.len() < window {
        return None;
    }
    Some(annualized(&returns[returns.len() - window..]))
}

fn annualized(returns: &[f64]) -> f64 {
    sample_std_dev(returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Sample standard deviation (n−1 denominator); 0.0 for a single value.
fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(id: &str, prices: &[f64]) -> Vec<HistoricalPricePoint> {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| HistoricalPricePoint {
                id: id.to_string(),
                date: (start + chrono::Duration::days(i as i64))
                    .format("%Y%m%d")
                    .to_string(),
                last: Some(*p),
            })
            .collect()
    }

    #[test]
    fn test_flat_series_yields_zero_vol() {
        let series = points("U1", &vec![100.0; 252]);
        let est = estimate(&series, "U1");
        assert_eq!(est.hv30, Some(0.0));
        assert_eq!(est.hv90, Some(0.0));
        assert_eq!(est.hv252, Some(0.0));
        assert_eq!(est.selected, 0.0);
    }

    #[test]
    fn test_window_requirements() {
        // 30 prices → 29 returns: below the HV30 threshold.
        let est = estimate(&points("U1", &vec![100.0; 30]), "U1");
        assert!(est.hv30.is_none());
        assert!(est.hv90.is_none());
        assert!(est.hv252.is_some());

        // 31 prices → 30 returns: HV30 defined, HV90 still not.
        let est = estimate(&points("U1", &vec![100.0; 31]), "U1");
        assert!(est.hv30.is_some());
        assert!(est.hv90.is_none());

        // 91 prices → 90 returns.
        let est = estimate(&points("U1", &vec![100.0; 91]), "U1");
        assert!(est.hv90.is_some());
    }

    #[test]
    fn test_single_return_defines_hv252() {
        let est = estimate(&points("U1", &[100.0, 105.0]), "U1");
        assert!(est.hv252.is_some());
        // With one return the sample deviation degenerates to zero.
        assert_eq!(est.hv252, Some(0.0));
        assert_eq!(est.selected, 0.0);
    }

    #[test]
    fn test_no_history_falls_back() {
        let est = estimate(&[], "U1");
        assert!(est.hv30.is_none() && est.hv90.is_none() && est.hv252.is_none());
        assert_eq!(est.selected, DEFAULT_VOL);

        // Rows for a different identity do not count.
        let est = estimate(&points("OTHER", &vec![100.0; 60]), "U1");
        assert_eq!(est.selected, DEFAULT_VOL);
    }

    #[test]
    fn test_duplicate_dates_latest_wins_and_bad_prices_drop() {
        let mut series = points("U1", &[100.0, 110.0, 121.0]);
        // Re-report the middle date with a different close: it replaces the
        // earlier record instead of adding a row.
        series.push(HistoricalPricePoint {
            id: "U1".into(),
            date: "20240102".into(),
            last: Some(105.0),
        });
        // Non-positive and missing closes vanish before returns are taken.
        series.push(HistoricalPricePoint {
            id: "U1".into(),
            date: "20240104".into(),
            last: Some(-5.0),
        });
        series.push(HistoricalPricePoint {
            id: "U1".into(),
            date: "20240105".into(),
            last: None,
        });

        let est = estimate(&series, "U1");
        // Three surviving prices → two returns, ln(105/100) and ln(121/105).
        assert!(est.hv252.is_some());
        let expected = sample_std_dev(&[(105.0f64 / 100.0).ln(), (121.0f64 / 105.0).ln()])
            * TRADING_DAYS_PER_YEAR.sqrt();
        assert!((est.hv252.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_known_vol_magnitude() {
        // Alternating ±1% moves give a stable, strictly positive estimate.
        let mut prices = Vec::with_capacity(253);
        let mut p = 100.0;
        prices.push(p);
        for i in 0..252 {
            p *= if i % 2 == 0 { 1.01 } else { 0.99 };
            prices.push(p);
        }
        let est = estimate(&points("U1", &prices), "U1");
        let hv252 = est.hv252.unwrap();
        assert!(hv252 > 0.10 && hv252 < 0.25, "hv252: {}", hv252);
        assert!(est.selected > 0.0);
    }
}
