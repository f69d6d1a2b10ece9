// src/analytics/iv_history.rs
//
// Builds the per-contract implied-volatility time series by pricing each
// historical close against the contract's *current* strike and expiry.
// Contract terms are assumed static over the contract's life; historical
// rows dated at or after the current expiry are excluded.
//
// Gated on the high-water-mark date of the historical option table: the
// build only re-runs when a date beyond the recorded mark shows up.

use crate::analytics::{SkipReason, SkipTally};
use crate::cache::{BuildCache, HighWaterMarkGate};
use crate::models::{
    date_int, parse_date, HistoricalPricePoint, IvHistoryRecord, LiveContractRecord, OptionKind,
};
use crate::pricing::black_scholes::fair_value;
use crate::pricing::{implied_vol, IvBracket};
use crate::store::{read_table, write_table};
use crate::traits::{Stage, StageError, StageReport};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Input tables and the output artifact of the IV-history build.
#[derive(Debug, Clone)]
pub struct IvHistoryPaths {
    pub live_contracts: PathBuf,
    pub option_history: PathBuf,
    pub underlying_history: PathBuf,
    pub artifact: PathBuf,
}

/// Current terms of one contract, keyed by contract identity.
struct ContractTerms {
    strike: f64,
    expiry: NaiveDate,
    kind: OptionKind,
    underlying_id: String,
}

/// The IV-history builder and the owner of its artifact.
pub struct IvHistoryBuilder {
    paths: IvHistoryPaths,
    rate: f64,
    cache: BuildCache<IvHistoryRecord>,
}

impl IvHistoryBuilder {
    pub fn new(paths: IvHistoryPaths, rate: f64) -> Self {
        Self {
            paths,
            rate,
            cache: BuildCache::new(),
        }
    }

    /// Latest built (or reloaded) series for API readers.
    pub fn snapshot(&self) -> Option<Arc<Vec<IvHistoryRecord>>> {
        self.cache.get()
    }

    /// Runs one build cycle.
    pub fn build(&self) -> Result<StageReport, StageError> {
        let option_history = read_table::<HistoricalPricePoint>(&self.paths.option_history)?;
        let input_max = option_history
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|p| date_int(&p.date))
            .max();

        let gate = HighWaterMarkGate::new(&self.paths.artifact);
        if !gate.is_stale(input_max) {
            let rows = read_table::<IvHistoryRecord>(&self.paths.artifact)?.unwrap_or_default();
            let count = rows.len();
            self.cache.store(rows);
            info!("iv history: already up to date ({} rows)", count);
            return Ok(StageReport {
                rows: count,
                skipped: 0,
                cache_hit: true,
            });
        }

        let option_history = match option_history {
            Some(rows) => rows,
            None => {
                warn!(
                    "iv history: option history table {} not available",
                    self.paths.option_history.display()
                );
                self.cache.store(Vec::new());
                return Ok(StageReport::default());
            }
        };
        let live = match read_table::<LiveContractRecord>(&self.paths.live_contracts)? {
            Some(rows) => rows,
            None => {
                warn!(
                    "iv history: live contracts table {} not available",
                    self.paths.live_contracts.display()
                );
                self.cache.store(Vec::new());
                return Ok(StageReport::default());
            }
        };

        let terms_by_id = contract_terms(&live);
        let spot_index = underlying_index(
            &read_table::<HistoricalPricePoint>(&self.paths.underlying_history)?
                .unwrap_or_default(),
        );

        let mut rows = Vec::new();
        let mut tally = SkipTally::default();
        for point in &option_history {
            let id = point.id.trim();
            // Rows for contracts absent from the live table are out of
            // scope, not skips.
            let Some(terms) = terms_by_id.get(id) else {
                continue;
            };
            match solve_point(point, id, terms, &spot_index, self.rate) {
                Ok(record) => rows.push(record),
                Err(reason) => tally.record(reason),
            }
        }

        rows.sort_by(|a, b| {
            a.contract_id
                .cmp(&b.contract_id)
                .then_with(|| date_int(&a.date).cmp(&date_int(&b.date)))
        });
        write_table(&self.paths.artifact, &rows)?;
        if let Some(mark) = input_max {
            gate.commit(mark);
        }

        let report = StageReport {
            rows: rows.len(),
            skipped: tally.total(),
            cache_hit: false,
        };
        if report.skipped > 0 {
            info!(
                "iv history: {} records built, {} skipped ({})",
                report.rows, report.skipped, tally
            );
        } else {
            info!("iv history: {} records built", report.rows);
        }
        self.cache.store(rows);
        Ok(report)
    }
}

/// Maps every contract identity on a live row (call side and put side)
/// to the terms known at build time. Later rows win on identity collisions.
fn contract_terms(live: &[LiveContractRecord]) -> HashMap<String, ContractTerms> {
    let mut map = HashMap::new();
    for rec in live {
        let Some(expiry) = parse_date(&rec.end_date) else {
            continue;
        };
        if !rec.strike.is_finite() {
            continue;
        }
        let underlying_id = rec.underlying_id.trim().to_string();
        for (id, kind) in [
            (rec.call_id.trim(), OptionKind::Call),
            (rec.put_id.trim(), OptionKind::Put),
        ] {
            if id.is_empty() {
                continue;
            }
            map.insert(
                id.to_string(),
                ContractTerms {
                    strike: rec.strike,
                    expiry,
                    kind,
                    underlying_id: underlying_id.clone(),
                },
            );
        }
    }
    map
}

/// (date, identity) → close, for same-day underlying lookups.
fn underlying_index(history: &[HistoricalPricePoint]) -> HashMap<(u32, String), f64> {
    let mut index = HashMap::new();
    for point in history {
        let id = point.id.trim();
        if id.is_empty() {
            continue;
        }
        let (Some(d), Some(last)) = (date_int(&point.date), point.last) else {
            continue;
        };
        if last.is_finite() {
            index.insert((d, id.to_string()), last);
        }
    }
    index
}

fn solve_point(
    point: &HistoricalPricePoint,
    id: &str,
    terms: &ContractTerms,
    spot_index: &HashMap<(u32, String), f64>,
    rate: f64,
) -> Result<IvHistoryRecord, SkipReason> {
    let obs_int = date_int(&point.date).ok_or(SkipReason::MalformedDate)?;
    let obs_date = parse_date(&point.date).ok_or(SkipReason::MalformedDate)?;

    let days_to_expiry = (terms.expiry - obs_date).num_days();
    if days_to_expiry <= 0 {
        return Err(SkipReason::Expired);
    }

    let price = point
        .last
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or(SkipReason::NonPositivePrice)?;

    let spot = spot_index
        .get(&(obs_int, terms.underlying_id.clone()))
        .copied()
        .filter(|s| *s > 0.0)
        .ok_or(SkipReason::MissingUnderlyingHistory)?;

    let t = days_to_expiry as f64 / 365.0;
    let iv = implied_vol(
        price,
        spot,
        terms.strike,
        t,
        rate,
        terms.kind,
        IvBracket::HISTORY,
    );
    let theoretical = iv.map(|sigma| fair_value(spot, terms.strike, t, rate, sigma, terms.kind));

    Ok(IvHistoryRecord {
        contract_id: id.to_string(),
        date: point.date.clone(),
        option_price: price,
        underlying_price: spot,
        strike: terms.strike,
        days_to_expiry,
        kind: terms.kind,
        implied_volatility: iv,
        theoretical_price: theoretical,
    })
}

#[async_trait]
impl Stage for IvHistoryBuilder {
    fn name(&self) -> &str {
        "iv_history_builder"
    }

    async fn run(&self) -> Result<StageReport, StageError> {
        self.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_row(call_id: &str, put_id: &str, end_date: &str, strike: f64) -> LiveContractRecord {
        LiveContractRecord {
            ticker: "T".into(),
            name: String::new(),
            kind: OptionKind::Call,
            strike,
            remaining_days: 30,
            begin_date: String::new(),
            end_date: end_date.into(),
            call_id: call_id.into(),
            put_id: put_id.into(),
            price: 50.0,
            last: None,
            trade_count: 0,
            volume: 0,
            open_interest: 0,
            contract_size: 1000,
            underlying_id: "U1".into(),
            underlying_ticker: String::new(),
            underlying_spot: Some(1000.0),
        }
    }

    fn hist(id: &str, date: &str, last: f64) -> HistoricalPricePoint {
        HistoricalPricePoint {
            id: id.into(),
            date: date.into(),
            last: Some(last),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ivh_test_{}_{}", std::process::id(), name));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn builder(dir: &PathBuf) -> IvHistoryBuilder {
        IvHistoryBuilder::new(
            IvHistoryPaths {
                live_contracts: dir.join("options_live.jsonl"),
                option_history: dir.join("options_history.jsonl"),
                underlying_history: dir.join("underlying_history.jsonl"),
                artifact: dir.join("iv_history.jsonl"),
            },
            0.36,
        )
    }

    fn write_fixtures(dir: &PathBuf) {
        write_table(
            &dir.join("options_live.jsonl"),
            &[live_row("C1", "P1", "2025/06/30", 1000.0)],
        )
        .unwrap();
        write_table(
            &dir.join("options_history.jsonl"),
            &[
                hist("C1", "2025/06/02", 52.0),
                hist("C1", "2025/06/01", 50.0),
                // At expiry: excluded.
                hist("C1", "2025/06/30", 10.0),
                // After expiry: excluded.
                hist("C1", "2025/07/05", 4.0),
                // Unknown contract: out of scope entirely.
                hist("ZZZ", "2025/06/01", 9.0),
                // Put side of the same strike line.
                hist("P1", "2025/06/01", 31.0),
            ],
        )
        .unwrap();
        write_table(
            &dir.join("underlying_history.jsonl"),
            &[
                hist("U1", "2025/06/01", 1000.0),
                hist("U1", "2025/06/02", 1010.0),
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_build_joins_and_excludes_expired_observations() {
        let dir = temp_dir("build");
        write_fixtures(&dir);

        let b = builder(&dir);
        let report = b.build().unwrap();
        // C1 on two dates plus P1 on one date survive.
        assert_eq!(report.rows, 3);
        // The at-expiry and post-expiry rows are skips.
        assert_eq!(report.skipped, 2);

        let rows = b.snapshot().unwrap();
        // Sorted by (contract, date).
        assert_eq!(rows[0].contract_id, "C1");
        assert_eq!(rows[0].date, "2025/06/01");
        assert_eq!(rows[1].date, "2025/06/02");
        assert_eq!(rows[2].contract_id, "P1");
        assert_eq!(rows[2].kind, OptionKind::Put);

        // The solved sigma reproduces the observed close.
        let first = &rows[0];
        assert_eq!(first.days_to_expiry, 29);
        let sigma = first.implied_volatility.expect("should solve");
        let reproduced = fair_value(
            1000.0,
            1000.0,
            29.0 / 365.0,
            0.36,
            sigma,
            OptionKind::Call,
        );
        assert!((reproduced - 50.0).abs() < 1e-4);
        assert!((first.theoretical_price.unwrap() - 50.0).abs() < 1e-4);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_underlying_close_skips_row() {
        let dir = temp_dir("nospot");
        write_fixtures(&dir);
        // Drop the underlying history entirely.
        std::fs::remove_file(dir.join("underlying_history.jsonl")).unwrap();

        let b = builder(&dir);
        let report = b.build().unwrap();
        assert_eq!(report.rows, 0);
        assert_eq!(report.skipped, 5);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_high_water_mark_short_circuits_rebuild() {
        let dir = temp_dir("hwm");
        write_fixtures(&dir);

        let b = builder(&dir);
        assert!(!b.build().unwrap().cache_hit);
        // Same input dates: second build serves the artifact.
        assert!(b.build().unwrap().cache_hit);

        // An observation beyond the recorded mark (2025/07/05) forces a
        // rebuild, even though the new row itself is past expiry.
        let history = vec![
            hist("C1", "2025/06/01", 50.0),
            hist("P1", "2025/06/01", 31.0),
            hist("C1", "2025/07/20", 2.0),
        ];
        write_table(&dir.join("options_history.jsonl"), &history).unwrap();
        let report = b.build().unwrap();
        assert!(!report.cache_hit);
        assert_eq!(report.rows, 2);
        assert_eq!(report.skipped, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unsolvable_historical_iv_propagates_none() {
        let dir = temp_dir("unsolved");
        write_table(
            &dir.join("options_live.jsonl"),
            &[live_row("C1", "", "2025/06/30", 1000.0)],
        )
        .unwrap();
        // A close far above spot has no root in the bracket.
        write_table(
            &dir.join("options_history.jsonl"),
            &[hist("C1", "2025/06/01", 5000.0)],
        )
        .unwrap();
        write_table(
            &dir.join("underlying_history.jsonl"),
            &[hist("U1", "2025/06/01", 1000.0)],
        )
        .unwrap();

        let b = builder(&dir);
        let report = b.build().unwrap();
        assert_eq!(report.rows, 1);
        let rows = b.snapshot().unwrap();
        assert!(rows[0].implied_volatility.is_none());
        assert!(rows[0].theoretical_price.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
