// src/analytics/chain.rs
//
// Builds the enhanced chain snapshot: one row per live contract joining the
// quote, solved IV (with HV fallback), Greeks, theoretical price, and the
// underlying's volatility estimates.
//
// The build is gated on a content fingerprint of the live contract table;
// unchanged input means the previous artifact is served as-is.

use crate::analytics::{hv, SkipReason, SkipTally};
use crate::cache::{BuildCache, FingerprintGate};
use crate::models::{
    ChainRow, HistoricalPricePoint, LiveContractRecord, UnderlyingQuote, VolatilityEstimate,
};
use crate::pricing::black_scholes::fair_value;
use crate::pricing::{implied_vol, ComputedGreeks, IvBracket};
use crate::store::{read_table, write_table};
use crate::traits::{Stage, StageError, StageReport};
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Input tables and the output artifact of the chain build.
#[derive(Debug, Clone)]
pub struct ChainPaths {
    pub live_contracts: PathBuf,
    pub underlying_quotes: PathBuf,
    pub underlying_history: PathBuf,
    pub artifact: PathBuf,
}

/// The chain-snapshot builder and the owner of its artifact.
pub struct ChainBuilder {
    paths: ChainPaths,
    rate: f64,
    cache: BuildCache<ChainRow>,
}

impl ChainBuilder {
    pub fn new(paths: ChainPaths, rate: f64) -> Self {
        Self {
            paths,
            rate,
            cache: BuildCache::new(),
        }
    }

    /// Latest built (or reloaded) snapshot for API readers.
    pub fn snapshot(&self) -> Option<Arc<Vec<ChainRow>>> {
        self.cache.get()
    }

    /// Runs one build cycle. Returns what happened; row-level problems are
    /// tallied, never propagated.
    pub fn build(&self) -> Result<StageReport, StageError> {
        let gate = FingerprintGate::new(&self.paths.live_contracts, &self.paths.artifact);
        if !gate.is_stale() {
            let rows = read_table::<ChainRow>(&self.paths.artifact)?.unwrap_or_default();
            let count = rows.len();
            self.cache.store(rows);
            info!("chain snapshot: already up to date ({} rows)", count);
            return Ok(StageReport {
                rows: count,
                skipped: 0,
                cache_hit: true,
            });
        }

        let live = match read_table::<LiveContractRecord>(&self.paths.live_contracts)? {
            Some(rows) => rows,
            None => {
                warn!(
                    "chain snapshot: live contracts table {} not available",
                    self.paths.live_contracts.display()
                );
                self.cache.store(Vec::new());
                return Ok(StageReport::default());
            }
        };

        let quotes: HashMap<String, f64> = read_table::<UnderlyingQuote>(&self.paths.underlying_quotes)?
            .unwrap_or_default()
            .into_iter()
            .filter(|q| !q.underlying_id.trim().is_empty())
            .map(|q| (q.underlying_id.trim().to_string(), q.spot))
            .collect();

        let history =
            read_table::<HistoricalPricePoint>(&self.paths.underlying_history)?.unwrap_or_default();

        // One volatility estimate per underlying, recomputed from scratch.
        let mut vols: HashMap<String, VolatilityEstimate> = HashMap::new();
        for rec in &live {
            let id = rec.underlying_id.trim();
            if !id.is_empty() && !vols.contains_key(id) {
                vols.insert(id.to_string(), hv::estimate(&history, id));
            }
        }

        let mut rows = Vec::with_capacity(live.len());
        let mut tally = SkipTally::default();
        for rec in &live {
            match self.compute_row(rec, &quotes, &vols) {
                Ok(row) => rows.push(row),
                Err(reason) => tally.record(reason),
            }
        }

        sort_chain(&mut rows);
        write_table(&self.paths.artifact, &rows)?;
        gate.commit();

        let report = StageReport {
            rows: rows.len(),
            skipped: tally.total(),
            cache_hit: false,
        };
        if report.skipped > 0 {
            info!(
                "chain snapshot: {} contracts built, {} skipped ({})",
                report.rows, report.skipped, tally
            );
        } else {
            info!("chain snapshot: {} contracts built", report.rows);
        }
        self.cache.store(rows);
        Ok(report)
    }

    fn compute_row(
        &self,
        rec: &LiveContractRecord,
        quotes: &HashMap<String, f64>,
        vols: &HashMap<String, VolatilityEstimate>,
    ) -> Result<ChainRow, SkipReason> {
        let underlying_id = rec.underlying_id.trim();
        if underlying_id.is_empty() {
            return Err(SkipReason::MissingIdentity);
        }
        let contract_id = rec.contract_id().ok_or(SkipReason::MissingIdentity)?;

        // Live quote preferred; the spot carried on the contract row is the
        // fallback.
        let spot = quotes
            .get(underlying_id)
            .copied()
            .or(rec.underlying_spot)
            .filter(|s| s.is_finite() && *s > 0.0)
            .ok_or(SkipReason::MissingSpot)?;

        let t = rec.remaining_days as f64 / 365.0;
        if t <= 0.0 {
            return Err(SkipReason::Expired);
        }
        if !(rec.price.is_finite() && rec.price > 0.0) {
            return Err(SkipReason::NonPositivePrice);
        }

        let iv = implied_vol(
            rec.price,
            spot,
            rec.strike,
            t,
            self.rate,
            rec.kind,
            IvBracket::CHAIN,
        );
        let vol = vols
            .get(underlying_id)
            .cloned()
            .unwrap_or_else(VolatilityEstimate::fallback);
        let sigma = iv.unwrap_or(vol.selected);

        let theoretical = fair_value(spot, rec.strike, t, self.rate, sigma, rec.kind);
        let last = rec.last_or_price();
        let price_diff_pct = if theoretical > 0.0 {
            Some((last - theoretical) / theoretical)
        } else {
            None
        };
        let greeks = ComputedGreeks::evaluate(spot, rec.strike, t, self.rate, sigma, rec.kind);

        Ok(ChainRow {
            contract_id: contract_id.to_string(),
            ticker: rec.ticker.clone(),
            name: rec.name.clone(),
            kind: rec.kind,
            strike: rec.strike,
            days_to_expiry: rec.remaining_days,
            begin_date: rec.begin_date.clone(),
            end_date: rec.end_date.clone(),
            market_price: rec.price,
            last_price: last,
            theoretical_price: theoretical,
            price_diff_pct,
            iv,
            delta: greeks.map(|g| g.delta),
            gamma: greeks.map(|g| g.gamma),
            theta_daily: greeks.map(|g| g.theta_daily),
            vega_per_1pct: greeks.map(|g| g.vega_per_1pct),
            rho_per_1pct: greeks.map(|g| g.rho_per_1pct),
            hv30: vol.hv30,
            hv90: vol.hv90,
            hv252: vol.hv252,
            hv_selected: vol.selected,
            trade_count: rec.trade_count,
            volume: rec.volume,
            open_interest: rec.open_interest,
            underlying_price: spot,
            underlying_id: underlying_id.to_string(),
            underlying_name: rec.underlying_ticker.clone(),
            contract_size: rec.contract_size,
        })
    }
}

/// The externally observed row order: soonest expiry first, calls before
/// puts within an expiry, then ascending strike.
pub fn sort_chain(rows: &mut [ChainRow]) {
    rows.sort_by(|a, b| {
        a.days_to_expiry
            .cmp(&b.days_to_expiry)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.strike.total_cmp(&b.strike))
    });
}

#[async_trait]
impl Stage for ChainBuilder {
    fn name(&self) -> &str {
        "chain_builder"
    }

    async fn run(&self) -> Result<StageReport, StageError> {
        self.build()
    }
}
