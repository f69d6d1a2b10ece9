// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Option Identity Types
// =============================================================================

/// Call or put. The derived `Ord` (Call < Put) is the kind key of the chain
/// sort: within one expiry, calls come before puts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionKind {
    Call,
    Put,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Call => write!(f, "CALL"),
            OptionKind::Put => write!(f, "PUT"),
        }
    }
}

// =============================================================================
// Normalized Input Records
// =============================================================================

/// One normalized live row from the upstream fetch/normalize stages.
///
/// A row describes one strike line and carries the contract identities of
/// both sides; `kind` says which side this row quotes. Rows are replaced
/// wholesale on every refresh cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveContractRecord {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    pub kind: OptionKind,
    pub strike: f64,
    pub remaining_days: i64,
    #[serde(default)]
    pub begin_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub put_id: String,
    /// Current traded price of the quoted side.
    pub price: f64,
    /// Last close; falls back to `price` when absent.
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub trade_count: i64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub open_interest: i64,
    #[serde(default = "default_contract_size")]
    pub contract_size: i64,
    #[serde(default)]
    pub underlying_id: String,
    #[serde(default)]
    pub underlying_ticker: String,
    /// Spot price that accompanied the contract row; used only when no live
    /// underlying quote is available.
    #[serde(default)]
    pub underlying_spot: Option<f64>,
}

fn default_contract_size() -> i64 {
    1000
}

impl LiveContractRecord {
    /// Resolves the contract identity matching this row's quoted side.
    /// Returns `None` when the identity field is blank.
    pub fn contract_id(&self) -> Option<&str> {
        let id = match self.kind {
            OptionKind::Call => self.call_id.trim(),
            OptionKind::Put => self.put_id.trim(),
        };
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    /// Observed last price with fallback to the current traded price.
    pub fn last_or_price(&self) -> f64 {
        self.last.filter(|l| l.is_finite()).unwrap_or(self.price)
    }
}

/// One live quote per underlying per refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderlyingQuote {
    pub underlying_id: String,
    pub spot: f64,
}

/// One historical observation for a contract or underlying identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalPricePoint {
    pub id: String,
    pub date: String,
    #[serde(default)]
    pub last: Option<f64>,
}

// =============================================================================
// Derived Records
// =============================================================================

/// Historical-volatility estimates for one underlying, recomputed in full
/// on every build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityEstimate {
    pub hv30: Option<f64>,
    pub hv90: Option<f64>,
    pub hv252: Option<f64>,
    /// Fallback sigma when the IV solver finds no root.
    pub selected: f64,
}

impl VolatilityEstimate {
    /// Estimate used when an underlying has no usable history at all.
    pub fn fallback() -> Self {
        Self {
            hv30: None,
            hv90: None,
            hv252: None,
            selected: crate::analytics::hv::DEFAULT_VOL,
        }
    }
}

/// One computed snapshot record per contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRow {
    pub contract_id: String,
    pub ticker: String,
    pub name: String,
    pub kind: OptionKind,
    pub strike: f64,
    pub days_to_expiry: i64,
    pub begin_date: String,
    pub end_date: String,
    pub market_price: f64,
    pub last_price: f64,
    pub theoretical_price: f64,
    /// (last − theoretical) / theoretical; `None` when theoretical ≤ 0.
    pub price_diff_pct: Option<f64>,
    pub iv: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta_daily: Option<f64>,
    pub vega_per_1pct: Option<f64>,
    pub rho_per_1pct: Option<f64>,
    pub hv30: Option<f64>,
    pub hv90: Option<f64>,
    pub hv252: Option<f64>,
    pub hv_selected: f64,
    pub trade_count: i64,
    pub volume: i64,
    pub open_interest: i64,
    pub underlying_price: f64,
    pub underlying_id: String,
    pub underlying_name: String,
    pub contract_size: i64,
}

/// One solved point of a contract's implied-volatility time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvHistoryRecord {
    pub contract_id: String,
    pub date: String,
    pub option_price: f64,
    pub underlying_price: f64,
    pub strike: f64,
    pub days_to_expiry: i64,
    pub kind: OptionKind,
    pub implied_volatility: Option<f64>,
    pub theoretical_price: Option<f64>,
}

// =============================================================================
// Date Normalization
// =============================================================================

/// Normalizes a date string to its `YYYYMMDD` integer encoding.
///
/// Accepts `YYYYMMDD`, `YYYY/MM/DD` and `YYYY-MM-DD`; anything else is `None`.
/// The encoding orders the same way the calendar does, so it doubles as the
/// high-water-mark value for date-gated rebuilds.
pub fn date_int(raw: &str) -> Option<u32> {
    let digits: String = raw.trim().chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 8 {
        return None;
    }
    digits.parse().ok()
}

/// Parses a normalized date string into a calendar date for day arithmetic.
pub fn parse_date(raw: &str) -> Option<chrono::NaiveDate> {
    let d = date_int(raw)?;
    chrono::NaiveDate::from_ymd_opt((d / 10000) as i32, d / 100 % 100, d % 100)
}
