// src/pricing/black_scholes.rs
//
// Closed-form Black-Scholes fair value for European calls and puts.
//
// Degenerate inputs (non-positive spot, strike, expiry, or vol) price to
// exactly 0.0, the neutral-price contract callers rely on when skipping
// expired or unquoted contracts.

use crate::models::OptionKind;
use std::f64::consts::PI;

/// Standard normal CDF using Hart's algorithm.
/// Accurate to ~15 decimal places.
pub fn norm_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }

    // Handle extreme values
    if x < -38.0 {
        return 0.0;
    }
    if x > 38.0 {
        return 1.0;
    }

    // Use symmetry: Φ(-x) = 1 - Φ(x)
    let (z, neg) = if x < 0.0 { (-x, true) } else { (x, false) };

    // Coefficients for the rational approximation
    const A: [f64; 5] = [
        0.319381530,
        -0.356563782,
        1.781477937,
        -1.821255978,
        1.330274429,
    ];
    const P: f64 = 0.2316419;

    let t = 1.0 / (1.0 + P * z);
    let pdf = (1.0 / (2.0 * PI).sqrt()) * (-z * z / 2.0).exp();

    let poly = t * (A[0] + t * (A[1] + t * (A[2] + t * (A[3] + t * A[4]))));
    let cdf = 1.0 - pdf * poly;

    if neg {
        1.0 - cdf
    } else {
        cdf
    }
}

/// Standard normal PDF.
pub fn norm_pdf(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    (1.0 / (2.0 * PI).sqrt()) * (-x * x / 2.0).exp()
}

/// Black-Scholes pricing inputs for one contract.
#[derive(Debug, Clone)]
pub struct BlackScholes {
    /// Spot price of the underlying
    pub spot: f64,
    /// Strike price
    pub strike: f64,
    /// Time to expiration in years
    pub time_to_expiry: f64,
    /// Risk-free interest rate (annualized)
    pub rate: f64,
    /// Volatility (annualized)
    pub volatility: f64,
    /// Option kind
    pub kind: OptionKind,
}

impl BlackScholes {
    pub fn new(
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        rate: f64,
        volatility: f64,
        kind: OptionKind,
    ) -> Self {
        Self {
            spot,
            strike,
            time_to_expiry,
            rate,
            volatility,
            kind,
        }
    }

    /// True when any input puts the model outside its domain.
    pub fn is_degenerate(&self) -> bool {
        self.time_to_expiry <= 0.0
            || self.volatility <= 0.0
            || self.spot <= 0.0
            || self.strike <= 0.0
    }

    /// d1 in the Black-Scholes formula. Only meaningful off the degenerate
    /// domain; `price` guards before calling.
    pub(crate) fn d1(&self) -> f64 {
        let vol_sqrt_t = self.volatility * self.time_to_expiry.sqrt();
        ((self.spot / self.strike).ln()
            + (self.rate + 0.5 * self.volatility.powi(2)) * self.time_to_expiry)
            / vol_sqrt_t
    }

    /// d2 = d1 − σ√T.
    pub(crate) fn d2(&self) -> f64 {
        self.d1() - self.volatility * self.time_to_expiry.sqrt()
    }

    /// Fair value. Exactly 0.0 for degenerate inputs.
    pub fn price(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }

        let d1 = self.d1();
        let d2 = self.d2();
        let discount = (-self.rate * self.time_to_expiry).exp();

        match self.kind {
            OptionKind::Call => {
                self.spot * norm_cdf(d1) - self.strike * discount * norm_cdf(d2)
            }
            OptionKind::Put => {
                self.strike * discount * norm_cdf(-d2) - self.spot * norm_cdf(-d1)
            }
        }
    }
}

/// Convenience wrapper matching the solver's call shape.
pub fn fair_value(
    spot: f64,
    strike: f64,
    time_to_expiry: f64,
    rate: f64,
    volatility: f64,
    kind: OptionKind,
) -> f64 {
    BlackScholes::new(spot, strike, time_to_expiry, rate, volatility, kind).price()
}
