// src/pricing/greeks.rs
//
// Analytic sensitivities. Reported in the units downstream consumers
// expect: theta per calendar day, vega and rho per one percentage point.

use crate::models::OptionKind;
use crate::pricing::black_scholes::{norm_cdf, norm_pdf, BlackScholes};
use crate::pricing::MIN_IV;

/// The five sensitivities, produced as a unit: either all present or the
/// whole set is absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputedGreeks {
    pub delta: f64,
    pub gamma: f64,
    /// Annualized theta ÷ 365.
    pub theta_daily: f64,
    /// Vega ÷ 100 (per 1% vol move).
    pub vega_per_1pct: f64,
    /// Rho ÷ 100 (per 1% rate move).
    pub rho_per_1pct: f64,
}

impl ComputedGreeks {
    /// Evaluates the Greeks at the given point.
    ///
    /// `None` when expiry, spot, or strike is non-positive, or when sigma is
    /// at or below the solver's lower IV bound, the same conditions under
    /// which the chain leaves all five columns empty.
    pub fn evaluate(
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        rate: f64,
        sigma: f64,
        kind: OptionKind,
    ) -> Option<ComputedGreeks> {
        if time_to_expiry <= 0.0 || sigma <= MIN_IV || spot <= 0.0 || strike <= 0.0 {
            return None;
        }

        let bs = BlackScholes::new(spot, strike, time_to_expiry, rate, sigma, kind);
        let d1 = bs.d1();
        let d2 = bs.d2();
        let sqrt_t = time_to_expiry.sqrt();
        let discount = (-rate * time_to_expiry).exp();
        let decay = -(spot * norm_pdf(d1) * sigma) / (2.0 * sqrt_t);

        let (delta, theta, rho) = match kind {
            OptionKind::Call => (
                norm_cdf(d1),
                decay - rate * strike * discount * norm_cdf(d2),
                strike * time_to_expiry * discount * norm_cdf(d2),
            ),
            OptionKind::Put => (
                norm_cdf(d1) - 1.0,
                decay + rate * strike * discount * norm_cdf(-d2),
                -strike * time_to_expiry * discount * norm_cdf(-d2),
            ),
        };

        let gamma = norm_pdf(d1) / (spot * sigma * sqrt_t);
        let vega = spot * norm_pdf(d1) * sqrt_t;

        Some(ComputedGreeks {
            delta,
            gamma,
            theta_daily: theta / 365.0,
            vega_per_1pct: vega / 100.0,
            rho_per_1pct: rho / 100.0,
        })
    }
}
