// src/pricing/implied_vol.rs
//
// Bracketed implied-volatility solver (Brent's method).
//
// "No solution" is a normal outcome here, not a failure: callers fall back
// to a historical-volatility estimate when this returns None.

use crate::models::OptionKind;
use crate::pricing::black_scholes::fair_value;
use crate::pricing::{MAX_IV, MIN_IV};

/// Hard cap on root-finder iterations.
const MAX_ITER: usize = 100;

/// Absolute convergence tolerance on sigma.
const XTOL: f64 = 1e-9;

/// Search interval for the solver.
#[derive(Debug, Clone, Copy)]
pub struct IvBracket {
    pub lo: f64,
    pub hi: f64,
}

impl IvBracket {
    /// Bracket for live chain quotes.
    pub const CHAIN: IvBracket = IvBracket { lo: MIN_IV, hi: MAX_IV };

    /// Tighter lower bound for the historical path, where stale closes can
    /// imply near-zero vol.
    pub const HISTORY: IvBracket = IvBracket { lo: 1e-6, hi: MAX_IV };
}

/// Solves for the sigma in `[bracket.lo, bracket.hi]` at which the model
/// reproduces `price`.
///
/// Returns `None` when any of price/spot/strike/expiry is non-positive, when
/// the bracket shows no sign change, or when iteration fails to converge.
pub fn implied_vol(
    price: f64,
    spot: f64,
    strike: f64,
    time_to_expiry: f64,
    rate: f64,
    kind: OptionKind,
    bracket: IvBracket,
) -> Option<f64> {
    if price <= 0.0 || time_to_expiry <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        return None;
    }

    let objective =
        |sigma: f64| fair_value(spot, strike, time_to_expiry, rate, sigma, kind) - price;

    brent(objective, bracket.lo, bracket.hi)
}

/// Brent's method: inverse quadratic interpolation with secant and bisection
/// fallbacks, bounded by `MAX_ITER`.
fn brent<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64) -> Option<f64> {
    let mut a = lo;
    let mut b = hi;
    let mut fa = f(a);
    let mut fb = f(b);

    if fa == 0.0 {
        return Some(a);
    }
    if fb == 0.0 {
        return Some(b);
    }
    // No sign change: the root is not bracketed.
    if fa.signum() == fb.signum() {
        return None;
    }

    let mut c = a;
    let mut fc = fa;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..MAX_ITER {
        if fb.signum() == fc.signum() {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * XTOL;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Some(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Attempt inverse quadratic interpolation (secant if a == c).
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();

            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                // Interpolation accepted.
                e = d;
                d = p / q;
            } else {
                // Interpolation rejected, bisect.
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        if d.abs() > tol1 {
            b += d;
        } else {
            b += tol1.copysign(xm);
        }
        fb = f(b);
    }

    // Out of iterations without converging.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_recovers_sigma() {
        for sigma in [0.05, 0.2, 0.45, 0.8, 2.0] {
            let price = fair_value(100.0, 95.0, 0.5, 0.05, sigma, OptionKind::Call);
            let solved = implied_vol(price, 100.0, 95.0, 0.5, 0.05, OptionKind::Call, IvBracket::CHAIN)
                .unwrap();
            assert!(
                (solved - sigma).abs() < 1e-6,
                "sigma {} solved as {}",
                sigma,
                solved
            );
        }
    }

    #[test]
    fn test_put_round_trip() {
        let price = fair_value(100.0, 110.0, 0.25, 0.05, 0.35, OptionKind::Put);
        let solved =
            implied_vol(price, 100.0, 110.0, 0.25, 0.05, OptionKind::Put, IvBracket::HISTORY)
                .unwrap();
        assert!((solved - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_atm_call_scenario() {
        // S=1000, K=1000, 30 days, r=0.36, observed price 50.
        let t = 30.0 / 365.0;
        let solved =
            implied_vol(50.0, 1000.0, 1000.0, t, 0.36, OptionKind::Call, IvBracket::CHAIN)
                .expect("scenario should solve");
        assert!(solved > 0.0 && solved < 5.0, "solved sigma: {}", solved);

        let reproduced = fair_value(1000.0, 1000.0, t, 0.36, solved, OptionKind::Call);
        assert!(
            (reproduced - 50.0).abs() < 1e-4,
            "reproduced price: {}",
            reproduced
        );
    }

    #[test]
    fn test_degenerate_inputs_return_none() {
        let b = IvBracket::CHAIN;
        assert!(implied_vol(0.0, 100.0, 100.0, 1.0, 0.05, OptionKind::Call, b).is_none());
        assert!(implied_vol(-1.0, 100.0, 100.0, 1.0, 0.05, OptionKind::Call, b).is_none());
        assert!(implied_vol(5.0, 0.0, 100.0, 1.0, 0.05, OptionKind::Call, b).is_none());
        assert!(implied_vol(5.0, 100.0, 0.0, 1.0, 0.05, OptionKind::Call, b).is_none());
        assert!(implied_vol(5.0, 100.0, 100.0, 0.0, 0.05, OptionKind::Call, b).is_none());
    }

    #[test]
    fn test_unbracketable_price_returns_none() {
        // A call is worth less than spot at any vol; a price above spot has
        // no root in the bracket.
        assert!(
            implied_vol(150.0, 100.0, 100.0, 0.5, 0.05, OptionKind::Call, IvBracket::CHAIN)
                .is_none()
        );
        // Below intrinsic value: no vol is low enough.
        assert!(
            implied_vol(1.0, 150.0, 100.0, 0.1, 0.05, OptionKind::Call, IvBracket::CHAIN)
                .is_none()
        );
    }
}
