//! Odds conversion and vig removal mathematics.
//!
//! All probabilities are decimals in [0, 1]. American odds are signed
//! integers quoted as f64 (-110, +150). Decimal odds are floats > 1.0.
//!
//! Vig removal uses proportional normalization:
//!   p_i' = p_i / sum(p)
//! which is the standard for two-way moneylines. The multi-way variant is
//! the same normalization and is an approximation for markets with more
//! than two outcomes.

use anyhow::{bail, Result};

/// Convert American odds to implied probability.
///
/// Favorites (negative odds): |odds| / (|odds| + 100).
/// Underdogs (positive odds): 100 / (odds + 100).
pub fn american_to_prob(odds: f64) -> Result<f64> {
    if odds == 0.0 {
        bail!("American odds cannot be zero");
    }
    if odds < 0.0 {
        Ok(odds.abs() / (odds.abs() + 100.0))
    } else {
        Ok(100.0 / (odds + 100.0))
    }
}

/// Convert decimal odds to implied probability. Decimal odds must be > 1.0.
pub fn decimal_to_prob(odds: f64) -> Result<f64> {
    if odds <= 1.0 {
        bail!("Decimal odds must be > 1.0, got {}", odds);
    }
    Ok(1.0 / odds)
}

/// Convert probability to American odds. Defined on (0, 1).
pub fn prob_to_american(prob: f64) -> Result<f64> {
    if prob <= 0.0 || prob >= 1.0 {
        bail!("Probability must be in (0, 1), got {}", prob);
    }
    if prob >= 0.5 {
        Ok(-100.0 * prob / (1.0 - prob))
    } else {
        Ok(100.0 * (1.0 - prob) / prob)
    }
}

/// Convert probability to decimal odds. Defined on (0, 1).
pub fn prob_to_decimal(prob: f64) -> Result<f64> {
    if prob <= 0.0 || prob >= 1.0 {
        bail!("Probability must be in (0, 1), got {}", prob);
    }
    Ok(1.0 / prob)
}

/// Remove vig from a two-way market. Returns (p_a', p_b') summing to 1.
pub fn no_vig_two_way(p_a: f64, p_b: f64) -> Result<(f64, f64)> {
    let overround = p_a + p_b;
    if overround <= 0.0 {
        bail!("Overround must be > 0, got {}", overround);
    }
    Ok((p_a / overround, p_b / overround))
}

/// Remove vig from an N-way market. Returns (normalized probs, overround).
pub fn no_vig_multi_way(probs: &[f64]) -> Result<(Vec<f64>, f64)> {
    if probs.is_empty() {
        bail!("Must provide at least one probability");
    }
    let overround: f64 = probs.iter().sum();
    if overround <= 0.0 {
        bail!("Overround must be > 0, got {}", overround);
    }
    let no_vig = probs.iter().map(|p| p / overround).collect();
    Ok((no_vig, overround))
}

/// Sum of implied probabilities. 1.0 means a fair book.
pub fn overround(probs: &[f64]) -> f64 {
    probs.iter().sum()
}

/// Overround expressed as a vig percentage (1.0476 -> 4.76).
pub fn vig_pct(overround: f64) -> f64 {
    (overround - 1.0) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_american_conversions() {
        let p = american_to_prob(-110.0).unwrap();
        assert!((p - 0.5238).abs() < 1e-3);

        let p = american_to_prob(150.0).unwrap();
        assert!((p - 0.4).abs() < 1e-9);

        assert!(american_to_prob(0.0).is_err());
    }

    #[test]
    fn test_decimal_conversions() {
        assert!((decimal_to_prob(2.0).unwrap() - 0.5).abs() < 1e-9);
        assert!((decimal_to_prob(1.91).unwrap() - 0.5236).abs() < 1e-3);
        assert!(decimal_to_prob(1.0).is_err());
        assert!(decimal_to_prob(0.5).is_err());
    }

    #[test]
    fn test_round_trips() {
        for p in [0.05, 0.25, 0.5, 0.5238, 0.75, 0.95] {
            let american = prob_to_american(p).unwrap();
            let back = american_to_prob(american).unwrap();
            assert!((back - p).abs() < 1e-3, "american round trip failed at {}", p);

            let decimal = prob_to_decimal(p).unwrap();
            let back = decimal_to_prob(decimal).unwrap();
            assert!((back - p).abs() < 1e-3, "decimal round trip failed at {}", p);
        }
    }

    #[test]
    fn test_no_vig_two_way_sums_to_one() {
        // Both sides -110
        let p = american_to_prob(-110.0).unwrap();
        let (a, b) = no_vig_two_way(p, p).unwrap();
        assert!((a - 0.5).abs() < 1e-9);
        assert!((b - 0.5).abs() < 1e-9);
        assert!((a + b - 1.0).abs() < 1e-12);

        // Asymmetric market
        let (a, b) = no_vig_two_way(0.60, 0.45).unwrap();
        assert!((a + b - 1.0).abs() < 1e-12);
        assert!(a > 0.0 && a < 1.0);
        assert!(b > 0.0 && b < 1.0);
    }

    #[test]
    fn test_no_vig_reduces_implied_when_overround_present() {
        let p = american_to_prob(-110.0).unwrap();
        let (a, _) = no_vig_two_way(p, p).unwrap();
        assert!(a <= p);
    }

    #[test]
    fn test_no_vig_multi_way() {
        let probs = [0.35, 0.35, 0.35];
        let (no_vig, ovr) = no_vig_multi_way(&probs).unwrap();
        assert!((ovr - 1.05).abs() < 1e-9);
        let sum: f64 = no_vig.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);

        assert!(no_vig_multi_way(&[]).is_err());
    }

    #[test]
    fn test_overround_and_vig_pct() {
        let p = american_to_prob(-110.0).unwrap();
        let ovr = overround(&[p, p]);
        assert!((ovr - 1.0476).abs() < 1e-3);
        assert!((vig_pct(ovr) - 4.76).abs() < 0.01);
    }
}
