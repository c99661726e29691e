//! Penalty aggregation and composite-score computation.

use serde::{Deserialize, Serialize};

use crate::config::Weights;

/// The four component penalties feeding the composite score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Penalties {
    pub transit: f64,
    pub wait: f64,
    pub weather: f64,
    pub air: f64,
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounds to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Arithmetic mean of per-item penalties, rounded to two decimals.
///
/// Returns `None` for empty input so the caller substitutes the metric's
/// configured fallback instead of silently reporting a perfect score.
pub fn mean_penalty(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(round2(values.iter().sum::<f64>() / values.len() as f64))
}

/// Combines the four penalties into `(weighted_total, score)`.
///
/// `score = clamp(100 - weighted_total, 0, 100)`, both rounded to two
/// decimals. Pure and total for finite inputs.
pub fn compose(weights: &Weights, p: &Penalties) -> (f64, f64) {
    let weighted_total = weights.transit * p.transit
        + weights.wait * p.wait
        + weights.weather * p.weather
        + weights.air * p.air;

    let score = (100.0 - weighted_total).clamp(0.0, 100.0);
    (round2(weighted_total), round2(score))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_penalty_default_severity_scenario() {
        // "Good Service" (0) and "Severe Delays" (25) average to 12.5
        assert_eq!(mean_penalty(&[0.0, 25.0]), Some(12.5));
    }

    #[test]
    fn test_mean_penalty_empty_is_none() {
        assert_eq!(mean_penalty(&[]), None);
    }

    #[test]
    fn test_mean_penalty_rounds_two_places() {
        assert_eq!(mean_penalty(&[10.0, 10.0, 5.0]), Some(8.33));
    }

    #[test]
    fn test_compose_default_weight_scenario() {
        let weights = Weights { transit: 1.0, wait: 1.0, weather: 0.8, air: 1.0 };
        let penalties = Penalties { transit: 10.0, wait: 20.0, weather: 56.0, air: 10.0 };

        let (weighted_total, score) = compose(&weights, &penalties);
        assert_eq!(weighted_total, 84.8);
        assert_eq!(score, 15.2);
    }

    #[test]
    fn test_compose_clamps_to_zero() {
        let weights = Weights { transit: 1.0, wait: 1.0, weather: 1.0, air: 1.0 };
        let penalties = Penalties { transit: 50.0, wait: 50.0, weather: 50.0, air: 50.0 };

        let (weighted_total, score) = compose(&weights, &penalties);
        assert_eq!(weighted_total, 200.0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_compose_perfect_conditions() {
        let weights = Weights::default();
        let penalties = Penalties { transit: 0.0, wait: 0.0, weather: 0.0, air: 0.0 };

        let (weighted_total, score) = compose(&weights, &penalties);
        assert_eq!(weighted_total, 0.0);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn test_round_helpers() {
        assert_eq!(round2(15.199999999999989), 15.2);
        assert_eq!(round1(6.333333), 6.3);
    }
}
