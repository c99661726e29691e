//! Threshold-band lookup used by every penalty metric.

use serde::{Deserialize, Serialize};

/// One row of a penalty band table. Rows are ordered by ascending
/// `threshold`; the final row conventionally carries a very large
/// sentinel threshold so it acts as the catch-all ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub threshold: f64,
    pub penalty: f64,
}

impl Band {
    pub fn new(threshold: f64, penalty: f64) -> Self {
        Self { threshold, penalty }
    }
}

/// Resolves a measurement into the penalty of the first band whose
/// threshold is >= the value (boundary inclusive).
///
/// Total function: a value above every threshold takes the last row's
/// penalty, and an empty table yields 0.0. Malformed tables (unsorted
/// thresholds) are a configuration-validation concern, not handled here.
pub fn lookup(value: f64, bands: &[Band]) -> f64 {
    for band in bands {
        if value <= band.threshold {
            return band.penalty;
        }
    }
    bands.last().map(|b| b.penalty).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<Band> {
        vec![
            Band::new(5.0, 0.0),
            Band::new(10.0, 10.0),
            Band::new(20.0, 25.0),
            Band::new(1e9, 40.0),
        ]
    }

    #[test]
    fn test_lookup_boundaries() {
        let bands = table();
        assert_eq!(lookup(0.0, &bands), 0.0);
        assert_eq!(lookup(5.0, &bands), 0.0);
        assert_eq!(lookup(5.1, &bands), 10.0);
        assert_eq!(lookup(10.0, &bands), 10.0);
        assert_eq!(lookup(10.5, &bands), 25.0);
        assert_eq!(lookup(20.0, &bands), 25.0);
        assert_eq!(lookup(21.0, &bands), 40.0);
    }

    #[test]
    fn test_lookup_above_every_threshold_takes_last_row() {
        let bands = vec![Band::new(5.0, 1.0), Band::new(10.0, 2.0)];
        assert_eq!(lookup(11.0, &bands), 2.0);
        assert_eq!(lookup(f64::MAX, &bands), 2.0);
    }

    #[test]
    fn test_lookup_empty_table_is_zero() {
        assert_eq!(lookup(42.0, &[]), 0.0);
    }

    #[test]
    fn test_lookup_negative_value_takes_first_row() {
        let bands = table();
        assert_eq!(lookup(-1.0, &bands), 0.0);
    }
}
