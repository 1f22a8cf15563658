//! Normalized probabilities after vig removal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vig removal method. Proportional is the only one the scanner uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VigMethod {
    Proportional,
}

/// A quote's probability before and after vig removal.
///
/// Derived by the scanner, never stored as a primary entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedProb {
    /// Raw implied probability (includes vig)
    pub p_implied: f64,
    /// Probability after vig removal
    pub p_no_vig: f64,
    /// Sum of implied probabilities across the market (1.0 = fair)
    pub overround: f64,
    pub method: VigMethod,

    pub selection: String,
    pub bookmaker: String,
    pub timestamp: DateTime<Utc>,
}
