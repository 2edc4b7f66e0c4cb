//! Completeness records and their tri-state status.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessStatus {
    #[default]
    Missing,
    Partial,
    Complete,
}

impl fmt::Display for CompletenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Partial => write!(f, "partial"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Status as a pure function of the percentage
pub fn evaluate_status(percentage: f64) -> CompletenessStatus {
    if percentage.is_nan() || percentage <= 0.0 {
        CompletenessStatus::Missing
    } else if percentage >= 100.0 {
        CompletenessStatus::Complete
    } else {
        CompletenessStatus::Partial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletenessRecord {
    pub observed: f64,
    pub expected: f64,
    /// `min(observed, expected)`, never negative
    pub adjusted: f64,
    /// In `[0, 100]`; zero when nothing is expected
    pub percentage: f64,
    pub status: CompletenessStatus,
}

impl CompletenessRecord {
    pub fn new(observed: f64, expected: f64) -> Self {
        let observed = if observed.is_finite() { observed } else { 0.0 };
        let expected = if expected.is_finite() { expected.max(0.0) } else { 0.0 };
        let adjusted = observed.min(expected).max(0.0);
        let percentage = if expected > 0.0 {
            (adjusted / expected * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            observed,
            expected,
            adjusted,
            percentage,
            status: evaluate_status(percentage),
        }
    }

    pub fn missing(expected: f64) -> Self {
        Self::new(0.0, expected)
    }
}
