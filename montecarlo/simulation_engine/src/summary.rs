use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Descriptive statistics of a sample set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Number of samples.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation (divisor `count`).
    pub standard_deviation: f64,
}

/// Outcome of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// Mean of the output samples.
    pub mean: f64,
    /// Population standard deviation of the output samples.
    pub standard_deviation: f64,
    /// Output samples in iteration order, when retention was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_samples: Option<Vec<f64>>,
    /// Seed of the generator that produced the run, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Reduces samples to mean and population standard deviation.
///
/// Uses two passes so the variance does not lose precision on large offsets.
///
/// # Errors
///
/// Returns [`SimulationError::EmptySampleSet`] for an empty slice.
pub fn summarize(samples: &[f64]) -> Result<Summary, SimulationError> {
    if samples.is_empty() {
        return Err(SimulationError::EmptySampleSet);
    }
    let count = samples.len();
    #[allow(clippy::cast_precision_loss)]
    let n = count as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Ok(Summary {
        count,
        mean,
        standard_deviation: variance.sqrt(),
    })
}
