#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Monte Carlo simulation engine – samples input distributions, evaluates a sandboxed
//! transfer equation per iteration, and summarizes the output distribution.

/// Validation findings and run errors.
pub mod error;

/// Distribution registry and typed specs.
pub mod distributions;

/// Seeded sample generation.
pub mod sampler;

/// Formula compilation and evaluation.
pub mod expression;

/// Simulation configuration and validation.
pub mod config;

/// Result reduction.
pub mod summary;

/// Structured run telemetry.
pub mod telemetry;

/// Simulation orchestration.
pub mod engine;

pub use config::{PdfSpec, SimulationConfig, SimulationConfigBuilder, SimulationPlan};
pub use distributions::{resolve, DistributionError, DistributionKind, DistributionSpec};
pub use engine::{CancellationToken, EngineSettings, MonteCarloEngine, MonteCarloEngineBuilder};
pub use error::{ConfigViolation, ConfigurationError, SimulationError};
pub use expression::{evaluate, Bindings, EvaluationError, Expression};
pub use sampler::{random_seed, seeded_rng, SampleGenerator, SampleSource};
pub use summary::{summarize, SimulationResult, Summary};
pub use telemetry::{SimulationTelemetry, SimulationTelemetryBuilder};
