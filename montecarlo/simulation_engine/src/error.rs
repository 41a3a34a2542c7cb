use thiserror::Error;

use crate::{distributions::DistributionError, expression::EvaluationError};

/// A single finding produced while validating a simulation configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigViolation {
    /// The formula uses a name that has no distribution spec.
    #[error("formula references `{0}` but no distribution spec is declared for it")]
    FormulaVariableWithoutDistribution(String),
    /// The formula uses a name missing from the variable bindings.
    #[error("formula references `{0}` but it is not declared in the variable bindings")]
    FormulaVariableWithoutBinding(String),
    /// A declared variable has no distribution spec.
    #[error("variable `{0}` is declared without a distribution spec")]
    BindingWithoutDistribution(String),
    /// A distribution spec has no matching declared variable.
    #[error("distribution spec `{0}` has no matching variable binding")]
    DistributionWithoutBinding(String),
    /// The formula failed to compile; listed only when other violations exist.
    #[error("formula does not compile: {0}")]
    Formula(EvaluationError),
    /// A distribution spec was rejected by the registry.
    #[error("variable `{variable}`: {error}")]
    Distribution {
        /// Variable owning the spec.
        variable: String,
        /// Registry finding.
        error: DistributionError,
    },
}

/// Configuration could not be turned into a runnable simulation.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// One or more validation findings, all of them reported together.
    #[error("invalid simulation configuration: {}", join_violations(.0))]
    Invalid(Vec<ConfigViolation>),
    /// The configuration document could not be parsed.
    #[error("malformed simulation configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ConfigurationError {
    /// Validation findings; empty for malformed documents.
    #[must_use]
    pub fn violations(&self) -> &[ConfigViolation] {
        match self {
            Self::Invalid(violations) => violations,
            Self::Malformed(_) => &[],
        }
    }
}

fn join_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by a simulation run. Nothing is retried and no partial result is kept.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Validation failed before any sampling started.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The formula failed to compile (`iteration` is `None`) or to evaluate.
    #[error("evaluating `{formula}`{} failed: {source}", at_iteration(.iteration))]
    Evaluation {
        /// Iteration that failed, if sampling had started.
        iteration: Option<usize>,
        /// Formula being evaluated.
        formula: String,
        /// Underlying evaluator error.
        source: EvaluationError,
    },
    /// A sampler rejected parameters that passed validation.
    #[error("sampling variable `{variable}` failed: {source}")]
    Sampling {
        /// Variable being sampled.
        variable: String,
        /// Registry error.
        source: DistributionError,
    },
    /// A sample source returned the wrong number of draws.
    #[error("sample source produced {actual} draws for `{variable}`, expected {expected}")]
    SampleCount {
        /// Variable being sampled.
        variable: String,
        /// Requested draws.
        expected: usize,
        /// Returned draws.
        actual: usize,
    },
    /// The run was cancelled through its token.
    #[error("simulation cancelled before iteration {iteration}")]
    Cancelled {
        /// First iteration that did not run.
        iteration: usize,
    },
    /// The summarizer received no samples.
    #[error("cannot summarize an empty sample set")]
    EmptySampleSet,
}

impl SimulationError {
    /// Short label used in telemetry.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Evaluation { .. } => "evaluation",
            Self::Sampling { .. } | Self::SampleCount { .. } => "sampling",
            Self::Cancelled { .. } => "cancelled",
            Self::EmptySampleSet => "empty_sample_set",
        }
    }
}

fn at_iteration(iteration: &Option<usize>) -> String {
    iteration.map_or_else(String::new, |idx| format!(" at iteration {idx}"))
}
