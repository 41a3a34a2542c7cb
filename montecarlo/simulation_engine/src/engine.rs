use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    config::{SimulationConfig, SimulationPlan},
    error::SimulationError,
    sampler::{random_seed, SampleGenerator, SampleSource},
    summary::{summarize, SimulationResult},
    telemetry::SimulationTelemetry,
};

/// Cooperative cancellation flag checked between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every run holding this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-engine run settings.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Fixed seed for every run; `None` draws a fresh seed per run.
    pub seed: Option<u64>,
    /// Keep the raw output samples in the result.
    pub retain_samples: bool,
}

/// Runs Monte Carlo simulations: validate, sample columns, evaluate per iteration, summarize.
#[derive(Debug, Clone, Default)]
pub struct MonteCarloEngine {
    settings: EngineSettings,
    telemetry: Option<SimulationTelemetry>,
    cancellation: Option<CancellationToken>,
}

impl MonteCarloEngine {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> MonteCarloEngineBuilder {
        MonteCarloEngineBuilder::default()
    }

    /// Engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns telemetry handle.
    #[must_use]
    pub const fn telemetry(&self) -> Option<&SimulationTelemetry> {
        self.telemetry.as_ref()
    }

    /// Runs the simulation with a generator seeded from the settings or from entropy.
    ///
    /// # Errors
    ///
    /// Same as [`MonteCarloEngine::run_with_source`].
    pub fn run(&self, config: &SimulationConfig) -> Result<SimulationResult, SimulationError> {
        let seed = self.settings.seed.unwrap_or_else(random_seed);
        let mut generator = SampleGenerator::new(seed);
        self.run_with_source(config, &mut generator)
    }

    /// Runs the simulation drawing every column from `source`.
    ///
    /// Validation completes before the source is touched, so an invalid
    /// configuration never draws a sample.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, a sampler or evaluation failure, a
    /// cancelled token, or an empty sample set. No partial result is returned.
    pub fn run_with_source<S: SampleSource + ?Sized>(
        &self,
        config: &SimulationConfig,
        source: &mut S,
    ) -> Result<SimulationResult, SimulationError> {
        let run_id = Uuid::new_v4();
        let plan = match config.validate() {
            Ok(plan) => plan,
            Err(err) => {
                let violations: Vec<String> = match &err {
                    SimulationError::Configuration(config) => {
                        config.violations().iter().map(ToString::to_string).collect()
                    }
                    _ => Vec::new(),
                };
                self.emit(
                    LogLevel::Warn,
                    "simulation.validation.failed",
                    json!({
                        "run_id": run_id,
                        "kind": err.kind(),
                        "reason": err.to_string(),
                        "violations": violations,
                    }),
                );
                return Err(err);
            }
        };

        let started = Utc::now();
        let variables: Vec<&str> = plan.columns().iter().map(|(name, _)| name.as_str()).collect();
        self.emit(
            LogLevel::Info,
            "simulation.run.start",
            json!({
                "run_id": run_id,
                "seed": source.seed(),
                "iterations": plan.num_iterations(),
                "variables": variables,
            }),
        );

        match self.execute(&plan, source) {
            Ok(samples) => {
                let summary = summarize(&samples).map_err(|err| self.aborted(run_id, err))?;
                self.emit(
                    LogLevel::Info,
                    "simulation.run.completed",
                    json!({
                        "run_id": run_id,
                        "iterations": summary.count,
                        "mean": summary.mean,
                        "standard_deviation": summary.standard_deviation,
                        "elapsed_ms": (Utc::now() - started).num_milliseconds(),
                    }),
                );
                Ok(SimulationResult {
                    mean: summary.mean,
                    standard_deviation: summary.standard_deviation,
                    raw_samples: self.settings.retain_samples.then_some(samples),
                    seed: source.seed(),
                })
            }
            Err(err) => Err(self.aborted(run_id, err)),
        }
    }

    /// Runs on tokio's blocking pool so async hosts are not stalled by the loop.
    pub fn spawn_run(
        self: Arc<Self>,
        config: SimulationConfig,
    ) -> JoinHandle<Result<SimulationResult, SimulationError>> {
        tokio::task::spawn_blocking(move || self.run(&config))
    }

    fn execute<S: SampleSource + ?Sized>(
        &self,
        plan: &SimulationPlan,
        source: &mut S,
    ) -> Result<Vec<f64>, SimulationError> {
        let iterations = plan.num_iterations();
        let mut columns = Vec::with_capacity(plan.columns().len());
        for (variable, spec) in plan.columns() {
            let column = source
                .generate(spec, iterations)
                .map_err(|source| SimulationError::Sampling {
                    variable: variable.clone(),
                    source,
                })?;
            if column.len() != iterations {
                return Err(SimulationError::SampleCount {
                    variable: variable.clone(),
                    expected: iterations,
                    actual: column.len(),
                });
            }
            columns.push(column);
        }

        let mut bindings: IndexMap<String, f64> = plan
            .columns()
            .iter()
            .map(|(name, _)| (name.clone(), 0.0))
            .collect();
        let expression = plan.expression();
        let mut samples = Vec::with_capacity(iterations);
        for iteration in 0..iterations {
            if self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                return Err(SimulationError::Cancelled { iteration });
            }
            for (slot, column) in bindings.values_mut().zip(&columns) {
                *slot = column[iteration];
            }
            let value = expression
                .eval(&bindings)
                .map_err(|source| SimulationError::Evaluation {
                    iteration: Some(iteration),
                    formula: expression.source().to_string(),
                    source,
                })?;
            samples.push(value);
        }
        Ok(samples)
    }

    fn aborted(&self, run_id: Uuid, err: SimulationError) -> SimulationError {
        let iteration = match &err {
            SimulationError::Evaluation { iteration, .. } => *iteration,
            SimulationError::Cancelled { iteration } => Some(*iteration),
            _ => None,
        };
        self.emit(
            LogLevel::Error,
            "simulation.run.aborted",
            json!({
                "run_id": run_id,
                "kind": err.kind(),
                "iteration": iteration,
                "reason": err.to_string(),
            }),
        );
        err
    }

    fn emit(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, message, metadata);
        }
    }
}

/// Builder for `MonteCarloEngine`.
#[derive(Debug, Default)]
pub struct MonteCarloEngineBuilder {
    settings: EngineSettings,
    telemetry: Option<SimulationTelemetry>,
    cancellation: Option<CancellationToken>,
}

impl MonteCarloEngineBuilder {
    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: SimulationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Fixes the generator seed for reproducible runs.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.settings.seed = Some(seed);
        self
    }

    /// Keeps raw output samples in each result.
    #[must_use]
    pub fn retain_samples(mut self, retain: bool) -> Self {
        self.settings.retain_samples = retain;
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> MonteCarloEngine {
        MonteCarloEngine {
            settings: self.settings,
            telemetry: self.telemetry,
            cancellation: self.cancellation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PdfSpec,
        distributions::{DistributionError, DistributionSpec},
        error::{ConfigViolation, ConfigurationError},
        expression::EvaluationError,
    };
    use indexmap::indexmap;
    use shared_logging::MemorySink;

    /// Counts generator calls and forwards to a seeded generator.
    struct SpySource {
        calls: usize,
        inner: SampleGenerator,
    }

    impl SpySource {
        fn new() -> Self {
            Self {
                calls: 0,
                inner: SampleGenerator::new(0),
            }
        }
    }

    impl SampleSource for SpySource {
        fn generate(
            &mut self,
            spec: &DistributionSpec,
            count: usize,
        ) -> Result<Vec<f64>, DistributionError> {
            self.calls += 1;
            self.inner.generate(spec, count)
        }
    }

    /// Returns a fixed column regardless of the spec.
    struct FixedSource(Vec<f64>);

    impl SampleSource for FixedSource {
        fn generate(
            &mut self,
            _spec: &DistributionSpec,
            _count: usize,
        ) -> Result<Vec<f64>, DistributionError> {
            Ok(self.0.clone())
        }
    }

    fn road_cost(iterations: usize) -> SimulationConfig {
        SimulationConfig::builder("unit_cost_km * total_road_length")
            .variable(
                "unit_cost_km",
                DistributionSpec::Normal {
                    mean: 1000.0,
                    sd: 150.0,
                },
            )
            .variable(
                "total_road_length",
                DistributionSpec::Uniform {
                    low: 45.0,
                    high: 55.0,
                },
            )
            .iterations(iterations)
            .build()
    }

    fn degenerate(iterations: usize) -> SimulationConfig {
        SimulationConfig::new(
            "a + b",
            indexmap! { "a".to_string() => 0.0, "b".to_string() => 0.0 },
            indexmap! {
                "a".to_string() => PdfSpec::new("uniform").param("low", 0.0).param("high", 0.0),
                "b".to_string() => PdfSpec::new("uniform").param("low", 5.0).param("high", 5.0),
            },
            iterations,
        )
    }

    #[test]
    fn degenerate_uniforms_give_constant_output() {
        let engine = MonteCarloEngine::builder().retain_samples(true).build();
        let result = engine.run(&degenerate(100)).unwrap();
        let samples = result.raw_samples.unwrap();
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|x| (*x - 5.0).abs() < f64::EPSILON));
        assert!((result.mean - 5.0).abs() < f64::EPSILON);
        assert!(result.standard_deviation.abs() < f64::EPSILON);
    }

    #[test]
    fn raw_samples_match_iteration_count_and_are_optional() {
        let kept = MonteCarloEngine::builder()
            .seed(1)
            .retain_samples(true)
            .build()
            .run(&road_cost(257))
            .unwrap();
        assert_eq!(kept.raw_samples.as_ref().map(Vec::len), Some(257));

        let dropped = MonteCarloEngine::builder().seed(1).build().run(&road_cost(257)).unwrap();
        assert!(dropped.raw_samples.is_none());
        assert_eq!(dropped.mean.to_bits(), kept.mean.to_bits());
    }

    #[test]
    fn fixed_seed_runs_are_bit_exact() {
        let engine = MonteCarloEngine::builder().seed(2024).retain_samples(true).build();
        let first = engine.run(&road_cost(500)).unwrap();
        let second = engine.run(&road_cost(500)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.seed, Some(2024));
    }

    #[test]
    fn road_cost_statistics_are_plausible() {
        let result = MonteCarloEngine::builder()
            .seed(7)
            .build()
            .run(&road_cost(20_000))
            .unwrap();
        // sd = sqrt(1000^2 * 100/12 + 50^2 * 150^2 + 150^2 * 100/12) ~= 8048
        assert!((result.mean - 50_000.0).abs() < 500.0, "mean {}", result.mean);
        assert!(
            (result.standard_deviation - 8_048.0).abs() < 400.0,
            "sd {}",
            result.standard_deviation
        );
    }

    #[test]
    fn invalid_configuration_draws_no_samples() {
        let config = SimulationConfig::builder("a + missing")
            .variable("a", DistributionSpec::Normal { mean: 0.0, sd: 1.0 })
            .build();
        let mut spy = SpySource::new();
        let err = MonteCarloEngine::default()
            .run_with_source(&config, &mut spy)
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Configuration(ConfigurationError::Invalid(ref violations))
                if violations.contains(&ConfigViolation::FormulaVariableWithoutDistribution("missing".into()))
        ));
        assert_eq!(spy.calls, 0);
    }

    #[test]
    fn missing_parameter_names_the_parameter() {
        let config = SimulationConfig::new(
            "x",
            indexmap! { "x".to_string() => 0.0 },
            indexmap! { "x".to_string() => PdfSpec::new("normal").param("mean", 0.0) },
            10,
        );
        let err = MonteCarloEngine::default().run(&config).unwrap_err();
        assert!(err.to_string().contains("`sd`"));
        let SimulationError::Configuration(err) = err else {
            panic!("expected configuration error");
        };
        assert_eq!(
            err.violations(),
            &[ConfigViolation::Distribution {
                variable: "x".into(),
                error: DistributionError::MissingParameter {
                    distribution: "normal",
                    parameter: "sd",
                },
            }]
        );
    }

    #[test]
    fn disallowed_function_fails_before_sampling() {
        let config = SimulationConfig::builder("system(a)")
            .variable("a", DistributionSpec::Exponential { scale: 1.0 })
            .build();
        let mut spy = SpySource::new();
        let err = MonteCarloEngine::default()
            .run_with_source(&config, &mut spy)
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Evaluation {
                iteration: None,
                source: EvaluationError::UnknownFunction(_),
                ..
            }
        ));
        assert_eq!(spy.calls, 0);
    }

    #[test]
    fn evaluation_failure_reports_iteration() {
        let config = SimulationConfig::builder("1 / x")
            .variable("x", DistributionSpec::Uniform { low: 0.0, high: 1.0 })
            .iterations(4)
            .build();
        let mut source = FixedSource(vec![1.0, 2.0, 0.0, 4.0]);
        let err = MonteCarloEngine::default()
            .run_with_source(&config, &mut source)
            .unwrap_err();
        match err {
            SimulationError::Evaluation {
                iteration,
                formula,
                source,
            } => {
                assert_eq!(iteration, Some(2));
                assert_eq!(formula, "1 / x");
                assert_eq!(source, EvaluationError::DivisionByZero);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn short_columns_are_rejected() {
        let config = SimulationConfig::builder("x")
            .variable("x", DistributionSpec::Weibull { shape: 1.0 })
            .iterations(3)
            .build();
        let err = MonteCarloEngine::default()
            .run_with_source(&config, &mut FixedSource(vec![1.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::SampleCount {
                expected: 3,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn zero_iterations_is_empty_sample_set() {
        let err = MonteCarloEngine::default().run(&degenerate(0)).unwrap_err();
        assert!(matches!(err, SimulationError::EmptySampleSet));
    }

    #[test]
    fn cancelled_token_stops_the_run() {
        let token = CancellationToken::new();
        token.cancel();
        let engine = MonteCarloEngine::builder().cancellation(token).build();
        let err = engine.run(&road_cost(10)).unwrap_err();
        assert!(matches!(err, SimulationError::Cancelled { iteration: 0 }));
    }

    #[test]
    fn telemetry_records_run_lifecycle() {
        let sink = Arc::new(MemorySink::new(16));
        let telemetry = SimulationTelemetry::builder("montecarlo")
            .sink(sink.clone())
            .build()
            .unwrap();
        let engine = MonteCarloEngine::builder()
            .seed(3)
            .telemetry(telemetry)
            .build();
        engine.run(&road_cost(10)).unwrap();
        let _ = engine.run(&degenerate(0));
        let invalid = SimulationConfig::builder("a + missing")
            .variable("a", DistributionSpec::Normal { mean: 0.0, sd: 1.0 })
            .build();
        let mut spy = SpySource::new();
        assert!(engine.run_with_source(&invalid, &mut spy).is_err());
        assert_eq!(spy.calls, 0);
        assert_eq!(
            sink.messages(),
            vec![
                "simulation.run.start".to_string(),
                "simulation.run.completed".to_string(),
                "simulation.run.start".to_string(),
                "simulation.run.aborted".to_string(),
                "simulation.validation.failed".to_string(),
            ]
        );
        let records = sink.snapshot();
        assert_eq!(records[1].metadata["iterations"], 10);
        let failed = &records[4];
        assert_eq!(failed.level, LogLevel::Warn);
        assert_eq!(failed.metadata["kind"], "configuration");
        assert_eq!(failed.metadata["violations"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn spawn_run_completes_on_blocking_pool() {
        let engine = Arc::new(MonteCarloEngine::builder().seed(9).build());
        let direct = engine.run(&road_cost(100)).unwrap();
        let spawned = Arc::clone(&engine)
            .spawn_run(road_cost(100)).await.unwrap().unwrap();
        assert_eq!(direct, spawned);
    }
}
