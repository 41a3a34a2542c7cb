use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    distributions::{resolve, DistributionError, DistributionSpec},
    error::{ConfigViolation, ConfigurationError, SimulationError},
    expression::Expression,
};

/// Name-keyed distribution description, as supplied by a host.
///
/// Serialized flat: `{"name": "normal", "mean": 0.0, "sd": 1.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfSpec {
    /// Registry name.
    pub name: String,
    /// Parameters keyed by name.
    #[serde(flatten)]
    pub params: IndexMap<String, f64>,
}

impl PdfSpec {
    /// Creates a spec with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: IndexMap::new(),
        }
    }

    /// Adds or replaces a parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Resolves the name and validates the parameters, reporting every problem.
    ///
    /// # Errors
    ///
    /// Returns an unknown name, or every parameter problem.
    pub fn resolve(&self) -> Result<DistributionSpec, Vec<DistributionError>> {
        let kind = resolve(&self.name).map_err(|err| vec![err])?;
        kind.build(&self.params)
    }
}

impl From<DistributionSpec> for PdfSpec {
    fn from(spec: DistributionSpec) -> Self {
        Self {
            name: spec.kind().name().to_string(),
            params: spec.params(),
        }
    }
}

/// Immutable description of a simulation: formula, variables, and iteration count.
///
/// `variables` only declares names (its values are placeholders); the key set of
/// `distribution_specs` is what the engine samples, and validation requires the two to agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    formula: String,
    variables: IndexMap<String, f64>,
    distribution_specs: IndexMap<String, PdfSpec>,
    num_iterations: usize,
}

impl SimulationConfig {
    /// Creates a configuration from its four inputs.
    #[must_use]
    pub fn new(
        formula: impl Into<String>,
        variables: IndexMap<String, f64>,
        distribution_specs: IndexMap<String, PdfSpec>,
        num_iterations: usize,
    ) -> Self {
        Self {
            formula: formula.into(),
            variables,
            distribution_specs,
            num_iterations,
        }
    }

    /// Starts a builder that declares each variable and its distribution together.
    #[must_use]
    pub fn builder(formula: impl Into<String>) -> SimulationConfigBuilder {
        SimulationConfigBuilder::new(formula)
    }

    /// Parses a JSON document (`formula`, `variables`, `distributionSpecs`, `numIterations`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Malformed`] when the document does not parse.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Copy of this configuration with a different iteration count.
    #[must_use]
    pub fn with_iterations(&self, num_iterations: usize) -> Self {
        Self {
            num_iterations,
            ..self.clone()
        }
    }

    /// Transfer equation.
    #[must_use]
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Declared variable names with placeholder values.
    #[must_use]
    pub const fn variables(&self) -> &IndexMap<String, f64> {
        &self.variables
    }

    /// Distribution per variable.
    #[must_use]
    pub const fn distribution_specs(&self) -> &IndexMap<String, PdfSpec> {
        &self.distribution_specs
    }

    /// Iterations per run.
    #[must_use]
    pub const fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// Checks the configuration and compiles it into a runnable plan.
    ///
    /// All violations are collected before returning. A formula that fails to compile
    /// is reported as an evaluation error with no iteration when it is the only
    /// problem, and as [`ConfigViolation::Formula`] alongside any other violations.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Configuration`] listing every violation, or
    /// [`SimulationError::Evaluation`] when only the formula is at fault.
    pub fn validate(&self) -> Result<SimulationPlan, SimulationError> {
        let mut violations = Vec::new();
        let compiled = Expression::compile(&self.formula);
        let referenced = compiled
            .as_ref()
            .map(|expression| expression.variables().clone())
            .unwrap_or_default();

        for name in &referenced {
            if !self.distribution_specs.contains_key(name) {
                violations.push(ConfigViolation::FormulaVariableWithoutDistribution(
                    name.clone(),
                ));
            }
            if !self.variables.contains_key(name) {
                violations.push(ConfigViolation::FormulaVariableWithoutBinding(name.clone()));
            }
        }
        for name in self.variables.keys() {
            if !referenced.contains(name) && !self.distribution_specs.contains_key(name) {
                violations.push(ConfigViolation::BindingWithoutDistribution(name.clone()));
            }
        }
        for name in self.distribution_specs.keys() {
            if !referenced.contains(name) && !self.variables.contains_key(name) {
                violations.push(ConfigViolation::DistributionWithoutBinding(name.clone()));
            }
        }

        let mut columns = Vec::with_capacity(self.distribution_specs.len());
        for (variable, pdf) in &self.distribution_specs {
            match pdf.resolve() {
                Ok(spec) => columns.push((variable.clone(), spec)),
                Err(errors) => violations.extend(errors.into_iter().map(|error| {
                    ConfigViolation::Distribution {
                        variable: variable.clone(),
                        error,
                    }
                })),
            }
        }

        if !violations.is_empty() {
            if let Err(error) = &compiled {
                violations.insert(0, ConfigViolation::Formula(error.clone()));
            }
            return Err(ConfigurationError::Invalid(violations).into());
        }
        let expression = compiled.map_err(|source| SimulationError::Evaluation {
            iteration: None,
            formula: self.formula.clone(),
            source,
        })?;
        Ok(SimulationPlan {
            expression,
            columns,
            num_iterations: self.num_iterations,
        })
    }
}

/// Builder for [`SimulationConfig`].
#[derive(Debug, Clone)]
pub struct SimulationConfigBuilder {
    formula: String,
    variables: IndexMap<String, f64>,
    distribution_specs: IndexMap<String, PdfSpec>,
    num_iterations: usize,
}

impl SimulationConfigBuilder {
    /// Iteration count used when none is set.
    pub const DEFAULT_ITERATIONS: usize = 1000;

    /// Creates a builder for `formula`.
    #[must_use]
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            variables: IndexMap::new(),
            distribution_specs: IndexMap::new(),
            num_iterations: Self::DEFAULT_ITERATIONS,
        }
    }

    /// Declares a variable and its distribution.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, spec: impl Into<PdfSpec>) -> Self {
        let name = name.into();
        self.variables.insert(name.clone(), 0.0);
        self.distribution_specs.insert(name, spec.into());
        self
    }

    /// Sets the iteration count.
    #[must_use]
    pub fn iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Finishes the configuration. Validation happens when a run starts.
    #[must_use]
    pub fn build(self) -> SimulationConfig {
        SimulationConfig::new(
            self.formula,
            self.variables,
            self.distribution_specs,
            self.num_iterations,
        )
    }
}

/// Validated configuration: compiled formula plus one typed spec per sampled column.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationPlan {
    expression: Expression,
    columns: Vec<(String, DistributionSpec)>,
    num_iterations: usize,
}

impl SimulationPlan {
    /// Compiled formula.
    #[must_use]
    pub const fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Variables in declaration order with their typed distributions.
    #[must_use]
    pub fn columns(&self) -> &[(String, DistributionSpec)] {
        &self.columns
    }

    /// Iterations per run.
    #[must_use]
    pub const fn num_iterations(&self) -> usize {
        self.num_iterations
    }
}
