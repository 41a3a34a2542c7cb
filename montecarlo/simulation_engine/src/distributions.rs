use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use rand::{distributions::Uniform, Rng};
use rand_distr::{
    Binomial, ChiSquared, Distribution, Exp, Gamma, InverseGaussian, LogNormal, Normal, Pareto,
    Poisson, Weibull,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving, validating, or sampling a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    /// No sampler is registered under this name.
    #[error("unknown distribution `{0}`")]
    UnknownDistribution(String),
    /// A required parameter key is absent.
    #[error("{distribution} distribution is missing required parameter `{parameter}`")]
    MissingParameter {
        /// Distribution name.
        distribution: &'static str,
        /// Canonical parameter name.
        parameter: &'static str,
    },
    /// A parameter is present but outside its domain.
    #[error("{distribution} parameter `{parameter}` {reason}")]
    InvalidParameter {
        /// Distribution name.
        distribution: &'static str,
        /// Canonical parameter name.
        parameter: &'static str,
        /// What the value must satisfy.
        reason: String,
    },
}

/// A named parameter together with the alternative keys accepted for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    /// Canonical key.
    pub name: &'static str,
    /// Alternative keys accepted on input.
    pub aliases: &'static [&'static str],
}

impl Parameter {
    const fn new(name: &'static str) -> Self {
        Self { name, aliases: &[] }
    }

    const fn aliased(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { name, aliases }
    }

    /// Looks the parameter up by canonical key first, then by alias.
    #[must_use]
    pub fn lookup(&self, params: &IndexMap<String, f64>) -> Option<f64> {
        params
            .get(self.name)
            .or_else(|| self.aliases.iter().find_map(|alias| params.get(*alias)))
            .copied()
    }
}

const NORMAL: &[Parameter] = &[Parameter::new("mean"), Parameter::new("sd")];
const UNIFORM: &[Parameter] = &[Parameter::new("low"), Parameter::new("high")];
const POISSON: &[Parameter] = &[Parameter::aliased("mean", &["lambda"])];
const LOGNORMAL: &[Parameter] = &[Parameter::new("mean"), Parameter::new("sigma")];
const PARETO: &[Parameter] = &[Parameter::aliased("shape", &["sigma"])];
const EXPONENTIAL: &[Parameter] = &[Parameter::new("scale")];
const GAMMA: &[Parameter] = &[Parameter::new("shape"), Parameter::new("scale")];
const WEIBULL: &[Parameter] = &[Parameter::new("shape")];
const CHISQUARE: &[Parameter] = &[Parameter::new("degfreedom")];
const WALD: &[Parameter] = &[Parameter::new("mean"), Parameter::new("scale")];
const BINOMIAL: &[Parameter] = &[
    Parameter::aliased("trials", &["numtrials"]),
    Parameter::aliased("probability", &["probsuccess"]),
];

/// Registry of supported distribution kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    /// Gaussian.
    Normal,
    /// Continuous uniform on `[low, high)`.
    Uniform,
    /// Poisson counts.
    Poisson,
    /// Log-normal, parameterized in log space.
    Lognormal,
    /// Lomax (Pareto II) with unit scale.
    Pareto,
    /// Exponential with a scale (mean) parameter.
    Exponential,
    /// Gamma with shape and scale.
    Gamma,
    /// Weibull with unit scale.
    Weibull,
    /// Chi-squared.
    Chisquare,
    /// Wald (inverse Gaussian).
    Wald,
    /// Binomial counts.
    Binomial,
}

impl DistributionKind {
    /// Every registered kind.
    pub const ALL: [Self; 11] = [
        Self::Normal,
        Self::Uniform,
        Self::Poisson,
        Self::Lognormal,
        Self::Pareto,
        Self::Exponential,
        Self::Gamma,
        Self::Weibull,
        Self::Chisquare,
        Self::Wald,
        Self::Binomial,
    ];

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Uniform => "uniform",
            Self::Poisson => "poisson",
            Self::Lognormal => "lognormal",
            Self::Pareto => "pareto",
            Self::Exponential => "exponential",
            Self::Gamma => "gamma",
            Self::Weibull => "weibull",
            Self::Chisquare => "chisquare",
            Self::Wald => "wald",
            Self::Binomial => "binomial",
        }
    }

    /// Required parameters, in positional order.
    #[must_use]
    pub const fn parameters(self) -> &'static [Parameter] {
        match self {
            Self::Normal => NORMAL,
            Self::Uniform => UNIFORM,
            Self::Poisson => POISSON,
            Self::Lognormal => LOGNORMAL,
            Self::Pareto => PARETO,
            Self::Exponential => EXPONENTIAL,
            Self::Gamma => GAMMA,
            Self::Weibull => WEIBULL,
            Self::Chisquare => CHISQUARE,
            Self::Wald => WALD,
            Self::Binomial => BINOMIAL,
        }
    }

    /// Validates a name-keyed parameter map and builds the typed spec.
    ///
    /// Every missing key is reported; domain checks only run once all keys are present.
    ///
    /// # Errors
    ///
    /// Returns every missing key, or every failed domain check.
    pub fn build(self, params: &IndexMap<String, f64>) -> Result<DistributionSpec, Vec<DistributionError>> {
        let mut values = Vec::with_capacity(self.parameters().len());
        let mut missing = Vec::new();
        for parameter in self.parameters() {
            match parameter.lookup(params) {
                Some(value) => values.push(value),
                None => missing.push(DistributionError::MissingParameter {
                    distribution: self.name(),
                    parameter: parameter.name,
                }),
            }
        }
        if !missing.is_empty() {
            return Err(missing);
        }

        let spec = match self {
            Self::Normal => DistributionSpec::Normal {
                mean: values[0],
                sd: values[1],
            },
            Self::Uniform => DistributionSpec::Uniform {
                low: values[0],
                high: values[1],
            },
            Self::Poisson => DistributionSpec::Poisson { mean: values[0] },
            Self::Lognormal => DistributionSpec::Lognormal {
                mean: values[0],
                sigma: values[1],
            },
            Self::Pareto => DistributionSpec::Pareto { shape: values[0] },
            Self::Exponential => DistributionSpec::Exponential { scale: values[0] },
            Self::Gamma => DistributionSpec::Gamma {
                shape: values[0],
                scale: values[1],
            },
            Self::Weibull => DistributionSpec::Weibull { shape: values[0] },
            Self::Chisquare => DistributionSpec::Chisquare {
                degfreedom: values[0],
            },
            Self::Wald => DistributionSpec::Wald {
                mean: values[0],
                scale: values[1],
            },
            Self::Binomial => {
                let trials = values[0];
                if !is_whole(trials) || trials < 0.0 {
                    return Err(vec![invalid(
                        self,
                        "trials",
                        "must be a non-negative integer",
                    )]);
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let trials = trials as u64;
                DistributionSpec::Binomial {
                    trials,
                    probability: values[1],
                }
            }
        };

        let problems = spec.check();
        if problems.is_empty() {
            Ok(spec)
        } else {
            Err(problems)
        }
    }
}

impl fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistributionKind {
    type Err = DistributionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        resolve(name)
    }
}

/// Resolves a registry name to its kind.
///
/// # Errors
///
/// Returns [`DistributionError::UnknownDistribution`] for names outside the registry.
pub fn resolve(name: &str) -> Result<DistributionKind, DistributionError> {
    DistributionKind::ALL
        .into_iter()
        .find(|kind| kind.name() == name)
        .ok_or_else(|| DistributionError::UnknownDistribution(name.to_string()))
}

/// Typed distribution with its own parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum DistributionSpec {
    /// Gaussian with mean and standard deviation.
    Normal {
        /// Mean.
        mean: f64,
        /// Standard deviation, `>= 0`.
        sd: f64,
    },
    /// Uniform on `[low, high)`; `low == high` always yields `low`.
    Uniform {
        /// Inclusive lower bound.
        low: f64,
        /// Exclusive upper bound.
        high: f64,
    },
    /// Poisson counts returned as floats.
    Poisson {
        /// Expected count, `> 0`.
        mean: f64,
    },
    /// Log-normal; both parameters describe the underlying normal.
    Lognormal {
        /// Mean of the underlying normal.
        mean: f64,
        /// Standard deviation of the underlying normal, `>= 0`.
        sigma: f64,
    },
    /// Lomax (Pareto II) with unit scale.
    Pareto {
        /// Shape, `> 0`.
        shape: f64,
    },
    /// Exponential.
    Exponential {
        /// Scale (`1 / rate`), `> 0`.
        scale: f64,
    },
    /// Gamma.
    Gamma {
        /// Shape, `> 0`.
        shape: f64,
        /// Scale, `> 0`.
        scale: f64,
    },
    /// Weibull with unit scale.
    Weibull {
        /// Shape, `> 0`.
        shape: f64,
    },
    /// Chi-squared.
    Chisquare {
        /// Integer-valued degrees of freedom, `> 0`.
        degfreedom: f64,
    },
    /// Wald (inverse Gaussian).
    Wald {
        /// Mean, `> 0`.
        mean: f64,
        /// Scale (shape `lambda`), `> 0`.
        scale: f64,
    },
    /// Binomial counts returned as floats.
    Binomial {
        /// Number of trials.
        trials: u64,
        /// Success probability in `[0, 1]`.
        probability: f64,
    },
}

impl DistributionSpec {
    /// Registry kind of this spec.
    #[must_use]
    pub const fn kind(&self) -> DistributionKind {
        match self {
            Self::Normal { .. } => DistributionKind::Normal,
            Self::Uniform { .. } => DistributionKind::Uniform,
            Self::Poisson { .. } => DistributionKind::Poisson,
            Self::Lognormal { .. } => DistributionKind::Lognormal,
            Self::Pareto { .. } => DistributionKind::Pareto,
            Self::Exponential { .. } => DistributionKind::Exponential,
            Self::Gamma { .. } => DistributionKind::Gamma,
            Self::Weibull { .. } => DistributionKind::Weibull,
            Self::Chisquare { .. } => DistributionKind::Chisquare,
            Self::Wald { .. } => DistributionKind::Wald,
            Self::Binomial { .. } => DistributionKind::Binomial,
        }
    }

    /// Parameters keyed by canonical name, in registry order.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn params(&self) -> IndexMap<String, f64> {
        let values: Vec<f64> = match *self {
            Self::Normal { mean, sd } => vec![mean, sd],
            Self::Uniform { low, high } => vec![low, high],
            Self::Poisson { mean } => vec![mean],
            Self::Lognormal { mean, sigma } => vec![mean, sigma],
            Self::Pareto { shape } | Self::Weibull { shape } => vec![shape],
            Self::Exponential { scale } => vec![scale],
            Self::Gamma { shape, scale } => vec![shape, scale],
            Self::Chisquare { degfreedom } => vec![degfreedom],
            Self::Wald { mean, scale } => vec![mean, scale],
            Self::Binomial {
                trials,
                probability,
            } => vec![trials as f64, probability],
        };
        self.kind()
            .parameters()
            .iter()
            .zip(values)
            .map(|(parameter, value)| (parameter.name.to_string(), value))
            .collect()
    }

    /// Domain checks for every parameter; an empty result means the spec is usable.
    #[must_use]
    pub fn check(&self) -> Vec<DistributionError> {
        let kind = self.kind();
        let mut problems = Vec::new();
        let mut require = |ok: bool, parameter: &'static str, reason: &str| {
            if !ok {
                problems.push(invalid(kind, parameter, reason));
            }
        };
        match *self {
            Self::Normal { mean, sd } => {
                require(mean.is_finite(), "mean", "must be finite");
                require(sd.is_finite() && sd >= 0.0, "sd", "must be finite and >= 0");
            }
            Self::Uniform { low, high } => {
                require(low.is_finite(), "low", "must be finite");
                require(high.is_finite(), "high", "must be finite");
                require(low <= high, "high", "must not be below `low`");
                require(
                    !(low.is_finite() && high.is_finite()) || (high - low).is_finite(),
                    "high",
                    "`high - low` must be finite",
                );
            }
            Self::Poisson { mean } => {
                require(mean.is_finite() && mean > 0.0, "mean", "must be finite and > 0");
            }
            Self::Lognormal { mean, sigma } => {
                require(mean.is_finite(), "mean", "must be finite");
                require(
                    sigma.is_finite() && sigma >= 0.0,
                    "sigma",
                    "must be finite and >= 0",
                );
            }
            Self::Pareto { shape } | Self::Weibull { shape } => {
                require(shape.is_finite() && shape > 0.0, "shape", "must be finite and > 0");
            }
            Self::Exponential { scale } => {
                require(scale.is_finite() && scale > 0.0, "scale", "must be finite and > 0");
            }
            Self::Gamma { shape, scale } => {
                require(shape.is_finite() && shape > 0.0, "shape", "must be finite and > 0");
                require(scale.is_finite() && scale > 0.0, "scale", "must be finite and > 0");
            }
            Self::Chisquare { degfreedom } => {
                require(
                    is_whole(degfreedom) && degfreedom > 0.0,
                    "degfreedom",
                    "must be a positive integer",
                );
            }
            Self::Wald { mean, scale } => {
                require(mean.is_finite() && mean > 0.0, "mean", "must be finite and > 0");
                require(scale.is_finite() && scale > 0.0, "scale", "must be finite and > 0");
            }
            Self::Binomial { probability, .. } => {
                require(
                    (0.0..=1.0).contains(&probability),
                    "probability",
                    "must lie in [0, 1]",
                );
            }
        }
        problems
    }

    /// Draws `count` independent samples.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::InvalidParameter`] when the parameters would not
    /// satisfy [`DistributionSpec::check`].
    #[allow(clippy::cast_precision_loss)]
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Result<Vec<f64>, DistributionError> {
        let kind = self.kind();
        let samples = match *self {
            Self::Normal { mean, sd } => {
                collect(&Normal::new(mean, sd).map_err(rejected(kind, "sd"))?, rng, count)
            }
            Self::Uniform { low, high } => {
                if low == high {
                    return Ok(vec![low; count]);
                }
                if !(low < high && (high - low).is_finite()) {
                    return Err(invalid(kind, "high", "must not be below `low`"));
                }
                collect(&Uniform::new(low, high), rng, count)
            }
            Self::Poisson { mean } => {
                let poisson: Poisson<f64> = Poisson::new(mean).map_err(rejected(kind, "mean"))?;
                collect(&poisson, rng, count)
            }
            Self::Lognormal { mean, sigma } => collect(
                &LogNormal::new(mean, sigma).map_err(rejected(kind, "sigma"))?,
                rng,
                count,
            ),
            Self::Pareto { shape } => {
                let pareto = Pareto::new(1.0, shape).map_err(rejected(kind, "shape"))?;
                (0..count).map(|_| pareto.sample(rng) - 1.0).collect()
            }
            Self::Exponential { scale } => {
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(invalid(kind, "scale", "must be finite and > 0"));
                }
                collect(&Exp::new(scale.recip()).map_err(rejected(kind, "scale"))?, rng, count)
            }
            Self::Gamma { shape, scale } => collect(
                &Gamma::new(shape, scale).map_err(rejected(kind, "shape"))?,
                rng,
                count,
            ),
            Self::Weibull { shape } => collect(
                &Weibull::new(1.0, shape).map_err(rejected(kind, "shape"))?,
                rng,
                count,
            ),
            Self::Chisquare { degfreedom } => collect(
                &ChiSquared::new(degfreedom).map_err(rejected(kind, "degfreedom"))?,
                rng,
                count,
            ),
            Self::Wald { mean, scale } => collect(
                &InverseGaussian::new(mean, scale).map_err(rejected(kind, "mean"))?,
                rng,
                count,
            ),
            Self::Binomial {
                trials,
                probability,
            } => {
                let binomial =
                    Binomial::new(trials, probability).map_err(rejected(kind, "probability"))?;
                (0..count).map(|_| binomial.sample(rng) as f64).collect()
            }
        };
        Ok(samples)
    }
}

fn collect<D, R>(distribution: &D, rng: &mut R, count: usize) -> Vec<f64>
where
    D: Distribution<f64>,
    R: Rng + ?Sized,
{
    (0..count).map(|_| distribution.sample(rng)).collect()
}

fn is_whole(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0
}

fn invalid(kind: DistributionKind, parameter: &'static str, reason: &str) -> DistributionError {
    DistributionError::InvalidParameter {
        distribution: kind.name(),
        parameter,
        reason: reason.to_string(),
    }
}

fn rejected<E: fmt::Debug>(
    kind: DistributionKind,
    parameter: &'static str,
) -> impl FnOnce(E) -> DistributionError {
    move |err| invalid(kind, parameter, &format!("rejected by sampler: {err:?}"))
}
