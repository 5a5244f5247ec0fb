//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by `CPM`
//! prefixed environment variables. An example configuration file lives at
//! `configs/config.toml` in the repository root.

use std::{fmt, path::Path, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically
/// named settings field. Sections left out fall back to their defaults.
pub struct Settings {
    #[validate]
    #[serde(default)]
    pub sim: SimSettings,
    #[validate]
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation
    /// failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Creates validated default settings, for runs without a configuration
    /// file.
    pub fn with_defaults() -> Result<Self, SettingsError> {
        let settings = Settings::default();
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("cpm").separator("__"))?;
        config.try_into()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sim: SimSettings::default(),
            output: OutputSettings::default(),
            log: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
#[validate(schema(function = "validate_sim"))]
/// Simulation settings.
pub struct SimSettings {
    /// The number of simulated clients, each running its own bandit.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [sim]
    /// num_clients = 6
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// CPM_SIM__NUM_CLIENTS=6
    /// ```
    pub num_clients: usize,

    /// The number of arms (candidate collaboration choices) per bandit.
    pub num_arms: usize,

    /// The dimension of the synthetic context vectors.
    pub context_dim: usize,

    /// The number of rounds per trial.
    pub num_rounds: usize,

    /// The number of independent trials averaged into the output curves.
    pub num_trials: usize,

    /// The exploration coefficient of the upper-confidence score. Must be
    /// non-negative.
    pub alpha: f64,

    /// The ridge prior on the design matrices. Must be strictly positive.
    pub lambda: f64,

    /// The standard deviation of the Gaussian reward noise.
    pub noise_sigma: f64,

    /// Scale applied to the mean reward when mapping it to the bounded
    /// Pass@1 proxy.
    pub pass1_scale: f64,

    /// Offset applied to the mean reward when mapping it to the bounded
    /// Pass@1 proxy.
    pub pass1_offset: f64,

    /// The base random seed. Together with the trial and client indices it
    /// determines every stochastic draw of a run.
    pub base_seed: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            num_clients: 6,
            num_arms: 5,
            context_dim: 8,
            num_rounds: 100,
            num_trials: 10,
            alpha: 1.,
            lambda: 1.,
            noise_sigma: 0.15,
            pass1_scale: 0.3,
            pass1_offset: 0.1,
            base_seed: 42,
        }
    }
}

impl SimSettings {
    /// Checks the simulation settings.
    fn validate_sim(&self) -> Result<(), ValidationError> {
        self.validate_counts()?;
        self.validate_coefficients()
    }

    /// Checks the validity of the roster and loop counts.
    fn validate_counts(&self) -> Result<(), ValidationError> {
        // the validate attribute only accepts literals, therefore we check
        // the invariants here
        if self.num_clients >= 1
            && self.num_arms >= 1
            && self.context_dim >= 1
            && self.num_rounds >= 1
            && self.num_trials >= 1
        {
            Ok(())
        } else {
            Err(ValidationError::new("invalid count(s)"))
        }
    }

    /// Checks the validity of the bandit and noise coefficients.
    fn validate_coefficients(&self) -> Result<(), ValidationError> {
        if self.lambda > 0. && self.alpha >= 0. && self.noise_sigma >= 0. {
            Ok(())
        } else {
            Err(ValidationError::new("invalid coefficient(s)"))
        }
    }
}

/// A wrapper for validate derive.
fn validate_sim(s: &SimSettings) -> Result<(), ValidationError> {
    s.validate_sim()
}

#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_output"))]
/// Output artifact settings.
pub struct OutputSettings {
    /// The directory the curve CSV files are written to.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [output]
    /// dir = "results/simulation"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// CPM_OUTPUT__DIR=results/simulation
    /// ```
    pub dir: PathBuf,

    /// The number of decimal digits the curve values are rounded to. Must
    /// not exceed 17, beyond which `f64` formatting carries no information.
    pub precision: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results/simulation"),
            precision: 6,
        }
    }
}

impl OutputSettings {
    fn validate_output(&self) -> Result<(), ValidationError> {
        if self.precision <= 17 {
            Ok(())
        } else {
            Err(ValidationError::new("precision out of range"))
        }
    }
}

/// A wrapper for validate derive.
fn validate_output(s: &OutputSettings) -> Result<(), ValidationError> {
    s.validate_output()
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// CPM_LOG__FILTER=info
    /// ```
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: EnvFilter::new("info"),
        }
    }
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
