//! Configuration for the compute core.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed `SOLUTIONS_` where `__` separates nested
//! keys (`SOLUTIONS_FORMULA__MAX_LENGTH=500`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recalc::DEFAULT_MAX_FORMULA_LEN;
use crate::tco::TcoInput;

/// Prefix of environment variables read by [`Config::load`].
pub const ENV_PREFIX: &str = "SOLUTIONS_";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value had the wrong type.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration value for key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormulaConfig {
    /// Longest formula accepted, in characters.
    pub max_length: usize,
}

impl Default for FormulaConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_FORMULA_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("solutions.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "solutions_compute=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Assumptions pre-filled in the TCO calculator.
    pub tco: TcoInput,
    pub formula: FormulaConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// The provider chain: defaults, then `path` if given, then environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.formula.max_length == 0 {
            return Err(ConfigError::InvalidValue {
                key: "formula.max_length".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.database_path".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.tco.validate().map_err(|err| ConfigError::InvalidValue {
            key: "tco".to_string(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default())))
            .unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.formula.max_length, DEFAULT_MAX_FORMULA_LEN);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solutions.toml");
        std::fs::write(
            &path,
            r#"
[formula]
max_length = 500

[storage]
database_path = "/var/lib/solutions/app.db"

[tco]
years = 15
energy_price_per_kwh = 0.31

[tco.alternative]
name = "Immersion"
capex = 1200000.0
ppue = 1.03
maintenance_per_year = 10000.0
water_per_year = 0.0
other_opex_per_year = 0.0
"#,
        )
        .unwrap();

        let config = Config::from_figment(
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path)),
        )
        .unwrap();
        assert_eq!(config.formula.max_length, 500);
        assert_eq!(
            config.storage.database_path,
            PathBuf::from("/var/lib/solutions/app.db")
        );
        assert_eq!(config.tco.years, 15);
        assert_eq!(config.tco.energy_price_per_kwh, 0.31);
        assert_eq!(config.tco.alternative.name, "Immersion");
        // Untouched keys keep their defaults.
        assert_eq!(config.tco.baseline, TcoInput::default().baseline);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::from_figment(
            Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&path)),
        )
        .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(("formula.max_length", 0));
        assert!(matches!(
            Config::from_figment(figment),
            Err(ConfigError::InvalidValue { key, .. }) if key == "formula.max_length"
        ));

        let figment =
            Figment::from(Serialized::defaults(Config::default())).merge(("tco.years", 80));
        let err = Config::from_figment(figment).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration value for key 'tco': horizon must be between 1 and 50 years, got 80"
        );

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(("formula.max_length", "lots"));
        assert!(matches!(
            Config::from_figment(figment),
            Err(ConfigError::Load(_))
        ));
    }
}
