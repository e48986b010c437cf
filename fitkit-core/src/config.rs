//! Experiment configuration.
//!
//! A config is a set of named sections. Component sections (`model`, `loss`,
//! `optim`, `optim_scheduler`) are `{type, kwargs}` descriptors resolved
//! through the registries; the remaining sections are literal values.
//!
//! Uses `figment` for layered loading: config file -> `FITKIT_` environment.

use crate::error::{FitError, Result};
use crate::training::callbacks::MonitorMode;
use crate::training::strategy::Strategy;
use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Json, Toml},
    value::{Dict, Map, Value},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Constructor arguments of a component, kept untyped until resolution.
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// Environment prefix for config overrides (`FITKIT_TRAINER__MAX_EPOCHS=3`).
pub const ENV_PREFIX: &str = "FITKIT_";

/// Full experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub model: ComponentSpec,
    pub loss: ComponentSpec,
    pub optim: ComponentSpec,
    pub optim_scheduler: ComponentSpec,
    #[serde(default)]
    pub data: DataConfig,
    pub instance: InstanceConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    pub early_stopping: EarlyStoppingConfig,
}

/// A `{type, kwargs}` descriptor naming a registered implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl ComponentSpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            kwargs: Kwargs::new(),
        }
    }

    /// Builder-style kwarg insertion, mostly for programmatic configs.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }
}

/// Decode kwargs into the typed argument struct of a component.
pub fn decode_kwargs<T: DeserializeOwned>(
    kind: &'static str,
    name: &str,
    kwargs: &Kwargs,
) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(kwargs.clone())).map_err(|source| {
        FitError::InvalidKwargs {
            kind,
            name: name.to_string(),
            source,
        }
    })
}

/// Batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Per-device batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Shuffle the training loader every epoch.
    #[serde(default)]
    pub shuffle: bool,
    /// Drop a trailing partial batch.
    #[serde(default)]
    pub drop_last: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            shuffle: false,
            drop_last: false,
        }
    }
}

fn default_batch_size() -> usize {
    32
}

/// Arguments of the instance preparation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub source: InstanceSource,
    /// Fraction of instances held out for validation.
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f64,
    /// Shuffle before splitting.
    #[serde(default = "default_true")]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: u64,
}

/// Where instances come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceSource {
    /// Targets produced by a fixed random linear map plus uniform noise.
    Synthetic {
        n: usize,
        in_features: usize,
        out_features: usize,
        #[serde(default)]
        noise: f32,
        #[serde(default)]
        seed: u64,
    },
    /// One `{"input": [...], "target": [...]}` object per line.
    Jsonl { path: PathBuf },
}

fn default_val_fraction() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

/// Trainer settings. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainerConfig {
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    /// Early stopping is ignored before this many epochs.
    #[serde(default)]
    pub min_epochs: usize,
    #[serde(default = "default_devices", alias = "gpus")]
    pub devices: usize,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub limit_train_batches: Option<usize>,
    #[serde(default)]
    pub limit_val_batches: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            min_epochs: 0,
            devices: default_devices(),
            strategy: Strategy::default(),
            limit_train_batches: None,
            limit_val_batches: None,
            seed: None,
        }
    }
}

fn default_max_epochs() -> usize {
    10
}

fn default_devices() -> usize {
    1
}

/// Early-stopping policy settings; `monitor` is shared with the checkpoint policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EarlyStoppingConfig {
    pub monitor: String,
    #[serde(default)]
    pub min_delta: f64,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub mode: MonitorMode,
    /// Fail when the monitored metric is missing.
    #[serde(default = "default_true")]
    pub strict: bool,
}

fn default_patience() -> usize {
    3
}

impl ExperimentConfig {
    /// Build a config from an in-memory JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = Figment::from(DevicesAlias(Toml::string(toml)))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Literal-value checks that no registry lookup would catch.
    pub fn validate(&self) -> Result<()> {
        if self.data.batch_size == 0 {
            return Err(FitError::config("data.batch_size must be at least 1"));
        }
        if self.trainer.devices == 0 {
            return Err(FitError::config("trainer.devices must be at least 1"));
        }
        if self.data.batch_size.checked_mul(self.trainer.devices).is_none() {
            return Err(FitError::config(format!(
                "data.batch_size {} times trainer.devices {} overflows",
                self.data.batch_size, self.trainer.devices
            )));
        }
        if self.trainer.max_epochs == 0 {
            return Err(FitError::config("trainer.max_epochs must be at least 1"));
        }
        if !(self.instance.val_fraction > 0.0 && self.instance.val_fraction < 1.0) {
            return Err(FitError::config(format!(
                "instance.val_fraction must lie in (0, 1), got {}",
                self.instance.val_fraction
            )));
        }
        if self.early_stopping.monitor.is_empty() {
            return Err(FitError::config("early_stopping.monitor must not be empty"));
        }
        Ok(())
    }
}

/// Rewrites `trainer.gpus` to `trainer.devices` inside one provider.
///
/// The serde alias alone breaks once two layers spell the key differently:
/// the merged dict then holds both keys and extraction fails with a
/// duplicate field. Normalising per layer lets the later layer win.
struct DevicesAlias<P>(P);

impl<P: Provider> Provider for DevicesAlias<P> {
    fn metadata(&self) -> Metadata {
        self.0.metadata()
    }

    fn data(&self) -> std::result::Result<Map<Profile, Dict>, figment::Error> {
        let mut data = self.0.data()?;
        for dict in data.values_mut() {
            if let Some(Value::Dict(_, trainer)) = dict.get_mut("trainer") {
                if let Some(gpus) = trainer.remove("gpus") {
                    trainer.entry("devices".to_string()).or_insert(gpus);
                }
            }
        }
        Ok(data)
    }

    fn profile(&self) -> Option<Profile> {
        self.0.profile()
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `FITKIT_`, nested with `__`)
/// 2. The config file (`.toml` or `.json`, chosen by extension)
pub fn load_config(path: &Path) -> Result<ExperimentConfig> {
    if !path.exists() {
        return Err(FitError::not_found(format!(
            "config file {}",
            path.display()
        )));
    }

    let mut figment = Figment::new();
    figment = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => figment.merge(DevicesAlias(Json::file(path))),
        _ => figment.merge(DevicesAlias(Toml::file(path))),
    };
    figment = figment.merge(DevicesAlias(Env::prefixed(ENV_PREFIX).split("__")));

    let config: ExperimentConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    tracing::debug!(path = %path.display(), model = %config.model.kind, "Loaded experiment config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "model": {"type": "Linear", "kwargs": {"in_features": 3, "out_features": 1}},
            "loss": {"type": "MSELoss"},
            "optim": {"type": "SGD", "kwargs": {"lr": 0.1}},
            "optim_scheduler": {"type": "StepLR", "kwargs": {"step_size": 5}},
            "data": {"batch_size": 8},
            "instance": {"source": {"kind": "synthetic", "n": 40, "in_features": 3, "out_features": 1}},
            "early_stopping": {"monitor": "val_loss"}
        })
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = ExperimentConfig::from_value(sample()).unwrap();
        assert_eq!(config.trainer.max_epochs, 10);
        assert_eq!(config.trainer.devices, 1);
        assert_eq!(config.trainer.strategy, Strategy::Single);
        assert_eq!(config.early_stopping.patience, 3);
        assert!(config.early_stopping.strict);
        assert!((config.instance.val_fraction - 0.2).abs() < f64::EPSILON);
        assert!(config.loss.kwargs.is_empty());
    }

    #[test]
    fn test_gpus_alias_and_unknown_trainer_key() {
        let mut value = sample();
        value["trainer"] = json!({"gpus": 4, "strategy": "dp"});
        let config = ExperimentConfig::from_value(value.clone()).unwrap();
        assert_eq!(config.trainer.devices, 4);
        assert_eq!(config.trainer.strategy, Strategy::DataParallel);

        value["trainer"] = json!({"max_epoch": 4});
        assert!(ExperimentConfig::from_value(value).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_literals() {
        let mut value = sample();
        value["data"]["batch_size"] = json!(0);
        assert!(matches!(
            ExperimentConfig::from_value(value),
            Err(FitError::Config(_))
        ));

        let mut value = sample();
        value["instance"]["val_fraction"] = json!(1.0);
        assert!(ExperimentConfig::from_value(value).is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let config = ExperimentConfig::from_toml_str(
            r#"
            [model]
            type = "Mlp"
            kwargs = { in_features = 2, hidden = [4], out_features = 1 }

            [loss]
            type = "L1Loss"

            [optim]
            type = "Adam"
            kwargs = { lr = 0.01 }

            [optim_scheduler]
            type = "ExponentialLR"
            kwargs = { gamma = 0.9 }

            [instance.source]
            kind = "synthetic"
            n = 10
            in_features = 2
            out_features = 1

            [early_stopping]
            monitor = "val_loss"
            mode = "min"
            "#,
        )
        .unwrap();
        assert_eq!(config.model.kind, "Mlp");
        assert_eq!(config.model.kwargs["hidden"], json!([4]));
        assert_eq!(config.data.batch_size, 32);
    }

    #[test]
    fn test_validate_rejects_overflowing_batch() {
        let mut value = sample();
        value["data"]["batch_size"] = json!(usize::MAX / 2 + 1);
        value["trainer"] = json!({"strategy": "dp", "devices": 2});
        let err = ExperimentConfig::from_value(value).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[test]
    fn test_devices_spellings_merge_across_layers() {
        let figment = Figment::new()
            .merge(DevicesAlias(Toml::string("[trainer]\ngpus = 2")))
            .merge(DevicesAlias(Toml::string("[trainer]\ndevices = 4")));
        let trainer: TrainerConfig = figment.extract_inner("trainer").unwrap();
        assert_eq!(trainer.devices, 4);

        let figment = Figment::new()
            .merge(DevicesAlias(Toml::string("[trainer]\ndevices = 4")))
            .merge(DevicesAlias(Toml::string("[trainer]\ngpus = 3")));
        let trainer: TrainerConfig = figment.extract_inner("trainer").unwrap();
        assert_eq!(trainer.devices, 3);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/fitkit.toml")).unwrap_err();
        assert!(matches!(err, FitError::NotFound(_)));
    }

    #[test]
    fn test_load_config_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("experiment.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.optim.kind, "SGD");
    }

    #[test]
    fn test_decode_kwargs_reports_component() {
        #[derive(Debug, Deserialize)]
        #[serde(deny_unknown_fields)]
        #[allow(dead_code)]
        struct Args {
            lr: f32,
        }
        let spec = ComponentSpec::new("SGD").with("learning_rate", 0.1);
        let err = decode_kwargs::<Args>("optimizer", &spec.kind, &spec.kwargs).unwrap_err();
        assert!(err.to_string().starts_with("Invalid kwargs for optimizer 'SGD'"));
    }
}
