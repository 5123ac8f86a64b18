//! Typed configuration document
//!
//! ```yaml
//! engine:
//!   no_data_retry_ms: 1000
//!   store_path: /var/lib/contextd/expressions.json
//! sensors:
//!   - path: sensor.temperature
//!     cost: 2.0
//!     startup_ms: 200
//! expressions:
//!   - id: too_hot
//!     callbacks: { on_true: alerts }
//!     expression: { type: comparison, ... }
//! ```

use ctx_core::Expression;
use ctx_eval::EvalConfig;
use ctx_scheduler::{CallbackTargets, SchedulerConfig};
use ctx_sensor_store::SensorSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Engine tunables from the `engine:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Defer used when a leaf has no readings
    pub no_data_retry_ms: u64,
    /// Requeue delay after an evaluation error
    pub error_retry_ms: u64,
    /// Floor between two evaluations of one id
    pub min_requeue_interval_ms: u64,
    /// Cost estimate for sensors without a declared cost
    pub default_sensor_cost: f64,
    pub comparison_cost: f64,
    /// Extra cost when a leaf is currently suspended
    pub resume_penalty: f64,
    /// Optional JSON persistence file
    pub store_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let eval = EvalConfig::default();
        let scheduler = SchedulerConfig::default();
        Self {
            no_data_retry_ms: millis(eval.no_data_retry),
            error_retry_ms: millis(scheduler.error_retry),
            min_requeue_interval_ms: millis(scheduler.min_requeue_interval),
            default_sensor_cost: eval.default_sensor_cost,
            comparison_cost: eval.comparison_cost,
            resume_penalty: eval.resume_penalty,
            store_path: None,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl EngineSettings {
    pub fn eval_config(&self) -> EvalConfig {
        EvalConfig {
            no_data_retry: Duration::from_millis(self.no_data_retry_ms),
            default_sensor_cost: self.default_sensor_cost,
            comparison_cost: self.comparison_cost,
            resume_penalty: self.resume_penalty,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            error_retry: Duration::from_millis(self.error_retry_ms),
            min_requeue_interval: Duration::from_millis(self.min_requeue_interval_ms),
        }
    }
}

/// A sensor declared for the in-memory backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDeclaration {
    pub path: String,
    #[serde(flatten)]
    pub spec: SensorSpec,
}

/// An expression registered at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionConfig {
    /// Registration id; a ULID when absent
    #[serde(default = "generate_id")]
    pub id: String,
    #[serde(default)]
    pub callbacks: CallbackTargets,
    pub expression: Expression,
}

fn generate_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// The whole configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub sensors: Vec<SensorDeclaration>,
    pub expressions: Vec<ExpressionConfig>,
}

impl Settings {
    /// Load settings from a YAML file, resolving tags
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let value = load_yaml(path)?;
        let settings = Self::from_value(value, path)?;
        debug!(
            path = ?path,
            sensors = settings.sensors.len(),
            expressions = settings.expressions.len(),
            "Loaded configuration"
        );
        Ok(settings)
    }

    /// Parse settings from YAML text without tag resolution
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let source = Path::new("<string>");
        let value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source.to_path_buf(),
            source: e,
        })?;
        Self::from_value(value, source)
    }

    fn from_value(value: serde_yaml::Value, path: &Path) -> ConfigResult<Self> {
        // An empty document is an all-defaults configuration
        let settings: Settings = if value.is_null() {
            Settings::default()
        } else {
            serde_yaml::from_value(value).map_err(|e| ConfigError::Deserialize {
                path: path.to_path_buf(),
                source: e,
            })?
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> ConfigResult<()> {
        let engine = &self.engine;
        for (key, cost) in [
            ("engine.default_sensor_cost", engine.default_sensor_cost),
            ("engine.comparison_cost", engine.comparison_cost),
            ("engine.resume_penalty", engine.resume_penalty),
        ] {
            if cost.is_nan() || cost < 0.0 {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }

        let mut paths = HashSet::new();
        for sensor in &self.sensors {
            if sensor.path.is_empty() {
                return Err(invalid("sensors", "sensor path is empty"));
            }
            if !paths.insert(sensor.path.as_str()) {
                return Err(invalid("sensors", format!("duplicate sensor '{}'", sensor.path)));
            }
            if sensor.spec.cost.is_nan() || sensor.spec.cost < 0.0 {
                return Err(invalid(&sensor.path, "cost must be a non-negative number"));
            }
        }

        let mut ids = HashSet::new();
        for expr in &self.expressions {
            if !ids.insert(expr.id.as_str()) {
                return Err(invalid("expressions", format!("duplicate id '{}'", expr.id)));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctx_core::{Comparator, HistoryReductionMode, Scalar};
    use std::fs;
    use tempfile::TempDir;

    const FULL: &str = r#"
engine:
  no_data_retry_ms: 2000
  min_requeue_interval_ms: 100
  store_path: /tmp/expressions.json
sensors:
  - path: sensor.temperature
    cost: 2.5
    startup_ms: 200
  - path: sensor.door
expressions:
  - id: too_hot
    callbacks: { on_true: alerts, on_change: changes }
    expression:
      type: comparison
      op: gt
      left:
        type: sensor
        entity: sensor.temperature
        history_reduction: max
        history_length_ms: 60000
      right: { type: constant, value: 25 }
  - expression:
      type: logic
      op: not
      left:
        type: comparison
        op: eq
        left: { type: sensor, entity: sensor.door }
        right: { type: constant, value: open }
"#;

    #[test]
    fn test_full_document() {
        let settings = Settings::from_yaml_str(FULL).unwrap();

        assert_eq!(settings.engine.no_data_retry_ms, 2000);
        assert_eq!(settings.engine.error_retry_ms, 5000);
        assert_eq!(
            settings.engine.store_path.as_deref(),
            Some(Path::new("/tmp/expressions.json"))
        );

        assert_eq!(settings.sensors[0].spec.cost, 2.5);
        assert_eq!(settings.sensors[0].spec.startup_ms, 200);
        assert_eq!(settings.sensors[1].spec, SensorSpec::default());

        let hot = &settings.expressions[0];
        assert_eq!(hot.id, "too_hot");
        assert_eq!(hot.callbacks.on_change.as_deref(), Some("changes"));
        let Expression::Comparison { left, op, right, .. } = &hot.expression else {
            panic!("expected a comparison");
        };
        assert_eq!(*op, Comparator::Gt);
        assert!(matches!(
            &**left,
            Expression::Sensor(leaf) if leaf.history_reduction == HistoryReductionMode::Max
                && leaf.history_length_ms == 60_000
        ));
        assert_eq!(
            **right,
            Expression::Constant {
                value: Scalar::Int(25)
            }
        );

        // Missing ids are generated
        assert_eq!(settings.expressions[1].id.len(), 26);
        assert!(settings.expressions[1].expression.is_boolean());
    }

    #[test]
    fn test_conversions() {
        let settings = Settings::from_yaml_str(FULL).unwrap();
        let eval = settings.engine.eval_config();
        assert_eq!(eval.no_data_retry, Duration::from_millis(2000));
        assert_eq!(eval.default_sensor_cost, 1.0);

        let scheduler = settings.engine.scheduler_config();
        assert_eq!(scheduler.min_requeue_interval, Duration::from_millis(100));
        assert_eq!(scheduler.error_retry, Duration::from_millis(5000));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = Settings::from_yaml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.engine.eval_config(), EvalConfig::default());
        assert_eq!(settings.engine.scheduler_config(), SchedulerConfig::default());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
expressions:
  - id: a
    expression: { type: constant, value: 1 }
  - id: a
    expression: { type: constant, value: 2 }
"#;
        let err = Settings::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "expressions"));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let err = Settings::from_yaml_str("sensors:\n  - path: s\n    cost: -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_schema_error() {
        let err = Settings::from_yaml_str("expressions:\n  - id: x\n").unwrap_err();
        assert!(matches!(err, ConfigError::Deserialize { .. }));
    }

    #[test]
    fn test_load_with_includes() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("contextd.yaml"),
            "sensors: !include sensors.yaml\nexpressions: !include_dir_merge_list expressions\n",
        )
        .unwrap();
        fs::write(dir.path().join("sensors.yaml"), "- path: sensor.door\n").unwrap();
        fs::create_dir(dir.path().join("expressions")).unwrap();
        fs::write(
            dir.path().join("expressions").join("door.yaml"),
            "- id: door_open\n  expression:\n    type: comparison\n    op: eq\n    left: { type: sensor, entity: sensor.door }\n    right: { type: constant, value: open }\n",
        )
        .unwrap();

        let settings = Settings::load(dir.path().join("contextd.yaml")).unwrap();
        assert_eq!(settings.sensors[0].path, "sensor.door");
        assert_eq!(settings.expressions[0].id, "door_open");
    }
}
