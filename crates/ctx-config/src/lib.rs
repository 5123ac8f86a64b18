//! YAML configuration for the context engine
//!
//! A configuration file declares engine tunables, the sensors known to the
//! in-memory backend and the expressions registered at startup. Files may
//! be split with custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use ctx_config::Settings;
//!
//! let settings = Settings::load("/etc/contextd/contextd.yaml")?;
//! let eval_config = settings.engine.eval_config();
//! ```

mod error;
mod loader;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use settings::{EngineSettings, ExpressionConfig, SensorDeclaration, Settings};
