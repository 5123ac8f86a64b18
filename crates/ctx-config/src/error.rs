use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure while loading or validating a configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("bad include target {path}: {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// `!include_dir_merge_list` target is not a directory
    #[error("no such directory {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    #[error("environment variable {var} is unset and has no default")]
    EnvVarNotFound { var: String },

    #[error("{key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Well-formed YAML that does not describe engine settings
    #[error("{path} does not match the settings schema: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
