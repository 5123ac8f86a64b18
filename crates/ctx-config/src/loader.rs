//! YAML loader with custom tag support
//!
//! Supported tags:
//! - `!include path` - Include another YAML file
//! - `!include_dir_merge_list dir` - Merge lists from all YAML files in a directory
//! - `!env_var VAR` or `!env_var VAR default` - Environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader resolving relative includes against the including file
pub struct YamlLoader {
    /// Base directory for top-level relative paths
    base_dir: PathBuf,
    /// Files currently being loaded, for cycle detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = ?path, "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    result.insert(k, self.process_value(v, source_path)?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Processing tag");

        match tag.as_str() {
            "!include" => {
                let path = self.value_to_path(&tagged.value, source_path)?;
                debug!(path = ?path, "Including file");
                self.load_file(&path)
            }
            "!include_dir_merge_list" => self.include_dir_merge_list(&tagged.value, source_path),
            "!env_var" => env_var(&tagged.value),
            // Expression nodes never carry tags; keep unknown ones verbatim
            _ => {
                let value = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    /// Concatenate the lists of every YAML file in a directory, by file name
    fn include_dir_merge_list(&mut self, value: &Value, source_path: &Path) -> ConfigResult<Value> {
        let dir = self.value_to_path(value, source_path)?;
        debug!(dir = ?dir, "Including directory as merged list");

        let mut result = Vec::new();
        for file in yaml_files(&dir)? {
            match self.load_file(&file)? {
                Value::Sequence(seq) => result.extend(seq),
                Value::Null => {}
                other => result.push(other),
            }
        }
        Ok(Value::Sequence(result))
    }

    fn value_to_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(raw) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{value:?}"),
                reason: "path must be a string".to_string(),
            });
        };

        let path = Path::new(raw);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base = source_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(&self.base_dir);
        Ok(base.join(path))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// `!env_var NAME [default]`
fn env_var(value: &Value) -> ConfigResult<Value> {
    let Value::String(spec) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let mut parts = spec.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let default = parts.next().map(str::trim);

    match (std::env::var(name), default) {
        (Ok(v), _) => {
            debug!(var = name, "Substituted env var");
            // Parse so numbers and booleans keep their YAML type
            Ok(serde_yaml::from_str(&v).unwrap_or(Value::String(v)))
        }
        (Err(_), Some(default)) => Ok(serde_yaml::from_str(default)
            .unwrap_or_else(|_| Value::String(default.to_string()))),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// YAML files in a directory, sorted by name
fn yaml_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ConfigError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| ConfigError::ReadFile {
            path: dir.to_path_buf(),
            source: e,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    Ok(files)
}

/// Load a YAML file with tag processing
pub fn load_yaml(path: impl AsRef<Path>) -> ConfigResult<Value> {
    let path = path.as_ref();
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let file = path.file_name().map(Path::new).unwrap_or(path);
    YamlLoader::new(base).load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "main.yaml", "engine: !include conf/engine.yaml\n");
        write_file(dir.path(), "conf/engine.yaml", "inner: !include more.yaml\n");
        write_file(dir.path(), "conf/more.yaml", "42\n");

        let value = load_yaml(dir.path().join("main.yaml")).unwrap();
        assert_eq!(value["engine"]["inner"], Value::from(42));
    }

    #[test]
    fn test_include_dir_merge_list() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "main.yaml", "expressions: !include_dir_merge_list exprs\n");
        write_file(dir.path(), "exprs/b.yaml", "- id: b1\n- id: b2\n");
        write_file(dir.path(), "exprs/a.yml", "- id: a1\n");
        write_file(dir.path(), "exprs/notes.txt", "ignored");

        let value = load_yaml(dir.path().join("main.yaml")).unwrap();
        let ids: Vec<&str> = value["expressions"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a1", "b1", "b2"]);
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "main.yaml", "x: !include_dir_merge_list nope\n");
        let err = load_yaml(dir.path().join("main.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::DirectoryNotFound { .. }));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let err = load_yaml(dir.path().join("a.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::CircularInclude { .. }));
    }

    #[test]
    fn test_env_var() {
        std::env::set_var("CTX_CONFIG_TEST_RETRY", "2500");
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "main.yaml",
            "retry: !env_var CTX_CONFIG_TEST_RETRY\nfallback: !env_var CTX_CONFIG_TEST_UNSET_VAR 7\n",
        );

        let value = load_yaml(dir.path().join("main.yaml")).unwrap();
        assert_eq!(value["retry"], Value::from(2500));
        assert_eq!(value["fallback"], Value::from(7));
    }

    #[test]
    fn test_env_var_missing() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "main.yaml", "x: !env_var CTX_CONFIG_TEST_NEVER_SET\n");
        let err = load_yaml(dir.path().join("main.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { ref var } if var == "CTX_CONFIG_TEST_NEVER_SET"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "bad.yaml", "key: [unclosed\n");
        let err = load_yaml(dir.path().join("bad.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml { ref path, .. } if path.ends_with("bad.yaml")));
    }
}
