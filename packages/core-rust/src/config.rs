//! Immutable service configuration.
//!
//! A [`ConfigStore`] is built once from `<dir>/default.json` deep-merged with
//! `<dir>/<env>.json`, then only read. Lookups take a dotted path or a list
//! of segments and fail loudly when the path is not defined.

use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

/// Environment variable naming the override file when none is given.
pub const ENV_VAR: &str = "SVCKIT_ENV";

const DEFAULT_NAME: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config value not defined in config file(s) for path: {path}")]
    Undefined { path: String },
    #[error("config value at '{path}' has an unexpected type: {message}")]
    Type { path: String, message: String },
    #[error("failed to read config file {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config {file} must be a JSON object")]
    NotAnObject { file: String },
}

/// Read-only merged configuration. Cheap to share behind an `Arc`.
///
/// Keys are kept exactly as written; lookups are case-sensitive.
#[derive(Clone, Default)]
pub struct ConfigStore {
    root: Map<String, Value>,
}

impl ConfigStore {
    /// A store with no values; every non-empty lookup is undefined.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads `default.json` and the environment override from `dir`.
    ///
    /// `env` falls back to [`ENV_VAR`]. Missing files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be read or is not a JSON object.
    pub fn load(dir: impl AsRef<Path>, env: Option<&str>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let env = env
            .map(str::to_string)
            .or_else(|| std::env::var(ENV_VAR).ok())
            .filter(|env| !env.is_empty() && env != DEFAULT_NAME);

        let mut store = Self::empty();

        let default_file = format!("{DEFAULT_NAME}.json");
        match read_source(dir, &default_file)? {
            Some(content) => {
                store.merge(parse(&default_file, &content)?);
                info!(file = %default_file, "CONF: read default config");
            }
            None => error!(file = %default_file, "CONF: could not find default config"),
        }

        if let Some(env) = env {
            let env_file = format!("{env}.json");
            match read_source(dir, &env_file)? {
                Some(content) => {
                    store.merge(parse(&env_file, &content)?);
                    info!(file = %env_file, "CONF: read environment specific config");
                }
                None => warn!(
                    file = %env_file,
                    "CONF: could not find environment specific config"
                ),
            }
        }

        Ok(store)
    }

    /// Builds a store from JSON text; handy for tests and embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if either document is not valid JSON.
    pub fn from_json(defaults: &str, overrides: Option<&str>) -> Result<Self, ConfigError> {
        let mut store = Self::empty();
        store.merge(parse("defaults", defaults)?);
        if let Some(overrides) = overrides {
            store.merge(parse("overrides", overrides)?);
        }
        Ok(store)
    }

    fn merge(&mut self, layer: Map<String, Value>) {
        merge_objects(&mut self.root, layer);
    }

    /// Typed lookup by dotted path, e.g. `"db.url"`. An empty path returns
    /// the whole configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Undefined`] when the path is absent and
    /// [`ConfigError::Type`] when the value does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigError> {
        let segments: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('.').collect()
        };
        self.get_path(&segments)
    }

    /// Typed lookup by path segments, e.g. `&["db", "url"]`.
    ///
    /// # Errors
    ///
    /// See [`ConfigStore::get`].
    pub fn get_path<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ConfigError> {
        let all;
        let value = if segments.is_empty() {
            all = self.all();
            &all
        } else {
            self.resolve(segments).ok_or_else(|| ConfigError::Undefined {
                path: segments.join(" > "),
            })?
        };
        T::deserialize(value).map_err(|err| ConfigError::Type {
            path: segments.join("."),
            message: err.to_string(),
        })
    }

    fn resolve(&self, segments: &[&str]) -> Option<&Value> {
        let (first, rest) = segments.split_first()?;
        rest.iter()
            .try_fold(self.root.get(*first)?, |value, segment| match value {
                Value::Object(map) => map.get(*segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Untyped lookup.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Undefined`] when the path is absent.
    pub fn get_value(&self, path: &str) -> Result<Value, ConfigError> {
        self.get(path)
    }

    /// True when `path` resolves to a value.
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        !path.is_empty() && self.get_value(path).is_ok()
    }

    /// The whole merged configuration as JSON.
    #[must_use]
    pub fn all(&self) -> Value {
        Value::Object(self.root.clone())
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("keys", &self.root.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn parse(file: &str, content: &str) -> Result<Map<String, Value>, ConfigError> {
    match serde_json::from_str(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::NotAnObject {
            file: file.to_string(),
        }),
        Err(source) => Err(ConfigError::Parse {
            file: file.to_string(),
            source,
        }),
    }
}

/// Objects merge key by key; any other value in `layer` replaces the base.
fn merge_objects(base: &mut Map<String, Value>, layer: Map<String, Value>) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_objects(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn read_source(dir: &Path, file: &str) -> Result<Option<String>, ConfigError> {
    let path = dir.join(file);
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|source| ConfigError::Read {
            file: path.display().to_string(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn env_file_deep_merges_over_default() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "default.json",
            r#"{"db": {"url": "mongodb://localhost", "pool": 5}, "name": "svc"}"#,
        );
        write(dir.path(), "prod.json", r#"{"db": {"url": "mongodb://prod"}}"#);

        let store = ConfigStore::load(dir.path(), Some("prod")).unwrap();
        assert_eq!(store.get::<String>("db.url").unwrap(), "mongodb://prod");
        assert_eq!(store.get_path::<u32>(&["db", "pool"]).unwrap(), 5);
        assert_eq!(store.get::<String>("name").unwrap(), "svc");
    }

    #[test]
    fn missing_files_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path(), Some("staging")).unwrap();
        assert!(!store.has("anything"));
    }

    #[test]
    fn default_env_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.json", r#"{"port": 3000}"#);
        let store = ConfigStore::load(dir.path(), Some("default")).unwrap();
        assert_eq!(store.get::<u16>("port").unwrap(), 3000);
    }

    #[test]
    fn malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.json", "{not json");
        assert!(matches!(
            ConfigStore::load(dir.path(), None),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn undefined_path_reports_segments() {
        let store = ConfigStore::from_json(r#"{"db": {"url": "x"}}"#, None).unwrap();
        let err = store.get::<String>("db.user").unwrap_err();
        assert!(matches!(err, ConfigError::Undefined { ref path } if path == "db > user"));
        assert_eq!(
            err.to_string(),
            "Config value not defined in config file(s) for path: db > user"
        );
    }

    #[test]
    fn typed_sections_deserialize() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Auth {
            token: String,
            ttl: u64,
        }

        let store = ConfigStore::from_json(
            r#"{"auth": {"token": "t0", "ttl": 60}}"#,
            Some(r#"{"auth": {"ttl": 120}}"#),
        )
        .unwrap();
        assert_eq!(
            store.get::<Auth>("auth").unwrap(),
            Auth {
                token: "t0".into(),
                ttl: 120
            }
        );
    }

    #[test]
    fn empty_path_returns_everything() {
        let store = ConfigStore::from_json(r#"{"a": {"b": 1}}"#, None).unwrap();
        assert_eq!(store.all(), json!({"a": {"b": 1}}));
        assert_eq!(store.get_value("").unwrap(), json!({"a": {"b": 1}}));
    }

    #[test]
    fn wrong_type_is_not_undefined() {
        let store = ConfigStore::from_json(r#"{"port": "abc"}"#, None).unwrap();
        assert!(matches!(
            store.get::<u16>("port"),
            Err(ConfigError::Type { .. })
        ));
    }

    #[test]
    fn keys_keep_their_case() {
        let store =
            ConfigStore::from_json(r#"{"db": {"maxPool": 5, "MaxPool": 9}}"#, None).unwrap();
        assert_eq!(store.get::<u32>("db.maxPool").unwrap(), 5);
        assert_eq!(store.get::<u32>("db.MaxPool").unwrap(), 9);
        assert!(!store.has("db.maxpool"));
        assert_eq!(store.all(), json!({"db": {"maxPool": 5, "MaxPool": 9}}));
    }

    #[test]
    fn camel_case_sections_deserialize() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Upload {
            max_file_size: u64,
            allowed_types: Vec<String>,
        }

        let store = ConfigStore::from_json(
            r#"{"upload": {"maxFileSize": 1024, "allowedTypes": ["image/png"]}}"#,
            Some(r#"{"upload": {"maxFileSize": 2048}}"#),
        )
        .unwrap();
        assert_eq!(
            store.get::<Upload>("upload").unwrap(),
            Upload {
                max_file_size: 2048,
                allowed_types: vec!["image/png".into()],
            }
        );
    }

    #[test]
    fn non_object_layers_replace_values() {
        let store = ConfigStore::from_json(
            r#"{"origins": ["a", "b"], "db": {"url": "x"}}"#,
            Some(r#"{"origins": ["c"], "db": "inline"}"#),
        )
        .unwrap();
        assert_eq!(store.get::<Vec<String>>("origins").unwrap(), ["c"]);
        assert_eq!(store.get::<String>("db").unwrap(), "inline");
        assert_eq!(store.get::<String>("origins.0").unwrap(), "c");
    }

    #[test]
    fn root_must_be_an_object() {
        assert!(matches!(
            ConfigStore::from_json("[1, 2]", None),
            Err(ConfigError::NotAnObject { .. })
        ));
    }
}
