use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use toml::Value;

/// Errors returned by the typed [`ModuleSettings`] accessors.
///
/// A key that is absent and a key that holds the wrong kind of value are
/// reported differently so modules can fall back to defaults only for the
/// former.
///
/// # Examples
///
/// ```rust
/// use sysminer_common::settings::{ModuleSettings, SettingsError};
///
/// let settings = ModuleSettings::new().with("port", "2003");
/// assert!(matches!(settings.integer("port"), Err(SettingsError::WrongType { .. })));
/// assert!(matches!(settings.integer("timeout"), Err(SettingsError::Missing(_))));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("setting '{0}' is not set")]
    Missing(String),

    #[error("setting '{key}' must be {expected}")]
    WrongType { key: String, expected: &'static str },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Dynamically typed settings attached to one configured module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleSettings {
    values: BTreeMap<String, Value>,
}

impl ModuleSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by tests and embedders to assemble settings in code.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn string(&self, key: &str) -> Result<&str> {
        match self.lookup(key)? {
            Value::String(s) => Ok(s.as_str()),
            _ => Err(wrong_type(key, "a string")),
        }
    }

    pub fn integer(&self, key: &str) -> Result<i64> {
        match self.lookup(key)? {
            Value::Integer(i) => Ok(*i),
            _ => Err(wrong_type(key, "an integer")),
        }
    }

    pub fn string_array(&self, key: &str) -> Result<Vec<String>> {
        let Value::Array(items) = self.lookup(key)? else {
            return Err(wrong_type(key, "an array of strings"));
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(wrong_type(key, "an array of strings")),
            })
            .collect()
    }

    /// Like [`string`](Self::string) but maps a missing key to `None`.
    pub fn optional_string(&self, key: &str) -> Result<Option<&str>> {
        optional(self.string(key))
    }

    pub fn optional_integer(&self, key: &str) -> Result<Option<i64>> {
        optional(self.integer(key))
    }

    pub fn optional_string_array(&self, key: &str) -> Result<Option<Vec<String>>> {
        optional(self.string_array(key))
    }

    fn lookup(&self, key: &str) -> Result<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| SettingsError::Missing(key.to_string()))
    }
}

fn wrong_type(key: &str, expected: &'static str) -> SettingsError {
    SettingsError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(SettingsError::Missing(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl FromIterator<(String, Value)> for ModuleSettings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
