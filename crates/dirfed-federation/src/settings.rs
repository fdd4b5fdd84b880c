//! Raw provider settings and field validation.
//!
//! Hosts hand providers a flat set of string settings. Before a provider
//! turns them into its typed configuration, each field is passed through
//! the validator registered for it in a [`ValidatorTable`]. Fields without
//! a registered validator pass through unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{FederationError, FederationResult};

/// Normalizes or rejects the raw value of one settings field.
pub type Validator = fn(&str) -> Result<String, String>;

/// Flat key/value settings as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSettings {
    values: HashMap<String, String>,
}

impl RawSettings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings from key/value pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parses settings from a flat TOML table.
    ///
    /// Strings are taken as-is; integers and booleans are rendered to their
    /// string form. Nested tables and arrays are rejected.
    pub fn from_toml_str(content: &str) -> FederationResult<Self> {
        let table: toml::Table = content
            .parse()
            .map_err(|e| FederationError::config(format!("failed to parse settings: {e}")))?;

        let mut values = HashMap::with_capacity(table.len());
        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Boolean(b) => if b { "1" } else { "0" }.to_string(),
                toml::Value::Float(f) => f.to_string(),
                other => {
                    return Err(FederationError::config(format!(
                        "setting '{key}' must be a scalar, found {}",
                        other.type_str()
                    )))
                }
            };
            values.insert(key, rendered);
        }

        Ok(Self { values })
    }

    /// Sets a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Gets a config value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Gets a config value, treating blank values as unset.
    #[must_use]
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Gets a config value as bool.
    ///
    /// Accepts `1`/`0`, `true`/`false`, `yes`/`no` and `on`/`off`.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_bool)
    }

    /// Gets a config value as an unsigned integer.
    #[must_use]
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Runs every present field through its validator.
    ///
    /// ## Errors
    ///
    /// Returns `FederationError::Configuration` naming the first field
    /// whose validator rejected the value.
    pub fn validated(&self, table: &ValidatorTable) -> FederationResult<Self> {
        let mut values = HashMap::with_capacity(self.values.len());
        for (key, raw) in &self.values {
            values.insert(key.clone(), table.validate(key, raw)?);
        }
        Ok(Self { values })
    }
}

/// Parses the boolean spellings accepted in settings.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Table mapping a settings field name to its validator.
#[derive(Debug, Clone, Default)]
pub struct ValidatorTable {
    validators: HashMap<&'static str, Validator>,
}

impl ValidatorTable {
    /// Creates an empty table (every field passes through unchanged).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the validator for `field`.
    #[must_use]
    pub fn with(mut self, field: &'static str, validator: Validator) -> Self {
        self.validators.insert(field, validator);
        self
    }

    /// Checks whether `field` has a validator.
    #[must_use]
    pub fn has_validator(&self, field: &str) -> bool {
        self.validators.contains_key(field)
    }

    /// Validates one field value.
    pub fn validate(&self, field: &str, raw: &str) -> FederationResult<String> {
        match self.validators.get(field) {
            Some(validator) => validator(raw)
                .map_err(|e| FederationError::config(format!("invalid value for '{field}': {e}"))),
            None => Ok(raw.to_string()),
        }
    }
}
