//! Migration configuration bags.
//!
//! A migration request carries three untyped key-value bags (source,
//! destination, options). The core never interprets them; executors read them
//! through a [`BagView`], which performs explicit type checks and reports
//! problems with a field path such as `source.bucket`.
//!
//! Keys may address nested objects with dots: `auth.token` reads
//! `{"auth": {"token": ...}}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The three configuration sections of a migration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Where data is read from.
    Source,
    /// Where data is written to.
    Destination,
    /// Recipe-specific tuning.
    Options,
}

impl Section {
    /// Lowercase name used in field paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Source => "source",
            Section::Destination => "destination",
            Section::Options => "options",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON value kinds a key may be required to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Any value (including null).
    Any,
    /// A JSON string.
    String,
    /// A JSON number without fractional part.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Bool,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// `null`.
    Null,
}

impl ValueKind {
    /// Kind of a concrete value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Integer,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Whether `value` satisfies this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Number => value.is_number(),
            kind => *kind == ValueKind::of(value),
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Any => "any value",
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Bool => "boolean",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
            ValueKind::Null => "null",
        };
        f.write_str(name)
    }
}

/// A failed configuration lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required key is absent.
    #[error("{path}: required key is missing")]
    Missing {
        /// Field path, e.g. `source.bucket`.
        path: String,
    },

    /// A key is present with the wrong JSON type.
    #[error("{path}: expected {expected}, found {found}")]
    WrongType {
        /// Field path, e.g. `source.port`.
        path: String,
        /// Kind the reader asked for.
        expected: ValueKind,
        /// Kind actually stored.
        found: ValueKind,
    },
}

/// An untyped key-value bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigBag(Map<String, Value>);

impl ConfigBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Insert a top-level key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a (possibly dotted) key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Whether the bag has no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the top-level entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// View this bag as `section` for typed access.
    pub fn view(&self, section: Section) -> BagView<'_> {
        BagView { section, bag: self }
    }
}

impl From<Map<String, Value>> for ConfigBag {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Typed, path-reporting read access to one section of a configuration.
#[derive(Debug, Clone, Copy)]
pub struct BagView<'a> {
    section: Section,
    bag: &'a ConfigBag,
}

impl<'a> BagView<'a> {
    /// The section this view reads.
    pub fn section(&self) -> Section {
        self.section
    }

    /// Full field path of `key` within this section.
    pub fn path(&self, key: &str) -> String {
        format!("{}.{}", self.section, key)
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.bag.get(key)
    }

    /// Whether `key` is present (null counts as absent).
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    fn typed<T>(
        &self,
        key: &str,
        expected: ValueKind,
        extract: impl Fn(&'a Value) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => extract(value).map(Some).ok_or_else(|| ConfigError::WrongType {
                path: self.path(key),
                expected,
                found: ValueKind::of(value),
            }),
        }
    }

    fn required<T>(&self, key: &str, value: Option<T>) -> Result<T, ConfigError> {
        value.ok_or_else(|| ConfigError::Missing {
            path: self.path(key),
        })
    }

    /// Optional string.
    pub fn opt_str(&self, key: &str) -> Result<Option<&'a str>, ConfigError> {
        self.typed(key, ValueKind::String, Value::as_str)
    }

    /// Required string.
    pub fn str(&self, key: &str) -> Result<&'a str, ConfigError> {
        let value = self.opt_str(key)?;
        self.required(key, value)
    }

    /// Optional unsigned integer.
    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.typed(key, ValueKind::Integer, Value::as_u64)
    }

    /// Required unsigned integer.
    pub fn u64(&self, key: &str) -> Result<u64, ConfigError> {
        let value = self.opt_u64(key)?;
        self.required(key, value)
    }

    /// Optional boolean.
    pub fn opt_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.typed(key, ValueKind::Bool, Value::as_bool)
    }

    /// Boolean with a default for absent keys.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        Ok(self.opt_bool(key)?.unwrap_or(default))
    }

    /// Optional list of strings.
    pub fn opt_str_list(&self, key: &str) -> Result<Option<Vec<&'a str>>, ConfigError> {
        self.typed(key, ValueKind::Array, |value| {
            value
                .as_array()?
                .iter()
                .map(Value::as_str)
                .collect::<Option<Vec<_>>>()
        })
    }
}

/// Configuration of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Where data is read from.
    pub source: ConfigBag,
    /// Where data is written to.
    pub destination: ConfigBag,
    /// Recipe-specific tuning.
    pub options: ConfigBag,
}

impl MigrationConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source bag.
    pub fn with_source(mut self, source: ConfigBag) -> Self {
        self.source = source;
        self
    }

    /// Set the destination bag.
    pub fn with_destination(mut self, destination: ConfigBag) -> Self {
        self.destination = destination;
        self
    }

    /// Set the options bag.
    pub fn with_options(mut self, options: ConfigBag) -> Self {
        self.options = options;
        self
    }

    /// The bag for `section`.
    pub fn bag(&self, section: Section) -> &ConfigBag {
        match section {
            Section::Source => &self.source,
            Section::Destination => &self.destination,
            Section::Options => &self.options,
        }
    }

    /// Typed view of the source bag.
    pub fn source(&self) -> BagView<'_> {
        self.source.view(Section::Source)
    }

    /// Typed view of the destination bag.
    pub fn destination(&self) -> BagView<'_> {
        self.destination.view(Section::Destination)
    }

    /// Typed view of the options bag.
    pub fn options(&self) -> BagView<'_> {
        self.options.view(Section::Options)
    }
}

/// One documented key of a recipe's configuration schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySpec {
    /// Section holding the key.
    pub section: Section,
    /// Key name, dotted for nested objects.
    pub key: String,
    /// Expected value kind.
    #[serde(default = "default_kind")]
    pub kind: ValueKind,
    /// Required keys produce errors when absent; others produce warnings.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Shown in the warning for an absent recommended key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn default_kind() -> ValueKind {
    ValueKind::String
}

fn default_required() -> bool {
    true
}

/// Required and recommended keys of one recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    keys: Vec<KeySpec>,
}

impl ConfigSchema {
    /// An empty schema that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required key.
    pub fn required(mut self, section: Section, key: impl Into<String>, kind: ValueKind) -> Self {
        self.keys.push(KeySpec {
            section,
            key: key.into(),
            kind,
            required: true,
            hint: None,
        });
        self
    }

    /// Declare an optional but recommended key.
    pub fn recommended(
        mut self,
        section: Section,
        key: impl Into<String>,
        kind: ValueKind,
        hint: impl Into<String>,
    ) -> Self {
        self.keys.push(KeySpec {
            section,
            key: key.into(),
            kind,
            required: false,
            hint: Some(hint.into()),
        });
        self
    }

    /// Declared keys, in declaration order.
    pub fn keys(&self) -> &[KeySpec] {
        &self.keys
    }

    /// Check `config` against the schema.
    ///
    /// Absent required keys and wrongly typed keys are errors; absent
    /// recommended keys are warnings.
    pub fn validate(&self, config: &MigrationConfig) -> crate::ValidationResult {
        let mut result = crate::ValidationResult::new();

        for spec in &self.keys {
            let view = config.bag(spec.section).view(spec.section);
            match view.get(&spec.key) {
                Some(value) if !value.is_null() => {
                    if !spec.kind.accepts(value) {
                        result.add_error(
                            ConfigError::WrongType {
                                path: view.path(&spec.key),
                                expected: spec.kind,
                                found: ValueKind::of(value),
                            }
                            .to_string(),
                        );
                    }
                }
                _ if spec.required => {
                    result.add_error(
                        ConfigError::Missing {
                            path: view.path(&spec.key),
                        }
                        .to_string(),
                    );
                }
                _ => {
                    let path = view.path(&spec.key);
                    let message = match &spec.hint {
                        Some(hint) => format!("{path} is not set: {hint}"),
                        None => format!("{path} is not set"),
                    };
                    result.add_warning(message);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> MigrationConfig {
        let source: ConfigBag = serde_json::from_value(json!({
            "bucket": "assets",
            "port": 5432,
            "ratio": 0.5,
            "auth": { "token": "t0k" },
            "tables": ["users", "orders"],
            "tls": true,
        }))
        .unwrap();
        MigrationConfig::new().with_source(source)
    }

    #[test]
    fn test_typed_access() {
        let config = sample();
        let source = config.source();

        assert_eq!(source.str("bucket").unwrap(), "assets");
        assert_eq!(source.u64("port").unwrap(), 5432);
        assert!(source.bool_or("tls", false).unwrap());
        assert!(!source.bool_or("compress", false).unwrap());
        assert_eq!(source.str("auth.token").unwrap(), "t0k");
        assert_eq!(
            source.opt_str_list("tables").unwrap(),
            Some(vec!["users", "orders"])
        );
        assert_eq!(source.opt_str("missing").unwrap(), None);
    }

    #[test]
    fn test_errors_carry_field_path() {
        let config = sample();

        let err = config.destination().str("bucket").unwrap_err();
        assert_eq!(err.to_string(), "destination.bucket: required key is missing");

        let err = config.source().str("port").unwrap_err();
        assert_eq!(err.to_string(), "source.port: expected string, found integer");

        let err = config.source().u64("ratio").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::WrongType {
                found: ValueKind::Number,
                ..
            }
        ));
    }

    #[test]
    fn test_schema_validation() {
        let schema = ConfigSchema::new()
            .required(Section::Source, "bucket", ValueKind::String)
            .required(Section::Source, "port", ValueKind::String)
            .required(Section::Destination, "endpoint", ValueKind::String)
            .recommended(
                Section::Options,
                "region",
                ValueKind::String,
                "defaults to us-east-1",
            );

        let result = schema.validate(&sample());

        assert!(!result.is_valid());
        assert_eq!(
            result.errors,
            vec![
                "source.port: expected string, found integer",
                "destination.endpoint: required key is missing",
            ]
        );
        assert_eq!(
            result.warnings,
            vec!["options.region is not set: defaults to us-east-1"]
        );
    }

    #[test]
    fn test_number_kind_accepts_integers() {
        assert!(ValueKind::Number.accepts(&json!(3)));
        assert!(ValueKind::Number.accepts(&json!(3.5)));
        assert!(!ValueKind::Integer.accepts(&json!(3.5)));
        assert!(ValueKind::Any.accepts(&json!(null)));
    }

    #[test]
    fn test_schema_deserializes_with_defaults() {
        let schema: ConfigSchema = serde_json::from_value(json!([
            { "section": "source", "key": "bucket" },
            { "section": "options", "key": "parallelism", "kind": "integer", "required": false },
        ]))
        .unwrap();

        assert_eq!(schema.keys().len(), 2);
        assert_eq!(schema.keys()[0].kind, ValueKind::String);
        assert!(schema.keys()[0].required);
        assert!(!schema.keys()[1].required);
    }
}
