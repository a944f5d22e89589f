//! Query templates and their resolution into executable definitions.
//!
//! A [`Template`] is stored, unresolved SQL plus optional shape and parameter
//! declarations. Resolving it against a [`ParameterMap`] yields a
//! [`QueryDefinition`]: concrete statement text, the expected result shape and
//! a deterministic output key.

mod columns;
mod format;
mod resolver;
mod store;
mod substitute;

pub use columns::infer_columns;
pub use format::format_sql;
pub use resolver::{output_key, resolve_template, template_key, Resolver};
pub use store::{FileTemplateStore, MemoryTemplateStore, TemplateStore};
pub use substitute::substitute;

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Declared type of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// Must parse as a signed integer.
    #[serde(alias = "integer")]
    Int,
    /// Any text.
    #[default]
    #[serde(alias = "string")]
    Str,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Str => write!(f, "str"),
        }
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

impl ParamValue {
    /// Returns the value as an integer, parsing text when needed.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Insertion-ordered mapping from parameter name to value.
///
/// Keys are unique; inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap {
    entries: Vec<(String, ParamValue)>,
}

impl ParameterMap {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to `value`, keeping the original position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Parses `key=value` assignments, rejecting malformed or repeated keys.
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self> {
        let mut map = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (key, value) = assignment.split_once('=').ok_or_else(|| {
                LedgerError::config(format!(
                    "Invalid parameter '{assignment}'. Expected KEY=VALUE"
                ))
            })?;
            let key = key.trim();
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(LedgerError::config(format!(
                    "Invalid parameter name '{key}'"
                )));
            }
            if map.contains_key(key) {
                return Err(LedgerError::config(format!(
                    "Parameter '{key}' given more than once"
                )));
            }
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Returns true if `key` is bound.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterates values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &ParamValue> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Removes and returns the value bound to `key`.
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterMap
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Target scalar type for a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Date,
    Categorical,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "int",
            Self::Float => "float",
            Self::String => "str",
            Self::Date => "date",
            Self::Categorical => "category",
        }
    }
}

impl FromStr for ColumnType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "int" | "integer" | "int64" | "int32" => Ok(Self::Integer),
            "float" | "float64" | "double" | "real" => Ok(Self::Float),
            "str" | "string" | "text" | "object" => Ok(Self::String),
            "date" | "datetime" | "datetime64" | "datetime64[ns]" => Ok(Self::Date),
            "category" | "categorical" => Ok(Self::Categorical),
            other => Err(LedgerError::template(format!(
                "Unknown column type '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared column in a typed column list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: Option<ColumnType>,
}

/// Declared result columns, as written in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    /// Ordered column names, all typed by the driver.
    NamesOnly(Vec<String>),
    /// Ordered columns, each with an optional target type.
    NamesWithTypes(Vec<TypedColumn>),
}

impl ColumnSpec {
    /// Normalizes either shape into the executor's column list.
    pub fn normalize(&self) -> Vec<ResultColumn> {
        match self {
            Self::NamesOnly(names) => names.iter().map(ResultColumn::untyped).collect(),
            Self::NamesWithTypes(columns) => columns
                .iter()
                .map(|c| ResultColumn {
                    name: c.name.clone(),
                    column_type: c.column_type,
                })
                .collect(),
        }
    }
}

/// A result column the executor binds positionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(default)]
    pub column_type: Option<ColumnType>,
}

impl ResultColumn {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type: Some(column_type),
        }
    }
}

/// A stored, unresolved query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    /// Name the template is addressed by.
    pub name: String,
    /// Raw SQL with `[param]` tokens.
    pub statement: String,
    /// Declared result columns; inferred from the statement when absent.
    pub columns: Option<ColumnSpec>,
    /// Declared parameters. `None` accepts any mapping.
    pub parameters: Option<BTreeMap<String, ParamType>>,
    /// Output key pattern with `[param]` tokens, used instead of the derived key.
    pub filename: Option<String>,
    pub description: String,
    pub query_type: String,
    /// Drop exact duplicate rows after fetching.
    pub deduplicate: bool,
}

impl Template {
    /// Creates a template from bare SQL, with no declarations.
    pub fn from_sql(name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            ..Default::default()
        }
    }

    /// Declares a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.parameters
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), param_type);
        self
    }

    /// Declares the result columns.
    pub fn with_columns(mut self, columns: ColumnSpec) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Enables or disables deduplication.
    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Stores results under `pattern` instead of the derived key.
    pub fn with_filename(mut self, pattern: impl Into<String>) -> Self {
        self.filename = Some(pattern.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A resolved, ready-to-run query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// Template name.
    pub name: String,
    /// Ledger and artifact key.
    pub output_key: String,
    /// Fully resolved statement text.
    pub statement: String,
    /// Expected columns; `None` takes names from the driver.
    pub result_columns: Option<Vec<ResultColumn>>,
    pub deduplicate: bool,
    pub description: String,
    pub query_type: String,
    /// Parameters the definition was resolved with.
    pub parameters: ParameterMap,
}
