//! Template storage backends.

use super::{ColumnSpec, ParamType, Template};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of stored templates, addressed by name.
pub trait TemplateStore: Send + Sync {
    /// Loads the named template.
    fn load_template(&self, name: &str) -> Result<Template>;
}

/// On-disk layout of a `<name>.toml` template.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateFile {
    sql: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "qtype")]
    query_type: String,
    #[serde(default)]
    deduplicate: bool,
    filename: Option<String>,
    parameters: Option<BTreeMap<String, ParamType>>,
    columns: Option<ColumnSpec>,
}

/// Reads templates from a directory.
///
/// `<dir>/<name>.toml` is preferred; `<dir>/<name>.sql` is accepted as bare
/// SQL with no declarations.
#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    root: PathBuf,
}

impl FileTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists template names found in the directory, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            LedgerError::template(format!(
                "Failed to read template directory {}: {e}",
                self.root.display()
            ))
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("toml") | Some("sql")
                )
            })
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn parse_toml(name: &str, path: &Path, contents: &str) -> Result<Template> {
        let file: TemplateFile = toml::from_str(contents).map_err(|e| {
            LedgerError::template(format!(
                "Failed to parse template {}: {e}",
                path.display()
            ))
        })?;

        Ok(Template {
            name: name.to_string(),
            statement: file.sql,
            columns: file.columns,
            parameters: file.parameters,
            filename: file
                .filename
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
            description: file.description.trim().to_string(),
            query_type: file.query_type,
            deduplicate: file.deduplicate,
        })
    }
}

impl TemplateStore for FileTemplateStore {
    fn load_template(&self, name: &str) -> Result<Template> {
        validate_name(name)?;

        let toml_path = self.root.join(format!("{name}.toml"));
        if toml_path.is_file() {
            debug!(path = %toml_path.display(), "Loading template");
            let contents = read_file(&toml_path)?;
            return Self::parse_toml(name, &toml_path, &contents);
        }

        let sql_path = self.root.join(format!("{name}.sql"));
        if sql_path.is_file() {
            debug!(path = %sql_path.display(), "Loading bare SQL template");
            let contents = read_file(&sql_path)?;
            return Ok(Template::from_sql(name, contents));
        }

        Err(LedgerError::template(format!(
            "Template '{name}' not found in {}",
            self.root.display()
        )))
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        LedgerError::template(format!("Failed to read {}: {e}", path.display()))
    })
}

/// Names are `/`-separated segments; no segment may be empty or start with `.`.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty()
                && !segment.starts_with('.')
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        });
    if valid {
        Ok(())
    } else {
        Err(LedgerError::template(format!(
            "Invalid template name '{name}'"
        )))
    }
}

/// Templates held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplateStore {
    templates: HashMap<String, Template>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template under its own name.
    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, template: Template) -> Self {
        self.insert(template);
        self
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load_template(&self, name: &str) -> Result<Template> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::template(format!("Template '{name}' not found")))
    }
}
