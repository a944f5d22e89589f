//! Template resolution.

use super::{
    format_sql, infer_columns, substitute, ParamType, ParameterMap, QueryDefinition,
    ResultColumn, Template, TemplateStore,
};
use crate::error::{LedgerError, Result};
use tracing::debug;

/// Derives the ledger key for a template resolved with `params`.
///
/// An explicit `repr` replaces the joined parameter values.
pub fn output_key(name: &str, params: &ParameterMap, repr: Option<&str>) -> String {
    match repr.filter(|r| !r.is_empty()) {
        Some(repr) => format!("{name}_var_{repr}"),
        None if params.is_empty() => name.to_string(),
        None => {
            let values: Vec<String> = params.values().map(ToString::to_string).collect();
            format!("{name}_var_{}", values.join("_"))
        }
    }
}

/// Ledger key for `template` resolved with `params`.
///
/// A `filename` pattern on the template is expanded and used as the key;
/// `repr` does not apply to it. Otherwise the key comes from [`output_key`].
pub fn template_key(
    template: &Template,
    params: &ParameterMap,
    repr: Option<&str>,
) -> Result<String> {
    match &template.filename {
        Some(pattern) => substitute(pattern, params),
        None => Ok(output_key(&template.name, params, repr)),
    }
}

/// Resolves a template into an executable definition.
///
/// Fails with `UnresolvedParameter` when a declared parameter is missing,
/// `TypeMismatch` when an `int` parameter does not parse, and `Definition`
/// for undeclared parameters or malformed expressions.
pub fn resolve_template(
    template: &Template,
    params: &ParameterMap,
    repr: Option<&str>,
) -> Result<QueryDefinition> {
    check_parameters(template, params)?;

    let statement = substitute(&format_sql(&template.statement), params)?;
    let description = substitute(&template.description, params)?;

    let result_columns = match &template.columns {
        Some(spec) => Some(spec.normalize()),
        None => infer_columns(&statement)
            .map(|names| names.into_iter().map(ResultColumn::untyped).collect()),
    };

    let output_key = template_key(template, params, repr)?;
    debug!(template = %template.name, key = %output_key, "Resolved template");

    Ok(QueryDefinition {
        name: template.name.clone(),
        output_key,
        statement,
        result_columns,
        deduplicate: template.deduplicate,
        description,
        query_type: template.query_type.clone(),
        parameters: params.clone(),
    })
}

fn check_parameters(template: &Template, params: &ParameterMap) -> Result<()> {
    let Some(declared) = &template.parameters else {
        return Ok(());
    };

    let missing: Vec<&str> = declared
        .keys()
        .map(String::as_str)
        .filter(|k| !params.contains_key(k))
        .collect();
    if !missing.is_empty() {
        return Err(LedgerError::unresolved(format!(
            "Template '{}' is missing parameter(s): {}",
            template.name,
            missing.join(", ")
        )));
    }

    let extra: Vec<&str> = params.keys().filter(|k| !declared.contains_key(*k)).collect();
    if !extra.is_empty() {
        return Err(LedgerError::definition(format!(
            "Template '{}' does not declare parameter(s): {}",
            template.name,
            extra.join(", ")
        )));
    }

    for (key, value) in params.iter() {
        if declared.get(key) == Some(&ParamType::Int) && value.as_int().is_none() {
            return Err(LedgerError::type_mismatch(format!(
                "Parameter '{key}' of template '{}' must be an integer, got '{value}'",
                template.name
            )));
        }
    }

    Ok(())
}

/// Resolves templates loaded from a store.
pub struct Resolver<S> {
    store: S,
}

impl<S: TemplateStore> Resolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads and resolves the named template.
    pub fn resolve(
        &self,
        name: &str,
        params: &ParameterMap,
        repr: Option<&str>,
    ) -> Result<QueryDefinition> {
        let template = self.store.load_template(name)?;
        resolve_template(&template, params, repr)
    }
}
