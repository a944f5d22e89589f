//! Turning query sets and templates into runnable plans.

use super::PlannedQuery;
use crate::config::{Config, ParameterTarget};
use crate::error::{LedgerError, Result};
use crate::template::{
    output_key, resolve_template, template_key, ParamType, ParameterMap, Template,
    TemplateStore,
};
use tracing::{debug, warn};

/// Plans every template of a configured query set.
///
/// Set-level checks (unknown set, missing or mistyped set parameters) fail
/// the whole plan. Problems with a single template become an
/// [`PlannedQuery::Unresolved`] entry instead.
pub fn plan_set(
    config: &Config,
    store: &dyn TemplateStore,
    set_name: &str,
    params: &ParameterMap,
    repr: Option<&str>,
) -> Result<Vec<PlannedQuery>> {
    let set = config.query_set(set_name)?;

    let missing: Vec<&str> = set
        .parameters
        .iter()
        .map(String::as_str)
        .filter(|p| !params.contains_key(p))
        .collect();
    if !missing.is_empty() {
        return Err(LedgerError::config(format!(
            "Query set '{set_name}' requires parameter(s): {}",
            missing.join(", ")
        )));
    }

    for (key, value) in params.iter() {
        if config.parameter_type(key) == ParamType::Int && value.as_int().is_none() {
            return Err(LedgerError::type_mismatch(format!(
                "Parameter '{key}' must be an integer, got '{value}'"
            )));
        }
    }

    let mut query_params = params.clone();
    let mut queries = set.queries.clone();
    for name in &set.parameters {
        if config.parameter_target(name) == ParameterTarget::Template {
            if let Some(value) = query_params.remove(name) {
                queries = vec![value.to_string()];
            }
        }
    }

    debug!(set = set_name, queries = queries.len(), "Planning query set");
    Ok(queries
        .iter()
        .map(|name| plan_template(store, name, &query_params, repr, set.scope_parameters))
        .collect())
}

/// Plans one template with the full parameter mapping.
///
/// The template must declare exactly the supplied parameters, unless it
/// declares none at all.
pub fn plan_query(
    store: &dyn TemplateStore,
    name: &str,
    params: &ParameterMap,
    repr: Option<&str>,
) -> PlannedQuery {
    plan_template(store, name, params, repr, false)
}

/// Loads and resolves one template; failures become unresolved entries.
///
/// With `scoped`, parameters the template does not declare are dropped with
/// a warning. The output key of an unresolved entry uses the same parameters
/// and key rules as a successful resolution would.
fn plan_template(
    store: &dyn TemplateStore,
    name: &str,
    params: &ParameterMap,
    repr: Option<&str>,
    scoped: bool,
) -> PlannedQuery {
    let template = match store.load_template(name) {
        Ok(template) => template,
        Err(error) => return unresolved(name, output_key(name, params, repr), params, error),
    };

    let params = if scoped {
        scope_parameters(&template, params)
    } else {
        params.clone()
    };

    match resolve_template(&template, &params, repr) {
        Ok(definition) => PlannedQuery::Resolved(definition),
        Err(error) => {
            let key = template_key(&template, &params, repr)
                .unwrap_or_else(|_| output_key(&template.name, &params, repr));
            unresolved(name, key, &params, error)
        }
    }
}

fn unresolved(
    name: &str,
    output_key: String,
    params: &ParameterMap,
    error: LedgerError,
) -> PlannedQuery {
    PlannedQuery::Unresolved {
        name: name.to_string(),
        output_key,
        parameters: params.clone(),
        error,
    }
}

fn scope_parameters(template: &Template, params: &ParameterMap) -> ParameterMap {
    let Some(declared) = &template.parameters else {
        return params.clone();
    };

    params
        .iter()
        .filter(|(key, _)| {
            let keep = declared.contains_key(*key);
            if !keep {
                warn!(
                    template = %template.name,
                    parameter = *key,
                    "Template does not declare parameter, not passing it"
                );
            }
            keep
        })
        .map(|(key, value)| (key, value.clone()))
        .collect()
}
