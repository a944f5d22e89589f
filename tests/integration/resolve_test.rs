//! Template resolution from files on disk.

use super::{write_monitor_templates, write_template};
use pretty_assertions::assert_eq;
use query_ledger::error::LedgerError;
use query_ledger::template::{
    ColumnType, FileTemplateStore, ParameterMap, Resolver, ResultColumn, TemplateStore,
};
use tempfile::tempdir;

fn resolver() -> (Resolver<FileTemplateStore>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    write_monitor_templates(dir.path());
    (Resolver::new(FileTemplateStore::new(dir.path())), dir)
}

#[test]
fn test_resolve_toml_template() {
    let (resolver, _dir) = resolver();
    let params = ParameterMap::new().with("collegejaar", 2024);

    let definition = resolver.resolve("instroom", &params, None).unwrap();

    assert_eq!(definition.output_key, "instroom_var_2024");
    assert_eq!(definition.query_type, "monitor");
    assert!(definition.statement.contains("BETWEEN 2023 AND 2024"));
    assert!(!definition.statement.contains('['));
    assert_eq!(
        definition.result_columns,
        Some(vec![
            ResultColumn::typed("jaar", ColumnType::Integer),
            ResultColumn::typed("aantal", ColumnType::Integer),
        ])
    );
}

#[test]
fn test_resolve_bare_sql_infers_columns() {
    let (resolver, _dir) = resolver();
    let params = ParameterMap::new().with("collegejaar", "2023");

    let definition = resolver
        .resolve("monitor/opleidingen", &params, None)
        .unwrap();

    assert_eq!(definition.output_key, "monitor/opleidingen_var_2023");
    assert_eq!(
        definition.result_columns,
        Some(vec![ResultColumn::untyped("opleiding")])
    );
}

#[test]
fn test_missing_parameter() {
    let (resolver, _dir) = resolver();
    let err = resolver
        .resolve("instroom", &ParameterMap::new(), None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnresolvedParameter(_)));
}

#[test]
fn test_non_integer_for_int_parameter() {
    let (resolver, _dir) = resolver();
    let params = ParameterMap::new().with("collegejaar", "dit jaar");
    let err = resolver.resolve("instroom", &params, None).unwrap_err();
    assert!(matches!(err, LedgerError::TypeMismatch(_)));
}

#[test]
fn test_unknown_template() {
    let (resolver, _dir) = resolver();
    let err = resolver
        .resolve("bestaat_niet", &ParameterMap::new(), None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Template(_)));
}

#[test]
fn test_malformed_template_file() {
    let dir = tempdir().unwrap();
    write_template(dir.path(), "kapot.toml", "sql = \"SELECT 1\"\nonbekend = true\n");
    let store = FileTemplateStore::new(dir.path());

    let err = store.load_template("kapot").unwrap_err();
    assert!(matches!(err, LedgerError::Template(_)));
}

#[test]
fn test_list_templates() {
    let (resolver, _dir) = resolver();
    let names = resolver.store().list().unwrap();
    assert_eq!(names, vec!["cohort".to_string(), "instroom".to_string()]);
}
