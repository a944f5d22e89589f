//! End-to-end batch runs against a SQLite source.

use super::{seed_source, write_monitor_templates, MONITOR_CONFIG};
use pretty_assertions::assert_eq;
use query_ledger::batch::{plan_set, BatchOptions, BatchRunner, ConnectionPolicy, OverviewUpdate};
use query_ledger::config::Config;
use query_ledger::db::{ConfigConnector, Value};
use query_ledger::ledger::{Ledger, OverviewBackend, RecordStatus};
use query_ledger::template::{FileTemplateStore, ParameterMap};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

struct Fixture {
    _dir: tempfile::TempDir,
    config: Config,
    store: FileTemplateStore,
    connector: Arc<ConfigConnector>,
    output: std::path::PathBuf,
}

async fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let templates = dir.path().join("queries");
    write_monitor_templates(&templates);
    let connection = seed_source(dir.path()).await;

    let config: Config = toml::from_str(MONITOR_CONFIG).unwrap();
    config.validate().unwrap();

    Fixture {
        output: dir.path().join("output"),
        store: FileTemplateStore::new(templates),
        connector: Arc::new(ConfigConnector::new(connection)),
        config,
        _dir: dir,
    }
}

async fn run_monitor(
    fixture: &Fixture,
    backend: OverviewBackend,
    options: BatchOptions,
) -> (Arc<Ledger>, query_ledger::batch::BatchReport) {
    let params = ParameterMap::new().with("collegejaar", 2024);
    let plan = plan_set(&fixture.config, &fixture.store, "monitor", &params, None).unwrap();

    let ledger = Arc::new(open_ledger(&fixture.output, backend).await);
    let runner = BatchRunner::new(fixture.connector.clone(), ledger.clone(), options);
    let report = runner.run(plan).await.unwrap();
    (ledger, report)
}

async fn open_ledger(output: &Path, backend: OverviewBackend) -> Ledger {
    Ledger::open(output, backend).await.unwrap()
}

#[tokio::test]
async fn test_monitor_set_records_every_query() {
    let fixture = fixture().await;
    let (ledger, report) =
        run_monitor(&fixture, OverviewBackend::Json, BatchOptions::default()).await;

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.is_persisted());

    let mut keys: Vec<String> = ledger
        .overview()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.output_key)
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "cohort_var_2024".to_string(),
            "instroom_var_2024".to_string(),
            "monitor/opleidingen_var_2024".to_string(),
        ]
    );

    let instroom = ledger.read("instroom_var_2024").await.unwrap();
    assert_eq!(instroom.status, RecordStatus::Success);
    assert_eq!(instroom.description, "Instroom per jaar t/m 2024");
    assert_eq!(
        instroom.rows,
        vec![
            vec![Value::Int(2023), Value::Int(2)],
            vec![Value::Int(2024), Value::Int(3)],
        ]
    );

    let opleidingen = ledger.read("monitor/opleidingen_var_2024").await.unwrap();
    assert_eq!(opleidingen.record_count, 3);
    assert_eq!(opleidingen.columns[0].name, "opleiding");

    let cohort = ledger.read("cohort_var_2024").await.unwrap();
    assert_eq!(cohort.status, RecordStatus::Failure);
    assert!(cohort.error.as_deref().unwrap().contains("cohort"));
}

#[tokio::test]
async fn test_rerun_replaces_overview_rows() {
    let fixture = fixture().await;
    run_monitor(&fixture, OverviewBackend::Json, BatchOptions::default()).await;
    let (ledger, _) = run_monitor(&fixture, OverviewBackend::Json, BatchOptions::default()).await;

    assert_eq!(ledger.overview().await.unwrap().len(), 3);
    assert_eq!(ledger.list(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_sqlite_overview_with_shared_connection() {
    let fixture = fixture().await;
    let options = BatchOptions {
        max_workers: 2,
        connection_policy: ConnectionPolicy::Shared,
        overview_update: OverviewUpdate::Immediate,
        ..Default::default()
    };

    run_monitor(&fixture, OverviewBackend::Sqlite, options).await;
    let (ledger, report) = run_monitor(&fixture, OverviewBackend::Sqlite, options).await;

    assert_eq!(report.succeeded(), 2);
    let rows = ledger.overview().await.unwrap();
    assert_eq!(rows.len(), 3);
    let failed: Vec<&str> = rows
        .iter()
        .filter(|row| row.status == RecordStatus::Failure)
        .map(|row| row.output_key.as_str())
        .collect();
    assert_eq!(failed, vec!["cohort_var_2024"]);
}

#[tokio::test]
async fn test_repr_replaces_parameter_values_in_keys() {
    let fixture = fixture().await;
    let params = ParameterMap::new().with("collegejaar", 2024);
    let plan = plan_set(
        &fixture.config,
        &fixture.store,
        "monitor",
        &params,
        Some("laatste"),
    )
    .unwrap();

    let ledger = Arc::new(open_ledger(&fixture.output, OverviewBackend::Json).await);
    let runner = BatchRunner::new(
        fixture.connector.clone(),
        ledger.clone(),
        BatchOptions::default(),
    );
    runner.run(plan).await.unwrap();

    assert_eq!(
        ledger.list(Some("instroom")).await.unwrap(),
        vec!["instroom_var_laatste".to_string()]
    );
}

#[tokio::test]
async fn test_missing_source_fails_every_query() {
    let fixture = fixture().await;
    let missing = query_ledger::config::ConnectionConfig::from_connection_string(&format!(
        "sqlite:{}",
        fixture.output.join("missing.db").display()
    ))
    .unwrap();
    let params = ParameterMap::new().with("collegejaar", 2024);
    let plan = plan_set(&fixture.config, &fixture.store, "monitor", &params, None).unwrap();

    let ledger = Arc::new(open_ledger(&fixture.output, OverviewBackend::Json).await);
    let runner = BatchRunner::new(
        Arc::new(ConfigConnector::new(missing)),
        ledger.clone(),
        BatchOptions::default(),
    );
    let report = runner.run(plan).await.unwrap();

    assert_eq!(report.failed(), 3);
    assert!(report.is_persisted());
    assert_eq!(ledger.overview().await.unwrap().len(), 3);
}
