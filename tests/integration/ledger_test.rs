//! Ledger persistence through the public API.

use pretty_assertions::assert_eq;
use query_ledger::db::Value;
use query_ledger::error::LedgerError;
use query_ledger::ledger::{
    Ledger, OverviewBackend, OverviewRow, RecordStatus, OVERVIEW_DB_FILE, OVERVIEW_FILE,
};
use query_ledger::query::ExecutionOutcome;
use query_ledger::template::{ParameterMap, QueryDefinition, ResultColumn};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn definition(key: &str) -> QueryDefinition {
    QueryDefinition {
        name: key.to_string(),
        output_key: key.to_string(),
        statement: "SELECT 1 AS n".to_string(),
        result_columns: Some(vec![ResultColumn::untyped("n")]),
        deduplicate: false,
        description: format!("Rapport {key}"),
        query_type: "monitor".to_string(),
        parameters: ParameterMap::new().with("collegejaar", 2024),
    }
}

fn success(n: i64) -> ExecutionOutcome {
    ExecutionOutcome::Success {
        columns: vec![ResultColumn::untyped("n")],
        rows: vec![vec![Value::Int(n)]],
        elapsed: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_json_ledger_layout() {
    let dir = tempdir().unwrap();
    let ledger = Ledger::open(dir.path(), OverviewBackend::Json).await.unwrap();

    let location = ledger
        .persist(&definition("monitor/s_sih_var_2024"), success(1))
        .await
        .unwrap();

    assert!(location.path().starts_with(dir.path().join("monitor")));
    assert!(location.path().is_file());
    assert!(dir.path().join(OVERVIEW_FILE).is_file());

    let contents = std::fs::read_to_string(dir.path().join(OVERVIEW_FILE)).unwrap();
    let rows: Vec<OverviewRow> = serde_json::from_str(&contents).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].location, location.to_string());
    assert_eq!(rows[0].description, "Rapport monitor/s_sih_var_2024");
}

#[tokio::test]
async fn test_failure_replaces_earlier_success() {
    let dir = tempdir().unwrap();
    let ledger = Ledger::open(dir.path(), OverviewBackend::Json).await.unwrap();
    let def = definition("instroom_var_2024");

    ledger.persist(&def, success(10)).await.unwrap();
    ledger
        .persist(
            &def,
            ExecutionOutcome::not_run(LedgerError::statement("no such table: inschrijving")),
        )
        .await
        .unwrap();

    let rows = ledger.overview().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RecordStatus::Failure);
    assert_eq!(rows[0].record_count, 0);

    let record = ledger.read("instroom_var_2024").await.unwrap();
    assert!(record.rows.is_empty());
    assert_eq!(
        record.error.as_deref(),
        Some("Statement execution error: no such table: inschrijving")
    );
}

#[tokio::test]
async fn test_concurrent_persists_keep_every_row() {
    for backend in [OverviewBackend::Json, OverviewBackend::Sqlite] {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(Ledger::open(dir.path(), backend).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let def = definition(&format!("rapport_{i}"));
                ledger.persist(&def, success(i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.overview().await.unwrap().len(), 20, "{backend:?}");
        assert_eq!(ledger.list(Some("rapport_")).await.unwrap().len(), 20);
    }
}

#[tokio::test]
async fn test_no_temporary_files_left_behind() {
    let dir = tempdir().unwrap();
    let ledger = Ledger::open(dir.path(), OverviewBackend::Json).await.unwrap();
    ledger.persist(&definition("a"), success(1)).await.unwrap();
    ledger.persist(&definition("a"), success(2)).await.unwrap();

    let leftovers: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[tokio::test]
async fn test_sqlite_overview_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let ledger = Ledger::open(dir.path(), OverviewBackend::Sqlite)
            .await
            .unwrap();
        ledger.persist(&definition("a"), success(1)).await.unwrap();
        ledger.persist(&definition("b"), success(2)).await.unwrap();
    }
    assert!(dir.path().join(OVERVIEW_DB_FILE).is_file());

    let ledger = Ledger::open(dir.path(), OverviewBackend::Sqlite)
        .await
        .unwrap();
    ledger.persist(&definition("a"), success(3)).await.unwrap();

    let keys: Vec<String> = ledger
        .overview()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.output_key)
        .collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&"a".to_string()));
    assert!(keys.contains(&"b".to_string()));
}
