//! Batch runs against PostgreSQL.
//!
//! Skipped unless DATABASE_URL points at a reachable server.

use query_ledger::batch::{BatchOptions, BatchRunner, ConnectionPolicy, PlannedQuery};
use query_ledger::config::ConnectionConfig;
use query_ledger::db::{ConfigConnector, Value};
use query_ledger::ledger::{Ledger, OverviewBackend};
use query_ledger::template::{resolve_template, ParamType, ParameterMap, Template};
use std::sync::Arc;
use tempfile::tempdir;

fn connection() -> Option<ConnectionConfig> {
    let url = std::env::var("DATABASE_URL").ok()?;
    ConnectionConfig::from_connection_string(&url).ok()
}

fn plan() -> Vec<PlannedQuery> {
    let params = ParameterMap::new().with("collegejaar", 2024);
    let reeks = Template::from_sql(
        "reeks",
        "SELECT g AS jaar FROM generate_series([collegejaar-2], [collegejaar]) AS g",
    )
    .with_parameter("collegejaar", ParamType::Int);
    let kapot = Template::from_sql("kapot", "SELECT * FROM tabel_die_niet_bestaat");

    vec![
        resolve_template(&reeks, &params, None).unwrap().into(),
        resolve_template(&kapot, &ParameterMap::new(), None)
            .unwrap()
            .into(),
    ]
}

#[tokio::test]
async fn test_postgres_batch() {
    let Some(connection) = connection() else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };

    for policy in [ConnectionPolicy::PerTask, ConnectionPolicy::Shared] {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(Ledger::open(dir.path(), OverviewBackend::Json).await.unwrap());
        let options = BatchOptions {
            connection_policy: policy,
            ..Default::default()
        };
        let runner = BatchRunner::new(
            Arc::new(ConfigConnector::new(connection.clone())),
            ledger.clone(),
            options,
        );

        let report = runner.run(plan()).await.unwrap();
        assert_eq!(report.succeeded(), 1, "{policy:?}");
        assert_eq!(report.failed(), 1, "{policy:?}");

        let record = ledger.read("reeks_var_2024").await.unwrap();
        assert_eq!(record.rows.len(), 3);
        assert_eq!(record.rows[0][0], Value::Int(2022));
    }
}
