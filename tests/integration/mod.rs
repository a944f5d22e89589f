//! Integration tests for query-ledger.

pub mod batch_test;
pub mod ledger_test;
pub mod postgres_test;
pub mod resolve_test;

use query_ledger::config::ConnectionConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

/// Creates `source.db` under `dir` with a small enrolment table.
pub async fn seed_source(dir: &Path) -> ConnectionConfig {
    let path = dir.join("source.db");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true),
        )
        .await
        .unwrap();

    sqlx::query("CREATE TABLE inschrijving (student_id INTEGER, jaar INTEGER, opleiding TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO inschrijving VALUES
            (1, 2023, 'Wiskunde'),
            (2, 2023, 'Natuurkunde'),
            (3, 2024, 'Wiskunde'),
            (4, 2024, 'Wiskunde'),
            (5, 2024, 'Informatica')",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    ConnectionConfig::from_connection_string(&format!("sqlite:{}", path.display())).unwrap()
}

/// Writes a template file, creating subdirectories as needed.
pub fn write_template(root: &Path, file_name: &str, contents: &str) {
    let path = root.join(file_name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Templates shared by the batch and resolve tests.
pub fn write_monitor_templates(root: &Path) {
    write_template(
        root,
        "instroom.toml",
        r#"
description = "Instroom per jaar t/m [collegejaar]"
qtype = "monitor"
sql = """
SELECT jaar, count(*) AS aantal
FROM inschrijving
WHERE jaar BETWEEN [collegejaar-1] AND [collegejaar]
GROUP BY jaar
ORDER BY jaar
"""

[parameters]
collegejaar = "int"

[[columns]]
name = "jaar"
type = "int"

[[columns]]
name = "aantal"
type = "int"
"#,
    );
    write_template(
        root,
        "monitor/opleidingen.sql",
        "SELECT opleiding FROM inschrijving WHERE jaar = [collegejaar] ORDER BY opleiding",
    );
    write_template(
        root,
        "cohort.toml",
        r#"
sql = "SELECT count(*) AS n FROM inschrijving WHERE jaar = [cohort]"

[parameters]
cohort = "int"
"#,
    );
}

pub const MONITOR_CONFIG: &str = r#"
[parameters.collegejaar]
description = "Collegejaar"
type = "int"

[sets.monitor]
parameters = ["collegejaar"]
queries = ["instroom", "monitor/opleidingen", "cohort"]
"#;
