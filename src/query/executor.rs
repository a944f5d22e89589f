//! Query execution with typed result binding.
//!
//! Runs a resolved definition against a client and turns every possible
//! problem into an [`ExecutionOutcome::Failure`], so callers never have to
//! handle an error from this layer.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::db::{DatabaseClient, QueryResult, Row, Value};
use crate::error::{LedgerError, Result};
use crate::template::{ColumnType, QueryDefinition, ResultColumn};

/// Result of executing one definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Typed rows, bound to the output columns.
    Success {
        columns: Vec<ResultColumn>,
        rows: Vec<Row>,
        elapsed: Duration,
    },
    /// The statement, binding or coercion failed.
    Failure {
        error: LedgerError,
        elapsed: Duration,
    },
}

impl ExecutionOutcome {
    /// Creates a failure with no elapsed time, for definitions that never ran.
    pub fn not_run(error: LedgerError) -> Self {
        Self::Failure {
            error,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Success { elapsed, .. } | Self::Failure { elapsed, .. } => *elapsed,
        }
    }

    /// Rows in a success; zero for a failure.
    pub fn record_count(&self) -> usize {
        match self {
            Self::Success { rows, .. } => rows.len(),
            Self::Failure { .. } => 0,
        }
    }

    pub fn error(&self) -> Option<&LedgerError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

/// Executes resolved definitions against a single client.
pub struct QueryExecutor<'a> {
    db: &'a dyn DatabaseClient,
}

impl<'a> QueryExecutor<'a> {
    /// Creates a new query executor.
    pub fn new(db: &'a dyn DatabaseClient) -> Self {
        Self { db }
    }

    /// Runs the definition and binds its result.
    pub async fn execute(&self, definition: &QueryDefinition) -> ExecutionOutcome {
        let start = Instant::now();
        let outcome = self
            .db
            .execute_query(&definition.statement)
            .await
            .and_then(|raw| bind_result(definition, raw));
        let elapsed = start.elapsed();

        match outcome {
            Ok((columns, rows)) => {
                debug!(
                    key = %definition.output_key,
                    rows = rows.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query succeeded"
                );
                ExecutionOutcome::Success {
                    columns,
                    rows,
                    elapsed,
                }
            }
            Err(error) => {
                warn!(key = %definition.output_key, "Query failed: {error}");
                ExecutionOutcome::Failure { error, elapsed }
            }
        }
    }
}

/// Convenience wrapper around [`QueryExecutor::execute`].
pub async fn execute(definition: &QueryDefinition, db: &dyn DatabaseClient) -> ExecutionOutcome {
    QueryExecutor::new(db).execute(definition).await
}

/// Binds driver output to the definition's columns, then types and dedups it.
fn bind_result(
    definition: &QueryDefinition,
    raw: QueryResult,
) -> Result<(Vec<ResultColumn>, Vec<Row>)> {
    let columns = match &definition.result_columns {
        Some(declared) => {
            let width = if raw.columns.is_empty() {
                raw.rows.first().map(Vec::len)
            } else {
                Some(raw.columns.len())
            };
            if let Some(width) = width {
                if width != declared.len() {
                    return Err(LedgerError::definition(format!(
                        "Query '{}' returned {width} column(s) but {} were declared",
                        definition.name,
                        declared.len()
                    )));
                }
            }
            declared.clone()
        }
        None => raw
            .columns
            .iter()
            .map(|c| ResultColumn::untyped(c.name.clone()))
            .collect(),
    };

    let mut rows = raw.rows;
    for (index, column) in columns.iter().enumerate() {
        if let Some(target) = column.column_type {
            let driver_type = raw.columns.get(index).map(|c| c.data_type.as_str());
            coerce_column(&mut rows, index, column, target, driver_type)?;
        }
    }

    if definition.deduplicate {
        rows = deduplicate(rows);
    }

    Ok((columns, rows))
}

/// Converts one column in place. Fails on the first value that does not fit.
fn coerce_column(
    rows: &mut [Row],
    index: usize,
    column: &ResultColumn,
    target: ColumnType,
    driver_type: Option<&str>,
) -> Result<()> {
    for (row_number, row) in rows.iter_mut().enumerate() {
        let Some(cell) = row.get_mut(index) else {
            continue;
        };
        let value = std::mem::take(cell);
        *cell = coerce_value(value, target).map_err(|value| {
            let source = match driver_type.filter(|t| !t.is_empty()) {
                Some(driver_type) => format!("{} '{value}' ({driver_type})", value.kind()),
                None => format!("{} '{value}'", value.kind()),
            };
            LedgerError::type_mismatch(format!(
                "Column '{}' row {}: cannot convert {source} to {target}",
                column.name,
                row_number + 1,
            ))
        })?;
    }
    Ok(())
}

/// Converts a value to the target type, handing it back unchanged on failure.
fn coerce_value(value: Value, target: ColumnType) -> std::result::Result<Value, Value> {
    if value.is_null() {
        return Ok(value);
    }

    match target {
        ColumnType::Integer => match value {
            Value::Int(_) => Ok(value),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18 => {
                Ok(Value::Int(f as i64))
            }
            Value::String(s) => s
                .trim()
                .parse()
                .map(Value::Int)
                .map_err(|_| Value::String(s)),
            other => Err(other),
        },
        ColumnType::Float => match value {
            Value::Float(_) => Ok(value),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Value::Float)
                .map_err(|_| Value::String(s)),
            other => Err(other),
        },
        ColumnType::String | ColumnType::Categorical => match value {
            Value::String(_) => Ok(value),
            other => Ok(Value::String(other.to_display_string())),
        },
        ColumnType::Date => match value {
            Value::Date(_) | Value::Timestamp(_) => Ok(value),
            Value::String(s) => parse_date(&s).ok_or(Value::String(s)),
            other => Err(other),
        },
    }
}

fn parse_date(text: &str) -> Option<Value> {
    let text = text.trim();
    for format in ["%Y-%m-%d", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(Value::Date(date));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Value::Timestamp(ts));
        }
    }
    None
}

/// Removes exact duplicate rows, keeping first occurrences in order.
fn deduplicate(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::with_capacity(rows.len());
    let keep: Vec<bool> = rows.iter().map(|row| seen.insert(RowKey(row))).collect();
    drop(seen);

    rows.into_iter()
        .zip(keep)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect()
}

/// Hashable view of a row. Floats compare by bit pattern.
struct RowKey<'a>(&'a [Value]);

impl Hash for RowKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for value in self.0 {
            std::mem::discriminant(value).hash(state);
            match value {
                Value::Null => {}
                Value::Bool(b) => b.hash(state),
                Value::Int(i) => i.hash(state),
                Value::Float(f) => f.to_bits().hash(state),
                Value::String(s) => s.hash(state),
                Value::Date(d) => d.hash(state),
                Value::Timestamp(ts) => ts.hash(state),
                Value::Bytes(b) => b.hash(state),
            }
        }
    }
}

impl PartialEq for RowKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(other.0).all(|(a, b)| match (a, b) {
                (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
                _ => a == b,
            })
    }
}

impl Eq for RowKey<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockDatabaseClient;
    use crate::template::ParameterMap;
    use pretty_assertions::assert_eq;

    fn definition(statement: &str, columns: Option<Vec<ResultColumn>>) -> QueryDefinition {
        QueryDefinition {
            name: "test".to_string(),
            output_key: "test".to_string(),
            statement: statement.to_string(),
            result_columns: columns,
            deduplicate: false,
            description: String::new(),
            query_type: String::new(),
            parameters: ParameterMap::new(),
        }
    }

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[tokio::test]
    async fn test_driver_names_when_no_columns_declared() {
        let db = MockDatabaseClient::new().with_rows(
            "FROM student",
            &["id", "naam"],
            vec![vec![Value::Int(1), s("Ada")]],
        );
        let outcome = execute(&definition("SELECT * FROM student", None), &db).await;

        match outcome {
            ExecutionOutcome::Success { columns, rows, .. } => {
                assert_eq!(
                    columns,
                    vec![ResultColumn::untyped("id"), ResultColumn::untyped("naam")]
                );
                assert_eq!(rows, vec![vec![Value::Int(1), s("Ada")]]);
            }
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_declared_columns_rename_positionally() {
        let db = MockDatabaseClient::new().with_rows(
            "FROM t",
            &["a", "b"],
            vec![vec![Value::Int(1), Value::Int(2)]],
        );
        let def = definition(
            "SELECT a, b FROM t",
            Some(vec![ResultColumn::untyped("x"), ResultColumn::untyped("y")]),
        );
        let outcome = execute(&def, &db).await;
        match outcome {
            ExecutionOutcome::Success { columns, .. } => {
                assert_eq!(columns[0].name, "x");
                assert_eq!(columns[1].name, "y");
            }
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_column_count_mismatch_is_failure() {
        let db = MockDatabaseClient::new().with_rows(
            "FROM t",
            &["a", "b"],
            vec![vec![Value::Int(1), Value::Int(2)]],
        );
        let def = definition("SELECT a, b FROM t", Some(vec![ResultColumn::untyped("x")]));

        let outcome = execute(&def, &db).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.record_count(), 0);
        assert!(outcome.error().unwrap().to_string().contains("2 column(s)"));
    }

    #[tokio::test]
    async fn test_statement_error_is_failure() {
        let db = MockDatabaseClient::new()
            .with_error("FROM kapot", "relation \"kapot\" does not exist");
        let outcome = execute(&definition("SELECT 1 FROM kapot", None), &db).await;

        match outcome {
            ExecutionOutcome::Failure { error, .. } => {
                assert!(matches!(error, LedgerError::StatementExecution(_)));
                assert!(error.to_string().contains("kapot"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deduplicate_keeps_first_occurrences() {
        let rows = ["A", "A", "B", "C", "C"].iter().map(|v| vec![s(v)]).collect();
        let db = MockDatabaseClient::new().with_rows("FROM t", &["v"], rows);
        let mut def = definition("SELECT v FROM t", None);
        def.deduplicate = true;

        let outcome = execute(&def, &db).await;
        assert_eq!(outcome.record_count(), 3);
        match outcome {
            ExecutionOutcome::Success { rows, .. } => {
                assert_eq!(rows, vec![vec![s("A")], vec![s("B")], vec![s("C")]]);
            }
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deduplicate_after_typing() {
        let db = MockDatabaseClient::new().with_rows(
            "FROM t",
            &["n"],
            vec![vec![s("1")], vec![s(" 1")], vec![Value::Int(1)], vec![Value::Null]],
        );
        let mut def = definition(
            "SELECT n FROM t",
            Some(vec![ResultColumn::typed("n", ColumnType::Integer)]),
        );
        def.deduplicate = true;

        match execute(&def, &db).await {
            ExecutionOutcome::Success { rows, .. } => {
                assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Null]]);
            }
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_coercion_failure_is_failure() {
        let db = MockDatabaseClient::new().with_rows(
            "FROM t",
            &["n"],
            vec![vec![s("12")], vec![s("twaalf")]],
        );
        let def = definition(
            "SELECT n FROM t",
            Some(vec![ResultColumn::typed("n", ColumnType::Integer)]),
        );

        match execute(&def, &db).await {
            ExecutionOutcome::Failure { error, .. } => {
                assert!(matches!(error, LedgerError::TypeMismatch(_)));
                assert!(error.to_string().contains("row 2"));
                assert!(error.to_string().contains("'twaalf' (text)"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_elapsed_includes_binding_failures() {
        let latency = Duration::from_millis(15);
        let db = MockDatabaseClient::new()
            .with_rows("FROM t", &["n"], vec![vec![s("twaalf")]])
            .with_latency(latency);
        let def = definition(
            "SELECT n FROM t",
            Some(vec![ResultColumn::typed("n", ColumnType::Integer)]),
        );

        let outcome = execute(&def, &db).await;
        assert!(!outcome.is_success());
        assert!(outcome.elapsed() >= latency);
    }

    #[tokio::test]
    async fn test_empty_result_without_driver_columns() {
        let db = MockDatabaseClient::new().with_rows("FROM leeg", &[], vec![]);
        let def = definition("SELECT a FROM leeg", Some(vec![ResultColumn::untyped("a")]));

        let outcome = execute(&def, &db).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.record_count(), 0);
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(coerce_value(Value::Float(3.0), ColumnType::Integer), Ok(Value::Int(3)));
        assert_eq!(coerce_value(s(" 42 "), ColumnType::Integer), Ok(Value::Int(42)));
        assert!(coerce_value(Value::Float(3.5), ColumnType::Integer).is_err());
        assert_eq!(coerce_value(Value::Null, ColumnType::Integer), Ok(Value::Null));
    }

    #[test]
    fn test_coerce_float_and_string() {
        assert_eq!(coerce_value(Value::Int(2), ColumnType::Float), Ok(Value::Float(2.0)));
        assert_eq!(coerce_value(s("7.5"), ColumnType::Float), Ok(Value::Float(7.5)));
        assert_eq!(coerce_value(Value::Int(2), ColumnType::String), Ok(s("2")));
        assert_eq!(coerce_value(Value::Bool(true), ColumnType::Categorical), Ok(s("true")));
    }

    #[test]
    fn test_coerce_date() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        assert_eq!(coerce_value(s("2024-09-01"), ColumnType::Date), Ok(Value::Date(date)));
        assert_eq!(coerce_value(s("01-09-2024"), ColumnType::Date), Ok(Value::Date(date)));
        assert_eq!(
            coerce_value(s("2024-09-01T08:30:00"), ColumnType::Date),
            Ok(Value::Timestamp(date.and_hms_opt(8, 30, 0).unwrap()))
        );
        assert!(coerce_value(s("september"), ColumnType::Date).is_err());
        assert!(coerce_value(Value::Int(20240901), ColumnType::Date).is_err());
    }

    #[test]
    fn test_outcome_accessors() {
        let failure = ExecutionOutcome::not_run(LedgerError::unresolved("jaar"));
        assert!(!failure.is_success());
        assert_eq!(failure.elapsed(), Duration::ZERO);
        assert!(matches!(failure.error(), Some(LedgerError::UnresolvedParameter(_))));
    }
}
