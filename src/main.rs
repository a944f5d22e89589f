//! qledger - run parameterized SQL report queries into a result ledger.

mod cli;

use cli::{key_pattern, Cli, Command};
use query_ledger::batch::{
    plan_query, plan_set, BatchOptions, BatchReport, BatchRunner, PlannedQuery,
};
use query_ledger::config::{Config, ConnectionConfig};
use query_ledger::db::ConfigConnector;
use query_ledger::error::{LedgerError, Result};
use query_ledger::ledger::Ledger;
use query_ledger::logging;
use query_ledger::template::{FileTemplateStore, Resolver};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status when a strict run had failing queries.
const EXIT_QUERY_FAILURES: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}: {}", e.category(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let templates = FileTemplateStore::new(cli.templates_dir(&config));
    let output_dir = cli.output_dir(&config);

    match &cli.command {
        Command::Run {
            set,
            params,
            workers,
            policy,
            strict,
        } => {
            let parameters = params.parameter_map()?;
            let plan = plan_set(&config, &templates, set, &parameters, params.repr())?;

            let mut options = BatchOptions::from(&config.batch);
            if let Some(workers) = workers {
                options.max_workers = (*workers).max(1);
            }
            if let Some(policy) = policy {
                options.connection_policy = *policy;
            }

            let report = run_batch(&cli, &config, &output_dir, plan, options).await?;
            Ok(exit_code(&report, *strict))
        }
        Command::Query {
            template,
            params,
            strict,
        } => {
            // A template that fails to resolve still runs so the failure is recorded.
            let parameters = params.parameter_map()?;
            let planned = plan_query(&templates, template, &parameters, params.repr());
            let options = BatchOptions::from(&config.batch);
            let report = run_batch(&cli, &config, &output_dir, vec![planned], options).await?;
            Ok(exit_code(&report, *strict))
        }
        Command::Resolve { template, params } => {
            let parameters = params.parameter_map()?;
            let definition =
                Resolver::new(templates).resolve(template, &parameters, params.repr())?;

            println!("-- {}", definition.output_key);
            if !definition.description.is_empty() {
                println!("-- {}", definition.description);
            }
            if let Some(columns) = &definition.result_columns {
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                println!("-- columns: {}", names.join(", "));
            }
            println!("{}", definition.statement);
            Ok(ExitCode::SUCCESS)
        }
        Command::Sets => {
            for name in config.set_names() {
                let set = config.query_set(name)?;
                println!("{name} ({} queries)", set.queries.len());
                if !set.description.is_empty() {
                    println!("    {}", set.description);
                }
                for param in &set.parameters {
                    let help = config
                        .parameters
                        .get(param)
                        .map(|spec| spec.description.as_str())
                        .unwrap_or("");
                    println!(
                        "    -P {param}=<{}>  {help}",
                        config.parameter_type(param)
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Overview { matching } => {
            let pattern = key_pattern(matching.as_deref())?;
            let ledger = Ledger::open(&output_dir, config.batch.overview).await?;

            for row in ledger.overview().await? {
                if pattern.as_ref().is_some_and(|re| !re.is_match(&row.output_key)) {
                    continue;
                }
                println!(
                    "{:<40} {:<7} {:>8} {:>8.2}s  {}",
                    row.output_key,
                    row.status.as_str(),
                    row.record_count,
                    row.duration_secs,
                    row.created_at.format("%Y-%m-%d %H:%M:%S"),
                );
                if let Some(error) = &row.error {
                    println!("    {error}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Results { prefix, matching } => {
            let pattern = key_pattern(matching.as_deref())?;
            let ledger = Ledger::open(&output_dir, config.batch.overview).await?;

            for key in ledger.list(prefix.as_deref()).await? {
                if pattern.as_ref().is_some_and(|re| !re.is_match(&key)) {
                    continue;
                }
                println!("{key}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_batch(
    cli: &Cli,
    config: &Config,
    output_dir: &Path,
    plan: Vec<PlannedQuery>,
    options: BatchOptions,
) -> Result<BatchReport> {
    let connection = resolve_connection(cli, config)?
        .ok_or_else(|| LedgerError::config("No database connection configured"))?;
    info!("Connection: {}", connection.display_string());

    let ledger = Arc::new(Ledger::open(output_dir, config.batch.overview).await?);
    let cancel = CancellationToken::new();
    let runner = BatchRunner::new(Arc::new(ConfigConnector::new(connection)), ledger, options)
        .with_cancellation(cancel.clone());

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for running queries");
            cancel.cancel();
        }
    });

    let report = runner.run(plan).await;
    interrupt.abort();
    let report = report?;

    for record in &report.records {
        match &record.error {
            None => println!(
                "ok    {} ({} rows, {:.2}s)",
                record.output_key, record.record_count, record.duration_secs
            ),
            Some(error) => println!("FAIL  {}: {error}", record.output_key),
        }
    }
    for key in &report.skipped {
        println!("skip  {key}");
    }
    for batch_error in &report.errors {
        error!(
            key = batch_error.output_key.as_deref().unwrap_or("-"),
            "{}: {}",
            batch_error.error.category(),
            batch_error.error
        );
    }
    println!("{}", report.summary());

    Ok(report)
}

fn exit_code(report: &BatchReport, strict: bool) -> ExitCode {
    if !report.is_persisted() {
        ExitCode::FAILURE
    } else if strict && report.failed() > 0 {
        ExitCode::from(EXIT_QUERY_FAILURES)
    } else {
        ExitCode::SUCCESS
    }
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    // Precedence: --url, then --connection, then the "default" entry.
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(LedgerError::config(format!(
                    "Connection '{name}' not found in config file"
                )));
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    if let Some(ref mut conn) = connection {
        conn.apply_env_defaults();
    }

    Ok(connection)
}
