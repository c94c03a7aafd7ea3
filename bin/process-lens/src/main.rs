// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

// Thin front end; all behaviour lives in the sieve and strata crates.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lens_contracts::{DatabaseConnector, SqlDialect, TabularResult};
use sieve::{
    describe, FixtureConnector, LensConfig, ProcessCache, ProcessDiscoveryEngine, SqlValidator,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use strata::{LayoutDirection, ProcessVisualiser};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "process-lens", about = "SQL validation, process discovery and process graphs")]
struct Cli {
    /// YAML configuration; defaults to $PROCESS_LENS_CONFIG, then built-in values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run a query through the validator and print the result as JSON.
    Validate {
        /// Query text, or @path to read it from a file.
        #[arg(long)]
        sql: String,
        #[arg(long)]
        from: Option<SqlDialect>,
        #[arg(long)]
        to: Option<SqlDialect>,
    },

    /// Build a process graph from a saved result set.
    Graph {
        #[arg(long)]
        result: PathBuf,
        #[arg(long, default_value = "")]
        question: String,
        #[arg(long)]
        direction: Option<LayoutDirection>,
        #[arg(long, default_value = "")]
        query: String,
        /// Build even when detection does not classify the result as a process.
        #[arg(long)]
        force: bool,
    },

    /// Discover processes in a JSON fixture database.
    Discover {
        #[arg(long)]
        fixture: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.config.as_deref())?;
    let cache = Arc::new(ProcessCache::new());
    match cli.cmd {
        Command::Validate { sql, from, to } => validate(&config, &sql, from, to),
        Command::Graph {
            result,
            question,
            direction,
            query,
            force,
        } => graph(&config, &result, &question, direction, &query, force),
        Command::Discover { fixture } => discover(&config, &fixture, cache).await,
    }
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<LensConfig> {
    let config = match path {
        Some(path) => LensConfig::from_yaml_file(path)?,
        None => LensConfig::load()?,
    };
    Ok(config)
}

/// `@path` reads the query from a file; anything else is the query itself.
fn sql_argument(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query file '{path}'")),
        None => Ok(arg.to_string()),
    }
}

fn validate(
    config: &LensConfig,
    sql: &str,
    from: Option<SqlDialect>,
    to: Option<SqlDialect>,
) -> Result<ExitCode> {
    let query = sql_argument(sql)?;
    let validator = SqlValidator::new(&config.validator)?;
    let result = validator.validate(
        &query,
        from.unwrap_or(validator.source_dialect()),
        to.unwrap_or(validator.target_dialect()),
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn graph(
    config: &LensConfig,
    result_path: &Path,
    question: &str,
    direction: Option<LayoutDirection>,
    query: &str,
    force: bool,
) -> Result<ExitCode> {
    let content = std::fs::read_to_string(result_path)
        .with_context(|| format!("failed to read result '{}'", result_path.display()))?;
    let result: TabularResult = serde_json::from_str(&content)?;
    let catalogue = config.catalogue();
    let mut visualiser = ProcessVisualiser::new(
        &config.styles,
        catalogue.clone(),
        config.layout,
        config.detection.clone(),
    )?;
    if let Some(direction) = direction {
        visualiser = visualiser.with_direction(direction);
    }

    let visualisation = visualiser.visualise(question, &result, query)?;
    let flow = match visualisation.flow {
        Some(flow) => Some(flow),
        None if force => {
            warn!(
                confidence = visualisation.detection.confidence,
                "Result not classified as a process; building anyway"
            );
            visualiser.build(&result, visualisation.detection.process_type.as_deref(), query)
        }
        None => None,
    };
    let Some(flow) = flow else {
        warn!(
            confidence = visualisation.detection.confidence,
            shape = ?visualisation.detection.shape,
            "No process graph for this result"
        );
        println!("{}", serde_json::to_string_pretty(&visualisation.detection)?);
        return Ok(ExitCode::from(3));
    };
    flow.validate()?;
    info!("{}", describe(&flow, &catalogue));
    println!("{}", serde_json::to_string_pretty(&flow.to_json()?)?);
    Ok(ExitCode::SUCCESS)
}

async fn discover(config: &LensConfig, fixture: &Path, cache: Arc<ProcessCache>) -> Result<ExitCode> {
    let connector = FixtureConnector::from_json_file(fixture)?;
    connector.connect().await?;
    let engine = ProcessDiscoveryEngine::new(
        config.discovery.clone(),
        config.catalogue(),
        cache,
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let processes = engine.discover_live(&connector, &cancel).await?;
    connector.disconnect().await?;
    info!(processes = processes.len(), "Discovery finished");
    println!("{}", serde_json::to_string_pretty(&processes)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sql_argument_reads_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"SELECT 1").unwrap();
        let arg = format!("@{}", file.path().display());
        assert_eq!(sql_argument(&arg).unwrap(), "SELECT 1");
        assert_eq!(sql_argument("SELECT 2").unwrap(), "SELECT 2");
        assert!(sql_argument("@/no/such/file.sql").is_err());
    }

    #[test]
    fn cli_parses_dialects_and_direction() {
        let cli = Cli::parse_from([
            "process-lens",
            "--json-logs",
            "validate",
            "--sql",
            "SELECT 1",
            "--from",
            "postgresql",
            "--to",
            "sqlserver",
        ]);
        assert!(cli.json_logs);
        match cli.cmd {
            Command::Validate { from, to, .. } => {
                assert_eq!(from, Some(SqlDialect::Postgres));
                assert_eq!(to, Some(SqlDialect::MsSql));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from(["process-lens", "graph", "--result", "r.json", "--direction", "LR"]);
        match cli.cmd {
            Command::Graph { direction, .. } => {
                assert_eq!(direction, Some(LayoutDirection::LeftToRight))
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
