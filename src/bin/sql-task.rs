use std::future::Future;
use std::path::Path;
use std::process::ExitCode;

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::Value as JsonValue;
use sql_tasks::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run SQL Server tasks: queries, procedures, batches and bulk inserts"
)]
struct Args {
    /// ADO-style connection string
    #[arg(long, env = "SQL_TASK_CONNECTION_STRING", hide_env_values = true)]
    connection_string: String,

    /// Command timeout in seconds (0 waits indefinitely)
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    #[arg(long, value_enum, default_value = "default")]
    isolation_level: IsolationLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an ad-hoc statement and print its first result set
    Query {
        sql: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Invoke a stored procedure and print its first result set
    Procedure {
        name: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Execute a statement once per object of a JSON array
    Batch {
        sql: String,
        /// JSON array of objects, or @path to read it from a file
        #[arg(long)]
        input: String,
    },
    /// Copy a JSON array of objects into a table
    BulkInsert {
        table: String,
        /// JSON array of objects, or @path to read it from a file
        #[arg(long)]
        input: String,
        #[arg(long)]
        fire_triggers: bool,
        #[arg(long)]
        keep_identity: bool,
        #[arg(long)]
        empty_as_null: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct ParamArgs {
    /// NAME=VALUE, repeatable
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<Parameter>,
    /// NAME bound as NULL, repeatable
    #[arg(long = "null-param")]
    null_params: Vec<String>,
}

impl ParamArgs {
    fn into_parameters(self) -> Vec<Parameter> {
        let mut params = self.params;
        params.extend(self.null_params.into_iter().map(Parameter::null));
        params
    }
}

fn parse_param(raw: &str) -> Result<Parameter, String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.trim().is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok(Parameter::new(name.trim(), value))
}

fn read_input(input: &str) -> Result<String, SqlTaskError> {
    match input.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path)).map_err(|e| {
            SqlTaskError::ConfigError(format!("Failed to read input file {path}: {e}"))
        }),
        None => Ok(input.to_string()),
    }
}

async fn run(
    tasks: &SqlTasks,
    args: Args,
    cancel: &CancellationToken,
) -> Result<JsonValue, SqlTaskError> {
    let options = Options::default()
        .with_timeout(args.timeout)
        .with_isolation_level(args.isolation_level);
    let connection_string = args.connection_string;

    match args.command {
        Command::Query { sql, params } => {
            let input = InputQuery {
                query: sql,
                parameters: params.into_parameters(),
                connection_string,
            };
            tasks.execute_query(&input, &options, cancel).await
        }
        Command::Procedure { name, params } => {
            let input = InputProcedure {
                execute: name,
                parameters: params.into_parameters(),
                connection_string,
            };
            tasks.execute_procedure(&input, &options, cancel).await
        }
        Command::Batch { sql, input } => {
            let input = InputBatchOperation {
                query: sql,
                input_json: read_input(&input)?,
                connection_string,
            };
            let affected = tasks.batch_operation(&input, &options, cancel).await?;
            Ok(JsonValue::from(affected))
        }
        Command::BulkInsert {
            table,
            input,
            fire_triggers,
            keep_identity,
            empty_as_null,
        } => {
            let input = BulkInsertInput {
                input_data: read_input(&input)?,
                table_name: table,
                connection_string,
            };
            let bulk_options = BulkInsertOptions {
                command_timeout_seconds: options.command_timeout_seconds,
                fire_triggers,
                keep_identity,
                convert_empty_property_values_to_null: empty_as_null,
                isolation_level: options.isolation_level,
            };
            let copied = tasks.bulk_insert(&input, &bulk_options, cancel).await?;
            Ok(JsonValue::from(copied))
        }
    }
}

/// Drive `call` to completion. The first `interrupt` cancels `cancel` and
/// keeps polling `call` so it can stop on its own; a second one abandons it.
async fn until_interrupted<T, I>(
    call: impl Future<Output = Result<T, SqlTaskError>>,
    cancel: &CancellationToken,
    mut interrupt: impl FnMut() -> I,
) -> Result<T, SqlTaskError>
where
    I: Future<Output = ()>,
{
    tokio::pin!(call);
    tokio::select! {
        biased;
        result = &mut call => return result,
        () = interrupt() => {
            info!("interrupted, waiting for the running call to stop");
            cancel.cancel();
        }
    }
    tokio::select! {
        biased;
        result = &mut call => result,
        () = interrupt() => {
            info!("interrupted again, abandoning the call");
            Err(SqlTaskError::Cancelled)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let tasks = match SqlTasks::from_env() {
        Ok(tasks) => tasks,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let outcome = until_interrupted(run(&tasks, args, &cancel), &cancel, || async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await;

    let printed = outcome.and_then(|value| {
        serde_json::to_string_pretty(&value).map_err(SqlTaskError::from)
    });
    match printed {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
