//! Telemetry Query CLI
//!
//! Command-line interface for querying Workers observability telemetry.

use std::ffi::OsString;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use telemetry_query::config::LoggingConfig;
use telemetry_query::executor::{HttpBackend, QueryExecutor};
use telemetry_query::models::{
    KeysRequest, PrimitiveValue, QueryCalculation, QueryFilter, QueryGroupBy, QueryOperator,
    QueryRunRequest, SearchNeedle, Timeframe, ValueType, ValuesRequest, View,
};
use telemetry_query::tools::{self, ObservabilityTools};
use telemetry_query::validation::{
    normalize_keys_request, normalize_run_request, normalize_values_request,
};
use telemetry_query::{AccountContext, Config};

/// Telemetry Query - Workers observability from the command line
#[derive(Parser)]
#[command(name = "telemetry-query")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "TELEMETRY_QUERY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "pretty")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Load `.env` (or `env_file`), then parse `args`
    ///
    /// `.env` must be loaded first so `env =` bindings such as
    /// `TELEMETRY_QUERY_CONFIG` can see it.
    fn load<I, T>(env_file: Option<&Path>, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        if let Some(path) = env_file {
            dotenvy::from_path(path).ok();
        } else {
            dotenvy::dotenv().ok();
        }
        Self::try_parse_from(args)
    }
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Single-line JSON
    Json,
    /// Indented JSON
    #[default]
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query
    Query {
        /// Read the full request as JSON from a file ("-" for stdin)
        #[arg(long, conflicts_with_all = ["view", "filter", "calc", "group_by"])]
        file: Option<PathBuf>,

        /// Query id (generated when omitted)
        #[arg(long)]
        query_id: Option<String>,

        /// Result shape (events, calculations, invocations, ...)
        #[arg(long)]
        view: Option<View>,

        /// Time range (e.g., "15m", "1h", "7d")
        #[arg(long)]
        last: Option<String>,

        /// Equality filter, KEY=VALUE (repeatable)
        #[arg(long)]
        filter: Vec<String>,

        /// Calculation, OPERATOR or OPERATOR:KEY (repeatable)
        #[arg(long)]
        calc: Vec<String>,

        /// Group results by a string field (repeatable)
        #[arg(long)]
        group_by: Vec<String>,

        /// Dataset to search (repeatable)
        #[arg(long)]
        dataset: Vec<String>,

        /// Maximum number of events
        #[arg(long)]
        limit: Option<u32>,

        /// Plan the query without running it
        #[arg(long)]
        dry: bool,
    },

    /// List keys present in the telemetry data
    Keys {
        /// Read the full request as JSON from a file ("-" for stdin)
        #[arg(long, conflicts_with_all = ["key_needle", "limit"])]
        file: Option<PathBuf>,

        /// Time range
        #[arg(long)]
        last: Option<String>,

        /// Dataset to search (repeatable)
        #[arg(long)]
        dataset: Vec<String>,

        /// Maximum number of keys
        #[arg(long)]
        limit: Option<u64>,

        /// Only keys containing this text (case-insensitive)
        #[arg(long)]
        key_needle: Option<String>,
    },

    /// List values seen for a key
    Values {
        /// Read the full request as JSON from a file ("-" for stdin)
        #[arg(long, conflicts_with = "key")]
        file: Option<PathBuf>,

        /// Key to list values for
        #[arg(long, required_unless_present = "file")]
        key: Option<String>,

        /// Declared type of the key (string, number, boolean)
        #[arg(long = "type", default_value = "string")]
        value_type: String,

        /// Time range
        #[arg(long)]
        last: Option<String>,

        /// Dataset to search (repeatable)
        #[arg(long)]
        dataset: Vec<String>,

        /// Maximum number of values
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Show the tools exposed to agents
    Tools,

    /// Invoke a tool with JSON arguments, printing its payload
    Call {
        /// Tool name
        tool: String,

        /// Arguments object; read from stdin when omitted
        #[arg(long)]
        args: Option<String>,
    },

    /// Answer newline-delimited tool calls on stdin
    Serve,
}

/// One line of `serve` input
#[derive(serde::Deserialize)]
struct ToolCallLine {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::load(None, std::env::args_os()).unwrap_or_else(|e| e.exit());

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    init_logging(&config.logging, cli.verbose);

    let result = run(cli.command, config, cli.format).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn run(command: Commands, config: Config, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Tools => print(&tools::definitions(), format),
        Commands::Call { tool, args } => {
            let arguments = match args {
                Some(args) => serde_json::from_str(&args).context("--args is not valid JSON")?,
                None => read_json(Path::new("-"))?,
            };
            let registry = ObservabilityTools::new(QueryExecutor::from_config(&config.api)?);
            let payload = registry
                .call(&tool, &arguments, config.account.context().as_ref())
                .await;
            println!("{payload}");
            Ok(())
        }
        Commands::Serve => run_serve(&config).await,
        Commands::Query {
            file,
            query_id,
            view,
            last,
            filter,
            calc,
            group_by,
            dataset,
            limit,
            dry,
        } => {
            let request = match file {
                Some(path) => normalize_run_request(&read_json(&path)?)?,
                None => {
                    let mut request = QueryRunRequest::new(
                        query_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        timeframe(last.as_deref(), &config)?,
                    )
                    .view(view.unwrap_or(config.query.view));
                    request.dry = dry;
                    if let Some(limit) = limit {
                        request = request.limit(limit);
                    }
                    for f in &filter {
                        request = request.filter(parse_filter(f)?);
                    }
                    for c in &calc {
                        request = request.calculation(parse_calculation(c)?);
                    }
                    for g in group_by {
                        request = request.group_by(QueryGroupBy::string(g));
                    }
                    request.parameters.datasets = datasets(dataset, &config);
                    request
                }
            };

            let (executor, account) = connect(&config)?;
            info!(query_id = %request.query_id, view = %request.view, "Running query");
            let result = executor.run_query(&account, &request).await?;
            print(&result, format)
        }
        Commands::Keys {
            file,
            last,
            dataset,
            limit,
            key_needle,
        } => {
            let request = match file {
                Some(path) => normalize_keys_request(&read_json(&path)?)?,
                None => KeysRequest {
                    datasets: datasets(dataset, &config).unwrap_or_default(),
                    limit,
                    key_needle: key_needle.map(SearchNeedle::contains),
                    ..KeysRequest::within(timeframe(last.as_deref(), &config)?)
                },
            };

            let (executor, account) = connect(&config)?;
            let keys = executor.list_keys(&account, &request).await?;
            print(&keys, format)
        }
        Commands::Values {
            file,
            key,
            value_type,
            last,
            dataset,
            limit,
        } => {
            let request = match (file, key) {
                (Some(path), _) => normalize_values_request(&read_json(&path)?)?,
                (None, Some(key)) => {
                    let value_type: ValueType =
                        serde_json::from_value(Value::String(value_type.clone()))
                            .with_context(|| format!("unknown type `{value_type}`"))?;
                    let mut request =
                        ValuesRequest::new(timeframe(last.as_deref(), &config)?, key, value_type);
                    request.datasets = datasets(dataset, &config).unwrap_or_default();
                    if let Some(limit) = limit {
                        request.limit = limit;
                    }
                    request
                }
                (None, None) => anyhow::bail!("--key is required without --file"),
            };

            let (executor, account) = connect(&config)?;
            let values = executor.list_values(&account, &request).await?;
            print(&values, format)
        }
    }
}

async fn run_serve(config: &Config) -> anyhow::Result<()> {
    let registry = ObservabilityTools::new(QueryExecutor::from_config(&config.api)?);
    let account = config.account.context();
    info!(active_account = account.is_some(), "Serving tool calls on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let payload = match serde_json::from_str::<ToolCallLine>(&line) {
            Ok(call) => {
                debug!(tool = %call.tool, "Tool call received");
                registry
                    .call(&call.tool, &call.arguments, account.as_ref())
                    .await
            }
            Err(e) => serde_json::json!({ "error": format!("Invalid tool call: {e}") }).to_string(),
        };
        stdout.write_all(payload.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("Input closed, shutting down");
    Ok(())
}

fn connect(config: &Config) -> anyhow::Result<(QueryExecutor<HttpBackend>, AccountContext)> {
    let account = config
        .account
        .context()
        .context(tools::NO_ACTIVE_ACCOUNT)?;
    let executor = QueryExecutor::from_config(&config.api)?;
    Ok((executor, account))
}

fn timeframe(last: Option<&str>, config: &Config) -> anyhow::Result<Timeframe> {
    let last = last.unwrap_or(&config.query.last);
    let span = humantime::parse_duration(last)
        .with_context(|| format!("invalid time range `{last}`"))?;
    Ok(Timeframe::last(span))
}

fn datasets(from_args: Vec<String>, config: &Config) -> Option<Vec<String>> {
    let datasets = if from_args.is_empty() {
        config.query.datasets.clone()
    } else {
        from_args
    };
    (!datasets.is_empty()).then_some(datasets)
}

fn parse_filter(raw: &str) -> anyhow::Result<QueryFilter> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("filter `{raw}` is not KEY=VALUE"))?;
    let value = if let Ok(b) = value.parse::<bool>() {
        PrimitiveValue::Bool(b)
    } else if let Ok(n) = value.parse::<i64>() {
        PrimitiveValue::from(n)
    } else {
        PrimitiveValue::from(value)
    };
    Ok(QueryFilter::eq(key, value))
}

fn parse_calculation(raw: &str) -> anyhow::Result<QueryCalculation> {
    let (operator, key) = match raw.split_once(':') {
        Some((operator, key)) => (operator, Some(key)),
        None => (raw, None),
    };
    let operator: QueryOperator = serde_json::from_value(Value::String(operator.to_string()))
        .with_context(|| format!("unknown operator `{operator}`"))?;
    Ok(match key {
        Some(key) => QueryCalculation::of(operator, key),
        None => QueryCalculation {
            key: None,
            key_type: None,
            operator,
            alias: None,
        },
    })
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&raw).context("input is not valid JSON")
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
    };
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_file_feeds_config_flag() {
        let mut env_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(env_file, "TELEMETRY_QUERY_CONFIG=/etc/telemetry-query/from-env.toml").unwrap();

        let cli = Cli::load(Some(env_file.path()), ["telemetry-query", "tools"]).unwrap();
        assert_eq!(
            cli.config.as_deref(),
            Some(Path::new("/etc/telemetry-query/from-env.toml"))
        );
        assert!(matches!(cli.command, Commands::Tools));
    }

    #[test]
    fn test_parse_calculation() {
        let calc = parse_calculation("p99:$workers.wallTimeMs").unwrap();
        assert_eq!(calc.operator, QueryOperator::P99);
        assert_eq!(calc.key.as_deref(), Some("$workers.wallTimeMs"));

        assert!(parse_calculation("count").unwrap().key.is_none());
        assert!(parse_calculation("fastest:x").is_err());
    }

    #[test]
    fn test_parse_filter_infers_type() {
        let filter = parse_filter("$metadata.statusCode=500").unwrap();
        assert_eq!(filter.value_type, ValueType::Number);
        assert!(parse_filter("no-separator").is_err());
    }
}
