//! finquery: ask questions about your personal finances.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Local;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use finquery::ingest::{default_clean_output, read_clean_csv, write_clean_csv};
use finquery::{build_database, clean_export, AnswerSynthesizer, DbExecutor, Pipeline};
use finquery_cli::output::{
    print_answer, print_history, print_names, print_schema, print_status, DebugInfo,
};
use finquery_cli::{Overrides, QueryLogger, Settings};

#[derive(Parser)]
#[command(
    name = "finquery",
    about = "Ask questions about your personal finances in plain English",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Path to the SQLite finance database.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print JSON instead of Markdown.
    #[arg(long, global = true)]
    json: bool,

    /// Main currency of the dataset.
    #[arg(long, global = true)]
    currency: Option<String>,

    /// Directory for charts.
    #[arg(long, global = true)]
    artifacts_dir: Option<String>,

    /// Directory for the query log.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// Never draw charts.
    #[arg(long, global = true)]
    no_charts: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// A question to answer (same as `finquery ask ...`).
    question: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question.
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        /// Print query id, timing, SQL and log path.
        #[arg(long)]
        debug: bool,

        /// Seconds before giving up.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Launch interactive REPL mode.
    Repl,

    /// Clean a Toshl CSV export.
    Clean {
        #[arg(long)]
        input: PathBuf,

        /// Defaults to ../clean/toshl_<month><year>_clean.csv next to the input.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load a cleaned CSV into the database.
    Ingest { csv: PathBuf },

    /// List tables and views.
    Tables,

    /// Show the columns of a table.
    Schema { table: String },

    /// Show dataset coverage.
    Status,

    /// Show recently asked questions.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show one query log entry.
    Show { id: String },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   finquery completions bash > ~/.local/share/bash-completion/completions/finquery
    ///   finquery completions zsh > ~/.zfunc/_finquery
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

async fn ask(
    settings: Settings,
    question: String,
    debug: bool,
    json: bool,
    timeout: u64,
) -> anyhow::Result<()> {
    let executor = DbExecutor::open(&settings.db_path)
        .with_context(|| format!("cannot open database {}", settings.db_path.display()))?;
    let pipeline = Pipeline::new(executor, settings.pipeline_config(None));

    let started = Instant::now();
    let text = question.clone();
    let task = tokio::task::spawn_blocking(move || pipeline.ask(&text));
    let answer = match tokio::time::timeout(Duration::from_secs(timeout), task).await {
        Ok(joined) => joined.context("pipeline task failed")?,
        Err(_) => {
            tracing::warn!(timeout, "question timed out");
            AnswerSynthesizer::new(settings.currency.as_str())
                .error(&question, &format!("The query timed out after {timeout}s"))
        }
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let mut query_id = None;
    let mut log_path = None;
    match QueryLogger::open(&settings.log_dir) {
        Ok(mut logger) => {
            match logger.log_answer(&answer, elapsed_ms) {
                Ok(id) => query_id = Some(id),
                Err(e) => tracing::warn!(error = %e, "could not write query log"),
            }
            log_path = Some(logger.path().to_path_buf());
        }
        Err(e) => tracing::warn!(error = %e, "query log disabled"),
    }

    let info = DebugInfo {
        query_id: query_id.as_deref(),
        elapsed_ms,
        log_path: log_path.as_deref(),
    };
    print_answer(&answer, json, debug.then_some(&info))
}

fn open_db(settings: &Settings) -> anyhow::Result<DbExecutor> {
    DbExecutor::open(&settings.db_path)
        .with_context(|| format!("cannot open database {}", settings.db_path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::resolve(&Overrides {
        db: cli.db.clone(),
        log_dir: cli.log_dir.clone(),
        artifacts_dir: cli.artifacts_dir.clone(),
        currency: cli.currency.clone(),
        rates: None,
        no_charts: cli.no_charts,
    })?;
    let json = cli.json;

    let command = match cli.command {
        Some(c) => c,
        None if !cli.question.is_empty() => Commands::Ask {
            question: cli.question,
            debug: false,
            timeout: 30,
        },
        None => Commands::Repl,
    };

    match command {
        Commands::Ask {
            question,
            debug,
            timeout,
        } => {
            ask(settings, question.join(" "), debug, json, timeout).await?;
        }

        Commands::Repl => {
            finquery_cli::repl::run(&settings, json)?;
        }

        Commands::Clean { input, output } => {
            let records = clean_export(&input, &settings.clean_options())
                .with_context(|| format!("cannot clean {}", input.display()))?;
            let output =
                output.unwrap_or_else(|| default_clean_output(&input, Local::now().date_naive()));
            write_clean_csv(&records, &output)
                .with_context(|| format!("cannot write {}", output.display()))?;
            println!("Cleaned {} rows into {}", records.len(), output.display());
        }

        Commands::Ingest { csv } => {
            let records =
                read_clean_csv(&csv).with_context(|| format!("cannot read {}", csv.display()))?;
            let summary = build_database(&records, &settings.db_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Database: {}", summary.db_path.display());
                println!("  Expenses inserted: {}", summary.expenses_inserted);
                println!("  Incomes inserted:  {}", summary.incomes_inserted);
                println!("  Skipped:           {}", summary.skipped);
            }
        }

        Commands::Tables => {
            let db = open_db(&settings)?;
            let tables = db.list_tables()?;
            let views = db.list_views()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "tables": tables,
                        "views": views,
                    }))?
                );
            } else {
                print_names("Tables", &tables);
                print_names("Views", &views);
            }
        }

        Commands::Schema { table } => {
            let db = open_db(&settings)?;
            let columns = db.table_schema(&table)?;
            print_schema(&table, &columns, json)?;
        }

        Commands::Status => {
            let db = open_db(&settings)?;
            let meta = db.dataset_meta()?;
            print_status(&settings.db_path, meta.as_ref(), json)?;
        }

        Commands::History { limit } => {
            let logger = QueryLogger::open(&settings.log_dir)?;
            print_history(&logger.recent(limit)?, json)?;
        }

        Commands::Show { id } => {
            let logger = QueryLogger::open(&settings.log_dir)?;
            match logger.get(&id)? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => {
                    eprintln!("No query with id {id} in {}", logger.path().display());
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "finquery", &mut std::io::stdout());
        }
    }

    Ok(())
}
