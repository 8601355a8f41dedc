//! Interactive REPL.
//!
//! Launch with `finquery repl`. Anything not starting with `/` is a question.
//! Type `/help` for commands, Tab for completion.

use std::time::Instant;

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tracing::warn;

use finquery::{DbExecutor, Pipeline};

use crate::config::Settings;
use crate::logger::QueryLogger;
use crate::output::{print_answer, print_history, print_schema, DebugInfo};

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/tables", "List tables and views"),
    ("/schema", "Show the columns of a table"),
    ("/history", "Show recent questions"),
    ("/sql", "Show the SQL of the last answer"),
    ("/debug", "Toggle debug output"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// Tab completion for commands and table names.
struct FinqueryHelper {
    tables: Vec<String>,
}

impl Completer for FinqueryHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if input.starts_with('/') && !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        if let Some(args) = input.strip_prefix("/schema ") {
            let prefix_start = input.len() - args.len();
            let matches: Vec<Pair> = self
                .tables
                .iter()
                .filter(|t| t.starts_with(args.trim()))
                .map(|t| Pair {
                    display: t.clone(),
                    replacement: format!("{t} "),
                })
                .collect();
            return Ok((prefix_start, matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for FinqueryHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for FinqueryHelper {}
impl Validator for FinqueryHelper {}
impl Helper for FinqueryHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Session state.
struct ReplState {
    pipeline: Pipeline,
    logger: Option<QueryLogger>,
    last_sql: Option<String>,
    debug: bool,
    json: bool,
}

/// Run the interactive REPL.
pub fn run(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let executor = DbExecutor::open(&settings.db_path)?;
    let mut tables = executor.list_tables()?;
    tables.extend(executor.list_views()?);
    let pipeline = Pipeline::new(executor, settings.pipeline_config(None));
    let logger = match QueryLogger::open(&settings.log_dir) {
        Ok(l) => Some(l),
        Err(e) => {
            warn!(error = %e, "query log disabled");
            None
        }
    };

    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mfinquery v{}\x1b[0m \x1b[90m- ask your finances\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("    Database: {}", settings.db_path.display());
    eprintln!();
    eprintln!(
        "    Type a question, \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<FinqueryHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(FinqueryHelper { tables }));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let hist_path = dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".finquery_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let mut state = ReplState {
        pipeline,
        logger,
        last_sql: None,
        debug: false,
        json,
    };
    let prompt = " \x1b[36mfinquery>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if matches!(line.to_lowercase().as_str(), "exit" | "quit") {
                    eprintln!("  Goodbye!");
                    break;
                }

                let Some(input) = line.strip_prefix('/') else {
                    cmd_ask(line, &mut state);
                    continue;
                };
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let mut parts = input.splitn(2, ' ');
                let cmd = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "tables" => cmd_tables(&state),
                    "schema" => cmd_schema(args, &state),
                    "history" => cmd_history(args, &state),
                    "sql" => match &state.last_sql {
                        Some(sql) => eprintln!("  {sql}"),
                        None => eprintln!("  No SQL yet. Ask a question first."),
                    },
                    "debug" => {
                        state.debug = !state.debug;
                        eprintln!("  Debug output {}", if state.debug { "on" } else { "off" });
                    }
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);
    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Anything else is answered as a question, e.g.");
    eprintln!("    How much did I spend on food last month?");
    eprintln!();
}

fn cmd_ask(question: &str, state: &mut ReplState) {
    let started = Instant::now();
    let answer = state.pipeline.ask(question);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let query_id = match state.logger.as_mut() {
        Some(logger) => match logger.log_answer(&answer, elapsed_ms) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not write query log");
                None
            }
        },
        None => None,
    };
    state.last_sql = answer.metadata.sql.clone();

    let info = DebugInfo {
        query_id: query_id.as_deref(),
        elapsed_ms,
        log_path: state.logger.as_ref().map(|l| l.path()),
    };
    println!();
    if let Err(e) = print_answer(&answer, state.json, state.debug.then_some(&info)) {
        eprintln!("  Error: {e}");
    }
    println!();
}

fn cmd_tables(state: &ReplState) {
    let executor = state.pipeline.executor();
    match (executor.list_tables(), executor.list_views()) {
        (Ok(tables), Ok(views)) => {
            eprintln!();
            eprintln!("  Tables: {}", tables.join(", "));
            eprintln!("  Views:  {}", views.join(", "));
            eprintln!();
        }
        (Err(e), _) | (_, Err(e)) => eprintln!("  Cannot list tables: {e}"),
    }
}

fn cmd_schema(args: &str, state: &ReplState) {
    let Some(table) = args.split_whitespace().next() else {
        eprintln!("  Usage: /schema <table>");
        return;
    };
    match state.pipeline.executor().table_schema(table) {
        Ok(columns) => {
            if let Err(e) = print_schema(table, &columns, state.json) {
                eprintln!("  Error: {e}");
            }
        }
        Err(e) => eprintln!("  Cannot read schema: {e}"),
    }
}

fn cmd_history(args: &str, state: &ReplState) {
    let limit = args.parse().unwrap_or(10);
    let Some(logger) = &state.logger else {
        eprintln!("  Query log is disabled.");
        return;
    };
    match logger.recent(limit) {
        Ok(entries) => {
            if let Err(e) = print_history(&entries, state.json) {
                eprintln!("  Error: {e}");
            }
        }
        Err(e) => eprintln!("  Cannot read history: {e}"),
    }
}
