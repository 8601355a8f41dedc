//! finquery command-line interface: settings, query log, REPL and printing.

pub mod config;
pub mod logger;
pub mod output;
pub mod repl;

pub use config::{resolve_db_path, Overrides, Settings};
pub use logger::{QueryLogEntry, QueryLogger};
