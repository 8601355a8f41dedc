//! Printing answers and catalog information.

use std::path::Path;

use anyhow::Result;
use finquery::executor::ColumnInfo;
use finquery::{Answer, DatasetMeta};

use crate::logger::QueryLogEntry;

/// Details shown with `--debug`.
pub struct DebugInfo<'a> {
    pub query_id: Option<&'a str>,
    pub elapsed_ms: u64,
    pub log_path: Option<&'a Path>,
}

/// Answer on stdout, debug details on stderr.
pub fn print_answer(answer: &Answer, json: bool, debug: Option<&DebugInfo<'_>>) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
    } else {
        println!("{}", answer.markdown);
    }

    if let Some(info) = debug {
        eprintln!();
        eprintln!("  Debug:");
        if let Some(id) = info.query_id {
            eprintln!("    Query ID:       {id}");
        }
        eprintln!("    Execution time: {}ms", info.elapsed_ms);
        if let Some(sql) = &answer.metadata.sql {
            eprintln!("    SQL:            {sql}");
        }
        if !answer.metadata.params.is_empty() {
            let params: Vec<String> = answer
                .metadata
                .params
                .iter()
                .map(|(k, v)| format!(":{k}={v}"))
                .collect();
            eprintln!("    Params:         {}", params.join(", "));
        }
        for stage in &answer.metadata.stages {
            eprintln!("    {:<22}{}ms", stage.stage, stage.elapsed_ms);
        }
        if let Some(chart) = &answer.chart_path {
            eprintln!("    Chart saved to: {}", chart.display());
        }
        if let Some(path) = info.log_path {
            eprintln!("    Log file:       {}", path.display());
        }
        eprintln!();
    }
    Ok(())
}

pub fn print_names(title: &str, names: &[String]) {
    println!("{title}:");
    for name in names {
        println!("  {name}");
    }
}

pub fn print_schema(table: &str, columns: &[ColumnInfo], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(columns)?);
        return Ok(());
    }
    println!("{table}:");
    for c in columns {
        let mut flags = Vec::new();
        if c.primary_key {
            flags.push("primary key");
        }
        if c.not_null {
            flags.push("not null");
        }
        println!("  {:<16} {:<8} {}", c.name, c.data_type, flags.join(", "));
    }
    Ok(())
}

pub fn print_status(db: &Path, meta: Option<&DatasetMeta>, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "database": db.display().to_string(),
                "meta": meta,
            }))?
        );
        return Ok(());
    }
    println!("Database: {}", db.display());
    match meta {
        Some(m) => {
            let range = |min: &Option<String>, max: &Option<String>| match (min, max) {
                (Some(a), Some(b)) => format!("{a} to {b}"),
                _ => "no data".to_string(),
            };
            println!(
                "  Expenses: {} rows ({})",
                m.expenses_row_count,
                range(&m.expenses_min_date, &m.expenses_max_date)
            );
            println!(
                "  Incomes:  {} rows ({})",
                m.incomes_row_count,
                range(&m.incomes_min_date, &m.incomes_max_date)
            );
        }
        None => println!("  No meta view found. Run `finquery ingest` first."),
    }
    Ok(())
}

pub fn print_history(entries: &[QueryLogEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No queries logged yet.");
        return Ok(());
    }
    for e in entries {
        let status = if e.error.is_some() { "error" } else { "ok" };
        println!(
            "{}  {}  [{status}] {} ({} rows, {}ms)",
            e.timestamp, e.query_id, e.query, e.result_count, e.execution_time_ms
        );
    }
    Ok(())
}
