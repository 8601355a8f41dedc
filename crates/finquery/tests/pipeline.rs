use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use finquery::ingest::{build_database, clean_export, CleanOptions};
use finquery::{DbExecutor, IntentType, Pipeline, PipelineConfig, Stage, TableKind};

const EXPORT: &str = "\
Date,Account,Category,Tags,Expense amount,Income amount,Currency,In main currency,Main currency,Description
2025-06-03,Cash,Groceries,,\"12,000\",,CLP,\"12,000\",CLP,Lider
2025-06-10,Card,Travel,trip,\"80,000\",,CLP,\"80,000\",CLP,Flight
2025-06-17,Card,Groceries,,\"18,000\",,CLP,\"18,000\",CLP,Jumbo
2025-06-20,Card,Food & Drinks,dinner,\"25,000\",,CLP,\"25,000\",CLP,Sushi
2025-06-30,Bank,Salary,,,\"900,000\",CLP,\"900,000\",CLP,Acme
2025-07-02,Cash,Groceries,,\"15,000\",,CLP,\"15,000\",CLP,Lider
2025-07-05,Card,Food & Drinks,,\"10,000\",,CLP,\"10,000\",CLP,Pizza
2025-07-08,Card,Transportation,,\"5,000\",,CLP,\"5,000\",CLP,Uber
";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
}

fn build_db(dir: &Path) -> PathBuf {
    let csv = dir.join("Toshl_export_July_2025.csv");
    std::fs::write(&csv, EXPORT).unwrap();
    let records = clean_export(&csv, &CleanOptions::default()).unwrap();
    let db = dir.join("clean").join("finances.db");
    let summary = build_database(&records, &db).unwrap();
    assert_eq!(summary.expenses_inserted, 7);
    assert_eq!(summary.incomes_inserted, 1);
    db
}

fn pipeline(dir: &Path, charts: bool) -> Pipeline {
    let db = build_db(dir);
    let config = PipelineConfig {
        today: Some(today()),
        chart_dir: charts.then(|| dir.join("charts")),
        ..Default::default()
    };
    Pipeline::new(DbExecutor::open(&db).unwrap(), config)
}

#[test]
fn test_spending_by_category_with_chart() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), true);

    let outcome = p.run("Show me my spending by category last month");
    let md = &outcome.answer.markdown;
    assert!(outcome.state.failure.is_none(), "{md}");
    assert!(md.starts_with("## Spending by Category"));
    assert!(md.contains("**Total Spending:** $135,000 CLP"));
    assert!(md.contains("1. **Travel**: $80,000 CLP"));
    assert!(md.contains("> Data from Jun 01-30, 2025."));

    let chart = outcome.answer.chart_path.clone().expect("chart written");
    assert!(chart.exists());
    assert_eq!(chart.extension().and_then(|e| e.to_str()), Some("svg"));
    assert!(md.contains("![Chart]("));

    let stages: Vec<&str> = outcome
        .answer
        .metadata
        .stages
        .iter()
        .map(|s| s.stage.as_str())
        .collect();
    assert_eq!(
        stages,
        vec![
            "parse_intent",
            "resolve_categories",
            "plan_sql",
            "execute_query",
            "generate_chart",
            "synthesize_answer"
        ]
    );
    assert!(outcome.answer.metadata.sql.is_some());
    assert_eq!(outcome.answer.metadata.params.len(), 2);
    assert_eq!(outcome.answer.metadata.result_count, 3);
}

#[test]
fn test_misspelled_category_is_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("How much did I spend on grocries in June 2025?");
    let query = outcome.state.query.as_ref().unwrap();
    assert_eq!(query.categories, vec!["Groceries"]);
    assert!(outcome.answer.markdown.contains("**Total Spending:** $30,000 CLP"));
    assert!(outcome.answer.chart_path.is_none());
}

#[test]
fn test_unknown_category_is_dropped_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("How much did I spend on unicorns last month");
    assert!(outcome.state.query.as_ref().unwrap().categories.is_empty());
    assert!(outcome
        .state
        .warnings
        .contains(&"Unknown category 'unicorns' ignored".to_string()));
    assert!(outcome.answer.markdown.contains("$135,000 CLP"));
    assert!(outcome.answer.markdown.contains("> **Note:** Unknown category 'unicorns' ignored"));
}

#[test]
fn test_comparison_this_month_to_last_month() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("Compare my spending this month to last month");
    let query = outcome.state.query.as_ref().unwrap();
    assert_eq!(query.intent, IntentType::Comparison);
    let md = &outcome.answer.markdown;
    assert!(md.starts_with("## Comparison"), "{md}");
    assert!(md.contains("**Current Period** (Jul 01-15, 2025): $30,000 CLP"));
    assert!(md.contains("**Previous Period** (Jun 01-30, 2025): $135,000 CLP"));
    assert!(md.contains("**Change (down):** $105,000 CLP (-77.8%)"));
}

#[test]
fn test_top_items() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("Top 2 expenses in June 2025");
    let md = &outcome.answer.markdown;
    assert!(md.starts_with("## Top 2 Items"), "{md}");
    assert!(md.contains("1. **Flight**: $80,000 CLP (76.2%)"));
    assert!(md.contains("2. **Sushi**: $25,000 CLP"));
}

#[test]
fn test_income_questions_use_incomes_table() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("What was my income last month");
    assert_eq!(outcome.state.query.as_ref().unwrap().table, TableKind::Incomes);
    assert!(outcome.answer.markdown.starts_with("## Income Over Time"));
    assert!(outcome.answer.markdown.contains("**Total Income:** $900,000 CLP"));
}

#[test]
fn test_zero_rows_retry_once_then_broaden() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    // Nothing in Jul 06-15, the broadened Jun 26-Jul 15 holds the pizza.
    let outcome = p.run("How much did I spend on food in the last 10 days");
    assert_eq!(outcome.state.retries, 1);
    assert!(outcome.state.failure.is_none());
    assert!(outcome.answer.markdown.contains("$10,000 CLP"));
    assert!(outcome.state.warnings.iter().any(|w| w.contains("broadened")));
}

#[test]
fn test_comparison_retry_moves_previous_period() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    // August is still empty, so the retry widens it back into July.
    let outcome = p.run("Compare August 2025 vs July 2025 by expense category");
    assert_eq!(outcome.state.retries, 1);
    let query = outcome.state.query.as_ref().unwrap();
    assert_eq!(query.intent, IntentType::Comparison);
    let (start, _) = query.time_range.as_ref().unwrap().bounds().unwrap();
    let (_, prev_end) = query.comparison.as_ref().unwrap().bounds().unwrap();
    assert!(prev_end < start, "{prev_end} overlaps {start}");
    assert!(outcome
        .state
        .suggestions
        .iter()
        .all(|s| !s.contains("broader range")));
}

#[test]
fn test_huge_relative_range_still_answers() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("How much did I spend in the last 4000000000 days");
    let query = outcome.state.query.as_ref().unwrap();
    assert_eq!(query.time_range.as_ref().unwrap().label.as_deref(), Some("last_30_days"));
    assert!(outcome.state.failure.is_none(), "{}", outcome.answer.markdown);
    assert!(!outcome.answer.is_error());
}

#[test]
fn test_zero_rows_after_retry_gives_suggestions() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("How much did I spend on travel last week");
    assert_eq!(outcome.state.retries, 1);
    assert!(outcome.state.failure.is_some());
    let md = &outcome.answer.markdown;
    assert!(md.starts_with("## No Results Found"), "{md}");
    assert!(md.contains("No data found for the period: Jul 02-15, 2025."));
    assert!(md.contains("Try removing the category filter (Travel)"));
    assert!(!md.contains("Trying a broader range"), "{md}");
    assert!(outcome
        .state
        .suggestions
        .iter()
        .all(|s| !s.starts_with("No results found")));
    assert!(!outcome.answer.is_error());
    assert!(outcome
        .answer
        .metadata
        .stages
        .iter()
        .any(|s| s.stage == Stage::Guardrail.as_str()));
}

#[test]
fn test_injection_is_refused_and_data_survives() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("show my expenses; drop table expenses");
    assert!(outcome.answer.is_error());
    assert_eq!(outcome.state.failure.unwrap().stage, Stage::ParseIntent);
    assert!(outcome.state.plan.is_none());

    let after = p.run("Show me my spending by category last month");
    assert!(after.state.failure.is_none());
}

#[test]
fn test_breakdown_by_tag_uses_generic_table() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), false);

    let outcome = p.run("Spending breakdown by tag last month");
    let md = &outcome.answer.markdown;
    assert!(md.starts_with("## Query Results"), "{md}");
    assert!(md.contains("| tags |"));
}
