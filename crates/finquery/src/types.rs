//! Core data types that flow through the query pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// What kind of question the user asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    SpendingByCategory,
    SpendingOverTime,
    TopItems,
    Comparison,
    Breakdown,
    Unknown,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::SpendingByCategory => "spending_by_category",
            IntentType::SpendingOverTime => "spending_over_time",
            IntentType::TopItems => "top_items",
            IntentType::Comparison => "comparison",
            IntentType::Breakdown => "breakdown",
            IntentType::Unknown => "unknown",
        }
    }
}

/// Bucket size for time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGranularity::Day => "day",
            TimeGranularity::Week => "week",
            TimeGranularity::Month => "month",
            TimeGranularity::Quarter => "quarter",
            TimeGranularity::Year => "year",
        }
    }
}

/// Tables and views of the finance database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Expenses,
    Incomes,
    ExpensesMonthly,
    IncomesMonthly,
    Meta,
}

impl TableKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            TableKind::Expenses => "expenses",
            TableKind::Incomes => "incomes",
            TableKind::ExpensesMonthly => "v_expenses_monthly",
            TableKind::IncomesMonthly => "v_incomes_monthly",
            TableKind::Meta => "meta",
        }
    }

    pub fn is_income(&self) -> bool {
        matches!(self, TableKind::Incomes | TableKind::IncomesMonthly)
    }
}

/// An inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Stable label such as `last_month` or `june_2025`.
    pub label: Option<String>,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate, label: impl Into<String>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            label: Some(label.into()),
        }
    }

    /// Both bounds, if set.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }

    /// Number of days covered, counting both ends.
    pub fn days(&self) -> Option<i64> {
        self.bounds().map(|(s, e)| (e - s).num_days() + 1)
    }
}

/// An aggregate computed over the amount column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TotalSpend,
    AvgSpend,
    TransactionCount,
    MaxSpend,
    MinSpend,
}

impl Metric {
    /// Output column name.
    pub fn alias(&self) -> &'static str {
        match self {
            Metric::TotalSpend => "total",
            Metric::AvgSpend => "average",
            Metric::TransactionCount => "transaction_count",
            Metric::MaxSpend => "max_amount",
            Metric::MinSpend => "min_amount",
        }
    }

    /// Select-list expression over `amount_column`.
    pub fn select_expr(&self, amount_column: &str) -> String {
        let alias = self.alias();
        match self {
            Metric::TotalSpend => format!("SUM({amount_column}) AS {alias}"),
            Metric::AvgSpend => format!("AVG({amount_column}) AS {alias}"),
            Metric::TransactionCount => format!("COUNT(*) AS {alias}"),
            Metric::MaxSpend => format!("MAX({amount_column}) AS {alias}"),
            Metric::MinSpend => format!("MIN({amount_column}) AS {alias}"),
        }
    }
}

// SQLite's strftime has no month-name directive.
const MONTH_NAME_EXPR: &str = "CASE strftime('%m', date) \
    WHEN '01' THEN 'January' WHEN '02' THEN 'February' WHEN '03' THEN 'March' \
    WHEN '04' THEN 'April' WHEN '05' THEN 'May' WHEN '06' THEN 'June' \
    WHEN '07' THEN 'July' WHEN '08' THEN 'August' WHEN '09' THEN 'September' \
    WHEN '10' THEN 'October' WHEN '11' THEN 'November' ELSE 'December' END";

/// A column the result can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Category,
    Tags,
    /// Stored weekday name.
    Day,
    DayOfWeek,
    Month,
    MonthName,
    Year,
    Date,
    Description,
}

impl Dimension {
    /// Group-by expression.
    pub fn expr(&self) -> &'static str {
        match self {
            Dimension::Category => "category",
            Dimension::Tags => "tags",
            Dimension::Day => "day",
            Dimension::DayOfWeek => "strftime('%w', date)",
            Dimension::Month => "strftime('%Y-%m', date)",
            Dimension::MonthName => MONTH_NAME_EXPR,
            Dimension::Year => "strftime('%Y', date)",
            Dimension::Date => "date(date)",
            Dimension::Description => "description",
        }
    }

    /// Output column name.
    pub fn alias(&self) -> &'static str {
        match self {
            Dimension::Category => "category",
            Dimension::Tags => "tags",
            Dimension::Day => "day",
            Dimension::DayOfWeek => "day_of_week",
            Dimension::Month => "month",
            Dimension::MonthName => "month_name",
            Dimension::Year => "year",
            Dimension::Date => "date",
            Dimension::Description => "description",
        }
    }

    pub fn select_expr(&self) -> String {
        if self.expr() == self.alias() {
            self.expr().to_string()
        } else {
            format!("{} AS {}", self.expr(), self.alias())
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            Dimension::Day
                | Dimension::DayOfWeek
                | Dimension::Month
                | Dimension::MonthName
                | Dimension::Year
                | Dimension::Date
        )
    }
}

/// A parsed natural-language question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQuery {
    pub text: String,
    pub intent: IntentType,
    pub table: TableKind,
    pub time_range: Option<TimeRange>,
    pub granularity: Option<TimeGranularity>,
    /// Raw category terms until resolution replaces them with canonical names.
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub metrics: Vec<Metric>,
    pub dimensions: Vec<Dimension>,
    pub limit: Option<usize>,
    /// Period the current range is compared against.
    pub comparison: Option<TimeRange>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

impl UserQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            intent: IntentType::Unknown,
            table: TableKind::Expenses,
            time_range: None,
            granularity: None,
            categories: Vec::new(),
            tags: Vec::new(),
            metrics: vec![Metric::TotalSpend],
            dimensions: Vec::new(),
            limit: None,
            comparison: None,
            min_amount: None,
            max_amount: None,
        }
    }

    pub fn has_dimension(&self, dim: Dimension) -> bool {
        self.dimensions.contains(&dim)
    }
}

/// A value bound to a named SQL parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            ParamValue::Integer(v) => v.to_sql(),
            ParamValue::Real(v) => v.to_sql(),
            ParamValue::Text(v) => v.to_sql(),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Real(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "'{v}'"),
        }
    }
}

/// Which SQL shape a plan was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTemplate {
    SpendingOverTime,
    SpendingByCategory,
    TopItems,
    Comparison,
    Generic,
}

/// A parameterized, read-only SQL statement ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlPlan {
    pub query: String,
    /// Parameter values keyed by name, without the leading `:`.
    pub params: BTreeMap<String, ParamValue>,
    pub tables: Vec<TableKind>,
    pub template: PlanTemplate,
}

impl SqlPlan {
    /// Named placeholders (`:name`) that appear in the statement.
    pub fn placeholders(&self) -> BTreeSet<String> {
        placeholders(&self.query)
    }
}

/// Collect `:name` placeholders from a SQL string, ignoring quoted literals.
pub fn placeholders(sql: &str) -> BTreeSet<String> {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let literal = LITERAL.get_or_init(|| Regex::new(r"'[^']*'").expect("literal regex is valid"));
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("placeholder regex is valid")
    });

    let stripped = literal.replace_all(sql, "''");
    placeholder
        .captures_iter(&stripped)
        .map(|c| c[1].to_string())
        .collect()
}

/// A single cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Integer(v) => serde_json::json!(v),
            Value::Float(v) => serde_json::json!(v),
            Value::Text(v) => serde_json::json!(v),
            Value::Null => serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v:.2}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Null => Ok(()),
        }
    }
}

/// Rows returned by a query, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub sql: Option<String>,
}

impl ResultFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            sql: None,
        }
    }

    pub fn rowcount(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn numeric(&self, row: usize, column: &str) -> Option<f64> {
        self.value(row, column).and_then(Value::as_f64)
    }

    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        match self.column_index(column) {
            Some(idx) => self.rows.iter().filter_map(|r| r.get(idx)).collect(),
            None => Vec::new(),
        }
    }

    /// True when every non-null cell is numeric and at least one is present.
    pub fn is_numeric_column(&self, column: &str) -> bool {
        let values = self.column_values(column);
        let mut seen = false;
        for v in values {
            match v {
                Value::Null => {}
                Value::Integer(_) | Value::Float(_) => seen = true,
                Value::Text(_) => return false,
            }
        }
        seen
    }

    /// Sum of the numeric cells in a column.
    pub fn sum(&self, column: &str) -> f64 {
        self.column_values(column)
            .iter()
            .filter_map(|v| v.as_f64())
            .sum()
    }

    /// GitHub-flavoured Markdown table of the first `max_rows` rows.
    pub fn to_markdown(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        out.push_str("| ");
        out.push_str(&self.columns.join(" | "));
        out.push_str(" |\n|");
        for _ in &self.columns {
            out.push_str(" --- |");
        }
        out.push('\n');
        for row in self.rows.iter().take(max_rows) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str("| ");
            out.push_str(&cells.join(" | "));
            out.push_str(" |\n");
        }
        if self.rows.len() > max_rows {
            out.push_str(&format!(
                "\n_… and {} more rows_\n",
                self.rows.len() - max_rows
            ));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "columns": self.columns,
            "rows": self.sample(self.rows.len()),
            "rowcount": self.rowcount(),
        })
    }

    /// The first `n` rows as JSON objects keyed by column.
    pub fn sample(&self, n: usize) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(Value::to_json))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

/// Supported chart kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
    Scatter,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Area => "area",
            ChartType::Scatter => "scatter",
        }
    }
}

/// How to draw a result frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub x_axis: String,
    pub y_axis: String,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub width: u32,
    pub height: u32,
    pub color_scheme: String,
}

/// Kind of artifact attached to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Chart,
    Table,
}

/// A chart or table produced alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: Option<PathBuf>,
    pub title: String,
    pub description: String,
}

/// Wall-clock time spent in one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

/// Everything known about how an answer was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub query: String,
    pub intent: Option<UserQuery>,
    pub sql: Option<String>,
    pub params: BTreeMap<String, ParamValue>,
    pub result_count: usize,
    pub result_sample: Vec<serde_json::Value>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub stages: Vec<StageTiming>,
    pub error: Option<String>,
}

/// Final answer presented to the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub markdown: String,
    pub chart_path: Option<PathBuf>,
    pub artifacts: Vec<Artifact>,
    pub metadata: AnswerMetadata,
}

impl Answer {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.metadata.error.is_some()
    }
}

/// Errors that can occur in the finquery library.
#[derive(thiserror::Error, Debug)]
pub enum FinError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database not found: {}", .0.display())]
    DatabaseNotFound(PathBuf),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Query contains unsafe operations: {0}")]
    UnsafeQuery(String),

    #[error("Could not understand the question: {0}")]
    Intent(String),

    #[error("Could not plan the query: {0}")]
    Plan(String),

    #[error("Chart error: {0}")]
    Chart(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type.
pub type FinResult<T> = Result<T, FinError>;
