//! Answer synthesizer: turns results into Markdown.

use std::path::Path;

use chrono::{Datelike, NaiveDate};

use crate::types::{
    Answer, AnswerMetadata, Artifact, ArtifactKind, IntentType, ResultFrame, UserQuery, Value,
};

/// Rows kept in the answer's result sample.
pub const SAMPLE_ROWS: usize = 10;
const TABLE_FALLBACK_ROWS: usize = 10;
const PREVIEW_ROWS: usize = 5;
const PREVIEW_COLUMNS: usize = 5;
const PREVIEW_CELL_WIDTH: usize = 30;

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `1234567.891` with `decimals = 2` gives `1,234,567.89`.
fn with_separators(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac) = match formatted.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (formatted.clone(), None),
    };
    let sign = if value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    match frac {
        Some(f) => format!("{sign}{}.{f}", group_thousands(&int_part)),
        None => format!("{sign}{}", group_thousands(&int_part)),
    }
}

fn month_day(d: NaiveDate) -> String {
    d.format("%b %d").to_string()
}

fn full(d: NaiveDate) -> String {
    d.format("%b %d, %Y").to_string()
}

fn truncate_cell(text: &str) -> String {
    text.chars().take(PREVIEW_CELL_WIDTH).collect()
}

/// Formats results into human-readable answers.
#[derive(Debug, Clone)]
pub struct AnswerSynthesizer {
    currency: String,
}

impl Default for AnswerSynthesizer {
    fn default() -> Self {
        Self::new("CLP")
    }
}

impl AnswerSynthesizer {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into().to_uppercase(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn format_currency(&self, amount: f64) -> String {
        match self.currency.as_str() {
            "USD" => format!("${}", with_separators(amount, 2)),
            "EUR" => format!("€{}", with_separators(amount, 2)),
            other => format!("${} {other}", with_separators(amount.round(), 0)),
        }
    }

    pub fn format_number(&self, number: f64) -> String {
        let a = number.abs();
        if number == 0.0 {
            "0".to_string()
        } else if a < 0.01 {
            format!("{number:.4}")
        } else if a < 1.0 {
            format!("{number:.3}")
        } else if a < 10.0 {
            format!("{number:.2}")
        } else {
            with_separators(number.round(), 0)
        }
    }

    pub fn format_percentage(&self, value: f64) -> String {
        format!("{value:+.1}%")
    }

    pub fn format_date_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> String {
        match (start, end) {
            (Some(s), Some(e)) if s.year() == e.year() && s.month() == e.month() => {
                format!("{}-{}", month_day(s), e.format("%d, %Y"))
            }
            (Some(s), Some(e)) if s.year() == e.year() => {
                format!("{}-{}", month_day(s), full(e))
            }
            (Some(s), Some(e)) => format!("{} to {}", full(s), full(e)),
            (Some(s), None) => format!("since {}", full(s)),
            (None, Some(e)) => format!("until {}", full(e)),
            (None, None) => "the specified period".to_string(),
        }
    }

    fn format_metric(&self, column: &str, value: f64) -> String {
        if column == "transaction_count" {
            self.format_number(value)
        } else {
            self.format_currency(value)
        }
    }

    fn subject(query: &UserQuery) -> &'static str {
        if query.table.is_income() {
            "Income"
        } else {
            "Spending"
        }
    }

    /// Describe a result. Empty frames give the no-results answer.
    pub fn synthesize(
        &self,
        query: &UserQuery,
        frame: &ResultFrame,
        chart_path: Option<&Path>,
        warnings: &[String],
    ) -> Answer {
        self.compose(query, frame, chart_path, warnings, false)
    }

    /// Like [`synthesize`](Self::synthesize), with the result table appended
    /// because no chart could be drawn.
    pub fn synthesize_with_table(
        &self,
        query: &UserQuery,
        frame: &ResultFrame,
        warnings: &[String],
    ) -> Answer {
        self.compose(query, frame, None, warnings, true)
    }

    fn compose(
        &self,
        query: &UserQuery,
        frame: &ResultFrame,
        chart_path: Option<&Path>,
        warnings: &[String],
        include_table: bool,
    ) -> Answer {
        if frame.is_empty() {
            return self.no_results(query, &[]);
        }

        let mut parts = match query.intent {
            IntentType::SpendingByCategory => self.by_category(query, frame),
            IntentType::SpendingOverTime => self.over_time(query, frame),
            IntentType::TopItems => self.top_items(query, frame),
            IntentType::Comparison => self.comparison(query, frame),
            IntentType::Breakdown | IntentType::Unknown => self.generic(frame),
        };

        let mut artifacts = Vec::new();
        if include_table {
            parts.push(self.table_fallback(frame));
            artifacts.push(Artifact {
                kind: ArtifactKind::Table,
                path: None,
                title: "Results table".into(),
                description: format!("{} rows", frame.rowcount()),
            });
        }
        if let Some(path) = chart_path {
            parts.push(format!("![Chart]({})", path.display()));
            artifacts.push(Artifact {
                kind: ArtifactKind::Chart,
                path: Some(path.to_path_buf()),
                title: format!("{} chart", Self::subject(query)),
                description: path.display().to_string(),
            });
        }
        parts.push(self.caveats(query, warnings));

        Answer {
            markdown: parts.join("\n\n"),
            chart_path: chart_path.map(Path::to_path_buf),
            artifacts,
            metadata: AnswerMetadata {
                query: query.text.clone(),
                intent: Some(query.clone()),
                sql: frame.sql.clone(),
                result_count: frame.rowcount(),
                result_sample: frame.sample(SAMPLE_ROWS),
                warnings: warnings.to_vec(),
                ..Default::default()
            },
        }
    }

    fn caveats(&self, query: &UserQuery, warnings: &[String]) -> String {
        let (start, end) = query
            .time_range
            .as_ref()
            .map(|r| (r.start, r.end))
            .unwrap_or((None, None));
        let mut lines = vec![
            format!(
                "> Assumes currency = {} unless otherwise specified.",
                self.currency
            ),
            format!("> Data from {}.", self.format_date_range(start, end)),
        ];
        if !warnings.is_empty() {
            lines.push(format!("> **Note:** {}", warnings.join("; ")));
        }
        lines.join("\n")
    }

    /// The first rows of `frame` as a Markdown section.
    pub fn table_fallback(&self, frame: &ResultFrame) -> String {
        format!("### Results\n\n{}", frame.to_markdown(TABLE_FALLBACK_ROWS).trim_end())
    }

    fn label_column(frame: &ResultFrame) -> Option<&str> {
        frame
            .columns
            .iter()
            .find(|c| !frame.is_numeric_column(c))
            .map(String::as_str)
    }

    fn by_category(&self, query: &UserQuery, frame: &ResultFrame) -> Vec<String> {
        let subject = Self::subject(query);
        let total = frame.sum("total");
        let label = frame
            .column_index("category")
            .map(|_| "category")
            .or_else(|| Self::label_column(frame))
            .unwrap_or("category");

        let mut lines = vec!["### Top Categories".to_string()];
        for i in 0..frame.rowcount().min(5) {
            let name = frame
                .value(i, label)
                .map(Value::to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Uncategorized".into());
            let amount = frame.numeric(i, "total").unwrap_or(0.0);
            let share = if total > 0.0 { amount / total * 100.0 } else { 0.0 };
            lines.push(format!(
                "{}. **{name}**: {} ({share:.1}%)",
                i + 1,
                self.format_currency(amount)
            ));
        }

        vec![
            format!("## {subject} by Category"),
            format!("**Total {subject}:** {}", self.format_currency(total)),
            lines.join("\n"),
        ]
    }

    fn over_time(&self, query: &UserQuery, frame: &ResultFrame) -> Vec<String> {
        let subject = Self::subject(query);
        let mut parts = vec![format!("## {subject} Over Time")];

        if frame.column_index("total").is_some() {
            let amounts: Vec<f64> = (0..frame.rowcount())
                .map(|i| frame.numeric(i, "total").unwrap_or(0.0))
                .collect();
            let total: f64 = amounts.iter().sum();
            let average = total / amounts.len() as f64;
            let mut lines = vec![
                format!("**Total {subject}:** {}", self.format_currency(total)),
                format!("**Average per Period:** {}", self.format_currency(average)),
                format!("**Number of Periods:** {}", amounts.len()),
            ];
            if amounts.len() > 1 {
                let first = amounts[0];
                let last = amounts[amounts.len() - 1];
                if first > 0.0 {
                    let change = (last - first) / first * 100.0;
                    let arrow = if change > 0.0 {
                        "▲"
                    } else if change < 0.0 {
                        "▼"
                    } else {
                        "="
                    };
                    lines.push(format!(
                        "**Trend:** {arrow} {:.1}% ({} → {})",
                        change.abs(),
                        self.format_currency(first),
                        self.format_currency(last)
                    ));
                }
            }
            parts.push(lines.join("\n"));
        }

        let metrics: Vec<&String> = frame
            .columns
            .iter()
            .filter(|c| c.as_str() != "time_period" && c.as_str() != "total")
            .filter(|c| frame.is_numeric_column(c))
            .collect();
        for column in metrics {
            let mut lines = vec![format!("**{}** by period:", crate::chart::title_case(column))];
            for i in 0..frame.rowcount() {
                let period = frame
                    .value(i, "time_period")
                    .map(Value::to_string)
                    .unwrap_or_default();
                let value = frame.numeric(i, column).unwrap_or(0.0);
                lines.push(format!("- {period}: {}", self.format_metric(column, value)));
            }
            parts.push(lines.join("\n"));
        }
        parts
    }

    fn top_items(&self, query: &UserQuery, frame: &ResultFrame) -> Vec<String> {
        let limit = query.limit.unwrap_or(crate::intent::DEFAULT_TOP_LIMIT);
        let shown = limit.min(frame.rowcount());
        let total = frame.sum("total");
        let label = Self::label_column(frame).unwrap_or("item");

        let mut lines = vec!["### Items".to_string()];
        for i in 0..shown {
            let name = frame
                .value(i, label)
                .map(Value::to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Unknown".into());
            let amount = frame.numeric(i, "total").unwrap_or(0.0);
            let share = if total > 0.0 { amount / total * 100.0 } else { 0.0 };
            lines.push(format!(
                "{}. **{name}**: {} ({share:.1}%)",
                i + 1,
                self.format_currency(amount)
            ));
        }

        vec![
            format!("## Top {shown} Items"),
            format!("**Total:** {}", self.format_currency(total)),
            lines.join("\n"),
        ]
    }

    fn comparison(&self, query: &UserQuery, frame: &ResultFrame) -> Vec<String> {
        let mut parts = vec!["## Comparison".to_string()];
        let period = |r: Option<&crate::types::TimeRange>| {
            r.map(|r| self.format_date_range(r.start, r.end))
                .unwrap_or_else(|| "the specified period".into())
        };
        let current_label = period(query.time_range.as_ref());
        let previous_label = period(query.comparison.as_ref());

        let grouped = frame.column_index("category").is_some();
        let (current, previous) = if grouped {
            (frame.sum("current_value"), frame.sum("previous_value"))
        } else {
            (
                frame.numeric(0, "current_value").unwrap_or(0.0),
                frame.numeric(0, "previous_value").unwrap_or(0.0),
            )
        };

        if previous == 0.0 {
            parts.push(format!(
                "**Current Period** ({current_label}): {}\n\nNo previous data available for comparison.",
                self.format_currency(current)
            ));
        } else {
            let difference = current - previous;
            let pct = difference / previous * 100.0;
            let direction = if difference > 0.0 {
                "up"
            } else if difference < 0.0 {
                "down"
            } else {
                "unchanged"
            };
            parts.push(
                [
                    format!(
                        "**Current Period** ({current_label}): {}",
                        self.format_currency(current)
                    ),
                    format!(
                        "**Previous Period** ({previous_label}): {}",
                        self.format_currency(previous)
                    ),
                    format!(
                        "**Change ({direction}):** {} ({})",
                        self.format_currency(difference.abs()),
                        self.format_percentage(pct)
                    ),
                ]
                .join("\n"),
            );
        }

        if grouped {
            let mut lines = vec!["### By Category".to_string()];
            for i in 0..frame.rowcount() {
                let name = frame
                    .value(i, "category")
                    .map(Value::to_string)
                    .unwrap_or_default();
                let cur = frame.numeric(i, "current_value").unwrap_or(0.0);
                let prev = frame.numeric(i, "previous_value").unwrap_or(0.0);
                let change = match frame.numeric(i, "pct_change") {
                    Some(p) => self.format_percentage(p),
                    None => "new".to_string(),
                };
                lines.push(format!(
                    "- **{name}**: {} vs {} ({change})",
                    self.format_currency(cur),
                    self.format_currency(prev)
                ));
            }
            parts.push(lines.join("\n"));
        }
        parts
    }

    fn generic(&self, frame: &ResultFrame) -> Vec<String> {
        let columns: Vec<&String> = frame
            .columns
            .iter()
            .filter(|c| !c.starts_with('_'))
            .take(PREVIEW_COLUMNS)
            .collect();
        let mut table = vec![
            format!(
                "| {} |",
                columns.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(" | ")
            ),
            format!("|{}|", vec!["---"; columns.len()].join("|")),
        ];
        for i in 0..frame.rowcount().min(PREVIEW_ROWS) {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| {
                    frame
                        .value(i, c)
                        .map(|v| truncate_cell(&v.to_string()))
                        .unwrap_or_default()
                })
                .collect();
            table.push(format!("| {} |", cells.join(" | ")));
        }

        let mut parts = vec![
            "## Query Results".to_string(),
            format!("Found {} results:", frame.rowcount()),
            table.join("\n"),
        ];
        if frame.rowcount() > PREVIEW_ROWS {
            parts.push(format!("... and {} more rows", frame.rowcount() - PREVIEW_ROWS));
        }
        parts
    }

    /// Answer for a query that matched nothing.
    pub fn no_results(&self, query: &UserQuery, suggestions: &[String]) -> Answer {
        let mut lines = vec!["## No Results Found".to_string(), String::new()];
        match query.time_range.as_ref().and_then(|r| r.bounds()) {
            Some((s, e)) => lines.push(format!(
                "No data found for the period: {}.",
                self.format_date_range(Some(s), Some(e))
            )),
            None => lines.push("No matching data found.".to_string()),
        }

        if suggestions.is_empty() {
            lines.extend(
                [
                    "",
                    "### Try these suggestions:",
                    "- Broaden your time range",
                    "- Check your spelling or try different keywords",
                    "- Include refunds or other categories if applicable",
                ]
                .map(String::from),
            );
        } else {
            lines.push(String::new());
            lines.push("**Suggestions:**".to_string());
            lines.extend(suggestions.iter().map(|s| format!("- {s}")));
        }

        Answer {
            markdown: lines.join("\n"),
            metadata: AnswerMetadata {
                query: query.text.clone(),
                intent: Some(query.clone()),
                suggestions: suggestions.to_vec(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Answer explaining a failure.
    pub fn error(&self, query_text: &str, message: &str) -> Answer {
        let lower = message.to_lowercase();
        let markdown = if lower.contains("syntax error") {
            format!(
                "## Invalid Query Syntax\n\nI couldn't process your query due to a syntax error: `{message}`"
            )
        } else if lower.contains("no such table") {
            "## Data Unavailable\n\nThe requested data is not available in the current dataset."
                .to_string()
        } else if lower.contains("ambiguous") || lower.contains("understand") {
            format!("## Ambiguous Request\n\n{message}\n\nPlease provide more specific details.")
        } else {
            format!("## Error Processing Request\n\n{message}")
        };

        Answer {
            markdown,
            metadata: AnswerMetadata {
                query: query_text.to_string(),
                error: Some(message.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
