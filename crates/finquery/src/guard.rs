//! Input validation, read-only SQL checks and recovery helpers.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::time::{days_before, previous_period};
use crate::types::{FinError, FinResult, TimeRange, UserQuery};

const RESERVED_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "from", "where", "group", "by", "order", "having",
    "join", "inner", "outer", "left", "right", "as", "and", "or", "not", "in", "like", "between",
    "is", "null", "true", "false",
];

const BLOCKED_OPERATIONS: &[&str] = &[
    "drop", "alter", "delete", "insert", "update", "replace", "create", "attach", "detach",
    "vacuum", "pragma", "reindex",
];

/// Accept a bare SQL identifier or explain why it is unsafe to interpolate.
pub fn sanitize_identifier(identifier: &str) -> FinResult<&str> {
    let mut chars = identifier.chars();
    let Some(first) = chars.next() else {
        return Err(FinError::InvalidIdentifier(
            "identifier must be a non-empty string".into(),
        ));
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(FinError::InvalidIdentifier(format!(
            "{identifier}: must start with a letter or underscore"
        )));
    }
    if !identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(FinError::InvalidIdentifier(format!(
            "{identifier}: only letters, digits and underscores are allowed"
        )));
    }
    if RESERVED_KEYWORDS.contains(&identifier.to_lowercase().as_str()) {
        return Err(FinError::InvalidIdentifier(format!(
            "{identifier}: reserved SQL keyword"
        )));
    }
    Ok(identifier)
}

fn injection_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // two statements' worth of keywords
            r"(?i)\b(?:union|select|insert|update|delete|drop|alter|create|truncate)\b.*\b(?:union|select|insert|update|delete|drop|alter|create|truncate)\b",
            r"(?i)\b(?:or\s+\d+\s*=\s*\d+|\d+\s*=\s*\d+\s+or)\b",
            r#"(?i)(?:'\s*or\s*['"][^'"]*['"])|(?:['"][^'"]*['"]\s*or\s*)"#,
            r"(?i)\b(?:exec\s*\(|execute\s+\w+\s+with\s+recompile\b)",
            r"(?i)\b(?:waitfor\s+delay\b|sleep\s*\(|benchmark\s*\()",
            r"(?i)\b(?:xp_cmdshell|sp_configure|sp_oacreate|sp_oamethod|sp_oagetproperty)\b",
            r"(?:--|#|/\*|\*/|;)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("injection regex is valid"))
        .collect()
    })
}

/// True when the text looks like an attempt to smuggle SQL.
pub fn detect_sql_injection(text: Option<&str>) -> bool {
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return false;
    };
    if injection_patterns().iter().any(|re| re.is_match(text)) {
        warn!(input = text, "potential SQL injection detected");
        return true;
    }
    false
}

/// Remove comments and string literals so keyword checks see only SQL.
fn strip_sql(sql: &str) -> String {
    static LINE: OnceLock<Regex> = OnceLock::new();
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    let line = LINE.get_or_init(|| Regex::new(r"--[^\n]*").expect("comment regex is valid"));
    let block = BLOCK.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("comment regex is valid"));
    let literal = LITERAL.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("literal regex is valid"));

    let s = block.replace_all(sql, " ");
    let s = line.replace_all(&s, " ");
    literal.replace_all(&s, "''").into_owned()
}

/// A single SELECT (or WITH ... SELECT) statement with no write operations.
pub fn is_read_only_sql(sql: &str) -> bool {
    let stripped = strip_sql(sql).to_lowercase();
    let body = stripped.trim().trim_end_matches(';').trim();
    if !(body.starts_with("select") || body.starts_with("with")) {
        return false;
    }
    if body.contains(';') {
        return false;
    }

    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"[a-z_]+").expect("word regex is valid"));
    !word
        .find_iter(body)
        .any(|m| BLOCKED_OPERATIONS.contains(&m.as_str()))
}

/// What to do after a query came back empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroResultPlan {
    /// A broadened query worth one more attempt.
    pub retry: Option<UserQuery>,
    /// Describes the broadened range when there is a retry.
    pub notice: Option<String>,
    pub suggestions: Vec<String>,
}

/// Broaden an empty query's time range and collect suggestions for the user.
///
/// The range doubles backwards from its end. A comparison period is moved so
/// it stays immediately before the broadened range.
pub fn handle_zero_results(query: &UserQuery) -> ZeroResultPlan {
    let mut suggestions = Vec::new();
    let retry = query
        .time_range
        .as_ref()
        .and_then(TimeRange::bounds)
        .and_then(|bounds| broaden(query, bounds));
    let notice = retry.as_ref().and_then(|q| q.time_range.as_ref()?.bounds()).map(|(start, end)| {
        format!(
            "No results found for the specified time period. Trying a broader range: {} to {}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )
    });

    if !query.categories.is_empty() {
        suggestions.push(format!(
            "Try removing the category filter ({}) or asking about a related category",
            query.categories.join(", ")
        ));
    }
    suggestions.push("Refunds and other categories may hold the transactions you are looking for".into());

    ZeroResultPlan {
        retry,
        notice,
        suggestions,
    }
}

fn broaden(query: &UserQuery, (start, end): (NaiveDate, NaiveDate)) -> Option<UserQuery> {
    let len = (end - start).num_days() + 1;
    let Some(new_start) = len.checked_mul(2).and_then(|n| days_before(end, n - 1)) else {
        warn!(%start, %end, "range cannot be broadened further");
        return None;
    };
    let range = TimeRange::new(new_start, end, "broadened");
    let mut broadened = query.clone();
    if query.comparison.is_some() {
        broadened.comparison = Some(previous_period(&range)?);
    }
    broadened.time_range = Some(range);
    Some(broadened)
}

/// An amount with the currency it is expressed in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MoneyAmount {
    pub amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_warning: Option<String>,
}

impl MoneyAmount {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            ..Default::default()
        }
    }
}

/// Convert amounts into `target` using `rates` (units of target per unit of currency).
pub fn normalize_currency(amounts: &mut [MoneyAmount], rates: &BTreeMap<String, f64>, target: &str) {
    if rates.is_empty() {
        return;
    }
    let target = target.to_uppercase();

    for item in amounts.iter_mut() {
        let currency = item.currency.to_uppercase();
        if currency == target {
            continue;
        }
        let Some(rate) = rates.get(&currency).copied() else {
            warn!(currency = %currency, "no exchange rate available");
            item.conversion_warning = Some(format!("No exchange rate for {currency}"));
            continue;
        };
        item.original_amount = Some(item.amount);
        item.original_currency = Some(currency);
        item.amount *= rate;
        item.currency = target.clone();
        item.exchange_rate = Some(rate);
    }
}

/// Parse `USD=950,EUR=1050` into a rate table.
pub fn parse_rates(spec: &str) -> FinResult<BTreeMap<String, f64>> {
    let mut rates = BTreeMap::new();
    for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (code, rate) = pair
            .split_once('=')
            .ok_or_else(|| FinError::InvalidInput(format!("bad rate entry: {pair}")))?;
        let rate: f64 = rate
            .trim()
            .parse()
            .map_err(|_| FinError::InvalidInput(format!("bad rate value: {pair}")))?;
        rates.insert(code.trim().to_uppercase(), rate);
    }
    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntentType;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("valid_identifier").unwrap(), "valid_identifier");
        assert_eq!(sanitize_identifier("col1").unwrap(), "col1");
        assert!(sanitize_identifier("invalid-identifier").is_err());
        assert!(sanitize_identifier("invalid.identifier").is_err());
        assert!(sanitize_identifier("1invalid").is_err());
        assert!(sanitize_identifier("").is_err());
        assert!(sanitize_identifier("SELECT * FROM users").is_err());
        assert!(sanitize_identifier("Select").is_err());
    }

    #[test]
    fn test_detect_sql_injection() {
        assert!(!detect_sql_injection(Some("SELECT * FROM users")));
        assert!(!detect_sql_injection(Some("show me transactions")));
        assert!(!detect_sql_injection(Some("How much did I spend on food last month?")));

        assert!(detect_sql_injection(Some("SELECT * FROM users; DROP TABLE users")));
        assert!(detect_sql_injection(Some("1' OR '1'='1")));
        assert!(detect_sql_injection(Some("admin'--")));
        assert!(detect_sql_injection(Some("1; SELECT * FROM users")));
        assert!(detect_sql_injection(Some("1; WAITFOR DELAY '0:0:10'--")));

        assert!(!detect_sql_injection(Some("")));
        assert!(!detect_sql_injection(None));
    }

    #[test]
    fn test_read_only_sql() {
        assert!(is_read_only_sql("SELECT category FROM expenses"));
        assert!(is_read_only_sql(
            "WITH c AS (SELECT 1 AS v) SELECT v FROM c"
        ));
        assert!(is_read_only_sql("select * from expenses where description = 'drop'"));
        assert!(is_read_only_sql("SELECT 1; "));

        assert!(!is_read_only_sql("DELETE FROM expenses"));
        assert!(!is_read_only_sql("SELECT 1; DROP TABLE expenses"));
        assert!(!is_read_only_sql("WITH x AS (SELECT 1) DELETE FROM expenses"));
        assert!(!is_read_only_sql("PRAGMA table_info(expenses)"));
        assert!(!is_read_only_sql("/* hi */ UPDATE expenses SET amount_clp = 0"));
    }

    #[test]
    fn test_handle_zero_results_broadens_range() {
        let mut q = UserQuery::new("food last month");
        q.time_range = Some(TimeRange::new(
            d(2025, 6, 1),
            d(2025, 6, 30),
            "last_month",
        ));
        let plan = handle_zero_results(&q);
        let notice = plan.notice.as_deref().unwrap();
        assert!(notice.ends_with("2025-05-02 to 2025-06-30"), "{notice}");
        assert!(plan.suggestions.iter().all(|s| !s.contains("broader range")));
        let retry = plan.retry.unwrap();
        let (s, e) = retry.time_range.unwrap().bounds().unwrap();
        assert_eq!(e, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        assert_eq!((e - s).num_days() + 1, 60);
    }

    #[test]
    fn test_zero_result_retry_keeps_comparison_before_range() {
        let mut q = UserQuery::new("compare august 2025 vs july 2025 by category");
        q.intent = IntentType::Comparison;
        q.time_range = Some(TimeRange::new(d(2025, 8, 1), d(2025, 8, 10), "august_2025"));
        q.comparison = Some(TimeRange::new(d(2025, 7, 1), d(2025, 7, 31), "july_2025"));

        let retry = handle_zero_results(&q).retry.unwrap();
        let (start, end) = retry.time_range.unwrap().bounds().unwrap();
        let (prev_start, prev_end) = retry.comparison.unwrap().bounds().unwrap();
        assert_eq!((start, end), (d(2025, 7, 22), d(2025, 8, 10)));
        assert!(prev_end < start);
        assert_eq!((prev_end - prev_start).num_days(), (end - start).num_days());
    }

    #[test]
    fn test_zero_result_range_at_calendar_edge_is_not_retried() {
        let mut q = UserQuery::new("everything");
        q.time_range = Some(TimeRange::new(NaiveDate::MIN, d(2025, 7, 15), "all"));
        let plan = handle_zero_results(&q);
        assert!(plan.retry.is_none());
        assert!(plan.notice.is_none());
        assert!(!plan.suggestions.is_empty());
    }

    #[test]
    fn test_handle_zero_results_without_range() {
        let plan = handle_zero_results(&UserQuery::new("anything"));
        assert!(plan.retry.is_none());
        assert!(!plan.suggestions.is_empty());
    }

    #[test]
    fn test_normalize_currency() {
        let rates: BTreeMap<String, f64> = [("USD", 950.0), ("EUR", 1050.0), ("CLP", 1.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut amounts = vec![
            MoneyAmount::new(100.0, "USD"),
            MoneyAmount::new(500.0, "CLP"),
            MoneyAmount::new(200.0, "EUR"),
        ];
        normalize_currency(&mut amounts, &rates, "CLP");

        assert_eq!(amounts[0].amount, 95000.0);
        assert_eq!(amounts[0].original_currency.as_deref(), Some("USD"));
        assert_eq!(amounts[1].amount, 500.0);
        assert!(amounts[1].original_currency.is_none());
        assert_eq!(amounts[2].amount, 210000.0);

        let mut missing = vec![MoneyAmount::new(100.0, "GBP")];
        normalize_currency(&mut missing, &rates, "CLP");
        assert!(missing[0].conversion_warning.is_some());
        assert_eq!(missing[0].currency, "GBP");
    }

    #[test]
    fn test_parse_rates() {
        let rates = parse_rates("usd=950, EUR=1050").unwrap();
        assert_eq!(rates.get("USD"), Some(&950.0));
        assert_eq!(rates.get("EUR"), Some(&1050.0));
        assert!(parse_rates("USD").is_err());
        assert!(parse_rates("").unwrap().is_empty());
    }
}
