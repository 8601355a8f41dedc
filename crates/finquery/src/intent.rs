//! Rule-based intent parser: free text to [`UserQuery`].

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::time::{self, extract_time_range, month_from_name, previous_period};
use crate::types::{
    Dimension, FinError, FinResult, IntentType, Metric, TableKind, TimeGranularity, TimeRange,
    UserQuery,
};

pub const DEFAULT_TOP_LIMIT: usize = 10;

/// Words that end a category phrase and are never category terms.
const STOP_WORDS: &[&str] = &[
    "a", "above", "all", "an", "at", "average", "below", "between", "by", "compare", "compared",
    "day", "days", "during", "each", "every", "expense", "expenses", "far", "from", "greater",
    "i", "in", "is", "items", "last", "less", "me", "month", "months", "more", "my", "of",
    "over", "past", "per", "previous", "purchases", "quarter", "since", "so", "spend",
    "spending", "spent", "than", "that", "the", "this", "to", "today", "total", "transactions",
    "under", "until", "versus", "vs", "week", "weeks", "what", "when", "with", "year", "years",
    "yesterday", "q1", "q2", "q3", "q4",
];

const INCOME_WORDS: &[&str] = &["income", "earn", "salary", "received", "paid me"];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("intent regex is valid"))
}

/// Parse a question into a structured query.
///
/// `today` anchors relative time phrases. Empty input is an error.
pub fn parse_intent(text: &str, today: NaiveDate) -> FinResult<UserQuery> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(FinError::Intent("the question is empty".into()));
    }
    let lower = trimmed.to_lowercase();
    let mut query = UserQuery::new(trimmed);

    static TOP_N: OnceLock<Regex> = OnceLock::new();
    let top_n = regex(&TOP_N, r"\btop\s+(\d+)\b")
        .captures(&lower)
        .and_then(|c| c[1].parse::<usize>().ok());

    query.intent = if contains_any(&lower, &["by category", "per category", "categories"]) {
        query.dimensions.push(Dimension::Category);
        IntentType::SpendingByCategory
    } else if contains_any(
        &lower,
        &["top ", "highest ", "most expensive", "biggest", "largest "],
    ) {
        query.limit = Some(top_n.unwrap_or(DEFAULT_TOP_LIMIT));
        IntentType::TopItems
    } else if contains_any(&lower, &["compare", " vs", "versus"]) {
        IntentType::Comparison
    } else if contains_any(&lower, &["breakdown", "break down"]) {
        IntentType::Breakdown
    } else {
        IntentType::SpendingOverTime
    };
    if query.limit.is_none() {
        query.limit = top_n;
    }

    if contains_any(&lower, INCOME_WORDS) {
        query.table = TableKind::Incomes;
    }

    query.time_range = Some(extract_time_range(&lower, today));
    query.granularity = extract_granularity(&lower);

    extract_dimensions(&lower, &mut query);
    if query.intent == IntentType::SpendingOverTime
        && query.granularity.is_none()
        && query.dimensions.iter().any(|d| *d != Dimension::Category)
    {
        query.intent = IntentType::Breakdown;
    }
    if query.intent == IntentType::Breakdown && query.dimensions.is_empty() {
        query.dimensions.push(Dimension::Category);
    }

    let metrics = extract_metrics(&lower);
    if !metrics.is_empty() {
        query.metrics = metrics;
    }

    query.categories = extract_category_terms(&lower);
    query.tags = extract_tags(&lower);
    let (min, max) = extract_amounts(&lower);
    query.min_amount = min;
    query.max_amount = max;

    if query.intent == IntentType::Comparison {
        resolve_comparison(&lower, today, &mut query);
    }

    debug!(
        intent = query.intent.as_str(),
        categories = ?query.categories,
        time_range = ?query.time_range,
        "parsed intent"
    );
    Ok(query)
}

fn extract_granularity(lower: &str) -> Option<TimeGranularity> {
    let weekday = lower.contains("day of week") || lower.contains("day of the week");
    if !weekday
        && contains_any(
            lower,
            &["daily", "day by day", "each day", "per day", "by day"],
        )
    {
        Some(TimeGranularity::Day)
    } else if contains_any(
        lower,
        &["weekly", "week by week", "each week", "per week", "by week"],
    ) {
        Some(TimeGranularity::Week)
    } else if contains_any(
        lower,
        &["monthly", "month by month", "each month", "by month", "per month"],
    ) {
        Some(TimeGranularity::Month)
    } else if contains_any(
        lower,
        &["quarterly", "by quarter", "per quarter", "each quarter"],
    ) {
        Some(TimeGranularity::Quarter)
    } else if contains_any(
        lower,
        &["yearly", "annually", "year by year", "by year", "per year"],
    ) {
        Some(TimeGranularity::Year)
    } else {
        None
    }
}

fn extract_dimensions(lower: &str, query: &mut UserQuery) {
    if !(lower.contains("by ") || lower.contains("per ")) {
        return;
    }
    let mut add = |dim: Dimension| {
        if !query.dimensions.contains(&dim) {
            query.dimensions.push(dim);
        }
    };

    if lower.contains("category") || lower.contains("categories") {
        add(Dimension::Category);
    }

    static TAGS: OnceLock<Regex> = OnceLock::new();
    if regex(&TAGS, r"\b(?:by|per)\s+tags?\b").is_match(lower) {
        add(Dimension::Tags);
    }
    if contains_any(lower, &["weekday", "day of week", "day of the week"]) {
        add(Dimension::Day);
    }
    static DESCRIPTION: OnceLock<Regex> = OnceLock::new();
    if regex(
        &DESCRIPTION,
        r"\b(?:by|per)\s+(?:description|merchant|store|item)s?\b",
    )
    .is_match(lower)
    {
        add(Dimension::Description);
    }
}

fn extract_metrics(lower: &str) -> Vec<Metric> {
    static AVG: OnceLock<Regex> = OnceLock::new();
    static COUNT: OnceLock<Regex> = OnceLock::new();
    static MAX: OnceLock<Regex> = OnceLock::new();
    static MIN: OnceLock<Regex> = OnceLock::new();

    let mut metrics = Vec::new();
    if regex(&AVG, r"\b(?:average|avg|mean)\b").is_match(lower) {
        metrics.push(Metric::AvgSpend);
    }
    if regex(&COUNT, r"\b(?:how many|count|number of)\b").is_match(lower) {
        metrics.push(Metric::TransactionCount);
    }
    if regex(&MAX, r"\b(?:max|maximum)\b").is_match(lower) {
        metrics.push(Metric::MaxSpend);
    }
    if regex(&MIN, r"\b(?:min|minimum|smallest)\b").is_match(lower) {
        metrics.push(Metric::MinSpend);
    }
    metrics
}

/// Raw category words following `on`, `for` or `in category`.
pub fn extract_category_terms(lower: &str) -> Vec<String> {
    static TRIGGER: OnceLock<Regex> = OnceLock::new();
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let trigger = regex(&TRIGGER, r"\b(?:in\s+category|category|on|for)\s+");
    let token = regex(&TOKEN, r"[a-z0-9&'\-]+|[^\sa-z0-9&'\-]");

    fn flush(words: &mut Vec<&str>, terms: &mut Vec<String>) {
        if !words.is_empty() {
            let term = words.join(" ");
            if !terms.contains(&term) {
                terms.push(term);
            }
            words.clear();
        }
    }

    let mut terms: Vec<String> = Vec::new();

    for m in trigger.find_iter(lower) {
        let rest = &lower[m.end()..];
        let mut words: Vec<&str> = Vec::new();
        for tok in token.find_iter(rest).map(|t| t.as_str()) {
            if tok == "&" || tok == "and" {
                flush(&mut words, &mut terms);
                continue;
            }
            let starts_alnum = tok.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
            if !starts_alnum
                || STOP_WORDS.contains(&tok)
                || tok.chars().all(|c| c.is_ascii_digit())
                || month_from_name(tok).is_some()
            {
                break;
            }
            words.push(tok);
        }
        flush(&mut words, &mut terms);
    }
    terms
}

fn extract_tags(lower: &str) -> Vec<String> {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let mut tags: Vec<String> = Vec::new();
    for caps in regex(&TAG, r"\b(?:tagged|tag)\s+([a-z0-9_\-]+)").captures_iter(lower) {
        let tag = caps[1].to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

fn extract_amounts(lower: &str) -> (Option<f64>, Option<f64>) {
    static MIN: OnceLock<Regex> = OnceLock::new();
    static MAX: OnceLock<Regex> = OnceLock::new();
    let min = regex(
        &MIN,
        r"\b(?:over|above|more than|greater than)\s+\$?(\d[\d,]*(?:\.\d+)?)",
    )
    .captures(lower)
    .and_then(|c| parse_amount(&c[1]));
    let max = regex(&MAX, r"\b(?:under|below|less than)\s+\$?(\d[\d,]*(?:\.\d+)?)")
        .captures(lower)
        .and_then(|c| parse_amount(&c[1]));
    (min, max)
}

fn resolve_comparison(lower: &str, today: NaiveDate, query: &mut UserQuery) {
    if lower.contains("this month") && lower.contains("last month") {
        query.time_range = Some(TimeRange::from_phrase("this month", today));
        query.comparison = Some(TimeRange::from_phrase("last month", today));
        return;
    }

    let months = time::month_mentions(lower, today);
    if months.len() >= 2 {
        query.time_range = Some(months[0].clone());
        query.comparison = Some(months[1].clone());
        return;
    }

    query.comparison = query.time_range.as_ref().and_then(previous_period);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
    }

    #[test]
    fn test_empty_question_is_error() {
        assert!(matches!(parse_intent("   ", today()), Err(FinError::Intent(_))));
    }

    #[test]
    fn test_spend_on_food_last_month() {
        let q = parse_intent("How much did I spend on food last month?", today()).unwrap();
        assert_eq!(q.intent, IntentType::SpendingOverTime);
        assert_eq!(q.table, TableKind::Expenses);
        assert_eq!(q.categories, vec!["food".to_string()]);
        assert_eq!(q.time_range.unwrap().label.as_deref(), Some("last_month"));
        assert_eq!(q.metrics, vec![Metric::TotalSpend]);
    }

    #[test]
    fn test_by_category() {
        let q = parse_intent("Show me my spending by category in June 2025", today()).unwrap();
        assert_eq!(q.intent, IntentType::SpendingByCategory);
        assert_eq!(q.dimensions, vec![Dimension::Category]);
        assert!(q.categories.is_empty());
        assert_eq!(q.time_range.unwrap().label.as_deref(), Some("june_2025"));
    }

    #[test]
    fn test_top_items_limit() {
        let q = parse_intent("Top 5 expenses this year", today()).unwrap();
        assert_eq!(q.intent, IntentType::TopItems);
        assert_eq!(q.limit, Some(5));

        let q = parse_intent("most expensive purchases last month", today()).unwrap();
        assert_eq!(q.limit, Some(DEFAULT_TOP_LIMIT));
    }

    #[test]
    fn test_comparison_this_vs_last_month() {
        let q = parse_intent("Compare my spending this month to last month", today()).unwrap();
        assert_eq!(q.intent, IntentType::Comparison);
        let current = q.time_range.unwrap();
        let previous = q.comparison.unwrap();
        assert_eq!(current.label.as_deref(), Some("this_month"));
        assert_eq!(
            previous.bounds(),
            Some((
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
            ))
        );
    }

    #[test]
    fn test_comparison_two_months() {
        let q = parse_intent("june 2025 vs may 2025 groceries", today()).unwrap();
        assert_eq!(q.intent, IntentType::Comparison);
        assert_eq!(q.time_range.unwrap().label.as_deref(), Some("june_2025"));
        assert_eq!(q.comparison.unwrap().label.as_deref(), Some("may_2025"));
    }

    #[test]
    fn test_income_table_and_granularity() {
        let q = parse_intent("monthly income this year", today()).unwrap();
        assert_eq!(q.table, TableKind::Incomes);
        assert_eq!(q.granularity, Some(TimeGranularity::Month));
        assert_eq!(q.intent, IntentType::SpendingOverTime);
    }

    #[test]
    fn test_breakdown_defaults_to_category() {
        let q = parse_intent("give me a breakdown of last month", today()).unwrap();
        assert_eq!(q.intent, IntentType::Breakdown);
        assert_eq!(q.dimensions, vec![Dimension::Category]);
    }

    #[test]
    fn test_weekday_dimension_becomes_breakdown() {
        let q = parse_intent("spending by day of week last month", today()).unwrap();
        assert_eq!(q.intent, IntentType::Breakdown);
        assert_eq!(q.dimensions, vec![Dimension::Day]);
        assert_eq!(q.granularity, None);
    }

    #[test]
    fn test_metrics_and_amount_filters() {
        let q = parse_intent(
            "average spend on travel over $10,000 last 3 months",
            today(),
        )
        .unwrap();
        assert_eq!(q.metrics, vec![Metric::AvgSpend]);
        assert_eq!(q.min_amount, Some(10000.0));
        assert_eq!(q.max_amount, None);
        assert_eq!(q.categories, vec!["travel".to_string()]);
    }

    #[test]
    fn test_category_terms_split_on_and() {
        let terms = extract_category_terms("how much on groceries and transport last week");
        assert_eq!(terms, vec!["groceries".to_string(), "transport".to_string()]);

        let terms = extract_category_terms("spending for each category this month");
        assert!(terms.is_empty());
    }

    #[test]
    fn test_tags() {
        let q = parse_intent("expenses tagged vacation last year", today()).unwrap();
        assert_eq!(q.tags, vec!["vacation".to_string()]);
    }
}
