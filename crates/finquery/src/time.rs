//! Calendar helpers and time-range extraction from free text.
//!
//! Every entry point takes `today` explicitly so results are deterministic.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, Months, NaiveDate};
use regex::{Captures, Regex};
use tracing::{info, warn};

use crate::types::TimeRange;

pub const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Map a full or three-letter month name to its number.
pub fn month_from_name(name: &str) -> Option<u32> {
    let name = name.trim().to_lowercase();
    if name == "sept" {
        return Some(9);
    }
    MONTH_NAMES
        .iter()
        .position(|m| *m == name || (name.len() == 3 && m.starts_with(&name)))
        .map(|i| i as u32 + 1)
}

pub fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn last_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (ny, nm) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    first_of_month(ny, nm).and_then(|d| d.pred_opt())
}

fn month_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    Some((first_of_month(year, month)?, last_of_month(year, month)?))
}

fn is_month_start(d: NaiveDate) -> bool {
    d.day() == 1
}

fn is_month_end(d: NaiveDate) -> bool {
    last_of_month(d.year(), d.month()) == Some(d)
}

/// Clip a range that extends past today so it ends today.
fn clip(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    if start <= today && end > today {
        (start, today)
    } else {
        (start, end)
    }
}

/// `date` moved back by `days`, or `None` outside chrono's calendar.
pub(crate) fn days_before(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|d| date.checked_sub_signed(d))
}

fn last_days(today: NaiveDate, n: i64, label: impl Into<String>) -> TimeRange {
    let start = days_before(today, n.max(1) - 1).unwrap_or(today);
    TimeRange::new(start, today, label)
}

/// First day of `last N <unit>s` ending today.
fn relative_start(today: NaiveDate, n: u32, unit: &str) -> Option<NaiveDate> {
    let days = i64::from(n);
    match unit {
        "day" => days_before(today, days - 1),
        "week" => days_before(today, days.checked_mul(7)? - 1),
        "month" => today.checked_sub_months(Months::new(n))?.succ_opt(),
        _ => today
            .checked_sub_months(Months::new(n.checked_mul(12)?))?
            .succ_opt(),
    }
}

fn this_month(today: NaiveDate) -> TimeRange {
    let start = today.with_day(1).unwrap_or(today);
    TimeRange::new(start, today, "this_month")
}

fn last_month(today: NaiveDate) -> TimeRange {
    let (y, m) = if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    };
    match month_range(y, m) {
        Some((s, e)) => TimeRange::new(s, e, "last_month"),
        None => last_days(today, 30, "last_30_days"),
    }
}

fn named_month(month: u32, year: i32, today: NaiveDate) -> Option<TimeRange> {
    let (s, e) = month_range(year, month)?;
    let (s, e) = clip(s, e, today);
    let name = MONTH_NAMES[(month - 1) as usize];
    Some(TimeRange::new(s, e, format!("{name}_{year}")))
}

fn quarter_range(quarter: u32, year: i32, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let first = (quarter - 1) * 3 + 1;
    let start = first_of_month(year, first)?;
    let end = last_of_month(year, first + 2)?;
    Some(clip(start, end, today))
}

fn month_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b(?:\s+(20\d{2}))?",
        )
        .expect("month regex is valid")
    })
}

/// Month names in `text`, skipping the verb "may" ("how much may I have spent").
///
/// A bare "may" counts as the month only after a preposition such as `in`.
fn month_captures<'t>(text: &'t str) -> impl Iterator<Item = Captures<'t>> + 't {
    month_regex()
        .captures_iter(text)
        .filter(move |caps| !is_modal_may(text, caps))
}

fn is_modal_may(text: &str, caps: &Captures<'_>) -> bool {
    const LEADS: [&str; 12] = [
        "in", "during", "for", "of", "since", "from", "until", "to", "and", "vs", "versus", "compare",
    ];
    let Some(name) = caps.get(1) else {
        return false;
    };
    if name.as_str() != "may" || caps.get(2).is_some() {
        return false;
    }
    let before = text[..name.start()].trim_end_matches(|c: char| !c.is_alphanumeric());
    let previous = before
        .rsplit(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("");
    !LEADS.contains(&previous)
}

fn relative_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:last|past|previous)\s+(\d+)\s+(day|week|month|year)s?\b")
            .expect("relative regex is valid")
    })
}

impl TimeRange {
    /// Build a range from a short phrase such as `last month` or `june 2025`.
    ///
    /// Unrecognised phrases give the last 30 days.
    pub fn from_phrase(phrase: &str, today: NaiveDate) -> TimeRange {
        let phrase = phrase.trim().to_lowercase();
        match phrase.as_str() {
            "today" => return TimeRange::new(today, today, "today"),
            "yesterday" => {
                let y = today.pred_opt().unwrap_or(today);
                return TimeRange::new(y, y, "yesterday");
            }
            "this month" => return this_month(today),
            "last month" => return last_month(today),
            _ => {}
        }

        if let Some(caps) = month_regex().captures(&phrase) {
            let year = caps
                .get(2)
                .and_then(|y| y.as_str().parse().ok())
                .unwrap_or(today.year());
            if let Some(range) = month_from_name(&caps[1]).and_then(|m| named_month(m, year, today)) {
                return range;
            }
        }

        last_days(today, 30, "last_30_days")
    }
}

/// Find the time range a question refers to. Defaults to the last 30 days.
pub fn extract_time_range(text: &str, today: NaiveDate) -> TimeRange {
    let text = text.to_lowercase();

    if text.contains("last month") || text.contains("previous month") {
        return last_month(today);
    }
    if text.contains("this month") {
        return this_month(today);
    }
    if text.contains("yesterday") {
        let y = today.pred_opt().unwrap_or(today);
        return TimeRange::new(y, y, "yesterday");
    }
    if text.contains("today") {
        return TimeRange::new(today, today, "today");
    }

    if let Some(caps) = relative_regex().captures(&text) {
        let unit = &caps[2];
        let n = caps[1].parse::<u32>().ok().map(|n| n.max(1));
        if let Some((n, start)) = n.and_then(|n| Some((n, relative_start(today, n, unit)?))) {
            return TimeRange::new(start, today, format!("last_{n}_{unit}s"));
        }
        warn!(count = &caps[1], unit, "relative range out of bounds, using the last 30 days");
        return last_days(today, 30, "last_30_days");
    }

    if text.contains("last week") || text.contains("past week") {
        return last_days(today, 7, "last_7_days");
    }
    if text.contains("past month") {
        return last_days(today, 30, "last_30_days");
    }

    if text.contains("this quarter") {
        let q = (today.month() - 1) / 3 + 1;
        if let Some((s, e)) = quarter_range(q, today.year(), today) {
            return TimeRange::new(s, e, "this_quarter");
        }
    }

    static QUARTER: OnceLock<Regex> = OnceLock::new();
    let quarter = QUARTER
        .get_or_init(|| Regex::new(r"\bq([1-4])(?:\s+(20\d{2}))?\b").expect("quarter regex is valid"));
    if let Some(caps) = quarter.captures(&text) {
        let q: u32 = caps[1].parse().unwrap_or(1);
        let year = caps
            .get(2)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(today.year());
        if let Some((s, e)) = quarter_range(q, year, today) {
            return TimeRange::new(s, e, format!("q{q}_{year}"));
        }
    }

    if text.contains("this year") {
        if let Some(start) = NaiveDate::from_ymd_opt(today.year(), 1, 1) {
            return TimeRange::new(start, today, "this_year");
        }
    }
    if text.contains("last year") {
        let y = today.year() - 1;
        if let (Some(s), Some(e)) = (
            NaiveDate::from_ymd_opt(y, 1, 1),
            NaiveDate::from_ymd_opt(y, 12, 31),
        ) {
            return TimeRange::new(s, e, "last_year");
        }
    }

    if let Some(caps) = month_captures(&text).next() {
        let year = caps
            .get(2)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(today.year());
        if let Some(range) = month_from_name(&caps[1]).and_then(|m| named_month(m, year, today)) {
            return range;
        }
    }

    static YEAR: OnceLock<Regex> = OnceLock::new();
    let year_re = YEAR.get_or_init(|| Regex::new(r"\b(20\d{2})\b").expect("year regex is valid"));
    if let Some(caps) = year_re.captures(&text) {
        if let Ok(year) = caps[1].parse::<i32>() {
            if let (Some(s), Some(e)) = (
                NaiveDate::from_ymd_opt(year, 1, 1),
                NaiveDate::from_ymd_opt(year, 12, 31),
            ) {
                let (s, e) = clip(s, e, today);
                return TimeRange::new(s, e, format!("year_{year}"));
            }
        }
    }

    last_days(today, 30, "last_30_days")
}

/// Every month named in the text, in order of appearance.
pub fn month_mentions(text: &str, today: NaiveDate) -> Vec<TimeRange> {
    let text = text.to_lowercase();
    month_captures(&text)
        .filter_map(|caps| {
            let year = caps
                .get(2)
                .and_then(|y| y.as_str().parse().ok())
                .unwrap_or(today.year());
            month_from_name(&caps[1]).and_then(|m| named_month(m, year, today))
        })
        .collect()
}

/// Turn a relative timeframe such as `last 3 months` into `(start, end)`.
///
/// The span is `end - start`, so `last 7 days` is seven days back from today.
/// `None` and unknown strings give `default_days`.
pub fn parse_timeframe(
    time_str: Option<&str>,
    default_days: i64,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let Some(raw) = time_str.map(str::trim).filter(|s| !s.is_empty()) else {
        info!(default_days, "no timeframe given, using default");
        return (days_before(today, default_days).unwrap_or(today), today);
    };
    let s = raw.to_lowercase();

    static PATTERNS: OnceLock<Vec<(Regex, i64, bool)>> = OnceLock::new();
    // (pattern, days per unit, takes a count)
    let patterns = PATTERNS.get_or_init(|| {
        [
            (r"^last\s+(\d+)\s+days?", 1, true),
            (r"^last\s+week", 7, false),
            (r"^last\s+(\d+)\s+weeks?", 7, true),
            (r"^last\s+month", 30, false),
            (r"^last\s+(\d+)\s+months?", 30, true),
            (r"^last\s+year", 365, false),
            (r"^last\s+(\d+)\s+years?", 365, true),
            (r"^today", 1, false),
            (r"^yesterday", 2, false),
        ]
        .into_iter()
        .map(|(p, days, counted)| (Regex::new(p).expect("timeframe regex is valid"), days, counted))
        .collect()
    });

    for (re, days, counted) in patterns {
        if let Some(caps) = re.captures(&s) {
            let span = if *counted {
                caps[1].parse::<i64>().ok().and_then(|count| days.checked_mul(count))
            } else {
                Some(*days)
            };
            if let Some(start) = span.and_then(|n| days_before(today, n)) {
                return (start, today);
            }
            warn!(timeframe = raw, default_days, "timeframe out of range, using default");
            return (days_before(today, default_days).unwrap_or(today), today);
        }
    }

    warn!(timeframe = raw, default_days, "could not parse timeframe, using default");
    (days_before(today, default_days).unwrap_or(today), today)
}

/// The period of the same length immediately before `range`.
///
/// Ranges made of whole calendar months map to the same number of whole
/// months before them.
pub fn previous_period(range: &TimeRange) -> Option<TimeRange> {
    let (start, end) = range.bounds()?;
    let prev_end = start.pred_opt()?;
    let label = match &range.label {
        Some(l) => format!("before_{l}"),
        None => "previous_period".to_string(),
    };

    if is_month_start(start) && is_month_end(end) {
        let months = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32 + 1;
        let prev_start = start.checked_sub_months(Months::new(months as u32))?;
        return Some(TimeRange::new(prev_start, prev_end, label));
    }

    let len = (end - start).num_days() + 1;
    Some(TimeRange::new(days_before(prev_end, len - 1)?, prev_end, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_last_month_is_full_calendar_month() {
        let r = TimeRange::from_phrase("last month", d(2025, 3, 10));
        assert_eq!(r.bounds(), Some((d(2025, 2, 1), d(2025, 2, 28))));
        assert_eq!(r.label.as_deref(), Some("last_month"));

        let january = TimeRange::from_phrase("Last Month", d(2025, 1, 5));
        assert_eq!(january.bounds(), Some((d(2024, 12, 1), d(2024, 12, 31))));
    }

    #[test]
    fn test_named_month_clips_current_month() {
        let today = d(2025, 7, 15);
        let june = TimeRange::from_phrase("june 2025", today);
        assert_eq!(june.bounds(), Some((d(2025, 6, 1), d(2025, 6, 30))));
        assert_eq!(june.label.as_deref(), Some("june_2025"));

        let july = TimeRange::from_phrase("july", today);
        assert_eq!(july.bounds(), Some((d(2025, 7, 1), today)));
    }

    #[test]
    fn test_unknown_phrase_defaults() {
        let r = TimeRange::from_phrase("whenever", d(2025, 7, 15));
        assert_eq!(r.label.as_deref(), Some("last_30_days"));
        assert_eq!(r.days(), Some(30));
    }

    #[test]
    fn test_extract_from_question() {
        let today = d(2025, 7, 15);
        let r = extract_time_range("How much did I spend on food last month?", today);
        assert_eq!(r.bounds(), Some((d(2025, 6, 1), d(2025, 6, 30))));

        let r = extract_time_range("spending in the last 7 days", today);
        assert_eq!(r.bounds(), Some((d(2025, 7, 9), today)));
        assert_eq!(r.label.as_deref(), Some("last_7_days"));

        let r = extract_time_range("expenses in Q1 2025", today);
        assert_eq!(r.bounds(), Some((d(2025, 1, 1), d(2025, 3, 31))));

        let r = extract_time_range("Show my spending by category in June 2025", today);
        assert_eq!(r.label.as_deref(), Some("june_2025"));

        let r = extract_time_range("top expenses this year", today);
        assert_eq!(r.bounds(), Some((d(2025, 1, 1), today)));

        let r = extract_time_range("groceries", today);
        assert_eq!(r.label.as_deref(), Some("last_30_days"));
    }

    #[test]
    fn test_parse_timeframe_spans() {
        let today = d(2025, 7, 15);
        let (s, e) = parse_timeframe(Some("last 7 days"), 30, today);
        assert_eq!((e - s).num_days(), 7);

        let (s, e) = parse_timeframe(Some("last month"), 30, today);
        assert!((28..=31).contains(&(e - s).num_days()));

        let (s, e) = parse_timeframe(Some("last 3 months"), 30, today);
        assert!((85..=95).contains(&(e - s).num_days()));

        let (s, e) = parse_timeframe(None, 14, today);
        assert_eq!((e - s).num_days(), 14);

        let (s, e) = parse_timeframe(Some("some invalid string"), 30, today);
        assert_eq!((e - s).num_days(), 30);
    }

    #[test]
    fn test_previous_period_whole_month() {
        let june = TimeRange::new(d(2025, 6, 1), d(2025, 6, 30), "june_2025");
        let prev = previous_period(&june).unwrap();
        assert_eq!(prev.bounds(), Some((d(2025, 5, 1), d(2025, 5, 31))));
    }

    #[test]
    fn test_previous_period_does_not_overlap() {
        let r = TimeRange::new(d(2025, 7, 1), d(2025, 7, 15), "this_month");
        let prev = previous_period(&r).unwrap();
        let (ps, pe) = prev.bounds().unwrap();
        assert!(pe < d(2025, 7, 1));
        assert_eq!((pe - ps).num_days() + 1, 15);
    }

    #[test]
    fn test_month_mentions_in_order() {
        let found = month_mentions("compare june 2025 vs may 2025", d(2025, 7, 15));
        let labels: Vec<_> = found.iter().filter_map(|r| r.label.as_deref()).collect();
        assert_eq!(labels, vec!["june_2025", "may_2025"]);
    }

    #[test]
    fn test_huge_relative_ranges_fall_back() {
        let today = d(2025, 7, 15);
        for text in [
            "spending in the last 4000000000 days",
            "spending in the last 99999999999 days",
            "food in the last 4000000000 weeks",
            "income over the last 4000000000 years",
        ] {
            let r = extract_time_range(text, today);
            assert_eq!(r.label.as_deref(), Some("last_30_days"), "{text}");
            assert_eq!(r.bounds(), Some((d(2025, 6, 16), today)));
        }

        let r = extract_time_range("spending in the last 0 days", today);
        assert_eq!(r.bounds(), Some((today, today)));
    }

    #[test]
    fn test_parse_timeframe_out_of_range_uses_default() {
        let today = d(2025, 7, 15);
        let (s, e) = parse_timeframe(Some("last 99999999999 days"), 30, today);
        assert_eq!((e - s).num_days(), 30);

        let (s, e) = parse_timeframe(Some("last 99999999999999999999 years"), 14, today);
        assert_eq!((e - s).num_days(), 14);

        let (s, e) = parse_timeframe(Some("last 9000000000000000000 weeks"), 7, today);
        assert_eq!((e - s).num_days(), 7);
    }

    #[test]
    fn test_previous_period_at_calendar_edge() {
        let r = TimeRange::new(NaiveDate::MIN, d(2025, 1, 1), "everything");
        assert!(previous_period(&r).is_none());
    }

    #[test]
    fn test_modal_may_is_not_a_month() {
        let today = d(2025, 7, 15);
        let r = extract_time_range("how much may I have spent on food", today);
        assert_eq!(r.label.as_deref(), Some("last_30_days"));

        let r = extract_time_range("spending in may", today);
        assert_eq!(r.bounds(), Some((d(2025, 5, 1), d(2025, 5, 31))));

        let found = month_mentions("compare june vs may", today);
        assert_eq!(found.len(), 2);
        assert_eq!(month_mentions("you may compare june", today).len(), 1);
    }

    #[test]
    fn test_month_names() {
        assert_eq!(month_from_name("Sep"), Some(9));
        assert_eq!(month_from_name("sept"), Some(9));
        assert_eq!(month_from_name("December"), Some(12));
        assert_eq!(month_from_name("smarch"), None);
    }
}
