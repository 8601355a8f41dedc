//! Data preparation: clean Toshl CSV exports and build the SQLite database.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::guard::{normalize_currency, MoneyAmount};
use crate::types::{FinError, FinResult};

const PLACEHOLDER: &str = "none";

/// A raw row of a Toshl export. Unknown columns such as `Account` are ignored.
#[derive(Debug, Deserialize)]
struct ToshlRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Category", default)]
    category: Option<String>,
    #[serde(rename = "Tags", default)]
    tags: Option<String>,
    #[serde(rename = "Expense amount", default)]
    expense: Option<String>,
    #[serde(rename = "Income amount", default)]
    income: Option<String>,
    #[serde(rename = "Currency", default)]
    currency: Option<String>,
    #[serde(rename = "In main currency", default)]
    in_main_currency: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
}

/// A cleaned transaction, one row of the clean CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub date: NaiveDate,
    pub category: String,
    pub tags: String,
    pub expense: f64,
    pub income: f64,
    pub amount_clp: f64,
    pub description: String,
    pub day: String,
}

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub main_currency: String,
    /// Units of main currency per unit of foreign currency.
    pub rates: BTreeMap<String, f64>,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            main_currency: "CLP".to_string(),
            rates: BTreeMap::new(),
        }
    }
}

/// Rows written by [`build_database`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub db_path: PathBuf,
    pub expenses_inserted: usize,
    pub incomes_inserted: usize,
    pub skipped: usize,
}

fn parse_amount(raw: Option<&str>, line: usize) -> FinResult<f64> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(0.0);
    };
    raw.replace(',', "")
        .parse()
        .map_err(|_| FinError::InvalidInput(format!("line {line}: invalid amount {raw:?}")))
}

fn filled(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// Read and clean a Toshl CSV export.
pub fn clean_export(input: &Path, options: &CleanOptions) -> FinResult<Vec<CleanRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(input)?;

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<ToshlRow>().enumerate() {
        let row = row?;
        // header is line 1
        let line = idx + 2;

        let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d").map_err(|e| {
            FinError::InvalidInput(format!("line {line}: invalid date {:?}: {e}", row.date))
        })?;
        let expense = parse_amount(row.expense.as_deref(), line)?;
        let income = parse_amount(row.income.as_deref(), line)?;

        let amount_clp = match row
            .in_main_currency
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            Some(raw) => parse_amount(Some(raw), line)?,
            None => {
                let currency = row
                    .currency
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| options.main_currency.clone());
                let mut amount = [MoneyAmount::new(expense.max(income), currency)];
                normalize_currency(&mut amount, &options.rates, &options.main_currency);
                if let Some(warning) = &amount[0].conversion_warning {
                    warn!(line, warning = %warning, "kept unconverted amount");
                }
                amount[0].amount
            }
        };

        records.push(CleanRecord {
            day: date.format("%A").to_string(),
            date,
            category: row.category.map(|c| c.trim().to_string()).unwrap_or_default(),
            tags: filled(row.tags),
            expense,
            income,
            amount_clp,
            description: filled(row.description),
        });
    }

    info!(rows = records.len(), input = %input.display(), "cleaned export");
    Ok(records)
}

pub fn write_clean_csv(records: &[CleanRecord], path: &Path) -> FinResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_clean_csv(path: &Path) -> FinResult<Vec<CleanRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize::<CleanRecord>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Where `clean` writes when no output is given.
///
/// `data/raw/Toshl_export_June_2025.csv` maps to
/// `data/clean/toshl_june2025_clean.csv`. Other names use `today`'s month.
pub fn default_clean_output(input: &Path, today: NaiveDate) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parts: Vec<&str> = stem.split('_').collect();
    let month_year = if parts.len() >= 4 {
        format!(
            "{}{}",
            parts[parts.len() - 2].to_lowercase(),
            parts[parts.len() - 1]
        )
    } else {
        today.format("%B%Y").to_string().to_lowercase()
    };

    let base = input
        .parent()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new(".."));
    base.join("clean")
        .join(format!("toshl_{month_year}_clean.csv"))
}

/// Create the `expenses` and `incomes` tables if missing.
pub fn create_schema(conn: &Connection) -> FinResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS expenses (
            date DATE,
            category TEXT,
            tags TEXT,
            expense REAL,
            amount_clp REAL,
            description TEXT,
            day TEXT
        );
        CREATE TABLE IF NOT EXISTS incomes (
            date DATE,
            category TEXT,
            tags TEXT,
            income REAL,
            amount_clp REAL,
            description TEXT,
            day TEXT
        );",
    )?;
    Ok(())
}

/// Drop and recreate the `meta` and monthly summary views.
pub fn refresh_views(conn: &Connection) -> FinResult<()> {
    conn.execute_batch(
        "DROP VIEW IF EXISTS meta;
        CREATE VIEW meta AS
        SELECT
            (SELECT MIN(date) FROM expenses) AS expenses_min_date,
            (SELECT MAX(date) FROM expenses) AS expenses_max_date,
            (SELECT COUNT(*) FROM expenses) AS expenses_row_count,
            (SELECT MIN(date) FROM incomes) AS incomes_min_date,
            (SELECT MAX(date) FROM incomes) AS incomes_max_date,
            (SELECT COUNT(*) FROM incomes) AS incomes_row_count;

        DROP VIEW IF EXISTS v_expenses_monthly;
        CREATE VIEW v_expenses_monthly AS
        SELECT
            strftime('%Y-%m', date) AS month,
            COALESCE(category, '') AS category,
            SUM(amount_clp) AS total_amount_clp
        FROM expenses
        GROUP BY month, category
        ORDER BY month DESC, total_amount_clp DESC;

        DROP VIEW IF EXISTS v_incomes_monthly;
        CREATE VIEW v_incomes_monthly AS
        SELECT
            strftime('%Y-%m', date) AS month,
            COALESCE(category, '') AS category,
            SUM(amount_clp) AS total_amount_clp
        FROM incomes
        GROUP BY month, category
        ORDER BY month DESC, total_amount_clp DESC;",
    )?;
    Ok(())
}

/// Append cleaned records to the database at `db_path`, creating it if needed.
///
/// Rows with a positive expense go to `expenses`, rows with a positive income
/// go to `incomes`. Everything is written in one transaction.
pub fn build_database(records: &[CleanRecord], db_path: &Path) -> FinResult<IngestSummary> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = Connection::open(db_path)?;
    create_schema(&conn)?;

    let mut summary = IngestSummary {
        db_path: db_path.to_path_buf(),
        expenses_inserted: 0,
        incomes_inserted: 0,
        skipped: 0,
    };

    let tx = conn.transaction()?;
    {
        let mut insert_expense = tx.prepare(
            "INSERT INTO expenses (date, category, tags, expense, amount_clp, description, day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut insert_income = tx.prepare(
            "INSERT INTO incomes (date, category, tags, income, amount_clp, description, day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for r in records {
            let date = r.date.format("%Y-%m-%d").to_string();
            if r.expense > 0.0 {
                insert_expense.execute(params![
                    date,
                    r.category,
                    r.tags,
                    r.expense,
                    r.amount_clp,
                    r.description,
                    r.day
                ])?;
                summary.expenses_inserted += 1;
            } else if r.income > 0.0 {
                insert_income.execute(params![
                    date,
                    r.category,
                    r.tags,
                    r.income,
                    r.amount_clp,
                    r.description,
                    r.day
                ])?;
                summary.incomes_inserted += 1;
            } else {
                summary.skipped += 1;
            }
        }
    }
    tx.commit()?;
    refresh_views(&conn)?;

    info!(
        db = %db_path.display(),
        expenses = summary.expenses_inserted,
        incomes = summary.incomes_inserted,
        skipped = summary.skipped,
        "database updated"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "\
Date,Account,Category,Tags,Expense amount,Income amount,Currency,In main currency,Main currency,Description
2025-06-03,Cash,Groceries,,\"12,500\",,CLP,\"12,500\",CLP,Lider
2025-06-07,Card,Travel,trip,100,,USD,,CLP,
2025-06-30,Bank,Salary,,,\"900,000\",CLP,\"900,000\",CLP,Acme
2025-06-12,Card,Gifts,,20,,GBP,,CLP,Book
";

    fn write_export(dir: &Path) -> PathBuf {
        let path = dir.join("Toshl_export_June_2025.csv");
        std::fs::write(&path, EXPORT).unwrap();
        path
    }

    fn options() -> CleanOptions {
        let mut rates = BTreeMap::new();
        rates.insert("USD".to_string(), 950.0);
        CleanOptions {
            main_currency: "CLP".into(),
            rates,
        }
    }

    #[test]
    fn test_clean_export() {
        let dir = tempfile::tempdir().unwrap();
        let records = clean_export(&write_export(dir.path()), &options()).unwrap();
        assert_eq!(records.len(), 4);

        let groceries = &records[0];
        assert_eq!(groceries.expense, 12500.0);
        assert_eq!(groceries.amount_clp, 12500.0);
        assert_eq!(groceries.tags, "none");
        assert_eq!(groceries.day, "Tuesday");

        let travel = &records[1];
        assert_eq!(travel.amount_clp, 95000.0);
        assert_eq!(travel.description, "none");

        assert_eq!(records[2].income, 900000.0);
        assert_eq!(records[2].expense, 0.0);

        // no GBP rate: amount stays as exported
        assert_eq!(records[3].amount_clp, 20.0);
    }

    #[test]
    fn test_clean_rejects_bad_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "Date,Category,Expense amount\n06/03/2025,Groceries,10\n",
        )
        .unwrap();
        let err = clean_export(&path, &CleanOptions::default()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_clean_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let records = clean_export(&write_export(dir.path()), &options()).unwrap();
        let out = dir.path().join("clean").join("out.csv");
        write_clean_csv(&records, &out).unwrap();

        let header = std::fs::read_to_string(&out).unwrap();
        assert!(header.starts_with("date,category,tags,expense,income,amount_clp,description,day"));
        assert_eq!(read_clean_csv(&out).unwrap(), records);
    }

    #[test]
    fn test_default_clean_output() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        assert_eq!(
            default_clean_output(Path::new("data/raw/Toshl_export_June_2025.csv"), today),
            PathBuf::from("data/clean/toshl_june2025_clean.csv")
        );
        assert_eq!(
            default_clean_output(Path::new("data/raw/export.csv"), today),
            PathBuf::from("data/clean/toshl_july2025_clean.csv")
        );
    }

    #[test]
    fn test_build_database() {
        let dir = tempfile::tempdir().unwrap();
        let records = clean_export(&write_export(dir.path()), &options()).unwrap();
        let db = dir.path().join("db").join("finances.db");

        let summary = build_database(&records, &db).unwrap();
        assert_eq!(summary.expenses_inserted, 3);
        assert_eq!(summary.incomes_inserted, 1);
        assert_eq!(summary.skipped, 0);

        let conn = Connection::open(&db).unwrap();
        let total: f64 = conn
            .query_row("SELECT SUM(amount_clp) FROM expenses", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 12500.0 + 95000.0 + 20.0);
        let month: String = conn
            .query_row("SELECT month FROM v_expenses_monthly LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(month, "2025-06");

        // appending again doubles the rows
        build_database(&records, &db).unwrap();
        let count: i64 = conn
            .query_row("SELECT expenses_row_count FROM meta", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 6);
    }
}
