//! Read-only SQLite executor producing [`ResultFrame`]s.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::guard::{is_read_only_sql, sanitize_identifier};
use crate::types::{
    placeholders, FinError, FinResult, ParamValue, ResultFrame, SqlPlan, TableKind, Value,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// One column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

/// Dataset coverage, read from the `meta` view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub expenses_min_date: Option<String>,
    pub expenses_max_date: Option<String>,
    pub expenses_row_count: i64,
    pub incomes_min_date: Option<String>,
    pub incomes_max_date: Option<String>,
    pub incomes_row_count: i64,
}

impl DatasetMeta {
    /// Earliest and latest dates across both tables.
    pub fn period(&self) -> Option<(String, String)> {
        let min = [&self.expenses_min_date, &self.incomes_min_date]
            .into_iter()
            .flatten()
            .min()?;
        let max = [&self.expenses_max_date, &self.incomes_max_date]
            .into_iter()
            .flatten()
            .max()?;
        Some((min.clone(), max.clone()))
    }
}

/// Executes planned queries against the finance database.
pub struct DbExecutor {
    conn: Connection,
    path: Option<PathBuf>,
}

impl DbExecutor {
    /// Open an existing database read-only.
    pub fn open(path: &Path) -> FinResult<Self> {
        if !path.exists() {
            return Err(FinError::DatabaseNotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!(path = %path.display(), "opened finance database");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> FinResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn, path: None }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn execute(&self, plan: &SqlPlan) -> FinResult<ResultFrame> {
        self.execute_sql(&plan.query, &plan.params)
    }

    /// Run one read-only statement, binding `:name` placeholders from `params`.
    pub fn execute_sql(
        &self,
        sql: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> FinResult<ResultFrame> {
        if !is_read_only_sql(sql) {
            return Err(FinError::UnsafeQuery(sql.to_string()));
        }

        let started = Instant::now();
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let names: Vec<String> = placeholders(sql).into_iter().collect();
        let keys: Vec<String> = names.iter().map(|n| format!(":{n}")).collect();
        let mut bound: Vec<(&str, &dyn ToSql)> = Vec::with_capacity(names.len());
        for (name, key) in names.iter().zip(keys.iter()) {
            let value = params
                .get(name)
                .ok_or_else(|| FinError::InvalidInput(format!("missing parameter :{name}")))?;
            bound.push((key.as_str(), value as &dyn ToSql));
        }
        debug!(params = ?params, "binding parameters");

        let mut rows = stmt.query(bound.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(match row.get_ref(i)? {
                    ValueRef::Null | ValueRef::Blob(_) => Value::Null,
                    ValueRef::Integer(v) => Value::Integer(v),
                    ValueRef::Real(v) => Value::Float(v),
                    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
                });
            }
            out.push(values);
        }

        let mut frame = ResultFrame::new(columns, out);
        frame.sql = Some(sql.to_string());
        info!(
            rows = frame.rowcount(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query executed"
        );
        Ok(frame)
    }

    fn names_of(&self, kind: &str) -> FinResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([kind], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn list_tables(&self) -> FinResult<Vec<String>> {
        self.names_of("table")
    }

    pub fn list_views(&self) -> FinResult<Vec<String>> {
        self.names_of("view")
    }

    /// Column layout of a table or view.
    pub fn table_schema(&self, table: &str) -> FinResult<Vec<ColumnInfo>> {
        let table = sanitize_identifier(table)?;
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    cid: row.get(0)?,
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                    not_null: row.get::<_, i64>(3)? != 0,
                    default_value: row.get(4)?,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(FinError::InvalidInput(format!("no such table: {table}")));
        }
        Ok(columns)
    }

    pub fn distinct_categories(&self, kind: TableKind) -> FinResult<Vec<String>> {
        let table = sanitize_identifier(kind.table_name())?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT category FROM {table} \
             WHERE category IS NOT NULL AND category <> '' ORDER BY category"
        ))?;
        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Coverage summary, or `None` when the `meta` view is missing.
    pub fn dataset_meta(&self) -> FinResult<Option<DatasetMeta>> {
        if !self.list_views()?.iter().any(|v| v == TableKind::Meta.table_name()) {
            return Ok(None);
        }
        let meta = self.conn.query_row(
            "SELECT expenses_min_date, expenses_max_date, expenses_row_count, \
             incomes_min_date, incomes_max_date, incomes_row_count FROM meta",
            [],
            |row| {
                Ok(DatasetMeta {
                    expenses_min_date: row.get(0)?,
                    expenses_max_date: row.get(1)?,
                    expenses_row_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    incomes_min_date: row.get(3)?,
                    incomes_max_date: row.get(4)?,
                    incomes_row_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                })
            },
        )?;
        Ok(Some(meta))
    }
}
