//! SQL planner: turns a [`UserQuery`] into a parameterized read-only [`SqlPlan`].
//!
//! Values are always bound as named parameters. Only identifiers that pass
//! [`sanitize_identifier`] and integer limits are interpolated.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::guard::{is_read_only_sql, sanitize_identifier};
use crate::intent::DEFAULT_TOP_LIMIT;
use crate::types::{
    Dimension, FinError, FinResult, IntentType, Metric, ParamValue, PlanTemplate, SqlPlan,
    TableKind, TimeGranularity, TimeRange, UserQuery,
};

pub const DEFAULT_AMOUNT_COLUMN: &str = "amount_clp";

/// SQL expression that buckets `date` at the given granularity.
pub fn time_expression(granularity: TimeGranularity) -> &'static str {
    match granularity {
        TimeGranularity::Day => "date(date)",
        TimeGranularity::Week => "date(date, 'weekday 0', '-6 days')",
        TimeGranularity::Month => "strftime('%Y-%m', date)",
        TimeGranularity::Quarter => {
            "strftime('%Y', date) || '-Q' || ((CAST(strftime('%m', date) AS INTEGER) + 2) / 3)"
        }
        TimeGranularity::Year => "strftime('%Y', date)",
    }
}

/// Builds SQL for parsed questions.
#[derive(Debug, Clone)]
pub struct SqlPlanner {
    amount_column: String,
}

impl Default for SqlPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlPlanner {
    pub fn new() -> Self {
        Self {
            amount_column: DEFAULT_AMOUNT_COLUMN.to_string(),
        }
    }

    pub fn with_amount_column(column: &str) -> FinResult<Self> {
        Ok(Self {
            amount_column: sanitize_identifier(column)?.to_string(),
        })
    }

    pub fn amount_column(&self) -> &str {
        &self.amount_column
    }

    /// Pick a template by intent and render it.
    pub fn plan(&self, query: &UserQuery) -> FinResult<SqlPlan> {
        let table = match query.table {
            TableKind::Expenses | TableKind::Incomes => {
                sanitize_identifier(query.table.table_name())?
            }
            other => {
                return Err(FinError::Plan(format!(
                    "{} cannot be queried directly",
                    other.table_name()
                )))
            }
        };

        let mut params = BTreeMap::new();
        let (template, sql) = match query.intent {
            IntentType::SpendingOverTime => (
                PlanTemplate::SpendingOverTime,
                self.spending_over_time(query, table, &mut params),
            ),
            IntentType::SpendingByCategory => (
                PlanTemplate::SpendingByCategory,
                self.spending_by_category(query, table, &mut params),
            ),
            IntentType::TopItems => (
                PlanTemplate::TopItems,
                self.top_items(query, table, &mut params),
            ),
            IntentType::Comparison => (
                PlanTemplate::Comparison,
                self.comparison(query, table, &mut params)?,
            ),
            IntentType::Breakdown | IntentType::Unknown => (
                PlanTemplate::Generic,
                self.generic(query, table, &mut params),
            ),
        };

        if !is_read_only_sql(&sql) {
            return Err(FinError::UnsafeQuery(sql));
        }

        info!(template = ?template, sql = %sql, "planned query");
        debug!(params = ?params, "query parameters");

        Ok(SqlPlan {
            query: sql,
            params,
            tables: vec![query.table],
            template,
        })
    }

    fn metric_list(&self, metrics: &[Metric]) -> String {
        if metrics.is_empty() {
            return Metric::TotalSpend.select_expr(&self.amount_column);
        }
        metrics
            .iter()
            .map(|m| m.select_expr(&self.amount_column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Conditions for one period. Parameter names carry `prefix`.
    fn where_clause(
        &self,
        query: &UserQuery,
        range: Option<&TimeRange>,
        prefix: &str,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> String {
        let mut conditions = Vec::new();

        if let Some(range) = range {
            if let Some(start) = range.start {
                conditions.push(format!("date(date) >= :{prefix}start_date"));
                params.insert(
                    format!("{prefix}start_date"),
                    ParamValue::Text(start.format("%Y-%m-%d").to_string()),
                );
            }
            if let Some(end) = range.end {
                conditions.push(format!("date(date) <= :{prefix}end_date"));
                params.insert(
                    format!("{prefix}end_date"),
                    ParamValue::Text(end.format("%Y-%m-%d").to_string()),
                );
            }
        }

        if !query.categories.is_empty() {
            let names: Vec<String> = query
                .categories
                .iter()
                .enumerate()
                .map(|(i, category)| {
                    let name = format!("{prefix}category_{i}");
                    params.insert(name.clone(), ParamValue::Text(category.clone()));
                    format!(":{name}")
                })
                .collect();
            conditions.push(format!("category IN ({})", names.join(", ")));
        }

        if !query.tags.is_empty() {
            let likes: Vec<String> = query
                .tags
                .iter()
                .enumerate()
                .map(|(i, tag)| {
                    let name = format!("{prefix}tag_{i}");
                    params.insert(name.clone(), ParamValue::Text(format!("%{tag}%")));
                    format!("tags LIKE :{name}")
                })
                .collect();
            conditions.push(format!("({})", likes.join(" OR ")));
        }

        if let Some(min) = query.min_amount {
            conditions.push(format!("{} >= :{prefix}min_amount", self.amount_column));
            params.insert(format!("{prefix}min_amount"), ParamValue::Real(min));
        }
        if let Some(max) = query.max_amount {
            conditions.push(format!("{} <= :{prefix}max_amount", self.amount_column));
            params.insert(format!("{prefix}max_amount"), ParamValue::Real(max));
        }

        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }

    fn spending_over_time(
        &self,
        query: &UserQuery,
        table: &str,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> String {
        let time_expr = time_expression(query.granularity.unwrap_or(TimeGranularity::Month));
        let where_sql = self.where_clause(query, query.time_range.as_ref(), "", params);
        format!(
            "SELECT {time_expr} AS time_period, {metrics} FROM {table}{where_sql} \
             GROUP BY time_period ORDER BY time_period",
            metrics = self.metric_list(&query.metrics),
        )
    }

    fn spending_by_category(
        &self,
        query: &UserQuery,
        table: &str,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> String {
        let amount = &self.amount_column;
        let mut select = vec![
            "category".to_string(),
            Metric::TotalSpend.select_expr(amount),
            Metric::TransactionCount.select_expr(amount),
        ];
        for metric in &query.metrics {
            if !matches!(metric, Metric::TotalSpend | Metric::TransactionCount) {
                select.push(metric.select_expr(amount));
            }
        }
        let where_sql = self.where_clause(query, query.time_range.as_ref(), "", params);
        let limit = query
            .limit
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        format!(
            "SELECT {select} FROM {table}{where_sql} GROUP BY category ORDER BY total DESC{limit}",
            select = select.join(", "),
        )
    }

    fn top_items(
        &self,
        query: &UserQuery,
        table: &str,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> String {
        let amount = &self.amount_column;
        let dimension = query
            .dimensions
            .iter()
            .copied()
            .find(|d| !d.is_temporal())
            .unwrap_or(Dimension::Description);
        let where_sql = self.where_clause(query, query.time_range.as_ref(), "", params);
        let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT);
        format!(
            "SELECT {dim}, {total}, {count} FROM {table}{where_sql} \
             GROUP BY {group} ORDER BY total DESC LIMIT {limit}",
            dim = dimension.select_expr(),
            total = Metric::TotalSpend.select_expr(amount),
            count = Metric::TransactionCount.select_expr(amount),
            group = dimension.expr(),
        )
    }

    fn comparison(
        &self,
        query: &UserQuery,
        table: &str,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> FinResult<String> {
        let current = query.time_range.as_ref().filter(|r| r.bounds().is_some());
        let previous = query.comparison.as_ref().filter(|r| r.bounds().is_some());
        let (Some(current), Some(previous)) = (current, previous) else {
            return Err(FinError::Plan(
                "a comparison needs both a current and a previous period".into(),
            ));
        };

        let amount = &self.amount_column;
        let current_where = self.where_clause(query, Some(current), "", params);
        let previous_where = self.where_clause(query, Some(previous), "prev_", params);

        if query.has_dimension(Dimension::Category) {
            return Ok(format!(
                "WITH current_period AS (\
                 SELECT category, SUM({amount}) AS current_value FROM {table}{current_where} GROUP BY category\
                 ), previous_period AS (\
                 SELECT category, SUM({amount}) AS previous_value FROM {table}{previous_where} GROUP BY category\
                 ) \
                 SELECT c.category AS category, c.current_value AS current_value, \
                 COALESCE(p.previous_value, 0) AS previous_value, \
                 c.current_value - COALESCE(p.previous_value, 0) AS difference, \
                 CASE WHEN COALESCE(p.previous_value, 0) = 0 THEN NULL \
                 ELSE ROUND((c.current_value - p.previous_value) * 100.0 / p.previous_value, 2) END AS pct_change \
                 FROM current_period c LEFT JOIN previous_period p ON c.category = p.category \
                 ORDER BY c.current_value DESC"
            ));
        }

        Ok(format!(
            "WITH current_period AS (\
             SELECT COALESCE(SUM({amount}), 0) AS current_value FROM {table}{current_where}\
             ), previous_period AS (\
             SELECT COALESCE(SUM({amount}), 0) AS previous_value FROM {table}{previous_where}\
             ) \
             SELECT current_value, previous_value, current_value - previous_value AS difference, \
             CASE WHEN previous_value = 0 THEN NULL \
             ELSE ROUND((current_value - previous_value) * 100.0 / previous_value, 2) END AS pct_change \
             FROM current_period, previous_period"
        ))
    }

    fn generic(
        &self,
        query: &UserQuery,
        table: &str,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> String {
        let dimensions: Vec<Dimension> = if query.dimensions.is_empty() {
            vec![Dimension::Category]
        } else {
            query.dimensions.clone()
        };
        let select: Vec<String> = dimensions.iter().map(|d| d.select_expr()).collect();
        let group: Vec<&str> = dimensions.iter().map(|d| d.expr()).collect();
        let where_sql = self.where_clause(query, query.time_range.as_ref(), "", params);
        let limit = query
            .limit
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        format!(
            "SELECT {select}, {metrics} FROM {table}{where_sql} GROUP BY {group} ORDER BY {order}{limit}",
            select = select.join(", "),
            metrics = self.metric_list(&query.metrics),
            group = group.join(", "),
            order = dimensions[0].alias(),
        )
    }
}
