//! Settings resolution: explicit flag, then environment, then default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use finquery::guard::parse_rates;
use finquery::{CleanOptions, PipelineConfig};

pub const DB_ENV: &str = "FINQUERY_DB";
pub const LOG_DIR_ENV: &str = "FINQUERY_LOG_DIR";
pub const ARTIFACTS_DIR_ENV: &str = "FINQUERY_ARTIFACTS_DIR";
pub const CURRENCY_ENV: &str = "FINQUERY_CURRENCY";
pub const RATES_ENV: &str = "FINQUERY_RATES";

const DEFAULT_CURRENCY: &str = "CLP";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";
const LOCAL_DB: &str = "data/clean/finances.db";

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db: Option<String>,
    pub log_dir: Option<String>,
    pub artifacts_dir: Option<String>,
    pub currency: Option<String>,
    pub rates: Option<String>,
    pub no_charts: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub currency: String,
    /// Units of the main currency per unit of foreign currency.
    pub rates: BTreeMap<String, f64>,
    pub charts: bool,
}

fn pick(explicit: Option<&str>, env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| env(key).filter(|v| !v.trim().is_empty()))
}

/// Resolve the database path.
pub fn resolve_db_path(explicit: Option<&str>) -> PathBuf {
    resolve_db_path_with(explicit, &|key| std::env::var(key).ok())
}

pub fn resolve_db_path_with(explicit: Option<&str>, env: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = pick(explicit, env, DB_ENV) {
        return PathBuf::from(path);
    }

    let local = PathBuf::from(LOCAL_DB);
    if local.exists() {
        return local;
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".finquery")
        .join("finances.db")
}

impl Settings {
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        Self::resolve_with(overrides, &|key| std::env::var(key).ok())
    }

    /// Like [`resolve`](Self::resolve) with a custom environment lookup.
    pub fn resolve_with(overrides: &Overrides, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let rates = match pick(overrides.rates.as_deref(), env, RATES_ENV) {
            Some(spec) => parse_rates(&spec).with_context(|| format!("invalid {RATES_ENV}: {spec}"))?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            db_path: resolve_db_path_with(overrides.db.as_deref(), env),
            log_dir: pick(overrides.log_dir.as_deref(), env, LOG_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            artifacts_dir: pick(overrides.artifacts_dir.as_deref(), env, ARTIFACTS_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR)),
            currency: pick(overrides.currency.as_deref(), env, CURRENCY_ENV)
                .map(|c| c.trim().to_uppercase())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            rates,
            charts: !overrides.no_charts,
        })
    }

    pub fn chart_dir(&self) -> Option<PathBuf> {
        self.charts.then(|| self.artifacts_dir.join("charts"))
    }

    pub fn pipeline_config(&self, today: Option<NaiveDate>) -> PipelineConfig {
        PipelineConfig {
            currency: self.currency.clone(),
            chart_dir: self.chart_dir(),
            today,
            ..Default::default()
        }
    }

    pub fn clean_options(&self) -> CleanOptions {
        CleanOptions {
            main_currency: self.currency.clone(),
            rates: self.rates.clone(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
