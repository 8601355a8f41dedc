//! finquery: natural-language questions over personal finance data in SQLite.

pub mod answer;
pub mod categories;
pub mod chart;
pub mod executor;
pub mod guard;
pub mod ingest;
pub mod intent;
pub mod pipeline;
pub mod planner;
pub mod similarity;
pub mod time;
pub mod types;

pub use answer::AnswerSynthesizer;
pub use categories::{CategoryResolver, Resolution};
pub use chart::ChartRenderer;
pub use executor::{DatasetMeta, DbExecutor};
pub use guard::{detect_sql_injection, handle_zero_results, is_read_only_sql};
pub use ingest::{build_database, clean_export, CleanOptions, CleanRecord, IngestSummary};
pub use intent::parse_intent;
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutcome, PipelineState, Stage};
pub use planner::SqlPlanner;
pub use similarity::{cosine_similarity, embed_text, EMBEDDING_DIM};
pub use types::*;
