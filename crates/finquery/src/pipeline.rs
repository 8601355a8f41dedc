//! The question-answering graph: stages, routing and the guardrail.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::answer::AnswerSynthesizer;
use crate::categories::CategoryResolver;
use crate::chart::{chart_frame, should_chart, ChartRenderer};
use crate::executor::DbExecutor;
use crate::guard::{detect_sql_injection, handle_zero_results};
use crate::intent::parse_intent;
use crate::planner::SqlPlanner;
use crate::types::{
    Answer, ChartSpec, ResultFrame, SqlPlan, StageTiming, TableKind, UserQuery,
};

/// A node of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ParseIntent,
    ResolveCategories,
    PlanSql,
    ExecuteQuery,
    GenerateChart,
    SynthesizeAnswer,
    Guardrail,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseIntent => "parse_intent",
            Self::ResolveCategories => "resolve_categories",
            Self::PlanSql => "plan_sql",
            Self::ExecuteQuery => "execute_query",
            Self::GenerateChart => "generate_chart",
            Self::SynthesizeAnswer => "synthesize_answer",
            Self::Guardrail => "guardrail",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and why a run left the happy path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub stage: Stage,
    pub message: String,
}

/// Everything a run produced along the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineState {
    pub query: Option<UserQuery>,
    pub plan: Option<SqlPlan>,
    pub frame: Option<ResultFrame>,
    pub chart_spec: Option<ChartSpec>,
    pub chart_path: Option<PathBuf>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub failure: Option<Failure>,
    /// Zero-result retries that were attempted.
    pub retries: usize,
    pub trace: Vec<StageTiming>,
}

impl PipelineState {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn suggest<I: IntoIterator<Item = String>>(&mut self, suggestions: I) {
        for s in suggestions {
            if !self.suggestions.contains(&s) {
                self.suggestions.push(s);
            }
        }
    }

    fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        warn!(stage = %stage, error = %message, "routing to guardrail");
        self.failure = Some(Failure { stage, message });
    }
}

/// The answer of one run plus its state.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub answer: Answer,
    pub state: PipelineState,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub currency: String,
    /// Directory for chart files. No charts are drawn when unset.
    pub chart_dir: Option<PathBuf>,
    /// Anchor for relative dates. Defaults to the local date.
    pub today: Option<NaiveDate>,
    pub resolver: CategoryResolver,
    pub max_zero_result_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            currency: "CLP".to_string(),
            chart_dir: None,
            today: None,
            resolver: CategoryResolver::with_defaults(),
            max_zero_result_retries: 1,
        }
    }
}

fn timed<T>(trace: &mut Vec<StageTiming>, stage: Stage, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    trace.push(StageTiming {
        stage: stage.as_str().to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    });
    out
}

/// Answers questions against one finance database.
pub struct Pipeline {
    executor: DbExecutor,
    planner: SqlPlanner,
    resolver: CategoryResolver,
    synthesizer: AnswerSynthesizer,
    renderer: Option<ChartRenderer>,
    today: Option<NaiveDate>,
    max_retries: usize,
}

impl Pipeline {
    pub fn new(executor: DbExecutor, config: PipelineConfig) -> Self {
        let mut resolver = config.resolver;
        for kind in [TableKind::Expenses, TableKind::Incomes] {
            match executor.distinct_categories(kind) {
                Ok(categories) => resolver.extend_from_dataset(&categories),
                Err(e) => warn!(table = kind.table_name(), error = %e, "could not read categories"),
            }
        }

        Self {
            executor,
            planner: SqlPlanner::new(),
            resolver,
            synthesizer: AnswerSynthesizer::new(config.currency),
            renderer: config.chart_dir.map(ChartRenderer::new),
            today: config.today,
            max_retries: config.max_zero_result_retries,
        }
    }

    pub fn executor(&self) -> &DbExecutor {
        &self.executor
    }

    pub fn resolver(&self) -> &CategoryResolver {
        &self.resolver
    }

    pub fn synthesizer(&self) -> &AnswerSynthesizer {
        &self.synthesizer
    }

    pub fn charts_enabled(&self) -> bool {
        self.renderer.is_some()
    }

    /// Answer a question. Only the answer is kept.
    pub fn ask(&self, text: &str) -> Answer {
        self.run(text).answer
    }

    /// Answer a question, keeping the intermediate state.
    pub fn run(&self, text: &str) -> PipelineOutcome {
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let mut state = PipelineState::default();
        info!(question = text, "pipeline started");

        let parsed = timed(&mut state.trace, Stage::ParseIntent, || {
            if detect_sql_injection(Some(text)) {
                return Err(
                    "The question contains patterns that are not allowed. Please rephrase it."
                        .to_string(),
                );
            }
            parse_intent(text, today).map_err(|e| e.to_string())
        });
        let mut query = match parsed {
            Ok(q) => q,
            Err(message) => {
                state.fail(Stage::ParseIntent, message);
                return self.guardrail(text, state);
            }
        };
        info!(intent = query.intent.as_str(), table = query.table.table_name(), "intent parsed");

        timed(&mut state.trace, Stage::ResolveCategories, || {
            self.resolve_categories(&mut query, &mut state.warnings)
        });

        let frame = loop {
            let plan = match timed(&mut state.trace, Stage::PlanSql, || self.planner.plan(&query)) {
                Ok(plan) => plan,
                Err(e) => {
                    state.query = Some(query);
                    state.fail(Stage::PlanSql, e.to_string());
                    return self.guardrail(text, state);
                }
            };
            info!(template = ?plan.template, sql = %plan.query, "query planned");
            debug!(params = ?plan.params, "plan parameters");

            let executed = timed(&mut state.trace, Stage::ExecuteQuery, || {
                self.executor.execute(&plan)
            });
            state.plan = Some(plan);
            let frame = match executed {
                Ok(frame) => frame,
                Err(e) => {
                    state.query = Some(query);
                    state.fail(Stage::ExecuteQuery, e.to_string());
                    return self.guardrail(text, state);
                }
            };
            if !frame.is_empty() {
                break frame;
            }

            let zero = handle_zero_results(&query);
            match zero.retry {
                Some(retry) if state.retries < self.max_retries => {
                    state.retries += 1;
                    info!(
                        attempt = state.retries,
                        notice = zero.notice.as_deref().unwrap_or_default(),
                        "no rows, retrying with a broader range"
                    );
                    query = retry;
                }
                _ => {
                    state.suggest(zero.suggestions);
                    state.frame = Some(frame);
                    state.query = Some(query);
                    state.fail(Stage::ExecuteQuery, "no rows matched the question");
                    return self.guardrail(text, state);
                }
            }
        };
        if state.retries > 0 {
            state.warn("No results for the requested period, so the range was broadened");
        }

        let mut table_fallback = false;
        if let Some(renderer) = &self.renderer {
            if should_chart(&frame, &query) {
                let drawn = timed(&mut state.trace, Stage::GenerateChart, || {
                    let spec = ChartSpec::infer(&frame, &query)?;
                    let data = chart_frame(&frame, &query);
                    Some((renderer.render(&spec, &data), spec))
                });
                match drawn {
                    Some((Ok(path), spec)) => {
                        info!(path = %path.display(), chart = spec.chart_type.as_str(), "chart written");
                        state.chart_path = Some(path);
                        state.chart_spec = Some(spec);
                    }
                    Some((Err(e), spec)) => {
                        warn!(error = %e, "chart generation failed, using table");
                        state.chart_spec = Some(spec);
                        table_fallback = true;
                    }
                    None => {
                        warn!("no chart fits this result, using table");
                        table_fallback = true;
                    }
                }
                if table_fallback {
                    state.warn("Chart could not be generated; showing a table instead");
                }
            }
        }

        let mut answer = timed(&mut state.trace, Stage::SynthesizeAnswer, || {
            if table_fallback {
                self.synthesizer
                    .synthesize_with_table(&query, &frame, &state.warnings)
            } else {
                self.synthesizer.synthesize(
                    &query,
                    &frame,
                    state.chart_path.as_deref(),
                    &state.warnings,
                )
            }
        });
        info!(rows = frame.rowcount(), "answer synthesized");

        state.query = Some(query);
        state.frame = Some(frame);
        self.finish(&mut answer, &state);
        PipelineOutcome { answer, state }
    }

    fn resolve_categories(&self, query: &mut UserQuery, warnings: &mut Vec<String>) {
        if query.categories.is_empty() {
            return;
        }
        let mut resolved: Vec<String> = Vec::new();
        for r in self.resolver.resolve_all(&query.categories) {
            match r.canonical {
                Some(canonical) => {
                    debug!(term = %r.original, canonical = %canonical, score = r.score, "category resolved");
                    if !resolved.contains(&canonical) {
                        resolved.push(canonical);
                    }
                }
                None => {
                    let message = format!("Unknown category '{}' ignored", r.original);
                    if !warnings.contains(&message) {
                        warnings.push(message);
                    }
                }
            }
        }
        query.categories = resolved;
    }

    /// Turn a recorded failure into a helpful answer.
    fn guardrail(&self, text: &str, mut state: PipelineState) -> PipelineOutcome {
        let mut answer = timed(&mut state.trace, Stage::Guardrail, || {
            let no_rows = state
                .frame
                .as_ref()
                .map(ResultFrame::is_empty)
                .unwrap_or(false);
            match (&state.query, &state.failure) {
                (Some(query), _) if no_rows => {
                    self.synthesizer.no_results(query, &state.suggestions)
                }
                (_, Some(failure)) => self.synthesizer.error(text, &failure.message),
                (_, None) => self.synthesizer.error(text, "Unknown error"),
            }
        });
        self.finish(&mut answer, &state);
        PipelineOutcome { answer, state }
    }

    fn finish(&self, answer: &mut Answer, state: &PipelineState) {
        let meta = &mut answer.metadata;
        if meta.intent.is_none() {
            meta.intent = state.query.clone();
        }
        if let Some(plan) = &state.plan {
            meta.sql = Some(plan.query.clone());
            meta.params = plan.params.clone();
        }
        if meta.warnings.is_empty() {
            meta.warnings = state.warnings.clone();
        }
        if meta.suggestions.is_empty() {
            meta.suggestions = state.suggestions.clone();
        }
        meta.stages = state.trace.clone();
    }
}
