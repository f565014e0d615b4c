//! The orchestration driver: parse, resolve, search, validate, and
//! surface a structured result or failure.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use contracts::{CommandSpec, Environment, InferenceError, ValidationRecord};
use graphdb::KnowledgeGraph;
use serde::Serialize;
use tracing::{info, warn};

use crate::language::strategy_for;
use crate::resolve::{resolve_environment, EdgeSelection};
use crate::search::spread::{SpreadStep, Spreader};
use crate::search::SearchKind;

/// Default ceiling on candidate environments per inference run.
pub const DEFAULT_SEARCH_BUDGET: usize = 100;

/// Default wall-clock budget for one inference run.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(3600);

/// Caller-tunable knobs, fixed at inference start.
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub language: String,
    pub search: SearchKind,
    pub only: EdgeSelection,
    pub no_validate: bool,
    pub search_budget: usize,
    pub time_budget: Duration,
    /// Replacement entry command, from `--cmd`/`--arg`.
    pub entry_override: Option<CommandSpec>,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            language: "python".to_string(),
            search: SearchKind::FeedbackDirected,
            only: EdgeSelection::Union,
            no_validate: false,
            search_budget: DEFAULT_SEARCH_BUDGET,
            time_budget: DEFAULT_TIME_BUDGET,
            entry_override: None,
        }
    }
}

/// The code location and language selection for one inference run.
/// Created once at entry and read-only afterwards.
#[derive(Debug, Clone)]
pub struct InferenceContext {
    pub codebase: PathBuf,
    pub options: InferenceOptions,
}

impl InferenceContext {
    pub fn new(codebase: PathBuf, options: InferenceOptions) -> Self {
        Self { codebase, options }
    }
}

/// A successful inference run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOutcome {
    pub environment: Environment,
    pub num_validations: usize,
    pub elapsed_secs: u64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_validations: Vec<ValidationRecord>,
    /// The resolved starting environments the search ran over.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub starting_environments: Vec<Environment>,
}

/// The full ordered command list the validator executes: setup
/// commands first, then one install command per dependency.
pub fn install_command_lines(env: &Environment) -> Vec<String> {
    let mut lines: Vec<String> = env
        .setup_commands
        .iter()
        .map(CommandSpec::shell_line)
        .collect();
    for dep in &env.dependencies {
        let adapter = systems::adapter_for(dep.system);
        lines.push(adapter.install_command(dep).shell_line());
    }
    lines
}

async fn with_deadline<T>(
    deadline: Instant,
    started: Instant,
    num_validations: usize,
    future: impl Future<Output = Result<T>>,
) -> Result<T, InferenceError> {
    let timeout_error = || InferenceError::InferenceTimeout {
        elapsed_secs: started.elapsed().as_secs(),
        num_validations,
    };
    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
        return Err(timeout_error());
    };
    match tokio::time::timeout(remaining, future).await {
        Ok(result) => result.map_err(InferenceError::from_unexpected),
        Err(_) => Err(timeout_error()),
    }
}

/// Run one complete inference: parse the codebase, resolve
/// dependencies for every starting environment, then drive the
/// configured search until a validation succeeds, the search space is
/// exhausted, or the time budget expires.
pub async fn infer(
    ctx: &InferenceContext,
    graph: Arc<dyn KnowledgeGraph>,
) -> Result<InferenceOutcome, InferenceError> {
    let started = Instant::now();
    let started_at = Utc::now();
    let deadline = started + ctx.options.time_budget;

    let mut environments = sandboxes::parser::parse_codebase(&ctx.codebase, &ctx.options.language)
        .await
        .map_err(InferenceError::from_unexpected)?;
    if environments.is_empty() {
        return Err(InferenceError::NoBaseEnvironments);
    }

    if let Some(entry) = &ctx.options.entry_override {
        for env in &mut environments {
            env.entry_cmd = entry.clone();
        }
    }

    let strategy = strategy_for(&ctx.options.language)
        .map(Arc::from)
        .ok_or_else(|| InferenceError::UnexpectedInference {
            cause: format!("no language strategy for '{}'", ctx.options.language),
        })?;

    let selection = ctx.options.only;
    let environments: Vec<Environment> =
        futures_util::future::try_join_all(environments.into_iter().map(|mut env| {
            let graph = graph.clone();
            async move {
                resolve_environment(&mut env, graph.as_ref(), selection).await?;
                Ok::<_, anyhow::Error>(env)
            }
        }))
        .await
        .map_err(InferenceError::from_unexpected)?;

    let starting_environments = environments.clone();

    if ctx.options.no_validate {
        let environment = environments
            .into_iter()
            .next()
            .ok_or(InferenceError::NoBaseEnvironments)?;
        info!(id = %environment.id, "validation disabled, emitting the first environment");
        return Ok(InferenceOutcome {
            environment,
            num_validations: 0,
            elapsed_secs: started.elapsed().as_secs(),
            started_at,
            failed_validations: Vec::new(),
            starting_environments,
        });
    }

    let mut spreader = Spreader::new(
        environments,
        ctx.options.search,
        ctx.options.search_budget,
        graph,
        strategy,
    );

    let mut feedback: Option<ValidationRecord> = None;
    let mut failed: Vec<ValidationRecord> = Vec::new();
    let mut num_validations = 0usize;

    loop {
        let step = with_deadline(
            deadline,
            started,
            num_validations,
            spreader.advance(feedback.take()),
        )
        .await?;

        match step {
            SpreadStep::Yielded(environment) => {
                let commands = install_command_lines(&environment);
                let record = with_deadline(
                    deadline,
                    started,
                    num_validations,
                    sandboxes::validator::validate_environment(
                        &ctx.codebase,
                        &environment,
                        &commands,
                    ),
                )
                .await?;
                num_validations += 1;

                if record.is_success() {
                    info!(id = %environment.id, num_validations, "found a working environment");
                    return Ok(InferenceOutcome {
                        environment,
                        num_validations,
                        elapsed_secs: started.elapsed().as_secs(),
                        started_at,
                        failed_validations: failed,
                        starting_environments,
                    });
                }

                warn!(id = %environment.id, status = ?record.status_code, "candidate failed validation");
                if !failed.contains(&record) {
                    failed.push(record.clone());
                }
                feedback = Some(record);
            }
            SpreadStep::Done(metadata) => {
                let terminal_metadata = metadata
                    .into_iter()
                    .map(|entry| serde_json::to_value(entry).unwrap_or(serde_json::Value::Null))
                    .collect();
                return Err(InferenceError::NoWorkingEnvironment {
                    elapsed_secs: started.elapsed().as_secs(),
                    num_validations,
                    terminal_metadata,
                });
            }
        }
    }
}
