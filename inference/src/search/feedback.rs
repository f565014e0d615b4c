//! Feedback-directed DFS, the primary strategy.
//!
//! The search resolves one execution exception at a time. The
//! validation of the unmutated root becomes the first checkpoint;
//! blame assignment picks the dependency to mutate, version-matrix
//! evidence drives its mutation plan, and generic iterative deepening
//! covers the cases with no usable blame or matrix. A checkpoint is
//! considered fixed when a later validation's exception falls
//! strictly after it in execution order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use contracts::{
    Dependency, Environment, MutationKind, MutationRecord, StatusCode, ValidationRecord,
};
use graphdb::KnowledgeGraph;
use tracing::{debug, info};

use crate::language::{ExceptionPrecedence, LanguageStrategy};
use crate::mutate::VersionMatrixMutator;
use crate::search::iddfs::{self, IddfsOptions};
use crate::search::{Emitter, Generator, SearchStep, TerminalMetadata, TerminalOutcome};

/// How a checkpoint classifies before any mutation decision.
enum Classification {
    Workable,
    Terminal(TerminalOutcome),
}

fn classify(
    strategy: &dyn LanguageStrategy,
    env: &Environment,
    checkpoint: &ValidationRecord,
) -> Classification {
    if checkpoint.status_code == StatusCode::Timeout {
        return Classification::Terminal(TerminalOutcome::Timeout);
    }
    if checkpoint.execution_exception().is_none() {
        return Classification::Terminal(TerminalOutcome::UnknownException);
    }
    if !strategy.is_repairable_version_error(env, checkpoint) {
        return Classification::Terminal(TerminalOutcome::NotRepairable);
    }
    Classification::Workable
}

/// Build the matrix mutation plan for one dependency: target versions
/// in the order the evidence ranks them, under the current version as
/// a strict upper cutoff. `None` means no matrix is present at all.
async fn matrix_plan(
    graph: &dyn KnowledgeGraph,
    dep: &Dependency,
) -> Result<Option<VecDeque<String>>> {
    if !graph.has_upgrades(&dep.name, dep.system).await? {
        return Ok(None);
    }
    let evidence = graph.upgrade_evidence(&dep.name, dep.system).await?;
    if evidence.is_empty() {
        return Ok(Some(VecDeque::new()));
    }

    // Multimap from -> [to], values already ordered by decreasing
    // percent_broken.
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for entry in &evidence {
        match groups.iter_mut().find(|(from, _)| *from == entry.from) {
            Some((_, targets)) => targets.push(entry.to.clone()),
            None => groups.push((entry.from.clone(), vec![entry.to.clone()])),
        }
    }

    let adapter = systems::adapter_for(dep.system);
    let keys: Vec<String> = groups.iter().map(|(from, _)| from.clone()).collect();
    let sorted_keys = adapter.sort_versions(&keys, false, dep.version.as_deref());

    let mut seen: HashSet<String> = HashSet::new();
    if let Some(current) = &dep.version {
        seen.insert(current.clone());
    }

    let mut plan = VecDeque::new();
    for key in sorted_keys {
        // The cutoff keeps keys <= current; the plan wants strictly
        // decreasing, so the current version itself is skipped.
        if Some(key.as_str()) == dep.version.as_deref() {
            continue;
        }
        if let Some((_, targets)) = groups.iter().find(|(from, _)| *from == key) {
            for target in targets {
                if seen.insert(target.clone()) {
                    plan.push_back(target.clone());
                }
            }
        }
    }
    Ok(Some(plan))
}

/// Matrix plans for every dependency of the environment, keyed by
/// package name, for the whole-environment fallback search.
async fn environment_matrix_plans(
    graph: &dyn KnowledgeGraph,
    env: &Environment,
) -> Result<HashMap<String, VecDeque<String>>> {
    let mut plans = HashMap::new();
    for dep in &env.dependencies {
        if let Some(plan) = matrix_plan(graph, dep).await? {
            if !plan.is_empty() {
                plans.insert(dep.name.clone(), plan);
            }
        }
    }
    Ok(plans)
}

pub async fn run(
    mut emitter: Emitter,
    root: Environment,
    budget: usize,
    graph: Arc<dyn KnowledgeGraph>,
    strategy: Arc<dyn LanguageStrategy>,
) -> Result<Option<TerminalMetadata>> {
    let mut env = root;
    let mut yielded = 0usize;
    let mut fixed: Vec<ValidationRecord> = Vec::new();

    let terminal = |outcome: TerminalOutcome,
                    checkpoint: Option<ValidationRecord>,
                    fixed: &[ValidationRecord]| {
        Some(TerminalMetadata {
            outcome,
            checkpoint,
            fixed_validations: fixed.to_vec(),
        })
    };

    // The first checkpoint is the validation of the unmutated root.
    if yielded >= budget {
        return Ok(Some(TerminalMetadata::exhausted()));
    }
    let Some(mut checkpoint) = emitter.emit(env.clone()).await? else {
        return Ok(terminal(TerminalOutcome::UnknownException, None, &fixed));
    };
    yielded += 1;

    // Per-checkpoint search state, reset whenever the checkpoint
    // advances.
    let mut visited: HashSet<usize> = HashSet::new();
    let mut queues: HashMap<usize, VecDeque<String>> = HashMap::new();
    let mut dep_iddfs: Option<Generator> = None;
    let mut env_iddfs: Option<Generator> = None;
    let mut last_feedback: Option<ValidationRecord> = None;

    loop {
        match classify(strategy.as_ref(), &env, &checkpoint) {
            Classification::Terminal(outcome) => {
                info!(?outcome, "feedback search terminating");
                return Ok(terminal(outcome, Some(checkpoint), &fixed));
            }
            Classification::Workable => {}
        }

        if yielded >= budget {
            return Ok(terminal(TerminalOutcome::Exhausted, Some(checkpoint), &fixed));
        }

        let blame = strategy.dependency_producing_exception(&env, &checkpoint);
        debug!(?blame, "blame assignment for current checkpoint");

        let candidate = match blame {
            Some(index) => {
                if visited.insert(index) {
                    if let Some(plan) = matrix_plan(graph.as_ref(), &env.dependencies[index]).await?
                    {
                        debug!(index, targets = plan.len(), "recorded matrix plan");
                        queues.insert(index, plan);
                    }
                }

                let next_target = queues.get_mut(&index).and_then(VecDeque::pop_front);
                match next_target {
                    Some(to) => {
                        let dep = env.dependencies[index].clone();
                        let record = MutationRecord::new(
                            MutationKind::VersionMatrixFromVersion,
                            dep.name.clone(),
                            dep.version.clone(),
                            to.clone(),
                        );
                        env.apply_mutation(
                            index,
                            Dependency::new(dep.name, Some(to), dep.system),
                            record,
                        );
                        env.clone()
                    }
                    None => {
                        let generator = dep_iddfs.get_or_insert_with(|| {
                            let seed = env.clone();
                            Generator::spawn(move |inner| {
                                iddfs::run(inner, seed, IddfsOptions::dependency_scoped(index))
                            })
                        });
                        match generator.advance(last_feedback.take()).await? {
                            SearchStep::Yielded(next) => next,
                            SearchStep::Done(_) => {
                                return Ok(terminal(
                                    TerminalOutcome::Exhausted,
                                    Some(checkpoint),
                                    &fixed,
                                ))
                            }
                        }
                    }
                }
            }
            None => {
                let step = match env_iddfs.as_mut() {
                    Some(generator) => generator.advance(last_feedback.take()).await?,
                    None => {
                        let plans = environment_matrix_plans(graph.as_ref(), &env).await?;
                        let matrix = Arc::new(VersionMatrixMutator::new(plans));
                        let seed = env.clone();
                        let mut generator = Generator::spawn(move |inner| {
                            iddfs::run(inner, seed, IddfsOptions::matrix_preferring(matrix))
                        });
                        let step = generator.advance(last_feedback.take()).await?;
                        env_iddfs = Some(generator);
                        step
                    }
                };
                match step {
                    SearchStep::Yielded(next) => next,
                    SearchStep::Done(_) => {
                        return Ok(terminal(TerminalOutcome::Exhausted, Some(checkpoint), &fixed))
                    }
                }
            }
        };

        // Optimistically record the checkpoint as fixed for the yield,
        // then take it back once the real verdict is in.
        env = candidate;
        fixed.push(checkpoint.clone());
        env.metadata.fixed_validations = fixed.clone();
        let response = emitter.emit(env.clone()).await?;
        yielded += 1;
        fixed.pop();
        env.metadata.fixed_validations = fixed.clone();

        let Some(new) = response else {
            return Ok(terminal(TerminalOutcome::UnknownException, Some(checkpoint), &fixed));
        };
        last_feedback = Some(new.clone());

        if new == checkpoint {
            // No progress; keep working the same checkpoint.
            continue;
        }

        if new.status_code == StatusCode::Timeout {
            return Ok(terminal(TerminalOutcome::Timeout, Some(new), &fixed));
        }
        if new.execution_exception().is_none() {
            return Ok(terminal(TerminalOutcome::UnknownException, Some(new), &fixed));
        }

        match strategy.first_execution_exception(&checkpoint, &new) {
            ExceptionPrecedence::Left => {
                // The checkpoint exception no longer fires first: it
                // is fixed. Advance to the new exception and reset the
                // per-checkpoint search state.
                info!("checkpoint resolved, advancing to the next exception");
                fixed.push(checkpoint.clone());
                env.metadata.fixed_validations = fixed.clone();
                checkpoint = new;
                visited.clear();
                queues.clear();
                dep_iddfs = None;
                env_iddfs = None;
            }
            ExceptionPrecedence::Right | ExceptionPrecedence::Neither => {
                // The new exception fires first or ties; the same
                // checkpoint still blocks us.
            }
        }
    }
}
