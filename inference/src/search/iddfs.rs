//! Iterative-deepening DFS over the mutation space.
//!
//! One environment is mutated in place; exact undo restores it while
//! backtracking. Each depth pass explores chains of exactly `depth`
//! mutations; the search ends when the budget runs out or a full pass
//! yields nothing new.

use std::sync::Arc;

use anyhow::Result;
use contracts::Environment;
use tracing::debug;

use crate::mutate::{precedence, Mutator};
use crate::search::{Emitter, TerminalMetadata};

pub struct IddfsOptions {
    pub budget: usize,
    /// Restrict mutation to one dependency slot.
    pub slot: Option<usize>,
    /// Mutator precedence list; defaults to the registry order.
    pub mutators: Vec<Arc<dyn Mutator>>,
    /// Whether to yield the unmutated root before deepening. The
    /// standalone strategy does; secondary searches embedded in the
    /// feedback strategy skip it because the root was already
    /// validated.
    pub yield_root: bool,
}

impl IddfsOptions {
    pub fn standalone(budget: usize) -> Self {
        Self {
            budget,
            slot: None,
            mutators: precedence(),
            yield_root: true,
        }
    }

    pub fn dependency_scoped(slot: usize) -> Self {
        Self {
            budget: usize::MAX,
            slot: Some(slot),
            mutators: precedence(),
            yield_root: false,
        }
    }

    pub fn matrix_preferring(matrix: Arc<dyn Mutator>) -> Self {
        let mut mutators: Vec<Arc<dyn Mutator>> = vec![matrix];
        mutators.extend(precedence());
        Self {
            budget: usize::MAX,
            slot: None,
            mutators,
            yield_root: false,
        }
    }
}

fn lateral(dep_index: &mut usize, mut_index: &mut usize, num_mutators: usize) {
    *mut_index += 1;
    if *mut_index >= num_mutators {
        *mut_index = 0;
        *dep_index += 1;
    }
}

pub async fn run(
    mut emitter: Emitter,
    mut env: Environment,
    opts: IddfsOptions,
) -> Result<Option<TerminalMetadata>> {
    let mutators = opts.mutators;
    let (slot_start, slot_end) = match opts.slot {
        Some(slot) => (slot, slot + 1),
        None => (0, env.dependencies.len()),
    };

    let mut yielded = 0usize;
    if opts.yield_root {
        if yielded >= opts.budget {
            return Ok(None);
        }
        emitter.emit(env.clone()).await?;
        yielded += 1;
    }

    // Mutations below this mark belong to whoever handed us the
    // environment; backtracking never pops past it.
    let base_depth = env.metadata.mutations.len();

    let mut depth = 1usize;
    loop {
        let mut pass_yields = 0usize;
        let mut current_depth = 0usize;
        let mut dep_index = slot_start;
        let mut mut_index = 0usize;

        loop {
            if yielded >= opts.budget {
                return Ok(None);
            }

            if dep_index >= slot_end {
                if env.metadata.mutations.len() > base_depth {
                    // Backtrack: pop one mutation, undo it, resume the
                    // lateral scan from the popped record's indices.
                    let record = env
                        .metadata
                        .mutations
                        .pop()
                        .expect("mutation stack underflow");
                    let undo_dep = record.bookkeeping.dependency_index.unwrap_or(slot_start);
                    let undo_mut = record.bookkeeping.mutator_index.unwrap_or(0);
                    env.dependencies[undo_dep] =
                        mutators[undo_mut].undo(&env.dependencies[undo_dep], &record);
                    current_depth -= 1;
                    dep_index = undo_dep;
                    mut_index = undo_mut;
                    lateral(&mut dep_index, &mut mut_index, mutators.len());
                    continue;
                }
                break;
            }

            let adapter = systems::adapter_for(env.dependencies[dep_index].system);
            let applied = mutators[mut_index]
                .apply(&env.dependencies[dep_index], adapter.as_ref())
                .await?;

            match applied {
                Some(outcome) => {
                    let record = outcome.record.with_bookkeeping(dep_index, mut_index);
                    env.apply_mutation(dep_index, outcome.dependency, record);
                    current_depth += 1;

                    if current_depth == depth {
                        emitter.emit(env.clone()).await?;
                        yielded += 1;
                        pass_yields += 1;

                        // Undo the yielded push without re-emitting,
                        // then move laterally.
                        let record = env
                            .metadata
                            .mutations
                            .pop()
                            .expect("mutation stack underflow");
                        env.dependencies[dep_index] =
                            mutators[mut_index].undo(&env.dependencies[dep_index], &record);
                        current_depth -= 1;
                        lateral(&mut dep_index, &mut mut_index, mutators.len());
                    }
                }
                None => lateral(&mut dep_index, &mut mut_index, mutators.len()),
            }
        }

        if pass_yields == 0 {
            debug!(depth, "iddfs pass produced nothing new, search done");
            return Ok(None);
        }
        depth += 1;
    }
}
