//! Level-order traversal of the mutation tree.
//!
//! The frontier starts as the root alone. Each level yields every
//! frontier entry, then branches it across every (mutator, dependency
//! index) pair, deep-cloning per branch. Validation feedback is
//! received but does not steer the traversal.

use anyhow::Result;
use contracts::Environment;
use tracing::debug;

use crate::mutate::precedence;
use crate::search::{Emitter, TerminalMetadata};

pub const DEFAULT_LEVELS: usize = 10;

pub async fn run(
    mut emitter: Emitter,
    root: Environment,
    levels: usize,
    budget: usize,
) -> Result<Option<TerminalMetadata>> {
    let mutators = precedence();
    let mut frontier = vec![root];
    let mut yielded = 0usize;

    for level in 0..levels {
        for env in &frontier {
            if yielded >= budget {
                return Ok(None);
            }
            emitter.emit(env.clone()).await?;
            yielded += 1;
        }

        if level + 1 == levels {
            break;
        }

        let mut next = Vec::new();
        for env in &frontier {
            for mutator in &mutators {
                for index in 0..env.dependencies.len() {
                    let adapter = systems::adapter_for(env.dependencies[index].system);
                    if let Some(outcome) =
                        mutator.apply(&env.dependencies[index], adapter.as_ref()).await?
                    {
                        let mut child = env.clone();
                        child.apply_mutation(index, outcome.dependency, outcome.record);
                        next.push(child);
                    }
                }
            }
        }

        if next.is_empty() {
            debug!(level, "level-order frontier emptied");
            break;
        }
        frontier = next;
    }

    Ok(None)
}
