//! Round-robin spreading of a per-root strategy across several
//! starting environments.
//!
//! Each root gets its own strategy coroutine and an equal share of
//! the yield budget. Turns rotate over the live coroutines: advance
//! one (handing it the validation for its previous yield), surface
//! its environment, move it to the tail. Completed coroutines leave
//! the rotation; their terminal metadata is collected and returned
//! once every root is done.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use contracts::{Environment, ValidationRecord};
use graphdb::KnowledgeGraph;
use tracing::debug;

use crate::language::LanguageStrategy;
use crate::search::iddfs::{self, IddfsOptions};
use crate::search::level::{self, DEFAULT_LEVELS};
use crate::search::{feedback, Generator, SearchKind, SearchStep, TerminalMetadata};

/// One step of the interleaved search.
#[derive(Debug)]
pub enum SpreadStep {
    Yielded(Environment),
    /// All roots finished; terminal metadata in root order.
    Done(Vec<Option<TerminalMetadata>>),
}

struct RootSlot {
    id: usize,
    generator: Generator,
    pending: Option<ValidationRecord>,
}

pub struct Spreader {
    slots: VecDeque<RootSlot>,
    collected: Vec<Option<TerminalMetadata>>,
    awaiting_feedback: Option<usize>,
    done: bool,
}

impl Spreader {
    /// Split `budget` evenly across the roots (rounding up) and
    /// instantiate one strategy coroutine per root.
    pub fn new(
        roots: Vec<Environment>,
        kind: SearchKind,
        budget: usize,
        graph: Arc<dyn KnowledgeGraph>,
        strategy: Arc<dyn LanguageStrategy>,
    ) -> Self {
        let count = roots.len().max(1);
        let per_root = budget.div_ceil(count);
        debug!(roots = roots.len(), per_root, "spreading search across roots");

        let mut slots = VecDeque::new();
        let mut collected = Vec::new();
        for (id, root) in roots.into_iter().enumerate() {
            let generator = match kind {
                SearchKind::LevelOrder => Generator::spawn(move |emitter| {
                    level::run(emitter, root, DEFAULT_LEVELS, per_root)
                }),
                SearchKind::IdDfs => Generator::spawn(move |emitter| {
                    iddfs::run(emitter, root, IddfsOptions::standalone(per_root))
                }),
                SearchKind::FeedbackDirected => {
                    let graph = graph.clone();
                    let strategy = strategy.clone();
                    Generator::spawn(move |emitter| {
                        feedback::run(emitter, root, per_root, graph, strategy)
                    })
                }
            };
            slots.push_back(RootSlot {
                id,
                generator,
                pending: None,
            });
            collected.push(None);
        }

        Self {
            slots,
            collected,
            awaiting_feedback: None,
            done: false,
        }
    }

    /// Advance the rotation by one yield. `feedback` carries the
    /// validation for the previously surfaced environment.
    pub async fn advance(&mut self, feedback: Option<ValidationRecord>) -> Result<SpreadStep> {
        if self.done {
            return Ok(SpreadStep::Done(self.collected.clone()));
        }

        if let Some(id) = self.awaiting_feedback.take() {
            if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
                slot.pending = feedback;
            }
        }

        loop {
            let Some(mut slot) = self.slots.pop_front() else {
                self.done = true;
                return Ok(SpreadStep::Done(self.collected.clone()));
            };

            match slot.generator.advance(slot.pending.take()).await? {
                SearchStep::Yielded(env) => {
                    self.awaiting_feedback = Some(slot.id);
                    self.slots.push_back(slot);
                    return Ok(SpreadStep::Yielded(env));
                }
                SearchStep::Done(metadata) => {
                    debug!(root = slot.id, "root search completed");
                    self.collected[slot.id] = metadata;
                }
            }
        }
    }
}
