//! Search strategies over the mutation space.
//!
//! Every strategy is a producer task speaking a coroutine protocol:
//! it yields a candidate environment, receives the validation record
//! for that candidate on resumption, and eventually terminates with
//! an optional metadata payload. [`Generator`] is the consumer-side
//! handle; [`Emitter`] is the producer-side half the strategy
//! functions drive.

pub mod feedback;
pub mod iddfs;
pub mod level;
pub mod spread;

use std::future::Future;
use std::str::FromStr;

use anyhow::Result;
use contracts::{Environment, ValidationRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which strategy to instantiate per root environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    LevelOrder,
    IdDfs,
    FeedbackDirected,
}

impl FromStr for SearchKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "level-order" => Ok(SearchKind::LevelOrder),
            "id-dfs" => Ok(SearchKind::IdDfs),
            "feedback-directed" => Ok(SearchKind::FeedbackDirected),
            other => anyhow::bail!("unknown search strategy '{}'", other),
        }
    }
}

/// Why a strategy stopped before finding a working environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Timeout,
    UnknownException,
    NotRepairable,
    Exhausted,
}

/// Metadata a strategy returns on termination, distinct from any
/// yielded environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalMetadata {
    pub outcome: TerminalOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<ValidationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_validations: Vec<ValidationRecord>,
}

impl TerminalMetadata {
    pub fn exhausted() -> Self {
        Self {
            outcome: TerminalOutcome::Exhausted,
            checkpoint: None,
            fixed_validations: Vec::new(),
        }
    }
}

/// One step of a driven search.
#[derive(Debug)]
pub enum SearchStep {
    /// A candidate to validate; feed the result into the next
    /// `advance` call.
    Yielded(Environment),
    Done(Option<TerminalMetadata>),
}

/// Producer-side handle: yield candidates, await their validations.
pub struct Emitter {
    yields: mpsc::Sender<Environment>,
    feedback: mpsc::Receiver<Option<ValidationRecord>>,
}

impl Emitter {
    /// Yield `env` to the consumer and wait for its validation.
    /// Errors when the consumer has gone away, which ends the search.
    pub async fn emit(&mut self, env: Environment) -> Result<Option<ValidationRecord>> {
        self.yields
            .send(env)
            .await
            .map_err(|_| anyhow::anyhow!("search consumer dropped"))?;
        self.feedback
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("search consumer dropped"))
    }
}

/// Consumer-side handle over a spawned strategy task.
pub struct Generator {
    yields: mpsc::Receiver<Environment>,
    feedback: mpsc::Sender<Option<ValidationRecord>>,
    task: Option<JoinHandle<Result<Option<TerminalMetadata>>>>,
    started: bool,
    finished: Option<Option<TerminalMetadata>>,
}

impl Generator {
    /// Spawn a strategy body as the producer task.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Emitter) -> Fut,
        Fut: Future<Output = Result<Option<TerminalMetadata>>> + Send + 'static,
    {
        let (yield_tx, yield_rx) = mpsc::channel(1);
        let (feedback_tx, feedback_rx) = mpsc::channel(1);
        let emitter = Emitter {
            yields: yield_tx,
            feedback: feedback_rx,
        };
        let task = tokio::spawn(body(emitter));
        Self {
            yields: yield_rx,
            feedback: feedback_tx,
            task: Some(task),
            started: false,
            finished: None,
        }
    }

    /// Advance the strategy. `feedback` must carry the validation for
    /// the previously yielded environment on every call after the
    /// first.
    pub async fn advance(&mut self, feedback: Option<ValidationRecord>) -> Result<SearchStep> {
        if let Some(metadata) = &self.finished {
            return Ok(SearchStep::Done(metadata.clone()));
        }

        if self.started {
            // The producer may already have terminated; a closed
            // channel here is not an error.
            let _ = self.feedback.send(feedback).await;
        }
        self.started = true;

        match self.yields.recv().await {
            Some(env) => Ok(SearchStep::Yielded(env)),
            None => {
                let metadata = match self.task.take() {
                    Some(task) => task.await.map_err(|err| {
                        anyhow::anyhow!("search strategy task failed: {}", err)
                    })??,
                    None => None,
                };
                self.finished = Some(metadata.clone());
                Ok(SearchStep::Done(metadata))
            }
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        // Abandon any in-flight strategy work.
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CommandSpec, EnvironmentMetadata, ImageRef, StatusCode};

    fn env(id: &str) -> Environment {
        Environment {
            id: id.into(),
            image: ImageRef::new("python", "3"),
            work_dir: "/app".into(),
            entry_cmd: CommandSpec::new("python", vec!["/app/snippet.py".into()]),
            setup_commands: vec![],
            dependencies: vec![],
            metadata: EnvironmentMetadata::default(),
        }
    }

    fn success() -> ValidationRecord {
        ValidationRecord {
            status_code: StatusCode::Success,
            dependencies: None,
            execution: None,
        }
    }

    #[tokio::test]
    async fn generator_round_trips_yields_and_feedback() {
        let mut generator = Generator::spawn(|mut emitter: Emitter| async move {
            let feedback = emitter.emit(env("a")).await?;
            assert!(feedback.is_some());
            emitter.emit(env("b")).await?;
            Ok(Some(TerminalMetadata::exhausted()))
        });

        let SearchStep::Yielded(first) = generator.advance(None).await.unwrap() else {
            panic!("expected a yield");
        };
        assert_eq!(first.id, "a");

        let SearchStep::Yielded(second) = generator.advance(Some(success())).await.unwrap() else {
            panic!("expected a yield");
        };
        assert_eq!(second.id, "b");

        let SearchStep::Done(metadata) = generator.advance(Some(success())).await.unwrap() else {
            panic!("expected done");
        };
        assert_eq!(metadata.unwrap().outcome, TerminalOutcome::Exhausted);
    }

    #[tokio::test]
    async fn done_is_sticky() {
        let mut generator = Generator::spawn(|_emitter: Emitter| async move { Ok(None) });
        assert!(matches!(
            generator.advance(None).await.unwrap(),
            SearchStep::Done(None)
        ));
        assert!(matches!(
            generator.advance(None).await.unwrap(),
            SearchStep::Done(None)
        ));
    }

    #[test]
    fn search_kind_parses_cli_names() {
        assert_eq!(
            "feedback-directed".parse::<SearchKind>().unwrap(),
            SearchKind::FeedbackDirected
        );
        assert!("bogus".parse::<SearchKind>().is_err());
    }
}
