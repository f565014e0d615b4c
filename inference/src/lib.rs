//! The inference engine.
//!
//! Given a code location, discover a containerized environment the
//! snippet runs in: parse it for imported resources, resolve those
//! against the knowledge graph and package systems, then search the
//! space of version pinnings guided by validation feedback.

pub mod driver;
pub mod language;
pub mod mutate;
pub mod resolve;
pub mod search;

pub use driver::{
    infer, install_command_lines, InferenceContext, InferenceOptions, InferenceOutcome,
    DEFAULT_SEARCH_BUDGET, DEFAULT_TIME_BUDGET,
};
pub use language::{strategy_for, ExceptionPrecedence, LanguageStrategy, PythonStrategy};
pub use resolve::EdgeSelection;
pub use search::{SearchKind, TerminalMetadata, TerminalOutcome};
