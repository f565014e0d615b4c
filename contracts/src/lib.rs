//! Shared data model and wire contracts for environment inference.
//!
//! Everything that crosses a crate or sandbox boundary lives here: the
//! candidate [`Environment`], pinned [`Dependency`] lists, reversible
//! [`MutationRecord`]s, the parser and validator sandbox schemas, and
//! the closed set of structured inference errors.

pub mod dependency;
pub mod environment;
pub mod error;
pub mod mutation;
pub mod parse;
pub mod validation;

pub use dependency::{CommandSpec, Dependency, System};
pub use environment::{Environment, EnvironmentMetadata, ImageRef, ResourceMapping};
pub use error::InferenceError;
pub use mutation::{Bookkeeping, MutationKind, MutationRecord};
pub use parse::{LanguageInfo, ParseReport, ParsedFile};
pub use validation::{
    ExecutionReport, InstallError, InstallReport, StackFrame, StatusCode, ValidationRecord,
};
