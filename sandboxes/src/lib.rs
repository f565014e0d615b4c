//! Drivers for the container sandboxes that sit at the edges of the
//! inference pipeline.
//!
//! Each sandbox is a container image with a fixed stdout contract:
//! the parser emits a parse report, the validator emits a validation
//! record, and the version enumerator emits a JSON array of version
//! strings. The drivers here synthesize the container invocations,
//! enforce timeouts and output limits, and decode the documents.

pub mod images;
pub mod packaging;
pub mod parser;
pub mod runner;
pub mod validator;

pub use runner::{SandboxError, SandboxInvocation, SandboxOutput};

/// Registry prefix for sandbox images, e.g. `ghcr.io/acme/envctl`.
pub fn image_registry() -> String {
    std::env::var("ENVCTL_REGISTRY").unwrap_or_else(|_| "envctl".to_string())
}
