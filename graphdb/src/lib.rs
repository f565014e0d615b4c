//! Knowledge-graph resolver.
//!
//! The graph database records which packages provide which importable
//! resources, prerequisite edges between packages, and upgrade
//! evidence between versions. This crate exposes the four
//! parameterized queries the inference pipeline runs, over the
//! database's transactional Cypher HTTP endpoint.

pub mod client;
pub mod queries;

pub use client::CypherClient;
pub use queries::{GraphResolver, KnowledgeGraph, PackageCandidate, UpgradeEvidence};
