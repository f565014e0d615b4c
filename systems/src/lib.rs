//! Uniform adapters over the packaging ecosystems a dependency can
//! belong to.
//!
//! Every adapter knows how to normalize names, enumerate and order
//! versions, look up exact packages, and synthesize install commands.
//! Version listings go through the per-adapter cache partitions in
//! [`cache`]; ordering semantics live in [`version`].

use anyhow::Result;
use async_trait::async_trait;
use contracts::{CommandSpec, Dependency, System};

pub mod apt;
pub mod cache;
pub mod pip;
pub mod version;

pub use apt::AptAdapter;
pub use pip::PipAdapter;

/// Capability contract implemented per packaging ecosystem.
#[async_trait]
pub trait PackageSystem: Send + Sync {
    fn system(&self) -> System;

    /// Idempotent name normalization; adapters may fold case and
    /// unify separators.
    fn normalize_name(&self, name: &str) -> String;

    /// Every known version of `name` in canonical upstream order.
    /// Results are cached keyed by the normalized name.
    async fn available_versions(&self, name: &str) -> Result<Vec<String>>;

    /// Total order over the adapter's version semantics. With a
    /// cutoff, ascending keeps `v >= cutoff` and descending keeps
    /// `v <= cutoff`.
    fn sort_versions(
        &self,
        versions: &[String],
        ascending: bool,
        cutoff: Option<&str>,
    ) -> Vec<String> {
        version::sort(versions, ascending, cutoff)
    }

    /// A canonical dependency when a package of exactly that name
    /// exists; with no version requested, pinned to the newest
    /// available.
    async fn exact_match(&self, name: &str, version: Option<&str>) -> Result<Option<Dependency>>;

    /// The invocation that installs `dep`, pinned when a version is
    /// present.
    fn install_command(&self, dep: &Dependency) -> CommandSpec;
}

/// Adapter registry.
pub fn adapter_for(system: System) -> Box<dyn PackageSystem> {
    match system {
        System::Pip => Box::new(PipAdapter::new()),
        System::Apt => Box::new(AptAdapter::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_returns_matching_adapter() {
        assert_eq!(adapter_for(System::Pip).system(), System::Pip);
        assert_eq!(adapter_for(System::Apt).system(), System::Apt);
    }
}
