//! The mutator set: reversible single-dependency version
//! transformations, registered in precedence order.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use contracts::{Dependency, MutationKind, MutationRecord};
use systems::version::RelaxedVersion;
use systems::PackageSystem;
use tracing::warn;

/// A mutated dependency together with the record needed to reverse
/// it.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub dependency: Dependency,
    pub record: MutationRecord,
}

/// One reversible transformation over a single dependency.
#[async_trait]
pub trait Mutator: Send + Sync {
    fn kind(&self) -> MutationKind;

    /// Produce a mutated dependency, or None when no candidate
    /// version exists. Version-lookup failures are recovered locally
    /// as "no candidate".
    async fn apply(
        &self,
        dep: &Dependency,
        adapter: &dyn PackageSystem,
    ) -> Result<Option<MutationOutcome>>;

    /// Exact inverse: restore the version recorded as `from`.
    fn undo(&self, dep: &Dependency, record: &MutationRecord) -> Dependency {
        Dependency::new(dep.name.clone(), record.from.clone(), dep.system)
    }
}

/// The default precedence list searches iterate in order.
pub fn precedence() -> Vec<Arc<dyn Mutator>> {
    vec![Arc::new(DecrementSemverMajor), Arc::new(DecrementSemverMinor)]
}

async fn candidate_versions(dep: &Dependency, adapter: &dyn PackageSystem) -> Option<Vec<String>> {
    match adapter.available_versions(&dep.name).await {
        Ok(versions) => Some(adapter.sort_versions(&versions, false, None)),
        Err(err) => {
            warn!(package = %dep.name, error = %err, "version listing failed, mutator yields nothing");
            None
        }
    }
}

fn outcome(dep: &Dependency, kind: MutationKind, to: String) -> MutationOutcome {
    let record = MutationRecord::new(kind, dep.name.clone(), dep.version.clone(), to.clone());
    MutationOutcome {
        dependency: Dependency::new(dep.name.clone(), Some(to), dep.system),
        record,
    }
}

/// Newest available version strictly below `major.0.0`.
pub struct DecrementSemverMajor;

#[async_trait]
impl Mutator for DecrementSemverMajor {
    fn kind(&self) -> MutationKind {
        MutationKind::DecrementSemverMajor
    }

    async fn apply(
        &self,
        dep: &Dependency,
        adapter: &dyn PackageSystem,
    ) -> Result<Option<MutationOutcome>> {
        let Some(current) = &dep.version else {
            return Ok(None);
        };
        let current = RelaxedVersion::parse(current);
        if current.major() == 0 {
            return Ok(None);
        }
        let boundary = RelaxedVersion::parse(&format!("{}.0.0", current.major()));

        let Some(sorted) = candidate_versions(dep, adapter).await else {
            return Ok(None);
        };
        let chosen = sorted
            .into_iter()
            .find(|v| RelaxedVersion::parse(v).key_cmp(&boundary) == Ordering::Less);
        Ok(chosen.map(|to| outcome(dep, self.kind(), to)))
    }
}

/// Newest available version with the same major, strictly below
/// `major.minor.0`.
pub struct DecrementSemverMinor;

#[async_trait]
impl Mutator for DecrementSemverMinor {
    fn kind(&self) -> MutationKind {
        MutationKind::DecrementSemverMinor
    }

    async fn apply(
        &self,
        dep: &Dependency,
        adapter: &dyn PackageSystem,
    ) -> Result<Option<MutationOutcome>> {
        let Some(current) = &dep.version else {
            return Ok(None);
        };
        let current = RelaxedVersion::parse(current);
        if current.minor() == 0 {
            return Ok(None);
        }
        let boundary =
            RelaxedVersion::parse(&format!("{}.{}.0", current.major(), current.minor()));

        let Some(sorted) = candidate_versions(dep, adapter).await else {
            return Ok(None);
        };
        let chosen = sorted.into_iter().find(|v| {
            let parsed = RelaxedVersion::parse(v);
            parsed.major() == current.major() && parsed.key_cmp(&boundary) == Ordering::Less
        });
        Ok(chosen.map(|to| outcome(dep, self.kind(), to)))
    }
}

/// Version-matrix transitions, preferred over the generic decrements
/// when upgrade evidence exists for a dependency.
///
/// Targets are planned once per package and consumed in order; a
/// package with no remaining targets yields nothing so the search
/// falls through to the next mutator in precedence.
pub struct VersionMatrixMutator {
    plans: Mutex<HashMap<String, VecDeque<String>>>,
}

impl VersionMatrixMutator {
    pub fn new(plans: HashMap<String, VecDeque<String>>) -> Self {
        Self {
            plans: Mutex::new(plans),
        }
    }
}

#[async_trait]
impl Mutator for VersionMatrixMutator {
    fn kind(&self) -> MutationKind {
        MutationKind::VersionMatrixToVersion
    }

    async fn apply(
        &self,
        dep: &Dependency,
        _adapter: &dyn PackageSystem,
    ) -> Result<Option<MutationOutcome>> {
        let mut plans = self.plans.lock().expect("matrix plan lock poisoned");
        let Some(queue) = plans.get_mut(&dep.name) else {
            return Ok(None);
        };
        let Some(to) = queue.pop_front() else {
            return Ok(None);
        };
        Ok(Some(outcome(dep, self.kind(), to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::System;
    use serde_json::json;
    use serial_test::serial;
    use systems::cache::{CacheEntry, CachePartition};
    use systems::PipAdapter;

    /// Seed the pip cache so adapter lookups resolve offline.
    fn seed_pip(dir: &std::path::Path, package: &str, versions: &[&str]) {
        let mut partition = CachePartition::open(dir, "pip");
        partition.put(
            package,
            CacheEntry::new(json!({"name": package, "versions": versions}), None),
        );
        partition.persist().unwrap();
    }

    fn offline_env(dir: &std::path::Path) {
        std::env::set_var("ENVCTL_CACHE_DIR", dir.to_string_lossy().to_string());
        std::env::set_var("ENVCTL_PYPI_URL", "http://127.0.0.1:1/pypi");
    }

    fn reset_env() {
        std::env::remove_var("ENVCTL_CACHE_DIR");
        std::env::remove_var("ENVCTL_PYPI_URL");
    }

    #[tokio::test]
    #[serial]
    async fn minor_decrement_finds_previous_minor() {
        let dir = tempfile::tempdir().unwrap();
        seed_pip(
            dir.path(),
            "scikit-learn",
            &["0.20.3", "0.20.0", "0.19.2", "0.19.1", "0.18.0"],
        );
        offline_env(dir.path());

        let adapter = PipAdapter::new();
        let dep = Dependency::new("scikit-learn", Some("0.20.3".into()), System::Pip);
        let outcome = DecrementSemverMinor
            .apply(&dep, &adapter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.dependency.version.as_deref(), Some("0.19.2"));
        assert_eq!(outcome.record.kind, MutationKind::DecrementSemverMinor);
        assert_eq!(outcome.record.from.as_deref(), Some("0.20.3"));

        let undone = DecrementSemverMinor.undo(&outcome.dependency, &outcome.record);
        assert_eq!(undone, dep);

        reset_env();
    }

    #[tokio::test]
    #[serial]
    async fn major_decrement_crosses_the_major_boundary() {
        let dir = tempfile::tempdir().unwrap();
        seed_pip(dir.path(), "tensorflow", &["2.1.0", "2.0.0", "1.15.2", "1.14.0"]);
        offline_env(dir.path());

        let adapter = PipAdapter::new();
        let dep = Dependency::new("tensorflow", Some("2.1.0".into()), System::Pip);
        let outcome = DecrementSemverMajor
            .apply(&dep, &adapter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.dependency.version.as_deref(), Some("1.15.2"));

        reset_env();
    }

    #[tokio::test]
    #[serial]
    async fn zero_major_and_zero_minor_produce_nothing() {
        let dir = tempfile::tempdir().unwrap();
        seed_pip(dir.path(), "alpha", &["0.5.0", "0.4.0"]);
        offline_env(dir.path());

        let adapter = PipAdapter::new();
        let zero_major = Dependency::new("alpha", Some("0.5.0".into()), System::Pip);
        assert!(DecrementSemverMajor
            .apply(&zero_major, &adapter)
            .await
            .unwrap()
            .is_none());

        let zero_minor = Dependency::new("alpha", Some("1.0.3".into()), System::Pip);
        assert!(DecrementSemverMinor
            .apply(&zero_minor, &adapter)
            .await
            .unwrap()
            .is_none());

        reset_env();
    }

    #[tokio::test]
    #[serial]
    async fn lookup_failures_are_recovered_as_no_candidate() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing seeded: the adapter will fail against the
        // unreachable index.
        offline_env(dir.path());

        let adapter = PipAdapter::new();
        let dep = Dependency::new("ghost", Some("1.2.0".into()), System::Pip);
        assert!(DecrementSemverMinor
            .apply(&dep, &adapter)
            .await
            .unwrap()
            .is_none());

        reset_env();
    }

    #[tokio::test]
    async fn matrix_mutator_consumes_planned_targets_in_order() {
        let mut plans = HashMap::new();
        plans.insert(
            "keras".to_string(),
            VecDeque::from(["2.1.6".to_string(), "2.0.8".to_string()]),
        );
        let mutator = VersionMatrixMutator::new(plans);

        // No adapter lookups happen; a stub adapter would do, but the
        // registry adapter is inert here.
        let adapter = PipAdapter::new();
        let dep = Dependency::new("keras", Some("2.2.4".into()), System::Pip);

        let first = mutator.apply(&dep, &adapter).await.unwrap().unwrap();
        assert_eq!(first.dependency.version.as_deref(), Some("2.1.6"));
        assert_eq!(first.record.kind, MutationKind::VersionMatrixToVersion);

        let second = mutator.apply(&first.dependency, &adapter).await.unwrap().unwrap();
        assert_eq!(second.dependency.version.as_deref(), Some("2.0.8"));
        assert_eq!(second.record.from.as_deref(), Some("2.1.6"));

        assert!(mutator.apply(&second.dependency, &adapter).await.unwrap().is_none());

        let other = Dependency::new("numpy", Some("1.16.4".into()), System::Pip);
        assert!(mutator.apply(&other, &adapter).await.unwrap().is_none());
    }
}
