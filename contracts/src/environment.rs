use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dependency::{CommandSpec, Dependency};
use crate::mutation::MutationRecord;
use crate::parse::ParseReport;
use crate::validation::ValidationRecord;

/// A container base image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Evidence pairing an imported resource with the package chosen to
/// satisfy it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub resource: String,
    pub package: String,
}

/// Inference bookkeeping carried alongside a candidate environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<ParseReport>,
    /// Direct dependencies in discovery order, before transitive
    /// expansion.
    #[serde(default)]
    pub direct_lookup: Vec<Dependency>,
    /// Evidence for each direct dependency, in the order resources
    /// resolved.
    #[serde(default)]
    pub resource_package_mapping: Vec<ResourceMapping>,
    /// Resources the driver failed to map to any package.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_resources: Vec<String>,
    /// Count of resources that resolved through the knowledge graph
    /// rather than trivially by their own name.
    #[serde(default)]
    pub name_resolutions: i64,
    /// Transitive dependencies in discovery order.
    #[serde(default)]
    pub transitive_lookup: Vec<Dependency>,
    /// Stack of mutations applied since the root environment.
    #[serde(default)]
    pub mutations: Vec<MutationRecord>,
    /// Checkpoints the feedback search considers resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_validations: Vec<ValidationRecord>,
}

/// One unit of inference work: a base image, setup steps, an ordered
/// pinned dependency list, and the entry command.
///
/// Environments are deep-cloned before mutation; the clone holding a
/// search's root stays untouched as the backtracking anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Stable label used in logs and sink keys.
    pub id: String,
    pub image: ImageRef,
    pub work_dir: String,
    pub entry_cmd: CommandSpec,
    /// Commands run before dependency installation, in order.
    #[serde(default)]
    pub setup_commands: Vec<CommandSpec>,
    /// Dependencies in intended installation order.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub metadata: EnvironmentMetadata,
}

impl Environment {
    /// Replace the dependency at `index`, recording the mutation on
    /// the metadata stack.
    pub fn apply_mutation(&mut self, index: usize, dependency: Dependency, record: MutationRecord) {
        self.dependencies[index] = dependency;
        self.metadata.mutations.push(record);
    }

    /// Pop the newest mutation and restore the dependency at `index`
    /// to the popped record's `from` version. Returns the record so
    /// the caller can recover its bookkeeping.
    pub fn undo_mutation(&mut self, index: usize) -> Option<MutationRecord> {
        let record = self.metadata.mutations.pop()?;
        if let Some(dep) = self.dependencies.get_mut(index) {
            dep.version = record.from.clone();
        }
        Some(record)
    }

    /// Index of the direct dependency whose name matches, if any.
    pub fn direct_dependency_index(&self, name: &str) -> Option<usize> {
        self.dependencies
            .iter()
            .position(|dep| dep.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::System;
    use crate::mutation::{MutationKind, MutationRecord};

    fn sample() -> Environment {
        Environment {
            id: "env-0".into(),
            image: ImageRef::new("python", "3"),
            work_dir: "/app".into(),
            entry_cmd: CommandSpec::new("python", vec!["/app/snippet.py".into()]),
            setup_commands: vec![],
            dependencies: vec![Dependency::new(
                "scikit-learn",
                Some("0.20.3".into()),
                System::Pip,
            )],
            metadata: EnvironmentMetadata::default(),
        }
    }

    #[test]
    fn apply_then_undo_restores_the_original() {
        let mut env = sample();
        let original = env.clone();

        let record = MutationRecord::new(
            MutationKind::DecrementSemverMinor,
            "scikit-learn",
            Some("0.20.3".into()),
            "0.19.2",
        );
        env.apply_mutation(
            0,
            Dependency::new("scikit-learn", Some("0.19.2".into()), System::Pip),
            record,
        );
        assert_eq!(env.dependencies[0].version.as_deref(), Some("0.19.2"));
        assert_eq!(env.metadata.mutations.len(), 1);

        env.undo_mutation(0);
        assert_eq!(env, original);
    }

    #[test]
    fn serializes_camel_case_metadata() {
        let env = sample();
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("workDir").is_some());
        assert!(json.get("entryCmd").is_some());
        assert!(json["metadata"].get("directLookup").is_some());
    }
}
