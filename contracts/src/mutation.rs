use serde::{Deserialize, Serialize};

/// The closed set of reversible transformations a search may apply to
/// a single dependency's pinned version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    DecrementSemverMajor,
    DecrementSemverMinor,
    VersionMatrixFromVersion,
    VersionMatrixToVersion,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::DecrementSemverMajor => "decrement_semver_major",
            MutationKind::DecrementSemverMinor => "decrement_semver_minor",
            MutationKind::VersionMatrixFromVersion => "version_matrix_from_version",
            MutationKind::VersionMatrixToVersion => "version_matrix_to_version",
        }
    }
}

/// Search-state indices a strategy needs to resume after an undo.
///
/// Opaque to everything but the strategy that produced the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bookkeeping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutator_index: Option<usize>,
}

impl Bookkeeping {
    pub fn is_empty(&self) -> bool {
        self.dependency_index.is_none() && self.mutator_index.is_none()
    }
}

/// One reversible version change applied to exactly one dependency.
///
/// Replaying a stack of records from the root environment reproduces
/// the current environment; applying `from` in reverse order restores
/// the root byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    #[serde(default, skip_serializing_if = "Bookkeeping::is_empty")]
    pub bookkeeping: Bookkeeping,
}

impl MutationRecord {
    pub fn new(
        kind: MutationKind,
        package: impl Into<String>,
        from: Option<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            package: package.into(),
            from,
            to: to.into(),
            bookkeeping: Bookkeeping::default(),
        }
    }

    pub fn with_bookkeeping(mut self, dependency_index: usize, mutator_index: usize) -> Self {
        self.bookkeeping = Bookkeeping {
            dependency_index: Some(dependency_index),
            mutator_index: Some(mutator_index),
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&MutationKind::DecrementSemverMinor).unwrap();
        assert_eq!(json, "\"decrement_semver_minor\"");
    }

    #[test]
    fn empty_bookkeeping_is_omitted() {
        let record = MutationRecord::new(
            MutationKind::DecrementSemverMajor,
            "scikit-learn",
            Some("0.20.3".into()),
            "0.19.2",
        );
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("bookkeeping").is_none());

        let annotated = record.with_bookkeeping(2, 0);
        let json = serde_json::to_value(&annotated).unwrap();
        assert_eq!(json["bookkeeping"]["dependency_index"], 2);
    }
}
