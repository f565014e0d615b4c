use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::dependency::System;

/// Language metadata reported by a parser sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
    pub version_major: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_minor: Option<u32>,
    pub system: System,
    #[serde(default)]
    pub jupyter: bool,
}

/// One parsed source file and the resources it imports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedFile {
    pub filename: String,
    #[serde(default)]
    pub imports: Vec<String>,
}

/// The single JSON document a parser sandbox writes to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParseReport {
    pub language: LanguageInfo,
    pub num_files: u64,
    pub files: Vec<ParsedFile>,
}

impl ParseReport {
    /// Check internal consistency of a freshly decoded report.
    pub fn validate(&self) -> Result<()> {
        if self.language.name.is_empty() {
            anyhow::bail!("Parse report has an empty language name");
        }
        if self.num_files as usize != self.files.len() {
            anyhow::bail!(
                "Parse report num_files {} does not match {} file entries",
                self.num_files,
                self.files.len()
            );
        }
        Ok(())
    }

    /// Imported resources across all files, in first-seen order,
    /// deduplicated.
    pub fn imported_resources(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut resources = Vec::new();
        for file in &self.files {
            for import in &file.imports {
                if seen.insert(import.clone()) {
                    resources.push(import.clone());
                }
            }
        }
        resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(files: Vec<ParsedFile>) -> ParseReport {
        ParseReport {
            language: LanguageInfo {
                name: "python".into(),
                version: "3.7".into(),
                version_major: 3,
                version_minor: Some(7),
                system: System::Pip,
                jupyter: false,
            },
            num_files: files.len() as u64,
            files,
        }
    }

    #[test]
    fn decodes_sandbox_document() {
        let raw = r#"{
            "language": {"name": "python", "version": "3.7",
                         "version_major": 3, "system": "pip"},
            "num_files": 1,
            "files": [{"filename": "snippet.py", "imports": ["numpy"]}]
        }"#;
        let parsed: ParseReport = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.language.version_major, 3);
        assert!(!parsed.language.jupyter);
        assert_eq!(parsed.imported_resources(), vec!["numpy".to_string()]);
    }

    #[test]
    fn validate_rejects_file_count_mismatch() {
        let mut bad = report(vec![ParsedFile {
            filename: "a.py".into(),
            imports: vec![],
        }]);
        bad.num_files = 3;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn imported_resources_dedupes_in_order() {
        let parsed = report(vec![
            ParsedFile {
                filename: "a.py".into(),
                imports: vec!["numpy".into(), "scipy".into()],
            },
            ParsedFile {
                filename: "b.py".into(),
                imports: vec!["scipy".into(), "pandas".into()],
            },
        ]);
        assert_eq!(
            parsed.imported_resources(),
            vec!["numpy".to_string(), "scipy".into(), "pandas".into()]
        );
    }
}
