use anyhow::Result;
use async_trait::async_trait;
use contracts::{CommandSpec, Dependency, System};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::{cache_root, CacheEntry, CachePartition};
use crate::PackageSystem;

/// OS package listings move slowly; cache for a week. Refresh runs
/// the packaging-system sandbox to enumerate versions.
const CACHE_TTL_SECS: i64 = 604_800;

const PARTITION: &str = "apt";

/// Adapter for the OS-level package manager.
pub struct AptAdapter;

impl AptAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn package_versions(&self, normalized: &str) -> Result<Vec<String>> {
        let mut partition = CachePartition::open(&cache_root(), PARTITION);

        if let Some(entry) = partition.fresh(normalized, CACHE_TTL_SECS) {
            debug!(package = normalized, "version list served from cache");
            return Ok(definition_versions(&entry.definition));
        }

        let versions = sandboxes::packaging::enumerate_versions(System::Apt, normalized).await?;
        partition.put(
            normalized,
            CacheEntry::new(json!({"name": normalized, "versions": versions}), None),
        );
        partition.persist()?;
        Ok(versions)
    }
}

impl Default for AptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn definition_versions(definition: &Value) -> Vec<String> {
    definition
        .get("versions")
        .and_then(Value::as_array)
        .map(|versions| {
            versions
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl PackageSystem for AptAdapter {
    fn system(&self) -> System {
        System::Apt
    }

    fn normalize_name(&self, name: &str) -> String {
        name.trim().to_lowercase()
    }

    async fn available_versions(&self, name: &str) -> Result<Vec<String>> {
        let normalized = self.normalize_name(name);
        self.package_versions(&normalized).await
    }

    async fn exact_match(&self, name: &str, version: Option<&str>) -> Result<Option<Dependency>> {
        let normalized = self.normalize_name(name);
        let versions = match self.package_versions(&normalized).await {
            Ok(versions) => versions,
            Err(err) => {
                warn!(package = %normalized, error = %err, "exact-match lookup failed");
                return Ok(None);
            }
        };
        if versions.is_empty() {
            return Ok(None);
        }

        match version {
            Some(requested) => {
                if versions.iter().any(|v| v == requested) {
                    Ok(Some(Dependency::new(
                        normalized,
                        Some(requested.to_string()),
                        System::Apt,
                    )))
                } else {
                    Ok(None)
                }
            }
            None => {
                let newest = self
                    .sort_versions(&versions, false, None)
                    .into_iter()
                    .next();
                Ok(newest.map(|v| Dependency::new(normalized, Some(v), System::Apt)))
            }
        }
    }

    fn install_command(&self, dep: &Dependency) -> CommandSpec {
        let target = match &dep.version {
            Some(version) => format!("{}={}", dep.name, version),
            None => dep.name.clone(),
        };
        CommandSpec::new("apt-get", vec!["install".into(), "-y".into(), target])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn normalization_folds_case() {
        let adapter = AptAdapter::new();
        assert_eq!(adapter.normalize_name("  LibBLAS-Dev "), "libblas-dev");
    }

    #[test]
    fn install_command_uses_debian_pin_syntax() {
        let adapter = AptAdapter::new();
        let pinned = Dependency::new("curl", Some("7.64.0-4".into()), System::Apt);
        assert_eq!(
            adapter.install_command(&pinned).shell_line(),
            "apt-get install -y curl=7.64.0-4"
        );
    }

    #[tokio::test]
    #[serial]
    async fn enumerates_through_the_packaging_sandbox_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("ENVCTL_CACHE_DIR", dir.path().to_string_lossy().to_string());

        let stub = dir.path().join("versions.json");
        std::fs::write(&stub, br#"["7.64.0-4", "7.52.1-5"]"#).unwrap();
        std::env::set_var("ENVCTL_CONTAINER_RUNTIME", "stub");
        std::env::set_var("ENVCTL_STUB_OUTPUT", stub.to_string_lossy().to_string());

        let adapter = AptAdapter::new();
        let versions = adapter.available_versions("curl").await.unwrap();
        assert_eq!(versions, vec!["7.64.0-4".to_string(), "7.52.1-5".into()]);

        // A second call must come from the cache even if the sandbox
        // would now fail.
        std::fs::remove_file(&stub).unwrap();
        let cached = adapter.available_versions("Curl").await.unwrap();
        assert_eq!(cached, versions);

        let newest = adapter.exact_match("curl", None).await.unwrap().unwrap();
        assert_eq!(newest.version.as_deref(), Some("7.64.0-4"));

        std::env::remove_var("ENVCTL_CONTAINER_RUNTIME");
        std::env::remove_var("ENVCTL_STUB_OUTPUT");
        std::env::remove_var("ENVCTL_CACHE_DIR");
    }
}
