use anyhow::{Context, Result};
use async_trait::async_trait;
use contracts::{CommandSpec, Dependency, System};
use reqwest::header::{HeaderValue, ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::{cache_root, CacheEntry, CachePartition};
use crate::PackageSystem;

/// Cached package definitions go stale after an hour and are
/// revalidated with a conditional GET.
const CACHE_TTL_SECS: i64 = 3_600;

const PARTITION: &str = "pip";

/// Adapter for the Python package repository.
pub struct PipAdapter {
    client: Client,
    index_url: String,
}

impl PipAdapter {
    pub fn new() -> Self {
        let index_url = std::env::var("ENVCTL_PYPI_URL")
            .unwrap_or_else(|_| "https://pypi.org/pypi".to_string());
        Self {
            client: Client::new(),
            index_url,
        }
    }

    /// Fetch or revalidate the cached definition for a normalized
    /// name. The definition holds the canonical package name and its
    /// version list in upstream order; unknown packages cache an
    /// empty version list.
    async fn package_definition(&self, normalized: &str) -> Result<Value> {
        let mut partition = CachePartition::open(&cache_root(), PARTITION);

        if let Some(entry) = partition.fresh(normalized, CACHE_TTL_SECS) {
            debug!(package = normalized, "package definition served from cache");
            return Ok(entry.definition.clone());
        }

        let url = format!("{}/{}/json", self.index_url, normalized);
        let mut request = self.client.get(&url);
        let stale_etag = partition
            .get(normalized)
            .and_then(|entry| entry.etag.clone());
        if let Some(etag) = &stale_etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                request = request.header(IF_NONE_MATCH, value);
            }
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("package index request failed for {}", normalized))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                debug!(package = normalized, "package index revalidated cache entry");
                partition.touch(normalized);
                partition.persist()?;
                let entry = partition
                    .get(normalized)
                    .context("not-modified response without a cached entry")?;
                Ok(entry.definition.clone())
            }
            StatusCode::NOT_FOUND => {
                debug!(package = normalized, "package index has no such package");
                let definition = json!({"name": normalized, "versions": []});
                partition.put(normalized, CacheEntry::new(definition.clone(), None));
                partition.persist()?;
                Ok(definition)
            }
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body: Value = response
                    .json()
                    .await
                    .with_context(|| format!("package index sent bad JSON for {}", normalized))?;
                let definition = definition_from_index(normalized, &body);
                partition.put(normalized, CacheEntry::new(definition.clone(), etag));
                partition.persist()?;
                Ok(definition)
            }
            status => {
                anyhow::bail!("package index returned {} for {}", status, normalized)
            }
        }
    }
}

impl Default for PipAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduce an index response to the cached shape: canonical name plus
/// release keys in the order the index lists them.
fn definition_from_index(normalized: &str, body: &Value) -> Value {
    let name = body
        .pointer("/info/name")
        .and_then(Value::as_str)
        .unwrap_or(normalized);
    let versions: Vec<&str> = body
        .get("releases")
        .and_then(Value::as_object)
        .map(|releases| releases.keys().map(String::as_str).collect())
        .unwrap_or_default();
    json!({"name": name, "versions": versions})
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
impl PackageSystem for PipAdapter {
    fn system(&self) -> System {
        System::Pip
    }

    /// PEP 503: case-fold and collapse runs of `-`, `_`, `.` into a
    /// single dash.
    fn normalize_name(&self, name: &str) -> String {
        let mut normalized = String::with_capacity(name.len());
        let mut last_was_separator = false;
        for c in name.trim().chars() {
            if matches!(c, '-' | '_' | '.') {
                if !last_was_separator {
                    normalized.push('-');
                }
                last_was_separator = true;
            } else {
                for lower in c.to_lowercase() {
                    normalized.push(lower);
                }
                last_was_separator = false;
            }
        }
        normalized
    }

    async fn available_versions(&self, name: &str) -> Result<Vec<String>> {
        let normalized = self.normalize_name(name);
        let definition = self.package_definition(&normalized).await?;
        Ok(definition_versions(&definition))
    }

    async fn exact_match(&self, name: &str, version: Option<&str>) -> Result<Option<Dependency>> {
        let normalized = self.normalize_name(name);
        let definition = match self.package_definition(&normalized).await {
            Ok(definition) => definition,
            Err(err) => {
                warn!(package = %normalized, error = %err, "exact-match lookup failed");
                return Ok(None);
            }
        };
        let versions = definition_versions(&definition);
        if versions.is_empty() {
            return Ok(None);
        }
        let canonical = definition
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&normalized)
            .to_string();

        match version {
            Some(requested) => {
                if versions.iter().any(|v| v == requested) {
                    Ok(Some(Dependency::new(
                        canonical,
                        Some(requested.to_string()),
                        System::Pip,
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
                Ok(newest.map(|v| Dependency::new(canonical, Some(v), System::Pip)))
            }
        }
    }

    fn install_command(&self, dep: &Dependency) -> CommandSpec {
        let target = match &dep.version {
            Some(version) => format!("{}=={}", dep.name, version),
            None => dep.name.clone(),
        };
        CommandSpec::new("pip", vec!["install".into(), target])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn normalization_is_pep503_and_idempotent() {
        let adapter = PipAdapter::new();
        assert_eq!(adapter.normalize_name("Flask"), "flask");
        assert_eq!(adapter.normalize_name("scikit_learn"), "scikit-learn");
        assert_eq!(adapter.normalize_name("zope.interface"), "zope-interface");
        assert_eq!(adapter.normalize_name("a--__..b"), "a-b");
        let once = adapter.normalize_name("Scikit__Learn");
        assert_eq!(adapter.normalize_name(&once), once);
    }

    #[test]
    fn install_command_pins_when_versioned() {
        let adapter = PipAdapter::new();
        let pinned = Dependency::new("numpy", Some("1.16.4".into()), System::Pip);
        assert_eq!(
            adapter.install_command(&pinned).shell_line(),
            "pip install numpy==1.16.4"
        );
        let unpinned = Dependency::unpinned("numpy", System::Pip);
        assert_eq!(
            adapter.install_command(&unpinned).shell_line(),
            "pip install numpy"
        );
    }

    #[test]
    fn definition_keeps_upstream_release_order() {
        let body = serde_json::from_str::<Value>(
            r#"{"info": {"name": "numpy"},
                "releases": {"1.16.4": [], "1.9.0": [], "1.16.0": []}}"#,
        )
        .unwrap();
        let definition = definition_from_index("numpy", &body);
        assert_eq!(
            definition_versions(&definition),
            vec!["1.16.4".to_string(), "1.9.0".into(), "1.16.0".into()]
        );
    }

    #[tokio::test]
    #[serial]
    async fn fresh_cache_entries_skip_the_network() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("ENVCTL_CACHE_DIR", dir.path().to_string_lossy().to_string());

        let mut partition = CachePartition::open(dir.path(), PARTITION);
        partition.put(
            "numpy",
            CacheEntry::new(json!({"name": "numpy", "versions": ["1.16.4", "1.16.3"]}), None),
        );
        partition.persist().unwrap();

        // An unreachable index proves the lookup never leaves the cache.
        std::env::set_var("ENVCTL_PYPI_URL", "http://127.0.0.1:1/pypi");
        let adapter = PipAdapter::new();

        let first = adapter.available_versions("numpy").await.unwrap();
        let second = adapter.available_versions("NumPy").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["1.16.4".to_string(), "1.16.3".into()]);

        let matched = adapter.exact_match("numpy", None).await.unwrap().unwrap();
        assert_eq!(matched.version.as_deref(), Some("1.16.4"));

        std::env::remove_var("ENVCTL_PYPI_URL");
        std::env::remove_var("ENVCTL_CACHE_DIR");
    }

    #[tokio::test]
    #[serial]
    async fn exact_match_misses_on_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("ENVCTL_CACHE_DIR", dir.path().to_string_lossy().to_string());

        let mut partition = CachePartition::open(dir.path(), PARTITION);
        partition.put(
            "numpy",
            CacheEntry::new(json!({"name": "numpy", "versions": ["1.16.4"]}), None),
        );
        partition.persist().unwrap();

        std::env::set_var("ENVCTL_PYPI_URL", "http://127.0.0.1:1/pypi");
        let adapter = PipAdapter::new();
        assert!(adapter
            .exact_match("numpy", Some("9.9.9"))
            .await
            .unwrap()
            .is_none());

        std::env::remove_var("ENVCTL_PYPI_URL");
        std::env::remove_var("ENVCTL_CACHE_DIR");
    }
}
