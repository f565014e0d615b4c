use std::time::Duration;

use anyhow::{Context, Result};
use contracts::System;
use tracing::debug;

use crate::runner::{self, SandboxInvocation};

const ENUMERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Image that enumerates available versions for one packaging system.
pub fn enumerator_image(system: System, registry: &str) -> String {
    format!("{}/versions-{}", registry, system)
}

/// Ask the packaging-system sandbox for every known version of
/// `package`, newest ordering as the packaging system reports it.
pub async fn enumerate_versions(system: System, package: &str) -> Result<Vec<String>> {
    let registry = crate::image_registry();
    let image = enumerator_image(system, &registry);
    debug!(%image, %package, "enumerating package versions");

    let invocation = SandboxInvocation::new(image, vec![package.to_string()])
        .with_timeout(ENUMERATE_TIMEOUT);
    let output = runner::run(&invocation)
        .await
        .with_context(|| format!("version enumeration failed for {} ({})", package, system))?;

    let versions: Vec<String> = output
        .decode()
        .with_context(|| format!("version enumerator emitted a bad document for {}", package))?;
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn image_name_includes_system() {
        assert_eq!(
            enumerator_image(System::Apt, "envctl"),
            "envctl/versions-apt"
        );
    }

    #[tokio::test]
    #[serial]
    async fn stub_enumeration_decodes_version_array() {
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("versions.json");
        std::fs::write(&stub, br#"["1.19.1-3", "1.16.2-1", "1:1.24.0"]"#).unwrap();

        std::env::set_var("ENVCTL_CONTAINER_RUNTIME", "stub");
        std::env::set_var("ENVCTL_STUB_OUTPUT", stub.to_string_lossy().to_string());

        let versions = enumerate_versions(System::Apt, "libblas-dev").await.unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[2], "1:1.24.0");

        std::env::remove_var("ENVCTL_CONTAINER_RUNTIME");
        std::env::remove_var("ENVCTL_STUB_OUTPUT");
    }
}
