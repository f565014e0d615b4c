use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::info;

/// The fixed sandbox image set. Each entry names an image and its
/// build context directory relative to the repository root.
pub const IMAGE_SET: [(&str, &str); 7] = [
    ("parser-python2", "images/parser-python2"),
    ("parser-python3", "images/parser-python3"),
    ("validator-python2", "images/validator-python2"),
    ("validator-python3", "images/validator-python3"),
    ("validator-jupyter-python2", "images/validator-jupyter-python2"),
    ("validator-jupyter-python3", "images/validator-jupyter-python3"),
    ("versions-apt", "images/versions-apt"),
];

fn runtime_binary() -> String {
    std::env::var("ENVCTL_CONTAINER_RUNTIME").unwrap_or_else(|_| "docker".to_string())
}

/// `docker build` every sandbox image under the configured registry
/// prefix.
pub async fn build_all(repo_root: &Path) -> Result<()> {
    let registry = crate::image_registry();
    for (name, context) in IMAGE_SET {
        let tag = format!("{}/{}", registry, name);
        let context_dir = repo_root.join(context);
        info!(image = %tag, context = %context_dir.display(), "building sandbox image");
        run_runtime(&[
            "build",
            "-t",
            &tag,
            &context_dir.to_string_lossy(),
        ])
        .await
        .with_context(|| format!("build failed for image {}", tag))?;
    }
    Ok(())
}

/// `docker push` every sandbox image to the configured registry.
pub async fn push_all() -> Result<()> {
    let registry = crate::image_registry();
    for (name, _) in IMAGE_SET {
        let tag = format!("{}/{}", registry, name);
        info!(image = %tag, "pushing sandbox image");
        run_runtime(&["push", &tag])
            .await
            .with_context(|| format!("push failed for image {}", tag))?;
    }
    Ok(())
}

async fn run_runtime(args: &[&str]) -> Result<()> {
    let runtime = runtime_binary();
    let status = Command::new(&runtime)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .with_context(|| format!("failed to spawn container runtime '{}'", runtime))?;
    if !status.success() {
        anyhow::bail!("container runtime exited with {:?}", status.code());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_set_covers_both_dialects() {
        let names: Vec<&str> = IMAGE_SET.iter().map(|(name, _)| *name).collect();
        assert!(names.contains(&"parser-python2"));
        assert!(names.contains(&"parser-python3"));
        assert!(names.contains(&"validator-jupyter-python3"));
        assert!(names.contains(&"versions-apt"));
    }
}
