use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{CommandSpec, Environment, EnvironmentMetadata, ImageRef, ParseReport};
use tracing::{info, warn};
use uuid::Uuid;

use crate::runner::{self, CodebaseMount, SandboxInvocation};

/// Where the codebase is bind-mounted inside every sandbox.
pub const CONTAINER_WORKDIR: &str = "/app";

const PARSE_TIMEOUT: Duration = Duration::from_secs(120);
const SUPPORTED_EXTENSIONS: [&str; 2] = ["py", "ipynb"];

/// Parser sandbox identifiers for a language selection.
pub fn dialects_for(language: &str) -> Vec<String> {
    match language {
        "python" => vec!["python2".to_string(), "python3".to_string()],
        other => vec![other.to_string()],
    }
}

/// Run every parser sandbox for `language` against the codebase and
/// build one starting environment per successful parse.
///
/// Individual sandbox failures are logged and skipped; the caller
/// decides what zero environments means.
pub async fn parse_codebase(codebase: &Path, language: &str) -> Result<Vec<Environment>> {
    let registry = crate::image_registry();
    let mount_root = mount_root(codebase)?;

    let mut environments = Vec::new();
    for dialect in dialects_for(language) {
        let image = format!("{}/parser-{}", registry, dialect);
        let invocation = SandboxInvocation::new(image.clone(), vec![CONTAINER_WORKDIR.into()])
            .with_mount(CodebaseMount {
                host_path: mount_root.clone(),
                container_path: CONTAINER_WORKDIR.to_string(),
                read_only: true,
            })
            .with_timeout(PARSE_TIMEOUT);

        let report = match runner::run(&invocation).await {
            Ok(output) => match output.decode::<ParseReport>() {
                Ok(report) => report,
                Err(err) => {
                    warn!(%dialect, error = %err, "parser sandbox emitted a bad document, skipping");
                    continue;
                }
            },
            Err(err) => {
                warn!(%dialect, error = %err, "parser sandbox failed, skipping");
                continue;
            }
        };

        if let Err(err) = report.validate() {
            warn!(%dialect, error = %err, "parse report failed validation, skipping");
            continue;
        }

        match environment_from_parse(codebase, report) {
            Ok(env) => {
                info!(%dialect, id = %env.id, image = %env.image, "parsed starting environment");
                environments.push(env);
            }
            Err(err) => {
                warn!(%dialect, error = %err, "could not synthesize an environment, skipping");
            }
        }
    }

    Ok(environments)
}

/// The directory that gets bind-mounted: the codebase itself, or its
/// parent when the codebase is a single file.
fn mount_root(codebase: &Path) -> Result<PathBuf> {
    let canonical = codebase
        .canonicalize()
        .with_context(|| format!("codebase {} does not exist", codebase.display()))?;
    if canonical.is_dir() {
        Ok(canonical)
    } else {
        Ok(canonical
            .parent()
            .context("codebase file has no parent directory")?
            .to_path_buf())
    }
}

/// Build the starting environment for one successful parse.
pub fn environment_from_parse(codebase: &Path, report: ParseReport) -> Result<Environment> {
    let entry_file = entry_file(codebase)?;
    let entry_path = format!("{}/{}", CONTAINER_WORKDIR, entry_file);
    let entry_cmd = entry_command(&report, &entry_path);

    let image = ImageRef::new(
        report.language.name.clone(),
        report.language.version_major.to_string(),
    );

    Ok(Environment {
        id: Uuid::new_v4().to_string(),
        image,
        work_dir: CONTAINER_WORKDIR.to_string(),
        entry_cmd,
        setup_commands: vec![CommandSpec::new("apt-get", vec!["update".into()])],
        dependencies: Vec::new(),
        metadata: EnvironmentMetadata {
            parse: Some(report),
            ..EnvironmentMetadata::default()
        },
    })
}

/// Resolve the executable file from the codebase shape: a file is its
/// own entry; a directory needs exactly one candidate or a
/// `__main__.py`.
fn entry_file(codebase: &Path) -> Result<String> {
    if codebase.is_file() {
        return file_name(codebase);
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(codebase)
        .with_context(|| format!("cannot list codebase {}", codebase.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if SUPPORTED_EXTENSIONS.contains(&ext) {
            candidates.push(path);
        }
    }

    if candidates.len() == 1 {
        return file_name(&candidates[0]);
    }
    if let Some(main) = candidates
        .iter()
        .find(|p| p.file_name().map(|n| n == "__main__.py").unwrap_or(false))
    {
        return file_name(main);
    }
    anyhow::bail!(
        "codebase {} has no obvious entrypoint (a single file or a __main__.py)",
        codebase.display()
    )
}

fn file_name(path: &Path) -> Result<String> {
    Ok(path
        .file_name()
        .context("path has no file name")?
        .to_string_lossy()
        .to_string())
}

fn entry_command(report: &ParseReport, entry_path: &str) -> CommandSpec {
    if report.language.jupyter {
        CommandSpec::new(
            "jupyter",
            vec![
                "nbconvert".into(),
                "--to".into(),
                "notebook".into(),
                "--execute".into(),
                entry_path.to_string(),
            ],
        )
    } else {
        CommandSpec::new(report.language.name.clone(), vec![entry_path.to_string()])
    }
}
