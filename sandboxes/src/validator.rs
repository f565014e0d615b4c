use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{Environment, InferenceError, ValidationRecord};
use tracing::{debug, info};

use crate::parser::CONTAINER_WORKDIR;
use crate::runner::{self, CodebaseMount, SandboxError, SandboxInvocation};

/// Ceiling on each captured install-error stream.
pub const INSTALL_ERROR_LIMIT: usize = 1024;

const VALIDATE_TIMEOUT: Duration = Duration::from_secs(600);

/// Validation sandbox image for the environment's dialect and mode.
pub fn validator_image(env: &Environment, registry: &str) -> Result<String> {
    let parse = env
        .metadata
        .parse
        .as_ref()
        .context("environment carries no parse result")?;
    let dialect = format!("{}{}", parse.language.name, parse.language.version_major);
    if parse.language.jupyter {
        Ok(format!("{}/validator-jupyter-{}", registry, dialect))
    } else {
        Ok(format!("{}/validator-{}", registry, dialect))
    }
}

/// Run the validation sandbox for one candidate environment.
///
/// `install_commands` is the full ordered command list (setup first,
/// then one install per dependency); the sandbox receives it as a
/// single comma-separated string, executes it, runs the entry
/// command, and writes a validation record to stdout. The record is
/// returned as decoded, with install-error output truncated; a
/// protocol violation maps to [`InferenceError::ValidationError`].
pub async fn validate_environment(
    codebase: &Path,
    env: &Environment,
    install_commands: &[String],
) -> Result<ValidationRecord> {
    let registry = crate::image_registry();
    let image = validator_image(env, &registry)?;
    let commands = install_commands.join(",");

    debug!(id = %env.id, %image, commands = %commands, "validating environment");

    let invocation = SandboxInvocation::new(
        image,
        vec![CONTAINER_WORKDIR.to_string(), commands],
    )
    .with_mount(CodebaseMount {
        host_path: codebase
            .canonicalize()
            .with_context(|| format!("codebase {} does not exist", codebase.display()))?,
        container_path: CONTAINER_WORKDIR.to_string(),
        read_only: false,
    })
    .with_timeout(VALIDATE_TIMEOUT);

    let output = runner::run(&invocation).await.map_err(map_protocol_error)?;
    let mut record: ValidationRecord = output.decode().map_err(map_protocol_error)?;
    record.truncate_install_errors(INSTALL_ERROR_LIMIT);

    info!(id = %env.id, status = ?record.status_code, "validation finished");
    Ok(record)
}

fn map_protocol_error(err: SandboxError) -> anyhow::Error {
    match err {
        SandboxError::Malformed { message } => {
            anyhow::Error::new(InferenceError::ValidationError { message })
        }
        other => anyhow::Error::new(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        CommandSpec, EnvironmentMetadata, ImageRef, LanguageInfo, ParseReport, ParsedFile, System,
    };
    use serial_test::serial;

    fn environment(jupyter: bool) -> Environment {
        Environment {
            id: "env-test".into(),
            image: ImageRef::new("python", "3"),
            work_dir: "/app".into(),
            entry_cmd: CommandSpec::new("python", vec!["/app/snippet.py".into()]),
            setup_commands: vec![],
            dependencies: vec![],
            metadata: EnvironmentMetadata {
                parse: Some(ParseReport {
                    language: LanguageInfo {
                        name: "python".into(),
                        version: "3.7".into(),
                        version_major: 3,
                        version_minor: Some(7),
                        system: System::Pip,
                        jupyter,
                    },
                    num_files: 1,
                    files: vec![ParsedFile {
                        filename: "snippet.py".into(),
                        imports: vec![],
                    }],
                }),
                ..EnvironmentMetadata::default()
            },
        }
    }

    #[test]
    fn image_selection_tracks_dialect_and_mode() {
        assert_eq!(
            validator_image(&environment(false), "envctl").unwrap(),
            "envctl/validator-python3"
        );
        assert_eq!(
            validator_image(&environment(true), "envctl").unwrap(),
            "envctl/validator-jupyter-python3"
        );
    }

    #[tokio::test]
    #[serial]
    async fn stub_validation_decodes_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let codebase = dir.path().join("snippet.py");
        std::fs::write(&codebase, "print('hi')\n").unwrap();

        let long = "x".repeat(4096);
        let record = serde_json::json!({
            "status_code": "Failed",
            "dependencies": {
                "status_code": "Exception",
                "install_errors": [[long, ""]],
            },
            "execution": {"status_code": "Exception", "exception_name": "ImportError"},
        });
        let stub = dir.path().join("stub.json");
        std::fs::write(&stub, serde_json::to_vec(&record).unwrap()).unwrap();

        std::env::set_var("ENVCTL_CONTAINER_RUNTIME", "stub");
        std::env::set_var("ENVCTL_STUB_OUTPUT", stub.to_string_lossy().to_string());

        let decoded = validate_environment(
            &codebase,
            &environment(false),
            &["pip install numpy==1.16.4".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(
            decoded.dependencies.unwrap().install_errors[0].stdout.len(),
            INSTALL_ERROR_LIMIT
        );

        std::env::remove_var("ENVCTL_CONTAINER_RUNTIME");
        std::env::remove_var("ENVCTL_STUB_OUTPUT");
    }

    #[tokio::test]
    #[serial]
    async fn malformed_stub_output_is_a_protocol_violation() {
        let dir = tempfile::tempdir().unwrap();
        let codebase = dir.path().join("snippet.py");
        std::fs::write(&codebase, "print('hi')\n").unwrap();
        let stub = dir.path().join("stub.json");
        std::fs::write(&stub, b"not json at all").unwrap();

        std::env::set_var("ENVCTL_CONTAINER_RUNTIME", "stub");
        std::env::set_var("ENVCTL_STUB_OUTPUT", stub.to_string_lossy().to_string());

        let err = validate_environment(&codebase, &environment(false), &[])
            .await
            .unwrap_err();
        let structured = err.downcast::<InferenceError>().unwrap();
        assert_eq!(structured.name(), "ValidationError");

        std::env::remove_var("ENVCTL_CONTAINER_RUNTIME");
        std::env::remove_var("ENVCTL_STUB_OUTPUT");
    }
}
