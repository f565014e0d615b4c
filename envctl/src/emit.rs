//! Artifact emission: render a successful inference as a container
//! recipe, an install-command list, or the raw metadata document.

use anyhow::Result;
use contracts::Environment;
use inference::{install_command_lines, InferenceOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Dockerfile,
    InstallCommands,
    Metadata,
}

pub fn render(outcome: &InferenceOutcome, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Dockerfile => Ok(dockerfile(&outcome.environment)),
        OutputFormat::InstallCommands => {
            Ok(install_command_lines(&outcome.environment).join("\n"))
        }
        OutputFormat::Metadata => Ok(serde_json::to_string_pretty(outcome)?),
    }
}

fn dockerfile(env: &Environment) -> String {
    let mut lines = Vec::new();
    lines.push(format!("FROM {}", env.image));
    lines.push(format!("WORKDIR {}", env.work_dir));
    lines.push(format!("COPY . {}", env.work_dir));
    for command in install_command_lines(env) {
        lines.push(format!("RUN {}", command));
    }

    let mut entry = vec![env.entry_cmd.command.clone()];
    entry.extend(env.entry_cmd.args.iter().cloned());
    let exec_form: Vec<String> = entry.iter().map(|part| format!("\"{}\"", part)).collect();
    lines.push(format!("CMD [{}]", exec_form.join(", ")));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{CommandSpec, Dependency, EnvironmentMetadata, ImageRef, System};

    fn outcome() -> InferenceOutcome {
        InferenceOutcome {
            environment: Environment {
                id: "env-0".into(),
                image: ImageRef::new("python", "3"),
                work_dir: "/app".into(),
                entry_cmd: CommandSpec::new("python", vec!["/app/snippet.py".into()]),
                setup_commands: vec![CommandSpec::new("apt-get", vec!["update".into()])],
                dependencies: vec![Dependency::new(
                    "numpy",
                    Some("1.16.4".into()),
                    System::Pip,
                )],
                metadata: EnvironmentMetadata::default(),
            },
            num_validations: 1,
            elapsed_secs: 12,
            started_at: Utc::now(),
            failed_validations: vec![],
            starting_environments: vec![],
        }
    }

    #[test]
    fn dockerfile_lists_setup_then_installs_then_entry() {
        let rendered = render(&outcome(), OutputFormat::Dockerfile).unwrap();
        let expected = "FROM python:3\n\
                        WORKDIR /app\n\
                        COPY . /app\n\
                        RUN apt-get update\n\
                        RUN pip install numpy==1.16.4\n\
                        CMD [\"python\", \"/app/snippet.py\"]";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn install_commands_render_one_per_line() {
        let rendered = render(&outcome(), OutputFormat::InstallCommands).unwrap();
        assert_eq!(rendered, "apt-get update\npip install numpy==1.16.4");
    }

    #[test]
    fn metadata_is_the_full_outcome_document() {
        let rendered = render(&outcome(), OutputFormat::Metadata).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(doc["numValidations"], 1);
        assert_eq!(doc["environment"]["image"]["name"], "python");
    }
}
