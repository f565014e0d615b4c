//! Language-specific policies: exception ordering, repairability
//! classification, and blame assignment.

use contracts::{Environment, ExecutionReport, StackFrame, ValidationRecord};

/// Marker segment of the managed third-party install prefix. Frames
/// whose file path contains it belong to installed dependencies;
/// everything else is the code under inference.
const SITE_PACKAGES: &str = "/site-packages/";

const IMPORT_LIKE: [&str; 2] = ["ImportError", "ModuleNotFoundError"];
const REPAIR_ELIGIBLE: [&str; 2] = ["AttributeError", "TypeError"];
const UNREPAIRABLE: [&str; 2] = ["FileNotFoundError", "IOError"];

/// Which of two validations saw its exception earlier in execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPrecedence {
    Left,
    Right,
    /// Neither validation has a comparable exception, or the
    /// positions tie.
    Neither,
}

/// Pure predicates the feedback search asks of a language.
pub trait LanguageStrategy: Send + Sync {
    /// Compare the user-code positions of two exceptions; the smaller
    /// line of the deepest user-code frame wins.
    fn first_execution_exception(
        &self,
        left: &ValidationRecord,
        right: &ValidationRecord,
    ) -> ExceptionPrecedence;

    /// Whether changing dependency versions can plausibly eliminate
    /// the exception.
    fn is_repairable_version_error(&self, env: &Environment, validation: &ValidationRecord)
        -> bool;

    /// Index of the direct dependency blamed for the exception, or
    /// None when blame is unknown.
    fn dependency_producing_exception(
        &self,
        env: &Environment,
        validation: &ValidationRecord,
    ) -> Option<usize>;
}

/// Registry of per-language strategies.
pub fn strategy_for(language: &str) -> Option<Box<dyn LanguageStrategy>> {
    match language {
        "python" => Some(Box::new(PythonStrategy)),
        _ => None,
    }
}

pub struct PythonStrategy;

fn is_third_party(path: &str) -> bool {
    path.contains(SITE_PACKAGES)
}

/// Head component of a third-party frame's subpath below the install
/// prefix, e.g. `sklearn` for
/// `/usr/local/lib/python3.7/site-packages/sklearn/base.py`.
fn third_party_head(path: &str) -> Option<&str> {
    let start = path.find(SITE_PACKAGES)? + SITE_PACKAGES.len();
    path[start..].split('/').next().filter(|head| !head.is_empty())
}

/// Fold the separators both package names and module names use, so
/// `scikit_learn` and `scikit-learn` compare equal.
fn fold_separators(name: &str) -> String {
    name.to_lowercase().replace(['-', '.'], "_")
}

/// Deepest frame belonging to the code under inference.
fn deepest_user_frame(execution: &ExecutionReport) -> Option<&StackFrame> {
    execution
        .exception_stack
        .iter()
        .rev()
        .find(|frame| !is_third_party(&frame.filename))
}

/// The missing module named by an import-like exception message.
fn missing_resource(execution: &ExecutionReport) -> Option<String> {
    let message = execution.exception_message.as_deref()?;
    let tail = message.strip_prefix("No module named ")?;
    Some(tail.trim_matches(|c| c == '\'' || c == '"').to_string())
}

impl PythonStrategy {
    fn exception_kind<'a>(&self, validation: &'a ValidationRecord) -> Option<&'a str> {
        validation
            .execution_exception()
            .and_then(|exec| exec.exception_name.as_deref())
    }

    /// Direct-dependency indices the missing resource maps to through
    /// the recorded resource evidence, matched on head components.
    fn mapped_dependencies(&self, env: &Environment, resource: &str) -> Vec<usize> {
        let head = fold_separators(resource.split('.').next().unwrap_or(resource));
        let mut indices = Vec::new();
        for mapping in &env.metadata.resource_package_mapping {
            let mapped_head =
                fold_separators(mapping.resource.split('.').next().unwrap_or(&mapping.resource));
            if mapped_head == head {
                if let Some(index) = env.direct_dependency_index(&mapping.package) {
                    if !indices.contains(&index) {
                        indices.push(index);
                    }
                }
            }
        }
        indices
    }

    /// Dependency indices a third-party frame head can stand for:
    /// either the dependency's own name or a resource recorded as
    /// evidence for it.
    fn dependencies_for_head(&self, env: &Environment, head: &str) -> Vec<usize> {
        let folded = fold_separators(head);
        let mut indices = Vec::new();
        for (index, dep) in env.dependencies.iter().enumerate() {
            if fold_separators(&dep.name) == folded {
                indices.push(index);
            }
        }
        for index in self.mapped_dependencies(env, head) {
            if !indices.contains(&index) {
                indices.push(index);
            }
        }
        indices
    }
}

impl LanguageStrategy for PythonStrategy {
    fn first_execution_exception(
        &self,
        left: &ValidationRecord,
        right: &ValidationRecord,
    ) -> ExceptionPrecedence {
        let left_line = left
            .execution_exception()
            .and_then(deepest_user_frame)
            .and_then(|frame| frame.line);
        let right_line = right
            .execution_exception()
            .and_then(deepest_user_frame)
            .and_then(|frame| frame.line);

        match (left_line, right_line) {
            (Some(a), Some(b)) if a < b => ExceptionPrecedence::Left,
            (Some(a), Some(b)) if b < a => ExceptionPrecedence::Right,
            (Some(_), None) => ExceptionPrecedence::Left,
            (None, Some(_)) => ExceptionPrecedence::Right,
            _ => ExceptionPrecedence::Neither,
        }
    }

    fn is_repairable_version_error(
        &self,
        env: &Environment,
        validation: &ValidationRecord,
    ) -> bool {
        let Some(execution) = validation.execution_exception() else {
            return false;
        };
        let Some(kind) = self.exception_kind(validation) else {
            return false;
        };

        if UNREPAIRABLE.contains(&kind) {
            return false;
        }

        if execution
            .exception_stack
            .iter()
            .any(|frame| is_third_party(&frame.filename))
        {
            return true;
        }

        if IMPORT_LIKE.contains(&kind) {
            if let Some(resource) = missing_resource(execution) {
                if !self.mapped_dependencies(env, &resource).is_empty() {
                    return true;
                }
            }
        }

        REPAIR_ELIGIBLE.contains(&kind)
    }

    fn dependency_producing_exception(
        &self,
        env: &Environment,
        validation: &ValidationRecord,
    ) -> Option<usize> {
        let execution = validation.execution_exception()?;

        // Deepest third-party frame whose head names a direct
        // dependency wins.
        for frame in execution.exception_stack.iter().rev() {
            let Some(head) = third_party_head(&frame.filename) else {
                continue;
            };
            let indices = self.dependencies_for_head(env, head);
            if let [index] = indices[..] {
                return Some(index);
            }
            if !indices.is_empty() {
                return None;
            }
        }

        let kind = self.exception_kind(validation)?;
        let has_third_party = execution
            .exception_stack
            .iter()
            .any(|frame| is_third_party(&frame.filename));
        if IMPORT_LIKE.contains(&kind) && !has_third_party {
            let resource = missing_resource(execution)?;
            let indices = self.mapped_dependencies(env, &resource);
            if let [index] = indices[..] {
                return Some(index);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        CommandSpec, Dependency, EnvironmentMetadata, ExecutionReport, ImageRef, ResourceMapping,
        StackFrame, StatusCode, System,
    };

    fn env_with(deps: Vec<(&str, &str)>, mappings: Vec<(&str, &str)>) -> Environment {
        Environment {
            id: "env-0".into(),
            image: ImageRef::new("python", "3"),
            work_dir: "/app".into(),
            entry_cmd: CommandSpec::new("python", vec!["/app/snippet.py".into()]),
            setup_commands: vec![],
            dependencies: deps
                .into_iter()
                .map(|(name, version)| Dependency::new(name, Some(version.into()), System::Pip))
                .collect(),
            metadata: EnvironmentMetadata {
                resource_package_mapping: mappings
                    .into_iter()
                    .map(|(resource, package)| ResourceMapping {
                        resource: resource.into(),
                        package: package.into(),
                    })
                    .collect(),
                ..EnvironmentMetadata::default()
            },
        }
    }

    fn failed(name: &str, message: &str, stack: Vec<StackFrame>) -> ValidationRecord {
        ValidationRecord {
            status_code: StatusCode::Failed,
            dependencies: None,
            execution: Some(ExecutionReport {
                status_code: StatusCode::Exception,
                exception_name: Some(name.into()),
                exception_message: Some(message.into()),
                exception_file_name: stack.last().map(|f| f.filename.clone()),
                exception_line_number: stack.last().and_then(|f| f.line),
                exception_line: None,
                exception_stack: stack,
            }),
        }
    }

    fn user_frame(line: i64) -> StackFrame {
        StackFrame::new("/app/snippet.py", Some(line), "<module>", None)
    }

    fn sklearn_frame() -> StackFrame {
        StackFrame::new(
            "/usr/local/lib/python3.7/site-packages/sklearn/__init__.py",
            Some(64),
            "<module>",
            None,
        )
    }

    #[test]
    fn earlier_user_line_wins_precedence() {
        let strategy = PythonStrategy;
        let left = failed("ImportError", "x", vec![user_frame(2), sklearn_frame()]);
        let right = failed("NameError", "y", vec![user_frame(7)]);
        assert_eq!(
            strategy.first_execution_exception(&left, &right),
            ExceptionPrecedence::Left
        );
        assert_eq!(
            strategy.first_execution_exception(&right, &left),
            ExceptionPrecedence::Right
        );
    }

    #[test]
    fn equal_lines_tie_to_neither() {
        let strategy = PythonStrategy;
        let left = failed("ImportError", "x", vec![user_frame(3)]);
        let right = failed("AttributeError", "y", vec![user_frame(3)]);
        assert_eq!(
            strategy.first_execution_exception(&left, &right),
            ExceptionPrecedence::Neither
        );
    }

    #[test]
    fn timeouts_have_no_position() {
        let strategy = PythonStrategy;
        let timeout = ValidationRecord {
            status_code: StatusCode::Timeout,
            dependencies: None,
            execution: None,
        };
        let other = failed("ImportError", "x", vec![user_frame(1)]);
        assert_eq!(
            strategy.first_execution_exception(&timeout, &other),
            ExceptionPrecedence::Right
        );
        assert_eq!(
            strategy.first_execution_exception(&timeout, &timeout),
            ExceptionPrecedence::Neither
        );
    }

    #[test]
    fn third_party_frames_are_repairable() {
        let strategy = PythonStrategy;
        let env = env_with(vec![("scikit-learn", "0.20.3")], vec![]);
        let validation = failed("ImportError", "x", vec![user_frame(2), sklearn_frame()]);
        assert!(strategy.is_repairable_version_error(&env, &validation));
    }

    #[test]
    fn filesystem_errors_are_never_repairable() {
        let strategy = PythonStrategy;
        let env = env_with(vec![("scikit-learn", "0.20.3")], vec![]);
        let validation = failed(
            "FileNotFoundError",
            "missing.csv",
            vec![user_frame(2), sklearn_frame()],
        );
        assert!(!strategy.is_repairable_version_error(&env, &validation));
    }

    #[test]
    fn mapped_import_errors_are_repairable() {
        let strategy = PythonStrategy;
        let env = env_with(
            vec![("scikit-learn", "0.20.3")],
            vec![("sklearn.cross_validation", "scikit-learn")],
        );
        let validation = failed(
            "ImportError",
            "No module named 'sklearn.cross_validation'",
            vec![user_frame(1)],
        );
        assert!(strategy.is_repairable_version_error(&env, &validation));
    }

    #[test]
    fn unmapped_name_errors_are_not_repairable() {
        let strategy = PythonStrategy;
        let env = env_with(vec![("keras", "2.2.4")], vec![]);
        let validation = failed("NameError", "name 'x' is not defined", vec![user_frame(5)]);
        assert!(!strategy.is_repairable_version_error(&env, &validation));
    }

    #[test]
    fn blame_prefers_deepest_matching_third_party_frame() {
        let strategy = PythonStrategy;
        let env = env_with(
            vec![("numpy", "1.16.4"), ("scikit-learn", "0.20.3")],
            vec![("sklearn.cross_validation", "scikit-learn")],
        );
        let validation = failed(
            "ImportError",
            "cannot import name 'KFold'",
            vec![user_frame(2), sklearn_frame()],
        );
        assert_eq!(strategy.dependency_producing_exception(&env, &validation), Some(1));
    }

    #[test]
    fn blame_falls_back_to_unique_import_mapping() {
        let strategy = PythonStrategy;
        let env = env_with(
            vec![("numpy", "1.16.4"), ("scikit-learn", "0.20.3")],
            vec![("sklearn.cross_validation", "scikit-learn")],
        );
        let validation = failed(
            "ImportError",
            "No module named 'sklearn.cross_validation'",
            vec![user_frame(1)],
        );
        assert_eq!(strategy.dependency_producing_exception(&env, &validation), Some(1));
    }

    #[test]
    fn ambiguous_blame_is_unknown() {
        let strategy = PythonStrategy;
        let env = env_with(
            vec![("numpy", "1.16.4"), ("keras", "2.2.4")],
            vec![],
        );
        let validation = failed(
            "ImportError",
            "No module named 'pandas'",
            vec![user_frame(1)],
        );
        assert_eq!(strategy.dependency_producing_exception(&env, &validation), None);
    }
}
