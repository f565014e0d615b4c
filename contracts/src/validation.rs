use serde::{Deserialize, Serialize};

/// Status codes shared by the validation record and its nested
/// install and execution reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    Failed,
    Timeout,
    UnknownException,
    Exception,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// Captured stdout/stderr of a failed install command.
///
/// On the wire this is a two-element array, matching the validator
/// sandbox output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct InstallError {
    pub stdout: String,
    pub stderr: String,
}

impl From<(String, String)> for InstallError {
    fn from((stdout, stderr): (String, String)) -> Self {
        Self { stdout, stderr }
    }
}

impl From<InstallError> for (String, String) {
    fn from(err: InstallError) -> Self {
        (err.stdout, err.stderr)
    }
}

/// Result of running the environment's install commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallReport {
    pub status_code: StatusCode,
    #[serde(default)]
    pub install_errors: Vec<InstallError>,
}

/// One traceback frame.
///
/// On the wire this is a four-element array
/// `[filename, line, fn, source]`, matching the validator sandbox
/// output; `line` and `source` may be null for synthesized syntax
/// error frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "FrameTuple", into = "FrameTuple")]
pub struct StackFrame {
    pub filename: String,
    pub line: Option<i64>,
    pub function: String,
    pub source: Option<String>,
}

type FrameTuple = (String, Option<i64>, String, Option<String>);

impl StackFrame {
    pub fn new(
        filename: impl Into<String>,
        line: Option<i64>,
        function: impl Into<String>,
        source: Option<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            line,
            function: function.into(),
            source,
        }
    }
}

impl From<FrameTuple> for StackFrame {
    fn from((filename, line, function, source): FrameTuple) -> Self {
        Self {
            filename,
            line,
            function,
            source,
        }
    }
}

impl From<StackFrame> for FrameTuple {
    fn from(frame: StackFrame) -> Self {
        (frame.filename, frame.line, frame.function, frame.source)
    }
}

/// Result of executing the snippet inside the validation sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_line_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_line: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exception_stack: Vec<StackFrame>,
}

/// The single JSON document a validation sandbox writes to stdout.
///
/// `execution` may be absent when the sandbox timed out before the
/// snippet ran. Records compare by value so the inference driver can
/// union failed validations as a set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<InstallReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

impl ValidationRecord {
    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }

    /// The execution report, but only when it carries an exception.
    pub fn execution_exception(&self) -> Option<&ExecutionReport> {
        self.execution
            .as_ref()
            .filter(|exec| exec.exception_name.is_some())
    }

    /// Deepest frame of the execution stack, if any.
    pub fn last_frame(&self) -> Option<&StackFrame> {
        self.execution
            .as_ref()
            .and_then(|exec| exec.exception_stack.last())
    }

    /// Truncate every captured install-error stream to `limit` bytes,
    /// respecting char boundaries.
    pub fn truncate_install_errors(&mut self, limit: usize) {
        if let Some(report) = &mut self.dependencies {
            for err in &mut report.install_errors {
                truncate_in_place(&mut err.stdout, limit);
                truncate_in_place(&mut err.stderr, limit);
            }
        }
    }
}

fn truncate_in_place(text: &mut String, limit: usize) {
    if text.len() > limit {
        let mut cut = limit;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
}
