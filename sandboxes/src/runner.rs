use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured stdout must fit in this many bytes; larger output is a
/// fatal error for the call.
pub const MAX_CAPTURED_OUTPUT: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to spawn container runtime '{runtime}': {source}")]
    Spawn {
        runtime: String,
        source: std::io::Error,
    },
    #[error("Sandbox i/o failure: {message}")]
    Io { message: String },
    #[error("Sandbox timed out after {duration:?}")]
    Timeout { duration: Duration },
    #[error("Sandbox produced more than {limit} bytes of output")]
    OutputTooLarge { limit: usize },
    #[error("Sandbox output violated its contract: {message}")]
    Malformed { message: String },
}

/// A bind mount of the codebase into the sandbox container.
#[derive(Debug, Clone)]
pub struct CodebaseMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// One sandbox container run.
#[derive(Debug, Clone)]
pub struct SandboxInvocation {
    pub image: String,
    pub args: Vec<String>,
    pub mount: Option<CodebaseMount>,
    pub timeout: Option<Duration>,
}

impl SandboxInvocation {
    pub fn new(image: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            image: image.into(),
            args,
            mount: None,
            timeout: None,
        }
    }

    pub fn with_mount(mut self, mount: CodebaseMount) -> Self {
        self.mount = Some(mount);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What came back from a sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl SandboxOutput {
    /// Decode stdout as the sandbox's single JSON document.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SandboxError> {
        serde_json::from_str(self.stdout.trim()).map_err(|err| SandboxError::Malformed {
            message: format!("invalid JSON on sandbox stdout: {}", err),
        })
    }
}

fn runtime_binary() -> String {
    env::var("ENVCTL_CONTAINER_RUNTIME").unwrap_or_else(|_| "docker".to_string())
}

fn stub_enabled() -> bool {
    runtime_binary().eq_ignore_ascii_case("stub")
}

/// Run one sandbox container and capture its output channels.
///
/// With `ENVCTL_CONTAINER_RUNTIME=stub` the container is not started;
/// stdout is read from the file named by `ENVCTL_STUB_OUTPUT` instead,
/// which lets the drivers run without a container daemon.
pub async fn run(invocation: &SandboxInvocation) -> Result<SandboxOutput, SandboxError> {
    if stub_enabled() {
        return run_stub(invocation);
    }

    let runtime = runtime_binary();
    let mut command = Command::new(&runtime);
    command.arg("run").arg("--rm");

    if let Some(mount) = &invocation.mount {
        let mode = if mount.read_only { "ro" } else { "rw" };
        command.arg("-v").arg(format!(
            "{}:{}:{}",
            mount.host_path.display(),
            mount.container_path,
            mode
        ));
    }

    command.arg(&invocation.image);
    for arg in &invocation.args {
        command.arg(arg);
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    debug!(image = %invocation.image, "starting sandbox container");

    let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
        runtime: runtime.clone(),
        source,
    })?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(read_capped(stdout_pipe));
    let stderr_task = tokio::spawn(read_capped(stderr_pipe));

    let status = match invocation.timeout {
        Some(duration) => match tokio::time::timeout(duration, child.wait()).await {
            Ok(waited) => waited.map_err(|err| SandboxError::Io {
                message: format!("failed to wait on sandbox: {}", err),
            })?,
            Err(_) => {
                warn!(image = %invocation.image, ?duration, "sandbox timed out, killing container");
                let _ = child.kill().await;
                return Err(SandboxError::Timeout { duration });
            }
        },
        None => child.wait().await.map_err(|err| SandboxError::Io {
            message: format!("failed to wait on sandbox: {}", err),
        })?,
    };

    let stdout = join_reader(stdout_task).await?;
    let stderr = join_reader(stderr_task).await?;

    debug!(
        image = %invocation.image,
        exit = ?status.code(),
        stdout_bytes = stdout.len(),
        "sandbox finished"
    );

    Ok(SandboxOutput {
        stdout,
        stderr,
        exit_code: status.code(),
    })
}

fn run_stub(invocation: &SandboxInvocation) -> Result<SandboxOutput, SandboxError> {
    let path = env::var("ENVCTL_STUB_OUTPUT").map_err(|_| SandboxError::Io {
        message: "stub runtime requires ENVCTL_STUB_OUTPUT to point at a stdout document"
            .to_string(),
    })?;
    let stdout = std::fs::read_to_string(&path).map_err(|err| SandboxError::Io {
        message: format!("failed to read stub output {}: {}", path, err),
    })?;
    debug!(image = %invocation.image, stub = %path, "stub sandbox run");
    Ok(SandboxOutput {
        stdout,
        stderr: String::new(),
        exit_code: Some(0),
    })
}

async fn read_capped<R>(pipe: Option<R>) -> Result<String, SandboxError>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    let mut limited = (&mut pipe).take(MAX_CAPTURED_OUTPUT as u64 + 1);
    limited
        .read_to_end(&mut buf)
        .await
        .map_err(|err| SandboxError::Io {
            message: format!("failed to read sandbox output: {}", err),
        })?;
    if buf.len() > MAX_CAPTURED_OUTPUT {
        return Err(SandboxError::OutputTooLarge {
            limit: MAX_CAPTURED_OUTPUT,
        });
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

async fn join_reader(
    task: tokio::task::JoinHandle<Result<String, SandboxError>>,
) -> Result<String, SandboxError> {
    task.await.map_err(|err| SandboxError::Io {
        message: format!("sandbox reader task failed: {}", err),
    })?
}
