//! Sandboxed execution of a submission against an assignment's grader image.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use grader_common::{GradeReport, REPORT_DIR_NAME, SUBMISSION_MOUNT, read_report};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::workspace::WorkspacePath;
use crate::config::SandboxConfig;
use crate::errors::{GradeError, Stage};

/// Exit code the container runtime reports for a SIGKILLed container (OOM killer).
const KILLED_EXIT_CODE: i32 = 137;

/// Bytes of container stdout/stderr kept in memory and in error messages.
const OUTPUT_TAIL: usize = 2000;

/// Runs a fetched submission in isolation and returns its grade report.
/// Real implementation: `DockerSandbox`.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(&self, workspace: &WorkspacePath, assignment: &str) -> Result<GradeReport, GradeError>;
}

/// One container execution.
#[derive(Debug, Clone)]
pub struct SandboxRun {
    pub name: String,
    /// Absolute host path of the submission, mounted read-only.
    pub mount: PathBuf,
    pub assignment: String,
    pub image: String,
    pub cpus: String,
    pub memory: String,
}

impl SandboxRun {
    pub fn new(mount: PathBuf, assignment: &str, config: &SandboxConfig) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            name: format!("grader_{}", &suffix[..8]),
            mount,
            assignment: assignment.to_string(),
            image: config.image.clone(),
            cpus: config.cpus.clone(),
            memory: config.memory.clone(),
        }
    }

    /// Arguments for `<runtime> run`. The submission is read-only; only the
    /// report directory inside it is writable.
    pub fn run_args(&self) -> Vec<String> {
        let report_dir = self.mount.join(REPORT_DIR_NAME);
        vec![
            "run".into(),
            "--name".into(),
            self.name.clone(),
            "--cpus".into(),
            self.cpus.clone(),
            "--memory".into(),
            self.memory.clone(),
            "--memory-swap".into(),
            self.memory.clone(),
            "--network".into(),
            "none".into(),
            "-v".into(),
            format!("{}:{}:ro", self.mount.display(), SUBMISSION_MOUNT),
            "-v".into(),
            format!(
                "{}:{}/{}:rw",
                report_dir.display(),
                SUBMISSION_MOUNT,
                REPORT_DIR_NAME
            ),
            self.image.clone(),
            self.assignment.clone(),
        ]
    }
}

/// Container sandbox driven through the docker-compatible CLI.
pub struct DockerSandbox {
    config: SandboxConfig,
    cancel: CancellationToken,
}

impl DockerSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop a running container when `cancel` fires. The container is still
    /// removed before `execute` returns.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Give the grader an empty report directory. Anything the submission
    /// itself put there is discarded so it cannot pose as a report.
    async fn prepare_report_dir(&self, mount: &Path) -> Result<(), GradeError> {
        let report_dir = mount.join(REPORT_DIR_NAME);
        let workspace_err = |source| GradeError::Workspace {
            path: report_dir.clone(),
            source,
        };
        match tokio::fs::remove_dir_all(&report_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => {
                tokio::fs::remove_file(&report_dir).await.map_err(workspace_err)?;
            }
            Err(e) => return Err(workspace_err(e)),
        }
        tokio::fs::create_dir_all(&report_dir).await.map_err(workspace_err)
    }

    async fn run_container(&self, run: &SandboxRun) -> Result<(), GradeError> {
        let mut child = Command::new(&self.config.runtime)
            .args(run.run_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GradeError::SandboxUnavailable {
                runtime: self.config.runtime.clone(),
                source,
            })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = async {
            tokio::join!(
                child.wait(),
                read_tail(stdout, OUTPUT_TAIL),
                read_tail(stderr, OUTPUT_TAIL)
            )
        };
        let (status, stdout, stderr) = tokio::select! {
            waited = tokio::time::timeout(self.config.timeout(), finished) => match waited {
                Ok((Ok(status), stdout, stderr)) => (status, stdout, stderr),
                Ok((Err(source), _, _)) => {
                    return Err(GradeError::SandboxUnavailable {
                        runtime: self.config.runtime.clone(),
                        source,
                    });
                }
                Err(_) => {
                    return Err(GradeError::SandboxTimedOut {
                        container: run.name.clone(),
                        seconds: self.config.timeout_secs,
                    });
                }
            },
            _ = self.cancel.cancelled() => {
                return Err(GradeError::Cancelled { stage: Stage::Executed });
            }
        };

        tracing::debug!(
            container = %run.name,
            stdout = %String::from_utf8_lossy(&stdout),
            "sandbox output"
        );

        if status.success() {
            return Ok(());
        }
        if status.code() == Some(KILLED_EXIT_CODE) {
            return Err(GradeError::ResourceExhausted {
                container: run.name.clone(),
                memory: run.memory.clone(),
            });
        }
        let stderr = String::from_utf8_lossy(&stderr);
        let stderr = stderr.trim();
        let mut start = stderr.len().saturating_sub(OUTPUT_TAIL);
        while !stderr.is_char_boundary(start) {
            start += 1;
        }
        Err(GradeError::Execution {
            container: run.name.clone(),
            code: status.code(),
            stderr: stderr[start..].to_string(),
        })
    }

    /// Force-remove the container. Failures are logged, never returned.
    async fn teardown(&self, run: &SandboxRun) {
        let result = Command::new(&self.config.runtime)
            .args(["rm", "-f", &run.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        match result {
            Ok(output) if output.status.success() => {
                tracing::debug!(container = %run.name, "sandbox removed");
            }
            Ok(output) => {
                tracing::warn!(
                    container = %run.name,
                    kind = "cleanup",
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "failed to remove sandbox"
                );
            }
            Err(e) => {
                tracing::warn!(container = %run.name, kind = "cleanup", error = %e, "failed to remove sandbox");
            }
        }
    }
}

/// Drain `reader` to the end, keeping only its last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut tail = Vec::with_capacity(limit);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit * 2 {
                    tail.drain(..tail.len() - limit);
                }
            }
        }
    }
    if tail.len() > limit {
        tail.drain(..tail.len() - limit);
    }
    tail
}

#[async_trait]
impl SandboxExecutor for DockerSandbox {
    async fn execute(&self, workspace: &WorkspacePath, assignment: &str) -> Result<GradeReport, GradeError> {
        let mount = tokio::fs::canonicalize(workspace.path())
            .await
            .map_err(|source| GradeError::Workspace {
                path: workspace.path().to_path_buf(),
                source,
            })?;
        self.prepare_report_dir(&mount).await?;

        let run = SandboxRun::new(mount, assignment, &self.config);
        tracing::info!(
            container = %run.name,
            image = %run.image,
            assignment = %run.assignment,
            cpus = %run.cpus,
            memory = %run.memory,
            "starting sandbox"
        );

        let result = self.run_container(&run).await;
        self.teardown(&run).await;
        result?;

        let mount = run.mount.clone();
        let report = tokio::task::spawn_blocking(move || read_report(&mount))
            .await
            .map_err(|e| GradeError::Workspace {
                path: run.mount.clone(),
                source: std::io::Error::other(e),
            })??;
        Ok(report)
    }
}
