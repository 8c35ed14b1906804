use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use grader_common::GradeReport;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::event::PushNotification;
use super::fetcher::{GitFetcher, SourceFetcher};
use super::sandbox::{DockerSandbox, SandboxExecutor};
use super::workspace::{WorkspaceLocks, WorkspacePath};
use crate::config::GraderConfig;
use crate::errors::{GradeError, Stage};

/// Everything a background run needs, owned so it can outlive the request.
#[derive(Debug, Clone)]
pub struct GradeJob {
    pub push: PushNotification,
    pub workspace: WorkspacePath,
    pub assignment: String,
}

/// Final outcome of one run. Failed runs carry the error instead of a score.
#[derive(Debug)]
pub struct GradeResult {
    pub repository: String,
    pub commit: String,
    pub workspace: PathBuf,
    pub outcome: Result<GradeReport, GradeError>,
    pub finished_at: DateTime<Utc>,
}

impl GradeResult {
    pub fn score(&self) -> Option<i64> {
        self.outcome.as_ref().ok().map(|report| report.score)
    }

    pub fn is_graded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// `"graded"`, or the failure kind.
    pub fn status(&self) -> &'static str {
        match &self.outcome {
            Ok(_) => "graded",
            Err(e) => e.kind(),
        }
    }
}

/// Fetch → execute → parse → cleanup for one push at a time per workspace.
pub struct GradingPipeline {
    fetcher: Arc<dyn SourceFetcher>,
    sandbox: Arc<dyn SandboxExecutor>,
    locks: WorkspaceLocks,
    submissions_dir: PathBuf,
    assignment: String,
    results: broadcast::Sender<Arc<GradeResult>>,
    cancel: CancellationToken,
}

impl GradingPipeline {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        sandbox: Arc<dyn SandboxExecutor>,
        submissions_dir: PathBuf,
        assignment: &str,
    ) -> Self {
        let (results, _rx) = broadcast::channel(64);
        Self {
            fetcher,
            sandbox,
            locks: WorkspaceLocks::new(),
            submissions_dir,
            assignment: assignment.to_string(),
            results,
            cancel: CancellationToken::new(),
        }
    }

    /// Pipeline backed by `git` and the configured container runtime. Both
    /// stop early once [`GradingPipeline::cancel`] is called.
    pub fn from_config(config: &GraderConfig) -> Self {
        let cancel = CancellationToken::new();
        let fetcher = GitFetcher::new(config.fetch_timeout()).with_cancellation(cancel.clone());
        let sandbox = DockerSandbox::new(config.sandbox.clone()).with_cancellation(cancel.clone());
        Self::new(
            Arc::new(fetcher),
            Arc::new(sandbox),
            config.submissions_dir.clone(),
            &config.assignment,
        )
        .with_cancellation(cancel)
    }

    /// Use `cancel` as the token fired by [`GradingPipeline::cancel`]. The
    /// fetcher and sandbox must watch the same token to stop early.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token shared with the fetcher and sandbox built by `from_config`.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cut in-flight runs short. Each still removes its container and
    /// workspace before finishing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Receive every finished `GradeResult`.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GradeResult>> {
        self.results.subscribe()
    }

    pub fn job_for(&self, push: PushNotification) -> GradeJob {
        let workspace = WorkspacePath::new(&self.submissions_dir, &push.owner, push.short_commit());
        GradeJob {
            push,
            workspace,
            assignment: self.assignment.clone(),
        }
    }

    /// Run one job to completion. Never fails: errors end up in the result
    /// and the log. The workspace is gone when this returns.
    pub async fn run(&self, job: GradeJob) -> Arc<GradeResult> {
        let span = tracing::info_span!(
            "grade",
            repo = %job.push.repository,
            commit = %job.push.short_commit(),
        );
        async move {
            let _guard = self.locks.acquire(&job.workspace).await;

            let outcome = self.fetch_and_grade(&job).await;
            self.cleanup(&job.workspace).await;

            match &outcome {
                Ok(report) => tracing::info!(
                    score = report.score,
                    details = %serde_json::Value::Object(report.details.clone()),
                    "graded"
                ),
                Err(e) => tracing::error!(
                    kind = e.kind(),
                    stage = %e.stage(),
                    error = %e,
                    "grading failed"
                ),
            }

            let result = Arc::new(GradeResult {
                repository: job.push.repository.clone(),
                commit: job.push.commit.clone(),
                workspace: job.workspace.path().to_path_buf(),
                outcome,
                finished_at: Utc::now(),
            });
            // No subscribers is fine.
            let _ = self.results.send(Arc::clone(&result));
            result
        }
        .instrument(span)
        .await
    }

    async fn fetch_and_grade(&self, job: &GradeJob) -> Result<GradeReport, GradeError> {
        tracing::info!(workspace = %job.workspace, url = %job.push.clone_url, "fetching submission");
        self.fetcher
            .fetch(&job.push.clone_url, &job.push.commit, &job.workspace)
            .await?;
        tracing::debug!(stage = %Stage::Fetched, "stage complete");

        let report = self.sandbox.execute(&job.workspace, &job.assignment).await?;
        tracing::debug!(stage = %Stage::Parsed, "stage complete");
        Ok(report)
    }

    async fn cleanup(&self, workspace: &WorkspacePath) {
        match workspace.remove().await {
            Ok(_) => tracing::debug!(stage = %Stage::Cleaned, workspace = %workspace, "stage complete"),
            Err(source) => {
                let err = GradeError::Cleanup {
                    path: workspace.path().to_path_buf(),
                    source,
                };
                tracing::warn!(kind = err.kind(), error = %err, "workspace cleanup failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    /// Creates the workspace with a single file, or fails after leaving a
    /// partial directory behind.
    pub(crate) struct MockFetcher {
        pub fail: bool,
        pub calls: AtomicUsize,
        pub commits: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        pub(crate) fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                calls: AtomicUsize::new(0),
                commits: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                calls: AtomicUsize::new(0),
                commits: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SourceFetcher for MockFetcher {
        async fn fetch(&self, clone_url: &str, commit: &str, workspace: &WorkspacePath) -> Result<(), GradeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.commits.lock().unwrap().push(commit.to_string());
            workspace.remove().await.unwrap();
            std::fs::create_dir_all(workspace.path()).unwrap();
            if self.fail {
                std::fs::write(workspace.path().join(".git-partial"), "").unwrap();
                return Err(GradeError::Fetch {
                    url: clone_url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            std::fs::write(workspace.path().join("main.py"), "print('hi')\n").unwrap();
            Ok(())
        }
    }

    #[derive(Clone, Copy)]
    pub(crate) enum SandboxBehavior {
        /// Exit 0 after writing this report body.
        Report(&'static str),
        /// Exit 0 without a report.
        NoReport,
        /// Non-zero exit.
        Crash,
    }

    /// Writes and reads the report through the real report contract.
    pub(crate) struct MockSandbox {
        pub behavior: SandboxBehavior,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        pub seen_workspaces: Mutex<Vec<PathBuf>>,
    }

    impl MockSandbox {
        pub(crate) fn new(behavior: SandboxBehavior) -> Arc<Self> {
            Self::with_delay(behavior, Duration::ZERO)
        }

        pub(crate) fn with_delay(behavior: SandboxBehavior, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                seen_workspaces: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SandboxExecutor for MockSandbox {
        async fn execute(&self, workspace: &WorkspacePath, _assignment: &str) -> Result<GradeReport, GradeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen_workspaces
                .lock()
                .unwrap()
                .push(workspace.path().to_path_buf());
            assert!(
                workspace.path().join("main.py").exists(),
                "sandbox must only run after a successful fetch"
            );
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.behavior {
                SandboxBehavior::Report(body) => {
                    let dir = workspace.path().join(grader_common::REPORT_DIR_NAME);
                    std::fs::create_dir_all(&dir).unwrap();
                    std::fs::write(dir.join(grader_common::REPORT_FILE_NAME), body).unwrap();
                    Ok(grader_common::read_report(workspace.path())?)
                }
                SandboxBehavior::NoReport => Ok(grader_common::read_report(workspace.path())?),
                SandboxBehavior::Crash => Err(GradeError::Execution {
                    container: "grader_deadbeef".to_string(),
                    code: Some(1),
                    stderr: "Traceback (most recent call last)".to_string(),
                }),
            }
        }
    }

    pub(crate) fn push(owner: &str, commit: &str) -> PushNotification {
        PushNotification {
            repository: format!("ybigta/hw1-{}", owner),
            owner: owner.to_string(),
            clone_url: format!("https://github.com/ybigta/hw1-{}.git", owner),
            commit: commit.to_string(),
            deleted: false,
        }
    }

    const COMMIT: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b";

    fn pipeline(root: &Path, fetcher: Arc<MockFetcher>, sandbox: Arc<MockSandbox>) -> GradingPipeline {
        GradingPipeline::new(fetcher, sandbox, root.join("submissions"), "hw1")
    }

    #[test]
    fn test_job_for_uses_owner_and_short_commit() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), MockFetcher::ok(), MockSandbox::new(SandboxBehavior::NoReport));
        let job = p.job_for(push("kim", COMMIT));
        assert_eq!(
            job.workspace.path(),
            dir.path().join("submissions").join("kim_9f86d081")
        );
        assert_eq!(job.assignment, "hw1");
    }

    #[tokio::test]
    async fn test_score_from_report_and_workspace_removed() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MockSandbox::new(SandboxBehavior::Report(r#"{"score": 87}"#));
        let p = pipeline(dir.path(), MockFetcher::ok(), sandbox.clone());
        let job = p.job_for(push("kim", COMMIT));
        let ws = job.workspace.clone();

        let result = p.run(job).await;
        assert_eq!(result.score(), Some(87));
        assert_eq!(result.status(), "graded");
        assert_eq!(result.repository, "ybigta/hw1-kim");
        assert_eq!(result.commit, COMMIT);
        assert!(!ws.exists());
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetches_the_pushed_commit() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::ok();
        let p = pipeline(
            dir.path(),
            fetcher.clone(),
            MockSandbox::new(SandboxBehavior::Report(r#"{"score": 1}"#)),
        );

        let result = p.run(p.job_for(push("kim", COMMIT))).await;
        assert_eq!(result.commit, COMMIT);
        assert_eq!(*fetcher.commits.lock().unwrap(), vec![COMMIT.to_string()]);
    }

    #[tokio::test]
    async fn test_report_without_score_grades_zero() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            dir.path(),
            MockFetcher::ok(),
            MockSandbox::new(SandboxBehavior::Report(r#"{"passed": 0}"#)),
        );
        let result = p.run(p.job_for(push("kim", COMMIT))).await;
        assert_eq!(result.score(), Some(0));
    }

    #[tokio::test]
    async fn test_missing_report_still_removes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), MockFetcher::ok(), MockSandbox::new(SandboxBehavior::NoReport));
        let job = p.job_for(push("kim", COMMIT));
        let ws = job.workspace.clone();

        let result = p.run(job).await;
        assert!(matches!(result.outcome, Err(GradeError::MissingReport { .. })));
        assert_eq!(result.score(), None);
        assert_eq!(result.status(), "missing_report");
        assert!(!ws.exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_removes_workspace_and_skips_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MockSandbox::new(SandboxBehavior::Report(r#"{"score": 100}"#));
        let p = pipeline(dir.path(), MockFetcher::failing(), sandbox.clone());
        let job = p.job_for(push("kim", COMMIT));
        let ws = job.workspace.clone();

        let result = p.run(job).await;
        assert!(matches!(result.outcome, Err(GradeError::Fetch { .. })));
        assert!(!ws.exists());
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_removes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), MockFetcher::ok(), MockSandbox::new(SandboxBehavior::Crash));
        let job = p.job_for(push("kim", COMMIT));
        let ws = job.workspace.clone();

        let result = p.run(job).await;
        assert_eq!(result.status(), "execution");
        assert_eq!(result.score(), None);
        assert!(!ws.exists());
    }

    #[tokio::test]
    async fn test_same_commit_twice_in_succession() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::ok();
        let sandbox = MockSandbox::new(SandboxBehavior::Report(r#"{"score": 64}"#));
        let p = pipeline(dir.path(), fetcher.clone(), sandbox.clone());

        let first = p.run(p.job_for(push("kim", COMMIT))).await;
        let second = p.run(p.job_for(push("kim", COMMIT))).await;

        assert_eq!(first.score(), Some(64));
        assert_eq!(second.score(), Some(64));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.workspace, second.workspace);
        assert!(!second.workspace.exists());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_runs_on_same_workspace_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MockSandbox::with_delay(
            SandboxBehavior::Report(r#"{"score": 90}"#),
            Duration::from_millis(50),
        );
        let p = pipeline(dir.path(), MockFetcher::ok(), sandbox.clone());

        let (a, b) = tokio::join!(
            p.run(p.job_for(push("kim", COMMIT))),
            p.run(p.job_for(push("kim", COMMIT)))
        );

        assert_eq!(a.score(), Some(90));
        assert_eq!(b.score(), Some(90));
        assert_eq!(sandbox.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_commits_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = MockSandbox::with_delay(
            SandboxBehavior::Report(r#"{"score": 90}"#),
            Duration::from_millis(100),
        );
        let p = pipeline(dir.path(), MockFetcher::ok(), sandbox.clone());

        let (a, b) = tokio::join!(
            p.run(p.job_for(push("kim", COMMIT))),
            p.run(p.job_for(push("kim", "0badc0de00000000000000000000000000000000")))
        );

        assert!(a.is_graded() && b.is_graded());
        assert_ne!(a.workspace, b.workspace);
        assert_eq!(sandbox.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_results_are_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            dir.path(),
            MockFetcher::ok(),
            MockSandbox::new(SandboxBehavior::Report(r#"{"score": 55}"#)),
        );
        let mut rx = p.subscribe();

        p.run(p.job_for(push("kim", COMMIT))).await;
        let published = rx.recv().await.unwrap();
        assert_eq!(published.score(), Some(55));
    }
}
