use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::task::TaskTracker;

use super::authorizer::RepositoryAuthorizer;
use super::event::{InboundEvent, PushNotification};
use super::pipeline::GradingPipeline;
use super::signature::SignatureVerifier;
use crate::errors::{Stage, WebhookError};

/// What happened to a delivery that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a push, or a push that deleted a branch. Nothing was scheduled.
    Ignored { event: Option<String> },
    /// A grading run was started in the background.
    Accepted {
        repository: String,
        commit: String,
        workspace: PathBuf,
    },
}

/// Turns verified push deliveries into background grading runs.
///
/// Every rejection happens here, before anything is spawned, so a rejected
/// delivery never touches the filesystem or the container runtime.
pub struct EventDispatcher {
    verifier: SignatureVerifier,
    authorizer: RepositoryAuthorizer,
    pipeline: Arc<GradingPipeline>,
    tracker: TaskTracker,
}

impl EventDispatcher {
    pub fn new(
        verifier: SignatureVerifier,
        authorizer: RepositoryAuthorizer,
        pipeline: Arc<GradingPipeline>,
    ) -> Self {
        Self {
            verifier,
            authorizer,
            pipeline,
            tracker: TaskTracker::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<GradingPipeline> {
        &self.pipeline
    }

    /// Tracks every spawned run; the server drains it on shutdown.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn dispatch(&self, event: InboundEvent) -> Result<Dispatch, WebhookError> {
        self.verifier.verify(event.body(), event.signature())?;
        tracing::debug!(stage = %Stage::Verified, event = ?event.event_type(), "delivery verified");

        if !event.is_push() {
            tracing::info!(event = ?event.event_type(), "ignoring non-push event");
            return Ok(Dispatch::Ignored {
                event: event.event_type().map(str::to_string),
            });
        }

        let push = PushNotification::parse(event.body())?;
        if let Err(e) = self.authorizer.authorize(&push.repository) {
            tracing::warn!(repo = %push.repository, "rejected push from repository outside the allow-list");
            return Err(e);
        }
        tracing::debug!(stage = %Stage::Authorized, repo = %push.repository, "push authorized");

        if push.deleted {
            tracing::info!(repo = %push.repository, "ignoring branch deletion");
            return Ok(Dispatch::Ignored {
                event: event.event_type().map(str::to_string),
            });
        }

        let job = self.pipeline.job_for(push);
        let accepted = Dispatch::Accepted {
            repository: job.push.repository.clone(),
            commit: job.push.commit.clone(),
            workspace: job.workspace.path().to_path_buf(),
        };
        tracing::info!(
            repo = %job.push.repository,
            commit = %job.push.short_commit(),
            workspace = %job.workspace,
            "grading scheduled"
        );

        let pipeline = Arc::clone(&self.pipeline);
        self.tracker.spawn(async move {
            pipeline.run(job).await;
        });
        Ok(accepted)
    }
}
