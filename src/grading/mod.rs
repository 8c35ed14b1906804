//! Push-to-grade orchestration.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   POST   ┌──────────────────────────────────────────────────┐
//! │  GitHub  │ ───────> │  server.rs  (axum Router, TraceLayer, shutdown)  │
//! │ webhook  │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ accepted │         │                                        │
//!                       │         │ EventDispatcher::dispatch()            │
//!                       │         v                                        │
//!                       │  dispatcher.rs  signature.rs → authorizer.rs     │
//!                       │         │                                        │
//!                       │         │ TaskTracker::spawn(GradingPipeline::run)│
//!                       │         v                                        │
//!                       │  pipeline.rs  (GradingPipeline, WorkspaceLocks)  │
//!                       │         │                                        │
//!                       │         │ SourceFetcher::fetch()                 │
//!                       │         v                                        │
//!                       │  fetcher.rs   (GitFetcher, exact-commit fetch)   │
//!                       │         │                                        │
//!                       │         │ SandboxExecutor::execute()             │
//!                       │         v                                        │
//!                       │  sandbox.rs   (DockerSandbox, SandboxRun)        │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Typical Request Flow
//!
//! 1. `POST /webhook` → `api::webhook()` builds an `InboundEvent`.
//! 2. The dispatcher verifies the HMAC signature. Anything other than a
//!    `push` event is acknowledged as ignored.
//! 3. The push payload is parsed and its repository checked against the
//!    allow-list. Both failures are returned to the caller synchronously.
//!    A push that deleted a branch is acknowledged as ignored.
//! 4. An owned `GradeJob` is spawned onto the shared `TaskTracker` and the
//!    caller gets `{"accepted": true}` right away.
//! 5. In the background the pipeline locks the workspace path, fetches the
//!    pushed commit, runs the grader container, reads the report, removes the
//!    workspace and logs the `GradeResult`.

pub mod api;
pub mod authorizer;
pub mod dispatcher;
pub mod event;
pub mod fetcher;
pub mod pipeline;
pub mod sandbox;
pub mod server;
pub mod signature;
pub mod workspace;
