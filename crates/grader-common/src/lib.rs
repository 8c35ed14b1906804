//! Types shared by the grading host and the graders that run inside the sandbox.
//!
//! The host mounts a submission read-only at [`SUBMISSION_MOUNT`] and a fresh,
//! writable report directory at [`REPORT_DIR_NAME`] inside it. A grader writes
//! exactly one [`GradeReport`] to [`REPORT_FILE_NAME`] in that directory; the
//! host reads it once after the container exits.

pub mod grader;
pub mod report;

pub use grader::{Grader, GraderError, GraderFactory, GraderRegistry};
pub use report::{GradeReport, ReportError, read_report, report_path, write_report};

/// Where the submission is mounted inside the sandbox.
pub const SUBMISSION_MOUNT: &str = "/app/student";

/// Report directory, relative to the submission root.
pub const REPORT_DIR_NAME: &str = ".grader";

/// Report file name inside [`REPORT_DIR_NAME`].
pub const REPORT_FILE_NAME: &str = "report.json";
