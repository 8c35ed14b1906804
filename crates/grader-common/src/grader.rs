//! Assignment graders and the registry that selects one by assignment name.
//!
//! Graders run inside the sandbox, never in the host process. The sandbox
//! entry point builds a [`GraderRegistry`], then calls [`GraderRegistry::grade`]
//! with the assignment name it was started with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::report::{GradeReport, ReportError, write_report};

/// Assignment-specific test logic.
pub trait Grader {
    /// Run the assignment's test cases against the submission the grader was
    /// built for.
    fn run_tests(&self) -> GradeReport;
}

/// Builds a grader for the submission rooted at the given path.
pub type GraderFactory = fn(&Path) -> Box<dyn Grader>;

#[derive(Debug, Error)]
pub enum GraderError {
    #[error("no grader registered for assignment '{0}'")]
    UnknownAssignment(String),

    #[error(transparent)]
    Report(#[from] ReportError),
}

#[derive(Default)]
pub struct GraderRegistry {
    factories: BTreeMap<String, GraderFactory>,
}

impl GraderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `assignment`, replacing any earlier entry.
    pub fn register(&mut self, assignment: &str, factory: GraderFactory) -> &mut Self {
        self.factories.insert(assignment.to_string(), factory);
        self
    }

    pub fn assignments(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Run the grader for `assignment` against `submission_root` and write
    /// its report next to the submission. Returns the written path.
    pub fn grade(&self, assignment: &str, submission_root: &Path) -> Result<PathBuf, GraderError> {
        let factory = self
            .factories
            .get(assignment)
            .ok_or_else(|| GraderError::UnknownAssignment(assignment.to_string()))?;
        let report = factory(submission_root).run_tests();
        Ok(write_report(submission_root, &report)?)
    }
}
