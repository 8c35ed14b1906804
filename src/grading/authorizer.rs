use std::collections::BTreeSet;

use crate::errors::WebhookError;

/// Allow-list of repositories that may trigger grading.
///
/// Names are compared exactly after trimming surrounding whitespace; case is
/// significant.
#[derive(Debug, Clone)]
pub struct RepositoryAuthorizer {
    allowed: BTreeSet<String>,
}

impl RepositoryAuthorizer {
    pub fn new<I, S>(repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = repos
            .into_iter()
            .map(|repo| repo.as_ref().trim().to_string())
            .filter(|repo| !repo.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn authorize(&self, full_name: &str) -> Result<(), WebhookError> {
        if self.allowed.contains(full_name.trim()) {
            Ok(())
        } else {
            Err(WebhookError::RepositoryNotAllowed {
                repo: full_name.to_string(),
            })
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}
