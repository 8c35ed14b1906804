use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::errors::ConfigError;

/// Container settings for a grading run.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Container CLI to invoke (`docker`, `podman`, ...).
    pub runtime: String,
    pub image: String,
    /// Passed to `--cpus`.
    pub cpus: String,
    /// Passed to `--memory`.
    pub memory: String,
    /// Wall-clock limit for one container run.
    pub timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "grader-image:latest".to_string(),
            cpus: "1".to_string(),
            memory: "512m".to_string(),
            timeout_secs: 100,
        }
    }
}

/// Raw TOML structure for the optional config file.
#[derive(Debug, Deserialize)]
struct GraderToml {
    sandbox: Option<SandboxSection>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    runtime: Option<String>,
    image: Option<String>,
    cpus: Option<String>,
    memory: Option<String>,
    timeout: Option<u64>,
}

impl SandboxConfig {
    /// Load the `[sandbox]` section of a TOML config file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let toml: GraderToml = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::default();
        if let Some(section) = toml.sandbox {
            if let Some(runtime) = section.runtime {
                config.runtime = runtime;
            }
            if let Some(image) = section.image {
                config.image = image;
            }
            if let Some(cpus) = section.cpus {
                config.cpus = cpus;
            }
            if let Some(memory) = section.memory {
                config.memory = memory;
            }
            if let Some(timeout) = section.timeout {
                config.timeout_secs = timeout;
            }
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Validated runtime configuration, built once at startup and handed to the
/// components that need it.
#[derive(Clone)]
pub struct GraderConfig {
    pub host: String,
    pub port: u16,
    pub secret: String,
    pub allowed_repos: BTreeSet<String>,
    /// Assignment identifier passed to the sandbox image.
    pub assignment: String,
    /// Root directory for per-push workspaces.
    pub submissions_dir: PathBuf,
    pub fetch_timeout_secs: u64,
    /// How long shutdown waits for in-flight grading runs.
    pub shutdown_grace_secs: u64,
    pub sandbox: SandboxConfig,
}

impl std::fmt::Debug for GraderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraderConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret", &"<redacted>")
            .field("allowed_repos", &self.allowed_repos)
            .field("assignment", &self.assignment)
            .field("submissions_dir", &self.submissions_dir)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("shutdown_grace_secs", &self.shutdown_grace_secs)
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

impl GraderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.allowed_repos.is_empty() {
            return Err(ConfigError::EmptyAllowList);
        }
        if self.assignment.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "assignment" });
        }
        if self.sandbox.image.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "sandbox image" });
        }
        if self.sandbox.runtime.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "sandbox runtime" });
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout { field: "sandbox timeout" });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout { field: "fetch timeout" });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Printable view of the configuration with the secret masked.
    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.host,
            "port": self.port,
            "secret": "<redacted>",
            "allowed_repos": self.allowed_repos,
            "assignment": self.assignment,
            "submissions_dir": self.submissions_dir,
            "fetch_timeout_secs": self.fetch_timeout_secs,
            "shutdown_grace_secs": self.shutdown_grace_secs,
            "sandbox": {
                "runtime": self.sandbox.runtime,
                "image": self.sandbox.image,
                "cpus": self.sandbox.cpus,
                "memory": self.sandbox.memory,
                "timeout_secs": self.sandbox.timeout_secs,
            },
        })
    }
}

/// Configuration flags shared by every subcommand. Each flag can also be set
/// through its environment variable (a `.env` file is loaded first).
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// TOML file with a `[sandbox]` section
    #[arg(long, env = "GRADER_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "GRADER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "GRADER_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Shared webhook secret used for HMAC-SHA256 signatures
    #[arg(long, env = "GRADER_SECRET", default_value = "", hide_env_values = true)]
    pub secret: String,

    /// Repository full names allowed to trigger grading (comma-separated)
    #[arg(long = "allowed-repo", env = "GRADER_ALLOWED_REPOS", value_delimiter = ',')]
    pub allowed_repos: Vec<String>,

    #[arg(long, env = "GRADER_ASSIGNMENT", default_value = "hw1")]
    pub assignment: String,

    #[arg(long, env = "GRADER_SUBMISSIONS_DIR", default_value = "submissions")]
    pub submissions_dir: PathBuf,

    #[arg(long, env = "GRADER_FETCH_TIMEOUT_SECS", default_value_t = 120)]
    pub fetch_timeout_secs: u64,

    #[arg(long, env = "GRADER_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Container CLI (overrides the config file)
    #[arg(long, env = "GRADER_RUNTIME")]
    pub runtime: Option<String>,

    /// Grader image (overrides the config file)
    #[arg(long, env = "GRADER_IMAGE")]
    pub image: Option<String>,

    /// CPU share for the sandbox, e.g. "1" or "0.5"
    #[arg(long, env = "GRADER_CPUS")]
    pub cpus: Option<String>,

    /// Memory ceiling for the sandbox, e.g. "512m"
    #[arg(long, env = "GRADER_MEMORY")]
    pub memory: Option<String>,

    /// Sandbox wall-clock timeout in seconds
    #[arg(long, env = "GRADER_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,
}

impl ConfigArgs {
    /// Merge flags, environment and the optional config file, then validate.
    /// Explicit flags and environment values win over the file.
    pub fn into_config(self) -> Result<GraderConfig, ConfigError> {
        let mut sandbox = match &self.config {
            Some(path) => SandboxConfig::load(path)?,
            None => SandboxConfig::default(),
        };
        if let Some(runtime) = self.runtime {
            sandbox.runtime = runtime;
        }
        if let Some(image) = self.image {
            sandbox.image = image;
        }
        if let Some(cpus) = self.cpus {
            sandbox.cpus = cpus;
        }
        if let Some(memory) = self.memory {
            sandbox.memory = memory;
        }
        if let Some(timeout) = self.timeout_secs {
            sandbox.timeout_secs = timeout;
        }

        let allowed_repos = self
            .allowed_repos
            .iter()
            .map(|repo| repo.trim())
            .filter(|repo| !repo.is_empty())
            .map(str::to_string)
            .collect();

        let config = GraderConfig {
            host: self.host,
            port: self.port,
            secret: self.secret,
            allowed_repos,
            assignment: self.assignment.trim().to_string(),
            submissions_dir: self.submissions_dir,
            fetch_timeout_secs: self.fetch_timeout_secs,
            shutdown_grace_secs: self.shutdown_grace_secs,
            sandbox,
        };
        config.validate()?;
        Ok(config)
    }
}
