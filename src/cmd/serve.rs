//! Webhook server command: `grader serve`.

use anyhow::{Context, Result};
use grader::config::ConfigArgs;

pub async fn cmd_serve(args: ConfigArgs) -> Result<()> {
    let config = args.into_config().context("Invalid configuration")?;
    tracing::debug!(config = ?config, "starting with configuration");
    grader::grading::server::start_server(config).await
}
