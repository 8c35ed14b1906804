//! Configuration check command: `grader check-config`.

use anyhow::{Context, Result};
use grader::config::ConfigArgs;

pub fn cmd_check_config(args: ConfigArgs) -> Result<()> {
    let config = args.into_config().context("Invalid configuration")?;
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    println!("Configuration OK");
    Ok(())
}
