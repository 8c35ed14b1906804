use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use grader::config::ConfigArgs;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "grader")]
#[command(version, about = "Push-to-grade webhook service")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "GRADER_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[arg(long, env = "GRADER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the webhook server
    Serve(ConfigArgs),
    /// Validate the configuration and print it with the secret masked
    CheckConfig(ConfigArgs),
}

fn init_tracing(cli: &Cli) {
    // RUST_LOG > --log-level > "info"
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Serve(args) => cmd::cmd_serve(args).await?,
        Commands::CheckConfig(args) => cmd::cmd_check_config(args)?,
    }

    Ok(())
}
