use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use fifoxfer::cli::{Cli, Command};
use fifoxfer::{session, Config, FifoError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries the payload, so logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            e.downcast_ref::<FifoError>()
                .map(FifoError::exit_code)
                .unwrap_or(1)
        }
    };

    // Exit directly: a blocking task may still be parked in open(2) or read(2)
    // after an interrupt, and dropping the runtime would wait for it.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(cli.overrides())?;
    tracing::debug!("{:?}", config);

    match cli.command {
        Command::Reader => {
            session::run_reader(config, std::io::stdout()).await?;
        }
        Command::Writer { file } => {
            session::run_writer(config, &file).await?;
        }
    }

    Ok(())
}
