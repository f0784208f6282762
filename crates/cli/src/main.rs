mod cli;
mod commands;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use hourglass_core::config::load_dotenv;
use hourglass_core::Config;

use crate::cli::{CliArgs, Command, JobsCommand};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    let targets_file = args
        .targets
        .clone()
        .unwrap_or_else(|| config.scheduler.targets_file.clone());

    match args.command {
        Command::Migrate => commands::migrate(&config).await,
        Command::Jobs(JobsCommand::List { channel }) => commands::list_jobs(&config, channel.as_deref()).await,
        Command::Jobs(JobsCommand::Add(add)) => commands::add_job(&config, add).await,
        Command::Jobs(JobsCommand::Remove { name, hard }) => commands::remove_job(&config, &name, hard).await,
        Command::Tick => commands::tick(&config, &targets_file).await,
        Command::Run { interval } => {
            config.log_summary();
            let secs = interval.unwrap_or(config.scheduler.tick_interval_secs).max(1);
            commands::run(&config, &targets_file, Duration::from_secs(secs)).await
        }
        Command::Config => commands::show_config(&config),
    }
}
