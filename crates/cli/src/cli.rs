use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Job scheduler for queue- and function-dispatched workers.
#[derive(Parser, Debug)]
#[command(name = "hourglass", version, about = "Job scheduler and worker dispatcher")]
pub struct CliArgs {
    /// Config profile; every key is looked up as {PROFILE}_{KEY} first
    #[arg(long, global = true, env = "HOURGLASS_PROFILE")]
    pub profile: Option<String>,

    /// Dispatch targets file (overrides TARGETS_FILE)
    #[arg(long, global = true)]
    pub targets: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply database migrations
    Migrate,
    /// Manage job rows
    #[command(subcommand)]
    Jobs(JobsCommand),
    /// Run one scheduling pass and exit
    Tick,
    /// Run the scheduler loop until Ctrl-C
    Run {
        /// Seconds between ticks (overrides SCHEDULER_TICK_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print the active configuration without secrets
    Config,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List live jobs
    List {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Create a job
    Add(AddJob),
    /// Delete a job by name
    Remove {
        name: String,
        /// Delete the row instead of marking it deleted
        #[arg(long)]
        hard: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddJob {
    /// Job name; also the name of the worker that runs it
    #[arg(long)]
    pub name: String,

    /// Cron expression; omit for a one-shot job
    #[arg(long, default_value = "")]
    pub interval: String,

    /// Lock timeout in seconds (defaults to JOB_DEFAULT_TIMEOUT)
    #[arg(long)]
    pub timeout: Option<i64>,

    /// Job parameters as a JSON object
    #[arg(long, default_value = "{}")]
    pub parameters: String,

    #[arg(long)]
    pub channel: Option<String>,

    /// Delete the row after its first successful run
    #[arg(long)]
    pub auto_remove: bool,

    /// Skip creation when a live job with the same name and parameters exists
    #[arg(long)]
    pub unique: bool,
}
