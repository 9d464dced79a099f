use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::item_types::ResultStatus;

#[derive(Debug, Parser)]
#[command(
    name = "taskgate",
    about = "Hands an AI agent one checklist item at a time and keeps it from looping.",
    long_about = "taskgate dispenses the first unchecked item of a markdown checklist, marks items done when the agent reports them, stops an agent that keeps fetching the same item, and requests an agent restart after a batch of completions.\n\nTasks come from a plain checkbox list; QA scenarios come from table or list rows and are logged to a result ledger.",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Load configuration from PATH instead of ./taskgate.yml.
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        value_name = "PATH",
        help = "Load configuration from PATH instead of ./taskgate.yml."
    )]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    #[command(about = "Work through the task list (defaults to `next`).")]
    Tasks {
        #[command(subcommand)]
        command: Option<TaskCommand>,
    },
    #[command(about = "Work through the QA scenario list (defaults to `next`).")]
    Scenarios {
        #[command(subcommand)]
        command: Option<ScenarioCommand>,
    },
    #[command(about = "Watch for the batch-complete signal and run the restart hook.")]
    Supervise {
        /// Poll once and exit instead of looping.
        #[arg(long)]
        once: bool,
    },
    #[command(about = "Validate configuration and report the state of every managed file.")]
    Doctor,
}

#[derive(Debug, Subcommand)]
pub(crate) enum TaskCommand {
    #[command(about = "Print the first unchecked task.")]
    Next,
    #[command(about = "Mark a task done; TASK must match the list exactly.")]
    Done {
        #[arg(value_name = "TASK")]
        task: String,
    },
    #[command(about = "Print task list progress.")]
    Stats,
    #[command(about = "Clear the fetch tracker, batch counter and restart signal.")]
    Reset,
}

#[derive(Debug, Subcommand)]
pub(crate) enum ScenarioCommand {
    #[command(about = "Print the first unchecked scenario.")]
    Next,
    #[command(about = "Mark a scenario done and record its result.")]
    Done {
        #[arg(value_name = "ID")]
        id: String,
        #[arg(long, value_name = "PASS|FAIL|SKIP", default_value = "PASS", value_parser = parse_status)]
        status: ResultStatus,
        #[command(flatten)]
        details: DetailsArg,
    },
    #[command(about = "Mark a scenario done with status SKIP.")]
    Skip {
        #[arg(value_name = "ID")]
        id: String,
        #[command(flatten)]
        details: DetailsArg,
    },
    #[command(about = "Print scenario progress and result tallies.")]
    Stats,
    #[command(about = "Clear the fetch tracker, batch counter and restart signal.")]
    Reset,
}

#[derive(Debug, Args)]
pub(crate) struct DetailsArg {
    /// Free-text note stored in the result ledger.
    #[arg(long, value_name = "TEXT", default_value = "")]
    pub(crate) details: String,
}

fn parse_status(raw: &str) -> Result<ResultStatus, String> {
    raw.parse()
}
