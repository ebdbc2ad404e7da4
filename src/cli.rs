use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aura")]
#[command(about = "Personal assistant daemon: local-first reasoning, contexts, reminders", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Workspace directory (database, spool, logs). Overrides AURA_WORKSPACE.
    #[arg(long, global = true)]
    pub(crate) workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create the workspace: database, spool directories, default config.
    Init,

    /// Run the daemon loop: poll the spool, process messages, run maintenance.
    Run,

    /// Process a single message and print the reply (one-shot, no daemon).
    Process {
        /// Thread token tying the message to a conversation.
        #[arg(long, default_value = "cli")]
        thread: String,
        /// The message text.
        text: String,
    },

    /// Run one maintenance pass (sweep, reminders, purge) immediately.
    Sweep,

    /// Show workspace counts and recent operations.
    Status {
        /// Number of recent op-log entries to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Output JSON.
        #[arg(long)]
        json: bool,
    },
}
