//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// orc - autonomous task orchestration engine
#[derive(Debug, Parser)]
#[command(name = "orc", version, about)]
pub struct Cli {
    /// Path to a config file (default: .orc/orc.yml, then user config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root (default: current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Stream rendering for `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamMode {
    None,
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a task
    New {
        /// Short task title
        title: String,

        /// Full task description (defaults to the title)
        #[arg(long)]
        description: Option<String>,

        /// Weight: trivial | small | medium | large | greenfield.
        /// Left unset, the classifier assigns one at run time.
        #[arg(long)]
        weight: Option<String>,

        /// Category label (bug, feature, chore, ...)
        #[arg(long)]
        category: Option<String>,
    },

    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one task with its phases
    Show {
        /// Task id (TASK-0001)
        id: String,
    },

    /// Run a task to completion
    Run {
        /// Task id (TASK-0001)
        id: String,

        /// Event stream rendering
        #[arg(long, value_enum, default_value = "text")]
        stream: StreamMode,
    },

    /// Answer an open decision
    Decide {
        /// Decision id
        decision_id: u64,

        /// The chosen answer
        answer: String,
    },

    /// List open decisions for a task
    Decisions {
        /// Task id (TASK-0001)
        id: String,
    },

    /// Summarize task statuses for this project
    Status,

    /// List projects known to this machine's registry
    Projects,
}
