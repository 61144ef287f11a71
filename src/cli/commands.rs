//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: submit a job and drive it to completion
//! - status: get job status and stage history
//! - list: list jobs
//! - cancel: request cancellation
//! - gc: evict expired terminal jobs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Trellis - a workflow orchestrator for layered content pipelines
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a job and drive it through the pipeline
    Run {
        /// Request payload as a JSON object
        input: String,

        /// Print stage events as they happen
        #[arg(short, long)]
        follow: bool,
    },

    /// Get status of a specific job
    Status {
        /// Job ID to check
        id: String,

        /// Show the full stage history
        #[arg(short, long)]
        detailed: bool,
    },

    /// List jobs
    List {
        /// Filter by status (pending, running, succeeded, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Request cancellation of a job
    Cancel {
        /// Job ID to cancel
        id: String,
    },

    /// Evict terminal jobs past the retention window
    Gc,
}
