//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "caseflow")]
#[command(about = "Caseflow - Case pipeline orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize caseflow configuration and database
    Init {
        /// Force reinitialization even if already initialized
        #[arg(short, long)]
        force: bool,
    },

    /// Run the orchestrator loop
    Run,

    /// Case management commands
    #[command(subcommand)]
    Case(CaseCommands),

    /// Accelerator resource commands
    #[command(subcommand)]
    Resource(ResourceCommands),
}

#[derive(Subcommand)]
pub enum CaseCommands {
    /// Register a new case
    Submit {
        /// Case identifier (typically the case directory name)
        case_id: String,

        /// Local directory holding the case input files
        source_path: String,

        /// Priority: low, normal, high, urgent, critical
        #[arg(short, long, default_value = "normal")]
        priority: String,
    },

    /// List cases
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of cases to display
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show details and step history for a case
    Show {
        /// Case identifier
        case_id: String,
    },

    /// Change a case's scheduling priority
    SetPriority {
        /// Case identifier
        case_id: String,

        /// Priority: low, normal, high, urgent, critical
        priority: String,
    },
}

#[derive(Subcommand)]
pub enum ResourceCommands {
    /// List accelerator slots and their lock state
    List,
}
