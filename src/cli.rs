//! CLI command definitions for tabsync.
//!
//! This module defines the CLI structure using clap's derive macros. The
//! binary is a thin consumer of the library: every domain rule lives in
//! [`crate::directory`], [`crate::collection`], and [`crate::sync`].

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Collaborative tab/task synchronization core and CLI tools.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to the store database (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Acting user id
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Acting user email
    #[arg(short, long, global = true)]
    pub email: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register an identity profile so email invites can resolve it
    UserAdd {
        /// Opaque user id
        id: String,
        /// Email address
        email: String,
    },
    /// Tab directory operations
    #[command(subcommand)]
    Tab(TabCommand),
    /// Task operations within a tab
    #[command(subcommand)]
    Task(TaskCommand),
    /// Run the synchronization engine and print view changes until Ctrl-C
    Watch,
    /// Move legacy per-user trees into the shared layout
    Migrate,
    /// Dump the whole tree as JSON
    Export(ExportArgs),
}

#[derive(Subcommand, Debug)]
pub enum TabCommand {
    /// List tabs visible to the acting user
    List,
    /// Create a tab, optionally inviting one collaborator by email
    Create {
        name: String,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        collaborator: Option<String>,
    },
    /// Rename a tab and/or change its icon (empty icon clears it)
    Rename {
        tab: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    /// Invite a user as an editor, by email
    Invite { tab: String, email: String },
    /// Remove a non-owner member
    Remove { tab: String, member: String },
    /// Leave a tab you do not own
    Leave { tab: String },
    /// Soft-delete a tab
    Delete { tab: String },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// List a tab's active tasks in display order
    List { tab: String },
    /// Create a task at the end of the list
    Add {
        tab: String,
        text: String,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Edit a task's text and/or dates
    Update {
        tab: String,
        task: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Change a task's status
    Status {
        tab: String,
        task: String,
        /// One of: not-started, in-progress, waiting, on-hold,
        /// needs-review, completed, canceled
        status: String,
    },
    /// Assign a task to a member, or clear the assignment
    Assign {
        tab: String,
        task: String,
        /// Member user id; omit to unassign
        member: Option<String>,
    },
    /// Rewrite the task order to the given id sequence
    Reorder {
        tab: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Soft-delete a task
    Rm { tab: String, task: String },
    /// Show aggregate task counts for a tab
    Stats { tab: String },
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Output file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Gzip-compress the output
    #[arg(long)]
    pub gzip: bool,
}
