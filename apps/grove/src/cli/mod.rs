//! # Grove CLI Module
//!
//! This module implements the CLI interface for Grove.
//!
//! ## Available Commands
//!
//! - `status` - Show store status
//! - `build` - Build a graph from a JSON build plan
//! - `put` - Insert or replace one node
//! - `link` - Link two nodes through a declared relation
//! - `inspect` - Materialize and print nodes
//! - `edges` - Query edges by predicate
//! - `publish` - Print one snapshot of a publication
//! - `export` - Export the store in canonical format
//! - `import` - Import a canonical export
//! - `hash` - Compute the BLAKE3 hash of the canonical export

mod commands;

use clap::{Parser, Subcommand};
use grove_core::GroveError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Grove - in-process graph object store
///
/// Typed nodes and edges over a volatile or redb backend.
#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the store database
    #[arg(short = 'D', long, global = true, default_value = "grove.db")]
    pub database: PathBuf,

    /// Storage backend: "volatile" (canonical export file) or "redb" (ACID database)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// TOML configuration (engine schema, store settings, publications)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show store status
    Status,

    /// Build a graph from a JSON build plan
    Build {
        /// Path to the plan file
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Insert or replace a node
    Put {
        /// Node id
        #[arg(short, long)]
        id: String,

        /// Node type
        #[arg(short = 't', long = "type")]
        type_name: String,

        /// Node data as JSON
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Link two nodes through a relation declared by the subject's type
    Link {
        #[arg(short, long)]
        subject: String,

        #[arg(short, long)]
        predicate: String,

        #[arg(short, long)]
        object: String,
    },

    /// Materialize nodes and print their typed data
    Inspect {
        /// Only nodes of this type
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,

        /// Only this node
        #[arg(short, long)]
        id: Option<String>,
    },

    /// Query edges by predicate
    Edges {
        #[arg(short, long)]
        predicate: String,

        #[arg(short, long)]
        subject: Option<String>,

        #[arg(short, long)]
        object: Option<String>,
    },

    /// Print one snapshot of a publication
    Publish {
        /// Configured publication name, or a type name for an unfiltered one
        name: String,

        /// Subscription params as key=value (value parsed as JSON when possible)
        #[arg(short = 'w', long = "where")]
        params: Vec<String>,
    },

    /// Export the store in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (canonical, json)
        #[arg(short = 't', long, default_value = "canonical")]
        format: String,
    },

    /// Import a canonical export into the store
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 hash of the canonical export
    Hash,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), GroveError> {
    let json_mode = cli.json_mode;
    let session = StoreSession::open(&cli.database, &cli.backend, cli.config.as_deref()).await?;

    let outcome = match cli.command {
        Some(Commands::Status) | None => cmd_status(&session, json_mode).await,
        Some(Commands::Build { plan }) => cmd_build(&session, json_mode, &plan).await,
        Some(Commands::Put {
            id,
            type_name,
            data,
        }) => cmd_put(&session, &id, &type_name, &data).await,
        Some(Commands::Link {
            subject,
            predicate,
            object,
        }) => cmd_link(&session, &subject, &predicate, &object).await,
        Some(Commands::Inspect { type_name, id }) => {
            cmd_inspect(&session, json_mode, type_name.as_deref(), id.as_deref()).await
        }
        Some(Commands::Edges {
            predicate,
            subject,
            object,
        }) => cmd_edges(&session, json_mode, &predicate, subject, object).await,
        Some(Commands::Publish { name, params }) => {
            cmd_publish(&session, json_mode, &name, &params).await
        }
        Some(Commands::Export { output, format }) => cmd_export(&session, &output, &format).await,
        Some(Commands::Import { input }) => cmd_import(&session, &input).await,
        Some(Commands::Hash) => cmd_hash(&session, json_mode).await,
    };

    // Close even when the command failed; report the command's error first.
    let closed = session.close();
    outcome.and(closed)
}
