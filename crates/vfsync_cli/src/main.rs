//! vfsync CLI
//!
//! Command-line tools for vfsync projects.
//!
//! # Commands
//!
//! - `inspect` - Display heads, files and dependencies of a project
//! - `history` - List the change history
//! - `snapshot` - Record a named checkpoint
//! - `restore` - Restore a checkpoint as a new edit
//! - `exec` - Run a command against the project's files
//! - `serve` - Run a backend server over a directory

mod commands;

use clap::{Parser, Subcommand};
use commands::exec::Target;
use commands::Format;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// vfsync project tools.
#[derive(Parser)]
#[command(name = "vfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository directory holding project histories
    #[arg(global = true, short, long, default_value = ".vfsync")]
    root: PathBuf,

    /// Project id
    #[arg(global = true, short, long, default_value = "default")]
    project: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display heads, files and dependencies of a project
    Inspect {
        /// List every file
        #[arg(long)]
        files: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List the change history, oldest first
    History {
        /// Only show named checkpoints
        #[arg(short, long)]
        checkpoints: bool,

        /// Show at most this many recent entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Record a named checkpoint
    Snapshot {
        /// Checkpoint message
        message: String,
    },

    /// Restore a change (full id or unique prefix), after a safety snapshot
    Restore {
        /// Change id or prefix
        change: String,
    },

    /// Run a command against the project's files and keep what it changes
    Exec {
        /// Backend server address; the in-memory emulation is used without it
        #[arg(long)]
        remote: Option<String>,

        /// Command line
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Serve a directory to remote providers
    Serve {
        /// Directory to serve
        workspace: PathBuf,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7420")]
        bind: SocketAddr,

        /// Maximum concurrent connections
        #[arg(long, default_value = "64")]
        max_connections: usize,

        /// Seconds a command may run before it is killed
        #[arg(long, default_value = "120")]
        command_timeout: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { files, format } => {
            commands::inspect::run(&cli.root, &cli.project, files, format)?;
        }
        Commands::History {
            checkpoints,
            limit,
            format,
        } => {
            commands::history::run(&cli.root, &cli.project, checkpoints, limit, format)?;
        }
        Commands::Snapshot { message } => {
            commands::snapshot::run(&cli.root, &cli.project, &message)?;
        }
        Commands::Restore { change } => {
            commands::restore::run(&cli.root, &cli.project, &change)?;
        }
        Commands::Exec { remote, command } => {
            let target = remote.map_or(Target::Virtual, Target::Remote);
            commands::exec::run(&cli.root, &cli.project, &command.join(" "), &target)?;
        }
        Commands::Serve {
            workspace,
            bind,
            max_connections,
            command_timeout,
        } => {
            commands::serve::run(
                &workspace,
                bind,
                max_connections,
                Duration::from_secs(command_timeout),
            )?;
        }
    }

    Ok(())
}
