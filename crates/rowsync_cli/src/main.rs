//! RowSync CLI
//!
//! Command-line tools for exercising and diagnosing RowSync.
//!
//! # Commands
//!
//! - `demo` - Run a bidirectional sync demo between two in-memory stores
//! - `schema` - Print the demo scope schema, apply order and fingerprint

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// RowSync command-line tools.
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Conflict policy selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// The hub's row wins a conflict.
    ServerWins,
    /// The incoming client row wins a conflict.
    ClientWins,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bidirectional sync demo over the loopback transport
    Demo {
        /// Number of customers seeded on the hub
        #[arg(short, long, default_value = "100")]
        customers: usize,

        /// Number of orders created on the client between cycles
        #[arg(short, long, default_value = "10")]
        orders: usize,

        /// Create a concurrent update conflict between cycles
        #[arg(long)]
        conflict: bool,

        /// Conflict policy enforced by the hub
        #[arg(long, value_enum, default_value = "server-wins")]
        policy: PolicyArg,

        /// Maximum batch part size in bytes
        #[arg(long, default_value = "65536")]
        batch_size: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the demo scope schema, apply order and fingerprint
    Schema {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            customers,
            orders,
            conflict,
            policy,
            batch_size,
            format,
        } => {
            let policy = match policy {
                PolicyArg::ServerWins => rowsync_protocol::ConflictPolicy::ServerWins,
                PolicyArg::ClientWins => rowsync_protocol::ConflictPolicy::ClientWins,
            };
            commands::demo::run(customers, orders, conflict, policy, batch_size, &format)?;
        }
        Commands::Schema { format } => {
            commands::schema::run(&format)?;
        }
    }

    Ok(())
}
