//! MedSync CLI
//!
//! Command-line tools for running and operating a replication group.
//!
//! # Commands
//!
//! - `broker` - Run the change bus broker
//! - `node` - Run a replicating node daemon
//! - `add` / `update` / `remove` / `clear` - Mutate a node's records
//! - `list` / `show` - Read a node's records
//! - `inspect` - Display store statistics
//! - `dump-outbox` - Dump events awaiting relay to the bus

mod commands;

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MedSync command-line tools.
#[derive(Parser)]
#[command(name = "medsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by every command that runs a node.
#[derive(Args)]
struct NodeArgs {
    /// Path to the node's store directory
    #[arg(long)]
    store: PathBuf,

    /// Path to the node's outbox journal (defaults to outbox.queue
    /// inside the store directory)
    #[arg(long)]
    outbox: Option<PathBuf>,

    /// This node's identifier
    #[arg(long)]
    node_id: String,

    /// Broker address, host:port
    #[arg(long, default_value = "127.0.0.1:7401")]
    bus: String,
}

impl NodeArgs {
    fn outbox_path(&self) -> PathBuf {
        self.outbox
            .clone()
            .unwrap_or_else(|| self.store.join("outbox.queue"))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the change bus broker
    Broker {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7401")]
        listen: SocketAddr,

        /// Directory for queue journals
        #[arg(short, long)]
        data_dir: PathBuf,
    },

    /// Run a replicating node daemon
    Node {
        #[command(flatten)]
        node: NodeArgs,
    },

    /// Create a patient record and replicate it
    Add {
        #[command(flatten)]
        node: NodeArgs,

        /// Patient name
        #[arg(long)]
        name: String,

        /// Patient age
        #[arg(long)]
        age: u32,

        /// Free-text diagnosis
        #[arg(long)]
        diagnosis: String,
    },

    /// Update a patient record and replicate it
    Update {
        #[command(flatten)]
        node: NodeArgs,

        /// Record identifier
        id: i64,

        /// Patient name
        #[arg(long)]
        name: String,

        /// Patient age
        #[arg(long)]
        age: u32,

        /// Free-text diagnosis
        #[arg(long)]
        diagnosis: String,
    },

    /// Delete a patient record and replicate the removal
    Remove {
        #[command(flatten)]
        node: NodeArgs,

        /// Record identifier
        id: i64,
    },

    /// Delete every patient record and replicate the wipe
    Clear {
        #[command(flatten)]
        node: NodeArgs,
    },

    /// List the records in a store
    List {
        /// Path to the store directory
        #[arg(long)]
        store: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one record
    Show {
        /// Path to the store directory
        #[arg(long)]
        store: PathBuf,

        /// Record identifier
        id: i64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display store statistics
    Inspect {
        /// Path to the store directory
        #[arg(long)]
        store: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump events awaiting relay to the bus
    DumpOutbox {
        /// Path to the outbox journal
        #[arg(long)]
        outbox: PathBuf,

        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Broker { listen, data_dir } => {
            runtime.block_on(commands::broker::run(listen, &data_dir))?;
        }
        Commands::Node { node } => {
            runtime.block_on(commands::node::run(&node))?;
        }
        Commands::Add {
            node,
            name,
            age,
            diagnosis,
        } => {
            runtime.block_on(commands::patients::add(&node, &name, age, &diagnosis))?;
        }
        Commands::Update {
            node,
            id,
            name,
            age,
            diagnosis,
        } => {
            runtime.block_on(commands::patients::update(&node, id, &name, age, &diagnosis))?;
        }
        Commands::Remove { node, id } => {
            runtime.block_on(commands::patients::remove(&node, id))?;
        }
        Commands::Clear { node } => {
            runtime.block_on(commands::patients::clear(&node))?;
        }
        Commands::List { store, format } => {
            commands::patients::list(&store, &format)?;
        }
        Commands::Show { store, id, format } => {
            commands::patients::show(&store, id, &format)?;
        }
        Commands::Inspect { store, format } => {
            commands::inspect::run(&store, &format)?;
        }
        Commands::DumpOutbox { outbox, limit } => {
            commands::dump_outbox::run(&outbox, limit)?;
        }
        Commands::Version => {
            println!("MedSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
