//! Groupcast CLI - Command-line interface for Groupcast.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Groupcast - Channels and events over one group-messaging connection
#[derive(Parser, Debug)]
#[command(name = "groupcast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run two connectors against an in-process hub and print routed events
    Demo {
        /// Channel name (a private channel is used)
        #[arg(short, long, default_value = "orders")]
        channel: String,
        /// Event namespace (default: App.Events)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Validate a connector configuration file and print it with defaults
    Config {
        /// Path to a JSON configuration file
        file: String,
    },

    /// Show how an event name is formatted on the wire and displayed
    Format {
        /// Event name
        event: String,
        /// Event namespace (default: App.Events)
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("groupcast={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Demo { channel, namespace } => commands::demo(&channel, namespace.as_deref()),
        Commands::Config { file } => commands::config(&file),
        Commands::Format { event, namespace } => commands::format(&event, namespace.as_deref()),
        Commands::Version => {
            println!("groupcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
