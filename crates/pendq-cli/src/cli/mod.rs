//! CLI for the PendQ retry scheduler.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pendq_core::config;
use pendq_core::store::{MessageDb, DEFAULT_ENDPOINT_ID};

use commands::{
    run_add, run_completions, run_daemon, run_endpoint, run_kick, run_man, run_status,
};

/// Top-level CLI for the PendQ retry scheduler.
#[derive(Debug, Parser)]
#[command(name = "pendq")]
#[command(about = "PendQ: pending-message retry scheduler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a new message for delivery.
    Add {
        /// Conversation the message belongs to.
        conversation: String,

        /// Endpoint (delivery line) the message is bound to; -1 is the
        /// default/unspecified endpoint.
        #[arg(
            long,
            default_value_t = DEFAULT_ENDPOINT_ID,
            value_name = "ID",
            allow_negative_numbers = true
        )]
        endpoint: i64,

        /// Recipient address, stored in the message metadata.
        #[arg(long)]
        recipient: Option<String>,

        /// Free-form note, stored in the message metadata.
        #[arg(long)]
        note: Option<String>,

        /// Queue an incoming-download retry instead of an outgoing send.
        #[arg(long)]
        download: bool,
    },

    /// Show all messages and their statuses.
    Status {
        /// Emit machine-readable JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Process pending messages once and wait for the queue to settle.
    Kick {
        /// Only process this endpoint (default: every active endpoint).
        #[arg(long, value_name = "ID", allow_negative_numbers = true)]
        endpoint: Option<i64>,
    },

    /// Run the scheduler until interrupted.
    Run,

    /// Activate or deactivate an endpoint.
    Endpoint {
        /// Endpoint identifier.
        #[arg(allow_negative_numbers = true)]
        id: i64,

        /// Mark the endpoint active.
        #[arg(long, conflicts_with = "inactive")]
        active: bool,

        /// Mark the endpoint inactive. Its pending messages fail out on
        /// the next scheduling pass.
        #[arg(long)]
        inactive: bool,
    },

    /// Generate shell completions on stdout.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },

    /// Render the man page on stdout.
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = MessageDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                conversation,
                endpoint,
                recipient,
                note,
                download,
            } => run_add(&db, &conversation, endpoint, recipient, note, download).await?,
            CliCommand::Status { json } => run_status(&db, json).await?,
            CliCommand::Kick { endpoint } => run_kick(&db, &cfg, endpoint).await?,
            CliCommand::Run => run_daemon(&db, &cfg).await?,
            CliCommand::Endpoint {
                id,
                active,
                inactive,
            } => run_endpoint(&db, id, active, inactive).await?,
            CliCommand::Completions { shell } => run_completions(shell)?,
            CliCommand::Man => run_man()?,
        }

        Ok(())
    }
}
