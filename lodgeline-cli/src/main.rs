//! Command-line entry point for Lodgeline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use shared::config::server::Config;
use shared::models::ConversationId;

mod commands;

use commands::api::{ClientArgs, RoleArg};

/// Lodgeline CLI
#[derive(Parser, Debug)]
#[command(name = "lodgeline")]
#[command(about = "Command-line interface for Lodgeline messaging", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Serve {
        /// Port to bind, overriding the configuration file
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML or JSON configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file (yaml or json)
        #[arg(long, short, default_value = "yaml")]
        format: String,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// Shell to generate the script for
        #[arg(long, short, value_enum)]
        shell: Shell,
    },

    /// Generate the OpenAPI document
    Spec {
        /// Output file (YAML or JSON by extension), or "json"/"yaml" to print
        output_path: Option<String>,
    },

    /// Fetch a hub subscription token
    Token {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Start or fetch the conversation between a client and an owner
    Start {
        #[command(flatten)]
        client: ClientArgs,

        #[arg(long)]
        client_id: i64,

        #[arg(long)]
        owner_id: i64,
    },

    /// List conversations, most recent first
    Conversations {
        #[command(flatten)]
        client: ClientArgs,

        /// Side of the conversations to list (client or owner)
        #[arg(long, value_enum)]
        role: Option<RoleArg>,
    },

    /// Show a conversation and mark its incoming messages read
    Open {
        #[command(flatten)]
        client: ClientArgs,

        conversation_id: ConversationId,
    },

    /// Send a message to a conversation
    Send {
        #[command(flatten)]
        client: ClientArgs,

        conversation_id: ConversationId,

        content: String,
    },

    /// Follow the personal topic and any conversations until interrupted
    Follow {
        #[command(flatten)]
        client: ClientArgs,

        /// Conversation to follow as well (repeatable)
        #[arg(long = "conversation")]
        conversations: Vec<ConversationId>,
    },
}

async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved_config = Config::load_config(config, port)?;
    server::server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
        Commands::Config { format } => commands::config::generate_config(&format),
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
            Ok(())
        }
        Commands::Spec { output_path } => commands::spec::generate_spec(output_path.as_deref()),
        Commands::Token { client } => commands::api::token(&client).await,
        Commands::Start {
            client,
            client_id,
            owner_id,
        } => commands::api::start(&client, client_id, owner_id).await,
        Commands::Conversations { client, role } => commands::api::conversations(&client, role).await,
        Commands::Open {
            client,
            conversation_id,
        } => commands::api::open(&client, conversation_id).await,
        Commands::Send {
            client,
            conversation_id,
            content,
        } => commands::api::send(&client, conversation_id, &content).await,
        Commands::Follow {
            client,
            conversations,
        } => commands::follow::follow(&client, &conversations).await,
    }
}
