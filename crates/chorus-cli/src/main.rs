use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;
mod output;

use commands::call::handle_call;
use commands::chat::handle_chat;
use commands::tools::handle_tools;
use logging::setup_logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file to load instead of the default location
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive conversation
    #[command(about = "Start an interactive conversation", alias = "c")]
    Chat,

    /// List the tools every provider offers
    #[command(about = "List the tools every connected provider offers")]
    Tools {
        /// Print full input schemas
        #[arg(long)]
        schemas: bool,
    },

    /// Call one tool directly, without a model
    #[command(about = "Call one tool directly, without a model")]
    Call {
        /// Namespaced tool name, e.g. files.read
        tool: String,

        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(None)?;

    match cli.command {
        Some(Command::Tools { schemas }) => handle_tools(cli.config.as_deref(), schemas).await,
        Some(Command::Call { tool, arguments }) => {
            handle_call(cli.config.as_deref(), &tool, &arguments).await
        }
        Some(Command::Chat) | None => handle_chat(cli.config.as_deref()).await,
    }
}
