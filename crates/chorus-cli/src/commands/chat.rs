use super::{load_config, start_registry};
use crate::output::StdoutSink;
use anyhow::Result;
use chorus::config::to_env_var;
use chorus::model::openai::OpenAiClient;
use chorus::model::ModelClient;
use chorus::{ToolRegistry, TurnOrchestrator};
use console::style;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Message(&'a str),
    Exit,
    Reset,
    Tools,
    Reconnect(&'a str),
    Help,
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line.split_once(' ').unwrap_or((line, "")) {
        ("", _) => Input::Empty,
        ("/exit" | "/quit", _) => Input::Exit,
        ("/reset", _) => Input::Reset,
        ("/tools", _) => Input::Tools,
        ("/reconnect", name) if !name.trim().is_empty() => Input::Reconnect(name.trim()),
        ("/help" | "/reconnect", _) => Input::Help,
        _ => Input::Message(line),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /tools              list available tools");
    println!("  /reconnect <name>   restart one provider");
    println!("  /reset              start a new conversation");
    println!("  /exit               quit (Ctrl-D also works)");
    println!("Press Ctrl-C while a reply is streaming to stop it.");
}

fn prompt() {
    print!("{} ", style("( O)>").cyan().bold());
    let _ = std::io::stdout().flush();
}

async fn print_tools(registry: &ToolRegistry) {
    let descriptors = registry.descriptors().await;
    if descriptors.is_empty() {
        println!("No tools available.");
    }
    for descriptor in descriptors {
        println!("  {}", style(descriptor.name).bold());
    }
}

pub async fn handle_chat(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.model.api_key.is_none() {
        eprintln!(
            "{} no API key configured; set {} if your endpoint needs one",
            style("note:").dim(),
            to_env_var("model.api_key")
        );
    }

    let model: Arc<dyn ModelClient> = Arc::new(OpenAiClient::new(config.model.clone())?);
    let registry = start_registry(&config).await;
    let mut agent = TurnOrchestrator::new(model, registry.clone(), config.agent.clone());
    let sink = StdoutSink;

    println!(
        "chatting with {} ({} tools). Type /help for commands.",
        style(&config.model.model).bold(),
        registry.descriptors().await.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => break,
            Input::Help => print_help(),
            Input::Reset => {
                agent.reset();
                println!("Started a new conversation.");
            }
            Input::Tools => print_tools(&registry).await,
            Input::Reconnect(name) => match registry.reconnect(name).await {
                Ok(count) => println!("{} reconnected with {} tools", name, count),
                Err(e) => eprintln!("{} {}", style("error:").red().bold(), e),
            },
            Input::Message(text) => {
                let cancel = CancellationToken::new();
                let interrupt = {
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            cancel.cancel();
                        }
                    })
                };

                let result = agent.respond(text, &sink, &cancel).await;
                interrupt.abort();
                println!();

                match result {
                    Ok(outcome) if outcome.cancelled => {
                        println!("{}", style("[interrupted]").dim());
                    }
                    Ok(outcome) => {
                        tracing::info!(
                            model_calls = outcome.model_calls,
                            tool_rounds = outcome.tool_rounds,
                            budget_exhausted = outcome.budget_exhausted,
                            "reply complete"
                        );
                    }
                    Err(e) => eprintln!("{} {}", style("error:").red().bold(), e),
                }
            }
        }
    }

    registry.shutdown().await;
    Ok(())
}
