use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use ragtrace_ai::agent::{ChannelSink, UiEvent};
use ragtrace_ai::llm::Message;
use ragtrace_core::{ChatApp, Settings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::cli::ChatArgs;

pub async fn run(settings: &Settings, args: ChatArgs) -> Result<()> {
    let app = ChatApp::build(settings).await?;

    let thread_id = args
        .thread
        .unwrap_or_else(|| format!("chat-{}", uuid::Uuid::new_v4()));
    println!("{} thread {}", "ragtrace chat".bold(), thread_id.dimmed());
    println!("{}", "Type a question, or 'exit' to quit.".dimmed());

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", "you>".green().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        if content == "exit" || content == "quit" {
            break;
        }

        let (tx, rx) = mpsc::channel(64);
        let render = tokio::spawn(render_events(rx));

        let mut sink = ChannelSink::new(tx);
        let result = app
            .respond(
                &thread_id,
                args.user.as_deref(),
                content,
                &mut sink,
                &mut history,
            )
            .await;

        drop(sink);
        let _ = render.await;

        if let Err(e) = result {
            eprintln!("{} {e:#}", "error:".red().bold());
        }
    }

    Ok(())
}

/// Drain UI events and render them: streamed text inline, thinking dimmed,
/// tool steps colored.
async fn render_events(mut rx: mpsc::Receiver<UiEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            UiEvent::MessageToken(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            UiEvent::MessageComplete(_) => println!(),
            UiEvent::ThinkingStarted => {
                print!("{}", "thinking: ".dimmed());
                let _ = std::io::stdout().flush();
            }
            UiEvent::ThinkingToken(text) => {
                print!("{}", text.dimmed());
                let _ = std::io::stdout().flush();
            }
            UiEvent::ThinkingComplete => println!(),
            UiEvent::ToolCalls(rendered) => {
                println!("{}", "tool call".cyan().bold());
                println!("{}", rendered.cyan());
            }
            UiEvent::ToolResponse(rendered) => {
                println!("{}", "tool response".blue().bold());
                println!("{}", rendered.blue());
            }
        }
    }
}
