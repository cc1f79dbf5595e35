//! Read-eval-print loop

use std::io::Write;

use conduit_core::Orchestrator;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

/// What a line of user input asks for
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Exit,
    Empty,
    Message(String),
}

fn classify(line: &str) -> Input {
    let text = line.trim();
    if text.is_empty() {
        Input::Empty
    } else if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
        Input::Exit
    } else {
        Input::Message(text.to_string())
    }
}

fn prompt(label: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{label}")?;
    stdout.flush()
}

/// Run until `exit`/`quit`, end of input or Ctrl-C at the prompt.
///
/// Ctrl-C while a reply is streaming cancels only that reply.
pub async fn run(agent: &mut Orchestrator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Talking to {}. Type 'exit' or 'quit' to leave.", agent.name());

    loop {
        prompt("You: ")?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let text = match classify(&line) {
            Input::Exit => break,
            Input::Empty => {
                println!("Please enter a message.");
                continue;
            }
            Input::Message(text) => text,
        };

        let name = agent.name().to_string();
        prompt(&format!("{name}: "))?;
        stream_reply(agent, text).await?;
        println!();
    }

    println!("\nGoodbye!");
    Ok(())
}

async fn stream_reply(agent: &mut Orchestrator, text: String) -> anyhow::Result<()> {
    let mut stream = agent.turn(text);
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(Ok(chunk)) => {
                    write!(stdout, "{chunk}")?;
                    stdout.flush()?;
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "Turn failed");
                    writeln!(stdout)?;
                    eprintln!("{}", err.user_message());
                    if err.is_retryable() {
                        eprintln!("You can send the message again.");
                    }
                    return Ok(());
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Reply cancelled");
                write!(stdout, " [cancelled]")?;
                return Ok(());
            }
        }
    }
}
