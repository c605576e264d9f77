use crate::config::Config;
use crate::message_store::StoreEvent;
use crate::messenger_types::{ConversationScope, Message, SenderRole};
use crate::mutation_gateway::Delivery;
use crate::session::ConversationSession;
use crate::sled_backend::SledBackend;
use colored::*;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One line of REPL input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Edit { target: String, content: String },
    Delete(String),
    Pin(String),
    Unpin(String),
    React { target: String, emoji: String },
    List,
    Pinned,
    Reactions,
    Help,
    Quit,
}

/// Parse a REPL line. Lines not starting with `/` are sent as messages.
/// Targets are message ids or `#n` positions from `/list`.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(Command::Send(line.to_string()));
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let first = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let need = |arg: Option<&str>, usage: &str| -> Result<String, String> {
        arg.map(str::to_string).ok_or_else(|| format!("Usage: {}", usage))
    };

    match name {
        "/edit" => Ok(Command::Edit {
            target: need(first, "/edit <id|#n> <text>")?,
            content: need(rest, "/edit <id|#n> <text>")?,
        }),
        "/delete" | "/del" => Ok(Command::Delete(need(first, "/delete <id|#n>")?)),
        "/pin" => Ok(Command::Pin(need(first, "/pin <id|#n>")?)),
        "/unpin" => Ok(Command::Unpin(need(first, "/unpin <id|#n>")?)),
        "/react" => Ok(Command::React {
            target: need(first, "/react <id|#n> <emoji>")?,
            emoji: need(rest, "/react <id|#n> <emoji>")?,
        }),
        "/list" => Ok(Command::List),
        "/pinned" => Ok(Command::Pinned),
        "/reactions" => Ok(Command::Reactions),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// Resolve `#n` (1-based position) or pass an id through
pub fn resolve_target(target: &str, messages: &[Message]) -> Option<String> {
    match target.strip_prefix('#') {
        Some(n) => n
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| messages.get(i))
            .map(|m| m.id.clone()),
        None => Some(target.to_string()),
    }
}

/// Interactive session against the embedded backend
pub async fn run(config: Config) -> anyhow::Result<()> {
    let data_dir = config.data_dir_or_default();
    std::fs::create_dir_all(&data_dir)?;
    let backend = Arc::new(SledBackend::open(&data_dir, config.feed_buffer)?);

    let scope = ConversationScope {
        conversation_id: config
            .conversation_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("conversation id missing"))?,
        counterparty_id: config
            .counterparty_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("counterparty id missing"))?,
    };

    let session = ConversationSession::new(config, backend.clone(), backend);
    let history = session.open(scope.clone()).await?;

    println!(
        "{} {} {}",
        "💬".bright_cyan(),
        "Conversation".bright_white().bold(),
        scope.conversation_id.cyan()
    );
    print_messages(&history);
    println!("{}", "Type a message, or /help".dimmed());

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StoreEvent::Upserted { message }) => print_message(None, &message),
                Ok(StoreEvent::Removed { id }) => println!("{} {}", "✗ removed".red(), id.dimmed()),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Display lagged {} events", n);
                }
                Err(_) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e.yellow());
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        execute(&session, command).await;
    }

    session.close().await;
    printer.abort();
    Ok(())
}

async fn execute(session: &ConversationSession, command: Command) {
    let messages = session.messages().await;
    let target = |t: &str| resolve_target(t, &messages).unwrap_or_else(|| t.to_string());

    let outcome: Result<(), String> = match command {
        Command::Send(text) => delivery(session.send(&text).await),
        Command::Edit { target: t, content } => {
            session.edit(&target(&t), &content).await.map_err(|e| e.to_string())
        }
        Command::Delete(t) => session.delete(&target(&t)).await.map_err(|e| e.to_string()),
        Command::Pin(t) => session.pin(&target(&t)).await.map_err(|e| e.to_string()),
        Command::Unpin(t) => session.unpin(&target(&t)).await.map_err(|e| e.to_string()),
        Command::React { target: t, emoji } => delivery(session.react(&target(&t), &emoji).await),
        Command::List => {
            print_messages(&messages);
            Ok(())
        }
        Command::Pinned => {
            print_messages(&session.pinned().await);
            Ok(())
        }
        Command::Reactions => {
            for r in session.reaction_totals().await {
                println!("  {} {}", r.emoji, r.count.to_string().cyan());
            }
            Ok(())
        }
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", "✗".red().bold(), e.red());
    }
}

fn delivery(outcome: Delivery) -> Result<(), String> {
    match outcome {
        Delivery::Delivered | Delivery::Ignored => Ok(()),
        Delivery::Dropped(e) => Err(format!("not delivered: {}", e)),
    }
}

fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("{}", "  (no messages)".dimmed());
    }
    for (i, message) in messages.iter().enumerate() {
        print_message(Some(i + 1), message);
    }
}

fn print_message(position: Option<usize>, message: &Message) {
    let who = match message.sender_role {
        SenderRole::Viewer => "you".green().bold(),
        SenderRole::Counterparty => message.sender_id.as_str().magenta().bold(),
    };
    let mut flags = String::new();
    if message.is_pinned {
        flags.push_str(" 📌");
    }
    if message.is_edited {
        flags.push_str(" (edited)");
    }
    let reactions: Vec<String> = message
        .reactions
        .iter()
        .map(|r| format!("{}{}", r.emoji, r.count))
        .collect();
    let position = position.map(|p| format!("#{} ", p)).unwrap_or_default();

    println!(
        "{}{} {} {}{} {}",
        position.dimmed(),
        message.created_at.format("%H:%M:%S").to_string().dimmed(),
        who,
        message.content,
        flags.yellow(),
        reactions.join(" ")
    );
    println!("   {}", message.id.dimmed());
}

fn print_help() {
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                  Send a message", "<text>".cyan());
    println!("  {} <id|#n> <text>    Edit one of your messages", "/edit".cyan());
    println!("  {} <id|#n>         Delete a message", "/delete".cyan());
    println!("  {} / {} <id|#n>   Pin or unpin", "/pin".cyan(), "/unpin".cyan());
    println!("  {} <id|#n> <emoji>  React", "/react".cyan());
    println!("  {}                   Show the conversation", "/list".cyan());
    println!("  {}                 Show pinned messages", "/pinned".cyan());
    println!("  {}              Reaction totals", "/reactions".cyan());
    println!("  {}                   Leave", "/quit".cyan());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_plain_text_is_send() {
        assert_eq!(
            parse_command("  hello there ").unwrap(),
            Command::Send("hello there".to_string())
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("/edit #2 better wording").unwrap(),
            Command::Edit {
                target: "#2".to_string(),
                content: "better wording".to_string()
            }
        );
        assert_eq!(
            parse_command("/react abc 👍").unwrap(),
            Command::React {
                target: "abc".to_string(),
                emoji: "👍".to_string()
            }
        );
        assert_eq!(parse_command("/del x").unwrap(), Command::Delete("x".to_string()));
        assert_eq!(parse_command("/quit").unwrap(), Command::Quit);
        assert!(parse_command("/edit #2").is_err());
        assert!(parse_command("/pin").is_err());
        assert!(parse_command("/shrug").is_err());
    }

    #[test]
    fn test_resolve_target() {
        let message = Message {
            id: "real-id".to_string(),
            conversation_id: "c".to_string(),
            sender_id: "a".to_string(),
            recipient_id: "b".to_string(),
            sender_role: SenderRole::Viewer,
            content: "x".to_string(),
            created_at: Utc::now(),
            edited_at: None,
            is_edited: false,
            is_pinned: false,
            deleted_at: None,
            reactions: Vec::new(),
            attachments: Vec::new(),
            thread_id: None,
            reply_to: None,
        };
        let messages = vec![message];
        assert_eq!(resolve_target("#1", &messages).as_deref(), Some("real-id"));
        assert_eq!(resolve_target("#0", &messages), None);
        assert_eq!(resolve_target("#5", &messages), None);
        assert_eq!(resolve_target("abc", &messages).as_deref(), Some("abc"));
    }
}
