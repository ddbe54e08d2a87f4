//! Line-oriented chat client over the local reference backend.
//!
//! Run two of these against the same database to watch live delivery,
//! typing signals, and list refreshes from both sides:
//!
//!   ROOST_USER=alice roost-console
//!   ROOST_USER=bob   roost-console

use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use roost_backend::LocalBackend;
use roost_sync::{ChatSession, SessionEvent};
use roost_types::models::Delivery;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roost=info".into()),
        )
        .init();

    let db_path = std::env::var("ROOST_DB_PATH").unwrap_or_else(|_| "roost.db".into());
    let username = std::env::var("ROOST_USER").context("set ROOST_USER to sign in")?;

    let backend = LocalBackend::open(Path::new(&db_path))?;
    if backend.find_user(&username)?.is_none() {
        backend.register_user(&username)?;
    }
    let backend = backend.signed_in_as(&username)?;

    let (session, mut events) = ChatSession::start(backend.clone()).await?;
    println!("signed in as {} -- /help for commands", username);
    print_list(&session).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                render_event(&session, event).await;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&session, &backend, line.trim()).await {
                    break;
                }
            }
        }
    }

    session.shutdown();
    Ok(())
}

async fn handle_line(
    session: &ChatSession<LocalBackend>,
    backend: &LocalBackend,
    line: &str,
) -> bool {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let result = match command {
        "" => Ok(()),
        "/quit" => return false,
        "/help" => {
            println!("/list, /users, /dm <user>, /group <name> <user>..,");
            println!("/open <n>, /read, /mute, /unmute, /typing, /quit");
            println!("anything else is sent to the open conversation");
            Ok(())
        }
        "/list" => {
            print_list(session).await;
            Ok(())
        }
        "/users" => match backend.users() {
            Ok(users) => {
                for user in users {
                    println!("  {}", user.username);
                }
                Ok(())
            }
            Err(e) => Err(anyhow::Error::from(e)),
        },
        "/dm" => match backend.find_user(rest) {
            Ok(Some(other)) => session
                .create_direct(other.id)
                .await
                .map(|_| ())
                .map_err(Into::into),
            Ok(None) => Err(anyhow::anyhow!("no such user: {rest}")),
            Err(e) => Err(e.into()),
        },
        "/group" => start_group(session, backend, rest).await,
        "/open" => open_by_index(session, rest).await,
        "/read" => mark_latest_read(session).await,
        "/mute" => mute(session, true).await,
        "/unmute" => mute(session, false).await,
        "/typing" => {
            session.notify_typing().await;
            Ok(())
        }
        _ if command.starts_with('/') => Err(anyhow::anyhow!("unknown command: {command}")),
        _ => match session.send_message(line).await {
            Ok(_) => Ok(()),
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
    }
    true
}

async fn start_group(
    session: &ChatSession<LocalBackend>,
    backend: &LocalBackend,
    rest: &str,
) -> anyhow::Result<()> {
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("");
    let mut members: Vec<Uuid> = Vec::new();
    for username in parts {
        match backend.find_user(username)? {
            Some(user) => members.push(user.id),
            None => anyhow::bail!("no such user: {username}"),
        }
    }
    session.create_group(name, &members).await?;
    Ok(())
}

async fn open_by_index(session: &ChatSession<LocalBackend>, rest: &str) -> anyhow::Result<()> {
    let index: usize = rest.parse().context("usage: /open <n>")?;
    let list = session.conversations().await;
    let entry = list
        .get(index.wrapping_sub(1))
        .context("no conversation at that position")?;
    session.open_conversation(entry.id()).await?;
    for message in session.messages().await {
        print_message(&message.author.username, &message.content, message.edited);
    }
    Ok(())
}

async fn mark_latest_read(session: &ChatSession<LocalBackend>) -> anyhow::Result<()> {
    let Some(conversation_id) = session.active_conversation().await else {
        anyhow::bail!("no open conversation");
    };
    let Some(latest) = session.messages().await.last().map(|m| m.id) else {
        return Ok(());
    };
    session.mark_read(conversation_id, latest).await?;
    Ok(())
}

async fn mute(session: &ChatSession<LocalBackend>, muted: bool) -> anyhow::Result<()> {
    let Some(conversation_id) = session.active_conversation().await else {
        anyhow::bail!("no open conversation");
    };
    session.set_muted(conversation_id, muted).await?;
    Ok(())
}

async fn render_event(session: &ChatSession<LocalBackend>, event: SessionEvent) {
    match event {
        SessionEvent::MessagesChanged { .. } => {
            // Echo the tail of the sequence; a pending entry is shown with
            // a marker until the persist is acknowledged.
            if let Some(message) = session.messages().await.last() {
                if message.delivery == Delivery::Pending {
                    println!("<{}> {} (sending)", message.author.username, message.content);
                } else {
                    print_message(&message.author.username, &message.content, message.edited);
                }
            }
        }
        SessionEvent::TypingChanged { .. } => {
            let typing = session.typing_users().await;
            if !typing.is_empty() {
                let names: Vec<&str> = typing.iter().map(|u| u.username.as_str()).collect();
                println!("  ({} typing...)", names.join(", "));
            }
        }
        SessionEvent::ConversationsChanged => {
            debug!("conversation list refreshed");
        }
    }
}

async fn print_list(session: &ChatSession<LocalBackend>) {
    let list = session.conversations().await;
    if list.is_empty() {
        println!("no conversations yet -- /dm <user> to start one");
        return;
    }
    for (index, entry) in list.iter().enumerate() {
        let preview = entry
            .last_message
            .as_ref()
            .map(|p| p.content.as_str())
            .unwrap_or("");
        let unread = if entry.unread_count > 0 {
            format!(" [{}]", entry.unread_count)
        } else {
            String::new()
        };
        let muted = if entry.is_muted { " (muted)" } else { "" };
        println!("{:>3}. {}{}{}  {}", index + 1, entry.title, unread, muted, preview);
    }
}

fn print_message(author: &str, content: &str, edited: bool) {
    let suffix = if edited { " (edited)" } else { "" };
    println!("<{author}> {content}{suffix}");
}
