use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

use trellis_node::presence::{PRESENCE_REFRESH_PERIOD, spawn_presence_refresher};
use trellis_node::{
    DEFAULT_CHANNEL, DeliveryReport, Node, NodeError, NodeEvent, TrackerClient, TypingAudience,
    View, inbound, local_ip,
};

type InputLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout belongs to the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trellis=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let tracker_url =
        std::env::var("TRELLIS_TRACKER_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".into());
    let p2p_port: u16 = std::env::var("TRELLIS_P2P_PORT")
        .unwrap_or_else(|_| "0".into())
        .parse()
        .context("TRELLIS_P2P_PORT must be a port number")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tracker = TrackerClient::new(tracker_url)?;

    // Sign in, creating the account first if asked.
    let mode = prompt(&mut lines, "login or register [login]: ").await?;
    let username = prompt(&mut lines, "username: ").await?;
    let password = prompt(&mut lines, "password: ").await?;
    if mode == "register" {
        tracker.register(&username, &password).await?;
        println!("registered '{}'", username);
    }
    let login = tracker.login(&username, &password).await?;
    println!("logged in as '{}'", login.username);

    let (node, mut events) = Node::new(tracker, login.username)?;

    // Inbound server first, so the endpoint we advertise is already live.
    let (addr, _server) = inbound::serve(node.clone(), p2p_port).await?;
    let ip = local_ip();
    node.tracker.submit_info(&ip, addr.port()).await?;
    println!("reachable for peers at {}:{}", ip, addr.port());

    spawn_presence_refresher(node.clone(), PRESENCE_REFRESH_PERIOD);

    match node.join_channel(DEFAULT_CHANNEL).await {
        Ok(history) => {
            println!("--- #{} ---", DEFAULT_CHANNEL);
            for entry in history {
                println!("[{}] {}: {}", entry.timestamp, entry.username, entry.content);
            }
        }
        Err(err) => println!("no history for #{}: {}", DEFAULT_CHANNEL, err),
    }
    println!(
        "commands: !list !create !private !join !dm !members !add !remove \
         !broadcast !react !typing !health refresh quit; anything else is sent"
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&node, line.trim()).await {
                    break;
                }
            }
            Some(event) = events.recv() => print_event(&node, event).await,
        }
    }

    // Remove exactly this session's presence row on the way out.
    if let Err(err) = node.tracker.logout(Some((ip.as_str(), addr.port()))).await {
        warn!(%err, "logout failed; presence row left behind");
    }
    println!("logged out");
    Ok(())
}

async fn prompt(lines: &mut InputLines, text: &str) -> anyhow::Result<String> {
    print!("{}", text);
    std::io::stdout().flush()?;
    let line = lines
        .next_line()
        .await?
        .context("stdin closed during sign-in")?;
    Ok(line.trim().to_string())
}

/// Returns false when the user asked to quit.
async fn handle_line(node: &Arc<Node>, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "quit" => return false,
        "refresh" => {
            match node.tracker.get_list().await {
                Ok(rows) => {
                    node.state.replace_peers(rows, &node.username).await;
                    let users = node.state.online_users().await;
                    println!("online: {}", users.join(", "));
                }
                Err(err) => println!("refresh failed: {}", err),
            }
        }
        "!list" => match node.tracker.list_channels().await {
            Ok(channels) => {
                node.state.cache_permissions(channels.clone()).await;
                for ch in channels {
                    let unread = node.state.unread_channel(&ch.name).await;
                    let marker = if ch.is_private { "(private) " } else { "" };
                    let badge = if unread > 0 { format!(" [{} unread]", unread) } else { String::new() };
                    println!("#{} {}— {} (owner: {}){}", ch.name, marker, ch.topic, ch.owner, badge);
                }
            }
            Err(err) => println!("could not list channels: {}", err),
        },
        "!create" => {
            let (name, topic) = split_first(rest);
            if name.is_empty() {
                println!("usage: !create <name> [topic]");
            } else {
                report_simple(node.tracker.create_channel(name, topic, false, &[]).await);
            }
        }
        "!private" => {
            // !private <name> <user,user,...> [topic]
            let (name, rest) = split_first(rest);
            let (users, topic) = split_first(rest);
            if name.is_empty() || users.is_empty() {
                println!("usage: !private <name> <user,user,...> [topic]");
            } else {
                let allowed: Vec<String> =
                    users.split(',').map(|u| u.trim().to_string()).collect();
                report_simple(node.tracker.create_channel(name, topic, true, &allowed).await);
            }
        }
        "!join" => {
            if rest.is_empty() {
                println!("usage: !join <channel>");
            } else {
                match node.join_channel(rest).await {
                    Ok(history) => {
                        println!("--- #{} ---", rest);
                        for entry in history {
                            println!("[{}] {}: {}", entry.timestamp, entry.username, entry.content);
                        }
                    }
                    Err(err) => println!("cannot join #{}: {}", rest, err),
                }
            }
        }
        "!dm" => {
            if rest.is_empty() {
                println!("usage: !dm <user>");
            } else {
                match node.open_dm(rest).await {
                    Ok(history) => {
                        println!("--- dm with {} ---", rest);
                        for entry in history {
                            println!("[{}] {} -> {}: {}", entry.timestamp, entry.sender, entry.receiver, entry.content);
                        }
                    }
                    Err(err) => println!("cannot open dm with {}: {}", rest, err),
                }
            }
        }
        "!members" => match node.state.view().await {
            View::Channel(channel) => match node.tracker.get_members(&channel).await {
                Ok(members) => {
                    println!("owner: {}", members.owner);
                    println!("members: {}", members.members.join(", "));
                }
                Err(err) => println!("cannot list members: {}", err),
            },
            View::Dm(_) => println!("!members only works in a channel"),
        },
        "!add" | "!remove" => match node.state.view().await {
            View::Channel(channel) if !rest.is_empty() => {
                let result = if command == "!add" {
                    node.tracker.add_member(&channel, rest).await
                } else {
                    node.tracker.remove_member(&channel, rest).await
                };
                report_simple(result);
            }
            View::Channel(_) => println!("usage: {} <user>", command),
            View::Dm(_) => println!("{} only works in a channel", command),
        },
        "!broadcast" => match node.state.view().await {
            View::Channel(channel) if !rest.is_empty() => {
                report_delivery(node.send_broadcast(&channel, rest).await);
            }
            View::Channel(_) => println!("usage: !broadcast <message>"),
            View::Dm(_) => println!("!broadcast only works in a channel"),
        },
        "!react" => {
            let (msg_id, emoji) = split_first(rest);
            match node.state.view().await {
                View::Channel(channel) if !msg_id.is_empty() && !emoji.is_empty() => {
                    node.send_reaction(&channel, msg_id, emoji).await;
                    let tallies = node.state.reactions_for(msg_id).await;
                    println!("reacted {} to {} ({} tallies locally)", emoji, msg_id, tallies.len());
                }
                View::Channel(_) => println!("usage: !react <msg_id> <emoji>"),
                View::Dm(_) => println!("!react only works in a channel"),
            }
        }
        "!health" => match node.tracker.health().await {
            Ok(health) => println!(
                "tracker {}: {} peers online, {} users, {} channels, {} dms",
                health.status,
                health.peers_online,
                health.total_users,
                health.total_channels,
                health.total_dms
            ),
            Err(err) => println!("tracker unreachable: {}", err),
        },
        "!typing" => {
            let audience = match node.state.view().await {
                View::Channel(channel) => TypingAudience::Channel(channel),
                View::Dm(user) => TypingAudience::Dm(user),
            };
            node.send_typing(audience).await;
        }
        _ if command.starts_with('!') => {
            println!("unknown command: {}", command);
        }
        // Plain text goes to whatever is on screen.
        _ => match node.state.view().await {
            View::Channel(channel) => report_delivery(node.send_channel_message(&channel, line).await),
            View::Dm(user) => report_delivery(node.send_dm(&user, line).await),
        },
    }
    true
}

fn split_first(input: &str) -> (&str, &str) {
    match input.split_once(' ') {
        Some((first, rest)) => (first, rest.trim()),
        None => (input, ""),
    }
}

fn report_simple(result: Result<(), NodeError>) {
    match result {
        Ok(()) => println!("ok"),
        Err(err) => println!("{}", err),
    }
}

fn report_delivery(result: Result<DeliveryReport, NodeError>) {
    match result {
        Ok(report) => {
            if report.failed.is_empty() {
                println!("-> delivered to {}/{} (msg {})", report.reached, report.targets, report.msg_id);
            } else {
                println!(
                    "-> delivered to {}/{} (msg {}), unreachable: {}",
                    report.reached,
                    report.targets,
                    report.msg_id,
                    report.failed.join(", ")
                );
            }
        }
        Err(err) => println!("{}", err),
    }
}

async fn print_event(node: &Arc<Node>, event: NodeEvent) {
    match event {
        NodeEvent::ChannelMessage { channel, sender, content, msg_id } => {
            match node.state.view().await {
                View::Channel(active) if active == channel => {
                    println!("[#{}] {}: {} (msg {})", channel, sender, content, msg_id);
                }
                _ => {
                    let unread = node.state.unread_channel(&channel).await;
                    println!("({} unread in #{})", unread, channel);
                }
            }
        }
        NodeEvent::DirectMessage { sender, content, msg_id } => {
            match node.state.view().await {
                View::Dm(active) if active == sender => {
                    println!("[dm] {}: {} (msg {})", sender, content, msg_id);
                }
                _ => {
                    let unread = node.state.unread_dm(&sender).await;
                    println!("({} unread dm from {})", unread, sender);
                }
            }
        }
        NodeEvent::Broadcast { channel, sender, content, .. } => {
            println!("*** [#{}] {}: {}", channel, sender, content);
        }
        NodeEvent::Typing { sender } => println!("... {} is typing", sender),
        NodeEvent::Reaction { sender, msg_id, emoji } => {
            println!("{} reacted {} to msg {}", sender, emoji, msg_id);
        }
        NodeEvent::PresenceChanged { joined, left } => {
            if !joined.is_empty() {
                println!("+ online: {}", joined.join(", "));
            }
            if !left.is_empty() {
                println!("- offline: {}", left.join(", "));
            }
        }
        NodeEvent::Notice(text) => println!("! {}", text),
    }
}
