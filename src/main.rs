use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crabirc::app::event::{Command, Event, NetId};
use crabirc::config::{self, AppConfig};
use crabirc::error::ClientError;
use crabirc::irc::commands::{parse_command, ParsedCommand, HELP};
use crabirc::irc::manager::{ClientHandle, IrcManager};
use crabirc::logging::{init_tracing, TrafficLogger};

#[tokio::main]
async fn main() -> Result<()> {
    // Optional first argument: path to a config file
    let cfg = match std::env::args().nth(1) {
        Some(path) => config::load_config_from(&PathBuf::from(path))?,
        None => config::load_config()?,
    };
    init_tracing(&cfg.logging);

    if let Err(e) = run_app(cfg).await {
        error!(error = %e, "exiting");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

async fn run_app(cfg: AppConfig) -> Result<(), ClientError> {
    let mut manager = IrcManager::new(cfg.reconnect.clone());
    if cfg.logging.traffic_enabled {
        TrafficLogger::new(&cfg.logging).attach(&mut manager);
    }
    print_events(&mut manager);

    // Auto-connect servers from config; the first server when none is marked
    let mut selected: Vec<_> = cfg.servers.iter().filter(|s| s.auto_connect).cloned().collect();
    if selected.is_empty() {
        selected.extend(cfg.servers.first().cloned());
    }

    let mut networks = Vec::new();
    for srv_cfg in selected {
        let name = srv_cfg.name.clone();
        let net_id = manager.connect(srv_cfg).await?;
        info!(%net_id, %name, "connection ready");
        networks.push((name, net_id));
    }
    if networks.is_empty() {
        info!("no servers configured");
        return Ok(());
    }

    let console = tokio::spawn(console(manager.handle(), networks));
    let result = manager.run().await;
    console.abort();
    result
}

/// Print conversation traffic and connection milestones to stdout.
fn print_events(manager: &mut IrcManager) {
    manager.subscribe("irc-privmsg", |network, event| {
        if let Event::Message(msg) = event {
            let from = msg.source_nick().unwrap_or("*");
            let target = msg.param(0).unwrap_or("");
            let text = msg.param(1).unwrap_or("");
            let stamp = chrono::Local::now().format("%H:%M");
            match text.strip_prefix("\x01ACTION ").map(|t| t.trim_end_matches('\x01')) {
                Some(action) => println!("[{}] {} {} * {} {}", stamp, network.config().name, target, from, action),
                None => println!("[{}] {} {} <{}> {}", stamp, network.config().name, target, from, text),
            }
        }
    });
    manager.subscribe("registration-complete", |network, event| {
        if let Event::RegistrationComplete { nick } = event {
            println!("-- {}: registered as {}", network.config().name, nick);
        }
    });
    manager.subscribe("sync-done", |network, event| {
        if let Event::SyncDone { channel } = event {
            let users = network
                .registry()
                .channel(channel)
                .map(|c| c.users.len())
                .unwrap_or(0);
            println!("-- {}: {} synced ({} users)", network.config().name, channel, users);
        }
    });
    manager.subscribe("reconnected", |network, _| {
        println!("-- {}: reconnected", network.config().name);
    });
    manager.subscribe("disconnected", |network, _| {
        println!("-- {}: disconnected", network.config().name);
    });
}

/// Read console input until `/quit` or end of input.
async fn console(handle: ClientHandle, networks: Vec<(String, NetId)>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut active = 0usize;
    let mut target: Option<String> = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                quit_all(&handle, &networks, None);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let (_, net_id) = &networks[active];

        if !line.starts_with('/') {
            handle.send(net_id, Command::Raw(line));
            continue;
        }

        let Some(parsed) = parse_command(&line) else {
            println!("-- unknown command, /help for a list");
            continue;
        };
        match parsed {
            ParsedCommand::Help => println!("{}", HELP),
            ParsedCommand::Server { name } => {
                match networks.iter().position(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                    Some(index) => {
                        active = index;
                        target = None;
                        println!("-- active connection: {}", networks[active].0);
                    }
                    None => println!("-- {}", ClientError::UnknownNetwork(name)),
                }
            }
            ParsedCommand::Quit { message } => {
                quit_all(&handle, &networks, message);
                return;
            }
            other => {
                match &other {
                    ParsedCommand::Join { channels } => target = channels.last().cloned(),
                    ParsedCommand::Msg { target: to, .. } => target = Some(to.clone()),
                    _ => {}
                }
                match other.into_command(target.as_deref()) {
                    Some(command) => {
                        handle.send(net_id, command);
                    }
                    None => println!("-- no current target, /join or /msg first"),
                }
            }
        }
    }
}

fn quit_all(handle: &ClientHandle, networks: &[(String, NetId)], message: Option<String>) {
    for (_, net_id) in networks {
        handle.send(net_id, Command::Quit(message.clone()));
    }
}
