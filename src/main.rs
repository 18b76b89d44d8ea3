//! watchtower-link operator console.
//!
//! Connects both channels, logs every snapshot tick and connectivity
//! change, and forwards commands typed on stdin.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use watchtower_link::config::LinkConfig;
use watchtower_link::console::{self, ConsoleInput};
use watchtower_link::registry::ConnectionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("WATCHTOWER_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = LinkConfig::from_env().context("loading link configuration")?;
    tracing::info!(
        live = %config.live_url,
        command = %config.command_url,
        "starting watchtower-link"
    );

    let manager = ConnectionManager::new(&config)?;

    let _ticks = manager.subscribe(|event| {
        let status = event.snapshot.status.as_deref().unwrap_or("-");
        tracing::info!(
            tick = event.snapshot.tick,
            sequence = event.sequence,
            status,
            sections = event.snapshot.sections.len(),
            "snapshot"
        );
    });
    let _live_status = manager.on_status_change(|event| {
        tracing::info!(channel = %event.channel, connected = event.connected, "status");
    });
    let _command_status = manager.on_command_status_change(|event| {
        tracing::info!(channel = %event.channel, connected = event.connected, "status");
    });

    manager.connect();
    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    tracing::info!("stdin closed");
                    break;
                };
                match console::parse_line(&line) {
                    Ok(ConsoleInput::Send(command)) => manager.send_command(&command),
                    Ok(ConsoleInput::Stats) => {
                        println!("{}", serde_json::to_string_pretty(&manager.stats())?);
                    }
                    Ok(ConsoleInput::Help) => println!("{}", console::HELP),
                    Ok(ConsoleInput::Quit) => break,
                    Ok(ConsoleInput::Empty) => {}
                    Err(err) => eprintln!("{err}\n{}", console::HELP),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    manager.disconnect();
    tracing::info!(stats = ?manager.stats(), "shut down");
    Ok(())
}
