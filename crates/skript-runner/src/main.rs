//! Skript runner
//!
//! This binary:
//! 1. Restores global variables from `SKRIPT_VARIABLES` (`variables.csv`)
//! 2. Loads a script file, or every `.sk` file in a directory
//! 3. Fires the `load` event
//! 4. Runs the tick loop, firing `tick` every tick
//! 5. Saves global variables on quit
//!
//! Commands, one per line on stdin:
//! - `r` or `reload` - Reload all scripts
//! - `l` or `list` - List loaded scripts
//! - `join <player>` - Fire a join event
//! - `chat <player> <message>` - Fire a chat event, or run a script command
//!   as the player if the message starts with `/`
//! - `/<command> [args]` - Run a script command as the console
//! - `q` or `quit` - Quit
//! - `help` - Show help
//! - anything else fires `custom event "<line>"`

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use module_skript::{ScriptHost, TracingSink, events};
use skript_lang::Value;
use tracing::{error, info, warn};

/// Commands that can be sent from the input thread
enum Command {
    Reload,
    List,
    Join(String),
    Chat { player: String, message: String },
    Run { sender: Option<String>, line: String },
    Custom(String),
    Quit,
    Help,
    Unknown(String),
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("skript_runner=info".parse()?)
                .add_directive("skript_lang=info".parse()?)
                .add_directive("module_skript=info".parse()?),
        )
        .init();

    let scripts = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SKRIPT_SCRIPTS").ok())
        .map_or_else(|| PathBuf::from("scripts"), PathBuf::from);

    let tick_ms: u64 = std::env::var("SKRIPT_TICK_MS")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(50);

    let max_ticks: Option<u64> = std::env::var("SKRIPT_MAX_TICKS")
        .ok()
        .and_then(|p| p.parse().ok());

    let variables = std::env::var("SKRIPT_VARIABLES")
        .map_or_else(|_| PathBuf::from("variables.csv"), PathBuf::from);

    let tick_length = Duration::from_millis(tick_ms.max(1));
    info!(scripts = %scripts.display(), ?tick_length, "starting skript runner");

    let registry = module_skript::registry(Arc::new(TracingSink))?;
    let host = ScriptHost::with_tick_length(registry, tick_length);
    host.load_variables(&variables)?;

    load_scripts(&host, &scripts)?;
    host.fire_named(events::LOAD);

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<Command>();
    thread::spawn(move || input_thread(&cmd_tx));

    let mut running = true;
    while running {
        let start = Instant::now();

        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Command::Reload => {
                    info!("reloading scripts");
                    if let Err(e) = load_scripts(&host, &scripts) {
                        error!("failed to reload scripts: {e}");
                    }
                }
                Command::List => {
                    let loaded = host.scripts();
                    info!("loaded scripts ({}):", loaded.len());
                    for script in loaded {
                        info!(
                            "  - {} ({} triggers, {} functions, {} commands)",
                            script.name,
                            script.triggers.len(),
                            script.functions.len(),
                            script.commands.len()
                        );
                    }
                    let commands = host.env().commands.names();
                    if !commands.is_empty() {
                        info!("commands: /{}", commands.join(", /"));
                    }
                }
                Command::Join(player) => {
                    let event = host
                        .new_event(events::JOIN)
                        .with_value("player", Value::object("player", &player));
                    host.fire(&Arc::new(event));
                }
                Command::Chat { player, message } => {
                    let event = host
                        .new_event(events::CHAT)
                        .with_value("player", Value::object("player", &player))
                        .with_value("message", Value::text(message));
                    let event = Arc::new(event);
                    host.fire(&event);
                    if event.is_cancelled() {
                        info!(player, "chat message cancelled");
                    }
                }
                Command::Run { sender, line } => {
                    let who = sender.as_deref().unwrap_or("console");
                    match host.run_command(sender.as_deref(), &line) {
                        Some(outcome) => {
                            for reply in outcome.reply() {
                                info!(to = who, "{reply}");
                            }
                        }
                        None => info!(to = who, "unknown command: {line}"),
                    }
                }
                Command::Custom(name) => {
                    let event = host
                        .new_event(events::CUSTOM)
                        .with_value("name", Value::text(name.as_str()));
                    if host.fire(&Arc::new(event)) == 0 {
                        info!("no trigger listens to custom event \"{name}\"");
                    }
                }
                Command::Quit => {
                    info!("shutting down");
                    running = false;
                }
                Command::Help => {
                    info!("commands:");
                    info!("  r, reload               - reload all scripts");
                    info!("  l, list                 - list loaded scripts");
                    info!("  join <player>           - fire a join event");
                    info!("  chat <player> <message> - fire a chat event");
                    info!("  chat <player> /<cmd>    - run a script command as a player");
                    info!("  /<cmd> [args]           - run a script command as the console");
                    info!("  q, quit                 - quit");
                    info!("  <name>                  - fire custom event \"<name>\"");
                }
                Command::Unknown(s) => {
                    info!("unknown command: '{s}'. Type 'help' for commands.");
                }
            }
        }

        host.tick();
        host.fire_named(events::TICK);

        let tick = host.scheduler().current_tick();
        if max_ticks.is_some_and(|max| tick >= max) {
            info!(tick, "reached SKRIPT_MAX_TICKS");
            running = false;
        }

        let elapsed = start.elapsed();
        if elapsed < tick_length {
            thread::sleep(tick_length - elapsed);
        }
    }

    let pending = host.scheduler().pending();
    if pending > 0 {
        warn!(pending, "exiting with suspended walks");
    }
    host.save_variables(&variables)?;
    Ok(())
}

fn load_scripts(host: &ScriptHost, path: &Path) -> eyre::Result<()> {
    let loaded = if path.is_dir() {
        host.load_dir(path)?
    } else {
        let script = host.load_file(path)?;
        if script.diagnostics.has_errors() {
            warn!(
                script = script.name.as_str(),
                "script loaded with errors:\n{}",
                script.diagnostics.render()
            );
        }
        vec![script]
    };
    let errors: usize = loaded
        .iter()
        .map(|script| script.diagnostics.errors().count())
        .sum();
    info!(scripts = loaded.len(), errors, "scripts loaded");
    Ok(())
}

fn input_thread(tx: &Sender<Command>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let Some(cmd) = parse_command(&line) else {
            continue;
        };
        let is_quit = matches!(cmd, Command::Quit);
        if tx.send(cmd).is_err() || is_quit {
            return;
        }
    }
    // stdin closed
    let _ = tx.send(Command::Quit);
}

fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if input.starts_with('/') {
        return Some(Command::Run {
            sender: None,
            line: input.to_string(),
        });
    }
    let (head, rest) = input
        .split_once(char::is_whitespace)
        .map_or((input, ""), |(head, rest)| (head, rest.trim()));
    Some(match head.to_lowercase().as_str() {
        "r" | "reload" => Command::Reload,
        "l" | "list" => Command::List,
        "q" | "quit" | "exit" => Command::Quit,
        "help" | "h" | "?" => Command::Help,
        "join" if !rest.is_empty() => Command::Join(rest.to_string()),
        "chat" => match rest.split_once(char::is_whitespace) {
            Some((player, message)) if message.trim_start().starts_with('/') => Command::Run {
                sender: Some(player.to_string()),
                line: message.trim().to_string(),
            },
            Some((player, message)) => Command::Chat {
                player: player.to_string(),
                message: message.trim().to_string(),
            },
            None => Command::Unknown(input.to_string()),
        },
        "join" => Command::Unknown(input.to_string()),
        _ => Command::Custom(input.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert!(parse_command("   ").is_none());
        assert!(matches!(parse_command("Q"), Some(Command::Quit)));
        assert!(matches!(parse_command("reload"), Some(Command::Reload)));
        assert!(matches!(parse_command("join Notch"), Some(Command::Join(p)) if p == "Notch"));
        assert!(matches!(
            parse_command("chat Notch hello there"),
            Some(Command::Chat { player, message }) if player == "Notch" && message == "hello there"
        ));
        assert!(matches!(parse_command("chat Notch"), Some(Command::Unknown(_))));
        assert!(matches!(
            parse_command("/give apple 3"),
            Some(Command::Run { sender: None, line }) if line == "/give apple 3"
        ));
        assert!(matches!(
            parse_command("chat Notch  /hello"),
            Some(Command::Run { sender: Some(p), line }) if p == "Notch" && line == "/hello"
        ));
        assert!(matches!(parse_command("score"), Some(Command::Custom(n)) if n == "score"));
    }
}
