use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::display;
use crate::engine::{Action, Engine};

#[derive(Debug, PartialEq, Eq)]
enum ShellCommand {
    List,
    Up(String),
    Down(String),
    Remove(String),
    Move(String, usize),
    Reconnect,
    Clear(String),
    Help,
    Quit,
    Nothing,
}

fn parse_line(line: &str) -> Result<ShellCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let name = |verb: &str| {
        words
            .get(1)
            .map(|n| n.to_string())
            .ok_or_else(|| format!("usage: {} <name>", verb))
    };
    match words.first().copied() {
        None => Ok(ShellCommand::Nothing),
        Some("ls" | "list" | "status") => Ok(ShellCommand::List),
        Some("up" | "start") => name("up").map(ShellCommand::Up),
        Some("down" | "stop") => name("down").map(ShellCommand::Down),
        Some("rm" | "remove") => name("rm").map(ShellCommand::Remove),
        Some("clear") => name("clear").map(ShellCommand::Clear),
        Some("mv" | "move") => match (words.get(1), words.get(2).map(|i| i.parse::<usize>())) {
            (Some(name), Some(Ok(index))) => Ok(ShellCommand::Move(name.to_string(), index)),
            _ => Err("usage: mv <name> <index>".to_string()),
        },
        Some("reconnect") => Ok(ShellCommand::Reconnect),
        Some("help" | "?") => Ok(ShellCommand::Help),
        Some("quit" | "exit" | "q") => Ok(ShellCommand::Quit),
        Some(other) => Err(format!("unknown command '{}' (try help)", other)),
    }
}

fn print_help() {
    println!("  {}               list forwards", "ls".bold());
    println!("  {} <name>        start a forward in the background", "up".bold());
    println!("  {} <name>      stop a forward in the background", "down".bold());
    println!("  {} <name>        remove a forward", "rm".bold());
    println!("  {} <name> <i>    move a forward to position i", "mv".bold());
    println!("  {}        restart every forward that failed", "reconnect".bold());
    println!("  {} <name>     dismiss a forward's error", "clear".bold());
    println!("  {}             leave (forwards keep running)", "quit".bold());
}

/// Boot the engine, keep reconciling in the background, and serve
/// commands from stdin until quit, EOF or Ctrl-C.
pub async fn run(engine: Arc<Engine>, cfg: &Config) -> Result<()> {
    let mut reconciler = engine.boot(cfg.verify_period()).await;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    info!(period = ?cfg.verify_period(), "reconciliation started");

    display::print_forward_list(&engine.snapshot(), None, cfg.probe_ports);
    flush_message(&engine);
    println!("{}", "Type help for commands.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            Some(names) = reconciler.next_drift() => {
                print_drift(&names);
                continue;
            }
            Some(name) = done_rx.recv() => {
                print_service(&engine, &name);
                flush_message(&engine);
                continue;
            }
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{}", usage.yellow());
                continue;
            }
        };

        match command {
            ShellCommand::Nothing => continue,
            ShellCommand::Quit => break,
            ShellCommand::Help => print_help(),
            ShellCommand::List => {
                display::print_forward_list(&engine.snapshot(), None, cfg.probe_ports)
            }
            ShellCommand::Up(name) => dispatch(&engine, &done_tx, name, Action::Start),
            ShellCommand::Down(name) => dispatch(&engine, &done_tx, name, Action::Stop),
            ShellCommand::Remove(name) => engine.remove(&name).await,
            ShellCommand::Move(name, index) => {
                engine.reorder(&name, index).await;
                display::print_forward_list(&engine.snapshot(), None, false);
            }
            ShellCommand::Reconnect => {
                let tried = engine.reconnect_all().await;
                if tried.is_empty() {
                    println!("{}", "Nothing to reconnect.".yellow());
                }
                for name in &tried {
                    print_service(&engine, name);
                }
            }
            ShellCommand::Clear(name) => engine.clear_service_error(&name),
        }
        flush_message(&engine);
    }

    drop(reconciler);
    Ok(())
}

/// Run a start or stop without blocking the prompt; `done` gets the name
/// once it settles.
fn dispatch(engine: &Arc<Engine>, done: &mpsc::UnboundedSender<String>, name: String, action: Action) {
    let engine = engine.clone();
    let done = done.clone();
    tokio::spawn(async move {
        match action {
            Action::Start => engine.start(&name).await,
            Action::Stop => engine.stop(&name).await,
        }
        let _ = done.send(name);
    });
}

fn print_drift(names: &[String]) {
    for name in names {
        println!("{} {} stopped unexpectedly", "✗".red(), name.red().bold());
    }
    println!("{}", "Run reconnect to restart failed forwards.".dimmed());
}

fn print_service(engine: &Engine, name: &str) {
    if let Some(view) = engine.snapshot().service(name) {
        display::print_outcome(view);
    }
}

/// Failures reported through the global message, as opposed to confirmations.
pub fn is_error_message(msg: &str) -> bool {
    msg.starts_with("Error") || msg.starts_with("No configuration")
}

/// Show and dismiss the global message, if any.
fn flush_message(engine: &Engine) {
    match engine.dismiss_message() {
        Some(msg) if is_error_message(&msg) => println!("{} {}", "✗".red(), msg.red()),
        Some(msg) => println!("{} {}", "✓".green(), msg),
        None => {}
    }
}
