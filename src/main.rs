mod cli;
mod config;
mod display;
mod engine;
mod form;
mod forward;
mod gateway;
mod health;
mod picker;
mod reconcile;
mod shell;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::Colorize;
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::Config;
use engine::Engine;
use gateway::CommandGateway;

#[tokio::main]
async fn main() -> Result<()> {
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();
    let cfg = Config::load();

    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(cli.verbose, &cfg);

    // These two never touch the backend.
    match cli.command {
        Command::Config => return cmd_config(&cfg),
        Command::Completions { shell } => return cmd_completions(shell, &cfg),
        _ => {}
    }

    let gateway = CommandGateway::new(&cfg.backend, cfg.backend_timeout())
        .context("failed to set up backend command; check `backend` in ~/.burrow/config.toml")?;
    let engine = Arc::new(Engine::new(Arc::new(gateway)));
    engine.startup().await;

    match cli.command {
        Command::List { group } => cmd_list(&engine, group, &cfg),
        Command::Up { name } => cmd_up(&engine, name).await,
        Command::Down { name } => cmd_down(&engine, name).await,
        Command::Add(form) => cmd_add(&engine, form).await,
        Command::Edit { target, form } => cmd_edit(&engine, target, form).await,
        Command::Remove { name, yes } => cmd_remove(&engine, name, yes).await,
        Command::Move { name, index } => cmd_move(&engine, name, index).await,
        Command::Watch => shell::run(engine.clone(), &cfg).await,
        Command::Config | Command::Completions { .. } => Ok(()),
    }
}

/// RUST_LOG wins, then `log_level` from the config file; `-v` forces debug.
fn init_logging(verbose: bool, cfg: &Config) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(cfg.log_level.as_deref().unwrap_or("warn"))
        })
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Print the engine's global message, failing the command if it is an error.
fn finish(engine: &Engine) -> Result<()> {
    match engine.dismiss_message() {
        Some(msg) if shell::is_error_message(&msg) => anyhow::bail!(msg),
        Some(msg) => {
            println!("{} {}", "✓".green(), msg);
            Ok(())
        }
        None => Ok(()),
    }
}

fn cmd_list(engine: &Engine, group: Option<String>, cfg: &Config) -> Result<()> {
    let snapshot = engine.snapshot();
    if let Some(ref g) = group {
        if !snapshot.services.iter().any(|s| s.config.group_key() == g) {
            anyhow::bail!("no port forwards in group '{}'", g);
        }
    }
    display::print_forward_list(&snapshot, group.as_deref(), cfg.probe_ports);
    finish(engine)
}

async fn cmd_up(engine: &Engine, name: Option<String>) -> Result<()> {
    let candidates: Vec<_> = engine
        .snapshot()
        .services
        .into_iter()
        .filter(|s| !s.status.running)
        .map(|s| s.config)
        .collect();
    let name = picker::resolve_name(name, "Start which forward?", &candidates)?;
    engine.start(&name).await;
    report(engine, &name)
}

async fn cmd_down(engine: &Engine, name: Option<String>) -> Result<()> {
    let candidates: Vec<_> = engine
        .snapshot()
        .services
        .into_iter()
        .filter(|s| s.status.running)
        .map(|s| s.config)
        .collect();
    let name = picker::resolve_name(name, "Stop which forward?", &candidates)?;
    engine.stop(&name).await;
    report(engine, &name)
}

/// Print how a start/stop ended and fail if the service carries an error.
fn report(engine: &Engine, name: &str) -> Result<()> {
    finish(engine)?;
    let snapshot = engine.snapshot();
    let Some(view) = snapshot.service(name) else {
        return Ok(());
    };
    if let Some(ref err) = view.status.error {
        anyhow::bail!("{}: {}", name, err);
    }
    display::print_outcome(view);
    Ok(())
}

async fn cmd_add(engine: &Engine, form: cli::FormArgs) -> Result<()> {
    if !form::add(engine, form).await? {
        anyhow::bail!("port forward not added");
    }
    finish(engine)
}

async fn cmd_edit(engine: &Engine, target: Option<String>, form: cli::FormArgs) -> Result<()> {
    let name = picker::resolve_name(target, "Edit which forward?", &engine.configs())?;
    if !form::edit(engine, &name, form).await? {
        anyhow::bail!("port forward '{}' not changed", name);
    }
    finish(engine)
}

async fn cmd_remove(engine: &Engine, name: Option<String>, yes: bool) -> Result<()> {
    let name = picker::resolve_name(name, "Remove which forward?", &engine.configs())?;

    if !yes {
        let running = engine.status(&name).is_some_and(|s| s.running);
        let prompt = if running {
            format!("Remove '{}'? It is running and will be stopped.", name)
        } else {
            format!("Remove '{}'?", name)
        };
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", "Cancelled.".dimmed());
            return Ok(());
        }
    }

    engine.remove(&name).await;
    finish(engine)
}

async fn cmd_move(engine: &Engine, name: String, index: usize) -> Result<()> {
    if engine.config(&name).is_none() {
        anyhow::bail!("port forward '{}' not found", name);
    }
    engine.reorder(&name, index).await;
    finish(engine)?;
    display::print_forward_list(&engine.snapshot(), None, false);
    Ok(())
}

fn cmd_config(cfg: &Config) -> Result<()> {
    let path = Config::init()?;
    let editor = cfg.resolve_editor();

    let status = std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("failed to launch editor '{}'", editor))?;

    if !status.success() {
        anyhow::bail!("editor exited with {}", status);
    }

    Ok(())
}

fn cmd_completions(shell: Option<clap_complete::Shell>, cfg: &Config) -> Result<()> {
    let shell = match shell {
        Some(s) => s,
        None => {
            let name = cfg.shell.as_deref().ok_or_else(|| {
                anyhow::anyhow!(
                    "no shell specified; use `burrow completions <shell>` or set `shell` in ~/.burrow/config.toml"
                )
            })?;
            name.parse::<clap_complete::Shell>()
                .map_err(|_| anyhow::anyhow!("unknown shell '{}' in config", name))?
        }
    };

    let shell_name = match shell {
        clap_complete::Shell::Bash => "bash",
        clap_complete::Shell::Zsh => "zsh",
        clap_complete::Shell::Fish => "fish",
        clap_complete::Shell::Elvish => "elvish",
        clap_complete::Shell::PowerShell => "powershell",
        _ => anyhow::bail!("unsupported shell"),
    };
    unsafe { std::env::set_var("COMPLETE", shell_name) };
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    Ok(())
}
