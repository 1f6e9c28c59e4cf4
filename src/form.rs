use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};

use crate::cli::FormArgs;
use crate::engine::Engine;
use crate::forward::{self, ForwardConfig, ForwardType};

/// Add or edit, decided by whether an existing forward is being replaced.
enum Mode {
    Add,
    Edit(String),
}

/// Run the add form until the backend accepts it or the user gives up.
/// Returns whether the forward was saved.
pub async fn add(engine: &Engine, args: FormArgs) -> Result<bool> {
    submit(engine, Mode::Add, args, None).await
}

/// Run the edit form for `name`, prefilled from its current config.
pub async fn edit(engine: &Engine, name: &str, args: FormArgs) -> Result<bool> {
    let current = engine
        .config(name)
        .with_context(|| format!("port forward '{}' not found", name))?;
    submit(engine, Mode::Edit(name.to_string()), args, Some(current)).await
}

async fn submit(
    engine: &Engine,
    mode: Mode,
    args: FormArgs,
    initial: Option<ForwardConfig>,
) -> Result<bool> {
    submit_with(engine, mode, args, initial, fill).await
}

async fn submit_with<F>(
    engine: &Engine,
    mode: Mode,
    args: FormArgs,
    initial: Option<ForwardConfig>,
    fill: F,
) -> Result<bool>
where
    F: FnMut(&FormArgs, Option<&ForwardConfig>) -> Result<ForwardConfig>,
{
    let saved = attempt(engine, mode, args, initial, fill).await;
    // The form is closed whichever way it ended.
    engine.clear_form_error();
    saved
}

async fn attempt<F>(
    engine: &Engine,
    mode: Mode,
    mut args: FormArgs,
    mut initial: Option<ForwardConfig>,
    mut fill: F,
) -> Result<bool>
where
    F: FnMut(&FormArgs, Option<&ForwardConfig>) -> Result<ForwardConfig>,
{
    loop {
        let config = tokio::task::block_in_place(|| fill(&args, initial.as_ref()))?;
        warn_privileged(&config);

        match mode {
            Mode::Add => engine.add(config.clone()).await,
            Mode::Edit(ref old) => engine.update(old, config.clone()).await,
        }

        let Some(err) = engine.form_error() else {
            return Ok(true);
        };
        println!("{} {}", "✗".red(), err.red());
        if args.no_input || !tokio::task::block_in_place(confirm_retry)? {
            return Ok(false);
        }
        // Flags only seed the first attempt; later attempts start from what was typed.
        args = FormArgs::default();
        initial = Some(config);
    }
}

fn confirm_retry() -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Edit and try again?")
        .default(true)
        .interact()
        .context("failed to read confirmation")
}

/// Build a config from flags, falling back to prompts (or to `initial`
/// when prompting is disabled).
fn fill(args: &FormArgs, initial: Option<&ForwardConfig>) -> Result<ForwardConfig> {
    let forward_type = match args.forward_type {
        Some(t) => t,
        None if args.no_input => initial.map(|c| c.forward_type).unwrap_or_default(),
        None => select_type(initial.map(|c| c.forward_type).unwrap_or_default())?,
    };
    let same_type = initial.filter(|c| c.forward_type == forward_type);

    let mut config = match forward_type {
        ForwardType::Kubectl => {
            let context = text(args, &args.context, "Context", same_type.map(|c| c.context.as_str()))?;
            let namespace = text(
                args,
                &args.namespace,
                "Namespace",
                Some(same_type.map(|c| c.namespace.as_str()).unwrap_or("default")),
            )?;
            let service = text(args, &args.service, "Service", same_type.map(|c| c.service.as_str()))?;
            ForwardConfig::kubectl("", context, namespace, service, Vec::new())
        }
        ForwardType::Ssh => {
            let host = text(args, &args.host, "SSH host", same_type.map(|c| c.context.as_str()))?;
            ForwardConfig::ssh("", host, Vec::new())
        }
    };

    config.ports = if args.ports.is_empty() {
        let current = initial.map(|c| c.ports.join(", "));
        forward::split_ports(&text(args, &None, "Ports (local:remote, comma separated)", current.as_deref())?)
    } else {
        args.ports.iter().flat_map(|p| forward::split_ports(p)).collect()
    };

    let interface = text(
        args,
        &args.interface,
        "Local interface (empty for 127.0.0.1)",
        initial.and_then(|c| c.local_interface.as_deref()),
    )?;
    config.local_interface = Some(interface).filter(|i| !i.trim().is_empty());

    let derived = forward::derive_name(forward_type, &config.service, &config.service, &config.ports);
    let name = text(
        args,
        &args.name,
        "Name",
        Some(initial.map(|c| c.name.as_str()).unwrap_or(derived.as_str())),
    )?;
    config.name = if name.trim().is_empty() { derived } else { name.trim().to_string() };

    Ok(config)
}

fn select_type(current: ForwardType) -> Result<ForwardType> {
    let options = [ForwardType::Kubectl, ForwardType::Ssh];
    let labels = ["kubectl port-forward", "SSH tunnel"];
    let idx = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Forward type")
        .items(&labels)
        .default(if current == ForwardType::Ssh { 1 } else { 0 })
        .interact()
        .context("selection cancelled")?;
    Ok(options[idx])
}

/// A flag value if given, else a prompt prefilled with `initial`.
fn text(args: &FormArgs, flag: &Option<String>, prompt: &str, initial: Option<&str>) -> Result<String> {
    if let Some(value) = flag {
        return Ok(value.clone());
    }
    let initial = initial.unwrap_or_default();
    if args.no_input {
        return Ok(initial.to_string());
    }
    Input::<String>::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .with_initial_text(initial)
        .allow_empty(true)
        .interact_text()
        .with_context(|| format!("failed to read {}", prompt.to_lowercase()))
}

fn warn_privileged(config: &ForwardConfig) {
    let ports = config.privileged_ports();
    if ports.is_empty() || is_root() {
        return;
    }
    let list: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
    println!(
        "{} port(s) {} require root privileges; run the backend with sudo or use ports >= 1024",
        "⚠".yellow(),
        list.join(", ")
    );
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> FormArgs {
        FormArgs {
            no_input: true,
            ..FormArgs::default()
        }
    }

    #[test]
    fn fills_kubectl_from_flags() {
        let args = FormArgs {
            context: Some("prod".into()),
            namespace: Some("data".into()),
            service: Some("postgres".into()),
            ports: vec!["5432:5432, 6432".into()],
            ..flags()
        };
        let cfg = fill(&args, None).unwrap();
        assert_eq!(cfg.forward_type, ForwardType::Kubectl);
        assert_eq!(cfg.name, "postgres-5432");
        assert_eq!(cfg.ports, vec!["5432:5432", "6432"]);
        assert_eq!(cfg.local_interface, None);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn fills_ssh_from_flags() {
        let args = FormArgs {
            forward_type: Some(ForwardType::Ssh),
            host: Some("deploy@bastion".into()),
            ports: vec!["8080:80".into()],
            interface: Some("127.0.0.2".into()),
            ..flags()
        };
        let cfg = fill(&args, None).unwrap();
        assert_eq!(cfg.name, "bastion-8080");
        assert_eq!(cfg.context, "deploy@bastion");
        assert_eq!(cfg.namespace, forward::SSH_NAMESPACE);
        assert_eq!(cfg.local_interface.as_deref(), Some("127.0.0.2"));
    }

    #[test]
    fn explicit_name_wins() {
        let args = FormArgs {
            name: Some(" api ".into()),
            service: Some("svc".into()),
            ports: vec!["80".into()],
            ..flags()
        };
        assert_eq!(fill(&args, None).unwrap().name, "api");
    }

    #[test]
    fn edit_keeps_unchanged_fields() {
        let mut current = ForwardConfig::kubectl("db", "prod", "data", "postgres", vec!["5432".into()]);
        current.local_interface = Some("127.0.0.3".into());
        let args = FormArgs {
            name: Some("db2".into()),
            ..flags()
        };
        let cfg = fill(&args, Some(&current)).unwrap();
        assert_eq!(cfg.name, "db2");
        assert_eq!(cfg.context, "prod");
        assert_eq!(cfg.namespace, "data");
        assert_eq!(cfg.ports, vec!["5432"]);
        assert_eq!(cfg.local_interface.as_deref(), Some("127.0.0.3"));
    }

    #[test]
    fn missing_fields_surface_as_invalid_config() {
        let cfg = fill(&flags(), None).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_without_input_reports_form_error_and_closes() {
        use crate::testing::FakeGateway;
        use std::sync::Arc;

        let gw = Arc::new(FakeGateway::with_configs(&["db"]));
        let engine = Engine::new(gw.clone());
        engine.startup().await;
        gw.fail_next("add", "disk full");

        let args = FormArgs {
            service: Some("api".into()),
            ports: vec!["8080:80".into()],
            ..flags()
        };
        assert!(!add(&engine, args).await.unwrap());
        assert_eq!(engine.form_error(), None);
        assert!(engine.config("api-8080").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_prompt_still_clears_form_error() {
        use crate::testing::{FakeGateway, kube};
        use std::sync::Arc;

        let gw = Arc::new(FakeGateway::with_configs(&["db"]));
        let engine = Engine::new(gw.clone());
        engine.startup().await;
        engine.add(kube("db")).await;
        assert!(engine.form_error().is_some());

        let cancelled = |_: &FormArgs, _: Option<&ForwardConfig>| -> Result<ForwardConfig> {
            anyhow::bail!("selection cancelled")
        };
        let result = submit_with(&engine, Mode::Add, flags(), None, cancelled).await;
        assert!(result.is_err());
        assert_eq!(engine.form_error(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_without_input_renames() {
        use crate::testing::FakeGateway;
        use std::sync::Arc;

        let gw = Arc::new(FakeGateway::with_configs(&["db"]));
        let engine = Engine::new(gw.clone());
        engine.startup().await;

        let args = FormArgs {
            name: Some("db2".into()),
            ..flags()
        };
        assert!(edit(&engine, "db", args).await.unwrap());
        assert!(engine.config("db").is_none());
        assert!(engine.config("db2").is_some());
    }
}
