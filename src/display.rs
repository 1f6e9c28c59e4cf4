use colored::Colorize;
use console::Alignment;

use crate::engine::{Action, Phase, ServiceView, Snapshot};
use crate::health;

/// Print all forwards grouped by context (SSH forwards share one group),
/// keeping list order inside each group. The leading number is the
/// forward's position, as used by `burrow move`.
pub fn print_forward_list(snapshot: &Snapshot, group: Option<&str>, probe: bool) {
    if snapshot.services.is_empty() {
        println!("{}", "No port forwards configured.".yellow());
        println!("Run `burrow add` to create one.");
        return;
    }

    let mut groups: Vec<(&str, Vec<(usize, &ServiceView)>)> = Vec::new();
    for (idx, view) in snapshot.services.iter().enumerate() {
        let key = view.config.group_key();
        if group.is_some_and(|g| g != key) {
            continue;
        }
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push((idx, view)),
            None => groups.push((key, vec![(idx, view)])),
        }
    }

    let rows: Vec<Row> = groups
        .iter()
        .flat_map(|(_, members)| members.iter())
        .map(|(idx, view)| Row::build(*idx, view, probe))
        .collect();

    let w_name = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
    let w_status = rows
        .iter()
        .map(|r| console::measure_text_width(&r.status))
        .max()
        .unwrap_or(0);
    let w_target = rows.iter().map(|r| r.target.len()).max().unwrap_or(0);
    let w_index = rows.iter().map(|r| r.index.len()).max().unwrap_or(0);

    let mut rows = rows.iter();
    for (key, members) in &groups {
        let label = if key.is_empty() { "(no context)" } else { key };
        println!("{}", label.bold().underline());
        for row in rows.by_ref().take(members.len()) {
            print_row(row, w_index, w_name, w_status, w_target);
        }
    }

    if let Some(ref loading) = snapshot.loading {
        let verb = match loading.action {
            Action::Start => "starting",
            Action::Stop => "stopping",
        };
        println!("{} {} {}…", "◐".yellow(), verb.yellow(), loading.name.bold());
    }
}

fn print_row(row: &Row, w_index: usize, w_name: usize, w_status: usize, w_target: usize) {
    let bullet = match row.phase {
        Phase::Running => "●".green().to_string(),
        Phase::Starting | Phase::Stopping => "◐".yellow().to_string(),
        Phase::Stopped if row.error.is_some() => "●".red().to_string(),
        Phase::Stopped => "○".dimmed().to_string(),
    };

    let name = match row.phase {
        Phase::Running => row.name.green().bold().to_string(),
        _ if row.error.is_some() => row.name.red().bold().to_string(),
        _ => row.name.to_string(),
    };

    let status = match row.phase {
        Phase::Running => row.status.green().to_string(),
        Phase::Starting | Phase::Stopping => row.status.yellow().to_string(),
        Phase::Stopped => row.status.dimmed().to_string(),
    };

    // Measure actual display width of health icons so the placeholder
    // matches even when ✓/✗ render as double-width in some fonts.
    let w_health = console::measure_text_width("✓").max(1);
    let health = match row.healthy {
        Some(true) => pad(&"✓".green().to_string(), w_health),
        Some(false) => pad(&"✗".red().to_string(), w_health),
        None => " ".repeat(w_health),
    };

    println!(
        "  {} {} {}  {}  {}  {}  {}",
        pad(&row.index.dimmed().to_string(), w_index),
        bullet,
        pad(&name, w_name),
        pad(&status, w_status),
        health,
        pad(&row.target, w_target),
        row.ports.dimmed()
    );
    if let Some(ref err) = row.error {
        println!("      {} {}", "↳".red(), err.red());
    }
}

/// One-line summary of a single service, used after up/down.
pub fn print_outcome(view: &ServiceView) {
    let name = &view.config.name;
    match (&view.status.error, view.status.running) {
        (Some(err), _) => println!("{} {}: {}", "✗".red(), name.red().bold(), err),
        (None, true) => println!(
            "{} {} {} ({})",
            "●".green(),
            name.green().bold(),
            "running".green(),
            view.config.ports.join(", ")
        ),
        (None, false) => println!("{} {} {}", "○".dimmed(), name.bold(), "stopped".dimmed()),
    }
}

/// Pad an ANSI-colored string to a visible width using console's awareness of escape codes.
fn pad(s: &str, width: usize) -> String {
    console::pad_str(s, width, Alignment::Left, None).to_string()
}

struct Row {
    index: String,
    name: String,
    phase: Phase,
    status: String,
    error: Option<String>,
    healthy: Option<bool>,
    target: String,
    ports: String,
}

impl Row {
    fn build(index: usize, view: &ServiceView, probe: bool) -> Self {
        let status = match view.phase {
            Phase::Running => "running",
            Phase::Starting => "starting…",
            Phase::Stopping => "stopping…",
            Phase::Stopped if view.status.error.is_some() => "failed",
            Phase::Stopped => "stopped",
        };
        let healthy = if probe && view.phase == Phase::Running {
            health::forward_healthy(&view.config)
        } else {
            None
        };
        let mut target = view.config.target();
        if let Some(ref iface) = view.config.local_interface {
            target.push_str(&format!(" @{}", iface));
        }
        Self {
            index: format!("{}.", index),
            name: view.config.name.clone(),
            phase: view.phase,
            status: status.to_string(),
            error: view.status.error.clone(),
            healthy,
            target,
            ports: view.config.ports.join(", "),
        }
    }
}
