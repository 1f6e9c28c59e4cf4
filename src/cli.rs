use clap::{Args, Parser, Subcommand};

use crate::forward::ForwardType;

#[derive(Parser)]
#[command(name = "burrow", about = "Port forward supervisor for kubectl and SSH tunnels", version)]
pub struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log debug output to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List all port forwards and their status
    #[command(alias = "ls", alias = "status")]
    List {
        /// Only show one context (or "SSH")
        #[arg(long, short)]
        group: Option<String>,
    },
    /// Start a port forward
    Up {
        /// Forward name (interactive picker if omitted)
        name: Option<String>,
    },
    /// Stop a port forward
    Down {
        /// Forward name (interactive picker if omitted)
        name: Option<String>,
    },
    /// Add a port forward (prompts for anything not given)
    Add(FormArgs),
    /// Edit a port forward
    Edit {
        /// Forward to edit (interactive picker if omitted)
        #[arg(value_name = "NAME")]
        target: Option<String>,
        #[command(flatten)]
        form: FormArgs,
    },
    /// Remove a port forward
    #[command(alias = "rm")]
    Remove {
        /// Forward name (interactive picker if omitted)
        name: Option<String>,
        /// Skip confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Move a port forward to another position in the list
    #[command(alias = "mv")]
    Move {
        name: String,
        /// Zero-based target position
        index: usize,
    },
    /// Supervise forwards interactively, reporting ones that die
    Watch,
    /// Initialize or edit ~/.burrow/config.toml
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for (reads from config if omitted)
        shell: Option<clap_complete::Shell>,
    },
}

/// Fields of the add/edit form. Anything left out is prompted for.
#[derive(Args, Default, Clone)]
pub struct FormArgs {
    /// Forward name (derived from service/host and port if left empty)
    #[arg(long)]
    pub name: Option<String>,
    /// kubectl or ssh
    #[arg(long = "type", value_parser = parse_forward_type)]
    pub forward_type: Option<ForwardType>,
    /// Kubernetes context
    #[arg(long)]
    pub context: Option<String>,
    /// Kubernetes namespace
    #[arg(long)]
    pub namespace: Option<String>,
    /// Kubernetes service
    #[arg(long)]
    pub service: Option<String>,
    /// SSH host (user@host or host)
    #[arg(long)]
    pub host: Option<String>,
    /// Port mapping local:remote (repeatable)
    #[arg(long = "port", short)]
    pub ports: Vec<String>,
    /// Local bind address, optionally with a port (127.0.0.2 or 127.0.0.2:5335)
    #[arg(long)]
    pub interface: Option<String>,
    /// Fail instead of prompting for missing fields
    #[arg(long)]
    pub no_input: bool,
}

fn parse_forward_type(s: &str) -> Result<ForwardType, String> {
    s.parse().map_err(|e: crate::forward::InvalidConfig| e.to_string())
}
