//! Boundary to the backend that owns tunnel processes and persisted configs.

use async_trait::async_trait;
use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::forward::ForwardConfig;

const ALREADY_RUNNING: &str = "port forwarding is already running";
const NOT_RUNNING: &str = "port forwarding is not running";

/// A backend refusal that means the requested state already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    AlreadyRunning,
    NotRunning,
}

impl Refusal {
    fn detect(message: &str) -> Option<Self> {
        if message.contains(ALREADY_RUNNING) {
            Some(Refusal::AlreadyRunning)
        } else if message.contains(NOT_RUNNING) {
            Some(Refusal::NotRunning)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{message}")]
    Refused { refusal: Refusal, message: String },
    #[error("{0}")]
    Failed(String),
    #[error("failed to run backend '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backend did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("unexpected backend output: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Classify the backend's failure text.
    pub fn from_backend(message: impl Into<String>) -> Self {
        let message = message.into();
        match Refusal::detect(&message) {
            Some(refusal) => GatewayError::Refused { refusal, message },
            None => GatewayError::Failed(message),
        }
    }

    /// The benign refusal this error stands for, if any. Unclassified
    /// failures are matched on their text as well.
    pub fn refusal(&self) -> Option<Refusal> {
        match self {
            GatewayError::Refused { refusal, .. } => Some(*refusal),
            GatewayError::Failed(message) => Refusal::detect(message),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Async operations the engine consumes. Implementations own persistence
/// and process management; the engine only ever talks to this trait.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_configs(&self) -> GatewayResult<Vec<ForwardConfig>>;
    async fn list_running(&self) -> GatewayResult<HashSet<String>>;
    /// Names detected as stopped unexpectedly since the previous check.
    async fn verify_forwards(&self) -> GatewayResult<HashSet<String>>;
    /// Adopt forwards left running by a previous session.
    async fn sync_existing(&self) -> GatewayResult<HashSet<String>>;
    async fn start(&self, name: &str) -> GatewayResult<()>;
    async fn stop(&self, name: &str) -> GatewayResult<()>;
    async fn add_config(&self, config: &ForwardConfig) -> GatewayResult<()>;
    async fn remove_config(&self, name: &str) -> GatewayResult<()>;
    async fn update_config(&self, old_name: &str, config: &ForwardConfig) -> GatewayResult<()>;
    async fn reorder_config(&self, name: &str, new_index: usize) -> GatewayResult<()>;
}

/// Gateway backed by an external executable, invoked once per operation as
/// `<program> <args..> <op> [operands]`. Configs travel as JSON on stdin,
/// list results as JSON on stdout, failures as text on stderr with a
/// nonzero exit.
pub struct CommandGateway {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandGateway {
    pub fn new(command: &[String], timeout: Option<Duration>) -> Result<Self, GatewayError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| GatewayError::Protocol("no backend command configured".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    async fn invoke(&self, op: &[&str], stdin: Option<Vec<u8>>) -> GatewayResult<Vec<u8>> {
        debug!(program = %self.program, ?op, "invoking backend");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(op)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GatewayError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&input)
                .await
                .map_err(|e| GatewayError::Protocol(format!("failed to write request: {}", e)))?;
        }

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| GatewayError::Timeout(limit))?,
            None => wait.await,
        }
        .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let message = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("backend exited with {}", output.status)
        };
        Err(GatewayError::from_backend(message))
    }

    async fn invoke_json<T: serde::de::DeserializeOwned>(&self, op: &[&str]) -> GatewayResult<T> {
        let stdout = self.invoke(op, None).await?;
        serde_json::from_slice(&stdout).map_err(|e| GatewayError::Protocol(format!("{}: {}", op[0], e)))
    }

    fn encode(config: &ForwardConfig) -> GatewayResult<Vec<u8>> {
        serde_json::to_vec(config).map_err(|e| GatewayError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Gateway for CommandGateway {
    async fn list_configs(&self) -> GatewayResult<Vec<ForwardConfig>> {
        self.invoke_json(&["list-configs"]).await
    }

    async fn list_running(&self) -> GatewayResult<HashSet<String>> {
        self.invoke_json(&["list-running"]).await
    }

    async fn verify_forwards(&self) -> GatewayResult<HashSet<String>> {
        self.invoke_json(&["verify"]).await
    }

    async fn sync_existing(&self) -> GatewayResult<HashSet<String>> {
        self.invoke_json(&["sync"]).await
    }

    async fn start(&self, name: &str) -> GatewayResult<()> {
        self.invoke(&["start", name], None).await.map(drop)
    }

    async fn stop(&self, name: &str) -> GatewayResult<()> {
        self.invoke(&["stop", name], None).await.map(drop)
    }

    async fn add_config(&self, config: &ForwardConfig) -> GatewayResult<()> {
        self.invoke(&["add"], Some(Self::encode(config)?)).await.map(drop)
    }

    async fn remove_config(&self, name: &str) -> GatewayResult<()> {
        self.invoke(&["remove", name], None).await.map(drop)
    }

    async fn update_config(&self, old_name: &str, config: &ForwardConfig) -> GatewayResult<()> {
        self.invoke(&["update", old_name], Some(Self::encode(config)?))
            .await
            .map(drop)
    }

    async fn reorder_config(&self, name: &str, new_index: usize) -> GatewayResult<()> {
        let index = new_index.to_string();
        self.invoke(&["reorder", name, &index], None).await.map(drop)
    }
}
