//! Scripted in-memory gateway for engine tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::forward::ForwardConfig;
use crate::gateway::{Gateway, GatewayError, GatewayResult};

pub fn kube(name: &str) -> ForwardConfig {
    ForwardConfig::kubectl(name, "ctx", "ns", name, vec!["8080:80".into()])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListConfigs,
    ListRunning,
    Verify,
    SyncExisting,
    Start(String),
    Stop(String),
    Add(String),
    Remove(String),
    Update(String, String),
    Reorder(String, usize),
}

/// Pauses one operation until the test releases it.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
}

impl Gate {
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[derive(Default)]
struct Backend {
    configs: Vec<ForwardConfig>,
    running: HashSet<String>,
    stopped: HashSet<String>,
    failures: HashMap<&'static str, GatewayError>,
    gates: HashMap<&'static str, Arc<Gate>>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeGateway {
    backend: Mutex<Backend>,
}

impl FakeGateway {
    pub fn with_configs(names: &[&str]) -> Self {
        let gw = Self::default();
        gw.backend().configs = names.iter().map(|n| kube(n)).collect();
        gw
    }

    fn backend(&self) -> std::sync::MutexGuard<'_, Backend> {
        self.backend.lock().unwrap()
    }

    pub fn set_running(&self, names: &[&str]) {
        self.backend().running = names.iter().map(|n| n.to_string()).collect();
    }

    /// Names the next `verify_forwards` reports as stopped.
    pub fn report_stopped(&self, names: &[&str]) {
        let mut backend = self.backend();
        backend.stopped = names.iter().map(|n| n.to_string()).collect();
        for name in names {
            backend.running.remove(*name);
        }
    }

    pub fn fail_next(&self, op: &'static str, message: &str) {
        self.fail_next_with(op, GatewayError::from_backend(message));
    }

    pub fn fail_next_with(&self, op: &'static str, err: GatewayError) {
        self.backend().failures.insert(op, err);
    }

    pub fn hold(&self, op: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.backend().gates.insert(op, gate.clone());
        gate
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.backend().calls)
    }

    /// Record the call, wait on any gate, then surface a scripted failure.
    async fn enter(&self, op: &'static str, call: Call) -> GatewayResult<()> {
        let gate = {
            let mut backend = self.backend();
            backend.calls.push(call);
            backend.gates.remove(op)
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.released.notified().await;
        }
        match self.backend().failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn list_configs(&self) -> GatewayResult<Vec<ForwardConfig>> {
        self.enter("list_configs", Call::ListConfigs).await?;
        Ok(self.backend().configs.clone())
    }

    async fn list_running(&self) -> GatewayResult<HashSet<String>> {
        self.enter("list_running", Call::ListRunning).await?;
        Ok(self.backend().running.clone())
    }

    async fn verify_forwards(&self) -> GatewayResult<HashSet<String>> {
        self.enter("verify", Call::Verify).await?;
        Ok(std::mem::take(&mut self.backend().stopped))
    }

    async fn sync_existing(&self) -> GatewayResult<HashSet<String>> {
        self.enter("sync", Call::SyncExisting).await?;
        Ok(self.backend().running.clone())
    }

    async fn start(&self, name: &str) -> GatewayResult<()> {
        self.enter("start", Call::Start(name.to_string())).await?;
        self.backend().running.insert(name.to_string());
        Ok(())
    }

    async fn stop(&self, name: &str) -> GatewayResult<()> {
        self.enter("stop", Call::Stop(name.to_string())).await?;
        self.backend().running.remove(name);
        Ok(())
    }

    async fn add_config(&self, config: &ForwardConfig) -> GatewayResult<()> {
        self.enter("add", Call::Add(config.name.clone())).await?;
        self.backend().configs.push(config.clone());
        Ok(())
    }

    async fn remove_config(&self, name: &str) -> GatewayResult<()> {
        self.enter("remove", Call::Remove(name.to_string())).await?;
        let mut backend = self.backend();
        backend.configs.retain(|c| c.name != name);
        backend.running.remove(name);
        Ok(())
    }

    async fn update_config(&self, old_name: &str, config: &ForwardConfig) -> GatewayResult<()> {
        self.enter("update", Call::Update(old_name.to_string(), config.name.clone()))
            .await?;
        let mut backend = self.backend();
        if let Some(slot) = backend.configs.iter_mut().find(|c| c.name == old_name) {
            *slot = config.clone();
        }
        if backend.running.remove(old_name) {
            backend.running.insert(config.name.clone());
        }
        Ok(())
    }

    async fn reorder_config(&self, name: &str, new_index: usize) -> GatewayResult<()> {
        self.enter("reorder", Call::Reorder(name.to_string(), new_index))
            .await?;
        let mut backend = self.backend();
        if new_index >= backend.configs.len() {
            return Err(GatewayError::from_backend("Invalid new index"));
        }
        if let Some(pos) = backend.configs.iter().position(|c| c.name == name) {
            let moved = backend.configs.remove(pos);
            backend.configs.insert(new_index, moved);
        }
        Ok(())
    }
}
