//! Client-side reconciliation of desired forwards against backend state.
//!
//! The engine owns the config list and the per-service status table. Every
//! write goes through the operations here; none of them return errors.
//! Failures land on exactly one surface: the service's own status, the
//! open form, or the global message.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::forward::ForwardConfig;
use crate::gateway::{Gateway, Refusal};
use crate::reconcile::Reconciler;
use crate::store::{ConfigStore, ServiceStatus, StatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

/// The start or stop currently in flight. Advisory: it disables controls
/// but does not stop anyone from dispatching another operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loading {
    pub name: String,
    pub action: Action,
}

/// Where a service sits in its start/stop lifecycle. Errors overlay any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl Phase {
    fn of(status: &ServiceStatus, loading: Option<&Loading>) -> Self {
        match loading {
            Some(l) if l.name == status.name => match l.action {
                Action::Start => Phase::Starting,
                Action::Stop => Phase::Stopping,
            },
            _ if status.running => Phase::Running,
            _ => Phase::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceView {
    pub config: ForwardConfig,
    pub status: ServiceStatus,
    pub phase: Phase,
}

/// Point-in-time copy of everything a front end renders.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub services: Vec<ServiceView>,
    pub loading: Option<Loading>,
}

impl Snapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceView> {
        self.services.iter().find(|s| s.config.name == name)
    }
}

#[derive(Default)]
struct State {
    configs: ConfigStore,
    statuses: StatusStore,
    loading: Option<Loading>,
    form_error: Option<String>,
    message: Option<String>,
}

pub struct Engine {
    gateway: Arc<dyn Gateway>,
    state: Mutex<State>,
}

impl Engine {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            state: Mutex::new(State::default()),
        }
    }

    // The lock is only ever held between awaits, never across one.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_message(&self, message: String) {
        self.state().message = Some(message);
    }

    // ── Startup ──────────────────────────────────────────────────────────

    /// Load configs, adopt forwards left over from a previous session, and
    /// poll status once.
    pub async fn startup(&self) {
        self.load().await;
        self.sync_with_existing_processes().await;
        self.update_service_status().await;
    }

    /// Run the startup sequence, then begin periodic reconciliation.
    pub async fn boot(self: &Arc<Self>, period: Duration) -> Reconciler {
        self.startup().await;
        Reconciler::spawn(Arc::clone(self), period)
    }

    // ── Config store ─────────────────────────────────────────────────────

    /// Replace the config list with the backend's snapshot. Status entries
    /// are rebuilt as stopped with no error; callers re-poll afterwards.
    pub async fn load(&self) {
        match self.gateway.list_configs().await {
            Ok(configs) => {
                let mut state = self.state();
                let dropped = state.configs.replace(configs);
                for name in &dropped {
                    warn!(name = %name, "backend returned duplicate configuration, keeping the first");
                }
                let names = state.configs.names();
                state.statuses.reset(&names);
            }
            Err(e) => {
                error!(error = %e, "failed to load configs");
                self.set_message(format!("Error loading configs: {}", e));
            }
        }
    }

    pub async fn add(&self, config: ForwardConfig) {
        self.state().form_error = None;
        if let Err(reason) = self.check_candidate(&config, None) {
            self.state().form_error = Some(format!("Error adding config: {}", reason));
            return;
        }

        match self.gateway.add_config(&config).await {
            Ok(()) => {
                info!(name = %config.name, "added configuration");
                self.load().await;
                self.update_service_status().await;
                self.set_message(format!("Added configuration for {}", config.name));
            }
            Err(e) => {
                error!(name = %config.name, error = %e, "failed to add configuration");
                self.state().form_error = Some(format!("Error adding config: {}", e));
            }
        }
    }

    pub async fn remove(&self, name: &str) {
        match self.gateway.remove_config(name).await {
            Ok(()) => {
                info!(name = %name, "removed configuration");
                self.load().await;
                self.update_service_status().await;
                self.set_message(format!("Removed configuration for {}", name));
            }
            Err(e) => {
                error!(name = %name, error = %e, "failed to remove configuration");
                self.set_message(format!("Error removing config: {}", e));
            }
        }
    }

    /// Replace `old_name` with `config`, possibly under a new name.
    pub async fn update(&self, old_name: &str, config: ForwardConfig) {
        self.state().form_error = None;
        if let Err(reason) = self.check_candidate(&config, Some(old_name)) {
            self.state().form_error = Some(format!("Error updating config: {}", reason));
            return;
        }

        match self.gateway.update_config(old_name, &config).await {
            Ok(()) => {
                info!(old = %old_name, name = %config.name, "updated configuration");
                self.load().await;
                self.update_service_status().await;
                self.set_message(format!("Updated configuration for {}", config.name));
            }
            Err(e) => {
                error!(name = %old_name, error = %e, "failed to update configuration");
                self.state().form_error = Some(format!("Error updating config: {}", e));
            }
        }
    }

    /// Local checks before a config reaches the backend: it must be valid
    /// and its name must not collide with any entry other than `replacing`.
    fn check_candidate(&self, config: &ForwardConfig, replacing: Option<&str>) -> Result<(), String> {
        config.validate().map_err(|e| e.to_string())?;
        let state = self.state();
        if let Some(old) = replacing {
            if !state.configs.contains(old) {
                return Err(format!("no configuration named '{}'", old));
            }
        }
        if replacing != Some(config.name.as_str()) && state.configs.contains(&config.name) {
            return Err(format!("a configuration named '{}' already exists", config.name));
        }
        Ok(())
    }

    /// Move `name` to `new_index` immediately, then persist. If the backend
    /// refuses, the whole list is put back as it was before the move.
    pub async fn reorder(&self, name: &str, new_index: usize) {
        let (before, target) = {
            let mut state = self.state();
            let before = state.configs.clone();
            let Some((_, target)) = state.configs.move_to(name, new_index) else {
                return;
            };
            (before, target)
        };

        if let Err(e) = self.gateway.reorder_config(name, target).await {
            error!(name = %name, error = %e, "failed to reorder, restoring previous order");
            let mut state = self.state();
            state.configs = before;
            state.message = Some(format!("Error reordering config: {}", e));
        }
    }

    // ── Start / stop ─────────────────────────────────────────────────────

    pub async fn start(&self, name: &str) {
        self.run(name, Action::Start).await;
    }

    pub async fn stop(&self, name: &str) {
        self.run(name, Action::Stop).await;
    }

    async fn run(&self, name: &str, action: Action) {
        {
            let mut state = self.state();
            if !state.configs.contains(name) {
                state.message = Some(format!("No configuration named '{}'", name));
                return;
            }
            state.loading = Some(Loading {
                name: name.to_string(),
                action,
            });
            state.statuses.clear_error(name);
        }

        let result = match action {
            Action::Start => self.gateway.start(name).await,
            Action::Stop => self.gateway.stop(name).await,
        };

        match result {
            Ok(()) => {
                info!(name = %name, ?action, "backend accepted");
                self.update_service_status().await;
            }
            Err(e) => {
                let mut state = self.state();
                match (action, e.refusal()) {
                    (Action::Start, Some(Refusal::AlreadyRunning)) => {
                        warn!(name = %name, "already running, adopting");
                        state.statuses.set_running(name, true);
                    }
                    (Action::Stop, Some(Refusal::NotRunning)) => {
                        warn!(name = %name, "already stopped");
                        state.statuses.set_running(name, false);
                    }
                    _ => {
                        error!(name = %name, ?action, error = %e, "backend refused");
                        state.statuses.set_error(name, e.to_string());
                    }
                }
            }
        }

        self.state().loading = None;
    }

    /// Restart every service that stopped with an error, one at a time.
    /// Services stopped on purpose are left alone. Returns the names tried.
    pub async fn reconnect_all(&self) -> Vec<String> {
        let failed: Vec<String> = {
            let state = self.state();
            state
                .configs
                .iter()
                .filter_map(|c| state.statuses.get(&c.name))
                .filter(|s| s.is_failed())
                .map(|s| s.name.clone())
                .collect()
        };

        for name in &failed {
            self.start(name).await;
        }
        failed
    }

    // ── Status polling ───────────────────────────────────────────────────

    /// Set every service's `running` flag from the backend's running set.
    pub async fn update_service_status(&self) {
        match self.gateway.list_running().await {
            Ok(running) => self.state().statuses.apply_running(&running),
            Err(e) => warn!(error = %e, "failed to get running services"),
        }
    }

    pub async fn sync_with_existing_processes(&self) {
        match self.gateway.sync_existing().await {
            Ok(synced) if !synced.is_empty() => {
                let mut names: Vec<&String> = synced.iter().collect();
                names.sort();
                info!(?names, "synced with existing port forwards");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to sync with existing processes"),
        }
    }

    /// One reconciliation pass. Running services the backend reports as
    /// stopped become stopped with an error; nothing is ever marked running.
    /// Returns the names that changed.
    pub async fn verify_forwards(&self) -> Vec<String> {
        let stopped: HashSet<String> = match self.gateway.verify_forwards().await {
            Ok(stopped) => stopped,
            Err(e) => {
                warn!(error = %e, "failed to verify port forwards");
                return Vec::new();
            }
        };
        if stopped.is_empty() {
            return Vec::new();
        }
        let flipped = self.state().statuses.mark_stopped_unexpectedly(&stopped);
        for name in &flipped {
            warn!(name = %name, "port forward stopped unexpectedly");
        }
        flipped
    }

    // ── Notification channels ────────────────────────────────────────────

    pub fn clear_service_error(&self, name: &str) {
        self.state().statuses.clear_error(name);
    }

    pub fn clear_form_error(&self) {
        self.state().form_error = None;
    }

    pub fn form_error(&self) -> Option<String> {
        self.state().form_error.clone()
    }

    /// Take the global message, leaving none behind.
    pub fn dismiss_message(&self) -> Option<String> {
        self.state().message.take()
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn configs(&self) -> Vec<ForwardConfig> {
        self.state().configs.iter().cloned().collect()
    }

    pub fn config(&self, name: &str) -> Option<ForwardConfig> {
        self.state().configs.get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.state().statuses.get(name).cloned()
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        let services = state
            .configs
            .iter()
            .map(|config| {
                let status = state
                    .statuses
                    .get(&config.name)
                    .cloned()
                    .unwrap_or_else(|| ServiceStatus {
                        name: config.name.clone(),
                        ..ServiceStatus::default()
                    });
                let phase = Phase::of(&status, state.loading.as_ref());
                ServiceView {
                    config: config.clone(),
                    status,
                    phase,
                }
            })
            .collect();
        Snapshot {
            services,
            loading: state.loading.clone(),
        }
    }
}
