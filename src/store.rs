use std::collections::{HashMap, HashSet};

use crate::forward::ForwardConfig;

pub const STOPPED_UNEXPECTEDLY: &str = "Port forward stopped unexpectedly";

/// Ordered configurations, unique by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigStore {
    items: Vec<ForwardConfig>,
}

impl ConfigStore {
    /// Replace the whole list. Later duplicates of a name are dropped and
    /// returned so the caller can report them.
    pub fn replace(&mut self, configs: Vec<ForwardConfig>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dropped = Vec::new();
        self.items = configs
            .into_iter()
            .filter(|c| {
                if seen.insert(c.name.clone()) {
                    true
                } else {
                    dropped.push(c.name.clone());
                    false
                }
            })
            .collect();
        dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForwardConfig> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|c| c.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ForwardConfig> {
        self.items.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|c| c.name == name)
    }

    /// Move `name` to `new_index` (clamped to the last slot). Returns the
    /// old and effective new index, or `None` when the name is unknown or
    /// already in place.
    pub fn move_to(&mut self, name: &str, new_index: usize) -> Option<(usize, usize)> {
        let old_index = self.position(name)?;
        let new_index = new_index.min(self.items.len() - 1);
        if old_index == new_index {
            return None;
        }
        let moved = self.items.remove(old_index);
        self.items.insert(new_index, moved);
        Some((old_index, new_index))
    }
}

/// Last observed runtime state of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
    pub error: Option<String>,
}

impl ServiceStatus {
    fn stopped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            running: false,
            error: None,
        }
    }

    /// Stopped because something went wrong, as opposed to stopped on purpose.
    pub fn is_failed(&self) -> bool {
        !self.running && self.error.is_some()
    }
}

/// Runtime status keyed by configuration name.
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    entries: HashMap<String, ServiceStatus>,
}

impl StatusStore {
    /// Fresh `running = false` entries for exactly these names.
    pub fn reset<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.entries = names
            .into_iter()
            .map(|n| (n.as_ref().to_string(), ServiceStatus::stopped(n.as_ref())))
            .collect();
    }

    pub fn get(&self, name: &str) -> Option<&ServiceStatus> {
        self.entries.get(name)
    }

    /// Overwrite every entry's `running` flag with membership in `running`.
    /// Names the store does not track are ignored.
    pub fn apply_running(&mut self, running: &HashSet<String>) {
        for status in self.entries.values_mut() {
            status.running = running.contains(&status.name);
        }
    }

    /// Flip running entries named in `stopped` to stopped with an error.
    /// Never marks anything running. Returns the names that changed.
    pub fn mark_stopped_unexpectedly(&mut self, stopped: &HashSet<String>) -> Vec<String> {
        let mut flipped = Vec::new();
        for name in stopped {
            if let Some(status) = self.entries.get_mut(name) {
                if status.running {
                    status.running = false;
                    status.error = Some(STOPPED_UNEXPECTEDLY.to_string());
                    flipped.push(name.clone());
                }
            }
        }
        flipped.sort();
        flipped
    }

    pub fn set_running(&mut self, name: &str, running: bool) {
        if let Some(status) = self.entries.get_mut(name) {
            status.running = running;
            status.error = None;
        }
    }

    pub fn set_error(&mut self, name: &str, error: impl Into<String>) {
        if let Some(status) = self.entries.get_mut(name) {
            status.error = Some(error.into());
        }
    }

    pub fn clear_error(&mut self, name: &str) {
        if let Some(status) = self.entries.get_mut(name) {
            status.error = None;
        }
    }
}
