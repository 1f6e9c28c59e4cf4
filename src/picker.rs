use anyhow::{Context, Result};
use dialoguer::FuzzySelect;
use dialoguer::theme::ColorfulTheme;

use crate::forward::ForwardConfig;

/// Show a fuzzy picker and return the selected item's index.
pub fn pick(prompt: &str, items: &[String]) -> Result<usize> {
    if items.is_empty() {
        anyhow::bail!("no port forwards available");
    }

    FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(items)
        .interact()
        .context("selection cancelled")
}

/// Use `name` if given, otherwise let the user pick one of `candidates`.
pub fn resolve_name(name: Option<String>, prompt: &str, candidates: &[ForwardConfig]) -> Result<String> {
    if let Some(name) = name {
        return Ok(name);
    }
    let items: Vec<String> = candidates
        .iter()
        .map(|c| format!("{} ({}, {})", c.name, c.target(), c.ports.join(", ")))
        .collect();
    let idx = pick(prompt, &items)?;
    Ok(candidates[idx].name.clone())
}
