//! # gacp-cli — Command-line tooling for the GACP certification workflow
//!
//! Operator-facing commands that exercise the workflow engine without a
//! deployment: inspecting the transition table, quoting fees, producing a
//! configuration file, and replaying the reference scenarios against the
//! in-memory collaborators.
//!
//! ## Subcommands
//!
//! - `gacp table` — List and validate the transition table.
//! - `gacp fees` — Compute milestone fees for a set of herbs.
//! - `gacp config` — Print or check a workflow configuration.
//! - `gacp simulate` — Run an end-to-end scenario in memory.
//!
//! ```bash
//! gacp table --json
//! gacp fees --herb turmeric:1.0 --herb cannabis:1.5:special
//! gacp config --default > gacp.yaml
//! gacp simulate triple-rejection
//! ```

pub mod config;
pub mod fees;
pub mod simulate;
pub mod table;

use std::path::Path;

use anyhow::Context;
use gacp_workflow::WorkflowConfig;

/// Resolve the effective configuration: an explicit file wins, otherwise
/// `GACP_WORKFLOW_CONFIG` (or built-in defaults) via [`WorkflowConfig::from_env`].
pub fn load_config(path: Option<&Path>) -> anyhow::Result<WorkflowConfig> {
    match path {
        Some(path) => WorkflowConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => WorkflowConfig::from_env().context("loading configuration from environment"),
    }
}
