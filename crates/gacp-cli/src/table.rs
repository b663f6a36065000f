//! # Table Subcommand
//!
//! Prints the canonical transition table, one edge per line or as JSON,
//! after running the structural checks every engine runs at startup.

use std::str::FromStr;

use anyhow::Context;
use clap::Args;
use serde_json::json;

use gacp_workflow::table::CounterEffect;
use gacp_workflow::{TransitionSpec, TransitionTable, WorkflowState};

/// Arguments for the `gacp table` subcommand.
#[derive(Args, Debug)]
pub struct TableArgs {
    /// Emit the table as a JSON array.
    #[arg(long)]
    pub json: bool,

    /// Only show edges leaving this state (e.g. `reviewing`).
    #[arg(long)]
    pub from: Option<String>,
}

/// Validate and print the transition table.
pub fn run_table(args: &TableArgs) -> anyhow::Result<u8> {
    let table = TransitionTable::canonical().context("transition table failed validation")?;
    let from = args
        .from
        .as_deref()
        .map(WorkflowState::from_str)
        .transpose()?;

    let edges: Vec<&TransitionSpec> = match from {
        Some(state) => table.outgoing(state).collect(),
        None => table.iter().collect(),
    };
    tracing::info!(edges = edges.len(), "transition table validated");

    if args.json {
        let rows: Vec<_> = edges.iter().map(|spec| edge_json(spec)).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(0);
    }

    for spec in &edges {
        println!("{}", edge_line(spec));
    }
    println!(
        "\n{} edges across {} states; table is valid",
        edges.len(),
        WorkflowState::ALL.len()
    );
    Ok(0)
}

fn edge_line(spec: &TransitionSpec) -> String {
    let mut line = format!(
        "{:<30} -> {:<30} {:<9} {:<26}",
        spec.from.as_str(),
        spec.to.as_str(),
        spec.required_role.as_str(),
        spec.action
    );
    if let Some(guard) = spec.guard {
        line.push_str(&format!(" guard={guard}"));
    }
    if let Some(milestone) = spec.milestone {
        line.push_str(&format!(" pays={milestone}"));
    }
    if spec.counter != CounterEffect::Unchanged {
        line.push_str(&format!(" counter={}", spec.counter.as_str()));
    }
    line.trim_end().to_string()
}

fn edge_json(spec: &TransitionSpec) -> serde_json::Value {
    json!({
        "from": spec.from.as_str(),
        "to": spec.to.as_str(),
        "role": spec.required_role.as_str(),
        "action": spec.action,
        "guard": spec.guard.map(|g| g.as_str()),
        "milestone": spec.milestone.map(|m| m.as_str()),
        "counter": spec.counter.as_str(),
    })
}
