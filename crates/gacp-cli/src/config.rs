//! # Config Subcommand
//!
//! Prints the built-in defaults as YAML, checks a configuration file, or
//! shows the configuration the other subcommands would run with.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use gacp_workflow::WorkflowConfig;

/// Arguments for the `gacp config` subcommand.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the built-in defaults instead of the effective configuration.
    #[arg(long, conflicts_with = "check")]
    pub default: bool,

    /// Parse and validate this file, then exit.
    #[arg(long, value_name = "PATH")]
    pub check: Option<PathBuf>,
}

pub fn run_config(args: &ConfigArgs, effective: &WorkflowConfig) -> anyhow::Result<u8> {
    if let Some(path) = &args.check {
        return match WorkflowConfig::load(path) {
            Ok(_) => {
                println!("{}: ok", path.display());
                Ok(0)
            }
            Err(e) => {
                println!("{}: {e}", path.display());
                Ok(1)
            }
        };
    }

    let config = if args.default {
        WorkflowConfig::default()
    } else {
        effective.clone()
    };
    let yaml = config.to_yaml().context("serializing configuration")?;
    print!("{yaml}");
    Ok(0)
}
