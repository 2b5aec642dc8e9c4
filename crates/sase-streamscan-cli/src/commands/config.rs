//! Config commands

use super::load_config;
use crate::{output::OutputFormat, ConfigCommands};
use anyhow::Context;
use sase_streamscan::EngineConfig;

pub fn handle(action: ConfigCommands, config: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => {
            let config = load_config(config)?;
            format.print(&config);
        }
        ConfigCommands::Init { path } => {
            EngineConfig::default()
                .save(&path)
                .with_context(|| format!("writing {path}"))?;
            println!("Default configuration written to {path}");
        }
        ConfigCommands::Validate { path } => {
            let config = EngineConfig::load(&path).with_context(|| format!("reading {path}"))?;
            config.validate()?;
            println!("{path}: ok");
        }
    }
    Ok(())
}
