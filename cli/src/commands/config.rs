// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use aegis_core::application::config::ProxyConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration (explicit path, env var, or one of
    /// the conventional default paths, in that order) as YAML
    Show,
    /// List the paths checked during config discovery, in resolution order
    Paths,
    /// Load and validate a config file without starting the proxy
    Validate {
        /// Path to the file to validate (defaults to the same discovery
        /// order as `show`)
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(command: ConfigCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = ProxyConfig::load_or_default(config_path).context("failed to load configuration")?;
            let yaml = serde_yaml::to_string(&config).context("failed to render configuration as YAML")?;
            println!("{yaml}");
            Ok(())
        }
        ConfigCommand::Paths => {
            for path in ProxyConfig::default_paths() {
                println!("{}", path.display());
            }
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            let config = ProxyConfig::load_or_default(file.or(config_path)).context("failed to load configuration")?;
            config.validate().context("configuration is invalid")?;
            println!("configuration is valid");
            Ok(())
        }
    }
}
