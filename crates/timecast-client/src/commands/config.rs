//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the effective configuration to stdout.
pub fn dump(config: &ClientConfig, source: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", source.display());
    println!("{}", toml_str);

    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    config.server_config()?;
    config.logging.tracing_config()?;

    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(source: &Path) -> ClientResult<()> {
    println!("config: {}", source.display());
    Ok(())
}
