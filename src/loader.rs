//! Configuration loading
//!
//! Layers embedded defaults, optional files and environment variables into
//! [`ToolkitSettings`].

use anyhow::{Context, Result};
use careguard_core::ToolkitSettings;
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable prefix, e.g. `CAREGUARD_RETRY__MAX_ATTEMPTS`
const ENV_PREFIX: &str = "CAREGUARD";

/// Load settings from files and environment
pub fn load_settings() -> Result<ToolkitSettings> {
    let profile = std::env::var("CAREGUARD_ENV").unwrap_or_else(|_| "development".to_string());

    let builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{profile}")).required(false))
        .add_source(File::with_name("config/local").required(false));

    build(builder)
}

/// Parse only the embedded defaults
pub fn default_settings() -> Result<ToolkitSettings> {
    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .build()
        .context("Failed to build default configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize default configuration")
}

fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<ToolkitSettings> {
    let config = builder
        // 3. Environment variables (highest priority)
        // prefix_separator("_") keeps CAREGUARD_RETRY__X working with a single
        // underscore after the prefix.
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let settings: ToolkitSettings = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    settings
        .validate()
        .context("Configuration failed validation")?;
    Ok(settings)
}
