//! `careguard config`: print the effective configuration

use crate::loader::{default_settings, load_settings};
use anyhow::{Context, Result};

pub fn run(defaults: bool) -> Result<()> {
    let settings = if defaults {
        default_settings()?
    } else {
        load_settings()?
    };

    let rendered = toml::to_string_pretty(&settings).context("Failed to serialize configuration")?;
    print!("{rendered}");
    Ok(())
}
