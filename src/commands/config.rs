//! Config inspection

use std::path::Path;

use anyhow::Result;
use rover_control::ControlConfig;
use tracing::info;

/// Print the effective config; with `write`, persist it to `path`
pub fn show(config: &ControlConfig, path: &Path, write: bool) -> Result<()> {
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);

    if write {
        config.save(path)?;
        info!("Wrote config to {:?}", path);
    }
    Ok(())
}
