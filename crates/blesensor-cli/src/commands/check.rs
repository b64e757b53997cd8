//! Check command implementation.

use std::path::Path;

use anyhow::Result;

use crate::config::{Config, default_config_path};
use crate::format::format_source;

pub fn cmd_check(path: Option<&Path>, quiet: bool) -> Result<()> {
    let path = path.map_or_else(default_config_path, Path::to_path_buf);
    let config = Config::load_validated(&path)?;
    let sources = config.source_configs()?;

    if quiet {
        return Ok(());
    }

    println!("{}: OK", path.display());
    if config.device.address.is_empty() {
        println!("device: (none, pass --device or set BLESENSOR_DEVICE)");
    } else {
        println!(
            "device: {} (connect timeout {}s)",
            config.device.address, config.device.connect_timeout
        );
    }
    match config.reconnect.max_attempts {
        Some(attempts) => println!(
            "reconnect: {}s..{}s, at most {} attempts",
            config.reconnect.initial_delay, config.reconnect.max_delay, attempts
        ),
        None => println!(
            "reconnect: {}s..{}s, unlimited",
            config.reconnect.initial_delay, config.reconnect.max_delay
        ),
    }
    println!();
    for source in &sources {
        print!("{}", format_source(source));
    }
    Ok(())
}
