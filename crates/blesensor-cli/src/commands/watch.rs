//! Watch command implementation.
//!
//! Keeps one link to the peripheral open for the whole run. Reconnection is
//! handled by the link itself; this command only prints what the sensors
//! publish and a per-sensor summary when it stops.

use anyhow::{Context, Result, bail};
use blesensor_core::{BtleplugLink, Driver, EventDispatcher, Sensor};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{SourceArgs, WatchArgs};
use crate::config::{Config, SensorConfig};
use crate::format::{format_event, format_summary};

pub async fn cmd_watch(args: WatchArgs, quiet: bool) -> Result<()> {
    let config = load_config(&args)?;
    let identifier = args
        .device
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| Some(config.device.address.clone()).filter(|d| !d.is_empty()));
    let Some(identifier) = identifier else {
        bail!("No device given. Use --device, BLESENSOR_DEVICE or [device].address in the config");
    };
    let sources = config.source_configs()?;

    if !quiet {
        eprintln!("Connecting to {}...", identifier);
    }
    let (link, events) = BtleplugLink::spawn(
        &identifier,
        config.link_options(),
        config.reconnect_options(),
    )
    .await
    .with_context(|| format!("Failed to start link to {}", identifier))?;

    let dispatcher = EventDispatcher::default();
    let mut rx = dispatcher.subscribe();
    let cancel = CancellationToken::new();
    let mut driver = Driver::new(link, events, cancel.clone());
    for source in sources {
        let sink = dispatcher.sink(source.name.clone());
        driver.add_sensor(Sensor::new(source, sink))?;
    }

    if !quiet {
        eprintln!("Watching {} sensor(s) | Press Ctrl+C to stop", config.sensors.len());
        eprintln!("{}", "-".repeat(50));
    }
    let task = tokio::spawn(driver.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !quiet {
                    eprintln!("\nShutting down...");
                }
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => println!("{}", format_event(&event, args.format)?),
                Err(RecvError::Lagged(missed)) => warn!("Output fell behind, {} events dropped", missed),
                Err(RecvError::Closed) => {
                    info!("Driver stopped");
                    break;
                }
            },
        }
    }

    cancel.cancel();
    let (link, sensors) = task.await.context("Driver task failed")?;
    // Waits for the peripheral to be disconnected before the runtime exits.
    link.shutdown().await;
    if !quiet {
        for sensor in &sensors {
            eprintln!("{}", format_summary(sensor.name(), &sensor.metrics().snapshot()));
        }
    }
    Ok(())
}

/// The configuration for this run: an ad-hoc source, an explicit file or
/// the default file.
fn load_config(args: &WatchArgs) -> Result<Config> {
    let config = if args.source.is_given() {
        ad_hoc_config(&args.source)
    } else if let Some(path) = &args.config {
        Config::load(path)?
    } else {
        Config::load_default()
            .context("Pass --config, or --service and --characteristic for a single source")?
    };
    config.validate()?;
    Ok(config)
}

fn ad_hoc_config(source: &SourceArgs) -> Config {
    let mut config = Config::default();
    if let (Some(service), Some(characteristic)) = (source.service, source.characteristic) {
        let name = source
            .name
            .clone()
            .unwrap_or_else(|| characteristic.to_string());
        let mut sensor = SensorConfig::new(&name, service, characteristic);
        sensor.descriptor = source.descriptor.map(|d| d.to_string()).unwrap_or_default();
        sensor.notify = source.notify;
        sensor.update_interval = source.interval;
        sensor.format = source.decode;
        config.sensors.push(sensor);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use blesensor_core::ValueFormat;
    use blesensor_core::uuids::{BATTERY_LEVEL, BATTERY_SERVICE, CHARACTERISTIC_USER_DESCRIPTION};
    use clap::Parser;

    fn watch_args(argv: &[&str]) -> WatchArgs {
        let mut full = vec!["blesensor", "watch"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Watch(args) => args,
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_ad_hoc_source() {
        let args = watch_args(&[
            "--service",
            "180F",
            "--characteristic",
            "2A19",
            "--descriptor",
            "2901",
            "--notify",
            "--interval",
            "0",
            "--decode",
            "u16_le",
        ]);
        let config = load_config(&args).unwrap();
        let sources = config.source_configs().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].service, BATTERY_SERVICE);
        assert_eq!(sources[0].characteristic, BATTERY_LEVEL);
        assert_eq!(sources[0].descriptor, Some(CHARACTERISTIC_USER_DESCRIPTION));
        assert!(sources[0].notify);
        assert_eq!(sources[0].update_interval, None);
        assert_eq!(config.sensors[0].format, Some(ValueFormat::U16Le));
        assert_eq!(sources[0].name, BATTERY_LEVEL.to_string());
    }

    #[test]
    fn test_ad_hoc_source_must_do_something() {
        let args = watch_args(&["--service", "180F", "--characteristic", "2A19", "--interval", "0"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_config_file_is_loaded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[device]\naddress = \"Sensor\"\n\n[[sensors]]\nname = \"Battery\"\nservice = \"180F\"\ncharacteristic = \"2A19\"\n",
        )
        .unwrap();

        let path = path.to_string_lossy().to_string();
        let config = load_config(&watch_args(&["--config", &path])).unwrap();
        assert_eq!(config.device.address, "Sensor");
        assert_eq!(config.sensors[0].name, "Battery");
    }
}
