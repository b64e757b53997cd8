//! Example: Watching the Battery Level of a Peripheral
//!
//! This example connects to a peripheral, polls the standard Battery Level
//! characteristic every ten seconds, subscribes to its notifications and
//! prints every event until Ctrl-C.
//!
//! Run with: `cargo run --example watch_battery -- <DEVICE_ADDRESS_OR_NAME>`

use std::env;
use std::time::Duration;

use blesensor_core::uuids::{BATTERY_LEVEL, BATTERY_SERVICE};
use blesensor_core::{
    BtleplugLink, Driver, EventDispatcher, LinkOptions, ReconnectOptions, Sensor, SensorEvent,
    SourceConfig,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let identifier = if args.len() > 1 {
        &args[1]
    } else {
        eprintln!("Usage: {} <DEVICE_ADDRESS_OR_NAME>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF", args[0]);
        std::process::exit(1);
    };

    println!("Looking for {}...", identifier);
    let (link, events) =
        BtleplugLink::spawn(identifier, LinkOptions::default(), ReconnectOptions::default())
            .await?;

    let dispatcher = EventDispatcher::default();
    let mut rx = dispatcher.subscribe();

    let config = SourceConfig::builder(BATTERY_SERVICE, BATTERY_LEVEL)
        .name("Battery")
        .notify(true)
        .update_interval(Duration::from_secs(10))
        .build_validated()?;

    let cancel = CancellationToken::new();
    let driver = Driver::new(link, events, cancel.clone())
        .with_sensor(Sensor::new(config, dispatcher.sink("Battery")))?;
    let task = tokio::spawn(driver.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Ok(SensorEvent::Measurement { measurement, at, .. }) => {
                    println!("{}  Battery: {}", at, measurement);
                }
                Ok(SensorEvent::StatusChanged { degraded: true, fault, .. }) => {
                    println!("Warning: {}", fault.unwrap_or_default());
                }
                Ok(other) => println!("{:?}", other),
                Err(_) => break,
            },
        }
    }

    cancel.cancel();
    let (link, _) = task.await?;
    link.shutdown().await;
    Ok(())
}
