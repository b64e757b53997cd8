//! Locating the peripheral to connect to.
//!
//! Scanning itself is not part of the sensor logic; the connection manager
//! only needs to turn a user-supplied identifier (MAC address, platform
//! peripheral id or a fragment of the advertised name) into a peripheral.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::util::{UNSET_ADDRESS, addresses_match, format_peripheral_id};

/// Options for finding a peripheral.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Duration of the first scan attempt; later attempts scan longer.
    pub duration: Duration,
    /// Number of scan attempts before giving up.
    pub attempts: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            attempts: 3,
        }
    }
}

impl ScanOptions {
    /// Create default scan options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duration of the first scan attempt.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the number of scan attempts.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

/// How an identifier matched a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Platform peripheral id (UUID on macOS).
    PeripheralId,
    /// Bluetooth address.
    Address,
    /// Substring of the advertised name.
    Name,
}

/// Decide whether a peripheral's properties match an identifier.
///
/// Matching is case-insensitive; the name may match partially.
pub fn match_identifier(
    identifier: &str,
    peripheral_id: &str,
    address: &str,
    name: Option<&str>,
) -> Option<MatchKind> {
    let wanted = identifier.to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    if peripheral_id.to_lowercase().contains(&wanted) {
        return Some(MatchKind::PeripheralId);
    }
    if address != UNSET_ADDRESS && addresses_match(address, &wanted) {
        return Some(MatchKind::Address);
    }
    if name.is_some_and(|n| n.to_lowercase().contains(&wanted)) {
        return Some(MatchKind::Name);
    }
    None
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

/// Find a peripheral by address, peripheral id or name.
///
/// Peripherals the adapter already knows are checked first; otherwise the
/// adapter scans up to `options.attempts` times with growing durations.
pub async fn find_device(identifier: &str, options: &ScanOptions) -> Result<(Adapter, Peripheral)> {
    let adapter = get_adapter().await?;
    info!("Looking for device: {}", identifier);

    if let Some(peripheral) = find_peripheral_by_identifier(&adapter, identifier).await? {
        info!("Found device in cache (no scan needed)");
        return Ok((adapter, peripheral));
    }

    let attempts = options.attempts.max(1);
    for attempt in 1..=attempts {
        let scan_duration = options.duration * attempt;
        info!(
            "Scan attempt {}/{} ({}s)...",
            attempt,
            attempts,
            scan_duration.as_secs()
        );

        adapter.start_scan(ScanFilter::default()).await?;
        sleep(scan_duration).await;
        adapter.stop_scan().await?;

        if let Some(peripheral) = find_peripheral_by_identifier(&adapter, identifier).await? {
            info!("Found device on attempt {}", attempt);
            return Ok((adapter, peripheral));
        }
        if attempt < attempts {
            warn!("Device not found, retrying...");
        }
    }

    warn!("Device not found after {} attempts: {}", attempts, identifier);
    Err(Error::device_not_found(identifier))
}

/// Search the adapter's known peripherals for one matching the identifier.
pub async fn find_peripheral_by_identifier(
    adapter: &Adapter,
    identifier: &str,
) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };
        let peripheral_id = format_peripheral_id(&peripheral.id());
        let address = props.address.to_string();
        if let Some(kind) = match_identifier(
            identifier,
            &peripheral_id,
            &address,
            props.local_name.as_deref(),
        ) {
            debug!(?kind, %peripheral_id, %address, "Matched peripheral");
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_by_address() {
        assert_eq!(
            match_identifier("aa:bb:cc:dd:ee:ff", "hci0/dev_X", "AA:BB:CC:DD:EE:FF", None),
            Some(MatchKind::Address)
        );
        assert_eq!(
            match_identifier("AABBCCDDEEFF", "x", "AA:BB:CC:DD:EE:FF", None),
            Some(MatchKind::Address)
        );
    }

    #[test]
    fn test_unset_address_never_matches() {
        assert_eq!(
            match_identifier(UNSET_ADDRESS, "uuid-1234", UNSET_ADDRESS, None),
            None
        );
    }

    #[test]
    fn test_match_by_peripheral_id() {
        assert_eq!(
            match_identifier(
                "6F1D2B3A",
                "6f1d2b3a-0000-4000-8000-00000000abcd",
                UNSET_ADDRESS,
                None
            ),
            Some(MatchKind::PeripheralId)
        );
    }

    #[test]
    fn test_match_by_name_fragment() {
        assert_eq!(
            match_identifier("thermo", "x", UNSET_ADDRESS, Some("Kitchen Thermometer")),
            Some(MatchKind::Name)
        );
        assert_eq!(match_identifier("thermo", "x", UNSET_ADDRESS, None), None);
    }

    #[test]
    fn test_empty_identifier_matches_nothing() {
        assert_eq!(match_identifier("", "x", "AA:BB:CC:DD:EE:FF", Some("x")), None);
    }

    #[test]
    fn test_scan_options_builder() {
        let options = ScanOptions::new()
            .duration(Duration::from_secs(2))
            .attempts(0);
        assert_eq!(options.duration, Duration::from_secs(2));
        assert_eq!(options.attempts, 1);
    }
}
