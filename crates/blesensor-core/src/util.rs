//! Helpers for turning btleplug identifiers into strings.

use btleplug::platform::PeripheralId;

/// The address macOS reports for every peripheral.
pub const UNSET_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms, they may be
/// MAC addresses or other formats.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_peripheral_id(&format!("{:?}", id)).to_string()
}

fn strip_peripheral_id(debug: &str) -> &str {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
}

/// Create an identifier string from an address and peripheral ID.
///
/// On macOS where addresses are 00:00:00:00:00:00, uses the peripheral ID.
/// On other platforms, uses the Bluetooth address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    choose_identifier(address, || format_peripheral_id(peripheral_id))
}

fn choose_identifier(address: &str, peripheral_id: impl FnOnce() -> String) -> String {
    if address == UNSET_ADDRESS {
        peripheral_id()
    } else {
        address.to_string()
    }
}

/// Compare two MAC addresses ignoring case and separators.
pub fn addresses_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| c.is_ascii_hexdigit())
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    let (a, b) = (normalize(a), normalize(b));
    a.len() == 12 && a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_peripheral_id() {
        assert_eq!(
            strip_peripheral_id("PeripheralId(hci0/dev_AA_BB_CC_DD_EE_FF)"),
            "hci0/dev_AA_BB_CC_DD_EE_FF"
        );
        assert_eq!(strip_peripheral_id("plain"), "plain");
    }

    #[test]
    fn test_identifier_prefers_address() {
        assert_eq!(
            choose_identifier("AA:BB:CC:DD:EE:FF", || "uuid".into()),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(choose_identifier(UNSET_ADDRESS, || "uuid".into()), "uuid");
    }

    #[test]
    fn test_addresses_match() {
        assert!(addresses_match("AA:BB:CC:DD:EE:FF", "aabbccddeeff"));
        assert!(addresses_match("aa-bb-cc-dd-ee-ff", "AA:BB:CC:DD:EE:FF"));
        assert!(!addresses_match("AA:BB:CC:DD:EE:FF", "AA:BB:CC:DD:EE:00"));
        assert!(!addresses_match("", ""));
    }
}
