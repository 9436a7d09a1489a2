//! MAC OUI (Organizationally Unique Identifier) vendor lookup
//!
//! Uses the IEEE OUI database to identify device manufacturers from MAC addresses.

/// Vendor reported for hypervisor and container MAC prefixes.
pub const VIRTUAL_MACHINE_VENDOR: &str = "Virtual Machine";

/// Lookup the vendor/manufacturer name for a MAC address.
///
/// # Arguments
/// * `mac` - MAC address in any common format (e.g., "00:1A:2B:3C:4D:5E", "00-1A-2B-3C-4D-5E")
///
/// # Returns
/// * `Some(vendor_name)` if found in the OUI database
/// * `None` if the MAC address is invalid or not found
pub fn lookup_vendor(mac: &str) -> Option<String> {
    let normalized = normalize_mac(mac)?;

    match oui_data::lookup(&normalized) {
        Some(record) => {
            let vendor_name = record.organization().to_string();
            tracing::debug!(
                "OUI lookup for {}: found {} (registry: {:?})",
                mac,
                vendor_name,
                record.registry()
            );
            Some(vendor_name)
        }
        None => {
            tracing::debug!("OUI lookup for {}: not found in database", mac);
            None
        }
    }
}

/// Normalize a MAC address to the format XX:XX:XX:XX:XX:XX
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned: String = mac.replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() < 6 {
        return None;
    }

    if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let padded = if cleaned.len() < 12 {
        format!("{:0<12}", cleaned)
    } else {
        cleaned[..12].to_string()
    };

    Some(format!(
        "{}:{}:{}:{}:{}:{}",
        &padded[0..2],
        &padded[2..4],
        &padded[4..6],
        &padded[6..8],
        &padded[8..10],
        &padded[10..12]
    ))
}

/// Whether the MAC prefix belongs to a hypervisor or container runtime.
///
/// These prefixes are often missing from the IEEE registry (Docker uses a
/// locally administered range), so they are matched directly.
pub fn is_virtual_machine_mac(mac: &str) -> bool {
    let mac_normalized = mac.replace([':', '-', '.'], "").to_lowercase();

    if mac_normalized.len() < 6 {
        return false;
    }

    matches!(
        &mac_normalized[..6],
        // Docker containers
        "0242ac"
        // VMware
        | "005056" | "000c29" | "000569"
        // Xen
        | "00163e"
        // Microsoft Hyper-V
        | "00155d"
        // Parallels
        | "001c42"
        // QEMU/KVM
        | "525400"
        // VirtualBox
        | "080027"
        // Proxmox VE
        | "bc2411"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("00-1a-2b-3c-4d-5e"),
            Some("00:1A:2B:3C:4D:5E".to_string())
        );
        assert_eq!(
            normalize_mac("001a.2b3c.4d5e"),
            Some("00:1A:2B:3C:4D:5E".to_string())
        );
        assert_eq!(normalize_mac("00:1a"), None);
        assert_eq!(normalize_mac("zz:zz:zz:zz:zz:zz"), None);
    }

    #[test]
    fn test_is_virtual_machine_mac() {
        assert!(is_virtual_machine_mac("00:50:56:12:34:56"));
        assert!(is_virtual_machine_mac("02:42:ac:12:34:56"));
        assert!(is_virtual_machine_mac("52-54-00-aa-bb-cc"));
        assert!(!is_virtual_machine_mac("00:17:F2:12:34:56"));
        assert!(!is_virtual_machine_mac("00:17"));
    }

    #[test]
    fn test_lookup_vendor_rejects_garbage() {
        assert_eq!(lookup_vendor("not-a-mac"), None);
    }
}
