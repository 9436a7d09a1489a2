//! Hostname-based device classification.

use serde::{Deserialize, Serialize};

/// Coarse device category inferred from a resolved hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceType {
    Router,
    Printer,
    #[serde(rename = "Mobile Device")]
    MobileDevice,
    Computer,
    #[serde(rename = "Smart TV")]
    SmartTv,
    #[serde(rename = "IoT Device")]
    IotDevice,
    #[default]
    Unknown,
}

impl DeviceType {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceType::Router => "Router",
            DeviceType::Printer => "Printer",
            DeviceType::MobileDevice => "Mobile Device",
            DeviceType::Computer => "Computer",
            DeviceType::SmartTv => "Smart TV",
            DeviceType::IotDevice => "IoT Device",
            DeviceType::Unknown => "Unknown",
        }
    }

    /// Parse a stored label; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        CATEGORY_TABLE
            .iter()
            .map(|(device_type, _)| *device_type)
            .find(|t| t.label().eq_ignore_ascii_case(label.trim()))
            .unwrap_or(DeviceType::Unknown)
    }

    pub fn is_known(&self) -> bool {
        *self != DeviceType::Unknown
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Keyword sets in priority order. The first category with a matching
/// keyword wins, so reordering rows changes results for ambiguous names.
const CATEGORY_TABLE: &[(DeviceType, &[&str])] = &[
    (
        DeviceType::Router,
        &["router", "gateway", "rt-", "linksys", "netgear", "dlink"],
    ),
    (
        DeviceType::Printer,
        &["printer", "print", "hp-", "canon", "epson", "brother"],
    ),
    (
        DeviceType::MobileDevice,
        &["iphone", "android", "mobile", "phone"],
    ),
    (
        DeviceType::Computer,
        &["desktop", "laptop", "pc-", "workstation"],
    ),
    (DeviceType::SmartTv, &["tv", "roku", "chromecast", "appletv"]),
    (
        DeviceType::IotDevice,
        &["nest", "alexa", "echo", "iot", "smart"],
    ),
];

/// Classify a device from its resolved hostname.
///
/// Matching is a case-insensitive substring test against [`CATEGORY_TABLE`].
/// A missing name, or one that matches nothing, yields [`DeviceType::Unknown`].
pub fn classify(resolved_name: Option<&str>) -> DeviceType {
    let Some(name) = resolved_name else {
        return DeviceType::Unknown;
    };

    let name_lower = name.to_lowercase();

    CATEGORY_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name_lower.contains(k)))
        .map(|(device_type, _)| *device_type)
        .unwrap_or(DeviceType::Unknown)
}
