//! Storage device identifiers and capacity strings

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Directory under which a host exposes its disk devices
pub const DEVICE_DIR: &str = "/vmfs/devices/disks";

const KIB: u64 = 1024;

// =============================================================================
// Device Identifier
// =============================================================================

/// A validated storage device identifier (`naa.`, `eui.`, `t10.`, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse and normalise a device identifier
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = |why: &str| Error::InvalidDeviceId(format!("{}: {}", raw, why));

        let (prefix, rest) = raw.split_once('.').ok_or_else(|| invalid("missing prefix"))?;
        if rest.is_empty() {
            return Err(invalid("empty identifier"));
        }
        if rest.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
            return Err(invalid("contains a separator"));
        }

        match prefix.to_ascii_lowercase().as_str() {
            // Both are hex-encoded 64 or 128 bit names
            "naa" | "eui" => {
                if !matches!(rest.len(), 16 | 32) {
                    return Err(invalid("expected 16 or 32 hex digits"));
                }
                if !rest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(invalid("not hexadecimal"));
                }
                Ok(Self(format!(
                    "{}.{}",
                    prefix.to_ascii_lowercase(),
                    rest.to_ascii_lowercase()
                )))
            }
            "t10" | "mpx" | "vml" => Ok(Self(format!("{}.{}", prefix.to_ascii_lowercase(), rest))),
            _ => Err(invalid("unknown prefix")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full device path on the host
    pub fn path(&self) -> String {
        format!("{}/{}", DEVICE_DIR, self.0)
    }

    /// Path of a partition on this device
    pub fn partition_path(&self, partition: u32) -> String {
        format!("{}:{}", self.path(), partition)
    }

    /// Case-insensitive prefix match
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

// =============================================================================
// Capacity Strings
// =============================================================================

/// Parse a capacity string such as `500GB`, `1.5TiB` or `1073741824`
///
/// Units are binary whether or not the `i` is present, matching how the
/// hypervisor reports datastore sizes.
pub fn parse_capacity(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty capacity".into()));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number in {:?}", input)))?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KIB,
        "M" | "MB" | "MIB" => KIB.pow(2),
        "G" | "GB" | "GIB" => KIB.pow(3),
        "T" | "TB" | "TIB" => KIB.pow(4),
        "P" | "PB" | "PIB" => KIB.pow(5),
        other => {
            return Err(Error::CapacityParse(format!(
                "unknown unit {:?} in {:?}",
                other, input
            )))
        }
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 1.0 || bytes > u64::MAX as f64 {
        return Err(Error::CapacityParse(format!("out of range: {:?}", input)));
    }

    Ok(bytes as u64)
}

/// Render a byte count with a binary unit
pub fn format_capacity(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
