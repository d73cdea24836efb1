//! XID error catalog.
//!
//! XIDs are driver-reported GPU fault codes. The catalog here covers the codes
//! a datacenter operator meets most often; unknown codes still work everywhere
//! and are reported with a generic description.

use crate::XidCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// XID codes that leave the GPU unrecoverable without a node-level action.
///
/// A GPU carrying any of these codes refuses a plain GPU reset.
pub const FATAL_XID_CODES: [u32; 14] = [31, 43, 48, 72, 74, 76, 77, 78, 79, 92, 94, 95, 119, 120];

/// XID reported when the GPU has dropped off the PCIe bus.
pub const XID_FALLEN_OFF_BUS: XidCode = XidCode(79);

/// Text that appears in the refusal printed when a reset hits XID 79.
pub const FALLEN_OFF_BUS_MARKER: &str = "GPU has fallen off the bus";

/// Severity of an XID record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XidSeverity {
    /// Informational, usually application-caused.
    Info,
    /// Needs attention but the GPU keeps working.
    Warning,
    /// Device is unusable until recovered.
    Critical,
}

impl fmt::Display for XidSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XidSeverity::Info => f.write_str("Info"),
            XidSeverity::Warning => f.write_str("Warning"),
            XidSeverity::Critical => f.write_str("Critical"),
        }
    }
}

/// Whether an XID code is in the fatal set.
pub fn is_fatal_xid(code: XidCode) -> bool {
    FATAL_XID_CODES.contains(&code.0)
}

/// Human-readable description for an XID code.
pub fn xid_description(code: XidCode) -> &'static str {
    match code.0 {
        13 => "Graphics Engine Exception",
        31 => "GPU memory page fault",
        32 => "Invalid or corrupted push buffer stream",
        38 => "Driver firmware error",
        43 => "GPU stopped processing",
        45 => "Preemptive cleanup, due to previous errors",
        48 => "Double Bit ECC Error",
        61 => "Internal micro-controller breakpoint/warning",
        62 => "Internal micro-controller halt",
        63 => "ECC page retirement or row remapping recording event",
        64 => "ECC page retirement or row remapper recording failure",
        68 => "NVDEC0 Exception",
        69 => "Graphics Engine class error",
        72 => "NVLink Fatal error",
        74 => "NVLink Error",
        76 => "NVLink Transmit error",
        77 => "NVLink Receive error",
        78 => "vGPU Start Failed",
        79 => "GPU has fallen off the bus",
        92 => "High single-bit ECC error rate",
        94 => "Contained ECC error",
        95 => "Uncontained ECC error",
        119 => "GSP RPC Timeout",
        120 => "GSP Error",
        _ => "Unknown XID error",
    }
}

/// Severity assigned to an XID code.
pub fn xid_severity(code: XidCode) -> XidSeverity {
    if is_fatal_xid(code) {
        return XidSeverity::Critical;
    }
    match code.0 {
        13 | 31 | 32 | 45 | 68 | 69 => XidSeverity::Info,
        _ => XidSeverity::Warning,
    }
}

/// One XID occurrence on a GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XidError {
    /// The XID code.
    pub code: XidCode,

    /// Simulation time the error was logged, in seconds since boot.
    pub timestamp_secs: f64,

    /// Description from the catalog (or a scenario override).
    pub description: String,

    /// Severity from the catalog.
    pub severity: XidSeverity,
}

impl XidError {
    /// Build a record using the catalog description and severity.
    pub fn from_catalog(code: XidCode, timestamp_secs: f64) -> Self {
        Self {
            code,
            timestamp_secs,
            description: xid_description(code).to_string(),
            severity: xid_severity(code),
        }
    }

    /// Whether this record blocks a GPU reset.
    pub fn is_fatal(&self) -> bool {
        is_fatal_xid(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_set_membership() {
        for code in FATAL_XID_CODES {
            assert!(is_fatal_xid(XidCode(code)), "XID {code} should be fatal");
            assert_eq!(xid_severity(XidCode(code)), XidSeverity::Critical);
        }
        assert!(!is_fatal_xid(XidCode(63)));
        assert!(!is_fatal_xid(XidCode(13)));
    }

    #[test]
    fn test_catalog_descriptions() {
        assert_eq!(xid_description(XID_FALLEN_OFF_BUS), FALLEN_OFF_BUS_MARKER);
        assert_eq!(xid_description(XidCode(9999)), "Unknown XID error");
        let record = XidError::from_catalog(XidCode(63), 12.5);
        assert_eq!(record.severity, XidSeverity::Warning);
        assert!(!record.is_fatal());
    }
}
