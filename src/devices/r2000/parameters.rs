//! Static parameter table of the network scanner.
//!
//! Maps each device parameter name to its access kind and the protocol
//! versions that expose it. Reads and writes are validated against this table
//! before any request is sent.

use crate::devices::r2000::http::ProtocolVersion;
use crate::error::{Error, Result};

/// Access qualifier of a device parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Fixed at manufacture
    ReadOnlyStatic,
    /// Changes at runtime, not writable
    ReadOnly,
    /// Writable, persisted
    ReadWrite,
    /// Writable, not persisted across power cycles
    Volatile,
}

impl Access {
    pub fn is_writable(self) -> bool {
        matches!(self, Access::ReadWrite | Access::Volatile)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub access: Access,
    /// First protocol version exposing the parameter
    pub min_version: Option<ProtocolVersion>,
    /// Protocol versions at or above this no longer expose it
    pub max_version: Option<ProtocolVersion>,
}

impl ParameterSpec {
    const fn new(name: &'static str, access: Access) -> Self {
        Self {
            name,
            access,
            min_version: None,
            max_version: None,
        }
    }

    const fn since(mut self, version: ProtocolVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn available_in(&self, version: ProtocolVersion) -> bool {
        self.min_version.map_or(true, |min| version >= min)
            && self.max_version.map_or(true, |max| version < max)
    }
}

use Access::*;

pub const PARAMETERS: &[ParameterSpec] = &[
    // Basic sensor information
    ParameterSpec::new("device_family", ReadOnlyStatic),
    ParameterSpec::new("vendor", ReadOnlyStatic),
    ParameterSpec::new("product", ReadOnlyStatic),
    ParameterSpec::new("part", ReadOnlyStatic),
    ParameterSpec::new("serial", ReadOnlyStatic),
    ParameterSpec::new("revision_fw", ReadOnlyStatic),
    ParameterSpec::new("revision_hw", ReadOnlyStatic),
    ParameterSpec::new("user_tag", ReadWrite),
    ParameterSpec::new("user_notes", ReadWrite),
    // Capabilities
    ParameterSpec::new("feature_flags", ReadOnlyStatic).since(ProtocolVersion::V1_01),
    ParameterSpec::new("emitter_type", ReadOnlyStatic),
    ParameterSpec::new("radial_range_min", ReadOnlyStatic),
    ParameterSpec::new("radial_range_max", ReadOnlyStatic),
    ParameterSpec::new("radial_resolution", ReadOnlyStatic),
    ParameterSpec::new("angular_fov", ReadOnlyStatic),
    ParameterSpec::new("angular_resolution", ReadOnlyStatic),
    ParameterSpec::new("scan_frequency_min", ReadOnlyStatic).since(ProtocolVersion::V1_01),
    ParameterSpec::new("scan_frequency_max", ReadOnlyStatic).since(ProtocolVersion::V1_01),
    ParameterSpec::new("sampling_rate_min", ReadOnlyStatic).since(ProtocolVersion::V1_01),
    ParameterSpec::new("sampling_rate_max", ReadOnlyStatic).since(ProtocolVersion::V1_01),
    ParameterSpec::new("max_connections", ReadOnlyStatic),
    ParameterSpec::new("max_scan_sectors", ReadOnlyStatic),
    ParameterSpec::new("max_data_regions", ReadOnlyStatic),
    // Ethernet
    ParameterSpec::new("ip_mode", ReadWrite),
    ParameterSpec::new("ip_address", ReadWrite),
    ParameterSpec::new("subnet_mask", ReadWrite),
    ParameterSpec::new("gateway", ReadWrite),
    ParameterSpec::new("mac_address", ReadOnly),
    // Measuring configuration
    ParameterSpec::new("operating_mode", Volatile).since(ProtocolVersion::V1_02),
    ParameterSpec::new("scan_frequency", ReadWrite),
    ParameterSpec::new("scan_direction", ReadWrite),
    ParameterSpec::new("samples_per_scan", ReadWrite),
    ParameterSpec::new("scan_frequency_measured", ReadOnly),
];

pub fn lookup(name: &str) -> Option<&'static ParameterSpec> {
    PARAMETERS.iter().find(|p| p.name == name)
}

/// Parameter exists and is available in `version`
pub fn check_readable(name: &str, version: ProtocolVersion) -> Result<&'static ParameterSpec> {
    let spec = lookup(name)
        .ok_or_else(|| Error::InvalidParameter(format!("unknown parameter '{}'", name)))?;
    if !spec.available_in(version) {
        return Err(Error::InvalidParameter(format!(
            "parameter '{}' is not available in protocol {}",
            name, version
        )));
    }
    Ok(spec)
}

/// As [`check_readable`], and the parameter accepts writes
pub fn check_writable(name: &str, version: ProtocolVersion) -> Result<&'static ParameterSpec> {
    let spec = check_readable(name, version)?;
    if !spec.access.is_writable() {
        return Err(Error::InvalidParameter(format!(
            "parameter '{}' is read-only ({:?})",
            name, spec.access
        )));
    }
    Ok(spec)
}

/// Names readable in `version` with one of `kinds`
pub fn names_for(version: ProtocolVersion, kinds: &[Access]) -> Vec<&'static str> {
    PARAMETERS
        .iter()
        .filter(|p| kinds.contains(&p.access) && p.available_in(version))
        .map(|p| p.name)
        .collect()
}
