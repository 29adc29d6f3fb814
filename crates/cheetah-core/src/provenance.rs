//! Provenance and schema descriptors attached to campaign artefacts.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Semantic version describing the schema of serialized payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version incremented for breaking changes.
    pub major: u32,
    /// Minor version incremented for additive changes.
    pub minor: u32,
    /// Patch version incremented for bug fixes and documentation updates.
    pub patch: u32,
}

impl SchemaVersion {
    /// Creates a new schema version descriptor.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

/// Schema version written into run manifests and campaign reports.
pub const MANIFEST_SCHEMA: SchemaVersion = SchemaVersion::new(1, 0, 0);

/// Provenance recorded next to every generated campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CampaignProvenance {
    /// Hash of the experiment specification that produced the campaign.
    pub spec_hash: String,
    /// Hash of the machine profile the campaign targets.
    pub machine_hash: String,
    /// ISO-8601 timestamp recording when the campaign was generated.
    pub created_at: String,
    /// Version map for the tools involved in generation.
    pub tool_versions: BTreeMap<String, String>,
}

impl CampaignProvenance {
    /// Builds provenance stamped with the current time and this crate's version.
    pub fn new(spec_hash: impl Into<String>, machine_hash: impl Into<String>) -> Self {
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert(
            "cheetah-core".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        Self {
            spec_hash: spec_hash.into(),
            machine_hash: machine_hash.into(),
            created_at: now_rfc3339(),
            tool_versions,
        }
    }
}

/// Current UTC time formatted as RFC 3339 with second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
