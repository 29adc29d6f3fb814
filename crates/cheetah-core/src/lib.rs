#![deny(missing_docs)]
#![doc = "Shared error taxonomy, canonical serialization and provenance for Cheetah campaign composition."]

pub mod errors;
/// Stable content hashing helpers.
pub mod hash;
pub mod provenance;
/// Canonical JSON and YAML helpers.
pub mod serde;

pub use errors::{CampError, ErrorInfo};
pub use hash::{bytes_hash_string, stable_hash_string};
pub use provenance::{now_rfc3339, CampaignProvenance, SchemaVersion, MANIFEST_SCHEMA};
