//! Persisted entity state record.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application version assumed for records written before versioning.
pub const UNVERSIONED: &str = "0.0";

fn unversioned() -> String {
    UNVERSIONED.to_string()
}

/// The storage shape of one entity.
///
/// Field names follow the persisted layout shared by every serialized
/// store:
///
/// ```text
/// {
///   "identity": "user:42",
///   "applicationVersion": "1.0",
///   "type": "User",
///   "version": "0f2c…",
///   "modified": 1700000000000,
///   "properties": { "name": { "text": "Ann" } },
///   "associations": { "manager": null },
///   "manyAssociations": { "friends": ["user:7"] },
///   "namedAssociations": { "roles": { "admin": "role:1" } }
/// }
/// ```
///
/// All maps are `BTreeMap`s so that encoding is deterministic and
/// `encode(decode(bytes)) == bytes` holds for every record produced by a
/// codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    /// Entity reference.
    pub identity: String,
    /// Application (schema) version the record was written with.
    #[serde(default = "unversioned")]
    pub application_version: String,
    /// Entity type name.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Optimistic-lock token.
    pub version: String,
    /// Last modification time, epoch milliseconds.
    pub modified: u64,
    /// Property values by name.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Single-valued references by name.
    #[serde(default)]
    pub associations: BTreeMap<String, Option<String>>,
    /// Ordered multi-valued references by name.
    #[serde(default)]
    pub many_associations: BTreeMap<String, Vec<String>>,
    /// Keyed multi-valued references by name.
    #[serde(default)]
    pub named_associations: BTreeMap<String, BTreeMap<String, String>>,
}

impl StateRecord {
    /// Creates an empty record for the given identity and type.
    pub fn new(
        identity: impl Into<String>,
        entity_type: impl Into<String>,
        application_version: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            application_version: application_version.into(),
            entity_type: entity_type.into(),
            version: String::new(),
            modified: 0,
            properties: BTreeMap::new(),
            associations: BTreeMap::new(),
            many_associations: BTreeMap::new(),
            named_associations: BTreeMap::new(),
        }
    }

    /// Sets the version token and modification time.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>, modified: u64) -> Self {
        self.version = version.into();
        self.modified = modified;
        self
    }

    /// Checks the fields every record must carry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStructure` if the identity or type is empty.
    pub fn validate(&self) -> CodecResult<()> {
        if self.identity.is_empty() {
            return Err(CodecError::invalid_structure("record has an empty identity"));
        }
        if self.entity_type.is_empty() {
            return Err(CodecError::invalid_structure(format!(
                "record {} has an empty type",
                self.identity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_empty() {
        let record = StateRecord::new("user:1", "User", "1.0");
        assert!(record.version.is_empty());
        assert!(record.properties.is_empty());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_identity() {
        let record = StateRecord::new("", "User", "1.0");
        assert!(matches!(
            record.validate(),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn missing_application_version_defaults() {
        let json = r#"{"identity":"a","type":"T","version":"1","modified":5}"#;
        let record: StateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.application_version, UNVERSIONED);
        assert!(record.associations.is_empty());
    }
}
