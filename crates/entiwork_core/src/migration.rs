//! Record migration support.
//!
//! Serialized stores hand every record written under a different
//! application version to a [`Migration`] before decoding it. The
//! provided [`MigrationRules`] chains version-to-version rules:
//!
//! ```
//! use entiwork_codec::{StateRecord, Value};
//! use entiwork_core::migration::{Migration, MigrationRules, MigrationStep};
//!
//! let mut rules = MigrationRules::new();
//! rules
//!     .register(Box::new(
//!         MigrationStep::new("1.0", "1.1", "split-name")
//!             .rename_property("User", "name", "fullName")
//!             .add_property("User", "active", Value::Bool(true)),
//!     ))
//!     .unwrap();
//!
//! let mut record = StateRecord::new("user:1", "User", "1.0");
//! record.properties.insert("name".into(), Value::from("Ann"));
//! let migrated = rules.migrate(record, "1.0", "1.1").unwrap();
//! assert_eq!(migrated.properties["fullName"], Value::from("Ann"));
//! assert_eq!(migrated.application_version, "1.1");
//! ```
//!
//! Rules are forward-only. A version with no outgoing rule ends the
//! chain and the record is tagged with the target version as is.

use entiwork_codec::{StateRecord, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Result type for migrations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors that can occur while migrating records.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Two rules start at the same version.
    #[error("a migration from version {from_version} is already registered")]
    DuplicateRule {
        /// The contested source version.
        from_version: String,
    },

    /// A rule failed on a record.
    #[error("migration {rule} failed for {identity}: {message}")]
    RuleFailed {
        /// Rule name.
        rule: String,
        /// Identity of the record.
        identity: String,
        /// Failure description.
        message: String,
    },
}

/// Rewrites records written by an older application version.
pub trait Migration: Send + Sync {
    /// Migrates a record from `from_version` to `to_version`.
    ///
    /// The returned record carries `to_version` as its application version.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be migrated.
    fn migrate(
        &self,
        record: StateRecord,
        from_version: &str,
        to_version: &str,
    ) -> MigrationResult<StateRecord>;
}

/// An operation applied to a record during a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// Renamed the entity type.
    RenameEntityType {
        /// Old type name.
        from: String,
        /// New type name.
        to: String,
    },
    /// Renamed a property.
    RenameProperty {
        /// Affected entity type.
        entity_type: String,
        /// Old property name.
        from: String,
        /// New property name.
        to: String,
    },
    /// Added a property with a default value.
    AddProperty {
        /// Affected entity type.
        entity_type: String,
        /// Property name.
        name: String,
        /// Initial value.
        default: Value,
    },
    /// Removed a property.
    RemoveProperty {
        /// Affected entity type.
        entity_type: String,
        /// Property name.
        name: String,
    },
    /// Renamed an association of any arity.
    RenameAssociation {
        /// Affected entity type.
        entity_type: String,
        /// Old association name.
        from: String,
        /// New association name.
        to: String,
    },
    /// Custom operation.
    Custom {
        /// Description of the operation.
        description: String,
    },
}

impl MigrationOperation {
    /// Applies the operation, returning whether the record changed.
    ///
    /// `Custom` is a log entry only and never changes the record.
    pub fn apply(&self, record: &mut StateRecord) -> bool {
        match self {
            Self::RenameEntityType { from, to } => {
                if record.entity_type == *from {
                    record.entity_type.clone_from(to);
                    true
                } else {
                    false
                }
            }
            Self::RenameProperty { entity_type, from, to } => {
                if record.entity_type != *entity_type {
                    return false;
                }
                match record.properties.remove(from) {
                    Some(value) => {
                        record.properties.insert(to.clone(), value);
                        true
                    }
                    None => false,
                }
            }
            Self::AddProperty {
                entity_type,
                name,
                default,
            } => {
                if record.entity_type != *entity_type || record.properties.contains_key(name) {
                    return false;
                }
                record.properties.insert(name.clone(), default.clone());
                true
            }
            Self::RemoveProperty { entity_type, name } => {
                record.entity_type == *entity_type && record.properties.remove(name).is_some()
            }
            Self::RenameAssociation { entity_type, from, to } => {
                if record.entity_type != *entity_type {
                    return false;
                }
                let mut changed = false;
                if let Some(target) = record.associations.remove(from) {
                    record.associations.insert(to.clone(), target);
                    changed = true;
                }
                if let Some(targets) = record.many_associations.remove(from) {
                    record.many_associations.insert(to.clone(), targets);
                    changed = true;
                }
                if let Some(entries) = record.named_associations.remove(from) {
                    record.named_associations.insert(to.clone(), entries);
                    changed = true;
                }
                changed
            }
            Self::Custom { .. } => false,
        }
    }
}

/// Context passed to migration rules.
#[derive(Debug)]
pub struct MigrationContext {
    /// Identity of the record being migrated.
    pub identity: String,
    /// Operations that changed the record (for logging/debugging).
    pub operations: Vec<MigrationOperation>,
}

impl MigrationContext {
    /// Creates a context for one record.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            operations: Vec::new(),
        }
    }

    /// Records an applied operation.
    pub fn record(&mut self, operation: MigrationOperation) {
        self.operations.push(operation);
    }
}

/// One version-to-version migration rule.
pub trait MigrationRule: Send + Sync {
    /// Version the rule migrates from.
    fn from_version(&self) -> &str;

    /// Version the rule migrates to.
    fn to_version(&self) -> &str;

    /// Name of the rule.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Rewrites one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be migrated.
    fn up(&self, record: &mut StateRecord, ctx: &mut MigrationContext) -> MigrationResult<()>;
}

/// Information about a registered rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Source version.
    pub from_version: String,
    /// Target version.
    pub to_version: String,
    /// Rule name.
    pub name: String,
    /// Description of the rule.
    pub description: Option<String>,
}

type CustomFn = Box<dyn Fn(&mut StateRecord) -> MigrationResult<()> + Send + Sync>;

enum StepAction {
    Operation(MigrationOperation),
    Custom { description: String, apply: CustomFn },
}

/// A rule made of declarative operations and custom closures, applied in
/// declaration order.
pub struct MigrationStep {
    from_version: String,
    to_version: String,
    name: String,
    description: Option<String>,
    actions: Vec<StepAction>,
}

impl MigrationStep {
    /// Creates an empty step.
    #[must_use]
    pub fn new(
        from_version: impl Into<String>,
        to_version: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            from_version: from_version.into(),
            to_version: to_version.into(),
            name: name.into(),
            description: None,
            actions: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a declarative operation.
    #[must_use]
    pub fn operation(mut self, operation: MigrationOperation) -> Self {
        self.actions.push(StepAction::Operation(operation));
        self
    }

    /// Renames an entity type.
    #[must_use]
    pub fn rename_type(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.operation(MigrationOperation::RenameEntityType {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Renames a property.
    #[must_use]
    pub fn rename_property(
        self,
        entity_type: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.operation(MigrationOperation::RenameProperty {
            entity_type: entity_type.into(),
            from: from.into(),
            to: to.into(),
        })
    }

    /// Adds a property unless present.
    #[must_use]
    pub fn add_property(
        self,
        entity_type: impl Into<String>,
        name: impl Into<String>,
        default: Value,
    ) -> Self {
        self.operation(MigrationOperation::AddProperty {
            entity_type: entity_type.into(),
            name: name.into(),
            default,
        })
    }

    /// Removes a property.
    #[must_use]
    pub fn remove_property(self, entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        self.operation(MigrationOperation::RemoveProperty {
            entity_type: entity_type.into(),
            name: name.into(),
        })
    }

    /// Renames an association of any arity.
    #[must_use]
    pub fn rename_association(
        self,
        entity_type: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.operation(MigrationOperation::RenameAssociation {
            entity_type: entity_type.into(),
            from: from.into(),
            to: to.into(),
        })
    }

    /// Adds a custom rewrite.
    #[must_use]
    pub fn custom<F>(mut self, description: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut StateRecord) -> MigrationResult<()> + Send + Sync + 'static,
    {
        self.actions.push(StepAction::Custom {
            description: description.into(),
            apply: Box::new(apply),
        });
        self
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("name", &self.name)
            .field("actions", &self.actions.len())
            .finish()
    }
}

impl MigrationRule for MigrationStep {
    fn from_version(&self) -> &str {
        &self.from_version
    }

    fn to_version(&self) -> &str {
        &self.to_version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn up(&self, record: &mut StateRecord, ctx: &mut MigrationContext) -> MigrationResult<()> {
        for action in &self.actions {
            match action {
                StepAction::Operation(operation) => {
                    if operation.apply(record) {
                        ctx.record(operation.clone());
                    }
                }
                StepAction::Custom { description, apply } => {
                    apply(record).map_err(|e| MigrationError::RuleFailed {
                        rule: self.name.clone(),
                        identity: record.identity.clone(),
                        message: e.to_string(),
                    })?;
                    ctx.record(MigrationOperation::Custom {
                        description: description.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Ordered set of migration rules keyed by source version.
#[derive(Default)]
pub struct MigrationRules {
    rules: BTreeMap<String, Box<dyn MigrationRule>>,
}

impl MigrationRules {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRule` if a rule already starts at the same version.
    pub fn register(&mut self, rule: Box<dyn MigrationRule>) -> MigrationResult<()> {
        let from_version = rule.from_version().to_string();
        if self.rules.contains_key(&from_version) {
            return Err(MigrationError::DuplicateRule { from_version });
        }
        self.rules.insert(from_version, rule);
        Ok(())
    }

    /// Returns the registered rules.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.rules
            .values()
            .map(|r| MigrationInfo {
                from_version: r.from_version().to_string(),
                to_version: r.to_version().to_string(),
                name: r.name().to_string(),
                description: r.description().map(String::from),
            })
            .collect()
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for MigrationRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRules")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Migration for MigrationRules {
    fn migrate(
        &self,
        mut record: StateRecord,
        from_version: &str,
        to_version: &str,
    ) -> MigrationResult<StateRecord> {
        let mut ctx = MigrationContext::new(record.identity.clone());
        let mut current = from_version.to_string();
        let mut hops = 0;

        while current != to_version && hops < self.rules.len() {
            let Some(rule) = self.rules.get(&current) else {
                break;
            };
            trace!(identity = %record.identity, rule = rule.name(), "applying migration rule");
            rule.up(&mut record, &mut ctx)?;
            current = rule.to_version().to_string();
            hops += 1;
        }

        record.application_version = to_version.to_string();
        debug!(
            identity = %record.identity,
            from = from_version,
            to = to_version,
            rules = hops,
            operations = ctx.operations.len(),
            "migrated record"
        );
        Ok(record)
    }
}
