//! Entity type descriptors.
//!
//! A descriptor lists the properties and associations an entity type
//! declares. Entity states only accept declared names, and states loaded
//! from a store are shaped by the descriptor: missing properties take
//! their default, undeclared ones are dropped.

use entiwork_codec::{Value, ValueKind};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Declaration of one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    name: String,
    kind: ValueKind,
    default: Value,
    optional: bool,
}

impl PropertyDescriptor {
    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepted value kind.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Initial value of new entities.
    #[must_use]
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Whether `Value::Null` is a valid final value.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

/// Declaration of one association of any arity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    name: String,
    optional: bool,
}

impl AssociationDescriptor {
    /// Association name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether an unset single-valued association is valid.
    ///
    /// Many and named associations are always optional.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

/// The declared shape of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    type_name: String,
    properties: BTreeMap<String, PropertyDescriptor>,
    associations: BTreeMap<String, AssociationDescriptor>,
    many_associations: BTreeMap<String, AssociationDescriptor>,
    named_associations: BTreeMap<String, AssociationDescriptor>,
}

impl EntityDescriptor {
    /// Starts a descriptor for the given type name.
    #[must_use]
    pub fn builder(type_name: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: Self {
                type_name: type_name.into(),
                properties: BTreeMap::new(),
                associations: BTreeMap::new(),
                many_associations: BTreeMap::new(),
                named_associations: BTreeMap::new(),
            },
        }
    }

    /// The entity type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Looks up a property declaration.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    /// Iterates property declarations in name order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }

    /// Looks up a single-valued association declaration.
    #[must_use]
    pub fn association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations.get(name)
    }

    /// Iterates single-valued association declarations.
    pub fn associations(&self) -> impl Iterator<Item = &AssociationDescriptor> {
        self.associations.values()
    }

    /// Looks up a many-association declaration.
    #[must_use]
    pub fn many_association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.many_associations.get(name)
    }

    /// Iterates many-association declarations.
    pub fn many_associations(&self) -> impl Iterator<Item = &AssociationDescriptor> {
        self.many_associations.values()
    }

    /// Looks up a named-association declaration.
    #[must_use]
    pub fn named_association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.named_associations.get(name)
    }

    /// Iterates named-association declarations.
    pub fn named_associations(&self) -> impl Iterator<Item = &AssociationDescriptor> {
        self.named_associations.values()
    }
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug)]
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    /// Declares a required property with a `Null` default.
    ///
    /// A required property must be set before a new entity is created.
    #[must_use]
    pub fn property(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.declare_property(name.into(), kind, Value::Null, false)
    }

    /// Declares an optional property with a `Null` default.
    #[must_use]
    pub fn optional_property(self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.declare_property(name.into(), kind, Value::Null, true)
    }

    /// Declares a required property with an explicit default.
    #[must_use]
    pub fn property_with_default(
        self,
        name: impl Into<String>,
        kind: ValueKind,
        default: impl Into<Value>,
    ) -> Self {
        self.declare_property(name.into(), kind, default.into(), false)
    }

    fn declare_property(
        mut self,
        name: String,
        kind: ValueKind,
        default: Value,
        optional: bool,
    ) -> Self {
        self.descriptor.properties.insert(
            name.clone(),
            PropertyDescriptor {
                name,
                kind,
                default,
                optional,
            },
        );
        self
    }

    /// Declares a required single-valued association.
    #[must_use]
    pub fn association(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.descriptor
            .associations
            .insert(name.clone(), AssociationDescriptor { name, optional: false });
        self
    }

    /// Declares an optional single-valued association.
    #[must_use]
    pub fn optional_association(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.descriptor
            .associations
            .insert(name.clone(), AssociationDescriptor { name, optional: true });
        self
    }

    /// Declares an ordered many-association.
    #[must_use]
    pub fn many_association(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.descriptor
            .many_associations
            .insert(name.clone(), AssociationDescriptor { name, optional: true });
        self
    }

    /// Declares a keyed named-association.
    #[must_use]
    pub fn named_association(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.descriptor
            .named_associations
            .insert(name.clone(), AssociationDescriptor { name, optional: true });
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> Arc<EntityDescriptor> {
        Arc::new(self.descriptor)
    }
}
