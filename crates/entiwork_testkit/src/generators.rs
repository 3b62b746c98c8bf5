//! Property-based test generators using proptest.
//!
//! Provides strategies for generating values, references and state
//! records covering every shape the codecs must preserve, including
//! nulls, empty collections and nested values.

use entiwork_codec::{StateRecord, Value};
use entiwork_core::EntityReference;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating reference strings such as `user:42`.
pub fn reference_string_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}:[0-9]{1,6}").expect("Invalid regex")
}

/// Strategy for generating entity references.
pub fn reference_strategy() -> impl Strategy<Value = EntityReference> {
    reference_string_strategy().prop_map(EntityReference::new)
}

/// Strategy for generating member names.
pub fn member_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for generating entity type names.
pub fn type_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,8}").expect("Invalid regex")
}

/// Strategy for generating scalar values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        any::<String>().prop_map(Value::Text),
    ]
}

/// Strategy for generating values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::btree_map(member_name_strategy(), inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for generating valid state records.
pub fn state_record_strategy() -> impl Strategy<Value = StateRecord> {
    (
        reference_string_strategy(),
        type_name_strategy(),
        prop::string::string_regex("[0-9]\\.[0-9]").expect("Invalid regex"),
        prop::string::string_regex("[0-9a-f]{0,16}").expect("Invalid regex"),
        any::<u64>(),
        prop::collection::btree_map(member_name_strategy(), value_strategy(), 0..5),
        prop::collection::btree_map(
            member_name_strategy(),
            prop::option::of(reference_string_strategy()),
            0..3,
        ),
        prop::collection::btree_map(
            member_name_strategy(),
            prop::collection::vec(reference_string_strategy(), 0..4),
            0..3,
        ),
        prop::collection::btree_map(
            member_name_strategy(),
            prop::collection::btree_map(member_name_strategy(), reference_string_strategy(), 0..3),
            0..3,
        ),
    )
        .prop_map(|(id, ty, app_version, version, modified, props, single, many, named)| {
            let mut record =
                StateRecord::new(id, ty, app_version).with_version(version, modified);
            record.properties = props;
            record.associations = single;
            record.many_associations = many;
            record.named_associations = named;
            record
        })
}

/// Strategy for generating a record with one property of every scalar
/// shape, an unset association and an empty many-association.
pub fn sparse_record_strategy() -> impl Strategy<Value = StateRecord> {
    (reference_string_strategy(), any::<i64>()).prop_map(|(identity, n)| {
        let mut record = StateRecord::new(identity, "User", "1.0").with_version("1", 0);
        let properties: BTreeMap<String, Value> = [
            ("null".to_string(), Value::Null),
            ("count".to_string(), Value::Integer(n)),
            ("empty".to_string(), Value::List(Vec::new())),
        ]
        .into_iter()
        .collect();
        record.properties = properties;
        record.associations.insert("manager".into(), None);
        record.many_associations.insert("friends".into(), Vec::new());
        record.named_associations.insert("roles".into(), BTreeMap::new());
        record
    })
}
