//! Property-based test generators using proptest.

use proptest::prelude::*;
use transidb_store::PropertyValue;

/// Strategy for generating property values of every kind.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        any::<bool>().prop_map(PropertyValue::Bool),
        (-1000i64..1000).prop_map(PropertyValue::Int),
        (-1.0e6f64..1.0e6).prop_map(PropertyValue::Float),
        prop::string::string_regex("[a-z]{1,8}")
            .expect("Invalid regex")
            .prop_map(PropertyValue::String),
    ]
}

/// Strategy for generating login names.
pub fn login_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("Invalid regex")
}

/// One edit of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyOp {
    /// Set the property.
    Set(PropertyValue),
    /// Delete the property.
    Delete,
}

/// Strategy for a sequence of property edits drawn from a small value
/// pool, so values repeat often.
pub fn property_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<PropertyOp>> {
    let op = prop_oneof![
        4 => (0i64..3).prop_map(|v| PropertyOp::Set(PropertyValue::Int(v))),
        1 => Just(PropertyOp::Delete),
    ];
    prop::collection::vec(op, 0..max_len)
}

/// One edit of a multi-valued link, by index into a pool of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOp {
    /// Add the target.
    Add(usize),
    /// Remove the target.
    Remove(usize),
}

/// Strategy for a sequence of link edits over `pool` targets.
pub fn link_ops_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<LinkOp>> {
    let op = prop_oneof![
        (0..pool).prop_map(LinkOp::Add),
        (0..pool).prop_map(LinkOp::Remove),
    ];
    prop::collection::vec(op, 0..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn logins_are_never_empty(login in login_strategy()) {
            prop_assert!(!login.is_empty());
            prop_assert!(login.chars().next().is_some_and(|c| c.is_ascii_lowercase()));
        }

        #[test]
        fn link_ops_stay_in_pool(ops in link_ops_strategy(3, 20)) {
            for op in ops {
                let (LinkOp::Add(i) | LinkOp::Remove(i)) = op;
                prop_assert!(i < 3);
            }
        }
    }
}
