//! Core type definitions for the persistent store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Store-assigned identifier of a persisted entity.
///
/// The id carries the entity type discriminator and a local id unique
/// within that type. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersistentEntityId {
    /// Entity type discriminator.
    pub type_id: u32,
    /// Id of the entity within its type.
    pub local_id: u64,
}

impl PersistentEntityId {
    /// Creates a new persistent entity id.
    #[must_use]
    pub const fn new(type_id: u32, local_id: u64) -> Self {
        Self { type_id, local_id }
    }
}

impl fmt::Display for PersistentEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_id, self.local_id)
    }
}

/// Sequence number of a committed store transaction.
///
/// Higher sequence numbers indicate later commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// A primitive property value.
///
/// Values have total equality and ordering (floats compare with
/// `f64::total_cmp`) so they can take part in unique keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
}

impl PropertyValue {
    /// Returns true for the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::String(s) if s.is_empty())
    }

    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Float(_) => 2,
            Self::String(_) => 3,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PropertyValue {}

impl PartialOrd for PropertyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropertyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for PropertyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// One component of a unique-index key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexValue {
    /// A property component.
    Property(PropertyValue),
    /// A link component, keyed by the target entity.
    Entity(PersistentEntityId),
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(v) => write!(f, "{v}"),
            Self::Entity(id) => write!(f, "#{id}"),
        }
    }
}

/// A saved snapshot of an entity row taken before it was changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Version of the row the snapshot was taken from.
    pub version: u64,
    /// Property values at that version.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Link targets at that version.
    pub links: BTreeMap<String, Vec<PersistentEntityId>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn property_value() -> impl Strategy<Value = PropertyValue> {
        prop_oneof![
            any::<bool>().prop_map(PropertyValue::Bool),
            any::<i64>().prop_map(PropertyValue::Int),
            any::<f64>().prop_map(PropertyValue::Float),
            "[a-c]{0,3}".prop_map(PropertyValue::String),
        ]
    }

    fn hash_of(value: &PropertyValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn persistent_id_display() {
        let id = PersistentEntityId::new(3, 42);
        assert_eq!(format!("{id}"), "3-42");
    }

    #[test]
    fn persistent_id_ordering() {
        let a = PersistentEntityId::new(1, 5);
        let b = PersistentEntityId::new(1, 6);
        let c = PersistentEntityId::new(2, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn empty_string_is_empty() {
        assert!(PropertyValue::from("").is_empty());
        assert!(!PropertyValue::from("x").is_empty());
        assert!(!PropertyValue::Int(0).is_empty());
    }

    #[test]
    fn floats_have_total_equality() {
        let nan = PropertyValue::Float(f64::NAN);
        assert_eq!(nan, nan.clone());

        let mut set = HashSet::new();
        set.insert(PropertyValue::Float(1.5));
        assert!(set.contains(&PropertyValue::Float(1.5)));
    }

    #[test]
    fn different_kinds_are_not_equal() {
        assert_ne!(PropertyValue::Int(1), PropertyValue::Float(1.0));
        assert!(PropertyValue::Bool(true) < PropertyValue::Int(0));
    }

    #[test]
    fn serde_preserves_values() {
        let value = IndexValue::Property(PropertyValue::from("alice"));
        let json = serde_json::to_string(&value).unwrap();
        let back: IndexValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in property_value(), b in property_value()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a == b, a.cmp(&b) == Ordering::Equal);
        }

        #[test]
        fn ordering_is_transitive(
            a in property_value(),
            b in property_value(),
            c in property_value(),
        ) {
            let mut sorted = [a, b, c];
            sorted.sort();
            prop_assert!(sorted[0] <= sorted[1]);
            prop_assert!(sorted[1] <= sorted[2]);
            prop_assert!(sorted[0] <= sorted[2]);
        }

        #[test]
        fn equal_values_hash_alike(a in property_value(), b in property_value()) {
            prop_assert_eq!(hash_of(&a), hash_of(&a.clone()));
            if a == b {
                prop_assert_eq!(hash_of(&a), hash_of(&b));
            }
        }
    }
}
