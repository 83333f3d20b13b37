//! Identifiers shared across graph definitions and runtime instances.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Index of a node inside a compiled graph definition (and its instance arena).
pub type NodeIndex = i16;

/// Sentinel for "no node connected".
pub const INVALID_INDEX: NodeIndex = -1;

/// Hashed name used for events, parameters, bones and slots.
///
/// The hash is a 32-bit FNV-1a of the UTF-8 name. `0` is reserved as the invalid ID.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct StringId(pub u32);

impl StringId {
    pub const INVALID: StringId = StringId(0);

    pub const fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash: u32 = 0x811c_9dc5;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(0x0100_0193);
            i += 1;
        }
        // Keep zero free for the invalid ID.
        if hash == 0 {
            hash = 1;
        }
        StringId(hash)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<&str> for StringId {
    fn from(name: &str) -> Self {
        StringId::new(name)
    }
}

impl fmt::Debug for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringId({:#010x})", self.0)
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Serialize for StringId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringIdRepr {
    Hash(u32),
    Name(String),
}

impl<'de> Deserialize<'de> for StringId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match StringIdRepr::deserialize(deserializer)? {
            StringIdRepr::Hash(hash) => StringId(hash),
            StringIdRepr::Name(name) if name.is_empty() => StringId::INVALID,
            StringIdRepr::Name(name) => StringId::new(&name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable_and_never_invalid() {
        assert_eq!(StringId::new("Walk"), StringId::from("Walk"));
        assert_ne!(StringId::new("Walk"), StringId::new("Run"));
        assert!(StringId::new("").is_valid());
        assert!(!StringId::default().is_valid());
    }

    #[test]
    fn deserializes_from_name_or_hash() {
        let by_name: StringId = serde_json::from_str("\"LeftFoot\"").unwrap();
        assert_eq!(by_name, StringId::new("LeftFoot"));

        let by_hash: StringId = serde_json::from_str(&by_name.0.to_string()).unwrap();
        assert_eq!(by_hash, by_name);

        let roundtrip = serde_json::to_string(&by_name).unwrap();
        assert_eq!(serde_json::from_str::<StringId>(&roundtrip).unwrap(), by_name);
    }
}
