//! Companion identities and the immutable allowlist.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::RemoteError;

/// Ed25519 public key of a companion device.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompanionIdentity([u8; 32]);

impl CompanionIdentity {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for CompanionIdentity {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 64 {
            return Err(RemoteError::malformed(format!(
                "public key must be 64 hex characters, got {}",
                trimmed.len()
            )));
        }
        let bytes = hex::decode(trimmed)
            .map_err(|e| RemoteError::malformed(format!("public key is not hex: {}", e)))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| RemoteError::malformed("public key must be 32 bytes"))
    }
}

impl fmt::Display for CompanionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CompanionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompanionIdentity({})", self.to_hex())
    }
}

/// Set of companions allowed to issue commands.
///
/// Never mutated after construction; a reload builds a new value.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    members: HashSet<CompanionIdentity>,
}

impl Allowlist {
    pub fn new<I>(members: I) -> Self
    where
        I: IntoIterator<Item = CompanionIdentity>,
    {
        Self {
            members: members.into_iter().collect(),
        }
    }

    /// Parse a list of hex keys. Any invalid entry fails the whole list.
    pub fn from_hex_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, RemoteError> {
        let mut members = HashSet::with_capacity(keys.len());
        for key in keys {
            let identity = key.as_ref().parse::<CompanionIdentity>().map_err(|e| {
                RemoteError::Config {
                    message: format!("Invalid companion key '{}': {}", key.as_ref(), e),
                }
            })?;
            members.insert(identity);
        }
        Ok(Self { members })
    }

    pub fn contains(&self, identity: &CompanionIdentity) -> bool {
        self.members.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "3B6A27BCCEB6A42D62A3A8D02A6F0D73653215771DE243A63AC048A18B59DA29";

    #[test]
    fn test_parse_is_case_insensitive() {
        let upper: CompanionIdentity = KEY.parse().unwrap();
        let lower: CompanionIdentity = KEY.to_lowercase().parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.to_hex(), KEY.to_lowercase());
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!("abcd".parse::<CompanionIdentity>().is_err());
        assert!(format!("{}00", KEY).parse::<CompanionIdentity>().is_err());
    }

    #[test]
    fn test_allowlist_membership() {
        let allowlist = Allowlist::from_hex_keys(&[KEY]).unwrap();
        let member: CompanionIdentity = KEY.parse().unwrap();
        let stranger = CompanionIdentity::from_bytes([9u8; 32]);

        assert!(allowlist.contains(&member));
        assert!(!allowlist.contains(&stranger));
        assert_eq!(allowlist.len(), 1);
    }

    #[test]
    fn test_allowlist_rejects_bad_entry() {
        let result = Allowlist::from_hex_keys(&[KEY, "zz"]);
        assert!(matches!(result, Err(RemoteError::Config { .. })));
    }

    #[test]
    fn test_duplicate_entries_collapse() {
        let allowlist = Allowlist::from_hex_keys(&[KEY.to_string(), KEY.to_lowercase()]).unwrap();
        assert_eq!(allowlist.len(), 1);
    }
}
