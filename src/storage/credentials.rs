//! Registration credentials, keyed by console IP

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::console::ConsoleKind;
use crate::constants::{CREDENTIAL_SCHEMA_VERSION, MOCK_KEY_PREFIX};

/// Per-console authentication material produced by PIN registration
///
/// The rest of the crate treats this as opaque apart from the two
/// structural checks [`Credential::has_hex8`] and
/// [`Credential::has_morning16`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credential {
    /// 8 hex character registration key
    pub registration_key: String,
    /// 16-byte "morning" key, hex encoded on disk
    pub morning: String,
    pub console_name: String,
    /// Decimal wake credential sent in wake datagrams
    pub wake_credential: String,
    #[serde(rename = "console_type")]
    pub kind: ConsoleKind,
    #[serde(rename = "created")]
    pub created_ms: u64,
    pub is_valid: bool,
}

impl Default for Credential {
    fn default() -> Self {
        Self {
            registration_key: String::new(),
            morning: String::new(),
            console_name: String::new(),
            wake_credential: String::new(),
            kind: ConsoleKind::Unknown,
            created_ms: 0,
            is_valid: false,
        }
    }
}

impl Credential {
    pub fn new(
        registration_key: impl Into<String>,
        morning: [u8; 16],
        wake_credential: impl Into<String>,
        kind: ConsoleKind,
        created_ms: u64,
    ) -> Self {
        Self {
            registration_key: registration_key.into(),
            morning: hex::encode(morning),
            console_name: String::new(),
            wake_credential: wake_credential.into(),
            kind,
            created_ms,
            is_valid: true,
        }
    }

    /// Registration key is exactly 8 hex characters
    pub fn has_hex8(&self) -> bool {
        self.registration_key.len() == 8
            && self.registration_key.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Morning key decodes to exactly 16 bytes
    pub fn has_morning16(&self) -> bool {
        self.morning_key().is_some()
    }

    pub fn morning_key(&self) -> Option<[u8; 16]> {
        let bytes = hex::decode(&self.morning).ok()?;
        bytes.try_into().ok()
    }

    /// Placeholder credentials left behind by test builds
    pub fn is_mock(&self) -> bool {
        self.registration_key.starts_with(MOCK_KEY_PREFIX)
    }

    pub fn is_structurally_valid(&self) -> bool {
        self.has_hex8() && self.has_morning16()
    }

    /// Usable for wake and session init
    pub fn is_usable(&self) -> bool {
        self.is_structurally_valid() && !self.is_mock()
    }

    /// Wake credential as the number carried in the wake datagram
    pub fn wake_value(&self) -> Option<u64> {
        self.wake_credential.trim().parse().ok()
    }
}

/// Credential store document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialStore {
    pub version: u32,
    pub registrations: BTreeMap<String, Credential>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self {
            version: CREDENTIAL_SCHEMA_VERSION,
            registrations: BTreeMap::new(),
        }
    }
}

impl CredentialStore {
    pub fn get(&self, ip: &str) -> Option<&Credential> {
        self.registrations.get(ip)
    }

    pub fn insert(&mut self, ip: impl Into<String>, credential: Credential) -> Option<Credential> {
        self.registrations.insert(ip.into(), credential)
    }

    pub fn remove(&mut self, ip: &str) -> Option<Credential> {
        self.registrations.remove(ip)
    }

    /// The canonical "is this console registered?" predicate
    pub fn is_registered(&self, ip: &str) -> bool {
        self.get(ip).map(Credential::is_usable).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_checks() {
        let good = Credential::new("0a1b2c3d", [7u8; 16], "123456789", ConsoleKind::Ps5, 1);
        assert!(good.has_hex8());
        assert!(good.has_morning16());
        assert!(good.is_usable());
        assert_eq!(good.wake_value(), Some(123_456_789));

        let short = Credential {
            morning: "abcd".into(),
            ..good.clone()
        };
        assert!(!short.has_morning16());
        assert!(!short.is_usable());

        let mock = Credential {
            registration_key: "MOCK1234".into(),
            ..good
        };
        assert!(mock.is_mock());
        assert!(!mock.is_usable());
    }

    #[test]
    fn store_predicate() {
        let mut store = CredentialStore::default();
        assert!(!store.is_registered("10.0.0.1"));
        store.insert(
            "10.0.0.1",
            Credential::new("deadbeef", [1u8; 16], "1", ConsoleKind::Ps5, 0),
        );
        assert!(store.is_registered("10.0.0.1"));
        store.remove("10.0.0.1");
        assert!(!store.is_registered("10.0.0.1"));
    }
}
