//! Connection entries: the persisted representation of one configured
//! connection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::{IdentityValue, LocalIdentity};

/// Deterministic identifier derived from an entry's immutable identifying
/// fields, so the same logical target maps to the same id across reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedId(u64);

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

impl FixedId {
    /// Derive an id from a store kind and its identifying key.
    ///
    /// FNV-1a, so the mapping is stable across processes and releases,
    /// unlike the std hasher.
    pub fn derive(kind: &str, key: &str) -> Self {
        let mut hash = FNV_OFFSET;
        for byte in kind.bytes().chain(std::iter::once(0x1f)).chain(key.bytes()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        Self(hash)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw value (deserialization, tests).
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for FixedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Control actions an entry's backend supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub start: bool,
    pub stop: bool,
    pub pause: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        start: false,
        stop: false,
        pause: false,
    };

    pub const CONTROLLABLE: Capabilities = Capabilities {
        start: true,
        stop: true,
        pause: true,
    };
}

/// The backend-specific part of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreDef {
    /// The machine this process runs on.
    Local,
    /// A host reached over SSH.
    SshHost {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        #[serde(default)]
        identity: Option<IdentityValue>,
    },
    /// A container living inside a parent host.
    Container {
        container_name: String,
        #[serde(default)]
        identity: Option<IdentityValue>,
    },
    /// A shared identity other entries can reference.
    Identity { identity: LocalIdentity },
}

fn default_ssh_port() -> u16 {
    22
}

impl StoreDef {
    /// The store kind tag, which also selects the connector.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreDef::Local => "local",
            StoreDef::SshHost { .. } => "ssh_host",
            StoreDef::Container { .. } => "container",
            StoreDef::Identity { .. } => "identity",
        }
    }

    /// Whether a shell session can be opened on this store.
    pub fn is_connectable(&self) -> bool {
        !matches!(self, StoreDef::Identity { .. })
    }

    /// Whether this store is layered on a parent connection.
    pub fn requires_parent(&self) -> bool {
        matches!(self, StoreDef::Container { .. })
    }

    /// Control actions this store supports.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            StoreDef::Container { .. } => Capabilities::CONTROLLABLE,
            _ => Capabilities::NONE,
        }
    }

    /// The configured login/elevation identity, if any.
    pub fn identity(&self) -> Option<&IdentityValue> {
        match self {
            StoreDef::SshHost { identity, .. } | StoreDef::Container { identity, .. } => {
                identity.as_ref()
            }
            _ => None,
        }
    }

    /// Immutable identifying fields, when the store has any.
    ///
    /// Entries without one (local, identities) fall back to their name.
    pub fn fixed_key(&self) -> Option<String> {
        match self {
            StoreDef::SshHost { host, port, .. } => Some(format!("{host}:{port}")),
            StoreDef::Container { container_name, .. } => Some(container_name.clone()),
            _ => None,
        }
    }
}

/// Mutually exclusive classification driving which actions are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCondition {
    /// The last relevant operation succeeded and capability checks pass.
    Usable,
    /// Recoverable: missing configuration or a transient query failure.
    #[default]
    Incomplete,
    /// The last session-open attempt threw a hard startup error.
    Failed,
}

/// One persisted node in the connection hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub name: String,
    pub store: StoreDef,
    #[serde(default)]
    pub parent: Option<FixedId>,
    /// Typed state blob, store-specific and decoded with per-field defaults.
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub condition: EntryCondition,
    /// Non-deletable, e.g. currently in use.
    #[serde(default)]
    pub protected: bool,
}

impl ConnectionEntry {
    pub fn new(name: impl Into<String>, store: StoreDef) -> Self {
        Self {
            name: name.into(),
            store,
            parent: None,
            state: serde_json::Value::Null,
            condition: EntryCondition::default(),
            protected: false,
        }
    }

    pub fn with_parent(mut self, parent: FixedId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// The entry's stable identifier.
    pub fn id(&self) -> FixedId {
        let key = self.store.fixed_key().unwrap_or_else(|| self.name.clone());
        FixedId::derive(self.store.kind(), &key)
    }

    /// Decode the state blob into its typed form.
    ///
    /// Absent or unknown fields default instead of failing the load.
    pub fn decode_state<T>(&self) -> T
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.state.is_null() {
            return T::default();
        }
        match serde_json::from_value(self.state.clone()) {
            Ok(state) => state,
            Err(e) => {
                debug!(entry = %self.name, "state blob defaulted: {e}");
                T::default()
            }
        }
    }

    /// Replace the state blob with a typed value.
    pub fn set_state<T: Serialize>(&mut self, state: &T) {
        self.state = serde_json::to_value(state).unwrap_or(serde_json::Value::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_id_deterministic() {
        let a = FixedId::derive("container", "web-1");
        let b = FixedId::derive("container", "web-1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fixed_id_kind_matters() {
        assert_ne!(
            FixedId::derive("container", "web-1"),
            FixedId::derive("identity", "web-1")
        );
    }

    #[test]
    fn test_container_id_stable_across_rename() {
        let entry = ConnectionEntry::new(
            "my container",
            StoreDef::Container {
                container_name: "web-1".into(),
                identity: None,
            },
        );
        let mut renamed = entry.clone();
        renamed.name = "production web".into();
        assert_eq!(entry.id(), renamed.id());
    }

    #[test]
    fn test_local_id_follows_name() {
        let a = ConnectionEntry::new("machine a", StoreDef::Local);
        let b = ConnectionEntry::new("machine b", StoreDef::Local);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_capabilities() {
        let container = StoreDef::Container {
            container_name: "c".into(),
            identity: None,
        };
        assert!(container.capabilities().start);
        assert!(container.capabilities().pause);
        assert!(!StoreDef::Local.capabilities().start);
    }

    #[test]
    fn test_identity_not_connectable() {
        let identity = StoreDef::Identity {
            identity: LocalIdentity::default(),
        };
        assert!(!identity.is_connectable());
        assert!(StoreDef::Local.is_connectable());
    }

    #[test]
    fn test_decode_state_null_defaults() {
        #[derive(serde::Deserialize, Default, PartialEq, Debug)]
        #[serde(default)]
        struct Blob {
            running: bool,
        }

        let entry = ConnectionEntry::new("x", StoreDef::Local);
        assert_eq!(entry.decode_state::<Blob>(), Blob::default());
    }

    #[test]
    fn test_ssh_port_defaults_on_load() {
        let json = r#"{"name":"box","store":{"type":"ssh_host","host":"example.org"}}"#;
        let entry: ConnectionEntry = serde_json::from_str(json).unwrap();
        match entry.store {
            StoreDef::SshHost { port, .. } => assert_eq!(port, 22),
            _ => panic!("wrong store kind"),
        }
        assert_eq!(entry.condition, EntryCondition::Incomplete);
        assert!(!entry.protected);
    }

    #[test]
    fn test_entry_serde_roundtrip() {
        let mut entry = ConnectionEntry::new(
            "web",
            StoreDef::Container {
                container_name: "web-1".into(),
                identity: None,
            },
        );
        entry.parent = Some(FixedId::derive("local", "host"));
        let json = serde_json::to_string(&entry).unwrap();
        let back: ConnectionEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), entry.id());
        assert_eq!(back.parent, entry.parent);
    }
}
