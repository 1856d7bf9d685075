//! Identity resolution.
//!
//! An identity is either an inline credential bundle or a reference to a
//! shared identity entry stored elsewhere. References dereference through
//! the [`IdentityDirectory`] capability and must point at an
//! identity-bearing entry; anything else is a type mismatch.
//!
//! Completeness checks are independently toggleable per aspect (user /
//! password / SSH key) so stores can demand exactly what their login or
//! elevation path needs.

mod secret;

pub use secret::{SecretProvider, SecretStrategy, SecretValue, SshIdentityStrategy};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::store::FixedId;

/// An inline credential bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalIdentity {
    pub username: Option<String>,
    pub password: Option<SecretStrategy>,
    pub ssh_identity: Option<SshIdentityStrategy>,
}

impl LocalIdentity {
    /// Identity with a username and no secrets.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            username: Some(name.into()),
            ..Default::default()
        }
    }

    /// Identity with a username and a password strategy.
    pub fn with_password(name: impl Into<String>, password: SecretStrategy) -> Self {
        Self {
            username: Some(name.into()),
            password: Some(password),
            ssh_identity: None,
        }
    }
}

/// Capability for dereferencing shared identity entries.
///
/// Provided by the storage layer; the connection store implements it by
/// looking the entry up in its arena and checking the entry kind.
pub trait IdentityDirectory {
    /// Return the identity stored under `id`.
    ///
    /// Fails with [`ValidationError::TypeMismatch`] when the entry exists
    /// but is not identity-capable, and
    /// [`ValidationError::DanglingReference`] when it does not exist.
    fn lookup_identity(&self, id: FixedId) -> Result<LocalIdentity, ValidationError>;
}

/// A logical identity: inline, or a pointer to a shared entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityValue {
    InPlace { identity: LocalIdentity },
    Ref { id: FixedId },
}

impl IdentityValue {
    pub fn in_place(identity: LocalIdentity) -> Self {
        IdentityValue::InPlace { identity }
    }

    pub fn reference(id: FixedId) -> Self {
        IdentityValue::Ref { id }
    }

    /// Dereference to the concrete identity bundle.
    pub fn unwrap(&self, directory: &dyn IdentityDirectory) -> Result<LocalIdentity, ValidationError> {
        match self {
            IdentityValue::InPlace { identity } => Ok(identity.clone()),
            IdentityValue::Ref { id } => directory.lookup_identity(*id),
        }
    }

    /// Validate the identity for use, checking only the requested aspects.
    ///
    /// A reference identity always validates its target's kind, so a ref
    /// at a non-identity entry fails with `TypeMismatch` even when no
    /// aspect is requested.
    pub fn check_complete(
        &self,
        directory: &dyn IdentityDirectory,
        want_user: bool,
        want_password: bool,
        want_ssh_identity: bool,
    ) -> Result<(), ValidationError> {
        let identity = self.unwrap(directory)?;

        if want_user && identity.username.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::MissingValue("identity username"));
        }

        if want_password {
            match &identity.password {
                Some(strategy) if strategy.expects_value() => strategy.check_complete()?,
                _ => return Err(ValidationError::MissingValue("identity password")),
            }
        }

        if want_ssh_identity {
            match &identity.ssh_identity {
                Some(strategy) if strategy.expects_value() => strategy.check_complete()?,
                _ => return Err(ValidationError::MissingValue("identity ssh key")),
            }
        }

        Ok(())
    }

    /// Resolve into username plus lazy secret providers.
    pub fn resolve(
        &self,
        directory: &dyn IdentityDirectory,
    ) -> Result<ResolvedIdentity, ValidationError> {
        let identity = self.unwrap(directory)?;
        Ok(ResolvedIdentity { identity })
    }
}

/// A dereferenced identity handing out lazy providers.
///
/// Secrets stay untouched until a session asks the provider, preserving
/// the "never read unless needed" contract.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    identity: LocalIdentity,
}

impl ResolvedIdentity {
    pub fn username(&self) -> Option<&str> {
        self.identity.username.as_deref()
    }

    pub fn password_provider(&self) -> Option<SecretProvider> {
        self.identity.password.as_ref().and_then(|s| s.provider())
    }

    pub fn ssh_identity(&self) -> Option<&SshIdentityStrategy> {
        self.identity
            .ssh_identity
            .as_ref()
            .filter(|s| s.expects_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapDirectory {
        identities: HashMap<FixedId, LocalIdentity>,
        wrong_kind: Vec<FixedId>,
    }

    impl IdentityDirectory for MapDirectory {
        fn lookup_identity(&self, id: FixedId) -> Result<LocalIdentity, ValidationError> {
            if self.wrong_kind.contains(&id) {
                return Err(ValidationError::TypeMismatch {
                    expected: "identity",
                    actual: "container".into(),
                });
            }
            self.identities
                .get(&id)
                .cloned()
                .ok_or_else(|| ValidationError::DanglingReference(id.to_string()))
        }
    }

    fn empty_directory() -> MapDirectory {
        MapDirectory {
            identities: HashMap::new(),
            wrong_kind: Vec::new(),
        }
    }

    #[test]
    fn test_in_place_unwrap() {
        let value = IdentityValue::in_place(LocalIdentity::user("root"));
        let identity = value.unwrap(&empty_directory()).unwrap();
        assert_eq!(identity.username.as_deref(), Some("root"));
    }

    #[test]
    fn test_ref_unwrap() {
        let id = FixedId::derive("identity", "shared-admin");
        let mut directory = empty_directory();
        directory
            .identities
            .insert(id, LocalIdentity::user("admin"));

        let value = IdentityValue::reference(id);
        let identity = value.unwrap(&directory).unwrap();
        assert_eq!(identity.username.as_deref(), Some("admin"));
    }

    #[test]
    fn test_ref_wrong_kind_is_type_mismatch() {
        let id = FixedId::derive("container", "web-1");
        let mut directory = empty_directory();
        directory.wrong_kind.push(id);

        let value = IdentityValue::reference(id);
        let err = value
            .check_complete(&directory, false, false, false)
            .unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));
    }

    #[test]
    fn test_ref_dangling() {
        let value = IdentityValue::reference(FixedId::derive("identity", "gone"));
        let err = value.unwrap(&empty_directory()).unwrap_err();
        assert!(matches!(err, ValidationError::DanglingReference(_)));
    }

    #[test]
    fn test_check_complete_aspects() {
        let value = IdentityValue::in_place(LocalIdentity::user("deploy"));
        let directory = empty_directory();

        assert!(value.check_complete(&directory, true, false, false).is_ok());
        assert!(value.check_complete(&directory, true, true, false).is_err());
        assert!(value.check_complete(&directory, false, false, true).is_err());
    }

    #[test]
    fn test_check_complete_password_none_strategy() {
        // An explicit None strategy does not satisfy a password requirement
        let identity = LocalIdentity {
            username: Some("deploy".into()),
            password: Some(SecretStrategy::None),
            ssh_identity: None,
        };
        let value = IdentityValue::in_place(identity);
        assert!(value
            .check_complete(&empty_directory(), true, true, false)
            .is_err());
    }

    #[test]
    fn test_resolve_lazy_providers() {
        let identity = LocalIdentity::with_password(
            "deploy",
            SecretStrategy::InPlace {
                value: "hunter2".into(),
            },
        );
        let value = IdentityValue::in_place(identity);

        let resolved = value.resolve(&empty_directory()).unwrap();
        assert_eq!(resolved.username(), Some("deploy"));

        // The provider exists but nothing has been read yet
        let provider = resolved.password_provider().unwrap();
        assert_eq!(provider.retrieve().unwrap().expose(), "hunter2");
    }

    #[test]
    fn test_identity_serde_roundtrip() {
        let value = IdentityValue::in_place(LocalIdentity::user("root"));
        let json = serde_json::to_string(&value).unwrap();
        let back: IdentityValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }
}
