//! Named addresses of long-running workers.
//!
//! The host builds one [`AddressRegistry`] at startup, after spawning the commit
//! serializer, and passes it by reference to whatever needs to find the
//! serializer (health checks, admin endpoints). It is never mutated afterwards
//! and holds addresses only: nothing reachable from the registry can stop a
//! worker.
//!
//! ```ignore
//! let handle = serializer.start().await?;
//!
//! let addresses = AddressRegistry::builder()
//!     .register_address(COMMIT_SERIALIZER, handle.address())?
//!     .build();
//!
//! let serializer = addresses.commit_serializer()?;
//! assert!(serializer.is_healthy());
//! ```

use crate::serializer::SerializerAddress;
use commitflow_core::error::{ProjectionError, Result};
use std::collections::HashMap;

/// Well-known name of the commit serializer.
pub const COMMIT_SERIALIZER: &str = "commit-serializer";

/// Write-once mapping from worker name to address.
#[derive(Clone, Debug, Default)]
pub struct AddressRegistry {
    addresses: HashMap<String, SerializerAddress>,
}

impl AddressRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> AddressRegistryBuilder {
        AddressRegistryBuilder::default()
    }

    /// Resolve a worker address by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if no address is registered
    /// under `name`.
    pub fn resolve_address(&self, name: &str) -> Result<SerializerAddress> {
        self.addresses.get(name).cloned().ok_or_else(|| {
            ProjectionError::Configuration(format!("no address registered under {name:?}"))
        })
    }

    /// Shortcut for resolving [`COMMIT_SERIALIZER`].
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if the serializer was never registered.
    pub fn commit_serializer(&self) -> Result<SerializerAddress> {
        self.resolve_address(COMMIT_SERIALIZER)
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.addresses.keys().map(String::as_str)
    }
}

/// Builder for [`AddressRegistry`].
#[derive(Debug, Default)]
pub struct AddressRegistryBuilder {
    addresses: HashMap<String, SerializerAddress>,
}

impl AddressRegistryBuilder {
    /// Register `address` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if `name` is already taken.
    pub fn register_address(
        mut self,
        name: impl Into<String>,
        address: SerializerAddress,
    ) -> Result<Self> {
        let name = name.into();
        if self.addresses.contains_key(&name) {
            return Err(ProjectionError::Configuration(format!(
                "address {name:?} is already registered"
            )));
        }

        tracing::debug!(name = %name, worker = %address.name(), "Registered worker address");
        self.addresses.insert(name, address);
        Ok(self)
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> AddressRegistry {
        AddressRegistry {
            addresses: self.addresses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{SerializerState, SerializerStatus};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn address(name: &str) -> (watch::Sender<SerializerStatus>, SerializerAddress) {
        let (tx, rx) = watch::channel(SerializerStatus {
            state: SerializerState::Idle,
            last_fetched: None,
            checkpoints: BTreeMap::new(),
            halt_reason: None,
        });
        (tx, SerializerAddress::new(Arc::from(name), rx))
    }

    #[test]
    fn resolves_registered_address() {
        let (_tx, serializer) = address("main");
        let registry = AddressRegistry::builder()
            .register_address(COMMIT_SERIALIZER, serializer)
            .unwrap()
            .build();

        let resolved = registry.commit_serializer().unwrap();
        assert_eq!(resolved.name(), "main");
        assert_eq!(resolved.state(), SerializerState::Idle);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_a, first) = address("first");
        let (_b, second) = address("second");

        let result = AddressRegistry::builder()
            .register_address(COMMIT_SERIALIZER, first)
            .unwrap()
            .register_address(COMMIT_SERIALIZER, second);

        assert!(matches!(result, Err(ProjectionError::Configuration(_))));
    }

    #[test]
    fn unknown_name_fails_to_resolve() {
        let registry = AddressRegistry::builder().build();
        assert!(matches!(
            registry.resolve_address("reporting"),
            Err(ProjectionError::Configuration(_))
        ));
    }

    #[test]
    fn resolved_address_observes_updates() {
        let (tx, serializer) = address("main");
        let registry = AddressRegistry::builder()
            .register_address(COMMIT_SERIALIZER, serializer)
            .unwrap()
            .build();

        tx.send_modify(|status| status.state = SerializerState::Halted);

        let resolved = registry.commit_serializer().unwrap();
        assert!(!resolved.is_healthy());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![COMMIT_SERIALIZER]);
    }
}
