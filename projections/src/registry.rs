//! Projector Registry: `projector_id -> live projector instance`.
//!
//! The host application enumerates its projector types once at startup and hands
//! them to a [`ProjectorRegistryBuilder`]. For every type the builder resolves the
//! declared identity, rejects duplicate ids, and asks the [`ProjectorFactory`] for
//! exactly one instance. The finished [`ProjectorRegistry`] is immutable and lives
//! for the rest of the process.
//!
//! # Example
//!
//! ```ignore
//! let identities = IdentityTable::new()
//!     .declare::<AccountBalances>(ProjectorId::new(1))
//!     .declare::<AuditTrail>(ProjectorId::new(2));
//!
//! let factory = FactoryTable::new()
//!     .provide(move || AccountBalances::new(pool.clone()))
//!     .provide(|| AuditTrail::default());
//!
//! let registry = ProjectorRegistry::builder(identities, Arc::new(factory))
//!     .register_all([
//!         ProjectorType::of::<AccountBalances>(),
//!         ProjectorType::of::<AuditTrail>(),
//!     ])?
//!     .build()?;
//!
//! let balances = registry.lookup(ProjectorId::new(1))?;
//! ```

use commitflow_core::error::{ProjectionError, Result};
use commitflow_core::projector::{
    IdentityTable, Projector, ProjectorFactory, ProjectorId, ProjectorIdentity, ProjectorType,
};
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Constructor = Box<dyn Fn() -> Arc<dyn Projector> + Send + Sync>;

/// Instantiation table mapping projector types to constructor closures.
///
/// The simplest [`ProjectorFactory`]: each type is provided once with a closure
/// that captures whatever the projector needs (pools, clients, configuration).
#[derive(Default)]
pub struct FactoryTable {
    constructors: HashMap<TypeId, Constructor>,
}

impl FactoryTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the constructor for projector type `P`.
    #[must_use]
    pub fn provide<P, F>(mut self, constructor: F) -> Self
    where
        P: Projector + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.constructors.insert(
            TypeId::of::<P>(),
            Box::new(move || Arc::new(constructor()) as Arc<dyn Projector>),
        );
        self
    }
}

impl std::fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryTable")
            .field("constructors", &self.constructors.len())
            .finish()
    }
}

impl ProjectorFactory for FactoryTable {
    fn create(&self, projector_type: &ProjectorType) -> Result<Arc<dyn Projector>> {
        self.constructors
            .get(&projector_type.type_id())
            .map(|constructor| constructor())
            .ok_or_else(|| {
                ProjectionError::Configuration(format!(
                    "no constructor provided for projector type {projector_type}"
                ))
            })
    }
}

/// A projector instance together with its resolved identity.
#[derive(Clone)]
pub struct RegisteredProjector {
    /// Declared identity
    pub identity: ProjectorIdentity,
    /// Type the instance was created from
    pub projector_type: ProjectorType,
    /// The single live instance
    pub instance: Arc<dyn Projector>,
}

impl std::fmt::Debug for RegisteredProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProjector")
            .field("identity", &self.identity)
            .field("projector_type", &self.projector_type)
            .finish_non_exhaustive()
    }
}

/// Immutable mapping from projector id to live instance, ordered by id.
#[derive(Clone, Debug)]
pub struct ProjectorRegistry {
    projectors: BTreeMap<ProjectorId, RegisteredProjector>,
}

impl ProjectorRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder(
        identities: IdentityTable,
        factory: Arc<dyn ProjectorFactory>,
    ) -> ProjectorRegistryBuilder {
        ProjectorRegistryBuilder {
            identities,
            factory,
            projectors: BTreeMap::new(),
        }
    }

    /// Look up the instance registered under `projector_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::NotFound`] if nothing is registered under the id.
    pub fn lookup(&self, projector_id: ProjectorId) -> Result<Arc<dyn Projector>> {
        self.get(projector_id)
            .map(|registered| Arc::clone(&registered.instance))
            .ok_or(ProjectionError::NotFound(projector_id))
    }

    /// Registration entry for `projector_id`, if any.
    #[must_use]
    pub fn get(&self, projector_id: ProjectorId) -> Option<&RegisteredProjector> {
        self.projectors.get(&projector_id)
    }

    /// Registered projectors in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProjector> {
        self.projectors.values()
    }

    /// Number of registered projectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    /// Whether no projectors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }
}

/// Builder validating and instantiating projector types.
pub struct ProjectorRegistryBuilder {
    identities: IdentityTable,
    factory: Arc<dyn ProjectorFactory>,
    projectors: BTreeMap<ProjectorId, RegisteredProjector>,
}

impl ProjectorRegistryBuilder {
    /// Resolve, validate and instantiate one projector type.
    ///
    /// The id is checked for collisions before the factory is called, so a rejected
    /// type is never instantiated.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if the type has no declared
    /// identity, its id is already registered, or the factory cannot create it.
    pub fn register(&mut self, projector_type: ProjectorType) -> Result<ProjectorIdentity> {
        let identity = self.identities.resolve_identity(&projector_type)?;

        if let Some(existing) = self.projectors.get(&identity.id) {
            return Err(ProjectionError::Configuration(format!(
                "projector id {} declared by both {} and {projector_type}",
                identity.id, existing.projector_type
            )));
        }

        let instance = self.factory.create(&projector_type)?;
        tracing::info!(
            projector_id = %identity.id,
            projector_name = %identity.name,
            projector_type = %projector_type,
            "Registered projector"
        );

        self.projectors.insert(
            identity.id,
            RegisteredProjector {
                identity: identity.clone(),
                projector_type,
                instance,
            },
        );
        Ok(identity)
    }

    /// Register every type of an enumerated candidate set.
    ///
    /// # Errors
    ///
    /// Stops at the first type [`register`](Self::register) rejects.
    pub fn register_all(
        mut self,
        projector_types: impl IntoIterator<Item = ProjectorType>,
    ) -> Result<Self> {
        for projector_type in projector_types {
            self.register(projector_type)?;
        }
        Ok(self)
    }

    /// Finish building.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if no projector was registered.
    pub fn build(self) -> Result<ProjectorRegistry> {
        if self.projectors.is_empty() {
            return Err(ProjectionError::Configuration(
                "no projectors registered".to_string(),
            ));
        }
        Ok(ProjectorRegistry {
            projectors: self.projectors,
        })
    }
}
