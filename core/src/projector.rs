//! Projectors and projector identity.
//!
//! # Identity
//!
//! Every projector type declares a globally unique numeric [`ProjectorId`]. The id
//! keys its checkpoint record, so it must be chosen by the projector's author and
//! never inferred: renaming or moving a type must not lose its progress.
//!
//! Identities are declared explicitly in an [`IdentityTable`], a mapping from
//! projector type to `(id, name)` built once by the host application:
//!
//! ```
//! use commitflow_core::projector::{IdentityTable, ProjectorId, ProjectorType};
//!
//! struct AccountBalances;
//! struct AuditTrail;
//!
//! let identities = IdentityTable::new()
//!     .declare::<AccountBalances>(ProjectorId::new(1))
//!     .declare_named::<AuditTrail>(ProjectorId::new(2), "audit-trail");
//!
//! let identity = identities
//!     .resolve_identity(&ProjectorType::of::<AccountBalances>())
//!     .unwrap();
//! assert_eq!(identity.id, ProjectorId::new(1));
//! assert_eq!(identity.name, "AccountBalances");
//! ```
//!
//! A type missing from the table fails resolution with
//! [`ProjectionError::Configuration`] rather than receiving a default id.

use crate::checkpoint::MAX_PROJECTOR_NAME_LEN;
use crate::commit::Commit;
use crate::error::{ProjectionError, Result};
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Globally unique, author-declared projector id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectorId(i32);

impl ProjectorId {
    /// Create a projector id.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Raw id value (the checkpoint table's primary key).
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProjectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared identity of a projector: `(projector_id, projector_name)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectorIdentity {
    /// Checkpoint key
    pub id: ProjectorId,
    /// Display name stored alongside the checkpoint
    pub name: String,
}

impl ProjectorIdentity {
    /// Create an identity.
    #[must_use]
    pub fn new(id: ProjectorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for ProjectorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Descriptor of a projector type, used for identity resolution and instantiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProjectorType {
    type_id: TypeId,
    type_name: &'static str,
}

impl ProjectorType {
    /// Descriptor for the type `P`.
    #[must_use]
    pub fn of<P: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
        }
    }

    /// Runtime type id.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name with module paths stripped, e.g. `Recording<Audit>`.
    #[must_use]
    pub fn short_name(&self) -> String {
        short_type_name(self.type_name)
    }
}

impl fmt::Display for ProjectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

fn short_type_name(full: &str) -> String {
    fn last_segment(path: &str) -> &str {
        path.rsplit("::").next().unwrap_or(path)
    }

    let mut short = String::with_capacity(full.len());
    let mut start = 0;
    for (index, c) in full.char_indices() {
        if matches!(c, '<' | '>' | ',' | ' ' | '&' | '(' | ')' | '[' | ']' | ';') {
            short.push_str(last_segment(&full[start..index]));
            short.push(c);
            start = index + c.len_utf8();
        }
    }
    short.push_str(last_segment(&full[start..]));
    short
}

/// Explicit mapping from projector type to declared identity.
#[derive(Clone, Debug, Default)]
pub struct IdentityTable {
    declared: HashMap<TypeId, ProjectorIdentity>,
}

impl IdentityTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `P`'s id; its name defaults to the short type name.
    #[must_use]
    pub fn declare<P: 'static>(self, id: ProjectorId) -> Self {
        let name = ProjectorType::of::<P>().short_name();
        self.declare_named::<P>(id, name)
    }

    /// Declare `P`'s id and display name.
    ///
    /// Re-declaring a type replaces its previous entry.
    #[must_use]
    pub fn declare_named<P: 'static>(mut self, id: ProjectorId, name: impl Into<String>) -> Self {
        self.declared
            .insert(TypeId::of::<P>(), ProjectorIdentity::new(id, name));
        self
    }

    /// Resolve the identity declared for a projector type.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if the type has no declaration or
    /// its name does not fit the checkpoint table.
    pub fn resolve_identity(&self, projector_type: &ProjectorType) -> Result<ProjectorIdentity> {
        let identity = self.declared.get(&projector_type.type_id()).ok_or_else(|| {
            ProjectionError::Configuration(format!(
                "projector type {projector_type} has no declared projector id"
            ))
        })?;

        let name_len = identity.name.chars().count();
        if name_len == 0 || name_len > MAX_PROJECTOR_NAME_LEN {
            return Err(ProjectionError::Configuration(format!(
                "projector type {projector_type} declares a name of {name_len} characters \
                 (allowed 1..={MAX_PROJECTOR_NAME_LEN})"
            )));
        }

        Ok(identity.clone())
    }

    /// Number of declared types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    /// Whether no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

/// Where a projector's checkpoint for an applied commit gets recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointScope {
    /// The serializer writes the checkpoint on its own connection after `apply`
    /// returns. No atomicity with the projector's business writes.
    Standalone,
    /// The projector already upserted the checkpoint inside the same transaction
    /// as its business writes; the serializer only advances its in-memory position.
    Transaction,
}

/// A consumer that applies commits to derived state.
///
/// # Delivery Guarantees
///
/// - Commits arrive in strictly increasing checkpoint order, one at a time.
/// - A commit at or below the projector's persisted checkpoint is never delivered.
/// - After a crash, the last commit applied but not yet checkpointed is delivered
///   again. Implementations must tolerate re-delivery.
///
/// # Example
///
/// ```ignore
/// struct AccountBalances { pool: PgPool }
///
/// impl Projector for AccountBalances {
///     fn apply<'a>(
///         &'a self,
///         identity: &'a ProjectorIdentity,
///         commit: &'a Commit,
///     ) -> Pin<Box<dyn Future<Output = Result<CheckpointScope>> + Send + 'a>> {
///         Box::pin(async move {
///             let mut tx = self.pool.begin().await?;
///             // ... business writes ...
///             upsert_checkpoint(&mut *tx, &CheckpointRecord::new(identity, Some(commit.checkpoint))).await?;
///             tx.commit().await?;
///             Ok(CheckpointScope::Transaction)
///         })
///     }
/// }
/// ```
///
/// # Dyn Compatibility
///
/// `apply` returns `Pin<Box<dyn Future>>` so registries can hold `Arc<dyn Projector>`.
pub trait Projector: Send + Sync {
    /// Whether this projector wants to see the commit.
    ///
    /// Uninterested projectors still advance their in-memory position past the commit.
    fn is_interested(&self, _commit: &Commit) -> bool {
        true
    }

    /// Apply one commit.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the business mutation (or an in-transaction
    /// checkpoint write) fails. The commit will be re-delivered after restart.
    fn apply<'a>(
        &'a self,
        identity: &'a ProjectorIdentity,
        commit: &'a Commit,
    ) -> Pin<Box<dyn Future<Output = Result<CheckpointScope>> + Send + 'a>>;
}

/// External instantiation mechanism: given a projector type, obtain one live instance.
pub trait ProjectorFactory: Send + Sync {
    /// Create an instance of the described projector type.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if the factory cannot build the type.
    fn create(&self, projector_type: &ProjectorType) -> Result<Arc<dyn Projector>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AccountBalances;
    struct AuditTrail;
    struct Undeclared;
    struct Wrapper<T>(std::marker::PhantomData<T>);

    #[test]
    fn resolves_declared_identity_with_default_name() {
        let table = IdentityTable::new().declare::<AccountBalances>(ProjectorId::new(1));

        let identity =
            tokio_test::assert_ok!(table.resolve_identity(&ProjectorType::of::<AccountBalances>()));
        assert_eq!(identity, ProjectorIdentity::new(ProjectorId::new(1), "AccountBalances"));
    }

    #[test]
    fn resolves_declared_identity_with_explicit_name() {
        let table =
            IdentityTable::new().declare_named::<AuditTrail>(ProjectorId::new(9), "audit-trail");

        let identity =
            tokio_test::assert_ok!(table.resolve_identity(&ProjectorType::of::<AuditTrail>()));
        assert_eq!(identity.id, ProjectorId::new(9));
        assert_eq!(identity.name, "audit-trail");
    }

    #[test]
    fn undeclared_type_is_a_configuration_error() {
        let table = IdentityTable::new().declare::<AccountBalances>(ProjectorId::new(1));

        let err =
            tokio_test::assert_err!(table.resolve_identity(&ProjectorType::of::<Undeclared>()));
        match err {
            ProjectionError::Configuration(message) => assert!(message.contains("Undeclared")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_name_is_a_configuration_error() {
        let table = IdentityTable::new().declare_named::<AuditTrail>(
            ProjectorId::new(2),
            "x".repeat(MAX_PROJECTOR_NAME_LEN + 1),
        );

        assert!(matches!(
            table.resolve_identity(&ProjectorType::of::<AuditTrail>()),
            Err(ProjectionError::Configuration(_))
        ));
    }

    #[test]
    fn short_name_strips_module_paths_inside_generics() {
        let projector_type = ProjectorType::of::<Wrapper<AuditTrail>>();

        assert!(projector_type.type_name().contains("::"));
        assert_eq!(projector_type.short_name(), "Wrapper<AuditTrail>");
    }
}
