//! Identity store and role catalog interfaces.
//!
//! The login flow only needs to load, create and persist a local record
//! and to enumerate valid role ids. Hosts plug their own persistence in
//! behind these traits; the in-memory implementations back tests and
//! single-process deployments.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{FederationError, FederationResult};
use crate::model::{LocalUser, Role, RoleId};

/// Storage for local user records.
///
/// Implementations must be thread-safe: concurrent logins share the store.
pub trait IdentityStore: Send + Sync {
    /// Gets a user by username.
    fn find_by_username(&self, username: &str) -> FederationResult<Option<LocalUser>>;

    /// Creates a new user.
    ///
    /// ## Errors
    ///
    /// Returns `FederationError::Storage` if the username is already taken.
    fn create(&self, user: &LocalUser) -> FederationResult<()>;

    /// Persists changes to an existing user.
    ///
    /// ## Errors
    ///
    /// Returns `FederationError::Storage` if the user does not exist.
    fn persist(&self, user: &LocalUser) -> FederationResult<()>;
}

/// Source of the valid local roles.
pub trait RoleCatalog: Send + Sync {
    /// Lists every known role, ordered by id.
    fn list_roles(&self) -> FederationResult<Vec<Role>>;

    /// Checks whether `id` names a known role.
    fn contains(&self, id: RoleId) -> FederationResult<bool> {
        Ok(self.list_roles()?.iter().any(|r| r.id == id))
    }
}

/// In-memory identity store keyed by lower-cased username.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    users: Mutex<HashMap<String, LocalUser>>,
}

impl InMemoryIdentityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Checks whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LocalUser>> {
        self.users.lock()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn find_by_username(&self, username: &str) -> FederationResult<Option<LocalUser>> {
        Ok(self.lock().get(&username.to_lowercase()).cloned())
    }

    fn create(&self, user: &LocalUser) -> FederationResult<()> {
        let key = user.username.to_lowercase();
        let mut users = self.lock();
        if users.contains_key(&key) {
            return Err(FederationError::storage(format!(
                "user '{}' already exists",
                user.username
            )));
        }
        users.insert(key, user.clone());
        Ok(())
    }

    fn persist(&self, user: &LocalUser) -> FederationResult<()> {
        let key = user.username.to_lowercase();
        let mut users = self.lock();
        match users.get_mut(&key) {
            Some(existing) if existing.id == user.id => {
                *existing = user.clone();
                Ok(())
            }
            _ => Err(FederationError::storage(format!(
                "user '{}' does not exist",
                user.username
            ))),
        }
    }
}

/// Fixed role catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleCatalog {
    roles: Vec<Role>,
}

impl StaticRoleCatalog {
    /// Creates a catalog from a list of roles.
    #[must_use]
    pub fn new(mut roles: Vec<Role>) -> Self {
        roles.sort_by_key(|r| r.id);
        roles.dedup_by_key(|r| r.id);
        Self { roles }
    }
}

impl RoleCatalog for StaticRoleCatalog {
    fn list_roles(&self) -> FederationResult<Vec<Role>> {
        Ok(self.roles.clone())
    }
}
