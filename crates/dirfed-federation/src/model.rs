//! Local identity model.
//!
//! A [`LocalUser`] is the application's own record of a federated identity:
//! the directory resolves who someone is, the local record holds the
//! profile fields and role ids the application authorizes against.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric identifier of a local authorization role.
pub type RoleId = u32;

/// A local authorization role as listed by the role catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role id.
    pub id: RoleId,
    /// Human readable title.
    pub title: String,
}

impl Role {
    /// Creates a new role.
    #[must_use]
    pub fn new(id: RoleId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

/// A local user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Unique identifier.
    pub id: Uuid,
    /// Login name, unique in the identity store.
    pub username: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Roles currently held.
    pub roles: BTreeSet<RoleId>,
}

impl LocalUser {
    /// Creates a new user with the given username and no roles.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            name: String::new(),
            email: String::new(),
            roles: BTreeSet::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.insert(role);
        self
    }

    /// Checks whether the user holds `role`.
    #[must_use]
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}
