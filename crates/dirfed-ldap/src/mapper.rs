//! One-way attribute synchronisation onto local users.

use dirfed_federation::LocalUser;

use crate::config::MappingConfig;
use crate::groups::UserDetails;

// ============================================================================
// Attribute Sync
// ============================================================================

/// Copies directory profile fields onto a local user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeSync {
    sync_name: bool,
    sync_email: bool,
}

impl AttributeSync {
    /// Creates a sync with the given switches.
    #[must_use]
    pub const fn new(sync_name: bool, sync_email: bool) -> Self {
        Self {
            sync_name,
            sync_email,
        }
    }

    /// Copies the enabled fields from `details` onto `user`.
    ///
    /// Empty directory values never overwrite local ones. Returns whether
    /// anything changed.
    pub fn do_sync(&self, user: &mut LocalUser, details: &UserDetails) -> bool {
        let mut changed = false;

        if self.sync_name {
            changed |= copy_non_empty(&mut user.name, details.full_name.as_deref());
        }
        if self.sync_email {
            changed |= copy_non_empty(&mut user.email, details.email.as_deref());
        }

        if changed {
            tracing::debug!(username = %user.username, "Synchronised profile from directory");
        }
        changed
    }
}

impl From<&MappingConfig> for AttributeSync {
    fn from(config: &MappingConfig) -> Self {
        Self::new(config.sync_name, config.sync_email)
    }
}

fn copy_non_empty(target: &mut String, value: Option<&str>) -> bool {
    match value {
        Some(value) if !value.is_empty() && target.as_str() != value => {
            *target = value.to_string();
            true
        }
        _ => false,
    }
}
