//! Login provider capabilities.
//!
//! A federation provider is asked two things by the host: whether a
//! username/password pair is valid, and what to do once a user has been
//! authenticated (by password or SSO). Both are synchronous; each call
//! opens and closes whatever external connection it needs.

use crate::error::FederationResult;
use crate::model::LocalUser;
use crate::sso::{AuthenticationResponse, LoginOptions};

/// Checks credentials against an external system.
pub trait CredentialValidator: Send + Sync {
    /// Provider name (for logging and auth responses).
    fn provider_name(&self) -> &str;

    /// Validates a password.
    ///
    /// Returns `Ok(false)` when the external system rejected the
    /// credentials and an error when the check itself could not be done.
    fn validate_password(&self, username: &str, password: &str) -> FederationResult<bool>;
}

/// Runs after a user has been authenticated.
pub trait LoginHandler: Send + Sync {
    /// Loads or creates the local record for `response.username`, applies
    /// directory-derived changes and persists the result.
    fn on_user_login(
        &self,
        response: &AuthenticationResponse,
        options: &LoginOptions,
    ) -> FederationResult<LocalUser>;
}
