//! Federation error types.
//!
//! Errors carry the full diagnostic for the operational log.
//! [`FederationError::user_message`] decides what the person at the
//! login form gets to see: a generic denial unless verbose mode is on.

use std::net::IpAddr;

use thiserror::Error;

/// Message shown to users when a login is denied and verbose mode is off.
pub const GENERIC_DENIAL: &str = "Login denied: unable to sign in with the supplied details";

/// Provider-neutral login failure.
#[derive(Debug, Error)]
pub enum FederationError {
    /// A setting is missing or invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The directory could not be reached or refused the session setup
    /// (connection, protocol options, TLS).
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    /// The supplied credentials were not accepted.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No directory entry matches the username.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The user search itself failed.
    #[error("User lookup failed: {0}")]
    UserLookup(String),

    /// The user's entry was found but its attributes could not be read.
    #[error("Unable to read user profile: {0}")]
    AttributeMapping(String),

    /// Group mapping is enabled but has no usable rule.
    #[error("Role mapping unavailable: {0}")]
    RoleMapping(String),

    /// A named implementation was requested but never registered.
    #[error("No implementation registered under '{0}'")]
    NotRegistered(String),

    /// The local identity store rejected an operation.
    #[error("Identity store error: {0}")]
    Storage(String),

    /// Auto-registration is disabled and the user has no local account.
    #[error("No local account for '{0}' and auto-registration is disabled")]
    RegistrationDisabled(String),

    /// A directory write or compare failed.
    #[error("Directory operation failed: {0}")]
    Operation(String),
}

impl FederationError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an unavailable-directory error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// Creates a user-not-found error.
    #[must_use]
    pub fn user_not_found(username: impl Into<String>) -> Self {
        Self::UserNotFound(username.into())
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether the credentials were rejected.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// Whether the directory could not be used at all.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Whether no directory entry matched.
    #[must_use]
    pub const fn is_user_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_))
    }

    /// Returns the message to show the person logging in.
    ///
    /// Outside of verbose mode every failure collapses to
    /// [`GENERIC_DENIAL`], keeping directory layout and configuration
    /// details off the login form.
    #[must_use]
    pub fn user_message(&self, verbose: bool) -> String {
        if verbose {
            self.to_string()
        } else {
            GENERIC_DENIAL.to_string()
        }
    }
}

/// Result type for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;

/// Who was logging in, and through which provider, when a login failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFailure {
    provider: String,
    username: Option<String>,
    remote_addr: Option<IpAddr>,
}

impl LoginFailure {
    /// Starts a report for `provider`.
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            username: None,
            remote_addr: None,
        }
    }

    /// Records the username being logged in.
    #[must_use]
    pub fn for_user(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Records the client address.
    #[must_use]
    pub const fn from_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Logs the full diagnostic for `err` and returns the message that may
    /// be shown to the user.
    pub fn report(&self, err: &FederationError, verbose: bool) -> String {
        let remote = self.remote_addr.map(|a| a.to_string());
        tracing::error!(
            provider = %self.provider,
            username = self.username.as_deref().unwrap_or("-"),
            remote = remote.as_deref().unwrap_or("-"),
            error = %err,
            "Login failed"
        );
        err.user_message(verbose)
    }
}
