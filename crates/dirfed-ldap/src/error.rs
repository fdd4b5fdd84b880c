//! Directory errors.
//!
//! Messages never carry passwords or bind credentials. DNs and
//! filters may appear; they end up in the operational log and are only
//! shown to users in verbose mode.

use dirfed_federation::FederationError;
use thiserror::Error;

/// Failure while talking to the directory or interpreting its settings.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Missing or invalid configuration (host, base DN, query template...).
    #[error("Directory settings invalid: {0}")]
    Configuration(String),

    /// The transport handle could not be created.
    #[error("Cannot open directory connection: {0}")]
    Connection(String),

    /// Protocol version or referral policy was rejected.
    #[error("Directory rejected session option: {0}")]
    Protocol(String),

    /// StartTLS negotiation failed.
    #[error("StartTLS negotiation failed: {0}")]
    Tls(String),

    /// Bind failed.
    ///
    /// Bad credentials and an unreachable server are indistinguishable here.
    #[error("Bind rejected: {0}")]
    Bind(String),

    /// Malformed filter or DN syntax.
    #[error("LDAP validation error: {0}")]
    Validation(String),

    /// Search or read failed.
    #[error("Directory search failed: {0}")]
    Search(String),

    /// No candidate DN could be produced for the user.
    #[error("No directory entry for user {0}")]
    UserNotFound(String),

    /// Credential verification failed against every candidate DN.
    #[error("Failed to bind any user DN for '{0}'")]
    UserDnFail(String),

    /// The user entry could not be read after DN resolution.
    #[error("Unable to read user attributes: {0}")]
    UserAttribute(String),

    /// Group mapping is enabled but no usable rule was configured.
    #[error("Group mapping configuration error: {0}")]
    MappingConfig(String),

    /// A compare or write operation failed.
    #[error("LDAP operation failed: {0}")]
    Operation(String),
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a TLS error.
    #[must_use]
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Creates a bind error.
    #[must_use]
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Bind(msg.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a search error.
    #[must_use]
    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    /// Creates a missing-user error.
    #[must_use]
    pub fn user_not_found(username: impl Into<String>) -> Self {
        Self::UserNotFound(username.into())
    }

    /// Creates an operation error.
    #[must_use]
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Whether the session could not be set up at all.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Tls(_) | Self::Protocol(_))
    }

    /// Whether bad credentials may be the cause.
    #[must_use]
    pub const fn is_credential_error(&self) -> bool {
        matches!(self, Self::Bind(_) | Self::UserDnFail(_))
    }
}

/// Shorthand result for directory operations.
pub type LdapResult<T> = Result<T, LdapError>;

impl From<LdapError> for FederationError {
    fn from(err: LdapError) -> Self {
        match err {
            LdapError::Configuration(msg) => FederationError::Configuration(msg),
            LdapError::Connection(msg) | LdapError::Protocol(msg) | LdapError::Tls(msg) => {
                FederationError::Unavailable(msg)
            }
            LdapError::Bind(msg) => FederationError::AuthenticationFailed(msg),
            LdapError::UserDnFail(_) => FederationError::AuthenticationFailed(err.to_string()),
            LdapError::Validation(msg) | LdapError::Search(msg) => {
                FederationError::UserLookup(msg)
            }
            LdapError::UserNotFound(username) => FederationError::UserNotFound(username),
            LdapError::UserAttribute(msg) => FederationError::AttributeMapping(msg),
            LdapError::MappingConfig(msg) => FederationError::RoleMapping(msg),
            LdapError::Operation(msg) => FederationError::Operation(msg),
        }
    }
}
