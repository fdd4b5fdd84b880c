//! Directory transport abstraction.
//!
//! A [`DirectoryTransport`] is the raw protocol surface the
//! [`DirectoryClient`](crate::client::DirectoryClient) drives. It reports
//! failures as an opaque [`TransportError`] message; giving those failures
//! a meaning (bind failure, TLS failure...) is the client's job.
//!
//! Search results are delivered one entry at a time to a visitor, so a
//! transport never has to hold or cap a complete result set.

use std::fmt;

use thiserror::Error;

/// Opaque failure reported by a transport (the server's last error text).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Only the entry named by the base DN.
    Base,
    /// The base entry and everything below it.
    #[default]
    Subtree,
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => f.write_str("base"),
            Self::Subtree => f.write_str("subtree"),
        }
    }
}

/// One search or read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    /// Base DN.
    pub base: String,
    /// Filter string.
    pub filter: String,
    /// Attributes to return; empty means all.
    pub attrs: Vec<String>,
    /// Scope.
    pub scope: SearchScope,
}

/// An attribute as delivered by the protocol, with its value count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Attribute name as returned by the server.
    pub name: String,
    /// Value count reported by the protocol.
    pub count: usize,
    /// Values.
    pub values: Vec<String>,
}

impl RawAttribute {
    /// Creates an attribute, taking the count from the values.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            count: values.len(),
            values,
        }
    }
}

/// A directory entry as delivered by the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Entry DN.
    pub dn: String,
    /// Attributes in server order.
    pub attributes: Vec<RawAttribute>,
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    /// Add values.
    Add,
    /// Delete values (all of them when no values are given).
    Delete,
    /// Replace all values.
    Replace,
}

/// One attribute modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Operation.
    pub op: ModifyOp,
    /// Attribute name.
    pub attribute: String,
    /// Values.
    pub values: Vec<String>,
}

impl Modification {
    /// Creates a modification.
    #[must_use]
    pub fn new<S: AsRef<str>>(op: ModifyOp, attribute: &str, values: &[S]) -> Self {
        Self {
            op,
            attribute: attribute.to_string(),
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        }
    }
}

/// Raw directory protocol surface.
///
/// Operations block the calling thread until complete.
pub trait DirectoryTransport {
    /// Prepares a connection to `hosts` (space-separated hosts or URLs).
    ///
    /// Transports may defer real connectivity until the first operation.
    fn connect(&mut self, hosts: &str, port: u16) -> TransportResult<()>;

    /// Sets the protocol version.
    fn set_protocol_version(&mut self, version: u8) -> TransportResult<()>;

    /// Sets whether referrals are followed.
    fn set_referral_policy(&mut self, follow: bool) -> TransportResult<()>;

    /// Negotiates TLS on the connection.
    fn start_tls(&mut self) -> TransportResult<()>;

    /// Binds; `None` means an anonymous bind.
    fn bind(&mut self, dn: Option<&str>, password: Option<&str>) -> TransportResult<()>;

    /// Runs a search, handing every matching entry to `visit` in turn.
    fn search(&mut self, spec: &SearchSpec, visit: &mut dyn FnMut(RawEntry))
        -> TransportResult<()>;

    /// Compares an attribute value.
    fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> TransportResult<bool>;

    /// Applies attribute modifications to an entry.
    fn modify(&mut self, dn: &str, mods: &[Modification]) -> TransportResult<()>;

    /// Adds an entry.
    fn add(&mut self, dn: &str, attributes: &[RawAttribute]) -> TransportResult<()>;

    /// Deletes an entry.
    fn delete(&mut self, dn: &str) -> TransportResult<()>;

    /// Renames or moves an entry.
    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> TransportResult<()>;

    /// Closes the connection.
    fn close(&mut self);
}

/// Produces a fresh transport per login.
pub trait TransportFactory: Send + Sync {
    /// Transport type produced.
    type Transport: DirectoryTransport;

    /// Creates a new, unconnected transport.
    fn create(&self) -> Self::Transport;
}

impl<F, T> TransportFactory for F
where
    F: Fn() -> T + Send + Sync,
    T: DirectoryTransport,
{
    type Transport = T;

    fn create(&self) -> T {
        self()
    }
}
