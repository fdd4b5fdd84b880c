//! Directory client.
//!
//! A [`DirectoryClient`] owns one transport for the duration of a login.
//! It applies the configured connection options, gives transport failures
//! their meaning (bind failure, TLS failure, ...) and converts search
//! results into a [`ResultSet`].
//!
//! Connections are never shared between logins and must be closed by the
//! caller with [`DirectoryClient::close`].

use std::sync::Arc;

use crate::config::DirectoryConfig;
use crate::error::{LdapError, LdapResult};
use crate::result::{Entry, ResultSet};
use crate::transport::{
    DirectoryTransport, Modification, ModifyOp, RawAttribute, SearchScope, SearchSpec,
    TransportFactory,
};

/// Filter used when a search or read is given none.
pub const MATCH_ALL_FILTER: &str = "(objectclass=*)";

/// Attribute name/values pair for write operations.
pub type AttributeValues<'a> = (&'a str, &'a [&'a str]);

/// A single directory connection.
#[derive(Debug)]
pub struct DirectoryClient<T> {
    transport: T,
    config: Arc<DirectoryConfig>,
    connected: bool,
}

impl<T: DirectoryTransport> DirectoryClient<T> {
    /// Creates a client over an unconnected transport.
    pub fn new(transport: T, config: Arc<DirectoryConfig>) -> Self {
        Self {
            transport,
            config,
            connected: false,
        }
    }

    /// The directory configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Shared handle to the directory configuration.
    #[must_use]
    pub fn shared_config(&self) -> Arc<DirectoryConfig> {
        Arc::clone(&self.config)
    }

    /// Whether `connect` succeeded and `close` has not been called.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connects and applies protocol options.
    ///
    /// A successful connect does not prove the server is reachable: many
    /// transports only report that on the first bind.
    ///
    /// ## Errors
    ///
    /// - `Configuration` if no host is configured
    /// - `Connection` if the transport handle cannot be created
    /// - `Protocol` if the protocol version or referral policy is rejected
    /// - `Tls` if StartTLS fails
    pub fn connect(&mut self) -> LdapResult<()> {
        let config = Arc::clone(&self.config);
        if config.host.trim().is_empty() {
            return Err(LdapError::config("no host specified"));
        }

        tracing::debug!(host = %config.host, port = config.port, "Connecting to directory");
        self.transport
            .connect(&config.host, config.port)
            .map_err(|e| LdapError::connection(format!("{}: {e}", config.host)))?;
        self.connected = true;

        if config.use_ldap_v3 {
            self.transport
                .set_protocol_version(3)
                .map_err(|e| LdapError::protocol(format!("failed to set protocol version 3: {e}")))?;
        }

        let follow = !config.no_referrals;
        self.transport
            .set_referral_policy(follow)
            .map_err(|e| LdapError::protocol(format!("failed to set referral policy: {e}")))?;

        if config.negotiate_tls {
            self.transport
                .start_tls()
                .map_err(|e| LdapError::tls(format!("failed to start TLS: {e}")))?;
        }

        Ok(())
    }

    /// Binds as `dn` (anonymous when `None`).
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::Bind` on any failure. Bad credentials and an
    /// unreachable server look the same here.
    pub fn bind(&mut self, dn: Option<&str>, password: Option<&str>) -> LdapResult<()> {
        tracing::debug!(dn = dn.unwrap_or("<anonymous>"), "Binding to directory");
        self.transport
            .bind(dn, password)
            .map_err(|e| LdapError::bind(format!("{}: {e}", dn.unwrap_or("<anonymous>"))))
    }

    /// Binds with the configured service account.
    pub fn bind_service(&mut self) -> LdapResult<()> {
        let config = Arc::clone(&self.config);
        let dn = config.connect_username.as_deref().filter(|d| !d.is_empty());
        self.bind(dn, config.connect_password.as_deref())
    }

    /// Subtree search; base defaults to the configured base DN, filter to
    /// match-all.
    pub fn search<S: AsRef<str>>(
        &mut self,
        base: Option<&str>,
        filter: Option<&str>,
        attrs: &[S],
    ) -> LdapResult<ResultSet> {
        self.query(base, filter, attrs, SearchScope::Subtree)
    }

    /// Single-object read of `base`, with the same defaults as
    /// [`search`](Self::search).
    pub fn read<S: AsRef<str>>(
        &mut self,
        base: Option<&str>,
        filter: Option<&str>,
        attrs: &[S],
    ) -> LdapResult<ResultSet> {
        self.query(base, filter, attrs, SearchScope::Base)
    }

    fn query<S: AsRef<str>>(
        &mut self,
        base: Option<&str>,
        filter: Option<&str>,
        attrs: &[S],
        scope: SearchScope,
    ) -> LdapResult<ResultSet> {
        let spec = SearchSpec {
            base: base
                .or(self.config.base_dn.as_deref())
                .unwrap_or_default()
                .to_string(),
            filter: filter.unwrap_or(MATCH_ALL_FILTER).to_string(),
            attrs: attrs.iter().map(|a| a.as_ref().to_string()).collect(),
            scope,
        };

        let mut entries = Vec::new();
        self.transport
            .search(&spec, &mut |raw| entries.push(Entry::from_raw(raw)))
            .map_err(|e| {
                LdapError::search(format!(
                    "{} {} under '{}': {e}",
                    spec.scope, spec.filter, spec.base
                ))
            })?;

        tracing::debug!(
            base = %spec.base,
            filter = %spec.filter,
            scope = %spec.scope,
            entries = entries.len(),
            "Directory query complete"
        );
        Ok(ResultSet::new(entries))
    }

    /// Compares an attribute value.
    pub fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> LdapResult<bool> {
        self.transport
            .compare(dn, attribute, value)
            .map_err(|e| LdapError::operation(format!("compare {attribute} on {dn}: {e}")))
    }

    /// Applies mixed modifications to an entry.
    pub fn modify(&mut self, dn: &str, mods: &[Modification]) -> LdapResult<()> {
        tracing::debug!(dn = %dn, changes = mods.len(), "Modifying directory entry");
        self.transport
            .modify(dn, mods)
            .map_err(|e| LdapError::operation(format!("modify {dn}: {e}")))
    }

    /// Adds attribute values.
    pub fn add_attributes(&mut self, dn: &str, attrs: &[AttributeValues<'_>]) -> LdapResult<()> {
        self.modify(dn, &modifications(ModifyOp::Add, attrs))
    }

    /// Deletes attribute values (the whole attribute when given no values).
    pub fn delete_attributes(&mut self, dn: &str, attrs: &[AttributeValues<'_>]) -> LdapResult<()> {
        self.modify(dn, &modifications(ModifyOp::Delete, attrs))
    }

    /// Replaces attribute values.
    pub fn replace_attributes(
        &mut self,
        dn: &str,
        attrs: &[AttributeValues<'_>],
    ) -> LdapResult<()> {
        self.modify(dn, &modifications(ModifyOp::Replace, attrs))
    }

    /// Adds an entry.
    pub fn add(&mut self, dn: &str, attrs: &[AttributeValues<'_>]) -> LdapResult<()> {
        tracing::debug!(dn = %dn, "Adding directory entry");
        let attributes: Vec<RawAttribute> = attrs
            .iter()
            .map(|(name, values)| {
                RawAttribute::new(*name, values.iter().map(|v| (*v).to_string()).collect())
            })
            .collect();
        self.transport
            .add(dn, &attributes)
            .map_err(|e| LdapError::operation(format!("add {dn}: {e}")))
    }

    /// Deletes an entry.
    pub fn delete(&mut self, dn: &str) -> LdapResult<()> {
        tracing::debug!(dn = %dn, "Deleting directory entry");
        self.transport
            .delete(dn)
            .map_err(|e| LdapError::operation(format!("delete {dn}: {e}")))
    }

    /// Renames an entry, optionally moving it under `new_parent`.
    pub fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> LdapResult<()> {
        tracing::debug!(dn = %dn, new_rdn = %new_rdn, "Renaming directory entry");
        self.transport
            .rename(dn, new_rdn, new_parent, delete_old_rdn)
            .map_err(|e| LdapError::operation(format!("rename {dn}: {e}")))
    }

    /// Closes the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.connected {
            tracing::debug!(host = %self.config.host, "Closing directory connection");
        }
        self.transport.close();
        self.connected = false;
    }
}

/// Opens a fresh connection from `factory`, runs `f` on it and closes it
/// whatever the outcome.
///
/// ## Errors
///
/// Returns the `connect` failure or whatever `f` returns.
pub fn with_connection<F, R>(
    factory: &F,
    config: &Arc<DirectoryConfig>,
    f: impl FnOnce(&mut DirectoryClient<F::Transport>) -> LdapResult<R>,
) -> LdapResult<R>
where
    F: TransportFactory + ?Sized,
{
    let mut client = DirectoryClient::new(factory.create(), Arc::clone(config));
    let result = client.connect().and_then(|()| f(&mut client));
    client.close();
    result
}

fn modifications(op: ModifyOp, attrs: &[AttributeValues<'_>]) -> Vec<Modification> {
    attrs
        .iter()
        .map(|(name, values)| Modification::new(op, name, values))
        .collect()
}
