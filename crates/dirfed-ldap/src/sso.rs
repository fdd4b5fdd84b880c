//! Directory-backed single sign-on.
//!
//! [`NetworkAddressDetector`] finds the user signed in at the client's
//! workstation through the eDirectory `networkAddress` attribute.
//! [`DirectorySsoAuthenticator`] accepts a detected username once it
//! resolves to a directory entry. Both open their own connection per call.

use std::net::IpAddr;
use std::sync::Arc;

use dirfed_federation::{
    AuthenticationResponse, DetectionContext, FederationResult, LoginOptions, RemoteUserDetector,
    SsoAuthenticator,
};

use crate::client::with_connection;
use crate::config::DirectoryConfig;
use crate::error::LdapError;
use crate::escape::ip_to_net_address;
use crate::groups::{DetailOptions, GroupResolver};
use crate::provider::response_from_details;
use crate::resolver::UserResolver;
use crate::transport::TransportFactory;

// ============================================================================
// Network address detection
// ============================================================================

/// Detects the user logged in at the client's IPv4 address.
pub struct NetworkAddressDetector<F> {
    name: String,
    factory: F,
    config: Arc<DirectoryConfig>,
}

impl<F: TransportFactory> NetworkAddressDetector<F> {
    /// Default registered name.
    pub const NAME: &'static str = "edirectory";

    /// Creates a detector registered as [`NAME`](Self::NAME).
    pub fn new(factory: F, config: Arc<DirectoryConfig>) -> Self {
        Self {
            name: Self::NAME.to_string(),
            factory,
            config,
        }
    }

    /// Overrides the registered name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F: TransportFactory> RemoteUserDetector for NetworkAddressDetector<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect_remote_user(&self, ctx: &DetectionContext) -> Option<String> {
        let Some(IpAddr::V4(addr)) = ctx.remote_addr else {
            tracing::debug!(detector = %self.name, "No IPv4 client address");
            return None;
        };

        let filter = format!("(networkAddress={})", ip_to_net_address(addr));
        let uid = self.config.ldap_uid.clone();
        let result = with_connection(&self.factory, &self.config, |client| {
            client.bind_service()?;
            let results = client.search(None, Some(&filter), &[uid.as_str()])?;
            Ok(results.get_value(0, &uid, 0).map(str::to_string))
        });

        match result {
            Ok(Some(username)) => {
                tracing::debug!(detector = %self.name, ip = %addr, username = %username, "Remote user detected");
                Some(username)
            }
            Ok(None) => {
                tracing::debug!(detector = %self.name, ip = %addr, "No user at address");
                None
            }
            Err(e) => {
                tracing::warn!(detector = %self.name, ip = %addr, error = %e, "Remote user detection failed");
                None
            }
        }
    }
}

// ============================================================================
// Directory SSO authenticator
// ============================================================================

/// Accepts a detected username that resolves to a directory entry.
pub struct DirectorySsoAuthenticator<F> {
    name: String,
    factory: F,
    config: Arc<DirectoryConfig>,
}

impl<F: TransportFactory> DirectorySsoAuthenticator<F> {
    /// Default registered name.
    pub const NAME: &'static str = "directory";

    /// Creates an authenticator registered as [`NAME`](Self::NAME).
    pub fn new(factory: F, config: Arc<DirectoryConfig>) -> Self {
        Self {
            name: Self::NAME.to_string(),
            factory,
            config,
        }
    }

    /// Overrides the registered name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F: TransportFactory> SsoAuthenticator for DirectorySsoAuthenticator<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_authenticate(
        &self,
        username: &str,
        _options: &LoginOptions,
    ) -> FederationResult<AuthenticationResponse> {
        let details = with_connection(&self.factory, &self.config, |client| {
            let dn = UserResolver::new(client)
                .get_user_dn(username, None, false)?
                .into_dn()
                .ok_or_else(|| LdapError::user_not_found(username))?;
            GroupResolver::new(client).get_user_details(&dn, &DetailOptions::default())
        })?;

        tracing::debug!(authenticator = %self.name, username = %username, dn = %details.dn, "SSO user resolved");
        Ok(response_from_details(username, &self.name, &details))
    }
}
