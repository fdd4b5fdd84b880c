//! Directory login provider.
//!
//! Ties the resolvers, the mapping engine and attribute sync to the
//! federation traits. Every call opens its own connection through the
//! transport factory and closes it before returning; a [`MappingEngine`]
//! is built fresh for each login.

use std::sync::Arc;

use dirfed_federation::{
    AuthenticationResponse, CredentialValidator, FederationError, FederationResult,
    IdentityStore, LocalUser, LoginFailure, LoginHandler, LoginOptions, RoleCatalog,
};

use crate::client::with_connection;
use crate::config::{DirectoryConfig, MappingConfig};
use crate::error::{LdapError, LdapResult};
use crate::groups::{DetailOptions, GroupResolver, UserDetails};
use crate::mapper::AttributeSync;
use crate::mapping::MappingEngine;
use crate::resolver::{DnResolution, UserResolver};
use crate::transport::TransportFactory;

/// Directory-backed login provider.
pub struct LdapLoginProvider<F> {
    name: String,
    factory: F,
    directory: Arc<DirectoryConfig>,
    mapping: MappingConfig,
    store: Arc<dyn IdentityStore>,
    catalog: Arc<dyn RoleCatalog>,
}

impl<F> std::fmt::Debug for LdapLoginProvider<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapLoginProvider")
            .field("name", &self.name)
            .field("host", &self.directory.host)
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}

impl<F: TransportFactory> LdapLoginProvider<F> {
    /// Creates a provider.
    pub fn new(
        name: impl Into<String>,
        factory: F,
        directory: DirectoryConfig,
        mapping: MappingConfig,
        store: Arc<dyn IdentityStore>,
        catalog: Arc<dyn RoleCatalog>,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            directory: Arc::new(directory),
            mapping,
            store,
            catalog,
        }
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory configuration.
    #[must_use]
    pub fn directory_config(&self) -> &DirectoryConfig {
        &self.directory
    }

    /// Mapping configuration.
    #[must_use]
    pub const fn mapping_config(&self) -> &MappingConfig {
        &self.mapping
    }

    /// Verifies `password` and returns the user's profile.
    ///
    /// ## Errors
    ///
    /// `AuthenticationFailed` when the directory rejects the credentials,
    /// otherwise the converted directory error.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> FederationResult<AuthenticationResponse> {
        let details = with_connection(&self.factory, &self.directory, |client| {
            let resolution = UserResolver::new(client).get_user_dn(username, Some(password), true)?;
            match resolution {
                DnResolution::Resolved(dn) => GroupResolver::new(client)
                    .get_user_details(&dn, &DetailOptions::default())
                    .map(Some),
                DnResolution::CredentialsRejected => Ok(None),
            }
        })
        .map_err(|e| self.fail(username, e.into()))?;

        let Some(details) = details else {
            return Err(self.fail(
                username,
                FederationError::auth_failed(format!("credentials rejected for '{username}'")),
            ));
        };

        tracing::info!(provider = %self.name, username = %username, dn = %details.dn, "User authenticated");
        Ok(response_from_details(username, &self.name, &details))
    }

    /// Resolves `username` without a password and reads its details and
    /// groups with the configured lookup options.
    ///
    /// ## Errors
    ///
    /// Returns the resolver or group lookup failure.
    pub fn lookup_user(&self, username: &str) -> LdapResult<UserDetails> {
        let options = DetailOptions::from(&self.mapping);
        with_connection(&self.factory, &self.directory, |client| {
            let dn = UserResolver::new(client)
                .get_user_dn(username, None, false)?
                .into_dn()
                .ok_or_else(|| LdapError::user_not_found(username))?;
            GroupResolver::new(client).get_user_details(&dn, &options)
        })
    }

    fn login(
        &self,
        response: &AuthenticationResponse,
        options: &LoginOptions,
    ) -> FederationResult<LocalUser> {
        let username = response.username.as_str();
        let (mut user, created) = match self.store.find_by_username(username)? {
            Some(user) => (user, false),
            None if options.autoregister => (self.new_user(response), true),
            None => return Err(FederationError::RegistrationDisabled(username.to_string())),
        };

        let details = self.lookup_user(username)?;

        if self.mapping.group_map_enabled {
            let roles = self.catalog.list_roles()?;
            let engine = MappingEngine::new(&self.mapping, &roles)?;
            let outcome = engine.reconcile(&user.roles, &details.groups);
            user.roles = outcome.roles;
        }

        AttributeSync::from(&self.mapping).do_sync(&mut user, &details);

        if created {
            self.store.create(&user)?;
        } else {
            self.store.persist(&user)?;
        }

        tracing::info!(
            provider = %self.name,
            username = %username,
            created,
            sso = response.sso,
            roles = ?user.roles,
            "User logged in"
        );
        Ok(user)
    }

    fn new_user(&self, response: &AuthenticationResponse) -> LocalUser {
        let name = response
            .full_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| response.username.clone());

        LocalUser::new(&response.username)
            .with_name(name)
            .with_email(response.email.clone().unwrap_or_default())
            .with_role(self.mapping.default_role)
    }

    fn fail(&self, username: &str, err: FederationError) -> FederationError {
        LoginFailure::new(&self.name)
            .for_user(username)
            .report(&err, false);
        err
    }
}

/// Builds an authentication response from directory details.
pub(crate) fn response_from_details(
    username: &str,
    authenticator: &str,
    details: &UserDetails,
) -> AuthenticationResponse {
    let mut response = AuthenticationResponse::new(username, authenticator);
    response.full_name = details.full_name.clone();
    response.email = details.email.clone();
    response
}

impl<F: TransportFactory> CredentialValidator for LdapLoginProvider<F> {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn validate_password(&self, username: &str, password: &str) -> FederationResult<bool> {
        let resolution = with_connection(&self.factory, &self.directory, |client| {
            UserResolver::new(client).get_user_dn(username, Some(password), true)
        })
        .map_err(|e| self.fail(username, e.into()))?;

        let valid = matches!(resolution, DnResolution::Resolved(_));
        tracing::debug!(provider = %self.name, username = %username, valid, "Password validated");
        Ok(valid)
    }
}

impl<F: TransportFactory> LoginHandler for LdapLoginProvider<F> {
    fn on_user_login(
        &self,
        response: &AuthenticationResponse,
        options: &LoginOptions,
    ) -> FederationResult<LocalUser> {
        self.login(response, options).map_err(|err| {
            LoginFailure::new(&self.name)
                .for_user(&response.username)
                .report(&err, options.verbose);
            err
        })
    }
}
