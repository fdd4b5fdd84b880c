//! User DN resolution.
//!
//! The configured user query (`user_qry`) is either:
//!
//! - a filter such as `(uid=[username])`, searched under the base DN with
//!   the service account (`use_search` on), or
//! - one or more `;`-separated DN templates such as
//!   `cn=[username],ou=people,dc=example,dc=com` (`use_search` off).
//!
//! With `authenticate` the candidates are bound with the user's password
//! and the first that binds wins.

use crate::client::DirectoryClient;
use crate::config::{DirectoryConfig, USERNAME_PLACEHOLDER};
use crate::dn::DistinguishedName;
use crate::error::{LdapError, LdapResult};
use crate::escape::{escape, EscapeMode};
use crate::transport::DirectoryTransport;

/// Outcome of a DN resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnResolution {
    /// The user's DN.
    Resolved(String),
    /// The search found the user but no candidate accepted the password.
    CredentialsRejected,
}

impl DnResolution {
    /// The resolved DN, if any.
    #[must_use]
    pub fn dn(&self) -> Option<&str> {
        match self {
            Self::Resolved(dn) => Some(dn),
            Self::CredentialsRejected => None,
        }
    }

    /// Consumes the resolution, returning the DN if any.
    #[must_use]
    pub fn into_dn(self) -> Option<String> {
        match self {
            Self::Resolved(dn) => Some(dn),
            Self::CredentialsRejected => None,
        }
    }
}

/// Resolves usernames to DNs over a borrowed connection.
pub struct UserResolver<'a, T> {
    client: &'a mut DirectoryClient<T>,
}

impl<'a, T: DirectoryTransport> UserResolver<'a, T> {
    /// Creates a resolver over a connected client.
    pub fn new(client: &'a mut DirectoryClient<T>) -> Self {
        Self { client }
    }

    /// Resolves `username` to a DN.
    ///
    /// Without `authenticate`, the search strategy trusts its first match
    /// and the direct strategy returns the first candidate that exists (or,
    /// if the service account cannot bind, the first candidate unverified).
    ///
    /// With `authenticate`, the first candidate that binds with `password`
    /// is returned. An empty password never binds. When nothing binds the
    /// search strategy reports [`DnResolution::CredentialsRejected`] and
    /// the direct strategy fails with `UserDnFail`.
    ///
    /// ## Errors
    ///
    /// - `Configuration` if `user_qry` is missing or lacks `[username]`,
    ///   or the search strategy has no base DN
    /// - `Validation` if the query is not filter-shaped (search) or a
    ///   candidate is not a valid DN (direct)
    /// - `Bind` if the service account cannot bind before a search
    /// - `UserNotFound` if no candidate DN was produced
    /// - `UserDnFail` as described above
    pub fn get_user_dn(
        &mut self,
        username: &str,
        password: Option<&str>,
        authenticate: bool,
    ) -> LdapResult<DnResolution> {
        let config = self.client.shared_config();
        let template = config
            .user_qry
            .as_deref()
            .filter(|q| q.contains(USERNAME_PLACEHOLDER))
            .ok_or_else(|| {
                LdapError::config("user_qry must be set and contain [username]")
            })?;

        let candidates = if config.use_search {
            self.candidates_by_search(&config, template, username)?
        } else {
            candidates_from_template(template, username)?
        };

        let Some(first) = candidates.first().cloned() else {
            return Err(LdapError::user_not_found(username));
        };

        if authenticate {
            return self.authenticate(&config, &candidates, username, password);
        }

        if config.use_search {
            return Ok(DnResolution::Resolved(first));
        }

        match self.client.bind_service() {
            Ok(()) => {
                for dn in &candidates {
                    match self.client.read(Some(dn), None, &["dn"]) {
                        Ok(results) if results.count_entries() > 0 => {
                            return Ok(DnResolution::Resolved(dn.clone()));
                        }
                        Ok(_) => {}
                        Err(e) => tracing::debug!(dn = %dn, error = %e, "Candidate DN not readable"),
                    }
                }
                Err(LdapError::user_not_found(username))
            }
            Err(e) => {
                tracing::warn!(
                    username = %username,
                    dn = %first,
                    error = %e,
                    "Service account bind failed; using first candidate DN unverified"
                );
                Ok(DnResolution::Resolved(first))
            }
        }
    }

    fn candidates_by_search(
        &mut self,
        config: &DirectoryConfig,
        template: &str,
        username: &str,
    ) -> LdapResult<Vec<String>> {
        let filter = template.replace(USERNAME_PLACEHOLDER, &escape(username, EscapeMode::Filter));
        if !looks_like_filter(&filter) {
            return Err(LdapError::validation(format!(
                "user query '{filter}' is not a search filter"
            )));
        }

        let base = config
            .base_dn
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| LdapError::config("base_dn is required for user searches"))?;

        self.client.bind_service()?;
        let results = self
            .client
            .search(Some(base), Some(&filter), &[config.ldap_uid.as_str()])?;

        let dns: Vec<String> = results
            .entries()
            .map(|e| e.dn().to_string())
            .filter(|dn| !dn.is_empty())
            .collect();
        tracing::debug!(username = %username, matches = dns.len(), "User search complete");
        Ok(dns)
    }

    fn authenticate(
        &mut self,
        config: &DirectoryConfig,
        candidates: &[String],
        username: &str,
        password: Option<&str>,
    ) -> LdapResult<DnResolution> {
        match password.filter(|p| !p.is_empty()) {
            Some(password) => {
                for dn in candidates {
                    match self.client.bind(Some(dn), Some(password)) {
                        Ok(()) => {
                            tracing::debug!(username = %username, dn = %dn, "User bind succeeded");
                            return Ok(DnResolution::Resolved(dn.clone()));
                        }
                        Err(e) => tracing::debug!(dn = %dn, error = %e, "User bind failed"),
                    }
                }
            }
            None => tracing::debug!(username = %username, "Empty password, skipping user bind"),
        }

        if config.use_search {
            Ok(DnResolution::CredentialsRejected)
        } else {
            Err(LdapError::UserDnFail(username.to_string()))
        }
    }
}

/// Builds the candidate DNs for the direct strategy.
fn candidates_from_template(template: &str, username: &str) -> LdapResult<Vec<String>> {
    let query = template.replace(USERNAME_PLACEHOLDER, &escape(username, EscapeMode::Dn));

    query
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|candidate| {
            DistinguishedName::parse(candidate)?;
            Ok(candidate.to_string())
        })
        .collect()
}

/// Loose filter shape check: `(`, then `=`, then `)`.
fn looks_like_filter(filter: &str) -> bool {
    let Some(open) = filter.find('(') else {
        return false;
    };
    let rest = &filter[open + 1..];
    rest.find('=')
        .is_some_and(|eq| rest[eq + 1..].contains(')'))
}
