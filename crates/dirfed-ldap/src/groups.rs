//! User detail retrieval and group discovery.
//!
//! Groups are found either on the user entry itself (forward lookup, e.g.
//! `groupMembership`) or by searching for groups that reference the user
//! (reverse lookup, e.g. `member=<user dn>`). Nested groups are then
//! expanded breadth-first, one OR-combined search per level.
//!
//! Directory failures during discovery degrade to fewer groups; only the
//! read of the user entry itself is fatal.

use std::collections::{BTreeMap, HashSet};

use crate::client::DirectoryClient;
use crate::config::{LookupType, MappingConfig, USERNAME_PLACEHOLDER};
use crate::error::{LdapError, LdapResult};
use crate::escape::build_filter;
use crate::result::Entry;
use crate::transport::DirectoryTransport;

/// Group lookup settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLookup {
    /// Forward or reverse.
    pub lookup_type: LookupType,
    /// Attribute holding the groups (forward) or the members (reverse).
    pub key: String,
}

/// Options for [`GroupResolver::get_user_details`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailOptions {
    /// Group lookup; `None` skips group discovery.
    pub lookup: Option<GroupLookup>,
    /// Nested group expansion depth; `None` disables it, `Some(0)` is
    /// unlimited.
    pub recursion: Option<u32>,
    /// User attribute referenced by groups in reverse lookups.
    pub lookup_member: String,
    /// Attribute holding an entry's own DN, queried in forward recursion.
    pub dn_attribute: String,
    /// Additional attributes to fetch.
    pub extra_attributes: Vec<String>,
}

impl Default for DetailOptions {
    fn default() -> Self {
        Self {
            lookup: None,
            recursion: None,
            lookup_member: "dn".to_string(),
            dn_attribute: "distinguishedName".to_string(),
            extra_attributes: Vec::new(),
        }
    }
}

impl DetailOptions {
    /// Adds an extra attribute to fetch.
    #[must_use]
    pub fn with_extra(mut self, attribute: impl Into<String>) -> Self {
        self.extra_attributes.push(attribute.into());
        self
    }
}

impl From<&MappingConfig> for DetailOptions {
    fn from(config: &MappingConfig) -> Self {
        let key = config.lookup_attribute.trim();
        let lookup = (config.group_map_enabled && !key.is_empty()).then(|| GroupLookup {
            lookup_type: config.lookup_type,
            key: key.to_string(),
        });

        Self {
            recursion: lookup.as_ref().and_then(|_| config.recursion_limit()),
            lookup,
            lookup_member: config.lookup_member.clone(),
            dn_attribute: config.dn_attribute.clone(),
            extra_attributes: Vec::new(),
        }
    }
}

/// Attributes and groups of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDetails {
    /// User DN.
    pub dn: String,
    /// Requested attributes by the name they were requested under. The
    /// lookup key, when present, holds the discovered groups.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Discovered group DNs, de-duplicated, discovery order.
    pub groups: Vec<String>,
    /// Full name.
    pub full_name: Option<String>,
    /// Email, possibly synthesised from a template.
    pub email: Option<String>,
    /// Username attribute value.
    pub uid: Option<String>,
}

impl UserDetails {
    /// Values of a requested attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map_or(&[], |(_, v)| v.as_slice())
    }
}

/// Reads user details and discovers groups over a borrowed connection.
pub struct GroupResolver<'a, T> {
    client: &'a mut DirectoryClient<T>,
}

impl<'a, T: DirectoryTransport> GroupResolver<'a, T> {
    /// Creates a resolver over a connected, bound client.
    pub fn new(client: &'a mut DirectoryClient<T>) -> Self {
        Self { client }
    }

    /// Reads the entry at `dn` and discovers its groups.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::UserAttribute` if the entry cannot be read.
    pub fn get_user_details(&mut self, dn: &str, options: &DetailOptions) -> LdapResult<UserDetails> {
        let config = self.client.shared_config();

        let mut requested = Vec::new();
        for name in [
            "dn",
            options.lookup_member.as_str(),
            config.ldap_fullname.as_str(),
            config.ldap_uid.as_str(),
        ] {
            push_unique(&mut requested, name);
        }
        if !config.email_is_template() {
            push_unique(&mut requested, &config.ldap_email);
        }
        for extra in &options.extra_attributes {
            push_unique(&mut requested, extra);
        }

        let mut fetch = requested.clone();
        if let Some(lookup) = &options.lookup {
            if lookup.lookup_type == LookupType::Forward {
                push_unique(&mut fetch, &lookup.key);
            }
            push_unique(&mut requested, &lookup.key);
        }

        let results = self
            .client
            .read(Some(dn), None, &fetch)
            .map_err(|e| LdapError::UserAttribute(format!("cannot read {dn}: {e}")))?;
        if results.get_value(0, "dn", 0).is_none() {
            return Err(LdapError::UserAttribute(format!("no entry at {dn}")));
        }
        let entry = results.get_entry(0);

        let groups = match &options.lookup {
            Some(lookup) => self.discover_groups(entry, lookup, options),
            None => Vec::new(),
        };

        let mut attributes: BTreeMap<String, Vec<String>> = requested
            .iter()
            .map(|name| (name.clone(), entry.values(name)))
            .collect();
        if let Some(lookup) = &options.lookup {
            attributes.insert(lookup.key.clone(), groups.clone());
        }

        let uid = entry.first(&config.ldap_uid).map(str::to_string);
        let email = if config.email_is_template() {
            let synthetic = uid
                .as_deref()
                .map(|uid| config.ldap_email.replace(USERNAME_PLACEHOLDER, uid));
            if let Some(email) = &synthetic {
                attributes.insert(config.ldap_email.clone(), vec![email.clone()]);
            } else {
                tracing::debug!(dn = %dn, "No uid value for the email template");
            }
            synthetic
        } else {
            entry.first(&config.ldap_email).map(str::to_string)
        };

        tracing::debug!(dn = %dn, groups = groups.len(), "Fetched user details");
        Ok(UserDetails {
            dn: entry.dn().to_string(),
            full_name: entry.first(&config.ldap_fullname).map(str::to_string),
            email,
            uid,
            attributes,
            groups,
        })
    }

    fn discover_groups(
        &mut self,
        entry: &Entry,
        lookup: &GroupLookup,
        options: &DetailOptions,
    ) -> Vec<String> {
        let direct = match lookup.lookup_type {
            LookupType::Forward => entry.values(&lookup.key),
            LookupType::Reverse => self.reverse_lookup(entry, lookup, options),
        };

        let mut groups = Vec::new();
        let mut seen = HashSet::new();
        for group in &direct {
            if seen.insert(group.to_lowercase()) {
                groups.push(group.clone());
            }
        }

        if let Some(depth) = options.recursion {
            let (value_attribute, query_attribute) = match lookup.lookup_type {
                LookupType::Forward => (lookup.key.as_str(), options.dn_attribute.as_str()),
                LookupType::Reverse => ("dn", lookup.key.as_str()),
            };
            let nested =
                self.get_recursive_groups(&direct, depth, &[], value_attribute, query_attribute);
            for group in nested {
                if seen.insert(group.to_lowercase()) {
                    groups.push(group);
                }
            }
        }

        groups
    }

    fn reverse_lookup(
        &mut self,
        entry: &Entry,
        lookup: &GroupLookup,
        options: &DetailOptions,
    ) -> Vec<String> {
        let Some(member) = entry.first(&options.lookup_member) else {
            tracing::warn!(
                dn = %entry.dn(),
                attribute = %options.lookup_member,
                "User has no value for the reverse lookup attribute"
            );
            return Vec::new();
        };

        let Some(filter) = build_filter(&[format!("{}={member}", lookup.key)], None) else {
            return Vec::new();
        };
        match self.client.search(None, Some(&filter), &["dn"]) {
            Ok(results) => results.dns(),
            Err(e) => {
                tracing::warn!(filter = %filter, error = %e, "Reverse group lookup failed");
                Vec::new()
            }
        }
    }

    /// Expands nested groups breadth-first.
    ///
    /// Each level searches for entries whose `query_attribute` equals one
    /// of the frontier DNs. Every match not yet in the accumulator (which
    /// starts as `known`) is added, and its `value_attribute` values form
    /// the next frontier. `max_depth` bounds the number of levels; `0` is
    /// unlimited and relies on the accumulator to stop on cycles.
    ///
    /// Returns the accumulator. A failed search ends the expansion with
    /// what was found so far.
    pub fn get_recursive_groups<S: AsRef<str>>(
        &mut self,
        seeds: &[S],
        max_depth: u32,
        known: &[String],
        value_attribute: &str,
        query_attribute: &str,
    ) -> Vec<String> {
        let mut accumulated = known.to_vec();
        let mut visited: HashSet<String> = known.iter().map(|dn| dn.to_lowercase()).collect();
        let mut frontier: Vec<String> = seeds
            .iter()
            .map(|s| s.as_ref().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let mut level = 0;

        while !frontier.is_empty() {
            let filters: Vec<String> = frontier
                .iter()
                .map(|dn| format!("{query_attribute}={dn}"))
                .collect();
            let Some(filter) = build_filter(&filters, Some("|")) else {
                break;
            };

            let results = match self.client.search(None, Some(&filter), &[value_attribute]) {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(level, error = %e, "Nested group search failed");
                    break;
                }
            };

            let mut next = Vec::new();
            for entry in results.entries() {
                let dn = entry.dn();
                if dn.is_empty() || !visited.insert(dn.to_lowercase()) {
                    continue;
                }
                accumulated.push(dn.to_string());
                next.extend(entry.values(value_attribute));
            }

            level += 1;
            tracing::debug!(level, found = accumulated.len(), "Nested group level expanded");
            if max_depth != 0 && level >= max_depth {
                break;
            }
            frontier = next;
        }

        accumulated
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !name.is_empty() && !list.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        list.push(name.to_string());
    }
}
