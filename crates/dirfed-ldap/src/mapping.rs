//! Group-to-role mapping.
//!
//! Rules come from `group_map_list`, one `<dn>:<id>[,<id>...]` per line.
//! A rule matches a user when its DN is a left-anchored prefix of one of
//! the user's group DNs, compared component by component.
//!
//! A [`MappingEngine`] is built per login from the configuration and the
//! role catalog. It holds the parsed rules and the managed role set for
//! that one operation and is dropped afterwards.

use std::collections::BTreeSet;

use dirfed_federation::{Role, RoleId};

use crate::config::{MappingConfig, RemovalPolicy};
use crate::dn::DistinguishedName;
use crate::error::{LdapError, LdapResult};

/// One parsed mapping rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMappingRule {
    dn: DistinguishedName,
    roles: Vec<RoleId>,
}

impl RoleMappingRule {
    /// Parses one configuration line.
    ///
    /// The line is split at its last `:`. Role ids that are not numeric or
    /// not in `known` are dropped. Returns `None` when the DN part has no
    /// `=` after its first character, is not a valid DN, or no role id
    /// survives.
    #[must_use]
    pub fn parse(line: &str, known: &BTreeSet<RoleId>) -> Option<Self> {
        let line = line.trim();
        let colon = line.rfind(':').filter(|&pos| pos > 0)?;
        let (dn, ids) = (line[..colon].trim(), &line[colon + 1..]);

        let mut roles = Vec::new();
        for id in ids.split(',').filter_map(|id| id.trim().parse::<RoleId>().ok()) {
            if known.contains(&id) && !roles.contains(&id) {
                roles.push(id);
            }
        }
        if roles.is_empty() || !dn.find('=').is_some_and(|pos| pos > 0) {
            return None;
        }

        match DistinguishedName::parse(dn) {
            Ok(dn) => Some(Self { dn, roles }),
            Err(e) => {
                tracing::debug!(line = %line, error = %e, "Ignoring mapping rule");
                None
            }
        }
    }

    /// Source DN.
    #[must_use]
    pub fn dn(&self) -> &DistinguishedName {
        &self.dn
    }

    /// Role ids granted, in configuration order.
    #[must_use]
    pub fn roles(&self) -> &[RoleId] {
        &self.roles
    }

    /// Whether the rule matches any of `groups`.
    #[must_use]
    pub fn matches(&self, groups: &[DistinguishedName]) -> bool {
        groups.iter().any(|group| self.dn.is_prefix_of(group))
    }
}

/// Role ids a mapping operation may remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedRoleSet {
    roles: BTreeSet<RoleId>,
}

impl ManagedRoleSet {
    /// Computes the managed set.
    ///
    /// - `YesDefault`: every known role except `unmanaged`
    /// - `Yes`: every role referenced by a rule except `unmanaged`
    /// - `No`: empty
    #[must_use]
    pub fn compute(
        policy: RemovalPolicy,
        rules: &[RoleMappingRule],
        known: &BTreeSet<RoleId>,
        unmanaged: &BTreeSet<RoleId>,
    ) -> Self {
        let roles = match policy {
            RemovalPolicy::No => BTreeSet::new(),
            RemovalPolicy::YesDefault => known.difference(unmanaged).copied().collect(),
            RemovalPolicy::Yes => rules
                .iter()
                .flat_map(|rule| rule.roles.iter().copied())
                .filter(|id| !unmanaged.contains(id))
                .collect(),
        };
        Self { roles }
    }

    /// Checks whether `role` is managed.
    #[must_use]
    pub fn contains(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    /// Managed role ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RoleId> + '_ {
        self.roles.iter().copied()
    }

    /// Number of managed roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether no role is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleReconciliation {
    /// Roles to add, in discovery order.
    pub additions: Vec<RoleId>,
    /// Held roles to remove, ascending.
    pub removals: Vec<RoleId>,
    /// Whether the public role was added to avoid an empty role set.
    pub fallback_applied: bool,
    /// Final role set.
    pub roles: BTreeSet<RoleId>,
}

impl RoleReconciliation {
    /// Whether the role set changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.additions.is_empty() || !self.removals.is_empty() || self.fallback_applied
    }
}

/// Per-operation mapping engine.
#[derive(Debug, Clone)]
pub struct MappingEngine {
    rules: Vec<RoleMappingRule>,
    managed: ManagedRoleSet,
    addition: bool,
    removal: RemovalPolicy,
    public_role: RoleId,
}

impl MappingEngine {
    /// Parses the rules and computes the managed role set.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::MappingConfig` if no usable rule is configured.
    pub fn new(config: &MappingConfig, catalog: &[Role]) -> LdapResult<Self> {
        let known: BTreeSet<RoleId> = catalog.iter().map(|role| role.id).collect();

        let rules: Vec<RoleMappingRule> = config
            .group_map_list
            .lines()
            .filter_map(|line| RoleMappingRule::parse(line, &known))
            .collect();
        if rules.is_empty() {
            return Err(LdapError::MappingConfig(
                "group_map_list has no usable mapping rules".to_string(),
            ));
        }

        let unmanaged = parse_role_ids(&config.group_map_unmanage);
        let managed = ManagedRoleSet::compute(config.group_map_removal, &rules, &known, &unmanaged);

        tracing::debug!(
            rules = rules.len(),
            managed = managed.len(),
            removal = %config.group_map_removal,
            "Mapping engine ready"
        );
        Ok(Self {
            rules,
            managed,
            addition: config.group_map_addition,
            removal: config.group_map_removal,
            public_role: config.group_map_public,
        })
    }

    /// Parsed rules.
    #[must_use]
    pub fn rules(&self) -> &[RoleMappingRule] {
        &self.rules
    }

    /// Managed role set.
    #[must_use]
    pub const fn managed(&self) -> &ManagedRoleSet {
        &self.managed
    }

    /// Rules matching any of `groups`. Unparseable group DNs are skipped.
    pub fn matching_rules<S: AsRef<str>>(&self, groups: &[S]) -> Vec<&RoleMappingRule> {
        let parsed: Vec<DistinguishedName> = groups
            .iter()
            .filter_map(|group| match DistinguishedName::parse(group.as_ref()) {
                Ok(dn) => Some(dn),
                Err(e) => {
                    tracing::debug!(group = %group.as_ref(), error = %e, "Skipping group DN");
                    None
                }
            })
            .collect();

        self.rules.iter().filter(|rule| rule.matches(&parsed)).collect()
    }

    /// Diffs the held roles against the rules matched by `groups`.
    #[must_use]
    pub fn reconcile<S: AsRef<str>>(
        &self,
        current: &BTreeSet<RoleId>,
        groups: &[S],
    ) -> RoleReconciliation {
        let matched = self.matching_rules(groups);
        let granted: BTreeSet<RoleId> = matched
            .iter()
            .flat_map(|rule| rule.roles.iter().copied())
            .collect();

        let mut additions = Vec::new();
        if self.addition {
            for id in matched.iter().flat_map(|rule| rule.roles.iter().copied()) {
                if !current.contains(&id) && !additions.contains(&id) {
                    additions.push(id);
                }
            }
        }

        let removals: Vec<RoleId> = if self.removal == RemovalPolicy::No {
            Vec::new()
        } else {
            current
                .iter()
                .copied()
                .filter(|id| self.managed.contains(*id) && !granted.contains(id))
                .collect()
        };

        let mut roles: BTreeSet<RoleId> = current
            .iter()
            .copied()
            .chain(additions.iter().copied())
            .filter(|id| !removals.contains(id))
            .collect();

        let fallback_applied = roles.is_empty();
        if fallback_applied {
            roles.insert(self.public_role);
        }

        tracing::debug!(
            matched = matched.len(),
            added = ?additions,
            removed = ?removals,
            fallback = fallback_applied,
            "Roles reconciled"
        );
        RoleReconciliation {
            additions,
            removals,
            fallback_applied,
            roles,
        }
    }
}

/// Parses a `;`-separated list of role ids, ignoring non-numeric items.
fn parse_role_ids(list: &str) -> BTreeSet<RoleId> {
    list.split(';')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}
