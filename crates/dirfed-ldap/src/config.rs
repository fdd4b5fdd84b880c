//! Directory and mapping configuration.
//!
//! Two typed configurations are built from the host's flat settings:
//!
//! - [`DirectoryConfig`]: how to connect and how to resolve a user DN
//! - [`MappingConfig`]: group lookup, recursion, role mapping and sync
//!
//! Field names (and serde names) match the settings keys. Raw settings go
//! through a [`ValidatorTable`] before they are read, so malformed values
//! are rejected with the offending field named.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dirfed_federation::settings::parse_bool;
use dirfed_federation::{FederationError, RawSettings, RoleId, ValidatorTable};
use serde::{Deserialize, Serialize};

use crate::dn::DistinguishedName;
use crate::error::{LdapError, LdapResult};

/// Placeholder substituted with the username in templates.
pub const USERNAME_PLACEHOLDER: &str = "[username]";

/// Default LDAP port.
pub const DEFAULT_PORT: u16 = 389;

// ============================================================================
// Enumerated options
// ============================================================================

/// Which held roles a mapping operation may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Never remove roles.
    #[default]
    No,
    /// Manage the roles referenced by mapping rules.
    Yes,
    /// Manage every known role.
    #[serde(rename = "yesdefault")]
    YesDefault,
}

impl FromStr for RemovalPolicy {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "no" | "0" => Ok(Self::No),
            "yes" | "1" => Ok(Self::Yes),
            "yesdefault" => Ok(Self::YesDefault),
            other => Err(LdapError::config(format!(
                "group_map_removal must be one of no, yes, yesdefault (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::No => "no",
            Self::Yes => "yes",
            Self::YesDefault => "yesdefault",
        })
    }
}

/// How group membership is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupType {
    /// Groups are listed on the user entry.
    #[default]
    Forward,
    /// Groups list the user; found by searching.
    Reverse,
}

impl FromStr for LookupType {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "forward" => Ok(Self::Forward),
            "reverse" => Ok(Self::Reverse),
            other => Err(LdapError::config(format!(
                "lookup_type must be forward or reverse (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for LookupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        })
    }
}

// ============================================================================
// Field validators
// ============================================================================

fn trimmed(raw: &str) -> Result<String, String> {
    Ok(raw.trim().to_string())
}

fn boolean(raw: &str) -> Result<String, String> {
    match parse_bool(raw) {
        Some(true) => Ok("1".to_string()),
        Some(false) => Ok("0".to_string()),
        None => Err(format!("'{raw}' is not a boolean")),
    }
}

fn number(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    value
        .parse::<u32>()
        .map(|n| n.to_string())
        .map_err(|_| format!("'{raw}' is not a non-negative integer"))
}

fn port(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("'{raw}' is not a valid port")),
        Ok(p) => Ok(p.to_string()),
    }
}

fn dn(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    DistinguishedName::parse(value)
        .map(|_| value.to_string())
        .map_err(|e| e.to_string())
}

/// Keeps the numeric ids of a `;`-separated list; anything else is dropped.
#[allow(clippy::unnecessary_wraps)]
fn id_list(raw: &str) -> Result<String, String> {
    let ids: Vec<String> = raw
        .split(';')
        .map(str::trim)
        .filter_map(|part| match part.parse::<RoleId>() {
            Ok(id) => Some(id.to_string()),
            Err(_) => {
                if !part.is_empty() {
                    tracing::debug!(value = %part, "Ignoring non-numeric role id");
                }
                None
            }
        })
        .collect();
    Ok(ids.join(";"))
}

fn removal(raw: &str) -> Result<String, String> {
    raw.parse::<RemovalPolicy>()
        .map(|p| p.to_string())
        .map_err(|e| e.to_string())
}

fn lookup_type(raw: &str) -> Result<String, String> {
    raw.parse::<LookupType>()
        .map(|t| t.to_string())
        .map_err(|e| e.to_string())
}

fn settings_error(err: FederationError) -> LdapError {
    match err {
        FederationError::Configuration(msg) => LdapError::Configuration(msg),
        other => LdapError::config(other.to_string()),
    }
}

fn non_empty(settings: &RawSettings, key: &str) -> Option<String> {
    settings.get_non_empty(key).map(str::to_string)
}

// ============================================================================
// Directory configuration
// ============================================================================

/// Connection and user-resolution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Host name(s); a space-separated list or `ldap://`/`ldaps://` URLs.
    pub host: String,
    /// Port used for bare host names.
    pub port: u16,
    /// Switch the connection to protocol version 3.
    #[serde(rename = "use_ldapV3")]
    pub use_ldap_v3: bool,
    /// Negotiate StartTLS after connecting.
    pub negotiate_tls: bool,
    /// Do not follow referrals.
    pub no_referrals: bool,
    /// Resolve users by filtered search instead of DN templates.
    pub use_search: bool,
    /// Service account DN (empty for anonymous).
    pub connect_username: Option<String>,
    /// Service account password.
    #[serde(skip_serializing)]
    pub connect_password: Option<String>,
    /// Base DN for searches.
    pub base_dn: Option<String>,
    /// User query: a filter (search) or `;`-separated DN templates (direct),
    /// containing `[username]`.
    pub user_qry: Option<String>,
    /// Full name attribute.
    pub ldap_fullname: String,
    /// Email attribute, or a template containing `[username]`.
    pub ldap_email: String,
    /// Username attribute.
    pub ldap_uid: String,
    /// Transport connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            use_ldap_v3: false,
            negotiate_tls: false,
            no_referrals: false,
            use_search: false,
            connect_username: None,
            connect_password: None,
            base_dn: None,
            user_qry: None,
            ldap_fullname: "fullName".to_string(),
            ldap_email: "mail".to_string(),
            ldap_uid: "uid".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

impl DirectoryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> DirectoryConfigBuilder {
        DirectoryConfigBuilder::default()
    }

    /// Field validators for the directory settings.
    #[must_use]
    pub fn validators() -> ValidatorTable {
        ValidatorTable::new()
            .with("host", trimmed)
            .with("port", port)
            .with("use_ldapV3", boolean)
            .with("negotiate_tls", boolean)
            .with("no_referrals", boolean)
            .with("use_search", boolean)
            .with("connect_username", trimmed)
            .with("base_dn", dn)
            .with("user_qry", trimmed)
            .with("ldap_fullname", trimmed)
            .with("ldap_email", trimmed)
            .with("ldap_uid", trimmed)
            .with("connect_timeout_secs", number)
    }

    /// Builds the configuration from raw settings.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::Configuration` naming the first invalid field.
    pub fn from_settings(raw: &RawSettings) -> LdapResult<Self> {
        let s = raw.validated(&Self::validators()).map_err(settings_error)?;
        let defaults = Self::default();

        let mut builder = Self::builder()
            .host(s.get("host").unwrap_or_default())
            .port(s.get("port").and_then(|p| p.parse().ok()).unwrap_or(DEFAULT_PORT))
            .use_ldap_v3(s.get_bool("use_ldapV3").unwrap_or(false))
            .negotiate_tls(s.get_bool("negotiate_tls").unwrap_or(false))
            .no_referrals(s.get_bool("no_referrals").unwrap_or(false))
            .use_search(s.get_bool("use_search").unwrap_or(false))
            .ldap_fullname(non_empty(&s, "ldap_fullname").unwrap_or(defaults.ldap_fullname))
            .ldap_email(non_empty(&s, "ldap_email").unwrap_or(defaults.ldap_email))
            .ldap_uid(non_empty(&s, "ldap_uid").unwrap_or(defaults.ldap_uid))
            .connect_timeout(Duration::from_secs(
                s.get("connect_timeout_secs")
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(defaults.connect_timeout_secs),
            ));

        if let Some(user) = non_empty(&s, "connect_username") {
            builder = builder.connect_username(user);
        }
        if let Some(password) = s.get("connect_password").filter(|p| !p.is_empty()) {
            builder = builder.connect_password(password);
        }
        if let Some(base) = non_empty(&s, "base_dn") {
            builder = builder.base_dn(base);
        }
        if let Some(query) = non_empty(&s, "user_qry") {
            builder = builder.user_qry(query);
        }

        builder.build()
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Whether the email option is a `[username]` template rather than an
    /// attribute name.
    #[must_use]
    pub fn email_is_template(&self) -> bool {
        self.ldap_email.contains(USERNAME_PLACEHOLDER)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> LdapResult<()> {
        if self.port == 0 {
            return Err(LdapError::config("port cannot be 0"));
        }
        if self.ldap_uid.trim().is_empty() {
            return Err(LdapError::config("ldap_uid cannot be empty"));
        }
        if let Some(base) = self.base_dn.as_deref().filter(|b| !b.trim().is_empty()) {
            DistinguishedName::parse(base)
                .map_err(|e| LdapError::config(format!("base_dn is invalid: {e}")))?;
        }
        Ok(())
    }
}

/// Builder for [`DirectoryConfig`].
#[derive(Debug, Default)]
pub struct DirectoryConfigBuilder {
    config: DirectoryConfig,
}

impl DirectoryConfigBuilder {
    /// Sets the host(s).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets whether protocol version 3 is requested.
    #[must_use]
    pub const fn use_ldap_v3(mut self, enabled: bool) -> Self {
        self.config.use_ldap_v3 = enabled;
        self
    }

    /// Sets whether StartTLS is negotiated.
    #[must_use]
    pub const fn negotiate_tls(mut self, enabled: bool) -> Self {
        self.config.negotiate_tls = enabled;
        self
    }

    /// Sets whether referrals are not followed.
    #[must_use]
    pub const fn no_referrals(mut self, enabled: bool) -> Self {
        self.config.no_referrals = enabled;
        self
    }

    /// Selects the search strategy.
    #[must_use]
    pub const fn use_search(mut self, enabled: bool) -> Self {
        self.config.use_search = enabled;
        self
    }

    /// Sets the service account DN.
    #[must_use]
    pub fn connect_username(mut self, dn: impl Into<String>) -> Self {
        self.config.connect_username = Some(dn.into());
        self
    }

    /// Sets the service account password.
    #[must_use]
    pub fn connect_password(mut self, password: impl Into<String>) -> Self {
        self.config.connect_password = Some(password.into());
        self
    }

    /// Sets the base DN.
    #[must_use]
    pub fn base_dn(mut self, dn: impl Into<String>) -> Self {
        self.config.base_dn = Some(dn.into());
        self
    }

    /// Sets the user query template.
    #[must_use]
    pub fn user_qry(mut self, query: impl Into<String>) -> Self {
        self.config.user_qry = Some(query.into());
        self
    }

    /// Sets the full name attribute.
    #[must_use]
    pub fn ldap_fullname(mut self, attr: impl Into<String>) -> Self {
        self.config.ldap_fullname = attr.into();
        self
    }

    /// Sets the email attribute or template.
    #[must_use]
    pub fn ldap_email(mut self, attr: impl Into<String>) -> Self {
        self.config.ldap_email = attr.into();
        self
    }

    /// Sets the username attribute.
    #[must_use]
    pub fn ldap_uid(mut self, attr: impl Into<String>) -> Self {
        self.config.ldap_uid = attr.into();
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> LdapResult<DirectoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Mapping configuration
// ============================================================================

/// Group lookup, role mapping and attribute sync options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Enable group-to-role mapping.
    pub group_map_enabled: bool,
    /// Add roles granted by matched rules.
    pub group_map_addition: bool,
    /// Removal policy.
    pub group_map_removal: RemovalPolicy,
    /// `;`-separated role ids that are never removed.
    pub group_map_unmanage: String,
    /// Role given when a user would otherwise hold none.
    pub group_map_public: RoleId,
    /// Newline-separated `<dn>:<id>[,<id>...]` rules.
    pub group_map_list: String,
    /// Group lookup type.
    pub lookup_type: LookupType,
    /// Group attribute: on the user (forward) or on the group (reverse).
    pub lookup_attribute: String,
    /// User attribute whose value groups reference (reverse lookups).
    pub lookup_member: String,
    /// Expand nested groups.
    pub recursive: bool,
    /// Maximum nesting depth; `0` or unset means unlimited.
    pub recursion_depth: Option<u32>,
    /// Attribute holding an entry's own DN (forward recursion).
    pub dn_attribute: String,
    /// Copy the directory full name onto the local user.
    pub sync_name: bool,
    /// Copy the directory email onto the local user.
    pub sync_email: bool,
    /// Role given to auto-registered users.
    pub default_role: RoleId,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            group_map_enabled: false,
            group_map_addition: false,
            group_map_removal: RemovalPolicy::No,
            group_map_unmanage: String::new(),
            group_map_public: 1,
            group_map_list: String::new(),
            lookup_type: LookupType::Forward,
            lookup_attribute: "groupMembership".to_string(),
            lookup_member: "dn".to_string(),
            recursive: false,
            recursion_depth: None,
            dn_attribute: "distinguishedName".to_string(),
            sync_name: false,
            sync_email: false,
            default_role: 2,
        }
    }
}

impl MappingConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> MappingConfigBuilder {
        MappingConfigBuilder::default()
    }

    /// Field validators for the mapping settings.
    #[must_use]
    pub fn validators() -> ValidatorTable {
        ValidatorTable::new()
            .with("group_map_enabled", boolean)
            .with("group_map_addition", boolean)
            .with("group_map_removal", removal)
            .with("group_map_unmanage", id_list)
            .with("group_map_public", number)
            .with("lookup_type", lookup_type)
            .with("lookup_attribute", trimmed)
            .with("lookup_member", trimmed)
            .with("recursive", boolean)
            .with("recursion_depth", number)
            .with("dn_attribute", trimmed)
            .with("sync_name", boolean)
            .with("sync_email", boolean)
            .with("default_role", number)
    }

    /// Builds the configuration from raw settings.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::Configuration` naming the first invalid field.
    pub fn from_settings(raw: &RawSettings) -> LdapResult<Self> {
        let s = raw.validated(&Self::validators()).map_err(settings_error)?;
        let defaults = Self::default();

        let mut builder = Self::builder()
            .group_map_enabled(s.get_bool("group_map_enabled").unwrap_or(false))
            .group_map_addition(s.get_bool("group_map_addition").unwrap_or(false))
            .group_map_removal(
                s.get("group_map_removal")
                    .map(str::parse::<RemovalPolicy>)
                    .transpose()?
                    .unwrap_or_default(),
            )
            .group_map_unmanage(s.get("group_map_unmanage").unwrap_or_default())
            .group_map_public(s.get_u32("group_map_public").unwrap_or(defaults.group_map_public))
            .group_map_list(s.get("group_map_list").unwrap_or_default())
            .lookup_type(
                s.get("lookup_type")
                    .map(str::parse::<LookupType>)
                    .transpose()?
                    .unwrap_or_default(),
            )
            .lookup_attribute(
                non_empty(&s, "lookup_attribute").unwrap_or(defaults.lookup_attribute),
            )
            .lookup_member(non_empty(&s, "lookup_member").unwrap_or(defaults.lookup_member))
            .recursive(s.get_bool("recursive").unwrap_or(false))
            .dn_attribute(non_empty(&s, "dn_attribute").unwrap_or(defaults.dn_attribute))
            .sync_name(s.get_bool("sync_name").unwrap_or(false))
            .sync_email(s.get_bool("sync_email").unwrap_or(false))
            .default_role(s.get_u32("default_role").unwrap_or(defaults.default_role));

        if let Some(depth) = s.get_u32("recursion_depth") {
            builder = builder.recursion_depth(depth);
        }

        builder.build()
    }

    /// Effective recursion limit: `None` when nested groups are not
    /// expanded, `Some(0)` for unlimited depth.
    #[must_use]
    pub fn recursion_limit(&self) -> Option<u32> {
        self.recursive.then(|| self.recursion_depth.unwrap_or(0))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> LdapResult<()> {
        if self.group_map_enabled && self.lookup_attribute.trim().is_empty() {
            return Err(LdapError::config(
                "lookup_attribute is required when group mapping is enabled",
            ));
        }
        if self.lookup_type == LookupType::Reverse && self.lookup_member.trim().is_empty() {
            return Err(LdapError::config("lookup_member is required for reverse lookups"));
        }
        Ok(())
    }
}

/// Builder for [`MappingConfig`].
#[derive(Debug, Default)]
pub struct MappingConfigBuilder {
    config: MappingConfig,
}

impl MappingConfigBuilder {
    /// Enables group mapping.
    #[must_use]
    pub const fn group_map_enabled(mut self, enabled: bool) -> Self {
        self.config.group_map_enabled = enabled;
        self
    }

    /// Enables role additions.
    #[must_use]
    pub const fn group_map_addition(mut self, enabled: bool) -> Self {
        self.config.group_map_addition = enabled;
        self
    }

    /// Sets the removal policy.
    #[must_use]
    pub const fn group_map_removal(mut self, policy: RemovalPolicy) -> Self {
        self.config.group_map_removal = policy;
        self
    }

    /// Sets the unmanaged role ids (`;`-separated).
    #[must_use]
    pub fn group_map_unmanage(mut self, ids: impl Into<String>) -> Self {
        self.config.group_map_unmanage = ids.into();
        self
    }

    /// Sets the fallback role.
    #[must_use]
    pub const fn group_map_public(mut self, role: RoleId) -> Self {
        self.config.group_map_public = role;
        self
    }

    /// Sets the mapping rule list.
    #[must_use]
    pub fn group_map_list(mut self, list: impl Into<String>) -> Self {
        self.config.group_map_list = list.into();
        self
    }

    /// Sets the lookup type.
    #[must_use]
    pub const fn lookup_type(mut self, lookup: LookupType) -> Self {
        self.config.lookup_type = lookup;
        self
    }

    /// Sets the lookup attribute.
    #[must_use]
    pub fn lookup_attribute(mut self, attr: impl Into<String>) -> Self {
        self.config.lookup_attribute = attr.into();
        self
    }

    /// Sets the lookup member attribute.
    #[must_use]
    pub fn lookup_member(mut self, attr: impl Into<String>) -> Self {
        self.config.lookup_member = attr.into();
        self
    }

    /// Enables nested group expansion.
    #[must_use]
    pub const fn recursive(mut self, enabled: bool) -> Self {
        self.config.recursive = enabled;
        self
    }

    /// Sets the recursion depth (`0` is unlimited).
    #[must_use]
    pub const fn recursion_depth(mut self, depth: u32) -> Self {
        self.config.recursion_depth = Some(depth);
        self
    }

    /// Sets the DN attribute used by forward recursion.
    #[must_use]
    pub fn dn_attribute(mut self, attr: impl Into<String>) -> Self {
        self.config.dn_attribute = attr.into();
        self
    }

    /// Enables full name sync.
    #[must_use]
    pub const fn sync_name(mut self, enabled: bool) -> Self {
        self.config.sync_name = enabled;
        self
    }

    /// Enables email sync.
    #[must_use]
    pub const fn sync_email(mut self, enabled: bool) -> Self {
        self.config.sync_email = enabled;
        self
    }

    /// Sets the role given to auto-registered users.
    #[must_use]
    pub const fn default_role(mut self, role: RoleId) -> Self {
        self.config.default_role = role;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> LdapResult<MappingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
