//! In-memory directory backend.
//!
//! [`MemoryDirectory`] holds a small directory tree and hands out
//! [`MemoryTransport`] connections to it. It evaluates the filter subset
//! the resolvers emit (equality, presence, substrings, `&`, `|`, `!`,
//! `\hh` escapes), scopes searches by base DN, checks bind credentials,
//! and records every operation so callers can assert on what was sent.
//!
//! Failure switches (`reject_tls`, `unreachable`, ...) make the transport
//! fail the way a real server would at the corresponding step.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::dn::DistinguishedName;
use crate::transport::{
    DirectoryTransport, Modification, ModifyOp, RawAttribute, RawEntry, SearchScope, SearchSpec,
    TransportError, TransportResult,
};

const DN_PSEUDO_ATTRIBUTES: [&str; 3] = ["dn", "distinguishedname", "entrydn"];

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `connect`.
    Connect {
        /// Hosts string.
        hosts: String,
        /// Port.
        port: u16,
    },
    /// `set_protocol_version`.
    SetProtocolVersion(u8),
    /// `set_referral_policy`.
    SetReferralPolicy {
        /// Whether referrals are followed.
        follow: bool,
    },
    /// `start_tls`.
    StartTls,
    /// `bind`.
    Bind {
        /// DN (`None` for anonymous).
        dn: Option<String>,
        /// Whether the bind succeeded.
        success: bool,
    },
    /// `search` (both subtree searches and base reads).
    Search {
        /// Base DN.
        base: String,
        /// Filter.
        filter: String,
        /// Scope.
        scope: SearchScope,
    },
    /// `compare`.
    Compare {
        /// Target DN.
        dn: String,
        /// Attribute compared.
        attribute: String,
    },
    /// `modify`.
    Modify {
        /// Target DN.
        dn: String,
    },
    /// `add`.
    Add {
        /// New DN.
        dn: String,
    },
    /// `delete`.
    Delete {
        /// Deleted DN.
        dn: String,
    },
    /// `rename`.
    Rename {
        /// Old DN.
        dn: String,
        /// New DN.
        new_dn: String,
    },
    /// `close`.
    Close,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    dn: String,
    parsed: DistinguishedName,
    attributes: Vec<(String, Vec<String>)>,
}

impl StoredEntry {
    fn values(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    fn values_mut(&mut self, name: &str) -> &mut Vec<String> {
        let index = match self
            .attributes
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(index) => index,
            None => {
                self.attributes.push((name.to_string(), Vec::new()));
                self.attributes.len() - 1
            }
        };
        &mut self.attributes[index].1
    }

    /// Values used when matching a filter; DN pseudo-attributes fall back
    /// to the entry DN.
    fn filter_values(&self, name: &str) -> Vec<String> {
        match self.values(name) {
            Some(values) => values.to_vec(),
            None if DN_PSEUDO_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str()) => {
                vec![self.dn.clone()]
            }
            None => Vec::new(),
        }
    }

    fn project(&self, attrs: &[String]) -> RawEntry {
        let all = attrs.is_empty() || attrs.iter().any(|a| a == "*");
        let attributes = self
            .attributes
            .iter()
            .filter(|(name, _)| all || attrs.iter().any(|a| a.eq_ignore_ascii_case(name)))
            .map(|(name, values)| RawAttribute::new(name.clone(), values.clone()))
            .collect();

        RawEntry {
            dn: self.dn.clone(),
            attributes,
        }
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    entries: Vec<StoredEntry>,
    passwords: HashMap<String, String>,
    deny_anonymous: bool,
    reject_protocol_version: bool,
    reject_referral_policy: bool,
    reject_tls: bool,
    refuse_connections: bool,
    unreachable: bool,
    failing_filters: Vec<String>,
    operations: Vec<Operation>,
}

impl DirectoryState {
    fn find(&self, dn: &DistinguishedName) -> Option<usize> {
        self.entries.iter().position(|e| e.parsed == *dn)
    }

    fn find_str(&self, dn: &str) -> TransportResult<usize> {
        let parsed = parse_dn(dn)?;
        self.find(&parsed)
            .ok_or_else(|| TransportError::new(format!("No such object: {dn}")))
    }
}

/// Shared in-memory directory.
///
/// Cloning is cheap; clones share the same tree and operation log.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock()
    }

    /// Inserts an entry.
    ///
    /// ## Errors
    ///
    /// Fails if the DN is invalid or already present.
    pub fn insert(&self, dn: &str, attributes: &[(&str, &[&str])]) -> TransportResult<()> {
        let parsed = parse_dn(dn)?;
        let mut state = self.lock();
        if state.find(&parsed).is_some() {
            return Err(TransportError::new(format!("Already exists: {dn}")));
        }
        state.entries.push(StoredEntry {
            dn: dn.to_string(),
            parsed,
            attributes: attributes
                .iter()
                .map(|(name, values)| {
                    (
                        (*name).to_string(),
                        values.iter().map(|v| (*v).to_string()).collect(),
                    )
                })
                .collect(),
        });
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert); invalid entries are
    /// skipped with a warning.
    #[must_use]
    pub fn with_entry(self, dn: &str, attributes: &[(&str, &[&str])]) -> Self {
        if let Err(e) = self.insert(dn, attributes) {
            tracing::warn!(dn = %dn, error = %e, "Skipping in-memory directory entry");
        }
        self
    }

    /// Sets the bind password for `dn`.
    #[must_use]
    pub fn with_password(self, dn: &str, password: &str) -> Self {
        match parse_dn(dn) {
            Ok(parsed) => {
                self.lock()
                    .passwords
                    .insert(parsed.normalized(), password.to_string());
            }
            Err(e) => tracing::warn!(dn = %dn, error = %e, "Skipping in-memory password"),
        }
        self
    }

    /// Rejects anonymous and unauthenticated binds.
    #[must_use]
    pub fn deny_anonymous(self) -> Self {
        self.lock().deny_anonymous = true;
        self
    }

    /// Rejects protocol version changes.
    #[must_use]
    pub fn reject_protocol_version(self) -> Self {
        self.lock().reject_protocol_version = true;
        self
    }

    /// Rejects referral policy changes.
    #[must_use]
    pub fn reject_referral_policy(self) -> Self {
        self.lock().reject_referral_policy = true;
        self
    }

    /// Fails StartTLS.
    #[must_use]
    pub fn reject_tls(self) -> Self {
        self.lock().reject_tls = true;
        self
    }

    /// Fails `connect` itself.
    #[must_use]
    pub fn refuse_connections(self) -> Self {
        self.lock().refuse_connections = true;
        self
    }

    /// Accepts `connect` but fails every later operation, like a server
    /// that cannot be reached.
    #[must_use]
    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// Fails searches whose filter contains `fragment`.
    #[must_use]
    pub fn fail_searches_containing(self, fragment: &str) -> Self {
        self.lock().failing_filters.push(fragment.to_string());
        self
    }

    /// Opens a new connection handle.
    #[must_use]
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            directory: self.clone(),
            connected: false,
        }
    }

    /// Recorded operations, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// DNs of every recorded bind attempt (`None` for anonymous).
    #[must_use]
    pub fn bind_attempts(&self) -> Vec<Option<String>> {
        self.lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Bind { dn, .. } => Some(dn.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clears the operation log.
    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Reads an entry directly, bypassing the protocol.
    #[must_use]
    pub fn entry(&self, dn: &str) -> Option<RawEntry> {
        let state = self.lock();
        let index = state.find_str(dn).ok()?;
        Some(state.entries[index].project(&[]))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Checks whether the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

/// One connection to a [`MemoryDirectory`].
#[derive(Debug)]
pub struct MemoryTransport {
    directory: MemoryDirectory,
    connected: bool,
}

impl MemoryTransport {
    fn ready(&self) -> TransportResult<MutexGuard<'_, DirectoryState>> {
        if !self.connected {
            return Err(TransportError::new("Not connected"));
        }
        let state = self.directory.lock();
        if state.unreachable {
            return Err(TransportError::new("Can't contact LDAP server"));
        }
        Ok(state)
    }
}

impl DirectoryTransport for MemoryTransport {
    fn connect(&mut self, hosts: &str, port: u16) -> TransportResult<()> {
        let mut state = self.directory.lock();
        state.operations.push(Operation::Connect {
            hosts: hosts.to_string(),
            port,
        });
        if state.refuse_connections || hosts.trim().is_empty() {
            return Err(TransportError::new("Unable to create connection handle"));
        }
        self.connected = true;
        Ok(())
    }

    fn set_protocol_version(&mut self, version: u8) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::new("Not connected"));
        }
        let mut state = self.directory.lock();
        state.operations.push(Operation::SetProtocolVersion(version));
        if state.reject_protocol_version {
            return Err(TransportError::new("Protocol error"));
        }
        Ok(())
    }

    fn set_referral_policy(&mut self, follow: bool) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::new("Not connected"));
        }
        let mut state = self.directory.lock();
        state.operations.push(Operation::SetReferralPolicy { follow });
        if state.reject_referral_policy {
            return Err(TransportError::new("Protocol error"));
        }
        Ok(())
    }

    fn start_tls(&mut self) -> TransportResult<()> {
        let mut state = self.ready()?;
        state.operations.push(Operation::StartTls);
        if state.reject_tls {
            return Err(TransportError::new("Connect error: TLS handshake failed"));
        }
        Ok(())
    }

    fn bind(&mut self, dn: Option<&str>, password: Option<&str>) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::new("Not connected"));
        }
        let mut state = self.directory.lock();
        let dn = dn.filter(|d| !d.is_empty());
        let password = password.filter(|p| !p.is_empty());

        let outcome = if state.unreachable {
            Err(TransportError::new("Can't contact LDAP server"))
        } else {
            match (dn, password) {
                (Some(dn), Some(password)) => {
                    let key = parse_dn(dn)?.normalized();
                    match state.passwords.get(&key) {
                        Some(expected) if expected == password => Ok(()),
                        _ => Err(TransportError::new("Invalid credentials")),
                    }
                }
                _ if state.deny_anonymous => {
                    Err(TransportError::new("Unauthenticated bind not allowed"))
                }
                _ => Ok(()),
            }
        };

        state.operations.push(Operation::Bind {
            dn: dn.map(str::to_string),
            success: outcome.is_ok(),
        });
        outcome
    }

    fn search(
        &mut self,
        spec: &SearchSpec,
        visit: &mut dyn FnMut(RawEntry),
    ) -> TransportResult<()> {
        let matches = {
            let mut state = self.ready()?;
            state.operations.push(Operation::Search {
                base: spec.base.clone(),
                filter: spec.filter.clone(),
                scope: spec.scope,
            });

            if state.failing_filters.iter().any(|f| spec.filter.contains(f.as_str())) {
                return Err(TransportError::new("Operations error"));
            }

            let filter = Filter::parse(&spec.filter)?;
            let base = if spec.base.trim().is_empty() {
                None
            } else {
                let parsed = parse_dn(&spec.base)?;
                if state.find(&parsed).is_none() {
                    return Err(TransportError::new(format!("No such object: {}", spec.base)));
                }
                Some(parsed)
            };

            state
                .entries
                .iter()
                .filter(|entry| match (&base, spec.scope) {
                    (None, SearchScope::Subtree) => true,
                    (None, SearchScope::Base) => false,
                    (Some(base), SearchScope::Base) => entry.parsed == *base,
                    (Some(base), SearchScope::Subtree) => entry.parsed.is_under(base),
                })
                .filter(|entry| filter.matches(entry))
                .map(|entry| entry.project(&spec.attrs))
                .collect::<Vec<_>>()
        };

        for entry in matches {
            visit(entry);
        }
        Ok(())
    }

    fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> TransportResult<bool> {
        let mut state = self.ready()?;
        state.operations.push(Operation::Compare {
            dn: dn.to_string(),
            attribute: attribute.to_string(),
        });
        let index = state.find_str(dn)?;
        let entry = &state.entries[index];
        match entry.values(attribute) {
            Some(values) => Ok(values.iter().any(|v| values_equal(v, value))),
            None => Err(TransportError::new(format!(
                "No such attribute: {attribute}"
            ))),
        }
    }

    fn modify(&mut self, dn: &str, mods: &[Modification]) -> TransportResult<()> {
        let mut state = self.ready()?;
        state.operations.push(Operation::Modify { dn: dn.to_string() });
        let index = state.find_str(dn)?;

        // Apply to a copy so a failing modification leaves the entry untouched.
        let mut entry = state.entries[index].clone();
        for m in mods {
            let values = entry.values_mut(&m.attribute);
            match m.op {
                ModifyOp::Add => {
                    for v in &m.values {
                        if values.iter().any(|existing| values_equal(existing, v)) {
                            return Err(TransportError::new(format!(
                                "Type or value exists: {}",
                                m.attribute
                            )));
                        }
                        values.push(v.clone());
                    }
                }
                ModifyOp::Delete if m.values.is_empty() => {
                    if values.is_empty() {
                        return Err(TransportError::new(format!(
                            "No such attribute: {}",
                            m.attribute
                        )));
                    }
                    values.clear();
                }
                ModifyOp::Delete => {
                    for v in &m.values {
                        let before = values.len();
                        values.retain(|existing| !values_equal(existing, v));
                        if values.len() == before {
                            return Err(TransportError::new(format!(
                                "No such attribute value: {}",
                                m.attribute
                            )));
                        }
                    }
                }
                ModifyOp::Replace => *values = m.values.clone(),
            }
        }
        entry.attributes.retain(|(_, values)| !values.is_empty());
        state.entries[index] = entry;
        Ok(())
    }

    fn add(&mut self, dn: &str, attributes: &[RawAttribute]) -> TransportResult<()> {
        let mut state = self.ready()?;
        state.operations.push(Operation::Add { dn: dn.to_string() });
        let parsed = parse_dn(dn)?;
        if state.find(&parsed).is_some() {
            return Err(TransportError::new(format!("Already exists: {dn}")));
        }
        state.entries.push(StoredEntry {
            dn: dn.to_string(),
            parsed,
            attributes: attributes
                .iter()
                .filter(|a| !a.values.is_empty())
                .map(|a| (a.name.clone(), a.values.clone()))
                .collect(),
        });
        Ok(())
    }

    fn delete(&mut self, dn: &str) -> TransportResult<()> {
        let mut state = self.ready()?;
        state.operations.push(Operation::Delete { dn: dn.to_string() });
        let index = state.find_str(dn)?;
        let parsed = state.entries[index].parsed.clone();
        if state
            .entries
            .iter()
            .any(|e| e.parsed != parsed && e.parsed.is_under(&parsed))
        {
            return Err(TransportError::new(format!("Not allowed on non-leaf: {dn}")));
        }
        state.entries.remove(index);
        Ok(())
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> TransportResult<()> {
        let mut state = self.ready()?;
        let index = state.find_str(dn)?;
        let old = state.entries[index].parsed.clone();

        let parent = match new_parent {
            Some(parent) => Some(parent.to_string()),
            None => old.parent().map(|p| p.to_string()),
        };
        let new_dn = match parent {
            Some(parent) => format!("{new_rdn},{parent}"),
            None => new_rdn.to_string(),
        };
        state.operations.push(Operation::Rename {
            dn: dn.to_string(),
            new_dn: new_dn.clone(),
        });

        let parsed = parse_dn(&new_dn)?;
        if state.find(&parsed).is_some() {
            return Err(TransportError::new(format!("Already exists: {new_dn}")));
        }

        let entry = &mut state.entries[index];
        if delete_old_rdn {
            if let Some((attr, value)) = rdn_pair(entry.dn.split(',').next().unwrap_or_default()) {
                entry
                    .values_mut(&attr)
                    .retain(|existing| !values_equal(existing, &value));
            }
        }
        if let Some((attr, value)) = rdn_pair(new_rdn) {
            let values = entry.values_mut(&attr);
            if !values.iter().any(|existing| values_equal(existing, &value)) {
                values.push(value);
            }
        }
        entry.attributes.retain(|(_, values)| !values.is_empty());
        entry.dn = new_dn;
        entry.parsed = parsed;
        Ok(())
    }

    fn close(&mut self) {
        if self.connected {
            self.directory.lock().operations.push(Operation::Close);
        }
        self.connected = false;
    }
}

fn parse_dn(dn: &str) -> TransportResult<DistinguishedName> {
    DistinguishedName::parse(dn).map_err(|_| TransportError::new(format!("Invalid DN syntax: {dn}")))
}

fn rdn_pair(rdn: &str) -> Option<(String, String)> {
    let (attr, value) = rdn.split_once('=')?;
    Some((attr.trim().to_string(), value.trim().to_string()))
}

/// Case-insensitive value match; DN-shaped values compare as DNs.
fn values_equal(stored: &str, asserted: &str) -> bool {
    if stored.eq_ignore_ascii_case(asserted) || stored.to_lowercase() == asserted.to_lowercase() {
        return true;
    }
    match (
        DistinguishedName::parse(stored),
        DistinguishedName::parse(asserted),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ============================================================================
// Filter evaluation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equality(String, String),
    Substring(String, Vec<String>),
}

impl Filter {
    fn parse(input: &str) -> TransportResult<Self> {
        let trimmed = input.trim();
        let text = if trimmed.starts_with('(') {
            trimmed.to_string()
        } else {
            format!("({trimmed})")
        };

        let mut parser = FilterParser {
            input: text.as_bytes(),
            pos: 0,
        };
        let filter = parser.parse()?;
        if parser.pos != parser.input.len() {
            return Err(bad_filter(input));
        }
        Ok(filter)
    }

    fn matches(&self, entry: &StoredEntry) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Self::Not(filter) => !filter.matches(entry),
            Self::Present(attr) if attr.eq_ignore_ascii_case("objectclass") => true,
            Self::Present(attr) => !entry.filter_values(attr).is_empty(),
            Self::Equality(attr, value) => entry
                .filter_values(attr)
                .iter()
                .any(|v| values_equal(v, value)),
            Self::Substring(attr, pieces) => entry
                .filter_values(attr)
                .iter()
                .any(|v| substring_match(&v.to_lowercase(), pieces)),
        }
    }
}

/// `pieces` are the lower-cased fragments between `*`s; the first must
/// be a prefix, the last a suffix, the rest must appear in order.
fn substring_match(value: &str, pieces: &[String]) -> bool {
    let Some((first, rest)) = pieces.split_first() else {
        return true;
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for piece in middle {
        match remaining.find(piece.as_str()) {
            Some(at) => remaining = &remaining[at + piece.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

fn bad_filter(input: &str) -> TransportError {
    TransportError::new(format!("Bad search filter: {input}"))
}

struct FilterParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl FilterParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> TransportResult<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn error(&self) -> TransportError {
        bad_filter(&String::from_utf8_lossy(self.input))
    }

    fn parse(&mut self) -> TransportResult<Filter> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse()?))
            }
            _ => self.parse_item()?,
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> TransportResult<Vec<Filter>> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.parse()?);
        }
        if filters.is_empty() {
            return Err(self.error());
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> TransportResult<Filter> {
        let start = self.pos;
        while !matches!(self.peek(), Some(b'=' | b')' | b'(') | None) {
            self.pos += 1;
        }
        let attr = String::from_utf8_lossy(&self.input[start..self.pos])
            .trim()
            .to_string();
        if attr.is_empty() || attr.ends_with(['<', '>', '~', ':']) {
            return Err(self.error());
        }
        self.expect(b'=')?;

        let value_start = self.pos;
        while !matches!(self.peek(), Some(b')' | b'(') | None) {
            self.pos += 1;
        }
        let raw = &self.input[value_start..self.pos];

        if raw == b"*" {
            return Ok(Filter::Present(attr));
        }
        if raw.contains(&b'*') {
            let pieces = raw
                .split(|b| *b == b'*')
                .map(|piece| self.unescape(piece).map(|p| p.to_lowercase()))
                .collect::<TransportResult<Vec<_>>>()?;
            return Ok(Filter::Substring(attr, pieces));
        }
        Ok(Filter::Equality(attr, self.unescape(raw)?))
    }

    fn unescape(&self, raw: &[u8]) -> TransportResult<String> {
        let mut bytes = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'\\' {
                let hex = raw
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| self.error())?;
                bytes.push(hex);
                i += 3;
            } else {
                bytes.push(raw[i]);
                i += 1;
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
