//! Escaping of untrusted values for LDAP filters and DNs.
//!
//! Every value that comes from a user (a username typed on a login form,
//! an attribute value read back from the directory) must go through
//! [`escape`] before it is placed in a filter or DN template.

use std::net::Ipv4Addr;

/// Where an escaped value will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMode {
    /// Filter assertion value (RFC 2254).
    Filter,
    /// Distinguished name component (RFC 2253).
    Dn,
}

impl EscapeMode {
    const fn is_special(self, c: char) -> bool {
        match self {
            Self::Filter => matches!(c, '*' | '(' | ')' | '\\' | '\0'),
            Self::Dn => matches!(c, ',' | '=' | '+' | '<' | '>' | ';' | '\\' | '"' | '#'),
        }
    }
}

/// Escapes `value` for use in the given context.
///
/// Each special character becomes `\` followed by its two-digit lowercase
/// hex code. Everything else is left alone.
#[must_use]
pub fn escape(value: &str, mode: EscapeMode) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        if mode.is_special(c) {
            result.push_str(&format!("\\{:02x}", c as u32));
        } else {
            result.push(c);
        }
    }
    result
}

/// Builds a compound filter.
///
/// Each sub-filter is escaped for filter use and wrapped in parentheses;
/// with an operator (`&`, `|`, `!`) the concatenation is wrapped again as
/// `(<op>...)`. Returns `None` when there are no sub-filters.
#[must_use]
pub fn build_filter<S: AsRef<str>>(sub_filters: &[S], operator: Option<&str>) -> Option<String> {
    if sub_filters.is_empty() {
        return None;
    }

    let body: String = sub_filters
        .iter()
        .map(|f| format!("({})", escape(f.as_ref(), EscapeMode::Filter)))
        .collect();

    Some(match operator {
        Some(op) => format!("({op}{body})"),
        None => body,
    })
}

/// Converts an IPv4 address to the eDirectory `networkAddress` form
/// (`1#` followed by each octet as an escaped hex byte).
#[must_use]
pub fn ip_to_net_address(addr: Ipv4Addr) -> String {
    let mut address = String::from("1#");
    for octet in addr.octets() {
        address.push_str(&format!("\\{octet:02x}"));
    }
    address
}
