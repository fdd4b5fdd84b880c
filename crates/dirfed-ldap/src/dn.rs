//! Distinguished name parsing and comparison.
//!
//! A DN is an ordered list of RDNs, most specific first. Parsing follows
//! RFC 4514 closely enough for comparison purposes: unescaped commas
//! separate RDNs, `\` escapes a special character or introduces two hex
//! digits, and double-quoted values are honoured. Each RDN keeps its
//! original text and a normalized form (unescaped, lower-cased) used for
//! case-insensitive comparison.

use std::fmt;
use std::str::FromStr;

use crate::error::{LdapError, LdapResult};

/// One relative distinguished name component, e.g. `cn=alice`.
#[derive(Debug, Clone)]
pub struct Rdn {
    raw: String,
    normalized: String,
}

impl Rdn {
    /// Original text of the component, trimmed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Unescaped, lower-cased form used for comparison.
    #[must_use]
    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Rdn {}

/// A parsed distinguished name.
///
/// Equality is component-wise and case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    /// Parses a DN.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::Validation` for an empty DN, an RDN without an
    /// attribute type, a dangling escape or an unterminated quote.
    pub fn parse(input: &str) -> LdapResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LdapError::validation("empty distinguished name"));
        }

        let mut rdns = Vec::new();
        let mut current = String::new();
        let mut chars = trimmed.chars();
        let mut in_quotes = false;

        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let Some(next) = chars.next() else {
                        return Err(invalid(input, "dangling escape"));
                    };
                    current.push(c);
                    current.push(next);
                }
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
                ',' if !in_quotes => {
                    rdns.push(parse_rdn(input, &current)?);
                    current.clear();
                }
                _ => current.push(c),
            }
        }

        if in_quotes {
            return Err(invalid(input, "unterminated quote"));
        }
        rdns.push(parse_rdn(input, &current)?);

        Ok(Self { rdns })
    }

    /// The RDN components, most specific first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Number of RDN components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    /// Always false: a parsed DN has at least one component.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Checks whether `self` is a left-anchored prefix of `other`.
    ///
    /// Every component of `self` must equal the component of `other` at
    /// the same position; `self` may not be longer than `other`.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        !self.rdns.is_empty()
            && self.rdns.len() <= other.rdns.len()
            && self.rdns.iter().zip(&other.rdns).all(|(a, b)| a == b)
    }

    /// Checks whether `self` equals `base` or lies below it.
    #[must_use]
    pub fn is_under(&self, base: &Self) -> bool {
        self.rdns.len() >= base.rdns.len()
            && self.rdns[self.rdns.len() - base.rdns.len()..] == base.rdns[..]
    }

    /// Parent DN, if this DN has more than one component.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.rdns.len() > 1).then(|| Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// Canonical comparison key: normalized components joined by `,`.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::normalized)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromStr for DistinguishedName {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&rdn.raw)?;
        }
        Ok(())
    }
}

/// Compares a rule DN against a group DN, both given as component lists.
///
/// Returns true when `source` is a left-anchored, case-insensitive prefix
/// of `compare`. Either side empty, or `source` longer than `compare`,
/// never matches.
#[must_use]
pub fn compare_dn<A, B>(source: &[A], compare: &[B]) -> bool
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    if source.is_empty() || compare.is_empty() || source.len() > compare.len() {
        return false;
    }

    source
        .iter()
        .zip(compare)
        .all(|(s, c)| normalize(s.as_ref()) == normalize(c.as_ref()))
}

fn invalid(input: &str, reason: &str) -> LdapError {
    LdapError::validation(format!("invalid distinguished name '{input}': {reason}"))
}

fn parse_rdn(input: &str, component: &str) -> LdapResult<Rdn> {
    let raw = component.trim();
    let type_end = unescaped_equals(raw).ok_or_else(|| invalid(input, "missing '=' in RDN"))?;
    if raw[..type_end].trim().is_empty() {
        return Err(invalid(input, "missing attribute type"));
    }

    Ok(Rdn {
        raw: raw.to_string(),
        normalized: normalize(raw),
    })
}

fn unescaped_equals(component: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in component.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '=' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Unescapes `\XX` hex pairs and `\c` escapes, strips quotes and spaces
/// around `=`, and lower-cases the result.
fn normalize(component: &str) -> String {
    let mut bytes = Vec::with_capacity(component.len());
    let mut chars = component.trim().chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let Some(first) = chars.next() else { break };
                match (first.to_digit(16), chars.peek().and_then(|n| n.to_digit(16))) {
                    (Some(hi), Some(lo)) => {
                        chars.next();
                        // Both digits are < 16, so the value fits in a byte.
                        bytes.push(u8::try_from(hi * 16 + lo).unwrap_or_default());
                    }
                    _ => push_char(&mut bytes, first),
                }
            }
            '"' => {}
            _ => push_char(&mut bytes, c),
        }
    }

    let text = String::from_utf8_lossy(&bytes).to_lowercase();
    match text.split_once('=') {
        Some((attr, value)) => format!("{}={}", attr.trim(), value.trim()),
        None => text,
    }
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}
