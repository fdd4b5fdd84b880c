//! Directory transport over the synchronous `ldap3` client.
//!
//! `connect` only validates and records the host list. The TCP connection
//! is opened on StartTLS or on the first operation, trying each host in
//! order, so an unreachable server surfaces as a bind or search failure.
//!
//! `ldap3` speaks protocol version 3 only and does not chase referrals.
//! Search references are logged when referrals are enabled and dropped
//! silently otherwise; they never reach the result set.

use std::collections::HashSet;
use std::time::Duration;

use ldap3::asn1::{StructureTag, PL};
use ldap3::{LdapConn, LdapConnSettings, Mod, ResultEntry, Scope};
use url::Url;

use crate::config::DirectoryConfig;
use crate::transport::{
    DirectoryTransport, Modification, ModifyOp, RawAttribute, RawEntry, SearchScope, SearchSpec,
    TransportError, TransportResult,
};

/// `ldap3`-backed transport.
pub struct Ldap3Transport {
    urls: Vec<Url>,
    timeout: Duration,
    starttls: bool,
    follow_referrals: bool,
    conn: Option<LdapConn>,
}

impl std::fmt::Debug for Ldap3Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3Transport")
            .field("urls", &self.urls.iter().map(Url::as_str).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("starttls", &self.starttls)
            .field("follow_referrals", &self.follow_referrals)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl Ldap3Transport {
    /// Creates an unconnected transport.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            urls: Vec::new(),
            timeout,
            starttls: false,
            follow_referrals: true,
            conn: None,
        }
    }

    /// Creates a transport using the configured connect timeout.
    #[must_use]
    pub const fn from_config(config: &DirectoryConfig) -> Self {
        Self::new(config.connect_timeout())
    }

    /// Server URLs recorded by `connect`.
    #[must_use]
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// StartTLS only applies to plain `ldap://` URLs.
    fn wants_starttls(&self, url: &Url) -> bool {
        self.starttls && url.scheme() == "ldap"
    }

    fn open(&mut self) -> TransportResult<&mut LdapConn> {
        if self.conn.is_none() {
            if self.urls.is_empty() {
                return Err(TransportError::new("Not connected"));
            }

            let mut last_error = String::from("Can't contact LDAP server");
            for url in &self.urls {
                let settings = LdapConnSettings::new()
                    .set_conn_timeout(self.timeout)
                    .set_starttls(self.wants_starttls(url));

                match LdapConn::with_settings(settings, url.as_str()) {
                    Ok(conn) => {
                        tracing::debug!(url = %url, starttls = self.starttls, "Directory connection opened");
                        self.conn = Some(conn);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Directory host unavailable");
                        last_error = e.to_string();
                    }
                }
            }

            if self.conn.is_none() {
                return Err(TransportError::new(last_error));
            }
        }

        self.conn
            .as_mut()
            .ok_or_else(|| TransportError::new("Not connected"))
    }
}

/// Turns a host entry into a server URL.
fn parse_host(host: &str, port: u16) -> TransportResult<Url> {
    let url = if host.contains("://") {
        Url::parse(host)
    } else {
        Url::parse(&format!("ldap://{host}:{port}"))
    }
    .map_err(|e| TransportError::new(format!("invalid host '{host}': {e}")))?;

    if !matches!(url.scheme(), "ldap" | "ldaps") || url.host_str().map_or(true, str::is_empty) {
        return Err(TransportError::new(format!("invalid host '{host}'")));
    }
    Ok(url)
}

fn transport_error(e: ldap3::LdapError) -> TransportError {
    TransportError::new(e.to_string())
}

/// One message from a search stream.
#[derive(Debug, PartialEq, Eq)]
enum StreamItem {
    Entry(RawEntry),
    Referral(Vec<String>),
    Intermediate,
    Malformed,
}

const TAG_SEARCH_ENTRY: u64 = 4;

/// Classifies a stream message and decodes entries, keeping attributes in
/// server order. Values that are not UTF-8 are skipped.
fn convert_entry(entry: ResultEntry) -> StreamItem {
    if entry.is_ref() {
        return StreamItem::Referral(referral_urls(entry.0));
    }
    if entry.is_intermediate() {
        return StreamItem::Intermediate;
    }
    decode_entry(entry.0).map_or(StreamItem::Malformed, StreamItem::Entry)
}

fn decode_entry(tag: StructureTag) -> Option<RawEntry> {
    let mut parts = tag.match_id(TAG_SEARCH_ENTRY)?.expect_constructed()?.into_iter();
    let dn = String::from_utf8(parts.next()?.expect_primitive()?).ok()?;

    let mut attributes = Vec::new();
    for attr in parts.next()?.expect_constructed()? {
        let mut attr = attr.expect_constructed()?.into_iter();
        let name = String::from_utf8(attr.next()?.expect_primitive()?).ok()?;
        let values = attr
            .next()?
            .expect_constructed()?
            .into_iter()
            .filter_map(StructureTag::expect_primitive)
            .filter_map(|v| String::from_utf8(v).ok())
            .collect();
        attributes.push(RawAttribute::new(name, values));
    }
    Some(RawEntry { dn, attributes })
}

fn referral_urls(tag: StructureTag) -> Vec<String> {
    match tag.payload {
        PL::C(urls) => urls
            .into_iter()
            .filter_map(StructureTag::expect_primitive)
            .filter_map(|v| String::from_utf8(v).ok())
            .collect(),
        PL::P(_) => Vec::new(),
    }
}

fn value_set(values: &[String]) -> HashSet<String> {
    values.iter().cloned().collect()
}

impl DirectoryTransport for Ldap3Transport {
    fn connect(&mut self, hosts: &str, port: u16) -> TransportResult<()> {
        let urls = hosts
            .split_whitespace()
            .map(|host| parse_host(host, port))
            .collect::<TransportResult<Vec<_>>>()?;
        if urls.is_empty() {
            return Err(TransportError::new("no host configured"));
        }

        self.close();
        self.urls = urls;
        Ok(())
    }

    fn set_protocol_version(&mut self, version: u8) -> TransportResult<()> {
        if version == 3 {
            Ok(())
        } else {
            Err(TransportError::new(format!(
                "Protocol version {version} is not supported"
            )))
        }
    }

    fn set_referral_policy(&mut self, follow: bool) -> TransportResult<()> {
        self.follow_referrals = follow;
        Ok(())
    }

    fn start_tls(&mut self) -> TransportResult<()> {
        if self.conn.is_some() {
            return Err(TransportError::new(
                "StartTLS must be negotiated before the first operation",
            ));
        }
        self.starttls = true;
        self.open().map(|_| ())
    }

    fn bind(&mut self, dn: Option<&str>, password: Option<&str>) -> TransportResult<()> {
        let conn = self.open()?;
        conn.simple_bind(dn.unwrap_or_default(), password.unwrap_or_default())
            .map_err(transport_error)?
            .success()
            .map_err(transport_error)?;
        Ok(())
    }

    fn search(
        &mut self,
        spec: &SearchSpec,
        visit: &mut dyn FnMut(RawEntry),
    ) -> TransportResult<()> {
        let scope = match spec.scope {
            SearchScope::Base => Scope::Base,
            SearchScope::Subtree => Scope::Subtree,
        };
        let follow_referrals = self.follow_referrals;
        let conn = self.open()?;
        let mut stream = conn
            .streaming_search(&spec.base, scope, &spec.filter, spec.attrs.clone())
            .map_err(transport_error)?;

        while let Some(entry) = stream.next().map_err(transport_error)? {
            match convert_entry(entry) {
                StreamItem::Entry(raw) => visit(raw),
                StreamItem::Referral(urls) if follow_referrals => {
                    tracing::debug!(base = %spec.base, urls = ?urls, "Search referral not chased");
                }
                StreamItem::Referral(_) => {}
                StreamItem::Intermediate => {
                    tracing::debug!(base = %spec.base, "Intermediate search message skipped");
                }
                StreamItem::Malformed => {
                    tracing::debug!(base = %spec.base, "Undecodable search entry skipped");
                }
            }
        }

        stream.result().success().map_err(transport_error)?;
        Ok(())
    }

    fn compare(&mut self, dn: &str, attribute: &str, value: &str) -> TransportResult<bool> {
        let conn = self.open()?;
        conn.compare(dn, attribute, value)
            .map_err(transport_error)?
            .equal()
            .map_err(transport_error)
    }

    fn modify(&mut self, dn: &str, mods: &[Modification]) -> TransportResult<()> {
        let mods: Vec<Mod<String>> = mods
            .iter()
            .map(|m| {
                let values = value_set(&m.values);
                match m.op {
                    ModifyOp::Add => Mod::Add(m.attribute.clone(), values),
                    ModifyOp::Delete => Mod::Delete(m.attribute.clone(), values),
                    ModifyOp::Replace => Mod::Replace(m.attribute.clone(), values),
                }
            })
            .collect();

        let conn = self.open()?;
        conn.modify(dn, mods)
            .map_err(transport_error)?
            .success()
            .map_err(transport_error)?;
        Ok(())
    }

    fn add(&mut self, dn: &str, attributes: &[RawAttribute]) -> TransportResult<()> {
        let attrs: Vec<(String, HashSet<String>)> = attributes
            .iter()
            .map(|a| (a.name.clone(), value_set(&a.values)))
            .collect();

        let conn = self.open()?;
        conn.add(dn, attrs)
            .map_err(transport_error)?
            .success()
            .map_err(transport_error)?;
        Ok(())
    }

    fn delete(&mut self, dn: &str) -> TransportResult<()> {
        let conn = self.open()?;
        conn.delete(dn)
            .map_err(transport_error)?
            .success()
            .map_err(transport_error)?;
        Ok(())
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> TransportResult<()> {
        let conn = self.open()?;
        conn.modifydn(dn, new_rdn, delete_old_rdn, new_parent)
            .map_err(transport_error)?
            .success()
            .map_err(transport_error)?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.unbind() {
                tracing::debug!(error = %e, "Unbind failed");
            }
        }
    }
}

impl Drop for Ldap3Transport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use ldap3::asn1::TagClass;

    use super::*;

    fn transport() -> Ldap3Transport {
        Ldap3Transport::new(Duration::from_secs(1))
    }

    #[test]
    fn bare_hosts_get_the_port() {
        let mut t = transport();
        t.connect("ldap1.example.com  ldap2.example.com", 10389).unwrap();

        let urls: Vec<&str> = t.urls().iter().map(Url::as_str).collect();
        assert_eq!(urls, ["ldap://ldap1.example.com:10389", "ldap://ldap2.example.com:10389"]);
    }

    #[test]
    fn urls_are_kept() {
        let mut t = transport();
        t.connect("ldaps://dir.example.com:636", 389).unwrap();
        assert_eq!(t.urls()[0].scheme(), "ldaps");
        assert_eq!(t.urls()[0].port(), Some(636));
    }

    #[test]
    fn invalid_hosts_are_rejected() {
        let mut t = transport();
        assert!(t.connect("", 389).is_err());
        assert!(t.connect("http://example.com", 389).is_err());
        assert!(t.connect("ldap://", 389).is_err());
    }

    #[test]
    fn only_version_three() {
        let mut t = transport();
        assert!(t.set_protocol_version(3).is_ok());
        let err = t.set_protocol_version(2).unwrap_err();
        assert!(err.message().contains("version 2"));
    }

    #[test]
    fn starttls_only_on_plain_urls() {
        let mut t = transport();
        let plain = Url::parse("ldap://dir.example.com:389").unwrap();
        let secure = Url::parse("ldaps://dir.example.com:636").unwrap();
        assert!(!t.wants_starttls(&plain));

        t.starttls = true;
        assert!(t.wants_starttls(&plain));
        assert!(!t.wants_starttls(&secure));
    }

    #[test]
    fn referral_policy_is_recorded() {
        let mut t = transport();
        assert!(t.follow_referrals);
        t.set_referral_policy(false).unwrap();
        assert!(!t.follow_referrals);
    }

    fn octets(value: &str) -> StructureTag {
        StructureTag {
            class: TagClass::Universal,
            id: 4,
            payload: PL::P(value.as_bytes().to_vec()),
        }
    }

    fn constructed(class: TagClass, id: u64, inner: Vec<StructureTag>) -> StructureTag {
        StructureTag {
            class,
            id,
            payload: PL::C(inner),
        }
    }

    fn attribute(name: &str, values: &[&str]) -> StructureTag {
        constructed(
            TagClass::Universal,
            16,
            vec![
                octets(name),
                constructed(TagClass::Universal, 17, values.iter().map(|v| octets(v)).collect()),
            ],
        )
    }

    #[test]
    fn search_entry_keeps_server_order() {
        let tag = constructed(
            TagClass::Application,
            4,
            vec![
                octets("uid=jdoe,ou=people,dc=example,dc=org"),
                constructed(
                    TagClass::Universal,
                    16,
                    vec![
                        attribute("uid", &["jdoe"]),
                        attribute("mail", &["jdoe@example.org", "john@example.org"]),
                    ],
                ),
            ],
        );

        let StreamItem::Entry(raw) = convert_entry(ResultEntry::new(tag)) else {
            panic!("expected an entry");
        };
        assert_eq!(raw.dn, "uid=jdoe,ou=people,dc=example,dc=org");
        let names: Vec<&str> = raw.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["uid", "mail"]);
        assert_eq!(raw.attributes[1].count, 2);
    }

    #[test]
    fn non_utf8_values_are_skipped() {
        let binary = StructureTag {
            class: TagClass::Universal,
            id: 4,
            payload: PL::P(vec![0xff, 0xfe]),
        };
        let photo = constructed(
            TagClass::Universal,
            16,
            vec![octets("jpegPhoto"), constructed(TagClass::Universal, 17, vec![binary])],
        );
        let tag = constructed(
            TagClass::Application,
            4,
            vec![octets("cn=x,dc=org"), constructed(TagClass::Universal, 16, vec![photo])],
        );

        let StreamItem::Entry(raw) = convert_entry(ResultEntry::new(tag)) else {
            panic!("expected an entry");
        };
        assert!(raw.attributes[0].values.is_empty());
    }

    #[test]
    fn search_reference_is_not_an_entry() {
        let tag = constructed(
            TagClass::Application,
            19,
            vec![octets("ldap://ForestDnsZones.example.org/DC=ForestDnsZones,DC=example,DC=org")],
        );
        let entry = ResultEntry::new(tag);
        assert!(entry.is_ref());

        assert_eq!(
            convert_entry(entry),
            StreamItem::Referral(vec![
                "ldap://ForestDnsZones.example.org/DC=ForestDnsZones,DC=example,DC=org".to_string()
            ])
        );
    }

    #[test]
    fn intermediate_and_malformed_messages() {
        let intermediate = constructed(TagClass::Application, 25, vec![octets("1.3.6.1.4.1.4203.1.9.1.4")]);
        assert_eq!(convert_entry(ResultEntry::new(intermediate)), StreamItem::Intermediate);

        let truncated = constructed(TagClass::Application, 4, vec![octets("cn=x,dc=org")]);
        assert_eq!(convert_entry(ResultEntry::new(truncated)), StreamItem::Malformed);
    }

    #[test]
    fn operations_need_connect() {
        let mut t = transport();
        let err = t.bind(None, None).unwrap_err();
        assert_eq!(err.message(), "Not connected");
        t.close();
    }
}
