//! # dirfed-ldap
//!
//! LDAP directory federation.
//!
//! This crate resolves a login name to a directory entry, discovers the
//! groups the entry belongs to and reconciles them against local roles:
//!
//! - **Directory access**: [`DirectoryClient`] over a [`DirectoryTransport`]
//!   ([`Ldap3Transport`] for real servers, [`memory::MemoryDirectory`] for
//!   tests), with results exposed as a [`ResultSet`]
//! - **User resolution**: [`UserResolver`] (filtered search or DN templates,
//!   optional credential check)
//! - **Group discovery**: [`GroupResolver`] (forward or reverse lookup,
//!   nested group expansion)
//! - **Role mapping**: [`MappingEngine`], built per login
//! - **Login**: [`LdapLoginProvider`] and the directory SSO implementations
//!
//! All directory calls block the calling thread.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod dn;
pub mod error;
pub mod escape;
pub mod groups;
pub mod ldap3_transport;
pub mod mapper;
pub mod mapping;
pub mod memory;
pub mod provider;
pub mod resolver;
pub mod result;
pub mod sso;
pub mod transport;

pub use client::{with_connection, AttributeValues, DirectoryClient, MATCH_ALL_FILTER};
pub use config::{
    DirectoryConfig, DirectoryConfigBuilder, LookupType, MappingConfig, MappingConfigBuilder,
    RemovalPolicy, USERNAME_PLACEHOLDER,
};
pub use dn::{compare_dn, DistinguishedName, Rdn};
pub use error::{LdapError, LdapResult};
pub use escape::{build_filter, escape, ip_to_net_address, EscapeMode};
pub use groups::{DetailOptions, GroupLookup, GroupResolver, UserDetails};
pub use ldap3_transport::Ldap3Transport;
pub use mapper::AttributeSync;
pub use mapping::{ManagedRoleSet, MappingEngine, RoleMappingRule, RoleReconciliation};
pub use provider::LdapLoginProvider;
pub use resolver::{DnResolution, UserResolver};
pub use result::{Attribute, Entry, ResultSet};
pub use sso::{DirectorySsoAuthenticator, NetworkAddressDetector};
pub use transport::{
    DirectoryTransport, Modification, ModifyOp, RawAttribute, RawEntry, SearchScope, SearchSpec,
    TransportError, TransportFactory, TransportResult,
};
