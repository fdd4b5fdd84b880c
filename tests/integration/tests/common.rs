//! Common test utilities and fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use dirfed_federation::{InMemoryIdentityStore, Role, RoleId, StaticRoleCatalog};
use dirfed_ldap::memory::{MemoryDirectory, MemoryTransport};
use dirfed_ldap::{
    DirectoryConfig, LdapLoginProvider, LookupType, MappingConfig, MappingConfigBuilder,
    RemovalPolicy,
};

pub const BASE_DN: &str = "dc=example,dc=org";
pub const SERVICE_DN: &str = "cn=svc,ou=system,dc=example,dc=org";
pub const SERVICE_PASSWORD: &str = "svcpass";

pub const JDOE_DN: &str = "uid=jdoe,ou=people,dc=example,dc=org";
pub const ASMITH_DN: &str = "uid=asmith,ou=people,dc=example,dc=org";
pub const BOB_DN: &str = "uid=bob,ou=people,dc=example,dc=org";

pub const DEVELOPERS: &str = "cn=developers,ou=groups,dc=example,dc=org";
pub const STAFF: &str = "cn=staff,ou=groups,dc=example,dc=org";
pub const ADMINS: &str = "cn=admins,ou=groups,dc=example,dc=org";

pub const PUBLIC: RoleId = 1;
pub const REGISTERED: RoleId = 2;
pub const DEVELOPER: RoleId = 3;
pub const STAFF_ROLE: RoleId = 4;
pub const ADMINISTRATOR: RoleId = 5;
pub const AUDITOR: RoleId = 6;

/// Rule list used by most tests.
pub const GROUP_MAP: &str = "\
cn=developers,ou=groups,dc=example,dc=org:3
cn=staff,ou=groups,dc=example,dc=org:4
cn=admins,ou=groups,dc=example,dc=org:5";

pub type TestFactory = Box<dyn Fn() -> MemoryTransport + Send + Sync>;
pub type TestProvider = LdapLoginProvider<TestFactory>;

/// Initialises tracing once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dirfed_ldap=debug,dirfed_federation=debug")
        .with_test_writer()
        .try_init();
}

/// Sample directory: three people, nested groups (`developers` and
/// `admins` are members of `staff`) and a service account.
///
/// `jdoe_groups` sets jdoe's direct memberships on both sides of the
/// relationship, so forward and reverse lookups agree.
pub fn sample_directory(jdoe_groups: &[&str]) -> MemoryDirectory {
    let developers_members: Vec<&str> = if jdoe_groups.contains(&DEVELOPERS) {
        vec![JDOE_DN]
    } else {
        Vec::new()
    };
    let mut admins_members = vec![ASMITH_DN];
    if jdoe_groups.contains(&ADMINS) {
        admins_members.push(JDOE_DN);
    }

    let jdoe: [(&str, &[&str]); 5] = [
        ("uid", &["jdoe"]),
        ("fullName", &["John Doe"]),
        ("mail", &["jdoe@example.org"]),
        ("networkAddress", &["1#ABCD"]),
        ("groupMembership", jdoe_groups),
    ];
    let developers: [(&str, &[&str]); 3] = [
        ("cn", &["developers"]),
        ("member", &developers_members),
        ("groupMembership", &[STAFF]),
    ];
    let admins: [(&str, &[&str]); 3] = [
        ("cn", &["admins"]),
        ("member", &admins_members),
        ("groupMembership", &[STAFF]),
    ];
    let staff: [(&str, &[&str]); 2] = [("cn", &["staff"]), ("member", &[DEVELOPERS, ADMINS])];

    MemoryDirectory::new()
        .with_entry(BASE_DN, &[("objectClass", &["domain"])])
        .with_entry("ou=system,dc=example,dc=org", &[])
        .with_entry("ou=people,dc=example,dc=org", &[])
        .with_entry("ou=groups,dc=example,dc=org", &[])
        .with_entry(SERVICE_DN, &[("cn", &["svc"])])
        .with_entry(JDOE_DN, &jdoe)
        .with_entry(
            ASMITH_DN,
            &[
                ("uid", &["asmith"]),
                ("fullName", &["Alice Smith"]),
                ("mail", &["asmith@example.org"]),
                ("groupMembership", &[ADMINS]),
            ],
        )
        .with_entry(BOB_DN, &[("uid", &["bob"]), ("fullName", &["Bob Brown"])])
        .with_entry(DEVELOPERS, &developers)
        .with_entry(ADMINS, &admins)
        .with_entry(STAFF, &staff)
        .with_password(SERVICE_DN, SERVICE_PASSWORD)
        .with_password(JDOE_DN, "secret")
        .with_password(ASMITH_DN, "hunter2")
        .with_password(BOB_DN, "builder")
}

/// Search-based resolution through the service account.
pub fn search_config() -> DirectoryConfig {
    DirectoryConfig::builder()
        .host("ldap.example.org")
        .use_ldap_v3(true)
        .use_search(true)
        .base_dn(BASE_DN)
        .user_qry("(uid=[username])")
        .connect_username(SERVICE_DN)
        .connect_password(SERVICE_PASSWORD)
        .build()
        .expect("valid directory config")
}

/// Mapping with additions, removal of rule-managed roles, nested group
/// expansion and the auditor role left alone.
pub fn mapping_builder() -> MappingConfigBuilder {
    MappingConfig::builder()
        .group_map_enabled(true)
        .group_map_addition(true)
        .group_map_removal(RemovalPolicy::Yes)
        .group_map_unmanage("6")
        .group_map_public(PUBLIC)
        .group_map_list(GROUP_MAP)
        .lookup_type(LookupType::Forward)
        .lookup_attribute("groupMembership")
        .recursive(true)
        .sync_name(true)
        .sync_email(true)
        .default_role(REGISTERED)
}

pub fn catalog() -> StaticRoleCatalog {
    StaticRoleCatalog::new(vec![
        Role::new(PUBLIC, "Public"),
        Role::new(REGISTERED, "Registered"),
        Role::new(DEVELOPER, "Developer"),
        Role::new(STAFF_ROLE, "Staff"),
        Role::new(ADMINISTRATOR, "Administrator"),
        Role::new(AUDITOR, "Auditor"),
    ])
}

pub fn factory(dir: &MemoryDirectory) -> TestFactory {
    let dir = dir.clone();
    Box::new(move || dir.transport())
}

/// Test environment: a directory, an identity store and a provider wired
/// to both.
pub struct TestEnv {
    pub directory: MemoryDirectory,
    pub store: Arc<InMemoryIdentityStore>,
    pub provider: TestProvider,
}

impl TestEnv {
    /// Search-based environment with the default mapping.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_configs(
            sample_directory(&[DEVELOPERS]),
            search_config(),
            mapping_builder().build()?,
        )
    }

    pub fn with_configs(
        directory: MemoryDirectory,
        config: DirectoryConfig,
        mapping: MappingConfig,
    ) -> anyhow::Result<Self> {
        Self::with_store(directory, config, mapping, Arc::new(InMemoryIdentityStore::new()))
    }

    /// Environment sharing an existing store, for logins across directory
    /// changes.
    pub fn with_store(
        directory: MemoryDirectory,
        config: DirectoryConfig,
        mapping: MappingConfig,
        store: Arc<InMemoryIdentityStore>,
    ) -> anyhow::Result<Self> {
        init_tracing();

        let provider = LdapLoginProvider::new(
            "ldap",
            factory(&directory),
            config,
            mapping,
            store.clone(),
            Arc::new(catalog()),
        );

        Ok(Self {
            directory,
            store,
            provider,
        })
    }
}

/// Sorted role ids of a user.
pub fn role_ids(roles: &std::collections::BTreeSet<RoleId>) -> Vec<RoleId> {
    roles.iter().copied().collect()
}
