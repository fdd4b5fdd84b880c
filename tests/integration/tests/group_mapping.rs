//! Group discovery and role reconciliation end to end.

use std::collections::BTreeSet;
use std::sync::Arc;

use dirfed_federation::{
    AuthenticationResponse, FederationError, IdentityStore, InMemoryIdentityStore, LocalUser,
    LoginHandler, LoginOptions, RoleCatalog,
};
use dirfed_ldap::{LdapError, LookupType, MappingEngine, RemovalPolicy};

use crate::common::*;

fn login(env: &TestEnv, username: &str) -> anyhow::Result<LocalUser> {
    Ok(env
        .provider
        .on_user_login(&AuthenticationResponse::new(username, "ldap"), &LoginOptions::default())?)
}

#[test]
fn test_reverse_lookup_with_nesting() -> anyhow::Result<()> {
    let mapping = mapping_builder()
        .lookup_type(LookupType::Reverse)
        .lookup_attribute("member")
        .build()?;
    let env = TestEnv::with_configs(sample_directory(&[DEVELOPERS]), search_config(), mapping)?;

    let details = env.provider.lookup_user("jdoe")?;
    assert_eq!(details.groups, vec![DEVELOPERS.to_string(), STAFF.to_string()]);

    let user = login(&env, "jdoe")?;
    assert_eq!(role_ids(&user.roles), vec![REGISTERED, DEVELOPER, STAFF_ROLE]);
    Ok(())
}

#[test]
fn test_without_recursion_only_direct_groups_count() -> anyhow::Result<()> {
    let mapping = mapping_builder().recursive(false).build()?;
    let env = TestEnv::with_configs(sample_directory(&[DEVELOPERS]), search_config(), mapping)?;

    let user = login(&env, "jdoe")?;
    assert_eq!(role_ids(&user.roles), vec![REGISTERED, DEVELOPER]);
    Ok(())
}

#[test]
fn test_recursion_depth_limit() -> anyhow::Result<()> {
    // One level only re-reads the direct groups; staff stays out of reach.
    let mapping = mapping_builder().recursion_depth(1).build()?;
    let env = TestEnv::with_configs(sample_directory(&[DEVELOPERS]), search_config(), mapping)?;
    assert_eq!(env.provider.lookup_user("jdoe")?.groups, vec![DEVELOPERS.to_string()]);

    let mapping = mapping_builder().recursion_depth(2).build()?;
    let env = TestEnv::with_configs(sample_directory(&[DEVELOPERS]), search_config(), mapping)?;
    assert_eq!(
        env.provider.lookup_user("jdoe")?.groups,
        vec![DEVELOPERS.to_string(), STAFF.to_string()]
    );
    Ok(())
}

/// With additions off, rules only ever take roles away.
#[test]
fn test_removal_only() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryIdentityStore::new());
    store.create(
        &LocalUser::new("jdoe")
            .with_role(REGISTERED)
            .with_role(ADMINISTRATOR)
            .with_role(STAFF_ROLE),
    )?;
    let mapping = mapping_builder().group_map_addition(false).build()?;
    let env = TestEnv::with_store(sample_directory(&[DEVELOPERS]), search_config(), mapping, store)?;

    let user = login(&env, "jdoe")?;
    assert_eq!(role_ids(&user.roles), vec![REGISTERED, STAFF_ROLE]);
    Ok(())
}

/// `yesdefault` manages every catalog role except the unmanaged ones.
#[test]
fn test_removal_of_all_known_roles() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryIdentityStore::new());
    store.create(
        &LocalUser::new("jdoe")
            .with_role(REGISTERED)
            .with_role(ADMINISTRATOR)
            .with_role(AUDITOR),
    )?;
    let mapping = mapping_builder()
        .group_map_removal(RemovalPolicy::YesDefault)
        .build()?;
    let env = TestEnv::with_store(sample_directory(&[DEVELOPERS]), search_config(), mapping, store)?;

    let user = login(&env, "jdoe")?;
    assert_eq!(role_ids(&user.roles), vec![DEVELOPER, STAFF_ROLE, AUDITOR]);
    Ok(())
}

#[test]
fn test_no_removal_keeps_existing_roles() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryIdentityStore::new());
    store.create(&LocalUser::new("jdoe").with_role(ADMINISTRATOR))?;
    let mapping = mapping_builder().group_map_removal(RemovalPolicy::No).build()?;
    let env = TestEnv::with_store(sample_directory(&[DEVELOPERS]), search_config(), mapping, store)?;

    let user = login(&env, "jdoe")?;
    assert_eq!(role_ids(&user.roles), vec![DEVELOPER, STAFF_ROLE, ADMINISTRATOR]);
    Ok(())
}

/// Rules naming unknown or malformed roles are dropped; when none is
/// left the login fails before anything is stored.
#[test]
fn test_unusable_rule_list() -> anyhow::Result<()> {
    let mapping = mapping_builder()
        .group_map_list("cn=developers,ou=groups,dc=example,dc=org:99\nnot-a-dn:3\n=x:3")
        .build()?;
    let env = TestEnv::with_configs(sample_directory(&[DEVELOPERS]), search_config(), mapping.clone())?;

    let err = login(&env, "jdoe").unwrap_err();
    let err = err.downcast::<FederationError>()?;
    assert!(matches!(err, FederationError::RoleMapping(_)));
    assert!(env.store.is_empty());

    let engine_err = MappingEngine::new(&mapping, &catalog().list_roles()?).unwrap_err();
    assert!(matches!(engine_err, LdapError::MappingConfig(_)));
    Ok(())
}

#[test]
fn test_reconcile_reports_changes() -> anyhow::Result<()> {
    let env = TestEnv::new()?;
    let details = env.provider.lookup_user("jdoe")?;
    let engine = MappingEngine::new(env.provider.mapping_config(), &catalog().list_roles()?)?;

    let current: BTreeSet<_> = [REGISTERED, ADMINISTRATOR].into_iter().collect();
    let outcome = engine.reconcile(&current, &details.groups);

    assert!(outcome.has_changes());
    assert_eq!(outcome.additions, vec![DEVELOPER, STAFF_ROLE]);
    assert_eq!(outcome.removals, vec![ADMINISTRATOR]);
    assert!(!outcome.fallback_applied);
    assert_eq!(role_ids(&outcome.roles), vec![REGISTERED, DEVELOPER, STAFF_ROLE]);

    assert_eq!(engine.matching_rules(&details.groups).len(), 2);
    assert!(env.store.find_by_username("jdoe")?.is_none());
    Ok(())
}
