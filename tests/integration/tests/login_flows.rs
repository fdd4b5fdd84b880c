//! Password and post-login flows through the provider.

use std::sync::Arc;

use dirfed_federation::{
    AuthenticationResponse, CredentialValidator, FederationError, IdentityStore,
    InMemoryIdentityStore, LocalUser, LoginHandler, LoginOptions,
};
use dirfed_ldap::memory::Operation;
use dirfed_ldap::{with_connection, DirectoryConfig};

use crate::common::*;

/// Password check followed by the login hook registers the user with
/// mapped roles and synced profile.
#[test]
fn test_password_login_registers_user() -> anyhow::Result<()> {
    let env = TestEnv::new()?;

    assert!(env.provider.validate_password("jdoe", "secret")?);
    let response = env.provider.authenticate("jdoe", "secret")?;
    let user = env.provider.on_user_login(&response, &LoginOptions::default())?;

    assert_eq!(user.username, "jdoe");
    assert_eq!(user.name, "John Doe");
    assert_eq!(user.email, "jdoe@example.org");
    // developers -> 3, nested staff -> 4, plus the registration default.
    assert_eq!(role_ids(&user.roles), vec![REGISTERED, DEVELOPER, STAFF_ROLE]);

    let stored = env.store.find_by_username("JDOE")?.expect("stored user");
    assert_eq!(stored, user);
    Ok(())
}

#[test]
fn test_wrong_password_is_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new()?;

    assert!(!env.provider.validate_password("jdoe", "nope")?);
    let err = env.provider.authenticate("jdoe", "nope").unwrap_err();
    assert!(err.is_auth_error());
    assert_eq!(
        err.user_message(false),
        FederationError::auth_failed("x").user_message(false)
    );
    Ok(())
}

#[test]
fn test_unknown_user() -> anyhow::Result<()> {
    let env = TestEnv::new()?;

    let err = env.provider.validate_password("ghost", "secret").unwrap_err();
    assert!(err.is_user_not_found());
    Ok(())
}

/// Roles granted by rules the user no longer matches are removed; roles
/// outside the managed set survive.
#[test]
fn test_relogin_after_directory_change() -> anyhow::Result<()> {
    let env = TestEnv::with_configs(
        sample_directory(&[ADMINS]),
        search_config(),
        mapping_builder().build()?,
    )?;
    let response = AuthenticationResponse::new("jdoe", "ldap");

    let first = env.provider.on_user_login(&response, &LoginOptions::default())?;
    assert_eq!(role_ids(&first.roles), vec![REGISTERED, STAFF_ROLE, ADMINISTRATOR]);

    let mut promoted = first.clone();
    promoted.roles.insert(AUDITOR);
    env.store.persist(&promoted)?;

    // Move jdoe from admins to developers.
    with_connection(&factory(&env.directory), &Arc::new(search_config()), |client| {
        client.bind_service()?;
        client.replace_attributes(JDOE_DN, &[("groupMembership", &[DEVELOPERS])])
    })?;

    let second = env.provider.on_user_login(&response, &LoginOptions::default())?;
    assert_eq!(second.id, first.id);
    assert_eq!(
        role_ids(&second.roles),
        vec![REGISTERED, DEVELOPER, STAFF_ROLE, AUDITOR]
    );
    Ok(())
}

/// A user left without any role gets the public role.
#[test]
fn test_public_role_fallback() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryIdentityStore::new());
    store.create(&LocalUser::new("bob").with_role(ADMINISTRATOR))?;

    let env = TestEnv::with_store(
        sample_directory(&[DEVELOPERS]),
        search_config(),
        mapping_builder().build()?,
        store,
    )?;

    let user = env
        .provider
        .on_user_login(&AuthenticationResponse::new("bob", "ldap"), &LoginOptions::default())?;
    assert_eq!(role_ids(&user.roles), vec![PUBLIC]);
    assert_eq!(user.name, "Bob Brown");
    Ok(())
}

#[test]
fn test_registration_disabled() -> anyhow::Result<()> {
    let env = TestEnv::new()?;
    let options = LoginOptions {
        autoregister: false,
        ..LoginOptions::default()
    };

    let err = env
        .provider
        .on_user_login(&AuthenticationResponse::new("jdoe", "ldap"), &options)
        .unwrap_err();
    assert!(matches!(err, FederationError::RegistrationDisabled(ref u) if u == "jdoe"));
    assert!(env.store.is_empty());
    Ok(())
}

/// Mapping switched off: the local record keeps its roles and only the
/// enabled profile fields are synced.
#[test]
fn test_login_without_mapping() -> anyhow::Result<()> {
    let mapping = mapping_builder()
        .group_map_enabled(false)
        .sync_email(false)
        .build()?;
    let store = Arc::new(InMemoryIdentityStore::new());
    store.create(
        &LocalUser::new("jdoe")
            .with_email("old@example.org")
            .with_role(ADMINISTRATOR),
    )?;
    let env = TestEnv::with_store(sample_directory(&[DEVELOPERS]), search_config(), mapping, store)?;

    let user = env
        .provider
        .on_user_login(&AuthenticationResponse::new("jdoe", "ldap"), &LoginOptions::default())?;
    assert_eq!(role_ids(&user.roles), vec![ADMINISTRATOR]);
    assert_eq!(user.name, "John Doe");
    assert_eq!(user.email, "old@example.org");
    Ok(())
}

/// DN templates: the first candidate does not exist, the second binds.
#[test]
fn test_direct_templates_bind_second_candidate() -> anyhow::Result<()> {
    let config = DirectoryConfig::builder()
        .host("ldap.example.org")
        .use_ldap_v3(true)
        .base_dn(BASE_DN)
        .user_qry("uid=[username],ou=contractors,dc=example,dc=org; uid=[username],ou=people,dc=example,dc=org")
        .connect_username(SERVICE_DN)
        .connect_password(SERVICE_PASSWORD)
        .build()?;
    let env = TestEnv::with_configs(
        sample_directory(&[DEVELOPERS]),
        config,
        mapping_builder().build()?,
    )?;

    let response = env.provider.authenticate("jdoe", "secret")?;
    assert_eq!(response.full_name.as_deref(), Some("John Doe"));
    assert_eq!(
        env.directory.bind_attempts(),
        vec![
            Some("uid=jdoe,ou=contractors,dc=example,dc=org".to_string()),
            Some(JDOE_DN.to_string()),
        ]
    );

    let err = env.provider.authenticate("jdoe", "wrong").unwrap_err();
    assert!(err.is_auth_error());
    Ok(())
}

#[test]
fn test_unreachable_directory() -> anyhow::Result<()> {
    let env = TestEnv::with_configs(
        sample_directory(&[DEVELOPERS]).unreachable(),
        search_config(),
        mapping_builder().build()?,
    )?;

    let err = env.provider.validate_password("jdoe", "secret").unwrap_err();
    assert!(err.is_auth_error());
    assert!(env.directory.operations().contains(&Operation::Close));
    Ok(())
}
