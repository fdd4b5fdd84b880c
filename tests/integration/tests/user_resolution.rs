//! User DN resolution and detail lookup against the sample directory.

use std::sync::Arc;

use dirfed_ldap::memory::Operation;
use dirfed_ldap::{
    with_connection, DirectoryConfig, DnResolution, GroupResolver, LdapError, SearchScope,
    UserResolver,
};

use crate::common::*;

fn direct_config() -> anyhow::Result<DirectoryConfig> {
    Ok(DirectoryConfig::builder()
        .host("ldap.example.org")
        .base_dn(BASE_DN)
        .user_qry("uid=[username],ou=contractors,dc=example,dc=org;uid=[username],ou=people,dc=example,dc=org")
        .connect_username(SERVICE_DN)
        .connect_password(SERVICE_PASSWORD)
        .build()?)
}

#[test]
fn test_search_resolution_uses_service_account() -> anyhow::Result<()> {
    init_tracing();
    let dir = sample_directory(&[DEVELOPERS]);

    let resolution = with_connection(&factory(&dir), &Arc::new(search_config()), |client| {
        UserResolver::new(client).get_user_dn("asmith", None, false)
    })?;

    assert_eq!(resolution, DnResolution::Resolved(ASMITH_DN.to_string()));
    assert_eq!(dir.bind_attempts(), vec![Some(SERVICE_DN.to_string())]);
    assert!(dir.operations().contains(&Operation::Search {
        base: BASE_DN.to_string(),
        filter: "(uid=asmith)".to_string(),
        scope: SearchScope::Subtree,
    }));
    Ok(())
}

#[test]
fn test_filter_metacharacters_are_escaped() -> anyhow::Result<()> {
    init_tracing();
    let dir = sample_directory(&[DEVELOPERS]);

    let err = with_connection(&factory(&dir), &Arc::new(search_config()), |client| {
        UserResolver::new(client).get_user_dn("*", None, false)
    })
    .unwrap_err();

    assert!(matches!(err, LdapError::UserNotFound(_)));
    assert!(dir
        .operations()
        .iter()
        .any(|op| matches!(op, Operation::Search { filter, .. } if filter == "(uid=\\2a)")));
    Ok(())
}

#[test]
fn test_direct_resolution_verifies_candidates() -> anyhow::Result<()> {
    init_tracing();
    let dir = sample_directory(&[DEVELOPERS]);
    let config = Arc::new(direct_config()?);

    let resolution = with_connection(&factory(&dir), &config, |client| {
        UserResolver::new(client).get_user_dn("bob", None, false)
    })?;
    assert_eq!(resolution.dn(), Some(BOB_DN));

    let err = with_connection(&factory(&dir), &config, |client| {
        UserResolver::new(client).get_user_dn("ghost", None, false)
    })
    .unwrap_err();
    assert!(matches!(err, LdapError::UserNotFound(_)));
    Ok(())
}

#[test]
fn test_search_strategy_reports_rejected_credentials() -> anyhow::Result<()> {
    init_tracing();
    let dir = sample_directory(&[DEVELOPERS]);

    let resolution = with_connection(&factory(&dir), &Arc::new(search_config()), |client| {
        UserResolver::new(client).get_user_dn("bob", Some("wrong"), true)
    })?;
    assert_eq!(resolution, DnResolution::CredentialsRejected);

    let resolution = with_connection(&factory(&dir), &Arc::new(search_config()), |client| {
        UserResolver::new(client).get_user_dn("bob", Some("builder"), true)
    })?;
    assert_eq!(resolution.into_dn().as_deref(), Some(BOB_DN));
    Ok(())
}

/// Full detail read: profile attributes plus direct and nested groups.
#[test]
fn test_lookup_user_details() -> anyhow::Result<()> {
    let env = TestEnv::new()?;

    let details = env.provider.lookup_user("jdoe")?;
    assert_eq!(details.dn, JDOE_DN);
    assert_eq!(details.full_name.as_deref(), Some("John Doe"));
    assert_eq!(details.email.as_deref(), Some("jdoe@example.org"));
    assert_eq!(details.uid.as_deref(), Some("jdoe"));
    assert_eq!(details.groups, vec![DEVELOPERS.to_string(), STAFF.to_string()]);
    Ok(())
}

#[test]
fn test_nested_groups_of_a_group() -> anyhow::Result<()> {
    init_tracing();
    let dir = sample_directory(&[DEVELOPERS]);

    let found = with_connection(&factory(&dir), &Arc::new(search_config()), |client| {
        client.bind_service()?;
        Ok(GroupResolver::new(client).get_recursive_groups(&[ASMITH_DN], 0, &[], "dn", "member"))
    })?;

    assert_eq!(found, vec![ADMINS.to_string(), STAFF.to_string()]);
    Ok(())
}

/// Connection setup honours protocol, referral and TLS options.
#[test]
fn test_connection_options() -> anyhow::Result<()> {
    init_tracing();
    let dir = sample_directory(&[]);
    let config = DirectoryConfig::builder()
        .host("ldap.example.org")
        .port(10389)
        .use_ldap_v3(true)
        .no_referrals(true)
        .negotiate_tls(true)
        .use_search(true)
        .base_dn(BASE_DN)
        .user_qry("(uid=[username])")
        .build()?;

    with_connection(&factory(&dir), &Arc::new(config.clone()), |client| {
        UserResolver::new(client).get_user_dn("bob", None, false)
    })?;

    let ops = dir.operations();
    assert_eq!(
        &ops[..4],
        &[
            Operation::Connect {
                hosts: "ldap.example.org".to_string(),
                port: 10389,
            },
            Operation::SetProtocolVersion(3),
            Operation::SetReferralPolicy { follow: false },
            Operation::StartTls,
        ]
    );
    // No service account: anonymous bind.
    assert_eq!(dir.bind_attempts(), vec![None]);

    let strict = sample_directory(&[]).reject_tls();
    let err = with_connection(&factory(&strict), &Arc::new(config), |client| {
        UserResolver::new(client).get_user_dn("bob", None, false)
    })
    .unwrap_err();
    assert!(matches!(err, LdapError::Tls(_)));
    assert!(err.is_connection_error());
    Ok(())
}
