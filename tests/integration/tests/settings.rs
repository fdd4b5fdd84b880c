//! Providers built from flat settings files.

use dirfed_federation::{AuthenticationResponse, LoginHandler, LoginOptions, RawSettings};
use dirfed_ldap::{DirectoryConfig, LdapError, LookupType, MappingConfig, RemovalPolicy};

use crate::common::*;

const SETTINGS: &str = r#"
host = "ldap.example.org"
port = 10389
use_ldapV3 = true
use_search = true
base_dn = "dc=example,dc=org"
user_qry = "(uid=[username])"
connect_username = "cn=svc,ou=system,dc=example,dc=org"
connect_password = "svcpass"
ldap_email = "[username]@corp.example.org"

group_map_enabled = true
group_map_addition = true
group_map_removal = "yes"
group_map_unmanage = "6"
group_map_public = 1
lookup_type = "reverse"
lookup_attribute = "member"
recursive = true
sync_name = true
sync_email = true
group_map_list = """
cn=developers,ou=groups,dc=example,dc=org:3
cn=staff,ou=groups,dc=example,dc=org:4
"""
"#;

#[test]
fn test_configs_from_toml() -> anyhow::Result<()> {
    let raw = RawSettings::from_toml_str(SETTINGS)?;
    let directory = DirectoryConfig::from_settings(&raw)?;
    let mapping = MappingConfig::from_settings(&raw)?;

    assert_eq!(directory.port, 10389);
    assert!(directory.use_ldap_v3);
    assert!(directory.email_is_template());
    assert_eq!(directory.connect_username.as_deref(), Some(SERVICE_DN));

    assert_eq!(mapping.lookup_type, LookupType::Reverse);
    assert_eq!(mapping.group_map_removal, RemovalPolicy::Yes);
    assert_eq!(mapping.recursion_limit(), Some(0));
    assert_eq!(mapping.default_role, REGISTERED);
    Ok(())
}

/// A provider configured only through settings logs a user in with a
/// synthesised email and reverse-looked-up nested groups.
#[test]
fn test_login_with_settings_file() -> anyhow::Result<()> {
    let raw = RawSettings::from_toml_str(SETTINGS)?;
    let env = TestEnv::with_configs(
        sample_directory(&[DEVELOPERS]),
        DirectoryConfig::from_settings(&raw)?,
        MappingConfig::from_settings(&raw)?,
    )?;

    let user = env
        .provider
        .on_user_login(&AuthenticationResponse::new("jdoe", "ldap"), &LoginOptions::default())?;

    assert_eq!(user.email, "jdoe@corp.example.org");
    assert_eq!(role_ids(&user.roles), vec![REGISTERED, DEVELOPER, STAFF_ROLE]);
    Ok(())
}

#[test]
fn test_invalid_settings() -> anyhow::Result<()> {
    let raw = RawSettings::from_toml_str(SETTINGS)?.with("port", "ldap");
    let err = DirectoryConfig::from_settings(&raw).unwrap_err();
    assert!(matches!(err, LdapError::Configuration(_)));

    let raw = RawSettings::from_toml_str(SETTINGS)?.with("group_map_removal", "sometimes");
    let err = MappingConfig::from_settings(&raw).unwrap_err();
    assert!(err.to_string().contains("group_map_removal"));

    assert!(RawSettings::from_toml_str("[directory]\nhost = \"x\"").is_err());
    Ok(())
}
