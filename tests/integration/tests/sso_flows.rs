//! Single sign-on: detection by network address, then the login hook.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use dirfed_federation::{DetectionContext, LoginHandler, LoginOptions, SsoRegistry};
use dirfed_ldap::{DirectorySsoAuthenticator, NetworkAddressDetector};

use crate::common::*;

fn registry(env: &TestEnv) -> SsoRegistry {
    let config = Arc::new(env.provider.directory_config().clone());
    let registry = SsoRegistry::new();
    registry.register_detector(Arc::new(NetworkAddressDetector::new(
        factory(&env.directory),
        Arc::clone(&config),
    )));
    registry.register_authenticator(Arc::new(DirectorySsoAuthenticator::new(
        factory(&env.directory),
        config,
    )));
    registry
}

#[test]
fn test_sso_login_registers_user() -> anyhow::Result<()> {
    let env = TestEnv::new()?;
    let pipeline = registry(&env).resolve(
        &[NetworkAddressDetector::<TestFactory>::NAME],
        &[DirectorySsoAuthenticator::<TestFactory>::NAME],
    )?;

    let ctx = DetectionContext::from_addr(IpAddr::V4(Ipv4Addr::new(65, 66, 67, 68)));
    let response = pipeline
        .login(&ctx, &LoginOptions::default())?
        .expect("user detected");
    assert!(response.sso);
    assert_eq!(response.username, "jdoe");
    assert_eq!(response.full_name.as_deref(), Some("John Doe"));

    let user = env.provider.on_user_login(&response, &LoginOptions::default())?;
    assert_eq!(role_ids(&user.roles), vec![REGISTERED, DEVELOPER, STAFF_ROLE]);

    // SSO never binds as the user.
    assert!(env
        .directory
        .bind_attempts()
        .iter()
        .all(|dn| dn.as_deref() == Some(SERVICE_DN)));
    Ok(())
}

#[test]
fn test_no_user_at_address() -> anyhow::Result<()> {
    let env = TestEnv::new()?;
    let pipeline = registry(&env).resolve(&["edirectory"], &["directory"])?;

    let ctx = DetectionContext::from_addr(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
    assert!(pipeline.login(&ctx, &LoginOptions::default())?.is_none());
    assert!(env.store.is_empty());
    Ok(())
}

#[test]
fn test_unknown_plugin_names() -> anyhow::Result<()> {
    let env = TestEnv::new()?;
    assert!(registry(&env).resolve(&["kerberos"], &["directory"]).is_err());
    Ok(())
}
