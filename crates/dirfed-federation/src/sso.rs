//! Single sign-on detection and authentication.
//!
//! SSO is split into two capabilities:
//!
//! - a [`RemoteUserDetector`] inspects the incoming request context and
//!   names the user it believes is already signed in elsewhere;
//! - an [`SsoAuthenticator`] turns a detected username into an
//!   [`AuthenticationResponse`] without a password.
//!
//! Implementations are registered by name in an [`SsoRegistry`]. The
//! configured detector and authenticator lists are resolved once into an
//! [`SsoPipeline`], so a misspelled name fails at configuration time and
//! not on the first login.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, FederationResult, LoginFailure};

// ============================================================================
// Request context and responses
// ============================================================================

/// What a detector may look at when trying to identify the remote user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionContext {
    /// Address of the connecting client.
    pub remote_addr: Option<IpAddr>,
}

impl DetectionContext {
    /// Creates a context for the given client address.
    #[must_use]
    pub fn from_addr(addr: IpAddr) -> Self {
        Self {
            remote_addr: Some(addr),
        }
    }
}

/// Options that apply to a single login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOptions {
    /// Create a local account when none exists.
    pub autoregister: bool,
    /// The login came through single sign-on.
    pub sso: bool,
    /// Show detailed error messages to the user.
    pub verbose: bool,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            autoregister: true,
            sso: false,
            verbose: false,
        }
    }
}

/// Successful authentication result handed to the login handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    /// Authenticated username.
    pub username: String,
    /// Full name reported by the authenticator.
    pub full_name: Option<String>,
    /// Email reported by the authenticator.
    pub email: Option<String>,
    /// Name of the authenticator that accepted the user.
    pub authenticator: String,
    /// Whether this came from single sign-on.
    pub sso: bool,
}

impl AuthenticationResponse {
    /// Creates a response for `username` issued by `authenticator`.
    #[must_use]
    pub fn new(username: impl Into<String>, authenticator: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            authenticator: authenticator.into(),
            ..Self::default()
        }
    }

    /// Sets the full name.
    #[must_use]
    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    /// Sets the email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Marks the response as coming from single sign-on.
    #[must_use]
    pub fn via_sso(mut self) -> Self {
        self.sso = true;
        self
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Identifies a user who is already signed in elsewhere.
pub trait RemoteUserDetector: Send + Sync {
    /// Registered name of this detector.
    fn name(&self) -> &str;

    /// Returns the detected username, if any.
    ///
    /// Detection is best effort: failures are logged by the implementation
    /// and reported as `None`.
    fn detect_remote_user(&self, ctx: &DetectionContext) -> Option<String>;
}

/// Authenticates a detected user without a password.
pub trait SsoAuthenticator: Send + Sync {
    /// Registered name of this authenticator.
    fn name(&self) -> &str;

    /// Attempts to authenticate `username`.
    fn try_authenticate(
        &self,
        username: &str,
        options: &LoginOptions,
    ) -> FederationResult<AuthenticationResponse>;
}

// ============================================================================
// Registry
// ============================================================================

/// Named SSO implementations.
#[derive(Default)]
pub struct SsoRegistry {
    detectors: RwLock<HashMap<String, Arc<dyn RemoteUserDetector>>>,
    authenticators: RwLock<HashMap<String, Arc<dyn SsoAuthenticator>>>,
}

impl std::fmt::Debug for SsoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoRegistry")
            .field("detectors", &self.detector_names())
            .field("authenticators", &self.authenticator_names())
            .finish()
    }
}

impl SsoRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a detector under its own name, replacing any previous one.
    pub fn register_detector(&self, detector: Arc<dyn RemoteUserDetector>) {
        let name = detector.name().to_string();
        tracing::debug!(detector = %name, "Registered SSO detector");
        self.detectors.write().insert(name, detector);
    }

    /// Registers an authenticator under its own name, replacing any previous one.
    pub fn register_authenticator(&self, authenticator: Arc<dyn SsoAuthenticator>) {
        let name = authenticator.name().to_string();
        tracing::debug!(authenticator = %name, "Registered SSO authenticator");
        self.authenticators.write().insert(name, authenticator);
    }

    /// Lists registered detector names, sorted.
    #[must_use]
    pub fn detector_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.detectors.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Lists registered authenticator names, sorted.
    #[must_use]
    pub fn authenticator_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.authenticators.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a pipeline from configured name lists.
    ///
    /// ## Errors
    ///
    /// Returns `FederationError::NotRegistered` for the first unknown name.
    pub fn resolve<D, A>(&self, detectors: &[D], authenticators: &[A]) -> FederationResult<SsoPipeline>
    where
        D: AsRef<str>,
        A: AsRef<str>,
    {
        let registered = self.detectors.read();
        let detectors = detectors
            .iter()
            .map(|name| {
                registered
                    .get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| FederationError::NotRegistered(name.as_ref().to_string()))
            })
            .collect::<FederationResult<Vec<_>>>()?;

        let registered = self.authenticators.read();
        let authenticators = authenticators
            .iter()
            .map(|name| {
                registered
                    .get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| FederationError::NotRegistered(name.as_ref().to_string()))
            })
            .collect::<FederationResult<Vec<_>>>()?;

        Ok(SsoPipeline {
            detectors,
            authenticators,
        })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered detectors and authenticators resolved from configuration.
#[derive(Clone, Default)]
pub struct SsoPipeline {
    detectors: Vec<Arc<dyn RemoteUserDetector>>,
    authenticators: Vec<Arc<dyn SsoAuthenticator>>,
}

impl std::fmt::Debug for SsoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let detectors: Vec<_> = self.detectors.iter().map(|d| d.name()).collect();
        let authenticators: Vec<_> = self.authenticators.iter().map(|a| a.name()).collect();
        f.debug_struct("SsoPipeline")
            .field("detectors", &detectors)
            .field("authenticators", &authenticators)
            .finish()
    }
}

impl SsoPipeline {
    /// Runs detectors in order and returns the first detected username.
    #[must_use]
    pub fn detect(&self, ctx: &DetectionContext) -> Option<String> {
        self.detectors.iter().find_map(|detector| {
            let user = detector
                .detect_remote_user(ctx)
                .filter(|u| !u.is_empty())?;
            tracing::debug!(detector = detector.name(), username = %user, "Remote user detected");
            Some(user)
        })
    }

    /// Asks authenticators in order and returns the first success.
    ///
    /// ## Errors
    ///
    /// Returns the last authenticator's error when none succeeds, or
    /// `FederationError::AuthenticationFailed` when no authenticator is
    /// configured.
    pub fn authenticate(
        &self,
        username: &str,
        options: &LoginOptions,
    ) -> FederationResult<AuthenticationResponse> {
        let mut last_error = None;
        for authenticator in &self.authenticators {
            match authenticator.try_authenticate(username, options) {
                Ok(response) => {
                    tracing::info!(
                        authenticator = authenticator.name(),
                        username = %username,
                        "SSO authentication succeeded"
                    );
                    return Ok(response.via_sso());
                }
                Err(e) => {
                    tracing::debug!(
                        authenticator = authenticator.name(),
                        username = %username,
                        error = %e,
                        "SSO authenticator declined"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FederationError::auth_failed(format!("no SSO authenticator accepted '{username}'"))
        }))
    }

    /// Detects the remote user and authenticates them.
    ///
    /// Returns `Ok(None)` when no detector identified anyone. A detected
    /// user that no authenticator accepts is reported to the log.
    pub fn login(
        &self,
        ctx: &DetectionContext,
        options: &LoginOptions,
    ) -> FederationResult<Option<AuthenticationResponse>> {
        let Some(username) = self.detect(ctx) else {
            return Ok(None);
        };
        let options = LoginOptions {
            sso: true,
            ..*options
        };
        self.authenticate(&username, &options).map(Some).map_err(|err| {
            let mut failure = LoginFailure::new("sso").for_user(&username);
            if let Some(addr) = ctx.remote_addr {
                failure = failure.from_addr(addr);
            }
            failure.report(&err, options.verbose);
            err
        })
    }

    /// Checks whether the pipeline has nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty() || self.authenticators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct FixedDetector {
        name: &'static str,
        user: Option<&'static str>,
    }

    impl RemoteUserDetector for FixedDetector {
        fn name(&self) -> &str {
            self.name
        }

        fn detect_remote_user(&self, _ctx: &DetectionContext) -> Option<String> {
            self.user.map(str::to_string)
        }
    }

    struct AllowList {
        name: &'static str,
        allowed: &'static [&'static str],
    }

    impl SsoAuthenticator for AllowList {
        fn name(&self) -> &str {
            self.name
        }

        fn try_authenticate(
            &self,
            username: &str,
            _options: &LoginOptions,
        ) -> FederationResult<AuthenticationResponse> {
            if self.allowed.contains(&username) {
                Ok(AuthenticationResponse::new(username, self.name))
            } else {
                Err(FederationError::user_not_found(username))
            }
        }
    }

    fn registry() -> SsoRegistry {
        let registry = SsoRegistry::new();
        registry.register_detector(Arc::new(FixedDetector {
            name: "none",
            user: None,
        }));
        registry.register_detector(Arc::new(FixedDetector {
            name: "alice",
            user: Some("alice"),
        }));
        registry.register_detector(Arc::new(FixedDetector {
            name: "bob",
            user: Some("bob"),
        }));
        registry.register_authenticator(Arc::new(AllowList {
            name: "first",
            allowed: &["bob"],
        }));
        registry.register_authenticator(Arc::new(AllowList {
            name: "second",
            allowed: &["alice", "bob"],
        }));
        registry
    }

    #[test]
    fn resolve_rejects_unknown_names() {
        let registry = registry();

        let result = registry.resolve(&["alice", "missing"], &["first"]);
        assert!(matches!(result, Err(FederationError::NotRegistered(n)) if n == "missing"));

        let result = registry.resolve(&["alice"], &["nope"]);
        assert!(matches!(result, Err(FederationError::NotRegistered(n)) if n == "nope"));
    }

    #[test]
    fn first_detected_user_wins() {
        let pipeline = registry().resolve(&["none", "alice", "bob"], &["second"]).unwrap();
        let ctx = DetectionContext::from_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));

        assert_eq!(pipeline.detect(&ctx).as_deref(), Some("alice"));
    }

    #[test]
    fn authenticators_run_in_order() {
        let pipeline = registry()
            .resolve(&["alice"], &["first", "second"])
            .unwrap();

        let response = pipeline
            .login(&DetectionContext::default(), &LoginOptions::default())
            .unwrap()
            .unwrap();

        assert_eq!(response.username, "alice");
        assert_eq!(response.authenticator, "second");
        assert!(response.sso);
    }

    #[test]
    fn login_without_detection_is_none() {
        let pipeline = registry().resolve(&["none"], &["second"]).unwrap();

        let result = pipeline
            .login(&DetectionContext::default(), &LoginOptions::default())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn all_authenticators_declining_is_an_error() {
        let pipeline = registry().resolve(&["alice"], &["first"]).unwrap();

        let result = pipeline.login(&DetectionContext::default(), &LoginOptions::default());
        assert!(matches!(result, Err(FederationError::UserNotFound(_))));

        let empty = registry().resolve::<&str, &str>(&["alice"], &[]).unwrap();
        assert!(empty.is_empty());
        assert!(empty
            .authenticate("alice", &LoginOptions::default())
            .unwrap_err()
            .is_auth_error());
    }
}
