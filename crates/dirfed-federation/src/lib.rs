//! # dirfed-federation
//!
//! Provider-neutral user federation types.
//!
//! This crate defines what a directory-backed login provider talks to:
//!
//! - **Local identity**: [`LocalUser`], [`Role`] and the [`IdentityStore`] /
//!   [`RoleCatalog`] persistence traits
//! - **Settings**: [`RawSettings`] and the per-field [`ValidatorTable`]
//! - **Login capabilities**: [`CredentialValidator`] and [`LoginHandler`]
//! - **Single sign-on**: detectors, authenticators and the [`SsoRegistry`]
//!
//! The LDAP implementation lives in `dirfed-ldap`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod model;
pub mod provider;
pub mod settings;
pub mod sso;
pub mod store;

pub use error::{FederationError, FederationResult, LoginFailure, GENERIC_DENIAL};
pub use model::{LocalUser, Role, RoleId};
pub use provider::{CredentialValidator, LoginHandler};
pub use settings::{RawSettings, Validator, ValidatorTable};
pub use sso::{
    AuthenticationResponse, DetectionContext, LoginOptions, RemoteUserDetector, SsoAuthenticator,
    SsoPipeline, SsoRegistry,
};
pub use store::{IdentityStore, InMemoryIdentityStore, RoleCatalog, StaticRoleCatalog};
