//! End-to-end integration tests.
//!
//! These tests drive the login provider, the resolvers and the SSO
//! pipeline against an in-memory directory.

mod common;
mod group_mapping;
mod login_flows;
mod settings;
mod sso_flows;
mod user_resolution;
