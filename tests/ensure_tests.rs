//! Integration tests for `ensure`
//!
//! Tests cover:
//! - Reuse of a single live match, creation when nothing matches
//! - Ambiguity, dead resources and forced creation
//! - Address registration into roles and targets, including the configured role
//! - Credential loading failures

mod common;

use std::collections::HashMap;

use pretty_assertions::assert_eq;

use common::*;
use drover::cloud::{ensure, Credentials, EnsureOptions, Identity, DEFAULT_ROLE};
use drover::config::Config;
use drover::error::Error;
use drover::executor::runtime::ExecutionContext;

fn ami() -> InstanceSpec {
    InstanceSpec {
        ami: "ami-0abc".to_string(),
    }
}

#[tokio::test]
async fn test_ensure_twice_creates_once() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new();
    let identity = Identity::named("web").with_tag("env", "prod");

    let first = ensure(&ctx, &client, &identity, &ami(), EnsureOptions::default())
        .await
        .unwrap();
    let second = ensure(&ctx, &client, &identity, &ami(), EnsureOptions::default())
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.resource, second.resource);
    assert_eq!(client.create_count(), 1);
}

#[tokio::test]
async fn test_new_resource_is_tagged_with_identity_and_extras() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new();
    let identity = Identity::named("db");

    ensure(
        &ctx,
        &client,
        &identity,
        &ami(),
        EnsureOptions::default().with_tag("team", "storage"),
    )
    .await
    .unwrap();

    let tags = client.tag_calls();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].get("Name").map(String::as_str), Some("db"));
    assert_eq!(tags[0].get("team").map(String::as_str), Some("storage"));
}

#[tokio::test]
async fn test_new_address_joins_default_role_and_targets() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new();

    let ensured = ensure(&ctx, &client, &Identity::named("web"), &ami(), EnsureOptions::default())
        .await
        .unwrap();

    assert_eq!(ensured.resource.ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(ensured.resource.state, "running");
    assert_eq!(ctx.role_targets(DEFAULT_ROLE), vec!["10.0.0.1"]);
    assert_eq!(ctx.targets(), vec!["10.0.0.1"]);
}

#[tokio::test]
async fn test_reused_address_registers_in_requested_role() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new().with_existing(
        &[("Name", "cache")],
        Instance {
            id: "i-cafe".to_string(),
            ip: Some("10.1.0.7".to_string()),
            state: "running".to_string(),
        },
    );

    let ensured = ensure(
        &ctx,
        &client,
        &Identity::named("cache"),
        &ami(),
        EnsureOptions::default().with_role("cache"),
    )
    .await
    .unwrap();

    assert!(!ensured.created);
    assert_eq!(ensured.resource.id, "i-cafe");
    assert_eq!(ctx.role_targets("cache"), vec!["10.1.0.7"]);
    assert!(ctx.role_targets(DEFAULT_ROLE).is_empty());
    assert_eq!(client.create_count(), 0);
}

#[tokio::test]
async fn test_without_wait_has_no_address_to_register() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new();

    let ensured = ensure(
        &ctx,
        &client,
        &Identity::named("worker"),
        &ami(),
        EnsureOptions::default().without_wait(),
    )
    .await
    .unwrap();

    assert!(ensured.created);
    assert_eq!(ensured.resource.ip, None);
    assert_eq!(ensured.resource.state, "pending");
    assert!(ctx.targets().is_empty());
}

#[tokio::test]
async fn test_configured_role_receives_new_address() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new();
    let mut config = Config::default();
    config.defaults.role = "web".to_string();

    ensure(
        &ctx,
        &client,
        &Identity::named("web"),
        &ami(),
        EnsureOptions::from_config(&config),
    )
    .await
    .unwrap();

    assert_eq!(ctx.role_targets("web"), vec!["10.0.0.1"]);
    assert!(ctx.role_targets(DEFAULT_ROLE).is_empty());
}

#[tokio::test]
async fn test_two_live_matches_are_ambiguous() {
    let ctx = ExecutionContext::new();
    let running = |id: &str| Instance {
        id: id.to_string(),
        ip: None,
        state: "running".to_string(),
    };
    let client = MockInstances::new()
        .with_existing(&[("Name", "web")], running("i-a"))
        .with_existing(&[("Name", "web")], running("i-b"));

    let err = ensure(&ctx, &client, &Identity::named("web"), &ami(), EnsureOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::AmbiguousResource { kind, matches, .. } => {
            assert_eq!(kind, "instance");
            assert_eq!(matches, 2);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
    assert_eq!(client.create_count(), 0);
}

#[tokio::test]
async fn test_terminated_match_is_ignored() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new().with_existing(
        &[("Name", "web")],
        Instance {
            id: "i-dead".to_string(),
            ip: Some("10.9.9.9".to_string()),
            state: "terminated".to_string(),
        },
    );

    let ensured = ensure(&ctx, &client, &Identity::named("web"), &ami(), EnsureOptions::default())
        .await
        .unwrap();

    assert!(ensured.created);
    assert_eq!(ensured.resource.id, "i-0001");
    assert!(!ctx.targets().contains(&"10.9.9.9".to_string()));
}

#[tokio::test]
async fn test_force_creates_despite_match() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new();
    let identity = Identity::named("web");

    ensure(&ctx, &client, &identity, &ami(), EnsureOptions::default())
        .await
        .unwrap();
    let forced = ensure(&ctx, &client, &identity, &ami(), EnsureOptions::default().with_force())
        .await
        .unwrap();

    assert!(forced.created);
    assert_eq!(client.create_count(), 2);
    assert_eq!(ctx.role_targets(DEFAULT_ROLE), vec!["10.0.0.1", "10.0.0.2"]);
}

#[tokio::test]
async fn test_create_failure_propagates() {
    let ctx = ExecutionContext::new();
    let client = MockInstances::new();
    let spec = InstanceSpec::default();

    let err = ensure(&ctx, &client, &Identity::named("web"), &spec, EnsureOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ResourceClient { .. }));
    assert!(client.tag_calls().is_empty());
    assert!(ctx.targets().is_empty());
}

#[test]
fn test_missing_credentials_fail_early() {
    let env: HashMap<&str, &str> = HashMap::from([("AWS_SECRET_ACCESS_KEY", "secret")]);
    let err = Credentials::from_lookup(|key| env.get(key).map(|v| v.to_string()), None)
        .unwrap_err();

    match err {
        Error::Config(message) => {
            assert_eq!(message, "Environment variable AWS_ACCESS_KEY_ID is not set.")
        }
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_credentials_from_lookup() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("AWS_ACCESS_KEY_ID", "AKIA123"),
        ("AWS_SECRET_ACCESS_KEY", "secret"),
    ]);
    let creds = Credentials::from_lookup(
        |key| env.get(key).map(|v| v.to_string()),
        Some("eu-west-1".to_string()),
    )
    .unwrap();

    assert_eq!(creds.access_key_id, "AKIA123");
    assert_eq!(creds.region.as_deref(), Some("eu-west-1"));
    assert!(!format!("{:?}", creds).contains("\"secret\""));
}
