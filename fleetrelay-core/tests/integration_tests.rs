//! Integration tests for fleetrelay-core building blocks
//!
//! These exercise the public API the adapters and HTTP layer depend on,
//! without a database or Redis.
//!
//! Run with: cargo test -p fleetrelay-core --test integration_tests

use fleetrelay_core::{
    models::{DeviceId, RuntimeConfig, RuntimeConfigPatch},
    service::{DashboardRole, JwtService, RuntimeConfigCell},
    PresenceIndex,
};
use serde_json::json;
use std::time::Duration;

#[test]
fn test_device_and_dashboard_tokens_do_not_cross() {
    // same secret on purpose: the claim shapes alone must keep the two apart
    let jwt = JwtService::hs256(b"shared-secret-long-enough-for-hs256-use", 0).unwrap();

    let device_token = jwt
        .sign_device_token(&DeviceId::from("dev-1"), chrono::Duration::hours(1))
        .unwrap();
    assert!(jwt.verify_dashboard_token(&device_token).is_err());

    let dashboard_token = jwt
        .sign_dashboard_token("operator", DashboardRole::Admin, chrono::Duration::hours(1))
        .unwrap();
    let claims = jwt.verify_dashboard_token(&dashboard_token).unwrap();
    assert!(claims.is_admin());
    assert_eq!(jwt.verify_device_token(&device_token).unwrap().device_id(), DeviceId::from("dev-1"));
}

#[tokio::test]
async fn test_presence_lifecycle() {
    let presence = PresenceIndex::in_memory(Duration::from_secs(300));
    let online = DeviceId::from("dev-1");
    let offline = DeviceId::from("dev-2");

    presence.mark_online(&online).await;
    presence.mark_online(&offline).await;
    presence.mark_offline(&offline).await;

    let statuses = presence.get_statuses(&[online.clone(), offline.clone()]).await;
    assert_eq!(statuses.get(&online), Some(&true));
    assert_eq!(statuses.get(&offline), Some(&false));

    presence.clear_all().await;
    assert!(!presence.is_online(&online).await);
}

#[test]
fn test_runtime_config_updates_reach_every_handle() {
    let cell = RuntimeConfigCell::new(RuntimeConfig::default());
    let relay_view = cell.handle();
    let sweeper_view = cell.handle();

    let patch = RuntimeConfigPatch::from_record(&json!({"highScaleMode": true})).unwrap();
    let next = cell.current().merge(&patch);
    cell.replace(next);

    assert!(relay_view.current().high_scale_mode);
    assert!(sweeper_view.current().high_scale_mode);
    // untouched fields keep their previous values
    assert_eq!(relay_view.current().relay_enabled, RuntimeConfig::default().relay_enabled);
}
