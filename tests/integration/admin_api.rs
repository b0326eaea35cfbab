//! §6: the HTTP admin surface's bearer auth, paired-command round trip, and
//! devices/status probe, driven straight through the axum `Router` via
//! `tower::ServiceExt::oneshot` rather than a bound listener.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Local;
use common::{client_id, config_with_upstream, Gateway};
use gatewayd::admin::{self, AdminState};
use gw_test_support::{decode, packets};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;

const SIGNATURE_KEY: &str = "integration-test-secret";

fn todays_bearer() -> String {
    let today = Local::now().format("%Y-%m-%d").to_string();
    hex::encode(Sha256::digest(format!("{today}{SIGNATURE_KEY}").as_bytes()))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_bearer_is_rejected() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;
    let state = AdminState::new(
        gateway.registry.clone(),
        SIGNATURE_KEY.to_owned(),
        gateway.pending.clone(),
    );
    let router = admin::router(state);

    let response = router
        .oneshot(
            Request::post("/api/devices/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn healthz_and_readyz_need_no_auth() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;
    let state = AdminState::new(
        gateway.registry.clone(),
        SIGNATURE_KEY.to_owned(),
        gateway.pending.clone(),
    );
    let router = admin::router(state);

    let response = router
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn devices_status_reports_registered_macs() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;
    let mut device = gateway.connect().await;
    let id = client_id("board", "aa_bb_cc_dd_ee_05", "uuid-5");
    device.write_all(&packets::connect(&id, 60)).await.unwrap();
    assert_eq!(
        decode::read_frame(&mut device).await,
        decode::ReplyPacket::ConnAck(0x00)
    );

    let state = AdminState::new(
        gateway.registry.clone(),
        SIGNATURE_KEY.to_owned(),
        gateway.pending.clone(),
    );
    let router = admin::router(state);

    let response = router
        .oneshot(
            Request::post("/api/devices/status")
                .header("authorization", format!("Bearer {}", todays_bearer()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let statuses = body_json(response).await;
    assert_eq!(statuses["aa:bb:cc:dd:ee:05"], false);
}

#[tokio::test]
async fn post_command_waits_for_the_devices_paired_reply() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;
    let mut device = gateway.connect().await;
    let id = client_id("board", "aa_bb_cc_dd_ee_06", "uuid-6");
    device.write_all(&packets::connect(&id, 60)).await.unwrap();
    assert_eq!(
        decode::read_frame(&mut device).await,
        decode::ReplyPacket::ConnAck(0x00)
    );

    let state = AdminState::new(
        gateway.registry.clone(),
        SIGNATURE_KEY.to_owned(),
        gateway.pending.clone(),
    );
    let router = admin::router(state);

    let request = Request::post("/api/commands/aa:bb:cc:dd:ee:06")
        .header("authorization", format!("Bearer {}", todays_bearer()))
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&serde_json::json!({"type": "set_volume", "value": 50})).unwrap(),
        ))
        .unwrap();
    let call = tokio::spawn(async move { router.oneshot(request).await.unwrap() });

    let pushed = decode::decode_publish_json(&decode::read_frame(&mut device).await);
    assert_eq!(pushed["type"], "set_volume");
    assert_eq!(pushed["value"], 50);

    device
        .write_all(&packets::publish_qos0(
            "devices/p2p/aa:bb:cc:dd:ee:06",
            &serde_json::to_vec(&serde_json::json!({"type": "set_volume_ack", "ok": true}))
                .unwrap(),
        ))
        .await
        .unwrap();

    let response = call.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply["ok"], true);
}

#[tokio::test]
async fn post_command_for_unknown_device_is_not_found() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;
    let state = AdminState::new(
        gateway.registry.clone(),
        SIGNATURE_KEY.to_owned(),
        gateway.pending.clone(),
    );
    let router = admin::router(state);

    let response = router
        .oneshot(
            Request::post("/api/commands/11:22:33:44:55:66")
                .header("authorization", format!("Bearer {}", todays_bearer()))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&serde_json::json!({})).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
