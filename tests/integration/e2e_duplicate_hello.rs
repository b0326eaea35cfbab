//! S4: a second hello on an already-open connection tears down the prior
//! Session (goodbye published to the device) before opening a fresh one.

mod common;

use common::{client_id, config_with_upstream, Gateway};
use gw_test_support::{decode, packets, MockUpstream};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn duplicate_hello_closes_prior_session_before_opening_a_new_one() {
    let mut upstream = MockUpstream::start().await;
    let gateway = Gateway::start(config_with_upstream(&upstream.url())).await;

    let mut device = gateway.connect().await;
    let id = client_id("board", "aa_bb_cc_dd_ee_03", "uuid-3");
    device.write_all(&packets::connect(&id, 60)).await.unwrap();
    assert_eq!(
        decode::read_frame(&mut device).await,
        decode::ReplyPacket::ConnAck(0x00)
    );

    device
        .write_all(&packets::publish_qos0(
            "devices/p2p/aa:bb:cc:dd:ee:03",
            &packets::hello_payload(serde_json::json!({})),
        ))
        .await
        .unwrap();
    let mut session1 = upstream
        .next_session()
        .await
        .expect("first session accepted");
    let hello1 = decode::decode_publish_json(&decode::read_frame(&mut device).await);
    assert_eq!(hello1["session_id"], session1.session_id.clone());

    device
        .write_all(&packets::publish_qos0(
            "devices/p2p/aa:bb:cc:dd:ee:03",
            &packets::hello_payload(serde_json::json!({})),
        ))
        .await
        .unwrap();

    // Pump the first mock session so tokio-tungstenite completes the close
    // handshake the duplicate hello triggers, unblocking the gateway's
    // wait on the prior Session's teardown.
    assert_eq!(session1.recv_text().await, None);

    let goodbye = decode::decode_publish_json(&decode::read_frame(&mut device).await);
    assert_eq!(goodbye["type"], "goodbye");
    assert_eq!(goodbye["session_id"], session1.session_id);

    let session2 = upstream
        .next_session()
        .await
        .expect("second session accepted");
    assert_ne!(session2.session_id, session1.session_id);

    let hello2 = decode::decode_publish_json(&decode::read_frame(&mut device).await);
    assert_eq!(hello2["type"], "hello");
    assert_eq!(hello2["session_id"], session2.session_id);
}
