//! S2: a CONNECT with a client-id that doesn't parse into the
//! `<board>@@@<mac>@@@<uuid>` shape gets the connection dropped with no
//! CONNACK at all.

mod common;

use common::{config_with_upstream, Gateway};
use gw_test_support::packets;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn malformed_client_id_closes_connection_without_connack() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;

    let mut device = gateway.connect().await;
    device
        .write_all(&packets::connect("not-a-valid-client-id", 60))
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = device.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "gateway must close the socket, not reply");
}

#[tokio::test]
async fn client_id_with_unparseable_mac_segment_closes_connection() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;

    let mut device = gateway.connect().await;
    device
        .write_all(&packets::connect("board@@@not_a_mac@@@uuid-1", 60))
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = device.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "gateway must close the socket, not reply");
}
