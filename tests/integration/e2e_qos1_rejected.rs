//! S3: the gateway only ever accepts QoS0 publishes from a device; a QoS1
//! publish is a protocol violation that closes the connection.

mod common;

use common::{client_id, config_with_upstream, Gateway};
use gw_test_support::{decode, packets};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn qos1_publish_closes_the_connection() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;

    let mut device = gateway.connect().await;
    let id = client_id("board", "aa_bb_cc_dd_ee_02", "uuid-2");
    device.write_all(&packets::connect(&id, 60)).await.unwrap();
    assert_eq!(
        decode::read_frame(&mut device).await,
        decode::ReplyPacket::ConnAck(0x00)
    );

    device
        .write_all(&packets::publish_qos1(
            "devices/p2p/aa:bb:cc:dd:ee:02",
            1,
            b"{\"type\":\"hello\"}",
        ))
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = device.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "gateway must close the connection on QoS1");
}
