//! S6: the keep-alive sweeper (component F) closes and evicts a
//! connection that has gone silent past its negotiated keep-alive, with no
//! slack applied to the comparison.

mod common;

use std::time::Duration;

use common::{client_id, config_with_upstream, Gateway};
use gatewayd::sweeper;
use gw_test_support::{decode, packets};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test(start_paused = true)]
async fn idle_connection_closes_once_its_keep_alive_elapses() {
    let gateway = Gateway::start(config_with_upstream("ws://127.0.0.1:1")).await;
    tokio::spawn(sweeper::run(gateway.registry.clone()));

    let mut device = gateway.connect().await;
    let id = client_id("board", "aa_bb_cc_dd_ee_04", "uuid-4");
    device.write_all(&packets::connect(&id, 1)).await.unwrap();
    assert_eq!(
        decode::read_frame(&mut device).await,
        decode::ReplyPacket::ConnAck(0x00)
    );

    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut buf = [0u8; 16];
    let n = device.read(&mut buf).await.unwrap();
    assert_eq!(
        n, 0,
        "sweeper must close an idle connection past its keep-alive"
    );

    let mac = gw_protocol::Mac::from_colon_hex("aa:bb:cc:dd:ee:04").unwrap();
    assert!(gateway.registry.get(&mac).await.is_none());
}
