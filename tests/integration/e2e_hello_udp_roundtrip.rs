//! S1: happy path -- CONNECT, hello, UDP audio forwarded upstream and back
//! (invariants #5 cookie/mac-bound decryption, #6 no IV ever sent on the
//! wire) -- exercising components A through G together.

mod common;

use common::{client_id, config_with_upstream, Gateway};
use gw_test_support::{decode, packets, udp, MockUpstream};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;

#[tokio::test]
async fn hello_then_udp_audio_round_trips_through_upstream() {
    let mut upstream = MockUpstream::start().await;
    let gateway = Gateway::start(config_with_upstream(&upstream.url())).await;

    let mut device = gateway.connect().await;
    let id = client_id("board", "aa_bb_cc_dd_ee_01", "uuid-1");
    device
        .write_all(&packets::connect(&id, 60))
        .await
        .unwrap();
    assert_eq!(decode::read_frame(&mut device).await, decode::ReplyPacket::ConnAck(0x00));

    device
        .write_all(&packets::publish_qos0(
            "devices/p2p/aa:bb:cc:dd:ee:01",
            &packets::hello_payload(serde_json::json!({"format": "opus"})),
        ))
        .await
        .unwrap();

    let mut session = upstream.next_session().await.expect("upstream accepted a session");
    assert_eq!(session.device_id, "aa:bb:cc:dd:ee:01");
    assert_eq!(session.audio_params, serde_json::json!({"format": "opus"}));

    let hello_reply_packet = decode::read_frame(&mut device).await;
    let hello_reply = decode::decode_publish_json(&hello_reply_packet);
    assert_eq!(hello_reply["type"], "hello");
    assert_eq!(hello_reply["session_id"], session.session_id.clone());
    let udp_desc = &hello_reply["udp"];
    assert_eq!(udp_desc["port"], gateway.udp_addr.port());
    assert_eq!(udp_desc["encryption"], "aes-128-ctr");

    let key = udp::key_from_hex(udp_desc["key"].as_str().unwrap());
    let initial_header_bytes = udp::header_from_hex(udp_desc["nonce"].as_str().unwrap());
    let initial_header = udp::UdpHeader::from_bytes(&initial_header_bytes);

    let device_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let opus_frame = b"fake opus bytes".to_vec();
    let outbound_header =
        udp::UdpHeader::new(opus_frame.len() as u16, initial_header.mac, initial_header.cookie, 1);
    let datagram = udp::build_encrypted_datagram(&key, outbound_header, &opus_frame);
    device_udp
        .send_to(&datagram, ("127.0.0.1", gateway.udp_addr.port()))
        .await
        .unwrap();

    let forwarded = session.recv_binary().await.expect("upstream received audio");
    assert_eq!(forwarded, opus_frame);

    let downstream_frame = b"synthesized reply audio".to_vec();
    session.send_binary(downstream_frame.clone()).await;

    let mut recv_buf = [0u8; 2048];
    let (len, _peer) = device_udp.recv_from(&mut recv_buf).await.unwrap();
    let (returned_header, plaintext) = udp::decrypt_datagram(&key, &recv_buf[..len]).unwrap();
    assert_eq!(returned_header.mac, initial_header.mac);
    assert_eq!(returned_header.cookie, initial_header.cookie);
    assert_eq!(plaintext, downstream_frame);

    device
        .write_all(&packets::publish_qos0(
            "devices/p2p/aa:bb:cc:dd:ee:01",
            &packets::goodbye_payload(Some(&session.session_id)),
        ))
        .await
        .unwrap();

    // Drain the mock side so tokio-tungstenite completes the close
    // handshake the device-initiated goodbye triggers on the gateway side.
    let _ = session.recv_text().await;

    let goodbye_packet = decode::read_frame(&mut device).await;
    let goodbye = decode::decode_publish_json(&goodbye_packet);
    assert_eq!(goodbye["type"], "goodbye");
}
