//! Raw pub/sub frame builders for integration tests, duplicating the wire
//! subset `codec.rs` decodes so tests can drive the gateway without
//! depending on the `gatewayd` binary crate.

fn encode_varint(mut value: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn encode_utf8_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Build a CONNECT packet: clean session, no will/username/password.
pub fn connect(client_id: &str, keep_alive_secs: u16) -> Vec<u8> {
    let mut body = Vec::new();
    encode_utf8_string("MQTT", &mut body);
    body.push(4); // protocol level
    body.push(0x02); // clean session
    body.extend_from_slice(&keep_alive_secs.to_be_bytes());
    encode_utf8_string(client_id, &mut body);

    let mut out = vec![0x10];
    encode_varint(body.len(), &mut out);
    out.extend_from_slice(&body);
    out
}

/// Build a QoS0 PUBLISH carrying `payload` on `topic`.
pub fn publish_qos0(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    encode_utf8_string(topic, &mut body);
    body.extend_from_slice(payload);

    let mut out = vec![0x30];
    encode_varint(body.len(), &mut out);
    out.extend_from_slice(&body);
    out
}

/// Build a QoS1 PUBLISH (used by the reject-qos1 edge case test).
pub fn publish_qos1(topic: &str, packet_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    encode_utf8_string(topic, &mut body);
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.extend_from_slice(payload);

    let mut out = vec![0x32];
    encode_varint(body.len(), &mut out);
    out.extend_from_slice(&body);
    out
}

pub fn subscribe(packet_id: u16, filter: &str, requested_qos: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&packet_id.to_be_bytes());
    encode_utf8_string(filter, &mut body);
    body.push(requested_qos);

    let mut out = vec![0x82];
    encode_varint(body.len(), &mut out);
    out.extend_from_slice(&body);
    out
}

pub fn pingreq() -> Vec<u8> {
    vec![0xC0, 0x00]
}

pub fn disconnect() -> Vec<u8> {
    vec![0xE0, 0x00]
}

/// `{"type":"hello","version":3,"audio_params":...}` payload bytes.
pub fn hello_payload(audio_params: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": "hello",
        "version": 3,
        "audio_params": audio_params,
    }))
    .expect("hello payload always serializes")
}

pub fn goodbye_payload(session_id: Option<&str>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": "goodbye",
        "session_id": session_id,
    }))
    .expect("goodbye payload always serializes")
}
