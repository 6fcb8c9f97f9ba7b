use pretty_assertions::assert_eq;

use super::message::{DocumentSequence, Message, MessageFlags, DEFAULT_MAX_MESSAGE_SIZE_BYTES};
use crate::{
    bson::doc,
    cmap::conn::command::Command,
    selection_criteria::ReadPreference,
};

fn le_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[test]
fn encode_writes_standard_header() {
    let command = Command::new("ping", "admin", doc! { "ping": 1 });
    let frame = Message::from_command(&command, 42).encode().unwrap();

    assert_eq!(le_i32(&frame, 0) as usize, frame.len());
    assert_eq!(le_i32(&frame, 4), 42);
    assert_eq!(le_i32(&frame, 8), 0);
    assert_eq!(le_i32(&frame, 12), 2013);
    // flags, then the kind 0 section marker
    assert_eq!(le_i32(&frame, 16), 0);
    assert_eq!(frame[20], 0);
}

#[test]
fn more_to_come_sets_flag_bit() {
    let mut command = Command::new("insert", "db", doc! { "insert": "c" });
    command.more_to_come = true;
    let frame = Message::from_command(&command, 1).encode().unwrap();
    assert_eq!(le_i32(&frame, 16), 0b10);

    let decoded = Message::decode(&frame).unwrap();
    assert!(decoded.is_more_to_come());
}

#[test]
fn command_document_includes_db_and_read_preference() {
    let command = Command::new_read(
        "find",
        "test",
        Some(ReadPreference::SecondaryPreferred),
        doc! { "find": "c", "filter": {} },
    );
    assert_eq!(
        command.to_document(),
        doc! {
            "find": "c",
            "filter": {},
            "$db": "test",
            "$readPreference": { "mode": "secondaryPreferred" },
        }
    );

    let primary = Command::new_read("find", "test", Some(ReadPreference::Primary), doc! {});
    assert!(!primary.to_document().contains_key("$readPreference"));
}

#[test]
fn decode_sections_and_checksum() {
    let message = Message {
        document_payload: doc! { "insert": "c", "$db": "test" },
        document_sequences: vec![DocumentSequence {
            identifier: "documents".to_string(),
            documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
        }],
        request_id: 7,
        response_to: 3,
        flags: MessageFlags::CHECKSUM_PRESENT,
        checksum: Some(0xdead_beef),
    };

    let decoded = Message::decode(&message.encode().unwrap()).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(
        decoded.into_document(),
        doc! {
            "insert": "c",
            "$db": "test",
            "documents": [{ "_id": 1 }, { "_id": 2 }],
        }
    );
}

#[test]
fn truncated_frames_are_protocol_errors() {
    let frame = Message::from_command(&Command::new("ping", "admin", doc! { "ping": 1 }), 1)
        .encode()
        .unwrap();

    for len in [0, 10, 16, 20, frame.len() - 1] {
        let error = Message::decode(&frame[..len]).unwrap_err();
        assert!(error.is_protocol_error(), "length {len}: {error:?}");
    }
}

#[test]
fn garbage_is_a_protocol_error() {
    let mut frame = Message::from_command(&Command::new("ping", "admin", doc! { "ping": 1 }), 1)
        .encode()
        .unwrap();

    // unknown opcode
    let mut bad_opcode = frame.clone();
    bad_opcode[12..16].copy_from_slice(&2004i32.to_le_bytes());
    assert!(Message::decode(&bad_opcode).unwrap_err().is_protocol_error());

    // unknown section kind
    frame[20] = 9;
    assert!(Message::decode(&frame).unwrap_err().is_protocol_error());
}

#[test]
fn decode_legacy_reply() {
    let mut body = Vec::new();
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(&0i64.to_le_bytes());
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(&1i32.to_le_bytes());
    doc! { "ismaster": true, "ok": 1 }.to_writer(&mut body).unwrap();

    let mut frame = Vec::new();
    frame.extend_from_slice(&((16 + body.len()) as i32).to_le_bytes());
    frame.extend_from_slice(&5i32.to_le_bytes());
    frame.extend_from_slice(&9i32.to_le_bytes());
    frame.extend_from_slice(&1i32.to_le_bytes());
    frame.extend_from_slice(&body);

    let message = Message::decode(&frame).unwrap();
    assert_eq!(message.response_to, 9);
    assert_eq!(message.document_payload, doc! { "ismaster": true, "ok": 1 });
}

#[tokio::test]
async fn read_from_stream() {
    let first = Message::from_command(&Command::new("ping", "admin", doc! { "ping": 1 }), 1);
    let second = Message::from_command(&Command::new("ping", "admin", doc! { "ping": 2 }), 2);
    let mut bytes = first.encode().unwrap();
    bytes.extend(second.encode().unwrap());

    let mut reader = bytes.as_slice();
    assert_eq!(Message::read_from(&mut reader, None).await.unwrap(), first);
    assert_eq!(Message::read_from(&mut reader, None).await.unwrap(), second);

    // EOF mid-stream surfaces as an I/O error.
    let error = Message::read_from(&mut reader, None).await.unwrap_err();
    assert!(error.is_network_error());
}

#[tokio::test]
async fn read_from_rejects_oversized_frames() {
    let mut bytes = (DEFAULT_MAX_MESSAGE_SIZE_BYTES + 1).to_le_bytes().to_vec();
    bytes.extend([0u8; 12]);
    let error = Message::read_from(&mut bytes.as_slice(), None)
        .await
        .unwrap_err();
    assert!(error.is_protocol_error());
}
