use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    time::Instant,
};

use super::{
    wire::Message,
    Command,
    Connection,
    ConnectionState,
    PendingRequests,
    PendingResult,
};
use crate::{
    bson::doc,
    error::{ErrorKind, RETRYABLE_WRITE_ERROR},
    event::{command::CommandEvent, EventHandler},
    options::ServerAddress,
    trace::command::CommandEventEmitter,
};

fn connection() -> (Connection, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let conn = Connection::new(1, ServerAddress::default(), client, None);
    (conn, server)
}

fn ping(n: i32) -> Command {
    Command::new("ping", "admin", doc! { "ping": 1, "n": n })
}

async fn reply(server: &mut DuplexStream, request: &Message, body: crate::bson::Document) {
    let frame = Message::new_reply(0, request.request_id, body)
        .encode()
        .unwrap();
    server.write_all(&frame).await.unwrap();
}

async fn wait_for_pending(conn: &Connection, count: usize) {
    while conn.pending_count() != count {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test]
fn request_ids_wrap_and_skip_in_flight() {
    let mut pending = PendingRequests::starting_at(i32::MAX);
    assert_eq!(pending.allocate(), i32::MAX);

    let (sender, _receiver) = tokio::sync::oneshot::channel();
    pending.in_flight.insert(
        1,
        PendingResult {
            sender,
            created: Instant::now(),
        },
    );
    assert_eq!(pending.allocate(), 2);
    assert_eq!(pending.allocate(), 3);
}

#[tokio::test]
async fn concurrent_replies_are_matched_by_request_id() {
    let (conn, mut server) = connection();
    conn.mark_ready();
    assert_eq!(conn.state(), ConnectionState::Ready);

    let respond = async {
        let first = Message::read_from(&mut server, None).await.unwrap();
        let second = Message::read_from(&mut server, None).await.unwrap();
        assert_ne!(first.request_id, second.request_id);

        // Answer in reverse order.
        for request in [&second, &first] {
            let n = request.document_payload.get_i32("n").unwrap();
            reply(&mut server, request, doc! { "ok": 1, "echo": n }).await;
        }
    };

    let (a, b, ()) = tokio::join!(conn.execute(ping(1), None), conn.execute(ping(2), None), respond);

    assert_eq!(a.unwrap().body.get_i32("echo").unwrap(), 1);
    assert_eq!(b.unwrap().body.get_i32("echo").unwrap(), 2);
    assert_eq!(conn.pending_count(), 0);
    assert!(conn.last_round_trip_time().is_some());
}

#[tokio::test]
async fn transport_failure_fails_pending_requests() {
    let (conn, mut server) = connection();
    conn.mark_ready();

    let drop_server = async move {
        Message::read_from(&mut server, None).await.unwrap();
        drop(server);
    };

    let (result, ()) = tokio::join!(conn.execute(ping(1), None), drop_server);
    let error = result.unwrap_err();
    assert!(error.is_reconnect());
    assert!(error.contains_label(RETRYABLE_WRITE_ERROR));
    assert!(error.request_sent);

    assert_eq!(conn.wait_for_termination().await, ConnectionState::Failed);
    assert!(!conn.is_usable());

    let error = conn.execute(ping(2), None).await.unwrap_err();
    assert!(error.is_reconnect());
}

#[tokio::test]
async fn close_cancels_pending_requests() {
    let (conn, mut server) = connection();
    let conn = Arc::new(conn);

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.execute(ping(1), None).await }
    });
    Message::read_from(&mut server, None).await.unwrap();
    wait_for_pending(&conn, 1).await;

    conn.close();
    let error = task.await.unwrap().unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::Cancelled { .. }));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn deadline_releases_request_and_late_reply_is_discarded() {
    let (conn, mut server) = connection();
    conn.mark_ready();

    let deadline = Instant::now() + Duration::from_millis(50);
    let (result, first) = tokio::join!(conn.execute(ping(1), Some(deadline)), async {
        Message::read_from(&mut server, None).await.unwrap()
    });
    assert!(result.unwrap_err().is_time_exceeded());
    assert_eq!(conn.pending_count(), 0);

    // The late reply matches nothing; the connection keeps working.
    reply(&mut server, &first, doc! { "ok": 1, "echo": 1 }).await;
    let respond = async {
        let second = Message::read_from(&mut server, None).await.unwrap();
        reply(&mut server, &second, doc! { "ok": 1, "echo": 2 }).await;
    };
    let (result, ()) = tokio::join!(conn.execute(ping(2), None), respond);
    assert_eq!(result.unwrap().body.get_i32("echo").unwrap(), 2);
    assert_eq!(conn.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn more_to_come_completes_once_written() {
    let (conn, mut server) = connection();
    conn.mark_ready();

    let mut command = Command::new("insert", "db", doc! { "insert": "coll" });
    command.more_to_come = true;
    let response = conn.execute(command, None).await.unwrap();
    assert!(response.is_success());
    assert_eq!(conn.pending_count(), 0);

    let received = Message::read_from(&mut server, None).await.unwrap();
    assert!(received.is_more_to_come());
}

#[tokio::test]
async fn malformed_reply_fails_connection() {
    let (conn, mut server) = connection();
    conn.mark_ready();

    let respond = async {
        Message::read_from(&mut server, None).await.unwrap();
        // A well-sized header with an unknown opcode.
        let mut frame = Vec::new();
        frame.extend_from_slice(&16i32.to_le_bytes());
        frame.extend_from_slice(&7i32.to_le_bytes());
        frame.extend_from_slice(&1i32.to_le_bytes());
        frame.extend_from_slice(&9999i32.to_le_bytes());
        server.write_all(&frame).await.unwrap();
    };

    let (result, ()) = tokio::join!(conn.execute(ping(1), None), respond);
    let error = result.unwrap_err();
    assert!(error.is_reconnect());
    assert!(error.source.unwrap().is_protocol_error());
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn interrupt_fails_pending_requests() {
    let (conn, mut server) = connection();
    let conn = Arc::new(conn);
    conn.mark_ready();

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.execute(ping(1), None).await }
    });
    Message::read_from(&mut server, None).await.unwrap();
    wait_for_pending(&conn, 1).await;

    conn.interrupt(crate::error::Error::reconnect("server stepped down"));
    let error = task.await.unwrap().unwrap_err();
    assert!(error.is_reconnect());
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn command_events_share_request_id() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let events = events.clone();
        EventHandler::callback(move |event: CommandEvent| events.lock().unwrap().push(event))
    };

    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let conn = Connection::new(
        7,
        ServerAddress::default(),
        client,
        Some(CommandEventEmitter::new(Some(handler))),
    );
    let respond = async {
        let request = Message::read_from(&mut server, None).await.unwrap();
        reply(&mut server, &request, doc! { "ok": 0, "code": 2, "errmsg": "bad" }).await;
    };
    let (result, ()) = tokio::join!(conn.execute(ping(1), None), respond);
    assert_eq!(result.unwrap().body.get_i32("code").unwrap(), 2);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    let (started, failed) = match (&events[0], &events[1]) {
        (CommandEvent::Started(started), CommandEvent::Failed(failed)) => (started, failed),
        other => panic!("unexpected events: {other:?}"),
    };
    assert_eq!(started.request_id, failed.request_id);
    assert_eq!(started.command_name, "ping");
    assert_eq!(started.command.get_str("$db").unwrap(), "admin");
    assert_eq!(failed.connection.id, 7);
}
