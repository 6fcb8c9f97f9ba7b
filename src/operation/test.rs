use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson},
    cmap::RawCommandResponse,
    coll::Namespace,
    concern::WriteConcern,
    error::{Error, ErrorKind},
    operation::{
        CommitTransaction,
        CountDocuments,
        Delete,
        Find,
        Insert,
        Operation,
        Retryability,
        RunCommand,
    },
    options::ServerAddress,
    sdam::SelectionCriteria,
    selection_criteria::ReadPreference,
};

fn ns() -> Namespace {
    Namespace::new("test", "coll")
}

fn response(body: crate::bson::Document) -> RawCommandResponse {
    RawCommandResponse::with_document(ServerAddress::default(), body)
}

#[test]
fn insert_prepends_generated_id() {
    let mut insert = Insert::new(ns(), doc! { "x": 1 }, None, None);
    let command = insert.build().unwrap();

    assert_eq!(command.name, "insert");
    assert_eq!(command.target_db, "test");
    let documents = command.body.get_array("documents").unwrap();
    let document = documents[0].as_document().unwrap();
    assert_eq!(document.keys().next().map(String::as_str), Some("_id"));
    assert!(matches!(document.get("_id"), Some(Bson::ObjectId(_))));
    assert!(!command.body.contains_key("writeConcern"));

    let result = insert.handle_response(response(doc! { "n": 1, "ok": 1 })).unwrap();
    assert_eq!(Some(&result.inserted_id), document.get("_id"));
}

#[test]
fn insert_keeps_caller_id_and_write_concern() {
    let mut insert = Insert::new(
        ns(),
        doc! { "_id": 7, "x": 1 },
        Some(WriteConcern::majority()),
        None,
    );
    let command = insert.build().unwrap();

    assert_eq!(
        command.body.get_document("writeConcern").unwrap(),
        &doc! { "w": "majority" }
    );
    let result = insert.handle_response(response(doc! { "n": 1, "ok": 1 })).unwrap();
    assert_eq!(result.inserted_id, Bson::Int32(7));
}

#[test]
fn unacknowledged_delete_reports_zero() {
    let mut delete = Delete::new(
        ns(),
        doc! { "x": 1 },
        None,
        Some(WriteConcern::unacknowledged()),
        None,
    );
    assert!(!delete.is_acknowledged());

    let command = delete.build().unwrap();
    assert_eq!(
        command.body.get_array("deletes").unwrap()[0],
        Bson::Document(doc! { "q": { "x": 1 }, "limit": 0 })
    );
    let result = delete.handle_response(response(doc! { "ok": 1 })).unwrap();
    assert_eq!(result.deleted_count, 0);
}

#[test]
fn find_routes_by_read_preference() {
    let mut find = Find::new(
        ns(),
        doc! { "x": 1 },
        Some(1),
        Some(ReadPreference::SecondaryPreferred.into()),
        None,
        None,
    );
    let command = find.build().unwrap();

    assert_eq!(command.read_pref, Some(ReadPreference::SecondaryPreferred));
    assert_eq!(command.body.get_i64("limit"), Ok(1));
    assert_eq!(find.retryability(), Retryability::Read);

    let batch = find
        .handle_response(response(doc! {
            "cursor": { "id": 0_i64, "ns": "test.coll", "firstBatch": [{ "x": 1 }] },
            "ok": 1,
        }))
        .unwrap();
    assert_eq!(batch, vec![doc! { "x": 1 }]);
}

#[test]
fn count_documents_builds_group_pipeline() {
    let mut count = CountDocuments::new(ns(), doc! { "x": 1 }, Some(2), None, None, None, None)
        .unwrap();
    let command = count.build().unwrap();

    assert_eq!(command.name, "aggregate");
    assert_eq!(
        command.body.get_array("pipeline").unwrap(),
        &vec![
            Bson::Document(doc! { "$match": { "x": 1 } }),
            Bson::Document(doc! { "$skip": 2_i64 }),
            Bson::Document(doc! { "$group": { "_id": 1, "n": { "$sum": 1 } } }),
        ]
    );

    let empty = response(doc! { "cursor": { "id": 0_i64, "firstBatch": [] }, "ok": 1 });
    assert_eq!(count.handle_response(empty).unwrap(), 0);

    let counted = response(doc! {
        "cursor": { "id": 0_i64, "firstBatch": [{ "_id": 1, "n": 3 }] },
        "ok": 1,
    });
    assert_eq!(count.handle_response(counted).unwrap(), 3);
}

#[test]
fn commit_always_sends_write_concern() {
    let mut commit = CommitTransaction::new(None, None, None, None);
    let command = commit.build().unwrap();

    assert_eq!(command.target_db, "admin");
    assert_eq!(
        command.body,
        doc! { "commitTransaction": 1, "writeConcern": {} }
    );
}

#[test]
fn commit_carries_max_commit_time() {
    let mut commit = CommitTransaction::new(
        Some(WriteConcern::nodes(1)),
        Some(Duration::from_millis(12345)),
        Some(SelectionCriteria::Pinned(ServerAddress::default())),
        None,
    );
    let command = commit.build().unwrap();

    assert_eq!(command.body.get_i64("maxTimeMS"), Ok(12345));
    assert_eq!(
        command.body.get_document("writeConcern").unwrap(),
        &doc! { "w": 1 }
    );
    assert!(matches!(
        commit.selection_criteria(),
        Some(SelectionCriteria::Pinned(_))
    ));
}

#[test]
fn commit_retry_uses_majority() {
    let mut commit = CommitTransaction::new(
        Some(WriteConcern::nodes(1)),
        Some(Duration::from_millis(500)),
        None,
        None,
    );
    commit.update_for_retry();
    let command = commit.build().unwrap();

    assert_eq!(
        command.body.get_document("writeConcern").unwrap(),
        &doc! { "w": "majority", "wtimeout": 10000 }
    );
    assert_eq!(command.body.get_i64("maxTimeMS"), Ok(500));
}

#[test]
fn run_command_rejects_empty_document() {
    let error = RunCommand::new("test".to_string(), doc! {}, None, None, None).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
}

#[test]
fn run_command_uses_first_key_as_name() {
    let mut run_command = RunCommand::new(
        "test".to_string(),
        doc! { "ping": 1 },
        None,
        Some(WriteConcern::majority()),
        None,
    )
    .unwrap();
    let command = run_command.build().unwrap();

    assert_eq!(command.name, "ping");
    assert_eq!(run_command.name(), "ping");
    assert!(command.body.contains_key("writeConcern"));

    let is_master = RunCommand::new(
        "admin".to_string(),
        doc! { "isMaster": 1 },
        None,
        None,
        None,
    )
    .unwrap();
    assert!(!is_master.supports_sessions());
}

#[test]
fn writes_retry_only_unsent_requests() {
    let unsent = Error::reconnect("no connection");
    let sent = Error::reconnect("connection reset").with_request_sent(true);
    let command_error = Error::invalid_response("bad reply");

    assert!(Retryability::Write.can_retry(&unsent));
    assert!(!Retryability::Write.can_retry(&sent));
    assert!(Retryability::Read.can_retry(&sent));
    assert!(!Retryability::Read.can_retry(&command_error));
    assert!(!Retryability::None.can_retry(&unsent));
}
