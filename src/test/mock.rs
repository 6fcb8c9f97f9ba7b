//! An in-process replica set member that speaks OP_MSG over TCP.
//!
//! It understands the handful of commands the client sends: the probes, `ping`, simple CRUD
//! (`insert`, `find`, `aggregate` with `$match`/`$skip`/`$limit`/`$group`, `delete`), the
//! transaction commands, `endSessions` and a `failCommand` fail point. Writes made inside a
//! transaction are only visible to the session that made them until the transaction commits.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::watch,
};

use crate::{
    bson::{doc, oid::ObjectId, spec::BinarySubtype, Binary, Bson, Document, Timestamp},
    cmap::conn::wire::Message,
    options::ServerAddress,
    runtime::{self, AsyncJoinHandle},
    serde_util,
};

const CLUSTER_TIME_SECONDS: u32 = 1_700_000_000;

/// The role a mock member plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MockRole {
    Primary,
    Secondary,
}

/// What the `failCommand` fail point does to matching commands.
#[derive(Clone, Debug, Default)]
pub(crate) struct FailPoint {
    pub(crate) commands: Vec<String>,

    /// `None` keeps the fail point on until it is turned off.
    pub(crate) times: Option<u32>,

    pub(crate) error_code: i32,

    pub(crate) error_labels: Vec<String>,

    pub(crate) close_connection: bool,
}

impl FailPoint {
    pub(crate) fn fail_command(commands: &[&str], error_code: i32) -> Self {
        Self {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            times: Some(1),
            error_code,
            ..Default::default()
        }
    }

    pub(crate) fn with_labels(mut self, labels: &[&str]) -> Self {
        self.error_labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    fn from_command(body: &Document) -> std::result::Result<Option<Self>, Document> {
        let times = match body.get("mode") {
            Some(Bson::String(mode)) if mode == "off" => return Ok(None),
            Some(Bson::String(mode)) if mode == "alwaysOn" => None,
            Some(Bson::Document(mode)) => mode
                .get("times")
                .and_then(serde_util::get_int)
                .map(|times| times as u32),
            _ => return Err(error_reply(2, "BadValue", "invalid fail point mode")),
        };
        let data = body.get_document("data").cloned().unwrap_or_default();
        let strings = |key: &str| -> Vec<String> {
            data.get_array(key)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|value| value.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(Some(Self {
            commands: strings("failCommands"),
            times,
            error_code: data
                .get("errorCode")
                .and_then(serde_util::get_int)
                .unwrap_or(8) as i32,
            error_labels: strings("errorLabels"),
            close_connection: data.get_bool("closeConnection").unwrap_or(false),
        }))
    }

    fn to_command(&self) -> Document {
        let mode = match self.times {
            Some(times) => Bson::Document(doc! { "times": times as i32 }),
            None => Bson::String("alwaysOn".to_string()),
        };
        doc! {
            "configureFailPoint": "failCommand",
            "mode": mode,
            "data": {
                "failCommands": self.commands.clone(),
                "errorCode": self.error_code,
                "errorLabels": self.error_labels.clone(),
                "closeConnection": self.close_connection,
            },
        }
    }
}

#[derive(Debug)]
enum PendingWrite {
    Insert {
        ns: String,
        documents: Vec<Document>,
    },
    Delete {
        ns: String,
        filter: Document,
        limit: i64,
    },
}

#[derive(Debug)]
struct MockTransaction {
    txn_number: i64,
    writes: Vec<PendingWrite>,
}

#[derive(Debug)]
struct MockState {
    address: ServerAddress,
    role: MockRole,
    set_name: Option<String>,
    hosts: Vec<String>,
    election_id: ObjectId,
    clock: u32,
    next_reply_id: i32,
    collections: HashMap<String, Vec<Document>>,
    transactions: HashMap<String, MockTransaction>,
    committed: HashMap<String, i64>,
    fail_point: Option<FailPoint>,
}

enum MockReply {
    Document(Document),
    CloseConnection,
}

type CommandResult = std::result::Result<Document, Document>;

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    paused: watch::Sender<bool>,
    down: watch::Sender<bool>,
}

/// A running mock member. Dropping it stops the server.
#[derive(Debug)]
pub(crate) struct MockServer {
    address: ServerAddress,
    shared: Arc<Shared>,
    accept_task: AsyncJoinHandle<()>,
}

impl MockServer {
    /// Starts a standalone server (no replica set name) playing `role`.
    pub(crate) async fn start(role: MockRole) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = ServerAddress::parse(listener.local_addr().unwrap().to_string()).unwrap();

        let (paused, _) = watch::channel(false);
        let (down, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState {
                address: address.clone(),
                role,
                set_name: None,
                hosts: Vec::new(),
                election_id: ObjectId::new(),
                clock: 0,
                next_reply_id: 1,
                collections: HashMap::new(),
                transactions: HashMap::new(),
                committed: HashMap::new(),
                fail_point: None,
            }),
            paused,
            down,
        });

        let accept_task = runtime::spawn(accept_loop(listener, shared.clone()));
        Self {
            address,
            shared,
            accept_task,
        }
    }

    /// Starts `members` servers forming replica set `set_name`. The first one is the primary.
    pub(crate) async fn replica_set(set_name: &str, members: usize) -> Vec<Self> {
        let mut servers = Vec::with_capacity(members);
        for i in 0..members {
            let role = if i == 0 {
                MockRole::Primary
            } else {
                MockRole::Secondary
            };
            servers.push(Self::start(role).await);
        }

        let hosts: Vec<String> = servers.iter().map(|s| s.address.to_string()).collect();
        for server in &servers {
            let mut state = server.state();
            state.set_name = Some(set_name.to_string());
            state.hosts = hosts.clone();
        }
        servers
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// A connection string seeded with this server only.
    pub(crate) fn uri(&self, query: &str) -> String {
        let set_name = self.state().set_name.clone();
        let mut options: Vec<String> = set_name
            .map(|name| format!("replicaSet={name}"))
            .into_iter()
            .collect();
        if !query.is_empty() {
            options.push(query.to_string());
        }
        format!("mongodb://{}/?{}", self.address, options.join("&"))
    }

    pub(crate) fn set_role(&self, role: MockRole) {
        let mut state = self.state();
        if role == MockRole::Primary && state.role != MockRole::Primary {
            state.election_id = ObjectId::new();
        }
        state.role = role;
    }

    /// Stops answering: requests are still read but replies are held back until `resume`.
    pub(crate) fn pause(&self) {
        self.shared.paused.send_replace(true);
    }

    pub(crate) fn resume(&self) {
        self.shared.paused.send_replace(false);
    }

    /// Drops every open connection and closes new ones as soon as they are accepted.
    pub(crate) fn go_down(&self) {
        self.shared.down.send_replace(true);
    }

    pub(crate) fn come_up(&self) {
        self.shared.down.send_replace(false);
    }

    pub(crate) fn set_fail_point(&self, fail_point: FailPoint) {
        self.state().fail_point = Some(fail_point);
    }

    /// The `configureFailPoint` command that installs `fail_point`.
    pub(crate) fn fail_point_command(fail_point: &FailPoint) -> Document {
        fail_point.to_command()
    }

    /// The committed documents of `ns`.
    pub(crate) fn documents(&self, ns: &str) -> Vec<Document> {
        self.state()
            .collections
            .get(ns)
            .cloned()
            .unwrap_or_default()
    }

    /// The number of transactions that are neither committed nor aborted.
    pub(crate) fn open_transactions(&self) -> usize {
        self.state().transactions.len()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.shared.state()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shared.down.send_replace(true);
        self.shared.paused.send_replace(false);
        self.accept_task.abort();
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(_) => continue,
        };
        if *shared.down.borrow() {
            drop(stream);
            continue;
        }
        let _ = stream.set_nodelay(true);
        runtime::spawn(serve_connection(stream, shared.clone()));
    }
}

async fn wait_until(receiver: &mut watch::Receiver<bool>, value: bool) {
    let _ = receiver.wait_for(|current| *current == value).await;
}

async fn serve_connection(mut stream: TcpStream, shared: Arc<Shared>) {
    let mut down = shared.down.subscribe();
    let mut paused = shared.paused.subscribe();

    loop {
        let request = tokio::select! {
            request = Message::read_from(&mut stream, None) => match request {
                Ok(request) => request,
                Err(_) => return,
            },
            _ = wait_until(&mut down, true) => return,
        };

        tokio::select! {
            _ = wait_until(&mut paused, false) => {}
            _ = wait_until(&mut down, true) => return,
        }

        let request_id = request.request_id;
        let more_to_come = request.is_more_to_come();
        let (reply_id, reply) = {
            let mut state = shared.state();
            let reply = state.handle(request.into_document());
            let reply_id = state.next_reply_id;
            state.next_reply_id += 1;
            (reply_id, reply)
        };

        let body = match reply {
            MockReply::Document(body) => body,
            MockReply::CloseConnection => return,
        };
        if more_to_come {
            continue;
        }

        let frame = match Message::new_reply(reply_id, request_id, body).encode() {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}

fn error_reply(code: i32, code_name: &str, message: &str) -> Document {
    doc! {
        "ok": 0.0,
        "errmsg": message,
        "code": code,
        "codeName": code_name,
    }
}

fn not_primary() -> Document {
    error_reply(10107, "NotWritablePrimary", "not primary")
}

fn no_such_transaction() -> Document {
    let mut reply = error_reply(251, "NoSuchTransaction", "transaction is not in progress");
    reply.insert("errorLabels", vec!["TransientTransactionError"]);
    reply
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, value)| document.get(key) == Some(value))
}

fn apply(documents: &mut Vec<Document>, write: &PendingWrite) -> i64 {
    match write {
        PendingWrite::Insert {
            documents: inserted,
            ..
        } => {
            documents.extend(inserted.iter().cloned());
            inserted.len() as i64
        }
        PendingWrite::Delete { filter, limit, .. } => {
            let mut deleted = 0;
            documents.retain(|document| {
                if (*limit == 0 || deleted < *limit) && matches(document, filter) {
                    deleted += 1;
                    false
                } else {
                    true
                }
            });
            deleted
        }
    }
}

impl PendingWrite {
    fn ns(&self) -> &str {
        match self {
            Self::Insert { ns, .. } | Self::Delete { ns, .. } => ns,
        }
    }
}

impl MockState {
    fn handle(&mut self, body: Document) -> MockReply {
        let name = serde_util::first_key(&body).unwrap_or_default().to_string();

        if let Some(reply) = self.trigger_fail_point(&name) {
            return reply;
        }

        let result = match name.as_str() {
            "isMaster" | "ismaster" => Ok(self.is_master()),
            "replSetGetStatus" => self.repl_set_get_status(),
            "ping" => Ok(doc! {}),
            "configureFailPoint" => FailPoint::from_command(&body).map(|fail_point| {
                self.fail_point = fail_point;
                doc! {}
            }),
            "insert" => self.insert(&body),
            "delete" => self.delete(&body),
            "find" => self.find(&body),
            "aggregate" => self.aggregate(&body),
            "commitTransaction" => self.commit_transaction(&body),
            "abortTransaction" => self.abort_transaction(&body),
            "endSessions" => self.end_sessions(&body),
            other => Err(error_reply(
                59,
                "CommandNotFound",
                &format!("no such command: '{other}'"),
            )),
        };

        let mut reply = match result {
            Ok(mut reply) => {
                reply.insert("ok", 1.0);
                reply
            }
            Err(reply) => reply,
        };
        let timestamp = Timestamp {
            time: CLUSTER_TIME_SECONDS,
            increment: self.clock,
        };
        let hash = Binary {
            subtype: BinarySubtype::Generic,
            bytes: vec![0; 20],
        };
        reply.insert("operationTime", timestamp);
        reply.insert(
            "$clusterTime",
            doc! {
                "clusterTime": timestamp,
                "signature": { "hash": hash, "keyId": 0_i64 },
            },
        );
        MockReply::Document(reply)
    }

    fn trigger_fail_point(&mut self, name: &str) -> Option<MockReply> {
        let fail_point = self.fail_point.as_mut()?;
        if !fail_point.commands.iter().any(|c| c == name) {
            return None;
        }

        let reply = if fail_point.close_connection {
            MockReply::CloseConnection
        } else {
            let mut reply = error_reply(
                fail_point.error_code,
                "FailPoint",
                &format!("failing command {name} due to failCommand fail point"),
            );
            if !fail_point.error_labels.is_empty() {
                reply.insert("errorLabels", fail_point.error_labels.clone());
            }
            MockReply::Document(reply)
        };

        if let Some(ref mut times) = fail_point.times {
            *times = times.saturating_sub(1);
            if *times == 0 {
                self.fail_point = None;
            }
        }
        Some(reply)
    }

    fn is_master(&self) -> Document {
        let mut reply = doc! {
            "ismaster": self.role == MockRole::Primary,
            "secondary": self.role == MockRole::Secondary,
            "me": self.address.to_string(),
            "maxWireVersion": 17,
            "maxMessageSizeBytes": 48_000_000,
        };
        if let Some(ref set_name) = self.set_name {
            reply.insert("setName", set_name.clone());
            reply.insert("hosts", self.hosts.clone());
            reply.insert("setVersion", 1);
            if self.role == MockRole::Primary {
                reply.insert("electionId", self.election_id);
                reply.insert("primary", self.address.to_string());
            }
        }
        reply
    }

    fn repl_set_get_status(&self) -> CommandResult {
        let set_name = self.set_name.as_ref().ok_or_else(|| {
            error_reply(76, "NoReplicationEnabled", "not running with --replSet")
        })?;
        let me = self.address.to_string();
        let members: Vec<Document> = self
            .hosts
            .iter()
            .map(|host| {
                let (state, state_str) = match (host == &me, self.role) {
                    (true, MockRole::Primary) => (1, "PRIMARY"),
                    (true, MockRole::Secondary) => (2, "SECONDARY"),
                    (false, _) => (6, "UNKNOWN"),
                };
                doc! { "name": host, "state": state, "stateStr": state_str, "health": 1.0 }
            })
            .collect();
        Ok(doc! { "set": set_name, "members": members })
    }

    fn require_primary(&self) -> CommandResult {
        if self.role == MockRole::Primary {
            Ok(doc! {})
        } else {
            Err(not_primary())
        }
    }

    fn require_readable(&self, body: &Document) -> CommandResult {
        let secondary_ok = body
            .get_document("$readPreference")
            .and_then(|read_pref| read_pref.get_str("mode"))
            .map(|mode| mode != "primary")
            .unwrap_or(false);
        if self.role == MockRole::Primary || secondary_ok {
            Ok(doc! {})
        } else {
            Err(error_reply(
                13435,
                "NotPrimaryNoSecondaryOk",
                "not primary and secondaryOk=false",
            ))
        }
    }

    fn namespace(body: &Document, name: &str) -> String {
        format!(
            "{}.{}",
            body.get_str("$db").unwrap_or("test"),
            body.get_str(name).unwrap_or_default()
        )
    }

    fn session_key(body: &Document) -> Option<String> {
        body.get_document("lsid").ok().map(|lsid| lsid.to_string())
    }

    /// Validates the transaction fields of a statement. Returns the session key if the statement
    /// belongs to a transaction.
    fn transaction_context(
        &mut self,
        body: &Document,
    ) -> std::result::Result<Option<String>, Document> {
        if !matches!(body.get_bool("autocommit"), Ok(false)) {
            return Ok(None);
        }
        let key = Self::session_key(body)
            .ok_or_else(|| error_reply(50768, "InvalidOptions", "transaction requires lsid"))?;
        let txn_number = body
            .get_i64("txnNumber")
            .map_err(|_| error_reply(50768, "InvalidOptions", "transaction requires txnNumber"))?;
        if body.contains_key("writeConcern") {
            return Err(error_reply(
                72,
                "InvalidOptions",
                "Cannot set write concern after starting a transaction",
            ));
        }

        if matches!(body.get_bool("startTransaction"), Ok(true)) {
            self.transactions.insert(
                key.clone(),
                MockTransaction {
                    txn_number,
                    writes: Vec::new(),
                },
            );
        } else {
            match self.transactions.get(&key) {
                Some(transaction) if transaction.txn_number == txn_number => {}
                _ => return Err(no_such_transaction()),
            }
        }
        Ok(Some(key))
    }

    /// The documents of `ns` as seen by the given transaction.
    fn view(&self, ns: &str, transaction: Option<&str>) -> Vec<Document> {
        let mut documents = self.collections.get(ns).cloned().unwrap_or_default();
        if let Some(transaction) = transaction.and_then(|key| self.transactions.get(key)) {
            for write in transaction.writes.iter().filter(|w| w.ns() == ns) {
                apply(&mut documents, write);
            }
        }
        documents
    }

    fn write(&mut self, write: PendingWrite, transaction: Option<String>) -> i64 {
        match transaction {
            Some(key) => {
                let mut view = self.view(write.ns(), Some(&key));
                let n = apply(&mut view, &write);
                if let Some(transaction) = self.transactions.get_mut(&key) {
                    transaction.writes.push(write);
                }
                n
            }
            None => {
                self.clock += 1;
                let documents = self.collections.entry(write.ns().to_string()).or_default();
                apply(documents, &write)
            }
        }
    }

    fn insert(&mut self, body: &Document) -> CommandResult {
        self.require_primary()?;
        let transaction = self.transaction_context(body)?;
        let documents = body
            .get_array("documents")
            .map(|documents| {
                documents
                    .iter()
                    .filter_map(|d| d.as_document().cloned())
                    .collect()
            })
            .unwrap_or_default();
        let write = PendingWrite::Insert {
            ns: Self::namespace(body, "insert"),
            documents,
        };
        let n = self.write(write, transaction);
        Ok(doc! { "n": n as i32 })
    }

    fn delete(&mut self, body: &Document) -> CommandResult {
        self.require_primary()?;
        let transaction = self.transaction_context(body)?;
        let ns = Self::namespace(body, "delete");
        let mut n = 0;
        for statement in body.get_array("deletes").into_iter().flatten() {
            let Some(statement) = statement.as_document() else {
                continue;
            };
            let write = PendingWrite::Delete {
                ns: ns.clone(),
                filter: statement.get_document("q").cloned().unwrap_or_default(),
                limit: statement
                    .get("limit")
                    .and_then(serde_util::get_int)
                    .unwrap_or(0),
            };
            n += self.write(write, transaction.clone());
        }
        Ok(doc! { "n": n as i32 })
    }

    fn find(&mut self, body: &Document) -> CommandResult {
        self.require_readable(body)?;
        let transaction = self.transaction_context(body)?;
        let ns = Self::namespace(body, "find");
        let filter = body.get_document("filter").cloned().unwrap_or_default();
        let limit = body
            .get("limit")
            .and_then(serde_util::get_int)
            .unwrap_or(0)
            .unsigned_abs() as usize;

        let mut batch: Vec<Document> = self
            .view(&ns, transaction.as_deref())
            .into_iter()
            .filter(|document| matches(document, &filter))
            .collect();
        if limit > 0 {
            batch.truncate(limit);
        }
        Ok(doc! { "cursor": { "id": 0_i64, "ns": ns, "firstBatch": batch } })
    }

    fn aggregate(&mut self, body: &Document) -> CommandResult {
        self.require_readable(body)?;
        let transaction = self.transaction_context(body)?;
        let ns = Self::namespace(body, "aggregate");
        let mut documents = self.view(&ns, transaction.as_deref());

        for stage in body.get_array("pipeline").into_iter().flatten() {
            let Some(stage) = stage.as_document() else {
                continue;
            };
            if let Ok(filter) = stage.get_document("$match") {
                documents.retain(|document| matches(document, filter));
            } else if let Some(skip) = stage.get("$skip").and_then(serde_util::get_int) {
                documents = documents.into_iter().skip(skip as usize).collect();
            } else if let Some(limit) = stage.get("$limit").and_then(serde_util::get_int) {
                documents.truncate(limit as usize);
            } else if let Ok(group) = stage.get_document("$group") {
                let id = group.get("_id").cloned().unwrap_or(Bson::Null);
                let mut output = doc! { "_id": id };
                for (field, _) in group.iter().filter(|(field, _)| *field != "_id") {
                    output.insert(field.clone(), documents.len() as i32);
                }
                documents = if documents.is_empty() {
                    Vec::new()
                } else {
                    vec![output]
                };
            } else {
                return Err(error_reply(40324, "Location40324", "unsupported pipeline stage"));
            }
        }
        Ok(doc! { "cursor": { "id": 0_i64, "ns": ns, "firstBatch": documents } })
    }

    fn transaction_target(body: &Document) -> std::result::Result<(String, i64), Document> {
        let key = Self::session_key(body).ok_or_else(no_such_transaction)?;
        let txn_number = body.get_i64("txnNumber").map_err(|_| no_such_transaction())?;
        Ok((key, txn_number))
    }

    fn commit_transaction(&mut self, body: &Document) -> CommandResult {
        self.require_primary()?;
        let (key, txn_number) = Self::transaction_target(body)?;
        match self.transactions.remove(&key) {
            Some(transaction) if transaction.txn_number == txn_number => {
                self.clock += 1;
                for write in &transaction.writes {
                    let documents = self.collections.entry(write.ns().to_string()).or_default();
                    apply(documents, write);
                }
                self.committed.insert(key, txn_number);
                Ok(doc! {})
            }
            Some(transaction) => {
                self.transactions.insert(key, transaction);
                Err(no_such_transaction())
            }
            // Committing again is a no-op.
            None if self.committed.get(&key) == Some(&txn_number) => Ok(doc! {}),
            None => Err(no_such_transaction()),
        }
    }

    fn abort_transaction(&mut self, body: &Document) -> CommandResult {
        self.require_primary()?;
        let (key, txn_number) = Self::transaction_target(body)?;
        match self.transactions.get(&key) {
            Some(transaction) if transaction.txn_number == txn_number => {
                self.transactions.remove(&key);
                Ok(doc! {})
            }
            _ if self.committed.get(&key) == Some(&txn_number) => Err(error_reply(
                256,
                "TransactionCommitted",
                "transaction has been committed",
            )),
            _ => Err(no_such_transaction()),
        }
    }

    fn end_sessions(&mut self, body: &Document) -> CommandResult {
        for lsid in body.get_array("endSessions").into_iter().flatten() {
            if let Some(lsid) = lsid.as_document() {
                self.transactions.remove(&lsid.to_string());
            }
        }
        Ok(doc! {})
    }
}
