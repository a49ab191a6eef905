//! End-to-end: producer → queue → creation workers → store → reconciliation.

use std::sync::Arc;

use assert_matches::assert_matches;
use tally_core::events::CHATS_CREATOR_CLASS;
use tally_core::{
    keys, ApplicationToken, ChatCreated, CounterStore, DuplicatePolicy, JobEnvelope, JobKind,
    MemoryCounterStore, MessageCreated, RetryPolicy,
};
use tally_jobs::{CountKind, CreationHandler, JobRouter, Producer, QueueConfig, Reconciler};
use tally_store::{ApplicationRepo, ChatRepo, Database, Lifecycle, MessageRepo, StoreError};

struct Harness {
    db: Database,
    counters: Arc<MemoryCounterStore>,
    lifecycle: Lifecycle,
    producer: Producer,
}

impl Harness {
    fn new() -> Self {
        let db = Database::in_memory().unwrap();
        let counters = Arc::new(MemoryCounterStore::new());
        Self {
            lifecycle: Lifecycle::new(db.clone(), counters.clone()),
            producer: Producer::new(counters.clone()),
            db,
            counters,
        }
    }

    fn router(&self, policy: DuplicatePolicy) -> JobRouter {
        let handler = Arc::new(CreationHandler::new(self.db.clone(), policy));
        let config = QueueConfig {
            concurrency: 3,
            capacity: 64,
            retry: RetryPolicy {
                max_retries: 5,
                first_backoff_ms: 1,
                max_backoff_ms: 4,
                jitter: 0.1,
            },
        };
        JobRouter::start(handler, &config, &config)
    }

    fn reconcile(&self, kind: CountKind) -> tally_jobs::ReconcileReport {
        Reconciler::new(self.db.clone(), self.counters.clone(), 1000).run(kind)
    }
}

fn chat_envelope(token: &ApplicationToken, number: i64, timestamp: &str) -> JobEnvelope {
    JobEnvelope::new(&JobKind::CreateChat(ChatCreated {
        application_token: token.clone(),
        number,
        timestamp: timestamp.into(),
    }))
    .unwrap()
}

fn message_envelope(token: &ApplicationToken, chat: i64, number: i64, body: &str) -> JobEnvelope {
    JobEnvelope::new(&JobKind::CreateMessage(MessageCreated {
        application_token: token.clone(),
        chat_number: chat,
        number,
        body: body.into(),
        timestamp: String::new(),
    }))
    .unwrap()
}

#[tokio::test]
async fn produced_events_become_rows_and_counts() {
    let h = Harness::new();
    let app = h.lifecycle.create_application("shop").unwrap();

    let router = h.router(DuplicatePolicy::default());
    for _ in 0..3 {
        router.submit(h.producer.produce_chat(&app.token).unwrap()).await.unwrap();
    }
    router.shutdown().await;

    let router = h.router(DuplicatePolicy::default());
    for body in ["a", "b"] {
        router
            .submit(h.producer.produce_message(&app.token, 2, body).unwrap())
            .await
            .unwrap();
    }
    router.shutdown().await;

    let apps = h.reconcile(CountKind::Applications);
    let chats = h.reconcile(CountKind::Chats);
    assert!(!apps.is_aborted() && !chats.is_aborted());

    let conn = h.db.conn().unwrap();
    let stored = ApplicationRepo::find_by_token(&conn, &app.token).unwrap().unwrap();
    assert_eq!(stored.chats_count, 3);
    assert_eq!(ChatRepo::numbers_for_application(&conn, app.id).unwrap(), vec![1, 2, 3]);
    let chat = ChatRepo::find_by_token(&conn, &app.token, 2).unwrap().unwrap();
    assert_eq!(chat.messages_count, 2);
    assert_eq!(MessageRepo::count_for_chat(&conn, chat.id).unwrap(), 2);
}

#[tokio::test]
async fn bad_timestamp_then_cache_overwrite() {
    let h = Harness::new();
    let app = h.lifecycle.create_application("A").unwrap();

    let before = chrono::Utc::now();
    let router = h.router(DuplicatePolicy::default());
    router.submit(chat_envelope(&app.token, 7, "bad-value")).await.unwrap();
    router.shutdown().await;
    let after = chrono::Utc::now();

    h.counters.set(&keys::application_key(&app.token), 3).unwrap();
    let report = h.reconcile(CountKind::Applications);
    assert_eq!(report.updated, 1);

    let conn = h.db.conn().unwrap();
    let chat = ChatRepo::find_by_token(&conn, &app.token, 7).unwrap().unwrap();
    let created = chrono::DateTime::parse_from_rfc3339(&chat.created_at)
        .unwrap()
        .with_timezone(&chrono::Utc);
    let slack = chrono::Duration::milliseconds(1);
    assert!(created >= before - slack && created <= after + slack);
    assert_eq!(
        ApplicationRepo::find_by_token(&conn, &app.token).unwrap().unwrap().chats_count,
        3
    );
}

#[tokio::test]
async fn missing_chat_is_discarded_without_dead_job() {
    let h = Harness::new();
    let app = h.lifecycle.create_application("A").unwrap();

    let router = h.router(DuplicatePolicy::default());
    router.submit(message_envelope(&app.token, 42, 1, "hello")).await.unwrap();
    let dead = router.dead().clone();
    router.shutdown().await;

    assert!(dead.is_empty());
    let conn = h.db.conn().unwrap();
    assert!(ChatRepo::find_by_token(&conn, &app.token, 42).unwrap().is_none());
}

#[tokio::test]
async fn duplicate_chat_dies_under_reject_policy() {
    let h = Harness::new();
    let app = h.lifecycle.create_application("A").unwrap();
    let env = chat_envelope(&app.token, 1, "");

    let router = h.router(DuplicatePolicy::Reject);
    router.submit(env.clone()).await.unwrap();
    router.shutdown().await;

    let router = h.router(DuplicatePolicy::Reject);
    router.submit(env.clone()).await.unwrap();
    let dead = router.dead().clone();
    router.shutdown().await;

    let dead = dead.list();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].jid, env.jid);
    assert_eq!(dead[0].class, CHATS_CREATOR_CLASS);
    assert_eq!(dead[0].attempts, 6);
    assert!(dead[0].error.contains("chat"));
    let conn = h.db.conn().unwrap();
    assert_eq!(ChatRepo::numbers_for_application(&conn, app.id).unwrap(), vec![1]);
}

#[tokio::test]
async fn duplicate_delivery_is_a_no_op_by_default() {
    let h = Harness::new();
    let app = h.lifecycle.create_application("A").unwrap();
    let chat = chat_envelope(&app.token, 1, "");
    let message = message_envelope(&app.token, 1, 1, "same");

    for _ in 0..2 {
        let router = h.router(DuplicatePolicy::default());
        router.submit(chat.clone()).await.unwrap();
        router.shutdown().await;
        let router = h.router(DuplicatePolicy::default());
        router.submit(message.clone()).await.unwrap();
        let dead = router.dead().clone();
        router.shutdown().await;
        assert!(dead.is_empty());
    }

    let conn = h.db.conn().unwrap();
    let stored = ChatRepo::find_by_token(&conn, &app.token, 1).unwrap().unwrap();
    assert_eq!(MessageRepo::count_for_chat(&conn, stored.id).unwrap(), 1);
}

#[tokio::test]
async fn conflicting_message_body_dies() {
    let h = Harness::new();
    let app = h.lifecycle.create_application("A").unwrap();

    let router = h.router(DuplicatePolicy::default());
    router.submit(chat_envelope(&app.token, 1, "")).await.unwrap();
    router.shutdown().await;

    let router = h.router(DuplicatePolicy::default());
    router.submit(message_envelope(&app.token, 1, 1, "first")).await.unwrap();
    router.shutdown().await;

    let router = h.router(DuplicatePolicy::default());
    router.submit(message_envelope(&app.token, 1, 1, "second")).await.unwrap();
    let dead = router.dead().clone();
    router.shutdown().await;

    assert_eq!(dead.len(), 1);
    assert!(dead.list()[0].error.contains("different body"));
    let conn = h.db.conn().unwrap();
    let chat = ChatRepo::find_by_token(&conn, &app.token, 1).unwrap().unwrap();
    assert_eq!(MessageRepo::find(&conn, chat.id, 1).unwrap().unwrap().body, "first");
}

#[tokio::test]
async fn deletions_adjust_the_cache() {
    let h = Harness::new();
    let app = h.lifecycle.create_application("A").unwrap();

    let router = h.router(DuplicatePolicy::default());
    for _ in 0..2 {
        router.submit(h.producer.produce_chat(&app.token).unwrap()).await.unwrap();
    }
    router.shutdown().await;
    let router = h.router(DuplicatePolicy::default());
    for body in ["x", "y"] {
        router
            .submit(h.producer.produce_message(&app.token, 1, body).unwrap())
            .await
            .unwrap();
    }
    router.shutdown().await;

    let app_key = keys::application_key(&app.token);
    assert_eq!(h.counters.get(&app_key).unwrap(), Some(2));
    assert_eq!(h.counters.get(&keys::chat_key(&app.token, 1)).unwrap(), Some(2));

    let _ = h.lifecycle.delete_message(&app.token, 1, 2).unwrap();
    assert_eq!(h.counters.get(&keys::chat_key(&app.token, 1)).unwrap(), Some(1));

    let _ = h.lifecycle.delete_chat(&app.token, 2).unwrap();
    assert_eq!(h.counters.get(&app_key).unwrap(), Some(1));
    assert!(!h.counters.contains(&keys::chat_key(&app.token, 2)));

    assert_eq!(h.lifecycle.delete_application(&app.token).unwrap(), 1);
    assert!(!h.counters.contains(&app_key));
    assert!(!h.counters.contains(&keys::chat_key(&app.token, 1)));
    assert!(h.counters.is_empty(), "producer sequences outlived the application");
    assert_matches!(
        h.lifecycle.delete_application(&app.token),
        Err(StoreError::NotFound(_))
    );
}

#[tokio::test]
async fn same_chat_number_under_two_applications() {
    let h = Harness::new();
    let a = h.lifecycle.create_application("a").unwrap();
    let b = h.lifecycle.create_application("b").unwrap();
    assert_ne!(a.token, b.token);

    let router = h.router(DuplicatePolicy::Reject);
    router.submit(chat_envelope(&a.token, 1, "")).await.unwrap();
    router.submit(chat_envelope(&b.token, 1, "")).await.unwrap();
    let dead = router.dead().clone();
    router.shutdown().await;

    assert!(dead.is_empty());
    let conn = h.db.conn().unwrap();
    assert!(ChatRepo::find_by_token(&conn, &a.token, 1).unwrap().is_some());
    assert!(ChatRepo::find_by_token(&conn, &b.token, 1).unwrap().is_some());
}

#[tokio::test]
async fn file_backed_stores_survive_reopen() {
    use tally_store::{ConnectionConfig, SqliteCounterStore};

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tally.db").to_string_lossy().into_owned();
    let counters_path = dir.path().join("counters.db").to_string_lossy().into_owned();
    let config = ConnectionConfig::default();

    let token = {
        let db = Database::open(&db_path, &config).unwrap();
        let counters: Arc<dyn CounterStore> =
            Arc::new(SqliteCounterStore::open(&counters_path, &config).unwrap());
        let app = Lifecycle::new(db.clone(), counters.clone()).create_application("disk").unwrap();
        let envelope = Producer::new(counters).produce_chat(&app.token).unwrap();

        let router = JobRouter::start(
            Arc::new(CreationHandler::new(db, DuplicatePolicy::default())),
            &QueueConfig::default(),
            &QueueConfig::default(),
        );
        router.submit(envelope).await.unwrap();
        router.shutdown().await;
        app.token
    };

    let db = Database::open(&db_path, &config).unwrap();
    let counters = Arc::new(SqliteCounterStore::open(&counters_path, &config).unwrap());
    let report = Reconciler::new(db.clone(), counters, 100).run(CountKind::Applications);
    assert_eq!(report.updated, 1);

    let conn = db.conn().unwrap();
    let app = ApplicationRepo::find_by_token(&conn, &token).unwrap().unwrap();
    assert_eq!(app.chats_count, 1);
    assert!(ChatRepo::find_by_token(&conn, &token, 1).unwrap().is_some());
}
