//! Concurrent recording into one session from two independent pools, as two
//! gateway processes sharing a database file would.

use std::collections::BTreeSet;
use std::sync::Arc;

use mcp_ledger::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteEventRepository, SqliteSequenceAllocator,
    SqliteSessionRepository,
};
use mcp_ledger::domain::models::EventStatus;
use mcp_ledger::domain::ports::EventRepository;
use mcp_ledger::services::{AgentIdentity, CallRecord, CallResult, EventRecorder, RecordOutcome, Redactor};
use serde_json::json;
use sqlx::SqlitePool;

const SESSION: &str = "shared-session";

async fn open(url: &str) -> SqlitePool {
    initialize_database(
        url,
        Some(PoolConfig {
            max_connections: 4,
            ..PoolConfig::default()
        }),
    )
    .await
    .expect("Failed to open database")
}

fn recorder(pool: &SqlitePool) -> Arc<EventRecorder> {
    Arc::new(EventRecorder::new(
        Arc::new(SqliteSessionRepository::new(pool.clone())),
        Arc::new(SqliteEventRepository::new(pool.clone())),
        Arc::new(SqliteSequenceAllocator::new(pool.clone())),
        Redactor::new(["password"], 4096),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_writers_never_share_a_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url(dir.path().join("ledger.db").to_str().unwrap());
    let first_pool = open(&url).await;
    let second_pool = open(&url).await;
    let writers = [recorder(&first_pool), recorder(&second_pool)];

    let handles: Vec<_> = (0..40)
        .map(|n| {
            let recorder = Arc::clone(&writers[n % 2]);
            tokio::spawn(async move {
                let call = CallRecord::tool_call(
                    SESSION,
                    AgentIdentity::new("main", format!("writer-{}", n % 2)),
                    Some(format!("tool_{n}")),
                    Some("A".to_string()),
                    Some(json!({"n": n})),
                );
                recorder
                    .record(call, CallResult::new(EventStatus::Success, Some(json!({"ok": true}))))
                    .await
            })
        })
        .collect();

    let mut sequences = BTreeSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            RecordOutcome::Recorded { sequence, .. } => {
                assert!(sequences.insert(sequence), "sequence {sequence} allocated twice");
            }
            other => panic!("recording failed: {other:?}"),
        }
    }
    let expected: BTreeSet<i64> = (1..=40).collect();
    assert_eq!(sequences, expected, "sequences are gap-free");

    let stored = SqliteEventRepository::new(first_pool)
        .list_by_session(SESSION)
        .await
        .unwrap();
    assert_eq!(stored.len(), 40);
    assert!(stored.windows(2).all(|w| w[0].sequence < w[1].sequence));
}
