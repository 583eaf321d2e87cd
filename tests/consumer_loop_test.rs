//! Consumer loop scenarios against a scripted message stream and an
//! in-memory warehouse.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use productstream::productstream::config::PolicySettings;
use productstream::productstream::kafka::{ConsumeError, MessageStream, RawMessage};
use productstream::productstream::model::ProductRecord;
use productstream::productstream::pipeline::{ConsumerLoop, FlushReason, RetryPolicy, StepOutcome};
use productstream::productstream::serialization::AvroCodec;
use productstream::productstream::sink::{
    BatchLoader, DeadLetterStore, SinkError, WarehouseClient,
};

fn ts(secs: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, secs)
        .unwrap()
}

fn record(n: u32) -> ProductRecord {
    ProductRecord {
        id: format!("p-{}", n),
        name: format!("product {}", n),
        category: "grocery".to_string(),
        price: Decimal::new(499, 2),
        updated_at: ts(n),
    }
}

fn encoded(n: u32) -> RawMessage {
    let codec = AvroCodec::new().unwrap();
    RawMessage {
        key: Some(format!("p-{}", n).into_bytes()),
        payload: Some(codec.serialize(&record(n)).unwrap()),
        partition: 0,
        offset: n as i64,
    }
}

fn policy(max_batch_size: usize, max_batch_age: Duration) -> PolicySettings {
    PolicySettings {
        max_batch_size,
        max_batch_age,
        producer_poll_interval: Duration::ZERO,
        flush_timeout: Duration::from_millis(100),
        empty_poll_delay: Duration::ZERO,
        poll_timeout: Duration::from_millis(10),
    }
}

enum Feed {
    Msg(RawMessage),
    Quiet,
    Fail(ConsumeError),
}

/// Scripted broker: serves a fixed feed, then stays quiet. Commits are
/// appended to the shared operation log so call ordering against the
/// warehouse is observable.
struct ScriptedStream {
    feed: VecDeque<Feed>,
    ops: Arc<Mutex<Vec<String>>>,
    commit_error: Option<String>,
}

impl ScriptedStream {
    fn new(feed: Vec<Feed>, ops: Arc<Mutex<Vec<String>>>) -> Self {
        ScriptedStream {
            feed: feed.into(),
            ops,
            commit_error: None,
        }
    }
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn poll(&mut self, _timeout: Duration) -> Result<Option<RawMessage>, ConsumeError> {
        match self.feed.pop_front() {
            Some(Feed::Msg(raw)) => Ok(Some(raw)),
            Some(Feed::Quiet) | None => Ok(None),
            Some(Feed::Fail(err)) => Err(err),
        }
    }

    fn commit_sync(&mut self) -> Result<(), ConsumeError> {
        match &self.commit_error {
            Some(msg) => Err(ConsumeError::Broker(msg.clone())),
            None => {
                self.ops.lock().unwrap().push("commit".to_string());
                Ok(())
            }
        }
    }
}

/// In-memory warehouse recording its calls into the shared operation log.
#[derive(Clone)]
struct RecordingWarehouse {
    ops: Arc<Mutex<Vec<String>>>,
    fail_loads: bool,
}

#[async_trait]
impl WarehouseClient for RecordingWarehouse {
    async fn stage_put(&self, stage_path: &str, _payload: Vec<u8>) -> Result<(), SinkError> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("stage_put {}", stage_path));
        Ok(())
    }

    async fn execute(&self, _statement: &str) -> Result<(), SinkError> {
        if self.fail_loads {
            return Err(SinkError::Load("copy aborted".to_string()));
        }
        self.ops.lock().unwrap().push("execute".to_string());
        Ok(())
    }
}

struct Fixture {
    ops: Arc<Mutex<Vec<String>>>,
    dead_letter_dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            ops: Arc::new(Mutex::new(Vec::new())),
            dead_letter_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn consumer(
        &self,
        feed: Vec<Feed>,
        settings: PolicySettings,
        fail_loads: bool,
    ) -> ConsumerLoop<ScriptedStream, RecordingWarehouse> {
        let stream = ScriptedStream::new(feed, Arc::clone(&self.ops));
        let loader = BatchLoader::new(
            RecordingWarehouse {
                ops: Arc::clone(&self.ops),
                fail_loads,
            },
            "products",
            "product_ingestion_stage",
            "kafka_ingestion",
            RetryPolicy::retry_once(Duration::ZERO),
        );
        ConsumerLoop::new(
            stream,
            loader,
            AvroCodec::new().unwrap(),
            DeadLetterStore::new(self.dead_letter_dir.path()),
            settings,
            CancellationToken::new(),
        )
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn dead_letter_files(&self) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(self.dead_letter_dir.path())
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }
}

#[tokio::test]
async fn five_messages_flush_as_two_full_batches_plus_an_aged_remainder() {
    let fixture = Fixture::new();
    let mut feed: Vec<Feed> = (1..=5).map(|n| Feed::Msg(encoded(n))).collect();
    feed.push(Feed::Quiet);
    let mut consumer = fixture.consumer(feed, policy(2, Duration::from_millis(200)), false);

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::Flushed {
            records: 2,
            reason: FlushReason::Size
        }
    );
    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::Flushed {
            records: 2,
            reason: FlushReason::Size
        }
    );
    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    assert_eq!(consumer.batch_len(), 1);

    // The leftover record goes out on the age trigger, not a sixth message.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::Flushed {
            records: 1,
            reason: FlushReason::Age
        }
    );
    assert_eq!(consumer.batch_len(), 0);
}

#[tokio::test]
async fn age_trigger_flushes_a_partial_batch_while_quiet() {
    let fixture = Fixture::new();
    let feed = vec![Feed::Msg(encoded(1)), Feed::Quiet];
    let mut consumer = fixture.consumer(feed, policy(100, Duration::from_millis(50)), false);

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::Flushed {
            records: 1,
            reason: FlushReason::Age
        }
    );
}

#[tokio::test]
async fn offsets_commit_only_after_the_load_succeeds() {
    let fixture = Fixture::new();
    let feed = (1..=2).map(|n| Feed::Msg(encoded(n))).collect();
    let mut consumer = fixture.consumer(feed, policy(2, Duration::from_secs(60)), false);

    consumer.step().await.unwrap();
    consumer.step().await.unwrap();

    let ops = fixture.ops();
    assert_eq!(ops.len(), 3);
    assert!(ops[0].starts_with("stage_put product_ingestion_stage/kafka_ingestion/"));
    assert_eq!(ops[1], "execute");
    assert_eq!(ops[2], "commit");
}

#[tokio::test]
async fn failed_load_dead_letters_the_batch_and_skips_the_commit() {
    let fixture = Fixture::new();
    let feed = (1..=2).map(|n| Feed::Msg(encoded(n))).collect();
    let mut consumer = fixture.consumer(feed, policy(2, Duration::from_secs(60)), true);

    consumer.step().await.unwrap();
    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::DeadLettered { records: 2 }
    );

    // No execute and no commit reached the log.
    assert!(fixture.ops().iter().all(|op| op.starts_with("stage_put")));
    assert_eq!(consumer.batch_len(), 0);

    let files = fixture.dead_letter_files();
    assert_eq!(files.len(), 1);
    let contents = std::fs::read_to_string(&files[0]).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(contents.lines().all(|line| line.contains("product_id")));
}

#[tokio::test]
async fn loop_keeps_consuming_after_a_dead_lettered_batch() {
    let fixture = Fixture::new();
    let feed = vec![Feed::Msg(encoded(1)), Feed::Msg(encoded(2))];
    let mut consumer = fixture.consumer(feed, policy(1, Duration::from_secs(60)), true);

    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::DeadLettered { records: 1 }
    );
    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::DeadLettered { records: 1 }
    );
    assert_eq!(fixture.dead_letter_files().len(), 2);
}

#[tokio::test]
async fn undecodable_payload_is_discarded_without_poisoning_the_batch() {
    let fixture = Fixture::new();
    let garbage = RawMessage {
        key: Some(b"p-9".to_vec()),
        payload: Some(vec![0xff, 0x00, 0x13, 0x37]),
        partition: 0,
        offset: 9,
    };
    let feed = vec![Feed::Msg(garbage), Feed::Msg(encoded(1))];
    let mut consumer = fixture.consumer(feed, policy(100, Duration::from_secs(60)), false);

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    assert_eq!(consumer.batch_len(), 0);
    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    assert_eq!(consumer.batch_len(), 1);
}

#[tokio::test]
async fn empty_payload_is_skipped() {
    let fixture = Fixture::new();
    let tombstone = RawMessage {
        key: Some(b"p-1".to_vec()),
        payload: None,
        partition: 0,
        offset: 1,
    };
    let mut consumer = fixture.consumer(
        vec![Feed::Msg(tombstone)],
        policy(100, Duration::from_secs(60)),
        false,
    );

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    assert_eq!(consumer.batch_len(), 0);
}

#[tokio::test]
async fn poll_errors_do_not_stall_the_age_trigger() {
    let fixture = Fixture::new();
    let feed = vec![
        Feed::Msg(encoded(1)),
        Feed::Fail(ConsumeError::Broker("broker down".to_string())),
    ];
    let mut consumer = fixture.consumer(feed, policy(100, Duration::from_millis(50)), false);

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    tokio::time::sleep(Duration::from_millis(80)).await;
    // The buffered record flushes on age even though the poll itself failed.
    assert_eq!(
        consumer.step().await.unwrap(),
        StepOutcome::Flushed {
            records: 1,
            reason: FlushReason::Age
        }
    );
}

#[tokio::test]
async fn broker_poll_error_is_soft() {
    let fixture = Fixture::new();
    let feed = vec![
        Feed::Fail(ConsumeError::Broker("broker hiccup".to_string())),
        Feed::Msg(encoded(1)),
    ];
    let mut consumer = fixture.consumer(feed, policy(100, Duration::from_secs(60)), false);

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Empty);
    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
}

#[tokio::test]
async fn authentication_failure_is_fatal() {
    let fixture = Fixture::new();
    let feed = vec![Feed::Fail(ConsumeError::Authentication(
        "bad credentials".to_string(),
    ))];
    let mut consumer = fixture.consumer(feed, policy(100, Duration::from_secs(60)), false);

    let err = consumer.step().await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn commit_failure_after_load_does_not_stop_the_loop() {
    let fixture = Fixture::new();
    let mut stream = ScriptedStream::new(
        (1..=2).map(|n| Feed::Msg(encoded(n))).collect(),
        Arc::clone(&fixture.ops),
    );
    stream.commit_error = Some("coordinator moved".to_string());
    let loader = BatchLoader::new(
        RecordingWarehouse {
            ops: Arc::clone(&fixture.ops),
            fail_loads: false,
        },
        "products",
        "product_ingestion_stage",
        "kafka_ingestion",
        RetryPolicy::retry_once(Duration::ZERO),
    );
    let mut consumer = ConsumerLoop::new(
        stream,
        loader,
        AvroCodec::new().unwrap(),
        DeadLetterStore::new(fixture.dead_letter_dir.path()),
        policy(2, Duration::from_secs(60)),
        CancellationToken::new(),
    );

    consumer.step().await.unwrap();
    let outcome = consumer.step().await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Flushed {
            records: 2,
            reason: FlushReason::Size
        }
    );
    // The load went through even though the commit did not.
    let ops = fixture.ops();
    assert!(ops.contains(&"execute".to_string()));
    assert!(!ops.contains(&"commit".to_string()));
}

#[tokio::test]
async fn shutdown_flushes_and_commits_the_remaining_batch() {
    let fixture = Fixture::new();
    let feed = vec![Feed::Msg(encoded(1))];
    let cancel = CancellationToken::new();
    let stream = ScriptedStream::new(feed, Arc::clone(&fixture.ops));
    let loader = BatchLoader::new(
        RecordingWarehouse {
            ops: Arc::clone(&fixture.ops),
            fail_loads: false,
        },
        "products",
        "product_ingestion_stage",
        "kafka_ingestion",
        RetryPolicy::retry_once(Duration::ZERO),
    );
    let mut consumer = ConsumerLoop::new(
        stream,
        loader,
        AvroCodec::new().unwrap(),
        DeadLetterStore::new(fixture.dead_letter_dir.path()),
        policy(100, Duration::from_secs(60)),
        cancel.clone(),
    );

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Polled);
    cancel.cancel();
    consumer.run().await.unwrap();

    let ops = fixture.ops();
    assert_eq!(ops.len(), 3);
    assert!(ops[0].starts_with("stage_put"));
    assert_eq!(ops[1], "execute");
    assert_eq!(ops[2], "commit");
    assert_eq!(consumer.batch_len(), 0);
}
