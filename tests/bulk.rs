//! Bulk creation: ordering, validation, partial failure, and concurrency.

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use text2sql_client::{
    BulkCreator, BulkError, BulkOptions, ClientError, ItemFailure, RetryConfig, Transport, TransportConfig,
    accept_all,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn creator_for(base_url: &str) -> BulkCreator {
    init_tracing();
    let config = TransportConfig::new(base_url, "test-token").with_retry(RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        jitter: false,
    });
    BulkCreator::new(Transport::new(config).unwrap())
}

/// A creator whose records never touch the network.
fn offline_creator() -> BulkCreator {
    creator_for("http://localhost:8000")
}

/// Records every record it is asked to create.
#[derive(Clone, Default)]
struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    fn push(&self, entry: impl Into<String>) {
        self.calls.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn sorted(&self) -> Vec<String> {
        let mut entries = self.entries();
        entries.sort();
        entries
    }
}

fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("rec{i:02}")).collect()
}

#[tokio::test]
async fn test_empty_batch_makes_no_calls() {
    let creator = offline_creator();
    let log = CallLog::default();
    let calls = log.clone();

    let created = creator
        .bulk_create(
            Vec::<String>::new(),
            accept_all,
            move |_t, r: String| {
                let calls = calls.clone();
                async move {
                    calls.push(r.clone());
                    Ok::<_, ClientError>(r)
                }
            },
            BulkOptions::default(),
        )
        .await
        .unwrap();

    assert!(created.is_empty());
    assert!(log.entries().is_empty());
    assert_eq!(creator.transport().attempts(), 0);
    assert!(creator.last_stats().is_none());
}

#[tokio::test]
async fn test_parallel_echo_preserves_order() {
    let creator = offline_creator();

    let created = creator
        .bulk_create(
            vec!["a", "b", "c"],
            |_: &&str| vec![],
            |_t, r: &'static str| async move { Ok::<_, ClientError>(r) },
            BulkOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(created, vec!["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_and_parallel_agree() {
    let creator = offline_creator();
    let create = |_t: Transport, r: String| async move {
        // Later records finish sooner.
        let n: u64 = r[3..].parse().unwrap();
        tokio::time::sleep(Duration::from_millis(30 - n)).await;
        Ok::<_, ClientError>(r.to_uppercase())
    };

    let sequential = creator
        .bulk_create(names(20), accept_all, create, BulkOptions::sequential())
        .await
        .unwrap();
    let parallel = creator
        .bulk_create(names(20), accept_all, create, BulkOptions::default())
        .await
        .unwrap();

    assert_eq!(sequential.len(), 20);
    assert_eq!(sequential, parallel);
    assert_eq!(parallel[7], "REC07");
}

#[tokio::test]
async fn test_single_invalid_record_blocks_every_call() {
    let creator = offline_creator();
    let log = CallLog::default();
    let calls = log.clone();

    let mut records = names(10);
    records[6] = String::new();

    let err = creator
        .bulk_create(
            records,
            |r: &String| {
                if r.is_empty() {
                    vec!["name is required".to_string()]
                } else {
                    vec![]
                }
            },
            move |_t, r: String| {
                let calls = calls.clone();
                async move {
                    calls.push(r.clone());
                    Ok::<_, ClientError>(r)
                }
            },
            BulkOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(err.failures(), &[ItemFailure::new(6, "Item 6: name is required")]);
    assert!(log.entries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failure_does_not_abort_siblings() {
    let creator = offline_creator();
    let log = CallLog::default();
    let calls = log.clone();

    let err = creator
        .bulk_create(
            names(12),
            accept_all,
            move |_t, r: String| {
                let calls = calls.clone();
                async move {
                    if r == "rec05" {
                        return Err(ClientError::Server {
                            status: 500,
                            message: "boom".to_string(),
                        });
                    }
                    calls.push(r.clone());
                    Ok(r)
                }
            },
            BulkOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        BulkError::Creation {
            succeeded,
            total,
            failures,
        } => {
            assert_eq!(succeeded, 11);
            assert_eq!(total, 12);
            assert_eq!(failures, vec![ItemFailure::new(5, "Item 5: server error 500: boom")]);
        }
        other => panic!("expected creation error, got {other}"),
    }

    let mut expected = names(12);
    expected.remove(5);
    assert_eq!(log.sorted(), expected);

    let stats = creator.last_stats().unwrap();
    assert_eq!(stats.success_count, 11);
    assert_eq!(stats.failure_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_in_flight_never_exceeds_max_concurrent() {
    let creator = offline_creator();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (c, p) = (Arc::clone(&current), Arc::clone(&peak));

    let created = creator
        .bulk_create(
            names(32),
            accept_all,
            move |_t, r: String| {
                let (current, peak) = (Arc::clone(&c), Arc::clone(&p));
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ClientError>(r)
                }
            },
            BulkOptions::default().with_max_concurrent(8),
        )
        .await
        .unwrap();

    assert_eq!(created, names(32));
    assert!(peak.load(Ordering::SeqCst) <= 8);
}

#[tokio::test]
async fn test_bootstrap_completes_before_others_start() {
    let creator = offline_creator();
    let log = CallLog::default();
    let calls = log.clone();

    creator
        .bulk_create(
            names(6),
            accept_all,
            move |_t, r: String| {
                let calls = calls.clone();
                async move {
                    calls.push(format!("start {r}"));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    calls.push(format!("end {r}"));
                    Ok::<_, ClientError>(r)
                }
            },
            BulkOptions::default(),
        )
        .await
        .unwrap();

    let entries = log.entries();
    assert_eq!(entries.len(), 12);
    assert_eq!(entries[0], "start rec00");
    assert_eq!(entries[1], "end rec00");
}

#[tokio::test]
async fn test_bootstrap_failure_stops_the_batch() {
    let creator = offline_creator();
    let log = CallLog::default();
    let calls = log.clone();

    let err = creator
        .bulk_create(
            names(5),
            accept_all,
            move |_t, r: String| {
                let calls = calls.clone();
                async move {
                    calls.push(r.clone());
                    if r == "rec00" {
                        Err(format!("collection for {r} could not be provisioned"))
                    } else {
                        Ok(r)
                    }
                }
            },
            BulkOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BulkError::Failed { index: 0, .. }));
    assert_eq!(log.entries(), vec!["rec00"]);
}

#[tokio::test]
async fn test_sequential_mode_fails_fast() {
    let creator = offline_creator();
    let log = CallLog::default();
    let calls = log.clone();

    let err = creator
        .bulk_create(
            names(5),
            accept_all,
            move |_t, r: String| {
                let calls = calls.clone();
                async move {
                    calls.push(r.clone());
                    if r == "rec02" { Err("rejected") } else { Ok(r) }
                }
            },
            BulkOptions::sequential(),
        )
        .await
        .unwrap_err();

    match err {
        BulkError::Failed { index, error } => {
            assert_eq!(index, 2);
            assert_eq!(error, "rejected");
        }
        other => panic!("expected fail-fast error, got {other}"),
    }
    assert_eq!(log.entries(), vec!["rec00", "rec01", "rec02"]);
}

#[tokio::test]
async fn test_panicking_operation_becomes_a_failure_entry() {
    let creator = offline_creator();

    let err = creator
        .bulk_create(
            names(4),
            accept_all,
            |_t, r: String| async move {
                if r == "rec03" {
                    panic!("bug in caller logic");
                }
                Ok::<_, ClientError>(r)
            },
            BulkOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        BulkError::Creation {
            succeeded, failures, ..
        } => {
            assert_eq!(succeeded, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].index, 3);
            assert!(failures[0].message.contains("bug in caller logic"));
        }
        other => panic!("expected creation error, got {other}"),
    }
}

async fn create_context(transport: Transport, record: Value) -> Result<Value, ClientError> {
    transport.post("projects/p1/contexts", &record).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_partial_failure_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/projects/p1/contexts"))
        .and(body_partial_json(json!({"name": "ctx3"})))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "duplicate name"})))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/projects/p1/contexts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "ctx"})))
        .with_priority(2)
        .mount(&server)
        .await;

    let creator = creator_for(&server.uri());
    let records: Vec<Value> = (0..8).map(|i| json!({"name": format!("ctx{i}")})).collect();

    let err = creator
        .bulk_create(records, accept_all, create_context, BulkOptions::default())
        .await
        .unwrap_err();

    match err {
        BulkError::Creation {
            succeeded,
            total,
            failures,
        } => {
            assert_eq!((succeeded, total), (7, 8));
            assert_eq!(
                failures,
                vec![ItemFailure::new(3, "Item 3: client error 422: duplicate name")]
            );
        }
        other => panic!("expected creation error, got {other}"),
    }

    // The client fault was sent exactly once; every other record reached the server.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 8);
    assert_eq!(creator.transport().attempts(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_isolated_and_shared_connections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "ctx"})))
        .mount(&server)
        .await;

    let creator = creator_for(&server.uri());
    let records = || (0..5).map(|i| json!({"name": format!("ctx{i}")})).collect::<Vec<_>>();

    let created = creator
        .bulk_create(records(), accept_all, create_context, BulkOptions::default())
        .await
        .unwrap();
    assert_eq!(created.len(), 5);

    let closing = |requests: &[wiremock::Request]| {
        requests
            .iter()
            .filter(|r| {
                r.headers
                    .get("connection")
                    .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
            })
            .count()
    };

    // Only the bootstrap record went over the pooled primary transport.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 5);
    assert_eq!(closing(&received), 4);

    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "ctx"})))
        .mount(&server)
        .await;

    creator
        .bulk_create(
            records(),
            accept_all,
            create_context,
            BulkOptions::default().without_isolation(),
        )
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 5);
    assert_eq!(closing(&received), 0);
}
