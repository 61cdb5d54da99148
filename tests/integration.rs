use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mom_messaging::{
    //
    create_memory_transport_with_hub,
    queue_for_publish,
    AddressOptions,
    Body,
    CorrelationId,
    Correlator,
    CorrelatorBuilder,
    Destination,
    MemoryHub,
    MemoryLogger,
    Messenger,
    MessagingError,
    OptionKey,
    Result,
};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct AddResponse {
    sum: i32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Status {
    status: String,
}

struct MathServer {
    // ---
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl MathServer {
    // ---
    /// Answers `add` requests on `queue/math.none` until `count` are served.
    async fn spawn(hub: Arc<MemoryHub>, count: usize) -> Result<Self> {
        // ---
        let transport = create_memory_transport_with_hub("math-server", hub).await?;
        let correlator = Correlator::new(transport.clone());
        let mut inbox = Messenger::new(transport)
            .subscribe_messages(&AddressOptions::service("math"))
            .await?;

        let handle = tokio::spawn(async move {
            for _ in 0..count {
                let delivery = match inbox.next().await {
                    Some(delivery) => delivery?,
                    None => break,
                };
                let id = delivery
                    .correlation_id()
                    .ok_or_else(|| MessagingError::Transport("request without id".into()))?;
                let req: AddRequest = delivery.body.deserialize()?;
                let reply = Body::structured(&AddResponse { sum: req.a + req.b })?;
                correlator.send_response("math", &id, Some(reply)).await?;
            }
            inbox.close().await
        });

        Ok(Self { handle })
    }

    async fn shutdown(self) -> Result<()> {
        // JoinError -> panic, inner Result -> ?
        self.handle.await.expect("server task panicked")
    }
}

#[tokio::test]
async fn test_scenario_a_queue_addressing() {
    // ---
    init_logging();

    let opts = AddressOptions::service("foo")
        .with_affinity("bar")
        .with_expires_on(1000);
    let (destination, headers) = queue_for_publish(&opts).unwrap();

    assert_eq!(destination.as_str(), "queue/foo.bar");
    assert_eq!(headers.get("expires"), Some("1000000"));
    assert_eq!(headers.get("destination-type"), Some("ANYCAST"));
}

#[tokio::test]
async fn test_scenario_b_request_response() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let responder_transport = create_memory_transport_with_hub("responder", hub.clone())
        .await
        .unwrap();
    let requester_transport = create_memory_transport_with_hub("requester", hub.clone())
        .await
        .unwrap();

    let logger = MemoryLogger::new();
    let responder = CorrelatorBuilder::new(responder_transport)
        .logger(logger.clone())
        .build();
    let requester = CorrelatorBuilder::new(requester_transport)
        .reply_timeout(Duration::from_secs(2))
        .build();

    let id = CorrelationId::from("corr1");
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));

    let task = {
        let calls = calls.clone();
        let seen = seen.clone();
        requester
            .receive_response("svc", &id, move |body| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock().unwrap() = Some(body);
            })
            .await
            .unwrap()
    };

    let reply_queue = Destination::from("queue/svc.response.corr1");
    assert_eq!(hub.subscriber_count(&reply_queue), 1);

    let result = Body::structured(&Status {
        status: "ok".into(),
    })
    .unwrap();
    responder
        .send_response("svc", &id, Some(result.clone()))
        .await
        .unwrap();

    task.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let body = seen.lock().unwrap().take().unwrap();
    assert_eq!(body, result);
    assert_eq!(
        body.deserialize::<Status>().unwrap(),
        Status {
            status: "ok".into()
        }
    );
    assert_eq!(hub.subscriber_count(&reply_queue), 0);
    assert_eq!(hub.unacked_count(), 0);

    let lines = logger.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("Address(queue/svc.response.corr1), msg("));
    assert!(lines[0].contains(r#"correlation_id: "corr1""#));
    assert!(lines[0].contains(r#"encoding: "yaml""#));
}

#[tokio::test]
async fn test_request_round_trip_through_server() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let server = MathServer::spawn(hub.clone(), 1).await?;

    let client = CorrelatorBuilder::new(create_memory_transport_with_hub("Sally", hub).await?)
        .reply_timeout(Duration::from_secs(2))
        .build();

    let reply = client
        .request(
            &AddressOptions::service("math"),
            Body::structured(&AddRequest { a: 2, b: 3 })?,
        )
        .await?;

    assert_eq!(reply.deserialize::<AddResponse>()?, AddResponse { sum: 5 });

    server.shutdown().await
}

#[tokio::test]
async fn test_concurrent_exchanges_do_not_interfere() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let server = MathServer::spawn(hub.clone(), 10).await.unwrap();

    let transport = create_memory_transport_with_hub("George", hub.clone())
        .await
        .unwrap();
    let client = CorrelatorBuilder::new(transport)
        .reply_timeout(Duration::from_secs(2))
        .build();

    let mut handles = Vec::new();
    for i in 0..10 {
        // ---
        let c = client.clone();
        handles.push(tokio::spawn(async move {
            let reply = c
                .request(
                    &AddressOptions::service("math"),
                    Body::structured(&AddRequest { a: i, b: i }).unwrap(),
                )
                .await
                .unwrap();
            reply.deserialize::<AddResponse>().unwrap().sum
        }));
    }

    for (i, task) in handles.into_iter().enumerate() {
        let sum = task.await.unwrap();
        assert_eq!(sum, (i as i32) * 2);
    }

    server.shutdown().await.unwrap();
    assert_eq!(hub.unacked_count(), 0);
}

#[tokio::test]
async fn test_reply_published_before_subscribe_is_retained() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("early", hub).await.unwrap();
    let correlator = Correlator::new(transport);
    let id = CorrelationId::from("early-1");

    correlator
        .send_response("svc", &id, Some(Body::from("already here")))
        .await
        .unwrap();

    let pending = correlator.subscribe_response("svc", &id).await.unwrap();
    assert_eq!(pending.recv().await.unwrap(), Body::from("already here"));
}

#[tokio::test]
async fn test_receive_response_reports_timeout_without_callback() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("lazy", hub.clone())
        .await
        .unwrap();
    let correlator = CorrelatorBuilder::new(transport)
        .reply_timeout(Duration::from_millis(50))
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    let task = {
        let calls = calls.clone();
        correlator
            .receive_response("lazy-math", &CorrelationId::from("never"), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap()
    };

    let outcome = task.await.unwrap();
    assert!(matches!(outcome, Err(MessagingError::Timeout)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        hub.subscriber_count(&Destination::from("queue/lazy-math.response.never")),
        0
    );
}

#[tokio::test]
async fn test_duplicate_reply_invokes_callback_once() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("dup", hub.clone())
        .await
        .unwrap();
    let correlator = Correlator::new(transport);
    let id = CorrelationId::from("twice");

    // Both replies land before the waiting task gets to run.
    let pending = correlator.subscribe_response("svc", &id).await.unwrap();
    correlator
        .send_response("svc", &id, Some(Body::from("one")))
        .await
        .unwrap();
    correlator
        .send_response("svc", &id, Some(Body::from("two")))
        .await
        .unwrap();

    let outcome = pending.recv().await;
    match outcome {
        Err(MessagingError::DuplicateReply {
            destination,
            extra,
            first,
        }) => {
            assert_eq!(destination, "queue/svc.response.twice");
            assert_eq!(extra, 1);
            assert_eq!(*first, Body::from("one"));
        }
        other => panic!("expected duplicate reply, got {other:?}"),
    }
    assert_eq!(hub.unacked_count(), 0);
}

#[tokio::test]
async fn test_request_cut_short_by_caller_releases_reply_queue() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("impatient", hub.clone())
        .await
        .unwrap();
    let correlator = CorrelatorBuilder::new(transport.clone())
        .no_reply_timeout()
        .build();

    // Nobody serves `slow-math`; the caller gives up on its own deadline.
    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        correlator.request(&AddressOptions::service("slow-math"), Body::from("2 + 2")),
    )
    .await;
    assert!(outcome.is_err());

    // The request is still retained on the service queue; its id names the
    // reply queue that must have been released.
    let mut inbox = Messenger::new(transport)
        .subscribe_messages(&AddressOptions::service("slow-math"))
        .await
        .unwrap();
    let id = inbox.next().await.unwrap().unwrap().correlation_id().unwrap();
    let reply_queue = Destination::from(format!("queue/slow-math.response.{id}"));

    for _ in 0..10 {
        if hub.subscriber_count(&reply_queue) == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(hub.subscriber_count(&reply_queue), 0);
}

#[tokio::test]
async fn test_missing_service_is_a_configuration_error() {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub("config", hub).await.unwrap();
    let correlator = Correlator::new(transport);

    let err = correlator
        .request(&AddressOptions::default(), Body::from("x"))
        .await
        .unwrap_err();

    assert!(matches!(err, MessagingError::MissingOption(OptionKey::Service)));
    assert_eq!(err.to_string(), "options must contain key service");
}

mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

pub fn init_logging() {
    imp::init();
}
