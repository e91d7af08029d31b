// Integration tests for deadlines, late replies and asynchronous sends

use cells::{
    BoxPayload, Cell, CellConfig, CellContext, CellDomain, CellPath,
    DomainRef, Envelope, Error, ReplyResult, downcast,
};

use async_trait::async_trait;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// Takes its time before answering; counts what it actually handled.
struct Sleeper {
    delay: Duration,
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl Cell for Sleeper {
    async fn on_message(
        &mut self,
        envelope: &Envelope,
        _ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let text = envelope.peek::<String>().cloned().unwrap_or_default();
        Ok(Some(Box::new(text)))
    }
}

fn spawn_domain(name: &str) -> DomainRef {
    let (domain, mut runner) =
        CellDomain::create(name, CancellationToken::new());
    tokio::spawn(async move { runner.run().await });
    domain
}

fn forward_to(
    sender: mpsc::UnboundedSender<ReplyResult>,
) -> cells::ReplyCallback {
    Box::new(move |result| {
        Box::pin(async move {
            let _ = sender.send(result);
        })
    })
}

#[tokio::test]
async fn request_times_out_and_late_reply_is_discarded() {
    let domain = spawn_domain("core");
    domain
        .register(
            "slow",
            Sleeper {
                delay: Duration::from_millis(300),
                handled: Arc::new(AtomicUsize::new(0)),
            },
            CellConfig::default(),
        )
        .await
        .unwrap();

    let before = Instant::now();
    let result = domain
        .send_and_wait(
            CellPath::parse("slow@core").unwrap(),
            Box::new("late".to_owned()),
            Duration::from_millis(100),
        )
        .await;
    let elapsed = before.elapsed();
    assert!(matches!(result, Err(Error::RequestTimeout(_))));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(280));

    // Let the sleeper finish and route its answer into the void.
    tokio::time::sleep(Duration::from_millis(400)).await;

    // The late reply resolved nothing; a fresh request still gets its
    // own answer, not the stale one.
    let reply = domain
        .send_and_wait(
            CellPath::parse("slow@core").unwrap(),
            Box::new("fresh".to_owned()),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(downcast::<String>(reply).unwrap(), "fresh");
}

#[tokio::test]
async fn expired_envelope_is_dropped_before_the_handler() {
    let handled = Arc::new(AtomicUsize::new(0));
    let domain = spawn_domain("core");
    domain
        .register(
            "slow",
            Sleeper {
                delay: Duration::from_millis(200),
                handled: handled.clone(),
            },
            CellConfig::default(),
        )
        .await
        .unwrap();

    // The first envelope occupies the cell past the second one's deadline.
    domain
        .send(
            CellPath::parse("slow@core").unwrap(),
            Box::new("first".to_owned()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    domain
        .send(
            CellPath::parse("slow@core").unwrap(),
            Box::new("second".to_owned()),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callback_fires_exactly_once_with_the_reply() {
    let domain = spawn_domain("core");
    domain
        .register(
            "slow",
            Sleeper {
                delay: Duration::from_millis(20),
                handled: Arc::new(AtomicUsize::new(0)),
            },
            CellConfig::default(),
        )
        .await
        .unwrap();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    domain
        .send_async(
            CellPath::parse("slow@core").unwrap(),
            Box::new("async".to_owned()),
            Duration::from_secs(2),
            forward_to(sender),
        )
        .await;

    let result = receiver.recv().await.unwrap();
    assert_eq!(downcast::<String>(result.unwrap()).unwrap(), "async");
    // No second resolution ever arrives.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn callback_observes_the_timeout() {
    let domain = spawn_domain("core");
    domain
        .register(
            "slow",
            Sleeper {
                delay: Duration::from_millis(300),
                handled: Arc::new(AtomicUsize::new(0)),
            },
            CellConfig::default(),
        )
        .await
        .unwrap();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    domain
        .send_async(
            CellPath::parse("slow@core").unwrap(),
            Box::new("never".to_owned()),
            Duration::from_millis(50),
            forward_to(sender),
        )
        .await;

    let result = receiver.recv().await.unwrap();
    assert!(matches!(result, Err(Error::RequestTimeout(_))));
}

#[tokio::test]
async fn callback_observes_routing_failure_immediately() {
    let domain = spawn_domain("core");

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let before = Instant::now();
    domain
        .send_async(
            CellPath::parse("nobody@core").unwrap(),
            Box::new(()),
            Duration::from_secs(5),
            forward_to(sender),
        )
        .await;

    let result = receiver.recv().await.unwrap();
    assert!(matches!(result, Err(Error::NoRoute(_))));
    assert!(before.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn cancellation_beats_the_reply() {
    let domain = spawn_domain("core");
    domain
        .register(
            "slow",
            Sleeper {
                delay: Duration::from_millis(200),
                handled: Arc::new(AtomicUsize::new(0)),
            },
            CellConfig::default(),
        )
        .await
        .unwrap();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handle = domain
        .send_async(
            CellPath::parse("slow@core").unwrap(),
            Box::new("cancelled".to_owned()),
            Duration::from_secs(2),
            forward_to(sender),
        )
        .await;

    assert!(handle.cancel());
    assert!(!handle.cancel());

    let result = receiver.recv().await.unwrap();
    assert_eq!(result.unwrap_err(), Error::Cancelled(handle.id()));
    // The reply arriving later resolves nothing.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(receiver.try_recv().is_err());
}
