// Integration tests for local messaging within one domain

use cells::{
    BoxPayload, Cell, CellConfig, CellContext, CellDomain, CellPath,
    DomainRef, Envelope, Error, downcast,
};

use async_trait::async_trait;

use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

// Answers every request with its text payload echoed back.
struct Echo;

#[async_trait]
impl Cell for Echo {
    async fn on_message(
        &mut self,
        envelope: &Envelope,
        _ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error> {
        let text = envelope.peek::<String>().cloned().unwrap_or_default();
        Ok(Some(Box::new(format!("echo: {}", text))))
    }
}

// Fails on the magic word, echoes otherwise.
struct Flaky;

#[async_trait]
impl Cell for Flaky {
    async fn on_message(
        &mut self,
        envelope: &Envelope,
        _ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error> {
        let text = envelope.peek::<String>().cloned().unwrap_or_default();
        if text == "boom" {
            return Err(Error::Handler("boom".to_owned()));
        }
        Ok(Some(Box::new(text)))
    }
}

// Records its lifecycle hooks.
struct Lifecycle {
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Cell for Lifecycle {
    async fn starting(&mut self, _ctx: &mut CellContext) -> Result<(), Error> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn on_message(
        &mut self,
        _envelope: &Envelope,
        _ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error> {
        Ok(None)
    }

    async fn stopped(&mut self, _ctx: &mut CellContext) -> Result<(), Error> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// Never gets past its starting hook.
struct BrokenStart;

#[async_trait]
impl Cell for BrokenStart {
    async fn starting(&mut self, _ctx: &mut CellContext) -> Result<(), Error> {
        Err(Error::Start("no config".to_owned()))
    }

    async fn on_message(
        &mut self,
        _envelope: &Envelope,
        _ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error> {
        Ok(None)
    }
}

// Tags its own call chain with a session, asks the probe, and returns
// what the probe observed.
struct Driver;

#[async_trait]
impl Cell for Driver {
    async fn on_message(
        &mut self,
        _envelope: &Envelope,
        ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error> {
        ctx.cdc_mut().set_session("sess-42");
        ctx.cdc_mut().push_description("driving the probe");
        let seen = ctx
            .send_and_wait(
                CellPath::parse("probe@core")?,
                Box::new(()),
                TIMEOUT,
            )
            .await?;
        Ok(Some(seen))
    }
}

// Reports the diagnostic context it runs under.
struct Probe;

#[async_trait]
impl Cell for Probe {
    async fn on_message(
        &mut self,
        _envelope: &Envelope,
        ctx: &mut CellContext,
    ) -> Result<Option<BoxPayload>, Error> {
        let session = ctx.cdc().session().unwrap_or("none").to_owned();
        let caller = ctx.cdc().cell().unwrap_or("none").to_owned();
        Ok(Some(Box::new(format!("{}/{}", caller, session))))
    }
}

fn spawn_domain(name: &str) -> DomainRef {
    let (domain, mut runner) = CellDomain::create(name, CancellationToken::new());
    tokio::spawn(async move { runner.run().await });
    domain
}

#[tokio::test]
async fn request_reply_round_trip() {
    let domain = spawn_domain("core");
    domain
        .register("echo", Echo, CellConfig::default())
        .await
        .unwrap();

    let reply = domain
        .send_and_wait(
            CellPath::parse("echo@core").unwrap(),
            Box::new("hello".to_owned()),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(downcast::<String>(reply).unwrap(), "echo: hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn runners_move_across_scheduler_threads() {
    let domain = spawn_domain("core");
    domain
        .register("echo", Echo, CellConfig::default())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let domain = domain.clone();
        tasks.push(tokio::spawn(async move {
            domain
                .send_and_wait(
                    CellPath::parse("echo@core").unwrap(),
                    Box::new(format!("cross-{}", i)),
                    TIMEOUT,
                )
                .await
                .map(|reply| downcast::<String>(reply).unwrap())
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), format!("echo: cross-{}", i));
    }
}

#[tokio::test]
async fn local_wildcard_resolves_here() {
    let domain = spawn_domain("core");
    domain
        .register("echo", Echo, CellConfig::default())
        .await
        .unwrap();

    // A bare name parses into the local wildcard domain.
    let reply = domain
        .send_and_wait(
            CellPath::parse("echo").unwrap(),
            Box::new("wild".to_owned()),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(downcast::<String>(reply).unwrap(), "echo: wild");
}

#[tokio::test]
async fn unroutable_request_fails_fast() {
    let domain = spawn_domain("core");

    let before = Instant::now();
    let result = domain
        .send_and_wait(
            CellPath::parse("nobody@core").unwrap(),
            Box::new("hello".to_owned()),
            Duration::from_secs(5),
        )
        .await;
    assert!(matches!(result, Err(Error::NoRoute(_))));
    // The failure is immediate, not a timeout in disguise.
    assert!(before.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn concurrent_requests_get_their_own_replies() {
    let domain = spawn_domain("core");
    domain
        .register("echo", Echo, CellConfig::default())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let domain = domain.clone();
        tasks.push(tokio::spawn(async move {
            let reply = domain
                .send_and_wait(
                    CellPath::parse("echo@core").unwrap(),
                    Box::new(format!("msg-{}", i)),
                    TIMEOUT,
                )
                .await
                .unwrap();
            (i, downcast::<String>(reply).unwrap())
        }));
    }
    for task in tasks {
        let (i, reply) = task.await.unwrap();
        assert_eq!(reply, format!("echo: msg-{}", i));
    }
}

#[tokio::test]
async fn handler_failure_answers_and_cell_survives() {
    let domain = spawn_domain("core");
    domain
        .register("flaky", Flaky, CellConfig::default())
        .await
        .unwrap();

    let result = domain
        .send_and_wait(
            CellPath::parse("flaky@core").unwrap(),
            Box::new("boom".to_owned()),
            TIMEOUT,
        )
        .await;
    assert!(matches!(result, Err(Error::Handler(_))));

    // The failure stayed in the handler; the cell still serves.
    let reply = domain
        .send_and_wait(
            CellPath::parse("flaky@core").unwrap(),
            Box::new("fine".to_owned()),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(downcast::<String>(reply).unwrap(), "fine");
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let domain = spawn_domain("core");
    domain
        .register("echo", Echo, CellConfig::default())
        .await
        .unwrap();
    let result = domain.register("echo", Echo, CellConfig::default()).await;
    assert_eq!(result.err(), Some(Error::DuplicateName("echo".to_owned())));
}

#[tokio::test]
async fn invalid_cell_name_is_rejected() {
    let domain = spawn_domain("core");
    let result = domain
        .register("not@valid", Echo, CellConfig::default())
        .await;
    assert!(matches!(result, Err(Error::MalformedAddress(_))));
}

#[tokio::test]
async fn failing_starting_hook_aborts_registration() {
    let domain = spawn_domain("core");
    let result = domain
        .register("broken", BrokenStart, CellConfig::default())
        .await;
    assert!(matches!(result, Err(Error::Start(_))));
    // The name is free again.
    assert!(domain.state_of("broken").await.is_none());
    domain
        .register("broken", Echo, CellConfig::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn stopping_a_cell_unroutes_it() {
    let started = Arc::new(AtomicBool::new(false));
    let stopped = Arc::new(AtomicBool::new(false));
    let domain = spawn_domain("core");
    let endpoint = domain
        .register(
            "life",
            Lifecycle {
                started: started.clone(),
                stopped: stopped.clone(),
            },
            CellConfig::default(),
        )
        .await
        .unwrap();
    assert!(started.load(Ordering::SeqCst));

    endpoint.stop().await;
    assert!(stopped.load(Ordering::SeqCst));
    assert!(domain.state_of("life").await.is_none());

    let result = domain
        .send(
            CellPath::parse("life@core").unwrap(),
            Box::new(()),
            TIMEOUT,
        )
        .await;
    assert!(matches!(result, Err(Error::NoRoute(_))));
}

#[tokio::test]
async fn domain_shutdown_stops_every_cell() {
    let started = Arc::new(AtomicBool::new(false));
    let stopped = Arc::new(AtomicBool::new(false));
    let token = CancellationToken::new();
    let (domain, mut runner) = CellDomain::create("core", token);
    let runner = tokio::spawn(async move { runner.run().await });

    domain
        .register(
            "life",
            Lifecycle {
                started: started.clone(),
                stopped: stopped.clone(),
            },
            CellConfig::default(),
        )
        .await
        .unwrap();

    domain.stop_domain();
    runner.await.unwrap();
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn diagnostic_context_follows_the_request() {
    let domain = spawn_domain("core");
    domain
        .register("driver", Driver, CellConfig::default())
        .await
        .unwrap();
    domain
        .register("probe", Probe, CellConfig::default())
        .await
        .unwrap();

    let reply = domain
        .send_and_wait(
            CellPath::parse("driver@core").unwrap(),
            Box::new(()),
            TIMEOUT,
        )
        .await
        .unwrap();
    // The probe ran under the driver's captured context.
    assert_eq!(downcast::<String>(reply).unwrap(), "driver/sess-42");
}
