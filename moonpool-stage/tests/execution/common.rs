//! Test actors, per-key tallies and the stage harness shared by the suite.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use moonpool_stage::{
    async_trait, Actor, ActorType, ChannelForwarder, InvocationContext, InvocationError,
    Message, MethodFuture, MethodId, Methods, NodeConfig, RemoteReference, Stage,
};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

pub const GREETER: ActorType = ActorType(0x6EE7_E500);
pub const CALLBACK: ActorType = ActorType(0xCA11_BAC0);

pub const GREET: MethodId = MethodId(1);
pub const FAIL: MethodId = MethodId(2);
pub const RECORD: MethodId = MethodId(3);
pub const STICKY: MethodId = MethodId(4);
pub const BLOCK: MethodId = MethodId(5);
pub const PANIC: MethodId = MethodId(6);

pub const PING: MethodId = MethodId(1);

/// What a greeter key has observed, across activations.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub activations: usize,
    pub deactivations: usize,
    pub in_flight: usize,
    pub overlaps: usize,
    pub seen: Vec<i64>,
}

fn tallies() -> &'static Mutex<HashMap<String, Tally>> {
    static TALLIES: OnceLock<Mutex<HashMap<String, Tally>>> = OnceLock::new();
    TALLIES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn with_tally<R>(key: &str, f: impl FnOnce(&mut Tally) -> R) -> R {
    let mut tallies = tallies().lock().unwrap();
    f(tallies.entry(key.to_string()).or_default())
}

pub fn tally(key: &str) -> Tally {
    with_tally(key, |p| p.clone())
}

/// Per-key gate the BLOCK method waits on. Starts closed.
pub fn gate(key: &str) -> Arc<Semaphore> {
    static GATES: OnceLock<Mutex<HashMap<String, Arc<Semaphore>>>> = OnceLock::new();
    let mut gates = GATES.get_or_init(|| Mutex::new(HashMap::new())).lock().unwrap();
    Arc::clone(
        gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0))),
    )
}

/// Fresh key so tests running in parallel never share tallies.
pub fn unique(prefix: &str) -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!("{}-{}", prefix, NEXT.fetch_add(1, Ordering::Relaxed))
}

pub fn greeter(key: &str) -> RemoteReference {
    RemoteReference::actor(GREETER, key)
}

/// Virtual actor used throughout the suite.
///
/// Keys starting with `flaky` refuse their first activation. Keys containing
/// `stalled` wait on their gate before every activation.
pub struct Greeter {
    key: String,
}

fn greet<'a>(_this: &'a mut Greeter, _ctx: &'a InvocationContext, _params: Vec<Value>) -> MethodFuture<'a> {
    Box::pin(async { Ok(Value::from("hi")) })
}

fn fail<'a>(_this: &'a mut Greeter, _ctx: &'a InvocationContext, _params: Vec<Value>) -> MethodFuture<'a> {
    Box::pin(async { Err(InvocationError::application("greeting refused")) })
}

fn record<'a>(this: &'a mut Greeter, _ctx: &'a InvocationContext, params: Vec<Value>) -> MethodFuture<'a> {
    Box::pin(async move {
        let n: i64 = serde_json::from_value(params.into_iter().next().unwrap_or(Value::Null))?;
        with_tally(&this.key, |p| {
            if p.in_flight > 0 {
                p.overlaps += 1;
            }
            p.in_flight += 1;
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        with_tally(&this.key, |p| {
            p.in_flight -= 1;
            p.seen.push(n);
        });
        Ok(Value::from(n))
    })
}

fn sticky<'a>(_this: &'a mut Greeter, ctx: &'a InvocationContext, _params: Vec<Value>) -> MethodFuture<'a> {
    Box::pin(async move {
        let properties = ctx
            .properties()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        Ok(Value::Object(properties))
    })
}

fn block<'a>(this: &'a mut Greeter, _ctx: &'a InvocationContext, _params: Vec<Value>) -> MethodFuture<'a> {
    Box::pin(async move {
        let gate = gate(&this.key);
        let permit = gate.acquire().await.map_err(InvocationError::application)?;
        permit.forget();
        Ok(Value::from("released"))
    })
}

fn explode<'a>(_this: &'a mut Greeter, _ctx: &'a InvocationContext, _params: Vec<Value>) -> MethodFuture<'a> {
    Box::pin(async { boom() })
}

fn boom() -> Result<Value, InvocationError> {
    panic!("greeter exploded")
}

#[async_trait]
impl Actor for Greeter {
    fn actor_type() -> ActorType {
        GREETER
    }

    async fn activate(reference: &RemoteReference) -> Result<Self, InvocationError> {
        let key = reference.key().to_string();
        if key.contains("stalled") {
            let gate = gate(&key);
            let permit = gate.acquire().await.map_err(InvocationError::application)?;
            permit.forget();
        }
        let attempt = with_tally(&key, |p| {
            p.activations += 1;
            p.activations
        });
        if key.starts_with("flaky") && attempt == 1 {
            return Err(InvocationError::application("first activation refused"));
        }
        Ok(Greeter { key })
    }

    async fn deactivate(&mut self) -> Result<(), InvocationError> {
        with_tally(&self.key, |p| p.deactivations += 1);
        Ok(())
    }

    fn methods(methods: &mut Methods<Self>) {
        methods
            .add(GREET, greet)
            .add(FAIL, fail)
            .add(RECORD, record)
            .add(STICKY, sticky)
            .add(BLOCK, block)
            .add(PANIC, explode);
    }
}

/// Observer object hosted with `Stage::register_object`.
pub struct Callback {
    pub pings: Arc<AtomicUsize>,
}

fn ping<'a>(this: &'a mut Callback, _ctx: &'a InvocationContext, _params: Vec<Value>) -> MethodFuture<'a> {
    Box::pin(async move {
        this.pings.fetch_add(1, Ordering::SeqCst);
        Ok(Value::from("pong"))
    })
}

pub struct Harness {
    pub stage: Stage,
    pub outbound: mpsc::UnboundedReceiver<Message>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A started stage hosting `Greeter` and `Callback`.
pub fn harness(config: NodeConfig) -> Harness {
    init_tracing();
    let (forwarder, outbound) = ChannelForwarder::new();
    let stage = Stage::builder()
        .config(config)
        .register_actor::<Greeter>()
        .register_method::<Callback>(PING, ping)
        .forwarder(forwarder)
        .build()
        .expect("stage");
    stage.start();
    Harness { stage, outbound }
}

pub fn default_harness() -> Harness {
    harness(NodeConfig::default())
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Await `future`, failing the test instead of hanging.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
