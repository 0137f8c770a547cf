//! In-memory stand-ins for the store, the prober and the broker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::database::{StoreError, Target, TargetStore};
use crate::monitoring::Prober;
use crate::monitoring::checker::ProbeError;
use crate::transport::{Acknowledger, Broker, BrokerSession, Delivery, DeliveryStream, TransportError};

/// Poll `condition` until it holds, panicking after `limit` of (tokio) time.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {limit:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Target>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn with_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        Self { rows: Mutex::new(targets.into_iter().collect()), failing: AtomicBool::new(false) }
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<Target> {
        self.rows.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Pool("database is locked".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn upsert(&self, target: &Target) -> Result<(), StoreError> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|row| row.url == target.url) {
            Some(row) => row.interval_seconds = target.interval_seconds,
            None => rows.push(target.clone()),
        }
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| row.url != url);
        Ok(rows.len() < before)
    }

    async fn interval_seconds(&self, url: &str) -> Result<Option<u64>, StoreError> {
        self.check()?;
        Ok(self.rows.lock().unwrap().iter().find(|row| row.url == url).map(|row| row.interval_seconds))
    }

    async fn targets(&self) -> Result<Vec<Target>, StoreError> {
        self.check()?;
        Ok(self.rows())
    }
}

/// Install the test subscriber once per test binary.
pub fn init_logging() {
    let _ = logger::try_init_tracing(logger::LevelFilter::DEBUG);
}

/// Answers `200 OK` instantly unless told otherwise, and records every call.
#[derive(Default)]
pub struct ScriptedProber {
    failures: Mutex<HashMap<String, String>>,
    delays: Mutex<HashMap<String, Duration>>,
    panics: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedProber {
    pub fn fail(&self, url: &str, description: &str) {
        self.failures.lock().unwrap().insert(url.to_string(), description.to_string());
    }

    /// Keep every request to `url` in flight for `delay`.
    pub fn slow(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    /// Panic inside every request to `url` until [`Self::recover`] is called.
    pub fn panic_on(&self, url: &str) {
        self.panics.lock().unwrap().insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.panics.lock().unwrap().remove(url);
    }

    pub fn calls_for(&self, url: &str) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().filter(|(u, _)| u == url).map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str) -> Result<String, ProbeError> {
        self.calls.lock().unwrap().push((url.to_string(), Instant::now()));

        let delay = self.delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let panics = self.panics.lock().unwrap().contains(url);
        if panics {
            panic!("prober crashed on {url}");
        }

        match self.failures.lock().unwrap().get(url) {
            Some(description) => Err(ProbeError::Request(description.clone())),
            None => Ok("200 OK".into()),
        }
    }
}

/// How a consumed message was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked(String),
    Rejected(String),
}

struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Arc::new(tokio::sync::Mutex::new(rx)) }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Queue>>,
    settlements: Mutex<Vec<Settlement>>,
    declared: Mutex<Vec<String>>,
    connects: AtomicUsize,
    open_sessions: AtomicUsize,
    failing_connects: AtomicUsize,
    failing_publishes: AtomicUsize,
    sever: Mutex<CancellationToken>,
}

/// Broker whose queues are in-process channels.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    fn queue<T>(&self, name: &str, f: impl FnOnce(&Queue) -> T) -> T {
        let mut queues = self.state.queues.lock().unwrap();
        f(queues.entry(name.to_string()).or_insert_with(Queue::new))
    }

    /// Enqueue a message as an external producer would.
    pub fn push(&self, queue: &str, body: &str) {
        self.queue(queue, |q| q.tx.send(body.as_bytes().to_vec())).unwrap();
    }

    /// Next message on `queue`, waiting for it to arrive.
    pub async fn next_message(&self, queue: &str) -> String {
        let rx = self.queue(queue, |q| q.rx.clone());
        let body = rx.lock().await.recv().await.unwrap();
        String::from_utf8(body).unwrap()
    }

    /// Messages currently sitting on `queue`, without waiting.
    pub fn drain_messages(&self, queue: &str) -> Vec<String> {
        let rx = self.queue(queue, |q| q.rx.clone());
        let mut rx = rx.try_lock().expect("queue is being consumed");
        let mut messages = Vec::new();
        while let Ok(body) = rx.try_recv() {
            messages.push(String::from_utf8(body).unwrap());
        }
        messages
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.settlements.lock().unwrap().clone()
    }

    pub fn declared(&self) -> Vec<String> {
        self.state.declared.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Refuse the next `n` publishes, as a nacking broker would.
    pub fn fail_publishes(&self, n: usize) {
        self.state.failing_publishes.store(n, Ordering::SeqCst);
    }

    /// Force-close every live consumer, as a broker restart would.
    pub fn sever_consumers(&self) {
        let mut sever = self.state.sever.lock().unwrap();
        sever.cancel();
        *sever = CancellationToken::new();
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.state.failing_connects) {
            return Err(TransportError::Unavailable("connection refused".into()));
        }
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession { broker: self.clone(), closed: false }))
    }
}

struct MemorySession {
    broker: MemoryBroker,
    closed: bool,
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), TransportError> {
        self.broker.queue(queue, |_| ());
        self.broker.state.declared.lock().unwrap().push(queue.to_string());
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> Result<DeliveryStream, TransportError> {
        let rx = self.broker.queue(queue, |q| q.rx.clone());
        let sever = self.broker.state.sever.lock().unwrap().clone();
        let state = self.broker.state.clone();

        let stream = futures::stream::unfold(Some((rx, sever, state)), |slot| async move {
            let (rx, sever, state) = slot?;
            let next = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    _ = sever.cancelled() => Err(TransportError::Closed),
                    body = guard.recv() => body.ok_or(TransportError::Closed),
                }
            };
            match next {
                Ok(body) => {
                    let acker = MemoryAcker { body: String::from_utf8_lossy(&body).into_owned(), state: state.clone() };
                    Some((Ok(Delivery::new(body, Box::new(acker))), Some((rx, sever, state))))
                }
                // A severed consumer reports the error once, then ends.
                Err(e) => Some((Err(e), None)),
            }
        });

        Ok(stream.boxed())
    }

    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        if take_one(&self.broker.state.failing_publishes) {
            return Err(TransportError::Nacked);
        }
        self.broker.queue(queue, |q| q.tx.send(payload.to_vec())).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.broker.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct MemoryAcker {
    body: String,
    state: Arc<BrokerState>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.state.settlements.lock().unwrap().push(Settlement::Acked(self.body.clone()));
        Ok(())
    }

    async fn reject(&self) -> Result<(), TransportError> {
        self.state.settlements.lock().unwrap().push(Settlement::Rejected(self.body.clone()));
        Ok(())
    }
}
