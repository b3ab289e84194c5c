//! Integration test helpers for xavyo-provisioning-bridge.
//!
//! Provides an in-process pipeline wired to the managers, scripted route
//! processors, and counting fakes for the route store and transactions.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Notify, Semaphore};

use xavyo_provisioning_bridge::{
    BridgeConfig, Channel, DispatchRecord, EntityKind, Envelope, InMemoryRouteStore,
    LocalPipelineEngine, OperationKind, PipelineEngine, PipelineFailure, PipelineResult,
    ProvisioningManagers, Route, RouteProcessor, RouteSpec, RouteStore, Transaction,
    TransactionError, TransactionManager,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

// =============================================================================
// Routes
// =============================================================================

/// Route consuming the input channel of `operation` on `entity`.
pub fn route_for(operation: OperationKind, entity: EntityKind, processor: &str) -> Route {
    let input = Channel::input_for(operation, entity);
    let reply = Channel::reply_for(operation, entity);
    route(
        input.name.trim_start_matches("direct:"),
        &input.name,
        &reply.name,
        processor,
    )
}

/// Route with explicit channels.
pub fn route(key: &str, from: &str, to: &str, processor: &str) -> Route {
    Route::new(key, RouteSpec::new(from, to, processor).to_content())
}

// =============================================================================
// Processors
// =============================================================================

/// Always reply with `body`.
pub fn reply_with(body: Value) -> Arc<dyn RouteProcessor> {
    Arc::new(move |_: &Envelope| -> Result<Value, PipelineFailure> { Ok(body.clone()) })
}

/// Always fail with the given failure.
pub fn fail_with(kind: &str, message: &str) -> Arc<dyn RouteProcessor> {
    let failure = PipelineFailure::new(kind, message);
    Arc::new(move |_: &Envelope| -> Result<Value, PipelineFailure> { Err(failure.clone()) })
}

/// Reply with the request body unchanged.
pub fn echo_body() -> Arc<dyn RouteProcessor> {
    Arc::new(|request: &Envelope| -> Result<Value, PipelineFailure> { Ok(request.body.clone()) })
}

/// Reply `{result: <request body>, propagation: []}`.
pub fn echo_result() -> Arc<dyn RouteProcessor> {
    Arc::new(|request: &Envelope| -> Result<Value, PipelineFailure> {
        Ok(json!({"result": request.body, "propagation": []}))
    })
}

/// Records every request it sees before replying with `body`.
pub struct RecordingProcessor {
    body: Value,
    seen: Mutex<Vec<Envelope>>,
}

impl RecordingProcessor {
    pub fn new(body: Value) -> Arc<Self> {
        Arc::new(Self {
            body,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Envelope> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last(&self) -> Envelope {
        self.requests().pop().expect("no request recorded")
    }
}

#[async_trait]
impl RouteProcessor for RecordingProcessor {
    async fn process(&self, request: &Envelope) -> Result<Value, PipelineFailure> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self.body.clone())
    }
}

/// Sleeps for `body.delay_ms`, then replies with the request's `body.nonce`.
pub struct DelayedNonceEcho;

#[async_trait]
impl RouteProcessor for DelayedNonceEcho {
    async fn process(&self, request: &Envelope) -> Result<Value, PipelineFailure> {
        let delay = request.body["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!({
            "result": request.body["nonce"],
            "propagation": [],
        }))
    }
}

/// Holds every request until released.
pub struct GatedProcessor {
    gate: Semaphore,
    entered: Notify,
}

impl GatedProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            entered: Notify::new(),
        })
    }

    /// Wait until a request is being held.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Release `count` held requests.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }
}

#[async_trait]
impl RouteProcessor for GatedProcessor {
    async fn process(&self, request: &Envelope) -> Result<Value, PipelineFailure> {
        self.entered.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(json!({"result": request.body, "propagation": []}))
    }
}

// =============================================================================
// Route store
// =============================================================================

/// In-memory route store counting bulk loads.
#[derive(Default)]
pub struct CountingRouteStore {
    inner: InMemoryRouteStore,
    bulk_loads: AtomicUsize,
}

impl CountingRouteStore {
    pub fn with_routes(routes: Vec<Route>) -> Self {
        Self {
            inner: InMemoryRouteStore::with_routes(routes),
            bulk_loads: AtomicUsize::new(0),
        }
    }

    pub async fn save(&self, route: Route) {
        self.inner.save(route).await;
    }

    pub fn bulk_loads(&self) -> usize {
        self.bulk_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteStore for CountingRouteStore {
    async fn find_all(&self) -> PipelineResult<Vec<Route>> {
        self.bulk_loads.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent first callers could race.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.inner.find_all().await
    }

    async fn find(&self, key: &str) -> PipelineResult<Option<Route>> {
        self.inner.find(key).await
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// Transaction manager counting boundaries and their outcome.
///
/// Dispatch records stay staged in their transaction and become visible
/// through `records()` only once it commits.
#[derive(Default)]
pub struct RecordingTransactionManager {
    begun: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
    committed: Arc<Mutex<Vec<DispatchRecord>>>,
}

impl RecordingTransactionManager {
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Records of committed transactions, in commit order.
    pub fn records(&self) -> Vec<DispatchRecord> {
        self.committed.lock().unwrap().clone()
    }
}

struct RecordingTransaction {
    staged: Vec<DispatchRecord>,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
    committed: Arc<Mutex<Vec<DispatchRecord>>>,
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn record(&mut self, record: DispatchRecord) -> Result<(), TransactionError> {
        self.staged.push(record);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        let this = *self;
        this.committed.lock().unwrap().extend(this.staged);
        this.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for RecordingTransactionManager {
    async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingTransaction {
            staged: Vec::new(),
            commits: self.commits.clone(),
            rollbacks: self.rollbacks.clone(),
            committed: self.committed.clone(),
        }))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Managers wired to a local engine, with handles on every fake.
pub struct Harness {
    pub engine: Arc<LocalPipelineEngine>,
    pub store: Arc<CountingRouteStore>,
    pub transactions: Arc<RecordingTransactionManager>,
    pub constructions: Arc<AtomicUsize>,
    pub managers: ProvisioningManagers,
}

impl Harness {
    pub fn new(engine: LocalPipelineEngine, routes: Vec<Route>) -> Self {
        Self::with_config(engine, routes, BridgeConfig::default())
    }

    pub fn with_config(engine: LocalPipelineEngine, routes: Vec<Route>, config: BridgeConfig) -> Self {
        init_test_logging();

        let engine = Arc::new(engine);
        let store = Arc::new(CountingRouteStore::with_routes(routes));
        let transactions = Arc::new(RecordingTransactionManager::default());
        let constructions = Arc::new(AtomicUsize::new(0));

        let factory_engine = engine.clone();
        let factory_count = constructions.clone();
        let factory = move || -> PipelineResult<Arc<dyn PipelineEngine>> {
            factory_count.fetch_add(1, Ordering::SeqCst);
            let engine: Arc<dyn PipelineEngine> = factory_engine.clone();
            Ok(engine)
        };

        let managers = ProvisioningManagers::new(
            Arc::new(factory),
            store.clone(),
            transactions.clone(),
            config,
        );

        Self {
            engine,
            store,
            transactions,
            constructions,
            managers,
        }
    }

    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}
