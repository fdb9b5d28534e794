//! Session engine: owns the transport, tracks in-flight operations, handles
//! authorization challenges, and delivers outcomes on the caller-designated
//! delivery context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::activity::{ActivityCounter, ActivitySink};
use crate::delivery::DeliveryQueue;
use crate::http::{MimeType, header};
use crate::operation::{self, OpShared, OperationHandle};
use crate::request::{Request, RequestId};
use crate::result::Outcome;
use crate::transport::{Challenge, ChallengeDecision, ChallengeScope, Transport, TransportParts};

/// Session-wide defaults applied to every request. Request headers override
/// these on key collision.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub default_headers: HashMap<String, String>,
}

impl SessionConfig {
    /// The stock configuration: accept and send JSON.
    pub fn json() -> Self {
        let mut default_headers = HashMap::new();
        default_headers.insert(header::ACCEPT.to_string(), MimeType::Json.as_str().to_string());
        default_headers.insert(
            header::CONTENT_TYPE.to_string(),
            MimeType::Json.as_str().to_string(),
        );
        Self { default_headers }
    }
}

type Registry = Mutex<HashMap<RequestId, Arc<dyn OperationHandle>>>;

pub struct SessionBuilder {
    config: SessionConfig,
    delivery: Option<DeliveryQueue>,
    sink: Option<Arc<dyn ActivitySink>>,
}

impl SessionBuilder {
    fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            delivery: None,
            sink: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Delivers outcomes on the given queue instead of a session-owned task.
    pub fn delivery(mut self, delivery: DeliveryQueue) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Wires the activity counter to an external busy indicator.
    pub fn activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the session and starts its challenge loop. Must run within a
    /// tokio runtime.
    pub fn build(self, parts: TransportParts) -> Session {
        let TransportParts { transport, challenges } = parts;
        let registry: Arc<Registry> = Arc::new(Mutex::new(HashMap::new()));
        Session::spawn_challenge_loop(Arc::clone(&registry), challenges);
        Session {
            transport,
            config: self.config,
            registry,
            delivery: self.delivery.unwrap_or_else(DeliveryQueue::spawn),
            counter: Arc::new(ActivityCounter::new(self.sink)),
        }
    }
}

pub struct Session {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    registry: Arc<Registry>,
    delivery: DeliveryQueue,
    counter: Arc<ActivityCounter>,
}

impl Session {
    pub fn new(parts: TransportParts, config: SessionConfig) -> Self {
        Self::builder().config(config).build(parts)
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Begins a request. Never blocks and always returns immediately; every
    /// failure, including transport rejection, is delivered through the
    /// outcome callback. Exactly one outcome is delivered per call.
    pub fn begin<T, E>(
        &self,
        request: Request,
        completed: impl FnOnce(Outcome<T, E>) + Send + 'static,
    ) -> RequestId
    where
        T: DeserializeOwned + Send + 'static,
        E: DeserializeOwned + Send + 'static,
    {
        let id = request.id().clone();
        let display = request.displays_activity();
        debug!(id = %id, method = %request.method(), url = request.url(), "beginning request");

        let shared = Arc::new(OpShared::new(id.clone()));
        self.registry
            .lock()
            .insert(id.clone(), Arc::clone(&shared) as Arc<dyn OperationHandle>);
        if display {
            self.counter.increment();
        }

        let transport = Arc::clone(&self.transport);
        let default_headers = self.config.default_headers.clone();
        let registry = Arc::clone(&self.registry);
        let delivery = self.delivery.clone();
        let counter = Arc::clone(&self.counter);
        let op_id = id.clone();
        tokio::spawn(async move {
            let outcome = operation::run::<T, E>(shared, request, transport, default_headers).await;
            // The operation is finished; its callback unit is scheduled
            // strictly after, with the counter decrement riding along.
            registry.lock().remove(&op_id);
            delivery.dispatch(Box::new(move || {
                completed(outcome);
                if display {
                    counter.decrement();
                }
            }));
        });
        id
    }

    /// Asks a tracked, unfinished operation to cancel. Returns false when no
    /// such operation exists — including one that already finished.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let handle = self.registry.lock().get(id).cloned();
        match handle {
            Some(operation) => operation.cancel(),
            None => false,
        }
    }

    /// Requests cancellation of every tracked operation without waiting for
    /// any of them to complete.
    pub fn cancel_all(&self) {
        let operations: Vec<_> = self.registry.lock().values().cloned().collect();
        for operation in operations {
            operation.cancel();
        }
    }

    /// Suspends a tracked operation's exchange; deferred until the transport
    /// task exists when it has not been created yet.
    pub fn suspend(&self, id: &RequestId) -> bool {
        self.set_suspended(id, true)
    }

    pub fn resume(&self, id: &RequestId) -> bool {
        self.set_suspended(id, false)
    }

    fn set_suspended(&self, id: &RequestId, suspended: bool) -> bool {
        let handle = self.registry.lock().get(id).cloned();
        match handle {
            Some(operation) => operation.set_suspended(suspended),
            None => false,
        }
    }

    /// Number of tracked (not yet delivered) operations.
    pub fn in_flight(&self) -> usize {
        self.registry.lock().len()
    }

    /// Current value of the activity counter.
    pub fn active_count(&self) -> u64 {
        self.counter.count()
    }

    /// Cancels all outstanding operations, then tears down the transport.
    /// Safe to call with operations in flight; never blocks.
    pub fn invalidate_and_close(&self) {
        let outstanding = self.in_flight();
        if outstanding > 0 {
            warn!(outstanding, "closing session with operations in flight; cancelling them");
        }
        self.cancel_all();
        self.transport.invalidate();
    }

    fn spawn_challenge_loop(
        registry: Arc<Registry>,
        mut challenges: mpsc::UnboundedReceiver<Challenge>,
    ) {
        tokio::spawn(async move {
            while let Some(challenge) = challenges.recv().await {
                match challenge.scope {
                    ChallengeScope::Session => {
                        // Every tracked operation is forced into
                        // NotAuthorized, whatever its own I/O would produce.
                        let operations: Vec<_> = registry.lock().values().cloned().collect();
                        for operation in operations {
                            operation.cancel_for_unauthorized();
                        }
                    }
                    ChallengeScope::Task(task_id) => {
                        // The matching operation may already have completed;
                        // the challenge is denied either way.
                        let operation = registry
                            .lock()
                            .values()
                            .find(|operation| operation.task_id() == Some(task_id))
                            .cloned();
                        if let Some(operation) = operation {
                            operation.cancel_for_unauthorized();
                        }
                    }
                }
                // Credentials are never supplied at this layer.
                challenge.answer(ChallengeDecision::Cancel);
            }
        });
    }
}
