//! In-memory transport for testing the engine without a network.
//!
//! The controller injects completions and challenges and inspects every
//! issued task.
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let session = Session::new(parts, SessionConfig::json());
//!
//! let id = session.begin::<Widget, ApiError>(request, callback);
//! controller.respond_json(0, 200, json!({"name": "bolt", "size": 7}));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::http::Method;
use crate::result::ResponseMeta;

use super::{
    CODE_CANCELLED, Challenge, ChallengeDecision, ChallengeScope, TaskCompletion, TaskControl,
    TaskError, TaskId, Transport, TransportParts, TransportRequest, TransportTask,
};

/// Builder for fake transport instances.
pub struct FakeTransportBuilder {}

impl FakeTransportBuilder {
    pub fn new() -> Self {
        Self {}
    }

    /// Builds the fake transport, returning [`TransportParts`] for creating a
    /// session and a [`FakeTransportController`] for driving it.
    pub fn build(self) -> (TransportParts, FakeTransportController) {
        let shared = Arc::new(Shared {
            tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            invalidated: AtomicBool::new(false),
        });
        let (challenge_tx, challenge_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(FakeTransport { shared: Arc::clone(&shared) });
        let controller = FakeTransportController { shared, challenge_tx };

        let parts = TransportParts {
            transport,
            challenges: challenge_rx,
        };
        (parts, controller)
    }
}

impl Default for FakeTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one task the transport was asked to issue.
#[derive(Debug, Clone)]
pub struct IssuedTask {
    pub id: TaskId,
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub started: bool,
    pub suspended: bool,
    pub cancelled: bool,
    pub completed: bool,
}

struct TaskRecord {
    id: TaskId,
    request: TransportRequest,
    body: Option<Vec<u8>>,
    completion: Option<oneshot::Sender<TaskCompletion>>,
    started: bool,
    suspended: bool,
    cancelled: bool,
}

impl TaskRecord {
    fn snapshot(&self) -> IssuedTask {
        IssuedTask {
            id: self.id,
            method: self.request.method,
            url: self.request.url.clone(),
            headers: self.request.headers.clone(),
            body: self.body.clone(),
            started: self.started,
            suspended: self.suspended,
            cancelled: self.cancelled,
            completed: self.completion.is_none(),
        }
    }
}

struct Shared {
    tasks: Mutex<Vec<TaskRecord>>,
    next_id: AtomicU64,
    invalidated: AtomicBool,
}

struct FakeTransport {
    shared: Arc<Shared>,
}

impl FakeTransport {
    fn issue(&self, request: TransportRequest, body: Option<Vec<u8>>) -> TransportTask {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (completion_tx, completion_rx) = oneshot::channel();

        self.shared.tasks.lock().push(TaskRecord {
            id,
            request,
            body,
            completion: Some(completion_tx),
            started: false,
            suspended: false,
            cancelled: false,
        });

        TransportTask {
            control: Arc::new(FakeTaskControl { id, shared: Arc::clone(&self.shared) }),
            completion: completion_rx,
        }
    }
}

impl Transport for FakeTransport {
    fn fetch(&self, request: TransportRequest) -> TransportTask {
        self.issue(request, None)
    }

    fn upload(&self, request: TransportRequest, body: Vec<u8>) -> TransportTask {
        self.issue(request, Some(body))
    }

    fn invalidate(&self) {
        self.shared.invalidated.store(true, Ordering::SeqCst);
        // Dropping the senders closes every outstanding completion channel.
        let mut tasks = self.shared.tasks.lock();
        for record in tasks.iter_mut() {
            record.completion = None;
        }
    }
}

struct FakeTaskControl {
    id: TaskId,
    shared: Arc<Shared>,
}

impl TaskControl for FakeTaskControl {
    fn id(&self) -> TaskId {
        self.id
    }

    fn cancel(&self) {
        let mut tasks = self.shared.tasks.lock();
        let Some(record) = tasks.iter_mut().find(|record| record.id == self.id) else {
            return;
        };
        record.cancelled = true;
        if let Some(sender) = record.completion.take() {
            let _ = sender.send(TaskCompletion {
                body: None,
                response: None,
                error: Some(TaskError {
                    code: CODE_CANCELLED,
                    message: "cancelled".into(),
                }),
            });
        }
    }

    fn suspend(&self) {
        let mut tasks = self.shared.tasks.lock();
        if let Some(record) = tasks.iter_mut().find(|record| record.id == self.id) {
            record.suspended = true;
        }
    }

    fn resume(&self) {
        let mut tasks = self.shared.tasks.lock();
        if let Some(record) = tasks.iter_mut().find(|record| record.id == self.id) {
            record.suspended = false;
            if record.completion.is_some() && !record.cancelled {
                record.started = true;
            }
        }
    }
}

/// Controller for completing tasks, raising challenges, and inspecting what
/// the engine asked the transport to do.
pub struct FakeTransportController {
    shared: Arc<Shared>,
    challenge_tx: mpsc::UnboundedSender<Challenge>,
}

impl FakeTransportController {
    pub fn issued(&self) -> Vec<IssuedTask> {
        self.shared.tasks.lock().iter().map(TaskRecord::snapshot).collect()
    }

    pub fn task(&self, index: usize) -> Option<IssuedTask> {
        self.shared.tasks.lock().get(index).map(TaskRecord::snapshot)
    }

    pub fn task_count(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    pub fn invalidated(&self) -> bool {
        self.shared.invalidated.load(Ordering::SeqCst)
    }

    /// Completes a task with an arbitrary completion. Returns false when the
    /// task is unknown or already finished (completed or cancelled).
    pub fn complete(&self, task_id: TaskId, completion: TaskCompletion) -> bool {
        let sender = {
            let mut tasks = self.shared.tasks.lock();
            tasks
                .iter_mut()
                .find(|record| record.id == task_id)
                .and_then(|record| record.completion.take())
        };
        match sender {
            Some(sender) => sender.send(completion).is_ok(),
            None => false,
        }
    }

    /// Completes a task with a full HTTP response.
    pub fn respond(
        &self,
        task_id: TaskId,
        status_code: u16,
        mime_type: Option<&str>,
        body: Option<&[u8]>,
    ) -> bool {
        self.complete(
            task_id,
            TaskCompletion {
                body: body.map(<[u8]>::to_vec),
                response: Some(ResponseMeta {
                    status_code,
                    headers: HashMap::new(),
                    mime_type: mime_type.map(str::to_string),
                }),
                error: None,
            },
        )
    }

    /// Completes a task with a JSON body.
    pub fn respond_json(&self, task_id: TaskId, status_code: u16, body: serde_json::Value) -> bool {
        self.respond(
            task_id,
            status_code,
            Some("application/json"),
            Some(body.to_string().as_bytes()),
        )
    }

    /// Completes a task with a transport-level failure.
    pub fn fail(&self, task_id: TaskId, code: i32, message: &str) -> bool {
        self.complete(
            task_id,
            TaskCompletion {
                body: None,
                response: None,
                error: Some(TaskError { code, message: message.into() }),
            },
        )
    }

    /// Raises a session-scoped challenge and waits for the engine's answer.
    /// Returns `None` when the challenge was dropped unanswered.
    pub async fn raise_session_challenge(&self) -> Option<ChallengeDecision> {
        self.raise(ChallengeScope::Session).await
    }

    /// Raises a challenge scoped to one task.
    pub async fn raise_task_challenge(&self, task_id: TaskId) -> Option<ChallengeDecision> {
        self.raise(ChallengeScope::Task(task_id)).await
    }

    async fn raise(&self, scope: ChallengeScope) -> Option<ChallengeDecision> {
        let (challenge, rx) = Challenge::new(scope);
        self.challenge_tx.send(challenge).ok()?;
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> TransportRequest {
        TransportRequest {
            method: Method::Get,
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn issued_tasks_are_recorded_and_start_suspended() {
        let (parts, controller) = FakeTransportBuilder::new().build();
        let task = parts.transport.fetch(request("http://a.test/x"));

        let issued = controller.task(0).unwrap();
        assert_eq!(issued.url, "http://a.test/x");
        assert!(!issued.started);

        task.control.resume();
        assert!(controller.task(0).unwrap().started);
    }

    #[tokio::test]
    async fn cancel_completes_with_the_cancelled_code() {
        let (parts, controller) = FakeTransportBuilder::new().build();
        let task = parts.transport.fetch(request("http://a.test/x"));
        task.control.resume();
        task.control.cancel();

        let completion = task.completion.await.unwrap();
        assert_eq!(completion.error.unwrap().code, CODE_CANCELLED);
        // A late response loses to the cancellation.
        assert!(!controller.respond(0, 200, None, None));
    }

    #[tokio::test]
    async fn invalidate_drops_outstanding_completions() {
        let (parts, controller) = FakeTransportBuilder::new().build();
        let task = parts.transport.fetch(request("http://a.test/x"));
        parts.transport.invalidate();

        assert!(controller.invalidated());
        assert!(task.completion.await.is_err());
    }
}
