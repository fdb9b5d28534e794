//! Transport seam.
//!
//! The engine issues exchanges through the [`Transport`] trait and receives
//! completions and authentication challenges asynchronously. Tasks are
//! created suspended; the operation resumes them once its own bookkeeping is
//! in place. This keeps the engine testable against the in-memory
//! [`fake`] transport and runnable against the reqwest-backed [`http`] one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::http::Method;
use crate::result::ResponseMeta;

pub mod fake;
pub mod http;

/// Identity of one in-flight exchange, unique per transport instance.
pub type TaskId = u64;

/// Well-known low-level failure codes reported by transports. Anything
/// outside this table classifies as `Status::OtherError`.
pub const CODE_CANCELLED: i32 = -999;
pub const CODE_TIMED_OUT: i32 = -1001;
pub const CODE_HOST_UNREACHABLE: i32 = -1004;
pub const CODE_CONNECTION_LOST: i32 = -1005;
pub const CODE_CONNECTION_UNAVAILABLE: i32 = -1009;

/// Fully assembled request handed to the transport: descriptor headers
/// already merged over session defaults.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// Low-level failure reported by a transport task.
#[derive(Debug, Clone)]
pub struct TaskError {
    pub code: i32,
    pub message: String,
}

/// Asynchronous completion of one exchange.
#[derive(Debug, Default)]
pub struct TaskCompletion {
    pub body: Option<Vec<u8>>,
    pub response: Option<ResponseMeta>,
    pub error: Option<TaskError>,
}

/// Control surface for one in-flight exchange.
pub trait TaskControl: Send + Sync {
    fn id(&self) -> TaskId;
    /// Terminates the exchange; the task completes with [`CODE_CANCELLED`].
    fn cancel(&self);
    fn suspend(&self);
    fn resume(&self);
}

/// One issued exchange: its control handle plus the completion notification.
pub struct TransportTask {
    pub control: Arc<dyn TaskControl>,
    pub completion: oneshot::Receiver<TaskCompletion>,
}

pub trait Transport: Send + Sync {
    /// Creates a read-only exchange. The task starts suspended; call
    /// [`TaskControl::resume`] to issue it.
    fn fetch(&self, request: TransportRequest) -> TransportTask;

    /// Creates a write exchange carrying `body`.
    fn upload(&self, request: TransportRequest, body: Vec<u8>) -> TransportTask;

    /// Tears down the underlying session. In-flight tasks complete with a
    /// cancelled error or by having their completion channel dropped.
    fn invalidate(&self);
}

/// Which part of the session a challenge targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeScope {
    Session,
    Task(TaskId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeDecision {
    Proceed,
    Cancel,
}

/// Authentication/TLS prompt raised by the transport mid-request. Must be
/// answered exactly once; the engine always answers [`ChallengeDecision::Cancel`]
/// and never supplies credentials.
pub struct Challenge {
    pub scope: ChallengeScope,
    answer: oneshot::Sender<ChallengeDecision>,
}

impl Challenge {
    pub fn new(scope: ChallengeScope) -> (Self, oneshot::Receiver<ChallengeDecision>) {
        let (tx, rx) = oneshot::channel();
        (Self { scope, answer: tx }, rx)
    }

    pub fn answer(self, decision: ChallengeDecision) {
        let _ = self.answer.send(decision);
    }
}

/// Everything a [`Session`](crate::Session) needs from a transport.
pub struct TransportParts {
    pub transport: Arc<dyn Transport>,
    pub challenges: mpsc::UnboundedReceiver<Challenge>,
}
