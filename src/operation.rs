//! Per-request worker: owns one transport task for its lifetime and produces
//! exactly one outcome.
//!
//! The lifecycle is an explicit state machine — `Ready → Running → Finished`,
//! with `Suspended` reachable only from `Running` — plus an orthogonal
//! cancel-requested flag. The final status is committed through a
//! first-write-wins cell: a force-assigned status (authorization challenge,
//! or anything committed before start) beats whatever the exchange itself
//! would later classify, and the completion path computes its full candidate
//! (transport mapping, HTTP classification, decode override) before
//! attempting its single commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::codec;
use crate::http::MimeType;
use crate::request::{Request, RequestId};
use crate::result::{Outcome, ResponseMeta, Status};
use crate::transport::{TaskCompletion, TaskControl, TaskId, Transport, TransportRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    Ready,
    Running,
    Suspended,
    Finished,
}

/// Narrow capability surface the session uses to track heterogeneous
/// operations without knowing their payload types.
pub(crate) trait OperationHandle: Send + Sync {
    fn id(&self) -> &RequestId;
    /// Identity of the underlying transport task, once one exists.
    fn task_id(&self) -> Option<TaskId>;
    /// Requests cooperative cancellation. Returns false when the operation
    /// has already finished.
    fn cancel(&self) -> bool;
    /// Force-assigns `NotAuthorized` as the final status and cancels the
    /// exchange. Distinct from ordinary cancellation: it is a terminal,
    /// caller-meaningful outcome.
    fn cancel_for_unauthorized(&self);
    /// Forwards suspension to the transport task when it exists; otherwise
    /// the request is deferred until the task is created.
    fn set_suspended(&self, suspended: bool) -> bool;
    fn is_finished(&self) -> bool;
}

enum Commit {
    Accepted(Status),
    Overridden(Status),
}

pub(crate) struct OpShared {
    id: RequestId,
    state: Mutex<OpState>,
    cancel_requested: AtomicBool,
    suspend_requested: AtomicBool,
    /// First committed status wins; later commits are no-ops.
    status: Mutex<Option<Status>>,
    task: Mutex<Option<Arc<dyn TaskControl>>>,
}

impl OpShared {
    pub(crate) fn new(id: RequestId) -> Self {
        Self {
            id,
            state: Mutex::new(OpState::Ready),
            cancel_requested: AtomicBool::new(false),
            suspend_requested: AtomicBool::new(false),
            status: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    fn commit(&self, candidate: Status) -> Commit {
        let mut slot = self.status.lock();
        match slot.as_ref() {
            Some(prior) => Commit::Overridden(prior.clone()),
            None => {
                *slot = Some(candidate.clone());
                Commit::Accepted(candidate)
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn suspend_requested(&self) -> bool {
        self.suspend_requested.load(Ordering::SeqCst)
    }

    fn begin_running(&self) {
        let mut state = self.state.lock();
        if *state == OpState::Ready {
            *state = OpState::Running;
        }
    }

    fn enter_suspended(&self) {
        let mut state = self.state.lock();
        if *state == OpState::Running {
            *state = OpState::Suspended;
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        debug_assert!(*state != OpState::Finished, "operation finished twice");
        *state = OpState::Finished;
    }

    fn attach_task(&self, control: Arc<dyn TaskControl>) {
        *self.task.lock() = Some(control);
    }

    fn task_control(&self) -> Option<Arc<dyn TaskControl>> {
        self.task.lock().clone()
    }
}

impl OperationHandle for OpShared {
    fn id(&self) -> &RequestId {
        &self.id
    }

    fn task_id(&self) -> Option<TaskId> {
        self.task_control().map(|control| control.id())
    }

    fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        if let Some(control) = self.task_control() {
            control.cancel();
        }
        true
    }

    fn cancel_for_unauthorized(&self) {
        if self.is_finished() {
            return;
        }
        let _ = self.commit(Status::NotAuthorized);
        self.cancel_requested.store(true, Ordering::SeqCst);
        if let Some(control) = self.task_control() {
            control.cancel();
        }
    }

    fn set_suspended(&self, suspended: bool) -> bool {
        if self.is_finished() {
            return false;
        }
        self.suspend_requested.store(suspended, Ordering::SeqCst);
        if let Some(control) = self.task_control() {
            let mut state = self.state.lock();
            match (*state, suspended) {
                (OpState::Running, true) => {
                    *state = OpState::Suspended;
                    control.suspend();
                }
                (OpState::Suspended, false) => {
                    *state = OpState::Running;
                    control.resume();
                }
                _ => {}
            }
        }
        true
    }

    fn is_finished(&self) -> bool {
        *self.state.lock() == OpState::Finished
    }
}

/// Drives one request to its outcome. Exactly one outcome is produced no
/// matter how cancellation interleaves with the exchange.
pub(crate) async fn run<T, E>(
    shared: Arc<OpShared>,
    request: Request,
    transport: Arc<dyn Transport>,
    default_headers: HashMap<String, String>,
) -> Outcome<T, E>
where
    T: DeserializeOwned,
    E: DeserializeOwned,
{
    if shared.cancel_requested() {
        return finish_early(&shared, Status::Cancelled);
    }
    shared.begin_running();

    let transport_request = build_transport_request(&request, &default_headers);
    let task = match request.body_ref() {
        Some(body) => match body.encode() {
            Ok(bytes) => transport.upload(transport_request, bytes),
            Err(err) => {
                debug!(id = %shared.id, "request body failed to encode");
                return finish_early(&shared, Status::SerializationFailed(Arc::new(err)));
            }
        },
        None => transport.fetch(transport_request),
    };

    shared.attach_task(Arc::clone(&task.control));
    if shared.cancel_requested() {
        // Cancellation raced task creation; make sure the exchange stops.
        task.control.cancel();
    }
    if shared.suspend_requested() {
        shared.enter_suspended();
    } else {
        task.control.resume();
    }

    // A dropped channel means the transport went away mid-flight; treat it
    // as an empty completion.
    let completion = task.completion.await.unwrap_or_default();
    conclude(&shared, completion)
}

fn finish_early<T, E>(shared: &OpShared, candidate: Status) -> Outcome<T, E> {
    let status = match shared.commit(candidate) {
        Commit::Accepted(status) => status,
        Commit::Overridden(forced) => forced,
    };
    shared.finish();
    Outcome::bare(status)
}

fn build_transport_request(
    request: &Request,
    defaults: &HashMap<String, String>,
) -> TransportRequest {
    // Descriptor headers override session defaults on collision.
    let mut headers = defaults.clone();
    for (name, value) in request.header_map() {
        headers.insert(name.clone(), value.clone());
    }
    TransportRequest {
        method: request.method(),
        url: request.url().to_string(),
        headers,
    }
}

fn conclude<T, E>(shared: &OpShared, completion: TaskCompletion) -> Outcome<T, E>
where
    T: DeserializeOwned,
    E: DeserializeOwned,
{
    let draft = draft_outcome(shared, completion);
    let outcome = match shared.commit(draft.status.clone()) {
        Commit::Accepted(_) => draft,
        // A status committed earlier (force-assigned, or a pre-start finish)
        // always wins; the late classification is discarded.
        Commit::Overridden(forced) => Outcome::bare(forced),
    };
    shared.finish();
    debug!(id = %shared.id, status = ?outcome.status, "request finished");
    outcome
}

fn draft_outcome<T, E>(shared: &OpShared, completion: TaskCompletion) -> Outcome<T, E>
where
    T: DeserializeOwned,
    E: DeserializeOwned,
{
    let TaskCompletion { body, response, error } = completion;

    if shared.cancel_requested() {
        return Outcome::bare(Status::Cancelled);
    }
    if let Some(err) = error {
        // Transport failures skip payload classification entirely.
        return Outcome {
            status: Status::from_transport(err),
            response,
            body: None,
            payload: None,
            error_payload: None,
        };
    }
    let Some(meta) = response else {
        return Outcome::bare(Status::Unknown);
    };
    classify(body, meta)
}

fn classify<T, E>(body: Option<Vec<u8>>, meta: ResponseMeta) -> Outcome<T, E>
where
    T: DeserializeOwned,
    E: DeserializeOwned,
{
    let status = Status::from_http(meta.status_code);

    let bytes = match body {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => {
            return Outcome {
                status,
                response: Some(meta),
                body: None,
                payload: None,
                error_payload: None,
            };
        }
    };

    // Only JSON bodies are decoded; anything else is handed back raw.
    if meta.mime() != Some(MimeType::Json) {
        return Outcome {
            status,
            response: Some(meta),
            body: Some(bytes),
            payload: None,
            error_payload: None,
        };
    }

    match status {
        Status::Ok => match codec::decode::<T>(&bytes) {
            Ok(payload) => Outcome {
                status,
                response: Some(meta),
                body: Some(bytes),
                payload: Some(payload),
                error_payload: None,
            },
            Err(err) => Outcome {
                status: Status::DeserializationFailed(Arc::new(err)),
                response: Some(meta),
                body: Some(bytes),
                payload: None,
                error_payload: None,
            },
        },
        Status::ClientError(_) | Status::ServerError(_) => match codec::decode::<E>(&bytes) {
            Ok(error_payload) => Outcome {
                status,
                response: Some(meta),
                body: Some(bytes),
                payload: None,
                error_payload: Some(error_payload),
            },
            Err(err) => Outcome {
                status: Status::DeserializationFailed(Arc::new(err)),
                response: Some(meta),
                body: Some(bytes),
                payload: None,
                error_payload: None,
            },
        },
        // Unclassifiable codes keep the raw bytes but are never decoded.
        _ => Outcome {
            status,
            response: Some(meta),
            body: Some(bytes),
            payload: None,
            error_payload: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TaskError;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Widget {
        name: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct ApiError {
        reason: String,
    }

    fn shared() -> OpShared {
        OpShared::new(RequestId::new())
    }

    fn json_meta(status_code: u16) -> ResponseMeta {
        ResponseMeta {
            status_code,
            headers: HashMap::new(),
            mime_type: Some("application/json".into()),
        }
    }

    #[test]
    fn first_commit_wins() {
        let op = shared();
        assert!(matches!(op.commit(Status::NotAuthorized), Commit::Accepted(_)));
        match op.commit(Status::Ok) {
            Commit::Overridden(Status::NotAuthorized) => {}
            other => panic!("expected the forced status to win, got {:?}", matches_name(&other)),
        }
    }

    fn matches_name(commit: &Commit) -> &'static str {
        match commit {
            Commit::Accepted(_) => "Accepted",
            Commit::Overridden(_) => "Overridden",
        }
    }

    #[test]
    fn forced_status_beats_late_success_classification() {
        let op = shared();
        op.cancel_for_unauthorized();

        let outcome: Outcome<Widget, ApiError> = conclude(
            &op,
            TaskCompletion {
                body: Some(b"{\"name\":\"bolt\"}".to_vec()),
                response: Some(json_meta(200)),
                error: None,
            },
        );
        assert!(matches!(outcome.status, Status::NotAuthorized));
        assert!(outcome.response.is_none());
        assert!(outcome.payload.is_none());
    }

    #[test]
    fn cancel_request_yields_cancelled_unless_forced() {
        let op = shared();
        assert!(op.cancel());

        let outcome: Outcome<Widget, ApiError> =
            conclude(&op, TaskCompletion::default());
        assert!(matches!(outcome.status, Status::Cancelled));
    }

    #[test]
    fn cancel_after_finish_returns_false() {
        let op = shared();
        let _: Outcome<Widget, ApiError> = conclude(&op, TaskCompletion::default());
        assert!(op.is_finished());
        assert!(!op.cancel());
    }

    #[test]
    fn missing_response_metadata_is_unknown() {
        let op = shared();
        let outcome: Outcome<Widget, ApiError> =
            conclude(&op, TaskCompletion::default());
        assert!(matches!(outcome.status, Status::Unknown));
    }

    #[test]
    fn transport_error_skips_classification() {
        let op = shared();
        let outcome: Outcome<Widget, ApiError> = conclude(
            &op,
            TaskCompletion {
                body: Some(b"ignored".to_vec()),
                response: None,
                error: Some(TaskError { code: -1001, message: "slow".into() }),
            },
        );
        assert!(matches!(outcome.status, Status::TimedOut));
        assert!(outcome.body.is_none());
    }

    #[test]
    fn ok_json_decodes_the_success_payload() {
        let outcome: Outcome<Widget, ApiError> =
            classify(Some(b"{\"name\":\"bolt\"}".to_vec()), json_meta(200));
        assert!(matches!(outcome.status, Status::Ok));
        assert_eq!(outcome.payload, Some(Widget { name: "bolt".into() }));
        assert!(outcome.error_payload.is_none());
    }

    #[test]
    fn client_error_decodes_the_error_payload() {
        let outcome: Outcome<Widget, ApiError> =
            classify(Some(b"{\"reason\":\"missing\"}".to_vec()), json_meta(404));
        assert!(matches!(outcome.status, Status::ClientError(404)));
        assert_eq!(outcome.error_payload, Some(ApiError { reason: "missing".into() }));
        assert!(outcome.payload.is_none());
    }

    #[test]
    fn decode_failure_overrides_status_and_keeps_bytes() {
        let outcome: Outcome<Widget, ApiError> =
            classify(Some(b"{\"name\":7}".to_vec()), json_meta(200));
        assert!(matches!(outcome.status, Status::DeserializationFailed(_)));
        assert_eq!(outcome.body.as_deref(), Some(&b"{\"name\":7}"[..]));
        assert!(outcome.response.is_some());
        assert!(outcome.payload.is_none());
    }

    #[test]
    fn empty_body_is_never_decoded() {
        let outcome: Outcome<Widget, ApiError> = classify(Some(Vec::new()), json_meta(200));
        assert!(matches!(outcome.status, Status::Ok));
        assert!(outcome.body.is_none());
        assert!(outcome.payload.is_none());
    }

    #[test]
    fn non_json_mime_is_handed_back_raw() {
        let meta = ResponseMeta {
            status_code: 200,
            headers: HashMap::new(),
            mime_type: Some("text/html".into()),
        };
        let outcome: Outcome<Widget, ApiError> =
            classify(Some(b"<html></html>".to_vec()), meta);
        assert!(matches!(outcome.status, Status::Ok));
        assert_eq!(outcome.body.as_deref(), Some(&b"<html></html>"[..]));
        assert!(outcome.payload.is_none());
    }

    #[test]
    fn out_of_range_code_keeps_bytes_without_decoding() {
        let outcome: Outcome<Widget, ApiError> =
            classify(Some(b"{\"name\":\"bolt\"}".to_vec()), json_meta(700));
        assert!(matches!(outcome.status, Status::Unknown));
        assert!(outcome.payload.is_none());
        assert!(outcome.error_payload.is_none());
        assert!(outcome.body.is_some());
    }
}
