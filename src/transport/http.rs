//! reqwest-backed production transport.
//!
//! Each task runs on its own tokio task and starts only when resumed.
//! `cancel()` aborts the exchange and completes it with [`CODE_CANCELLED`].
//! An HTTP exchange cannot be paused once issued, so `suspend()` only defers
//! tasks that have not started yet. This transport never raises interactive
//! challenges; TLS failures surface as send errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, oneshot, watch};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::Method;
use crate::result::ResponseMeta;

use super::{
    CODE_CANCELLED, CODE_CONNECTION_LOST, CODE_HOST_UNREACHABLE, CODE_TIMED_OUT, Challenge,
    TaskCompletion, TaskControl, TaskError, TaskId, Transport, TransportParts, TransportRequest,
    TransportTask,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransportBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl HttpTransportBuilder {
    pub fn new() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            connect_timeout: None,
            user_agent: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<TransportParts> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder
            .build()
            .map_err(|err| Error::Transport { code: 0, message: err.to_string() })?;

        let (challenge_tx, challenge_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let transport = Arc::new(HttpTransport {
            client,
            next_task_id: AtomicU64::new(0),
            shutdown,
            _challenges: challenge_tx,
        });
        Ok(TransportParts { transport, challenges: challenge_rx })
    }
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    next_task_id: AtomicU64,
    shutdown: watch::Sender<bool>,
    // Keeps the challenge channel open for the session's challenge loop.
    _challenges: mpsc::UnboundedSender<Challenge>,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    fn issue(&self, request: TransportRequest, body: Option<Vec<u8>>) -> TransportTask {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let (completion_tx, completion_rx) = oneshot::channel();
        let (go, go_rx) = watch::channel(false);
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let control = Arc::new(HttpTaskControl {
            id,
            go,
            cancel: Arc::clone(&cancel),
            cancelled: Arc::clone(&cancelled),
        });

        let client = self.client.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let completion = drive(client, request, body, go_rx, cancel, cancelled, shutdown).await;
            let _ = completion_tx.send(completion);
        });

        TransportTask { control, completion: completion_rx }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: TransportRequest) -> TransportTask {
        self.issue(request, None)
    }

    fn upload(&self, request: TransportRequest, body: Vec<u8>) -> TransportTask {
        self.issue(request, Some(body))
    }

    fn invalidate(&self) {
        debug!("http transport invalidated");
        let _ = self.shutdown.send(true);
    }
}

struct HttpTaskControl {
    id: TaskId,
    go: watch::Sender<bool>,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl TaskControl for HttpTaskControl {
    fn id(&self) -> TaskId {
        self.id
    }

    fn cancel(&self) {
        // Flag first: notify_one stores a permit, the flag settles races.
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }

    fn suspend(&self) {
        let _ = self.go.send(false);
    }

    fn resume(&self) {
        let _ = self.go.send(true);
    }
}

async fn drive(
    client: reqwest::Client,
    request: TransportRequest,
    body: Option<Vec<u8>>,
    mut go: watch::Receiver<bool>,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) -> TaskCompletion {
    // Tasks start suspended; wait for resume, cancellation, or teardown.
    loop {
        if cancelled.load(Ordering::SeqCst) || *shutdown.borrow() {
            return cancelled_completion();
        }
        if *go.borrow() {
            break;
        }
        tokio::select! {
            _ = cancel.notified() => {}
            changed = go.changed() => {
                if changed.is_err() {
                    return cancelled_completion();
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return cancelled_completion();
                }
            }
        }
    }

    let url = match reqwest::Url::parse(&request.url) {
        Ok(url) => url,
        Err(err) => {
            return TaskCompletion {
                error: Some(TaskError { code: 0, message: format!("invalid url: {err}") }),
                ..Default::default()
            };
        }
    };

    let mut builder = client.request(reqwest_method(request.method), url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(bytes) = body {
        builder = builder.body(bytes);
    }

    let send = builder.send();
    tokio::pin!(send);
    let response = tokio::select! {
        _ = cancel.notified() => return cancelled_completion(),
        _ = shutdown.changed() => return cancelled_completion(),
        result = &mut send => match result {
            Ok(response) => response,
            Err(err) => {
                return TaskCompletion {
                    error: Some(map_send_error(&err)),
                    ..Default::default()
                };
            }
        },
    };

    let meta = response_meta(&response);
    let collect = response.bytes();
    tokio::pin!(collect);
    tokio::select! {
        _ = cancel.notified() => cancelled_completion(),
        _ = shutdown.changed() => cancelled_completion(),
        result = &mut collect => match result {
            Ok(bytes) => TaskCompletion {
                body: Some(bytes.to_vec()),
                response: Some(meta),
                error: None,
            },
            // The exchange died partway through the body.
            Err(err) => TaskCompletion {
                body: None,
                response: Some(meta),
                error: Some(TaskError { code: CODE_CONNECTION_LOST, message: err.to_string() }),
            },
        },
    }
}

fn cancelled_completion() -> TaskCompletion {
    TaskCompletion {
        error: Some(TaskError { code: CODE_CANCELLED, message: "cancelled".into() }),
        ..Default::default()
    }
}

fn map_send_error(err: &reqwest::Error) -> TaskError {
    let code = if err.is_timeout() {
        CODE_TIMED_OUT
    } else if err.is_connect() {
        CODE_HOST_UNREACHABLE
    } else {
        0
    };
    TaskError { code, message: err.to_string() }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn response_meta(response: &reqwest::Response) -> ResponseMeta {
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    let mime_type = headers.get("content-type").cloned();
    ResponseMeta {
        status_code: response.status().as_u16(),
        headers,
        mime_type,
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
    async fn cancel_before_resume_completes_cancelled() {
        let parts = HttpTransport::builder().build().unwrap();
        let task = parts.transport.fetch(request("http://localhost:1/never"));
        task.control.cancel();

        let completion = task.completion.await.unwrap();
        assert_eq!(completion.error.unwrap().code, CODE_CANCELLED);
    }

    #[tokio::test]
    async fn invalidate_unblocks_suspended_tasks() {
        let parts = HttpTransport::builder().build().unwrap();
        let task = parts.transport.fetch(request("http://localhost:1/never"));
        parts.transport.invalidate();

        let completion = task.completion.await.unwrap();
        assert_eq!(completion.error.unwrap().code, CODE_CANCELLED);
    }

    #[tokio::test]
    async fn invalid_url_reports_an_unmapped_error() {
        let parts = HttpTransport::builder().build().unwrap();
        let task = parts.transport.fetch(request("not a url"));
        task.control.resume();

        let completion = task.completion.await.unwrap();
        assert_eq!(completion.error.unwrap().code, 0);
    }
}
