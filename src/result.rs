//! Outcome taxonomy and the container delivered for every request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::http::MimeType;
use crate::transport::{
    CODE_CANCELLED, CODE_CONNECTION_LOST, CODE_CONNECTION_UNAVAILABLE, CODE_HOST_UNREACHABLE,
    CODE_TIMED_OUT, TaskError,
};

/// Closed outcome taxonomy. Exactly one variant describes every finished
/// request.
#[derive(Debug, Clone)]
pub enum Status {
    Ok,
    ConnectionUnavailable,
    TimedOut,
    ConnectionLost,
    /// Force-assigned when an authorization challenge cancels the request.
    NotAuthorized,
    ClientError(u16),
    ServerError(u16),
    /// The outgoing body failed to encode; no network call was made.
    SerializationFailed(Arc<Error>),
    /// The response body failed to decode; raw bytes stay attached.
    DeserializationFailed(Arc<Error>),
    Cancelled,
    /// A transport failure outside the well-known code table.
    OtherError(Arc<Error>),
    Unknown,
}

impl Status {
    /// Classifies an HTTP status code: `<400` is success, `4xx` and `5xx`
    /// keep their code, anything out of range falls back to `Unknown`.
    pub fn from_http(code: u16) -> Self {
        match code {
            0..=399 => Status::Ok,
            400..=499 => Status::ClientError(code),
            500..=599 => Status::ServerError(code),
            _ => Status::Unknown,
        }
    }

    /// Maps a transport failure through the fixed code table. Unrecognized
    /// codes become `OtherError` carrying the original error.
    pub fn from_transport(error: TaskError) -> Self {
        match error.code {
            CODE_CANCELLED => Status::Cancelled,
            CODE_TIMED_OUT | CODE_HOST_UNREACHABLE => Status::TimedOut,
            CODE_CONNECTION_LOST => Status::ConnectionLost,
            CODE_CONNECTION_UNAVAILABLE => Status::ConnectionUnavailable,
            _ => Status::OtherError(Arc::new(Error::Transport {
                code: error.code,
                message: error.message,
            })),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_client_or_server_error(&self) -> bool {
        matches!(self, Status::ClientError(_) | Status::ServerError(_))
    }

    /// The embedded error for the three error-carrying variants.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Status::SerializationFailed(err)
            | Status::DeserializationFailed(err)
            | Status::OtherError(err) => Some(err),
            _ => None,
        }
    }
}

/// Raw response metadata as reported by the transport.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub mime_type: Option<String>,
}

impl ResponseMeta {
    pub fn mime(&self) -> Option<MimeType> {
        self.mime_type.as_deref().and_then(MimeType::parse)
    }
}

/// The classified result of one request, produced exactly once and immutable
/// thereafter.
///
/// `payload` is set only when `status` is [`Status::Ok`] and the response is
/// JSON; `error_payload` only for client/server errors under the same mime
/// condition; both stay unset when the body is empty or absent.
#[derive(Debug)]
pub struct Outcome<T, E> {
    pub status: Status,
    pub response: Option<ResponseMeta>,
    pub body: Option<Vec<u8>>,
    pub payload: Option<T>,
    pub error_payload: Option<E>,
}

impl<T, E> Outcome<T, E> {
    pub(crate) fn bare(status: Status) -> Self {
        Self {
            status,
            response: None,
            body: None,
            payload: None,
            error_payload: None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|meta| meta.status_code)
    }

    pub fn mime(&self) -> Option<MimeType> {
        self.response.as_ref().and_then(ResponseMeta::mime)
    }

    pub fn error(&self) -> Option<&Error> {
        self.status.error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_classification_covers_all_ranges() {
        assert!(matches!(Status::from_http(200), Status::Ok));
        assert!(matches!(Status::from_http(304), Status::Ok));
        assert!(matches!(Status::from_http(404), Status::ClientError(404)));
        assert!(matches!(Status::from_http(503), Status::ServerError(503)));
        assert!(matches!(Status::from_http(700), Status::Unknown));
    }

    #[test]
    fn transport_code_table_is_fixed() {
        let err = |code| TaskError { code, message: "boom".into() };
        assert!(matches!(Status::from_transport(err(-999)), Status::Cancelled));
        assert!(matches!(Status::from_transport(err(-1001)), Status::TimedOut));
        assert!(matches!(Status::from_transport(err(-1004)), Status::TimedOut));
        assert!(matches!(Status::from_transport(err(-1005)), Status::ConnectionLost));
        assert!(matches!(
            Status::from_transport(err(-1009)),
            Status::ConnectionUnavailable
        ));
    }

    #[test]
    fn unmapped_transport_code_preserves_the_error() {
        let status = Status::from_transport(TaskError { code: 42, message: "odd".into() });
        let Status::OtherError(err) = &status else {
            panic!("expected OtherError, got {status:?}");
        };
        assert!(matches!(**err, Error::Transport { code: 42, .. }));
    }

    #[test]
    fn response_meta_parses_mime_with_parameters() {
        let meta = ResponseMeta {
            status_code: 200,
            headers: HashMap::new(),
            mime_type: Some("application/json; charset=utf-8".into()),
        };
        assert_eq!(meta.mime(), Some(MimeType::Json));
    }
}
