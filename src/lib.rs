//! Asynchronous HTTP request engine.
//!
//! Issues concurrent exchanges through a pluggable [`Transport`], classifies
//! every outcome into the closed [`Status`] taxonomy, decodes JSON bodies
//! into typed success/error payloads, and supports cooperative mid-flight
//! cancellation — including forced [`Status::NotAuthorized`] cancellation of
//! outstanding requests when the transport raises an authentication
//! challenge.
//!
//! # Flow
//!
//! 1. Caller builds a [`Request`] and hands it to [`Session::begin`] with a
//!    completion callback.
//! 2. The engine registers a per-request operation and issues the exchange
//!    through the transport on its work context.
//! 3. On completion the operation classifies the result into an
//!    [`Outcome`], which is delivered exactly once on the session's
//!    [`DeliveryQueue`].
//!
//! Cancellation is cooperative: [`Session::cancel`] flags the operation and
//! cancels the transport task; the flag is observed at the operation's two
//! decision points. A status force-assigned by challenge handling always
//! wins over late-arriving classification.

pub mod activity;
pub mod codec;
pub mod delivery;
pub mod error;
pub mod http;
mod operation;
pub mod request;
pub mod result;
pub mod session;
pub mod transport;

pub use activity::{ActivityCounter, ActivitySink};
pub use delivery::{CallbackUnit, DeliveryQueue};
pub use error::{Error, Result};
pub use http::{Method, MimeType};
pub use request::{Body, Request, RequestId};
pub use result::{Outcome, ResponseMeta, Status};
pub use session::{Session, SessionBuilder, SessionConfig};
pub use transport::{
    Challenge, ChallengeDecision, ChallengeScope, Transport, TransportParts, TransportRequest,
};
