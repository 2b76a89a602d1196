//! Session engine seam
//!
//! The controller never touches wire-level MQTT; it drives a [`SessionEngine`]
//! and consumes typed [`SessionEvent`]s from a single mpsc channel. The
//! rumqttc-backed implementation lives in [`engine`]; tests substitute a mock.

use crate::endpoint::ConnectionTarget;
use crate::plan::Qos;
use crate::trust::CertificateAnomaly;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;

pub mod engine;
pub mod tls;

pub use engine::RumqttcEngine;

/// Username/password pair for session authentication. Set before the session
/// opens, immutable afterward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Why the broker refused the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    IdentifierRejected,
    UnsupportedProtocolVersion,
    BadCredentials,
    NotAuthorized,
    ServerUnavailable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IdentifierRejected => "identifier rejected",
            Self::UnsupportedProtocolVersion => "unsupported MQTT protocol version",
            Self::BadCredentials => "bad username or password",
            Self::NotAuthorized => "not authorized",
            Self::ServerUnavailable => "server unavailable",
        };
        f.write_str(s)
    }
}

/// The session-level result of one connection attempt. Terminal for the
/// process when rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Accepted,
    Rejected(RejectReason),
}

/// Broker response to a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeResult {
    Granted(Qos),
    Failure,
}

/// Asynchronous lifecycle events delivered by the session engine, in the
/// order they logically occurred on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Result of the open-session request.
    Outcome(SessionOutcome),
    /// Acknowledgement for a subscription, in dispatch order.
    Subscribed(SubscribeResult),
    /// Acknowledgement for a QoS 1/2 publish.
    Published { packet_id: u16 },
    /// A message arrived on a subscribed topic.
    MessageReceived {
        topic: String,
        payload: Bytes,
        retained: bool,
    },
    /// TLS validation found anomalies; the controller must decide trust
    /// before the attempt can continue.
    CertificateAnomalies(BTreeSet<CertificateAnomaly>),
    /// Unrecoverable I/O failure.
    TransportError(String),
}

/// The external session engine interface.
///
/// All calls are asynchronous requests; completion or failure arrives later
/// as a [`SessionEvent`]. The controller is the single writer on an engine
/// instance.
#[async_trait::async_trait]
pub trait SessionEngine: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a session against the target. The outcome arrives as
    /// [`SessionEvent::Outcome`].
    async fn open(
        &mut self,
        target: &ConnectionTarget,
        credentials: &Credentials,
        clean_session: bool,
    ) -> Result<(), Self::Error>;

    /// Request a subscription to a topic filter.
    async fn subscribe(&mut self, topic_filter: &str, qos: Qos) -> Result<(), Self::Error>;

    /// Request a publish.
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Instruct the engine to ignore exactly the given anomaly classes on
    /// subsequent certificate validation for this session.
    async fn override_trust(
        &mut self,
        ignore: &BTreeSet<CertificateAnomaly>,
    ) -> Result<(), Self::Error>;

    /// Terminate the session.
    async fn close(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reasons_render_human_readable() {
        assert_eq!(
            RejectReason::UnsupportedProtocolVersion.to_string(),
            "unsupported MQTT protocol version"
        );
        assert_eq!(
            RejectReason::BadCredentials.to_string(),
            "bad username or password"
        );
    }

    #[test]
    fn identical_message_events_compare_equal() {
        let a = SessionEvent::MessageReceived {
            topic: "sensors/temp".to_string(),
            payload: Bytes::from_static(b"21.5"),
            retained: false,
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
