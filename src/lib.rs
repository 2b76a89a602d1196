//! mqttctl - a command-line MQTT client
//!
//! Connects to a broker over raw TCP (optionally TLS) or WebSocket, performs
//! a declared set of subscribe and publish actions once the session is
//! confirmed usable, and stays attached to report acknowledgements and
//! incoming messages.
//!
//! # Overview
//!
//! - [`endpoint`] resolves the server address into a typed connection target
//! - [`plan`] validates the subscribe/publish actions before any network call
//! - [`trust`] decides whether TLS certificate anomalies may be excused
//! - [`controller`] reacts to session lifecycle events and drives the actions
//! - [`session`] is the seam to the MQTT engine (rumqttc) that handles the
//!   protocol state machine, keep-alive and wire encoding

pub mod controller;
pub mod endpoint;
pub mod error;
pub mod plan;
pub mod session;
pub mod testing;
pub mod trust;

pub use controller::SessionController;
pub use endpoint::{resolve, ConnectionTarget, TransportKind};
pub use error::{ClientError, ClientResult};
pub use plan::{ActionPlan, PublishIntent, Qos, SubscribeIntent};
pub use session::{
    Credentials, RejectReason, RumqttcEngine, SessionEngine, SessionEvent, SessionOutcome,
    SubscribeResult,
};
pub use trust::{evaluate, CertificateAnomaly, TrustDecision};
