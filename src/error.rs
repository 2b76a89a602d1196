//! Error taxonomy and exit-status mapping
//!
//! Every fatal condition carries a distinct exit code so scripts can tell
//! input problems, trust rejections, protocol-level rejections and transport
//! failures apart. Input errors are detected before any network activity.

use crate::session::RejectReason;
use crate::trust::CertificateAnomaly;
use std::collections::BTreeSet;
use thiserror::Error;

/// Main error type for session controller operations. None of these are
/// retried; each maps to a deterministic process exit status.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server address: {input}")]
    InvalidEndpoint { input: String },

    #[error("invalid QoS option {value}. Options are 0, 1 or 2")]
    InvalidQos { value: u8 },

    #[error("TLS certificate rejected ({})", format_anomalies(.residual))]
    SslTrustRejected {
        residual: BTreeSet<CertificateAnomaly>,
    },

    #[error("connection failed: {0}")]
    ConnectionRejected(RejectReason),

    #[error("transport failure: {reason}")]
    TransportFailure { reason: String },
}

impl ClientError {
    /// Deterministic exit status for this condition.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidQos { .. } => 2,
            Self::InvalidEndpoint { .. } => 3,
            Self::SslTrustRejected { .. } => 4,
            Self::ConnectionRejected(reason) => match reason {
                RejectReason::IdentifierRejected => 10,
                RejectReason::UnsupportedProtocolVersion => 11,
                RejectReason::BadCredentials => 12,
                RejectReason::NotAuthorized => 13,
                RejectReason::ServerUnavailable => 14,
            },
            Self::TransportFailure { .. } => 20,
        }
    }
}

fn format_anomalies(anomalies: &BTreeSet<CertificateAnomaly>) -> String {
    let parts: Vec<String> = anomalies.iter().map(|a| a.to_string()).collect();
    parts.join(", ")
}

/// Result type for session controller operations.
pub type ClientResult<T> = Result<T, ClientError>;
