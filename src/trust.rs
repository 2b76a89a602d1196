//! Certificate trust evaluation for TLS connections
//!
//! Decides whether a connection attempt may proceed despite certificate
//! validation anomalies. The `--accept-self-signed-certificate` flag only
//! excuses the two anomaly classes a self-signed deployment produces;
//! everything else (expiry, revocation, a broken chain under a different
//! root) still rejects the connection.

use std::collections::BTreeSet;
use std::fmt;

/// A specific reason a TLS certificate failed standard validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CertificateAnomaly {
    /// Certificate is self-signed (no path to a trusted root).
    SelfSigned,
    /// Certificate is not valid for the requested server name.
    HostnameMismatch,
    /// Certificate validity period has ended.
    Expired,
    /// Certificate validity period has not started yet.
    NotYetValid,
    /// Certificate has been revoked.
    Revoked,
    /// Chain terminates in an untrusted or malformed root.
    UntrustedRoot,
    /// Any other validation failure.
    Other,
}

impl fmt::Display for CertificateAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SelfSigned => "self-signed certificate",
            Self::HostnameMismatch => "hostname mismatch",
            Self::Expired => "certificate expired",
            Self::NotYetValid => "certificate not yet valid",
            Self::Revoked => "certificate revoked",
            Self::UntrustedRoot => "untrusted root",
            Self::Other => "validation failure",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating one connection attempt's anomaly set.
///
/// `ignored` holds exactly the classes that were filtered out; on accept the
/// controller forwards this set (and nothing more) to the session engine's
/// trust override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustDecision {
    pub accept: bool,
    pub residual: BTreeSet<CertificateAnomaly>,
    pub ignored: BTreeSet<CertificateAnomaly>,
}

/// The only anomaly classes `--accept-self-signed-certificate` may excuse.
const SELF_SIGNED_ALLOWANCE: [CertificateAnomaly; 2] = [
    CertificateAnomaly::SelfSigned,
    CertificateAnomaly::HostnameMismatch,
];

/// Evaluate certificate anomalies against the self-signed acceptance policy.
///
/// With `allow_self_signed` unset the decision is always reject with the
/// anomaly set unchanged. With it set, exactly `SelfSigned` and
/// `HostnameMismatch` are removed; the attempt is accepted iff nothing
/// remains.
pub fn evaluate(
    anomalies: &BTreeSet<CertificateAnomaly>,
    allow_self_signed: bool,
) -> TrustDecision {
    if !allow_self_signed {
        return TrustDecision {
            accept: false,
            residual: anomalies.clone(),
            ignored: BTreeSet::new(),
        };
    }

    let ignored: BTreeSet<_> = anomalies
        .iter()
        .copied()
        .filter(|a| SELF_SIGNED_ALLOWANCE.contains(a))
        .collect();
    let residual: BTreeSet<_> = anomalies.difference(&ignored).copied().collect();

    TrustDecision {
        accept: residual.is_empty(),
        residual,
        ignored,
    }
}
