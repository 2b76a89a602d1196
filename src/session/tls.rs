//! TLS certificate validation with anomaly classification
//!
//! Wraps the webpki verifier so certificate failures surface as
//! [`CertificateAnomaly`] values instead of aborting opaquely. Self-signed
//! chains are detected structurally (issuer equals subject on a lone leaf)
//! rather than from the rustls error variant, and their validity window and
//! server name are checked separately so expiry and hostname problems are
//! not masked by the broken chain. The verifier consults an ignore set
//! installed via the trust override; anomalies outside that set still fail
//! the handshake.

use crate::trust::CertificateAnomaly;
use rumqttc::tokio_rustls::rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    client::WebPkiServerVerifier,
    pki_types::{CertificateDer, ServerName, UnixTime},
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Shared trust state between the engine and the verifier.
///
/// `ignored` is written by the trust override; `observed` records the anomaly
/// set of the most recent failed handshake so the engine can report it.
#[derive(Debug, Default)]
pub struct TrustState {
    ignored: Mutex<BTreeSet<CertificateAnomaly>>,
    observed: Mutex<BTreeSet<CertificateAnomaly>>,
}

impl TrustState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Widen the ignore set with exactly the given anomaly classes.
    pub fn ignore(&self, anomalies: &BTreeSet<CertificateAnomaly>) {
        if let Ok(mut ignored) = self.ignored.lock() {
            ignored.extend(anomalies.iter().copied());
        }
    }

    /// Take the anomalies recorded by the last failed handshake, leaving the
    /// state empty for the next attempt.
    pub fn take_observed(&self) -> BTreeSet<CertificateAnomaly> {
        self.observed
            .lock()
            .map(|mut observed| std::mem::take(&mut *observed))
            .unwrap_or_default()
    }

    fn record(&self, anomalies: &BTreeSet<CertificateAnomaly>) {
        if let Ok(mut observed) = self.observed.lock() {
            observed.clone_from(anomalies);
        }
    }

    fn ignored(&self) -> BTreeSet<CertificateAnomaly> {
        self.ignored
            .lock()
            .map(|ignored| ignored.clone())
            .unwrap_or_default()
    }
}

/// Map a rustls certificate error to an anomaly class for chains that are
/// not structurally self-signed. Self-signed detection happens on the
/// presented chain itself, not here: depending on the leaf's basicConstraints
/// the path builder reports a self-signed chain as a signature or extension
/// error, never as a dedicated variant.
fn classify(error: &CertificateError) -> CertificateAnomaly {
    match error {
        CertificateError::NotValidForName => CertificateAnomaly::HostnameMismatch,
        CertificateError::Expired => CertificateAnomaly::Expired,
        CertificateError::NotValidYet => CertificateAnomaly::NotYetValid,
        CertificateError::Revoked => CertificateAnomaly::Revoked,
        CertificateError::UnknownIssuer
        | CertificateError::BadEncoding
        | CertificateError::BadSignature => CertificateAnomaly::UntrustedRoot,
        _ => CertificateAnomaly::Other,
    }
}

/// Structural self-signed check: a single-certificate chain whose issuer and
/// subject are the same DER-encoded name.
fn is_self_signed(end_entity: &CertificateDer<'_>, intermediates: &[CertificateDer<'_>]) -> bool {
    if !intermediates.is_empty() {
        return false;
    }
    match X509Certificate::from_der(end_entity.as_ref()) {
        Ok((_, cert)) => {
            cert.tbs_certificate.issuer.as_raw() == cert.tbs_certificate.subject.as_raw()
        }
        Err(_) => false,
    }
}

/// Validity-window check on the leaf itself. The chain is already untrusted
/// when this runs, so expiry has to be read off the certificate directly.
fn validity_anomaly(end_entity: &CertificateDer<'_>, now: UnixTime) -> Option<CertificateAnomaly> {
    let (_, cert) = X509Certificate::from_der(end_entity.as_ref()).ok()?;
    let now = now.as_secs() as i64;
    let validity = cert.validity();
    if now < validity.not_before.timestamp() {
        Some(CertificateAnomaly::NotYetValid)
    } else if now > validity.not_after.timestamp() {
        Some(CertificateAnomaly::Expired)
    } else {
        None
    }
}

fn representative_error(anomaly: CertificateAnomaly) -> CertificateError {
    match anomaly {
        CertificateAnomaly::SelfSigned => CertificateError::UnknownIssuer,
        CertificateAnomaly::HostnameMismatch => CertificateError::NotValidForName,
        CertificateAnomaly::Expired => CertificateError::Expired,
        CertificateAnomaly::NotYetValid => CertificateError::NotValidYet,
        CertificateAnomaly::Revoked => CertificateError::Revoked,
        CertificateAnomaly::UntrustedRoot => CertificateError::BadSignature,
        CertificateAnomaly::Other => CertificateError::ApplicationVerificationFailure,
    }
}

/// Server certificate verifier that classifies failures and honors the
/// session's ignore set.
#[derive(Debug)]
pub struct AnomalyVerifier {
    inner: Arc<WebPkiServerVerifier>,
    state: Arc<TrustState>,
}

impl AnomalyVerifier {
    pub fn new(state: Arc<TrustState>) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs()
            .map_err(|e| TlsError::General(format!("failed to load system roots: {e}")))?;
        for cert in native {
            // Skip platform certificates webpki cannot parse.
            let _ = roots.add(cert);
        }
        Self::with_roots(Arc::new(roots), state)
    }

    fn with_roots(roots: Arc<RootCertStore>, state: Arc<TrustState>) -> Result<Self, TlsError> {
        let inner = WebPkiServerVerifier::builder(roots)
            .build()
            .map_err(|e| TlsError::General(format!("failed to build verifier: {e}")))?;
        Ok(Self { inner, state })
    }

    /// Re-verify the presented chain with the end-entity certificate as its
    /// own trust anchor. Only meaningful after structural self-signed
    /// detection; surfaces hostname and revocation anomalies the broken chain
    /// would otherwise mask. Best effort: anchoring a leaf to itself can fail
    /// for reasons of its own, which carry no extra signal.
    fn self_anchored_anomaly(
        &self,
        end_entity: &CertificateDer<'_>,
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Option<CertificateAnomaly> {
        let mut roots = RootCertStore::empty();
        roots
            .add(CertificateDer::from(end_entity.as_ref().to_vec()))
            .ok()?;
        let verifier = WebPkiServerVerifier::builder(Arc::new(roots)).build().ok()?;

        match verifier.verify_server_cert(end_entity, &[], server_name, &[], now) {
            Err(TlsError::InvalidCertificate(err)) => match classify(&err) {
                anomaly @ (CertificateAnomaly::HostnameMismatch
                | CertificateAnomaly::Expired
                | CertificateAnomaly::NotYetValid
                | CertificateAnomaly::Revoked) => Some(anomaly),
                _ => None,
            },
            _ => None,
        }
    }
}

impl ServerCertVerifier for AnomalyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let mut observed = BTreeSet::new();

        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => return Ok(verified),
            Err(TlsError::InvalidCertificate(err)) => {
                if is_self_signed(end_entity, intermediates) {
                    observed.insert(CertificateAnomaly::SelfSigned);
                    observed.extend(validity_anomaly(end_entity, now));
                    observed.extend(self.self_anchored_anomaly(end_entity, server_name, now));
                } else {
                    observed.insert(classify(&err));
                }
            }
            Err(other) => return Err(other),
        }

        let ignored = self.state.ignored();
        let mut residual = observed.difference(&ignored).copied();
        match residual.next() {
            None => Ok(ServerCertVerified::assertion()),
            Some(anomaly) => {
                // Recorded only when the handshake is rejected; an accepted
                // override must leave nothing behind for the next poll error.
                self.state.record(&observed);
                Err(TlsError::InvalidCertificate(representative_error(anomaly)))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build a rustls client config that validates through the anomaly verifier.
pub fn client_config(state: Arc<TrustState>) -> Result<ClientConfig, TlsError> {
    let verifier = AnomalyVerifier::new(state)?;
    Ok(ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}
