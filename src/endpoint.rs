//! Endpoint resolution: raw server strings to typed connection targets
//!
//! Accepts the bare `host:port` form as well as explicit `mqtt://`, `ws://`
//! and `wss://` URLs and produces the host, port and transport settings the
//! session engine connects with.

use crate::error::ClientError;
use url::Url;

/// Standard MQTT port, used when a raw-socket address carries no port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

const RAW_SOCKET_SCHEME: &str = "mqtt";

/// How the transport connection is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP socket, optionally wrapped in TLS.
    RawSocket,
    /// WebSocket connection; TLS is decided by the URL scheme.
    WebSocket,
}

/// A fully resolved connection target. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub transport_kind: TransportKind,
    pub use_tls: bool,
    /// The parsed URL, kept verbatim for WebSocket connects (path included).
    pub raw_url: Url,
}

/// Resolve a user-supplied server address into a [`ConnectionTarget`].
///
/// Addresses without a scheme get `mqtt://` prepended. `ssl_requested`
/// upgrades a raw-socket target to TLS; WebSocket targets take TLS from the
/// scheme alone (`wss` forces it on, `ws` leaves it off).
pub fn resolve(raw: &str, ssl_requested: bool) -> Result<ConnectionTarget, ClientError> {
    let invalid = || ClientError::InvalidEndpoint {
        input: raw.to_string(),
    };

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{RAW_SOCKET_SCHEME}://{raw}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;

    let (transport_kind, use_tls) = match url.scheme() {
        RAW_SOCKET_SCHEME => (TransportKind::RawSocket, ssl_requested),
        "ws" => (TransportKind::WebSocket, false),
        "wss" => (TransportKind::WebSocket, true),
        _ => return Err(invalid()),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(invalid)?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(DEFAULT_MQTT_PORT);

    Ok(ConnectionTarget {
        host,
        port,
        transport_kind,
        use_tls,
        raw_url: url,
    })
}
