//! rumqttc-backed session engine
//!
//! Adapts the rumqttc AsyncClient/EventLoop pair to the [`SessionEngine`]
//! seam: requests go out through the client handle, lifecycle events come
//! back translated onto the controller's mpsc channel. The event-loop task
//! parks after a failed handshake with recorded certificate anomalies; a
//! trust override widens the ignore set and reopens the connection.

use super::tls::{self, TrustState};
use super::{Credentials, RejectReason, SessionEngine, SessionEvent, SessionOutcome, SubscribeResult};
use crate::endpoint::{ConnectionTarget, TransportKind};
use crate::plan::Qos;
use crate::trust::CertificateAnomaly;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 100;
const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Errors issuing requests to the engine. Asynchronous failures arrive as
/// [`SessionEvent::TransportError`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session not open")]
    NotOpen,

    #[error("TLS setup failed: {0}")]
    TlsSetup(String),

    #[error("request failed: {0}")]
    Request(#[from] rumqttc::ClientError),
}

/// MQTT 3.1.1 session engine over rumqttc.
pub struct RumqttcEngine {
    client_id: String,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    trust: Arc<TrustState>,
    client: Option<AsyncClient>,
    loop_handle: Option<JoinHandle<()>>,
    // Kept so a trust override can reopen the same session.
    target: Option<ConnectionTarget>,
    credentials: Credentials,
    clean_session: bool,
}

impl RumqttcEngine {
    pub fn new(client_id: impl Into<String>, events_tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            client_id: client_id.into(),
            events_tx,
            trust: Arc::new(TrustState::new()),
            client: None,
            loop_handle: None,
            target: None,
            credentials: Credentials::default(),
            clean_session: true,
        }
    }

    fn mqtt_options(&self, target: &ConnectionTarget) -> Result<MqttOptions, EngineError> {
        let tls_config = || -> Result<TlsConfiguration, EngineError> {
            let config = tls::client_config(self.trust.clone())
                .map_err(|e| EngineError::TlsSetup(e.to_string()))?;
            Ok(TlsConfiguration::Rustls(Arc::new(config)))
        };

        let mut options = match target.transport_kind {
            TransportKind::RawSocket => {
                let mut options = MqttOptions::new(&self.client_id, &target.host, target.port);
                if target.use_tls {
                    options.set_transport(Transport::Tls(tls_config()?));
                }
                options
            }
            TransportKind::WebSocket => {
                // rumqttc takes the full URL (path included) as the broker
                // address for websocket transports; the port is carried in
                // the URL.
                let mut options =
                    MqttOptions::new(&self.client_id, target.raw_url.as_str(), target.port);
                if target.use_tls {
                    options.set_transport(Transport::Wss(tls_config()?));
                } else {
                    options.set_transport(Transport::Ws);
                }
                options
            }
        };

        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(self.clean_session);
        if let Some(username) = &self.credentials.username {
            options.set_credentials(username, self.credentials.password.clone().unwrap_or_default());
        }

        Ok(options)
    }

    /// (Re)start the connection: build a fresh client/event-loop pair and
    /// spawn the translation task.
    async fn start(&mut self) -> Result<(), EngineError> {
        let target = self.target.clone().ok_or(EngineError::NotOpen)?;

        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }

        let options = self.mqtt_options(&target)?;
        let (client, event_loop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        self.spawn_event_loop(event_loop);
        self.client = Some(client);
        Ok(())
    }

    fn spawn_event_loop(&mut self, mut event_loop: EventLoop) {
        let events_tx = self.events_tx.clone();
        let trust = self.trust.clone();

        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => {
                        if let Some(out) = translate_event(&event) {
                            if events_tx.send(out).is_err() {
                                // Controller gone; nothing left to report to.
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let observed = trust.take_observed();
                        let out = if observed.is_empty() {
                            SessionEvent::TransportError(err.to_string())
                        } else {
                            debug!("TLS validation reported anomalies: {:?}", observed);
                            SessionEvent::CertificateAnomalies(observed)
                        };
                        let _ = events_tx.send(out);
                        // Park; the controller either overrides trust (which
                        // reopens the connection) or terminates the session.
                        return;
                    }
                }
            }
        });
        self.loop_handle = Some(handle);
    }
}

#[async_trait::async_trait]
impl SessionEngine for RumqttcEngine {
    type Error = EngineError;

    async fn open(
        &mut self,
        target: &ConnectionTarget,
        credentials: &Credentials,
        clean_session: bool,
    ) -> Result<(), Self::Error> {
        self.target = Some(target.clone());
        self.credentials = credentials.clone();
        self.clean_session = clean_session;
        self.start().await
    }

    async fn subscribe(&mut self, topic_filter: &str, qos: Qos) -> Result<(), Self::Error> {
        let client = self.client.as_ref().ok_or(EngineError::NotOpen)?;
        client.subscribe(topic_filter, to_rumqttc_qos(qos)).await?;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<(), Self::Error> {
        let client = self.client.as_ref().ok_or(EngineError::NotOpen)?;
        client
            .publish(topic, to_rumqttc_qos(qos), retain, payload)
            .await?;
        Ok(())
    }

    async fn override_trust(
        &mut self,
        ignore: &BTreeSet<CertificateAnomaly>,
    ) -> Result<(), Self::Error> {
        self.trust.ignore(ignore);
        self.start().await
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!("disconnect on close failed: {}", e);
            }
        }
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

fn to_rumqttc_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_rumqttc_qos(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

fn outcome_from_code(code: ConnectReturnCode) -> SessionOutcome {
    match code {
        ConnectReturnCode::Success => SessionOutcome::Accepted,
        ConnectReturnCode::BadClientId => {
            SessionOutcome::Rejected(RejectReason::IdentifierRejected)
        }
        ConnectReturnCode::RefusedProtocolVersion => {
            SessionOutcome::Rejected(RejectReason::UnsupportedProtocolVersion)
        }
        ConnectReturnCode::BadUserNamePassword => {
            SessionOutcome::Rejected(RejectReason::BadCredentials)
        }
        ConnectReturnCode::NotAuthorized => SessionOutcome::Rejected(RejectReason::NotAuthorized),
        ConnectReturnCode::ServiceUnavailable => {
            SessionOutcome::Rejected(RejectReason::ServerUnavailable)
        }
    }
}

/// Translate one rumqttc event into a session lifecycle event. Protocol
/// housekeeping packets (pings, outgoing echoes, QoS 2 intermediates) carry
/// no session-level meaning and map to `None`.
fn translate_event(event: &Event) -> Option<SessionEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            Some(SessionEvent::Outcome(outcome_from_code(ack.code)))
        }
        Event::Incoming(Packet::SubAck(ack)) => {
            // One SUBSCRIBE per filter, so each ack carries one return code.
            let result = match ack.return_codes.first() {
                Some(SubscribeReasonCode::Success(qos)) => {
                    SubscribeResult::Granted(from_rumqttc_qos(*qos))
                }
                Some(SubscribeReasonCode::Failure) | None => SubscribeResult::Failure,
            };
            Some(SessionEvent::Subscribed(result))
        }
        Event::Incoming(Packet::PubAck(ack)) => Some(SessionEvent::Published {
            packet_id: ack.pkid,
        }),
        Event::Incoming(Packet::PubComp(comp)) => Some(SessionEvent::Published {
            packet_id: comp.pkid,
        }),
        Event::Incoming(Packet::Publish(publish)) => Some(SessionEvent::MessageReceived {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
            retained: publish.retain,
        }),
        Event::Incoming(Packet::Disconnect) => {
            warn!("broker sent DISCONNECT");
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish, SubAck};

    #[test]
    fn connack_codes_map_to_outcomes() {
        let cases = [
            (ConnectReturnCode::Success, SessionOutcome::Accepted),
            (
                ConnectReturnCode::BadClientId,
                SessionOutcome::Rejected(RejectReason::IdentifierRejected),
            ),
            (
                ConnectReturnCode::RefusedProtocolVersion,
                SessionOutcome::Rejected(RejectReason::UnsupportedProtocolVersion),
            ),
            (
                ConnectReturnCode::BadUserNamePassword,
                SessionOutcome::Rejected(RejectReason::BadCredentials),
            ),
            (
                ConnectReturnCode::NotAuthorized,
                SessionOutcome::Rejected(RejectReason::NotAuthorized),
            ),
            (
                ConnectReturnCode::ServiceUnavailable,
                SessionOutcome::Rejected(RejectReason::ServerUnavailable),
            ),
        ];

        for (code, expected) in cases {
            let event = Event::Incoming(Packet::ConnAck(ConnAck {
                session_present: false,
                code,
            }));
            assert_eq!(
                translate_event(&event),
                Some(SessionEvent::Outcome(expected))
            );
        }
    }

    #[test]
    fn suback_translates_grant_and_failure() {
        let granted = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        }));
        assert_eq!(
            translate_event(&granted),
            Some(SessionEvent::Subscribed(SubscribeResult::Granted(
                Qos::AtLeastOnce
            )))
        );

        let failed = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 2,
            return_codes: vec![SubscribeReasonCode::Failure],
        }));
        assert_eq!(
            translate_event(&failed),
            Some(SessionEvent::Subscribed(SubscribeResult::Failure))
        );
    }

    #[test]
    fn incoming_publish_becomes_message_received() {
        let mut publish = Publish::new("sensors/temp", QoS::AtMostOnce, &b"21.5"[..]);
        publish.retain = true;

        let event = Event::Incoming(Packet::Publish(publish));
        assert_eq!(
            translate_event(&event),
            Some(SessionEvent::MessageReceived {
                topic: "sensors/temp".to_string(),
                payload: Bytes::from_static(b"21.5"),
                retained: true,
            })
        );
    }

    #[test]
    fn housekeeping_packets_are_silent() {
        assert_eq!(translate_event(&Event::Incoming(Packet::PingResp)), None);
        assert_eq!(
            translate_event(&Event::Outgoing(rumqttc::Outgoing::PingReq)),
            None
        );
    }

    #[test]
    fn qos_mapping_round_trips() {
        for qos in [Qos::AtMostOnce, Qos::AtLeastOnce, Qos::ExactlyOnce] {
            assert_eq!(from_rumqttc_qos(to_rumqttc_qos(qos)), qos);
        }
    }
}
