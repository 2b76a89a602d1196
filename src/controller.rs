//! Session controller: the decision logic of the client
//!
//! Owns the action plan and credentials, drives the session engine and
//! consumes its lifecycle events from a single channel. `run` returns a
//! terminal result; the decision to exit the process belongs to the caller.
//!
//! State machine: `Idle → Opening → Open`, closed by returning. Certificate
//! anomalies are decided before any transition; a rejected session outcome or
//! a transport error is terminal. Completing the action plan is not — the
//! session stays alive for acknowledgements and incoming messages.

use crate::endpoint::ConnectionTarget;
use crate::error::ClientError;
use crate::plan::ActionPlan;
use crate::session::{
    Credentials, SessionEngine, SessionEvent, SessionOutcome, SubscribeResult,
};
use crate::trust;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerState {
    Idle,
    Opening,
    Open,
}

/// Orchestrates one session: open, trust decisions, action dispatch,
/// terminal outcome.
pub struct SessionController<E: SessionEngine> {
    engine: E,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    plan: ActionPlan,
    credentials: Credentials,
    allow_self_signed: bool,
    state: ControllerState,
    // Subscribe acks arrive in dispatch order; pair them with their filters.
    pending_subscribes: VecDeque<String>,
}

impl<E: SessionEngine> SessionController<E> {
    pub fn new(
        engine: E,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        plan: ActionPlan,
        credentials: Credentials,
        allow_self_signed: bool,
    ) -> Self {
        Self {
            engine,
            events,
            plan,
            credentials,
            allow_self_signed,
            state: ControllerState::Idle,
            pending_subscribes: VecDeque::new(),
        }
    }

    /// Open a session against the target and react to its lifecycle events
    /// until a fatal condition terminates it or `shutdown` resolves. A
    /// healthy session only ends through shutdown, which closes it cleanly
    /// so the broker sees a DISCONNECT.
    pub async fn run<S>(mut self, target: &ConnectionTarget, shutdown: S) -> Result<(), ClientError>
    where
        S: Future<Output = ()> + Send,
    {
        self.engine
            .open(target, &self.credentials, true)
            .await
            .map_err(transport_failure)?;
        self.state = ControllerState::Opening;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    let _ = self.engine.close().await;
                    return Ok(());
                }
                event = self.events.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => {
                            let _ = self.engine.close().await;
                            return Err(ClientError::TransportFailure {
                                reason: "session engine event channel closed".to_string(),
                            });
                        }
                    };

                    if let Err(err) = self.on_event(event).await {
                        let _ = self.engine.close().await;
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn on_event(&mut self, event: SessionEvent) -> Result<(), ClientError> {
        match event {
            SessionEvent::Outcome(SessionOutcome::Accepted) => {
                if self.state != ControllerState::Opening {
                    warn!("ignoring session outcome in state {:?}", self.state);
                    return Ok(());
                }
                info!("Connected to server");
                self.state = ControllerState::Open;
                self.execute_plan().await?;
            }

            SessionEvent::Outcome(SessionOutcome::Rejected(reason)) => {
                return Err(ClientError::ConnectionRejected(reason));
            }

            SessionEvent::CertificateAnomalies(anomalies) => {
                if self.state != ControllerState::Opening {
                    warn!("ignoring certificate anomalies in state {:?}", self.state);
                    return Ok(());
                }
                let decision = trust::evaluate(&anomalies, self.allow_self_signed);
                if decision.accept {
                    info!("Accepting self signed certificate");
                    self.engine
                        .override_trust(&decision.ignored)
                        .await
                        .map_err(transport_failure)?;
                } else {
                    warn!(
                        "TLS errors for certificate: {:?}",
                        decision.residual
                    );
                    return Err(ClientError::SslTrustRejected {
                        residual: decision.residual,
                    });
                }
            }

            SessionEvent::Subscribed(result) => {
                let filter = self
                    .pending_subscribes
                    .pop_front()
                    .unwrap_or_else(|| "<unknown filter>".to_string());
                match result {
                    SubscribeResult::Granted(qos) => {
                        info!(
                            "Subscribed to topic filter {} with QoS {}",
                            filter,
                            qos.level()
                        );
                    }
                    SubscribeResult::Failure => {
                        warn!("Subscribing to topic {} failed", filter);
                    }
                }
            }

            SessionEvent::Published { packet_id } => {
                info!("Publish {} acknowledged", packet_id);
            }

            SessionEvent::MessageReceived {
                topic,
                payload,
                retained,
            } => {
                if self.state != ControllerState::Open {
                    warn!("ignoring message on {} before session is open", topic);
                    return Ok(());
                }
                // Received messages are the primary output of a subscription.
                let text = String::from_utf8_lossy(&payload);
                let suffix = if retained { " (retained message)" } else { "" };
                println!("{topic}: {text}{suffix}");
            }

            SessionEvent::TransportError(reason) => {
                return Err(ClientError::TransportFailure { reason });
            }
        }

        Ok(())
    }

    /// Dispatch the action plan: every subscription in list order, then every
    /// publish in list order. Fire-and-forget; acknowledgements are reported
    /// as their events arrive and never gate the next action.
    async fn execute_plan(&mut self) -> Result<(), ClientError> {
        for intent in self.plan.subscribes().to_vec() {
            debug!("Subscribing to {}", intent.topic_filter);
            self.engine
                .subscribe(&intent.topic_filter, intent.qos)
                .await
                .map_err(transport_failure)?;
            self.pending_subscribes.push_back(intent.topic_filter);
        }

        for intent in self.plan.publishes().to_vec() {
            debug!(
                "Publishing to {}{}",
                intent.topic,
                if intent.payload.is_empty() {
                    String::new()
                } else {
                    format!(": {}", String::from_utf8_lossy(&intent.payload))
                }
            );
            self.engine
                .publish(&intent.topic, intent.payload, intent.qos, intent.retain)
                .await
                .map_err(transport_failure)?;
        }

        Ok(())
    }
}

fn transport_failure<E: std::error::Error>(err: E) -> ClientError {
    ClientError::TransportFailure {
        reason: err.to_string(),
    }
}
