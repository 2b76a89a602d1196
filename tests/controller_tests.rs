//! Integration tests for the session controller
//!
//! Drives the controller with a mock session engine and hand-fed lifecycle
//! events. Covers the state machine contract: action dispatch on acceptance,
//! rejection handling, trust decisions, and exit-status mapping.

use bytes::Bytes;
use mqttctl::testing::{EngineOp, MockEngine};
use mqttctl::{
    endpoint, ActionPlan, CertificateAnomaly, ClientError, ConnectionTarget, Credentials, Qos,
    RejectReason, SessionController, SessionEvent, SessionOutcome,
};
use std::collections::BTreeSet;
use std::future;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_test::assert_err;

fn target() -> ConnectionTarget {
    endpoint::resolve("192.168.0.1:1883", false).unwrap()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn plan_two_subs_one_pub() -> ActionPlan {
    ActionPlan::build(
        1,
        &strings(&["sensors/#", "home/+/light"]),
        &strings(&["status/mqttctl"]),
        &[Bytes::from_static(b"online")],
        false,
    )
    .unwrap()
}

fn anomalies(set: &[CertificateAnomaly]) -> BTreeSet<CertificateAnomaly> {
    set.iter().copied().collect()
}

struct Harness {
    controller: SessionController<MockEngine>,
    events: UnboundedSender<SessionEvent>,
    ops: std::sync::Arc<tokio::sync::Mutex<Vec<EngineOp>>>,
}

fn harness(plan: ActionPlan, allow_self_signed: bool) -> Harness {
    let engine = MockEngine::new();
    let ops = engine.ops_handle();
    let (events, rx) = mpsc::unbounded_channel();
    let controller =
        SessionController::new(engine, rx, plan, Credentials::default(), allow_self_signed);
    Harness {
        controller,
        events,
        ops,
    }
}

#[tokio::test]
async fn rejected_identifier_closes_without_any_actions() {
    let h = harness(plan_two_subs_one_pub(), false);
    h.events
        .send(SessionEvent::Outcome(SessionOutcome::Rejected(
            RejectReason::IdentifierRejected,
        )))
        .unwrap();

    let err = h.controller.run(&target(), future::pending::<()>()).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::ConnectionRejected(RejectReason::IdentifierRejected)
    ));
    assert_eq!(err.exit_code(), 10);

    let ops = h.ops.lock().await;
    assert!(
        !ops.iter()
            .any(|op| matches!(op, EngineOp::Subscribe { .. } | EngineOp::Publish { .. })),
        "a rejected session must issue zero subscribe/publish calls"
    );
    assert!(matches!(ops.last(), Some(EngineOp::Close)));
}

#[tokio::test]
async fn every_rejection_reason_maps_to_its_error() {
    for reason in [
        RejectReason::IdentifierRejected,
        RejectReason::UnsupportedProtocolVersion,
        RejectReason::BadCredentials,
        RejectReason::NotAuthorized,
        RejectReason::ServerUnavailable,
    ] {
        let h = harness(ActionPlan::default(), false);
        h.events
            .send(SessionEvent::Outcome(SessionOutcome::Rejected(reason)))
            .unwrap();

        let err = h.controller.run(&target(), future::pending::<()>()).await.unwrap_err();
        match err {
            ClientError::ConnectionRejected(got) => assert_eq!(got, reason),
            other => panic!("expected ConnectionRejected, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn accepted_session_dispatches_plan_in_order() {
    let h = harness(plan_two_subs_one_pub(), false);
    h.events
        .send(SessionEvent::Outcome(SessionOutcome::Accepted))
        .unwrap();
    // A message queued behind the outcome must not interleave with dispatch.
    h.events
        .send(SessionEvent::MessageReceived {
            topic: "sensors/temp".to_string(),
            payload: Bytes::from_static(b"21.5"),
            retained: false,
        })
        .unwrap();
    h.events
        .send(SessionEvent::TransportError("connection reset".to_string()))
        .unwrap();

    let err = h.controller.run(&target(), future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, ClientError::TransportFailure { .. }));

    let ops = h.ops.lock().await;
    assert_eq!(
        *ops,
        vec![
            EngineOp::Open {
                host: "192.168.0.1".to_string(),
                port: 1883,
                clean_session: true,
            },
            EngineOp::Subscribe {
                topic_filter: "sensors/#".to_string(),
                qos: Qos::AtLeastOnce,
            },
            EngineOp::Subscribe {
                topic_filter: "home/+/light".to_string(),
                qos: Qos::AtLeastOnce,
            },
            EngineOp::Publish {
                topic: "status/mqttctl".to_string(),
                payload: Bytes::from_static(b"online"),
                qos: Qos::AtLeastOnce,
                retain: false,
            },
            EngineOp::Close,
        ]
    );
}

#[tokio::test]
async fn accepted_self_signed_certificate_overrides_exactly_the_filtered_classes() {
    let h = harness(ActionPlan::default(), true);
    h.events
        .send(SessionEvent::CertificateAnomalies(anomalies(&[
            CertificateAnomaly::SelfSigned,
        ])))
        .unwrap();
    h.events
        .send(SessionEvent::TransportError("gone".to_string()))
        .unwrap();

    let _ = h.controller.run(&target(), future::pending::<()>()).await;

    let ops = h.ops.lock().await;
    assert_eq!(
        ops[1],
        EngineOp::OverrideTrust(anomalies(&[CertificateAnomaly::SelfSigned])),
        "override must follow open and name only the filtered anomalies"
    );
}

#[tokio::test]
async fn expired_certificate_rejects_despite_self_signed_flag() {
    let h = harness(ActionPlan::default(), true);
    h.events
        .send(SessionEvent::CertificateAnomalies(anomalies(&[
            CertificateAnomaly::SelfSigned,
            CertificateAnomaly::Expired,
        ])))
        .unwrap();

    let err = h.controller.run(&target(), future::pending::<()>()).await.unwrap_err();

    match &err {
        ClientError::SslTrustRejected { residual } => {
            assert_eq!(*residual, anomalies(&[CertificateAnomaly::Expired]));
        }
        other => panic!("expected SslTrustRejected, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 4);

    let ops = h.ops.lock().await;
    assert!(
        !ops.iter().any(|op| matches!(op, EngineOp::OverrideTrust(_))),
        "a rejected trust decision must not override anything"
    );
}

#[tokio::test]
async fn certificate_anomalies_reject_when_flag_unset() {
    let h = harness(ActionPlan::default(), false);
    h.events
        .send(SessionEvent::CertificateAnomalies(anomalies(&[
            CertificateAnomaly::SelfSigned,
        ])))
        .unwrap();

    let err = h.controller.run(&target(), future::pending::<()>()).await.unwrap_err();
    match err {
        ClientError::SslTrustRejected { residual } => {
            assert_eq!(residual, anomalies(&[CertificateAnomaly::SelfSigned]));
        }
        other => panic!("expected SslTrustRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_identical_messages_do_not_change_behavior() {
    let h = harness(plan_two_subs_one_pub(), false);
    h.events
        .send(SessionEvent::Outcome(SessionOutcome::Accepted))
        .unwrap();
    for _ in 0..3 {
        h.events
            .send(SessionEvent::MessageReceived {
                topic: "sensors/temp".to_string(),
                payload: Bytes::from_static(b"21.5"),
                retained: true,
            })
            .unwrap();
    }
    h.events
        .send(SessionEvent::TransportError("drop".to_string()))
        .unwrap();

    let err = h.controller.run(&target(), future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, ClientError::TransportFailure { .. }));

    // Messages are reported only; the engine saw nothing beyond the plan.
    let ops = h.ops.lock().await;
    let engine_calls = ops
        .iter()
        .filter(|op| matches!(op, EngineOp::Subscribe { .. } | EngineOp::Publish { .. }))
        .count();
    assert_eq!(engine_calls, 3);
}

#[tokio::test]
async fn messages_before_session_open_are_dropped() {
    let h = harness(plan_two_subs_one_pub(), false);
    h.events
        .send(SessionEvent::MessageReceived {
            topic: "early/topic".to_string(),
            payload: Bytes::new(),
            retained: false,
        })
        .unwrap();
    h.events
        .send(SessionEvent::Outcome(SessionOutcome::Rejected(
            RejectReason::NotAuthorized,
        )))
        .unwrap();

    let err = h.controller.run(&target(), future::pending::<()>()).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectionRejected(RejectReason::NotAuthorized)
    ));

    let ops = h.ops.lock().await;
    assert!(!ops
        .iter()
        .any(|op| matches!(op, EngineOp::Subscribe { .. } | EngineOp::Publish { .. })));
}

#[tokio::test]
async fn shutdown_closes_the_session_cleanly() {
    let h = harness(ActionPlan::default(), false);

    let result = h.controller.run(&target(), future::ready(())).await;

    assert!(result.is_ok(), "shutdown is not an error condition");
    let ops = h.ops.lock().await;
    assert_eq!(
        *ops,
        vec![
            EngineOp::Open {
                host: "192.168.0.1".to_string(),
                port: 1883,
                clean_session: true,
            },
            EngineOp::Close,
        ],
        "shutdown must disconnect the session before returning"
    );
}

#[tokio::test]
async fn closed_event_channel_is_a_transport_failure() {
    let h = harness(ActionPlan::default(), false);
    drop(h.events);

    let err = assert_err!(h.controller.run(&target(), future::pending::<()>()).await);
    assert!(matches!(err, ClientError::TransportFailure { .. }));

    let ops = h.ops.lock().await;
    assert!(matches!(ops.last(), Some(EngineOp::Close)));
}

#[tokio::test]
async fn failing_open_surfaces_as_transport_failure() {
    let engine = MockEngine::with_failing_open();
    let ops = engine.ops_handle();
    let (_events, rx) = mpsc::unbounded_channel();
    let controller =
        SessionController::new(engine, rx, ActionPlan::default(), Credentials::default(), false);

    let err = controller.run(&target(), future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, ClientError::TransportFailure { .. }));
    assert_eq!(err.exit_code(), 20);
    assert!(ops.lock().await.is_empty());
}
