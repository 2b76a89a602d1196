//! Mock session engine for controller tests

use crate::endpoint::ConnectionTarget;
use crate::plan::Qos;
use crate::session::{Credentials, SessionEngine};
use crate::trust::CertificateAnomaly;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Every engine call the controller issued, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    Open {
        host: String,
        port: u16,
        clean_session: bool,
    },
    Subscribe {
        topic_filter: String,
        qos: Qos,
    },
    Publish {
        topic: String,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    },
    OverrideTrust(BTreeSet<CertificateAnomaly>),
    Close,
}

#[derive(Debug, Error)]
#[error("mock engine failure")]
pub struct MockEngineError;

/// Session engine that records calls instead of touching the network.
/// Lifecycle events are fed by the test through the controller's channel.
#[derive(Debug, Default)]
pub struct MockEngine {
    pub ops: Arc<Mutex<Vec<EngineOp>>>,
    pub fail_open: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_open() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    /// Handle onto the recorded ops, valid after the engine moved into the
    /// controller.
    pub fn ops_handle(&self) -> Arc<Mutex<Vec<EngineOp>>> {
        self.ops.clone()
    }

    async fn record(&self, op: EngineOp) {
        self.ops.lock().await.push(op);
    }
}

#[async_trait::async_trait]
impl SessionEngine for MockEngine {
    type Error = MockEngineError;

    async fn open(
        &mut self,
        target: &ConnectionTarget,
        _credentials: &Credentials,
        clean_session: bool,
    ) -> Result<(), Self::Error> {
        if self.fail_open {
            return Err(MockEngineError);
        }
        self.record(EngineOp::Open {
            host: target.host.clone(),
            port: target.port,
            clean_session,
        })
        .await;
        Ok(())
    }

    async fn subscribe(&mut self, topic_filter: &str, qos: Qos) -> Result<(), Self::Error> {
        self.record(EngineOp::Subscribe {
            topic_filter: topic_filter.to_string(),
            qos,
        })
        .await;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
    ) -> Result<(), Self::Error> {
        self.record(EngineOp::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        })
        .await;
        Ok(())
    }

    async fn override_trust(
        &mut self,
        ignore: &BTreeSet<CertificateAnomaly>,
    ) -> Result<(), Self::Error> {
        self.record(EngineOp::OverrideTrust(ignore.clone())).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.record(EngineOp::Close).await;
        Ok(())
    }
}
