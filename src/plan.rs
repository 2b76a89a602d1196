//! Action plan: the validated subscribe/publish intents for one session
//!
//! Built once from the command line before any network activity and consumed
//! in order after session establishment: all subscriptions first, then all
//! publishes.

use crate::error::ClientError;
use bytes::Bytes;

/// Delivery-assurance level for subscriptions and publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    /// Parse a numeric QoS level. Anything outside 0..=2 is invalid.
    pub fn from_level(level: u8) -> Result<Self, ClientError> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            value => Err(ClientError::InvalidQos { value }),
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// One subscription to issue once the session is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeIntent {
    pub topic_filter: String,
    pub qos: Qos,
}

/// One publish to issue once the session is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIntent {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

/// The ordered set of actions for one session. Immutable after `build`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionPlan {
    subscribes: Vec<SubscribeIntent>,
    publishes: Vec<PublishIntent>,
}

impl ActionPlan {
    /// Build a plan from the raw command-line inputs.
    ///
    /// Payloads pair with publish topics by position; a topic without a
    /// corresponding payload publishes empty bytes. The retain flag applies
    /// uniformly to every publish. Fails with `InvalidQos` before any
    /// connection attempt when the QoS level is out of range.
    pub fn build(
        qos_level: u8,
        subscribe_filters: &[String],
        publish_topics: &[String],
        publish_payloads: &[Bytes],
        retain: bool,
    ) -> Result<Self, ClientError> {
        let qos = Qos::from_level(qos_level)?;

        let subscribes = subscribe_filters
            .iter()
            .map(|filter| SubscribeIntent {
                topic_filter: filter.clone(),
                qos,
            })
            .collect();

        let publishes = publish_topics
            .iter()
            .enumerate()
            .map(|(i, topic)| PublishIntent {
                topic: topic.clone(),
                payload: publish_payloads.get(i).cloned().unwrap_or_default(),
                qos,
                retain,
            })
            .collect();

        Ok(Self {
            subscribes,
            publishes,
        })
    }

    pub fn subscribes(&self) -> &[SubscribeIntent] {
        &self.subscribes
    }

    pub fn publishes(&self) -> &[PublishIntent] {
        &self.publishes
    }

    pub fn is_empty(&self) -> bool {
        self.subscribes.is_empty() && self.publishes.is_empty()
    }
}
