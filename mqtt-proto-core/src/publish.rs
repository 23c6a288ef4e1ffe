//! Publish options: the user submits a topic/payload/QoS; the state machine assigns a packet id
//! at encode time for QoS ≥ 1 and stamps `dup` on resubmission.

use core::time::Duration;

use bytes::Bytes;
use mqtt_packet::{PayloadFormat, ProtocolVersion, Property, Publish, QoS};

/// Configuration for a user-submitted Publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOptions {
    topic_name: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    payload_format: Option<PayloadFormat>,
    message_expiry_interval: Option<Duration>,
    topic_alias: Option<u16>,
    response_topic: Option<String>,
    correlation_data: Option<Bytes>,
    subscription_id: Option<u32>,
    content_type: Option<String>,
    user_properties: Vec<(String, String)>,
}

impl PublishOptions {
    /// A QoS 0, non-retained Publish of `payload` to `topic_name`.
    #[must_use]
    pub fn new(topic_name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        PublishOptions {
            topic_name: topic_name.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload_format: None,
            message_expiry_interval: None,
            topic_alias: None,
            response_topic: None,
            correlation_data: None,
            subscription_id: None,
            content_type: None,
            user_properties: Vec::new(),
        }
    }

    /// Sets the QoS. Only `AtMostOnce`/`AtLeastOnce` are accepted as an outbound origination;
    /// `ExactlyOnce` is rejected at submission time (`OutboundValidationFailure`) — the codec
    /// still decodes QoS 2 traffic reflected back from the broker, this builder just never
    /// originates it.
    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Marks the publish as retained.
    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Adds a user property to the Publish's MQTT 5 property block.
    #[must_use]
    pub fn with_user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((name.into(), value.into()));
        self
    }

    /// MQTT 5 Message Expiry Interval.
    #[must_use]
    pub fn with_message_expiry_interval(mut self, interval: Duration) -> Self {
        self.message_expiry_interval = Some(interval);
        self
    }

    /// MQTT 5 Content Type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The configured QoS, checked by `ProtocolState` before an id is allocated.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Builds the outbound Publish packet. `packet_id` is `None` for QoS 0, `Some` otherwise;
    /// the caller (`ProtocolState`) is responsible for only supplying a id for QoS ≥ 1.
    #[must_use]
    pub fn build(&self, protocol_version: ProtocolVersion, packet_id: Option<u16>) -> Publish {
        let properties = if protocol_version >= ProtocolVersion::V5 {
            let mut props = Vec::new();
            if let Some(format) = self.payload_format {
                props.push(Property::PayloadFormat(format));
            }
            if let Some(interval) = self.message_expiry_interval {
                props.push(Property::MessageExpiryInterval(interval));
            }
            if let Some(alias) = self.topic_alias {
                props.push(Property::TopicAlias(alias));
            }
            if let Some(ref topic) = self.response_topic {
                props.push(Property::ResponseTopic(topic.clone()));
            }
            if let Some(ref data) = self.correlation_data {
                props.push(Property::CorrelationData(data.clone()));
            }
            if let Some(id) = self.subscription_id {
                props.push(Property::SubscriptionId(id));
            }
            if let Some(ref content_type) = self.content_type {
                props.push(Property::ContentType(content_type.clone()));
            }
            for (name, value) in &self.user_properties {
                props.push(Property::UserProperty(name.clone(), value.clone()));
            }
            Some(props)
        } else {
            None
        };

        Publish {
            dup: false,
            qos: self.qos,
            retain: self.retain,
            topic_name: self.topic_name.clone(),
            packet_id,
            properties,
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos0_build_carries_no_packet_id() {
        let options = PublishOptions::new("a/b", &b"hi"[..]);
        let packet = options.build(ProtocolVersion::V311, None);
        assert_eq!(packet.packet_id, None);
        assert_eq!(packet.qos, QoS::AtMostOnce);
    }

    #[test]
    fn v5_build_carries_configured_properties() {
        let options = PublishOptions::new("a/b", &b"hi"[..])
            .with_qos(QoS::AtLeastOnce)
            .with_content_type("text/plain");
        let packet = options.build(ProtocolVersion::V5, Some(5));
        assert_eq!(packet.packet_id, Some(5));
        assert!(packet
            .properties
            .unwrap()
            .contains(&Property::ContentType("text/plain".into())));
    }
}
