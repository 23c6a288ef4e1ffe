//! Subscribe options: the user submits topic filters, not a packet id — the state machine
//! assigns one at encode time.

use mqtt_packet::{ProtocolVersion, Property, Subscribe, Subscription};

/// Configuration for a user-submitted Subscribe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOptions {
    subscriptions: Vec<Subscription>,
    subscription_id: Option<u32>,
    user_properties: Vec<(String, String)>,
}

impl SubscribeOptions {
    /// A Subscribe over the given subscriptions. Accepts anything `Subscription` already
    /// converts from (`&str`, `(&str, QoS)`, or a [`Subscription`] itself).
    #[must_use]
    pub fn new<I, T>(subscriptions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Subscription>,
    {
        SubscribeOptions {
            subscriptions: subscriptions.into_iter().map(Into::into).collect(),
            subscription_id: None,
            user_properties: Vec::new(),
        }
    }

    /// MQTT 5 Subscription Identifier applied to every publish matching this subscription.
    #[must_use]
    pub fn with_subscription_id(mut self, id: u32) -> Self {
        self.subscription_id = Some(id);
        self
    }

    /// Adds a user property to the Subscribe's MQTT 5 property block.
    #[must_use]
    pub fn with_user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((name.into(), value.into()));
        self
    }

    /// Builds the outbound Subscribe packet. `packet_id` must come from
    /// [`crate::flow_control::PacketIdAllocator`] at the moment the operation is actually
    /// encoded.
    #[must_use]
    pub fn build(&self, protocol_version: ProtocolVersion, packet_id: u16) -> Subscribe {
        let properties = if protocol_version >= ProtocolVersion::V5 {
            let mut props = Vec::new();
            if let Some(id) = self.subscription_id {
                props.push(Property::SubscriptionId(id));
            }
            for (name, value) in &self.user_properties {
                props.push(Property::UserProperty(name.clone(), value.clone()));
            }
            Some(props)
        } else {
            None
        };

        Subscribe {
            packet_id,
            properties,
            subscriptions: self.subscriptions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_packet::QoS;

    #[test]
    fn builds_with_assigned_packet_id() {
        let options = SubscribeOptions::new(vec![("a/b", QoS::AtLeastOnce)]);
        let packet = options.build(ProtocolVersion::V311, 7);
        assert_eq!(packet.packet_id, 7);
        assert_eq!(packet.subscriptions.len(), 1);
        assert!(packet.properties.is_none());
    }
}
