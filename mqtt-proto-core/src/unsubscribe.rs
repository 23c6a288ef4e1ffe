//! Unsubscribe options: the user submits topic filters, not a packet id — the state machine
//! assigns one at encode time.

use mqtt_packet::{ProtocolVersion, Property, Unsubscribe};

/// Configuration for a user-submitted Unsubscribe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnsubscribeOptions {
    topic_filters: Vec<String>,
    user_properties: Vec<(String, String)>,
}

impl UnsubscribeOptions {
    /// An Unsubscribe over the given topic filters.
    #[must_use]
    pub fn new<I, T>(topic_filters: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        UnsubscribeOptions {
            topic_filters: topic_filters.into_iter().map(Into::into).collect(),
            user_properties: Vec::new(),
        }
    }

    /// Adds a user property to the Unsubscribe's MQTT 5 property block.
    #[must_use]
    pub fn with_user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((name.into(), value.into()));
        self
    }

    /// Builds the outbound Unsubscribe packet. `packet_id` must come from
    /// [`crate::flow_control::PacketIdAllocator`] at the moment the operation is actually
    /// encoded.
    #[must_use]
    pub fn build(&self, protocol_version: ProtocolVersion, packet_id: u16) -> Unsubscribe {
        let properties = if protocol_version >= ProtocolVersion::V5 {
            let mut props = Vec::new();
            for (name, value) in &self.user_properties {
                props.push(Property::UserProperty(name.clone(), value.clone()));
            }
            Some(props)
        } else {
            None
        };

        Unsubscribe {
            packet_id,
            properties,
            topic_filters: self.topic_filters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_assigned_packet_id() {
        let options = UnsubscribeOptions::new(vec!["a/b"]);
        let packet = options.build(ProtocolVersion::V311, 3);
        assert_eq!(packet.packet_id, 3);
        assert_eq!(packet.topic_filters, vec!["a/b".to_string()]);
        assert!(packet.properties.is_none());
    }
}
