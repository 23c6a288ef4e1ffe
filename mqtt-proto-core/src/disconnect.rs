//! Disconnect options: the packet a user-requested graceful shutdown sends before the transport
//! closes.

use mqtt_packet::{Disconnect, ProtocolVersion, Property, ReasonCode};

/// Configuration for a user-requested Disconnect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisconnectOptions {
    reason_code: Option<ReasonCode>,
    user_properties: Vec<(String, String)>,
}

impl DisconnectOptions {
    /// A plain Disconnect with the default (Normal) reason.
    #[must_use]
    pub fn new() -> Self {
        DisconnectOptions::default()
    }

    /// Sets an explicit reason code (MQTT 5 only).
    #[must_use]
    pub fn with_reason_code(mut self, reason_code: ReasonCode) -> Self {
        self.reason_code = Some(reason_code);
        self
    }

    /// Adds a user property to the Disconnect's MQTT 5 property block.
    #[must_use]
    pub fn with_user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((name.into(), value.into()));
        self
    }

    /// Builds the outbound Disconnect packet for `protocol_version`. MQTT 3.1.1 carries neither a
    /// reason code nor properties.
    #[must_use]
    pub fn build(&self, protocol_version: ProtocolVersion) -> Disconnect {
        if protocol_version >= ProtocolVersion::V5 {
            let mut properties = Vec::new();
            for (name, value) in &self.user_properties {
                properties.push(Property::UserProperty(name.clone(), value.clone()));
            }
            Disconnect {
                reason_code: self.reason_code,
                properties: Some(properties),
            }
        } else {
            Disconnect {
                reason_code: None,
                properties: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v311_omits_reason_and_properties() {
        let disconnect = DisconnectOptions::new()
            .with_reason_code(ReasonCode::NormalDisconnection)
            .build(ProtocolVersion::V311);
        assert_eq!(disconnect.reason_code, None);
        assert!(disconnect.properties.is_none());
    }

    #[test]
    fn v5_carries_reason_code() {
        let disconnect = DisconnectOptions::new()
            .with_reason_code(ReasonCode::NormalDisconnection)
            .build(ProtocolVersion::V5);
        assert_eq!(disconnect.reason_code, Some(ReasonCode::NormalDisconnection));
    }
}
