//! Connect options: configuration-time builders, not wire packets. `ProtocolState` turns a
//! `ConnectOptions` into a `mqtt_packet::Connect` at the moment it schedules the implicit
//! Connect, picking `cleanStart` from the configured `ResumeSessionPolicy` and protocol version
//! from the configured `ProtocolVersion` — both ordinary runtime values a client can choose when
//! it's built, not generic parameters baked in at compile time.

use core::time::Duration;

use bytes::Bytes;
use mqtt_packet::{Connect, Expiry, LastWill, PayloadFormat, ProtocolVersion, Property, QoS};

/// The Will message a broker publishes on the client's behalf if the connection is lost
/// ungracefully.
#[derive(Debug, Clone, PartialEq)]
pub struct WillOptions {
    topic_name: String,
    message: Bytes,
    qos: QoS,
    retain: bool,
    delay_interval: Option<Duration>,
    payload_format: Option<PayloadFormat>,
    message_expiry_interval: Option<Duration>,
    content_type: Option<String>,
    response_topic: Option<String>,
    correlation_data: Option<Bytes>,
    user_properties: Vec<(String, String)>,
}

impl WillOptions {
    /// A will publishing `message` to `topic_name` at the given QoS.
    #[must_use]
    pub fn new(topic_name: impl Into<String>, message: impl Into<Bytes>, qos: QoS) -> Self {
        WillOptions {
            topic_name: topic_name.into(),
            message: message.into(),
            qos,
            retain: false,
            delay_interval: None,
            payload_format: None,
            message_expiry_interval: None,
            content_type: None,
            response_topic: None,
            correlation_data: None,
            user_properties: Vec::new(),
        }
    }

    /// Marks the will message as retained.
    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// How long the broker should wait after the network connection is lost before publishing
    /// this will (MQTT 5 only; ignored under 3.1.1).
    #[must_use]
    pub fn with_delay_interval(mut self, interval: Duration) -> Self {
        self.delay_interval = Some(interval);
        self
    }

    /// Adds a user property to the will's MQTT 5 property block.
    #[must_use]
    pub fn with_user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((name.into(), value.into()));
        self
    }

    fn into_packet(self, protocol_version: ProtocolVersion) -> LastWill {
        let properties = if protocol_version >= ProtocolVersion::V5 {
            let mut props = Vec::new();
            if let Some(interval) = self.delay_interval {
                props.push(Property::WillDelayInterval(interval));
            }
            if let Some(format) = self.payload_format {
                props.push(Property::PayloadFormat(format));
            }
            if let Some(interval) = self.message_expiry_interval {
                props.push(Property::MessageExpiryInterval(interval));
            }
            if let Some(content_type) = self.content_type {
                props.push(Property::ContentType(content_type));
            }
            if let Some(topic) = self.response_topic {
                props.push(Property::ResponseTopic(topic));
            }
            if let Some(data) = self.correlation_data {
                props.push(Property::CorrelationData(data));
            }
            for (name, value) in self.user_properties {
                props.push(Property::UserProperty(name, value));
            }
            Some(props)
        } else {
            None
        };

        LastWill {
            qos: self.qos,
            retain: self.retain,
            topic_name: self.topic_name,
            message: self.message,
            properties,
        }
    }
}

/// Configuration for the Connect packet `ProtocolState` schedules on every connection attempt.
/// The protocol version is picked at configuration time, not compile time, so one binary can
/// speak either 3.1.1 or 5 depending on how this is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    client_id: String,
    keep_alive: Duration,
    username: Option<String>,
    password: Option<Bytes>,
    will: Option<WillOptions>,
    session_expiry_interval: Option<Expiry>,
    receive_maximum: Option<u16>,
    maximum_packet_size: Option<u32>,
    topic_alias_maximum: Option<u16>,
    request_response_information: Option<bool>,
    request_problem_information: Option<bool>,
    user_properties: Vec<(String, String)>,
}

impl ConnectOptions {
    /// A minimal Connect configuration: just a client id and keep-alive interval.
    #[must_use]
    pub fn new(client_id: impl Into<String>, keep_alive: Duration) -> Self {
        ConnectOptions {
            client_id: client_id.into(),
            keep_alive,
            username: None,
            password: None,
            will: None,
            session_expiry_interval: None,
            receive_maximum: None,
            maximum_packet_size: None,
            topic_alias_maximum: None,
            request_response_information: None,
            request_problem_information: None,
            user_properties: Vec::new(),
        }
    }

    /// Sets the username credential.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password credential.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<Bytes>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Attaches a Will.
    #[must_use]
    pub fn with_will(mut self, will: WillOptions) -> Self {
        self.will = Some(will);
        self
    }

    /// MQTT 5 Session Expiry Interval.
    #[must_use]
    pub fn with_session_expiry_interval(mut self, expiry: Expiry) -> Self {
        self.session_expiry_interval = Some(expiry);
        self
    }

    /// MQTT 5 Receive Maximum the *client* advertises to the server (distinct from the server's
    /// own advertised Receive Maximum, which governs our outbound flow control; see
    /// [`crate::flow_control`]).
    #[must_use]
    pub fn with_receive_maximum(mut self, value: u16) -> Self {
        self.receive_maximum = Some(value);
        self
    }

    /// MQTT 5 Maximum Packet Size we ask the server not to exceed.
    #[must_use]
    pub fn with_maximum_packet_size(mut self, size: u32) -> Self {
        self.maximum_packet_size = Some(size);
        self
    }

    /// MQTT 5 Topic Alias Maximum.
    #[must_use]
    pub fn with_topic_alias_maximum(mut self, value: u16) -> Self {
        self.topic_alias_maximum = Some(value);
        self
    }

    /// MQTT 5 Request Response Information.
    #[must_use]
    pub fn request_response_information(mut self, value: bool) -> Self {
        self.request_response_information = Some(value);
        self
    }

    /// MQTT 5 Request Problem Information.
    #[must_use]
    pub fn request_problem_information(mut self, value: bool) -> Self {
        self.request_problem_information = Some(value);
        self
    }

    /// Adds a user property to the Connect packet's MQTT 5 property block.
    #[must_use]
    pub fn with_user_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push((name.into(), value.into()));
        self
    }

    /// The configured client id, used as the `clientId` the offline-queue/ack logic logs
    /// against.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The configured keep-alive interval, used to derive [`crate::keepalive::KeepAlive`]'s
    /// millisecond cadence.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Builds the outbound Connect packet for `protocol_version` with the given `clean_start`
    /// flag (computed by `ProtocolState` from the configured `ResumeSessionPolicy`).
    #[must_use]
    pub fn build(&self, protocol_version: ProtocolVersion, clean_start: bool) -> Connect {
        let properties = if protocol_version >= ProtocolVersion::V5 {
            let mut props = Vec::new();
            if let Some(expiry) = self.session_expiry_interval {
                props.push(Property::SessionExpiryInterval(expiry));
            }
            if let Some(value) = self.receive_maximum {
                props.push(Property::ReceiveMaximum(value));
            }
            if let Some(size) = self.maximum_packet_size {
                props.push(Property::MaximumPacketSize(size));
            }
            if let Some(value) = self.topic_alias_maximum {
                props.push(Property::TopicAliasMaximum(value));
            }
            if let Some(value) = self.request_response_information {
                props.push(Property::RequestResponseInformation(value));
            }
            if let Some(value) = self.request_problem_information {
                props.push(Property::RequestProblemInformation(value));
            }
            for (name, value) in &self.user_properties {
                props.push(Property::UserProperty(name.clone(), value.clone()));
            }
            Some(props)
        } else {
            None
        };

        Connect {
            protocol_version,
            clean_start,
            keep_alive: self.keep_alive.as_secs() as u16,
            properties,
            client_id: self.client_id.clone(),
            last_will: self.will.clone().map(|will| will.into_packet(protocol_version)),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v311_build_omits_properties_and_will_properties() {
        let options = ConnectOptions::new("client-a", Duration::from_secs(30))
            .with_will(WillOptions::new("lwt", &b"bye"[..], QoS::AtLeastOnce));

        let connect = options.build(ProtocolVersion::V311, true);
        assert!(connect.properties.is_none());
        assert!(connect.last_will.unwrap().properties.is_none());
    }

    #[test]
    fn v5_build_carries_configured_properties() {
        let options = ConnectOptions::new("client-b", Duration::from_secs(30))
            .with_session_expiry_interval(Expiry::Never)
            .with_receive_maximum(10)
            .with_user_property("lang", "rust");

        let connect = options.build(ProtocolVersion::V5, false);
        let props = connect.properties.unwrap();
        assert!(props.contains(&Property::SessionExpiryInterval(Expiry::Never)));
        assert!(props.contains(&Property::ReceiveMaximum(10)));
        assert!(props.contains(&Property::UserProperty("lang".into(), "rust".into())));
        assert!(!connect.clean_start);
    }
}
