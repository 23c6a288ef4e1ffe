//! The two-tier error taxonomy: failures that only doom the submitting operation, and failures
//! that doom the whole connection.

use thiserror::Error;

use crate::operation::OperationId;

/// A failure scoped to a single [`crate::operation::ClientOperation`]. Delivered to the
/// caller's `onFailure` handler; the machine itself keeps running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Rejected by [`crate::policy::OfflineQueuePolicy`] at submission or reconnect time.
    #[error("did not pass offline queue policy")]
    OfflineQueuePolicyRejection,
    /// The outbound packet was rejected before any bytes were produced (oversized, or otherwise
    /// invalid for the negotiated protocol version).
    #[error("outbound packet validation failed: {0}")]
    OutboundValidationFailure(String),
    /// `operationTimeouts` fired before an ack arrived.
    #[error("operation timed out")]
    OperationTimeout,
    /// The connection closed with the operation still unacknowledged and the offline policy does
    /// not preserve it.
    #[error("connection closed before ack")]
    ConnectionClosedBeforeAck,
    /// Reconnected without session resumption and the offline policy does not allow resubmission
    /// across a clean session.
    #[error("failed OfflineQueuePolicy check on reconnect")]
    ReconnectWithoutSessionAndNoResumption,
    /// The machine halted with a fatal error before this operation could complete.
    #[error("{0}")]
    MachineHalted(String),
}

/// A failure that halts the whole [`crate::state::ProtocolState`]. Once raised, `haltErr` is
/// set, every outstanding operation is failed, and the machine refuses all further events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolFatalError {
    /// An event arrived that is not legal in the machine's current state (e.g. `ConnectionOpened`
    /// while already connected, or `WriteCompletion` with no write pending).
    #[error("illegal state transition: {0}")]
    IllegalStateTransition(String),
    /// The decoder rejected the inbound byte stream (malformed framing, unknown property,
    /// invalid packet id 0, a length mismatch, ...).
    #[error("decoder failure: {0}")]
    DecoderFailure(String),
    /// A packet type arrived that is never legal for the current state (e.g. inbound Connect,
    /// or inbound Disconnect under MQTT 3.1.1).
    #[error("packet type not valid for current state: {0:?}")]
    ForbiddenPacketForState(mqtt_packet::Type),
    /// No Connack arrived before `establishmentTimeoutAt`.
    #[error("Connack timeout")]
    ConnackTimeout,
    /// The broker rejected the connection (non-Success reason code in the Connack).
    #[error("connection rejected: {0:?}")]
    ConnackRejection(mqtt_packet::ReasonCode),
    /// No Pingresp arrived before `pendingPingrespTimeoutAt`.
    #[error("Pingresp timeout")]
    PingrespTimeout,
}

impl ProtocolFatalError {
    /// A stable message every outstanding operation is failed with when the machine halts.
    #[must_use]
    pub fn operation_message(&self) -> String {
        format!("halted: {}", self)
    }
}

/// Either an operation-scoped failure (with the id of the operation it applies to) or a
/// machine-wide halt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// `operation` failed without halting the machine.
    Operation {
        /// The operation the failure applies to.
        operation: OperationId,
        /// Why it failed.
        error: OperationError,
    },
    /// The machine halted; every outstanding operation was failed with the same message.
    Fatal(ProtocolFatalError),
}
