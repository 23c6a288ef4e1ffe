//! Which operations survive a disconnect, and how a reconnect picks `cleanStart`.

use mqtt_packet::QoS;

use crate::operation::OperationKind;

/// Which operation kinds are retained vs. failed while the transport is disconnected, or at
/// reconnect time when the broker reports no resumed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineQueuePolicy {
    /// Accept any operation kind.
    PreserveAll,
    /// Accept Subscribe/Unsubscribe and QoS ≥ 1 Publish; reject QoS 0 Publish.
    PreserveAcknowledged,
    /// Accept only QoS ≥ 1 Publish.
    PreserveQos1PlusPublishes,
    /// Reject every non-Connect/Disconnect operation.
    PreserveNothing,
}

impl Default for OfflineQueuePolicy {
    fn default() -> Self {
        OfflineQueuePolicy::PreserveAll
    }
}

impl OfflineQueuePolicy {
    /// Whether an operation of `kind`, carrying `qos` (irrelevant for non-Publish kinds), may be
    /// queued (or kept queued) while disconnected.
    #[must_use]
    pub fn admits(&self, kind: OperationKind, qos: QoS) -> bool {
        match self {
            OfflineQueuePolicy::PreserveAll => true,
            OfflineQueuePolicy::PreserveAcknowledged => match kind {
                OperationKind::Subscribe | OperationKind::Unsubscribe => true,
                OperationKind::Publish => qos >= QoS::AtLeastOnce,
                OperationKind::Disconnect | OperationKind::System => true,
            },
            OfflineQueuePolicy::PreserveQos1PlusPublishes => match kind {
                OperationKind::Publish => qos >= QoS::AtLeastOnce,
                OperationKind::Disconnect => true,
                _ => false,
            },
            OfflineQueuePolicy::PreserveNothing => matches!(kind, OperationKind::Disconnect),
        }
    }
}

/// How `cleanStart` is derived across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSessionPolicy {
    /// `cleanStart = true` on every connect.
    Never,
    /// `cleanStart = false` on every connect (technically illegal on the very first connect,
    /// since there's no session yet to resume, but accepted as a caller's explicit choice).
    Always,
    /// First connect `cleanStart = true`; every connect after the first successful Connack,
    /// `cleanStart = false`.
    PostSuccess,
}

impl Default for ResumeSessionPolicy {
    fn default() -> Self {
        ResumeSessionPolicy::PostSuccess
    }
}

impl ResumeSessionPolicy {
    /// The `cleanStart` flag to stamp on the next outbound Connect, given whether any prior
    /// connect attempt on this `ProtocolState` has ever reached `Connected`.
    #[must_use]
    pub fn clean_start(&self, ever_connected: bool) -> bool {
        match self {
            ResumeSessionPolicy::Never => true,
            ResumeSessionPolicy::Always => false,
            ResumeSessionPolicy::PostSuccess => !ever_connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserve_acknowledged_rejects_qos0_publish() {
        let policy = OfflineQueuePolicy::PreserveAcknowledged;
        assert!(!policy.admits(OperationKind::Publish, QoS::AtMostOnce));
        assert!(policy.admits(OperationKind::Publish, QoS::AtLeastOnce));
        assert!(policy.admits(OperationKind::Subscribe, QoS::AtMostOnce));
    }

    #[test]
    fn preserve_nothing_rejects_everything_but_disconnect() {
        let policy = OfflineQueuePolicy::PreserveNothing;
        assert!(!policy.admits(OperationKind::Publish, QoS::ExactlyOnce));
        assert!(!policy.admits(OperationKind::Subscribe, QoS::AtMostOnce));
        assert!(policy.admits(OperationKind::Disconnect, QoS::AtMostOnce));
    }

    #[test]
    fn post_success_flips_after_first_connect() {
        let policy = ResumeSessionPolicy::PostSuccess;
        assert!(policy.clean_start(false));
        assert!(!policy.clean_start(true));
    }

    #[test]
    fn never_always_are_constant() {
        assert!(ResumeSessionPolicy::Never.clean_start(true));
        assert!(!ResumeSessionPolicy::Always.clean_start(false));
    }
}
