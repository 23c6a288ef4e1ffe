//! Ping scheduling and the Connack/Pingresp establishment timeouts.

use crate::fold::{fold_time_min, ElapsedMillis};

/// Keep-alive and establishment timing state for one connection attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAlive {
    keep_alive_millis: u64,
    ping_timeout_millis: u64,
    next_outbound_ping_at: Option<ElapsedMillis>,
    pending_pingresp_timeout_at: Option<ElapsedMillis>,
    establishment_timeout_at: Option<ElapsedMillis>,
}

impl KeepAlive {
    /// `keep_alive_millis == 0` disables the keep-alive ping entirely (legal per MQTT; the
    /// connection simply relies on the transport for liveness).
    #[must_use]
    pub fn new(keep_alive_millis: u64, ping_timeout_millis: u64) -> Self {
        KeepAlive {
            keep_alive_millis,
            ping_timeout_millis,
            next_outbound_ping_at: None,
            pending_pingresp_timeout_at: None,
            establishment_timeout_at: None,
        }
    }

    /// Records the deadline by which a Connack must arrive, supplied by the caller in the
    /// `ConnectionOpened` context.
    pub fn set_establishment_timeout(&mut self, at: ElapsedMillis) {
        self.establishment_timeout_at = Some(at);
    }

    /// The Connack deadline, if a connection attempt is in progress.
    #[must_use]
    pub fn establishment_timeout_at(&self) -> Option<ElapsedMillis> {
        self.establishment_timeout_at
    }

    /// Call once the Connack has been accepted: clears the establishment timeout and schedules
    /// the first ping.
    pub fn on_connected(&mut self, now: ElapsedMillis) {
        self.establishment_timeout_at = None;
        self.schedule_next_ping(now);
    }

    /// Call after every successful outbound operation completion (Suback, Unsuback, a QoS 1
    /// Puback) — anything that counts as outbound activity except a QoS 0 publish write
    /// completion.
    pub fn on_activity_out(&mut self, completion_time: ElapsedMillis) {
        self.schedule_next_ping(completion_time);
    }

    fn schedule_next_ping(&mut self, from: ElapsedMillis) {
        if self.keep_alive_millis > 0 {
            self.next_outbound_ping_at = Some(from + self.keep_alive_millis);
        }
    }

    /// The next instant a Pingreq should be written, if keep-alive is enabled.
    #[must_use]
    pub fn next_outbound_ping_at(&self) -> Option<ElapsedMillis> {
        self.next_outbound_ping_at
    }

    /// Call once a Pingreq has actually been written to the socket: arms the Pingresp timeout
    /// and clears the scheduled-ping timepoint (it is rearmed by `on_pingresp`/`on_activity_out`).
    pub fn on_ping_sent(&mut self, now: ElapsedMillis) {
        self.next_outbound_ping_at = None;
        let timeout = self.ping_timeout_millis.min(self.keep_alive_millis / 2);
        self.pending_pingresp_timeout_at = Some(now + timeout);
    }

    /// Call on an inbound Pingresp: clears the pending timeout and reschedules the next ping.
    pub fn on_pingresp(&mut self, now: ElapsedMillis) {
        self.pending_pingresp_timeout_at = None;
        self.schedule_next_ping(now);
    }

    /// The deadline by which a Pingresp must arrive, if a Pingreq is currently outstanding.
    #[must_use]
    pub fn pending_pingresp_timeout_at(&self) -> Option<ElapsedMillis> {
        self.pending_pingresp_timeout_at
    }

    /// The earliest of the three keep-alive-related timepoints, for folding into
    /// `getNextServiceTimepoint`.
    #[must_use]
    pub fn next_service_timepoint(&self) -> Option<ElapsedMillis> {
        fold_time_min(vec![
            self.establishment_timeout_at,
            self.next_outbound_ping_at,
            self.pending_pingresp_timeout_at,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_cadence_matches_scenario_1() {
        let mut keepalive = KeepAlive::new(20_000, 10_000);
        keepalive.on_connected(0);
        assert_eq!(keepalive.next_outbound_ping_at(), Some(20_000));

        keepalive.on_ping_sent(20_000);
        assert_eq!(keepalive.pending_pingresp_timeout_at(), Some(30_000));
        assert_eq!(keepalive.next_outbound_ping_at(), None);

        keepalive.on_pingresp(22_500);
        assert_eq!(keepalive.pending_pingresp_timeout_at(), None);
        assert_eq!(keepalive.next_outbound_ping_at(), Some(42_500));
    }

    #[test]
    fn zero_keep_alive_never_schedules_a_ping() {
        let mut keepalive = KeepAlive::new(0, 10_000);
        keepalive.on_connected(0);
        assert_eq!(keepalive.next_outbound_ping_at(), None);
        assert_eq!(keepalive.next_service_timepoint(), None);
    }

    #[test]
    fn establishment_timeout_is_cleared_on_connect() {
        let mut keepalive = KeepAlive::new(20_000, 10_000);
        keepalive.set_establishment_timeout(30_000);
        assert_eq!(keepalive.next_service_timepoint(), Some(30_000));
        keepalive.on_connected(5_000);
        assert_eq!(keepalive.establishment_timeout_at(), None);
    }
}
