//! End-to-end scenarios for `ProtocolState`, driven entirely through the public event API —
//! no internal field ever touched directly. Each test plays the role of the host: it drains
//! `service`, delivers the bytes to an imaginary socket, and reports `WriteCompletion`/
//! `IncomingData` back, exactly as a real transport adapter would.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use mqtt_packet::{
    codec_for_version, ConnectAck, EncodeOutcome, Packet, ProtocolVersion, Property, PublishAck,
    QoS, ReasonCode,
};
use mqtt_proto_core::{
    ConnectOptions, NetworkEvent, OfflineQueuePolicy, OperationError, OperationOptions,
    OperationOutcome, ProtocolFatalError, ProtocolState, ProtocolStateConfig, PublishOptions,
    ResumeSessionPolicy, ServiceOutcome, UserRequest,
};

fn encode(protocol_version: ProtocolVersion, packet: Packet) -> Bytes {
    let mut codec = codec_for_version(protocol_version);
    codec.start_encoding(&packet, 4096).unwrap();
    let mut out = Vec::new();
    while codec.service(&mut out) == EncodeOutcome::InProgress {}
    Bytes::from(out)
}

/// Repeatedly calls `service` until the machine goes idle (or halts), collecting whatever bytes
/// were produced along the way. A real host would hand these to the socket and then report
/// `WriteCompletion`; tests do the same, synchronously.
fn drain_one_packet(state: &mut ProtocolState, now: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        match state.service(now, &mut buf) {
            ServiceOutcome::Wrote => continue,
            ServiceOutcome::Idle | ServiceOutcome::Halted => break,
        }
    }
    buf
}

fn config(
    protocol_version: ProtocolVersion,
    offline_queue_policy: OfflineQueuePolicy,
    keep_alive: Duration,
    ping_timeout: Duration,
) -> ProtocolStateConfig {
    ProtocolStateConfig {
        protocol_version,
        connect_options: ConnectOptions::new("test-client", keep_alive),
        offline_queue_policy,
        resume_session_policy: ResumeSessionPolicy::PostSuccess,
        ping_timeout,
        maximum_packet_size: 4096,
        connect_packet_transformer: None,
    }
}

/// Drives `state` from fresh/Disconnected through a successful Connect/Connack handshake at
/// time `now`, returning the eventual connected state. Ignores the implicit Connect's own bytes.
fn connect(state: &mut ProtocolState, now: u64, session_present: bool) {
    state
        .handle_network_event(
            NetworkEvent::ConnectionOpened {
                establishment_timeout_at: now + 30_000,
            },
            now,
        )
        .unwrap();
    drain_one_packet(state, now);
    state
        .handle_network_event(NetworkEvent::WriteCompletion, now)
        .unwrap();

    let ack = encode(
        ProtocolVersion::V5,
        Packet::ConnectAck(ConnectAck {
            session_present,
            reason_code: ReasonCode::Success,
            properties: None,
        }),
    );
    state
        .handle_network_event(NetworkEvent::IncomingData(ack), now)
        .unwrap();
}

#[test]
fn ping_cadence_matches_scenario_1() {
    let mut state = ProtocolState::new(config(
        ProtocolVersion::V5,
        OfflineQueuePolicy::PreserveAll,
        Duration::from_secs(20),
        Duration::from_secs(10),
    ));

    connect(&mut state, 0, true);
    assert!(state.is_connected());
    assert_eq!(state.get_next_service_timepoint(0), Some(20_000));

    let ping_bytes = drain_one_packet(&mut state, 20_000);
    assert!(!ping_bytes.is_empty());
    state
        .handle_network_event(NetworkEvent::WriteCompletion, 20_000)
        .unwrap();

    let pingresp = encode(ProtocolVersion::V5, Packet::Pingresp);
    state
        .handle_network_event(NetworkEvent::IncomingData(pingresp), 22_500)
        .unwrap();
    assert_eq!(state.get_next_service_timepoint(22_500), Some(42_500));
}

#[test]
fn connack_timeout_halts_and_verifies_empty() {
    let mut state = ProtocolState::new(config(
        ProtocolVersion::V5,
        OfflineQueuePolicy::PreserveAll,
        Duration::from_secs(20),
        Duration::from_secs(10),
    ));

    state
        .handle_network_event(
            NetworkEvent::ConnectionOpened {
                establishment_timeout_at: 30_000,
            },
            0,
        )
        .unwrap();
    drain_one_packet(&mut state, 0);
    state
        .handle_network_event(NetworkEvent::WriteCompletion, 0)
        .unwrap();

    let mut buf = Vec::new();
    let outcome = state.service(30_001, &mut buf);
    assert_eq!(outcome, ServiceOutcome::Halted);
    assert_eq!(state.halt_error(), Some(&ProtocolFatalError::ConnackTimeout));
    assert!(state.verify_empty());
}

#[test]
fn qos1_publish_resumes_after_reconnect_with_session_present() {
    let mut state = ProtocolState::new(config(
        ProtocolVersion::V5,
        OfflineQueuePolicy::PreserveQos1PlusPublishes,
        Duration::from_secs(20),
        Duration::from_secs(10),
    ));
    connect(&mut state, 0, true);

    let resolved: Arc<Mutex<Option<OperationOutcome>>> = Arc::new(Mutex::new(None));
    let resolved_clone = resolved.clone();
    state.handle_user_event(
        UserRequest::Publish(PublishOptions::new("a/b", &b"hello"[..]).with_qos(QoS::AtLeastOnce)),
        OperationOptions::default(),
        Box::new(move |outcome| *resolved_clone.lock().unwrap() = Some(outcome)),
        Box::new(|err| panic!("unexpected failure: {}", err)),
    );

    drain_one_packet(&mut state, 1_000);
    state
        .handle_network_event(NetworkEvent::WriteCompletion, 1_000)
        .unwrap();
    assert!(resolved.lock().unwrap().is_none(), "still awaiting Puback");

    state
        .handle_network_event(NetworkEvent::ConnectionClosed, 2_000)
        .unwrap();

    connect(&mut state, 3_000, true);
    let resend_bytes = drain_one_packet(&mut state, 3_000);
    assert!(!resend_bytes.is_empty(), "the duplicate publish should be resent");
    state
        .handle_network_event(NetworkEvent::WriteCompletion, 3_000)
        .unwrap();

    let puback = encode(
        ProtocolVersion::V5,
        Packet::PublishAck(PublishAck {
            packet_id: 1,
            reason_code: Some(ReasonCode::Success),
            properties: None,
        }),
    );
    state
        .handle_network_event(NetworkEvent::IncomingData(puback), 3_100)
        .unwrap();

    match resolved.lock().unwrap().take() {
        Some(OperationOutcome::PublishedQos1(ack)) => assert_eq!(ack.packet_id, 1),
        other => panic!("expected PublishedQos1, got {:?}", other),
    }
    assert!(state.verify_empty());
}

#[test]
fn qos1_publish_fails_when_session_not_resumed() {
    let mut state = ProtocolState::new(config(
        ProtocolVersion::V5,
        OfflineQueuePolicy::PreserveQos1PlusPublishes,
        Duration::from_secs(20),
        Duration::from_secs(10),
    ));
    connect(&mut state, 0, true);

    let failure: Arc<Mutex<Option<OperationError>>> = Arc::new(Mutex::new(None));
    let failure_clone = failure.clone();
    state.handle_user_event(
        UserRequest::Publish(PublishOptions::new("a/b", &b"hello"[..]).with_qos(QoS::AtLeastOnce)),
        OperationOptions::default(),
        Box::new(|_| panic!("should not succeed")),
        Box::new(move |err| *failure_clone.lock().unwrap() = Some(err)),
    );
    drain_one_packet(&mut state, 1_000);
    state
        .handle_network_event(NetworkEvent::WriteCompletion, 1_000)
        .unwrap();

    state
        .handle_network_event(NetworkEvent::ConnectionClosed, 2_000)
        .unwrap();

    connect(&mut state, 3_000, false);

    assert_eq!(
        failure.lock().unwrap().take(),
        Some(OperationError::ReconnectWithoutSessionAndNoResumption)
    );
    assert!(state.verify_empty());
}

#[test]
fn receive_maximum_backpressure_caps_unacked_publishes() {
    // keep-alive disabled so the ping schedule doesn't compete with the backpressure signal
    // `getNextServiceTimepoint` is asserted against below.
    let mut state = ProtocolState::new(config(
        ProtocolVersion::V5,
        OfflineQueuePolicy::PreserveAll,
        Duration::from_secs(0),
        Duration::from_secs(10),
    ));

    state
        .handle_network_event(
            NetworkEvent::ConnectionOpened {
                establishment_timeout_at: 30_000,
            },
            0,
        )
        .unwrap();
    drain_one_packet(&mut state, 0);
    state
        .handle_network_event(NetworkEvent::WriteCompletion, 0)
        .unwrap();
    let ack = encode(
        ProtocolVersion::V5,
        Packet::ConnectAck(ConnectAck {
            session_present: false,
            reason_code: ReasonCode::Success,
            properties: Some(vec![Property::ReceiveMaximum(3)]),
        }),
    );
    state
        .handle_network_event(NetworkEvent::IncomingData(ack), 0)
        .unwrap();

    for _ in 0..10 {
        state.handle_user_event(
            UserRequest::Publish(PublishOptions::new("a/b", &b"x"[..]).with_qos(QoS::AtLeastOnce)),
            OperationOptions::default(),
            Box::new(|_| {}),
            Box::new(|err| panic!("unexpected failure: {}", err)),
        );
    }

    let mut sent = 0;
    loop {
        let bytes = drain_one_packet(&mut state, 1_000);
        if bytes.is_empty() {
            break;
        }
        state
            .handle_network_event(NetworkEvent::WriteCompletion, 1_000)
            .unwrap();
        sent += 1;
    }
    assert_eq!(sent, 3, "only receiveMaximum publishes may be outstanding at once");
    assert_eq!(state.get_next_service_timepoint(1_000), None);

    for packet_id in 1..=3u16 {
        let puback = encode(
            ProtocolVersion::V5,
            Packet::PublishAck(PublishAck {
                packet_id,
                reason_code: Some(ReasonCode::Success),
                properties: None,
            }),
        );
        state
            .handle_network_event(NetworkEvent::IncomingData(puback), 1_100)
            .unwrap();
    }

    let mut sent_again = 0;
    loop {
        let bytes = drain_one_packet(&mut state, 1_200);
        if bytes.is_empty() {
            break;
        }
        state
            .handle_network_event(NetworkEvent::WriteCompletion, 1_200)
            .unwrap();
        sent_again += 1;
    }
    assert_eq!(sent_again, 3, "releasing the cap admits the next batch");
}

#[test]
fn disconnected_rejection_under_preserve_acknowledged() {
    let mut state = ProtocolState::new(config(
        ProtocolVersion::V5,
        OfflineQueuePolicy::PreserveAcknowledged,
        Duration::from_secs(20),
        Duration::from_secs(10),
    ));

    let failure: Arc<Mutex<Option<OperationError>>> = Arc::new(Mutex::new(None));
    let failure_clone = failure.clone();
    state.handle_user_event(
        UserRequest::Publish(PublishOptions::new("a/b", &b"x"[..])),
        OperationOptions::default(),
        Box::new(|_| panic!("should not succeed while disconnected")),
        Box::new(move |err| *failure_clone.lock().unwrap() = Some(err)),
    );

    assert_eq!(
        failure.lock().unwrap().take(),
        Some(OperationError::OfflineQueuePolicyRejection)
    );
    assert!(state.verify_empty());
}

#[test]
fn decoder_fatal_on_garbage_bytes() {
    let mut state = ProtocolState::new(config(
        ProtocolVersion::V5,
        OfflineQueuePolicy::PreserveAll,
        Duration::from_secs(20),
        Duration::from_secs(10),
    ));
    connect(&mut state, 0, true);

    let garbage = Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let result = state.handle_network_event(NetworkEvent::IncomingData(garbage), 1_000);
    assert!(result.is_err());
    assert!(matches!(
        state.halt_error(),
        Some(ProtocolFatalError::DecoderFailure(_))
    ));
    assert!(state.verify_empty());
}
