//! Integration tests for trellis-exchange.

use bytes::Bytes;
use trellis_types::{NodeId, SessionId, Timestamp};

use crate::{
    ExchangeError, ExchangeManager, ExchangeRole, ExchangeState, Message, MessageHeader,
    MrpConfig, OPCODE_STANDALONE_ACK, PROTOCOL_INTERACTION, PROTOCOL_SECURE_CHANNEL,
    PayloadHeader, SendFlags, SessionHandle,
};

fn at(ms: u64) -> Timestamp {
    Timestamp::from_millis(ms)
}

fn manager() -> ExchangeManager {
    ExchangeManager::new(MrpConfig {
        jitter: std::time::Duration::ZERO,
        ..MrpConfig::default()
    })
}

const SESSION: SessionHandle = SessionHandle(1);

/// Builds the inbound message a peer would send on the given exchange.
fn inbound(
    exchange_id: u16,
    opcode: u8,
    counter: u32,
    from_initiator: bool,
    reliable: bool,
    ack: Option<u32>,
) -> Message {
    let mut payload_header = PayloadHeader::new(
        PROTOCOL_INTERACTION,
        opcode,
        trellis_types::ExchangeId::new(exchange_id),
        from_initiator,
    );
    if reliable {
        payload_header = payload_header.reliable();
    }
    if let Some(ack) = ack {
        payload_header = payload_header.acking(ack);
    }
    Message {
        header: MessageHeader::unicast(SessionId::new(1), counter),
        payload_header,
        payload: Bytes::from_static(b"payload"),
    }
}

// ============================================================================
// Header codec
// ============================================================================

#[test]
fn full_frame_roundtrip() {
    let message = Message {
        header: MessageHeader::unicast(SessionId::new(0x1234), 77)
            .with_source(NodeId::new(0xAABB))
            .with_destination(NodeId::new(0xCCDD)),
        payload_header: PayloadHeader::new(
            PROTOCOL_INTERACTION,
            0x05,
            trellis_types::ExchangeId::new(9),
            true,
        )
        .reliable()
        .acking(42),
        payload: Bytes::from_static(&[1, 2, 3]),
    };

    let decoded = Message::decode(message.encode()).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn protected_part_reassembles() {
    let message = inbound(3, 0x02, 10, true, true, None);
    let protected = message.encode_protected();
    let rebuilt = Message::from_protected(message.header, protected).unwrap();
    assert_eq!(rebuilt, message);
}

#[test]
fn truncated_header_rejected() {
    let message = inbound(3, 0x02, 10, true, false, None);
    let bytes = message.encode();
    for cut in 0..8.min(bytes.len()) {
        assert!(Message::decode(bytes.slice(..cut)).is_err());
    }
}

// ============================================================================
// Exchange lifecycle
// ============================================================================

#[test]
fn unsolicited_message_opens_responder_exchange_and_delivers() {
    let mut mgr = manager();
    let output = mgr.on_message(SESSION, &inbound(7, 0x02, 1, true, true, None), at(0));

    assert_eq!(output.deliveries.len(), 1);
    let delivery = &output.deliveries[0];
    assert!(delivery.unsolicited);
    assert_eq!(delivery.key.role, ExchangeRole::Responder);
    assert_eq!(delivery.opcode, 0x02);
    assert_eq!(mgr.exchange_count(), 1);
}

#[test]
fn standalone_ack_never_opens_an_exchange() {
    let mut mgr = manager();
    let mut message = inbound(7, OPCODE_STANDALONE_ACK, 1, true, false, Some(5));
    message.payload_header.protocol = PROTOCOL_SECURE_CHANNEL;
    let output = mgr.on_message(SESSION, &message, at(0));
    assert!(output.deliveries.is_empty());
    assert_eq!(mgr.exchange_count(), 0);
}

#[test]
fn reliable_send_retransmits_with_backoff_until_exhausted() {
    let mut mgr = manager();
    let key = mgr.create(SESSION, PROTOCOL_INTERACTION, at(0));
    let frame = mgr
        .send(
            key,
            0x02,
            Bytes::from_static(b"read"),
            SendFlags {
                reliable: true,
                final_message: false,
            },
            100,
            at(0),
        )
        .unwrap();
    assert!(frame.payload_header.flags.needs_ack());
    assert_eq!(mgr.state(key), Some(ExchangeState::AwaitingAck));

    let mut alloc = |_s: SessionHandle| 999u32;
    let mut retransmits = 0;
    let mut now = at(0);
    let failure = loop {
        now = mgr.next_wakeup().expect("work pending");
        let output = mgr.poll(now, &mut alloc);
        retransmits += output
            .frames
            .iter()
            .filter(|f| f.counter == 100)
            .count();
        if let Some((closed_key, error)) = output.closed.first() {
            assert_eq!(*closed_key, key);
            break error.clone();
        }
    };

    assert_eq!(retransmits, MrpConfig::default().max_retries as usize);
    assert!(matches!(
        failure,
        Some(ExchangeError::RetryExhausted { counter: 100, .. })
    ));
    assert_eq!(mgr.exchange_count(), 0);
}

#[test]
fn matching_ack_stops_retransmission() {
    let mut mgr = manager();
    let key = mgr.create(SESSION, PROTOCOL_INTERACTION, at(0));
    mgr.send(
        key,
        0x02,
        Bytes::from_static(b"read"),
        SendFlags {
            reliable: true,
            final_message: false,
        },
        100,
        at(0),
    )
    .unwrap();

    // Response from the peer acks counter 100.
    let response = inbound(key.id.as_u16(), 0x05, 1, false, false, Some(100));
    let output = mgr.on_message(SESSION, &response, at(50));
    assert_eq!(output.deliveries.len(), 1);
    assert_eq!(mgr.state(key), Some(ExchangeState::Active));

    let mut alloc = |_s: SessionHandle| 999u32;
    let output = mgr.poll(at(10_000), &mut alloc);
    assert!(output.frames.iter().all(|f| f.counter != 100));
}

#[test]
fn second_reliable_send_while_unacked_is_rejected() {
    let mut mgr = manager();
    let key = mgr.create(SESSION, PROTOCOL_INTERACTION, at(0));
    let flags = SendFlags {
        reliable: true,
        final_message: false,
    };
    mgr.send(key, 0x02, Bytes::new(), flags, 1, at(0)).unwrap();
    assert!(matches!(
        mgr.send(key, 0x02, Bytes::new(), flags, 2, at(1)),
        Err(ExchangeError::AckPending(_))
    ));
}

// ============================================================================
// Acknowledgement plumbing
// ============================================================================

#[test]
fn owed_ack_piggybacks_on_next_send() {
    let mut mgr = manager();
    let output = mgr.on_message(SESSION, &inbound(7, 0x02, 41, true, true, None), at(0));
    let key = output.deliveries[0].key;

    let frame = mgr
        .send(key, 0x05, Bytes::from_static(b"report"), SendFlags::default(), 200, at(10))
        .unwrap();
    assert_eq!(frame.payload_header.ack_counter, Some(41));
}

#[test]
fn owed_ack_goes_standalone_after_ack_timeout() {
    let mut mgr = manager();
    let output = mgr.on_message(SESSION, &inbound(7, 0x02, 41, true, true, None), at(0));
    let key = output.deliveries[0].key;

    let mut alloc = |_s: SessionHandle| 777u32;
    let deadline = mgr.next_wakeup().unwrap();
    let output = mgr.poll(deadline, &mut alloc);

    let ack = output
        .frames
        .iter()
        .find(|f| f.payload_header.opcode == OPCODE_STANDALONE_ACK)
        .expect("standalone ack emitted");
    assert_eq!(ack.payload_header.ack_counter, Some(41));
    assert_eq!(ack.counter, 777);
    assert_eq!(ack.payload_header.exchange_id, key.id);
    assert!(!ack.payload_header.flags.needs_ack());
}

#[test]
fn duplicate_is_acked_but_not_delivered() {
    let mut mgr = manager();
    let message = inbound(7, 0x02, 41, true, true, None);
    let first = mgr.on_message(SESSION, &message, at(0));
    assert_eq!(first.deliveries.len(), 1);

    // The session layer flags the replay; the manager only re-acks.
    let mut alloc = |_s: SessionHandle| 500u32;
    let output = mgr.acknowledge_duplicate(SESSION, &message, &mut alloc);
    assert!(output.deliveries.is_empty());
    assert_eq!(output.frames.len(), 1);
    assert_eq!(output.frames[0].payload_header.ack_counter, Some(41));
}

// ============================================================================
// Close semantics
// ============================================================================

#[test]
fn close_flushes_owed_ack() {
    let mut mgr = manager();
    let output = mgr.on_message(SESSION, &inbound(7, 0x02, 41, true, true, None), at(0));
    let key = output.deliveries[0].key;

    let mut alloc = |_s: SessionHandle| 600u32;
    let output = mgr.close(key, &mut alloc);
    assert_eq!(output.frames.len(), 1);
    assert_eq!(output.frames[0].payload_header.ack_counter, Some(41));
    assert_eq!(output.closed.len(), 1);
    assert_eq!(mgr.exchange_count(), 0);
}

#[test]
fn session_close_fails_all_exchanges_fast() {
    let mut mgr = manager();
    let k1 = mgr.create(SESSION, PROTOCOL_INTERACTION, at(0));
    let k2 = mgr.create(SESSION, PROTOCOL_INTERACTION, at(0));
    let other = mgr.create(SessionHandle(2), PROTOCOL_INTERACTION, at(0));

    let output = mgr.close_session(SESSION);
    let closed: Vec<_> = output.closed.iter().map(|(k, _)| *k).collect();
    assert!(closed.contains(&k1) && closed.contains(&k2));
    assert!(!closed.contains(&other));
    assert_eq!(mgr.exchange_count(), 1);
}

#[test]
fn idle_exchange_is_reaped() {
    let mut mgr = manager();
    let key = mgr.create(SESSION, PROTOCOL_INTERACTION, at(0));

    let mut alloc = |_s: SessionHandle| 0u32;
    let output = mgr.poll(at(120_000), &mut alloc);
    assert!(output
        .closed
        .iter()
        .any(|(k, e)| *k == key && matches!(e, Some(ExchangeError::Timeout(_)))));
}

#[test]
fn timed_deadline_is_tracked() {
    let mut mgr = manager();
    let key = mgr.create(SESSION, PROTOCOL_INTERACTION, at(0));
    assert_eq!(mgr.timed_deadline(key), None);
    mgr.set_timed_deadline(key, at(5_000));
    assert_eq!(mgr.timed_deadline(key), Some(at(5_000)));
}
