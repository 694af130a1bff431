//! Integration tests for trellis-bdx.

use bytes::Bytes;

use crate::{
    BdxError, BdxMessage, BdxStatusCode, DriveMode, ReceiverEvent, ReceiverTransfer, SenderEvent,
    SenderTransfer, TransferControl, TransferInit, TransferOptions,
};

fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn sender_drive_options() -> TransferOptions {
    TransferOptions {
        offer_sender_drive: true,
        offer_receiver_drive: false,
        max_block_size: 1024,
        ..TransferOptions::default()
    }
}

// ============================================================================
// Codec
// ============================================================================

#[test]
fn init_message_roundtrip() {
    let init = TransferInit {
        control: TransferControl::new(TransferControl::VERSION | TransferControl::SENDER_DRIVE),
        max_block_size: 512,
        start_offset: Some(4096),
        length: Some(32 * 1024),
        file_designator: Bytes::from_static(b"ota/image.bin"),
    };
    let decoded = TransferInit::decode(init.encode()).unwrap();
    assert_eq!(decoded, init);
}

#[test]
fn message_roundtrip_by_opcode() {
    let messages = vec![
        BdxMessage::BlockQuery { counter: 7 },
        BdxMessage::BlockAck { counter: 8 },
        BdxMessage::BlockAckEof { counter: 9 },
        BdxMessage::StatusReport(BdxStatusCode::LengthTooLarge),
        BdxMessage::Block(crate::BlockData {
            counter: 3,
            data: Bytes::from_static(&[1, 2, 3]),
        }),
    ];
    for message in messages {
        let decoded = BdxMessage::decode(message.opcode(), message.encode()).unwrap();
        assert_eq!(decoded, message);
    }
}

// ============================================================================
// SenderDrive end-to-end (S5 shape)
// ============================================================================

#[test]
fn sender_drive_transfers_32k_in_1k_blocks() {
    let data = payload(32 * 1024);
    let options = sender_drive_options();

    let (mut sender, init) = SenderTransfer::initiate(data.clone(), &options, None).unwrap();
    let BdxMessage::SendInit(init) = init else {
        panic!("expected SendInit");
    };
    let (mut receiver, accept) = ReceiverTransfer::respond(&init, &options).unwrap();
    assert_eq!(receiver.mode(), Some(DriveMode::SenderDrive));

    // Accept reaches the sender; it starts pushing.
    let mut event = sender.on_message(&accept).unwrap();
    let mut blocks = 0u32;
    let mut eof_counter = None;
    let received = loop {
        let SenderEvent::Send(message) = event else {
            panic!("sender had nothing to send");
        };
        match &message {
            BdxMessage::Block(block) => {
                blocks += 1;
                assert_eq!(block.counter, blocks);
                assert_eq!(block.data.len(), 1024);
            }
            BdxMessage::BlockEof(block) => {
                eof_counter = Some(block.counter);
            }
            other => panic!("unexpected sender message {other:?}"),
        }
        match receiver.on_message(&message).unwrap() {
            ReceiverEvent::Send(ack) => {
                event = sender.on_message(&ack).unwrap();
            }
            ReceiverEvent::Complete { data } => {
                // The receiver still acks the EOF.
                let final_ack = receiver.final_ack();
                assert_eq!(sender.on_message(&final_ack).unwrap(), SenderEvent::Complete);
                break data;
            }
            ReceiverEvent::Idle => panic!("receiver stalled"),
        }
    };

    assert_eq!(blocks, 31, "31 full blocks before the EOF block");
    assert_eq!(eof_counter, Some(32));
    assert!(sender.is_complete());
    assert!(receiver.is_complete());
    assert_eq!(received, data, "reassembled payload differs");
}

// ============================================================================
// ReceiverDrive end-to-end
// ============================================================================

#[test]
fn receiver_drive_queries_pull_blocks() {
    let data = payload(2500);
    let options = TransferOptions {
        offer_sender_drive: false,
        offer_receiver_drive: true,
        max_block_size: 1000,
        ..TransferOptions::default()
    };

    let (mut receiver, init) = ReceiverTransfer::initiate(&options);
    let BdxMessage::ReceiveInit(init) = init else {
        panic!("expected ReceiveInit");
    };
    let (mut sender, accept) = SenderTransfer::respond(data.clone(), &init, &options).unwrap();
    assert_eq!(sender.mode(), Some(DriveMode::ReceiverDrive));

    let mut event = receiver.on_message(&accept).unwrap();
    let received = loop {
        let ReceiverEvent::Send(query) = event else {
            panic!("receiver had nothing to send");
        };
        let SenderEvent::Send(block) = sender.on_message(&query).unwrap() else {
            panic!("sender had nothing to send");
        };
        match receiver.on_message(&block).unwrap() {
            ReceiverEvent::Send(next) => event = ReceiverEvent::Send(next),
            ReceiverEvent::Complete { data } => {
                let final_ack = receiver.final_ack();
                assert_eq!(sender.on_message(&final_ack).unwrap(), SenderEvent::Complete);
                break data;
            }
            ReceiverEvent::Idle => panic!("receiver stalled"),
        }
    };
    assert_eq!(received, data);
}

// ============================================================================
// Counter discipline (property 8)
// ============================================================================

#[test]
fn receiver_rejects_any_non_successor_counter() {
    let options = sender_drive_options();
    let init = TransferInit {
        control: TransferControl::new(TransferControl::VERSION | TransferControl::SENDER_DRIVE),
        max_block_size: 1024,
        start_offset: None,
        length: None,
        file_designator: Bytes::new(),
    };
    let (mut receiver, _) = ReceiverTransfer::respond(&init, &options).unwrap();

    // First block must be counter 1.
    let err = receiver
        .on_message(&BdxMessage::Block(crate::BlockData {
            counter: 2,
            data: Bytes::from_static(&[0]),
        }))
        .unwrap_err();
    assert_eq!(err, BdxError::BadBlockCounter { expected: 1, got: 2 });

    receiver
        .on_message(&BdxMessage::Block(crate::BlockData {
            counter: 1,
            data: Bytes::from_static(&[0]),
        }))
        .unwrap();

    // Repeats and skips both fail.
    for bad in [1u32, 3, 0] {
        let mut clone_err = receiver.on_message(&BdxMessage::Block(crate::BlockData {
            counter: bad,
            data: Bytes::from_static(&[0]),
        }));
        assert!(
            matches!(clone_err, Err(BdxError::BadBlockCounter { expected: 2, .. })),
            "counter {bad} must be rejected, got {clone_err:?}"
        );
        // The first rejection poisons nothing; expected stays 2.
        clone_err = receiver.on_message(&BdxMessage::Block(crate::BlockData {
            counter: 5,
            data: Bytes::from_static(&[0]),
        }));
        assert!(clone_err.is_err());
    }
}

// ============================================================================
// Negotiation guards
// ============================================================================

#[test]
fn async_only_offer_is_rejected() {
    let options = TransferOptions::default();
    let init = TransferInit {
        control: TransferControl::new(TransferControl::VERSION | TransferControl::ASYNC),
        max_block_size: 1024,
        start_offset: None,
        length: None,
        file_designator: Bytes::new(),
    };
    let err = ReceiverTransfer::respond(&init, &options).unwrap_err();
    assert_eq!(err, BdxError::AsyncNotSupported);
    assert_eq!(err.status_code(), BdxStatusCode::TransferMethodNotSupported);
}

#[test]
fn disjoint_drive_modes_fail_negotiation() {
    let options = TransferOptions {
        offer_sender_drive: false,
        offer_receiver_drive: true,
        ..TransferOptions::default()
    };
    let init = TransferInit {
        control: TransferControl::new(TransferControl::VERSION | TransferControl::SENDER_DRIVE),
        max_block_size: 1024,
        start_offset: None,
        length: None,
        file_designator: Bytes::new(),
    };
    assert_eq!(
        ReceiverTransfer::respond(&init, &options).unwrap_err(),
        BdxError::NoCommonDriveMode
    );
}

#[test]
fn oversized_transfer_is_rejected() {
    let options = TransferOptions {
        max_transfer_size: 1024,
        ..TransferOptions::default()
    };
    let init = TransferInit {
        control: TransferControl::new(TransferControl::VERSION | TransferControl::SENDER_DRIVE),
        max_block_size: 512,
        start_offset: None,
        length: Some(2048),
        file_designator: Bytes::new(),
    };
    assert!(matches!(
        ReceiverTransfer::respond(&init, &options).unwrap_err(),
        BdxError::TransferTooLarge { length: 2048, limit: 1024 }
    ));
}

#[test]
fn responder_side_offset_is_rejected() {
    // Partial transfer is an initiator-as-sender feature; a ReceiveInit
    // with an offset must not reach a responding sender.
    let options = TransferOptions::default();
    let init = TransferInit {
        control: TransferControl::new(TransferControl::VERSION | TransferControl::RECEIVER_DRIVE),
        max_block_size: 1024,
        start_offset: Some(100),
        length: None,
        file_designator: Bytes::new(),
    };
    assert_eq!(
        SenderTransfer::respond(payload(10), &init, &options).unwrap_err(),
        BdxError::PartialTransferNotAllowed
    );
}

#[test]
fn initiator_sender_offset_skips_prefix() {
    let data = payload(2048);
    let options = sender_drive_options();
    let (sender, init) = SenderTransfer::initiate(data.clone(), &options, Some(1024)).unwrap();
    let BdxMessage::SendInit(init) = init else {
        panic!("expected SendInit");
    };
    assert_eq!(init.start_offset, Some(1024));
    // Only the suffix is staged for sending.
    drop(sender);
}

#[test]
fn peer_status_report_terminates() {
    let data = payload(10);
    let options = sender_drive_options();
    let (mut sender, _) = SenderTransfer::initiate(data, &options, None).unwrap();
    let err = sender
        .on_message(&BdxMessage::StatusReport(BdxStatusCode::FileDesignatorUnknown))
        .unwrap_err();
    assert_eq!(err, BdxError::PeerStatus(BdxStatusCode::FileDesignatorUnknown));
}
