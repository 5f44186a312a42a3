//! Integration tests for frame dispatch
//!
//! These tests drive the public dispatch API end to end:
//! - Batching of several frames into a single flush
//! - Unknown opcodes and handler failures
//! - Handler chain ordering
//! - Region-dependent registration

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use prost::Message;
use tokio::io::{AsyncReadExt, DuplexStream};

use dockyard_server::build_registry;
use dockyard_server::net::capture::{Direction, MemoryCapture, NoopCapture, PacketObserver};
use dockyard_server::net::{
    handler, Dispatcher, Handler, HandlerError, HandlerOutcome, HandlerRegistry, Session,
};
use dockyard_server::protocol::frame::{self, HEADER_SIZE};
use dockyard_server::protocol::messages::{
    HeartbeatRequest, HeartbeatResponse, CS_HEARTBEAT, CS_SERVER_NOTICE, SC_HEARTBEAT,
};
use dockyard_server::Region;

fn encode(opcode: u16, payload: &[u8], sequence: u16) -> Vec<u8> {
    let mut out = BytesMut::new();
    frame::encode_frame(&mut out, opcode, payload, sequence).unwrap();
    out.to_vec()
}

fn piped_session() -> (Session, DuplexStream) {
    piped_session_with(Arc::new(NoopCapture))
}

/// Session whose outbound frames land in `capture`
fn piped_session_with(capture: Arc<dyn PacketObserver>) -> (Session, DuplexStream) {
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let session = Session::with_capture(
        1,
        "127.0.0.1:40000".parse().unwrap(),
        Box::new(writer),
        capture,
    );
    (session, reader)
}

/// Read one frame back as (opcode, sequence, payload)
async fn read_frame(reader: &mut DuplexStream) -> (u16, u16, Vec<u8>) {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.unwrap();
    let total = frame::frame_total_size(frame::decode_size(0, &header));
    let mut payload = vec![0u8; total - HEADER_SIZE];
    reader.read_exact(&mut payload).await.unwrap();
    (
        frame::decode_opcode(0, &header),
        frame::decode_sequence(0, &header),
        payload,
    )
}

/// Handler that echoes the payload back under `response_opcode`
fn echo(response_opcode: u16) -> Handler {
    handler(move |payload, session| session.send_raw(response_opcode, payload))
}

/// Handler that records `tag` into `log`
fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Handler {
    let log = log.clone();
    handler(move |_, _| {
        log.lock().push(tag);
        Ok(HandlerOutcome::default())
    })
}

fn dispatcher_for(registry: HandlerRegistry) -> Dispatcher {
    Dispatcher::new(Arc::new(registry), Arc::new(NoopCapture))
}

#[tokio::test]
async fn test_k_frames_one_flush() {
    let mut registry = HandlerRegistry::new(Region::EN);
    registry.register(100, vec![echo(101)]);
    let dispatcher = dispatcher_for(registry);

    let mut buf = Vec::new();
    for seq in 0..4u16 {
        buf.extend(encode(100, &[seq as u8], seq));
    }

    let (mut session, mut client) = piped_session();
    let frames = dispatcher.dispatch(&buf, buf.len(), &mut session).await.unwrap();

    assert_eq!(frames, 4);
    assert_eq!(session.metrics().flushes, 1);
    assert_eq!(session.metrics().packets, 4);
    for seq in 0..4u16 {
        let (opcode, sequence, payload) = read_frame(&mut client).await;
        assert_eq!((opcode, sequence, payload), (101, seq, vec![seq as u8]));
    }
}

#[tokio::test]
async fn test_literal_scenario() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut registry = HandlerRegistry::new(Region::EN);
    registry.register(
        1,
        vec![handler(move |payload, _| {
            sink.lock().push(payload.to_vec());
            Ok(HandlerOutcome::default())
        })],
    );

    let buf = [0x00, 0x0A, 0x00, 0x00, 0x01, 0x00, 0x00, 10, 11, 12, 13, 14];
    let (mut session, _client) = piped_session();
    let frames = dispatcher_for(registry)
        .dispatch(&buf, 12, &mut session)
        .await
        .unwrap();

    assert_eq!(frames, 1);
    assert_eq!(seen.lock().clone(), vec![vec![10, 11, 12, 13, 14]]);
    assert_eq!(session.metrics().flushes, 1);
}

#[tokio::test]
async fn test_unknown_opcode_does_not_block_later_frames() {
    let capture = Arc::new(MemoryCapture::new(16));
    let mut registry = HandlerRegistry::new(Region::EN);
    registry.register(7, vec![echo(8)]);
    let dispatcher = Dispatcher::new(Arc::new(registry), capture.clone());

    let mut buf = encode(60000, &[1, 2, 3], 0);
    buf.extend(encode(7, &[4], 1));

    let (mut session, mut client) = piped_session_with(capture.clone());
    dispatcher.dispatch(&buf, buf.len(), &mut session).await.unwrap();

    assert!(!session.is_closed());
    assert_eq!(capture.opcodes(Direction::Inbound), vec![60000, 7]);
    assert_eq!(capture.opcodes(Direction::Outbound), vec![8]);
    let (opcode, _, payload) = read_frame(&mut client).await;
    assert_eq!((opcode, payload), (8, vec![4]));
}

#[tokio::test]
async fn test_chain_runs_in_order_every_time() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HandlerRegistry::new(Region::EN);
    registry.register(
        9,
        vec![recorder(&log, "A"), recorder(&log, "B"), recorder(&log, "C")],
    );
    let dispatcher = dispatcher_for(registry);

    let mut buf = encode(9, &[], 0);
    buf.extend(encode(9, &[], 1));
    let (mut session, _client) = piped_session();
    dispatcher.dispatch(&buf, buf.len(), &mut session).await.unwrap();

    assert_eq!(log.lock().clone(), vec!["A", "B", "C", "A", "B", "C"]);
}

#[tokio::test]
async fn test_handler_error_stops_read_without_flush() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let failing = {
        let log = log.clone();
        handler(move |_, session| {
            log.lock().push("fail");
            session.send_raw(31, &[1])?;
            Err(HandlerError::msg(31, "refused"))
        })
    };
    let mut registry = HandlerRegistry::new(Region::EN);
    registry.register(30, vec![failing, recorder(&log, "after")]);
    registry.register(40, vec![recorder(&log, "next frame")]);

    let mut buf = encode(30, &[], 0);
    buf.extend(encode(40, &[], 1));
    let (mut session, _client) = piped_session();
    let result = dispatcher_for(registry)
        .dispatch(&buf, buf.len(), &mut session)
        .await;

    assert!(result.is_err());
    assert_eq!(log.lock().clone(), vec!["fail"]);
    assert!(session.is_closed());
    assert_eq!(session.metrics().handler_errors, 1);
    assert_eq!(session.metrics().flushes, 0);
    assert_eq!(session.close_reason(), Some("Handler error: refused"));
}

#[tokio::test]
async fn test_send_then_flush_decodes() {
    let (mut session, mut client) = piped_session();
    session.set_sequence(12);

    let message = HeartbeatResponse {
        state: 2,
        server_time: 1_700_000_000,
    };
    let encoded = message.encode_to_vec();
    session.send_message(SC_HEARTBEAT, &message).unwrap();
    session.flush().await.unwrap();

    let mut header = [0u8; HEADER_SIZE];
    client.read_exact(&mut header).await.unwrap();
    assert_eq!(frame::decode_size(0, &header) as usize, encoded.len() + 5);
    assert_eq!(
        frame::frame_total_size(frame::decode_size(0, &header)),
        encoded.len() + 7
    );
    assert_eq!(frame::decode_opcode(0, &header), SC_HEARTBEAT);
    assert_eq!(frame::decode_sequence(0, &header), 12);

    let mut payload = vec![0u8; encoded.len()];
    client.read_exact(&mut payload).await.unwrap();
    assert_eq!(HeartbeatResponse::decode(&payload[..]).unwrap(), message);
}

#[tokio::test]
async fn test_builtin_heartbeat_roundtrip() {
    let dispatcher = Dispatcher::new(Arc::new(build_registry(Region::EN)), Arc::new(NoopCapture));
    let request = HeartbeatRequest { need_request: 1 }.encode_to_vec();
    let buf = encode(CS_HEARTBEAT, &request, 5);

    let (mut session, mut client) = piped_session();
    dispatcher.dispatch(&buf, buf.len(), &mut session).await.unwrap();

    let (opcode, sequence, payload) = read_frame(&mut client).await;
    assert_eq!(opcode, SC_HEARTBEAT);
    assert_eq!(sequence, 5);
    assert!(HeartbeatResponse::decode(&payload[..]).unwrap().server_time > 0);
}

#[tokio::test]
async fn test_notice_is_unhandled_outside_notice_regions() {
    let capture = Arc::new(MemoryCapture::new(8));
    let dispatcher = Dispatcher::new(Arc::new(build_registry(Region::EN)), capture.clone());
    let buf = encode(CS_SERVER_NOTICE, &[], 0);

    let (mut session, _client) = piped_session_with(capture.clone());
    dispatcher.dispatch(&buf, buf.len(), &mut session).await.unwrap();

    assert!(!session.is_closed());
    assert!(capture.opcodes(Direction::Outbound).is_empty());
    assert_eq!(capture.opcodes(Direction::Inbound), vec![CS_SERVER_NOTICE]);
}

#[tokio::test]
async fn test_undersized_declared_size_closes_session() {
    let buf = [0x00, 0x01, 0x00, 0x00, 0x07, 0x00, 0x00];
    let (mut session, _client) = piped_session();
    let result = dispatcher_for(HandlerRegistry::new(Region::EN))
        .dispatch(&buf, buf.len(), &mut session)
        .await;

    assert!(result.is_err());
    assert!(session.is_closed());
    assert_eq!(session.metrics().flushes, 0);
}
