use ebusgw::frame::{ACK, SYN};
use ebusgw::gateway::*;
use ebusgw::*;

fn encode_all(cmd: u8, bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|&b| encode(cmd, b)).collect()
}

/// Client sends START with the source, then the rest of the frame as data.
fn client_request(msg: &Message) -> Vec<u8> {
    let bytes = msg.to_bytes();
    let mut input: Vec<u8> = encode(CMD_START, bytes[0]).to_vec();
    input.extend(encode_all(CMD_DATA, &bytes[1..]));
    input
}

#[test]
fn test_init_and_info() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    session.handle_bytes(&encode(CMD_INIT, 0x00), &queue, &mut out);
    assert_eq!(out, vec![0xc0, 0x81]);

    out.clear();
    session.handle_bytes(&encode(CMD_INFO, 0x00), &queue, &mut out);
    assert_eq!(out.len(), 18);
    assert!(out.chunks(2).all(|pair| pair[0] == 0xcc));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_request_is_echoed_and_queued() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    let msg = Message::with_payload(0x71, 0x08, 0xb511, &[0x01]).unwrap();
    let input = client_request(&msg);
    session.handle_bytes(&input, &queue, &mut out);

    assert_eq!(out, input);
    assert_eq!(session.state(), SessionState::ResponseAck);
    assert_eq!(queue.pop().unwrap(), msg);
}

#[test]
fn test_exchange_relayed_then_closed_by_client() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    let msg = Message::with_payload(0x71, 0x08, 0xb511, &[0x01]).unwrap();
    session.handle_bytes(&client_request(&msg), &queue, &mut out);
    out.clear();

    let response = Response::with_payload(&[0x10, 0x80]).unwrap();
    session.on_exchange(&msg, &response, &mut out);
    let mut expected = encode(CMD_DATA, ACK).to_vec();
    expected.extend(encode_all(CMD_DATA, &response.to_bytes()));
    assert_eq!(out, expected);

    // client final ACK, then its SYN
    out.clear();
    session.handle_bytes(&encode(CMD_DATA, ACK), &queue, &mut out);
    assert_eq!(session.state(), SessionState::ResponseSyn);
    session.handle_bytes(&encode(CMD_DATA, SYN), &queue, &mut out);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(out, vec![0x00, 0xc6, 0xaa]);
}

#[test]
fn test_unrelated_exchange_is_ignored() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    let msg = Message::with_payload(0x71, 0x08, 0xb511, &[0x01]).unwrap();
    session.handle_bytes(&client_request(&msg), &queue, &mut out);
    out.clear();

    let other = Message::with_payload(0x10, 0x08, 0xb511, &[0x01]).unwrap();
    session.on_exchange(&other, &Response::new(), &mut out);
    assert!(out.is_empty());
    assert_eq!(session.state(), SessionState::ResponseAck);
}

#[test]
fn test_exchange_while_idle_is_ignored() {
    let mut session = GatewaySession::new();
    let mut out = Vec::new();
    let msg = Message::with_payload(0x71, 0x08, 0xb511, &[0x01]).unwrap();
    session.on_exchange(&msg, &Response::new(), &mut out);
    assert!(out.is_empty());
}

#[test]
fn test_broadcast_request_returns_to_idle() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    let msg = Message::with_payload(0x71, 0xfe, 0xb516, &[0x01, 0x00, 0x0d]).unwrap();
    session.handle_bytes(&client_request(&msg), &queue, &mut out);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(queue.pop().unwrap().is_broadcast());
}

#[test]
fn test_start_with_syn_resets() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    session.handle_bytes(&encode(CMD_START, 0x71), &queue, &mut out);
    assert_eq!(session.state(), SessionState::CommandSend);
    out.clear();
    session.handle_bytes(&encode(CMD_START, SYN), &queue, &mut out);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(out, encode(CMD_START, SYN).to_vec());
    assert!(queue.is_empty());
}

#[test]
fn test_idle_timer_sends_syn() {
    let mut session = GatewaySession::new();
    let mut out = Vec::new();
    session.on_timer(&mut out);
    assert_eq!(out, vec![0xc6, 0xaa]);
}

#[test]
fn test_pending_exchange_times_out() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    let msg = Message::with_payload(0x71, 0x08, 0xb511, &[0x01]).unwrap();
    session.handle_bytes(&client_request(&msg), &queue, &mut out);
    out.clear();

    for _ in 0..MAX_MISSED_TICKS {
        session.on_timer(&mut out);
        assert_eq!(session.state(), SessionState::ResponseAck);
    }
    session.on_timer(&mut out);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(out.is_empty());

    // late answer is dropped
    session.on_exchange(&msg, &Response::new(), &mut out);
    assert!(out.is_empty());
}

#[test]
fn test_orphan_bytes_are_skipped() {
    let queue = OutboundQueue::new();
    let mut session = GatewaySession::new();
    let mut out = Vec::new();

    session.handle_bytes(&[0x81], &queue, &mut out);
    assert!(out.is_empty());
    session.handle_bytes(&encode(CMD_INIT, 0x00), &queue, &mut out);
    assert_eq!(out, vec![0xc0, 0x81]);
}
