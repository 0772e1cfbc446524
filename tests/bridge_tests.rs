use std::sync::Arc;

use ebusgw::devices::boiler::BOILER_MASTER;
use ebusgw::devices::bridge::{TUNNEL_REQUEST, TUNNEL_RESPONSE};
use ebusgw::devices::{BoilerDevice, BridgeDevice};
use ebusgw::frame::IDENTIFY_COMMAND;
use ebusgw::*;

fn bridge_with_boiler(queue: &Arc<OutboundQueue>) -> BridgeDevice {
    let mut bridge = BridgeDevice::new(2, queue.clone()).unwrap();
    bridge
        .add_device(Box::new(BoilerDevice::new(BOILER_MASTER, BridgeDevice::inner_queue())))
        .unwrap();
    bridge
}

#[test]
fn test_address_switch() {
    let queue = Arc::new(OutboundQueue::new());
    let bridge = BridgeDevice::new(2, queue.clone()).unwrap();
    assert_eq!(bridge.slave_address(), 0x18);
    assert_eq!(bridge.identity().master_address(), Some(0x13));

    let bridge = BridgeDevice::new(3, queue.clone()).unwrap();
    assert_eq!(bridge.slave_address(), 0x38);

    assert!(matches!(BridgeDevice::new(4, queue), Err(EbusError::Config(_))));
}

#[test]
fn test_identifies_itself() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bridge = bridge_with_boiler(&queue);
    let msg = Message::with_payload(0x10, 0x18, IDENTIFY_COMMAND, &[]).unwrap();
    let rsp = bridge.process_slave_message(&msg).unwrap().unwrap();
    assert_eq!(&rsp.payload()[..6], &[0xb5, b'V', b'3', b'2', b' ', b' ']);
    assert_eq!(&rsp.payload()[6..], &[0x01, 0x17, 0x98, 0x02]);
}

#[test]
fn test_proxies_status_request_to_inner_boiler() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bus = Bus::new();
    bus.add_device(Box::new(bridge_with_boiler(&queue))).unwrap();

    let msg = Message::with_payload(0x10, 0x18, 0xb511, &[0x01]).unwrap();
    let mut sink = CaptureSink::new();
    bus.process_message(&msg, &mut sink).unwrap();

    assert!(sink.acked);
    let rsp = sink.response.unwrap();
    assert_eq!(rsp.len(), 9);
    assert!(rsp.is_valid_crc());
    assert_eq!(rsp.read_data1c(0), Some(71.5));
    assert!(queue.is_empty());
}

#[test]
fn test_master_address_reaches_bridge() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bus = Bus::new();
    bus.add_device(Box::new(bridge_with_boiler(&queue))).unwrap();

    let msg = Message::with_payload(0x10, 0x13, 0xb512, &[0x00, 0x64]).unwrap();
    let mut sink = CaptureSink::new();
    bus.process_message(&msg, &mut sink).unwrap();
    assert!(sink.acked);
    assert_eq!(sink.response.unwrap().payload(), &[0x00]);
}

#[test]
fn test_proxy_without_boiler_is_nacked() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bridge = BridgeDevice::new(2, queue).unwrap();
    let msg = Message::with_payload(0x10, 0x18, 0xb511, &[0x01]).unwrap();
    assert!(matches!(
        bridge.process_slave_message(&msg),
        Err(EbusError::InvalidRequest { command: 0xb511 })
    ));
}

#[test]
fn test_tunnel_queues_answer_for_requester() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bridge = bridge_with_boiler(&queue);

    // target 08, command b511, one data byte 01
    let msg = Message::with_payload(0x10, 0x18, TUNNEL_REQUEST, &[0x08, 0xb5, 0x11, 0x01, 0x01]).unwrap();
    let rsp = bridge.process_slave_message(&msg).unwrap();
    assert!(rsp.is_none());

    let reply = queue.pop().unwrap();
    assert_eq!((reply.source, reply.dest, reply.command), (0x13, 0x10, TUNNEL_RESPONSE));
    assert_eq!(reply.len(), 9);
    assert!(reply.is_valid_crc());
    assert!(queue.is_empty());
}

#[test]
fn test_tunnel_rejects_bad_length() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bridge = bridge_with_boiler(&queue);

    for payload in [&[0x08, 0xb5, 0x11][..], &[0x08, 0xb5, 0x11, 0x02, 0x01][..]] {
        let msg = Message::with_payload(0x10, 0x18, TUNNEL_REQUEST, payload).unwrap();
        assert!(matches!(
            bridge.process_slave_message(&msg),
            Err(EbusError::InvalidRequest { command: TUNNEL_REQUEST })
        ));
    }
    assert!(queue.is_empty());
}

#[test]
fn test_tunnel_to_missing_inner_device() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bridge = bridge_with_boiler(&queue);

    let msg = Message::with_payload(0x10, 0x18, TUNNEL_REQUEST, &[0x52, 0xb5, 0x11, 0x01, 0x01]).unwrap();
    assert!(bridge.process_slave_message(&msg).is_err());
    assert!(queue.is_empty());
}

#[test]
fn test_start_and_timer_reach_inner_devices() {
    let queue = Arc::new(OutboundQueue::new());
    let mut bridge = bridge_with_boiler(&queue);
    bridge.start();

    assert_eq!(bridge.identity().tick(), 0x13 % 60);
    let inner_tick = bridge.inner().device(0x08).unwrap().identity().tick();
    assert_eq!(inner_tick, u32::from(BOILER_MASTER));

    assert!(bridge.process_timer(0x13));
    assert_eq!(bridge.inner().device(0x08).unwrap().identity().tick(), inner_tick + 1);
    // inner identity broadcasts never reach the outer queue
    assert!(queue.is_empty());
}
