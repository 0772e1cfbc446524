//! Device registry, reply sinks and the shared outbound queue.

use std::sync::atomic::{AtomicU32, Ordering};

use heapless::Deque;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::device::Device;
use crate::error::EbusError;
use crate::frame::{dispatch_key, Message, Response};

pub const QUEUE_CAPACITY: usize = 10;

/// Destination for messages a device wants to transmit.
pub trait MessageQueue: Send + Sync {
    fn queue_message(&self, msg: Message) -> Result<(), EbusError>;
}

/// Entry point for externally originated requests (gateway, MQTT).
pub trait EbusSender: Send + Sync {
    fn send(&self, msg: &Message) -> Result<(), EbusError>;
}

/// FIFO shared between producers and the engine.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: Mutex<Deque<Message, QUEUE_CAPACITY>>,
    dropped: AtomicU32,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MessageQueue for OutboundQueue {
    fn queue_message(&self, msg: Message) -> Result<(), EbusError> {
        let result = self.queue.lock().push_back(msg);
        match result {
            Ok(()) => Ok(()),
            Err(msg) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("queue full, dropping {}", msg);
                Err(EbusError::QueueFull)
            }
        }
    }
}

impl EbusSender for OutboundQueue {
    fn send(&self, msg: &Message) -> Result<(), EbusError> {
        let mut msg = msg.clone();
        msg.finalize();
        self.queue_message(msg)
    }
}

/// Queue for buses that never reach the wire.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardQueue;

impl MessageQueue for DiscardQueue {
    fn queue_message(&self, msg: Message) -> Result<(), EbusError> {
        debug!("proxy queue: {}", msg);
        Ok(())
    }
}

/// Where the bus writes its side of an exchange.
pub trait ReplySink {
    fn send_ack(&mut self) -> Result<(), EbusError>;
    fn send_nak(&mut self) -> Result<(), EbusError>;
    fn send_response(&mut self, response: &Response) -> Result<(), EbusError>;
}

/// Records replies instead of transmitting them.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    pub acked: bool,
    pub naked: bool,
    pub response: Option<Response>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplySink for CaptureSink {
    fn send_ack(&mut self) -> Result<(), EbusError> {
        self.acked = true;
        Ok(())
    }

    fn send_nak(&mut self) -> Result<(), EbusError> {
        self.naked = true;
        Ok(())
    }

    fn send_response(&mut self, response: &Response) -> Result<(), EbusError> {
        self.response = Some(response.clone());
        Ok(())
    }
}

/// Ordered, duplicate free device registry.
#[derive(Default)]
pub struct Bus {
    devices: Vec<Box<dyn Device>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, device: Box<dyn Device>) -> Result<(), EbusError> {
        let addr = device.slave_address();
        if self.device(addr).is_some() {
            error!("device {:02x} already registered", addr);
            return Err(EbusError::DuplicateDevice(addr));
        }
        info!("added device {:02x} {}", addr, device.name());
        self.devices.push(device);
        Ok(())
    }

    pub fn remove_device(&mut self, addr: u8) -> Option<Box<dyn Device>> {
        let pos = self.devices.iter().position(|d| d.slave_address() == addr)?;
        Some(self.devices.remove(pos))
    }

    pub fn device(&self, addr: u8) -> Option<&(dyn Device + 'static)> {
        self.devices
            .iter()
            .find(|d| d.slave_address() == addr)
            .map(|d| &**d)
    }

    pub fn device_mut(&mut self, addr: u8) -> Option<&mut (dyn Device + 'static)> {
        self.devices
            .iter_mut()
            .find(|d| d.slave_address() == addr)
            .map(|d| &mut **d)
    }

    /// Registered devices in insertion order.
    pub fn devices(&self) -> &[Box<dyn Device>] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Dispatches a completed request and writes ACK/NAK and the response
    /// into `sink`. Unknown destinations stay silent.
    pub fn process_message(&mut self, msg: &Message, sink: &mut dyn ReplySink) -> Result<(), EbusError> {
        if msg.is_broadcast() {
            self.process_broadcast_message(msg);
            return Ok(());
        }
        let Some(outcome) = self.process_slave_message(msg) else {
            trace!("no device for {:02x}", msg.dest);
            return Ok(());
        };
        match outcome {
            Ok(response) => {
                sink.send_ack()?;
                if let Some(mut response) = response {
                    response.finalize();
                    sink.send_response(&response)?;
                }
                Ok(())
            }
            Err(e) => {
                debug!("request {} rejected: {}", msg, e);
                sink.send_nak()
            }
        }
    }

    /// Looks up the addressed device and runs it without emitting anything.
    /// `None` when no device owns the destination.
    pub fn process_slave_message(&mut self, msg: &Message) -> Option<Result<Option<Response>, EbusError>> {
        let key = dispatch_key(msg.dest);
        let device = self.device_mut(key)?;
        trace!("found device {}", device.name());
        if !msg.is_valid_crc() {
            error!("bad crc for {}", msg);
            return Some(Err(EbusError::CrcMismatch {
                computed: msg.compute_crc(),
                received: msg.crc,
            }));
        }
        Some(device.process_slave_message(msg))
    }

    pub fn process_broadcast_message(&mut self, msg: &Message) {
        for device in &mut self.devices {
            device.process_broadcast_message(msg);
        }
    }

    /// Routes a response to the device that sent the request.
    pub fn process_response(
        &mut self,
        msg: &Message,
        response: &Response,
        sink: &mut dyn ReplySink,
    ) -> Result<(), EbusError> {
        let key = dispatch_key(msg.source);
        let Some(device) = self.device_mut(key) else {
            return Ok(());
        };
        let accepted =
            msg.is_valid_crc() && response.is_valid_crc() && device.process_response(msg, response);
        if accepted {
            sink.send_ack()
        } else {
            sink.send_nak()
        }
    }

    pub fn process_timers(&mut self) {
        for device in &mut self.devices {
            let tick = device.identity().tick();
            if device.process_timer(tick) {
                device.identity_mut().advance();
            }
        }
    }

    pub fn start(&mut self) {
        for device in &mut self.devices {
            device.start();
        }
    }
}
