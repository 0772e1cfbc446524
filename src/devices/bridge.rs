//! Mixer bridge: a device on the outer bus that owns a bus of its own.
//!
//! Heating-circuit commands are rewritten onto the inner boiler address and
//! answered synchronously; `b517` carries an arbitrary request whose answer
//! comes back later as a `b518` message on the outer bus.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::{Bus, CaptureSink, DiscardQueue, MessageQueue};
use crate::device::{Device, DeviceIdentity};
use crate::error::{ConfigError, EbusError};
use crate::frame::{Message, Payload, Response};

pub const TUNNEL_REQUEST: u16 = 0xb517;
pub const TUNNEL_RESPONSE: u16 = 0xb518;
/// Inner slave every proxied command is addressed to.
pub const INNER_TARGET: u8 = 0x08;

const PROXIED: [u16; 5] = [0xb510, 0xb511, 0xb512, 0xb513, 0xb516];

pub struct BridgeDevice {
    identity: DeviceIdentity,
    inner: Bus,
}

impl BridgeDevice {
    /// `index` is the address switch: 2 selects master 0x13, 3 selects 0x33.
    pub fn new(index: u8, parent: Arc<dyn MessageQueue>) -> Result<Self, EbusError> {
        let master = match index {
            2 => 0x13,
            3 => 0x33,
            other => {
                return Err(ConfigError::Invalid {
                    key: "devices.bridge",
                    reason: format!("bridge index {other} not in 2..=3"),
                }
                .into())
            }
        };
        Ok(Self {
            identity: DeviceIdentity::master(master, parent, "V32  ", 0xb5, 0x0117, 0x9802),
            inner: Bus::new(),
        })
    }

    /// Queue handed to inner devices. Their traffic never reaches the wire.
    pub fn inner_queue() -> Arc<dyn MessageQueue> {
        Arc::new(DiscardQueue)
    }

    pub fn add_device(&mut self, device: Box<dyn Device>) -> Result<(), EbusError> {
        self.inner.add_device(device)
    }

    pub fn inner(&self) -> &Bus {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Bus {
        &mut self.inner
    }

    fn master(&self) -> u8 {
        self.identity.master_address().unwrap_or_default()
    }

    fn dispatch(&mut self, msg: &Message) -> Result<CaptureSink, EbusError> {
        let mut sink = CaptureSink::new();
        self.inner.process_message(msg, &mut sink)?;
        Ok(sink)
    }

    fn proxy(&mut self, msg: &Message) -> Result<Option<Response>, EbusError> {
        let inner_msg = Message::with_payload(self.master(), INNER_TARGET, msg.command, msg.payload())?;
        let sink = self.dispatch(&inner_msg)?;
        if sink.acked {
            Ok(sink.response)
        } else {
            Err(EbusError::InvalidRequest { command: msg.command })
        }
    }

    fn tunnel(&mut self, msg: &Message) -> Result<Option<Response>, EbusError> {
        let invalid = || EbusError::InvalidRequest { command: msg.command };
        let p = msg.payload();
        if p.len() < 4 || p.len() != 4 + usize::from(p[3]) {
            return Err(invalid());
        }
        let inner_msg = Message::with_payload(
            self.master(),
            p[0],
            u16::from_be_bytes([p[1], p[2]]),
            &p[4..],
        )?;
        debug!("{}: tunnel {}", self.identity.name, inner_msg);
        let sink = self.dispatch(&inner_msg)?;

        if let Some(response) = &sink.response {
            let reply = Message::with_payload(self.master(), msg.source, TUNNEL_RESPONSE, response.payload())?;
            debug!("{}: queued {}", self.identity.name, reply);
            if let Err(e) = self.identity.queue_message(reply) {
                warn!("{}: tunnel reply lost: {}", self.identity.name, e);
            }
        }

        if sink.acked {
            Ok(None)
        } else {
            Err(invalid())
        }
    }
}

impl Device for BridgeDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DeviceIdentity {
        &mut self.identity
    }

    fn process_slave_message(&mut self, msg: &Message) -> Result<Option<Response>, EbusError> {
        match msg.command {
            TUNNEL_REQUEST => self.tunnel(msg),
            cmd if PROXIED.contains(&cmd) => self.proxy(msg),
            _ => self.identity.answer_identify(msg),
        }
    }

    fn process_timer(&mut self, tick: u32) -> bool {
        self.inner.process_timers();
        if let Err(e) = self.identity.broadcast_identity(tick) {
            warn!("{}: identity broadcast failed: {}", self.identity.name, e);
        }
        true
    }

    fn start(&mut self) {
        self.identity.arm();
        info!("{}: starting at {:02x}, {} inner devices", self.identity.name, self.identity.slave, self.inner.len());
        self.inner.start();
    }
}
