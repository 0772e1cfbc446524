use std::sync::Arc;

use arrayvec::ArrayString;
use tracing::{debug, info, warn};

use crate::bus::MessageQueue;
use crate::error::{EbusError, FrameError};
use crate::frame::{slave_of, Message, Payload, Response, BROADCAST, IDENTIFY_COMMAND};

pub const NAME_LEN: usize = 5;
/// Identity broadcast period in device ticks.
pub const IDENTITY_PERIOD: u32 = 60;

pub type DeviceName = ArrayString<NAME_LEN>;

/// Outbound capability of a device that also acts as a bus master.
#[derive(Clone)]
pub struct MasterLink {
    pub address: u8,
    pub queue: Arc<dyn MessageQueue>,
}

/// Identity words plus the one-second tick counter every device carries.
pub struct DeviceIdentity {
    pub slave: u8,
    pub name: DeviceName,
    pub manufacturer: u8,
    pub sw_version: u16,
    pub hw_version: u16,
    link: Option<MasterLink>,
    tick: u32,
}

impl DeviceIdentity {
    /// Slave-only identity. Names are space padded or truncated to five characters.
    pub fn new(slave: u8, name: &str, manufacturer: u8, sw_version: u16, hw_version: u16) -> Self {
        Self {
            slave,
            name: pad_name(name),
            manufacturer,
            sw_version,
            hw_version,
            link: None,
            tick: 0,
        }
    }

    /// Identity for a master; the slave address is derived from it.
    pub fn master(
        master: u8,
        queue: Arc<dyn MessageQueue>,
        name: &str,
        manufacturer: u8,
        sw_version: u16,
        hw_version: u16,
    ) -> Self {
        let mut identity = Self::new(slave_of(master), name, manufacturer, sw_version, hw_version);
        identity.link = Some(MasterLink { address: master, queue });
        identity
    }

    pub fn master_address(&self) -> Option<u8> {
        self.link.as_ref().map(|l| l.address)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Sets the tick phase so identity broadcasts of different masters spread out.
    pub fn arm(&mut self) {
        self.tick = self
            .master_address()
            .map_or(0, |m| u32::from(m) % IDENTITY_PERIOD);
    }

    /// Queues a request on the master link.
    pub fn queue_message(&self, msg: Message) -> Result<(), EbusError> {
        match &self.link {
            Some(link) => link.queue.queue_message(msg),
            None => {
                debug!("{}: no master link, dropping {}", self.name, msg);
                Ok(())
            }
        }
    }

    pub fn write_id<P: Payload>(&self, frame: &mut P) -> Result<(), FrameError> {
        frame.add_u8(self.manufacturer)?;
        let mut name = [b' '; NAME_LEN];
        for (dst, src) in name.iter_mut().zip(self.name.as_bytes()) {
            *dst = *src;
        }
        frame.add_bytes(&name)?;
        frame.add_version(self.sw_version)?;
        frame.add_version(self.hw_version)
    }

    /// Handles the identify command; anything else is unknown.
    pub fn answer_identify(&self, msg: &Message) -> Result<Option<Response>, EbusError> {
        if msg.command == IDENTIFY_COMMAND && msg.is_empty() {
            let mut response = Response::new();
            self.write_id(&mut response)?;
            return Ok(Some(response));
        }
        warn!("{}: unknown command {:04x}", self.name, msg.command);
        Err(EbusError::UnknownCommand(msg.command))
    }

    /// Queues `master -> FE 0704 <id>` on the period boundary. Returns whether
    /// a broadcast was queued.
    pub fn broadcast_identity(&self, tick: u32) -> Result<bool, EbusError> {
        let Some(master) = self.master_address() else {
            return Ok(false);
        };
        if tick % IDENTITY_PERIOD != 0 {
            return Ok(false);
        }
        info!("{}: sending identity", self.name);
        let mut msg = Message::new(master, BROADCAST, IDENTIFY_COMMAND);
        self.write_id(&mut msg)?;
        msg.finalize();
        self.queue_message(msg)?;
        Ok(true)
    }
}

fn pad_name(name: &str) -> DeviceName {
    let mut out = DeviceName::new();
    for c in name.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    while out.try_push(' ').is_ok() {}
    out
}

/// An emulated bus participant.
///
/// Dispatch is strictly serial: the engine calls at most one of these at a
/// time and never from inside another.
pub trait Device: Send {
    fn identity(&self) -> &DeviceIdentity;
    fn identity_mut(&mut self) -> &mut DeviceIdentity;

    /// `Ok` is acknowledged (with the optional response), `Err` is NAKed.
    fn process_slave_message(&mut self, msg: &Message) -> Result<Option<Response>, EbusError>;

    fn process_broadcast_message(&mut self, _msg: &Message) {}

    /// Answer to a request this device sent. `true` acknowledges it.
    fn process_response(&mut self, _msg: &Message, _response: &Response) -> bool {
        false
    }

    /// Called once per second. The tick counter only advances on `true`.
    fn process_timer(&mut self, tick: u32) -> bool {
        if let Err(e) = self.identity().broadcast_identity(tick) {
            warn!("{}: identity broadcast failed: {}", self.identity().name, e);
        }
        true
    }

    fn start(&mut self) {
        let identity = self.identity_mut();
        identity.arm();
        info!("{}: starting at {:02x}", identity.name, identity.slave);
    }

    fn slave_address(&self) -> u8 {
        self.identity().slave
    }

    fn name(&self) -> &str {
        self.identity().name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutboundQueue;

    #[test]
    fn test_name_padding() {
        assert_eq!(pad_name("V32").as_str(), "V32  ");
        assert_eq!(pad_name("TOOLONG").as_str(), "TOOLO");
    }

    #[test]
    fn test_identify_payload() {
        let id = DeviceIdentity::new(0x08, "BAI00", 0xb5, 0x0518, 0x7401);
        let msg = Message::with_payload(0x10, 0x08, IDENTIFY_COMMAND, &[]).unwrap();
        let rsp = id.answer_identify(&msg).unwrap().unwrap();
        assert_eq!(
            rsp.payload(),
            &[0xb5, b'B', b'A', b'I', b'0', b'0', 0x05, 0x18, 0x74, 0x01]
        );

        let other = Message::with_payload(0x10, 0x08, 0xb599, &[]).unwrap();
        assert!(matches!(id.answer_identify(&other), Err(EbusError::UnknownCommand(0xb599))));
    }

    #[test]
    fn test_identity_broadcast_phase() {
        let queue = Arc::new(OutboundQueue::new());
        let mut id = DeviceIdentity::master(0x71, queue.clone(), "DBG01", 0x10, 0x102, 0x304);
        id.arm();
        assert_eq!(id.tick(), 0x71 % 60);
        assert_eq!(id.slave, 0x76);
        assert!(!id.broadcast_identity(59).unwrap());
        assert!(id.broadcast_identity(60).unwrap());
        let msg = queue.pop().unwrap();
        assert_eq!((msg.source, msg.dest, msg.command), (0x71, BROADCAST, IDENTIFY_COMMAND));
        assert!(msg.is_valid_crc());
    }
}
