use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::MessageQueue;
use crate::device::{Device, DeviceIdentity, IDENTITY_PERIOD};
use crate::error::{ConfigError, EbusError};
use crate::frame::{Message, Payload, Response};

pub const ROOM_UNIT_COMMAND: u16 = 0xb524;
/// Controller the room unit reports to.
pub const CONTROLLER_ADDRESS: u8 = 0x15;

const QUERY: u8 = 0x08;
const REG_HUMIDITY: u16 = 0x07;
const REG_TEMPERATURE: u16 = 0x0f;

/// Slave addresses by switch position 1..=8.
const SLAVE_ADDRESSES: [u8; 8] = [0x35, 0x75, 0xf5, 0x1c, 0x3c, 0x7c, 0xfc, 0x06];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    Off,
    Auto,
    Day,
    Setback,
    Other(u8),
}

impl From<u8> for RoomMode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::Auto,
            2 => Self::Day,
            3 => Self::Setback,
            other => Self::Other(other),
        }
    }
}

/// Wireless room sensor: learns its zone from the controller, then
/// reports temperature and humidity once a minute.
pub struct RoomUnitDevice {
    identity: DeviceIdentity,
    zone: Option<u8>,
    mode: RoomMode,
    desired_temp: f32,
    temperature: f32,
    humidity: f32,
}

impl RoomUnitDevice {
    pub fn new(switch_index: u8, queue: Arc<dyn MessageQueue>) -> Result<Self, EbusError> {
        let slave = usize::from(switch_index)
            .checked_sub(1)
            .and_then(|i| SLAVE_ADDRESSES.get(i))
            .copied()
            .ok_or_else(|| ConfigError::Invalid {
                key: "devices.room_unit",
                reason: format!("switch index {switch_index} outside 1..=8"),
            })?;
        Ok(Self {
            identity: DeviceIdentity::master(slave.wrapping_sub(5), queue, "VR_91", 0xb5, 0x0200, 0x1903),
            zone: None,
            mode: RoomMode::Off,
            desired_temp: 0.0,
            temperature: 16.5,
            humidity: 49.5,
        })
    }

    pub fn zone(&self) -> Option<u8> {
        self.zone
    }

    pub fn mode(&self) -> RoomMode {
        self.mode
    }

    pub fn desired_temp(&self) -> f32 {
        self.desired_temp
    }

    pub fn set_reading(&mut self, temperature: f32, humidity: f32) {
        self.temperature = temperature;
        self.humidity = humidity;
    }

    fn master(&self) -> u8 {
        self.identity.master_address().unwrap_or_default()
    }

    fn query(&self) -> Result<(), EbusError> {
        let msg = Message::with_payload(self.master(), CONTROLLER_ADDRESS, ROOM_UNIT_COMMAND, &[QUERY])?;
        self.identity.queue_message(msg)
    }

    fn send_reading(&self, register: u16, value: f32) -> Result<(), EbusError> {
        let Some(zone) = self.zone else {
            debug!("{}: zone unknown, reading not sent", self.identity.name);
            return Ok(());
        };
        let mut msg = Message::new(self.master(), CONTROLLER_ADDRESS, ROOM_UNIT_COMMAND);
        // write, remote sensor, zone
        msg.add_bytes(&[0x06, 0x01, 0x0a, zone.wrapping_add(1)])?;
        msg.add_word(register)?;
        msg.add_exp(value)?;
        msg.finalize();
        self.identity.queue_message(msg)
    }
}

impl Device for RoomUnitDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DeviceIdentity {
        &mut self.identity
    }

    fn process_slave_message(&mut self, msg: &Message) -> Result<Option<Response>, EbusError> {
        self.identity.answer_identify(msg)
    }

    fn process_response(&mut self, msg: &Message, response: &Response) -> bool {
        if msg.command != ROOM_UNIT_COMMAND || msg.read_u8(0) != Some(QUERY) || response.len() != 8 {
            return false;
        }
        let p = response.payload();
        self.zone = Some(p[0]);
        self.mode = RoomMode::from(p[2]);
        self.desired_temp = response.read_data1c(6).unwrap_or(f32::NAN);
        info!(
            "{}: zone {} mode {:?} desired {:.1}",
            self.identity.name, p[0], self.mode, self.desired_temp
        );
        true
    }

    fn process_timer(&mut self, tick: u32) -> bool {
        let sent = match tick % IDENTITY_PERIOD {
            1 => self.query(),
            10 => self.send_reading(REG_TEMPERATURE, self.temperature),
            15 => self.send_reading(REG_HUMIDITY, self.humidity),
            _ => Ok(()),
        };
        if let Err(e) = sent {
            warn!("{}: {}", self.identity.name, e);
        }
        if let Err(e) = self.identity.broadcast_identity(tick) {
            warn!("{}: identity broadcast failed: {}", self.identity.name, e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutboundQueue;

    #[test]
    fn test_switch_index_selects_address() {
        let queue = Arc::new(OutboundQueue::new());
        let dev = RoomUnitDevice::new(1, queue.clone()).unwrap();
        assert_eq!(dev.slave_address(), 0x35);
        assert_eq!(dev.identity().master_address(), Some(0x30));
        let dev = RoomUnitDevice::new(8, queue.clone()).unwrap();
        assert_eq!(dev.slave_address(), 0x06);
        assert!(RoomUnitDevice::new(0, queue.clone()).is_err());
        assert!(RoomUnitDevice::new(9, queue).is_err());
    }

    #[test]
    fn test_learns_zone_then_reports() {
        let queue = Arc::new(OutboundQueue::new());
        let mut dev = RoomUnitDevice::new(1, queue.clone()).unwrap();

        assert!(dev.process_timer(10));
        assert!(queue.is_empty());

        assert!(dev.process_timer(61));
        let query = queue.pop().unwrap();
        assert_eq!((query.source, query.dest, query.command), (0x30, 0x15, 0xb524));
        assert_eq!(query.payload(), &[0x08]);

        let rsp = Response::with_payload(&[0x00, 0x00, 0x01, 0x01, 0x0c, 0x01, 0x2e, 0x30]).unwrap();
        assert!(dev.process_response(&query, &rsp));
        assert_eq!(dev.zone(), Some(0));
        assert_eq!(dev.mode(), RoomMode::Auto);
        assert_eq!(dev.desired_temp(), 23.0);

        assert!(dev.process_timer(70));
        let reading = queue.pop().unwrap();
        assert_eq!(&reading.payload()[..6], &[0x06, 0x01, 0x0a, 0x01, 0x0f, 0x00]);
        assert_eq!(&reading.payload()[6..], &16.5f32.to_le_bytes());
        assert!(reading.is_valid_crc());
    }
}
