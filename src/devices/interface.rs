use core::fmt;
use std::sync::Arc;

use tracing::info;

use crate::bus::MessageQueue;
use crate::device::{Device, DeviceIdentity};
use crate::error::EbusError;
use crate::frame::{Message, Payload, Response};

pub const INTERFACE_MASTER: u8 = 0x71;
pub const DATETIME_COMMAND: u16 = 0xb516;

/// Date and time as carried by the `b516 00` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusDateTime {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub weekday: u8,
    pub year: u8,
}

impl BusDateTime {
    fn decode(msg: &Message) -> Option<Self> {
        Some(Self {
            second: msg.read_bcd(1)?,
            minute: msg.read_bcd(2)?,
            hour: msg.read_bcd(3)?,
            day: msg.read_bcd(4)?,
            month: msg.read_bcd(5)?,
            weekday: msg.read_u8(6)? & 0x07,
            year: msg.read_bcd(7)?,
        })
    }
}

impl fmt::Display for BusDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// The gateway's own station on the bus.
///
/// Decodes the controller's date/time and outside temperature broadcasts
/// and accepts every response to requests sent under its address.
pub struct InterfaceDevice {
    identity: DeviceIdentity,
    datetime: Option<BusDateTime>,
    outside_temp: Option<f32>,
}

impl InterfaceDevice {
    pub fn new(master: u8, queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            identity: DeviceIdentity::master(master, queue, "DBG01", 0x10, 0x0102, 0x0304),
            datetime: None,
            outside_temp: None,
        }
    }

    pub fn datetime(&self) -> Option<BusDateTime> {
        self.datetime
    }

    pub fn outside_temp(&self) -> Option<f32> {
        self.outside_temp
    }
}

impl Device for InterfaceDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DeviceIdentity {
        &mut self.identity
    }

    fn process_slave_message(&mut self, msg: &Message) -> Result<Option<Response>, EbusError> {
        self.identity.answer_identify(msg)
    }

    fn process_broadcast_message(&mut self, msg: &Message) {
        if msg.command != DATETIME_COMMAND {
            return;
        }
        match msg.read_u8(0) {
            Some(0) => {
                if let Some(dt) = BusDateTime::decode(msg) {
                    info!("broadcast datetime: {}", dt);
                    self.datetime = Some(dt);
                }
            }
            Some(1) => {
                if let Some(temp) = msg.read_data2b(1) {
                    info!("broadcast outside: {:.1}", temp);
                    self.outside_temp = Some(temp);
                }
            }
            _ => {}
        }
    }

    fn process_response(&mut self, _msg: &Message, _response: &Response) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DiscardQueue;
    use crate::frame::BROADCAST;

    #[test]
    fn test_decodes_datetime_broadcast() {
        let mut dev = InterfaceDevice::new(INTERFACE_MASTER, Arc::new(DiscardQueue));
        let msg = Message::with_payload(
            0x10,
            BROADCAST,
            DATETIME_COMMAND,
            &[0x00, 0x46, 0x10, 0x15, 0x05, 0x09, 0x04, 0x24],
        )
        .unwrap();
        assert_eq!(msg.crc, 0xcb);
        dev.process_broadcast_message(&msg);
        let dt = dev.datetime().unwrap();
        assert_eq!(dt.to_string(), "2024-09-05 15:10:46");
        assert_eq!(dt.weekday, 4);
    }

    #[test]
    fn test_decodes_outside_temperature() {
        let mut dev = InterfaceDevice::new(INTERFACE_MASTER, Arc::new(DiscardQueue));
        let msg = Message::with_payload(0x10, BROADCAST, DATETIME_COMMAND, &[0x01, 0x80, 0x0d]).unwrap();
        dev.process_broadcast_message(&msg);
        assert_eq!(dev.outside_temp(), Some(13.5));
    }
}
