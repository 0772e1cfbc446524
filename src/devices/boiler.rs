use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::bus::MessageQueue;
use crate::device::{Device, DeviceIdentity};
use crate::error::EbusError;
use crate::frame::{Message, Payload, Response};

pub const BOILER_MASTER: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeatingMode {
    Auto,
    Off,
    Heat,
    Water,
    Other(u8),
}

impl From<u8> for HeatingMode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Auto,
            1 => Self::Off,
            2 => Self::Heat,
            3 => Self::Water,
            other => Self::Other(other),
        }
    }
}

/// Hot water cylinder mode codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum HotWaterMode {
    Disabled = 0,
    On = 1,
    Off = 2,
    Auto = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoilerState {
    pub heating_mode: HeatingMode,
    pub hot_water_mode: HotWaterMode,
    pub flow_desired: f32,
    pub hot_water_desired: f32,
    pub storage_desired: f32,
    pub heating_disabled: bool,
    pub hot_water_disabled: bool,
    pub circulation_speed: u8,

    pub flow_temp: f32,
    pub return_temp: f32,
    pub hot_water_temp: f32,
    pub storage_temp: f32,
    pub outside_temp: f32,
    pub pressure: f32,

    pub fan: bool,
    pub gas: bool,
    pub pump: bool,
    pub state_code: u8,
}

impl Default for BoilerState {
    fn default() -> Self {
        Self {
            heating_mode: HeatingMode::Auto,
            hot_water_mode: HotWaterMode::Auto,
            flow_desired: 0.5,
            hot_water_desired: 1.5,
            storage_desired: 2.5,
            heating_disabled: true,
            hot_water_disabled: true,
            circulation_speed: 0,
            flow_temp: 71.5,
            return_temp: 55.5,
            hot_water_temp: 61.5,
            storage_temp: 63.5,
            outside_temp: 13.5,
            pressure: 1.5,
            fan: false,
            gas: false,
            pump: false,
            state_code: 0,
        }
    }
}

/// Gas boiler controller answering the heating-circuit command set.
pub struct BoilerDevice {
    identity: DeviceIdentity,
    state: BoilerState,
}

impl BoilerDevice {
    pub fn new(master: u8, queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            identity: DeviceIdentity::master(master, queue, "BAI00", 0xb5, 0x0518, 0x7401),
            state: BoilerState::default(),
        }
    }

    pub fn state(&self) -> &BoilerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut BoilerState {
        &mut self.state
    }

    fn read_datetime(&self) -> Result<Response, EbusError> {
        let mut rsp = Response::new();
        // dcf state, s, m, h, then unset date
        rsp.add_bytes(&[0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff])?;
        rsp.add_data2c(self.state.outside_temp)?;
        Ok(rsp)
    }

    fn set_mode(&mut self, msg: &Message) -> Result<Response, EbusError> {
        if msg.len() != 9 {
            return Err(EbusError::InvalidRequest { command: msg.command });
        }
        let p = msg.payload();
        let flow = msg.read_data1c(2).unwrap_or(f32::NAN);
        let hot_water = msg.read_data1c(3).unwrap_or(f32::NAN);
        let flags = p[6];
        info!(
            "{}: set mode hc:{} flow:{:.1} hwc:{:.1} flags:{:02x}",
            self.identity.name, p[1], flow, hot_water, flags
        );
        if !flow.is_nan() {
            self.state.flow_desired = flow;
        }
        if !hot_water.is_nan() {
            self.state.hot_water_desired = hot_water;
        }
        self.state.heating_disabled = flags & 0x01 != 0;
        self.state.hot_water_disabled = flags & 0x04 != 0;
        self.state.heating_mode = HeatingMode::from(p[1]);
        Ok(Response::with_payload(&[0x01])?)
    }

    fn read_status(&self, msg: &Message) -> Result<Response, EbusError> {
        let s = &self.state;
        let mut rsp = Response::new();
        match (msg.len(), msg.read_u8(0)) {
            (1, Some(0)) => {
                rsp.add_data2c(s.flow_temp)?;
                rsp.add_u8((s.pressure * 10.0) as u8)?;
                rsp.add_u8(0)?;
                rsp.add_u8(s.state_code)?;
                let bits = u8::from(s.fan) | if s.gas { 0x06 } else { 0 } | if s.pump { 0x08 } else { 0 };
                rsp.add_u8(bits)?;
                rsp.add_u8(0)?; // errors
                rsp.add_u8(0)?; // demand flags
            }
            (1, Some(1)) => {
                rsp.add_data1c(s.flow_temp)?;
                rsp.add_data1c(s.return_temp)?;
                rsp.add_data2b(s.outside_temp)?;
                rsp.add_data1c(s.hot_water_temp)?;
                rsp.add_data1c(s.storage_temp)?;
                rsp.add_bytes(&[0x01, 0x00, 0xff])?;
            }
            (1, Some(2)) => {
                rsp.add_u8(s.hot_water_mode as u8)?;
                rsp.add_u8(s.hot_water_desired as u8)?;
                rsp.add_data1c(22.5)?;
                rsp.add_u8(27)?;
                rsp.add_data1c(s.storage_desired)?;
            }
            _ => return Err(EbusError::InvalidRequest { command: msg.command }),
        }
        Ok(rsp)
    }

    fn write_output(&mut self, msg: &Message) -> Result<Response, EbusError> {
        match (msg.len(), msg.read_u8(0), msg.read_u8(1)) {
            (2, Some(0), Some(speed)) => {
                info!("{}: set circulation {:02x}", self.identity.name, speed);
                self.state.circulation_speed = speed;
                Ok(Response::with_payload(&[0x00])?)
            }
            (2, Some(4), Some(value)) => {
                info!("{}: set output 4 {:02x}", self.identity.name, value);
                Ok(Response::with_payload(&[0x01, 0x01])?)
            }
            _ => Err(EbusError::InvalidRequest { command: msg.command }),
        }
    }
}

impl Device for BoilerDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DeviceIdentity {
        &mut self.identity
    }

    fn process_slave_message(&mut self, msg: &Message) -> Result<Option<Response>, EbusError> {
        match msg.command {
            0xb504 if msg.read_u8(0) == Some(0) => self.read_datetime().map(Some),
            0xb504 => Err(EbusError::InvalidRequest { command: msg.command }),
            0xb510 if msg.read_u8(0) == Some(0) => self.set_mode(msg).map(Some),
            0xb510 => Err(EbusError::InvalidRequest { command: msg.command }),
            0xb511 => self.read_status(msg).map(Some),
            0xb512 => self.write_output(msg).map(Some),
            0xb516 if msg.read_u8(0) == Some(0x11) => Ok(Some(Response::with_payload(&[0x00])?)),
            _ => self.identity.answer_identify(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DiscardQueue;

    fn boiler() -> BoilerDevice {
        BoilerDevice::new(BOILER_MASTER, Arc::new(DiscardQueue))
    }

    fn request(command: u16, payload: &[u8]) -> Message {
        Message::with_payload(0x10, 0x08, command, payload).unwrap()
    }

    #[test]
    fn test_status_block_one() {
        let mut dev = boiler();
        let rsp = dev.process_slave_message(&request(0xb511, &[0x01])).unwrap().unwrap();
        assert_eq!(rsp.len(), 9);
        assert_eq!(rsp.read_data1c(0), Some(71.5));
        assert_eq!(rsp.read_data1c(1), Some(55.5));
        assert_eq!(rsp.read_data2b(2), Some(13.5));
        assert_eq!(rsp.read_u8(8), Some(0xff));
    }

    #[test]
    fn test_set_mode_updates_targets() {
        let mut dev = boiler();
        let payload = [0x00, 0x02, 0x3c, 0x76, 0xff, 0xff, 0x05, 0x00, 0x00];
        let rsp = dev.process_slave_message(&request(0xb510, &payload)).unwrap().unwrap();
        assert_eq!(rsp.payload(), &[0x01]);
        let state = dev.state();
        assert_eq!(state.flow_desired, 30.0);
        assert_eq!(state.hot_water_desired, 59.0);
        assert!(state.heating_disabled);
        assert!(state.hot_water_disabled);
        assert_eq!(state.heating_mode, HeatingMode::Heat);
    }

    #[test]
    fn test_set_mode_keeps_targets_on_replacement_value() {
        let mut dev = boiler();
        let payload = [0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x00, 0xff, 0x00];
        dev.process_slave_message(&request(0xb510, &payload)).unwrap();
        assert_eq!(dev.state().flow_desired, 0.5);
        assert!(!dev.state().heating_disabled);
    }

    #[test]
    fn test_rejects_malformed_requests() {
        let mut dev = boiler();
        assert!(matches!(
            dev.process_slave_message(&request(0xb510, &[0x00, 0x01])),
            Err(EbusError::InvalidRequest { command: 0xb510 })
        ));
        assert!(dev.process_slave_message(&request(0xb511, &[0x05])).is_err());
        assert!(dev.process_slave_message(&request(0xb512, &[0x00])).is_err());
        assert!(matches!(
            dev.process_slave_message(&request(0xb513, &[])),
            Err(EbusError::UnknownCommand(0xb513))
        ));
    }

    #[test]
    fn test_circulation_pump() {
        let mut dev = boiler();
        let rsp = dev.process_slave_message(&request(0xb512, &[0x00, 0x64])).unwrap().unwrap();
        assert_eq!(rsp.payload(), &[0x00]);
        assert_eq!(dev.state().circulation_speed, 0x64);
    }
}
