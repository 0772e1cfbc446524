use crate::device::{Device, DeviceIdentity};
use crate::error::EbusError;
use crate::frame::{Message, Response};

/// Device that only answers the identify command.
pub struct GenericDevice {
    identity: DeviceIdentity,
}

impl GenericDevice {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self { identity }
    }
}

impl Device for GenericDevice {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut DeviceIdentity {
        &mut self.identity
    }

    fn process_slave_message(&mut self, msg: &Message) -> Result<Option<Response>, EbusError> {
        self.identity.answer_identify(msg)
    }
}
