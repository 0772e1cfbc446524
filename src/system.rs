//! Startup wiring: one context owns the shared queue, event hub and stop
//! flag and builds the device registry and engine from the configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::{Bus, EbusSender, MessageQueue, OutboundQueue};
use crate::config::Config;
use crate::devices::boiler::BOILER_MASTER;
use crate::devices::{BoilerDevice, BridgeDevice, InterfaceDevice, RoomUnitDevice};
use crate::engine::StreamEngine;
use crate::error::EbusError;
use crate::monitor::EventHub;
use crate::transport::{Clock, Transport};

pub struct SystemContext {
    pub config: Config,
    pub queue: Arc<OutboundQueue>,
    pub events: EventHub,
    pub stop: Arc<AtomicBool>,
}

impl SystemContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            queue: Arc::new(OutboundQueue::new()),
            events: EventHub::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sender(&self) -> Arc<dyn EbusSender> {
        self.queue.clone()
    }

    fn parent_queue(&self) -> Arc<dyn MessageQueue> {
        self.queue.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Registers the configured devices.
    pub fn build_bus(&self) -> Result<Bus, EbusError> {
        let devices = &self.config.devices;
        let mut bus = Bus::new();

        if devices.interface {
            bus.add_device(Box::new(InterfaceDevice::new(
                self.config.bus.master_address,
                self.parent_queue(),
            )))?;
        }

        match devices.bridge {
            Some(index) => {
                let mut bridge = BridgeDevice::new(index, self.parent_queue())?;
                if devices.boiler {
                    bridge.add_device(Box::new(BoilerDevice::new(
                        BOILER_MASTER,
                        BridgeDevice::inner_queue(),
                    )))?;
                }
                bus.add_device(Box::new(bridge))?;
            }
            None if devices.boiler => warn!("boiler needs a bridge, not emulated"),
            None => {}
        }

        if let Some(index) = devices.room_unit {
            bus.add_device(Box::new(RoomUnitDevice::new(index, self.parent_queue())?))?;
        }

        info!("{} devices on the bus", bus.len());
        Ok(bus)
    }

    /// Builds the engine with the event hub attached as monitor.
    pub fn build_engine<T: Transport, C: Clock>(
        &self,
        transport: T,
        clock: C,
    ) -> Result<StreamEngine<T, C>, EbusError> {
        let bus = self.build_bus()?;
        let mut engine = StreamEngine::new(
            transport,
            clock,
            bus,
            self.queue.clone(),
            self.config.bus.engine_config(),
        );
        engine.add_monitor(Arc::new(self.events.clone()));
        Ok(engine)
    }
}
