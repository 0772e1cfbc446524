//! # eBUS Gateway
//!
//! Bridges a heating-appliance eBUS line to IP: an ebusd compatible TCP
//! adapter and an MQTT feed, plus a set of emulated devices answering on
//! the bus.
//!
//! ## Features
//!
//! - **Wire format**: byte-exact framing, CRC-8 and SYN/ESC escaping
//! - **Stream engine**: arbitration, request/ACK/response/ACK exchange and
//!   SYN generation on a shared multi-master line
//! - **Device registry**: emulated slaves, including a bridge that serves
//!   its own inner bus
//! - **Gateway**: ebusd "enhanced" adapter protocol over TCP
//! - **Bounded memory**: frames and the outbound queue are fixed capacity
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ebusgw::{Bus, EngineConfig, Message, OutboundQueue, StreamEngine};
//! use ebusgw::transport::{MemoryTransport, ManualClock};
//!
//! let line = MemoryTransport::with_echo();
//! let queue = Arc::new(OutboundQueue::new());
//! let mut engine = StreamEngine::new(
//!     line.clone(),
//!     ManualClock::new(),
//!     Bus::new(),
//!     queue,
//!     EngineConfig::new(0x71),
//! );
//!
//! line.push_input(&[0xaa]);
//! while engine.run_once().unwrap() {}
//! ```
//!
//! ## Architecture
//!
//! - [`crc`] / [`frame`] - checksum, frames, escaping
//! - [`device`] / [`devices`] - device contract and emulated devices
//! - [`bus`] - registry, reply sinks, outbound queue
//! - [`engine`] - byte stream state machine
//! - [`gateway`] / [`mqtt`] - network surfaces
//! - [`system`] - startup wiring

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::float_cmp)]

pub mod bus;
pub mod config;
pub mod crc;
pub mod device;
pub mod devices;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod monitor;
pub mod mqtt;
pub mod system;
pub mod transport;

// Re-export main public types for convenience
pub use bus::{Bus, CaptureSink, EbusSender, MessageQueue, OutboundQueue, ReplySink};
pub use config::Config;
pub use device::{Device, DeviceIdentity};
pub use engine::{EngineConfig, EngineState, StreamEngine};
pub use error::{EbusError, FrameError};
pub use frame::{Message, Payload, Response};
pub use monitor::{BusEvent, EbusMonitor, EventHub};
