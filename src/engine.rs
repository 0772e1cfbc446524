//! Byte-stream state machine for the shared bus.
//!
//! Every byte on the line, including our own transmissions echoed back, is
//! fed through [`StreamEngine::feed`]. SYN delimits frames and opens an
//! arbitration slot; the engine tracks whether it is the node generating SYN
//! and drives device timers from the same loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{Bus, OutboundQueue, ReplySink};
use crate::error::EbusError;
use crate::frame::{
    escape, is_master, Message, MessageWriter, Response, ResponseWriter, Unescaper, WriteStatus,
    ACK, NAK, SYN,
};
use crate::monitor::EbusMonitor;
use crate::transport::{Clock, Transport};

pub const SYN_TIME_MS: u64 = 140;
/// A SYN seen this long after our own means another node is generating them.
pub const SYN_YIELD_MS: u64 = 10;
pub const DEVICE_TICK_MS: u64 = 1000;
pub const DEFAULT_LOCK_MAX: u8 = 5;
pub const DEFAULT_ARBITRATION_RETRIES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub master_address: u8,
    /// SYNs to sit out after a lost arbitration.
    pub lock_max: u8,
    pub arbitration_retries: u8,
}

impl EngineConfig {
    pub fn new(master_address: u8) -> Self {
        Self {
            master_address,
            lock_max: DEFAULT_LOCK_MAX,
            arbitration_retries: DEFAULT_ARBITRATION_RETRIES,
        }
    }

    /// Silence before this node starts generating SYN. Lower addresses
    /// step in sooner.
    pub fn syn_timeout_ms(&self) -> u64 {
        u64::from(self.master_address) * 10 + 10 + SYN_TIME_MS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    SlaveAckWait,
    ResponseWait,
    FinalAckWait,
    SuppressUntilSyn,
    ErrorUntilSyn,
    Arbitrating,
}

impl EngineState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SlaveAckWait => "slave-ack-wait",
            Self::ResponseWait => "response-wait",
            Self::FinalAckWait => "final-ack-wait",
            Self::SuppressUntilSyn => "suppress-until-syn",
            Self::ErrorUntilSyn => "error-until-syn",
            Self::Arbitrating => "arbitrating",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames: u32,
    pub broadcasts: u32,
    pub responses: u32,
    pub crc_errors: u32,
    pub request_naks: u32,
    pub missing_acks: u32,
    pub overflows: u32,
    pub arbitration_won: u32,
    pub arbitration_lost: u32,
    pub dropped_messages: u32,
}

/// Who is generating SYN and when the line timer fires next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynOwnership {
    pub owner: bool,
    pub last_sent: u64,
    pub deadline: u64,
}

/// Writes replies straight onto the line, escaped.
struct WireSink<'a, T: Transport> {
    transport: &'a mut T,
}

impl<T: Transport> WireSink<'_, T> {
    fn send_escaped(&mut self, bytes: &[u8]) -> Result<(), EbusError> {
        let wire = escape(bytes)?;
        self.transport.send(&wire)?;
        Ok(())
    }
}

impl<T: Transport> ReplySink for WireSink<'_, T> {
    fn send_ack(&mut self) -> Result<(), EbusError> {
        self.send_escaped(&[ACK])
    }

    fn send_nak(&mut self) -> Result<(), EbusError> {
        self.send_escaped(&[NAK])
    }

    fn send_response(&mut self, response: &Response) -> Result<(), EbusError> {
        self.send_escaped(&response.to_bytes())
    }
}

pub struct StreamEngine<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    bus: Bus,
    queue: Arc<OutboundQueue>,
    monitors: Vec<Arc<dyn EbusMonitor>>,
    config: EngineConfig,

    state: EngineState,
    unescaper: Unescaper,
    request: MessageWriter,
    response: ResponseWriter,
    current: Option<Message>,

    pending: Option<Message>,
    retries: u8,
    lock: u8,

    syn: SynOwnership,
    next_tick: u64,
    last_activity: u64,
    stats: EngineStats,
}

impl<T: Transport, C: Clock> StreamEngine<T, C> {
    pub fn new(transport: T, clock: C, bus: Bus, queue: Arc<OutboundQueue>, config: EngineConfig) -> Self {
        let now = clock.elapsed_ms();
        Self {
            transport,
            clock,
            bus,
            queue,
            monitors: Vec::new(),
            config,
            state: EngineState::Idle,
            unescaper: Unescaper::new(),
            request: MessageWriter::new(),
            response: ResponseWriter::new(),
            current: None,
            pending: None,
            retries: 0,
            lock: 0,
            syn: SynOwnership {
                owner: false,
                last_sent: 0,
                deadline: now + config.syn_timeout_ms(),
            },
            next_tick: now + DEVICE_TICK_MS,
            last_activity: now,
            stats: EngineStats::default(),
        }
    }

    pub fn add_monitor(&mut self, monitor: Arc<dyn EbusMonitor>) {
        self.monitors.push(monitor);
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats;
        stats.dropped_messages += self.queue.dropped();
        stats
    }

    pub fn lock_counter(&self) -> u8 {
        self.lock
    }

    pub fn is_syn_owner(&self) -> bool {
        self.syn.owner
    }

    pub fn syn_ownership(&self) -> SynOwnership {
        self.syn
    }

    pub fn pending(&self) -> Option<&Message> {
        self.pending.as_ref()
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts every device and arms the line and tick timers.
    pub fn start(&mut self) {
        info!("ebus starting, master {:02x}", self.config.master_address);
        self.bus.start();
        let now = self.clock.elapsed_ms();
        self.syn.deadline = now + self.syn_period();
        self.next_tick = now + DEVICE_TICK_MS;
    }

    /// Processes one byte as seen on the line.
    pub fn feed(&mut self, byte: u8) -> Result<(), EbusError> {
        let now = self.clock.elapsed_ms();
        if byte == SYN {
            self.on_syn(now)?;
        } else if let Some(byte) = self.unescaper.feed(byte) {
            self.on_data(byte)?;
        }
        self.last_activity = now;
        self.syn.deadline = now + self.syn_period();
        Ok(())
    }

    /// Fires the SYN generator and the device tick when due.
    pub fn poll_timers(&mut self) -> Result<(), EbusError> {
        let now = self.clock.elapsed_ms();
        if now >= self.syn.deadline {
            if !self.syn.owner {
                info!("becoming SYN generator");
                self.syn.owner = true;
            }
            self.transport.send(&[SYN])?;
            self.syn.last_sent = now;
            self.syn.deadline = now + self.syn_period();
        }
        if now >= self.next_tick {
            self.next_tick = now + DEVICE_TICK_MS;
            self.bus.process_timers();
        }
        Ok(())
    }

    /// Polls timers and consumes at most one byte. Returns whether a byte
    /// was read.
    pub fn run_once(&mut self) -> Result<bool, EbusError> {
        self.poll_timers()?;
        match self.transport.read_byte() {
            Ok(byte) => {
                self.feed(byte)?;
                Ok(true)
            }
            Err(nb::Error::WouldBlock) => Ok(false),
            Err(nb::Error::Other(e)) => {
                error!("line read failed: {}", e);
                Err(EbusError::TransportFatal(e))
            }
        }
    }

    /// Runs until `stop` is set or the transport fails.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), EbusError> {
        self.start();
        while !stop.load(Ordering::Relaxed) {
            if !self.run_once()? {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        info!("ebus stopped");
        Ok(())
    }

    fn syn_period(&self) -> u64 {
        if self.syn.owner {
            SYN_TIME_MS
        } else {
            self.config.syn_timeout_ms()
        }
    }

    fn on_syn(&mut self, now: u64) -> Result<(), EbusError> {
        let abandoned = std::mem::replace(&mut self.state, EngineState::Idle);
        self.log_abandoned(abandoned);
        self.request.reset();
        self.response.reset();
        self.unescaper.reset();
        self.current = None;

        if self.lock == 0 {
            if self.pending.is_none() {
                self.pending = self.queue.pop();
                self.retries = self.config.arbitration_retries;
            }
            if let Some(msg) = &self.pending {
                trace!("arbitrating as {:02x}", msg.source);
                self.transport.send(&[msg.source])?;
                self.state = EngineState::Arbitrating;
            }
        } else {
            self.lock -= 1;
        }

        if self.syn.owner && now.saturating_sub(self.syn.last_sent) > SYN_YIELD_MS {
            info!("received foreign SYN, yielding");
            self.syn.owner = false;
        }
        Ok(())
    }

    fn log_abandoned(&self, state: EngineState) {
        match state {
            EngineState::Idle if !self.request.is_empty() => {
                debug!("partial frame: {:02x?}", self.request.bytes());
            }
            EngineState::SlaveAckWait => debug!("no slave ack"),
            EngineState::ResponseWait => {
                debug!(
                    "incomplete response, {} bytes: {:02x?}",
                    self.response.written(),
                    self.response.bytes()
                );
            }
            EngineState::FinalAckWait => debug!("no master ack"),
            _ => {}
        }
    }

    fn on_data(&mut self, byte: u8) -> Result<(), EbusError> {
        match self.state {
            EngineState::Idle => self.on_request_byte(byte),
            EngineState::SlaveAckWait => {
                self.on_slave_ack(byte);
                Ok(())
            }
            EngineState::ResponseWait => self.on_response_byte(byte),
            EngineState::FinalAckWait => {
                if byte == ACK {
                    self.state = EngineState::SuppressUntilSyn;
                } else {
                    warn!("no ack for response: {:02x}", byte);
                    self.stats.missing_acks += 1;
                    self.state = EngineState::ErrorUntilSyn;
                }
                Ok(())
            }
            EngineState::SuppressUntilSyn => {
                debug!("unexpected data {:02x}", byte);
                Ok(())
            }
            EngineState::ErrorUntilSyn => {
                trace!("discarding {:02x}", byte);
                Ok(())
            }
            EngineState::Arbitrating => self.on_arbitration(byte),
        }
    }

    fn on_request_byte(&mut self, byte: u8) -> Result<(), EbusError> {
        match self.request.write(byte) {
            WriteStatus::Pending => Ok(()),
            WriteStatus::Overflow => {
                warn!("request overflow: {:02x?}", self.request.bytes());
                self.stats.overflows += 1;
                self.state = EngineState::ErrorUntilSyn;
                Ok(())
            }
            WriteStatus::Complete => {
                let Some(msg) = self.request.message() else {
                    self.state = EngineState::ErrorUntilSyn;
                    return Ok(());
                };
                self.stats.frames += 1;
                if !msg.is_valid_crc() {
                    let err = EbusError::CrcMismatch {
                        computed: msg.compute_crc(),
                        received: msg.crc,
                    };
                    warn!("X: {}: {}", msg, err);
                    self.stats.crc_errors += 1;
                    self.state = EngineState::ErrorUntilSyn;
                    return Ok(());
                }
                let mut sink = WireSink {
                    transport: &mut self.transport,
                };
                if msg.is_broadcast() {
                    info!("B: {}", msg);
                    self.stats.broadcasts += 1;
                    self.bus.process_message(&msg, &mut sink)?;
                    for monitor in &self.monitors {
                        monitor.notify_broadcast(&msg);
                    }
                    self.state = EngineState::SuppressUntilSyn;
                } else {
                    debug!("r: {}", msg);
                    self.bus.process_message(&msg, &mut sink)?;
                    self.state = EngineState::SlaveAckWait;
                }
                self.current = Some(msg);
                Ok(())
            }
        }
    }

    fn on_slave_ack(&mut self, byte: u8) {
        let dest = self.current.as_ref().map_or(0, |m| m.dest);
        match byte {
            ACK if is_master(dest) => self.state = EngineState::SuppressUntilSyn,
            ACK => self.state = EngineState::ResponseWait,
            NAK => {
                debug!("request NAKed");
                self.stats.request_naks += 1;
                self.state = EngineState::ErrorUntilSyn;
            }
            other => {
                let err = EbusError::ProtocolViolation {
                    state: EngineState::SlaveAckWait.name(),
                    byte: other,
                };
                warn!("{}", err);
                self.stats.missing_acks += 1;
                self.state = EngineState::ErrorUntilSyn;
            }
        }
    }

    fn on_response_byte(&mut self, byte: u8) -> Result<(), EbusError> {
        match self.response.write(byte) {
            WriteStatus::Pending => Ok(()),
            WriteStatus::Overflow => {
                warn!("response overflow: {:02x?}", self.response.bytes());
                self.stats.overflows += 1;
                self.state = EngineState::ErrorUntilSyn;
                Ok(())
            }
            WriteStatus::Complete => {
                let (Some(msg), Some(response)) = (self.current.as_ref(), self.response.response()) else {
                    self.state = EngineState::ErrorUntilSyn;
                    return Ok(());
                };
                if !response.is_valid_crc() {
                    warn!("bad response crc: {}", response);
                    self.stats.crc_errors += 1;
                    self.state = EngineState::ErrorUntilSyn;
                    return Ok(());
                }
                debug!("  c: {}", response);
                self.stats.responses += 1;
                let mut sink = WireSink {
                    transport: &mut self.transport,
                };
                self.bus.process_response(msg, &response, &mut sink)?;
                for monitor in &self.monitors {
                    monitor.notify(msg, &response);
                }
                self.state = EngineState::FinalAckWait;
                Ok(())
            }
        }
    }

    fn on_arbitration(&mut self, byte: u8) -> Result<(), EbusError> {
        // the winning address is also the first byte of the frame
        self.request.write(byte);
        self.state = EngineState::Idle;
        let Some(msg) = self.pending.take() else {
            return Ok(());
        };
        if byte == msg.source {
            self.stats.arbitration_won += 1;
            let bytes = msg.to_bytes();
            let wire = escape(&bytes[1..])?;
            self.transport.send(&wire)?;
            return Ok(());
        }

        let err = EbusError::ArbitrationLost {
            attempted: msg.source,
            winner: byte,
        };
        info!("{}", err);
        self.stats.arbitration_lost += 1;
        self.lock = self.config.lock_max;
        if self.retries == 0 {
            warn!("giving up on {}", msg);
            self.stats.dropped_messages += 1;
        } else {
            self.retries -= 1;
            self.pending = Some(msg);
        }
        Ok(())
    }
}
