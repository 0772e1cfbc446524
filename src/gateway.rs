//! ebusd "enhanced" adapter protocol over TCP.
//!
//! Each symbol is a `(command, data)` pair. Plain received data below 0x80
//! travels as one raw byte; everything else as two bytes
//! `11cc ccdd` `10dd dddd`.
//!
//! The protocol state lives in [`GatewaySession`], which is pure: it takes
//! decoded input and bus events and appends the bytes to send back. The
//! socket plumbing in [`run_gateway`] only moves bytes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use heapless::Vec as BoundedVec;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time;
use tracing::{debug, info, warn};

use crate::bus::EbusSender;
use crate::config::GatewayConfig;
use crate::frame::{Message, MessageWriter, Response, WriteStatus, ACK, BROADCAST, SYN};
use crate::monitor::BusEvent;

pub const CMD_INIT: u8 = 0;
pub const CMD_DATA: u8 = 1;
pub const CMD_START: u8 = 2;
pub const CMD_INFO: u8 = 3;

pub const TIMER_PERIOD: Duration = Duration::from_millis(200);
/// Timer ticks a pending exchange may stay open.
pub const MAX_MISSED_TICKS: u8 = 5;

const INFO_REPLY: [u8; 18] = [
    0xcc, 0x88, 0xcc, 0x91, 0xcc, 0x80, 0xcc, 0x81, 0xcc, 0xb2, 0xcc, 0x81, 0xcc, 0x92, 0xcc, 0x83,
    0xcc, 0x84,
];

pub type Encoded = BoundedVec<u8, 2>;

pub fn encode(cmd: u8, data: u8) -> Encoded {
    let mut out = Encoded::new();
    if cmd == CMD_DATA && data < 0x80 {
        let _ = out.push(data);
    } else {
        let _ = out.push(0xc0 | ((cmd & 0x0f) << 2) | (data >> 6));
        let _ = out.push(0x80 | (data & 0x3f));
    }
    out
}

fn encode_into(out: &mut Vec<u8>, cmd: u8, data: u8) {
    out.extend_from_slice(&encode(cmd, data));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("second byte {0:#04x} without a first")]
    OrphanSecond(u8),
    #[error("raw byte {byte:#04x} while {pending:#04x} is pending")]
    UnexpectedRaw { byte: u8, pending: u8 },
    #[error("first byte {byte:#04x} replaces pending {pending:#04x}")]
    UnexpectedFirst { byte: u8, pending: u8 },
}

/// Rebuilds `(command, data)` pairs from the client byte stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayDecoder {
    pending: Option<u8>,
}

impl GatewayDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, byte: u8) -> Result<Option<(u8, u8)>, DecodeError> {
        match byte & 0xc0 {
            0xc0 => match self.pending.replace(byte) {
                Some(pending) => Err(DecodeError::UnexpectedFirst { byte, pending }),
                None => Ok(None),
            },
            0x80 => {
                let first = self.pending.take().ok_or(DecodeError::OrphanSecond(byte))?;
                let cmd = (first >> 2) & 0x0f;
                let data = (byte & 0x3f) | ((first & 0x03) << 6);
                Ok(Some((cmd, data)))
            }
            _ => match self.pending.take() {
                Some(pending) => Err(DecodeError::UnexpectedRaw { byte, pending }),
                None => Ok(Some((CMD_DATA, byte))),
            },
        }
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CommandSend,
    ResponseAck,
    ResponseSyn,
}

/// Client-facing half of the adapter.
#[derive(Debug)]
pub struct GatewaySession {
    state: SessionState,
    decoder: GatewayDecoder,
    writer: MessageWriter,
    sent: Option<Message>,
    missed_ticks: u8,
}

impl Default for GatewaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewaySession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            decoder: GatewayDecoder::new(),
            writer: MessageWriter::new(),
            sent: None,
            missed_ticks: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Forgets everything; used when a new client connects.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.writer.reset();
        self.sent = None;
        self.go_idle();
    }

    fn go_idle(&mut self) {
        self.state = SessionState::Idle;
        self.missed_ticks = 0;
    }

    /// Decodes raw client bytes and handles every complete symbol.
    pub fn handle_bytes(&mut self, input: &[u8], sender: &dyn EbusSender, out: &mut Vec<u8>) {
        for &byte in input {
            match self.decoder.feed(byte) {
                Ok(Some((cmd, data))) => self.handle(cmd, data, sender, out),
                Ok(None) => {}
                Err(e) => warn!("gateway: {}", e),
            }
        }
    }

    pub fn handle(&mut self, cmd: u8, data: u8, sender: &dyn EbusSender, out: &mut Vec<u8>) {
        match cmd {
            CMD_INIT => encode_into(out, CMD_INIT, 0x01),
            CMD_DATA => self.handle_data(data, sender, out),
            CMD_START => {
                encode_into(out, CMD_START, data);
                self.writer.reset();
                if data == SYN {
                    debug!("gateway: start reset");
                    self.go_idle();
                } else {
                    self.writer.write(data);
                    self.state = SessionState::CommandSend;
                }
            }
            CMD_INFO if data == 0 => out.extend_from_slice(&INFO_REPLY),
            other => debug!("gateway: command {} data {:02x} ignored", other, data),
        }
    }

    fn handle_data(&mut self, data: u8, sender: &dyn EbusSender, out: &mut Vec<u8>) {
        match self.state {
            SessionState::CommandSend => {
                let status = self.writer.write(data);
                encode_into(out, CMD_DATA, data);
                match status {
                    WriteStatus::Pending => {}
                    WriteStatus::Overflow => {
                        warn!("gateway: request overflow");
                        self.writer.reset();
                        self.go_idle();
                    }
                    WriteStatus::Complete => {
                        let msg = self.writer.message();
                        self.writer.reset();
                        let Some(msg) = msg else {
                            self.go_idle();
                            return;
                        };
                        info!("gateway: sending {}", msg);
                        if let Err(e) = sender.send(&msg) {
                            warn!("gateway: {}", e);
                        }
                        if msg.dest == BROADCAST {
                            self.go_idle();
                        } else {
                            self.sent = Some(msg);
                            self.state = SessionState::ResponseAck;
                        }
                    }
                }
            }
            SessionState::ResponseAck => {
                encode_into(out, CMD_DATA, data);
                self.state = SessionState::ResponseSyn;
            }
            SessionState::ResponseSyn => {
                encode_into(out, CMD_DATA, data);
                self.sent = None;
                self.go_idle();
            }
            SessionState::Idle => debug!("gateway: unexpected data {:02x}", data),
        }
    }

    /// Relays a completed exchange while the client waits for its answer.
    pub fn on_exchange(&mut self, msg: &Message, response: &Response, out: &mut Vec<u8>) {
        if self.state != SessionState::ResponseAck {
            return;
        }
        if let Some(sent) = &self.sent {
            if (sent.source, sent.dest, sent.command) != (msg.source, msg.dest, msg.command) {
                return;
            }
        }
        encode_into(out, CMD_DATA, ACK);
        for &b in &response.to_bytes() {
            encode_into(out, CMD_DATA, b);
        }
        debug!("gateway: responded {} bytes", response.wire_len());
    }

    pub fn on_timer(&mut self, out: &mut Vec<u8>) {
        if self.state == SessionState::Idle {
            encode_into(out, CMD_DATA, SYN);
            return;
        }
        self.missed_ticks += 1;
        if self.missed_ticks > MAX_MISSED_TICKS {
            info!("gateway: SYN timeout");
            self.writer.reset();
            self.sent = None;
            self.go_idle();
        }
    }
}

async fn read_client(client: &mut Option<TcpStream>, buf: &mut [u8]) -> io::Result<usize> {
    match client {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Serves one ebusd client at a time until the event channel closes.
/// A new connection replaces the current one.
pub async fn run_gateway(
    config: GatewayConfig,
    sender: Arc<dyn EbusSender>,
    mut events: broadcast::Receiver<BusEvent>,
) -> io::Result<()> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!("gateway listening on {}", config.listen_addr());

    let mut client: Option<TcpStream> = None;
    let mut session = GatewaySession::new();
    let mut interval = time::interval(TIMER_PERIOD);
    let mut buf = [0u8; 64];

    loop {
        let mut out = Vec::new();
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if client.is_some() {
                        info!("gateway: replacing client with {}", addr);
                    } else {
                        info!("gateway: client {} connected", addr);
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("gateway: nodelay: {}", e);
                    }
                    client = Some(stream);
                    session.reset();
                }
                Err(e) => warn!("gateway: accept failed: {}", e),
            },
            read = read_client(&mut client, &mut buf) => match read {
                Ok(0) => {
                    info!("gateway: client disconnected");
                    client = None;
                    session.reset();
                }
                Ok(n) => session.handle_bytes(&buf[..n], sender.as_ref(), &mut out),
                Err(e) => {
                    warn!("gateway: client read failed: {}", e);
                    client = None;
                    session.reset();
                }
            },
            event = events.recv() => match event {
                Ok(BusEvent::Exchange(msg, response)) => session.on_exchange(&msg, &response, &mut out),
                Ok(BusEvent::Broadcast(_)) => {}
                Err(RecvError::Lagged(n)) => warn!("gateway: missed {} bus events", n),
                Err(RecvError::Closed) => {
                    info!("gateway: bus closed");
                    return Ok(());
                }
            },
            _ = interval.tick() => {
                if client.is_some() {
                    session.on_timer(&mut out);
                }
            }
        }

        if out.is_empty() {
            continue;
        }
        if let Some(stream) = client.as_mut() {
            if let Err(e) = stream.write_all(&out).await {
                warn!("gateway: client write failed: {}", e);
                client = None;
                session.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        assert_eq!(encode(CMD_DATA, 0x10).as_slice(), &[0x10]);
        assert_eq!(encode(CMD_DATA, SYN).as_slice(), &[0xc6, 0xaa]);
        assert_eq!(encode(CMD_INIT, 0x01).as_slice(), &[0xc0, 0x81]);
        assert_eq!(encode(CMD_START, 0x10).as_slice(), &[0xc8, 0x90]);
    }

    #[test]
    fn test_decoder_rebuilds_pairs() {
        let mut decoder = GatewayDecoder::new();
        assert_eq!(decoder.feed(0x35), Ok(Some((CMD_DATA, 0x35))));
        assert_eq!(decoder.feed(0xc8), Ok(None));
        assert_eq!(decoder.feed(0x90), Ok(Some((CMD_START, 0x10))));
        for data in [0x00u8, 0x7f, 0x80, 0xfe] {
            for &b in &encode(CMD_INFO, data) {
                if let Some(pair) = decoder.feed(b).unwrap() {
                    assert_eq!(pair, (CMD_INFO, data));
                }
            }
        }
    }

    #[test]
    fn test_decoder_protocol_errors() {
        let mut decoder = GatewayDecoder::new();
        assert_eq!(decoder.feed(0x90), Err(DecodeError::OrphanSecond(0x90)));
        decoder.feed(0xc8).unwrap();
        assert_eq!(
            decoder.feed(0x10),
            Err(DecodeError::UnexpectedRaw { byte: 0x10, pending: 0xc8 })
        );
        assert_eq!(decoder.feed(0x10), Ok(Some((CMD_DATA, 0x10))));
    }
}
