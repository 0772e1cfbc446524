//! Bus frames, address classes and wire escaping.
//!
//! A request travels as `SRC DST CMD_HI CMD_LO LEN [payload] CRC`, a response
//! as `LEN [payload] CRC`. Both are held in bounded buffers; the CRC covers
//! the logical bytes and escaping is applied only on the wire.

use core::fmt;

use heapless::Vec;
use static_assertions::const_assert;

use crate::crc::crc8;
use crate::error::FrameError;

pub const SYN: u8 = 0xaa;
pub const ESC: u8 = 0xa9;
pub const ESC_CODE_ESC: u8 = 0x00;
pub const ESC_CODE_SYN: u8 = 0x01;
pub const ACK: u8 = 0x00;
pub const NAK: u8 = 0xff;
pub const BROADCAST: u8 = 0xfe;

pub const MAX_PAYLOAD: usize = 16;
pub const HEADER_SIZE: usize = 5;
pub const CRC_SIZE: usize = 1;
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD + CRC_SIZE;
pub const MAX_RESPONSE_SIZE: usize = 1 + MAX_PAYLOAD + CRC_SIZE;
/// Worst case after escaping: every byte doubled.
pub const MAX_ESCAPED_SIZE: usize = 2 * MAX_FRAME_SIZE;

pub const IDENTIFY_COMMAND: u16 = 0x0704;

const_assert!(MAX_PAYLOAD <= u8::MAX as usize);
const_assert!(MAX_RESPONSE_SIZE < MAX_FRAME_SIZE);

pub type PayloadBuf = Vec<u8, MAX_PAYLOAD>;
pub type FrameBytes = Vec<u8, MAX_FRAME_SIZE>;
pub type EscapedFrame = Vec<u8, MAX_ESCAPED_SIZE>;

const MASTER_NIBBLES: [u8; 5] = [0x0, 0x1, 0x3, 0x7, 0xf];

/// Both nibbles must be one of the five master priority codes.
pub fn is_master(address: u8) -> bool {
    MASTER_NIBBLES.contains(&(address >> 4)) && MASTER_NIBBLES.contains(&(address & 0x0f))
}

/// Slave address co-located with a master.
pub fn slave_of(master: u8) -> u8 {
    master.wrapping_add(5)
}

/// Registry key for a destination: masters are served by their slave.
pub fn dispatch_key(dest: u8) -> u8 {
    if is_master(dest) {
        slave_of(dest)
    } else {
        dest
    }
}

fn overflow() -> FrameError {
    FrameError::PayloadOverflow { max: MAX_PAYLOAD }
}

/// Typed access to a frame payload, shared by requests and responses.
pub trait Payload {
    fn payload(&self) -> &[u8];
    fn payload_mut(&mut self) -> &mut PayloadBuf;

    fn add_u8(&mut self, value: u8) -> Result<(), FrameError> {
        self.payload_mut().push(value).map_err(|_| overflow())
    }

    fn add_bytes(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.payload_mut()
            .extend_from_slice(bytes)
            .map_err(|()| overflow())
    }

    /// Packed BCD, 0..=99.
    fn add_bcd(&mut self, value: u8) -> Result<(), FrameError> {
        self.add_u8(((value / 10) << 4) | (value % 10))
    }

    fn add_word(&mut self, value: u16) -> Result<(), FrameError> {
        self.add_bytes(&value.to_le_bytes())
    }

    fn add_sword(&mut self, value: i16) -> Result<(), FrameError> {
        self.add_bytes(&value.to_le_bytes())
    }

    /// Version words go high byte first.
    fn add_version(&mut self, value: u16) -> Result<(), FrameError> {
        self.add_bytes(&value.to_be_bytes())
    }

    fn add_dword(&mut self, value: u32) -> Result<(), FrameError> {
        self.add_bytes(&value.to_le_bytes())
    }

    fn add_exp(&mut self, value: f32) -> Result<(), FrameError> {
        let bits = if value.is_nan() { 0x7fff_ffff } else { value.to_bits() };
        self.add_dword(bits)
    }

    /// Half-degree steps. Out of range values wrap modulo 256.
    fn add_data1c(&mut self, value: f32) -> Result<(), FrameError> {
        if value.is_nan() {
            return self.add_u8(0xff);
        }
        self.add_u8((value * 2.0) as i32 as u8)
    }

    fn add_data2b(&mut self, value: f32) -> Result<(), FrameError> {
        if value.is_nan() {
            return self.add_word(0x8000);
        }
        self.add_sword((value * 256.0) as i32 as i16)
    }

    fn add_data2c(&mut self, value: f32) -> Result<(), FrameError> {
        if value.is_nan() {
            return self.add_word(0x8000);
        }
        self.add_sword((value * 16.0) as i32 as i16)
    }

    fn read_u8(&self, offset: usize) -> Option<u8> {
        self.payload().get(offset).copied()
    }

    fn read_word(&self, offset: usize) -> Option<u16> {
        let bytes = self.payload().get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_sword(&self, offset: usize) -> Option<i16> {
        self.read_word(offset).map(|w| w as i16)
    }

    fn read_bcd(&self, offset: usize) -> Option<u8> {
        self.read_u8(offset).map(|b| (b >> 4) * 10 + (b & 0x0f))
    }

    fn read_data1c(&self, offset: usize) -> Option<f32> {
        self.read_u8(offset)
            .map(|b| if b == 0xff { f32::NAN } else { f32::from(b) / 2.0 })
    }

    fn read_data2b(&self, offset: usize) -> Option<f32> {
        self.read_word(offset).map(|w| {
            if w == 0x8000 {
                f32::NAN
            } else {
                f32::from(w as i16) / 256.0
            }
        })
    }

    fn read_data2c(&self, offset: usize) -> Option<f32> {
        self.read_word(offset).map(|w| {
            if w == 0x8000 {
                f32::NAN
            } else {
                f32::from(w as i16) / 16.0
            }
        })
    }
}

/// Addressed request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: u8,
    pub dest: u8,
    pub command: u16,
    pub payload: PayloadBuf,
    pub crc: u8,
}

impl Message {
    pub fn new(source: u8, dest: u8, command: u16) -> Self {
        Self {
            source,
            dest,
            command,
            payload: Vec::new(),
            crc: 0,
        }
    }

    /// Builds and finalizes a request in one go.
    pub fn with_payload(source: u8, dest: u8, command: u16, payload: &[u8]) -> Result<Self, FrameError> {
        let mut msg = Self::new(source, dest, command);
        msg.add_bytes(payload)?;
        msg.finalize();
        Ok(msg)
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest == BROADCAST
    }

    pub fn len(&self) -> u8 {
        self.payload.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        let [hi, lo] = self.command.to_be_bytes();
        [self.source, self.dest, hi, lo, self.len()]
    }

    pub fn compute_crc(&self) -> u8 {
        let mut bytes: FrameBytes = Vec::new();
        // header + payload always fit
        let _ = bytes.extend_from_slice(&self.header());
        let _ = bytes.extend_from_slice(&self.payload);
        crc8(&bytes)
    }

    pub fn finalize(&mut self) {
        self.crc = self.compute_crc();
    }

    pub fn is_valid_crc(&self) -> bool {
        self.crc == self.compute_crc()
    }

    pub fn to_bytes(&self) -> FrameBytes {
        let mut bytes: FrameBytes = Vec::new();
        let _ = bytes.extend_from_slice(&self.header());
        let _ = bytes.extend_from_slice(&self.payload);
        let _ = bytes.push(self.crc);
        bytes
    }

    /// Parses the exact wire layout. The CRC is taken as received, check it
    /// with [`Message::is_valid_crc`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE + CRC_SIZE {
            return Err(FrameError::Truncated {
                expected: HEADER_SIZE + CRC_SIZE,
                actual: bytes.len(),
            });
        }
        let len = bytes[4];
        if usize::from(len) > MAX_PAYLOAD {
            return Err(FrameError::LengthOutOfRange(len));
        }
        let expected = HEADER_SIZE + usize::from(len) + CRC_SIZE;
        if bytes.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        let mut msg = Self::new(bytes[0], bytes[1], u16::from_be_bytes([bytes[2], bytes[3]]));
        msg.add_bytes(&bytes[HEADER_SIZE..expected - CRC_SIZE])?;
        msg.crc = bytes[expected - CRC_SIZE];
        Ok(msg)
    }

    /// Parses `ddCCccll<data>` hex text into a finalized request from `source`.
    pub fn parse_hex_request(source: u8, text: &str) -> Result<Self, FrameError> {
        let bytes = decode_hex(text.trim())?;
        if bytes.len() < 4 {
            return Err(FrameError::Truncated {
                expected: 4,
                actual: bytes.len(),
            });
        }
        let declared = bytes[3];
        if usize::from(declared) > MAX_PAYLOAD {
            return Err(FrameError::LengthOutOfRange(declared));
        }
        let data = &bytes[4..];
        if data.len() != usize::from(declared) {
            return Err(FrameError::LengthMismatch {
                declared: usize::from(declared),
                actual: data.len(),
            });
        }
        Self::with_payload(source, bytes[0], u16::from_be_bytes([bytes[1], bytes[2]]), data)
    }
}

impl Payload for Message {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn payload_mut(&mut self) -> &mut PayloadBuf {
        &mut self.payload
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Req: {:02x} {:02x} {:04x} ({})",
            self.source,
            self.dest,
            self.command,
            self.payload.len()
        )?;
        write_data(f, &self.payload)?;
        write!(f, " ({:02x})", self.crc)
    }
}

/// Slave answer frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub payload: PayloadBuf,
    pub crc: u8,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let mut rsp = Self::new();
        rsp.add_bytes(payload)?;
        rsp.finalize();
        Ok(rsp)
    }

    pub fn len(&self) -> u8 {
        self.payload.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn wire_len(&self) -> usize {
        1 + self.payload.len() + CRC_SIZE
    }

    pub fn compute_crc(&self) -> u8 {
        let mut bytes: Vec<u8, MAX_RESPONSE_SIZE> = Vec::new();
        let _ = bytes.push(self.len());
        let _ = bytes.extend_from_slice(&self.payload);
        crc8(&bytes)
    }

    pub fn finalize(&mut self) {
        self.crc = self.compute_crc();
    }

    pub fn is_valid_crc(&self) -> bool {
        self.crc == self.compute_crc()
    }

    pub fn to_bytes(&self) -> Vec<u8, MAX_RESPONSE_SIZE> {
        let mut bytes = Vec::new();
        let _ = bytes.push(self.len());
        let _ = bytes.extend_from_slice(&self.payload);
        let _ = bytes.push(self.crc);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let Some(&len) = bytes.first() else {
            return Err(FrameError::Truncated {
                expected: 1 + CRC_SIZE,
                actual: 0,
            });
        };
        if usize::from(len) > MAX_PAYLOAD {
            return Err(FrameError::LengthOutOfRange(len));
        }
        let expected = 1 + usize::from(len) + CRC_SIZE;
        if bytes.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }
        let mut rsp = Self::new();
        rsp.add_bytes(&bytes[1..expected - CRC_SIZE])?;
        rsp.crc = bytes[expected - CRC_SIZE];
        Ok(rsp)
    }
}

impl Payload for Response {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn payload_mut(&mut self) -> &mut PayloadBuf {
        &mut self.payload
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Res: ({})", self.payload.len())?;
        write_data(f, &self.payload)?;
        write!(f, " ({:02x})", self.crc)
    }
}

fn write_data(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
    if data.is_empty() {
        return Ok(());
    }
    f.write_str(" Data:")?;
    for b in data {
        write!(f, " {b:02x}")?;
    }
    Ok(())
}

/// Lowercase hex without separators.
pub fn hex_string(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn decode_hex(text: &str) -> Result<std::vec::Vec<u8>, FrameError> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return Err(FrameError::InvalidHex);
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| FrameError::InvalidHex))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Pending,
    Complete,
    Overflow,
}

/// Streaming request assembler fed with unescaped bytes.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buffer: FrameBytes,
    complete: bool,
    overflow: bool,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, byte: u8) -> WriteStatus {
        if self.complete || self.overflow {
            self.overflow = true;
            return WriteStatus::Overflow;
        }
        if self.buffer.push(byte).is_err() {
            self.overflow = true;
            return WriteStatus::Overflow;
        }
        let n = self.buffer.len();
        if n < HEADER_SIZE {
            return WriteStatus::Pending;
        }
        let declared = usize::from(self.buffer[4]);
        if declared > MAX_PAYLOAD {
            self.overflow = true;
            return WriteStatus::Overflow;
        }
        if n == HEADER_SIZE + declared + CRC_SIZE {
            self.complete = true;
            WriteStatus::Complete
        } else {
            WriteStatus::Pending
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.complete = false;
        self.overflow = false;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn written(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// The finished request with its received CRC.
    pub fn message(&self) -> Option<Message> {
        if !self.complete {
            return None;
        }
        Message::from_bytes(&self.buffer).ok()
    }
}

/// Streaming response assembler fed with unescaped bytes.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    buffer: Vec<u8, MAX_RESPONSE_SIZE>,
    complete: bool,
    overflow: bool,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, byte: u8) -> WriteStatus {
        if self.complete || self.overflow {
            self.overflow = true;
            return WriteStatus::Overflow;
        }
        if self.buffer.push(byte).is_err() {
            self.overflow = true;
            return WriteStatus::Overflow;
        }
        let declared = usize::from(self.buffer[0]);
        if declared > MAX_PAYLOAD {
            self.overflow = true;
            return WriteStatus::Overflow;
        }
        if self.buffer.len() == 1 + declared + CRC_SIZE {
            self.complete = true;
            WriteStatus::Complete
        } else {
            WriteStatus::Pending
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.complete = false;
        self.overflow = false;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn written(&self) -> usize {
        self.buffer.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn response(&self) -> Option<Response> {
        if !self.complete {
            return None;
        }
        Response::from_bytes(&self.buffer).ok()
    }
}

/// Appends `bytes` to `out` with SYN and ESC replaced by their escape pairs.
pub fn escape_into<const N: usize>(bytes: &[u8], out: &mut Vec<u8, N>) -> Result<(), FrameError> {
    for &b in bytes {
        let pushed = match b {
            SYN => out.extend_from_slice(&[ESC, ESC_CODE_SYN]),
            ESC => out.extend_from_slice(&[ESC, ESC_CODE_ESC]),
            other => out.push(other).map_err(|_| ()),
        };
        pushed.map_err(|()| FrameError::PayloadOverflow { max: N })?;
    }
    Ok(())
}

pub fn escape(bytes: &[u8]) -> Result<EscapedFrame, FrameError> {
    let mut out = Vec::new();
    escape_into(bytes, &mut out)?;
    Ok(out)
}

/// Stateful inverse of [`escape_into`]. Feed raw wire bytes, SYN excluded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unescaper {
    pending: bool,
}

impl Unescaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the logical byte, or `None` while an escape pair is open.
    pub fn feed(&mut self, byte: u8) -> Option<u8> {
        if self.pending {
            self.pending = false;
            return Some(match byte {
                ESC_CODE_ESC => ESC,
                ESC_CODE_SYN => SYN,
                other => other,
            });
        }
        if byte == ESC {
            self.pending = true;
            return None;
        }
        Some(byte)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn reset(&mut self) {
        self.pending = false;
    }
}

pub fn unescape(bytes: &[u8]) -> std::vec::Vec<u8> {
    let mut unescaper = Unescaper::new();
    bytes.iter().filter_map(|&b| unescaper.feed(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_nibble_rule() {
        for addr in [0x00, 0x03, 0x10, 0x13, 0x31, 0x33, 0x71, 0x77, 0xf0, 0xff] {
            assert!(is_master(addr), "{addr:#04x}");
        }
        for addr in [0x08, 0x15, 0x52, 0xfe, 0x02, 0x20, 0x35, 0x18] {
            assert!(!is_master(addr), "{addr:#04x}");
        }
        assert_eq!(dispatch_key(0x03), 0x08);
        assert_eq!(dispatch_key(0x52), 0x52);
        assert_eq!(slave_of(0xff), 0x04);
    }

    #[test]
    fn test_payload_encoders() {
        let mut msg = Message::new(0x10, 0x08, 0xb511);
        msg.add_word(0x1234).unwrap();
        msg.add_version(0x0117).unwrap();
        msg.add_bcd(59).unwrap();
        msg.add_data1c(21.5).unwrap();
        msg.add_data2b(-1.5).unwrap();
        msg.add_data2c(12.25).unwrap();
        assert_eq!(
            msg.payload(),
            &[0x34, 0x12, 0x01, 0x17, 0x59, 43, 0x80, 0xfe, 0xc4, 0x00]
        );
        assert_eq!(msg.read_bcd(4), Some(59));
        assert_eq!(msg.read_data1c(5), Some(21.5));
        assert_eq!(msg.read_data2b(6), Some(-1.5));
        assert_eq!(msg.read_data2c(8), Some(12.25));
        assert_eq!(msg.read_word(9), None);
    }

    #[test]
    fn test_out_of_range_values_wrap() {
        let mut rsp = Response::new();
        rsp.add_data1c(-1.0).unwrap();
        rsp.add_data1c(100.0).unwrap();
        rsp.add_data1c(128.0).unwrap();
        rsp.add_data1c(130.5).unwrap();
        rsp.add_data1c(f32::NAN).unwrap();
        rsp.add_data2c(2048.0).unwrap();
        assert_eq!(rsp.payload(), &[0xfe, 0xc8, 0x00, 0x05, 0xff, 0x00, 0x80]);
        assert_eq!(rsp.read_data1c(1), Some(100.0));
    }

    #[test]
    fn test_replacement_values_decode_as_nan() {
        let rsp = Response::with_payload(&[0xff, 0x00, 0x80]).unwrap();
        assert!(rsp.read_data1c(0).unwrap().is_nan());
        assert!(rsp.read_data2b(1).unwrap().is_nan());
        assert!(rsp.read_data2c(1).unwrap().is_nan());
    }

    #[test]
    fn test_exp_nan_encoding() {
        let mut rsp = Response::new();
        rsp.add_exp(f32::NAN).unwrap();
        rsp.add_exp(1.0).unwrap();
        assert_eq!(rsp.payload(), &[0xff, 0xff, 0xff, 0x7f, 0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_payload_overflow_leaves_payload_intact() {
        let mut msg = Message::new(0x10, 0x08, 0xb511);
        msg.add_bytes(&[0u8; 15]).unwrap();
        assert!(matches!(
            msg.add_word(1),
            Err(FrameError::PayloadOverflow { max: MAX_PAYLOAD })
        ));
        assert_eq!(msg.payload.len(), 15);
        msg.add_u8(1).unwrap();
        assert!(msg.add_u8(2).is_err());
    }

    #[test]
    fn test_message_display() {
        let msg = Message::with_payload(0x10, 0x52, 0xb511, &[0x01]).unwrap();
        assert_eq!(msg.to_string(), format!("Req: 10 52 b511 (1) Data: 01 ({:02x})", msg.crc));
        let rsp = Response::with_payload(&[]).unwrap();
        assert_eq!(rsp.to_string(), "Res: (0) (00)");
    }

    #[test]
    fn test_message_writer_completes_on_crc() {
        let msg = Message::with_payload(0x10, 0x08, 0xb511, &[0x01]).unwrap();
        let bytes = msg.to_bytes();
        let mut writer = MessageWriter::new();
        for &b in &bytes[..bytes.len() - 1] {
            assert_eq!(writer.write(b), WriteStatus::Pending);
        }
        assert_eq!(writer.write(bytes[bytes.len() - 1]), WriteStatus::Complete);
        let parsed = writer.message().unwrap();
        assert_eq!(parsed, msg);
        assert!(parsed.is_valid_crc());
        assert_eq!(parsed.crc, 0x89);
        assert_eq!(writer.write(0x00), WriteStatus::Overflow);
    }

    #[test]
    fn test_message_writer_rejects_long_length() {
        let mut writer = MessageWriter::new();
        for b in [0x10, 0x08, 0xb5, 0x11] {
            assert_eq!(writer.write(b), WriteStatus::Pending);
        }
        assert_eq!(writer.write(17), WriteStatus::Overflow);
        assert_eq!(writer.write(0), WriteStatus::Overflow);
        writer.reset();
        assert!(writer.is_empty());
        assert_eq!(writer.write(0x10), WriteStatus::Pending);
    }

    #[test]
    fn test_response_writer() {
        let mut writer = ResponseWriter::new();
        assert_eq!(writer.write(0x00), WriteStatus::Pending);
        assert_eq!(writer.write(0x00), WriteStatus::Complete);
        assert!(writer.response().unwrap().is_valid_crc());

        writer.reset();
        assert_eq!(writer.write(0x11), WriteStatus::Overflow);
    }

    #[test]
    fn test_from_bytes_errors() {
        assert!(matches!(
            Message::from_bytes(&[0x10, 0x08, 0xb5]),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            Message::from_bytes(&[0x10, 0x08, 0xb5, 0x11, 0x20, 0x00]),
            Err(FrameError::LengthOutOfRange(0x20))
        ));
        assert!(matches!(Response::from_bytes(&[]), Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn test_escape_roundtrip() {
        let raw = [0x10, SYN, 0x00, ESC, 0x01, ESC, SYN];
        let wire = escape(&raw).unwrap();
        assert_eq!(
            wire.as_slice(),
            &[0x10, ESC, 0x01, 0x00, ESC, 0x00, 0x01, ESC, 0x00, ESC, 0x01]
        );
        assert!(!wire.contains(&SYN));
        assert_eq!(unescape(&wire), raw);
    }

    #[test]
    fn test_parse_hex_request() {
        let msg = Message::parse_hex_request(0x71, "08b5110101").unwrap();
        assert_eq!((msg.source, msg.dest, msg.command), (0x71, 0x08, 0xb511));
        assert_eq!(msg.payload(), &[0x01]);
        assert!(msg.is_valid_crc());

        assert!(matches!(
            Message::parse_hex_request(0x71, "08b5110201"),
            Err(FrameError::LengthMismatch { declared: 2, actual: 1 })
        ));
        assert!(matches!(
            Message::parse_hex_request(0x71, "08b51101z1"),
            Err(FrameError::InvalidHex)
        ));
        assert!(matches!(
            Message::parse_hex_request(0x71, "08b511"),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x10, 0xfe, 0x0a]), "10fe0a");
    }
}
