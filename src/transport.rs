//! Byte-level line access and time sources for the engine.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, StopBits};

/// Raw access to the bus line.
///
/// `read_byte` returns `nb::Error::WouldBlock` when no byte is available;
/// any other error is fatal for the engine.
pub trait Transport: Send {
    fn read_byte(&mut self) -> nb::Result<u8, io::Error>;
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read_byte(&mut self) -> nb::Result<u8, io::Error> {
        (**self).read_byte()
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).send(bytes)
    }
}

/// Read timeout for socket lines, bounds how long the engine loop blocks.
pub const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Line rate of the bus, 8N1.
pub const BAUD_RATE: u32 = 2400;

/// Opens `tcp:host:port` (a serial-to-TCP bridge) or a serial device path.
/// Both read with [`READ_TIMEOUT`], so a silent line still returns to the
/// engine's timers.
pub fn open_transport(spec: &str) -> io::Result<Box<dyn Transport>> {
    if let Some(addr) = spec.strip_prefix("tcp:") {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_nodelay(true)?;
        return Ok(Box::new(StreamTransport::new(stream)));
    }
    let port = serialport::new(spec, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    Ok(Box::new(StreamTransport::new(port)))
}

/// Monotonic millisecond clock.
pub trait Clock: Send {
    fn elapsed_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Wire {
    input: VecDeque<u8>,
    output: Vec<u8>,
    echo: bool,
    closed: bool,
}

/// In-memory line. Clones share the same wire, so a test can keep a handle
/// while the engine owns another.
///
/// With echo enabled every sent byte is also queued as input, like a real
/// shared bus where a node hears its own transmissions.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    wire: Arc<Mutex<Wire>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo() -> Self {
        let transport = Self::new();
        transport.wire.lock().echo = true;
        transport
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.wire.lock().input.extend(bytes.iter().copied());
    }

    pub fn pending_input(&self) -> usize {
        self.wire.lock().input.len()
    }

    /// Everything sent since the last call.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.wire.lock().output)
    }

    /// Makes the next read fail once the input is drained.
    pub fn close(&self) {
        self.wire.lock().closed = true;
    }
}

impl Transport for MemoryTransport {
    fn read_byte(&mut self) -> nb::Result<u8, io::Error> {
        let mut wire = self.wire.lock();
        match wire.input.pop_front() {
            Some(b) => Ok(b),
            None if wire.closed => Err(nb::Error::Other(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "line closed",
            ))),
            None => Err(nb::Error::WouldBlock),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut wire = self.wire.lock();
        wire.output.extend_from_slice(bytes);
        if wire.echo {
            wire.input.extend(bytes.iter().copied());
        }
        Ok(())
    }
}

/// Any blocking byte stream with a read timeout (TCP bridge, serial device).
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

impl<S: Read + Write + Send> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + Send> Transport for StreamTransport<S> {
    fn read_byte(&mut self) -> nb::Result<u8, io::Error> {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(nb::Error::Other(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "line closed",
            ))),
            Ok(_) => Ok(buf[0]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Err(nb::Error::WouldBlock)
            }
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_echo() {
        let mut line = MemoryTransport::with_echo();
        let handle = line.clone();
        line.send(&[0x10, 0x20]).unwrap();
        assert_eq!(handle.take_output(), vec![0x10, 0x20]);
        assert_eq!(line.read_byte().unwrap(), 0x10);
        assert_eq!(line.read_byte().unwrap(), 0x20);
        assert!(matches!(line.read_byte(), Err(nb::Error::WouldBlock)));
        handle.close();
        assert!(matches!(line.read_byte(), Err(nb::Error::Other(_))));
    }

    #[test]
    fn test_stream_transport_eof_is_fatal() {
        let stream = io::Cursor::new(vec![0xaa]);
        let mut line = StreamTransport::new(stream);
        assert_eq!(line.read_byte().unwrap(), 0xaa);
        assert!(matches!(line.read_byte(), Err(nb::Error::Other(_))));
    }

    #[test]
    fn test_read_timeout_is_would_block() {
        use std::os::unix::net::UnixStream;

        let (line, _peer) = UnixStream::pair().unwrap();
        line.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        let mut line = StreamTransport::new(line);
        assert!(matches!(line.read_byte(), Err(nb::Error::WouldBlock)));
    }

    #[test]
    fn test_missing_serial_device_fails() {
        assert!(open_transport("/nonexistent/ttyEBUS0").is_err());
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new();
        let view = clock.clone();
        clock.advance(150);
        assert_eq!(view.elapsed_ms(), 150);
        clock.set(10);
        assert_eq!(view.elapsed_ms(), 10);
    }
}
