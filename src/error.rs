use thiserror::Error;

/// Failures while building or parsing a single bus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("payload exceeds {max} bytes")]
    PayloadOverflow { max: usize },

    #[error("declared payload length {0} exceeds maximum")]
    LengthOutOfRange(u8),

    #[error("frame truncated: {actual} bytes, need {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid hex input")]
    InvalidHex,

    #[error("hex request length mismatch: declared {declared} data bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Error taxonomy for the bus core.
///
/// `CrcMismatch`, `ProtocolViolation`, `ArbitrationLost` and `QueueFull` are
/// absorbed where they happen (logged and counted, recovered on the next
/// SYN). `TransportFatal` is the only one that stops the engine.
#[derive(Debug, Error)]
pub enum EbusError {
    #[error("crc mismatch: computed {computed:#04x}, received {received:#04x}")]
    CrcMismatch { computed: u8, received: u8 },

    #[error("unexpected byte {byte:#04x} while in {state}")]
    ProtocolViolation { state: &'static str, byte: u8 },

    #[error("arbitration lost: attempted {attempted:#04x}, won by {winner:#04x}")]
    ArbitrationLost { attempted: u8, winner: u8 },

    #[error("outbound queue full")]
    QueueFull,

    #[error("transport failed: {0}")]
    TransportFatal(#[from] std::io::Error),

    #[error("unknown command {0:#06x}")]
    UnknownCommand(u16),

    #[error("invalid request for command {command:#06x}")]
    InvalidRequest { command: u16 },

    #[error("device with slave address {0:#04x} already registered")]
    DuplicateDevice(u8),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
