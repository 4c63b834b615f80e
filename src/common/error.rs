//! Error types for FED9U decoding and command construction
//!
//! # Design Principles (KISS)
//! - Data-dependent failures (bad lengths, unknown codes, CRC) are `DecodeError`
//! - Caller bugs on the outbound side (empty arguments, bad FPGA id) are
//!   `CommandError` / `PackError`, never mixed with decode failures
//! - Use thiserror for ergonomic error handling

use thiserror::Error;

/// Coarse classification of a decode failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Length/size mismatches, missing trailer, view bounds violations
    MalformedBuffer,
    /// Unknown packet code, event type or header format
    UnrecognizedEncoding,
    /// CRC mismatch, unhealthy channel status
    IntegrityCheckFailed,
    /// Allocation failure while assembling a buffer
    ResourceExhaustion,
}

/// Errors raised while decoding a FED event buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Access outside a buffer view
    #[error("Buffer view access out of bounds: offset {offset}, view length {len}")]
    OutOfBounds { offset: usize, len: usize },

    /// Channel length field exceeds what is left in the FE payload
    #[error("Corrupt event: channel length {declared} exceeds {available} bytes available")]
    ChannelLengthExceedsBuffer { declared: usize, available: usize },

    /// Channel length too short to hold its own header
    #[error("Corrupt event: channel length {length} shorter than header ({minimum} bytes)")]
    ChannelTooShort { length: usize, minimum: usize },

    /// 16-bit family payload with an odd byte count
    #[error("Channel payload of {payload} bytes is not a whole number of 16-bit samples")]
    MisalignedChannelLength { payload: usize },

    /// FE header declares more payload than the buffer holds
    #[error(
        "Length in tracker header is longer than length available in buffer: {declared} > {available}"
    )]
    FeLengthExceedsBuffer { declared: usize, available: usize },

    /// Spy blob length exceeds the buffer
    #[error("Spy data length {declared} exceeds {available} bytes available")]
    SpyLengthExceedsBuffer { declared: usize, available: usize },

    /// Buffer too small to hold the fixed headers
    #[error("Buffer too short: {actual} bytes, need at least {required}")]
    BufferTooShort { actual: usize, required: usize },

    /// Byte dump that is not a whole number of 32-bit words
    #[error("Buffer of {0} bytes is not a whole number of 32-bit words")]
    UnalignedBuffer(usize),

    /// Fewer than 8 bytes left for the trailer
    #[error("Missing trailer: only {remaining} bytes left after payload")]
    MissingTrailer { remaining: usize },

    /// Total length in trailer does not match the consumed span
    #[error(
        "Total length mismatch: trailer declares {declared_bytes} bytes, event spans {actual_bytes}"
    )]
    LengthMismatch {
        declared_bytes: usize,
        actual_bytes: usize,
    },

    /// Packet code byte is not one of the documented encodings
    #[error("Front-end packet code corrupt: 0x{0:02x}")]
    UnknownPacketCode(u8),

    /// Tracker event type has no DAQ mode
    #[error("DAQ mode unknown for event type {0}")]
    UnknownDaqMode(u8),

    /// Only the full debug header format is decodable
    #[error("Event is only valid for the Full Debug Header Format, found header format {0}")]
    UnsupportedHeaderFormat(u8),

    /// Median requested on a non zero-suppressed channel
    #[error("APV medians are only present in zero-suppressed data, packet code 0x{0:02x}")]
    NoMedian(u8),

    /// APV index other than 0 or 1
    #[error("APV index {0} out of range (0..2)")]
    InvalidApv(usize),

    /// Channel packet code does not match the event DAQ mode
    #[error(
        "FE unit {fe_unit} channel {channel}: packet code 0x{found:02x}, expected 0x{expected:02x}"
    )]
    PacketCodeMismatch {
        fe_unit: usize,
        channel: usize,
        expected: u8,
        found: u8,
    },

    /// Stored and calculated CRC differ
    #[error("CRC mismatch: stored 0x{stored:04x}, calculated 0x{calculated:04x}")]
    CrcMismatch { stored: u16, calculated: u16 },

    /// One or more enabled channels reported bad status
    #[error("Channel status check failed for {failures} channel(s):\n{report}")]
    ChannelStatus { failures: usize, report: String },

    /// Allocation failure
    #[error("Out of memory: could not allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Failure while decoding a channel's samples
    #[error("Sample decoding failed: {source}")]
    SamplesFailed { source: Box<DecodeError> },

    /// Failure inside one channel of an FE unit
    #[error("Channel {channel}: {source}")]
    Channel {
        channel: usize,
        source: Box<DecodeError>,
    },

    /// Failure inside one FE unit
    #[error("FE unit {fe_unit}: {source}")]
    FeUnit {
        fe_unit: usize,
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Wrap with the index of the channel being decoded
    pub fn in_channel(self, channel: usize) -> Self {
        Self::Channel {
            channel,
            source: Box::new(self),
        }
    }

    /// Wrap with the index of the FE unit being decoded
    pub fn in_fe_unit(self, fe_unit: usize) -> Self {
        Self::FeUnit {
            fe_unit,
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through context wrappers
    pub fn root(&self) -> &DecodeError {
        match self {
            Self::Channel { source, .. }
            | Self::FeUnit { source, .. }
            | Self::SamplesFailed { source } => source.root(),
            other => other,
        }
    }

    /// Classify the failure
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::UnknownPacketCode(_)
            | Self::UnknownDaqMode(_)
            | Self::UnsupportedHeaderFormat(_)
            | Self::NoMedian(_) => ErrorKind::UnrecognizedEncoding,
            Self::CrcMismatch { .. } | Self::ChannelStatus { .. } => {
                ErrorKind::IntegrityCheckFailed
            }
            Self::OutOfMemory { .. } => ErrorKind::ResourceExhaustion,
            _ => ErrorKind::MalformedBuffer,
        }
    }
}

/// Result type alias using DecodeError
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Precondition failures of the bit-field packer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error("Cannot pack an empty element list")]
    Empty,

    #[error("Total bit length {total} is not a multiple of {count} elements")]
    UnevenWidth { total: u32, count: usize },

    #[error("Element width {0} bits is outside 1..=32")]
    InvalidWidth(u32),

    #[error("Packed stream holds {available} bits, {required} requested")]
    ShortStream { available: usize, required: usize },
}

/// Precondition failures while constructing VME commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("FPGA number {0} invalid, expected 1..=10, 15 or 16")]
    InvalidFpga(u8),

    #[error("Designator {0} does not fit in 5 bits")]
    InvalidDesignator(u8),

    #[error("Command needs arguments (designator {designator}, read {read})")]
    MissingArguments { designator: u8, read: bool },

    #[error("Command has {actual} argument words, length {length} bits needs {expected}")]
    ArgumentCount {
        length: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Delay chip command must extend a 2-word command, got {0} words")]
    DelayChipBaseLength(usize),

    #[error("Delay chip select {0} does not fit in 3 bits")]
    InvalidChip(u8),

    #[error("Delay chip command length {0} does not fit in 17 bits")]
    DelayChipLength(u32),

    #[error("Block write buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },
}
