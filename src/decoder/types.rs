//! FED9U geometry constants and wire-level enumerations

use serde::{Deserialize, Serialize};

use crate::common::{DecodeError, DecodeResult};

/// FED geometry
pub mod geometry {
    pub const FEUNITS_PER_FED: usize = 8;
    pub const CHANNELS_PER_FEUNIT: usize = 12;
    pub const APVS_PER_CHANNEL: usize = 2;
    pub const STRIPS_PER_APV: usize = 128;
    pub const STRIPS_PER_CHANNEL: usize = STRIPS_PER_APV * APVS_PER_CHANNEL;
    pub const APVS_PER_FEUNIT: usize = CHANNELS_PER_FEUNIT * APVS_PER_CHANNEL;
}

/// Byte layout of the event buffer
pub mod layout {
    pub const DAQ_HEADER_SIZE: usize = 8;
    pub const TRACKER_HEADER_SIZE: usize = 8;
    pub const FE_HEADER_SIZE: usize = 16;
    pub const TRAILER_SIZE: usize = 8;

    /// Byte holding the event format magic
    pub const FORMAT_MAGIC_OFFSET: usize = 8;
    pub const MAGIC_OLD_VME: u8 = 0xED;
    pub const MAGIC_STANDARD: u8 = 0xC5;

    /// Beginning-of-event marker in the DAQ header high nibble
    pub const BOE_MARKER: u8 = 0x5;
    /// End-of-event marker byte at the start of the trailer
    pub const EOE_MARKER: u8 = 0xA0;

    /// Zero words allowed between the last payload and the trailer
    pub const MAX_PADDING_WORDS: usize = 3;

    // FE header
    pub const FE_STATUS_WORD_LOW: usize = 4;
    pub const FE_STATUS_WORD_HIGH: usize = 0;
    pub const FE_LENGTH_OFFSET: usize = 8;
    pub const FE_BYTES_10_TO_13: usize = 10;
    pub const FE_STATUS_TOP_BYTE: usize = 14;
    pub const FE_MAJORITY_PIPELINE: usize = 15;

    // Channel header
    pub const CHANNEL_LENGTH_OFFSET: usize = 0;
    pub const CHANNEL_PACKET_CODE_OFFSET: usize = 2;
    pub const CHANNEL_MEDIAN_OFFSET: usize = 3;

    // Spy events carry a 32-bit blob length after the special header
    pub const SPY_LENGTH_SIZE: usize = 4;
}

/// Healthy channel status: every bit set
pub const CHANNEL_STATUS_OK: u8 = 0x3F;

/// Data encoding of one channel's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PacketCode {
    Scope,
    VirginRaw,
    VirginRaw10,
    /// Bits 9..2 of each sample
    VirginRaw8BitHi,
    /// Bits 8..1 of each sample
    VirginRaw8BitLo,
    ProcessedRaw,
    ProcessedRaw10,
    ProcessedRaw8BitHi,
    ProcessedRaw8BitLo,
    ZeroSuppressed,
    ZeroSuppressed10,
    ZeroSuppressed8BitHi,
    ZeroSuppressed8BitLo,
    /// Zero-suppressed lite: no packet code byte and no medians on the wire
    ZeroSuppressedLite,
    /// Zero-suppressed lite with 10-bit cluster values
    ZeroSuppressedLite10,
}

/// How the samples of a packet code are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// One big-endian 16-bit value per strip
    Raw16,
    /// 10-bit values packed MSB-first in a byte stream
    Packed10,
    /// One byte per strip, shifted left to restore range
    Stripped8 { shift: u32 },
    /// (strip, run length, values...) cluster records
    Clusters(ClusterValue),
}

/// Width of the values inside zero-suppressed clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterValue {
    U16,
    U10,
    U8 { shift: u32 },
}

impl ClusterValue {
    /// Bytes per value on the wire
    pub fn size(self) -> usize {
        match self {
            ClusterValue::U16 | ClusterValue::U10 => 2,
            ClusterValue::U8 { .. } => 1,
        }
    }
}

impl PacketCode {
    /// Every code that appears as a byte on the wire
    pub const WIRE_CODES: [PacketCode; 13] = [
        PacketCode::Scope,
        PacketCode::VirginRaw,
        PacketCode::VirginRaw10,
        PacketCode::VirginRaw8BitHi,
        PacketCode::VirginRaw8BitLo,
        PacketCode::ProcessedRaw,
        PacketCode::ProcessedRaw10,
        PacketCode::ProcessedRaw8BitHi,
        PacketCode::ProcessedRaw8BitLo,
        PacketCode::ZeroSuppressed,
        PacketCode::ZeroSuppressed10,
        PacketCode::ZeroSuppressed8BitHi,
        PacketCode::ZeroSuppressed8BitLo,
    ];

    /// Parse a packet code byte
    pub fn from_byte(byte: u8) -> DecodeResult<Self> {
        let code = match byte {
            0xE5 => PacketCode::Scope,
            0xE6 => PacketCode::VirginRaw,
            0x86 => PacketCode::VirginRaw10,
            0xC6 => PacketCode::VirginRaw8BitHi,
            0xA6 => PacketCode::VirginRaw8BitLo,
            0xF2 => PacketCode::ProcessedRaw,
            0x92 => PacketCode::ProcessedRaw10,
            0xD2 => PacketCode::ProcessedRaw8BitHi,
            0xB2 => PacketCode::ProcessedRaw8BitLo,
            0xEA => PacketCode::ZeroSuppressed,
            0x8A => PacketCode::ZeroSuppressed10,
            0xCA => PacketCode::ZeroSuppressed8BitHi,
            0xAA => PacketCode::ZeroSuppressed8BitLo,
            other => return Err(DecodeError::UnknownPacketCode(other)),
        };
        Ok(code)
    }

    /// Wire byte, `None` for the lite codes which carry no byte
    pub fn byte(self) -> Option<u8> {
        match self {
            PacketCode::Scope => Some(0xE5),
            PacketCode::VirginRaw => Some(0xE6),
            PacketCode::VirginRaw10 => Some(0x86),
            PacketCode::VirginRaw8BitHi => Some(0xC6),
            PacketCode::VirginRaw8BitLo => Some(0xA6),
            PacketCode::ProcessedRaw => Some(0xF2),
            PacketCode::ProcessedRaw10 => Some(0x92),
            PacketCode::ProcessedRaw8BitHi => Some(0xD2),
            PacketCode::ProcessedRaw8BitLo => Some(0xB2),
            PacketCode::ZeroSuppressed => Some(0xEA),
            PacketCode::ZeroSuppressed10 => Some(0x8A),
            PacketCode::ZeroSuppressed8BitHi => Some(0xCA),
            PacketCode::ZeroSuppressed8BitLo => Some(0xAA),
            PacketCode::ZeroSuppressedLite | PacketCode::ZeroSuppressedLite10 => None,
        }
    }

    /// Sample layout of the payload
    pub fn sample_format(self) -> SampleFormat {
        match self {
            PacketCode::Scope | PacketCode::VirginRaw | PacketCode::ProcessedRaw => {
                SampleFormat::Raw16
            }
            PacketCode::VirginRaw10 | PacketCode::ProcessedRaw10 => SampleFormat::Packed10,
            PacketCode::VirginRaw8BitHi | PacketCode::ProcessedRaw8BitHi => {
                SampleFormat::Stripped8 { shift: 2 }
            }
            PacketCode::VirginRaw8BitLo | PacketCode::ProcessedRaw8BitLo => {
                SampleFormat::Stripped8 { shift: 1 }
            }
            PacketCode::ZeroSuppressed => SampleFormat::Clusters(ClusterValue::U16),
            PacketCode::ZeroSuppressed10 | PacketCode::ZeroSuppressedLite10 => {
                SampleFormat::Clusters(ClusterValue::U10)
            }
            PacketCode::ZeroSuppressed8BitHi => {
                SampleFormat::Clusters(ClusterValue::U8 { shift: 2 })
            }
            PacketCode::ZeroSuppressed8BitLo | PacketCode::ZeroSuppressedLite => {
                SampleFormat::Clusters(ClusterValue::U8 { shift: 1 })
            }
        }
    }

    /// Zero-suppressed family (with or without medians)
    pub fn is_zero_suppressed(self) -> bool {
        matches!(self.sample_format(), SampleFormat::Clusters(_))
    }

    /// Carries two 16-bit APV medians after the packet code
    pub fn has_medians(self) -> bool {
        self.is_zero_suppressed() && self.byte().is_some()
    }

    /// Bytes before the first sample: length, packet code, medians
    pub fn header_size(self) -> usize {
        if self.byte().is_none() {
            2
        } else if self.has_medians() {
            layout::CHANNEL_MEDIAN_OFFSET + 4
        } else {
            layout::CHANNEL_PACKET_CODE_OFFSET + 1
        }
    }
}

/// Per-channel status bits. A set bit means "no problem".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatus(u8);

impl ChannelStatus {
    pub const APV0_ERROR: u8 = 0x01;
    pub const APV0_WRONG_HEADER: u8 = 0x02;
    pub const APV1_ERROR: u8 = 0x04;
    pub const APV1_WRONG_HEADER: u8 = 0x08;
    pub const OUT_OF_SYNC: u8 = 0x10;
    pub const LOCKED: u8 = 0x20;

    pub fn new(bits: u8) -> Self {
        Self(bits & CHANNEL_STATUS_OK)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 == CHANNEL_STATUS_OK
    }

    /// APV `apv` (0 or 1) flagged an error
    pub fn apv_error(self, apv: usize) -> bool {
        let bit = if apv == 0 { Self::APV0_ERROR } else { Self::APV1_ERROR };
        self.0 & bit == 0
    }

    /// APV `apv` (0 or 1) sent a wrong header
    pub fn apv_wrong_header(self, apv: usize) -> bool {
        let bit = if apv == 0 {
            Self::APV0_WRONG_HEADER
        } else {
            Self::APV1_WRONG_HEADER
        };
        self.0 & bit == 0
    }

    pub fn out_of_sync(self) -> bool {
        self.0 & Self::OUT_OF_SYNC == 0
    }

    pub fn unlocked(self) -> bool {
        self.0 & Self::LOCKED == 0
    }

    /// Human-readable list of problems
    pub fn problems(self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        if self.unlocked() {
            problems.push("not locked");
        }
        if self.out_of_sync() {
            problems.push("out of sync");
        }
        if self.apv_error(0) {
            problems.push("APV0 error");
        }
        if self.apv_wrong_header(0) {
            problems.push("APV0 wrong header");
        }
        if self.apv_error(1) {
            problems.push("APV1 error");
        }
        if self.apv_wrong_header(1) {
            problems.push("APV1 wrong header");
        }
        problems
    }
}

/// Acquisition mode of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DaqMode {
    Scope,
    VirginRaw,
    ProcessedRaw,
    ZeroSuppressed,
    Spy,
}

/// Variant within a DAQ mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DaqSuperMode {
    Normal,
    /// Simulated data from the FED's internal generator
    Fake,
    ZeroLite,
    FakeZeroLite,
    ZeroLite10Bit,
}

impl DaqSuperMode {
    /// Channels have the zero-suppressed lite layout
    pub fn is_zero_lite(self) -> bool {
        matches!(
            self,
            DaqSuperMode::ZeroLite | DaqSuperMode::FakeZeroLite | DaqSuperMode::ZeroLite10Bit
        )
    }
}

/// Map a 4-bit tracker event type to its DAQ mode and super mode
pub fn daq_modes(event_type: u8) -> DecodeResult<(DaqMode, DaqSuperMode)> {
    let modes = match event_type {
        1 => (DaqMode::Scope, DaqSuperMode::Normal),
        2 => (DaqMode::VirginRaw, DaqSuperMode::Normal),
        3 => (DaqMode::VirginRaw, DaqSuperMode::Fake),
        6 => (DaqMode::ProcessedRaw, DaqSuperMode::Normal),
        7 => (DaqMode::ProcessedRaw, DaqSuperMode::Fake),
        8 => (DaqMode::ZeroSuppressed, DaqSuperMode::ZeroLite10Bit),
        10 => (DaqMode::ZeroSuppressed, DaqSuperMode::Normal),
        11 => (DaqMode::ZeroSuppressed, DaqSuperMode::Fake),
        12 => (DaqMode::ZeroSuppressed, DaqSuperMode::ZeroLite),
        13 => (DaqMode::ZeroSuppressed, DaqSuperMode::FakeZeroLite),
        14 => (DaqMode::Spy, DaqSuperMode::Normal),
        other => return Err(DecodeError::UnknownDaqMode(other)),
    };
    Ok(modes)
}

/// Inverse of [`daq_modes`]
pub fn event_type_for(mode: DaqMode, super_mode: DaqSuperMode) -> Option<u8> {
    (0..16u8).find(|&t| daq_modes(t).ok() == Some((mode, super_mode)))
}

/// Overall buffer framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFormat {
    /// No tracker special header, always full debug
    Legacy,
    /// 32-bit words swapped within each 64-bit DAQ word
    OldVme,
    Standard,
}

impl EventFormat {
    /// Detect the format from the magic byte
    pub fn from_magic(magic: u8) -> Self {
        match magic {
            layout::MAGIC_OLD_VME => EventFormat::OldVme,
            layout::MAGIC_STANDARD => EventFormat::Standard,
            _ => EventFormat::Legacy,
        }
    }

    pub fn magic(self) -> Option<u8> {
        match self {
            EventFormat::OldVme => Some(layout::MAGIC_OLD_VME),
            EventFormat::Standard => Some(layout::MAGIC_STANDARD),
            EventFormat::Legacy => None,
        }
    }

    /// CRC input takes the 32-bit words of each pair in swapped order
    pub fn crc_word_swapped(self) -> bool {
        matches!(self, EventFormat::OldVme)
    }

    /// Offset of the first FE header
    pub fn header_size(self) -> usize {
        match self {
            EventFormat::Legacy => layout::DAQ_HEADER_SIZE,
            _ => layout::DAQ_HEADER_SIZE + layout::TRACKER_HEADER_SIZE,
        }
    }
}

/// FE header format from the tracker special header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderFormat {
    FullDebug,
    ApvError,
}

impl HeaderFormat {
    pub const FULL_DEBUG: u8 = 1;
    pub const APV_ERROR: u8 = 2;

    /// Parse the header format nibble
    pub fn from_nibble(nibble: u8) -> DecodeResult<Self> {
        match nibble {
            Self::FULL_DEBUG => Ok(HeaderFormat::FullDebug),
            Self::APV_ERROR => Ok(HeaderFormat::ApvError),
            other => Err(DecodeError::UnsupportedHeaderFormat(other)),
        }
    }

    pub fn nibble(self) -> u8 {
        match self {
            HeaderFormat::FullDebug => Self::FULL_DEBUG,
            HeaderFormat::ApvError => Self::APV_ERROR,
        }
    }
}
