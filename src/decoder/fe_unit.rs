//! Decoder for one front-end FPGA: its 16-byte header and channel payloads
//!
//! # Full debug FE header
//!
//! ```text
//! byte 0-3    status word (channels 5-10)
//! byte 4-7    status word (channels 0-5)
//! byte 8-9    payload length in bytes
//! byte 10-13  FE debug word
//! byte 14     status top byte (channels 10-11)
//! byte 15     majority pipeline address
//! ```
//!
//! The 72 status bits read MSB-first from [byte 14, word 0, word 4] give
//! channels 11 down to 0, six bits each.

use super::channel::{Channel, ChannelLayout};
use super::types::{geometry::CHANNELS_PER_FEUNIT, layout, ChannelStatus, HeaderFormat};
use super::view::{BitReader, EventBufferView};
use crate::common::{DecodeError, DecodeResult};

const STATUS_BITS: u32 = 6;

/// Decoded front-end unit
#[derive(Debug, Clone)]
pub struct FeUnit<'a> {
    header: EventBufferView<'a>,
    payload: EventBufferView<'a>,
    statuses: [ChannelStatus; CHANNELS_PER_FEUNIT],
    channels: Vec<Channel<'a>>,
}

/// Per-channel status of an FE header, channel 0 first
pub fn decode_channel_statuses(
    header: &EventBufferView<'_>,
) -> DecodeResult<[ChannelStatus; CHANNELS_PER_FEUNIT]> {
    let mut reader = BitReader::new();
    reader
        .push(header.get_u8(layout::FE_STATUS_TOP_BYTE)? as u32, 8)
        .push(header.get_u32(layout::FE_STATUS_WORD_HIGH)?, 32)
        .push(header.get_u32(layout::FE_STATUS_WORD_LOW)?, 32);

    let mut statuses = [ChannelStatus::new(0); CHANNELS_PER_FEUNIT];
    for slot in statuses.iter_mut().rev() {
        let bits = reader.read(STATUS_BITS).ok_or(DecodeError::OutOfBounds {
            offset: layout::FE_HEADER_SIZE,
            len: header.len(),
        })?;
        *slot = ChannelStatus::new(bits as u8);
    }
    Ok(statuses)
}

impl<'a> FeUnit<'a> {
    /// Decode an FE unit from its header and the data view starting at its
    /// first channel. Only the full debug header format is supported.
    pub fn new(
        header: EventBufferView<'a>,
        data: EventBufferView<'a>,
        header_format: HeaderFormat,
        channel_layout: ChannelLayout,
    ) -> DecodeResult<Self> {
        if header_format != HeaderFormat::FullDebug {
            return Err(DecodeError::UnsupportedHeaderFormat(header_format.nibble()));
        }
        let header = header.sub_view(0, layout::FE_HEADER_SIZE)?;

        let declared = header.get_u16(layout::FE_LENGTH_OFFSET)? as usize;
        if declared > data.len() {
            return Err(DecodeError::FeLengthExceedsBuffer {
                declared,
                available: data.len(),
            });
        }
        let payload = data.sub_view(0, declared)?;

        let statuses = decode_channel_statuses(&header)?;

        let mut channels = Vec::with_capacity(CHANNELS_PER_FEUNIT);
        let mut cursor = payload;
        while !cursor.is_empty() && channels.len() < CHANNELS_PER_FEUNIT {
            let index = channels.len();
            let channel = Channel::new(cursor, statuses[index], channel_layout)
                .map_err(|e| e.in_channel(index))?;
            cursor
                .advance(channel.data_length() as usize)
                .map_err(|e| e.in_channel(index))?;
            channels.push(channel);
        }
        if !cursor.is_empty() {
            tracing::debug!(
                leftover = cursor.len(),
                "FE payload has bytes after the last channel"
            );
        }

        Ok(Self {
            header,
            payload,
            statuses,
            channels,
        })
    }

    /// Payload length declared in the header
    pub fn declared_length(&self) -> usize {
        self.payload.len()
    }

    pub fn majority_pipeline(&self) -> DecodeResult<u8> {
        self.header.get_u8(layout::FE_MAJORITY_PIPELINE)
    }

    pub fn bytes_10_to_13(&self) -> DecodeResult<u32> {
        self.header.get_u32(layout::FE_BYTES_10_TO_13)
    }

    pub fn channels(&self) -> &[Channel<'a>] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&Channel<'a>> {
        self.channels.get(index)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Header status of channel `index`, present whether or not the channel sent data
    pub fn channel_status(&self, index: usize) -> Option<ChannelStatus> {
        self.statuses.get(index).copied()
    }

    pub fn header(&self) -> EventBufferView<'a> {
        self.header
    }

    pub fn payload(&self) -> EventBufferView<'a> {
        self.payload
    }
}
