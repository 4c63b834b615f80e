//! Decoder for one FED channel's payload
//!
//! # Data Format
//!
//! ```text
//! byte 0-1   channel length in bytes, including this header
//! byte 2     packet code (absent for zero-suppressed lite)
//! byte 3-6   APV0 / APV1 medians (zero-suppressed with packet code only)
//! ...        samples, layout chosen by the packet code
//! ```
//!
//! Samples are decoded on every call to [`Channel::get_samples`]; nothing
//! is cached.

use serde::Serialize;

use super::types::{
    geometry::STRIPS_PER_CHANNEL, layout, ChannelStatus, ClusterValue, DaqSuperMode, PacketCode,
    SampleFormat,
};
use super::view::EventBufferView;
use crate::common::{DecodeError, DecodeResult};

const MASK_10_BIT: u16 = 0x3FF;

/// How the channels of an event encode their header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// Length, packet code, optional medians
    Coded,
    /// Zero-suppressed lite, 8-bit cluster values
    ZeroLite,
    /// Zero-suppressed lite, 10-bit cluster values
    ZeroLite10,
}

impl ChannelLayout {
    pub fn from_super_mode(super_mode: DaqSuperMode) -> Self {
        match super_mode {
            DaqSuperMode::ZeroLite | DaqSuperMode::FakeZeroLite => ChannelLayout::ZeroLite,
            DaqSuperMode::ZeroLite10Bit => ChannelLayout::ZeroLite10,
            DaqSuperMode::Normal | DaqSuperMode::Fake => ChannelLayout::Coded,
        }
    }
}

/// One zero-suppressed cluster: consecutive strips above threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub first_strip: u8,
    pub values: Vec<u16>,
}

/// Decoded view of one channel
#[derive(Debug, Clone, Copy)]
pub struct Channel<'a> {
    view: EventBufferView<'a>,
    status: ChannelStatus,
    packet_code: PacketCode,
    data_length: u16,
}

impl<'a> Channel<'a> {
    /// Build a channel at `cursor`, which spans the rest of the FE payload
    pub fn new(
        cursor: EventBufferView<'a>,
        status: ChannelStatus,
        channel_layout: ChannelLayout,
    ) -> DecodeResult<Self> {
        let data_length = cursor.get_u16(layout::CHANNEL_LENGTH_OFFSET)?;
        let length = data_length as usize;
        if length > cursor.len() {
            return Err(DecodeError::ChannelLengthExceedsBuffer {
                declared: length,
                available: cursor.len(),
            });
        }

        let packet_code = match channel_layout {
            ChannelLayout::ZeroLite => PacketCode::ZeroSuppressedLite,
            ChannelLayout::ZeroLite10 => PacketCode::ZeroSuppressedLite10,
            ChannelLayout::Coded => {
                let minimum = layout::CHANNEL_PACKET_CODE_OFFSET + 1;
                if length < minimum {
                    return Err(DecodeError::ChannelTooShort { length, minimum });
                }
                PacketCode::from_byte(cursor.get_u8(layout::CHANNEL_PACKET_CODE_OFFSET)?)?
            }
        };

        let minimum = packet_code.header_size();
        if length < minimum {
            return Err(DecodeError::ChannelTooShort { length, minimum });
        }
        let payload = length - minimum;
        if packet_code.sample_format() == SampleFormat::Raw16 && payload % 2 != 0 {
            return Err(DecodeError::MisalignedChannelLength { payload });
        }

        let mut view = cursor;
        view.resize(length)?;

        Ok(Self {
            view,
            status,
            packet_code,
            data_length,
        })
    }

    /// Channel length in bytes, header included
    pub fn data_length(&self) -> u16 {
        self.data_length
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn packet_code(&self) -> PacketCode {
        self.packet_code
    }

    /// Raw bytes of the channel, header included
    pub fn view(&self) -> EventBufferView<'a> {
        self.view
    }

    fn payload_len(&self) -> usize {
        self.data_length as usize - self.packet_code.header_size()
    }

    /// Number of values [`get_samples`](Self::get_samples) returns.
    ///
    /// For every zero-suppressed code this is the full strip count, since
    /// clusters are scattered into a zero-filled strip array. Use
    /// [`hit_strips`](Self::hit_strips) for the number of transmitted strips.
    pub fn samples(&self) -> usize {
        let payload = self.payload_len();
        match self.packet_code.sample_format() {
            SampleFormat::Raw16 => payload / 2,
            SampleFormat::Packed10 => payload * 4 / 5,
            SampleFormat::Stripped8 { .. } => payload,
            SampleFormat::Clusters(_) => STRIPS_PER_CHANNEL,
        }
    }

    /// Decode all samples
    pub fn get_samples(&self) -> DecodeResult<Vec<u16>> {
        let mut samples = Vec::new();
        self.samples_into(&mut samples)?;
        Ok(samples)
    }

    /// Decode all samples into `out`, replacing its contents
    pub fn samples_into(&self, out: &mut Vec<u16>) -> DecodeResult<()> {
        out.clear();
        self.decode_samples(out)
            .map_err(|source| DecodeError::SamplesFailed {
                source: Box::new(source),
            })
    }

    fn decode_samples(&self, out: &mut Vec<u16>) -> DecodeResult<()> {
        let start = self.packet_code.header_size();
        let count = self.samples();
        match self.packet_code.sample_format() {
            SampleFormat::Clusters(_) => {
                out.resize(STRIPS_PER_CHANNEL, 0);
                for cluster in self.clusters()? {
                    let first = cluster.first_strip as usize;
                    for (k, value) in cluster.values.into_iter().enumerate() {
                        let strip = first + k;
                        let slot = out.get_mut(strip).ok_or(DecodeError::OutOfBounds {
                            offset: strip,
                            len: STRIPS_PER_CHANNEL,
                        })?;
                        *slot = value;
                    }
                }
            }
            SampleFormat::Packed10 => {
                out.reserve(count);
                // bits of the current byte already consumed: 0, 2, 4, 6
                let mut overlap = 0u32;
                let mut pos = start;
                for _ in 0..count {
                    let pair = self.view.get_u16(pos)?;
                    out.push((pair >> (6 - overlap)) & MASK_10_BIT);
                    overlap += 2;
                    pos += 1;
                    if overlap == 8 {
                        overlap = 0;
                        pos += 1;
                    }
                }
            }
            SampleFormat::Stripped8 { shift } => {
                out.reserve(count);
                for i in 0..count {
                    out.push((self.view.get_u8(start + i)? as u16) << shift);
                }
            }
            SampleFormat::Raw16 => {
                out.reserve(count);
                for i in 0..count {
                    out.push(self.view.get_u16(start + 2 * i)?);
                }
            }
        }
        Ok(())
    }

    /// Zero-suppressed cluster records. A run length of zero ends the list,
    /// as does a lone trailing byte.
    pub fn clusters(&self) -> DecodeResult<Vec<Cluster>> {
        let value_kind = match self.packet_code.sample_format() {
            SampleFormat::Clusters(kind) => kind,
            _ => return Ok(Vec::new()),
        };

        let end = self.view.len();
        let mut pos = self.packet_code.header_size();
        let mut clusters = Vec::new();
        while pos + 2 <= end {
            let first_strip = self.view.get_u8(pos)?;
            let run = self.view.get_u8(pos + 1)? as usize;
            pos += 2;
            if run == 0 {
                break;
            }
            let mut values = Vec::with_capacity(run);
            for _ in 0..run {
                let value = match value_kind {
                    ClusterValue::U16 => self.view.get_u16(pos)?,
                    ClusterValue::U10 => self.view.get_u16(pos)? & MASK_10_BIT,
                    ClusterValue::U8 { shift } => (self.view.get_u8(pos)? as u16) << shift,
                };
                values.push(value);
                pos += value_kind.size();
            }
            clusters.push(Cluster {
                first_strip,
                values,
            });
        }
        Ok(clusters)
    }

    /// Number of zero-suppressed cluster records
    pub fn cluster_count(&self) -> DecodeResult<usize> {
        Ok(self.clusters()?.len())
    }

    /// Number of strips transmitted in zero-suppressed clusters
    pub fn hit_strips(&self) -> DecodeResult<usize> {
        Ok(self.clusters()?.iter().map(|c| c.values.len()).sum())
    }

    /// Median of APV `apv` (0 or 1), zero-suppressed data only
    pub fn get_median(&self, apv: usize) -> DecodeResult<u16> {
        if !self.packet_code.has_medians() {
            return Err(DecodeError::NoMedian(self.packet_code.byte().unwrap_or(0)));
        }
        if apv > 1 {
            return Err(DecodeError::InvalidApv(apv));
        }
        self.view.get_u16(layout::CHANNEL_MEDIAN_OFFSET + 2 * apv)
    }
}
