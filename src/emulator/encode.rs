//! Channel payload and FE header encoders
//!
//! Inverse of the decoders: samples or clusters in, logical bytes out.
//! [`words_from_bytes`] turns a logical byte stream into the word buffer
//! layout the decoder reads.

use thiserror::Error;

use crate::command::merge_vector_elements;
use crate::common::{DecodeError, PackError};
use crate::decoder::channel::Cluster;
use crate::decoder::types::{
    geometry::{CHANNELS_PER_FEUNIT, STRIPS_PER_CHANNEL},
    layout, ClusterValue, PacketCode, SampleFormat, CHANNEL_STATUS_OK,
};

const TEN_BITS: u32 = 10;

/// Encoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Value {value} cannot be represented by packet code {code:?}")]
    ValueOutOfRange { value: u16, code: PacketCode },

    #[error("Packet code {0:?} does not match the channel data kind")]
    FormatMismatch(PacketCode),

    #[error(
        "Cluster at strip {first_strip} with {run} values is empty or runs past the last strip"
    )]
    InvalidCluster { first_strip: u8, run: usize },

    #[error("Channel of {0} bytes does not fit the 16-bit length field")]
    ChannelTooLong(usize),

    #[error("FE unit {0} out of range")]
    FeUnitOutOfRange(usize),

    #[error("Channel {0} out of range")]
    ChannelOutOfRange(usize),

    #[error("FE unit {0} already holds 12 channels")]
    TooManyChannels(usize),

    #[error("FE unit {fe_unit} payload of {length} bytes does not fit the 16-bit length field")]
    FeUnitTooLong { fe_unit: usize, length: usize },

    #[error("Packing failed: {0}")]
    Pack(#[from] PackError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Content of one channel to encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelData {
    /// One value per strip: scope, virgin raw or processed raw codes
    Samples { code: PacketCode, values: Vec<u16> },
    /// Zero-suppressed codes; medians are ignored by the lite codes
    Clusters {
        code: PacketCode,
        medians: [u16; 2],
        clusters: Vec<Cluster>,
    },
}

impl ChannelData {
    pub fn packet_code(&self) -> PacketCode {
        match self {
            ChannelData::Samples { code, .. } | ChannelData::Clusters { code, .. } => *code,
        }
    }
}

/// Pack logical bytes into buffer words, zero-filling the last word
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(word)
        })
        .collect()
}

fn out_of_range(value: u16, code: PacketCode) -> EncodeError {
    EncodeError::ValueOutOfRange { value, code }
}

/// Value stored as bits `shift..shift + 8`; lower bits must be zero
fn stripped_byte(value: u16, shift: u32, code: PacketCode) -> Result<u8, EncodeError> {
    if value & ((1 << shift) - 1) != 0 || value >> shift > 0xFF {
        return Err(out_of_range(value, code));
    }
    Ok((value >> shift) as u8)
}

fn encode_samples(code: PacketCode, values: &[u16], out: &mut Vec<u8>) -> Result<(), EncodeError> {
    match code.sample_format() {
        SampleFormat::Raw16 => {
            for &value in values {
                out.extend(value.to_be_bytes());
            }
        }
        SampleFormat::Packed10 => {
            if values.is_empty() {
                return Ok(());
            }
            if let Some(&value) = values.iter().find(|&&v| v > 0x3FF) {
                return Err(out_of_range(value, code));
            }
            let elements: Vec<u32> = values.iter().map(|&v| v as u32).collect();
            let total_bits = TEN_BITS * values.len() as u32;
            let packed = merge_vector_elements(&elements, total_bits)?;
            let n_bytes = total_bits.div_ceil(8) as usize;
            out.extend(packed.iter().flat_map(|w| w.to_be_bytes()).take(n_bytes));
        }
        SampleFormat::Stripped8 { shift } => {
            for &value in values {
                out.push(stripped_byte(value, shift, code)?);
            }
        }
        SampleFormat::Clusters(_) => return Err(EncodeError::FormatMismatch(code)),
    }
    Ok(())
}

fn encode_clusters(
    code: PacketCode,
    medians: [u16; 2],
    clusters: &[Cluster],
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let SampleFormat::Clusters(kind) = code.sample_format() else {
        return Err(EncodeError::FormatMismatch(code));
    };
    if code.has_medians() {
        for median in medians {
            out.extend(median.to_be_bytes());
        }
    }
    for cluster in clusters {
        let run = cluster.values.len();
        if run == 0
            || run > u8::MAX as usize
            || cluster.first_strip as usize + run > STRIPS_PER_CHANNEL
        {
            return Err(EncodeError::InvalidCluster {
                first_strip: cluster.first_strip,
                run,
            });
        }
        out.push(cluster.first_strip);
        out.push(run as u8);
        for &value in &cluster.values {
            match kind {
                ClusterValue::U16 => out.extend(value.to_be_bytes()),
                ClusterValue::U10 => {
                    if value > 0x3FF {
                        return Err(out_of_range(value, code));
                    }
                    out.extend(value.to_be_bytes());
                }
                ClusterValue::U8 { shift } => out.push(stripped_byte(value, shift, code)?),
            }
        }
    }
    // end marker
    out.extend([0, 0]);
    Ok(())
}

/// Encode one channel: length field, packet code, optional medians, data
pub fn encode_channel(data: &ChannelData) -> Result<Vec<u8>, EncodeError> {
    let code = data.packet_code();
    let mut out = vec![0u8; layout::CHANNEL_PACKET_CODE_OFFSET];
    if let Some(byte) = code.byte() {
        out.push(byte);
    }
    match data {
        ChannelData::Samples { values, .. } => encode_samples(code, values, &mut out)?,
        ChannelData::Clusters {
            medians, clusters, ..
        } => encode_clusters(code, *medians, clusters, &mut out)?,
    }

    let length = u16::try_from(out.len()).map_err(|_| EncodeError::ChannelTooLong(out.len()))?;
    out[..2].copy_from_slice(&length.to_be_bytes());
    Ok(out)
}

/// Fields of a full debug FE header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeHeaderFields {
    /// 6-bit status per channel, channel 0 first
    pub statuses: [u8; CHANNELS_PER_FEUNIT],
    pub length: u16,
    pub bytes_10_to_13: u32,
    pub majority_pipeline: u8,
}

impl Default for FeHeaderFields {
    fn default() -> Self {
        Self {
            statuses: [CHANNEL_STATUS_OK; CHANNELS_PER_FEUNIT],
            length: 0,
            bytes_10_to_13: 0,
            majority_pipeline: 0,
        }
    }
}

/// Encode a 16-byte full debug FE header
pub fn encode_fe_header(fields: &FeHeaderFields) -> [u8; layout::FE_HEADER_SIZE] {
    // channel 11 in the top bits, channel 0 in the lowest six
    let status_bits = fields
        .statuses
        .iter()
        .rev()
        .fold(0u128, |acc, &bits| (acc << 6) | (bits & CHANNEL_STATUS_OK) as u128);

    let mut header = [0u8; layout::FE_HEADER_SIZE];
    let high = layout::FE_STATUS_WORD_HIGH;
    let low = layout::FE_STATUS_WORD_LOW;
    header[high..high + 4].copy_from_slice(&((status_bits >> 32) as u32).to_be_bytes());
    header[low..low + 4].copy_from_slice(&(status_bits as u32).to_be_bytes());
    header[layout::FE_LENGTH_OFFSET..layout::FE_LENGTH_OFFSET + 2]
        .copy_from_slice(&fields.length.to_be_bytes());
    header[layout::FE_BYTES_10_TO_13..layout::FE_BYTES_10_TO_13 + 4]
        .copy_from_slice(&fields.bytes_10_to_13.to_be_bytes());
    header[layout::FE_STATUS_TOP_BYTE] = (status_bits >> 64) as u8;
    header[layout::FE_MAJORITY_PIPELINE] = fields.majority_pipeline;
    header
}
