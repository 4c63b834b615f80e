//! Top-level FED event decoder
//!
//! # Buffer Layout (logical byte stream)
//!
//! ```text
//! 0-7     DAQ header: BOE | event type, L1 event number, BX, source id
//! 8-15    tracker special header (absent in legacy format)
//! ...     8 x 16-byte FE headers, then FE payloads back to back
//!         (spy mode: 4-byte length and an opaque blob instead)
//! ...     up to 3 zero padding words
//! +8      trailer: EOE, total length (64-bit words), CRC, status
//! ```
//!
//! Decoding is all or nothing: either every FE unit and channel header
//! parses, or construction fails with the offending FE unit / channel
//! index attached. Channel samples are decoded lazily.

use serde::Serialize;

use super::channel::{Channel, ChannelLayout};
use super::crc::calculate_fed_buffer_crc;
use super::fe_unit::FeUnit;
use super::types::{
    daq_modes,
    geometry::{APVS_PER_CHANNEL, CHANNELS_PER_FEUNIT, FEUNITS_PER_FED},
    layout, ChannelStatus, DaqMode, DaqSuperMode, EventFormat, HeaderFormat, PacketCode,
};
use super::view::EventBufferView;
use crate::common::{DecodeError, DecodeResult};
use crate::config::{DecoderOptions, FedDescription};

/// APV status bits (error, wrong header) of one APV
const APV_STATUS_BITS: u8 = 0x03;

/// DAQ (S-link) header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaqHeader {
    pub boe: u8,
    pub event_type: u8,
    /// 24-bit L1 accept counter
    pub event_number: u32,
    /// 12-bit bunch crossing number
    pub bunch_crossing: u16,
    pub source_id: u16,
    pub format_version: u8,
}

impl DaqHeader {
    fn parse(view: &EventBufferView<'_>) -> DecodeResult<Self> {
        let first = view.get_u32(0)?;
        let second = view.get_u32(4)?;
        Ok(Self {
            boe: (first >> 28) as u8,
            event_type: ((first >> 24) & 0xF) as u8,
            event_number: first & 0x00FF_FFFF,
            bunch_crossing: (second >> 20) as u16,
            source_id: ((second >> 8) & 0xFFF) as u16,
            format_version: ((second >> 4) & 0xF) as u8,
        })
    }
}

/// Tracker special header, standard and old-VME formats only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerHeader {
    pub magic: u8,
    pub header_format: u8,
    pub event_type: u8,
    pub apve_address: u8,
    pub apv_address_error: u8,
    pub fe_enable: u8,
    pub fe_overflow: u8,
    pub fed_status: u16,
}

impl TrackerHeader {
    fn parse(view: &EventBufferView<'_>) -> DecodeResult<Self> {
        let modes = view.get_u8(1)?;
        Ok(Self {
            magic: view.get_u8(0)?,
            header_format: modes >> 4,
            event_type: modes & 0xF,
            apve_address: view.get_u8(2)?,
            apv_address_error: view.get_u8(3)?,
            fe_enable: view.get_u8(4)?,
            fe_overflow: view.get_u8(5)?,
            fed_status: view.get_u16(6)?,
        })
    }
}

/// DAQ trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Trailer {
    pub eoe: u8,
    /// Event length in 64-bit words, headers and trailer included
    pub total_length: u32,
    pub crc: u16,
    pub status: u16,
}

impl Trailer {
    fn parse(view: &EventBufferView<'_>) -> DecodeResult<Self> {
        let first = view.get_u32(0)?;
        Ok(Self {
            eoe: (first >> 24) as u8,
            total_length: first & 0x00FF_FFFF,
            crc: view.get_u16(4)?,
            status: view.get_u16(6)?,
        })
    }
}

/// Serializable overview of a decoded event
#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub format: EventFormat,
    pub daq_mode: DaqMode,
    pub daq_super_mode: DaqSuperMode,
    pub event_number: u32,
    pub bunch_crossing: u16,
    pub source_id: u16,
    pub event_type: u8,
    pub total_length: u32,
    pub crc: u16,
    pub calculated_crc: u16,
    pub padding_bytes: usize,
    pub total_channels: usize,
    pub spy_length: Option<usize>,
    pub fe_units: Vec<FeUnitSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeUnitSummary {
    pub index: usize,
    pub enabled: bool,
    pub length: usize,
    pub channels: usize,
    pub majority_pipeline: u8,
    pub bad_channels: Vec<usize>,
}

/// A decoded FED event borrowing its word buffer
#[derive(Debug, Clone)]
pub struct Event<'a> {
    buffer: &'a [u32],
    format: EventFormat,
    header_format: HeaderFormat,
    daq_mode: DaqMode,
    super_mode: DaqSuperMode,
    daq_header: DaqHeader,
    tracker_header: Option<TrackerHeader>,
    trailer: Trailer,
    /// Byte offset of the trailer start
    trailer_offset: usize,
    fe_units: Vec<FeUnit<'a>>,
    spy: Option<EventBufferView<'a>>,
}

impl<'a> Event<'a> {
    /// Decode `buffer`. Fails on the first malformed component.
    pub fn new(buffer: &'a [u32]) -> DecodeResult<Self> {
        let full = EventBufferView::new(buffer);
        let minimum = layout::DAQ_HEADER_SIZE + layout::TRAILER_SIZE;
        if full.len() < minimum {
            return Err(DecodeError::BufferTooShort {
                actual: full.len(),
                required: minimum,
            });
        }

        let daq_header = DaqHeader::parse(&full)?;
        if daq_header.boe != layout::BOE_MARKER {
            tracing::debug!(boe = daq_header.boe, "Unexpected BOE marker in DAQ header");
        }

        let format = EventFormat::from_magic(full.get_u8(layout::FORMAT_MAGIC_OFFSET)?);
        let (tracker_header, header_format, event_type) = match format {
            EventFormat::Legacy => (None, HeaderFormat::FullDebug, daq_header.event_type),
            EventFormat::OldVme | EventFormat::Standard => {
                let special = full.sub_view(layout::DAQ_HEADER_SIZE, layout::TRACKER_HEADER_SIZE)?;
                let tracker = TrackerHeader::parse(&special)?;
                let header_format = HeaderFormat::from_nibble(tracker.header_format)?;
                if header_format != HeaderFormat::FullDebug {
                    return Err(DecodeError::UnsupportedHeaderFormat(tracker.header_format));
                }
                (Some(tracker), header_format, tracker.event_type)
            }
        };
        let (daq_mode, super_mode) = daq_modes(event_type)?;
        tracing::debug!(?format, ?daq_mode, ?super_mode, "Event format detected");

        let header_size = format.header_size();
        let mut cursor = full;
        cursor
            .advance(header_size)
            .map_err(|_| DecodeError::BufferTooShort {
                actual: full.len(),
                required: header_size,
            })?;

        let mut fe_units = Vec::with_capacity(FEUNITS_PER_FED);
        let mut spy = None;
        if daq_mode == DaqMode::Spy {
            let declared = cursor
                .get_u32(0)
                .map_err(|_| DecodeError::BufferTooShort {
                    actual: full.len(),
                    required: header_size + layout::SPY_LENGTH_SIZE,
                })? as usize;
            cursor.advance(layout::SPY_LENGTH_SIZE)?;
            if declared > cursor.len() {
                return Err(DecodeError::SpyLengthExceedsBuffer {
                    declared,
                    available: cursor.len(),
                });
            }
            spy = Some(cursor.sub_view(0, declared)?);
            cursor.advance(declared)?;
        } else {
            let headers_len = FEUNITS_PER_FED * layout::FE_HEADER_SIZE;
            let headers = cursor
                .sub_view(0, headers_len)
                .map_err(|_| DecodeError::BufferTooShort {
                    actual: full.len(),
                    required: header_size + headers_len,
                })?;
            cursor.advance(headers_len)?;

            let channel_layout = ChannelLayout::from_super_mode(super_mode);
            for index in 0..FEUNITS_PER_FED {
                let header =
                    headers.sub_view(index * layout::FE_HEADER_SIZE, layout::FE_HEADER_SIZE)?;
                let fe = FeUnit::new(header, cursor, header_format, channel_layout)
                    .map_err(|e| e.in_fe_unit(index))?;
                cursor
                    .advance(fe.declared_length())
                    .map_err(|e| e.in_fe_unit(index))?;
                fe_units.push(fe);
            }
        }

        let trailer_offset = locate_trailer(cursor)?;
        let trailer = Trailer::parse(&full.sub_view(trailer_offset, layout::TRAILER_SIZE)?)?;
        if trailer.eoe != layout::EOE_MARKER {
            tracing::debug!(eoe = trailer.eoe, "Unexpected EOE marker in trailer");
        }

        let event = Self {
            buffer,
            format,
            header_format,
            daq_mode,
            super_mode,
            daq_header,
            tracker_header,
            trailer,
            trailer_offset,
            fe_units,
            spy,
        };
        tracing::debug!(
            event_number = event.event_number(),
            bunch_crossing = event.bunch_crossing(),
            total_length = event.total_length(),
            channels = event.total_channels(),
            "Decoded FED event"
        );
        Ok(event)
    }

    pub fn buffer(&self) -> &'a [u32] {
        self.buffer
    }

    pub fn event_format(&self) -> EventFormat {
        self.format
    }

    pub fn header_format(&self) -> HeaderFormat {
        self.header_format
    }

    pub fn daq_mode(&self) -> DaqMode {
        self.daq_mode
    }

    pub fn daq_super_mode(&self) -> DaqSuperMode {
        self.super_mode
    }

    pub fn daq_header(&self) -> &DaqHeader {
        &self.daq_header
    }

    /// `None` for legacy format events
    pub fn tracker_header(&self) -> Option<&TrackerHeader> {
        self.tracker_header.as_ref()
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn event_number(&self) -> u32 {
        self.daq_header.event_number
    }

    pub fn bunch_crossing(&self) -> u16 {
        self.daq_header.bunch_crossing
    }

    pub fn source_id(&self) -> u16 {
        self.daq_header.source_id
    }

    pub fn format_version(&self) -> u8 {
        self.daq_header.format_version
    }

    /// Event type nibble of the DAQ header
    pub fn event_type(&self) -> u8 {
        self.daq_header.event_type
    }

    /// Event type nibble of the tracker special header
    pub fn tracker_event_type(&self) -> Option<u8> {
        self.tracker_header.map(|h| h.event_type)
    }

    pub fn apve_address(&self) -> Option<u8> {
        self.tracker_header.map(|h| h.apve_address)
    }

    pub fn apv_address_error(&self) -> Option<u8> {
        self.tracker_header.map(|h| h.apv_address_error)
    }

    pub fn fe_enable(&self) -> Option<u8> {
        self.tracker_header.map(|h| h.fe_enable)
    }

    pub fn fe_overflow(&self) -> Option<u8> {
        self.tracker_header.map(|h| h.fe_overflow)
    }

    pub fn fed_status(&self) -> Option<u16> {
        self.tracker_header.map(|h| h.fed_status)
    }

    /// FE unit `index` enabled according to the FE enable byte (bit `index`).
    /// Legacy events carry no enable byte and report every unit enabled.
    pub fn is_fe_unit_enabled(&self, index: usize) -> bool {
        index < FEUNITS_PER_FED
            && self
                .fe_enable()
                .map_or(true, |enable| enable & (1 << index) != 0)
    }

    /// Event length in 64-bit words, from the trailer
    pub fn total_length(&self) -> u32 {
        self.trailer.total_length
    }

    /// CRC stored in the trailer
    pub fn crc(&self) -> u16 {
        self.trailer.crc
    }

    pub fn trailer_status(&self) -> u16 {
        self.trailer.status
    }

    /// Bytes from the buffer start to the trailer end
    pub fn event_span(&self) -> usize {
        self.trailer_offset + layout::TRAILER_SIZE
    }

    /// Bytes in the buffer after the trailer
    pub fn padding_bytes(&self) -> usize {
        self.buffer.len() * 4 - self.event_span()
    }

    /// CRC over the event span, with the stored CRC field taken as zero
    pub fn calc_crc(&self) -> u16 {
        let words = &self.buffer[..self.event_span() / 4];
        calculate_fed_buffer_crc(words, self.format.crc_word_swapped())
    }

    pub fn fe_units(&self) -> &[FeUnit<'a>] {
        &self.fe_units
    }

    pub fn fe_unit(&self, index: usize) -> Option<&FeUnit<'a>> {
        self.fe_units.get(index)
    }

    /// Number of decoded FE units: 8, or 0 in spy mode
    pub fn fe_unit_count(&self) -> usize {
        self.fe_units.len()
    }

    pub fn total_channels(&self) -> usize {
        self.fe_units.iter().map(FeUnit::channel_count).sum()
    }

    /// Every decoded channel as `(fe_unit, channel, decoder)`
    pub fn channels(&self) -> impl Iterator<Item = (usize, usize, &Channel<'a>)> + '_ {
        self.fe_units.iter().enumerate().flat_map(|(fe_index, fe)| {
            fe.channels()
                .iter()
                .enumerate()
                .map(move |(ch_index, channel)| (fe_index, ch_index, channel))
        })
    }

    /// Channel by its position among all decoded channels of the event
    pub fn channel(&self, global: usize) -> Option<&Channel<'a>> {
        self.channels().nth(global).map(|(_, _, channel)| channel)
    }

    /// Spy blob, spy mode only
    pub fn spy_data(&self) -> Option<EventBufferView<'a>> {
        self.spy
    }

    /// Length, CRC and packet code consistency checks with default options
    pub fn check_event(&self) -> DecodeResult<()> {
        self.check_event_with(&DecoderOptions::default())
    }

    /// Check the trailer length against the consumed span, the stored CRC
    /// (unless disabled) and, for coded zero-suppressed events, the channel
    /// packet codes.
    ///
    /// The packet code check accepts every member of the zero-suppressed
    /// family (`0xEA`, `0x8A`, `0xCA`, `0xAA`), not only plain `0xEA`, since
    /// the bit-stripped variants are valid in the same DAQ mode. A failure
    /// still reports `0xEA` as the expected code.
    pub fn check_event_with(&self, options: &DecoderOptions) -> DecodeResult<()> {
        let declared_bytes = 8 * self.total_length() as usize;
        let actual_bytes = self.event_span();
        if declared_bytes != actual_bytes {
            tracing::warn!(declared_bytes, actual_bytes, "Event length mismatch");
            return Err(DecodeError::LengthMismatch {
                declared_bytes,
                actual_bytes,
            });
        }

        if options.verify_crc {
            let calculated = self.calc_crc();
            if calculated != self.crc() {
                tracing::warn!(
                    stored = self.crc(),
                    calculated,
                    event_number = self.event_number(),
                    "CRC mismatch"
                );
                return Err(DecodeError::CrcMismatch {
                    stored: self.crc(),
                    calculated,
                });
            }
        }

        if self.daq_mode == DaqMode::ZeroSuppressed && !self.super_mode.is_zero_lite() {
            for (fe_unit, channel, decoder) in self.channels() {
                let code = decoder.packet_code();
                if !code.is_zero_suppressed() {
                    return Err(DecodeError::PacketCodeMismatch {
                        fe_unit,
                        channel,
                        expected: PacketCode::ZeroSuppressed.byte().unwrap_or_default(),
                        found: code.byte().unwrap_or_default(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Require a healthy status on every enabled channel. Status bits of a
    /// disabled APV are ignored. All failures are collected into one error.
    pub fn check_channel_statuses(&self, description: &FedDescription) -> DecodeResult<()> {
        let mut lines = Vec::new();
        for (fe_index, fe) in self.fe_units.iter().enumerate() {
            if !description.is_fe_unit_enabled(fe_index) {
                continue;
            }
            for ch_index in 0..CHANNELS_PER_FEUNIT {
                if !description.is_channel_enabled(fe_index, ch_index) {
                    continue;
                }
                let Some(status) = fe.channel_status(ch_index) else {
                    continue;
                };
                let effective = masked_status(description, fe_index, ch_index, status);
                if effective.is_ok() {
                    continue;
                }
                lines.push(format!(
                    "FE unit {} channel {}: status 0x{:02x} ({})",
                    fe_index,
                    ch_index,
                    status.bits(),
                    effective.problems().join(", ")
                ));
            }
        }

        if lines.is_empty() {
            return Ok(());
        }
        tracing::warn!(
            failures = lines.len(),
            event_number = self.event_number(),
            "Channel status check failed"
        );
        Err(DecodeError::ChannelStatus {
            failures: lines.len(),
            report: lines.join("\n"),
        })
    }

    pub fn summary(&self) -> EventSummary {
        let fe_units = self
            .fe_units
            .iter()
            .enumerate()
            .map(|(index, fe)| FeUnitSummary {
                index,
                enabled: self.is_fe_unit_enabled(index),
                length: fe.declared_length(),
                channels: fe.channel_count(),
                majority_pipeline: fe.majority_pipeline().unwrap_or_default(),
                bad_channels: (0..CHANNELS_PER_FEUNIT)
                    .filter(|&ch| fe.channel_status(ch).is_some_and(|s| !s.is_ok()))
                    .collect(),
            })
            .collect();

        EventSummary {
            format: self.format,
            daq_mode: self.daq_mode,
            daq_super_mode: self.super_mode,
            event_number: self.event_number(),
            bunch_crossing: self.bunch_crossing(),
            source_id: self.source_id(),
            event_type: self.tracker_event_type().unwrap_or(self.event_type()),
            total_length: self.total_length(),
            crc: self.crc(),
            calculated_crc: self.calc_crc(),
            padding_bytes: self.padding_bytes(),
            total_channels: self.total_channels(),
            spy_length: self.spy.map(|view| view.len()),
            fe_units,
        }
    }
}

/// Byte offset of the trailer following the last payload byte at `cursor`
fn locate_trailer(mut cursor: EventBufferView<'_>) -> DecodeResult<usize> {
    let missing = |remaining: usize| DecodeError::MissingTrailer { remaining };

    cursor.normalize().map_err(|_| missing(0))?;
    let mut skipped = 0;
    while skipped < layout::MAX_PADDING_WORDS
        && cursor.len() >= layout::TRAILER_SIZE + 4
        && cursor.get_u32(0)? == 0
    {
        cursor.advance(4)?;
        skipped += 1;
    }
    if cursor.len() < layout::TRAILER_SIZE {
        return Err(missing(cursor.len()));
    }
    Ok(cursor.offset())
}

/// Status with the bits of disabled APVs forced healthy
fn masked_status(
    description: &FedDescription,
    fe_unit: usize,
    channel: usize,
    status: ChannelStatus,
) -> ChannelStatus {
    let mut bits = status.bits();
    for apv in 0..APVS_PER_CHANNEL {
        if description.is_apv_disabled(fe_unit, channel * APVS_PER_CHANNEL + apv) {
            bits |= APV_STATUS_BITS << (2 * apv);
        }
    }
    ChannelStatus::new(bits)
}
