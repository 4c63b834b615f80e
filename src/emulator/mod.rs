//! FED event emulator
//!
//! Builds complete, correctly CRC'd FED event buffers in software:
//! - [`EventBuilder`]: any format, any packet codes, explicit header values
//! - [`build_spy_event`]: spy-mode event around an opaque payload
//! - [`FakeEventGenerator`]: simulated raw / zero-suppressed events with
//!   Gaussian pedestals and noise, the software analogue of the FED's own
//!   fake-event mode

pub mod encode;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::common::{DecodeError, DecodeResult};
use crate::decoder::channel::Cluster;
use crate::decoder::crc::{calculate_fed_buffer_crc, store_crc};
use crate::decoder::types::{
    event_type_for,
    geometry::{CHANNELS_PER_FEUNIT, FEUNITS_PER_FED, STRIPS_PER_CHANNEL},
    layout, DaqMode, DaqSuperMode, EventFormat, HeaderFormat, PacketCode,
};
use encode::{encode_channel, encode_fe_header, ChannelData, EncodeError, FeHeaderFields};

/// Bunch crossings per LHC orbit
const BX_PER_ORBIT: u16 = 3564;

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Invalid noise distribution: {0}")]
    Distribution(#[from] rand_distr::NormalError),

    #[error("DAQ mode {0:?} cannot be generated")]
    UnsupportedMode(DaqMode),

    #[error("Invalid value for {field}: {value}")]
    InvalidParameter { field: &'static str, value: f64 },
}

/// Header and channels of one FE unit
#[derive(Debug, Clone, Default)]
pub struct FeUnitData {
    /// A non-zero `header.length` is written as is, otherwise the encoded
    /// payload length is used
    pub header: FeHeaderFields,
    pub channels: Vec<ChannelData>,
}

/// Assembles an event buffer field by field
#[derive(Debug, Clone)]
pub struct EventBuilder {
    pub format: EventFormat,
    /// Written to both the DAQ header and the tracker special header
    pub event_type: u8,
    pub header_format: u8,
    pub event_number: u32,
    pub bunch_crossing: u16,
    pub source_id: u16,
    pub format_version: u8,
    pub apve_address: u8,
    pub apv_address_error: u8,
    pub fe_enable: u8,
    pub fe_overflow: u8,
    pub fed_status: u16,
    pub trailer_status: u16,
    pub fe_units: Vec<FeUnitData>,
    /// Spy mode blob; replaces the FE units when set
    pub spy_payload: Option<Vec<u8>>,
    /// Spy length field written instead of the real blob length
    pub spy_length_override: Option<u32>,
    /// Trailer total length written instead of the real one
    pub total_length_override: Option<u32>,
    /// Zero words appended after the trailer
    pub trailing_padding_words: usize,
}

impl EventBuilder {
    /// Standard format, full debug header, every FE unit enabled and empty
    pub fn new(event_type: u8) -> Self {
        Self {
            format: EventFormat::Standard,
            event_type,
            header_format: HeaderFormat::FULL_DEBUG,
            event_number: 1,
            bunch_crossing: 0,
            source_id: 0,
            format_version: 1,
            apve_address: 0,
            apv_address_error: 0,
            fe_enable: 0xFF,
            fe_overflow: 0,
            fed_status: 0,
            trailer_status: 0,
            fe_units: vec![FeUnitData::default(); FEUNITS_PER_FED],
            spy_payload: None,
            spy_length_override: None,
            total_length_override: None,
            trailing_padding_words: 0,
        }
    }

    fn fe_unit_mut(&mut self, fe_unit: usize) -> Result<&mut FeUnitData, EncodeError> {
        self.fe_units
            .get_mut(fe_unit)
            .ok_or(EncodeError::FeUnitOutOfRange(fe_unit))
    }

    /// Append a channel to an FE unit
    pub fn push_channel(
        &mut self,
        fe_unit: usize,
        channel: ChannelData,
    ) -> Result<&mut Self, EncodeError> {
        let fe = self.fe_unit_mut(fe_unit)?;
        if fe.channels.len() >= CHANNELS_PER_FEUNIT {
            return Err(EncodeError::TooManyChannels(fe_unit));
        }
        fe.channels.push(channel);
        Ok(self)
    }

    /// Set the 6-bit header status of one channel
    pub fn set_channel_status(
        &mut self,
        fe_unit: usize,
        channel: usize,
        bits: u8,
    ) -> Result<&mut Self, EncodeError> {
        let fe = self.fe_unit_mut(fe_unit)?;
        let slot = fe
            .header
            .statuses
            .get_mut(channel)
            .ok_or(EncodeError::ChannelOutOfRange(channel))?;
        *slot = bits;
        Ok(self)
    }

    /// Encode the event; the trailer carries the real length and CRC
    pub fn build(&self) -> Result<Vec<u32>, EncodeError> {
        let mut body = Vec::new();
        match &self.spy_payload {
            Some(payload) => {
                let declared = match self.spy_length_override {
                    Some(length) => length,
                    None => u32::try_from(payload.len()).map_err(|_| {
                        DecodeError::SpyLengthExceedsBuffer {
                            declared: payload.len(),
                            available: u32::MAX as usize,
                        }
                    })?,
                };
                body.extend(declared.to_be_bytes());
                body.extend_from_slice(payload);
            }
            None => {
                let mut payloads = Vec::new();
                for (index, fe) in self.fe_units.iter().enumerate() {
                    let start = payloads.len();
                    for channel in &fe.channels {
                        payloads.extend(encode_channel(channel)?);
                    }
                    let length = payloads.len() - start;
                    let mut header = fe.header.clone();
                    if header.length == 0 {
                        header.length = u16::try_from(length)
                            .map_err(|_| EncodeError::FeUnitTooLong { fe_unit: index, length })?;
                    }
                    body.extend(encode_fe_header(&header));
                }
                body.extend(payloads);
            }
        }

        let mut bytes = self.header_bytes();
        bytes.extend(body);
        Ok(self.finish(bytes)?)
    }

    /// DAQ header plus, for non-legacy formats, the tracker special header
    fn header_bytes(&self) -> Vec<u8> {
        let event_type = (self.event_type & 0xF) as u32;
        let first = (layout::BOE_MARKER as u32) << 28
            | event_type << 24
            | (self.event_number & 0x00FF_FFFF);
        let second = ((self.bunch_crossing & 0xFFF) as u32) << 20
            | ((self.source_id & 0xFFF) as u32) << 8
            | ((self.format_version & 0xF) as u32) << 4;

        let mut bytes = Vec::with_capacity(self.format.header_size());
        bytes.extend(first.to_be_bytes());
        bytes.extend(second.to_be_bytes());
        if let Some(magic) = self.format.magic() {
            bytes.push(magic);
            bytes.push((self.header_format & 0xF) << 4 | (self.event_type & 0xF));
            bytes.push(self.apve_address);
            bytes.push(self.apv_address_error);
            bytes.push(self.fe_enable);
            bytes.push(self.fe_overflow);
            bytes.extend(self.fed_status.to_be_bytes());
        }
        bytes
    }

    /// Pad to a 64-bit boundary, append the trailer and store the CRC
    fn finish(&self, mut bytes: Vec<u8>) -> DecodeResult<Vec<u32>> {
        let span = bytes.len().div_ceil(8) * 8 + layout::TRAILER_SIZE;
        let additional = span - bytes.len();
        bytes
            .try_reserve_exact(additional)
            .map_err(|_| DecodeError::OutOfMemory { requested: span })?;
        bytes.resize(span - layout::TRAILER_SIZE, 0);

        let total_length = self.total_length_override.unwrap_or((span / 8) as u32);
        bytes.push(layout::EOE_MARKER);
        bytes.extend(&total_length.to_be_bytes()[1..]);
        bytes.extend([0, 0]);
        bytes.extend(self.trailer_status.to_be_bytes());

        let n_words = span / 4 + self.trailing_padding_words;
        let mut words = Vec::new();
        words
            .try_reserve_exact(n_words)
            .map_err(|_| DecodeError::OutOfMemory { requested: n_words * 4 })?;
        words.extend(
            bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        );
        let crc = calculate_fed_buffer_crc(&words, self.format.crc_word_swapped());
        store_crc(&mut words, crc);
        words.resize(n_words, 0);
        Ok(words)
    }
}

/// Synthesise a standard-format spy event around `payload`
pub fn build_spy_event(
    payload: &[u8],
    event_number: u32,
    bunch_crossing: u16,
) -> DecodeResult<Vec<u32>> {
    let mut builder = EventBuilder::new(spy_event_type());
    builder.event_number = event_number;
    builder.bunch_crossing = bunch_crossing;

    let declared = u32::try_from(payload.len()).map_err(|_| DecodeError::SpyLengthExceedsBuffer {
        declared: payload.len(),
        available: u32::MAX as usize,
    })?;
    let mut bytes = builder.header_bytes();
    let needed = layout::SPY_LENGTH_SIZE + payload.len();
    bytes
        .try_reserve_exact(needed)
        .map_err(|_| DecodeError::OutOfMemory {
            requested: bytes.len() + needed,
        })?;
    bytes.extend(declared.to_be_bytes());
    bytes.extend_from_slice(payload);

    let words = builder.finish(bytes)?;
    debug!(
        event_number,
        payload = payload.len(),
        words = words.len(),
        "Built spy event"
    );
    Ok(words)
}

fn spy_event_type() -> u8 {
    event_type_for(DaqMode::Spy, DaqSuperMode::Normal).unwrap_or(14)
}

/// Fake event generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// RNG seed; entropy-seeded when absent
    pub seed: Option<u64>,
    /// Virgin raw, processed raw or zero-suppressed
    pub mode: DaqMode,
    pub format: EventFormat,
    pub source_id: u16,
    /// FE enable mask; disabled FE units send no channels
    pub fe_enable: u8,
    /// Channels sent by each enabled FE unit
    pub channels_per_fe_unit: usize,
    /// Mean pedestal across strips
    pub pedestal_mean: f64,
    /// Strip-to-strip pedestal spread
    pub pedestal_spread: f64,
    /// Gaussian noise sigma per sample
    pub noise_sigma: f64,
    /// Probability that a strip carries a signal
    pub hit_probability: f64,
    /// Signal amplitude above pedestal
    pub hit_amplitude: f64,
    /// Zero suppression threshold above pedestal
    pub zs_threshold: u16,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            mode: DaqMode::ZeroSuppressed,
            format: EventFormat::Standard,
            source_id: 0,
            fe_enable: 0xFF,
            channels_per_fe_unit: CHANNELS_PER_FEUNIT,
            pedestal_mean: 300.0,
            pedestal_spread: 20.0,
            noise_sigma: 3.0,
            hit_probability: 0.01,
            hit_amplitude: 80.0,
            zs_threshold: 20,
        }
    }
}

impl EmulatorConfig {
    /// Reject spreads and probabilities the generator cannot sample from
    pub fn check_parameters(&self) -> Result<(), EmulatorError> {
        for (field, value) in [
            ("pedestal_spread", self.pedestal_spread),
            ("noise_sigma", self.noise_sigma),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EmulatorError::InvalidParameter { field, value });
            }
        }
        if !(0.0..=1.0).contains(&self.hit_probability) {
            return Err(EmulatorError::InvalidParameter {
                field: "hit_probability",
                value: self.hit_probability,
            });
        }
        Ok(())
    }
}

/// Generates fake events with fixed per-strip pedestals
pub struct FakeEventGenerator {
    config: EmulatorConfig,
    rng: StdRng,
    noise: Normal<f64>,
    /// Pedestal per (FE unit, channel, strip)
    pedestals: Vec<f64>,
    event_number: u32,
}

impl FakeEventGenerator {
    pub fn new(config: EmulatorConfig) -> Result<Self, EmulatorError> {
        if !matches!(
            config.mode,
            DaqMode::VirginRaw | DaqMode::ProcessedRaw | DaqMode::ZeroSuppressed
        ) {
            return Err(EmulatorError::UnsupportedMode(config.mode));
        }
        config.check_parameters()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, config.noise_sigma)?;
        let spread = Normal::new(config.pedestal_mean, config.pedestal_spread)?;
        let channels = config.channels_per_fe_unit.min(CHANNELS_PER_FEUNIT);
        let pedestals = (0..FEUNITS_PER_FED * channels * STRIPS_PER_CHANNEL)
            .map(|_| spread.sample(&mut rng))
            .collect();

        Ok(Self {
            config: EmulatorConfig {
                channels_per_fe_unit: channels,
                ..config
            },
            rng,
            noise,
            pedestals,
            event_number: 0,
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Fake event type of the configured mode
    fn event_type(&self) -> u8 {
        let super_mode = DaqSuperMode::Fake;
        event_type_for(self.config.mode, super_mode).unwrap_or_default()
    }

    fn pedestal(&self, fe_unit: usize, channel: usize, strip: usize) -> f64 {
        let index =
            (fe_unit * self.config.channels_per_fe_unit + channel) * STRIPS_PER_CHANNEL + strip;
        self.pedestals[index]
    }

    /// ADC value of one strip, pedestal included
    fn sample(&mut self, pedestal: f64) -> f64 {
        let mut value = pedestal + self.noise.sample(&mut self.rng);
        if self.rng.gen_bool(self.config.hit_probability) {
            value += self.config.hit_amplitude;
        }
        value
    }

    fn channel(&mut self, fe_unit: usize, channel: usize) -> ChannelData {
        let mut raw = Vec::with_capacity(STRIPS_PER_CHANNEL);
        let mut signal = Vec::with_capacity(STRIPS_PER_CHANNEL);
        for strip in 0..STRIPS_PER_CHANNEL {
            let pedestal = self.pedestal(fe_unit, channel, strip);
            let value = self.sample(pedestal);
            raw.push(value.round().clamp(0.0, 1023.0) as u16);
            signal.push((value - pedestal).round().clamp(0.0, 1023.0) as u16);
        }

        match self.config.mode {
            DaqMode::VirginRaw => ChannelData::Samples {
                code: PacketCode::VirginRaw,
                values: raw,
            },
            DaqMode::ProcessedRaw => ChannelData::Samples {
                code: PacketCode::ProcessedRaw,
                values: signal,
            },
            _ => {
                let medians = [0, 1].map(|apv| {
                    let half = STRIPS_PER_CHANNEL / 2;
                    let mut values: Vec<u16> = raw[apv * half..(apv + 1) * half].to_vec();
                    values.sort_unstable();
                    values[half / 2]
                });
                ChannelData::Clusters {
                    code: PacketCode::ZeroSuppressed,
                    medians,
                    clusters: find_clusters(&signal, self.config.zs_threshold),
                }
            }
        }
    }

    /// Generate the next event
    pub fn next_event(&mut self) -> Result<Vec<u32>, EmulatorError> {
        self.event_number = (self.event_number + 1) & 0x00FF_FFFF;

        let mut builder = EventBuilder::new(self.event_type());
        builder.format = self.config.format;
        builder.event_number = self.event_number;
        builder.bunch_crossing = self.rng.gen_range(0..BX_PER_ORBIT);
        builder.source_id = self.config.source_id;
        builder.fe_enable = self.config.fe_enable;

        for fe_unit in 0..FEUNITS_PER_FED {
            if self.config.fe_enable & (1 << fe_unit) == 0 {
                continue;
            }
            for channel in 0..self.config.channels_per_fe_unit {
                let data = self.channel(fe_unit, channel);
                builder.push_channel(fe_unit, data)?;
            }
        }

        let words = builder.build()?;
        debug!(
            event_number = self.event_number,
            words = words.len(),
            mode = ?self.config.mode,
            "Generated fake event"
        );
        Ok(words)
    }
}

/// Runs of strips strictly above `threshold`, split at 255 strips
pub fn find_clusters(signal: &[u16], threshold: u16) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut previous_hit = false;
    for (strip, &value) in signal.iter().enumerate().take(STRIPS_PER_CHANNEL) {
        if value <= threshold {
            previous_hit = false;
            continue;
        }
        match clusters.last_mut() {
            Some(cluster) if previous_hit && cluster.values.len() < u8::MAX as usize => {
                cluster.values.push(value);
            }
            _ => clusters.push(Cluster {
                first_strip: strip as u8,
                values: vec![value],
            }),
        }
        previous_hit = true;
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Event;

    fn seeded(mode: DaqMode) -> EmulatorConfig {
        EmulatorConfig {
            seed: Some(42),
            mode,
            ..EmulatorConfig::default()
        }
    }

    #[test]
    fn test_builder_total_length_and_crc() {
        let words = EventBuilder::new(10).build().unwrap();
        // 16 header + 128 FE headers + 8 trailer
        assert_eq!(words.len() * 4, 152);
        let event = Event::new(&words).unwrap();
        assert_eq!(event.total_length(), 19);
        event.check_event().unwrap();
    }

    #[test]
    fn test_push_channel_limits() {
        let mut builder = EventBuilder::new(2);
        let channel = ChannelData::Samples {
            code: PacketCode::VirginRaw,
            values: vec![],
        };
        for _ in 0..CHANNELS_PER_FEUNIT {
            builder.push_channel(0, channel.clone()).unwrap();
        }
        assert_eq!(
            builder.push_channel(0, channel.clone()).unwrap_err(),
            EncodeError::TooManyChannels(0)
        );
        assert_eq!(
            builder.push_channel(8, channel).unwrap_err(),
            EncodeError::FeUnitOutOfRange(8)
        );
        assert_eq!(
            builder.set_channel_status(0, 12, 0).unwrap_err(),
            EncodeError::ChannelOutOfRange(12)
        );
    }

    #[test]
    fn test_spy_event_checks() {
        let payload: Vec<u8> = (0..100u8).collect();
        let words = build_spy_event(&payload, 77, 120).unwrap();
        let event = Event::new(&words).unwrap();
        event.check_event().unwrap();
        assert_eq!(event.daq_mode(), DaqMode::Spy);
        assert_eq!(event.event_number(), 77);
        assert_eq!(event.bunch_crossing(), 120);
        assert_eq!(event.spy_data().unwrap().bytes().collect::<Vec<u8>>(), payload);
    }

    #[test]
    fn test_spy_event_empty_payload() {
        let words = build_spy_event(&[], 1, 0).unwrap();
        let event = Event::new(&words).unwrap();
        event.check_event().unwrap();
        assert_eq!(event.spy_data().unwrap().len(), 0);
    }

    #[test]
    fn test_fake_generator_modes() {
        for (mode, code) in [
            (DaqMode::VirginRaw, PacketCode::VirginRaw),
            (DaqMode::ProcessedRaw, PacketCode::ProcessedRaw),
            (DaqMode::ZeroSuppressed, PacketCode::ZeroSuppressed),
        ] {
            let mut generator = FakeEventGenerator::new(seeded(mode)).unwrap();
            let words = generator.next_event().unwrap();
            let event = Event::new(&words).unwrap();
            event.check_event().unwrap();
            assert_eq!(event.daq_mode(), mode);
            assert_eq!(event.daq_super_mode(), DaqSuperMode::Fake);
            assert_eq!(event.total_channels(), FEUNITS_PER_FED * CHANNELS_PER_FEUNIT);
            assert!(event.channels().all(|(_, _, ch)| ch.packet_code() == code));
        }
    }

    #[test]
    fn test_fake_generator_is_reproducible() {
        let mut a = FakeEventGenerator::new(seeded(DaqMode::ZeroSuppressed)).unwrap();
        let mut b = FakeEventGenerator::new(seeded(DaqMode::ZeroSuppressed)).unwrap();
        assert_eq!(a.next_event().unwrap(), b.next_event().unwrap());
        let second = a.next_event().unwrap();
        let event = Event::new(&second).unwrap();
        assert_eq!(event.event_number(), 2);
    }

    #[test]
    fn test_fake_generator_respects_fe_enable() {
        let config = EmulatorConfig {
            fe_enable: 0b0000_0101,
            channels_per_fe_unit: 3,
            ..seeded(DaqMode::VirginRaw)
        };
        let mut generator = FakeEventGenerator::new(config).unwrap();
        let words = generator.next_event().unwrap();
        let event = Event::new(&words).unwrap();
        assert_eq!(event.total_channels(), 6);
        assert_eq!(event.fe_unit(1).unwrap().channel_count(), 0);
        assert!(event.is_fe_unit_enabled(2));
        assert!(!event.is_fe_unit_enabled(1));
    }

    #[test]
    fn test_rejects_scope_and_bad_sigma() {
        assert!(matches!(
            FakeEventGenerator::new(seeded(DaqMode::Scope)),
            Err(EmulatorError::UnsupportedMode(DaqMode::Scope))
        ));
        let config = EmulatorConfig {
            noise_sigma: -1.0,
            ..seeded(DaqMode::VirginRaw)
        };
        assert!(matches!(
            FakeEventGenerator::new(config),
            Err(EmulatorError::InvalidParameter {
                field: "noise_sigma",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_bad_spread_and_probability() {
        let config = EmulatorConfig {
            pedestal_spread: f64::INFINITY,
            ..seeded(DaqMode::VirginRaw)
        };
        assert!(matches!(
            FakeEventGenerator::new(config),
            Err(EmulatorError::InvalidParameter {
                field: "pedestal_spread",
                ..
            })
        ));

        let config = EmulatorConfig {
            hit_probability: f64::NAN,
            ..seeded(DaqMode::VirginRaw)
        };
        assert!(matches!(
            FakeEventGenerator::new(config),
            Err(EmulatorError::InvalidParameter {
                field: "hit_probability",
                ..
            })
        ));
    }

    #[test]
    fn test_find_clusters() {
        let mut signal = vec![0u16; STRIPS_PER_CHANNEL];
        signal[3] = 50;
        signal[4] = 60;
        signal[10] = 25;
        signal[11] = 20;
        let clusters = find_clusters(&signal, 20);
        assert_eq!(
            clusters,
            vec![
                Cluster {
                    first_strip: 3,
                    values: vec![50, 60]
                },
                Cluster {
                    first_strip: 10,
                    values: vec![25]
                },
            ]
        );
    }

    #[test]
    fn test_find_clusters_splits_long_runs() {
        let signal = vec![100u16; STRIPS_PER_CHANNEL];
        let clusters = find_clusters(&signal, 0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].values.len(), 255);
        assert_eq!(clusters[1].first_strip, 255);
    }
}
