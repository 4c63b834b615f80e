//! E2E tests for FED event decoding (build → decode → check)
//!
//! Buffers are assembled with the emulator's `EventBuilder`. Channel
//! contents come from seeded random numbers so a failure is reproducible.

use fed9u_rs::common::{DecodeError, ErrorKind};
use fed9u_rs::config::{Config, FedDescription};
use fed9u_rs::decoder::crc::{calculate_fed_buffer_crc, store_crc, stored_crc};
use fed9u_rs::decoder::types::{ClusterValue, SampleFormat};
use fed9u_rs::decoder::{
    decode_event, BufferedEvent, Channel, ChannelLayout, ChannelStatus, Cluster, DaqMode,
    Event, EventBufferView, EventFormat, PacketCode,
};
use fed9u_rs::emulator::encode::{encode_channel, words_from_bytes, ChannelData};
use fed9u_rs::emulator::{find_clusters, EventBuilder};
use rand::prelude::*;
use rand::rngs::StdRng;

const ZS_NORMAL: u8 = 10;
const VR_NORMAL: u8 = 2;
const PR_NORMAL: u8 = 6;

fn channel_from_bytes(words: &[u32]) -> Channel<'_> {
    Channel::new(
        EventBufferView::new(words),
        ChannelStatus::new(0x3F),
        ChannelLayout::Coded,
    )
    .expect("channel decodes")
}

/// Random sample values representable by `code`
fn random_values(rng: &mut StdRng, code: PacketCode, count: usize) -> Vec<u16> {
    (0..count)
        .map(|_| match code.sample_format() {
            SampleFormat::Packed10 | SampleFormat::Clusters(ClusterValue::U10) => {
                rng.gen_range(0..1024)
            }
            SampleFormat::Stripped8 { shift }
            | SampleFormat::Clusters(ClusterValue::U8 { shift }) => {
                rng.gen_range(0..256u16) << shift
            }
            _ => rng.gen(),
        })
        .collect()
}

#[test]
fn test_empty_zero_suppressed_event_passes_checks() {
    let words = EventBuilder::new(ZS_NORMAL).build().unwrap();
    let event = Event::new(&words).unwrap();

    event.check_event().unwrap();
    assert_eq!(event.daq_mode(), DaqMode::ZeroSuppressed);
    assert_eq!(event.fe_unit_count(), 8);
    assert_eq!(event.total_channels(), 0);
    assert_eq!(event.total_length() as usize * 8 + event.padding_bytes(), words.len() * 4);
    assert_eq!(event.crc(), calculate_fed_buffer_crc(&words, false));
}

#[test]
fn test_corrupted_crc_is_integrity_failure() {
    let mut words = EventBuilder::new(ZS_NORMAL).build().unwrap();
    let stored = stored_crc(&words).unwrap();
    store_crc(&mut words, stored.wrapping_add(1));

    let event = Event::new(&words).unwrap();
    let err = event.check_event().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityCheckFailed);
}

#[test]
fn test_zero_suppressed_cluster_scatter() {
    let bytes = encode_channel(&ChannelData::Clusters {
        code: PacketCode::ZeroSuppressed,
        medians: [0, 0],
        clusters: vec![Cluster {
            first_strip: 5,
            values: vec![100, 200],
        }],
    })
    .unwrap();
    assert_eq!(bytes[2], 0xEA);

    let words = words_from_bytes(&bytes);
    let samples = channel_from_bytes(&words).get_samples().unwrap();
    assert_eq!(samples.len(), 256);
    let mut expected = vec![0u16; 256];
    expected[5] = 100;
    expected[6] = 200;
    assert_eq!(samples, expected);
}

#[test]
fn test_ten_bit_minimal_stream_recovers_values() {
    // [1, 2, 3] MSB-first in 30 bits, 4 bytes
    let bytes = [0x00, 0x07, 0x86, 0x00, 0x40, 0x20, 0x0C];
    let words = words_from_bytes(&bytes);
    let samples = channel_from_bytes(&words).get_samples().unwrap();
    assert_eq!(&samples[..3], &[1, 2, 3]);
}

#[test]
fn test_every_sample_code_decodes_through_an_event() {
    let mut rng = StdRng::seed_from_u64(0x0FED_9000);
    let codes = [
        (PacketCode::Scope, 1u8),
        (PacketCode::VirginRaw, VR_NORMAL),
        (PacketCode::VirginRaw10, VR_NORMAL),
        (PacketCode::VirginRaw8BitHi, VR_NORMAL),
        (PacketCode::VirginRaw8BitLo, VR_NORMAL),
        (PacketCode::ProcessedRaw, PR_NORMAL),
        (PacketCode::ProcessedRaw10, PR_NORMAL),
        (PacketCode::ProcessedRaw8BitHi, PR_NORMAL),
        (PacketCode::ProcessedRaw8BitLo, PR_NORMAL),
    ];

    for (code, event_type) in codes {
        let mut builder = EventBuilder::new(event_type);
        let mut expected = Vec::new();
        for fe in 0..8 {
            let count = rng.gen_range(0..4);
            for _ in 0..count {
                let n = rng.gen_range(1..=256);
                let values = random_values(&mut rng, code, n);
                expected.push(values.clone());
                builder.push_channel(fe, ChannelData::Samples { code, values }).unwrap();
            }
        }
        let words = builder.build().unwrap();
        let event = Event::new(&words).unwrap();
        event.check_event().unwrap();

        assert_eq!(event.total_channels(), expected.len(), "{code:?}");
        for ((_, _, channel), values) in event.channels().zip(&expected) {
            assert_eq!(channel.packet_code(), code);
            assert_eq!(&channel.get_samples().unwrap(), values, "{code:?}");
        }
    }
}

#[test]
fn test_zero_suppressed_codes_decode_through_an_event() {
    let mut rng = StdRng::seed_from_u64(42);
    for code in [
        PacketCode::ZeroSuppressed,
        PacketCode::ZeroSuppressed10,
        PacketCode::ZeroSuppressed8BitHi,
        PacketCode::ZeroSuppressed8BitLo,
    ] {
        let mut builder = EventBuilder::new(ZS_NORMAL);
        let mut expected = Vec::new();
        for fe in 0..8 {
            let mut strips = vec![0u16; 256];
            for strip in strips.iter_mut() {
                if rng.gen_bool(0.05) {
                    *strip = random_values(&mut rng, code, 1)[0].max(4);
                }
            }
            let clusters = find_clusters(&strips, 0);
            let medians = [rng.gen(), rng.gen()];
            builder
                .push_channel(fe, ChannelData::Clusters { code, medians, clusters })
                .unwrap();
            expected.push((strips, medians));
        }
        let words = builder.build().unwrap();
        let event = Event::new(&words).unwrap();
        event.check_event().unwrap();

        for ((_, _, channel), (strips, medians)) in event.channels().zip(&expected) {
            assert_eq!(&channel.get_samples().unwrap(), strips, "{code:?}");
            assert_eq!(channel.get_median(0).unwrap(), medians[0]);
            assert_eq!(channel.get_median(1).unwrap(), medians[1]);
            assert_eq!(
                channel.hit_strips().unwrap(),
                strips.iter().filter(|&&s| s != 0).count()
            );
        }
    }
}

#[test]
fn test_single_bit_flips_fail_the_crc() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut builder = EventBuilder::new(PR_NORMAL);
    builder
        .push_channel(
            0,
            ChannelData::Samples {
                code: PacketCode::ProcessedRaw,
                values: random_values(&mut rng, PacketCode::ProcessedRaw, 32),
            },
        )
        .unwrap();
    let words = builder.build().unwrap();
    let reference = calculate_fed_buffer_crc(&words, false);

    for _ in 0..200 {
        let index = rng.gen_range(0..words.len());
        let bit = rng.gen_range(0..32);
        if index == words.len() - 1 && bit >= 16 {
            continue;
        }
        let mut corrupted = words.clone();
        corrupted[index] ^= 1 << bit;
        assert_ne!(calculate_fed_buffer_crc(&corrupted, false), reference);
    }
}

#[test]
fn test_all_formats_round_trip_header_fields() {
    let mut rng = StdRng::seed_from_u64(99);
    for format in [EventFormat::Standard, EventFormat::OldVme, EventFormat::Legacy] {
        let mut builder = EventBuilder::new(VR_NORMAL);
        builder.format = format;
        builder.event_number = rng.gen_range(0..1 << 24);
        builder.bunch_crossing = rng.gen_range(0..3564);
        builder.source_id = rng.gen_range(0..4096);
        builder
            .push_channel(
                2,
                ChannelData::Samples {
                    code: PacketCode::VirginRaw,
                    values: random_values(&mut rng, PacketCode::VirginRaw, 8),
                },
            )
            .unwrap();
        let words = builder.build().unwrap();
        let event = Event::new(&words).unwrap();
        event.check_event().unwrap();

        assert_eq!(event.event_format(), format);
        assert_eq!(event.event_number(), builder.event_number);
        assert_eq!(event.bunch_crossing(), builder.bunch_crossing);
        assert_eq!(event.source_id(), builder.source_id);
        assert_eq!(event.fe_unit(2).unwrap().channel_count(), 1);
    }
}

#[test]
fn test_decode_event_applies_configured_checks() {
    let mut builder = EventBuilder::new(VR_NORMAL);
    builder
        .set_channel_status(3, 7, 0x3F & !ChannelStatus::OUT_OF_SYNC)
        .unwrap();
    let words = builder.build().unwrap();

    // status checks are opt-in
    let config = Config::default();
    decode_event(&words, &config).unwrap();

    let config = Config::from_toml("[decoder]\ncheck_channel_status = true\n").unwrap();
    let err = decode_event(&words, &config).unwrap_err();
    match err {
        DecodeError::ChannelStatus { failures, report } => {
            assert_eq!(failures, 1);
            assert!(report.contains("FE unit 3 channel 7"));
            assert!(report.contains("out of sync"));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let mut description = FedDescription::all_enabled();
    description.disable_apv(3, 14);
    description.disable_apv(3, 15);
    let event = Event::new(&words).unwrap();
    event.check_channel_statuses(&description).unwrap();
}

#[test]
fn test_corrupt_channel_length_names_fe_unit_and_channel() {
    let mut builder = EventBuilder::new(VR_NORMAL);
    builder
        .push_channel(
            5,
            ChannelData::Samples {
                code: PacketCode::VirginRaw,
                values: vec![1, 2],
            },
        )
        .unwrap();
    let mut words = builder.build().unwrap();

    // FE 5 payload starts after 16 + 8 * 16 bytes; its first channel length
    // occupies the top half of that word
    let index = (16 + 8 * 16) / 4;
    words[index] = (words[index] & 0x0000_FFFF) | (0x0100 << 16);

    let err = Event::new(&words).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("FE unit 5"), "{message}");
    assert!(message.contains("Channel 0"), "{message}");
    assert_eq!(err.kind(), ErrorKind::MalformedBuffer);
}

#[test]
fn test_buffered_event_from_little_endian_dump() {
    let words = EventBuilder::new(ZS_NORMAL).build().unwrap();
    let dump: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let buffered = BufferedEvent::from_bytes(&dump).unwrap();
    let event = buffered.event().unwrap();
    event.check_event().unwrap();
    assert_eq!(event.event_number(), 1);
}
