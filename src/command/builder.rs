//! Serial command construction for the FED9U VME interface
//!
//! Every command starts with one 32-bit header word:
//!
//! ```text
//!  31 30 29 28..24  23  22  21..17      16  15..0
//!  0  0  1  FPGA    1   R   designator  1   length (bits)
//! ```
//!
//! followed, for writes, by `ceil(length / 32)` payload words.

use bytes::BufMut;

use super::bit_packer::low_mask;
use crate::common::CommandError;

/// Command word field layout
pub mod fields {
    pub const START_BIT: u32 = 1 << 29;
    pub const FPGA_SHIFT: u32 = 24;
    pub const FRAME_BIT: u32 = 1 << 23;
    pub const READ_SHIFT: u32 = 22;
    pub const DESIGNATOR_SHIFT: u32 = 17;
    pub const DESIGNATOR_MASK: u8 = 0x1F;
    pub const LENGTH_BIT: u32 = 1 << 16;
    pub const LENGTH_MASK: u32 = 0xFFFF;

    // Delay chip (CDC) sub-command
    pub const CDC_CHIP_SHIFT: u32 = 29;
    pub const CDC_CHIP_MASK: u8 = 0x7;
    pub const CDC_READ_SHIFT: u32 = 27;
    pub const CDC_DESIGNATOR_SHIFT: u32 = 22;
    pub const CDC_LENGTH_SHIFT: u32 = 5;
    pub const CDC_LENGTH_MASK: u32 = 0x1_FFFF;
    pub const CDC_SPARE_BITS: u32 = 5;
}

/// FPGA addresses on the FED
pub mod fpga {
    /// First front-end FPGA
    pub const FE_FIRST: u8 = 1;
    /// Last front-end FPGA
    pub const FE_LAST: u8 = 8;
    pub const BACK_END: u8 = 9;
    pub const VME: u8 = 10;
    /// Broadcast to every front-end FPGA
    pub const FE_BROADCAST: u8 = 15;
    /// Broadcast to every FPGA
    pub const ALL: u8 = 16;
}

/// Designator of the skew (fine delay) register, whose reads carry an argument
pub const SKEW_DESIGNATOR: u8 = 1;

const WORD_BITS: u32 = 32;

/// Check that `fpga` addresses a real FPGA or broadcast group
pub fn is_valid_fpga(fpga_number: u8) -> bool {
    matches!(fpga_number, 1..=10 | fpga::FE_BROADCAST | fpga::ALL)
}

/// Number of payload words needed for `length` bits
#[inline]
pub fn payload_words(length: u16) -> usize {
    (length as u32).div_ceil(WORD_BITS) as usize
}

/// Encode the command header word
pub fn command_header(fpga_number: u8, read: bool, designator: u8, length: u16) -> u32 {
    fields::START_BIT
        | (fpga_number as u32) << fields::FPGA_SHIFT
        | fields::FRAME_BIT
        | (read as u32) << fields::READ_SHIFT
        | ((designator & fields::DESIGNATOR_MASK) as u32) << fields::DESIGNATOR_SHIFT
        | fields::LENGTH_BIT
        | (length as u32 & fields::LENGTH_MASK)
}

fn validate_header(fpga_number: u8, designator: u8) -> Result<(), CommandError> {
    if !is_valid_fpga(fpga_number) {
        return Err(CommandError::InvalidFpga(fpga_number));
    }
    if designator > fields::DESIGNATOR_MASK {
        return Err(CommandError::InvalidDesignator(designator));
    }
    Ok(())
}

/// MSB-align the significant bits of the last word of a `length`-bit payload
#[inline]
fn align_last_word(word: u32, length: u16) -> u32 {
    let tail = length as u32 % WORD_BITS;
    if tail == 0 {
        word
    } else {
        (word & low_mask(tail)) << (WORD_BITS - tail)
    }
}

/// Build a single serial command: header word plus payload for writes.
///
/// Reads of the skew register ([`SKEW_DESIGNATOR`]) must still be given an
/// argument, but like every read they send the header word only. With
/// `left_shift_last`, the final write word holds its `length % 32`
/// significant bits right-aligned and they are moved to the top of the word.
pub fn construct_command(
    fpga_number: u8,
    read: bool,
    designator: u8,
    length: u16,
    arguments: &[u32],
    left_shift_last: bool,
) -> Result<Vec<u32>, CommandError> {
    validate_header(fpga_number, designator)?;

    let needs_arguments = !read || designator == SKEW_DESIGNATOR;
    if needs_arguments && arguments.is_empty() {
        return Err(CommandError::MissingArguments { designator, read });
    }

    let header = command_header(fpga_number, read, designator, length);
    if read {
        return Ok(vec![header]);
    }

    let expected = payload_words(length);
    if arguments.len() != expected {
        return Err(CommandError::ArgumentCount {
            length,
            expected,
            actual: arguments.len(),
        });
    }

    let mut command = Vec::with_capacity(1 + arguments.len());
    command.push(header);
    command.extend_from_slice(arguments);
    if left_shift_last {
        if let Some(last) = command.last_mut() {
            *last = align_last_word(*last, length);
        }
    }

    Ok(command)
}

/// Build a block write into `out`: one header per chunk of `payload_words(length)`
/// argument words, each chunk followed by its payload. Words are written
/// little-endian, the order the VME transport expects.
///
/// Returns the number of bytes written.
pub fn construct_block_write_command<B: BufMut>(
    fpga_number: u8,
    designator: u8,
    length: u16,
    arguments: &[u32],
    left_shift_last: bool,
    out: &mut B,
) -> Result<usize, CommandError> {
    validate_header(fpga_number, designator)?;
    if arguments.is_empty() {
        return Err(CommandError::MissingArguments {
            designator,
            read: false,
        });
    }

    let chunk = payload_words(length);
    if chunk == 0 || arguments.len() % chunk != 0 {
        return Err(CommandError::ArgumentCount {
            length,
            expected: chunk,
            actual: arguments.len(),
        });
    }

    let n_chunks = arguments.len() / chunk;
    let required = (n_chunks + arguments.len()) * 4;
    if out.remaining_mut() < required {
        return Err(CommandError::BufferTooSmall {
            required,
            available: out.remaining_mut(),
        });
    }

    let header = command_header(fpga_number, false, designator, length);
    for words in arguments.chunks(chunk) {
        out.put_u32_le(header);
        let (last, body) = words.split_last().ok_or(CommandError::ArgumentCount {
            length,
            expected: chunk,
            actual: 0,
        })?;
        for &word in body {
            out.put_u32_le(word);
        }
        let last = if left_shift_last {
            align_last_word(*last, length)
        } else {
            *last
        };
        out.put_u32_le(last);
    }

    Ok(required)
}

/// Overlay a delay chip (CDC) sub-command on a 2-word FPGA command.
///
/// The second word becomes the CDC command (chip select, read flag,
/// designator, length). For writes the MSB-aligned `payload` is shifted in
/// behind it: its first 5 bits fill the spare low bits of the CDC word and
/// the rest spill into appended words.
pub fn construct_delay_chip_command(
    command: &mut Vec<u32>,
    chip: u8,
    read: bool,
    designator: u8,
    length: u32,
    payload: &[u32],
) -> Result<(), CommandError> {
    if command.len() != 2 {
        return Err(CommandError::DelayChipBaseLength(command.len()));
    }
    if chip > fields::CDC_CHIP_MASK {
        return Err(CommandError::InvalidChip(chip));
    }
    if designator > fields::DESIGNATOR_MASK {
        return Err(CommandError::InvalidDesignator(designator));
    }
    if length > fields::CDC_LENGTH_MASK {
        return Err(CommandError::DelayChipLength(length));
    }

    command[1] = (chip as u32) << fields::CDC_CHIP_SHIFT
        | (read as u32) << fields::CDC_READ_SHIFT
        | (designator as u32) << fields::CDC_DESIGNATOR_SHIFT
        | length << fields::CDC_LENGTH_SHIFT;

    if read {
        return Ok(());
    }

    let needed = length.div_ceil(WORD_BITS) as usize;
    if payload.is_empty() || payload.len() < needed {
        return Err(CommandError::ArgumentCount {
            length: length.min(u16::MAX as u32) as u16,
            expected: needed.max(1),
            actual: payload.len(),
        });
    }

    let carry_shift = WORD_BITS - fields::CDC_SPARE_BITS;
    command[1] |= payload[0] >> carry_shift;

    let remaining = length.saturating_sub(fields::CDC_SPARE_BITS);
    let extra = remaining.div_ceil(WORD_BITS) as usize;
    for k in 0..extra {
        let high = payload[k] << fields::CDC_SPARE_BITS;
        let low = payload.get(k + 1).map_or(0, |next| next >> carry_shift);
        command.push(high | low);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fpga_field(word: u32) -> u32 {
        (word >> fields::FPGA_SHIFT) & 0x1F
    }

    fn read_field(word: u32) -> u32 {
        (word >> fields::READ_SHIFT) & 0x1
    }

    fn designator_field(word: u32) -> u32 {
        (word >> fields::DESIGNATOR_SHIFT) & 0x1F
    }

    #[test]
    fn test_header_encoding() {
        let header = command_header(3, false, 2, 40);
        assert_eq!(
            header,
            (1 << 29) | (3 << 24) | (1 << 23) | (2 << 17) | (1 << 16) | 40
        );
    }

    #[test]
    fn test_write_with_left_shift() {
        let v0 = 0x1234_5678;
        let v1 = 0x0000_00AB;
        let command = construct_command(3, false, 2, 40, &[v0, v1], true).unwrap();
        assert_eq!(command.len(), 3);
        assert_eq!(fpga_field(command[0]), 3);
        assert_eq!(read_field(command[0]), 0);
        assert_eq!(designator_field(command[0]), 2);
        assert_eq!(command[0] & 0xFFFF, 40);
        assert_eq!(command[1], v0);
        assert_eq!(command[2], 0xAB00_0000);
    }

    #[test]
    fn test_write_without_left_shift_keeps_word() {
        let command = construct_command(1, false, 4, 40, &[0, 0xAB], false).unwrap();
        assert_eq!(command[2], 0xAB);
    }

    #[test]
    fn test_left_shift_noop_on_word_multiple() {
        let command = construct_command(1, false, 4, 32, &[0xAB], true).unwrap();
        assert_eq!(command[1], 0xAB);
    }

    #[test]
    fn test_empty_write_arguments_fail() {
        let err = construct_command(3, false, 2, 40, &[], true).unwrap_err();
        assert_eq!(
            err,
            CommandError::MissingArguments {
                designator: 2,
                read: false
            }
        );
    }

    #[test]
    fn test_read_has_no_payload() {
        let command = construct_command(9, true, 7, 16, &[], false).unwrap();
        assert_eq!(command.len(), 1);
        assert_eq!(read_field(command[0]), 1);
    }

    #[test]
    fn test_skew_read_needs_argument() {
        assert!(construct_command(2, true, SKEW_DESIGNATOR, 10, &[], false).is_err());
        let command = construct_command(2, true, SKEW_DESIGNATOR, 10, &[5], false).unwrap();
        assert_eq!(command, vec![command_header(2, true, 1, 10)]);
    }

    #[test]
    fn test_invalid_fpga() {
        for bad in [0u8, 11, 14, 17] {
            assert_eq!(
                construct_command(bad, true, 3, 8, &[], false),
                Err(CommandError::InvalidFpga(bad))
            );
        }
        for good in [1u8, 8, 9, 10, 15, 16] {
            assert!(construct_command(good, true, 3, 8, &[], false).is_ok());
        }
    }

    #[test]
    fn test_argument_count_checked() {
        let err = construct_command(1, false, 3, 40, &[1], false).unwrap_err();
        assert_eq!(
            err,
            CommandError::ArgumentCount {
                length: 40,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_block_write_chunks() {
        let mut buf = vec![0u8; 64];
        let mut out = &mut buf[..];
        let written =
            construct_block_write_command(4, 6, 40, &[1, 2, 3, 4], true, &mut out).unwrap();
        assert_eq!(written, 24);

        let words: Vec<u32> = buf[..written]
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let header = command_header(4, false, 6, 40);
        assert_eq!(words, vec![header, 1, 0x0200_0000, header, 3, 0x0400_0000]);
    }

    #[test]
    fn test_block_write_buffer_too_small() {
        let mut buf = vec![0u8; 8];
        let mut out = &mut buf[..];
        let err = construct_block_write_command(4, 6, 32, &[1, 2], false, &mut out).unwrap_err();
        assert_eq!(
            err,
            CommandError::BufferTooSmall {
                required: 16,
                available: 8
            }
        );
    }

    #[test]
    fn test_block_write_into_vec() {
        let mut out: Vec<u8> = Vec::new();
        let written = construct_block_write_command(1, 2, 16, &[7, 8, 9], false, &mut out).unwrap();
        assert_eq!(written, 24);
        assert_eq!(out.len(), 24);
    }

    #[test]
    fn test_block_write_uneven_arguments() {
        let mut out: Vec<u8> = Vec::new();
        assert!(construct_block_write_command(1, 2, 40, &[1, 2, 3], false, &mut out).is_err());
    }

    #[test]
    fn test_delay_chip_requires_two_words() {
        let mut command = vec![0u32];
        assert_eq!(
            construct_delay_chip_command(&mut command, 1, true, 2, 8, &[]),
            Err(CommandError::DelayChipBaseLength(1))
        );
    }

    #[test]
    fn test_delay_chip_read_fields() {
        let mut command = vec![0xAAAA_AAAA, 0];
        construct_delay_chip_command(&mut command, 5, true, 0x13, 0x1_2345, &[]).unwrap();
        assert_eq!(command.len(), 2);
        assert_eq!(command[0], 0xAAAA_AAAA);
        assert_eq!(command[1] >> 29, 5);
        assert_eq!((command[1] >> 27) & 1, 1);
        assert_eq!((command[1] >> 22) & 0x1F, 0x13);
        assert_eq!((command[1] >> 5) & 0x1_FFFF, 0x1_2345);
        assert_eq!(command[1] & 0x1F, 0);
    }

    #[test]
    fn test_delay_chip_write_carries_bits() {
        let mut command = vec![0, 0];
        // 40-bit payload, MSB-aligned: 0xF800_0001 0xAB00_0000
        construct_delay_chip_command(&mut command, 2, false, 4, 40, &[0xF800_0001, 0xAB00_0000])
            .unwrap();
        // 5 bits in the CDC word, 35 more spill into two appended words
        assert_eq!(command.len(), 4);
        assert_eq!(command[1] & 0x1F, 0x1F);
        assert_eq!(command[2], (0xF800_0001u32 << 5) | (0xAB00_0000u32 >> 27));
        assert_eq!(command[3], 0x6000_0000);
    }

    #[test]
    fn test_delay_chip_short_write_fits_spare_bits() {
        let mut command = vec![0, 0];
        construct_delay_chip_command(&mut command, 0, false, 1, 5, &[0xA800_0000]).unwrap();
        assert_eq!(command.len(), 2);
        assert_eq!(command[1] & 0x1F, 0b10101);
    }
}
