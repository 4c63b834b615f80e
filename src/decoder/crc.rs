//! FED buffer CRC
//!
//! CRC-16/CCITT (polynomial 0x1021, initial value 0xFFFF, no reflection),
//! fed one byte at a time over each 64-bit DAQ word, most significant byte
//! first. The CRC field in the trailer counts as zero. The result must match
//! what the FED's own CRC unit writes into the trailer.

use crc::{Crc, CRC_16_IBM_3740};

/// Trailer bits holding the CRC, in the last word of the buffer
const CRC_FIELD_MASK: u32 = 0xFFFF_0000;
pub const CRC_FIELD_SHIFT: u32 = 16;

/// CRC-16/CCITT-FALSE: polynomial 0x1021, init 0xFFFF, no reflection
static FED_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC-16/CCITT over a plain byte sequence
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    FED_CRC.checksum(bytes)
}

/// CRC of a complete FED event held as 32-bit words, trailer last.
///
/// `word_swapped` reverses the two 32-bit words of every 64-bit pair before
/// they enter the CRC, which is how old-VME format events were framed.
pub fn calculate_fed_buffer_crc(words: &[u32], word_swapped: bool) -> u16 {
    let last = words.len().saturating_sub(1);
    let word_at = |index: usize| -> u32 {
        let word = words[index];
        if index == last && words.len() >= 2 {
            word & !CRC_FIELD_MASK
        } else {
            word
        }
    };

    let mut digest = FED_CRC.digest();
    for pair in (0..words.len()).step_by(2) {
        let (first, second) = match (pair + 1 < words.len(), word_swapped) {
            (true, true) => (word_at(pair + 1), Some(word_at(pair))),
            (true, false) => (word_at(pair), Some(word_at(pair + 1))),
            (false, _) => (word_at(pair), None),
        };
        digest.update(&first.to_be_bytes());
        if let Some(word) = second {
            digest.update(&word.to_be_bytes());
        }
    }
    digest.finalize()
}

/// Stored CRC of a buffer laid out like [`calculate_fed_buffer_crc`] expects
pub fn stored_crc(words: &[u32]) -> Option<u16> {
    words
        .last()
        .filter(|_| words.len() >= 2)
        .map(|&word| ((word & CRC_FIELD_MASK) >> CRC_FIELD_SHIFT) as u16)
}

/// Write `crc` into the trailer CRC field of `words`
pub fn store_crc(words: &mut [u32], crc: u16) {
    if words.len() < 2 {
        return;
    }
    if let Some(word) = words.last_mut() {
        *word = (*word & !CRC_FIELD_MASK) | ((crc as u32) << CRC_FIELD_SHIFT);
    }
}
