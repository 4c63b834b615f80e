//! Bit-field packing for VME command payloads
//!
//! FED registers are often arrays of narrow fields (5-bit trim DAC values,
//! 6-bit thresholds, ...). The serial command interface wants them as one
//! dense bit stream, most significant bit first, in 32-bit words. The final
//! word is padded with zeros in its low-order bits.

use crate::common::PackError;

const WORD_BITS: u32 = 32;

/// Mask covering the low `width` bits
#[inline]
pub fn low_mask(width: u32) -> u32 {
    if width >= WORD_BITS {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Merge equal-width elements into a dense MSB-first stream of 32-bit words.
///
/// The element width is `total_bit_length / values.len()` and must divide
/// evenly. Each element is masked to that width before packing.
pub fn merge_vector_elements(values: &[u32], total_bit_length: u32) -> Result<Vec<u32>, PackError> {
    if values.is_empty() {
        return Err(PackError::Empty);
    }
    let count = values.len();
    if total_bit_length % count as u32 != 0 {
        return Err(PackError::UnevenWidth {
            total: total_bit_length,
            count,
        });
    }
    let width = total_bit_length / count as u32;
    if width == 0 || width > WORD_BITS {
        return Err(PackError::InvalidWidth(width));
    }

    let n_words = total_bit_length.div_ceil(WORD_BITS) as usize;
    let mut packed = vec![0u32; n_words];
    let mask = low_mask(width);

    // bit cursor counts from the MSB of packed[0]
    let mut bit = 0u32;
    for &value in values {
        let value = value & mask;
        let word = (bit / WORD_BITS) as usize;
        let used = bit % WORD_BITS;
        let free = WORD_BITS - used;
        if width <= free {
            packed[word] |= value << (free - width);
        } else {
            // straddles into the next word
            let spill = width - free;
            packed[word] |= value >> spill;
            packed[word + 1] |= value << (WORD_BITS - spill);
        }
        bit += width;
    }

    Ok(packed)
}

/// Recover equal-width elements from a stream built by [`merge_vector_elements`].
///
/// Returns exactly `total_bit_length / element_width` elements, each ANDed
/// with `mask`. Padding bits in the final word are ignored.
pub fn unpack_vector_elements(
    packed: &[u32],
    element_width: u32,
    mask: u32,
    total_bit_length: u32,
) -> Result<Vec<u32>, PackError> {
    if element_width == 0 || element_width > WORD_BITS {
        return Err(PackError::InvalidWidth(element_width));
    }
    let available = packed.len() * WORD_BITS as usize;
    if (total_bit_length as usize) > available {
        return Err(PackError::ShortStream {
            available,
            required: total_bit_length as usize,
        });
    }

    let count = (total_bit_length / element_width) as usize;
    let mut values = Vec::with_capacity(count);

    // bits of packed[word] already consumed; advances by element_width mod 32
    // so the straddle point cycles when the width does not divide 32
    let mut consumed = 0u32;
    let mut word = 0usize;
    for _ in 0..count {
        let free = WORD_BITS - consumed;
        let value = if element_width <= free {
            let v = (packed[word] >> (free - element_width)) & low_mask(element_width);
            consumed += element_width;
            v
        } else {
            let spill = element_width - free;
            let high = packed[word] & low_mask(free);
            word += 1;
            let low = packed[word] >> (WORD_BITS - spill);
            consumed = spill;
            (high << spill) | low
        };
        if consumed == WORD_BITS {
            consumed = 0;
            word += 1;
        }
        values.push(value & mask);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_empty_fails() {
        assert_eq!(merge_vector_elements(&[], 0), Err(PackError::Empty));
    }

    #[test]
    fn test_merge_uneven_fails() {
        let err = merge_vector_elements(&[1, 2, 3], 10).unwrap_err();
        assert_eq!(err, PackError::UnevenWidth { total: 10, count: 3 });
    }

    #[test]
    fn test_merge_full_words_passthrough() {
        let packed = merge_vector_elements(&[0xDEAD_BEEF, 0x0123_4567], 64).unwrap();
        assert_eq!(packed, vec![0xDEAD_BEEF, 0x0123_4567]);
    }

    #[test]
    fn test_merge_nibbles_msb_first() {
        let packed = merge_vector_elements(&[0x1, 0x2, 0x3], 12).unwrap();
        assert_eq!(packed, vec![0x1230_0000]);
    }

    #[test]
    fn test_merge_masks_wide_values() {
        let packed = merge_vector_elements(&[0xFF, 0x00], 8).unwrap();
        assert_eq!(packed, vec![0xF000_0000]);
    }

    #[test]
    fn test_merge_six_bit_straddle() {
        // six 6-bit all-ones = 36 bits -> 32 ones then 4 ones at the top of word 1
        let packed = merge_vector_elements(&[0x3F; 6], 36).unwrap();
        assert_eq!(packed, vec![0xFFFF_FFFF, 0xF000_0000]);
    }

    #[test]
    fn test_unpack_five_bit_pattern() {
        let values: Vec<u32> = (0..25).map(|i| (i * 7) % 32).collect();
        let packed = merge_vector_elements(&values, 5 * 25).unwrap();
        assert_eq!(packed.len(), 4);
        let unpacked = unpack_vector_elements(&packed, 5, 0x1F, 5 * 25).unwrap();
        assert_eq!(unpacked, values);
    }

    #[test]
    fn test_unpack_six_bit_pattern() {
        let values: Vec<u32> = (0..24).map(|i| 63 - i).collect();
        let packed = merge_vector_elements(&values, 6 * 24).unwrap();
        let unpacked = unpack_vector_elements(&packed, 6, 0x3F, 6 * 24).unwrap();
        assert_eq!(unpacked, values);
    }

    #[test]
    fn test_round_trip_all_widths() {
        for width in 1..32u32 {
            for n in [1usize, 2, 7, 33] {
                let mask = low_mask(width);
                let values: Vec<u32> = (0..n as u32)
                    .map(|i| i.wrapping_mul(0x9E37_79B9) & mask)
                    .collect();
                let total = width * n as u32;
                let packed = merge_vector_elements(&values, total).unwrap();
                let unpacked = unpack_vector_elements(&packed, width, mask, total).unwrap();
                assert_eq!(unpacked, values, "width {} n {}", width, n);
            }
        }
    }

    #[test]
    fn test_unpack_applies_mask() {
        let packed = merge_vector_elements(&[0x3F, 0x3F], 12).unwrap();
        let unpacked = unpack_vector_elements(&packed, 6, 0x0F, 12).unwrap();
        assert_eq!(unpacked, vec![0x0F, 0x0F]);
    }

    #[test]
    fn test_unpack_short_stream_fails() {
        let err = unpack_vector_elements(&[0], 6, 0x3F, 36).unwrap_err();
        assert_eq!(
            err,
            PackError::ShortStream {
                available: 32,
                required: 36
            }
        );
    }

    #[test]
    fn test_unpack_invalid_width() {
        assert_eq!(
            unpack_vector_elements(&[0], 0, 0, 0),
            Err(PackError::InvalidWidth(0))
        );
    }
}
