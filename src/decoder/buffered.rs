//! Event decoder that owns its word buffer

use super::event::Event;
use crate::common::{DecodeError, DecodeResult};

/// Owned copy of a FED event buffer
///
/// [`Event`] borrows its buffer; this type holds the words for callers that
/// must keep an event past the lifetime of the transport buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedEvent {
    words: Vec<u32>,
}

impl BufferedEvent {
    /// Take ownership of an existing word buffer
    pub fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Copy a borrowed word buffer
    pub fn copy_from(words: &[u32]) -> DecodeResult<Self> {
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(words.len())
            .map_err(|_| DecodeError::OutOfMemory {
                requested: words.len() * 4,
            })?;
        owned.extend_from_slice(words);
        Ok(Self { words: owned })
    }

    /// Read a dump of little-endian 32-bit words
    pub fn from_bytes(bytes: &[u8]) -> DecodeResult<Self> {
        if bytes.len() % 4 != 0 {
            return Err(DecodeError::UnalignedBuffer(bytes.len()));
        }
        let mut words = Vec::new();
        words
            .try_reserve_exact(bytes.len() / 4)
            .map_err(|_| DecodeError::OutOfMemory {
                requested: bytes.len(),
            })?;
        words.extend(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        Ok(Self { words })
    }

    /// Little-endian byte dump, inverse of [`from_bytes`](Self::from_bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// Decode the held buffer
    pub fn event(&self) -> DecodeResult<Event<'_>> {
        Event::new(&self.words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::EventBuilder;

    #[test]
    fn test_byte_dump_round_trip() {
        let words = EventBuilder::new(10).build().unwrap();
        let buffered = BufferedEvent::from_words(words.clone());
        let restored = BufferedEvent::from_bytes(&buffered.to_bytes()).unwrap();
        assert_eq!(restored.words(), &words[..]);
        restored.event().unwrap().check_event().unwrap();
    }

    #[test]
    fn test_from_bytes_little_endian() {
        let buffered = BufferedEvent::from_bytes(&[0x04, 0x03, 0x02, 0x01]).unwrap();
        assert_eq!(buffered.words(), &[0x0102_0304]);
    }

    #[test]
    fn test_unaligned_dump_rejected() {
        assert_eq!(
            BufferedEvent::from_bytes(&[0; 7]),
            Err(DecodeError::UnalignedBuffer(7))
        );
    }

    #[test]
    fn test_event_outlives_source() {
        let buffered = {
            let source = EventBuilder::new(2).build().unwrap();
            BufferedEvent::copy_from(&source).unwrap()
        };
        let event = buffered.event().unwrap();
        assert_eq!(event.fe_unit_count(), 8);
    }
}
