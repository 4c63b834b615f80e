//! FED9U event buffer decoding
//!
//! Bottom up:
//! - `view`: XOR-3 corrected byte views over the word buffer
//! - `crc`: buffer CRC
//! - `channel`: one channel's packet code and samples
//! - `fe_unit`: FE header, channel statuses and channel list
//! - `event`: format sniffing, FE unit loop, trailer and checks
//! - `buffered`: owning wrapper

pub mod buffered;
pub mod channel;
pub mod crc;
pub mod event;
pub mod fe_unit;
pub mod types;
pub mod view;

pub use buffered::BufferedEvent;
pub use channel::{Channel, ChannelLayout, Cluster};
pub use self::crc::calculate_fed_buffer_crc;
pub use event::{DaqHeader, Event, EventSummary, FeUnitSummary, TrackerHeader, Trailer};
pub use fe_unit::FeUnit;
pub use types::{ChannelStatus, DaqMode, DaqSuperMode, EventFormat, HeaderFormat, PacketCode};
pub use view::EventBufferView;

use crate::common::DecodeResult;
use crate::config::Config;

/// Decode `words` and run the checks enabled in `config`
pub fn decode_event<'a>(words: &'a [u32], config: &Config) -> DecodeResult<Event<'a>> {
    let event = Event::new(words)?;
    event.check_event_with(&config.decoder)?;
    if config.decoder.check_channel_status {
        event.check_channel_statuses(&config.description)?;
    }
    Ok(event)
}
