//! Types shared across the decoder, command builder and emulator

pub mod error;

pub use error::{CommandError, DecodeError, DecodeResult, ErrorKind, PackError};
