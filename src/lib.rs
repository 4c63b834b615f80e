//! FED9U-RS: event buffer decoding and VME command protocol for the CMS
//! tracker FED9U front-end driver board.
//!
//! Inbound, [`decoder`] turns a raw event buffer read over VME into a
//! randomly addressable event: FE units, channels, samples, CRC and status
//! checks. Outbound, [`command`] packs register values into the FED's
//! serial command words. [`emulator`] synthesises valid event buffers for
//! testing without hardware.

pub mod command;
pub mod common;
pub mod config;
pub mod decoder;
pub mod emulator;
