//! Outbound VME command construction
//!
//! Builds the serial command words written to the FED through the VME
//! transport, including bit-packed register payloads.

pub mod bit_packer;
pub mod builder;

pub use bit_packer::{merge_vector_elements, unpack_vector_elements};
pub use builder::{
    construct_block_write_command, construct_command, construct_delay_chip_command, fpga,
    SKEW_DESIGNATOR,
};
