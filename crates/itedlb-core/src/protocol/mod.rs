//! DLB4 wire protocol
//!
//! - [`wire`] packs and unpacks the command and status blocks
//! - [`opcodes`] holds the opcode, function code and mode catalog

pub mod opcodes;
pub mod wire;

pub use wire::{CommandBlock, StatusBlock, CBW_LEN, CBW_SIGNATURE, CSW_LEN, CSW_SIGNATURE};
