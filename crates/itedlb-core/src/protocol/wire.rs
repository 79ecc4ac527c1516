//! Command and status block wire format
//!
//! Both blocks are packed field by field at fixed offsets, little-endian,
//! independent of host byte order or struct layout.
//!
//! Command block (31 bytes):
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | signature `0x43424C44` |
//! | 4 | 4 | tag |
//! | 8 | 4 | data length |
//! | 12 | 1 | flags (bit 7 set = data phase is device to host) |
//! | 13 | 1 | command length (15) |
//! | 14 | 15 | command record |
//! | 29 | 2 | padding (zero) |
//!
//! Status block (13 bytes):
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | signature `0x53424C44` |
//! | 4 | 4 | tag (echoed) |
//! | 8 | 4 | data residue |
//! | 12 | 1 | status |

use crate::error::{Error, Result};

/// Command block signature
pub const CBW_SIGNATURE: u32 = 0x4342_4C44;
/// Status block signature
pub const CSW_SIGNATURE: u32 = 0x5342_4C44;
/// Encoded command block length
pub const CBW_LEN: usize = 31;
/// Encoded status block length
pub const CSW_LEN: usize = 13;
/// Length of the command record carried in the command block
pub const CB_LEN: usize = 15;
/// Offset of the command record in the command block
const CB_OFFSET: usize = 14;
/// Flag bit marking a device-to-host data phase
pub const FLAG_DATA_IN: u8 = 0x80;
/// Status value of a passed command
pub const CSW_PASSED: u8 = 0x00;
/// Status value of a failed command
pub const CSW_FAILED: u8 = 0x01;

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Request header sent once per exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBlock {
    /// Correlation value echoed by the status block
    pub tag: u32,
    /// Length of the data phase that follows
    pub data_length: u32,
    /// Direction flags
    pub flags: u8,
    /// Opcode record
    pub command: [u8; CB_LEN],
}

impl CommandBlock {
    /// Build a command block for the given record
    pub fn new(tag: u32, data_length: u32, data_in: bool, command: [u8; CB_LEN]) -> Self {
        Self {
            tag,
            data_length,
            flags: if data_in { FLAG_DATA_IN } else { 0 },
            command,
        }
    }

    /// True when the data phase runs device to host
    pub fn is_data_in(&self) -> bool {
        self.flags & FLAG_DATA_IN != 0
    }

    /// Pack into wire bytes
    pub fn encode(&self) -> [u8; CBW_LEN] {
        let mut buf = [0u8; CBW_LEN];
        buf[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        buf[4..8].copy_from_slice(&self.tag.to_le_bytes());
        buf[8..12].copy_from_slice(&self.data_length.to_le_bytes());
        buf[12] = self.flags;
        buf[13] = CB_LEN as u8;
        buf[CB_OFFSET..CB_OFFSET + CB_LEN].copy_from_slice(&self.command);
        buf
    }

    /// Unpack from wire bytes, validating signature and record length
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < CBW_LEN {
            return Err(Error::InvalidParameter(format!(
                "command block is {} bytes, expected {}",
                buf.len(),
                CBW_LEN
            )));
        }

        let signature = read_u32(buf, 0);
        if signature != CBW_SIGNATURE {
            return Err(Error::SignatureMismatch { found: signature });
        }
        if buf[13] as usize != CB_LEN {
            return Err(Error::InvalidParameter(format!(
                "command length {} (expected {})",
                buf[13], CB_LEN
            )));
        }

        let mut command = [0u8; CB_LEN];
        command.copy_from_slice(&buf[CB_OFFSET..CB_OFFSET + CB_LEN]);

        Ok(Self {
            tag: read_u32(buf, 4),
            data_length: read_u32(buf, 8),
            flags: buf[12],
            command,
        })
    }
}

/// Reply header received once per exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBlock {
    /// Signature as received
    pub signature: u32,
    /// Echoed correlation value
    pub tag: u32,
    /// Bytes of the data phase that were not transferred
    pub data_residue: u32,
    /// Command status
    pub status: u8,
}

impl StatusBlock {
    /// A passed status block for the given tag
    pub fn passed(tag: u32) -> Self {
        Self {
            signature: CSW_SIGNATURE,
            tag,
            data_residue: 0,
            status: CSW_PASSED,
        }
    }

    /// True when the signature is the status block constant
    pub fn is_valid(&self) -> bool {
        self.signature == CSW_SIGNATURE
    }

    /// True when the device reported success
    pub fn is_passed(&self) -> bool {
        self.status == CSW_PASSED
    }

    /// Pack into wire bytes
    pub fn encode(&self) -> [u8; CSW_LEN] {
        let mut buf = [0u8; CSW_LEN];
        buf[0..4].copy_from_slice(&self.signature.to_le_bytes());
        buf[4..8].copy_from_slice(&self.tag.to_le_bytes());
        buf[8..12].copy_from_slice(&self.data_residue.to_le_bytes());
        buf[12] = self.status;
        buf
    }

    /// Unpack from wire bytes
    ///
    /// The signature is not checked here; use [`StatusBlock::is_valid`].
    pub fn decode(buf: &[u8; CSW_LEN]) -> Self {
        Self {
            signature: read_u32(buf, 0),
            tag: read_u32(buf, 4),
            data_residue: read_u32(buf, 8),
            status: buf[12],
        }
    }
}
