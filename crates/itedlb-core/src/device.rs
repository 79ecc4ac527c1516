//! DLB4 device API
//!
//! This module provides the `Dlb4` struct: one method per catalog operation.
//! Each method owns its per-call buffer, builds the operation through the
//! [`CommandSet`], runs the exchange and returns the typed result.

use core::fmt;

use crate::command::{
    AccessPath, CommandSet, DbgrAccess, DebugMode, FlashProfile, GpioPin, PinMode,
};
use crate::error::Result;
use crate::protocol::opcodes::*;
use crate::transport::{BulkPipe, RetryPolicy, Transport};

/// Board firmware version record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersion(pub [u8; FW_VERSION_LEN]);

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}", self.0[0], self.0[1])
    }
}

/// EC chip ID with the auxiliary ID bytes read from registers 0x2085-0x2087
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChipId {
    /// Chip ID record
    pub id: [u8; CHIP_ID_LEN],
    /// Auxiliary ID bytes
    pub aux: [u8; 3],
}

impl ChipId {
    /// A chip ID whose first byte is zero means the EC has not answered yet
    pub fn is_valid(&self) -> bool {
        self.id[0] != 0
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}{:02x}{:02x} ( {:x}{:02x}{:02x} )",
            self.id[0], self.id[1], self.id[2], self.aux[0], self.aux[1], self.aux[2]
        )
    }
}

/// Flash JEDEC ID record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashId(pub [u8; FLASH_ID_LEN]);

impl fmt::Display for FlashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x} {:02x} {:02x}", self.0[0], self.0[1], self.0[2])
    }
}

/// ITE DLB4 download board
///
/// Wraps a [`Transport`] and the [`CommandSet`] of the active access path.
/// Every method is one blocking exchange.
pub struct Dlb4<P> {
    transport: Transport<P>,
    commands: CommandSet,
}

impl<P: BulkPipe> Dlb4<P> {
    /// Board reached through `pipe` on the given access path
    pub fn new(pipe: P, path: AccessPath, policy: RetryPolicy) -> Self {
        Self {
            transport: Transport::with_policy(pipe, policy),
            commands: CommandSet::new(path),
        }
    }

    /// Access path in use
    pub fn path(&self) -> AccessPath {
        self.commands.path()
    }

    /// Flash profile of the access path in use
    pub fn profile(&self) -> FlashProfile {
        FlashProfile::for_path(self.path())
    }

    /// The encoder of the active access path
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Borrow the underlying transport
    pub fn transport_mut(&mut self) -> &mut Transport<P> {
        &mut self.transport
    }

    /// Release the underlying pipe
    pub fn into_inner(self) -> P {
        self.transport.into_inner()
    }

    /// Wait `ms` milliseconds
    pub fn delay_ms(&mut self, ms: u64) {
        self.transport.delay_ms(ms);
    }

    /// Read the board firmware version
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion> {
        let mut buf = [0u8; FW_VERSION_LEN];
        self.transport.exchange(self.commands.firmware_version(&mut buf))?;
        Ok(FirmwareVersion(buf))
    }

    /// Drive a board GPIO
    pub fn set_gpio(&mut self, pin: GpioPin, mode: PinMode) -> Result<()> {
        let mut payload = [0u8; GPIO_PAYLOAD_LEN];
        let op = self.commands.set_gpio(pin as u8, mode as u8, &mut payload)?;
        self.transport.exchange(op)?;
        Ok(())
    }

    /// Start a debug session in the given mode, returning the reply byte
    pub fn start_debug(&mut self, mode: DebugMode) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.transport.exchange(self.commands.start_debug(mode, &mut buf))?;
        Ok(buf[0])
    }

    /// Read one EC register
    pub fn read_register(&mut self, addr: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.transport
            .exchange(self.commands.read_register(addr, &mut buf))?;
        log::trace!("reg 0x{:04X} -> 0x{:02X}", addr, buf[0]);
        Ok(buf[0])
    }

    /// Write one EC register
    pub fn write_register(&mut self, addr: u16, value: u8) -> Result<()> {
        log::trace!("reg 0x{:04X} <- 0x{:02X}", addr, value);
        self.transport
            .exchange(self.commands.write_register(addr, &value))?;
        Ok(())
    }

    /// Halt or release the EC core
    pub fn run_control(&mut self, p1: u8, p2: u8, p3: u8) -> Result<()> {
        let payload = RUN_CTRL_PAYLOAD;
        self.transport
            .exchange(self.commands.run_control(p1, p2, p3, &payload))?;
        Ok(())
    }

    /// Read or write a debugger command setting
    pub fn debug_command_set(&mut self, access: DbgrAccess, cmd: u8, value: u8) -> Result<()> {
        self.transport
            .exchange(self.commands.debug_command_set(access, cmd, &value))?;
        Ok(())
    }

    /// Read the 3-byte chip ID record
    pub fn chip_id(&mut self) -> Result<[u8; CHIP_ID_LEN]> {
        let mut buf = [0u8; CHIP_ID_LEN];
        self.transport.exchange(self.commands.chip_id(&mut buf))?;
        Ok(buf)
    }

    /// Read the flash JEDEC ID
    pub fn flash_id(&mut self, mode: u8) -> Result<FlashId> {
        let mut buf = [0u8; FLASH_ID_LEN];
        self.transport
            .exchange(self.commands.flash_id(mode, &mut buf))?;
        Ok(FlashId(buf))
    }

    /// Write the flash status registers, returning `byte_count` bytes of readback
    pub fn flash_status(&mut self, byte_count: u8, status1: u8, status2: u8) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; byte_count as usize];
        let op = self
            .commands
            .flash_status(byte_count, status1, status2, &mut buf)?;
        self.transport.exchange(op)?;
        Ok(buf)
    }

    /// Erase inside `block`; `sector` selects the scope
    pub fn erase(&mut self, block: usize, sector: u8, profile: &FlashProfile) -> Result<u8> {
        let mut buf = [0u8; 1];
        let op = self.commands.erase(block, sector, profile, &mut buf)?;
        self.transport.exchange(op)?;
        Ok(buf[0])
    }

    /// Read one block into `buf`
    pub fn read_block(&mut self, block: usize, profile: &FlashProfile, buf: &mut [u8]) -> Result<()> {
        let op = self.commands.read_block(block, profile, buf)?;
        self.transport.exchange(op)?;
        Ok(())
    }

    /// Program one block from `data`
    pub fn program_block(&mut self, block: usize, profile: &FlashProfile, data: &[u8]) -> Result<()> {
        let op = self.commands.program_block(block, profile, data)?;
        self.transport.exchange(op)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(FirmwareVersion([0x01, 0x23, 0xAA, 0xBB]).to_string(), "0123");

        let chip = ChipId {
            id: [0x81, 0x30, 0x02],
            aux: [0x05, 0x00, 0x01],
        };
        assert!(chip.is_valid());
        assert_eq!(chip.to_string(), "813002 ( 50001 )");
        assert!(!ChipId::default().is_valid());

        assert_eq!(FlashId([0xEF, 0x40, 0x16, 0, 0]).to_string(), "ef 40 16");
    }
}
