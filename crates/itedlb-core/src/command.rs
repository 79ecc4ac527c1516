//! Command encoder
//!
//! Pure mapping from the DLB4 operation catalog onto opcode records. Nothing
//! here touches the link: every encoder validates its parameters and returns
//! a [`DeviceOperation`] that borrows the caller's buffer for the exchange.

use core::fmt;
use core::slice;

use crate::error::{Error, Result};
use crate::protocol::opcodes::*;
use crate::protocol::wire::CB_LEN;

/// Number of parameter bytes in an opcode record
pub const PARAM_COUNT: usize = 7;

/// Opcode record: opcode, function code and seven parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Command {
    /// Command group
    pub opcode: u8,
    /// Operation within the group
    pub function: u8,
    /// Operation parameters p1..p7
    pub params: [u8; PARAM_COUNT],
}

impl Command {
    /// Command with all parameters zero
    pub const fn new(opcode: u8, function: u8) -> Self {
        Self {
            opcode,
            function,
            params: [0; PARAM_COUNT],
        }
    }

    /// Set parameter `n` (1-based, as the firmware numbers them)
    pub fn param(mut self, n: usize, value: u8) -> Self {
        self.params[n - 1] = value;
        self
    }

    /// Pack into the 15-byte record carried by the command block
    pub fn to_bytes(&self) -> [u8; CB_LEN] {
        let mut buf = [0u8; CB_LEN];
        buf[0] = self.opcode;
        buf[1] = self.function;
        buf[2..2 + PARAM_COUNT].copy_from_slice(&self.params);
        buf
    }

    /// Unpack from a 15-byte record; padding is ignored
    pub fn from_bytes(buf: &[u8; CB_LEN]) -> Self {
        let mut params = [0u8; PARAM_COUNT];
        params.copy_from_slice(&buf[2..2 + PARAM_COUNT]);
        Self {
            opcode: buf[0],
            function: buf[1],
            params,
        }
    }
}

/// Data phase direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// One request to the board, with its data phase buffer
///
/// The variant fixes the direction, and the buffer length is the data phase
/// length, so the two can never disagree.
#[derive(Debug)]
pub enum DeviceOperation<'a> {
    /// Read `buffer.len()` bytes from the device
    Read {
        /// Opcode record
        command: Command,
        /// Destination of the data phase
        buffer: &'a mut [u8],
    },
    /// Write `buffer.len()` bytes to the device
    Write {
        /// Opcode record
        command: Command,
        /// Source of the data phase
        buffer: &'a [u8],
    },
}

impl DeviceOperation<'_> {
    /// The opcode record
    pub fn command(&self) -> &Command {
        match self {
            DeviceOperation::Read { command, .. } | DeviceOperation::Write { command, .. } => {
                command
            }
        }
    }

    /// Data phase direction
    pub fn direction(&self) -> Direction {
        match self {
            DeviceOperation::Read { .. } => Direction::In,
            DeviceOperation::Write { .. } => Direction::Out,
        }
    }

    /// Data phase length in bytes
    pub fn len(&self) -> usize {
        match self {
            DeviceOperation::Read { buffer, .. } => buffer.len(),
            DeviceOperation::Write { buffer, .. } => buffer.len(),
        }
    }

    /// True when the exchange has no data phase
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How the board reaches the target flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPath {
    /// In-circuit through the EC debug registers
    #[default]
    Debug,
    /// Directly on the SPI pins
    Spi,
}

impl AccessPath {
    /// Opcode for target commands on this path
    pub fn opcode(self) -> u8 {
        match self {
            AccessPath::Debug => OP_DBGR,
            AccessPath::Spi => OP_DBGR_SPI,
        }
    }

    /// Function code of the flash ID read
    pub fn flash_id_function(self) -> u8 {
        match self {
            AccessPath::Debug => FN_FLASHID_READ,
            AccessPath::Spi => FN_FLASHID_READ_SPI,
        }
    }

    /// Function code of the block read
    pub fn read_function(self) -> u8 {
        match self {
            AccessPath::Debug => FN_FLASH_READ,
            AccessPath::Spi => FN_FLASH_READ_SPI,
        }
    }

    /// Function code of the erase
    pub fn erase_function(self) -> u8 {
        match self {
            AccessPath::Debug => FN_FLASH_ERASE,
            AccessPath::Spi => FN_FLASH_ERASE_SPI,
        }
    }

    /// Function code of the block program
    pub fn write_function(self) -> u8 {
        match self {
            AccessPath::Debug => FN_FLASH_WRITE,
            AccessPath::Spi => FN_FLASH_WRITE_SPI,
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPath::Debug => write!(f, "debug (I2C)"),
            AccessPath::Spi => write!(f, "SPI"),
        }
    }
}

/// Erase granularity
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseMode {
    /// Whole device in one call
    Chip = 0x00,
    /// 4 KiB sub-sectors
    Sector = 0x01,
    /// Whole 64 KiB blocks
    Block = 0x02,
}

/// Erase type that also clears block protection
pub const ERASE_TYPE_UNPROTECT: u8 = 0x03;

/// Read/program/erase modes, fixed once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashProfile {
    /// Read command mode
    pub read_mode: u8,
    /// Program command mode
    pub write_mode: u8,
    /// Program type
    pub write_type: u8,
    /// Erase granularity
    pub erase_mode: EraseMode,
    /// Erase type
    pub erase_type: u8,
}

impl FlashProfile {
    /// Profile used by the given access path
    pub fn for_path(path: AccessPath) -> Self {
        Self {
            read_mode: 0x03,
            write_mode: 0x03,
            write_type: 0x00,
            erase_mode: match path {
                AccessPath::Debug => EraseMode::Sector,
                AccessPath::Spi => EraseMode::Chip,
            },
            erase_type: ERASE_TYPE_UNPROTECT,
        }
    }

    /// True when the whole device is erased in one call
    pub fn is_chip_erase(&self) -> bool {
        self.erase_mode == EraseMode::Chip
    }
}

/// Board GPIO pins
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioPin {
    /// C1, wired to the EC reset / select line
    C1 = 1,
    /// C2
    C2 = 2,
    /// H1
    H1 = 3,
    /// H2
    H2 = 4,
    /// G6, the SPI clock pin
    G6 = 5,
}

impl TryFrom<u8> for GpioPin {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(GpioPin::C1),
            2 => Ok(GpioPin::C2),
            3 => Ok(GpioPin::H1),
            4 => Ok(GpioPin::H2),
            5 => Ok(GpioPin::G6),
            _ => Err(Error::InvalidParameter(format!(
                "GPIO pin {} (must be 1-5)",
                v
            ))),
        }
    }
}

/// Board GPIO pin modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Alternate (peripheral) function
    Alt = 0,
    /// Output driver enabled
    Output = 1,
    /// Drive high
    High = 2,
    /// Drive low
    Low = 3,
}

impl TryFrom<u8> for PinMode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PinMode::Alt),
            1 => Ok(PinMode::Output),
            2 => Ok(PinMode::High),
            3 => Ok(PinMode::Low),
            _ => Err(Error::InvalidParameter(format!(
                "pin mode {} (must be 0-3)",
                v
            ))),
        }
    }
}

/// Modes of the start-debug command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    /// Stop the special waveform
    StopSpecialWaveform = 0x00,
    /// Send the 120 kHz special waveform
    Send120kWaveform = 0x01,
    /// Enter flash mode
    EnterFlash = 0x02,
    /// Enter debug mode
    EnterDebug = 0x03,
    /// Reset and stop the EC
    ResetStopEc = 0x04,
    /// Reset the EC
    Reset = 0x06,
    /// Send the 100 kHz special waveform
    Send100kWaveform = 0x07,
    /// Select the EC internal flash
    FlashInternal = 0x0A,
    /// Select external flash; also starts the direct SPI session
    FlashExternal = 0x0B,
    /// Initialise I2C at 1 MHz and enter debug mode
    I2cInit1MHz = 0x0C,
}

/// Debugger command-set access
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbgrAccess {
    /// Read back the setting
    Read = 0x00,
    /// Write the setting
    Write = 0x01,
}

/// Encoder for one access path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandSet {
    path: AccessPath,
}

fn check_block(block: usize) -> Result<()> {
    if block > MAX_BLOCK_INDEX {
        return Err(Error::InvalidParameter(format!(
            "block index {} exceeds 0x{:X}",
            block, MAX_BLOCK_INDEX
        )));
    }
    Ok(())
}

fn check_block_len(len: usize) -> Result<()> {
    if len == 0 || len > BLOCK_SIZE {
        return Err(Error::InvalidParameter(format!(
            "block transfer of {} bytes (must be 1-{})",
            len, BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Sector parameter of sub-sector `index` within a block
///
/// The sub-sector index goes in the high nibble, the low nibble is 0xF.
pub fn sub_sector_param(index: u8) -> Result<u8> {
    if index >= SUB_SECTORS_PER_BLOCK {
        return Err(Error::InvalidParameter(format!(
            "sub-sector {} (must be 0-{})",
            index,
            SUB_SECTORS_PER_BLOCK - 1
        )));
    }
    Ok((index << 4) | SUB_SECTOR_LOW_NIBBLE)
}

impl CommandSet {
    /// Encoder for the given access path
    pub fn new(path: AccessPath) -> Self {
        Self { path }
    }

    /// Access path this encoder targets
    pub fn path(&self) -> AccessPath {
        self.path
    }

    fn target(&self, function: u8) -> Command {
        Command::new(self.path.opcode(), function)
    }

    /// Read the board firmware version
    pub fn firmware_version<'a>(&self, buf: &'a mut [u8; FW_VERSION_LEN]) -> DeviceOperation<'a> {
        DeviceOperation::Read {
            command: Command::new(OP_FW_CTL, FW_READ_VERSION),
            buffer: buf,
        }
    }

    /// Drive a board GPIO; the payload carries pin and mode
    pub fn set_gpio<'a>(
        &self,
        pin: u8,
        mode: u8,
        payload: &'a mut [u8; GPIO_PAYLOAD_LEN],
    ) -> Result<DeviceOperation<'a>> {
        let pin = GpioPin::try_from(pin)?;
        let mode = PinMode::try_from(mode)?;
        *payload = [pin as u8, mode as u8, 0, 0];
        Ok(DeviceOperation::Write {
            command: Command::new(OP_FW_CTL, FW_SET_GPIO),
            buffer: payload,
        })
    }

    /// Read one EC register
    pub fn read_register<'a>(&self, addr: u16, buf: &'a mut [u8; 1]) -> DeviceOperation<'a> {
        let [high, low] = addr.to_be_bytes();
        DeviceOperation::Read {
            command: self
                .target(FN_READ_REG)
                .param(1, high)
                .param(2, low)
                .param(7, REG_ACCESS_MARKER),
            buffer: buf,
        }
    }

    /// Write one EC register
    pub fn write_register<'a>(&self, addr: u16, value: &'a u8) -> DeviceOperation<'a> {
        let [high, low] = addr.to_be_bytes();
        DeviceOperation::Write {
            command: self
                .target(FN_WRITE_REG)
                .param(1, high)
                .param(2, low)
                .param(7, REG_ACCESS_MARKER),
            buffer: slice::from_ref(value),
        }
    }

    /// Read the EC chip ID
    pub fn chip_id<'a>(&self, buf: &'a mut [u8; CHIP_ID_LEN]) -> DeviceOperation<'a> {
        DeviceOperation::Read {
            command: self.target(FN_CHIPID_READ),
            buffer: buf,
        }
    }

    /// Read the flash JEDEC ID
    pub fn flash_id<'a>(&self, mode: u8, buf: &'a mut [u8; FLASH_ID_LEN]) -> DeviceOperation<'a> {
        DeviceOperation::Read {
            command: self.target(self.path.flash_id_function()).param(1, mode),
            buffer: buf,
        }
    }

    /// Start a debug session in the given mode
    pub fn start_debug<'a>(&self, mode: DebugMode, buf: &'a mut [u8; 1]) -> DeviceOperation<'a> {
        DeviceOperation::Read {
            command: self.target(FN_START_DEBUG).param(1, mode as u8),
            buffer: buf,
        }
    }

    /// Halt or release the EC core
    pub fn run_control<'a>(&self, p1: u8, p2: u8, p3: u8, payload: &'a u8) -> DeviceOperation<'a> {
        DeviceOperation::Write {
            command: self
                .target(FN_RUN_CTRL)
                .param(1, p1)
                .param(2, p2)
                .param(3, p3),
            buffer: slice::from_ref(payload),
        }
    }

    /// Read or write a debugger command setting
    pub fn debug_command_set<'a>(
        &self,
        access: DbgrAccess,
        cmd: u8,
        value: &'a u8,
    ) -> DeviceOperation<'a> {
        DeviceOperation::Write {
            command: self
                .target(FN_DBGR_CMD_SET)
                .param(1, access as u8)
                .param(2, cmd)
                .param(3, *value),
            buffer: slice::from_ref(value),
        }
    }

    /// Erase within `block`; `sector` selects chip, block or sub-sector scope
    pub fn erase<'a>(
        &self,
        block: usize,
        sector: u8,
        profile: &FlashProfile,
        buf: &'a mut [u8; 1],
    ) -> Result<DeviceOperation<'a>> {
        check_block(block)?;
        Ok(DeviceOperation::Read {
            command: self
                .target(self.path.erase_function())
                .param(1, profile.erase_mode as u8)
                .param(2, profile.erase_type)
                .param(3, (block & 0xFF) as u8)
                .param(4, sector)
                .param(5, (block >> 8) as u8),
            buffer: buf,
        })
    }

    /// Read one block into `buf`
    pub fn read_block<'a>(
        &self,
        block: usize,
        profile: &FlashProfile,
        buf: &'a mut [u8],
    ) -> Result<DeviceOperation<'a>> {
        check_block(block)?;
        check_block_len(buf.len())?;
        Ok(DeviceOperation::Read {
            command: self
                .target(self.path.read_function())
                .param(1, (block & 0xFF) as u8)
                .param(2, profile.read_mode)
                .param(5, (block >> 8) as u8),
            buffer: buf,
        })
    }

    /// Program one block from `data`
    pub fn program_block<'a>(
        &self,
        block: usize,
        profile: &FlashProfile,
        data: &'a [u8],
    ) -> Result<DeviceOperation<'a>> {
        check_block(block)?;
        check_block_len(data.len())?;
        Ok(DeviceOperation::Write {
            command: self
                .target(self.path.write_function())
                .param(1, profile.write_mode)
                .param(2, (block & 0xFF) as u8)
                .param(3, profile.write_type)
                .param(5, (block >> 8) as u8),
            buffer: data,
        })
    }

    /// Write a non-SST flash status register; the data phase returns
    /// `byte_count` bytes of status readback
    pub fn flash_status<'a>(
        &self,
        byte_count: u8,
        status1: u8,
        status2: u8,
        buf: &'a mut [u8],
    ) -> Result<DeviceOperation<'a>> {
        if byte_count == 0 || buf.len() != byte_count as usize {
            return Err(Error::InvalidParameter(format!(
                "status readback of {} bytes into a {} byte buffer",
                byte_count,
                buf.len()
            )));
        }
        Ok(DeviceOperation::Read {
            command: self
                .target(FN_FLASH_SPI_STATUS)
                .param(1, byte_count)
                .param(2, status1)
                .param(3, status2),
            buffer: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(op: &DeviceOperation<'_>) -> Command {
        Command::from_bytes(&op.command().to_bytes())
    }

    #[test]
    fn test_command_record_layout() {
        let cmd = Command::new(0xF3, 0x23)
            .param(1, 0x20)
            .param(2, 0x06)
            .param(7, 0xF0);
        let bytes = cmd.to_bytes();
        assert_eq!(&bytes[..9], &[0xF3, 0x23, 0x20, 0x06, 0, 0, 0, 0, 0xF0]);
        assert!(bytes[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_operation_in_command_block() {
        use crate::protocol::wire::{CommandBlock, CBW_LEN};

        let mut command = Command::new(0xF3, 0x04);
        for n in 1..=PARAM_COUNT {
            command = command.param(n, 0x10 + n as u8);
        }
        let data = [0u8; 8];
        let op = DeviceOperation::Write {
            command,
            buffer: &data,
        };

        let cbw = CommandBlock::new(9, op.len() as u32, false, op.command().to_bytes());
        let bytes = cbw.encode();
        assert_eq!(bytes.len(), CBW_LEN);
        assert_eq!(
            &bytes[..23],
            &[
                0x44, 0x4C, 0x42, 0x43, // signature
                0x09, 0x00, 0x00, 0x00, // tag
                0x08, 0x00, 0x00, 0x00, // data length
                0x00, 0x0F, // flags, record length
                0xF3, 0x04, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17,
            ]
        );
        assert!(bytes[23..].iter().all(|&b| b == 0));

        let decoded = CommandBlock::decode(&bytes).unwrap();
        assert_eq!(decoded, cbw);
        assert_eq!(Command::from_bytes(&decoded.command), command);
    }

    #[test]
    fn test_encoders_roundtrip() {
        let set = CommandSet::new(AccessPath::Debug);
        let profile = FlashProfile::for_path(AccessPath::Debug);

        let mut buf = vec![0u8; BLOCK_SIZE];
        let op = set.read_block(0x1234, &profile, &mut buf).unwrap();
        let cmd = roundtrip(&op);
        assert_eq!(cmd, *op.command());
        assert_eq!(cmd.params, [0x34, 0x03, 0, 0, 0x12, 0, 0]);
        assert_eq!(op.direction(), Direction::In);
        assert_eq!(op.len(), BLOCK_SIZE);

        let data = vec![0u8; BLOCK_SIZE];
        let op = set.program_block(3, &profile, &data).unwrap();
        assert_eq!(roundtrip(&op), *op.command());
        assert_eq!(op.command().params, [0x03, 3, 0x00, 0, 0, 0, 0]);
        assert_eq!(op.direction(), Direction::Out);

        let mut one = [0u8; 1];
        let op = set
            .erase(0x102, sub_sector_param(2).unwrap(), &profile, &mut one)
            .unwrap();
        assert_eq!(op.command().params, [0x01, 0x03, 0x02, 0x2F, 0x01, 0, 0]);
        assert_eq!(roundtrip(&op), *op.command());
    }

    #[test]
    fn test_path_selects_function_codes() {
        let mut id = [0u8; FLASH_ID_LEN];
        let op = CommandSet::new(AccessPath::Spi).flash_id(FLASH_ID_MODE, &mut id);
        assert_eq!(op.command().opcode, 0xF2);
        assert_eq!(op.command().function, 0x11);
        assert_eq!(op.command().params[0], 0x04);

        let mut id = [0u8; FLASH_ID_LEN];
        let op = CommandSet::new(AccessPath::Debug).flash_id(FLASH_ID_MODE, &mut id);
        assert_eq!(op.command().opcode, 0xF3);
        assert_eq!(op.command().function, 0x01);
    }

    #[test]
    fn test_register_access() {
        let set = CommandSet::new(AccessPath::Debug);
        let value = 0x44;
        let op = set.write_register(0x2006, &value);
        assert_eq!(op.command().params, [0x20, 0x06, 0, 0, 0, 0, 0xF0]);
        match op {
            DeviceOperation::Write { buffer, .. } => assert_eq!(buffer, &[0x44]),
            _ => panic!("expected write"),
        }

        let mut out = [0u8; 1];
        let op = set.read_register(0x1080, &mut out);
        assert_eq!(op.command().function, FN_READ_REG);
        assert_eq!(op.command().params[..2], [0x10, 0x80]);
    }

    #[test]
    fn test_gpio_validation() {
        let set = CommandSet::default();
        let mut payload = [0u8; GPIO_PAYLOAD_LEN];
        let op = set.set_gpio(5, 3, &mut payload).unwrap();
        assert_eq!(op.command().opcode, OP_FW_CTL);
        assert_eq!(op.len(), 4);
        assert_eq!(payload, [5, 3, 0, 0]);

        let mut payload = [0u8; GPIO_PAYLOAD_LEN];
        assert!(matches!(
            set.set_gpio(0, 1, &mut payload),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            set.set_gpio(6, 1, &mut payload),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            set.set_gpio(1, 4, &mut payload),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_parameter_ranges() {
        let set = CommandSet::default();
        let profile = FlashProfile::for_path(AccessPath::Debug);
        let mut one = [0u8; 1];
        assert!(set.erase(0x10000, 0x0F, &profile, &mut one).is_err());
        assert!(sub_sector_param(16).is_err());
        assert_eq!(sub_sector_param(15).unwrap(), 0xFF);
        assert_eq!(sub_sector_param(0).unwrap(), 0x0F);

        let mut big = vec![0u8; BLOCK_SIZE + 1];
        assert!(set.read_block(0, &profile, &mut big).is_err());
        assert!(set.program_block(0, &profile, &[]).is_err());

        let mut status = [0u8; 2];
        assert!(set.flash_status(0x82, 0, 2, &mut status).is_err());
        let mut status = vec![0u8; 0x82];
        let op = set.flash_status(0x82, 0, 2, &mut status).unwrap();
        assert_eq!(op.command().params[..3], [0x82, 0x00, 0x02]);
    }

    #[test]
    fn test_profiles() {
        let dbg = FlashProfile::for_path(AccessPath::Debug);
        let spi = FlashProfile::for_path(AccessPath::Spi);
        assert!(!dbg.is_chip_erase());
        assert!(spi.is_chip_erase());
        assert_eq!(dbg.erase_type, ERASE_TYPE_UNPROTECT);
        assert_eq!(spi.read_mode, 3);
    }
}
