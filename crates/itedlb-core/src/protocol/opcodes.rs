//! Opcode and function code catalog of the DLB4 firmware
//!
//! Every command record starts with an opcode selecting the command group,
//! followed by a function code selecting the operation inside that group.

// ============================================================================
// USB identity
// ============================================================================

/// DLB4 USB vendor ID
pub const DLB4_USB_VENDOR: u16 = 0x048D;
/// DLB4 USB product ID
pub const DLB4_USB_PRODUCT: u16 = 0x8390;
/// Bulk IN endpoint (device to host)
pub const BULK_IN_EP: u8 = 0x81;
/// Bulk OUT endpoint (host to device)
pub const BULK_OUT_EP: u8 = 0x02;

// ============================================================================
// Opcodes
// ============================================================================

/// Board firmware control (version, GPIO)
pub const OP_FW_CTL: u8 = 0xF0;
/// Target access through the direct SPI pins
pub const OP_DBGR_SPI: u8 = 0xF2;
/// Target access through the debug registers
pub const OP_DBGR: u8 = 0xF3;

// ============================================================================
// Function codes under OP_FW_CTL
// ============================================================================

/// Read the board firmware version
pub const FW_READ_VERSION: u8 = 0x02;
/// Drive one of the board GPIOs
pub const FW_SET_GPIO: u8 = 0x03;

// ============================================================================
// Function codes under OP_DBGR / OP_DBGR_SPI
// ============================================================================

/// Read the EC chip ID
pub const FN_CHIPID_READ: u8 = 0x00;
/// Read the flash JEDEC ID (debug path)
pub const FN_FLASHID_READ: u8 = 0x01;
/// Read one flash block (debug path)
pub const FN_FLASH_READ: u8 = 0x02;
/// Erase flash (debug path)
pub const FN_FLASH_ERASE: u8 = 0x03;
/// Program one flash block (debug path)
pub const FN_FLASH_WRITE: u8 = 0x04;
/// Write a non-SST flash status register and read it back
pub const FN_FLASH_SPI_STATUS: u8 = 0x09;
/// Read the flash JEDEC ID (SPI path)
pub const FN_FLASHID_READ_SPI: u8 = 0x11;
/// Read one flash block (SPI path)
pub const FN_FLASH_READ_SPI: u8 = 0x12;
/// Erase flash (SPI path)
pub const FN_FLASH_ERASE_SPI: u8 = 0x13;
/// Program one flash block (SPI path)
pub const FN_FLASH_WRITE_SPI: u8 = 0x14;
/// Start a debug session in the given mode
pub const FN_START_DEBUG: u8 = 0x20;
/// Write one EC register
pub const FN_WRITE_REG: u8 = 0x23;
/// Read one EC register
pub const FN_READ_REG: u8 = 0x24;
/// Halt or release the EC core
pub const FN_RUN_CTRL: u8 = 0x27;
/// Read or write a debugger command setting
pub const FN_DBGR_CMD_SET: u8 = 0x2F;

// ============================================================================
// Fixed parameters
// ============================================================================

/// Marker placed in the last parameter byte of register accesses
pub const REG_ACCESS_MARKER: u8 = 0xF0;
/// Flash ID read mode used by both access paths
pub const FLASH_ID_MODE: u8 = 0x04;
/// Sector parameter used for a whole-chip erase
pub const CHIP_ERASE_SECTOR: u8 = 0x04;
/// Number of 4 KiB sub-sectors in one block
pub const SUB_SECTORS_PER_BLOCK: u8 = 0x10;
/// Low nibble of the sector parameter for a sub-sector erase
pub const SUB_SECTOR_LOW_NIBBLE: u8 = 0x0F;
/// Payload byte carried by run-control
pub const RUN_CTRL_PAYLOAD: u8 = 0x24;

// ============================================================================
// Sizes
// ============================================================================

/// Block size used for erase, program and verify
pub const BLOCK_SIZE: usize = 0x10000;
/// Sub-sector size erased by one sector erase
pub const SUB_SECTOR_SIZE: usize = BLOCK_SIZE / SUB_SECTORS_PER_BLOCK as usize;
/// Highest block index the 16-bit block address can carry
pub const MAX_BLOCK_INDEX: usize = 0xFFFF;
/// Size of the firmware version record
pub const FW_VERSION_LEN: usize = 4;
/// Size of the chip ID record
pub const CHIP_ID_LEN: usize = 3;
/// Size of the flash ID record
pub const FLASH_ID_LEN: usize = 5;
/// Size of the GPIO request payload
pub const GPIO_PAYLOAD_LEN: usize = 4;

// ============================================================================
// EC registers and debugger settings touched during bring-up and reset
// ============================================================================

/// Debugger control register
pub const REG_DBGR_CTRL: u16 = 0x2006;
/// Value written to the debugger control register before core control
pub const DBGR_CTRL_HOLD: u8 = 0x44;
/// Debugger configuration register cleared during bring-up
pub const REG_DBGR_CFG: u16 = 0x1063;
/// Debugger status register, read back for diagnostics
pub const REG_DBGR_STATUS: u16 = 0x1080;
/// Registers holding the auxiliary chip ID bytes
pub const REG_CHIP_AUX_ID: [u16; 3] = [0x2085, 0x2086, 0x2087];
/// Flash protection control register
pub const REG_FLASH_PROTECT_CTRL: u16 = 0x1F05;
/// Value that opens the protection control register
pub const FLASH_PROTECT_CTRL_OPEN: u8 = 0x30;
/// First register of the protection range table
pub const REG_FLASH_PROTECT_BASE: u16 = 0x20A0;
/// Number of registers in the protection range table
pub const FLASH_PROTECT_REG_COUNT: u16 = 0x20;

/// Debugger command selecting the internal access mode
pub const DBGR_CMD_MODE: u8 = 0x1A;
/// Value written with `DBGR_CMD_MODE`
pub const DBGR_CMD_MODE_VALUE: u8 = 0x04;

/// Run-control argument issued while entering debug mode
pub const RUN_CTRL_DEBUG: u8 = 0x81;
/// Run-control argument that holds the core ahead of a reset
pub const RUN_CTRL_HOLD: u8 = 0x80;

/// Flash status write that clears all protection bits
pub const STATUS_UNPROTECT: (u8, u8, u8) = (0xFF, 0x00, 0x00);
/// Flash status write that makes the quad-enable bit persistent
pub const STATUS_QE_PERSIST: (u8, u8, u8) = (0x82, 0x00, 0x02);
