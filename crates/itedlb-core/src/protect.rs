//! Flash protection and target reset helpers

use crate::command::{GpioPin, PinMode};
use crate::device::Dlb4;
use crate::error::Result;
use crate::protocol::opcodes::*;
use crate::transport::BulkPipe;

/// Settle time of the reset line
const RESET_HOLD_MS: u64 = 1000;

fn write_status<P: BulkPipe>(dev: &mut Dlb4<P>, (count, s1, s2): (u8, u8, u8)) -> Result<Vec<u8>> {
    let readback = dev.flash_status(count, s1, s2)?;
    log::info!(
        "Protect status: mode={:x} data={:02x} {:02x}",
        count,
        readback.first().copied().unwrap_or(0),
        readback.get(1).copied().unwrap_or(0)
    );
    Ok(readback)
}

/// Clear the flash status protection bits and open the protection range table
pub fn unprotect<P: BulkPipe>(dev: &mut Dlb4<P>) -> Result<()> {
    write_status(dev, STATUS_UNPROTECT)?;

    dev.write_register(REG_FLASH_PROTECT_CTRL, FLASH_PROTECT_CTRL_OPEN)?;
    for i in 0..FLASH_PROTECT_REG_COUNT {
        dev.write_register(REG_FLASH_PROTECT_BASE + i, 0x00)?;
    }
    log::debug!(
        "Cleared protection registers 0x{:04X}-0x{:04X}",
        REG_FLASH_PROTECT_BASE,
        REG_FLASH_PROTECT_BASE + FLASH_PROTECT_REG_COUNT - 1
    );
    Ok(())
}

/// Write the status register so the quad-enable bit survives a power cycle
pub fn enable_qe_persistence<P: BulkPipe>(dev: &mut Dlb4<P>) -> Result<()> {
    write_status(dev, STATUS_QE_PERSIST)?;
    Ok(())
}

/// Hold the EC core, then pulse the reset line so it boots the new image
pub fn reset_target<P: BulkPipe>(dev: &mut Dlb4<P>) -> Result<()> {
    log::info!("Resetting EC");
    dev.write_register(REG_DBGR_CTRL, DBGR_CTRL_HOLD)?;
    dev.run_control(RUN_CTRL_HOLD, 0, 0)?;

    dev.set_gpio(GpioPin::C1, PinMode::Low)?;
    dev.set_gpio(GpioPin::C1, PinMode::Output)?;
    dev.delay_ms(RESET_HOLD_MS);
    dev.set_gpio(GpioPin::C1, PinMode::High)?;
    Ok(())
}
