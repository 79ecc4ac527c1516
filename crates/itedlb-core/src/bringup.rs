//! Bring-up state machine
//!
//! Takes an opened board to a ready programming session, through one of
//! two paths:
//!
//! - [`DebugBringup`]: in-circuit through the EC debug registers. The full
//!   sequence is repeated until the EC answers with a non-zero chip ID, up
//!   to a bounded number of attempts.
//! - [`SpiBringup`]: directly on the SPI pins. No chip ID is read.
//!
//! Both produce a [`SessionInfo`]. A link failure in any checked step ends
//! bring-up with [`Error::BringupFailed`].

use core::fmt;

use crate::command::{AccessPath, DbgrAccess, DebugMode, GpioPin, PinMode};
use crate::device::{ChipId, Dlb4, FirmwareVersion, FlashId};
use crate::error::{BringupFailure, Error, Result};
use crate::protect;
use crate::protocol::opcodes::*;
use crate::transport::BulkPipe;

/// Default ceiling on full debug bring-up attempts
pub const DEFAULT_POLL_ATTEMPTS: u32 = 2000;

/// Settle time after the special waveform
const WAVEFORM_SETTLE_MS: u64 = 50;
/// Settle time between SPI pin steps
const PIN_SETTLE_MS: u64 = 100;

/// Pin transitions that hand the SPI bus to the board
///
/// Each step drives the level first and then switches the pin mode.
const SPI_PIN_STEPS: [[(GpioPin, PinMode); 2]; 4] = [
    [(GpioPin::G6, PinMode::Low), (GpioPin::G6, PinMode::Output)],
    [(GpioPin::C1, PinMode::Low), (GpioPin::C1, PinMode::Output)],
    [(GpioPin::C1, PinMode::High), (GpioPin::C1, PinMode::Alt)],
    [(GpioPin::G6, PinMode::High), (GpioPin::G6, PinMode::Alt)],
];

/// Bring-up states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupState {
    /// No device handle
    Closed,
    /// Device handle open, interface claimed
    Opened,
    /// Sequencing through the debug registers
    DebugPath,
    /// Sequencing through the SPI pins
    SpiPath,
    /// Programming session established
    SessionReady,
    /// Bring-up gave up
    BringupFailed,
}

impl fmt::Display for BringupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BringupState::Closed => "closed",
            BringupState::Opened => "opened",
            BringupState::DebugPath => "debug path",
            BringupState::SpiPath => "SPI path",
            BringupState::SessionReady => "session ready",
            BringupState::BringupFailed => "bring-up failed",
        };
        f.write_str(name)
    }
}

fn transition(from: BringupState, to: BringupState) {
    log::debug!("bring-up: {} -> {}", from, to);
}

/// Identity gathered during bring-up, read-only afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Access path the session runs on
    pub path: AccessPath,
    /// Board firmware version
    pub firmware_version: FirmwareVersion,
    /// EC chip ID; only read on the debug path
    pub chip_id: Option<ChipId>,
    /// Flash JEDEC ID
    pub flash_id: FlashId,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ITE DLB4 FW Version : {}", self.firmware_version)?;
        writeln!(f, "===================================")?;
        if let Some(chip) = &self.chip_id {
            writeln!(f, "CHIP ID          : {}", chip)?;
        }
        write!(f, "Flash ID         : {}", self.flash_id)
    }
}

/// A way of bringing the board to a ready programming session
pub trait BringupStrategy {
    /// Access path this strategy establishes
    fn path(&self) -> AccessPath;

    /// Run the sequence on `dev`
    fn bring_up<P: BulkPipe>(&self, dev: &mut Dlb4<P>) -> Result<SessionInfo>;
}

fn step<T>(name: &'static str, result: Result<T>) -> Result<T> {
    result.map_err(|e| Error::bringup_step(name, e))
}

/// In-circuit bring-up through the EC debug registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugBringup {
    /// Full sequences to run before giving up on the chip ID
    pub poll_attempts: u32,
}

impl Default for DebugBringup {
    fn default() -> Self {
        Self {
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

impl DebugBringup {
    /// One pass of the full debug sequence
    fn attempt<P: BulkPipe>(&self, dev: &mut Dlb4<P>) -> Result<SessionInfo> {
        let firmware_version = step("read firmware version", dev.firmware_version())?;

        step(
            "send special waveform",
            dev.start_debug(DebugMode::Send100kWaveform),
        )?;
        dev.delay_ms(WAVEFORM_SETTLE_MS);
        step(
            "stop special waveform",
            dev.start_debug(DebugMode::StopSpecialWaveform),
        )?;
        step("enter debug mode", dev.start_debug(DebugMode::EnterDebug))?;

        // Debugger mode setting is best effort
        for access in [DbgrAccess::Write, DbgrAccess::Read] {
            if let Err(e) = dev.debug_command_set(access, DBGR_CMD_MODE, DBGR_CMD_MODE_VALUE) {
                log::debug!("debugger command set ({:?}) ignored: {}", access, e);
            }
        }

        step(
            "write debugger control",
            dev.write_register(REG_DBGR_CTRL, DBGR_CTRL_HOLD),
        )?;
        step(
            "write debugger config",
            dev.write_register(REG_DBGR_CFG, 0x00),
        )?;
        let status = step("read debugger status", dev.read_register(REG_DBGR_STATUS))?;
        log::debug!("debugger status 0x{:02X}", status);

        step("run control", dev.run_control(RUN_CTRL_DEBUG, 0, 0))?;
        step("init I2C at 1 MHz", dev.start_debug(DebugMode::I2cInit1MHz))?;
        step(
            "select internal flash",
            dev.start_debug(DebugMode::FlashInternal),
        )?;

        let mut chip = ChipId {
            id: step("read chip ID", dev.chip_id())?,
            aux: [0; 3],
        };
        for (slot, reg) in chip.aux.iter_mut().zip(REG_CHIP_AUX_ID) {
            match dev.read_register(reg) {
                Ok(v) => *slot = v,
                Err(e) => log::debug!("aux chip ID register 0x{:04X} unread: {}", reg, e),
            }
        }

        let flash_id = step("read flash ID", dev.flash_id(FLASH_ID_MODE))?;
        step("clear flash protection", protect::unprotect(dev))?;

        Ok(SessionInfo {
            path: AccessPath::Debug,
            firmware_version,
            chip_id: Some(chip),
            flash_id,
        })
    }
}

impl BringupStrategy for DebugBringup {
    fn path(&self) -> AccessPath {
        AccessPath::Debug
    }

    fn bring_up<P: BulkPipe>(&self, dev: &mut Dlb4<P>) -> Result<SessionInfo> {
        transition(BringupState::Opened, BringupState::DebugPath);

        let attempts = self.poll_attempts.max(1);
        for attempt in 1..=attempts {
            let info = match self.attempt(dev) {
                Ok(info) => info,
                Err(e) => {
                    transition(BringupState::DebugPath, BringupState::BringupFailed);
                    return Err(e);
                }
            };

            if info.chip_id.is_some_and(|c| c.is_valid()) {
                log::debug!("chip ID valid after {} attempt(s)", attempt);
                transition(BringupState::DebugPath, BringupState::SessionReady);
                return Ok(info);
            }
            log::trace!("chip ID not ready ({}/{})", attempt, attempts);
        }

        transition(BringupState::DebugPath, BringupState::BringupFailed);
        Err(Error::BringupFailed(BringupFailure::ChipIdTimeout { attempts }))
    }
}

/// Direct bring-up on the SPI pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpiBringup;

impl SpiBringup {
    fn enter_spi<P: BulkPipe>(&self, dev: &mut Dlb4<P>) -> Result<()> {
        for (i, pins) in SPI_PIN_STEPS.iter().enumerate() {
            if i > 0 {
                dev.delay_ms(PIN_SETTLE_MS);
            }
            for &(pin, mode) in pins {
                dev.set_gpio(pin, mode)?;
            }
        }
        Ok(())
    }

    fn sequence<P: BulkPipe>(&self, dev: &mut Dlb4<P>) -> Result<SessionInfo> {
        step(
            "select external flash",
            dev.start_debug(DebugMode::FlashExternal),
        )?;
        let firmware_version = step("read firmware version", dev.firmware_version())?;
        step("enter SPI mode", self.enter_spi(dev))?;
        let flash_id = step("read flash ID", dev.flash_id(FLASH_ID_MODE))?;

        Ok(SessionInfo {
            path: AccessPath::Spi,
            firmware_version,
            chip_id: None,
            flash_id,
        })
    }
}

impl BringupStrategy for SpiBringup {
    fn path(&self) -> AccessPath {
        AccessPath::Spi
    }

    fn bring_up<P: BulkPipe>(&self, dev: &mut Dlb4<P>) -> Result<SessionInfo> {
        transition(BringupState::Opened, BringupState::SpiPath);

        let result = self.sequence(dev);
        match &result {
            Ok(_) => transition(BringupState::SpiPath, BringupState::SessionReady),
            Err(_) => transition(BringupState::SpiPath, BringupState::BringupFailed),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spi_pin_steps_end_in_alt() {
        let last = SPI_PIN_STEPS[SPI_PIN_STEPS.len() - 1];
        assert_eq!(last[1], (GpioPin::G6, PinMode::Alt));
        assert_eq!(SPI_PIN_STEPS[2][1], (GpioPin::C1, PinMode::Alt));
    }

    #[test]
    fn test_session_summary() {
        let info = SessionInfo {
            path: AccessPath::Debug,
            firmware_version: FirmwareVersion([0x02, 0x10, 0, 0]),
            chip_id: Some(ChipId {
                id: [0x85, 0x70, 0x01],
                aux: [0x01, 0x02, 0x03],
            }),
            flash_id: FlashId([0xEF, 0x40, 0x16, 0, 0]),
        };
        let text = info.to_string();
        assert!(text.contains("FW Version : 0210"));
        assert!(text.contains("CHIP ID          : 857001 ( 10203 )"));
        assert!(text.ends_with("Flash ID         : ef 40 16"));

        let spi = SessionInfo {
            path: AccessPath::Spi,
            chip_id: None,
            ..info
        };
        assert!(!spi.to_string().contains("CHIP ID"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(BringupState::Closed.to_string(), "closed");
        assert_eq!(BringupState::Opened.to_string(), "opened");
        assert_eq!(BringupState::SessionReady.to_string(), "session ready");
    }

    #[test]
    fn test_default_poll_attempts() {
        assert_eq!(DebugBringup::default().poll_attempts, 2000);
        assert_eq!(DebugBringup::default().path(), AccessPath::Debug);
        assert_eq!(SpiBringup.path(), AccessPath::Spi);
    }
}
