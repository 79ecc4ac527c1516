//! One flashing run against one board
//!
//! A [`Session`] exclusively owns the board for its lifetime. It is only
//! constructed once bring-up succeeded, so holding one means the firmware
//! version, flash ID and (on the debug path) chip ID are known.

use crate::bringup::{self, BringupStrategy, DebugBringup, SpiBringup};
use crate::command::AccessPath;
use crate::device::Dlb4;
use crate::error::Result;
use crate::protect;
use crate::sequencer::{FlashImage, FlashProgress, FlashSequencer, SkipStages};
use crate::transport::{BulkPipe, RetryPolicy};

pub use crate::bringup::SessionInfo;

/// Settings of one flashing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashConfig {
    /// Bring-up path and command set
    pub path: AccessPath,
    /// Optional passes to leave out
    pub skip: SkipStages,
    /// Stall retry budget policy
    pub retry_policy: RetryPolicy,
    /// Debug bring-up attempts before giving up on the chip ID
    pub poll_attempts: u32,
    /// Reset the EC after programming
    pub reset_after: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            path: AccessPath::Debug,
            skip: SkipStages::empty(),
            retry_policy: RetryPolicy::default(),
            poll_attempts: bringup::DEFAULT_POLL_ATTEMPTS,
            reset_after: true,
        }
    }
}

/// A board in a ready programming session
pub struct Session<P> {
    dev: Dlb4<P>,
    info: SessionInfo,
    config: FlashConfig,
}

impl<P: BulkPipe> Session<P> {
    /// Bring the board behind `pipe` up on the configured path
    pub fn bring_up(pipe: P, config: &FlashConfig) -> Result<Self> {
        log::info!("Connecting ITE device via {}", config.path);

        let mut dev = Dlb4::new(pipe, config.path, config.retry_policy);
        let info = match config.path {
            AccessPath::Debug => DebugBringup {
                poll_attempts: config.poll_attempts,
            }
            .bring_up(&mut dev)?,
            AccessPath::Spi => SpiBringup.bring_up(&mut dev)?,
        };

        log::info!("DLB4 firmware version {}", info.firmware_version);
        if let Some(chip) = &info.chip_id {
            log::info!("Chip ID {}", chip);
        }
        log::info!("Flash ID {}", info.flash_id);

        Ok(Self {
            dev,
            info,
            config: *config,
        })
    }

    /// Identity gathered during bring-up
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Settings the session was opened with
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Direct access to the board
    pub fn device_mut(&mut self) -> &mut Dlb4<P> {
        &mut self.dev
    }

    /// Erase, blank-check, program and verify `image`, then make the
    /// quad-enable bit persistent and reset the EC
    pub fn flash<R: FlashProgress + ?Sized>(&mut self, image: &FlashImage, progress: &mut R) -> Result<()> {
        log::info!(
            "Flashing {} bytes ({} blocks)",
            image.file_len(),
            image.block_count()
        );
        FlashSequencer::new(&mut self.dev, self.config.skip).run(image, progress)?;

        protect::enable_qe_persistence(&mut self.dev)?;

        if self.config.reset_after {
            if let Err(e) = protect::reset_target(&mut self.dev) {
                log::warn!("EC reset failed: {}", e);
            }
        }
        Ok(())
    }

    /// End the session and release the pipe
    pub fn close(self) -> P {
        log::debug!("Closing device");
        self.dev.into_inner()
    }
}
