//! Block-oriented flash sequencer
//!
//! Runs four strictly ordered passes over the image, one 64 KiB block at a
//! time: erase, blank check, program and verify. The first failure in any
//! pass aborts the whole sequence; nothing is retried across blocks and
//! nothing is rolled back.

use core::fmt;
use core::str::FromStr;
use std::path::Path;

use bitflags::bitflags;

use crate::command::{sub_sector_param, FlashProfile};
use crate::device::Dlb4;
use crate::error::{Error, Result};
use crate::protocol::opcodes::{
    BLOCK_SIZE, CHIP_ERASE_SECTOR, MAX_BLOCK_INDEX, SUB_SECTORS_PER_BLOCK,
};
use crate::transport::BulkPipe;

/// Value of an erased flash byte
pub const ERASED: u8 = 0xFF;

bitflags! {
    /// Optional passes to leave out
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SkipStages: u8 {
        /// Skip the blank check after erase
        const CHECK = 1 << 0;
        /// Skip the verify after program
        const VERIFY = 1 << 1;
    }
}

impl FromStr for SkipStages {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "check" => Ok(SkipStages::CHECK),
            "verify" => Ok(SkipStages::VERIFY),
            _ => Err(Error::InvalidParameter(format!(
                "skip stage '{}' (expected check or verify)",
                s
            ))),
        }
    }
}

/// Flash pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Erase every block
    Erase,
    /// Read back every block and require 0xFF
    BlankCheck,
    /// Write every block
    Program,
    /// Read back every block and compare with the image
    Verify,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Erase => write!(f, "Erase"),
            Pass::BlankCheck => write!(f, "Blank check"),
            Pass::Program => write!(f, "Program"),
            Pass::Verify => write!(f, "Verify"),
        }
    }
}

/// Number of blocks needed to hold `len` bytes
pub fn block_count(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}

/// Firmware image padded to a whole number of blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    data: Vec<u8>,
    file_len: usize,
}

impl FlashImage {
    /// Take ownership of raw image bytes, padding the last block with 0xFF
    pub fn from_bytes(mut data: Vec<u8>) -> Result<Self> {
        let file_len = data.len();
        if file_len == 0 {
            return Err(Error::InvalidParameter("image is empty".into()));
        }
        let blocks = block_count(file_len);
        if blocks > MAX_BLOCK_INDEX + 1 {
            return Err(Error::InvalidParameter(format!(
                "image of {} bytes needs {} blocks, at most {} are addressable",
                file_len,
                blocks,
                MAX_BLOCK_INDEX + 1
            )));
        }
        data.resize(blocks * BLOCK_SIZE, ERASED);
        Ok(Self { data, file_len })
    }

    /// Load a raw binary image from disk
    pub fn from_file<Q: AsRef<Path>>(path: Q) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        log::debug!("Read {} bytes from {}", data.len(), path.display());
        Self::from_bytes(data)
    }

    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }

    /// Size of the file the image was loaded from
    pub fn file_len(&self) -> usize {
        self.file_len
    }

    /// Padded size
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Never true for a loaded image
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Padded image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of block `index`
    pub fn block(&self, index: usize) -> &[u8] {
        &self.data[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE]
    }
}

/// Callback for progress reporting during the flash passes
pub trait FlashProgress {
    /// Called when a pass starts
    fn pass_started(&mut self, pass: Pass, blocks: usize);

    /// Called after each block, with the completed percentage
    fn block_done(&mut self, pass: Pass, blocks_done: usize, percent: usize);

    /// Called when a pass completes
    fn pass_complete(&mut self, pass: Pass);
}

/// A no-op progress reporter
pub struct NoProgress;

impl FlashProgress for NoProgress {
    fn pass_started(&mut self, _pass: Pass, _blocks: usize) {}
    fn block_done(&mut self, _pass: Pass, _blocks_done: usize, _percent: usize) {}
    fn pass_complete(&mut self, _pass: Pass) {}
}

/// A readback buffer must hold exactly `blocks` blocks
fn check_readback(blocks: usize, readback: &[u8]) -> Result<()> {
    if readback.len() != blocks * BLOCK_SIZE {
        return Err(Error::InvalidParameter(format!(
            "readback buffer is {} bytes, {} blocks need {}",
            readback.len(),
            blocks,
            blocks * BLOCK_SIZE
        )));
    }
    Ok(())
}

fn percent(done: usize, total: usize) -> usize {
    done * 100 / total
}

/// Attach pass and block to a link failure; data errors pass through
fn in_pass(pass: Pass, block: usize) -> impl FnOnce(Error) -> Error {
    move |e| match e {
        e @ (Error::BlankCheckFailed { .. } | Error::VerifyMismatch { .. }) => e,
        e => Error::FlashPass {
            pass,
            block,
            source: Box::new(e),
        },
    }
}

/// Erase/blank-check/program/verify over one image
pub struct FlashSequencer<'a, P> {
    dev: &'a mut Dlb4<P>,
    profile: FlashProfile,
    skip: SkipStages,
}

impl<'a, P: BulkPipe> FlashSequencer<'a, P> {
    /// Sequencer on `dev`, using the device's access-path profile
    pub fn new(dev: &'a mut Dlb4<P>, skip: SkipStages) -> Self {
        let profile = dev.profile();
        Self { dev, profile, skip }
    }

    /// Run all passes in order, stopping at the first failure
    pub fn run<R: FlashProgress + ?Sized>(
        &mut self,
        image: &FlashImage,
        progress: &mut R,
    ) -> Result<()> {
        let mut readback = vec![0u8; image.len()];

        self.erase(image.block_count(), progress)?;

        if self.skip.contains(SkipStages::CHECK) {
            log::info!("Skipping blank check");
        } else {
            self.blank_check(image.block_count(), &mut readback, progress)?;
        }

        self.program(image, progress)?;

        if self.skip.contains(SkipStages::VERIFY) {
            log::info!("Skipping verify");
        } else {
            self.verify(image, &mut readback, progress)?;
        }
        Ok(())
    }

    /// Erase pass
    ///
    /// Chip-erase profiles erase everything in one call; otherwise every
    /// block gets one erase per 4 KiB sub-sector.
    pub fn erase<R: FlashProgress + ?Sized>(&mut self, blocks: usize, progress: &mut R) -> Result<()> {
        log::info!("Erasing {} blocks", blocks);
        progress.pass_started(Pass::Erase, blocks);

        if self.profile.is_chip_erase() {
            self.dev
                .erase(blocks, CHIP_ERASE_SECTOR, &self.profile)
                .map_err(in_pass(Pass::Erase, 0))?;
            progress.block_done(Pass::Erase, blocks, 100);
        } else {
            for block in 0..blocks {
                for sub in 0..SUB_SECTORS_PER_BLOCK {
                    let sector = sub_sector_param(sub)?;
                    self.dev
                        .erase(block, sector, &self.profile)
                        .map_err(in_pass(Pass::Erase, block))?;
                }
                progress.block_done(Pass::Erase, block + 1, percent(block + 1, blocks));
            }
        }

        progress.pass_complete(Pass::Erase);
        Ok(())
    }

    /// Blank-check pass: every byte must read back as 0xFF
    pub fn blank_check<R: FlashProgress + ?Sized>(
        &mut self,
        blocks: usize,
        readback: &mut [u8],
        progress: &mut R,
    ) -> Result<()> {
        check_readback(blocks, readback)?;
        log::info!("Checking {} blocks are blank", blocks);
        progress.pass_started(Pass::BlankCheck, blocks);

        for (block, buf) in readback.chunks_mut(BLOCK_SIZE).take(blocks).enumerate() {
            self.dev
                .read_block(block, &self.profile, buf)
                .map_err(in_pass(Pass::BlankCheck, block))?;
            if let Some(i) = buf.iter().position(|&b| b != ERASED) {
                let offset = block * BLOCK_SIZE + i;
                log::error!("Check ERR on offset [{:x}]={:x}", offset, buf[i]);
                return Err(Error::BlankCheckFailed {
                    offset,
                    found: buf[i],
                });
            }
            progress.block_done(Pass::BlankCheck, block + 1, percent(block + 1, blocks));
        }

        progress.pass_complete(Pass::BlankCheck);
        Ok(())
    }

    /// Program pass
    pub fn program<R: FlashProgress + ?Sized>(&mut self, image: &FlashImage, progress: &mut R) -> Result<()> {
        let blocks = image.block_count();
        log::info!("Programming {} blocks", blocks);
        progress.pass_started(Pass::Program, blocks);

        for block in 0..blocks {
            self.dev
                .program_block(block, &self.profile, image.block(block))
                .map_err(in_pass(Pass::Program, block))?;
            progress.block_done(Pass::Program, block + 1, percent(block + 1, blocks));
        }

        progress.pass_complete(Pass::Program);
        Ok(())
    }

    /// Verify pass: readback must match the image byte for byte
    pub fn verify<R: FlashProgress + ?Sized>(
        &mut self,
        image: &FlashImage,
        readback: &mut [u8],
        progress: &mut R,
    ) -> Result<()> {
        let blocks = image.block_count();
        check_readback(blocks, readback)?;
        log::info!("Verifying {} blocks", blocks);
        progress.pass_started(Pass::Verify, blocks);

        for (block, buf) in readback.chunks_mut(BLOCK_SIZE).take(blocks).enumerate() {
            self.dev
                .read_block(block, &self.profile, buf)
                .map_err(in_pass(Pass::Verify, block))?;
            let expected = image.block(block);
            if let Some(i) = buf.iter().zip(expected).position(|(r, w)| r != w) {
                let offset = block * BLOCK_SIZE + i;
                log::error!(
                    "Check ERR on offset r[{:x}]={:x} w[{:x}]={:x}",
                    offset,
                    buf[i],
                    offset,
                    expected[i]
                );
                return Err(Error::VerifyMismatch {
                    offset,
                    found: buf[i],
                    expected: expected[i],
                });
            }
            progress.block_done(Pass::Verify, block + 1, percent(block + 1, blocks));
        }

        progress.pass_complete(Pass::Verify);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::AccessPath;

    #[test]
    fn test_block_count_rounds_up() {
        assert_eq!(block_count(BLOCK_SIZE * 16), 16);
        assert_eq!(block_count(BLOCK_SIZE * 16 + 1), 17);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(0), 0);
    }

    #[test]
    fn test_image_padding() {
        let image = FlashImage::from_bytes(vec![0x00; BLOCK_SIZE + 10]).unwrap();
        assert_eq!(image.block_count(), 2);
        assert_eq!(image.file_len(), BLOCK_SIZE + 10);
        assert_eq!(image.len(), 2 * BLOCK_SIZE);
        assert_eq!(image.block(1)[9], 0x00);
        assert!(image.block(1)[10..].iter().all(|&b| b == ERASED));
    }

    #[test]
    fn test_image_limits() {
        assert!(matches!(
            FlashImage::from_bytes(Vec::new()),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_image_missing_file() {
        let err = FlashImage::from_file("/nonexistent/itedlb/image.bin").unwrap_err();
        assert!(matches!(err, Error::ImageIo(_)));
    }

    #[test]
    fn test_skip_stage_parse() {
        assert_eq!("check".parse::<SkipStages>().unwrap(), SkipStages::CHECK);
        assert_eq!("VERIFY".parse::<SkipStages>().unwrap(), SkipStages::VERIFY);
        assert!("erase".parse::<SkipStages>().is_err());

        let both = SkipStages::CHECK | SkipStages::VERIFY;
        assert!(both.contains(SkipStages::CHECK));
        assert!(SkipStages::default().is_empty());
    }

    /// Pipe for tests that must fail before any transfer
    struct NoLink;

    impl BulkPipe for NoLink {
        fn bulk_out(
            &mut self,
            _data: &[u8],
            _timeout: std::time::Duration,
        ) -> core::result::Result<usize, crate::PipeError> {
            Err(crate::PipeError::Disconnected)
        }

        fn bulk_in(
            &mut self,
            _buffer: &mut [u8],
            _timeout: std::time::Duration,
        ) -> core::result::Result<usize, crate::PipeError> {
            Err(crate::PipeError::Disconnected)
        }

        fn clear_stall(
            &mut self,
            _endpoint: crate::transport::BulkEndpoint,
        ) -> core::result::Result<(), crate::PipeError> {
            Ok(())
        }
    }

    #[test]
    fn test_readback_length_checked() {
        let mut dev = Dlb4::new(NoLink, AccessPath::Debug, crate::RetryPolicy::default());
        let mut seq = FlashSequencer::new(&mut dev, SkipStages::empty());
        let image = FlashImage::from_bytes(vec![0x00; 2 * BLOCK_SIZE]).unwrap();

        let mut short = vec![0u8; BLOCK_SIZE];
        assert!(matches!(
            seq.blank_check(2, &mut short, &mut NoProgress),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            seq.verify(&image, &mut short, &mut NoProgress),
            Err(Error::InvalidParameter(_))
        ));

        let mut long = vec![0u8; 3 * BLOCK_SIZE];
        assert!(matches!(
            seq.verify(&image, &mut long, &mut NoProgress),
            Err(Error::InvalidParameter(_))
        ));

        // Right size gets as far as the link
        let mut exact = vec![0u8; 2 * BLOCK_SIZE];
        assert!(matches!(
            seq.blank_check(2, &mut exact, &mut NoProgress),
            Err(Error::FlashPass { .. })
        ));
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 16), 6);
        assert_eq!(percent(16, 16), 100);
        assert_eq!(percent(1, 3), 33);
    }
}
