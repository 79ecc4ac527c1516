//! Error types for itedlb-core

use thiserror::Error;

use crate::sequencer::Pass;
use crate::transport::Stage;

/// Why a bring-up attempt did not reach a ready session
#[derive(Debug, Error)]
pub enum BringupFailure {
    /// A bring-up step failed on the link
    #[error("step '{step}' failed: {source}")]
    Step {
        /// Human readable step name
        step: &'static str,
        /// The underlying failure
        source: Box<Error>,
    },

    /// The chip ID never became valid
    #[error("no chip ID after {attempts} attempts")]
    ChipIdTimeout {
        /// Number of full bring-up sequences that were run
        attempts: u32,
    },
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The command block was not written completely
    #[error("short write: {written} of {expected} bytes sent")]
    ShortWrite {
        /// Bytes the pipe reported as written
        written: usize,
        /// Bytes that had to be written
        expected: usize,
    },

    /// Fewer bytes than declared arrived on the IN endpoint
    #[error("short read during {stage}: {actual} of {expected} bytes received")]
    ShortRead {
        /// Exchange stage that came up short
        stage: Stage,
        /// Bytes received
        actual: usize,
        /// Bytes expected
        expected: usize,
    },

    /// The endpoint kept stalling after the retry budget was spent
    #[error("endpoint stalled during {stage}, {attempts} retries exhausted")]
    RetryExhausted {
        /// Stage in which the last stall happened
        stage: Stage,
        /// Retries spent before giving up
        attempts: u32,
    },

    /// A bulk transfer did not complete within its timeout
    #[error("USB transfer timed out during {0}")]
    Timeout(Stage),

    /// Any other failure reported by the bulk pipe
    #[error("USB transfer failed during {stage}: {message}")]
    TransferFailed {
        /// Exchange stage that failed
        stage: Stage,
        /// Message from the pipe
        message: String,
    },

    /// The status block carried the wrong signature
    #[error("status block signature mismatch: got 0x{found:08X}")]
    SignatureMismatch {
        /// The signature that was received
        found: u32,
    },

    /// An operation parameter was out of range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The device could not be brought into a programming session
    #[error("bring-up failed: {0}")]
    BringupFailed(BringupFailure),

    /// A flash pass was aborted by a link failure on one block
    #[error("{pass} failed at block {block}: {source}")]
    FlashPass {
        /// Pass that was running
        pass: Pass,
        /// Block index being processed
        block: usize,
        /// The underlying failure
        source: Box<Error>,
    },

    /// An erased byte did not read back as 0xFF
    #[error("blank check failed at offset 0x{offset:08X}: found 0x{found:02X}")]
    BlankCheckFailed {
        /// Absolute image offset
        offset: usize,
        /// Value read back
        found: u8,
    },

    /// Readback differs from the image
    #[error("verify failed at offset 0x{offset:08X}: read 0x{found:02X}, expected 0x{expected:02X}")]
    VerifyMismatch {
        /// Absolute image offset
        offset: usize,
        /// Value read back
        found: u8,
        /// Value in the image
        expected: u8,
    },

    /// The image file could not be loaded
    #[error("image I/O error: {0}")]
    ImageIo(#[from] std::io::Error),
}

impl Error {
    /// Wrap a failure of a named bring-up step
    pub fn bringup_step(step: &'static str, source: Error) -> Self {
        Error::BringupFailed(BringupFailure::Step {
            step,
            source: Box::new(source),
        })
    }

    /// True for failures of the USB link itself
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ShortWrite { .. }
                | Error::ShortRead { .. }
                | Error::RetryExhausted { .. }
                | Error::Timeout(_)
                | Error::TransferFailed { .. }
        )
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
