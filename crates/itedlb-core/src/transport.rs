//! Command/status block transport
//!
//! One [`Transport::exchange`] moves one [`DeviceOperation`] over the link:
//!
//! 1. command block on the OUT endpoint (1 s timeout)
//! 2. data phase, if any, on the endpoint matching the direction (5 s)
//! 3. status block on the IN endpoint (1 s)
//!
//! A stage that reports a stalled endpoint gets the stall cleared and is
//! retried, bounded by a retry budget. Any other link error ends the
//! exchange immediately.

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::command::DeviceOperation;
use crate::error::{Error, Result};
use crate::protocol::wire::{CommandBlock, StatusBlock, CBW_LEN, CSW_LEN};

/// Timeout of the command and status phases
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);
/// Timeout of the data phase
pub const DATA_TIMEOUT: Duration = Duration::from_millis(5000);
/// Stall retries allowed per budget
pub const MAX_STALL_RETRIES: u32 = 5;

/// One of the two bulk endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkEndpoint {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Errors reported by a [`BulkPipe`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    /// The endpoint is halted and must be cleared
    #[error("endpoint stalled")]
    Stall,
    /// The transfer did not complete in time
    #[error("transfer timed out")]
    Timeout,
    /// The device went away
    #[error("device disconnected")]
    Disconnected,
    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Raw bulk transfer primitive
///
/// Implemented by the USB backend and by the emulator. Every call blocks
/// until it completes, fails, or hits `timeout`.
pub trait BulkPipe {
    /// Write `data` to the OUT endpoint, returning the bytes written
    fn bulk_out(&mut self, data: &[u8], timeout: Duration) -> core::result::Result<usize, PipeError>;

    /// Read up to `buf.len()` bytes from the IN endpoint, returning the bytes read
    fn bulk_in(&mut self, buf: &mut [u8], timeout: Duration) -> core::result::Result<usize, PipeError>;

    /// Clear a halt condition on `endpoint`
    fn clear_stall(&mut self, endpoint: BulkEndpoint) -> core::result::Result<(), PipeError>;

    /// Wait between steps that need the target to settle
    fn delay_ms(&mut self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

impl<P: BulkPipe + ?Sized> BulkPipe for &mut P {
    fn bulk_out(&mut self, data: &[u8], timeout: Duration) -> core::result::Result<usize, PipeError> {
        (**self).bulk_out(data, timeout)
    }

    fn bulk_in(&mut self, buf: &mut [u8], timeout: Duration) -> core::result::Result<usize, PipeError> {
        (**self).bulk_in(buf, timeout)
    }

    fn clear_stall(&mut self, endpoint: BulkEndpoint) -> core::result::Result<(), PipeError> {
        (**self).clear_stall(endpoint)
    }

    fn delay_ms(&mut self, ms: u64) {
        (**self).delay_ms(ms)
    }
}

impl<P: BulkPipe + ?Sized> BulkPipe for Box<P> {
    fn bulk_out(&mut self, data: &[u8], timeout: Duration) -> core::result::Result<usize, PipeError> {
        (**self).bulk_out(data, timeout)
    }

    fn bulk_in(&mut self, buf: &mut [u8], timeout: Duration) -> core::result::Result<usize, PipeError> {
        (**self).bulk_in(buf, timeout)
    }

    fn clear_stall(&mut self, endpoint: BulkEndpoint) -> core::result::Result<(), PipeError> {
        (**self).clear_stall(endpoint)
    }

    fn delay_ms(&mut self, ms: u64) {
        (**self).delay_ms(ms)
    }
}

/// Exchange stage, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Command block
    Command,
    /// Data phase
    Data,
    /// Status block
    Status,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Command => write!(f, "command phase"),
            Stage::Data => write!(f, "data phase"),
            Stage::Status => write!(f, "status phase"),
        }
    }
}

/// How the stall retry budget is spread over an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// One budget for all three stages
    #[default]
    SharedAcrossPhases,
    /// A fresh budget for each stage
    PerPhase,
}

impl FromStr for RetryPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(RetryPolicy::SharedAcrossPhases),
            "per-phase" | "perphase" => Ok(RetryPolicy::PerPhase),
            _ => Err(Error::InvalidParameter(format!(
                "retry policy '{}' (expected shared or per-phase)",
                s
            ))),
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPolicy::SharedAcrossPhases => write!(f, "shared"),
            RetryPolicy::PerPhase => write!(f, "per-phase"),
        }
    }
}

#[derive(Debug)]
struct StallBudget {
    limit: u32,
    spent: u32,
}

impl StallBudget {
    fn new(limit: u32) -> Self {
        Self { limit, spent: 0 }
    }

    fn spend(&mut self, stage: Stage) -> Result<()> {
        if self.spent >= self.limit {
            return Err(Error::RetryExhausted {
                stage,
                attempts: self.spent,
            });
        }
        self.spent += 1;
        Ok(())
    }
}

fn pipe_error(stage: Stage, e: PipeError) -> Error {
    match e {
        PipeError::Timeout => Error::Timeout(stage),
        e => Error::TransferFailed {
            stage,
            message: e.to_string(),
        },
    }
}

/// Exchange engine over a [`BulkPipe`]
pub struct Transport<P> {
    pipe: P,
    policy: RetryPolicy,
    max_retries: u32,
    next_tag: u32,
}

impl<P: BulkPipe> Transport<P> {
    /// Transport with the default retry policy
    pub fn new(pipe: P) -> Self {
        Self::with_policy(pipe, RetryPolicy::default())
    }

    /// Transport with an explicit retry policy
    pub fn with_policy(pipe: P, policy: RetryPolicy) -> Self {
        Self {
            pipe,
            policy,
            max_retries: MAX_STALL_RETRIES,
            next_tag: 1,
        }
    }

    /// The retry policy in use
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Borrow the underlying pipe
    pub fn pipe(&self) -> &P {
        &self.pipe
    }

    /// Mutably borrow the underlying pipe
    pub fn pipe_mut(&mut self) -> &mut P {
        &mut self.pipe
    }

    /// Release the underlying pipe
    pub fn into_inner(self) -> P {
        self.pipe
    }

    /// Sleep through the pipe
    pub fn delay_ms(&mut self, ms: u64) {
        self.pipe.delay_ms(ms);
    }

    fn take_tag(&mut self) -> u32 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag
    }

    fn stage_budget(&self, shared: StallBudget) -> StallBudget {
        match self.policy {
            RetryPolicy::SharedAcrossPhases => shared,
            RetryPolicy::PerPhase => StallBudget::new(self.max_retries),
        }
    }

    fn transfer<F>(
        &mut self,
        stage: Stage,
        endpoint: BulkEndpoint,
        budget: &mut StallBudget,
        mut f: F,
    ) -> Result<usize>
    where
        F: FnMut(&mut P) -> core::result::Result<usize, PipeError>,
    {
        loop {
            match f(&mut self.pipe) {
                Ok(n) => return Ok(n),
                Err(PipeError::Stall) => {
                    budget.spend(stage)?;
                    log::trace!(
                        "{:?} endpoint stalled during {}, clearing (retry {}/{})",
                        endpoint,
                        stage,
                        budget.spent,
                        budget.limit
                    );
                    self.pipe
                        .clear_stall(endpoint)
                        .map_err(|e| pipe_error(stage, e))?;
                }
                Err(e) => return Err(pipe_error(stage, e)),
            }
        }
    }

    /// Run one command/data/status exchange
    ///
    /// Returns the status block. A status block with the wrong signature
    /// fails write-class exchanges with [`Error::SignatureMismatch`]; for
    /// read-class exchanges it is logged and returned, and the caller can
    /// see it through [`StatusBlock::is_valid`].
    pub fn exchange(&mut self, op: DeviceOperation<'_>) -> Result<StatusBlock> {
        let tag = self.take_tag();
        let command = *op.command();
        let len = op.len();
        let is_read = matches!(op, DeviceOperation::Read { .. });

        let cbw = CommandBlock::new(tag, len as u32, is_read, command.to_bytes()).encode();
        log::trace!(
            "exchange tag={} op={:02X}/{:02X} params={:02X?} len={} {}",
            tag,
            command.opcode,
            command.function,
            command.params,
            len,
            if is_read { "in" } else { "out" }
        );

        let mut budget = StallBudget::new(self.max_retries);
        let written = self.transfer(Stage::Command, BulkEndpoint::Out, &mut budget, |pipe| {
            pipe.bulk_out(&cbw, COMMAND_TIMEOUT)
        })?;
        if written != CBW_LEN {
            return Err(Error::ShortWrite {
                written,
                expected: CBW_LEN,
            });
        }

        budget = self.stage_budget(budget);
        match op {
            DeviceOperation::Read { buffer, .. } if !buffer.is_empty() => {
                let received = self.transfer(Stage::Data, BulkEndpoint::In, &mut budget, |pipe| {
                    pipe.bulk_in(&mut buffer[..], DATA_TIMEOUT)
                })?;
                if received < len {
                    return Err(Error::ShortRead {
                        stage: Stage::Data,
                        actual: received,
                        expected: len,
                    });
                }
            }
            DeviceOperation::Write { buffer, .. } if !buffer.is_empty() => {
                let sent = self.transfer(Stage::Data, BulkEndpoint::Out, &mut budget, |pipe| {
                    pipe.bulk_out(buffer, DATA_TIMEOUT)
                })?;
                if sent != len {
                    return Err(Error::ShortWrite {
                        written: sent,
                        expected: len,
                    });
                }
            }
            _ => {}
        }

        budget = self.stage_budget(budget);
        let mut raw = [0u8; CSW_LEN];
        let received = self.transfer(Stage::Status, BulkEndpoint::In, &mut budget, |pipe| {
            pipe.bulk_in(&mut raw, COMMAND_TIMEOUT)
        })?;
        if received < CSW_LEN {
            return Err(Error::ShortRead {
                stage: Stage::Status,
                actual: received,
                expected: CSW_LEN,
            });
        }

        let csw = StatusBlock::decode(&raw);
        if !csw.is_valid() {
            log::debug!("status block: {:02X?}", raw);
            if !is_read {
                log::error!("status block signature mismatch (0x{:08X})", csw.signature);
                return Err(Error::SignatureMismatch {
                    found: csw.signature,
                });
            }
            log::warn!("status block signature mismatch (0x{:08X})", csw.signature);
        }
        if csw.tag != tag {
            log::debug!("status tag {} does not echo command tag {}", csw.tag, tag);
        }
        if !csw.is_passed() {
            log::warn!(
                "command {:02X}/{:02X} reported status 0x{:02X}",
                command.opcode,
                command.function,
                csw.status
            );
        }

        Ok(csw)
    }
}
