//! itedlb-dummy - In-memory emulator of the DLB4 board and target flash
//!
//! This crate provides a dummy board that speaks the command/status block
//! protocol over the [`BulkPipe`] seam and emulates an EC with its flash in
//! memory. It's useful for testing and for dry runs without real hardware.
//!
//! Faults can be injected to exercise the error paths: endpoint stalls,
//! corrupted status blocks, a chip ID that stays zero and a flash cell that
//! refuses to program.

use std::collections::HashMap;
use std::time::Duration;

use itedlb_core::bringup::BringupState;
use itedlb_core::command::{Command, EraseMode};
use itedlb_core::protocol::opcodes::*;
use itedlb_core::protocol::wire::{CommandBlock, StatusBlock, CBW_SIGNATURE, CSW_FAILED};
use itedlb_core::transport::BulkEndpoint;
use itedlb_core::{BulkPipe, PipeError};

/// Configuration for the dummy board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Board firmware version record
    pub firmware_version: [u8; FW_VERSION_LEN],
    /// EC chip ID
    pub chip_id: [u8; CHIP_ID_LEN],
    /// Auxiliary chip ID bytes at 0x2085-0x2087
    pub aux_chip_id: [u8; 3],
    /// Flash JEDEC ID
    pub flash_id: [u8; FLASH_ID_LEN],
    /// Flash size in bytes
    pub flash_size: usize,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            firmware_version: [0x02, 0x10, 0x00, 0x00],
            chip_id: [0x85, 0x70, 0x01], // IT8570
            aux_chip_id: [0x01, 0x00, 0x02],
            flash_id: [0xEF, 0x40, 0x14, 0x00, 0x00], // W25Q80
            flash_size: 16 * BLOCK_SIZE,
        }
    }
}

/// Where the board is inside the current exchange
#[derive(Debug)]
enum Phase {
    /// Waiting for a command block
    Idle,
    /// Waiting for the host to send the data phase
    DataOut {
        command: Command,
        expected: usize,
        received: Vec<u8>,
    },
    /// Holding the data phase for the host to read
    DataIn { data: Vec<u8>, status: u8 },
    /// Holding the status block for the host to read
    Status(StatusBlock),
}

/// Dummy DLB4 board
///
/// Flash powers up as all 0x00 so a skipped erase is visible. Programming
/// can only clear bits, like real NOR flash.
pub struct DummyBoard {
    config: DummyConfig,
    flash: Vec<u8>,
    registers: HashMap<u16, u8>,
    phase: Phase,
    tag: u32,

    // Observations
    ops: Vec<Command>,
    gpio_log: Vec<(u8, u8)>,
    status_writes: Vec<(u8, u8, u8)>,
    stall_clears: Vec<BulkEndpoint>,
    delayed_ms: u64,

    // Fault injection
    halted: Option<BulkEndpoint>,
    pending_stalls: u32,
    corrupt_status: bool,
    chip_id_zero_reads: u32,
    program_fault: Option<usize>,
}

impl DummyBoard {
    /// Create a new dummy board with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![0x00; config.flash_size];
        let mut registers = HashMap::new();
        for (reg, value) in REG_CHIP_AUX_ID.iter().zip(config.aux_chip_id) {
            registers.insert(*reg, value);
        }
        log::debug!(
            "bring-up: {} -> {}",
            BringupState::Closed,
            BringupState::Opened
        );

        Self {
            config,
            flash,
            registers,
            phase: Phase::Idle,
            tag: 0,
            ops: Vec::new(),
            gpio_log: Vec::new(),
            status_writes: Vec::new(),
            stall_clears: Vec::new(),
            delayed_ms: 0,
            halted: None,
            pending_stalls: 0,
            corrupt_status: false,
            chip_id_zero_reads: 0,
            program_fault: None,
        }
    }

    /// Create a new dummy board with default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Stall the next `count` bulk transfers
    pub fn inject_stalls(&mut self, count: u32) {
        self.pending_stalls = count;
    }

    /// Send status blocks with the command block signature
    pub fn corrupt_status_signature(&mut self, corrupt: bool) {
        self.corrupt_status = corrupt;
    }

    /// Answer the next `reads` chip ID reads with zeros
    ///
    /// `u32::MAX` keeps the chip ID zero forever.
    pub fn delay_chip_id(&mut self, reads: u32) {
        self.chip_id_zero_reads = reads;
    }

    /// Make the flash cell at `offset` ignore programming
    pub fn inject_program_fault(&mut self, offset: usize) {
        self.program_fault = Some(offset);
    }

    /// Get a reference to the flash contents
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Value of an emulated EC register
    pub fn register(&self, addr: u16) -> Option<u8> {
        self.registers.get(&addr).copied()
    }

    /// Every command executed so far, in order
    pub fn commands(&self) -> &[Command] {
        &self.ops
    }

    /// How many commands with this opcode and function code were executed
    pub fn count_ops(&self, opcode: u8, function: u8) -> usize {
        self.ops
            .iter()
            .filter(|c| c.opcode == opcode && c.function == function)
            .count()
    }

    /// GPIO requests as (pin, mode), in order
    pub fn gpio_log(&self) -> &[(u8, u8)] {
        &self.gpio_log
    }

    /// Flash status writes as (byte count, status 1, status 2)
    pub fn status_writes(&self) -> &[(u8, u8, u8)] {
        &self.status_writes
    }

    /// Endpoints whose stall was cleared, in order
    pub fn stall_clears(&self) -> &[BulkEndpoint] {
        &self.stall_clears
    }

    /// Total delay requested by the host
    pub fn delayed_ms(&self) -> u64 {
        self.delayed_ms
    }

    fn stall_check(&mut self, endpoint: BulkEndpoint) -> Result<(), PipeError> {
        if self.halted == Some(endpoint) {
            return Err(PipeError::Stall);
        }
        if self.pending_stalls > 0 {
            self.pending_stalls -= 1;
            self.halted = Some(endpoint);
            log::trace!("dummy: stalling {:?}", endpoint);
            return Err(PipeError::Stall);
        }
        Ok(())
    }

    fn finish(&mut self, status: u8) {
        let mut csw = StatusBlock::passed(self.tag);
        csw.status = status;
        if self.corrupt_status {
            csw.signature = CBW_SIGNATURE;
        }
        self.phase = Phase::Status(csw);
    }

    fn accept_command_block(&mut self, data: &[u8]) -> Result<(), PipeError> {
        let cbw = CommandBlock::decode(data).map_err(|e| PipeError::Other(e.to_string()))?;
        let command = Command::from_bytes(&cbw.command);
        let len = cbw.data_length as usize;
        self.tag = cbw.tag;

        if cbw.is_data_in() {
            let mut reply = vec![0u8; len];
            let status = self.execute_read(&command, &mut reply);
            self.ops.push(command);
            if len > 0 {
                self.phase = Phase::DataIn {
                    data: reply,
                    status,
                };
            } else {
                self.finish(status);
            }
        } else if len > 0 {
            self.phase = Phase::DataOut {
                command,
                expected: len,
                received: Vec::with_capacity(len),
            };
        } else {
            let status = self.execute_write(&command, &[]);
            self.ops.push(command);
            self.finish(status);
        }
        Ok(())
    }

    fn block_offset(&self, block: usize) -> usize {
        block * BLOCK_SIZE
    }

    fn execute_read(&mut self, cmd: &Command, reply: &mut [u8]) -> u8 {
        let p = cmd.params;
        if cmd.opcode == OP_FW_CTL {
            return match cmd.function {
                FW_READ_VERSION => {
                    fill(reply, &self.config.firmware_version);
                    0
                }
                _ => CSW_FAILED,
            };
        }
        if cmd.opcode != OP_DBGR && cmd.opcode != OP_DBGR_SPI {
            return CSW_FAILED;
        }

        match cmd.function {
            FN_CHIPID_READ => {
                if self.chip_id_zero_reads > 0 {
                    if self.chip_id_zero_reads != u32::MAX {
                        self.chip_id_zero_reads -= 1;
                    }
                    fill(reply, &[0; CHIP_ID_LEN]);
                } else {
                    fill(reply, &self.config.chip_id);
                }
            }
            FN_FLASHID_READ | FN_FLASHID_READ_SPI => fill(reply, &self.config.flash_id),
            FN_START_DEBUG => fill(reply, &[0x00]),
            FN_READ_REG => {
                let addr = u16::from_be_bytes([p[0], p[1]]);
                fill(reply, &[self.registers.get(&addr).copied().unwrap_or(0)]);
            }
            FN_FLASH_ERASE | FN_FLASH_ERASE_SPI => {
                let block = p[2] as usize | (p[4] as usize) << 8;
                self.erase(p[0], block, p[3]);
                fill(reply, &[0x00]);
            }
            FN_FLASH_READ | FN_FLASH_READ_SPI => {
                let block = p[0] as usize | (p[4] as usize) << 8;
                let start = self.block_offset(block);
                for (i, out) in reply.iter_mut().enumerate() {
                    *out = self.flash.get(start + i).copied().unwrap_or(0xFF);
                }
            }
            FN_FLASH_SPI_STATUS => {
                self.status_writes.push((p[0], p[1], p[2]));
                fill(reply, &[p[1], p[2]]);
            }
            _ => return CSW_FAILED,
        }
        0
    }

    fn execute_write(&mut self, cmd: &Command, data: &[u8]) -> u8 {
        let p = cmd.params;
        if cmd.opcode == OP_FW_CTL {
            return match cmd.function {
                FW_SET_GPIO if data.len() >= 2 => {
                    self.gpio_log.push((data[0], data[1]));
                    0
                }
                _ => CSW_FAILED,
            };
        }
        if cmd.opcode != OP_DBGR && cmd.opcode != OP_DBGR_SPI {
            return CSW_FAILED;
        }

        match cmd.function {
            FN_WRITE_REG => {
                let addr = u16::from_be_bytes([p[0], p[1]]);
                self.registers.insert(addr, data.first().copied().unwrap_or(0));
            }
            FN_RUN_CTRL | FN_DBGR_CMD_SET => {}
            FN_FLASH_WRITE | FN_FLASH_WRITE_SPI => {
                let block = p[1] as usize | (p[4] as usize) << 8;
                let start = self.block_offset(block);
                for (i, &byte) in data.iter().enumerate() {
                    let addr = start + i;
                    if Some(addr) == self.program_fault {
                        continue;
                    }
                    if let Some(cell) = self.flash.get_mut(addr) {
                        *cell &= byte;
                    }
                }
            }
            _ => return CSW_FAILED,
        }
        0
    }

    fn erase(&mut self, mode: u8, block: usize, sector: u8) {
        let (start, len) = if mode == EraseMode::Chip as u8 {
            (0, self.flash.len())
        } else if mode == EraseMode::Sector as u8 {
            let sub = (sector >> 4) as usize;
            (self.block_offset(block) + sub * SUB_SECTOR_SIZE, SUB_SECTOR_SIZE)
        } else {
            (self.block_offset(block), BLOCK_SIZE)
        };
        let end = (start + len).min(self.flash.len());
        if start < end {
            self.flash[start..end].fill(0xFF);
        }
    }
}

fn fill(reply: &mut [u8], src: &[u8]) {
    let n = reply.len().min(src.len());
    reply[..n].copy_from_slice(&src[..n]);
}

impl BulkPipe for DummyBoard {
    fn bulk_out(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, PipeError> {
        self.stall_check(BulkEndpoint::Out)?;

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => self.accept_command_block(data)?,
            Phase::DataOut {
                command,
                expected,
                mut received,
            } => {
                received.extend_from_slice(data);
                if received.len() >= expected {
                    let status = self.execute_write(&command, &received[..expected]);
                    self.ops.push(command);
                    self.finish(status);
                } else {
                    self.phase = Phase::DataOut {
                        command,
                        expected,
                        received,
                    };
                }
            }
            other => {
                self.phase = other;
                return Err(PipeError::Other("unexpected OUT transfer".into()));
            }
        }
        Ok(data.len())
    }

    fn bulk_in(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, PipeError> {
        self.stall_check(BulkEndpoint::In)?;

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::DataIn { data, status } => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                self.finish(status);
                Ok(n)
            }
            Phase::Status(csw) => {
                let bytes = csw.encode();
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            other => {
                self.phase = other;
                Err(PipeError::Timeout)
            }
        }
    }

    fn clear_stall(&mut self, endpoint: BulkEndpoint) -> Result<(), PipeError> {
        self.stall_clears.push(endpoint);
        if self.halted == Some(endpoint) {
            self.halted = None;
        }
        Ok(())
    }

    fn delay_ms(&mut self, ms: u64) {
        self.delayed_ms += ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itedlb_core::command::{AccessPath, GpioPin, PinMode};
    use itedlb_core::error::BringupFailure;
    use itedlb_core::sequencer::{FlashSequencer, NoProgress, Pass};
    use itedlb_core::{Error, FlashConfig, FlashImage, RetryPolicy, Session, SkipStages};

    const MIB: usize = 16 * BLOCK_SIZE;

    fn debug_config() -> FlashConfig {
        FlashConfig::default()
    }

    fn spi_config() -> FlashConfig {
        FlashConfig {
            path: AccessPath::Spi,
            ..FlashConfig::default()
        }
    }

    fn flash_reads(board: &DummyBoard, path: AccessPath) -> usize {
        board.count_ops(path.opcode(), path.read_function())
    }

    #[test]
    fn test_debug_bringup_reports_ids() {
        let mut board = DummyBoard::new_default();
        let session = Session::bring_up(&mut board, &debug_config()).unwrap();

        let info = *session.info();
        assert_eq!(info.path, AccessPath::Debug);
        assert_eq!(info.firmware_version.0, [0x02, 0x10, 0x00, 0x00]);
        let chip = info.chip_id.unwrap();
        assert_eq!(chip.id, [0x85, 0x70, 0x01]);
        assert_eq!(chip.aux, [0x01, 0x00, 0x02]);
        assert_eq!(info.flash_id.0[..3], [0xEF, 0x40, 0x14]);
        drop(session);

        // protection cleared during bring-up
        assert_eq!(board.status_writes(), &[(0xFF, 0x00, 0x00)]);
        assert_eq!(board.register(REG_FLASH_PROTECT_CTRL), Some(0x30));
        for i in 0..FLASH_PROTECT_REG_COUNT {
            assert_eq!(board.register(REG_FLASH_PROTECT_BASE + i), Some(0x00));
        }
        assert_eq!(board.register(REG_DBGR_CTRL), Some(DBGR_CTRL_HOLD));
        assert_eq!(board.delayed_ms(), 50);
        assert_eq!(board.count_ops(OP_DBGR, FN_CHIPID_READ), 1);
    }

    #[test]
    fn test_erase_then_blank_check_reads_ff() {
        let mut board = DummyBoard::new_default();
        let image = FlashImage::from_bytes(vec![0x00; MIB]).unwrap();
        assert_eq!(image.block_count(), 16);

        let mut session = Session::bring_up(&mut board, &debug_config()).unwrap();
        let mut readback = vec![0u8; image.len()];
        {
            let mut seq = FlashSequencer::new(session.device_mut(), SkipStages::empty());
            seq.erase(image.block_count(), &mut NoProgress).unwrap();
            seq.blank_check(image.block_count(), &mut readback, &mut NoProgress)
                .unwrap();
        }
        drop(session);

        assert!(readback.iter().all(|&b| b == 0xFF));
        assert!(board.flash().iter().all(|&b| b == 0xFF));
        // 16 sub-sector erases per block
        assert_eq!(board.count_ops(OP_DBGR, FN_FLASH_ERASE), 16 * 16);
    }

    #[test]
    fn test_full_flash_programs_image() {
        let mut board = DummyBoard::new_default();
        let image = FlashImage::from_bytes(vec![0x00; MIB]).unwrap();

        let mut session = Session::bring_up(&mut board, &debug_config()).unwrap();
        session.flash(&image, &mut NoProgress).unwrap();
        drop(session);

        assert_eq!(board.flash(), image.as_bytes());
        assert_eq!(board.count_ops(OP_DBGR, FN_FLASH_WRITE), 16);
        // blank check and verify
        assert_eq!(flash_reads(&board, AccessPath::Debug), 32);

        // QE persistence after programming
        assert_eq!(board.status_writes().last(), Some(&(0x82, 0x00, 0x02)));

        // reset pulse on C1
        let c1 = GpioPin::C1 as u8;
        assert_eq!(
            board.gpio_log(),
            &[
                (c1, PinMode::Low as u8),
                (c1, PinMode::Output as u8),
                (c1, PinMode::High as u8),
            ]
        );
        let last = board.commands().iter().rev().find(|c| c.function == FN_RUN_CTRL);
        assert_eq!(last.map(|c| c.params[0]), Some(RUN_CTRL_HOLD));
    }

    #[test]
    fn test_partial_block_image_is_padded() {
        let mut board = DummyBoard::new_default();
        let data: Vec<u8> = (0..BLOCK_SIZE + 100).map(|i| (i % 251) as u8).collect();
        let image = FlashImage::from_bytes(data.clone()).unwrap();

        let mut session = Session::bring_up(&mut board, &debug_config()).unwrap();
        session.flash(&image, &mut NoProgress).unwrap();
        drop(session);

        assert_eq!(&board.flash()[..data.len()], &data[..]);
        assert!(board.flash()[data.len()..2 * BLOCK_SIZE]
            .iter()
            .all(|&b| b == 0xFF));
    }

    #[test]
    fn test_verify_reports_injected_mismatch() {
        let mut board = DummyBoard::new_default();
        board.inject_program_fault(70000);
        let image = FlashImage::from_bytes(vec![0x00; MIB]).unwrap();

        let mut session = Session::bring_up(&mut board, &debug_config()).unwrap();
        let err = session.flash(&image, &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            Error::VerifyMismatch {
                offset: 70000,
                found: 0xFF,
                expected: 0x00
            }
        ));
        drop(session);

        // aborted before the QE write and reset
        assert_eq!(board.status_writes().len(), 1);
        assert!(board.gpio_log().is_empty());
    }

    #[test]
    fn test_chip_id_poll_exhausted() {
        let mut board = DummyBoard::new_default();
        board.delay_chip_id(u32::MAX);

        let result = Session::bring_up(&mut board, &debug_config());
        assert!(matches!(
            result,
            Err(Error::BringupFailed(BringupFailure::ChipIdTimeout {
                attempts: 2000
            }))
        ));

        assert_eq!(board.count_ops(OP_DBGR, FN_CHIPID_READ), 2000);
        assert_eq!(board.count_ops(OP_DBGR, FN_FLASH_ERASE), 0);
        assert_eq!(board.count_ops(OP_DBGR, FN_FLASH_WRITE), 0);
    }

    #[test]
    fn test_chip_id_poll_recovers() {
        let mut board = DummyBoard::new_default();
        board.delay_chip_id(3);

        let session = Session::bring_up(&mut board, &debug_config()).unwrap();
        assert!(session.info().chip_id.unwrap().is_valid());
        drop(session);
        assert_eq!(board.count_ops(OP_DBGR, FN_CHIPID_READ), 4);
    }

    #[test]
    fn test_poll_attempts_configurable() {
        let mut board = DummyBoard::new_default();
        board.delay_chip_id(u32::MAX);
        let config = FlashConfig {
            poll_attempts: 5,
            ..FlashConfig::default()
        };

        assert!(Session::bring_up(&mut board, &config).is_err());
        assert_eq!(board.count_ops(OP_DBGR, FN_CHIPID_READ), 5);
    }

    fn run_with_skip(skip: SkipStages) -> DummyBoard {
        let mut board = DummyBoard::new_default();
        let image = FlashImage::from_bytes(vec![0x5A; 2 * BLOCK_SIZE]).unwrap();
        let config = FlashConfig {
            skip,
            ..FlashConfig::default()
        };

        let mut session = Session::bring_up(&mut board, &config).unwrap();
        session.flash(&image, &mut NoProgress).unwrap();
        drop(session);
        board
    }

    #[test]
    fn test_skip_check() {
        let board = run_with_skip(SkipStages::CHECK);
        // only the verify pass reads
        assert_eq!(flash_reads(&board, AccessPath::Debug), 2);
    }

    #[test]
    fn test_skip_verify() {
        let board = run_with_skip(SkipStages::VERIFY);
        // only the blank check reads
        assert_eq!(flash_reads(&board, AccessPath::Debug), 2);
    }

    #[test]
    fn test_skip_both() {
        let board = run_with_skip(SkipStages::CHECK | SkipStages::VERIFY);
        assert_eq!(flash_reads(&board, AccessPath::Debug), 0);
        assert_eq!(board.count_ops(OP_DBGR, FN_FLASH_WRITE), 2);
    }

    #[test]
    fn test_spi_path() {
        let mut board = DummyBoard::new_default();
        let image = FlashImage::from_bytes(vec![0xA5; 4 * BLOCK_SIZE]).unwrap();

        let mut session = Session::bring_up(&mut board, &spi_config()).unwrap();
        assert_eq!(session.info().path, AccessPath::Spi);
        assert!(session.info().chip_id.is_none());
        session.flash(&image, &mut NoProgress).unwrap();
        drop(session);

        assert_eq!(board.count_ops(OP_DBGR_SPI, FN_CHIPID_READ), 0);
        assert_eq!(board.count_ops(OP_DBGR_SPI, FN_FLASHID_READ_SPI), 1);
        // chip erase is a single call
        assert_eq!(board.count_ops(OP_DBGR_SPI, FN_FLASH_ERASE_SPI), 1);
        assert_eq!(board.count_ops(OP_DBGR_SPI, FN_FLASH_WRITE_SPI), 4);
        assert_eq!(board.count_ops(OP_DBGR, FN_FLASH_WRITE), 0);
        assert_eq!(&board.flash()[..image.len()], image.as_bytes());
        assert!(board.flash()[image.len()..].iter().all(|&b| b == 0xFF));

        let g6 = GpioPin::G6 as u8;
        let c1 = GpioPin::C1 as u8;
        assert_eq!(
            &board.gpio_log()[..8],
            &[
                (g6, PinMode::Low as u8),
                (g6, PinMode::Output as u8),
                (c1, PinMode::Low as u8),
                (c1, PinMode::Output as u8),
                (c1, PinMode::High as u8),
                (c1, PinMode::Alt as u8),
                (g6, PinMode::High as u8),
                (g6, PinMode::Alt as u8),
            ]
        );
        // three pin settles plus the reset hold
        assert_eq!(board.delayed_ms(), 300 + 1000);
    }

    #[test]
    fn test_no_reset() {
        let mut board = DummyBoard::new_default();
        let image = FlashImage::from_bytes(vec![0x00; BLOCK_SIZE]).unwrap();
        let config = FlashConfig {
            reset_after: false,
            ..FlashConfig::default()
        };

        let mut session = Session::bring_up(&mut board, &config).unwrap();
        session.flash(&image, &mut NoProgress).unwrap();
        drop(session);
        assert!(board.gpio_log().is_empty());
    }

    #[test]
    fn test_stalls_recovered_during_bringup() {
        let mut board = DummyBoard::new_default();
        board.inject_stalls(3);

        assert!(Session::bring_up(&mut board, &debug_config()).is_ok());
        assert_eq!(board.stall_clears(), &[BulkEndpoint::Out; 3]);
    }

    #[test]
    fn test_stalls_exhaust_retry_budget() {
        let mut board = DummyBoard::new_default();
        board.inject_stalls(6);

        let err = match Session::bring_up(&mut board, &debug_config()) {
            Err(Error::BringupFailed(BringupFailure::Step { step, source })) => {
                assert_eq!(step, "read firmware version");
                *source
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        };
        assert!(matches!(err, Error::RetryExhausted { attempts: 5, .. }));
        assert_eq!(board.stall_clears().len(), 5);
    }

    #[test]
    fn test_per_phase_policy_survives_stalls() {
        let mut board = DummyBoard::new_default();
        board.inject_stalls(5);
        let config = FlashConfig {
            retry_policy: RetryPolicy::PerPhase,
            ..FlashConfig::default()
        };

        assert!(Session::bring_up(&mut board, &config).is_ok());
    }

    #[test]
    fn test_corrupt_status_fails_first_register_write() {
        let mut board = DummyBoard::new_default();
        board.corrupt_status_signature(true);

        match Session::bring_up(&mut board, &debug_config()) {
            Err(Error::BringupFailed(BringupFailure::Step { step, source })) => {
                assert_eq!(step, "write debugger control");
                assert!(matches!(*source, Error::SignatureMismatch { .. }));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        // read-class exchanges before it went through
        assert_eq!(board.count_ops(OP_FW_CTL, FW_READ_VERSION), 1);
    }

    #[test]
    fn test_transport_failure_is_tagged_with_pass() {
        struct Unplugged<'a> {
            board: &'a mut DummyBoard,
            writes_left: usize,
        }

        impl BulkPipe for Unplugged<'_> {
            fn bulk_out(&mut self, data: &[u8], timeout: Duration) -> Result<usize, PipeError> {
                if data.len() == BLOCK_SIZE {
                    if self.writes_left == 0 {
                        return Err(PipeError::Disconnected);
                    }
                    self.writes_left -= 1;
                }
                self.board.bulk_out(data, timeout)
            }

            fn bulk_in(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PipeError> {
                self.board.bulk_in(buf, timeout)
            }

            fn clear_stall(&mut self, endpoint: BulkEndpoint) -> Result<(), PipeError> {
                self.board.clear_stall(endpoint)
            }

            fn delay_ms(&mut self, ms: u64) {
                self.board.delay_ms(ms)
            }
        }

        let mut board = DummyBoard::new_default();
        let image = FlashImage::from_bytes(vec![0x00; 4 * BLOCK_SIZE]).unwrap();
        let pipe = Unplugged {
            board: &mut board,
            writes_left: 2,
        };

        let mut session = Session::bring_up(pipe, &debug_config()).unwrap();
        let err = session.flash(&image, &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            Error::FlashPass {
                pass: Pass::Program,
                block: 2,
                ..
            }
        ));
    }
}
