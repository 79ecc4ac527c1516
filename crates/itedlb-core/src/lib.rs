//! itedlb-core - Core library for flashing ITE embedded controllers through
//! the DLB4 USB download board
//!
//! The board speaks a small command/status block protocol over two USB bulk
//! endpoints. Every operation is one exchange: a 31-byte command block goes
//! out, an optional data phase moves the payload, and a 13-byte status block
//! comes back.
//!
//! The crate is layered leaf-first:
//!
//! - [`protocol`] - wire format of the command and status blocks, opcodes
//! - [`transport`] - the bulk-pipe seam and the exchange state machine with
//!   stall recovery
//! - [`command`] - pure encoders mapping device operations to opcode records
//! - [`device`] - typed device API on top of encoder and transport
//! - [`bringup`] - the two ways to open a programming session
//! - [`sequencer`] - erase, blank-check, program and verify passes
//! - [`protect`] - status register and reset helpers
//! - [`session`] - ties the above together for one flashing run
//!
//! # Example
//!
//! ```ignore
//! use itedlb_core::{FlashConfig, FlashImage, Session};
//! use itedlb_core::sequencer::NoProgress;
//!
//! let image = FlashImage::from_file("ec.bin")?;
//! let mut session = Session::bring_up(pipe, &FlashConfig::default())?;
//! println!("{}", session.info());
//! session.flash(&image, &mut NoProgress)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bringup;
pub mod command;
pub mod device;
pub mod error;
pub mod protect;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod transport;

pub use error::{BringupFailure, Error, Result};
pub use sequencer::{FlashImage, SkipStages};
pub use session::{FlashConfig, Session, SessionInfo};
pub use transport::{BulkPipe, PipeError, RetryPolicy};
