//! itedlb-usb - USB bulk transport for the ITE DLB4 download board
//!
//! Implements the [`itedlb_core::BulkPipe`] seam on top of `nusb`. The board
//! (VID:048d PID:8390) exposes one vendor interface with a bulk OUT endpoint
//! (0x02) and a bulk IN endpoint (0x81).
//!
//! # Example
//!
//! ```no_run
//! use itedlb_core::{FlashConfig, Session};
//! use itedlb_usb::UsbPipe;
//!
//! let pipe = UsbPipe::open()?;
//! let session = Session::bring_up(pipe, &FlashConfig::default())?;
//! println!("{}", session.info());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod device;
mod error;

pub use device::{parse_options, Dlb4DeviceInfo, UsbConfig, UsbPipe};
pub use error::{Result, UsbError};
