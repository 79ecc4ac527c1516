//! DLB4 USB device implementation
//!
//! This module provides `UsbPipe`, which opens the board and moves raw
//! bytes over its two bulk endpoints. Framing, retries and stall recovery
//! live in `itedlb-core`; this side only reports what the bus did.

use std::time::Duration;

use itedlb_core::protocol::opcodes::{
    BULK_IN_EP, BULK_OUT_EP, DLB4_USB_PRODUCT, DLB4_USB_VENDOR,
};
use itedlb_core::bringup::BringupState;
use itedlb_core::transport::BulkEndpoint;
use itedlb_core::{BulkPipe, PipeError};
use nusb::transfer::{Buffer, Bulk, In, Out, TransferError};
use nusb::{Endpoint, MaybeFuture};

use crate::error::{Result, UsbError};

/// Interface carrying the bulk endpoints
const DLB4_INTERFACE: u8 = 0;

/// USB backend configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbConfig {
    /// Which attached board to use (0-indexed)
    pub device_index: usize,
}

/// Information about a connected board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dlb4DeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
}

impl std::fmt::Display for Dlb4DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ITE DLB4 at bus {} address {}",
            self.bus, self.address
        )
    }
}

/// Bulk pipe to an ITE DLB4 download board
///
/// The interface is claimed for as long as the pipe lives and released
/// when it is dropped.
pub struct UsbPipe {
    /// Bulk OUT endpoint for command blocks and write data
    out_ep: Endpoint<Bulk, Out>,
    /// Bulk IN endpoint for read data and status blocks
    in_ep: Endpoint<Bulk, In>,
}

impl UsbPipe {
    /// Open the first attached board
    pub fn open() -> Result<Self> {
        Self::open_with_config(UsbConfig::default())
    }

    /// Open the board selected by `config`
    pub fn open_with_config(config: UsbConfig) -> Result<Self> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| UsbError::OpenFailed(e.to_string()))?
            .filter(|d| d.vendor_id() == DLB4_USB_VENDOR && d.product_id() == DLB4_USB_PRODUCT)
            .collect();

        let device_info = devices
            .get(config.device_index)
            .ok_or(UsbError::DeviceNotFound)?;

        log::info!(
            "Opening ITE DLB4 at bus {} address {}",
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| UsbError::OpenFailed(e.to_string()))?;

        let interface = device
            .claim_interface(DLB4_INTERFACE)
            .wait()
            .map_err(|e| UsbError::ClaimFailed(e.to_string()))?;

        let out_ep = interface
            .endpoint::<Bulk, Out>(BULK_OUT_EP)
            .map_err(|e| UsbError::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(BULK_IN_EP)
            .map_err(|e| UsbError::ClaimFailed(e.to_string()))?;

        log::debug!(
            "Endpoints OUT 0x{:02X} IN 0x{:02X} (max packet {})",
            BULK_OUT_EP,
            BULK_IN_EP,
            in_ep.max_packet_size()
        );
        log::debug!(
            "bring-up: {} -> {}",
            BringupState::Closed,
            BringupState::Opened
        );

        Ok(Self { out_ep, in_ep })
    }

    /// List all connected boards
    pub fn list_devices() -> Result<Vec<Dlb4DeviceInfo>> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| UsbError::OpenFailed(e.to_string()))?
            .filter(|d| d.vendor_id() == DLB4_USB_VENDOR && d.product_id() == DLB4_USB_PRODUCT)
            .map(|d| Dlb4DeviceInfo {
                bus: d.busnum(),
                address: d.device_address(),
            })
            .collect();

        Ok(devices)
    }
}

fn pipe_error(e: TransferError) -> PipeError {
    match e {
        TransferError::Stall => PipeError::Stall,
        // transfer_blocking cancels on timeout
        TransferError::Cancelled => PipeError::Timeout,
        TransferError::Disconnected => PipeError::Disconnected,
        e => PipeError::Other(e.to_string()),
    }
}

impl BulkPipe for UsbPipe {
    fn bulk_out(&mut self, data: &[u8], timeout: Duration) -> std::result::Result<usize, PipeError> {
        let mut buf = Buffer::new(data.len());
        buf.extend_from_slice(data);

        let completion = self.out_ep.transfer_blocking(buf, timeout);
        let written = completion.actual_len;
        completion.status.map_err(pipe_error)?;

        log::trace!("USB write {} of {} bytes", written, data.len());
        Ok(written)
    }

    fn bulk_in(&mut self, buffer: &mut [u8], timeout: Duration) -> std::result::Result<usize, PipeError> {
        let max_packet_size = self.in_ep.max_packet_size();
        // Request length must be multiple of max packet size
        let request_len = buffer.len().div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        let completion = self.in_ep.transfer_blocking(in_buf, timeout);
        let data = completion.into_result().map_err(pipe_error)?;

        let received = std::cmp::min(data.len(), buffer.len());
        buffer[..received].copy_from_slice(&data[..received]);

        log::trace!("USB read {} bytes", received);
        Ok(received)
    }

    fn clear_stall(&mut self, endpoint: BulkEndpoint) -> std::result::Result<(), PipeError> {
        log::trace!("Clearing halt on {:?} endpoint", endpoint);
        let result = match endpoint {
            BulkEndpoint::In => self.in_ep.clear_halt().wait(),
            BulkEndpoint::Out => self.out_ep.clear_halt().wait(),
        };
        result.map_err(|e| PipeError::Other(e.to_string()))
    }
}

/// Parse programmer options for the USB backend
///
/// Supported options:
/// - `device=<n>`: which attached board to use (default: 0)
///
/// # Example
///
/// ```ignore
/// let options = [("device", "1")];
/// let config = parse_options(&options)?;
/// ```
pub fn parse_options(options: &[(&str, &str)]) -> Result<UsbConfig> {
    let mut config = UsbConfig::default();

    for (key, value) in options {
        match *key {
            "device" => {
                config.device_index = value.parse().map_err(|_| {
                    UsbError::ConfigError(format!("Invalid device value: {}", value))
                })?;
                log::debug!("Using board #{}", config.device_index);
            }
            _ => {
                return Err(UsbError::ConfigError(format!(
                    "Unknown option: {}",
                    key
                )))
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        assert_eq!(parse_options(&[]).unwrap(), UsbConfig::default());
        assert_eq!(
            parse_options(&[("device", "2")]).unwrap().device_index,
            2
        );
        assert!(matches!(
            parse_options(&[("device", "two")]),
            Err(UsbError::ConfigError(_))
        ));
        assert!(matches!(
            parse_options(&[("speed", "1")]),
            Err(UsbError::ConfigError(_))
        ));
    }

    #[test]
    fn test_transfer_error_mapping() {
        assert_eq!(pipe_error(TransferError::Stall), PipeError::Stall);
        assert_eq!(pipe_error(TransferError::Cancelled), PipeError::Timeout);
        assert_eq!(
            pipe_error(TransferError::Disconnected),
            PipeError::Disconnected
        );
    }

    #[test]
    fn test_device_info_display() {
        let info = Dlb4DeviceInfo { bus: 3, address: 7 };
        assert_eq!(info.to_string(), "ITE DLB4 at bus 3 address 7");
    }
}
