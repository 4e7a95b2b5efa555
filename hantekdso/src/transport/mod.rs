//! Transport capability the control core consumes.
//!
//! The driver does not enumerate or open USB devices; it is handed
//! something implementing [`UsbDevice`] and only ever issues blocking
//! bulk/control transfers against it.

use thiserror::Error;

pub mod mock;

/// Transport-level failure of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The device is gone. Fatal: the acquisition loop terminates and
    /// reports a communication error.
    #[error("no device")]
    NoDevice,

    #[error("transfer timed out")]
    Timeout,

    /// Any other USB error, carrying the transport library's error code.
    /// The failed payload stays pending and is retried on the next tick.
    #[error("usb transfer failed with code {0}")]
    Usb(i32),
}

impl TransportError {
    /// Whether this error terminates the acquisition loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::NoDevice)
    }
}

/// A connected oscilloscope as seen by the control core.
pub trait UsbDevice {
    /// Unique id identifying the model, resolved against the static
    /// capability tables.
    fn unique_model_id(&self) -> u32;

    /// Size of one bulk IN transfer in bytes.
    fn packet_size(&self) -> usize;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);

    /// Sends a command buffer to the bulk command endpoint.
    fn bulk_command(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Reads a single bulk transfer, returning the byte count.
    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Reads a large buffer split across multiple bulk transfers,
    /// returning the total byte count.
    fn bulk_read_multi(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes a control request with the given request code.
    fn control_write(&mut self, code: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Reads a control request with the given request code and value.
    fn control_read(&mut self, code: u8, buf: &mut [u8], value: u16)
        -> Result<usize, TransportError>;
}
