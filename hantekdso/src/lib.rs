//! This crate provides the device control core for Hantek DSO USB
//! oscilloscopes (DSO-2090, -2150, -2250, -5200, -5200A and -6022BE).
//!
//! The control object translates user intent — samplerate, record length,
//! gain, offset, trigger configuration — into the model-specific command
//! payloads, runs the periodic acquisition loop against an injected
//! [`UsbDevice`] transport, and publishes decoded voltage frames through a
//! shared [`SampleFrame`] plus a broadcast event channel.
//!
//! ```no_run
//! use hantekdso::{HantekDsoControl, UsbDevice};
//!
//! async fn acquire(device: impl UsbDevice) -> hantekdso::Result<()> {
//!     let mut dso = HantekDsoControl::new(device)?;
//!     let mut events = dso.subscribe();
//!
//!     dso.set_samplerate(10e6)?;
//!     dso.set_channel_used(0, true)?;
//!     dso.set_gain(0, 1.0)?;
//!     dso.start_sampling()?;
//!
//!     let samples = dso.samples();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if event == hantekdso::DsoEvent::SamplesAvailable {
//!                 let frame = samples.read().unwrap();
//!                 println!("{} samples", frame.data[0].len());
//!             }
//!         }
//!     });
//!
//!     // Drives ticks until a fatal transport error.
//!     dso.run().await
//! }
//! ```

use thiserror::Error;

pub use hantekdso_protocol as protocol;

pub mod commands;
pub mod control;
pub mod event;
pub mod samplerate;
pub mod settings;
pub mod transport;

mod acquisition;

pub use control::HantekDsoControl;
pub use event::DsoEvent;
pub use protocol::{Coupling, Slope};
pub use settings::TriggerMode;
pub use transport::{TransportError, UsbDevice};

pub type Result<T, E = DsoError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DsoError {
    #[error("device is not connected")]
    Connection,

    #[error("parameter out of range")]
    Parameter,

    #[error("operation not supported by this model")]
    Unsupported,

    #[error("unknown device model id {0}")]
    UnknownModel(u32),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Decoded samples shared between the acquisition loop and consumers.
///
/// The control object holds the single writer; consumers read between
/// publications through the `Arc<RwLock<_>>` handed out by
/// [`HantekDsoControl::samples`]. Unused channels publish empty sequences.
#[derive(Debug, Clone, Default)]
pub struct SampleFrame {
    /// Samplerate the data was acquired with, in S/s.
    pub samplerate: f64,
    /// True in roll mode: consumers append instead of replacing.
    pub append: bool,
    /// Voltage sequences, one per channel.
    pub data: Vec<Vec<f64>>,
}

impl SampleFrame {
    pub fn new() -> Self {
        SampleFrame {
            samplerate: 0.0,
            append: false,
            data: vec![Vec::new(); protocol::HANTEK_CHANNELS],
        }
    }
}
