//! Wire protocol implementation for the Hantek DSO family.
//!
//! This crate provides the per-model capability tables and the bulk/control
//! command payloads needed to talk to a Hantek DSO-2090, -2150, -2250,
//! -5200(A) or -6022BE oscilloscope, along with the decoding of capture
//! state responses and raw sample buffers.
//!
//! It is meant to be as lean as possible: it owns no I/O and includes no
//! transport implementation. The `hantekdso` crate layers the USB transport,
//! settings state and acquisition loop on top of it.

use thiserror::Error;

pub mod bulk;
pub mod capture;
pub mod control;
pub mod device;
pub mod samples;

pub use bulk::{BulkCode, BulkCommand, Slope};
pub use capture::{decode_trigger_point, CaptureState};
pub use control::{ControlCode, ControlCommand, Coupling};
pub use device::{probe, Model, ModelSpec, SamplerateLimits, ROLL_RECORD_LENGTH};

/// Number of analog input channels on all supported models.
pub const HANTEK_CHANNELS: usize = 2;

/// Number of special trigger sources (EXT and EXT/10).
pub const HANTEK_SPECIAL_CHANNELS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("response too short: expected {expected} bytes, got {actual}")]
    TruncatedResponse { expected: usize, actual: usize },

    #[error("unknown capture state code {0:#04x}")]
    UnknownCaptureState(u8),
}
