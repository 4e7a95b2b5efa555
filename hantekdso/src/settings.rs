//! Mutable acquisition settings.
//!
//! Settings evolve under the serialized user API calls; the acquisition
//! loop only reads them. Command payloads are updated alongside every
//! settings change, so the device state converges to this struct as the
//! pending set drains.

use crate::protocol::device::{ModelSpec, SamplerateLimits, ROLL_RECORD_LENGTH};
use crate::protocol::{Slope, HANTEK_CHANNELS};

/// Trigger release mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Force a trigger when none fires within the timeout window.
    Auto,
    /// Wait for a real trigger indefinitely.
    Normal,
    /// Stop sampling after one triggered acquisition.
    Single,
}

/// Which of the model's samplerate limit sets is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitsSelection {
    /// Both channels share the buffer bandwidth.
    Single,
    /// Fast-rate mode: one channel uses all buffers.
    Multi,
}

impl LimitsSelection {
    pub fn limits(self, spec: &ModelSpec) -> &SamplerateLimits {
        spec.limits(self == LimitsSelection::Multi)
    }
}

/// The last user-requested rate or duration, restored after record-length
/// changes alter the achievable range.
#[derive(Debug, Clone, Copy)]
pub struct TargetSettings {
    pub samplerate: f64,
    pub duration: f64,
    /// True if the samplerate was set last, false for the duration.
    pub samplerate_set: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerateSettings {
    pub limits: LimitsSelection,
    pub downsampler: u32,
    /// Realized samplerate in S/s.
    pub current: f64,
    pub target: TargetSettings,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerSettings {
    /// Pretrigger position in seconds.
    pub position: f64,
    /// Trigger point inside the capture buffer, in samples, recovered from
    /// the last capture state poll.
    pub point: u32,
    pub mode: TriggerMode,
    pub slope: Slope,
    /// True when a special source (EXT, EXT/10) is selected.
    pub special: bool,
    pub source: u32,
    /// Trigger level per channel, in V.
    pub level: [f64; HANTEK_CHANNELS],
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub gain_id: usize,
    /// Requested offset in [0, 1].
    pub offset: f64,
    /// Quantized readback of the last committed offset.
    pub offset_real: f64,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub samplerate: SamplerateSettings,
    pub record_length_id: usize,
    pub trigger: TriggerSettings,
    pub voltage: [ChannelSettings; HANTEK_CHANNELS],
    pub used_channels: u32,
}

impl Settings {
    pub fn new() -> Self {
        Settings {
            samplerate: SamplerateSettings {
                limits: LimitsSelection::Single,
                downsampler: 1,
                current: 1e8,
                target: TargetSettings {
                    samplerate: 1e8,
                    duration: 1e-3,
                    samplerate_set: true,
                },
            },
            record_length_id: 1,
            trigger: TriggerSettings {
                position: 0.0,
                point: 0,
                mode: TriggerMode::Normal,
                slope: Slope::Positive,
                special: false,
                source: 0,
                level: [0.0; HANTEK_CHANNELS],
            },
            voltage: [ChannelSettings {
                gain_id: 0,
                offset: 0.0,
                offset_real: 0.0,
                used: false,
            }; HANTEK_CHANNELS],
            used_channels: 0,
        }
    }

    /// The currently selected record length.
    pub fn record_length(&self, spec: &ModelSpec) -> u32 {
        self.samplerate.limits.limits(spec).record_lengths[self.record_length_id]
    }

    pub fn is_roll_mode(&self, spec: &ModelSpec) -> bool {
        self.record_length(spec) == ROLL_RECORD_LENGTH
    }

    pub fn fast_rate(&self) -> bool {
        self.samplerate.limits == LimitsSelection::Multi
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
