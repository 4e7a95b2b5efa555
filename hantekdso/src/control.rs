//! High-level control of one oscilloscope.
//!
//! `HantekDsoControl` owns the device transport, the capability profile,
//! the settings state and the command payloads. User API calls mutate the
//! settings, rewrite the affected payload fields and mark them pending;
//! the acquisition loop (see the `acquisition` module) drains the pending
//! set onto the device on its next tick.

use std::sync::{Arc, RwLock};

use log::warn;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::commands::{CommandSet, ControlIndex};
use crate::event::{DsoEvent, EventSink};
use crate::protocol::bulk::{self, BulkCode, Slope};
use crate::protocol::capture::CaptureState;
use crate::protocol::control::{ControlCode, OffsetLimits, OFFSET_LIMITS_LEN, VALUE_OFFSET_LIMITS};
use crate::protocol::device::{probe, Model, ModelSpec, ROLL_RECORD_LENGTH};
use crate::protocol::{Coupling, HANTEK_CHANNELS, HANTEK_SPECIAL_CHANNELS};
use crate::samplerate::best_samplerate;
use crate::settings::{LimitsSelection, Settings, TriggerMode};
use crate::transport::UsbDevice;
use crate::{DsoError, Result, SampleFrame};

/// Names of the special trigger sources.
pub const SPECIAL_TRIGGER_SOURCES: [&str; HANTEK_SPECIAL_CHANNELS] = ["EXT", "EXT/10"];

/// Raw trigger level window of the 8-bit models.
const TRIGGER_LEVEL_8BIT: (u16, u16) = (0x00, 0xfd);

/// Trigger level byte committed for special trigger sources.
const TRIGGER_LEVEL_SPECIAL: u16 = 0x7f;

/// Software trigger margin of the DSO-6022BE, in samples.
const SAMPLE_MARGIN_6022: u32 = 2000;

/// The device control core.
///
/// All methods run on the caller's thread; user API calls and the
/// acquisition tick are serialized through `&mut self`, so settings and
/// payloads never race. The only state shared with other threads is the
/// [`SampleFrame`] behind its read/write lock.
pub struct HantekDsoControl<D> {
    pub(crate) device: D,
    pub(crate) spec: &'static ModelSpec,
    pub(crate) offset_limits: OffsetLimits,
    pub(crate) settings: Settings,
    pub(crate) commands: CommandSet,
    pub(crate) events: EventSink,
    pub(crate) result: Arc<RwLock<SampleFrame>>,

    pub(crate) sampling: bool,

    // Acquisition state machine.
    pub(crate) capture_state: Option<CaptureState>,
    pub(crate) roll_state: crate::acquisition::RollState,
    pub(crate) sampling_started: bool,
    pub(crate) last_trigger_mode: Option<TriggerMode>,
    pub(crate) cycle_counter: u32,
    pub(crate) start_cycle: u32,
    pub(crate) cycle_time_ms: u64,
    pub(crate) previous_sample_count: usize,
}

impl<D: UsbDevice> HantekDsoControl<D> {
    /// Probes the device model, reads the offset calibration and prepares
    /// the initial command set.
    ///
    /// On an unknown model or a failed calibration read the device is
    /// disconnected and construction fails.
    pub fn new(mut device: D) -> Result<Self> {
        let events = EventSink::new();

        let model_id = device.unique_model_id();
        let Some(spec) = probe(model_id) else {
            device.disconnect();
            events.emit(DsoEvent::StatusMessage {
                text: "Unknown model".into(),
                level: 0,
            });
            return Err(DsoError::UnknownModel(model_id));
        };

        if !spec.model.officially_supported() {
            warn!(
                "model {:?} isn't supported officially, so it may not be working as expected",
                spec.model
            );
        }

        let mut calibration = [0u8; OFFSET_LIMITS_LEN];
        let offset_limits = match device.control_read(
            ControlCode::Value as u8,
            &mut calibration,
            VALUE_OFFSET_LIMITS,
        ) {
            Ok(count) => match OffsetLimits::parse(&calibration[..count]) {
                Ok(limits) => limits,
                Err(_) => {
                    device.disconnect();
                    events.emit(DsoEvent::StatusMessage {
                        text: "Couldn't get channel level data from oscilloscope".into(),
                        level: 0,
                    });
                    return Err(DsoError::Parameter);
                }
            },
            Err(error) => {
                device.disconnect();
                events.emit(DsoEvent::StatusMessage {
                    text: "Couldn't get channel level data from oscilloscope".into(),
                    level: 0,
                });
                return Err(error.into());
            }
        };

        let commands = CommandSet::new(spec);

        let mut control = HantekDsoControl {
            device,
            spec,
            offset_limits,
            settings: Settings::new(),
            commands,
            events,
            result: Arc::new(RwLock::new(SampleFrame::new())),
            sampling: false,
            capture_state: Some(CaptureState::Waiting),
            roll_state: crate::acquisition::RollState::StartSampling,
            sampling_started: false,
            last_trigger_mode: None,
            cycle_counter: 0,
            start_cycle: 0,
            cycle_time_ms: 0,
            previous_sample_count: 0,
        };

        control.update_interval();
        control.announce_settings();
        Ok(control)
    }

    /// The model profile resolved for this device.
    pub fn spec(&self) -> &'static ModelSpec {
        self.spec
    }

    /// The transport this control object drives.
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The physical channel count of this oscilloscope.
    pub fn channel_count(&self) -> usize {
        HANTEK_CHANNELS
    }

    /// Names of the special trigger sources.
    pub fn special_trigger_sources(&self) -> &'static [&'static str] {
        &SPECIAL_TRIGGER_SOURCES
    }

    /// Record lengths available in the current channel configuration.
    pub fn available_record_lengths(&self) -> &'static [u32] {
        self.settings.samplerate.limits.limits(self.spec).record_lengths
    }

    /// The minimum samplerate for this oscilloscope in S/s.
    pub fn min_samplerate(&self) -> f64 {
        self.spec.samplerate_single.base / self.spec.samplerate_single.max_downsampler as f64
    }

    /// The maximum samplerate for the current configuration in S/s.
    pub fn max_samplerate(&self) -> f64 {
        let limits = if self.settings.used_channels <= 1 {
            &self.spec.samplerate_multi
        } else {
            &self.spec.samplerate_single
        };
        limits.max
    }

    /// Whether the acquisition loop is capturing.
    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    /// The shared frame the acquisition loop publishes decoded samples to.
    pub fn samples(&self) -> Arc<RwLock<SampleFrame>> {
        Arc::clone(&self.result)
    }

    /// Subscribes to the event channel.
    pub fn subscribe(&self) -> broadcast::Receiver<DsoEvent> {
        self.events.subscribe()
    }

    /// Subscribes to the event channel as a `Stream`.
    pub fn events(&self) -> BroadcastStream<DsoEvent> {
        self.events.stream()
    }

    /// Emits the events describing the current settings. Called once on
    /// construction; frontends may re-request it after subscribing.
    pub fn announce_settings(&self) {
        let lengths = self.available_record_lengths();
        self.events
            .emit(DsoEvent::AvailableRecordLengthsChanged(lengths.to_vec()));
        self.update_samplerate_limits();
        self.events.emit(DsoEvent::RecordLengthChanged(
            lengths[self.settings.record_length_id],
        ));
        if !self.settings.is_roll_mode(self.spec) {
            self.events.emit(DsoEvent::RecordTimeChanged(
                self.settings.record_length(self.spec) as f64 / self.settings.samplerate.current,
            ));
        }
        self.events
            .emit(DsoEvent::SamplerateChanged(self.settings.samplerate.current));

        if self.spec.model == Model::Dso6022be {
            self.events.emit(DsoEvent::SamplerateSet {
                mode: 1,
                steps: vec![1.0, 2.0, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0, 240.0, 480.0],
            });
        }
    }

    /// Starts the sampling process.
    pub fn start_sampling(&mut self) -> Result<()> {
        self.sampling = true;
        self.events.emit(DsoEvent::SamplingStarted);
        Ok(())
    }

    /// Stops the sampling process.
    pub fn stop_sampling(&mut self) -> Result<()> {
        self.sampling = false;
        self.events.emit(DsoEvent::SamplingStopped);
        Ok(())
    }

    /// Sets the size of the sample buffer and returns the record length
    /// that has been set.
    pub fn set_record_length(&mut self, index: usize) -> Result<u32> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }

        self.update_record_length(index)?;
        self.restore_targets()?;
        let _ = self.set_pretrigger_position(self.settings.trigger.position);

        let length = self.settings.record_length(self.spec);
        self.events.emit(DsoEvent::RecordLengthChanged(length));
        Ok(length)
    }

    /// Sets the samplerate and returns the realized rate in S/s. A zero
    /// argument restores the stored target rate.
    pub fn set_samplerate(&mut self, samplerate: f64) -> Result<f64> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }

        let samplerate = if samplerate == 0.0 {
            self.settings.samplerate.target.samplerate
        } else {
            self.settings.samplerate.target.samplerate = samplerate;
            self.settings.samplerate.target.samplerate_set = true;
            samplerate
        };

        if self.spec.model != Model::Dso6022be {
            let divider = self.spec.buffer_dividers[self.settings.record_length_id] as f64;
            // When possible, enable fast rate if it is required to reach
            // the requested samplerate.
            let fast_rate = self.settings.used_channels <= 1
                && samplerate > self.spec.samplerate_single.max / divider;

            let (downsampler, best) = best_samplerate(
                self.spec,
                self.settings.record_length_id,
                samplerate,
                fast_rate,
                false,
            )
            .ok_or(DsoError::Parameter)?;

            self.update_samplerate(downsampler, fast_rate)?;
            Ok(best)
        } else {
            // The rate domain is a discrete table; pick the nearest entry.
            let steps = self.spec.sample_steps;
            let mut sample_id = 0;
            for (id, &step) in steps.iter().enumerate() {
                if (step - samplerate).abs() < (steps[sample_id] - samplerate).abs() {
                    sample_id = id;
                }
            }

            let div = self.spec.sample_div[sample_id];
            if let Some(cmd) = self.commands.timediv_mut() {
                cmd.set_div(div);
                self.commands.mark_control(ControlIndex::SetTimeDiv);
            }
            self.settings.samplerate.current = steps[sample_id];

            if !self.settings.is_roll_mode(self.spec) {
                // Provide margin for the software trigger.
                let length = self.settings.record_length(self.spec) - SAMPLE_MARGIN_6022;
                self.events.emit(DsoEvent::RecordTimeChanged(
                    length as f64 / self.settings.samplerate.current,
                ));
            }
            self.events
                .emit(DsoEvent::SamplerateChanged(self.settings.samplerate.current));

            Ok(self.settings.samplerate.current)
        }
    }

    /// Sets the duration of one acquisition by adapting the samplerate and
    /// returns the realized duration in seconds. A zero argument restores
    /// the stored target duration.
    pub fn set_record_time(&mut self, duration: f64) -> Result<f64> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }

        let duration = if duration == 0.0 {
            self.settings.samplerate.target.duration
        } else {
            self.settings.samplerate.target.duration = duration;
            self.settings.samplerate.target.samplerate_set = false;
            duration
        };

        if self.spec.model != Model::Dso6022be {
            // The maximum samplerate that would still provide the
            // requested duration.
            let max_samplerate = self.spec.samplerate_single.record_lengths
                [self.settings.record_length_id] as f64
                / duration;

            let divider = self.spec.buffer_dividers[self.settings.record_length_id] as f64;
            // Enable fast rate if the record time can't be met otherwise,
            // to improve resolution.
            let fast_rate = self.settings.used_channels <= 1
                && max_samplerate >= self.spec.samplerate_multi.base / divider;

            let (downsampler, best) = best_samplerate(
                self.spec,
                self.settings.record_length_id,
                max_samplerate,
                fast_rate,
                true,
            )
            .ok_or(DsoError::Parameter)?;

            self.update_samplerate(downsampler, fast_rate)?;
            Ok(self.settings.record_length(self.spec) as f64 / best)
        } else {
            // Only the 10240 sample record is usable; find the highest
            // samplerate that still fits the duration, with margin for the
            // software trigger.
            let sample_count = 10240 - SAMPLE_MARGIN_6022;
            let mut best_id = 0;
            for (id, &step) in self.spec.sample_steps.iter().enumerate() {
                if step * duration < sample_count as f64 {
                    best_id = id;
                }
            }

            let div = self.spec.sample_div[best_id];
            if let Some(cmd) = self.commands.timediv_mut() {
                cmd.set_div(div);
                self.commands.mark_control(ControlIndex::SetTimeDiv);
            }
            self.settings.samplerate.current = self.spec.sample_steps[best_id];

            self.events
                .emit(DsoEvent::SamplerateChanged(self.settings.samplerate.current));
            Ok(self.settings.samplerate.current)
        }
    }

    /// Enables or disables sampling of the given channel.
    pub fn set_channel_used(&mut self, channel: usize, used: bool) -> Result<()> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }
        if channel >= HANTEK_CHANNELS {
            return Err(DsoError::Parameter);
        }

        self.settings.voltage[channel].used = used;
        let channel_count = self.settings.voltage.iter().filter(|v| v.used).count() as u32;

        // Calculate the used-channels code for the command.
        let mut used_channels = bulk::USED_CH1;
        if self.settings.voltage[1].used {
            if self.settings.voltage[0].used {
                used_channels = bulk::USED_CH1CH2;
            } else if self.spec.bulk.set_channels == Some(BulkCode::BSetChannels) {
                // The 2250 uses a different code for channel 2 alone.
                used_channels = bulk::BUSED_CH2;
            } else {
                used_channels = bulk::USED_CH2;
            }
        }

        match self.spec.bulk.set_channels {
            Some(BulkCode::SetTriggerAndSamplerate) => {
                if let Some(cmd) = self.commands.trigger_and_samplerate_mut() {
                    cmd.set_used_channels(used_channels);
                    self.commands.mark_bulk(BulkCode::SetTriggerAndSamplerate);
                }
            }
            Some(BulkCode::BSetChannels) => {
                if let Some(cmd) = self.commands.channels_2250_mut() {
                    cmd.set_used_channels(used_channels);
                    self.commands.mark_bulk(BulkCode::BSetChannels);
                }
            }
            Some(BulkCode::ESetTriggerOrSamplerate) => {
                if let Some(cmd) = self.commands.trigger_5200_mut() {
                    cmd.set_used_channels(used_channels);
                    self.commands.mark_bulk(BulkCode::ESetTriggerOrSamplerate);
                }
            }
            _ => {}
        }

        // Check if fast rate mode availability changed.
        let fast_rate_changed = (self.settings.used_channels <= 1) != (channel_count <= 1);
        self.settings.used_channels = channel_count;
        if fast_rate_changed {
            self.update_samplerate_limits();
        }

        Ok(())
    }

    /// Sets the coupling for the given channel.
    pub fn set_coupling(&mut self, channel: usize, coupling: Coupling) -> Result<()> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }
        if channel >= HANTEK_CHANNELS {
            return Err(DsoError::Parameter);
        }

        if self.spec.model != Model::Dso6022be {
            if let Some(cmd) = self.commands.relays_mut() {
                cmd.set_coupling(channel, coupling != Coupling::Ac);
                self.commands.mark_control(ControlIndex::SetRelays);
            }
        }

        Ok(())
    }

    /// Sets the gain for the given channel and returns the realized V/div
    /// value.
    pub fn set_gain(&mut self, channel: usize, gain: f64) -> Result<f64> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }
        if channel >= HANTEK_CHANNELS {
            return Err(DsoError::Parameter);
        }

        // The lowest gain step at least as high as the requested value.
        let mut gain_id = self.spec.gain_steps.len() - 1;
        for (id, &step) in self.spec.gain_steps.iter().enumerate() {
            if step >= gain {
                gain_id = id;
                break;
            }
        }

        if self.spec.model == Model::Dso6022be {
            let div = self.spec.gain_div[gain_id];
            if channel == 0 {
                if let Some(cmd) = self.commands.voltdiv_ch1_mut() {
                    cmd.set_div(div);
                    self.commands.mark_control(ControlIndex::SetVoltDivCh1);
                }
            } else if let Some(cmd) = self.commands.voltdiv_ch2_mut() {
                cmd.set_div(div);
                self.commands.mark_control(ControlIndex::SetVoltDivCh2);
            }
        } else {
            let index = self.spec.gain_index[gain_id];
            if let Some(cmd) = self.commands.set_gain_mut() {
                cmd.set_gain(channel, index);
                self.commands.mark_bulk(BulkCode::SetGain);
            }

            if let Some(cmd) = self.commands.relays_mut() {
                cmd.set_below_1v(channel, gain_id < 3);
                cmd.set_below_100mv(channel, gain_id < 6);
                self.commands.mark_control(ControlIndex::SetRelays);
            }
        }

        self.settings.voltage[channel].gain_id = gain_id;
        self.set_offset(channel, self.settings.voltage[channel].offset)?;

        Ok(self.spec.gain_steps[gain_id])
    }

    /// Sets the offset for the given channel and returns the quantized
    /// offset that has been committed.
    pub fn set_offset(&mut self, channel: usize, offset: f64) -> Result<f64> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }
        if channel >= HANTEK_CHANNELS {
            return Err(DsoError::Parameter);
        }

        // The usable range is given by the calibration data.
        let (minimum, maximum) =
            self.offset_limits.range(channel, self.settings.voltage[channel].gain_id);
        let offset_value =
            (offset * (maximum - minimum) as f64 + minimum as f64 + 0.5) as u16;
        let offset_real = (offset_value - minimum) as f64 / (maximum - minimum) as f64;

        if self.spec.model != Model::Dso6022be {
            if let Some(cmd) = self.commands.offset_mut() {
                cmd.set_channel(channel, offset_value);
                self.commands.mark_control(ControlIndex::SetOffset);
            }
        }

        self.settings.voltage[channel].offset = offset;
        self.settings.voltage[channel].offset_real = offset_real;

        self.set_trigger_level(channel, self.settings.trigger.level[channel])?;

        Ok(offset_real)
    }

    /// Sets the trigger mode.
    pub fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }

        self.settings.trigger.mode = mode;
        Ok(())
    }

    /// Selects the trigger source: a channel, or one of the special
    /// sources (EXT, EXT/10) when `special` is set.
    pub fn set_trigger_source(&mut self, special: bool, id: u32) -> Result<()> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }
        if (!special && id >= HANTEK_CHANNELS as u32)
            || (special && id >= HANTEK_SPECIAL_CHANNELS as u32)
        {
            return Err(DsoError::Parameter);
        }

        match self.spec.bulk.set_trigger {
            Some(BulkCode::SetTriggerAndSamplerate) => {
                if let Some(cmd) = self.commands.trigger_and_samplerate_mut() {
                    cmd.set_trigger_source(if special { 3 + id as u8 } else { 1 - id as u8 });
                    self.commands.mark_bulk(BulkCode::SetTriggerAndSamplerate);
                }
            }
            Some(BulkCode::CSetTriggerOrSamplerate) => {
                if let Some(cmd) = self.commands.trigger_2250_mut() {
                    cmd.set_trigger_source(if special { 0 } else { 2 + id as u8 });
                    self.commands.mark_bulk(BulkCode::CSetTriggerOrSamplerate);
                }
            }
            Some(BulkCode::ESetTriggerOrSamplerate) => {
                if let Some(cmd) = self.commands.trigger_5200_mut() {
                    cmd.set_trigger_source(if special { 3 + id as u8 } else { 1 - id as u8 });
                    self.commands.mark_bulk(BulkCode::ESetTriggerOrSamplerate);
                }
            }
            _ => return Err(DsoError::Unsupported),
        }

        if let Some(cmd) = self.commands.relays_mut() {
            cmd.set_trigger(special);
            self.commands.mark_control(ControlIndex::SetRelays);
        }

        self.settings.trigger.special = special;
        self.settings.trigger.source = id;

        // Apply the trigger level of the new source.
        if special {
            if let Some(cmd) = self.commands.offset_mut() {
                cmd.set_trigger(TRIGGER_LEVEL_SPECIAL);
                self.commands.mark_control(ControlIndex::SetOffset);
            }
        } else {
            self.set_trigger_level(id as usize, self.settings.trigger.level[id as usize])?;
        }

        Ok(())
    }

    /// Sets the trigger level of the given channel in V and returns the
    /// level corresponding to the committed raw value.
    pub fn set_trigger_level(&mut self, channel: usize, level: f64) -> Result<f64> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }
        if channel >= HANTEK_CHANNELS {
            return Err(DsoError::Parameter);
        }

        let (minimum, maximum) = match self.spec.model {
            // 10-bit models use the same range as the offsets.
            Model::Dso5200 | Model::Dso5200a => self
                .offset_limits
                .range(channel, self.settings.voltage[channel].gain_id),
            _ => TRIGGER_LEVEL_8BIT,
        };

        let gain_step = self.spec.gain_steps[self.settings.voltage[channel].gain_id];
        let offset_real = self.settings.voltage[channel].offset_real;
        let range = (maximum - minimum) as f64;

        let raw = ((offset_real + level / gain_step) * range + 0.5) as i64 + minimum as i64;
        let level_value = raw.clamp(minimum as i64, maximum as i64) as u16;

        // Commit only when the channel drives the trigger.
        if !self.settings.trigger.special
            && channel as u32 == self.settings.trigger.source
            && self.spec.model != Model::Dso6022be
        {
            if let Some(cmd) = self.commands.offset_mut() {
                cmd.set_trigger(level_value);
                self.commands.mark_control(ControlIndex::SetOffset);
            }
        }

        self.settings.trigger.level[channel] = level;
        Ok(((level_value - minimum) as f64 / range - offset_real) * gain_step)
    }

    /// Sets the trigger slope.
    pub fn set_trigger_slope(&mut self, slope: Slope) -> Result<()> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }

        match self.spec.bulk.set_trigger {
            Some(BulkCode::SetTriggerAndSamplerate) => {
                if let Some(cmd) = self.commands.trigger_and_samplerate_mut() {
                    cmd.set_trigger_slope(slope);
                    self.commands.mark_bulk(BulkCode::SetTriggerAndSamplerate);
                }
            }
            Some(BulkCode::CSetTriggerOrSamplerate) => {
                if let Some(cmd) = self.commands.trigger_2250_mut() {
                    cmd.set_trigger_slope(slope);
                    self.commands.mark_bulk(BulkCode::CSetTriggerOrSamplerate);
                }
            }
            Some(BulkCode::ESetTriggerOrSamplerate) => {
                if let Some(cmd) = self.commands.trigger_5200_mut() {
                    cmd.set_trigger_slope(slope);
                    self.commands.mark_bulk(BulkCode::ESetTriggerOrSamplerate);
                }
            }
            _ => return Err(DsoError::Unsupported),
        }

        self.settings.trigger.slope = slope;
        Ok(())
    }

    /// Sets the pretrigger position in seconds and returns the position
    /// that has been set.
    pub fn set_pretrigger_position(&mut self, position: f64) -> Result<f64> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }

        // All trigger positions are measured in samples.
        let mut position_samples = position * self.settings.samplerate.current;
        let record_length = self.settings.record_length(self.spec);
        let roll_mode = record_length == ROLL_RECORD_LENGTH;
        // Fast rate mode splits the buffer across both banks.
        if self.settings.fast_rate() {
            position_samples /= HANTEK_CHANNELS as f64;
        }
        let position_samples = position_samples as u32;

        match self.spec.bulk.set_pretrigger {
            Some(BulkCode::SetTriggerAndSamplerate) => {
                // Start point depending on the record length.
                let value = if roll_mode {
                    0x1
                } else {
                    0x7ffffu32
                        .wrapping_sub(record_length)
                        .wrapping_add(position_samples)
                };
                if let Some(cmd) = self.commands.trigger_and_samplerate_mut() {
                    cmd.set_trigger_position(value);
                    self.commands.mark_bulk(BulkCode::SetTriggerAndSamplerate);
                }
            }
            Some(BulkCode::FSetBuffer) => {
                // Inverse, 19-bit positions.
                let pre = 0x7ffffu32
                    .wrapping_sub(record_length)
                    .wrapping_add(position_samples);
                let post = 0x7ffff - position_samples;
                if let Some(cmd) = self.commands.buffer_2250_mut() {
                    cmd.set_trigger_position_pre(pre);
                    cmd.set_trigger_position_post(post);
                    self.commands.mark_bulk(BulkCode::FSetBuffer);
                }
            }
            Some(BulkCode::ESetTriggerOrSamplerate) => {
                // Inverse, 16-bit positions.
                let pre = 0xffffu16
                    .wrapping_sub(record_length as u16)
                    .wrapping_add(position_samples as u16);
                let post = 0xffffu16.wrapping_sub(position_samples as u16);
                if let Some(cmd) = self.commands.buffer_5200_mut() {
                    cmd.set_trigger_position_pre(pre);
                    cmd.set_trigger_position_post(post);
                    self.commands.mark_bulk(BulkCode::DSetBuffer);
                }
            }
            _ => return Err(DsoError::Unsupported),
        }

        self.settings.trigger.position = position;
        Ok(position_samples as f64 / self.settings.samplerate.current)
    }

    /// Marks the force-trigger command pending.
    pub fn force_trigger(&mut self) -> Result<()> {
        self.commands.mark_bulk(BulkCode::ForceTrigger);
        Ok(())
    }

    /// Parses `send bulk <hex>` / `send control <code> <hex>` debug
    /// commands, overwriting the payload raw and marking it pending.
    pub fn string_command(&mut self, command: &str) -> Result<()> {
        if !self.device.is_connected() {
            return Err(DsoError::Connection);
        }

        let parts: Vec<&str> = command.split_whitespace().collect();
        if parts.is_empty() {
            return Err(DsoError::Parameter);
        }
        if parts[0] != "send" {
            return Err(DsoError::Unsupported);
        }
        if parts.len() < 3 {
            return Err(DsoError::Parameter);
        }

        match parts[1] {
            "bulk" => {
                let data = parse_hex(&parts[2..]).ok_or(DsoError::Parameter)?;
                let code = *data.first().ok_or(DsoError::Parameter)?;
                if self.commands.write_bulk_raw(code, &data) {
                    Ok(())
                } else {
                    Err(DsoError::Unsupported)
                }
            }
            "control" => {
                if parts.len() < 4 {
                    return Err(DsoError::Parameter);
                }
                let code = parse_hex(&parts[2..3])
                    .and_then(|bytes| bytes.first().copied())
                    .ok_or(DsoError::Parameter)?;
                let data = parse_hex(&parts[3..]).ok_or(DsoError::Parameter)?;
                if self.commands.write_control_raw(code, &data) {
                    Ok(())
                } else {
                    Err(DsoError::Unsupported)
                }
            }
            _ => Err(DsoError::Unsupported),
        }
    }

    /// Updates the record length payload without touching dependent
    /// settings.
    fn update_record_length(&mut self, index: usize) -> Result<u32> {
        let limits = self.settings.samplerate.limits.limits(self.spec);
        if index >= limits.record_lengths.len() {
            return Err(DsoError::Parameter);
        }

        match self.spec.bulk.set_record_length {
            Some(BulkCode::SetTriggerAndSamplerate) => {
                if let Some(cmd) = self.commands.trigger_and_samplerate_mut() {
                    cmd.set_record_length(index as u8);
                    self.commands.mark_bulk(BulkCode::SetTriggerAndSamplerate);
                }
            }
            Some(BulkCode::DSetBuffer) => {
                if self.spec.bulk.set_pretrigger == Some(BulkCode::FSetBuffer) {
                    if let Some(cmd) = self.commands.record_length_2250_mut() {
                        cmd.set_record_length(index as u8);
                        self.commands.mark_bulk(BulkCode::DSetBuffer);
                    }
                } else if let Some(cmd) = self.commands.buffer_5200_mut() {
                    cmd.set_used_pre(true);
                    cmd.set_used_post(true);
                    cmd.set_record_length(index as u8);
                    self.commands.mark_bulk(BulkCode::DSetBuffer);
                }
            }
            _ => return Err(DsoError::Unsupported),
        }

        // Adapt the samplerate limits if the buffer divider changed.
        let divider_changed = self.spec.buffer_dividers[index]
            != self.spec.buffer_dividers[self.settings.record_length_id];

        self.settings.record_length_id = index;

        if divider_changed {
            self.update_samplerate_limits();
            self.restore_targets()?;
        }

        Ok(limits.record_lengths[index])
    }

    /// Re-applies the last samplerate or duration target after a divider
    /// change.
    fn restore_targets(&mut self) -> Result<()> {
        if self.settings.samplerate.target.samplerate_set {
            self.set_samplerate(0.0)?;
        } else {
            self.set_record_time(0.0)?;
        }
        Ok(())
    }

    /// Emits the currently reachable samplerate range.
    pub(crate) fn update_samplerate_limits(&self) {
        let divider = self.spec.buffer_dividers[self.settings.record_length_id] as f64;
        let limits = if self.settings.used_channels <= 1 {
            &self.spec.samplerate_multi
        } else {
            &self.spec.samplerate_single
        };
        self.events.emit(DsoEvent::SamplerateLimitsChanged {
            min: self.spec.samplerate_single.base
                / self.spec.samplerate_single.max_downsampler as f64
                / divider,
            max: limits.max / divider,
        });
    }

    /// Writes a solved downsampler into the model's samplerate command and
    /// updates the dependent settings.
    fn update_samplerate(&mut self, downsampler: u32, fast_rate: bool) -> Result<()> {
        let limits_selection = if fast_rate {
            LimitsSelection::Multi
        } else {
            LimitsSelection::Single
        };
        let limits = self.spec.limits(fast_rate);

        let downsampler = match self.spec.bulk.set_samplerate {
            Some(BulkCode::SetTriggerAndSamplerate) => {
                let mut downsampler = downsampler;
                let mut downsampler_value: u16 = 0;
                let mut samplerate_id: u8 = 0;
                let mut downsampling = false;

                if downsampler <= 5 {
                    // Factors up to 5 are carried by the samplerate id.
                    if downsampler == 0 && limits.base >= limits.max {
                        samplerate_id = 1;
                    } else if downsampler <= 2 {
                        samplerate_id = downsampler as u8;
                    } else {
                        // 3 and 4 are not representable.
                        samplerate_id = 3;
                        downsampler = 5;
                        downsampler_value = 0xffff;
                    }
                } else {
                    // Above 5 the factor is carried directly, even values
                    // only.
                    downsampler &= !0x0001;
                    downsampler_value = (0x10001 - (downsampler >> 1)) as u16;
                    downsampling = true;
                }

                if let Some(cmd) = self.commands.trigger_and_samplerate_mut() {
                    cmd.set_downsampling_mode(downsampling);
                    cmd.set_samplerate_id(samplerate_id);
                    cmd.set_downsampler(downsampler_value);
                    // Kept off for protocol compatibility.
                    cmd.set_fast_rate(false);
                    self.commands.mark_bulk(BulkCode::SetTriggerAndSamplerate);
                }
                downsampler
            }
            Some(BulkCode::CSetTriggerOrSamplerate) => {
                // Split the divider into the fast and slow values; the
                // fast value stays at 4 (or 3) for slow rates.
                let value_slow = ((downsampler as i64 - 3) / 2).max(0);
                let value_fast = (downsampler as i64 - value_slow * 2) as u8;

                if let Some(cmd) = self.commands.samplerate_5200_mut() {
                    cmd.set_samplerate_fast(4 - value_fast);
                    cmd.set_samplerate_slow(if value_slow == 0 {
                        0
                    } else {
                        (0xffff - value_slow) as u16
                    });
                    self.commands.mark_bulk(BulkCode::CSetTriggerOrSamplerate);
                }
                if let Some(cmd) = self.commands.trigger_5200_mut() {
                    cmd.set_fast_rate(fast_rate);
                    self.commands.mark_bulk(BulkCode::ESetTriggerOrSamplerate);
                }
                downsampler
            }
            Some(BulkCode::ESetTriggerOrSamplerate) => {
                if let Some(cmd) = self.commands.samplerate_2250_mut() {
                    cmd.set_downsampling(downsampler >= 1);
                    cmd.set_samplerate(if downsampler > 1 {
                        (0x10001 - downsampler) as u16
                    } else {
                        0
                    });
                    cmd.set_fast_rate(fast_rate);
                    self.commands.mark_bulk(BulkCode::ESetTriggerOrSamplerate);
                }
                downsampler
            }
            _ => return Err(DsoError::Unsupported),
        };

        let fast_rate_changed = limits_selection != self.settings.samplerate.limits;
        if fast_rate_changed {
            self.settings.samplerate.limits = limits_selection;
        }

        let divider = self.spec.buffer_dividers[self.settings.record_length_id] as f64;
        self.settings.samplerate.downsampler = downsampler;
        self.settings.samplerate.current = if downsampler != 0 {
            limits.base / divider / downsampler as f64
        } else {
            limits.max / divider
        };

        let _ = self.set_pretrigger_position(self.settings.trigger.position);

        if fast_rate_changed {
            let lengths = self.available_record_lengths();
            self.events
                .emit(DsoEvent::AvailableRecordLengthsChanged(lengths.to_vec()));
            self.events.emit(DsoEvent::RecordLengthChanged(
                lengths[self.settings.record_length_id],
            ));
        }

        if !self.settings.is_roll_mode(self.spec) {
            self.events.emit(DsoEvent::RecordTimeChanged(
                self.settings.record_length(self.spec) as f64 / self.settings.samplerate.current,
            ));
        }
        self.events
            .emit(DsoEvent::SamplerateChanged(self.settings.samplerate.current));

        Ok(())
    }
}

/// Parses whitespace-separated hex byte tokens; multi-byte tokens are
/// split into pairs of digits.
fn parse_hex(tokens: &[&str]) -> Option<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in tokens {
        let token = token.strip_prefix("0x").unwrap_or(token);
        if token.is_empty() || token.len() % 2 != 0 || !token.is_ascii() {
            return None;
        }
        for pair in 0..token.len() / 2 {
            let byte = u8::from_str_radix(&token[pair * 2..pair * 2 + 2], 16).ok()?;
            bytes.push(byte);
        }
    }
    Some(bytes)
}

#[cfg(test)]
mod test {
    use super::parse_hex;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex(&["01", "ff"]), Some(vec![0x01, 0xff]));
        assert_eq!(parse_hex(&["0102ff"]), Some(vec![0x01, 0x02, 0xff]));
        assert_eq!(parse_hex(&["0x0b"]), Some(vec![0x0b]));
        assert_eq!(parse_hex(&["1"]), None);
        assert_eq!(parse_hex(&["zz"]), None);
    }
}
