//! The periodic acquisition loop.
//!
//! Each tick drains the pending command set, advances the capture state
//! machine (standard or roll mode, selected by the current record length)
//! and re-arms itself after `cycle_time`. Everything on the tick path is
//! a blocking transfer; a `NoDevice` from any of them terminates the loop
//! and reports a communication error.

use std::sync::RwLock;
use std::time::Duration;

use log::{debug, warn};

use crate::event::DsoEvent;
use crate::protocol::bulk::BulkCode;
use crate::protocol::capture::{decode_trigger_point, CaptureState, CaptureStateResponse};
use crate::protocol::device::{Model, ROLL_RECORD_LENGTH};
use crate::protocol::samples::{decode_into, ChannelDecode};
use crate::protocol::HANTEK_CHANNELS;
use crate::settings::TriggerMode;
use crate::transport::{TransportError, UsbDevice};
use crate::{HantekDsoControl, Result, SampleFrame};

/// Number of ticks after trigger arming before an auto-mode capture is
/// force-triggered.
const FORCE_TRIGGER_CYCLES: u32 = 8;

/// The round-robin states of roll mode, advancing one per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RollState {
    StartSampling,
    EnableTrigger,
    ForceTrigger,
    GetData,
}

impl RollState {
    fn next(self) -> RollState {
        match self {
            RollState::StartSampling => RollState::EnableTrigger,
            RollState::EnableTrigger => RollState::ForceTrigger,
            RollState::ForceTrigger => RollState::GetData,
            RollState::GetData => RollState::StartSampling,
        }
    }
}

/// Takes the write guard even from a poisoned lock; the frame contents
/// stay well-formed regardless of a panicking reader.
fn write_frame(lock: &RwLock<SampleFrame>) -> std::sync::RwLockWriteGuard<'_, SampleFrame> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<D: UsbDevice> HantekDsoControl<D> {
    /// Runs the acquisition loop until a fatal transport error terminates
    /// it. The loop re-arms itself after every tick.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.tick()?;
            tokio::time::sleep(Duration::from_millis(self.cycle_time_ms)).await;
        }
    }

    /// One acquisition iteration: flush pending commands, then advance the
    /// capture state machine.
    pub fn tick(&mut self) -> Result<()> {
        self.drain_pending()?;

        if self.settings.record_length(self.spec) == ROLL_RECORD_LENGTH {
            self.roll_tick()?;
        } else {
            self.standard_tick()?;
        }

        self.update_interval();
        Ok(())
    }

    /// The tick period in milliseconds, recomputed after every tick.
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    /// Sends every pending bulk and control payload, in opcode/index
    /// order. A failed send keeps the payload pending; only `NoDevice` is
    /// fatal.
    fn drain_pending(&mut self) -> Result<()> {
        for code in self.commands.pending_bulk() {
            let Some(bytes) = self.commands.bulk_bytes(code) else {
                continue;
            };

            debug!("sending bulk command {:02x?}", bytes.as_ref());
            match self.device.bulk_command(&bytes) {
                Ok(()) => self.commands.clear_bulk(code),
                Err(error) => {
                    warn!("sending bulk command {:#04x} failed: {}", code as u8, error);
                    if error.is_fatal() {
                        self.events.emit(DsoEvent::CommunicationError);
                        return Err(error.into());
                    }
                }
            }
        }

        for index in self.commands.pending_control() {
            let Some((code, bytes)) = self.commands.control_bytes(index) else {
                continue;
            };

            debug!("sending control command {:#04x}: {:02x?}", code, bytes.as_ref());
            match self.device.control_write(code, &bytes) {
                Ok(()) => self.commands.clear_control(index),
                Err(error) => {
                    warn!("sending control command {:#04x} failed: {}", code, error);
                    if error.is_fatal() {
                        self.events.emit(DsoEvent::CommunicationError);
                        return Err(error.into());
                    }
                }
            }
        }

        Ok(())
    }

    /// Sends one of the fixed (setter-free) bulk commands. Returns whether
    /// the command reached the device; non-fatal errors are logged only.
    fn send_bulk_fixed(&mut self, code: BulkCode) -> Result<bool> {
        let Some(bytes) = self.commands.bulk_bytes(code) else {
            return Ok(false);
        };

        match self.device.bulk_command(&bytes) {
            Ok(()) => Ok(true),
            Err(error) => {
                warn!("sending bulk command {:#04x} failed: {}", code as u8, error);
                if error.is_fatal() {
                    self.events.emit(DsoEvent::CommunicationError);
                    return Err(error.into());
                }
                Ok(false)
            }
        }
    }

    /// Polls the device's capture state and stores the decoded trigger
    /// point. The 6022BE has no capture state command; it is always ready.
    fn poll_capture_state(&mut self) -> Result<Option<CaptureState>, TransportError> {
        if self.spec.model == Model::Dso6022be {
            return Ok(Some(CaptureState::Ready));
        }

        let Some(bytes) = self.commands.bulk_bytes(BulkCode::GetCaptureState) else {
            return Ok(None);
        };
        self.device.bulk_command(&bytes)?;

        let mut buffer = [0u8; crate::protocol::capture::CAPTURE_STATE_RESPONSE_LEN];
        let count = self.device.bulk_read(&mut buffer)?;

        let response = match CaptureStateResponse::parse(&buffer[..count]) {
            Ok(response) => response,
            Err(error) => {
                warn!("malformed capture state response: {}", error);
                return Ok(None);
            }
        };

        self.settings.trigger.point = decode_trigger_point(response.trigger_point);

        match CaptureState::from_code(response.state) {
            Ok(state) => Ok(Some(state)),
            Err(error) => {
                debug!("{}", error);
                Ok(None)
            }
        }
    }

    /// The total number of samples the device will deliver, and whether
    /// fast rate mode is active.
    fn sample_count(&self) -> (usize, bool) {
        let record_length = self.settings.record_length(self.spec);
        let fast_rate = self.settings.fast_rate();

        let total = if record_length == ROLL_RECORD_LENGTH {
            self.device.packet_size()
        } else if fast_rate {
            record_length as usize
        } else {
            record_length as usize * HANTEK_CHANNELS
        };

        (total, fast_rate)
    }

    /// Fetches the capture buffer, decodes it and publishes the frame.
    /// With `process` unset the buffer is drained but discarded.
    fn get_samples(&mut self, process: bool) -> Result<(), TransportError> {
        if self.spec.model != Model::Dso6022be {
            let Some(bytes) = self.commands.bulk_bytes(BulkCode::GetData) else {
                return Ok(());
            };
            self.device.bulk_command(&bytes)?;
        }

        let (current_count, fast_rate) = self.sample_count();

        // Use the larger of the current and previous expected counts, so
        // no samples from the previous configuration remain in the scope
        // buffer.
        let total_sample_count = if current_count < self.previous_sample_count {
            let total = self.previous_sample_count;
            self.previous_sample_count = current_count;
            total
        } else {
            self.previous_sample_count = current_count;
            current_count
        };

        let mut data_length = total_sample_count;
        if self.spec.sample_bits > 8 {
            data_length *= 2;
        }

        let mut data = vec![0u8; data_length];
        let received = self.device.bulk_read_multi(&mut data)?;

        if !process {
            return Ok(());
        }

        // How much did we really receive?
        let data_length = received;
        let total_sample_count = if self.spec.sample_bits > 8 {
            data_length / 2
        } else {
            data_length
        };

        let mut channels = [ChannelDecode::default(); HANTEK_CHANNELS];
        for (channel, decode) in channels.iter_mut().enumerate() {
            decode.used = self.settings.voltage[channel].used;
            decode.gain_id = self.settings.voltage[channel].gain_id;
            decode.offset_real = self.settings.voltage[channel].offset_real;
        }

        {
            let mut frame = write_frame(&self.result);
            frame.samplerate = self.settings.samplerate.current;
            frame.append = self.settings.is_roll_mode(self.spec);
            decode_into(
                self.spec,
                &channels,
                fast_rate,
                self.settings.trigger.point,
                &data[..data_length],
                total_sample_count,
                &mut frame.data,
            );
        }

        self.events.emit(DsoEvent::SamplesAvailable);
        Ok(())
    }

    /// Retrieval wrapper applying the tick-level error policy: fatal
    /// errors terminate, everything else logs and skips this tick.
    fn get_samples_checked(&mut self, process: bool) -> Result<()> {
        if let Err(error) = self.get_samples(process) {
            warn!("getting sample data failed: {}", error);
            if error.is_fatal() {
                self.events.emit(DsoEvent::CommunicationError);
                return Err(error.into());
            }
        }
        Ok(())
    }

    /// Standard mode: poll the capture state and react to it.
    fn standard_tick(&mut self) -> Result<()> {
        // Mode changes restart roll mode from its first state.
        self.roll_state = RollState::StartSampling;

        let last_state = self.capture_state;
        match self.poll_capture_state() {
            Ok(state) => {
                if state != last_state {
                    debug!("capture state changed to {:?}", state);
                }
                self.capture_state = state;
            }
            Err(error) => {
                warn!("getting capture state failed: {}", error);
                if error.is_fatal() {
                    self.events.emit(DsoEvent::CommunicationError);
                    return Err(error.into());
                }
                self.capture_state = None;
            }
        }

        match self.capture_state {
            Some(state) if state.is_ready() => {
                self.get_samples_checked(self.sampling_started)?;

                if self.settings.trigger.mode == TriggerMode::Single && self.sampling_started {
                    self.stop_sampling()?;
                }
                self.sampling_started = false;

                // Start the next capture right away when still sampling.
                if self.sampling {
                    self.standard_waiting()?;
                }
            }
            Some(CaptureState::Waiting) => self.standard_waiting()?,
            _ => {}
        }

        Ok(())
    }

    /// The WAITING branch of standard mode: manage trigger arming and
    /// (re)start captures.
    fn standard_waiting(&mut self) -> Result<()> {
        self.previous_sample_count = self.sample_count().0;

        if self.sampling_started && self.last_trigger_mode == Some(self.settings.trigger.mode) {
            self.cycle_counter += 1;

            if self.cycle_counter == self.start_cycle
                && self.settings.record_length(self.spec) != ROLL_RECORD_LENGTH
            {
                // The buffer has refilled since the capture started.
                if self.send_bulk_fixed(BulkCode::TriggerEnabled)? {
                    debug!("enabling trigger");
                }
            } else if self.cycle_counter >= self.start_cycle + FORCE_TRIGGER_CYCLES
                && self.settings.trigger.mode == TriggerMode::Auto
            {
                if self.send_bulk_fixed(BulkCode::ForceTrigger)? {
                    debug!("forcing trigger");
                }
            }

            // Keep polling for a while before considering a restart.
            if self.cycle_counter < 20 || (self.cycle_counter as u64) < 4000 / self.cycle_time_ms {
                return Ok(());
            }
        }

        if !self.send_bulk_fixed(BulkCode::CaptureStart)? {
            return Ok(());
        }
        debug!("starting to capture");

        self.sampling_started = true;
        self.cycle_counter = 0;
        self.start_cycle =
            (self.settings.trigger.position * 1000.0 / self.cycle_time_ms as f64) as u32 + 1;
        self.last_trigger_mode = Some(self.settings.trigger.mode);
        Ok(())
    }

    /// Roll mode: a four-state round robin, one state per tick.
    fn roll_tick(&mut self) -> Result<()> {
        self.capture_state = Some(CaptureState::Waiting);
        let mut advance = true;

        match self.roll_state {
            RollState::StartSampling => {
                if !self.sampling {
                    // Hold here while paused.
                    advance = false;
                } else {
                    self.previous_sample_count = self.sample_count().0;

                    if self.send_bulk_fixed(BulkCode::CaptureStart)? {
                        debug!("starting to capture");
                        self.sampling_started = true;
                    }
                }
            }
            RollState::EnableTrigger => {
                if self.send_bulk_fixed(BulkCode::TriggerEnabled)? {
                    debug!("enabling trigger");
                }
            }
            RollState::ForceTrigger => {
                if self.send_bulk_fixed(BulkCode::ForceTrigger)? {
                    debug!("forcing trigger");
                }
            }
            RollState::GetData => {
                self.get_samples_checked(self.sampling_started)?;

                if self.settings.trigger.mode == TriggerMode::Single && self.sampling_started {
                    self.stop_sampling()?;
                }
                self.sampling_started = false;
            }
        }

        if advance {
            self.roll_state = self.roll_state.next();
        }

        Ok(())
    }

    /// Recomputes the tick period so the device buffer is polled roughly
    /// four times per fill, clamped to [10, 1000] ms.
    pub(crate) fn update_interval(&mut self) {
        let record_length = self.settings.record_length(self.spec);

        let cycle_time = if record_length == ROLL_RECORD_LENGTH {
            let channels = if self.settings.fast_rate() {
                1.0
            } else {
                HANTEK_CHANNELS as f64
            };
            self.device.packet_size() as f64 / channels / self.settings.samplerate.current * 250.0
        } else {
            record_length as f64 / self.settings.samplerate.current * 250.0
        };

        self.cycle_time_ms = (cycle_time as i64).clamp(10, 1000) as u64;
    }
}
