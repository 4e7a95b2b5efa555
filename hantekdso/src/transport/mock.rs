//! Provides a mock device for testing purposes.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::bulk::BulkCode;
use crate::protocol::capture::{CaptureState, CAPTURE_STATE_RESPONSE_LEN};
use crate::protocol::control::{ControlCode, OFFSET_LIMITS_LEN, VALUE_OFFSET_LIMITS};

use super::{TransportError, UsbDevice};

/// A scriptable [`UsbDevice`]: records every transmitted command and plays
/// back queued capture states, sample buffers and the calibration block.
pub struct MockDevice {
    pub model_id: u32,
    pub packet_size: usize,
    pub connected: bool,

    /// Bulk command buffers in transmission order.
    pub bulk_log: Vec<Bytes>,
    /// `(code, payload)` control writes in transmission order.
    pub control_log: Vec<(u8, Bytes)>,

    /// Queued `(state code, encoded trigger point)` capture state answers.
    /// When empty, `default_capture_state` repeats.
    pub capture_states: VecDeque<(u8, u32)>,
    pub default_capture_state: (u8, u32),

    /// Raw buffer returned by `bulk_read_multi`.
    pub sample_data: Vec<u8>,

    /// Calibration block served for the offset-limits control read.
    pub offset_limits: [u8; OFFSET_LIMITS_LEN],

    /// Errors injected into the next bulk commands, drained front first.
    pub bulk_errors: VecDeque<TransportError>,

    staged_read: Option<Bytes>,
}

impl MockDevice {
    pub fn new(model_id: u32) -> Self {
        MockDevice {
            model_id,
            packet_size: 512,
            connected: true,
            bulk_log: Vec::new(),
            control_log: Vec::new(),
            capture_states: VecDeque::new(),
            default_capture_state: (CaptureState::Waiting as u8, 0),
            sample_data: Vec::new(),
            offset_limits: full_range_limits(),
            bulk_errors: VecDeque::new(),
            staged_read: None,
        }
    }

    /// Narrows the calibration window of one channel/gain pair.
    pub fn set_offset_limits(&mut self, channel: usize, gain: usize, start: u16, end: u16) {
        let base = (channel * 9 + gain) * 4;
        self.offset_limits[base..base + 2].copy_from_slice(&start.to_be_bytes());
        self.offset_limits[base + 2..base + 4].copy_from_slice(&end.to_be_bytes());
    }

    pub fn push_capture_state(&mut self, state: CaptureState, trigger_point: u32) {
        self.capture_states.push_back((state as u8, trigger_point));
    }

    /// Bulk commands whose first byte matches `code`.
    pub fn bulk_sent(&self, code: BulkCode) -> Vec<Bytes> {
        self.bulk_log
            .iter()
            .filter(|b| b.first() == Some(&(code as u8)))
            .cloned()
            .collect()
    }

    /// Control writes whose request code matches `code`.
    pub fn control_sent(&self, code: ControlCode) -> Vec<Bytes> {
        self.control_log
            .iter()
            .filter(|(c, _)| *c == code as u8)
            .map(|(_, b)| b.clone())
            .collect()
    }

    fn stage_capture_state(&mut self) {
        let (state, trigger_point) = self
            .capture_states
            .pop_front()
            .unwrap_or(self.default_capture_state);

        let mut response = BytesMut::with_capacity(CAPTURE_STATE_RESPONSE_LEN);
        response.put_u8(state);
        response.put_u8(0);
        response.put_u8(trigger_point as u8);
        response.put_u8((trigger_point >> 8) as u8);
        response.put_u8((trigger_point >> 16) as u8);
        response.resize(CAPTURE_STATE_RESPONSE_LEN, 0);
        self.staged_read = Some(response.freeze());
    }
}

fn full_range_limits() -> [u8; OFFSET_LIMITS_LEN] {
    let mut block = [0u8; OFFSET_LIMITS_LEN];
    for bound in block.chunks_exact_mut(4) {
        bound[2] = 0xff;
        bound[3] = 0xff;
    }
    block
}

impl UsbDevice for MockDevice {
    fn unique_model_id(&self) -> u32 {
        self.model_id
    }

    fn packet_size(&self) -> usize {
        self.packet_size
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn bulk_command(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if let Some(error) = self.bulk_errors.pop_front() {
            return Err(error);
        }
        if !self.connected {
            return Err(TransportError::NoDevice);
        }

        self.bulk_log.push(Bytes::copy_from_slice(data));
        if data.first() == Some(&(BulkCode::GetCaptureState as u8)) {
            self.stage_capture_state();
        }
        Ok(())
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NoDevice);
        }

        let staged = self.staged_read.take().ok_or(TransportError::Timeout)?;
        let count = staged.len().min(buf.len());
        buf[..count].copy_from_slice(&staged[..count]);
        Ok(count)
    }

    fn bulk_read_multi(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NoDevice);
        }

        let count = self.sample_data.len().min(buf.len());
        buf[..count].copy_from_slice(&self.sample_data[..count]);
        Ok(count)
    }

    fn control_write(&mut self, code: u8, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NoDevice);
        }

        self.control_log.push((code, Bytes::copy_from_slice(data)));
        Ok(())
    }

    fn control_read(
        &mut self,
        code: u8,
        buf: &mut [u8],
        value: u16,
    ) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NoDevice);
        }

        if code == ControlCode::Value as u8 && value == VALUE_OFFSET_LIMITS {
            let count = self.offset_limits.len().min(buf.len());
            buf[..count].copy_from_slice(&self.offset_limits[..count]);
            return Ok(count);
        }

        Err(TransportError::Timeout)
    }
}
