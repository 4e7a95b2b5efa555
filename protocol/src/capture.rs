//! Capture state reporting and trigger point recovery.

use crate::ProtocolError;

/// Length of the `GetCaptureState` bulk response.
pub const CAPTURE_STATE_RESPONSE_LEN: usize = 512;

/// Position of the device in its per-acquisition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Waiting = 0,
    Sampling = 1,
    Ready = 2,
    Ready2250 = 3,
    Ready5200 = 7,
}

impl CaptureState {
    pub fn from_code(code: u8) -> Result<CaptureState, ProtocolError> {
        match code {
            0 => Ok(CaptureState::Waiting),
            1 => Ok(CaptureState::Sampling),
            2 => Ok(CaptureState::Ready),
            3 => Ok(CaptureState::Ready2250),
            7 => Ok(CaptureState::Ready5200),
            code => Err(ProtocolError::UnknownCaptureState(code)),
        }
    }

    /// Whether the capture buffer holds a completed acquisition.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            CaptureState::Ready | CaptureState::Ready2250 | CaptureState::Ready5200
        )
    }
}

/// Parsed `GetCaptureState` response: the raw state code and the encoded
/// trigger point, still in the device's bit-inversion form.
#[derive(Debug, Clone, Copy)]
pub struct CaptureStateResponse {
    pub state: u8,
    pub trigger_point: u32,
}

impl CaptureStateResponse {
    pub fn parse(data: &[u8]) -> Result<CaptureStateResponse, ProtocolError> {
        if data.len() < 5 {
            return Err(ProtocolError::TruncatedResponse {
                expected: 5,
                actual: data.len(),
            });
        }

        Ok(CaptureStateResponse {
            state: data[0],
            trigger_point: data[2] as u32 | (data[3] as u32) << 8 | (data[4] as u32) << 16,
        })
    }
}

/// Recovers the trigger position from the encoded value in the capture
/// state response. Each set bit inverts all bits with a lower value.
pub fn decode_trigger_point(value: u32) -> u32 {
    let mut result = value;
    let mut bit = 1u32;
    while bit != 0 {
        if result & bit != 0 {
            result ^= bit - 1;
        }
        bit <<= 1;
    }
    result
}
