//! Bulk commands sent to the device.
//!
//! Each command owns its fixed-size transmission buffer. Setters pack the
//! semantic fields into the buffer in place, and the buffer is reused
//! between transmissions: committing a field twice only changes the
//! affected bits. [`BulkCommand`] tags the payload variants so a driver can
//! keep one slot per opcode and dispatch on whatever the model routed into
//! that slot.
//!
//! Several opcodes carry a different payload depending on the model: `0x0c`,
//! `0x0d` and `0x0e` are the trigger/samplerate/buffer commands of the
//! DSO-2250 but the samplerate/buffer/trigger commands of the DSO-5200.

use bytes::Bytes;

/// Opcodes of the bulk command endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum BulkCode {
    SetTriggerAndSamplerate = 0x01,
    ForceTrigger = 0x02,
    CaptureStart = 0x03,
    TriggerEnabled = 0x04,
    GetData = 0x05,
    GetCaptureState = 0x06,
    SetGain = 0x07,
    BSetChannels = 0x0b,
    CSetTriggerOrSamplerate = 0x0c,
    DSetBuffer = 0x0d,
    ESetTriggerOrSamplerate = 0x0e,
    FSetBuffer = 0x0f,
}

impl BulkCode {
    /// All opcodes in ascending order. Pending commands are drained in this
    /// order, before any capture state poll.
    pub const ALL: [BulkCode; 12] = [
        BulkCode::SetTriggerAndSamplerate,
        BulkCode::ForceTrigger,
        BulkCode::CaptureStart,
        BulkCode::TriggerEnabled,
        BulkCode::GetData,
        BulkCode::GetCaptureState,
        BulkCode::SetGain,
        BulkCode::BSetChannels,
        BulkCode::CSetTriggerOrSamplerate,
        BulkCode::DSetBuffer,
        BulkCode::ESetTriggerOrSamplerate,
        BulkCode::FSetBuffer,
    ];

    pub fn from_code(code: u8) -> Option<BulkCode> {
        BulkCode::ALL.iter().copied().find(|&c| c as u8 == code)
    }
}

/// Used-channel field codes shared by the trigger/channel commands.
pub const USED_CH1: u8 = 0x00;
pub const USED_CH2: u8 = 0x01;
pub const USED_CH1CH2: u8 = 0x02;
/// The DSO-2250 channel command wants this instead of [`USED_CH2`] when
/// channel 2 is the only active channel.
pub const BUSED_CH2: u8 = 0x03;

/// Edge selecting when the trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Slope {
    Positive = 0,
    Negative = 1,
}

impl Slope {
    fn bit(self) -> u8 {
        self as u8
    }
}

/// 0x02: Forces a trigger event so the running capture completes.
#[derive(Clone, Debug)]
pub struct ForceTrigger {
    data: [u8; 2],
}

/// 0x03: Starts a capture.
#[derive(Clone, Debug)]
pub struct CaptureStart {
    data: [u8; 2],
}

/// 0x04: Arms the trigger once the buffer has filled.
#[derive(Clone, Debug)]
pub struct TriggerEnabled {
    data: [u8; 2],
}

/// 0x05: Requests the capture buffer contents.
#[derive(Clone, Debug)]
pub struct GetData {
    data: [u8; 2],
}

/// 0x06: Requests the capture state and the encoded trigger point.
#[derive(Clone, Debug)]
pub struct GetCaptureState {
    data: [u8; 2],
}

macro_rules! plain_command {
    ($name:ident, $code:expr) => {
        impl $name {
            pub fn new() -> Self {
                let mut data = [0; 2];
                data[0] = $code as u8;
                Self { data }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

plain_command!(ForceTrigger, BulkCode::ForceTrigger);
plain_command!(CaptureStart, BulkCode::CaptureStart);
plain_command!(TriggerEnabled, BulkCode::TriggerEnabled);
plain_command!(GetData, BulkCode::GetData);
plain_command!(GetCaptureState, BulkCode::GetCaptureState);

/// 0x07: Per-channel gain selection, one 3-bit hardware gain index each.
#[derive(Clone, Debug)]
pub struct SetGain {
    data: [u8; 8],
}

impl SetGain {
    pub fn new() -> Self {
        let mut data = [0; 8];
        data[0] = BulkCode::SetGain as u8;
        data[1] = 0x0f;
        Self { data }
    }

    pub fn set_gain(&mut self, channel: usize, index: u8) {
        let shift = 3 * channel as u32;
        self.data[2] = (self.data[2] & !(0x07 << shift)) | ((index & 0x07) << shift);
    }
}

impl Default for SetGain {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x01: The combined trigger/samplerate/record-length command of the
/// DSO-2090 and DSO-2150.
///
/// Layout: byte 2 packs trigger source (bits 0-1), record length index
/// (bits 2-4), samplerate id (bits 5-6) and the downsampling-mode flag
/// (bit 7); byte 3 packs the used-channel code (bits 0-1), fast-rate flag
/// (bit 2) and trigger slope (bit 3); bytes 4-5 hold the 16-bit downsampler
/// value; bytes 6, 7 and 10 hold the 19-bit trigger position.
#[derive(Clone, Debug)]
pub struct SetTriggerAndSamplerate {
    data: [u8; 12],
}

impl SetTriggerAndSamplerate {
    pub fn new() -> Self {
        let mut data = [0; 12];
        data[0] = BulkCode::SetTriggerAndSamplerate as u8;
        Self { data }
    }

    pub fn set_trigger_source(&mut self, source: u8) {
        self.data[2] = (self.data[2] & !0x03) | (source & 0x03);
    }

    pub fn set_record_length(&mut self, index: u8) {
        self.data[2] = (self.data[2] & !0x1c) | ((index & 0x07) << 2);
    }

    pub fn set_samplerate_id(&mut self, id: u8) {
        self.data[2] = (self.data[2] & !0x60) | ((id & 0x03) << 5);
    }

    pub fn set_downsampling_mode(&mut self, downsampling: bool) {
        self.data[2] = (self.data[2] & !0x80) | ((downsampling as u8) << 7);
    }

    pub fn set_used_channels(&mut self, code: u8) {
        self.data[3] = (self.data[3] & !0x03) | (code & 0x03);
    }

    pub fn set_fast_rate(&mut self, fast_rate: bool) {
        self.data[3] = (self.data[3] & !0x04) | ((fast_rate as u8) << 2);
    }

    pub fn set_trigger_slope(&mut self, slope: Slope) {
        self.data[3] = (self.data[3] & !0x08) | (slope.bit() << 3);
    }

    /// Stored as `0x10001 - (downsampler >> 1)` by the driver; this setter
    /// takes the already-encoded 16-bit value.
    pub fn set_downsampler(&mut self, value: u16) {
        self.data[4..6].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_trigger_position(&mut self, position: u32) {
        self.data[6] = position as u8;
        self.data[7] = (position >> 8) as u8;
        self.data[10] = ((position >> 16) & 0x07) as u8;
    }

    pub fn trigger_position(&self) -> u32 {
        self.data[6] as u32 | (self.data[7] as u32) << 8 | (self.data[10] as u32) << 16
    }
}

impl Default for SetTriggerAndSamplerate {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0b: Active channel selection of the DSO-2250.
#[derive(Clone, Debug)]
pub struct SetChannels2250 {
    data: [u8; 4],
}

impl SetChannels2250 {
    pub fn new() -> Self {
        let mut data = [0; 4];
        data[0] = BulkCode::BSetChannels as u8;
        Self { data }
    }

    pub fn set_used_channels(&mut self, code: u8) {
        self.data[2] = code;
    }
}

impl Default for SetChannels2250 {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0c on the DSO-2250: trigger source and slope.
#[derive(Clone, Debug)]
pub struct SetTrigger2250 {
    data: [u8; 8],
}

impl SetTrigger2250 {
    pub fn new() -> Self {
        let mut data = [0; 8];
        data[0] = BulkCode::CSetTriggerOrSamplerate as u8;
        Self { data }
    }

    pub fn set_trigger_source(&mut self, source: u8) {
        self.data[2] = (self.data[2] & !0x07) | (source & 0x07);
    }

    pub fn set_trigger_slope(&mut self, slope: Slope) {
        self.data[2] = (self.data[2] & !0x08) | (slope.bit() << 3);
    }
}

impl Default for SetTrigger2250 {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0d on the DSO-2250: record length selection.
#[derive(Clone, Debug)]
pub struct SetRecordLength2250 {
    data: [u8; 4],
}

impl SetRecordLength2250 {
    pub fn new() -> Self {
        let mut data = [0; 4];
        data[0] = BulkCode::DSetBuffer as u8;
        Self { data }
    }

    pub fn set_record_length(&mut self, index: u8) {
        self.data[2] = index;
    }
}

impl Default for SetRecordLength2250 {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0e on the DSO-2250: samplerate selection.
///
/// The samplerate field carries `0x10001 - downsampler` for downsamplers
/// above 1, and 0 otherwise.
#[derive(Clone, Debug)]
pub struct SetSamplerate2250 {
    data: [u8; 8],
}

impl SetSamplerate2250 {
    pub fn new() -> Self {
        let mut data = [0; 8];
        data[0] = BulkCode::ESetTriggerOrSamplerate as u8;
        Self { data }
    }

    pub fn set_fast_rate(&mut self, fast_rate: bool) {
        self.data[2] = (self.data[2] & !0x01) | fast_rate as u8;
    }

    pub fn set_downsampling(&mut self, downsampling: bool) {
        self.data[2] = (self.data[2] & !0x02) | ((downsampling as u8) << 1);
    }

    pub fn set_samplerate(&mut self, value: u16) {
        self.data[4..6].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for SetSamplerate2250 {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0f on the DSO-2250: pretrigger buffer split, two 19-bit positions.
#[derive(Clone, Debug)]
pub struct SetBuffer2250 {
    data: [u8; 12],
}

impl SetBuffer2250 {
    pub fn new() -> Self {
        let mut data = [0; 12];
        data[0] = BulkCode::FSetBuffer as u8;
        Self { data }
    }

    pub fn set_trigger_position_pre(&mut self, position: u32) {
        let position = position & 0x7ffff;
        self.data[2] = position as u8;
        self.data[3] = (position >> 8) as u8;
        self.data[4] = (position >> 16) as u8;
    }

    pub fn set_trigger_position_post(&mut self, position: u32) {
        let position = position & 0x7ffff;
        self.data[6] = position as u8;
        self.data[7] = (position >> 8) as u8;
        self.data[8] = (position >> 16) as u8;
    }
}

impl Default for SetBuffer2250 {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0c on the DSO-5200: samplerate selection, split into a fast and a slow
/// divider value.
///
/// The driver stores `4 - value_fast` and, for nonzero slow values, the
/// two's-complement form `0xffff - value_slow`.
#[derive(Clone, Debug)]
pub struct SetSamplerate5200 {
    data: [u8; 6],
}

impl SetSamplerate5200 {
    pub fn new() -> Self {
        let mut data = [0; 6];
        data[0] = BulkCode::CSetTriggerOrSamplerate as u8;
        Self { data }
    }

    pub fn set_samplerate_slow(&mut self, value: u16) {
        self.data[2..4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_samplerate_fast(&mut self, value: u8) {
        self.data[4] = value & 0x07;
    }
}

impl Default for SetSamplerate5200 {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0d on the DSO-5200: pretrigger buffer split, two 16-bit positions plus
/// their enable flags.
#[derive(Clone, Debug)]
pub struct SetBuffer5200 {
    data: [u8; 10],
}

impl SetBuffer5200 {
    /// Flag byte enabling a buffer half.
    pub const TRIGGER_POSITION_ON: u8 = 0x07;

    pub fn new() -> Self {
        let mut data = [0; 10];
        data[0] = BulkCode::DSetBuffer as u8;
        Self { data }
    }

    pub fn set_trigger_position_pre(&mut self, position: u16) {
        self.data[2..4].copy_from_slice(&position.to_le_bytes());
    }

    pub fn set_used_pre(&mut self, used: bool) {
        self.data[4] = if used { Self::TRIGGER_POSITION_ON } else { 0 };
    }

    pub fn set_trigger_position_post(&mut self, position: u16) {
        self.data[6..8].copy_from_slice(&position.to_le_bytes());
    }

    pub fn set_used_post(&mut self, used: bool) {
        self.data[8] = if used { Self::TRIGGER_POSITION_ON } else { 0 };
    }

    /// The record length index shares the command with the buffer split.
    pub fn set_record_length(&mut self, index: u8) {
        self.data[5] = index;
    }
}

impl Default for SetBuffer5200 {
    fn default() -> Self {
        Self::new()
    }
}

/// 0x0e on the DSO-5200: trigger source, slope, used channels and the
/// fast-rate flag.
#[derive(Clone, Debug)]
pub struct SetTrigger5200 {
    data: [u8; 8],
}

impl SetTrigger5200 {
    pub fn new() -> Self {
        let mut data = [0; 8];
        data[0] = BulkCode::ESetTriggerOrSamplerate as u8;
        Self { data }
    }

    pub fn set_trigger_source(&mut self, source: u8) {
        self.data[2] = (self.data[2] & !0x03) | (source & 0x03);
    }

    pub fn set_fast_rate(&mut self, fast_rate: bool) {
        self.data[2] = (self.data[2] & !0x04) | ((fast_rate as u8) << 2);
    }

    pub fn set_trigger_slope(&mut self, slope: Slope) {
        self.data[2] = (self.data[2] & !0x08) | (slope.bit() << 3);
    }

    pub fn set_used_channels(&mut self, code: u8) {
        self.data[3] = (self.data[3] & !0x03) | (code & 0x03);
    }
}

impl Default for SetTrigger5200 {
    fn default() -> Self {
        Self::new()
    }
}

/// A bulk command payload routed into one of the opcode slots.
#[derive(Clone, Debug)]
pub enum BulkCommand {
    ForceTrigger(ForceTrigger),
    CaptureStart(CaptureStart),
    TriggerEnabled(TriggerEnabled),
    GetData(GetData),
    GetCaptureState(GetCaptureState),
    SetGain(SetGain),
    SetTriggerAndSamplerate(SetTriggerAndSamplerate),
    SetChannels2250(SetChannels2250),
    SetTrigger2250(SetTrigger2250),
    SetRecordLength2250(SetRecordLength2250),
    SetSamplerate2250(SetSamplerate2250),
    SetBuffer2250(SetBuffer2250),
    SetSamplerate5200(SetSamplerate5200),
    SetBuffer5200(SetBuffer5200),
    SetTrigger5200(SetTrigger5200),
}

impl BulkCommand {
    pub fn code(&self) -> BulkCode {
        match self {
            BulkCommand::ForceTrigger(_) => BulkCode::ForceTrigger,
            BulkCommand::CaptureStart(_) => BulkCode::CaptureStart,
            BulkCommand::TriggerEnabled(_) => BulkCode::TriggerEnabled,
            BulkCommand::GetData(_) => BulkCode::GetData,
            BulkCommand::GetCaptureState(_) => BulkCode::GetCaptureState,
            BulkCommand::SetGain(_) => BulkCode::SetGain,
            BulkCommand::SetTriggerAndSamplerate(_) => BulkCode::SetTriggerAndSamplerate,
            BulkCommand::SetChannels2250(_) => BulkCode::BSetChannels,
            BulkCommand::SetTrigger2250(_) => BulkCode::CSetTriggerOrSamplerate,
            BulkCommand::SetRecordLength2250(_) => BulkCode::DSetBuffer,
            BulkCommand::SetSamplerate2250(_) => BulkCode::ESetTriggerOrSamplerate,
            BulkCommand::SetBuffer2250(_) => BulkCode::FSetBuffer,
            BulkCommand::SetSamplerate5200(_) => BulkCode::CSetTriggerOrSamplerate,
            BulkCommand::SetBuffer5200(_) => BulkCode::DSetBuffer,
            BulkCommand::SetTrigger5200(_) => BulkCode::ESetTriggerOrSamplerate,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            BulkCommand::ForceTrigger(c) => &c.data,
            BulkCommand::CaptureStart(c) => &c.data,
            BulkCommand::TriggerEnabled(c) => &c.data,
            BulkCommand::GetData(c) => &c.data,
            BulkCommand::GetCaptureState(c) => &c.data,
            BulkCommand::SetGain(c) => &c.data,
            BulkCommand::SetTriggerAndSamplerate(c) => &c.data,
            BulkCommand::SetChannels2250(c) => &c.data,
            BulkCommand::SetTrigger2250(c) => &c.data,
            BulkCommand::SetRecordLength2250(c) => &c.data,
            BulkCommand::SetSamplerate2250(c) => &c.data,
            BulkCommand::SetBuffer2250(c) => &c.data,
            BulkCommand::SetSamplerate5200(c) => &c.data,
            BulkCommand::SetBuffer5200(c) => &c.data,
            BulkCommand::SetTrigger5200(c) => &c.data,
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            BulkCommand::ForceTrigger(c) => &mut c.data,
            BulkCommand::CaptureStart(c) => &mut c.data,
            BulkCommand::TriggerEnabled(c) => &mut c.data,
            BulkCommand::GetData(c) => &mut c.data,
            BulkCommand::GetCaptureState(c) => &mut c.data,
            BulkCommand::SetGain(c) => &mut c.data,
            BulkCommand::SetTriggerAndSamplerate(c) => &mut c.data,
            BulkCommand::SetChannels2250(c) => &mut c.data,
            BulkCommand::SetTrigger2250(c) => &mut c.data,
            BulkCommand::SetRecordLength2250(c) => &mut c.data,
            BulkCommand::SetSamplerate2250(c) => &mut c.data,
            BulkCommand::SetBuffer2250(c) => &mut c.data,
            BulkCommand::SetSamplerate5200(c) => &mut c.data,
            BulkCommand::SetBuffer5200(c) => &mut c.data,
            BulkCommand::SetTrigger5200(c) => &mut c.data,
        }
    }

    /// Snapshots the buffer for transmission.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trigger_and_samplerate_fields() {
        let mut cmd = SetTriggerAndSamplerate::new();
        cmd.set_trigger_source(1);
        cmd.set_record_length(1);
        cmd.set_samplerate_id(3);
        cmd.set_downsampling_mode(true);
        cmd.set_used_channels(USED_CH1CH2);
        cmd.set_fast_rate(false);
        cmd.set_trigger_slope(Slope::Negative);

        assert_eq!(cmd.data[0], 0x01);
        assert_eq!(cmd.data[2], 0x01 | 0x04 | 0x60 | 0x80);
        assert_eq!(cmd.data[3], 0x02 | 0x08);

        // The 2090 downsampler encoding: 0x10001 - (downsampler >> 1).
        let downsampler = 20u32;
        cmd.set_downsampler((0x10001 - (downsampler >> 1)) as u16);
        assert_eq!(&cmd.data[4..6], &[0xf7, 0xff]);

        cmd.set_trigger_position(0x7ffff - 10240 + 512);
        assert_eq!(cmd.trigger_position(), 0x7ffff - 10240 + 512);
        // Writing a second position does not leave stale bits behind.
        cmd.set_trigger_position(0x1);
        assert_eq!(cmd.trigger_position(), 0x1);
    }

    #[test]
    fn test_gain_bits() {
        let mut cmd = SetGain::new();
        cmd.set_gain(0, 2);
        cmd.set_gain(1, 3);
        assert_eq!(cmd.data[0], 0x07);
        assert_eq!(cmd.data[1], 0x0f);
        assert_eq!(cmd.data[2], 0x02 | 0x03 << 3);

        cmd.set_gain(0, 1);
        assert_eq!(cmd.data[2], 0x01 | 0x03 << 3);
    }

    #[test]
    fn test_samplerate_2250_encoding() {
        let mut cmd = SetSamplerate2250::new();
        cmd.set_downsampling(true);
        cmd.set_fast_rate(true);
        cmd.set_samplerate((0x10001u32 - 4) as u16);
        assert_eq!(cmd.data[2], 0x03);
        assert_eq!(&cmd.data[4..6], &[0xfd, 0xff]);
    }

    #[test]
    fn test_samplerate_5200_encoding() {
        let mut cmd = SetSamplerate5200::new();
        // downsampler 9: slow = (9 - 3) / 2 = 3, fast = 9 - 6 = 3
        cmd.set_samplerate_slow(0xffff - 3);
        cmd.set_samplerate_fast(4 - 3);
        assert_eq!(&cmd.data[2..4], &[0xfc, 0xff]);
        assert_eq!(cmd.data[4], 0x01);
    }

    #[test]
    fn test_buffer_2250_masks_to_19_bits() {
        let mut cmd = SetBuffer2250::new();
        cmd.set_trigger_position_pre(0xf_ffff);
        cmd.set_trigger_position_post(0x7ffff - 42);
        assert_eq!(&cmd.data[2..5], &[0xff, 0xff, 0x07]);
        let post = 0x7ffffu32 - 42;
        assert_eq!(
            &cmd.data[6..9],
            &[post as u8, (post >> 8) as u8, (post >> 16) as u8]
        );
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(BulkCommand::SetTrigger2250(SetTrigger2250::new()).code(), BulkCode::CSetTriggerOrSamplerate);
        assert_eq!(BulkCommand::SetSamplerate5200(SetSamplerate5200::new()).code(), BulkCode::CSetTriggerOrSamplerate);
        assert_eq!(BulkCommand::SetBuffer5200(SetBuffer5200::new()).code(), BulkCode::DSetBuffer);
        assert_eq!(BulkCode::from_code(0x0f), Some(BulkCode::FSetBuffer));
        assert_eq!(BulkCode::from_code(0x42), None);
    }
}
