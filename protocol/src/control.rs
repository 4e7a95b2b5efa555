//! Control commands sent over the default endpoint.
//!
//! The offset/relay commands are shared by all bulk-capable models; the
//! volt/time divider and hard-data commands exist only on the DSO-6022BE,
//! which has no bulk command support at all.

use bytes::Bytes;

use crate::{ProtocolError, HANTEK_CHANNELS};

/// Request codes of the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCode {
    Value = 0xa2,
    GetSpeed = 0xb2,
    BeginCommand = 0xb3,
    SetOffset = 0xb4,
    SetRelays = 0xb5,
    SetVoltDivCh1 = 0xe0,
    SetVoltDivCh2 = 0xe1,
    SetTimeDiv = 0xe2,
    AcquireHardData = 0xe3,
}

/// Value selector reading the offset calibration block via
/// [`ControlCode::Value`].
pub const VALUE_OFFSET_LIMITS: u16 = 0x08;

/// Input coupling selected through the relay command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

/// 0xb4: Channel offsets plus the trigger level, 16-bit big-endian each.
#[derive(Clone, Debug)]
pub struct SetOffset {
    data: [u8; 17],
}

impl SetOffset {
    pub fn new() -> Self {
        Self { data: [0; 17] }
    }

    pub fn set_channel(&mut self, channel: usize, offset: u16) {
        self.data[channel * 2..channel * 2 + 2].copy_from_slice(&offset.to_be_bytes());
    }

    pub fn set_trigger(&mut self, level: u16) {
        self.data[4..6].copy_from_slice(&level.to_be_bytes());
    }

    pub fn channel(&self, channel: usize) -> u16 {
        u16::from_be_bytes([self.data[channel * 2], self.data[channel * 2 + 1]])
    }

    pub fn trigger(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }
}

impl Default for SetOffset {
    fn default() -> Self {
        Self::new()
    }
}

/// 0xb5: Relay states. A closed relay transmits its mask byte, an open one
/// the mask's complement.
#[derive(Clone, Debug)]
pub struct SetRelays {
    data: [u8; 17],
}

impl SetRelays {
    const COUPLING_MASK: [u8; HANTEK_CHANNELS] = [0x02, 0x10];
    const BELOW_1V_MASK: [u8; HANTEK_CHANNELS] = [0x04, 0x20];
    const BELOW_100MV_MASK: [u8; HANTEK_CHANNELS] = [0x08, 0x40];
    const TRIGGER_MASK: u8 = 0x80;

    pub fn new() -> Self {
        Self { data: [0; 17] }
    }

    fn set(&mut self, index: usize, mask: u8, closed: bool) {
        self.data[index] = if closed { mask } else { !mask };
    }

    /// Selects DC coupling when `dc` is set, AC coupling otherwise.
    pub fn set_coupling(&mut self, channel: usize, dc: bool) {
        self.set(channel * 3 + 1, Self::COUPLING_MASK[channel], dc);
    }

    /// Engages the <1 V attenuation relay.
    pub fn set_below_1v(&mut self, channel: usize, below: bool) {
        self.set(channel * 3 + 2, Self::BELOW_1V_MASK[channel], below);
    }

    /// Engages the <100 mV attenuation relay.
    pub fn set_below_100mv(&mut self, channel: usize, below: bool) {
        self.set(channel * 3 + 3, Self::BELOW_100MV_MASK[channel], below);
    }

    /// Routes the external trigger input to the trigger circuit.
    pub fn set_trigger(&mut self, ext: bool) {
        self.set(7, Self::TRIGGER_MASK, ext);
    }
}

impl Default for SetRelays {
    fn default() -> Self {
        Self::new()
    }
}

/// 0xe0: Voltage divider of channel 1 (DSO-6022BE).
#[derive(Clone, Debug)]
pub struct SetVoltDivCh1 {
    data: [u8; 1],
}

/// 0xe1: Voltage divider of channel 2 (DSO-6022BE).
#[derive(Clone, Debug)]
pub struct SetVoltDivCh2 {
    data: [u8; 1],
}

/// 0xe2: Time divider selecting the samplerate (DSO-6022BE).
#[derive(Clone, Debug)]
pub struct SetTimeDiv {
    data: [u8; 1],
}

macro_rules! div_command {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self { data: [0; 1] }
            }

            pub fn set_div(&mut self, div: u8) {
                self.data[0] = div;
            }

            pub fn div(&self) -> u8 {
                self.data[0]
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

div_command!(SetVoltDivCh1);
div_command!(SetVoltDivCh2);
div_command!(SetTimeDiv);

/// 0xe3: Kicks off a capture on the DSO-6022BE.
#[derive(Clone, Debug)]
pub struct AcquireHardData {
    data: [u8; 1],
}

impl AcquireHardData {
    pub fn new() -> Self {
        Self { data: [0x01] }
    }
}

impl Default for AcquireHardData {
    fn default() -> Self {
        Self::new()
    }
}

/// A control command payload in one of the transmission slots.
#[derive(Clone, Debug)]
pub enum ControlCommand {
    SetOffset(SetOffset),
    SetRelays(SetRelays),
    SetVoltDivCh1(SetVoltDivCh1),
    SetVoltDivCh2(SetVoltDivCh2),
    SetTimeDiv(SetTimeDiv),
    AcquireHardData(AcquireHardData),
}

impl ControlCommand {
    pub fn code(&self) -> ControlCode {
        match self {
            ControlCommand::SetOffset(_) => ControlCode::SetOffset,
            ControlCommand::SetRelays(_) => ControlCode::SetRelays,
            ControlCommand::SetVoltDivCh1(_) => ControlCode::SetVoltDivCh1,
            ControlCommand::SetVoltDivCh2(_) => ControlCode::SetVoltDivCh2,
            ControlCommand::SetTimeDiv(_) => ControlCode::SetTimeDiv,
            ControlCommand::AcquireHardData(_) => ControlCode::AcquireHardData,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            ControlCommand::SetOffset(c) => &c.data,
            ControlCommand::SetRelays(c) => &c.data,
            ControlCommand::SetVoltDivCh1(c) => &c.data,
            ControlCommand::SetVoltDivCh2(c) => &c.data,
            ControlCommand::SetTimeDiv(c) => &c.data,
            ControlCommand::AcquireHardData(c) => &c.data,
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            ControlCommand::SetOffset(c) => &mut c.data,
            ControlCommand::SetRelays(c) => &mut c.data,
            ControlCommand::SetVoltDivCh1(c) => &mut c.data,
            ControlCommand::SetVoltDivCh2(c) => &mut c.data,
            ControlCommand::SetTimeDiv(c) => &mut c.data,
            ControlCommand::AcquireHardData(c) => &mut c.data,
        }
    }

    /// Snapshots the buffer for transmission.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.bytes())
    }
}

/// Size of the offset calibration block read from the device.
pub const OFFSET_LIMITS_LEN: usize = HANTEK_CHANNELS * 9 * 2 * 2;

/// Per-channel, per-gain offset calibration window read once from the
/// device. Stored verbatim as start/end raw values; the interpretation is
/// left to the offset math.
#[derive(Clone, Debug)]
pub struct OffsetLimits {
    ranges: [[[u16; 2]; 9]; HANTEK_CHANNELS],
}

impl OffsetLimits {
    /// Parses the big-endian `[channel][gain][start|end]` block.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < OFFSET_LIMITS_LEN {
            return Err(ProtocolError::TruncatedResponse {
                expected: OFFSET_LIMITS_LEN,
                actual: data.len(),
            });
        }

        let mut ranges = [[[0u16; 2]; 9]; HANTEK_CHANNELS];
        let mut pos = 0;
        for channel in ranges.iter_mut() {
            for gain in channel.iter_mut() {
                for bound in gain.iter_mut() {
                    *bound = u16::from_be_bytes([data[pos], data[pos + 1]]);
                    pos += 2;
                }
            }
        }

        Ok(Self { ranges })
    }

    /// The (start, end) raw window for a channel and gain index.
    pub fn range(&self, channel: usize, gain: usize) -> (u16, u16) {
        let [start, end] = self.ranges[channel][gain];
        (start, end)
    }
}

impl Default for OffsetLimits {
    fn default() -> Self {
        Self {
            ranges: [[[0x0000, 0xffff]; 9]; HANTEK_CHANNELS],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_offset_command() {
        let mut cmd = SetOffset::new();
        cmd.set_channel(0, 0x1234);
        cmd.set_channel(1, 0x5678);
        cmd.set_trigger(0x009a);
        assert_eq!(&cmd.data[..6], &[0x12, 0x34, 0x56, 0x78, 0x00, 0x9a]);
        assert_eq!(cmd.channel(1), 0x5678);
        assert_eq!(cmd.trigger(), 0x009a);
    }

    #[test]
    fn test_relay_bytes() {
        let mut cmd = SetRelays::new();
        cmd.set_coupling(0, true);
        cmd.set_below_1v(0, false);
        cmd.set_trigger(true);
        assert_eq!(cmd.data[1], 0x02);
        assert_eq!(cmd.data[2], !0x04);
        assert_eq!(cmd.data[7], 0x80);
    }

    #[test]
    fn test_offset_limits_parse() {
        let mut block = [0u8; OFFSET_LIMITS_LEN];
        // Channel stride is 9 gains * 2 bounds * 2 bytes; poke channel 1,
        // gain 2.
        let base = 9 * 2 * 2 + 2 * 2 * 2;
        block[base] = 0x01;
        block[base + 1] = 0x10;
        block[base + 2] = 0x02;
        block[base + 3] = 0x20;

        let limits = OffsetLimits::parse(&block).unwrap();
        assert_eq!(limits.range(1, 2), (0x0110, 0x0220));
        assert_eq!(limits.range(0, 0), (0, 0));

        assert!(OffsetLimits::parse(&block[..10]).is_err());
    }
}
