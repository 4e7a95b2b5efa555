//! Payload slots and the pending transmission set.
//!
//! One slot per bulk opcode and per control index holds the payload the
//! model routed there; a bitset tracks which slots need transmission on
//! the next tick. Pending flags survive failed sends so payloads are
//! retried until they reach the device.

use bytes::Bytes;

use crate::protocol::bulk::{self, BulkCode, BulkCommand};
use crate::protocol::control::{self, ControlCommand};
use crate::protocol::device::ModelSpec;
use crate::protocol::Model;

const BULK_SLOTS: usize = 0x10;

/// Transmission slots for the control commands, in drain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ControlIndex {
    SetOffset = 0,
    SetRelays = 1,
    SetVoltDivCh1 = 2,
    SetVoltDivCh2 = 3,
    SetTimeDiv = 4,
    AcquireHardData = 5,
}

impl ControlIndex {
    pub const ALL: [ControlIndex; 6] = [
        ControlIndex::SetOffset,
        ControlIndex::SetRelays,
        ControlIndex::SetVoltDivCh1,
        ControlIndex::SetVoltDivCh2,
        ControlIndex::SetTimeDiv,
        ControlIndex::AcquireHardData,
    ];
}

/// All command payloads of one device plus their pending flags.
pub struct CommandSet {
    bulk: [Option<BulkCommand>; BULK_SLOTS],
    bulk_pending: u16,
    control: [Option<ControlCommand>; ControlIndex::ALL.len()],
    control_pending: u8,
}

impl CommandSet {
    /// Instantiates the payloads for one model and primes the initial
    /// pending set: everything the model needs configured is sent on the
    /// first tick.
    pub fn new(spec: &ModelSpec) -> Self {
        let mut set = CommandSet {
            bulk: Default::default(),
            bulk_pending: 0,
            control: Default::default(),
            control_pending: 0,
        };

        // Commands shared by all models.
        set.put_bulk(BulkCommand::ForceTrigger(bulk::ForceTrigger::new()));
        set.put_bulk(BulkCommand::CaptureStart(bulk::CaptureStart::new()));
        set.put_bulk(BulkCommand::TriggerEnabled(bulk::TriggerEnabled::new()));
        set.put_bulk(BulkCommand::GetData(bulk::GetData::new()));
        set.put_bulk(BulkCommand::GetCaptureState(bulk::GetCaptureState::new()));
        set.put_bulk(BulkCommand::SetGain(bulk::SetGain::new()));
        set.put_control(
            ControlIndex::SetOffset,
            ControlCommand::SetOffset(control::SetOffset::new()),
        );
        set.put_control(
            ControlIndex::SetRelays,
            ControlCommand::SetRelays(control::SetRelays::new()),
        );

        match spec.model {
            Model::Dso2090 | Model::Dso2150 => {
                set.put_bulk(BulkCommand::SetTriggerAndSamplerate(
                    bulk::SetTriggerAndSamplerate::new(),
                ));
                set.mark_bulk(BulkCode::SetTriggerAndSamplerate);
                set.mark_control(ControlIndex::SetOffset);
                set.mark_control(ControlIndex::SetRelays);
            }
            Model::Dso2250 => {
                set.put_bulk(BulkCommand::SetChannels2250(bulk::SetChannels2250::new()));
                set.put_bulk(BulkCommand::SetTrigger2250(bulk::SetTrigger2250::new()));
                set.put_bulk(BulkCommand::SetRecordLength2250(
                    bulk::SetRecordLength2250::new(),
                ));
                set.put_bulk(BulkCommand::SetSamplerate2250(bulk::SetSamplerate2250::new()));
                set.put_bulk(BulkCommand::SetBuffer2250(bulk::SetBuffer2250::new()));
                set.mark_bulk(BulkCode::BSetChannels);
                set.mark_bulk(BulkCode::CSetTriggerOrSamplerate);
                set.mark_bulk(BulkCode::DSetBuffer);
                set.mark_bulk(BulkCode::ESetTriggerOrSamplerate);
                set.mark_bulk(BulkCode::FSetBuffer);
                set.mark_control(ControlIndex::SetOffset);
                set.mark_control(ControlIndex::SetRelays);
            }
            Model::Dso5200 | Model::Dso5200a => {
                set.put_bulk(BulkCommand::SetSamplerate5200(bulk::SetSamplerate5200::new()));
                set.put_bulk(BulkCommand::SetBuffer5200(bulk::SetBuffer5200::new()));
                set.put_bulk(BulkCommand::SetTrigger5200(bulk::SetTrigger5200::new()));
                set.mark_bulk(BulkCode::CSetTriggerOrSamplerate);
                set.mark_bulk(BulkCode::DSetBuffer);
                set.mark_bulk(BulkCode::ESetTriggerOrSamplerate);
                set.mark_control(ControlIndex::SetOffset);
                set.mark_control(ControlIndex::SetRelays);
            }
            Model::Dso6022be => {
                set.put_control(
                    ControlIndex::SetVoltDivCh1,
                    ControlCommand::SetVoltDivCh1(control::SetVoltDivCh1::new()),
                );
                set.put_control(
                    ControlIndex::SetVoltDivCh2,
                    ControlCommand::SetVoltDivCh2(control::SetVoltDivCh2::new()),
                );
                set.put_control(
                    ControlIndex::SetTimeDiv,
                    ControlCommand::SetTimeDiv(control::SetTimeDiv::new()),
                );
                set.put_control(
                    ControlIndex::AcquireHardData,
                    ControlCommand::AcquireHardData(control::AcquireHardData::new()),
                );
                set.mark_control(ControlIndex::SetVoltDivCh1);
                set.mark_control(ControlIndex::SetVoltDivCh2);
                set.mark_control(ControlIndex::SetTimeDiv);
                set.mark_control(ControlIndex::AcquireHardData);
            }
        }

        set
    }

    fn put_bulk(&mut self, command: BulkCommand) {
        let code = command.code() as usize;
        self.bulk[code] = Some(command);
    }

    fn put_control(&mut self, index: ControlIndex, command: ControlCommand) {
        self.control[index as usize] = Some(command);
    }

    pub fn mark_bulk(&mut self, code: BulkCode) {
        self.bulk_pending |= 1 << (code as u16);
    }

    pub fn clear_bulk(&mut self, code: BulkCode) {
        self.bulk_pending &= !(1 << (code as u16));
    }

    pub fn is_bulk_pending(&self, code: BulkCode) -> bool {
        self.bulk_pending & (1 << (code as u16)) != 0
    }

    pub fn mark_control(&mut self, index: ControlIndex) {
        self.control_pending |= 1 << (index as u8);
    }

    pub fn clear_control(&mut self, index: ControlIndex) {
        self.control_pending &= !(1 << (index as u8));
    }

    pub fn is_control_pending(&self, index: ControlIndex) -> bool {
        self.control_pending & (1 << (index as u8)) != 0
    }

    /// Pending bulk opcodes in drain order.
    pub fn pending_bulk(&self) -> Vec<BulkCode> {
        BulkCode::ALL
            .iter()
            .copied()
            .filter(|&code| self.is_bulk_pending(code) && self.bulk[code as usize].is_some())
            .collect()
    }

    /// Pending control slots in drain order.
    pub fn pending_control(&self) -> Vec<ControlIndex> {
        ControlIndex::ALL
            .iter()
            .copied()
            .filter(|&index| {
                self.is_control_pending(index) && self.control[index as usize].is_some()
            })
            .collect()
    }

    /// Snapshots a bulk payload for transmission.
    pub fn bulk_bytes(&self, code: BulkCode) -> Option<Bytes> {
        self.bulk[code as usize].as_ref().map(|c| c.to_bytes())
    }

    /// Snapshots a control payload for transmission along with its request
    /// code.
    pub fn control_bytes(&self, index: ControlIndex) -> Option<(u8, Bytes)> {
        self.control[index as usize]
            .as_ref()
            .map(|c| (c.code() as u8, c.to_bytes()))
    }

    pub fn bulk_mut(&mut self, code: BulkCode) -> Option<&mut BulkCommand> {
        self.bulk[code as usize].as_mut()
    }

    pub fn control_mut(&mut self, index: ControlIndex) -> Option<&mut ControlCommand> {
        self.control[index as usize].as_mut()
    }

    /// Overwrites a bulk payload with raw bytes and marks it pending.
    /// Returns false if the model has no payload in that slot.
    pub fn write_bulk_raw(&mut self, code: u8, data: &[u8]) -> bool {
        let Some(code) = BulkCode::from_code(code) else {
            return false;
        };
        let Some(command) = self.bulk[code as usize].as_mut() else {
            return false;
        };

        let buffer = command.bytes_mut();
        let count = buffer.len().min(data.len());
        buffer[..count].copy_from_slice(&data[..count]);
        self.mark_bulk(code);
        true
    }

    /// Overwrites the control payload with the given request code and
    /// marks it pending.
    pub fn write_control_raw(&mut self, code: u8, data: &[u8]) -> bool {
        for index in ControlIndex::ALL {
            let Some(command) = self.control[index as usize].as_mut() else {
                continue;
            };
            if command.code() as u8 != code {
                continue;
            }

            let buffer = command.bytes_mut();
            let count = buffer.len().min(data.len());
            buffer[..count].copy_from_slice(&data[..count]);
            self.mark_control(index);
            return true;
        }
        false
    }

    // Typed accessors for the slots whose payload depends on the model.

    pub fn trigger_and_samplerate_mut(&mut self) -> Option<&mut bulk::SetTriggerAndSamplerate> {
        match self.bulk_mut(BulkCode::SetTriggerAndSamplerate) {
            Some(BulkCommand::SetTriggerAndSamplerate(c)) => Some(c),
            _ => None,
        }
    }

    pub fn set_gain_mut(&mut self) -> Option<&mut bulk::SetGain> {
        match self.bulk_mut(BulkCode::SetGain) {
            Some(BulkCommand::SetGain(c)) => Some(c),
            _ => None,
        }
    }

    pub fn channels_2250_mut(&mut self) -> Option<&mut bulk::SetChannels2250> {
        match self.bulk_mut(BulkCode::BSetChannels) {
            Some(BulkCommand::SetChannels2250(c)) => Some(c),
            _ => None,
        }
    }

    pub fn trigger_2250_mut(&mut self) -> Option<&mut bulk::SetTrigger2250> {
        match self.bulk_mut(BulkCode::CSetTriggerOrSamplerate) {
            Some(BulkCommand::SetTrigger2250(c)) => Some(c),
            _ => None,
        }
    }

    pub fn record_length_2250_mut(&mut self) -> Option<&mut bulk::SetRecordLength2250> {
        match self.bulk_mut(BulkCode::DSetBuffer) {
            Some(BulkCommand::SetRecordLength2250(c)) => Some(c),
            _ => None,
        }
    }

    pub fn samplerate_2250_mut(&mut self) -> Option<&mut bulk::SetSamplerate2250> {
        match self.bulk_mut(BulkCode::ESetTriggerOrSamplerate) {
            Some(BulkCommand::SetSamplerate2250(c)) => Some(c),
            _ => None,
        }
    }

    pub fn buffer_2250_mut(&mut self) -> Option<&mut bulk::SetBuffer2250> {
        match self.bulk_mut(BulkCode::FSetBuffer) {
            Some(BulkCommand::SetBuffer2250(c)) => Some(c),
            _ => None,
        }
    }

    pub fn samplerate_5200_mut(&mut self) -> Option<&mut bulk::SetSamplerate5200> {
        match self.bulk_mut(BulkCode::CSetTriggerOrSamplerate) {
            Some(BulkCommand::SetSamplerate5200(c)) => Some(c),
            _ => None,
        }
    }

    pub fn buffer_5200_mut(&mut self) -> Option<&mut bulk::SetBuffer5200> {
        match self.bulk_mut(BulkCode::DSetBuffer) {
            Some(BulkCommand::SetBuffer5200(c)) => Some(c),
            _ => None,
        }
    }

    pub fn trigger_5200_mut(&mut self) -> Option<&mut bulk::SetTrigger5200> {
        match self.bulk_mut(BulkCode::ESetTriggerOrSamplerate) {
            Some(BulkCommand::SetTrigger5200(c)) => Some(c),
            _ => None,
        }
    }

    pub fn offset_mut(&mut self) -> Option<&mut control::SetOffset> {
        match self.control_mut(ControlIndex::SetOffset) {
            Some(ControlCommand::SetOffset(c)) => Some(c),
            _ => None,
        }
    }

    pub fn relays_mut(&mut self) -> Option<&mut control::SetRelays> {
        match self.control_mut(ControlIndex::SetRelays) {
            Some(ControlCommand::SetRelays(c)) => Some(c),
            _ => None,
        }
    }

    pub fn voltdiv_ch1_mut(&mut self) -> Option<&mut control::SetVoltDivCh1> {
        match self.control_mut(ControlIndex::SetVoltDivCh1) {
            Some(ControlCommand::SetVoltDivCh1(c)) => Some(c),
            _ => None,
        }
    }

    pub fn voltdiv_ch2_mut(&mut self) -> Option<&mut control::SetVoltDivCh2> {
        match self.control_mut(ControlIndex::SetVoltDivCh2) {
            Some(ControlCommand::SetVoltDivCh2(c)) => Some(c),
            _ => None,
        }
    }

    pub fn timediv_mut(&mut self) -> Option<&mut control::SetTimeDiv> {
        match self.control_mut(ControlIndex::SetTimeDiv) {
            Some(ControlCommand::SetTimeDiv(c)) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::device::{DSO2090, DSO2250, DSO5200, DSO6022BE};

    #[test]
    fn test_initial_pending_2090() {
        let set = CommandSet::new(&DSO2090);
        assert_eq!(set.pending_bulk(), vec![BulkCode::SetTriggerAndSamplerate]);
        assert_eq!(
            set.pending_control(),
            vec![ControlIndex::SetOffset, ControlIndex::SetRelays]
        );
    }

    #[test]
    fn test_initial_pending_6022() {
        let set = CommandSet::new(&DSO6022BE);
        assert!(set.pending_bulk().is_empty());
        assert_eq!(
            set.pending_control(),
            vec![
                ControlIndex::SetVoltDivCh1,
                ControlIndex::SetVoltDivCh2,
                ControlIndex::SetTimeDiv,
                ControlIndex::AcquireHardData,
            ]
        );
    }

    #[test]
    fn test_slot_payload_depends_on_model() {
        let mut set_2250 = CommandSet::new(&DSO2250);
        let mut set_5200 = CommandSet::new(&DSO5200);
        assert!(set_2250.trigger_2250_mut().is_some());
        assert!(set_2250.samplerate_5200_mut().is_none());
        assert!(set_5200.samplerate_5200_mut().is_some());
        assert!(set_5200.trigger_2250_mut().is_none());
    }

    #[test]
    fn test_drain_order_and_clear() {
        let mut set = CommandSet::new(&DSO2250);
        assert_eq!(
            set.pending_bulk(),
            vec![
                BulkCode::BSetChannels,
                BulkCode::CSetTriggerOrSamplerate,
                BulkCode::DSetBuffer,
                BulkCode::ESetTriggerOrSamplerate,
                BulkCode::FSetBuffer,
            ]
        );
        set.clear_bulk(BulkCode::DSetBuffer);
        assert!(!set.is_bulk_pending(BulkCode::DSetBuffer));
        assert!(set.is_bulk_pending(BulkCode::FSetBuffer));
    }

    #[test]
    fn test_raw_overwrite() {
        let mut set = CommandSet::new(&DSO2090);
        set.clear_bulk(BulkCode::SetTriggerAndSamplerate);
        assert!(set.write_bulk_raw(0x01, &[0x01, 0x00, 0xaa, 0xbb]));
        assert!(set.is_bulk_pending(BulkCode::SetTriggerAndSamplerate));
        let bytes = set.bulk_bytes(BulkCode::SetTriggerAndSamplerate).unwrap();
        assert_eq!(&bytes[..4], &[0x01, 0x00, 0xaa, 0xbb]);

        // 2090 has no 2250 channel command to overwrite.
        assert!(!set.write_bulk_raw(0x0b, &[0x0b, 0x00]));
    }
}
