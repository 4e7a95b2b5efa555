//! Static device definitions.
//!
//! This is where support for other models should be added. Every protocol
//! decision downstream dispatches on which opcode a [`ModelSpec`] routes an
//! abstract operation to; an operation routed to `None` is unsupported on
//! that model.

use crate::bulk::BulkCode;
use crate::control::ControlCode;
use crate::HANTEK_CHANNELS;

/// Record length sentinel selecting roll mode.
pub const ROLL_RECORD_LENGTH: u32 = u32::MAX;

/// Supported oscilloscope models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Dso2090,
    Dso2150,
    Dso2250,
    Dso5200,
    Dso5200a,
    Dso6022be,
}

impl Model {
    /// Resolves the unique model id reported by the USB layer.
    pub fn from_unique_id(id: u32) -> Option<Model> {
        match id {
            0 => Some(Model::Dso2090),
            1 => Some(Model::Dso2150),
            2 => Some(Model::Dso2250),
            3 => Some(Model::Dso5200),
            4 => Some(Model::Dso5200a),
            5 => Some(Model::Dso6022be),
            _ => None,
        }
    }

    /// Models without official support work through the closest supported
    /// protocol variant but have seen less testing.
    pub fn officially_supported(self) -> bool {
        !matches!(self, Model::Dso2150 | Model::Dso5200a)
    }
}

/// Samplerate capabilities for one channel configuration.
#[derive(Debug, Clone, Copy)]
pub struct SamplerateLimits {
    /// Base clock in S/s, divided by downsampler and buffer divider.
    pub base: f64,
    /// Maximum rate in S/s, reached with downsampling disabled.
    pub max: f64,
    /// Largest downsampler value the command encoding can carry.
    pub max_downsampler: u32,
    /// Available record lengths; `ROLL_RECORD_LENGTH` selects roll mode.
    pub record_lengths: &'static [u32],
}

/// Routing of abstract bulk operations to the model's opcodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkRouting {
    pub set_record_length: Option<BulkCode>,
    pub set_channels: Option<BulkCode>,
    pub set_gain: Option<BulkCode>,
    pub set_samplerate: Option<BulkCode>,
    pub set_trigger: Option<BulkCode>,
    pub set_pretrigger: Option<BulkCode>,
}

/// Routing of abstract control operations to the model's request codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlRouting {
    pub set_offset: Option<ControlCode>,
    pub set_relays: Option<ControlCode>,
    pub set_voltdiv_ch1: Option<ControlCode>,
    pub set_voltdiv_ch2: Option<ControlCode>,
    pub set_timediv: Option<ControlCode>,
    pub acquire_hard_data: Option<ControlCode>,
}

/// Capability descriptor of one oscilloscope model.
#[derive(Debug)]
pub struct ModelSpec {
    pub model: Model,
    pub bulk: BulkRouting,
    pub control: ControlRouting,
    /// Limits with both channels active.
    pub samplerate_single: SamplerateLimits,
    /// Limits in fast-rate mode, one channel using all buffer bandwidth.
    pub samplerate_multi: SamplerateLimits,
    /// Base-rate divider per record length index.
    pub buffer_dividers: &'static [u32],
    /// V/div value per gain step.
    pub gain_steps: &'static [f64; 9],
    /// Hardware gain index per gain step (bulk gain command).
    pub gain_index: &'static [u8; 9],
    /// Hardware divider per gain step (6022BE volt-div controls).
    pub gain_div: &'static [u8; 9],
    /// Raw count covering one gain step, per channel and gain.
    pub voltage_limit: &'static [[u16; 9]; HANTEK_CHANNELS],
    /// Discrete samplerate domain (6022BE); empty for solver-driven models.
    pub sample_steps: &'static [f64],
    /// Time-div value per entry of `sample_steps`.
    pub sample_div: &'static [u8],
    /// Bits per sample delivered by the hardware.
    pub sample_bits: u8,
}

impl ModelSpec {
    /// The samplerate limits for the given channel usage mode.
    pub fn limits(&self, fast_rate: bool) -> &SamplerateLimits {
        if fast_rate {
            &self.samplerate_multi
        } else {
            &self.samplerate_single
        }
    }
}

/// Attempts to resolve a `ModelSpec` from a unique model id. Returns `None`
/// for ids no profile exists for.
pub fn probe(unique_model_id: u32) -> Option<&'static ModelSpec> {
    Some(match Model::from_unique_id(unique_model_id)? {
        Model::Dso2090 => &DSO2090,
        Model::Dso2150 => &DSO2150,
        Model::Dso2250 => &DSO2250,
        Model::Dso5200 => &DSO5200,
        Model::Dso5200a => &DSO5200A,
        Model::Dso6022be => &DSO6022BE,
    })
}

const GAIN_STEPS_8BIT: [f64; 9] = [0.08, 0.16, 0.40, 0.80, 1.60, 4.00, 8.0, 16.0, 40.0];
const GAIN_STEPS_5200: [f64; 9] = [0.16, 0.40, 0.80, 1.60, 4.00, 8.0, 16.0, 40.0, 80.0];

const VOLTAGE_LIMIT_8BIT: [[u16; 9]; HANTEK_CHANNELS] = [[255; 9]; HANTEK_CHANNELS];
const VOLTAGE_LIMIT_5200: [[u16; 9]; HANTEK_CHANNELS] =
    [[368, 454, 908, 368, 454, 908, 368, 454, 908]; HANTEK_CHANNELS];
// Based on testing; depends on the divider setting.
const VOLTAGE_LIMIT_6022: [[u16; 9]; HANTEK_CHANNELS] =
    [[25, 51, 103, 206, 412, 196, 392, 784, 1000]; HANTEK_CHANNELS];

const NO_GAIN_INDEX: [u8; 9] = [0; 9];
const NO_GAIN_DIV: [u8; 9] = [0; 9];

const BULK_2090: BulkRouting = BulkRouting {
    set_record_length: Some(BulkCode::SetTriggerAndSamplerate),
    set_channels: Some(BulkCode::SetTriggerAndSamplerate),
    set_gain: Some(BulkCode::SetGain),
    set_samplerate: Some(BulkCode::SetTriggerAndSamplerate),
    set_trigger: Some(BulkCode::SetTriggerAndSamplerate),
    set_pretrigger: Some(BulkCode::SetTriggerAndSamplerate),
};

const BULK_2250: BulkRouting = BulkRouting {
    set_record_length: Some(BulkCode::DSetBuffer),
    set_channels: Some(BulkCode::BSetChannels),
    set_gain: Some(BulkCode::SetGain),
    set_samplerate: Some(BulkCode::ESetTriggerOrSamplerate),
    set_trigger: Some(BulkCode::CSetTriggerOrSamplerate),
    set_pretrigger: Some(BulkCode::FSetBuffer),
};

const BULK_5200: BulkRouting = BulkRouting {
    set_record_length: Some(BulkCode::DSetBuffer),
    set_channels: Some(BulkCode::ESetTriggerOrSamplerate),
    set_gain: Some(BulkCode::SetGain),
    set_samplerate: Some(BulkCode::CSetTriggerOrSamplerate),
    set_trigger: Some(BulkCode::ESetTriggerOrSamplerate),
    set_pretrigger: Some(BulkCode::ESetTriggerOrSamplerate),
};

const BULK_6022: BulkRouting = BulkRouting {
    set_record_length: None,
    set_channels: None,
    set_gain: None,
    set_samplerate: None,
    set_trigger: None,
    set_pretrigger: None,
};

const CONTROL_RELAY_MODELS: ControlRouting = ControlRouting {
    set_offset: Some(ControlCode::SetOffset),
    set_relays: Some(ControlCode::SetRelays),
    set_voltdiv_ch1: None,
    set_voltdiv_ch2: None,
    set_timediv: None,
    acquire_hard_data: None,
};

const CONTROL_6022: ControlRouting = ControlRouting {
    set_offset: None,
    set_relays: None,
    set_voltdiv_ch1: Some(ControlCode::SetVoltDivCh1),
    set_voltdiv_ch2: Some(ControlCode::SetVoltDivCh2),
    set_timediv: Some(ControlCode::SetTimeDiv),
    acquire_hard_data: Some(ControlCode::AcquireHardData),
};

pub static DSO2090: ModelSpec = ModelSpec {
    model: Model::Dso2090,
    bulk: BULK_2090,
    control: CONTROL_RELAY_MODELS,
    samplerate_single: SamplerateLimits {
        base: 50e6,
        max: 50e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 10240, 32768],
    },
    samplerate_multi: SamplerateLimits {
        base: 100e6,
        max: 100e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 20480, 65536],
    },
    buffer_dividers: &[1000, 1, 1],
    gain_steps: &GAIN_STEPS_8BIT,
    gain_index: &[0, 1, 2, 0, 1, 2, 0, 1, 2],
    gain_div: &NO_GAIN_DIV,
    voltage_limit: &VOLTAGE_LIMIT_8BIT,
    sample_steps: &[],
    sample_div: &[],
    sample_bits: 8,
};

pub static DSO2150: ModelSpec = ModelSpec {
    model: Model::Dso2150,
    bulk: BULK_2090,
    control: CONTROL_RELAY_MODELS,
    samplerate_single: SamplerateLimits {
        base: 50e6,
        max: 75e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 10240, 32768],
    },
    samplerate_multi: SamplerateLimits {
        base: 100e6,
        max: 150e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 20480, 65536],
    },
    buffer_dividers: &[1000, 1, 1],
    gain_steps: &GAIN_STEPS_8BIT,
    gain_index: &[0, 1, 2, 0, 1, 2, 0, 1, 2],
    gain_div: &NO_GAIN_DIV,
    voltage_limit: &VOLTAGE_LIMIT_8BIT,
    sample_steps: &[],
    sample_div: &[],
    sample_bits: 8,
};

pub static DSO2250: ModelSpec = ModelSpec {
    model: Model::Dso2250,
    bulk: BULK_2250,
    control: CONTROL_RELAY_MODELS,
    samplerate_single: SamplerateLimits {
        base: 100e6,
        max: 100e6,
        max_downsampler: 65536,
        record_lengths: &[ROLL_RECORD_LENGTH, 10240, 524288],
    },
    samplerate_multi: SamplerateLimits {
        base: 200e6,
        max: 250e6,
        max_downsampler: 65536,
        record_lengths: &[ROLL_RECORD_LENGTH, 20480, 1048576],
    },
    buffer_dividers: &[1000, 1, 1],
    gain_steps: &GAIN_STEPS_8BIT,
    gain_index: &[0, 2, 3, 0, 2, 3, 0, 2, 3],
    gain_div: &NO_GAIN_DIV,
    voltage_limit: &VOLTAGE_LIMIT_8BIT,
    sample_steps: &[],
    sample_div: &[],
    sample_bits: 8,
};

pub static DSO5200: ModelSpec = ModelSpec {
    model: Model::Dso5200,
    bulk: BULK_5200,
    control: CONTROL_RELAY_MODELS,
    samplerate_single: SamplerateLimits {
        base: 100e6,
        max: 125e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 10240, 14336],
    },
    samplerate_multi: SamplerateLimits {
        base: 200e6,
        max: 250e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 20480, 28672],
    },
    buffer_dividers: &[1000, 1, 1],
    gain_steps: &GAIN_STEPS_5200,
    gain_index: &[1, 0, 0, 1, 0, 0, 1, 0, 0],
    gain_div: &NO_GAIN_DIV,
    voltage_limit: &VOLTAGE_LIMIT_5200,
    sample_steps: &[],
    sample_div: &[],
    sample_bits: 10,
};

pub static DSO5200A: ModelSpec = ModelSpec {
    model: Model::Dso5200a,
    bulk: BULK_5200,
    control: CONTROL_RELAY_MODELS,
    samplerate_single: SamplerateLimits {
        base: 100e6,
        max: 125e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 10240, 14336],
    },
    samplerate_multi: SamplerateLimits {
        base: 200e6,
        max: 250e6,
        max_downsampler: 131072,
        record_lengths: &[ROLL_RECORD_LENGTH, 20480, 28672],
    },
    buffer_dividers: &[1000, 1, 1],
    gain_steps: &GAIN_STEPS_5200,
    gain_index: &[1, 0, 0, 1, 0, 0, 1, 0, 0],
    gain_div: &NO_GAIN_DIV,
    voltage_limit: &VOLTAGE_LIMIT_5200,
    sample_steps: &[],
    sample_div: &[],
    sample_bits: 10,
};

pub static DSO6022BE: ModelSpec = ModelSpec {
    model: Model::Dso6022be,
    bulk: BULK_6022,
    control: CONTROL_6022,
    samplerate_single: SamplerateLimits {
        base: 1e6,
        max: 48e6,
        max_downsampler: 10,
        record_lengths: &[ROLL_RECORD_LENGTH, 10240],
    },
    samplerate_multi: SamplerateLimits {
        base: 1e6,
        max: 48e6,
        max_downsampler: 10,
        record_lengths: &[ROLL_RECORD_LENGTH, 20480],
    },
    buffer_dividers: &[1000, 1],
    gain_steps: &GAIN_STEPS_8BIT,
    gain_index: &NO_GAIN_INDEX,
    // Tested values; calculated dividers differ.
    gain_div: &[10, 10, 10, 10, 10, 2, 2, 2, 1],
    voltage_limit: &VOLTAGE_LIMIT_6022,
    sample_steps: &[1e5, 2e5, 5e5, 1e6, 2e6, 4e6, 8e6, 16e6, 24e6, 48e6],
    sample_div: &[10, 20, 50, 1, 2, 4, 8, 16, 24, 48],
    sample_bits: 8,
};
