//! Decoding of raw capture buffers into calibrated voltages.
//!
//! The device delivers one flat byte buffer. In normal mode the two
//! channels are interleaved sample by sample, in fast-rate mode a single
//! channel owns the whole buffer. 10-bit models append the two extra bits
//! of every sample to the second half of the buffer. All layouts start at
//! twice the decoded trigger point and wrap around the buffer end.

use crate::device::{Model, ModelSpec};
use crate::HANTEK_CHANNELS;

/// Samples the DSO-6022BE delivers before the usable record.
pub const DROP_6022_HEAD: usize = 0x410;
/// Samples the DSO-6022BE delivers after the usable record.
pub const DROP_6022_TAIL: usize = 0x3f0;

/// Zero level of the DSO-6022BE's unsigned sample bytes.
const CENTER_6022: i32 = 0x83;

/// Per-channel state the decoder needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelDecode {
    pub used: bool,
    pub gain_id: usize,
    /// Quantized readback of the committed offset, subtracted from every
    /// normalized sample.
    pub offset_real: f64,
}

/// Decodes `data` into per-channel voltage buffers.
///
/// `total_sample_count` is the sample total across channels, as recomputed
/// from the bytes actually received. In normal mode a channel buffer is
/// grown but never shrunk; unused channels are cleared.
pub fn decode_into(
    spec: &ModelSpec,
    channels: &[ChannelDecode; HANTEK_CHANNELS],
    fast_rate: bool,
    trigger_point: u32,
    data: &[u8],
    total_sample_count: usize,
    out: &mut [Vec<f64>],
) {
    if total_sample_count == 0 {
        return;
    }

    if fast_rate {
        decode_fast_rate(spec, channels, trigger_point, data, total_sample_count, out);
    } else {
        decode_normal(spec, channels, trigger_point, data, total_sample_count, out);
    }
}

fn decode_fast_rate(
    spec: &ModelSpec,
    channels: &[ChannelDecode; HANTEK_CHANNELS],
    trigger_point: u32,
    data: &[u8],
    total_sample_count: usize,
    out: &mut [Vec<f64>],
) {
    // One channel is using all buffers.
    let sample_count = total_sample_count;
    let channel = channels.iter().position(|c| c.used);

    for (index, buffer) in out.iter_mut().enumerate() {
        if Some(index) != channel {
            buffer.clear();
        }
    }

    let Some(channel) = channel else {
        return;
    };

    let limit = spec.voltage_limit[channel][channels[channel].gain_id] as f64;
    let gain = spec.gain_steps[channels[channel].gain_id];
    let offset = channels[channel].offset_real;
    out[channel].resize(sample_count, 0.0);

    let mut buffer_position = trigger_point as usize * 2;
    if spec.sample_bits > 8 {
        let extra_bits = (spec.sample_bits - 8) as usize;
        let extra_mask = ((0x00ffu16 << extra_bits) & 0xff00) as u16;

        for position in 0..sample_count {
            if buffer_position >= sample_count {
                buffer_position %= sample_count;
            }

            // The extra bits share one byte per channel group; their shift
            // depends on the position inside the group.
            let extra_position = buffer_position % HANTEK_CHANNELS;
            let shift = 8 - (HANTEK_CHANNELS - 1 - extra_position) * extra_bits;
            let value = data[buffer_position] as u16
                | ((data[sample_count + buffer_position - extra_position] as u16) << shift)
                    & extra_mask;

            out[channel][position] = (value as f64 / limit - offset) * gain;
            buffer_position += 1;
        }
    } else {
        for position in 0..sample_count {
            if buffer_position >= sample_count {
                buffer_position %= sample_count;
            }

            out[channel][position] = (data[buffer_position] as f64 / limit - offset) * gain;
            buffer_position += 1;
        }
    }
}

fn decode_normal(
    spec: &ModelSpec,
    channels: &[ChannelDecode; HANTEK_CHANNELS],
    trigger_point: u32,
    data: &[u8],
    total_sample_count: usize,
    out: &mut [Vec<f64>],
) {
    let is_6022 = spec.model == Model::Dso6022be;

    let mut sample_count = total_sample_count / HANTEK_CHANNELS;
    if is_6022 {
        sample_count = sample_count.saturating_sub(DROP_6022_HEAD + DROP_6022_TAIL);
    }

    for channel in 0..HANTEK_CHANNELS {
        if !channels[channel].used {
            out[channel].clear();
            continue;
        }

        if out[channel].len() < sample_count {
            out[channel].resize(sample_count, 0.0);
        }

        let limit = spec.voltage_limit[channel][channels[channel].gain_id] as f64;
        let gain = spec.gain_steps[channels[channel].gain_id];
        let offset = channels[channel].offset_real;

        let mut buffer_position = trigger_point as usize * 2;
        if spec.sample_bits > 8 {
            let extra_bits = (spec.sample_bits - 8) as usize;
            let extra_mask = ((0x00ffu16 << extra_bits) & 0xff00) as u16;
            let extra_index = 8 - channel * 2;

            for position in 0..sample_count {
                if buffer_position >= total_sample_count {
                    buffer_position %= total_sample_count;
                }

                let value = data[buffer_position + HANTEK_CHANNELS - 1 - channel] as u16
                    | ((data[total_sample_count + buffer_position] as u16) << extra_index)
                        & extra_mask;
                out[channel][position] = (value as f64 / limit - offset) * gain;
                buffer_position += HANTEK_CHANNELS;
            }
        } else {
            if is_6022 {
                buffer_position += channel + DROP_6022_HEAD * 2;
            } else {
                buffer_position += HANTEK_CHANNELS - 1 - channel;
            }

            for position in 0..sample_count {
                if buffer_position >= total_sample_count {
                    buffer_position %= total_sample_count;
                }

                out[channel][position] = if is_6022 {
                    // Unsigned samples centered on 0x83, no offset window.
                    (data[buffer_position] as i32 - CENTER_6022) as f64 / limit * gain
                } else {
                    (data[buffer_position] as f64 / limit - offset) * gain
                };
                buffer_position += HANTEK_CHANNELS;
            }
        }
    }
}
