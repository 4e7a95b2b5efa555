//! Wire-level tests of the user API against the mock device: every call
//! must leave the right bytes in the right payload, observed as they are
//! drained onto the transport.

use hantekdso::protocol::bulk::BulkCode;
use hantekdso::protocol::control::ControlCode;
use hantekdso::transport::mock::MockDevice;
use hantekdso::{Coupling, DsoError, DsoEvent, HantekDsoControl, Slope};
use hex_literal::hex;

const DSO2090_ID: u32 = 0;
const DSO2250_ID: u32 = 2;
const DSO5200_ID: u32 = 3;
const DSO6022_ID: u32 = 5;

fn drain_events(
    events: &mut tokio::sync::broadcast::Receiver<DsoEvent>,
) -> Vec<DsoEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[test]
fn test_unknown_model_fails_construction() {
    let result = HantekDsoControl::new(MockDevice::new(99));
    assert!(matches!(result, Err(DsoError::UnknownModel(99))));
}

#[test]
fn test_initial_announce_events() {
    let dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    let mut events = dso.subscribe();
    dso.announce_settings();

    let events = drain_events(&mut events);
    assert!(events.contains(&DsoEvent::AvailableRecordLengthsChanged(vec![
        u32::MAX,
        10240,
        32768
    ])));
    assert!(events.contains(&DsoEvent::RecordLengthChanged(10240)));
    assert!(events.contains(&DsoEvent::SamplerateChanged(1e8)));
    assert!(events
        .iter()
        .any(|e| matches!(e, DsoEvent::SamplerateLimitsChanged { .. })));
}

#[test]
fn test_6022_announces_samplerate_steps() {
    let dso = HantekDsoControl::new(MockDevice::new(DSO6022_ID)).unwrap();
    let mut events = dso.subscribe();
    dso.announce_settings();

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        DsoEvent::SamplerateSet { mode: 1, steps } if steps.len() == 10 && steps[9] == 480.0
    )));
}

#[test]
fn test_6022_samplerate_selects_timediv() {
    // S3: no bulk commands on this model; the discrete step table drives
    // a control command instead.
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO6022_ID)).unwrap();
    let mut events = dso.subscribe();

    let realized = dso.set_samplerate(48e6).unwrap();
    assert_eq!(realized, 48e6);

    let events = drain_events(&mut events);
    assert!(events.contains(&DsoEvent::SamplerateChanged(48e6)));
    assert!(events
        .iter()
        .any(|e| matches!(e, DsoEvent::RecordTimeChanged(t) if (t - 8240.0 / 48e6).abs() < 1e-12)));

    dso.tick().unwrap();
    let sent = dso.device().control_sent(ControlCode::SetTimeDiv);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].as_ref(), &[48]);

    // No bulk traffic at all on the 6022BE.
    assert!(dso.device().bulk_log.is_empty());
}

#[test]
fn test_6022_record_time_picks_highest_fitting_step() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO6022_ID)).unwrap();

    // 1 ms of record time: 8e6 * 1e-3 = 8000 samples fits the 8240
    // budget, 16e6 does not.
    let realized = dso.set_record_time(1e-3).unwrap();
    assert_eq!(realized, 8e6);

    dso.tick().unwrap();
    let sent = dso.device().control_sent(ControlCode::SetTimeDiv);
    assert_eq!(sent.last().unwrap().as_ref(), &[8]);
}

#[test]
fn test_2090_samplerate_commits_downsampler() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();

    // S1: 10 MS/s out of the 50 MHz base needs downsampler 5, carried by
    // samplerate id 3 with the 0xffff fast marker.
    let realized = dso.set_samplerate(10e6).unwrap();
    assert_eq!(realized, 10e6);

    dso.tick().unwrap();
    let sent = dso.device().bulk_sent(BulkCode::SetTriggerAndSamplerate);
    assert_eq!(sent.len(), 1);
    let payload = &sent[0];
    // Samplerate id 3 in bits 5-6, downsampling mode off.
    assert_eq!(payload[2] & 0x60, 0x60);
    assert_eq!(payload[2] & 0x80, 0x00);
    assert_eq!(&payload[4..6], &[0xff, 0xff]);
}

#[test]
fn test_2090_slow_downsampler_encoding() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();

    // 50 MHz / 20: even slow-path factor, stored as 0x10001 - 10.
    let realized = dso.set_samplerate(2.5e6).unwrap();
    assert_eq!(realized, 2.5e6);

    dso.tick().unwrap();
    let payload = dso
        .device()
        .bulk_sent(BulkCode::SetTriggerAndSamplerate)
        .pop()
        .unwrap();
    assert_eq!(payload[2] & 0x80, 0x80);
    assert_eq!(&payload[4..6], &[0xf7, 0xff]);
}

#[test]
fn test_2250_samplerate_encoding() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2250_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();

    // 100 MHz / 4 = 25 MS/s: samplerate field carries 0x10001 - 4.
    let realized = dso.set_samplerate(25e6).unwrap();
    assert_eq!(realized, 25e6);

    dso.tick().unwrap();
    let payload = dso
        .device()
        .bulk_sent(BulkCode::ESetTriggerOrSamplerate)
        .pop()
        .unwrap();
    assert_eq!(payload[2] & 0x02, 0x02);
    assert_eq!(&payload[4..6], &[0xfd, 0xff]);
}

#[test]
fn test_5200_samplerate_split() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO5200_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();

    // 11.1 MS/s needs downsampler 9: slow = 3, fast = 3, committed as
    // 4-3 and 0xffff-3.
    let realized = dso.set_samplerate(11.1e6).unwrap();
    assert!((realized - 100e6 / 9.0).abs() < 1.0);

    dso.tick().unwrap();
    let payload = dso
        .device()
        .bulk_sent(BulkCode::CSetTriggerOrSamplerate)
        .pop()
        .unwrap();
    assert_eq!(&payload[2..4], &[0xfc, 0xff]);
    assert_eq!(payload[4], 0x01);
}

#[test]
fn test_record_time_never_overshoots_rate() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();

    // 1 ms over 10240 samples asks for 10.24 MS/s; the max-allowed mode
    // rounds the downsampler up to 5, realizing 10 MS/s.
    let duration = dso.set_record_time(1e-3).unwrap();
    assert!((duration - 10240.0 / 10e6).abs() < 1e-12);
}

#[test]
fn test_2090_fast_rate_switches_limits_but_not_flag() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    let mut events = dso.subscribe();

    // 80 MS/s exceeds the two-channel maximum, so the single active
    // channel switches to the fast-rate limit set.
    let realized = dso.set_samplerate(80e6).unwrap();
    assert_eq!(realized, 100e6);

    let events = drain_events(&mut events);
    assert!(events.contains(&DsoEvent::AvailableRecordLengthsChanged(vec![
        u32::MAX,
        20480,
        65536
    ])));
    assert!(events.contains(&DsoEvent::RecordLengthChanged(20480)));

    dso.tick().unwrap();
    let payload = dso
        .device()
        .bulk_sent(BulkCode::SetTriggerAndSamplerate)
        .pop()
        .unwrap();
    // The fast-rate bit stays off on this model for protocol
    // compatibility, even with the multi limits selected.
    assert_eq!(payload[3] & 0x04, 0x00);
    assert_eq!(payload[2] & 0x60, 0x20); // samplerate id 1
}

#[test]
fn test_2090_pretrigger_position_encoding() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();

    dso.set_pretrigger_position(0.0).unwrap();
    dso.tick().unwrap();

    let payload = dso
        .device()
        .bulk_sent(BulkCode::SetTriggerAndSamplerate)
        .pop()
        .unwrap();
    // 0x7ffff - 10240 = 0x7d7ff across bytes 6, 7 and 10.
    assert_eq!(payload[6], 0xff);
    assert_eq!(payload[7], 0xd7);
    assert_eq!(payload[10], 0x07);
}

#[test]
fn test_record_length_updates_and_reports() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();

    let length = dso.set_record_length(2).unwrap();
    assert_eq!(length, 32768);

    // Out of range record length ids are rejected.
    assert!(matches!(
        dso.set_record_length(9),
        Err(DsoError::Parameter)
    ));
}

#[test]
fn test_gain_commits_index_and_relays() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();

    // 0.3 V/div rounds up to the 0.4 step, hardware index 2.
    let realized = dso.set_gain(0, 0.3).unwrap();
    assert_eq!(realized, 0.4);

    dso.tick().unwrap();
    let gain = dso.device().bulk_sent(BulkCode::SetGain).pop().unwrap();
    assert_eq!(gain[2] & 0x07, 0x02);

    let relays = dso.device().control_sent(ControlCode::SetRelays).pop().unwrap();
    assert_eq!(relays[2], 0x04); // <1V relay closed
    assert_eq!(relays[3], 0x08); // <100mV relay closed
}

#[test]
fn test_6022_gain_uses_voltdiv_controls() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO6022_ID)).unwrap();

    let realized = dso.set_gain(1, 5.0).unwrap();
    assert_eq!(realized, 8.0);

    dso.tick().unwrap();
    let sent = dso.device().control_sent(ControlCode::SetVoltDivCh2);
    assert_eq!(sent.last().unwrap().as_ref(), &[2]);
    assert!(dso.device().bulk_log.is_empty());
}

#[test]
fn test_offset_round_trip() {
    let mut device = MockDevice::new(DSO2090_ID);
    device.set_offset_limits(0, 0, 0x0100, 0x0200);
    let mut dso = HantekDsoControl::new(device).unwrap();

    let offset_real = dso.set_offset(0, 0.5).unwrap();
    assert!((offset_real - 0.5).abs() < 1.0 / 256.0);

    dso.tick().unwrap();
    let payload = dso.device().control_sent(ControlCode::SetOffset).pop().unwrap();
    assert_eq!(&payload[0..2], &[0x01, 0x80]);
}

#[test]
fn test_trigger_source_and_relays() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();

    dso.set_trigger_source(false, 1).unwrap();
    dso.tick().unwrap();

    let payload = dso
        .device()
        .bulk_sent(BulkCode::SetTriggerAndSamplerate)
        .pop()
        .unwrap();
    // Channel 1 encodes as 1 - id = 0.
    assert_eq!(payload[2] & 0x03, 0x00);

    let relays = dso.device().control_sent(ControlCode::SetRelays).pop().unwrap();
    assert_eq!(relays[7], !0x80);

    // Special source EXT closes the trigger relay and pins the level.
    dso.set_trigger_source(true, 0).unwrap();
    dso.tick().unwrap();
    let relays = dso.device().control_sent(ControlCode::SetRelays).pop().unwrap();
    assert_eq!(relays[7], 0x80);
    let offset = dso.device().control_sent(ControlCode::SetOffset).pop().unwrap();
    assert_eq!(&offset[4..6], &[0x00, 0x7f]);

    assert!(matches!(
        dso.set_trigger_source(false, 7),
        Err(DsoError::Parameter)
    ));
}

#[test]
fn test_trigger_slope_bits() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2250_ID)).unwrap();

    dso.set_trigger_slope(Slope::Negative).unwrap();
    dso.tick().unwrap();

    let payload = dso
        .device()
        .bulk_sent(BulkCode::CSetTriggerOrSamplerate)
        .pop()
        .unwrap();
    assert_eq!(payload[2] & 0x08, 0x08);
}

#[test]
fn test_2250_channel_2_alone_uses_alternate_code() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2250_ID)).unwrap();

    dso.set_channel_used(1, true).unwrap();
    dso.tick().unwrap();

    let payload = dso.device().bulk_sent(BulkCode::BSetChannels).pop().unwrap();
    assert_eq!(payload[2], 0x03);

    // With both channels active the general code applies.
    dso.set_channel_used(0, true).unwrap();
    dso.tick().unwrap();
    let payload = dso.device().bulk_sent(BulkCode::BSetChannels).pop().unwrap();
    assert_eq!(payload[2], 0x02);
}

#[test]
fn test_coupling_is_a_relay() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();

    dso.set_coupling(0, Coupling::Dc).unwrap();
    dso.tick().unwrap();
    let relays = dso.device().control_sent(ControlCode::SetRelays).pop().unwrap();
    assert_eq!(relays[1], 0x02);

    dso.set_coupling(0, Coupling::Ac).unwrap();
    dso.tick().unwrap();
    let relays = dso.device().control_sent(ControlCode::SetRelays).pop().unwrap();
    assert_eq!(relays[1], !0x02);
}

#[test]
fn test_string_command_overwrites_payload() -> anyhow::Result<()> {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID))?;
    dso.tick()?; // flush the initial pending set

    dso.string_command("send bulk 01 00 e5 0a")?;
    dso.tick()?;
    let payload = dso
        .device()
        .bulk_sent(BulkCode::SetTriggerAndSamplerate)
        .pop()
        .unwrap();
    assert_eq!(&payload[..4], hex!("01 00 e5 0a"));

    dso.string_command("send control b4 12 34")?;
    dso.tick()?;
    let payload = dso.device().control_sent(ControlCode::SetOffset).pop().unwrap();
    assert_eq!(&payload[..2], hex!("12 34"));

    // Commands the model does not implement are rejected.
    assert!(matches!(
        dso.string_command("send bulk 0b 00"),
        Err(DsoError::Unsupported)
    ));
    assert!(matches!(
        dso.string_command("send"),
        Err(DsoError::Parameter)
    ));

    Ok(())
}

#[test]
fn test_disconnected_device_fails_api_calls() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.device_mut().connected = false;

    assert!(matches!(dso.set_samplerate(1e6), Err(DsoError::Connection)));
    assert!(matches!(
        dso.set_gain(0, 1.0),
        Err(DsoError::Connection)
    ));
    assert!(matches!(
        dso.set_channel_used(0, true),
        Err(DsoError::Connection)
    ));
}

#[test]
fn test_channel_index_is_validated() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();

    assert!(matches!(dso.set_gain(2, 1.0), Err(DsoError::Parameter)));
    assert!(matches!(
        dso.set_offset(5, 0.5),
        Err(DsoError::Parameter)
    ));
    assert!(matches!(
        dso.set_trigger_level(2, 0.0),
        Err(DsoError::Parameter)
    ));
}
