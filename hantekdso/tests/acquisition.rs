//! Behavioral tests of the acquisition state machines, driven tick by
//! tick against the mock device.

use hantekdso::protocol::bulk::BulkCode;
use hantekdso::protocol::capture::CaptureState;
use hantekdso::transport::mock::MockDevice;
use hantekdso::transport::TransportError;
use hantekdso::{DsoError, DsoEvent, HantekDsoControl, TriggerMode};

const DSO2090_ID: u32 = 0;

fn configured_2090() -> HantekDsoControl<MockDevice> {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.set_channel_used(0, true).unwrap();
    dso.set_channel_used(1, true).unwrap();
    dso
}

#[test]
fn test_cycle_time_tracks_record_duration() {
    let dso = configured_2090();
    // 10240 samples at 100 MS/s polled four times per fill: 25 ms.
    assert_eq!(dso.cycle_time().as_millis(), 25);
}

#[test]
fn test_standard_capture_cycle_publishes_samples() {
    let mut dso = configured_2090();
    let mut events = dso.subscribe();
    dso.start_sampling().unwrap();

    dso.device_mut().sample_data = {
        // Interleaved pairs: channel 0 reads the second byte of each.
        let mut data = Vec::with_capacity(20480);
        for _ in 0..10240 {
            data.push(10u8);
            data.push(20u8);
        }
        data
    };
    dso.device_mut()
        .push_capture_state(CaptureState::Waiting, 0);
    dso.device_mut().push_capture_state(CaptureState::Ready, 0);
    dso.device_mut().push_capture_state(CaptureState::Ready, 0);

    // Tick 1: WAITING starts a capture.
    dso.tick().unwrap();
    assert_eq!(dso.device().bulk_sent(BulkCode::CaptureStart).len(), 1);

    // Tick 2: READY retrieves and publishes, then restarts the capture.
    dso.tick().unwrap();
    assert_eq!(dso.device().bulk_sent(BulkCode::GetData).len(), 1);
    assert_eq!(dso.device().bulk_sent(BulkCode::CaptureStart).len(), 2);

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(events.contains(&DsoEvent::SamplesAvailable));

    let frame = dso.samples();
    let frame = frame.read().unwrap();
    assert!(!frame.append);
    assert_eq!(frame.samplerate, 1e8);
    assert_eq!(frame.data[0].len(), 10240);
    assert_eq!(frame.data[1].len(), 10240);
    // Channel 0 decodes the 20s, channel 1 the 10s.
    let scale = 0.08 / 255.0;
    assert!((frame.data[0][0] - 20.0 * scale).abs() < 1e-9);
    assert!((frame.data[1][0] - 10.0 * scale).abs() < 1e-9);
}

#[test]
fn test_single_mode_stops_after_one_capture() {
    let mut dso = configured_2090();
    dso.set_trigger_mode(TriggerMode::Single).unwrap();
    let mut events = dso.subscribe();
    dso.start_sampling().unwrap();

    dso.device_mut().sample_data = vec![0x80; 20480];
    dso.device_mut()
        .push_capture_state(CaptureState::Waiting, 0);
    dso.device_mut().push_capture_state(CaptureState::Ready, 0);

    dso.tick().unwrap();
    assert!(dso.is_sampling());
    dso.tick().unwrap();
    assert!(!dso.is_sampling());

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(events.contains(&DsoEvent::SamplingStopped));
}

#[test]
fn test_trigger_point_is_decoded_from_poll() {
    let mut dso = configured_2090();
    dso.start_sampling().unwrap();

    dso.device_mut().sample_data = (0..20480u32).map(|i| (i % 251) as u8).collect();
    dso.device_mut()
        .push_capture_state(CaptureState::Waiting, 0);
    // Encoded 0x03 decodes to trigger point 2, so decoding starts at
    // buffer position 4 + 1 for channel 0.
    dso.device_mut().push_capture_state(CaptureState::Ready, 0x03);

    dso.tick().unwrap();
    dso.tick().unwrap();

    let frame = dso.samples();
    let frame = frame.read().unwrap();
    let scale = 0.08 / 255.0;
    assert!((frame.data[0][0] - 5.0 * scale).abs() < 1e-9);
}

#[test]
fn test_roll_mode_round_robin() {
    // S6: four ticks advance the roll machine exactly once each; the
    // fourth retrieves data with the append flag set.
    let mut dso = configured_2090();
    dso.set_record_length(0).unwrap();
    dso.start_sampling().unwrap();

    dso.device_mut().sample_data = vec![0x40; 512];

    dso.tick().unwrap();
    assert_eq!(dso.device().bulk_sent(BulkCode::CaptureStart).len(), 1);
    dso.tick().unwrap();
    assert_eq!(dso.device().bulk_sent(BulkCode::TriggerEnabled).len(), 1);
    dso.tick().unwrap();
    assert_eq!(dso.device().bulk_sent(BulkCode::ForceTrigger).len(), 1);
    dso.tick().unwrap();
    assert_eq!(dso.device().bulk_sent(BulkCode::GetData).len(), 1);

    // No capture state polls happen in roll mode.
    assert!(dso.device().bulk_sent(BulkCode::GetCaptureState).is_empty());

    let frame = dso.samples();
    let frame = frame.read().unwrap();
    assert!(frame.append);
    assert_eq!(frame.data[0].len(), 256);
}

#[test]
fn test_roll_mode_holds_while_stopped() {
    let mut dso = configured_2090();
    dso.set_record_length(0).unwrap();

    dso.tick().unwrap();
    dso.tick().unwrap();
    assert!(dso.device().bulk_sent(BulkCode::CaptureStart).is_empty());
    assert!(dso.device().bulk_sent(BulkCode::TriggerEnabled).is_empty());
}

#[test]
fn test_failed_send_stays_pending_and_retries() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.device_mut()
        .bulk_errors
        .push_back(TransportError::Usb(-7));

    // The initial trigger/samplerate payload fails on the first tick but
    // stays pending and goes out on the second.
    dso.tick().unwrap();
    assert!(dso
        .device()
        .bulk_sent(BulkCode::SetTriggerAndSamplerate)
        .is_empty());

    dso.tick().unwrap();
    assert_eq!(
        dso.device()
            .bulk_sent(BulkCode::SetTriggerAndSamplerate)
            .len(),
        1
    );

    // A third tick does not resend it.
    dso.tick().unwrap();
    assert_eq!(
        dso.device()
            .bulk_sent(BulkCode::SetTriggerAndSamplerate)
            .len(),
        1
    );
}

#[test]
fn test_no_device_is_fatal() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    let mut events = dso.subscribe();
    dso.device_mut()
        .bulk_errors
        .push_back(TransportError::NoDevice);

    let result = dso.tick();
    assert!(matches!(result, Err(DsoError::Transport(TransportError::NoDevice))));

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(events.contains(&DsoEvent::CommunicationError));
}

#[tokio::test]
async fn test_run_terminates_on_fatal_error() {
    let mut dso = HantekDsoControl::new(MockDevice::new(DSO2090_ID)).unwrap();
    dso.device_mut()
        .bulk_errors
        .push_back(TransportError::NoDevice);

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), dso.run()).await;
    assert!(matches!(
        result,
        Ok(Err(DsoError::Transport(TransportError::NoDevice)))
    ));
}

#[test]
fn test_stale_buffer_hysteresis() {
    // Shrinking the expected sample count keeps one oversized read so no
    // stale samples remain in the scope buffer.
    let mut dso = configured_2090();
    dso.start_sampling().unwrap();
    dso.device_mut().sample_data = vec![0x30; 65536 * 2];

    // A capture with the large record length first.
    dso.set_record_length(2).unwrap();
    dso.device_mut()
        .push_capture_state(CaptureState::Waiting, 0);
    dso.device_mut().push_capture_state(CaptureState::Ready, 0);
    dso.tick().unwrap();
    dso.tick().unwrap();
    {
        let frame = dso.samples();
        let frame = frame.read().unwrap();
        assert_eq!(frame.data[0].len(), 32768);
    }

    // Shrink the record length; the next retrieval still reads the old
    // size once.
    dso.set_record_length(1).unwrap();
    dso.device_mut().push_capture_state(CaptureState::Ready, 0);
    dso.tick().unwrap();
    {
        let frame = dso.samples();
        let frame = frame.read().unwrap();
        // The frame keeps the larger buffer from the flush read.
        assert_eq!(frame.data[0].len(), 32768);
    }

    // After the flush the regular size applies again.
    dso.device_mut().push_capture_state(CaptureState::Ready, 0);
    dso.tick().unwrap();
}
