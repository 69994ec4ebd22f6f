//! End-to-end sessions: a producer feeding the buffer while the pipeline
//! drains it.

mod common;

use embassy_futures::join::join;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use embassy_time::{Duration, Timer};
use futures::executor::block_on;

use common::{Event, FakeFlash, FakeTransport, OTA0, OTA1};
use ota_pipeline::{
    AdmissionError,
    ChunkBuffer,
    DeviceReset,
    FlashOp,
    ImageState,
    OtaError,
    PipelineConfig,
    PipelineState,
    PutError,
    SessionAdmission,
    SessionOutcome,
    UpdatePipeline,
    WriteGate,
};

type Buffer = ChunkBuffer<NoopRawMutex, 1024, 2>;
type Gate = WriteGate<NoopRawMutex>;

fn test_config() -> PipelineConfig {
    PipelineConfig::DEFAULT
        .with_chunk_timeout(Duration::from_millis(200))
        .with_gate_timeout(Duration::from_millis(200))
        .with_grace_period(Duration::from_millis(1))
}

/// Offer every chunk through admission, waiting while the buffer is full.
async fn feed(admission: &SessionAdmission<'_, NoopRawMutex, 1024, 2>, chunks: &[Vec<u8>]) {
    for chunk in chunks {
        loop {
            match admission.on_chunk_received(chunk, || Ok::<(), ()>(())) {
                Ok(accepted) => {
                    assert_eq!(accepted, chunk.len());
                    break;
                }
                Err(AdmissionError::Rejected(PutError::Full { .. })) => {
                    Timer::after(Duration::from_millis(1)).await;
                }
                Err(e) => panic!("unexpected admission error: {e:?}"),
            }
        }
    }
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn four_chunks_complete_and_switch_boot() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    let admission = SessionAdmission::new(&buffer);
    let firmware = image(4096);
    let chunks: Vec<Vec<u8>> = firmware.chunks(1024).map(<[u8]>::to_vec).collect();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(4096),
        test_config(),
    );

    let (outcome, ()) = block_on(join(pipeline.run(), feed(&admission, &chunks)));

    assert!(matches!(outcome, SessionOutcome::Completed(_)));
    assert_eq!(outcome.terminal_state(), PipelineState::Restarting);
    assert!(outcome.terminal_state().is_terminal());
    assert_eq!(outcome.report().received, 4096);
    assert_eq!(
        outcome.report().trail.as_slice(),
        &[
            PipelineState::Idle,
            PipelineState::Selecting,
            PipelineState::AwaitingLength,
            PipelineState::BeginWrite,
            PipelineState::Receiving,
            PipelineState::Finalizing,
            PipelineState::SwitchBoot,
            PipelineState::Restarting,
        ]
    );

    let flash = pipeline.flash();
    assert_eq!(flash.writes(), vec![1024, 1024, 1024, 1024]);
    assert_eq!(flash.image, firmware);
    assert_eq!(flash.boot, Some(OTA1));
    assert_eq!(pipeline.transport().progress, vec![25, 50, 75, 100]);
    assert_eq!(buffer.pending_bytes(), 0);
}

#[test]
fn running_from_slot_one_targets_slot_zero() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    buffer.put(&[0xAA; 16]).unwrap();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA1),
        FakeTransport::announcing(16),
        test_config(),
    );
    let outcome = block_on(pipeline.run());

    assert_eq!(outcome.report().target, Some(OTA0));
    assert_eq!(pipeline.flash().boot, Some(OTA0));
}

#[test]
fn stalled_transfer_times_out_without_switching_boot() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    let admission = SessionAdmission::new(&buffer);
    let chunks: Vec<Vec<u8>> = image(3072).chunks(1024).map(<[u8]>::to_vec).collect();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(4096),
        test_config().with_chunk_timeout(Duration::from_millis(50)),
    );

    let (outcome, ()) = block_on(join(pipeline.run(), feed(&admission, &chunks)));

    match &outcome {
        SessionOutcome::Failed { error, during, .. } => {
            assert_eq!(*error, OtaError::ChunkTimeout);
            assert_eq!(*during, PipelineState::Receiving);
        }
        SessionOutcome::Completed(_) => panic!("stalled session must not complete"),
    }
    assert_eq!(outcome.terminal_state(), PipelineState::ErrorRestart);
    assert_eq!(outcome.report().received, 3072);
    assert!(!outcome.report().trail.contains(&PipelineState::Finalizing));
    assert!(!outcome.report().trail.contains(&PipelineState::SwitchBoot));

    let flash = pipeline.flash();
    assert_eq!(flash.image.len(), 3072);
    assert_eq!(flash.boot, None);
    assert!(!flash.events.contains(&Event::EndWrite));
    assert_eq!(pipeline.transport().progress, vec![25, 50, 75]);
}

#[test]
fn no_data_at_all_times_out() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(1024),
        test_config().with_chunk_timeout(Duration::from_millis(20)),
    );

    let outcome = block_on(pipeline.run());

    assert_eq!(outcome.error(), Some(OtaError::ChunkTimeout));
    assert!(pipeline.flash().writes().is_empty());
}

#[test]
fn zero_length_fails_before_opening_a_write_session() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(0),
        test_config(),
    );

    let outcome = block_on(pipeline.run());

    match outcome {
        SessionOutcome::Failed { error, during, .. } => {
            assert_eq!(error, OtaError::ZeroLength);
            assert_eq!(during, PipelineState::AwaitingLength);
        }
        SessionOutcome::Completed(_) => panic!("zero-length session must fail"),
    }
    assert!(!pipeline.flash().opened_write_session());
    assert_eq!(pipeline.state(), PipelineState::ErrorRestart);
}

#[test]
fn unknown_length_fails_before_opening_a_write_session() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    let mut transport = FakeTransport::announcing(0);
    transport.length = None;
    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        transport,
        test_config(),
    );

    let outcome = block_on(pipeline.run());

    assert_eq!(outcome.error(), Some(OtaError::LengthUnavailable));
    assert!(!pipeline.flash().opened_write_session());
}

#[test]
fn pending_image_is_confirmed_before_the_first_write() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    buffer.put(&[1; 8]).unwrap();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0).with_image_state(ImageState::PendingVerify),
        FakeTransport::announcing(8),
        test_config(),
    );
    block_on(pipeline.run());

    let events = &pipeline.flash().events;
    let mark = events.iter().position(|e| *e == Event::MarkValid).unwrap();
    let begin = events
        .iter()
        .position(|e| matches!(e, Event::BeginWrite { .. }))
        .unwrap();
    assert!(mark < begin);
}

#[test]
fn begin_write_receives_the_declared_length() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    buffer.put(&[7; 100]).unwrap();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(100),
        test_config(),
    );
    block_on(pipeline.run());

    assert!(pipeline.flash().events.contains(&Event::BeginWrite {
        target: OTA1,
        size_hint: 100,
    }));
}

#[test]
fn write_failure_restarts_without_switching_boot() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    buffer.put(&[1; 64]).unwrap();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0).failing_on(FlashOp::Write),
        FakeTransport::announcing(128),
        test_config(),
    );
    let outcome = block_on(pipeline.run());

    assert_eq!(outcome.error(), Some(OtaError::Driver(FlashOp::Write)));
    assert_eq!(outcome.report().received, 0);
    assert!(pipeline.transport().progress.is_empty());
    assert_eq!(pipeline.flash().boot, None);
    // The failed chunk was still returned to the buffer.
    assert_eq!(buffer.pending_bytes(), 0);
}

#[test]
fn finalize_and_boot_switch_failures_are_reported_in_their_state() {
    for (op, state) in [
        (FlashOp::EndWrite, PipelineState::Finalizing),
        (FlashOp::SetBootPartition, PipelineState::SwitchBoot),
        (FlashOp::BeginWrite, PipelineState::BeginWrite),
        (FlashOp::ReadImageState, PipelineState::Selecting),
    ] {
        let buffer = Buffer::new();
        let gate = Gate::new();
        buffer.put(&[1; 32]).unwrap();
        let mut pipeline = UpdatePipeline::new(
            &buffer,
            &gate,
            FakeFlash::running_from(OTA0).failing_on(op),
            FakeTransport::announcing(32),
            test_config(),
        );

        match block_on(pipeline.run()) {
            SessionOutcome::Failed { error, during, .. } => {
                assert_eq!(error, OtaError::Driver(op));
                assert_eq!(during, state);
            }
            SessionOutcome::Completed(_) => panic!("{op:?} failure must not complete"),
        }
        assert_eq!(pipeline.flash().boot, None);
    }
}

#[test]
fn progress_is_monotonic_and_reaches_100_only_at_the_end() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    let admission = SessionAdmission::new(&buffer);
    let sizes = [1, 333, 7, 512, 1024, 90, 33];
    let total: usize = sizes.iter().sum();
    let chunks: Vec<Vec<u8>> = sizes.iter().map(|&n| vec![0x5A; n]).collect();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(u32::try_from(total).unwrap()),
        test_config(),
    );
    let (outcome, ()) = block_on(join(pipeline.run(), feed(&admission, &chunks)));

    assert_eq!(outcome.terminal_state(), PipelineState::Restarting);
    let progress = &pipeline.transport().progress;
    assert_eq!(progress.len(), sizes.len());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|&p| p <= 100));
    assert_eq!(progress.iter().filter(|&&p| p == 100).count(), 1);
    assert_eq!(*progress.last().unwrap(), 100);
    assert_eq!(pipeline.flash().image.len(), total);
}

#[test]
fn held_write_gate_times_out_without_finalizing() {
    let buffer = Buffer::new();
    let gate = Gate::new();
    buffer.put(&[9; 64]).unwrap();

    let mut pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(64),
        test_config().with_gate_timeout(Duration::from_millis(20)),
    );
    let outcome = block_on(async {
        let _permit = gate.acquire(Duration::from_millis(1)).await.unwrap();
        pipeline.run().await
    });

    match &outcome {
        SessionOutcome::Failed { error, during, .. } => {
            assert_eq!(*error, OtaError::GateTimeout);
            assert_eq!(*during, PipelineState::Receiving);
        }
        SessionOutcome::Completed(_) => panic!("session must not complete without the gate"),
    }
    assert_eq!(outcome.terminal_state(), PipelineState::ErrorRestart);
    assert!(!outcome.report().trail.contains(&PipelineState::Finalizing));
    assert!(!outcome.report().trail.contains(&PipelineState::SwitchBoot));
    assert!(pipeline.flash().writes().is_empty());
    assert_eq!(pipeline.flash().boot, None);
    assert!(!gate.is_held());
    // The chunk was never taken.
    assert_eq!(buffer.pending_bytes(), 64);
}

/// Records when the reset happens, then unwinds in place of a real reboot.
struct RecordingReset {
    at: Option<Instant>,
}

impl DeviceReset for RecordingReset {
    fn reset(&mut self) -> ! {
        self.at = Some(Instant::now());
        panic!("device reset");
    }
}

/// Time from the start of the session until the reset, given the bytes
/// available and the announced length.
fn time_until_reset(image: &[u8], announced: u32) -> std::time::Duration {
    let buffer = Buffer::new();
    let gate = Gate::new();
    buffer.put(image).unwrap();

    let pipeline = UpdatePipeline::new(
        &buffer,
        &gate,
        FakeFlash::running_from(OTA0),
        FakeTransport::announcing(announced),
        test_config().with_grace_period(Duration::from_millis(50)),
    );
    let mut reset = RecordingReset { at: None };
    let started = Instant::now();

    let result = catch_unwind(AssertUnwindSafe(|| {
        block_on(pipeline.run_until_restart(&mut reset));
    }));

    assert!(result.is_err(), "run_until_restart must end in a reset");
    reset.at.expect("reset was not called") - started
}

#[test]
fn completed_session_resets_after_the_grace_period() {
    let elapsed = time_until_reset(&[0x42; 16], 16);
    assert!(elapsed >= std::time::Duration::from_millis(50));
}

#[test]
fn failed_session_resets_after_the_grace_period() {
    let elapsed = time_until_reset(&[], 0);
    assert!(elapsed >= std::time::Duration::from_millis(50));
}
