//! Update pipeline
//!
//! Long-lived worker that drains the chunk buffer into the inactive OTA
//! slot. The session walks a fixed sequence of states; any error jumps to
//! [`PipelineState::ErrorRestart`]. Both terminal states end with a device
//! restart, see [`UpdatePipeline::run_until_restart`].

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Timer;
use heapless::Vec;
use log::{debug, error, info};

use crate::buffer::ChunkBuffer;
use crate::config::PipelineConfig;
use crate::error::{FlashOp, OtaError};
use crate::gate::WriteGate;
use crate::ports::{DeviceReset, FirmwareFlash, FirmwareTransport, Partition};
use crate::selector::{TargetSelection, select_target};
use crate::session::UpdateSession;

const TRAIL_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Selecting,
    AwaitingLength,
    BeginWrite,
    Receiving,
    Finalizing,
    SwitchBoot,
    Restarting,
    ErrorRestart,
}

impl PipelineState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Restarting | PipelineState::ErrorRestart)
    }
}

/// What a session did before reaching its terminal state.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub target: Option<Partition>,
    pub total: u32,
    /// Bytes handed to the flash driver
    pub received: u32,
    /// Last progress value sent to the transport
    pub progress: u8,
    /// States visited, in order
    pub trail: Vec<PipelineState, TRAIL_LEN>,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The image was written and the boot partition switched
    Completed(SessionReport),
    Failed {
        error: OtaError,
        /// State in which the error happened
        during: PipelineState,
        report: SessionReport,
    },
}

impl SessionOutcome {
    pub const fn terminal_state(&self) -> PipelineState {
        match self {
            SessionOutcome::Completed(_) => PipelineState::Restarting,
            SessionOutcome::Failed { .. } => PipelineState::ErrorRestart,
        }
    }

    pub const fn report(&self) -> &SessionReport {
        match self {
            SessionOutcome::Completed(report) | SessionOutcome::Failed { report, .. } => report,
        }
    }

    pub const fn error(&self) -> Option<OtaError> {
        match self {
            SessionOutcome::Completed(_) => None,
            SessionOutcome::Failed { error, .. } => Some(*error),
        }
    }
}

pub struct UpdatePipeline<'a, M, F, T, const MAX_CHUNK: usize, const SLOTS: usize>
where
    M: RawMutex,
    F: FirmwareFlash,
    T: FirmwareTransport,
{
    buffer: &'a ChunkBuffer<M, MAX_CHUNK, SLOTS>,
    gate: &'a WriteGate<M>,
    flash: F,
    transport: T,
    config: PipelineConfig,
    state: PipelineState,
    trail: Vec<PipelineState, TRAIL_LEN>,
}

impl<'a, M, F, T, const MAX_CHUNK: usize, const SLOTS: usize>
    UpdatePipeline<'a, M, F, T, MAX_CHUNK, SLOTS>
where
    M: RawMutex,
    F: FirmwareFlash,
    T: FirmwareTransport,
{
    pub fn new(
        buffer: &'a ChunkBuffer<M, MAX_CHUNK, SLOTS>,
        gate: &'a WriteGate<M>,
        flash: F,
        transport: T,
        config: PipelineConfig,
    ) -> Self {
        let mut trail = Vec::new();
        let _ = trail.push(PipelineState::Idle);
        Self {
            buffer,
            gate,
            flash,
            transport,
            config,
            state: PipelineState::Idle,
            trail,
        }
    }

    pub const fn state(&self) -> PipelineState {
        self.state
    }

    pub const fn flash(&self) -> &F {
        &self.flash
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the session up to its terminal state without restarting.
    pub async fn run(&mut self) -> SessionOutcome {
        let mut report = SessionReport::default();
        let result = self.drive(&mut report).await;
        match result {
            Ok(()) => {
                self.enter(PipelineState::Restarting);
                report.trail.clone_from(&self.trail);
                SessionOutcome::Completed(report)
            }
            Err(error) => {
                let during = self.state;
                error!("ota: session failed in {:?}: {}", during, error);
                self.enter(PipelineState::ErrorRestart);
                report.trail.clone_from(&self.trail);
                SessionOutcome::Failed {
                    error,
                    during,
                    report,
                }
            }
        }
    }

    /// Run the session, wait for the grace period and restart the device.
    ///
    /// Never returns: both terminal states end in [`DeviceReset::reset`].
    pub async fn run_until_restart<R: DeviceReset>(mut self, reset: &mut R) {
        match self.run().await {
            SessionOutcome::Completed(report) => {
                info!(
                    "ota: update successful ({} bytes), rebooting...",
                    report.received
                );
            }
            SessionOutcome::Failed { .. } => {
                info!("ota: rebooting to restart the update process");
            }
        }
        Timer::after(self.config.grace_period).await;
        reset.reset()
    }

    fn enter(&mut self, next: PipelineState) {
        info!("ota: {:?} -> {:?}", self.state, next);
        self.state = next;
        let _ = self.trail.push(next);
    }

    async fn drive(&mut self, report: &mut SessionReport) -> Result<(), OtaError> {
        self.enter(PipelineState::Selecting);
        let TargetSelection { target, .. } = select_target(&mut self.flash)?;
        report.target = Some(target);

        self.enter(PipelineState::AwaitingLength);
        let total = match self.transport.expected_length() {
            None => return Err(OtaError::LengthUnavailable),
            Some(0) => return Err(OtaError::ZeroLength),
            Some(total) => total,
        };
        report.total = total;
        info!("ota: total length {} bytes", total);
        let mut session = UpdateSession::new(target, total);

        self.enter(PipelineState::BeginWrite);
        let mut handle = self.flash.begin_write(&target, total).map_err(|e| {
            error!("ota: begin write failed: {:?}", e);
            OtaError::Driver(FlashOp::BeginWrite)
        })?;

        self.enter(PipelineState::Receiving);
        let result = self.receive(&mut session, &mut handle).await;
        report.received = session.received();
        report.progress = session.progress();
        result?;
        info!("ota: flash upload done, {} bytes", session.received());

        self.enter(PipelineState::Finalizing);
        self.flash.end_write(handle).map_err(|e| {
            error!("ota: end write failed: {:?}", e);
            OtaError::Driver(FlashOp::EndWrite)
        })?;

        self.enter(PipelineState::SwitchBoot);
        self.flash.set_boot_partition(session.target()).map_err(|e| {
            error!("ota: set boot partition failed: {:?}", e);
            OtaError::Driver(FlashOp::SetBootPartition)
        })?;

        Ok(())
    }

    async fn receive(
        &mut self,
        session: &mut UpdateSession,
        handle: &mut F::Handle,
    ) -> Result<(), OtaError> {
        loop {
            let permit = self.gate.acquire(self.config.gate_timeout).await?;
            let chunk = self.buffer.take(self.config.chunk_timeout).await?;

            if let Err(e) = self.flash.write(handle, &chunk) {
                permit.release();
                error!("ota: write failed: {:?}", e);
                return Err(OtaError::Driver(FlashOp::Write));
            }
            let len = chunk.len();
            chunk.release();

            let percent = session.record(len);
            debug!(
                "ota: recv {} bytes, total {}/{}",
                len,
                session.received(),
                session.total()
            );
            self.transport.send_progress(percent);
            debug!("ota: sent progress {}%", percent);
            permit.release();

            if session.is_complete() {
                return Ok(());
            }
        }
    }
}
