//! Session admission
//!
//! Entry point for every chunk the transport receives. The first chunk of a
//! boot cycle launches the pipeline; every chunk, the first included, goes
//! straight into the buffer whatever state the pipeline is in.

use core::fmt::Debug;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{debug, error, info, warn};

use crate::buffer::{ChunkBuffer, PutError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The pipeline task could not be started; the device must restart
    LaunchFailed,
    /// The buffer refused the chunk; the transport has to offer it again
    /// or give up
    Rejected(PutError),
}

pub struct SessionAdmission<'a, M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize> {
    buffer: &'a ChunkBuffer<M, MAX_CHUNK, SLOTS>,
    started: AtomicBool,
}

impl<'a, M: RawMutex, const MAX_CHUNK: usize, const SLOTS: usize>
    SessionAdmission<'a, M, MAX_CHUNK, SLOTS>
{
    pub const fn new(buffer: &'a ChunkBuffer<M, MAX_CHUNK, SLOTS>) -> Self {
        Self {
            buffer,
            started: AtomicBool::new(false),
        }
    }

    /// Whether the pipeline has been launched in this boot cycle.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Hand a received chunk to the pipeline.
    ///
    /// `launch` is called only for the first chunk of the boot cycle. If it
    /// fails the chunk is not buffered and [`AdmissionError::LaunchFailed`]
    /// is returned.
    pub fn on_chunk_received<E, L>(&self, bytes: &[u8], launch: L) -> Result<usize, AdmissionError>
    where
        E: Debug,
        L: FnOnce() -> Result<(), E>,
    {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(e) = launch() {
                error!("ota: failed to start update task: {:?}", e);
                self.started.store(false, Ordering::Release);
                return Err(AdmissionError::LaunchFailed);
            }
            info!("ota: update task started");
        }

        self.buffer.put(bytes).map_err(|e| {
            match e {
                PutError::Full { .. } => debug!("ota: buffer full, {} bytes refused", bytes.len()),
                PutError::Oversized { .. } => warn!("ota: chunk rejected: {:?}", e),
            }
            AdmissionError::Rejected(e)
        })
    }
}
