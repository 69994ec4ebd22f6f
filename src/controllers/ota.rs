//! OTA Controller
//!
//! Sits between the network transport and the update pipeline: announces
//! the image length, offers chunks through the session admission and
//! launches the pipeline task on the first chunk.

use embassy_executor::{SpawnError, Spawner};
use embassy_time::{Instant, Timer};
use log::{error, info};
use ota_pipeline::{AdmissionError, PutError};

use crate::config::OTA;
use crate::infrastructure::services::{announce_length, ota_admission, take_firmware_flash};
use crate::infrastructure::tasks::ota_pipeline_task;

#[derive(Debug)]
enum LaunchError {
    /// The flash driver was already handed out
    FlashUnavailable,
    Spawn(SpawnError),
}

pub struct OtaController {
    spawner: Spawner,
}

impl OtaController {
    pub fn new(spawner: Spawner) -> Self {
        Self { spawner }
    }

    /// Whether an update session has already been started in this boot.
    pub fn is_session_started(&self) -> bool {
        ota_admission().is_started()
    }

    pub fn on_ota_start(&self, expected_size: u32) {
        info!("ota: incoming image, size={} bytes", expected_size);
        announce_length(expected_size);
    }

    /// Hand a chunk to the pipeline, waiting while the buffer is full.
    ///
    /// Gives up after `OTA.offer_timeout`. A failed pipeline launch restarts
    /// the device.
    pub async fn on_ota_chunk(&self, bytes: &[u8]) -> Result<(), PutError> {
        let deadline = Instant::now() + OTA.offer_timeout;
        loop {
            match ota_admission().on_chunk_received(bytes, || self.launch_pipeline()) {
                Ok(_) => return Ok(()),
                Err(AdmissionError::Rejected(PutError::Full { .. }))
                    if Instant::now() < deadline =>
                {
                    Timer::after(OTA.offer_retry).await;
                }
                Err(AdmissionError::Rejected(e)) => return Err(e),
                Err(AdmissionError::LaunchFailed) => {
                    error!("ota: cannot run update pipeline, restarting");
                    esp_hal::system::software_reset()
                }
            }
        }
    }

    fn launch_pipeline(&self) -> Result<(), LaunchError> {
        let flash = take_firmware_flash().ok_or(LaunchError::FlashUnavailable)?;
        self.spawner
            .spawn(ota_pipeline_task(flash))
            .map_err(LaunchError::Spawn)
    }
}
