use ota_pipeline::{PipelineConfig, UpdatePipeline};

use crate::infrastructure::repositories::EspFirmwareFlash;
use crate::infrastructure::services::{SystemReset, TransportLink, ota_buffer, ota_gate};

/// Drains the OTA buffer into flash, then restarts the device.
///
/// Spawned once per boot cycle, by the first received chunk.
#[embassy_executor::task]
pub(crate) async fn ota_pipeline_task(flash: EspFirmwareFlash) {
    let pipeline = UpdatePipeline::new(
        ota_buffer(),
        ota_gate(),
        flash,
        TransportLink,
        PipelineConfig::DEFAULT,
    );
    pipeline.run_until_restart(&mut SystemReset).await;
}
