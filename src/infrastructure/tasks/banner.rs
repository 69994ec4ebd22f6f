use embassy_time::Timer;
use log::info;

use crate::config::{BANNER, DEVICE, FIRMWARE};

/// Periodically logs what is running on the device.
#[embassy_executor::task]
pub async fn banner_task(flash_size: usize) {
    loop {
        info!(
            "banner: {} ({} cores), flash {} KiB, firmware {}, free heap {} bytes",
            DEVICE.chip,
            DEVICE.cores,
            flash_size / 1024,
            FIRMWARE.version,
            esp_alloc::HEAP.free()
        );
        Timer::after(BANNER.period).await;
    }
}
