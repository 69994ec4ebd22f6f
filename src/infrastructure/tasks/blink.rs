use embassy_time::Timer;
use esp_hal::gpio::Output;

use crate::config::BLINK;

/// Toggles the status LED forever.
#[embassy_executor::task]
pub async fn blink_task(mut led: Output<'static>) {
    loop {
        led.toggle();
        Timer::after(BLINK.period).await;
    }
}
