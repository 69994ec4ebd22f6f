#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::Duration;

use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::{clock::CpuClock, timer::timg::TimerGroup};
use esp_storage::FlashStorage;
use log::{error, info};

use ota_esp::config::FIRMWARE;
use ota_esp::controllers::OtaController;
use ota_esp::infrastructure::drivers::{init_network_stack, wait_for_connection};
use ota_esp::infrastructure::repositories::EspFirmwareFlash;
use ota_esp::infrastructure::services::init_ota_service;
use ota_esp::infrastructure::tasks::{
    banner_task,
    blink_task,
    network_runner_task,
    ota_listener_task,
    wifi_connection_task,
};
use ota_esp::{led_gpio, mk_static};

esp_bootloader_esp_idf::esp_app_desc!();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();
    info!("boot: firmware {}", FIRMWARE.version);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Allocate heap memory (64 + 32 KB)
    esp_alloc::heap_allocator!(
        #[unsafe(link_section = ".dram2_uninit")] size: 64 * 1024
    );
    esp_alloc::heap_allocator!(size: 32 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let flash = EspFirmwareFlash::new(FlashStorage::new(peripherals.FLASH));
    let flash_size = flash.capacity();
    init_ota_service(flash);

    let led = Output::new(led_gpio!(peripherals), Level::Low, OutputConfig::default());
    spawner.spawn(blink_task(led)).ok();
    spawner.spawn(banner_task(flash_size)).ok();

    match init_network_stack(peripherals.WIFI) {
        Ok((stack, runner, controller)) => {
            spawner.spawn(wifi_connection_task(controller)).ok();
            spawner.spawn(network_runner_task(runner)).ok();

            let ip = wait_for_connection(stack).await;
            info!("network: connected, address {}", ip.address);

            let ota_controller = mk_static!(OtaController, OtaController::new(spawner));
            spawner.spawn(ota_listener_task(stack, ota_controller)).ok();
        }
        Err(e) => error!("network: failed to initialize: {:?}", e),
    }

    loop {
        embassy_time::Timer::after(Duration::from_secs(5)).await;
    }
}
