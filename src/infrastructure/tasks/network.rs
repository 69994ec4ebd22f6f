use embassy_net::Runner;
use embassy_time::{Duration, Timer};
use esp_radio::wifi::{
    AuthMethod,
    ClientConfig,
    ModeConfig,
    WifiController,
    WifiDevice,
    WifiEvent,
    WifiStaState,
};
use log::{info, warn};

use crate::config;

/// Background task for connecting to the `WiFi` network
///
/// Keeps the station associated: waits for a disconnect, then reconnects.
#[embassy_executor::task]
pub async fn wifi_connection_task(mut controller: WifiController<'static>) {
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("network: disconnected");
            Timer::after(Duration::from_millis(2000)).await;
        }
        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = if config::WIFI.password.is_empty() {
                ClientConfig::default()
                    .with_ssid(config::WIFI.ssid.into())
                    .with_auth_method(AuthMethod::None)
            } else {
                ClientConfig::default()
                    .with_ssid(config::WIFI.ssid.into())
                    .with_password(config::WIFI.password.into())
            };
            if let Err(e) = controller.set_config(&ModeConfig::Client(client_config)) {
                warn!("network: invalid station config: {:?}", e);
                Timer::after(Duration::from_millis(5000)).await;
                continue;
            }
            if let Err(e) = controller.start_async().await {
                warn!("network: failed to start radio: {:?}", e);
                Timer::after(Duration::from_millis(5000)).await;
                continue;
            }
        }

        info!("network: connecting to {}", config::WIFI.ssid);
        if let Err(e) = controller.connect_async().await {
            warn!("network: error connecting: {:?}", e);
            Timer::after(Duration::from_millis(5000)).await;
        }
    }
}

/// Background task for running the network stack
#[embassy_executor::task]
pub async fn network_runner_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}
