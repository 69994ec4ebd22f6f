use core::str::FromStr;

use embassy_net::{DhcpConfig, Runner, Stack, StackResources};
use embassy_time::{Duration, Timer};
use esp_hal::peripherals::WIFI;
use esp_hal::rng::Rng;
use esp_radio::InitializationError;
use esp_radio::wifi::{Config as WifiConfig, WifiController, WifiDevice, WifiError};
use heapless::String;

use crate::config;
use crate::mk_static;

const MAX_CONNECTIONS: usize = 4;

#[derive(Debug)]
pub enum NetworkInitError {
    Radio(InitializationError),
    Wifi(WifiError),
    Hostname,
}

impl From<InitializationError> for NetworkInitError {
    fn from(e: InitializationError) -> Self {
        NetworkInitError::Radio(e)
    }
}

impl From<WifiError> for NetworkInitError {
    fn from(e: WifiError) -> Self {
        NetworkInitError::Wifi(e)
    }
}

/// Bring up the radio and build a DHCP station stack.
pub fn init_network_stack(
    wifi_device: WIFI<'static>,
) -> Result<
    (
        Stack<'static>,
        Runner<'static, WifiDevice<'static>>,
        WifiController<'static>,
    ),
    NetworkInitError,
> {
    let esp_radio_ctrl = &*mk_static!(esp_radio::Controller<'static>, esp_radio::init()?);
    let (controller, interfaces) =
        esp_radio::wifi::new(esp_radio_ctrl, wifi_device, WifiConfig::default())?;

    let mut dhcp_config = DhcpConfig::default();
    let hostname =
        String::from_str(config::DEVICE.hostname).map_err(|()| NetworkInitError::Hostname)?;
    dhcp_config.hostname = Some(hostname);

    let net_config = embassy_net::Config::dhcpv4(dhcp_config);
    let network_resources = mk_static!(
        StackResources<MAX_CONNECTIONS>,
        StackResources::<MAX_CONNECTIONS>::new()
    );
    let (stack, runner) =
        embassy_net::new(interfaces.sta, net_config, network_resources, get_seed());

    Ok((stack, runner, controller))
}

fn get_seed() -> u64 {
    let rng = Rng::new();
    u64::from(rng.random()) << 32 | u64::from(rng.random())
}

/// Wait for full network connectivity (link + IP address)
pub async fn wait_for_connection(stack: Stack<'_>) -> embassy_net::StaticConfigV4 {
    while !stack.is_link_up() {
        Timer::after(Duration::from_millis(100)).await;
    }
    loop {
        if let Some(config) = stack.config_v4() {
            return config;
        }
        Timer::after(Duration::from_millis(100)).await;
    }
}
