use embassy_time::Duration;

pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
}

pub struct DeviceConfig {
    pub chip: &'static str,
    pub cores: u8,
    pub hostname: &'static str,
}

pub struct OtaConfig {
    /// TCP port the update listener accepts connections on (espota port)
    pub port: u16,
    /// Socket inactivity timeout
    pub socket_timeout: Duration,
    /// How long a rejected chunk is re-offered before the transfer is
    /// abandoned
    pub offer_timeout: Duration,
    pub offer_retry: Duration,
}

pub struct BlinkConfig {
    pub period: Duration,
}

pub struct BannerConfig {
    pub period: Duration,
}

pub struct FirmwareConfig {
    pub version: &'static str,
}

/// Largest chunk handed to the update pipeline (one flash sector)
pub const OTA_CHUNK_SIZE: usize = 4096;
/// Chunk buffer slots; with 4 KiB chunks this is an 8 KiB buffer
pub const OTA_BUFFER_SLOTS: usize = 2;

pub const WIFI: WifiConfig = WifiConfig {
    ssid: env!("WIFI_SSID"),
    password: env!("WIFI_PASSWORD"),
};

pub const DEVICE: DeviceConfig = DeviceConfig {
    chip: "esp32",
    cores: 2,
    hostname: "ota-esp",
};

pub const OTA: OtaConfig = OtaConfig {
    port: 3232,
    socket_timeout: Duration::from_secs(30),
    offer_timeout: Duration::from_secs(10),
    offer_retry: Duration::from_millis(10),
};

pub const BLINK: BlinkConfig = BlinkConfig {
    period: Duration::from_millis(1000),
};

pub const BANNER: BannerConfig = BannerConfig {
    period: Duration::from_secs(10),
};

pub const FIRMWARE: FirmwareConfig = FirmwareConfig {
    version: env!("BUILD_VERSION"),
};

#[macro_export]
macro_rules! led_gpio {
    ($p:expr) => {
        $p.GPIO2
    };
}
