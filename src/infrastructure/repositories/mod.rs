mod firmware_flash;

pub use firmware_flash::{EspFirmwareFlash, EspFlashError, EspWriteHandle};
