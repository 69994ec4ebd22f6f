mod ota;

pub use ota::{OtaAdmission, OtaBuffer, SystemReset, TransportLink, init_ota_service};
pub(crate) use ota::{
    announce_length,
    ota_admission,
    ota_buffer,
    ota_gate,
    take_firmware_flash,
    wait_progress,
};
