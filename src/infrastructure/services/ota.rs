//! Shared OTA state
//!
//! The chunk buffer, write gate and session admission live in statics so the transport
//! (producer) and the pipeline task (consumer) can reach them without
//! sharing anything else. The announced image length and the progress
//! reports travel through the transport link.

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::warn;
use ota_pipeline::{ChunkBuffer, DeviceReset, FirmwareTransport, SessionAdmission, WriteGate};

use crate::config::{OTA_BUFFER_SLOTS, OTA_CHUNK_SIZE};
use crate::infrastructure::repositories::EspFirmwareFlash;

pub type OtaBuffer = ChunkBuffer<CriticalSectionRawMutex, OTA_CHUNK_SIZE, OTA_BUFFER_SLOTS>;
pub type OtaAdmission =
    SessionAdmission<'static, CriticalSectionRawMutex, OTA_CHUNK_SIZE, OTA_BUFFER_SLOTS>;

static OTA_BUFFER: OtaBuffer = ChunkBuffer::new();
static OTA_ADMISSION: OtaAdmission = SessionAdmission::new(&OTA_BUFFER);
static OTA_GATE: WriteGate<CriticalSectionRawMutex> = WriteGate::new();

static EXPECTED_LENGTH: critical_section::Mutex<Cell<Option<u32>>> =
    critical_section::Mutex::new(Cell::new(None));
static PROGRESS: Signal<CriticalSectionRawMutex, u8> = Signal::new();

static FIRMWARE_FLASH: Mutex<CriticalSectionRawMutex, RefCell<Option<EspFirmwareFlash>>> =
    Mutex::new(RefCell::new(None));

/// Park the flash driver until the first chunk launches the pipeline.
pub fn init_ota_service(flash: EspFirmwareFlash) {
    FIRMWARE_FLASH.lock(|cell| {
        cell.borrow_mut().replace(flash);
    });
}

pub(crate) fn take_firmware_flash() -> Option<EspFirmwareFlash> {
    FIRMWARE_FLASH.lock(|cell| cell.borrow_mut().take())
}

pub(crate) fn ota_buffer() -> &'static OtaBuffer {
    &OTA_BUFFER
}

pub(crate) fn ota_gate() -> &'static WriteGate<CriticalSectionRawMutex> {
    &OTA_GATE
}

pub(crate) fn ota_admission() -> &'static OtaAdmission {
    &OTA_ADMISSION
}

/// Transport side of the link: announce the image length, read progress.
pub(crate) fn announce_length(len: u32) {
    critical_section::with(|cs| EXPECTED_LENGTH.borrow(cs).set(Some(len)));
}

pub(crate) async fn wait_progress() -> u8 {
    PROGRESS.wait().await
}

/// Pipeline side of the link.
pub struct TransportLink;

impl FirmwareTransport for TransportLink {
    fn expected_length(&self) -> Option<u32> {
        critical_section::with(|cs| EXPECTED_LENGTH.borrow(cs).get())
    }

    fn send_progress(&mut self, percent: u8) {
        PROGRESS.signal(percent);
    }
}

pub struct SystemReset;

impl DeviceReset for SystemReset {
    fn reset(&mut self) -> ! {
        warn!("ota: restarting");
        esp_hal::system::software_reset()
    }
}
