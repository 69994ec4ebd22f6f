//! Collaborator contracts
//!
//! The pipeline only talks to the outside world through these traits. The
//! firmware provides ESP32 implementations; tests provide in-memory ones.

use core::fmt::Debug;

/// Application partition subtype (the slot an image lives in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSlot {
    Factory,
    Ota0,
    Ota1,
    Test,
}

impl AppSlot {
    /// The OTA slot that receives the next image when running from `self`.
    ///
    /// Only the two OTA slots have a counterpart.
    pub const fn counterpart(self) -> Option<AppSlot> {
        match self {
            AppSlot::Ota0 => Some(AppSlot::Ota1),
            AppSlot::Ota1 => Some(AppSlot::Ota0),
            AppSlot::Factory | AppSlot::Test => None,
        }
    }
}

/// Partition type as recorded in the partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    App(AppSlot),
    Data,
}

/// Location and type of a flash partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub kind: PartitionKind,
    pub offset: u32,
    pub size: u32,
}

impl Partition {
    pub const fn app(slot: AppSlot, offset: u32, size: u32) -> Self {
        Self {
            kind: PartitionKind::App(slot),
            offset,
            size,
        }
    }

    pub const fn app_slot(&self) -> Option<AppSlot> {
        match self.kind {
            PartitionKind::App(slot) => Some(slot),
            PartitionKind::Data => None,
        }
    }
}

/// OTA image state of an application partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    New,
    /// Booted once but not yet confirmed; the bootloader rolls back unless
    /// the image is marked valid.
    PendingVerify,
    Valid,
    Invalid,
    Aborted,
    Undefined,
}

/// Flash and partition driver.
///
/// A write session is represented by [`FirmwareFlash::Handle`]: it is
/// created by `begin_write`, borrowed by every `write` and consumed by
/// `end_write`, so it cannot outlive the session.
pub trait FirmwareFlash {
    type Error: Debug;
    type Handle;

    /// Partition the device is currently running from.
    fn running_partition(&mut self) -> Option<Partition>;

    /// OTA image state of `partition`.
    fn image_state(&mut self, partition: &Partition) -> Result<ImageState, Self::Error>;

    /// Mark the running image valid and cancel any pending rollback.
    fn mark_valid_cancel_rollback(&mut self) -> Result<(), Self::Error>;

    /// First partition of the given kind in the partition table.
    fn find_partition(&mut self, kind: PartitionKind) -> Option<Partition>;

    /// Open a write session on `partition`. `size_hint` is the expected
    /// image length in bytes.
    fn begin_write(
        &mut self,
        partition: &Partition,
        size_hint: u32,
    ) -> Result<Self::Handle, Self::Error>;

    /// Append `bytes` to the image being written.
    fn write(&mut self, handle: &mut Self::Handle, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Flush and close the write session.
    fn end_write(&mut self, handle: Self::Handle) -> Result<(), Self::Error>;

    /// Select `partition` as the image to boot on the next reset.
    fn set_boot_partition(&mut self, partition: &Partition) -> Result<(), Self::Error>;
}

/// Transport that delivers the firmware image.
pub trait FirmwareTransport {
    /// Total image length announced by the peer, if known yet.
    fn expected_length(&self) -> Option<u32>;

    /// Report write progress (0..=100) to the peer.
    fn send_progress(&mut self, percent: u8);
}

/// Device restart primitive.
pub trait DeviceReset {
    fn reset(&mut self) -> !;
}
