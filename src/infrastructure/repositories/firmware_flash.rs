//! ESP-IDF partition and OTA data access
//!
//! Implements [`FirmwareFlash`] on top of the ESP-IDF partition table and the
//! `otadata` partition. Image bytes are written straight into the target
//! app partition: sectors are erased just ahead of the write cursor and
//! writes are kept 4-byte aligned, trailing bytes wait in a small tail
//! buffer until the next chunk (or `end_write`) completes the word.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use esp_bootloader_esp_idf::{
    ota::{Ota, OtaImageState},
    partitions::{
        self,
        AppPartitionSubType,
        DataPartitionSubType,
        PARTITION_TABLE_MAX_LEN,
        PartitionEntry,
        PartitionType,
        read_partition_table,
    },
};
use esp_storage::{FlashStorage, FlashStorageError};
use log::{debug, warn};
use ota_pipeline::{AppSlot, FirmwareFlash, ImageState, Partition, PartitionKind};

const ALIGN: usize = 4;
const ERASE_SECTOR: u32 = 4096;
const OTA_SLOT_COUNT: usize = 2;

#[derive(Debug)]
pub enum EspFlashError {
    PartitionTable(partitions::Error),
    MissingOtaData,
    Flash(FlashStorageError),
    /// The image does not fit into the target partition
    ImageTooLarge { len: u32, capacity: u32 },
    NotOtaSlot,
}

impl From<partitions::Error> for EspFlashError {
    fn from(e: partitions::Error) -> Self {
        EspFlashError::PartitionTable(e)
    }
}

impl From<FlashStorageError> for EspFlashError {
    fn from(e: FlashStorageError) -> Self {
        EspFlashError::Flash(e)
    }
}

impl From<AppSlot> for AppPartitionSubType {
    fn from(slot: AppSlot) -> Self {
        match slot {
            AppSlot::Factory => AppPartitionSubType::Factory,
            AppSlot::Ota0 => AppPartitionSubType::Ota0,
            AppSlot::Ota1 => AppPartitionSubType::Ota1,
            AppSlot::Test => AppPartitionSubType::Test,
        }
    }
}

fn slot_from_subtype(sub_type: AppPartitionSubType) -> Option<AppSlot> {
    match sub_type {
        AppPartitionSubType::Factory => Some(AppSlot::Factory),
        AppPartitionSubType::Ota0 => Some(AppSlot::Ota0),
        AppPartitionSubType::Ota1 => Some(AppSlot::Ota1),
        AppPartitionSubType::Test => Some(AppSlot::Test),
        _ => None,
    }
}

fn descriptor(entry: &PartitionEntry<'_>) -> Option<Partition> {
    let kind = match entry.partition_type() {
        PartitionType::App(sub_type) => PartitionKind::App(slot_from_subtype(sub_type)?),
        PartitionType::Data(_) => PartitionKind::Data,
        _ => return None,
    };
    Some(Partition {
        kind,
        offset: entry.offset(),
        size: entry.len(),
    })
}

impl From<OtaImageState> for ImageState {
    fn from(state: OtaImageState) -> Self {
        match state {
            OtaImageState::New => ImageState::New,
            OtaImageState::PendingVerify => ImageState::PendingVerify,
            OtaImageState::Valid => ImageState::Valid,
            OtaImageState::Invalid => ImageState::Invalid,
            OtaImageState::Aborted => ImageState::Aborted,
            OtaImageState::Undefined => ImageState::Undefined,
        }
    }
}

/// Open write session on an app partition.
pub struct EspWriteHandle {
    offset: u32,
    capacity: u32,
    written: u32,
    erased: u32,
    tail: [u8; ALIGN],
    tail_len: usize,
}

pub struct EspFirmwareFlash {
    flash: FlashStorage<'static>,
}

impl EspFirmwareFlash {
    pub fn new(flash: FlashStorage<'static>) -> Self {
        Self { flash }
    }

    /// Total flash size in bytes.
    pub fn capacity(&self) -> usize {
        self.flash.capacity()
    }

    fn with_ota<R>(
        &mut self,
        f: impl FnOnce(Ota<'_, FlashStorage<'static>>) -> Result<R, partitions::Error>,
    ) -> Result<R, EspFlashError> {
        let mut part_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
        let pt = read_partition_table(&mut self.flash, &mut part_buffer)?;
        let ota_part = pt
            .find_partition(PartitionType::Data(DataPartitionSubType::Ota))?
            .ok_or(EspFlashError::MissingOtaData)?;
        let mut ota_part = ota_part.as_embedded_storage(&mut self.flash);
        let ota = Ota::new(&mut ota_part, OTA_SLOT_COUNT)?;
        f(ota).map_err(EspFlashError::PartitionTable)
    }

    fn lookup(&mut self, sub_type: AppPartitionSubType) -> Option<Partition> {
        let mut part_buffer = [0u8; PARTITION_TABLE_MAX_LEN];
        let pt = read_partition_table(&mut self.flash, &mut part_buffer).ok()?;
        let entry = pt
            .find_partition(PartitionType::App(sub_type))
            .ok()
            .flatten()?;
        descriptor(&entry)
    }

    /// Erase whole sectors until `end` (partition relative) is covered.
    fn erase_until(&mut self, handle: &mut EspWriteHandle, end: u32) -> Result<(), EspFlashError> {
        if end <= handle.erased {
            return Ok(());
        }
        let target = end
            .saturating_add(ERASE_SECTOR - 1)
            / ERASE_SECTOR
            * ERASE_SECTOR;
        let target = target.min(handle.capacity);
        debug!(
            "flash: erasing {:#x}..{:#x}",
            handle.offset + handle.erased,
            handle.offset + target
        );
        self.flash
            .erase(handle.offset + handle.erased, handle.offset + target)?;
        handle.erased = target;
        Ok(())
    }

    fn program(&mut self, handle: &mut EspWriteHandle, data: &[u8]) -> Result<(), EspFlashError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = data.len() as u32;
        let end = handle.written.saturating_add(len);
        if end > handle.capacity {
            return Err(EspFlashError::ImageTooLarge {
                len: end,
                capacity: handle.capacity,
            });
        }
        self.erase_until(handle, end)?;
        self.flash.write(handle.offset + handle.written, data)?;
        handle.written = end;
        Ok(())
    }

    fn write_aligned_data(
        &mut self,
        handle: &mut EspWriteHandle,
        data: &[u8],
    ) -> Result<(), EspFlashError> {
        let mut idx = 0;

        // Complete partial word
        if handle.tail_len > 0 {
            let need = ALIGN - handle.tail_len;
            let take = need.min(data.len());
            handle.tail[handle.tail_len..handle.tail_len + take].copy_from_slice(&data[..take]);
            handle.tail_len += take;
            idx += take;

            if handle.tail_len == ALIGN {
                let tail = handle.tail;
                self.program(handle, &tail)?;
                handle.tail_len = 0;
                handle.tail.fill(0xFF);
            }
        }

        // Write aligned bulk
        let rem = &data[idx..];
        let aligned_len = rem.len() & !(ALIGN - 1);
        if aligned_len > 0 {
            self.program(handle, &rem[..aligned_len])?;
        }

        // Keep trailing bytes
        let tail_bytes = &rem[aligned_len..];
        if !tail_bytes.is_empty() {
            handle.tail[..tail_bytes.len()].copy_from_slice(tail_bytes);
            handle.tail_len = tail_bytes.len();
        }

        Ok(())
    }
}

impl FirmwareFlash for EspFirmwareFlash {
    type Error = EspFlashError;
    type Handle = EspWriteHandle;

    fn running_partition(&mut self) -> Option<Partition> {
        let sub_type = self
            .with_ota(|mut ota| ota.current_app_partition())
            .inspect_err(|e| warn!("flash: failed to read otadata: {:?}", e))
            .ok()?;
        self.lookup(sub_type)
    }

    fn image_state(&mut self, _partition: &Partition) -> Result<ImageState, EspFlashError> {
        self.with_ota(|mut ota| ota.current_ota_state())
            .map(ImageState::from)
    }

    fn mark_valid_cancel_rollback(&mut self) -> Result<(), EspFlashError> {
        self.with_ota(|mut ota| ota.set_current_ota_state(OtaImageState::Valid))
    }

    fn find_partition(&mut self, kind: PartitionKind) -> Option<Partition> {
        match kind {
            PartitionKind::App(slot) => self.lookup(slot.into()),
            PartitionKind::Data => None,
        }
    }

    fn begin_write(
        &mut self,
        partition: &Partition,
        size_hint: u32,
    ) -> Result<EspWriteHandle, EspFlashError> {
        if size_hint > partition.size {
            return Err(EspFlashError::ImageTooLarge {
                len: size_hint,
                capacity: partition.size,
            });
        }
        Ok(EspWriteHandle {
            offset: partition.offset,
            capacity: partition.size,
            written: 0,
            erased: 0,
            tail: [0xFF; ALIGN],
            tail_len: 0,
        })
    }

    fn write(&mut self, handle: &mut EspWriteHandle, bytes: &[u8]) -> Result<(), EspFlashError> {
        self.write_aligned_data(handle, bytes)
    }

    fn end_write(&mut self, mut handle: EspWriteHandle) -> Result<(), EspFlashError> {
        // Pad and write the final partial word (erased flash is 0xFF).
        if handle.tail_len != 0 {
            handle.tail[handle.tail_len..].fill(0xFF);
            let tail = handle.tail;
            self.program(&mut handle, &tail)?;
        }
        debug!(
            "flash: image closed, {} bytes at {:#x}",
            handle.written, handle.offset
        );
        Ok(())
    }

    fn set_boot_partition(&mut self, partition: &Partition) -> Result<(), EspFlashError> {
        let slot = match partition.app_slot() {
            Some(slot @ (AppSlot::Ota0 | AppSlot::Ota1)) => slot,
            _ => return Err(EspFlashError::NotOtaSlot),
        };
        self.with_ota(|mut ota| {
            ota.set_current_app_partition(slot.into())?;
            ota.set_current_ota_state(OtaImageState::New)
        })
    }
}
