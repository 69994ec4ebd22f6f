//! Target partition selection
//!
//! Runs once per session, before any byte is written.

use log::{error, info};

use crate::error::{FlashOp, OtaError};
use crate::ports::{FirmwareFlash, ImageState, Partition, PartitionKind};

/// Running partition and the inactive partition that receives the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSelection {
    pub running: Partition,
    pub target: Partition,
}

/// Pick the inactive OTA slot.
///
/// A running image still in `PendingVerify` is marked valid before the
/// target is resolved.
pub fn select_target<F: FirmwareFlash>(flash: &mut F) -> Result<TargetSelection, OtaError> {
    let running = flash
        .running_partition()
        .ok_or(OtaError::NoRunningPartition)?;

    let state = flash.image_state(&running).map_err(|e| {
        error!("ota: failed to read image state: {:?}", e);
        OtaError::Driver(FlashOp::ReadImageState)
    })?;
    if state == ImageState::PendingVerify {
        flash.mark_valid_cancel_rollback().map_err(|e| {
            error!("ota: failed to mark running image valid: {:?}", e);
            OtaError::Driver(FlashOp::MarkValid)
        })?;
        info!("ota: marked running image as valid");
    }

    let PartitionKind::App(slot) = running.kind else {
        return Err(OtaError::NotAppPartition);
    };
    let next = slot.counterpart().ok_or(OtaError::UnsupportedSlot(slot))?;
    let target = flash
        .find_partition(PartitionKind::App(next))
        .ok_or(OtaError::TargetMissing(next))?;

    info!(
        "ota: running {:?} at {:#x}, target {:?} at {:#x} ({} bytes)",
        slot, running.offset, next, target.offset, target.size
    );
    Ok(TargetSelection { running, target })
}
