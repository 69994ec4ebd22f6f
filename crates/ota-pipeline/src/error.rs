use core::fmt;

use crate::ports::AppSlot;

/// Flash driver operation, used to tell which call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    ReadImageState,
    MarkValid,
    BeginWrite,
    Write,
    EndWrite,
    SetBootPartition,
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A bounded wait on the buffer or the write gate expired
    TransientTimeout,
    /// The flash or partition driver reported a failure
    Driver,
    /// Partition layout, image length or task setup is unusable
    Config,
}

/// Error type for the update session
///
/// Every variant ends the session with a device restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    /// No chunk arrived within the wait bound
    ChunkTimeout,
    /// The write gate could not be acquired within the wait bound
    GateTimeout,
    Driver(FlashOp),
    NoRunningPartition,
    NotAppPartition,
    /// The running slot has no OTA counterpart
    UnsupportedSlot(AppSlot),
    /// The counterpart slot is missing from the partition table
    TargetMissing(AppSlot),
    LengthUnavailable,
    ZeroLength,
    /// The pipeline task could not be started
    LaunchFailed,
}

impl OtaError {
    pub const fn kind(self) -> ErrorKind {
        match self {
            OtaError::ChunkTimeout | OtaError::GateTimeout => ErrorKind::TransientTimeout,
            OtaError::Driver(_) => ErrorKind::Driver,
            OtaError::NoRunningPartition
            | OtaError::NotAppPartition
            | OtaError::UnsupportedSlot(_)
            | OtaError::TargetMissing(_)
            | OtaError::LengthUnavailable
            | OtaError::ZeroLength
            | OtaError::LaunchFailed => ErrorKind::Config,
        }
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaError::ChunkTimeout => write!(f, "timed out waiting for firmware data"),
            OtaError::GateTimeout => write!(f, "timed out waiting for the write gate"),
            OtaError::Driver(op) => write!(f, "flash driver failed during {op:?}"),
            OtaError::NoRunningPartition => write!(f, "running partition not found"),
            OtaError::NotAppPartition => write!(f, "running partition is not an app partition"),
            OtaError::UnsupportedSlot(slot) => {
                write!(f, "running partition {slot:?} is not an OTA slot")
            }
            OtaError::TargetMissing(slot) => write!(f, "OTA partition {slot:?} not found"),
            OtaError::LengthUnavailable => write!(f, "firmware length is unknown"),
            OtaError::ZeroLength => write!(f, "firmware length is zero"),
            OtaError::LaunchFailed => write!(f, "failed to start the update task"),
        }
    }
}
