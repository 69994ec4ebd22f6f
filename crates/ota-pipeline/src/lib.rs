//! Firmware update pipeline
//!
//! Buffers firmware chunks delivered by a transport, writes them one at a
//! time into the inactive OTA slot and switches the boot target once the
//! whole image is on flash. Any failure ends the session with a device
//! restart; nothing is persisted between sessions.
//!
//! The crate is hardware-agnostic: flash access, the transport and the
//! device reset are described by the traits in [`ports`].
#![cfg_attr(not(test), no_std)]

pub mod admission;
pub mod buffer;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod ports;
pub mod selector;
pub mod session;

pub use admission::{AdmissionError, SessionAdmission};
pub use buffer::{Chunk, ChunkBuffer, ChunkGrant, PutError};
pub use config::PipelineConfig;
pub use error::{ErrorKind, FlashOp, OtaError};
pub use gate::{GatePermit, WriteGate};
pub use pipeline::{PipelineState, SessionOutcome, SessionReport, UpdatePipeline};
pub use ports::{
    AppSlot,
    DeviceReset,
    FirmwareFlash,
    FirmwareTransport,
    ImageState,
    Partition,
    PartitionKind,
};
pub use selector::{TargetSelection, select_target};
pub use session::{UpdateSession, progress_percent};
