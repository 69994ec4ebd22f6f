//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use ota_pipeline::{
    AppSlot,
    FirmwareFlash,
    FirmwareTransport,
    FlashOp,
    ImageState,
    Partition,
    PartitionKind,
};

pub const OTA0: Partition = Partition::app(AppSlot::Ota0, 0x1_0000, 0x10_0000);
pub const OTA1: Partition = Partition::app(AppSlot::Ota1, 0x11_0000, 0x10_0000);
pub const FACTORY: Partition = Partition::app(AppSlot::Factory, 0x21_0000, 0x10_0000);
pub const NVS: Partition = Partition {
    kind: PartitionKind::Data,
    offset: 0x9000,
    size: 0x6000,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ImageState,
    MarkValid,
    BeginWrite { target: Partition, size_hint: u32 },
    Write(usize),
    EndWrite,
    SetBoot(Partition),
}

#[derive(Debug)]
pub struct FakeError(pub FlashOp);

pub struct FakeHandle {
    target: Partition,
}

pub struct FakeFlash {
    pub running: Option<Partition>,
    pub image_state: ImageState,
    pub partitions: Vec<Partition>,
    /// Operation that fails when reached
    pub fail_on: Option<FlashOp>,
    pub events: Vec<Event>,
    pub image: Vec<u8>,
    pub boot: Option<Partition>,
}

impl FakeFlash {
    pub fn running_from(running: Partition) -> Self {
        Self {
            running: Some(running),
            image_state: ImageState::Valid,
            partitions: vec![NVS, OTA0, OTA1],
            fail_on: None,
            events: Vec::new(),
            image: Vec::new(),
            boot: None,
        }
    }

    pub fn with_image_state(mut self, state: ImageState) -> Self {
        self.image_state = state;
        self
    }

    pub fn failing_on(mut self, op: FlashOp) -> Self {
        self.fail_on = Some(op);
        self
    }

    pub fn writes(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Write(len) => Some(*len),
                _ => None,
            })
            .collect()
    }

    pub fn opened_write_session(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, Event::BeginWrite { .. }))
    }

    fn check(&self, op: FlashOp) -> Result<(), FakeError> {
        if self.fail_on == Some(op) {
            Err(FakeError(op))
        } else {
            Ok(())
        }
    }
}

impl FirmwareFlash for FakeFlash {
    type Error = FakeError;
    type Handle = FakeHandle;

    fn running_partition(&mut self) -> Option<Partition> {
        self.running
    }

    fn image_state(&mut self, _partition: &Partition) -> Result<ImageState, FakeError> {
        self.events.push(Event::ImageState);
        self.check(FlashOp::ReadImageState)?;
        Ok(self.image_state)
    }

    fn mark_valid_cancel_rollback(&mut self) -> Result<(), FakeError> {
        self.events.push(Event::MarkValid);
        self.check(FlashOp::MarkValid)?;
        self.image_state = ImageState::Valid;
        Ok(())
    }

    fn find_partition(&mut self, kind: PartitionKind) -> Option<Partition> {
        self.partitions.iter().copied().find(|p| p.kind == kind)
    }

    fn begin_write(&mut self, partition: &Partition, size_hint: u32) -> Result<FakeHandle, FakeError> {
        self.events.push(Event::BeginWrite {
            target: *partition,
            size_hint,
        });
        self.check(FlashOp::BeginWrite)?;
        self.image.clear();
        Ok(FakeHandle { target: *partition })
    }

    fn write(&mut self, handle: &mut FakeHandle, bytes: &[u8]) -> Result<(), FakeError> {
        self.events.push(Event::Write(bytes.len()));
        self.check(FlashOp::Write)?;
        assert!(self.image.len() + bytes.len() <= handle.target.size as usize);
        self.image.extend_from_slice(bytes);
        Ok(())
    }

    fn end_write(&mut self, _handle: FakeHandle) -> Result<(), FakeError> {
        self.events.push(Event::EndWrite);
        self.check(FlashOp::EndWrite)
    }

    fn set_boot_partition(&mut self, partition: &Partition) -> Result<(), FakeError> {
        self.events.push(Event::SetBoot(*partition));
        self.check(FlashOp::SetBootPartition)?;
        self.boot = Some(*partition);
        Ok(())
    }
}

pub struct FakeTransport {
    pub length: Option<u32>,
    pub progress: Vec<u8>,
}

impl FakeTransport {
    pub fn announcing(length: u32) -> Self {
        Self {
            length: Some(length),
            progress: Vec::new(),
        }
    }
}

impl FirmwareTransport for FakeTransport {
    fn expected_length(&self) -> Option<u32> {
        self.length
    }

    fn send_progress(&mut self, percent: u8) {
        self.progress.push(percent);
    }
}
