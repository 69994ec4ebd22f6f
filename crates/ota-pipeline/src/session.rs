use crate::ports::Partition;

/// Write progress as a truncated percentage, capped at 100.
#[allow(clippy::cast_possible_truncation)]
pub fn progress_percent(received: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = u64::from(received) * 100 / u64::from(total);
    percent.min(100) as u8
}

/// State of the one firmware transfer of this boot cycle.
///
/// Owned by the pipeline task; it is never shared and never outlives the
/// session.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    target: Partition,
    total: u32,
    received: u32,
}

impl UpdateSession {
    pub const fn new(target: Partition, total: u32) -> Self {
        Self {
            target,
            total,
            received: 0,
        }
    }

    pub const fn target(&self) -> &Partition {
        &self.target
    }

    pub const fn total(&self) -> u32 {
        self.total
    }

    pub const fn received(&self) -> u32 {
        self.received
    }

    /// Account for `len` freshly written bytes and return the new progress.
    pub fn record(&mut self, len: usize) -> u8 {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        self.received = self.received.saturating_add(len);
        self.progress()
    }

    pub fn progress(&self) -> u8 {
        progress_percent(self.received, self.total)
    }

    pub const fn is_complete(&self) -> bool {
        self.received >= self.total
    }
}
