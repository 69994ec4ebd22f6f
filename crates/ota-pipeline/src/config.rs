use embassy_time::Duration;

/// Timing parameters of an update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Longest wait for the next chunk before the session is abandoned
    pub chunk_timeout: Duration,
    /// Longest wait for the write gate
    pub gate_timeout: Duration,
    /// Delay between the terminal state and the device restart
    pub grace_period: Duration,
}

impl PipelineConfig {
    pub const DEFAULT: Self = Self {
        chunk_timeout: Duration::from_secs(10),
        gate_timeout: Duration::from_secs(10),
        grace_period: Duration::from_secs(2),
    };

    pub const fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub const fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = timeout;
        self
    }

    pub const fn with_grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
