//! Write gate
//!
//! Single admission token that allows at most one flash write (together
//! with its progress report) to be in flight. The token is a one-slot
//! channel: the slot is occupied while a [`GatePermit`] is outstanding.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};

use crate::error::OtaError;

pub struct WriteGate<M: RawMutex> {
    slot: Channel<M, (), 1>,
}

impl<M: RawMutex> WriteGate<M> {
    /// Create an open gate; the first acquire succeeds immediately.
    pub const fn new() -> Self {
        Self {
            slot: Channel::new(),
        }
    }

    /// Wait up to `max_wait` for the token.
    pub async fn acquire(&self, max_wait: Duration) -> Result<GatePermit<'_, M>, OtaError> {
        with_timeout(max_wait, self.slot.send(()))
            .await
            .map_err(|_| OtaError::GateTimeout)?;
        Ok(GatePermit { gate: self })
    }

    /// Whether a permit is currently outstanding.
    pub fn is_held(&self) -> bool {
        self.slot.is_full()
    }

    fn put_back(&self) {
        let returned = self.slot.try_receive();
        debug_assert!(returned.is_ok(), "gate released without a permit");
    }
}

impl<M: RawMutex> Default for WriteGate<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding gate token. Returned to the gate on [`GatePermit::release`]
/// or on drop.
pub struct GatePermit<'a, M: RawMutex> {
    gate: &'a WriteGate<M>,
}

impl<M: RawMutex> GatePermit<'_, M> {
    pub fn release(self) {}
}

impl<M: RawMutex> Drop for GatePermit<'_, M> {
    fn drop(&mut self) {
        self.gate.put_back();
    }
}
