//! Controller statistics

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Fault confinement state of the controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CanState {
    /// Error counters below the warning limit
    ErrorActive = 0,
    /// An error counter reached the warning limit
    ErrorWarning = 1,
    /// An error counter reached the passive limit
    ErrorPassive = 2,
    /// Transmit error counter overflowed, the node left the bus
    BusOff = 3,
    /// Controller disabled
    Stopped = 4,
}

impl From<u8> for CanState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::ErrorActive,
            1 => Self::ErrorWarning,
            2 => Self::ErrorPassive,
            3 => Self::BusOff,
            _ => Self::Stopped,
        }
    }
}

/// Copy of the counters at one point in time
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames transmitted successfully
    pub tx_done: u32,
    /// Payload bytes transmitted successfully
    pub tx_bytes: u32,
    /// Frames that failed to transmit or were dropped on stop
    pub tx_error: u32,
    /// Frames received
    pub rx_done: u32,
    /// Payload bytes received
    pub rx_bytes: u32,
    /// Bus errors seen while receiving
    pub rx_error: u32,
    /// RX FIFO overruns
    pub rx_overflows: u32,
}

/// Counters updated by the worker, readable from any context
pub struct ChipStats {
    tx_done: AtomicU32,
    tx_bytes: AtomicU32,
    tx_error: AtomicU32,
    rx_done: AtomicU32,
    rx_bytes: AtomicU32,
    rx_error: AtomicU32,
    rx_overflows: AtomicU32,
    state: AtomicU8,
}

impl Default for ChipStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipStats {
    /// All counters zero, state [`CanState::Stopped`]
    pub const fn new() -> Self {
        Self {
            tx_done: AtomicU32::new(0),
            tx_bytes: AtomicU32::new(0),
            tx_error: AtomicU32::new(0),
            rx_done: AtomicU32::new(0),
            rx_bytes: AtomicU32::new(0),
            rx_error: AtomicU32::new(0),
            rx_overflows: AtomicU32::new(0),
            state: AtomicU8::new(CanState::Stopped as u8),
        }
    }

    fn add(counter: &AtomicU32, value: u32) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub(crate) fn add_tx_done(&self, bytes: u16) {
        Self::add(&self.tx_done, 1);
        Self::add(&self.tx_bytes, bytes.into());
    }

    pub(crate) fn add_tx_error(&self) {
        Self::add(&self.tx_error, 1);
    }

    pub(crate) fn add_rx_done(&self, bytes: u16) {
        Self::add(&self.rx_done, 1);
        Self::add(&self.rx_bytes, bytes.into());
    }

    pub(crate) fn add_rx_error(&self) {
        Self::add(&self.rx_error, 1);
    }

    pub(crate) fn add_rx_overflow(&self) {
        Self::add(&self.rx_overflows, 1);
    }

    pub(crate) fn set_state(&self, state: CanState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Zeroes all counters; the state is left alone
    pub(crate) fn reset(&self) {
        for counter in [
            &self.tx_done,
            &self.tx_bytes,
            &self.tx_error,
            &self.rx_done,
            &self.rx_bytes,
            &self.rx_error,
            &self.rx_overflows,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Last fault confinement state seen by the driver
    pub fn state(&self) -> CanState {
        self.state.load(Ordering::Relaxed).into()
    }

    /// Current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |counter: &AtomicU32| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            tx_done: get(&self.tx_done),
            tx_bytes: get(&self.tx_bytes),
            tx_error: get(&self.tx_error),
            rx_done: get(&self.rx_done),
            rx_bytes: get(&self.rx_bytes),
            rx_error: get(&self.rx_error),
            rx_overflows: get(&self.rx_overflows),
        }
    }
}
