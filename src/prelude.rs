//! Traits needed to use the driver
pub use crate::queue::{OutSlot as _, QueueEdge as _, QueueEnds as _};
pub use ctucanfd_core::{BinarySemaphore as _, Dependencies as _, Registers as _};
pub use embedded_can::Frame as _;
