//! Contract with the CAN queue layer
//!
//! Applications do not hand frames to the driver directly. They push them into
//! per-edge priority queues owned by a generic queue layer; the worker pulls
//! from there whenever a TXT buffer frees up and hands every received,
//! transmitted or failed frame back through the same layer. This module
//! describes what the driver needs from that layer.

use crate::message::{Frame, FrameFlags};

/// Number of priority classes of outgoing frames
///
/// Class 0 is the lowest priority, class `PRIO_NR - 1` the highest.
pub const PRIO_NR: usize = 3;

/// Queue edge connecting an application endpoint to the controller
pub trait QueueEdge {
    /// Priority class of frames sent through this edge, below [`PRIO_NR`]
    fn prio(&self) -> usize;
}

/// Outgoing message slot
pub trait OutSlot {
    /// Frame stored in the slot
    fn frame(&self) -> &Frame;
}

/// Controller side of the queue layer
///
/// All methods are non-blocking and may be called from the worker task while
/// applications concurrently push frames, the implementation has to do its
/// own locking.
pub trait QueueEnds {
    /// Edge handle
    type Edge: QueueEdge;
    /// Slot handle
    type Slot: OutSlot;

    /// Delivers `frame` to every edge whose filter accepts it, adding `flags`
    /// to the frame flags
    ///
    /// `source` is the edge the frame was sent from, if any, so the queue
    /// layer can tell echoes apart. Returns the number of edges reached.
    fn filter_frame_to_edges(
        &self,
        source: Option<&Self::Edge>,
        frame: &Frame,
        flags: FrameFlags,
    ) -> usize;

    /// Takes the oldest slot of the highest priority class that has one
    fn test_outslot(&self) -> Option<(Self::Edge, Self::Slot)>;

    /// Returns a slot taken by [`QueueEnds::test_outslot`] to the front of its
    /// queue to be retried later
    fn push_back_outslot(&self, edge: Self::Edge, slot: Self::Slot);

    /// Releases a slot whose frame is done with
    fn free_outslot(&self, edge: Self::Edge, slot: Self::Slot);

    /// Highest priority class of any pending outgoing frame, considering only
    /// classes `min_prio` and above
    fn pending_outslot_prio(&self, min_prio: usize) -> Option<usize>;

    /// Drops all pending outgoing frames
    fn flush_outlist(&self);

    /// Called once the controller was stopped
    fn notify_chip_stop(&self) {}
}
