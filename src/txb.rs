//! Bookkeeping of the TXT buffers
//!
//! The controller has up to [`MAX_TXBUFS`] transmit buffers and picks the next
//! frame to put on the bus by the per-buffer priority in `TX_PRIORITY`. The
//! driver keeps the buffers sorted into a single list, the _order table_: the
//! head of the list is transmitted first, buffers past the last allocated
//! position are empty. The list is split into regions, one per priority class
//! of the outgoing queue, delimited by [`TxbState::prio_tail`].

use crate::queue::PRIO_NR;
use core::fmt;

/// Maximal number of TXT buffers a core can be synthesized with
pub const MAX_TXBUFS: usize = 8;

const NIBBLE: u32 = 0xf;

/// Identity order; buffer `n` at position `n`
const INITIAL_ORDER: u32 = 0x7654_3210;

/// Order table packed in a single word, 4 bits per position
///
/// Position 0 is the head of the table. Each nibble holds the index of the
/// buffer at that position. All [`MAX_TXBUFS`] positions are kept even if the
/// core has fewer buffers, so every buffer index appears exactly once.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TxbOrder(u32);

impl Default for TxbOrder {
    fn default() -> Self {
        Self(INITIAL_ORDER)
    }
}

impl fmt::Debug for TxbOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxbOrder({:#010x})", self.0)
    }
}

/// Mask of all nibbles below position `pos`
const fn below(pos: usize) -> u32 {
    if pos >= MAX_TXBUFS {
        u32::MAX
    } else {
        (1 << (pos * 4)) - 1
    }
}

impl TxbOrder {
    /// Wraps a raw packed order table
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw packed order table
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Index of the buffer at position `pos`
    pub const fn buffer_at(self, pos: usize) -> usize {
        ((self.0 >> (pos * 4)) & NIBBLE) as usize
    }

    /// Moves the buffer at `from` towards the head, to position `to`
    ///
    /// Buffers at positions `to..from` move one position towards the tail.
    /// `to` must not be greater than `from`.
    #[must_use]
    pub const fn promote(self, from: usize, to: usize) -> Self {
        let id = (self.0 >> (from * 4)) & NIBBLE;
        let head = self.0 & below(to);
        let tail = self.0 & !below(from + 1);
        let shifted = self.0 & below(from) & !below(to);
        Self(head | tail | (shifted << 4) | (id << (to * 4)))
    }

    /// Moves the buffer at `from` towards the tail, to position `to`
    ///
    /// Buffers at positions `from + 1..=to` move one position towards the
    /// head. `to` must not be less than `from`.
    #[must_use]
    pub const fn demote(self, from: usize, to: usize) -> Self {
        let id = (self.0 >> (from * 4)) & NIBBLE;
        let head = self.0 & below(from);
        let tail = self.0 & !below(to + 1);
        let shifted = self.0 & below(to + 1) & !below(from + 1);
        Self(head | tail | (shifted >> 4) | (id << (to * 4)))
    }

    /// Value of the `TX_PRIORITY` register for this order
    ///
    /// The buffer at the head gets the highest hardware priority (7), the
    /// following ones successively lower values.
    pub const fn to_priorities(self) -> u32 {
        let mut prio = 0;
        let mut pos = 0;
        while pos < MAX_TXBUFS {
            let id = self.buffer_at(pos);
            prio |= ((MAX_TXBUFS - 1 - pos) as u32) << (id * 4);
            pos += 1;
        }
        prio
    }
}

/// Status of a single TXT buffer as reported in `TX_STATUS`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxtbStatus {
    /// Buffer is not synthesized
    NotExist,
    /// Waiting for transmission
    Ready,
    /// Being transmitted
    Transmitting,
    /// Abort requested while transmitting
    AbortInProgress,
    /// Transmitted successfully
    Ok,
    /// Transmission failed
    Error,
    /// Transmission aborted
    Aborted,
    /// Available for a new frame
    Empty,
    /// Encoding not defined by the core
    Unknown(u8),
}

impl From<u8> for TxtbStatus {
    fn from(value: u8) -> Self {
        use TxtbStatus::*;
        match value {
            0x0 => NotExist,
            0x1 => Ready,
            0x2 => Transmitting,
            0x3 => AbortInProgress,
            0x4 => Ok,
            0x6 => Error,
            0x7 => Aborted,
            0x8 => Empty,
            other => Unknown(other),
        }
    }
}

impl TxtbStatus {
    /// The buffer holds a frame the hardware may still send; its content must
    /// not be touched
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Transmitting | Self::AbortInProgress
        )
    }
}

/// Snapshot of the `TX_STATUS` register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TxStatus(pub u32);

impl TxStatus {
    /// Any encoding with this bit set is a terminal state waiting for
    /// `SET_EMPTY`
    const DONE: u32 = 0x4;
    const ANY_DONE: u32 = 0x4444_4444;

    /// Status of buffer `buffer`
    pub fn buffer(self, buffer: usize) -> TxtbStatus {
        TxtbStatus::from(((self.0 >> (buffer * 4)) & NIBBLE) as u8)
    }

    /// Whether buffer `buffer` reached a terminal state
    pub fn is_done(self, buffer: usize) -> bool {
        (self.0 >> (buffer * 4)) & Self::DONE != 0
    }

    /// Whether any buffer reached a terminal state
    pub fn any_done(self) -> bool {
        self.0 & Self::ANY_DONE != 0
    }
}

/// Commands accepted by the TXT buffers through `TX_COMMAND`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxtbCommand {
    /// Return a buffer in a terminal state to empty
    SetEmpty = 0x1,
    /// Hand a filled buffer over to the hardware
    SetReady = 0x2,
    /// Request abort of a pending transmission
    SetAbort = 0x4,
}

impl TxtbCommand {
    /// `TX_COMMAND` word applying the command to buffer `buffer`
    pub fn word(self, buffer: usize) -> u32 {
        self as u32 | 1 << (buffer + 8)
    }
}

/// In-flight frame owned by a TXT buffer
#[derive(Debug)]
pub struct TxbInfo<E, S> {
    /// Queue edge that produced the frame
    pub edge: E,
    /// Outgoing slot holding the frame
    pub slot: S,
}

/// Violations of the order table invariants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// A priority tail points past the last buffer
    TailOutOfRange {
        /// Priority class
        prio: usize,
        /// Offending tail
        tail: usize,
    },
    /// A priority tail lies behind the tail of a lower class
    TailNotMonotonic {
        /// Priority class
        prio: usize,
        /// Offending tail
        tail: usize,
        /// Tail of the next lower class
        limit: usize,
    },
    /// The order table references a buffer that does not exist
    BufferOutOfRange {
        /// Position in the order table
        pos: usize,
        /// Buffer index found there
        buffer: usize,
    },
    /// A buffer appears more than once in the order table
    DuplicateBuffer {
        /// Position of the second occurrence
        pos: usize,
        /// Buffer index
        buffer: usize,
    },
    /// Some buffers do not appear in the order table at all
    MissingBuffers {
        /// Bit mask of buffers that were found
        found: u32,
    },
    /// An allocated buffer is empty in hardware
    AllocatedButEmpty {
        /// Position in the order table
        pos: usize,
        /// Buffer index
        buffer: usize,
    },
    /// A free buffer is not empty in hardware
    FreeButNotEmpty {
        /// Position in the order table
        pos: usize,
        /// Buffer index
        buffer: usize,
    },
    /// An allocated buffer has no frame recorded
    InfoMissing {
        /// Buffer index
        buffer: usize,
    },
    /// A free buffer still has a frame recorded
    InfoStale {
        /// Buffer index
        buffer: usize,
    },
}

/// Software view of the TXT buffers
pub struct TxbState<E, S> {
    order: TxbOrder,
    prio_tail: [usize; PRIO_NR],
    info: [Option<TxbInfo<E, S>>; MAX_TXBUFS],
    ntxbufs: usize,
}

impl<E, S> TxbState<E, S> {
    /// All buffers free, in identity order
    ///
    /// `ntxbufs` is clamped to `1..=MAX_TXBUFS`.
    pub fn new(ntxbufs: usize) -> Self {
        Self {
            order: TxbOrder::default(),
            prio_tail: [0; PRIO_NR],
            info: core::array::from_fn(|_| None),
            ntxbufs: ntxbufs.clamp(1, MAX_TXBUFS),
        }
    }

    /// Number of buffers in use by the driver
    pub fn ntxbufs(&self) -> usize {
        self.ntxbufs
    }

    /// Current order table
    pub fn order(&self) -> TxbOrder {
        self.order
    }

    /// Exclusive end of the region occupied by priority classes `prio` and
    /// higher
    pub fn prio_tail(&self, prio: usize) -> usize {
        self.prio_tail[prio]
    }

    /// Number of allocated buffers
    pub fn allocated(&self) -> usize {
        self.prio_tail[0]
    }

    /// Whether at least one buffer is free
    pub fn has_free(&self) -> bool {
        self.prio_tail[0] < self.ntxbufs
    }

    /// Index of the buffer at position `pos`
    pub fn buffer_at(&self, pos: usize) -> usize {
        self.order.buffer_at(pos)
    }

    /// Position of buffer `buffer` in the order table
    pub fn position_of(&self, buffer: usize) -> Option<usize> {
        (0..self.ntxbufs).find(|&pos| self.order.buffer_at(pos) == buffer)
    }

    /// Frame owned by buffer `buffer`
    pub fn info(&self, buffer: usize) -> Option<&TxbInfo<E, S>> {
        self.info.get(buffer)?.as_ref()
    }

    /// Records the frame now owned by buffer `buffer`
    pub fn set_info(&mut self, buffer: usize, info: TxbInfo<E, S>) {
        if let Some(entry) = self.info.get_mut(buffer) {
            *entry = Some(info);
        }
    }

    /// Releases the frame owned by buffer `buffer`
    pub fn take_info(&mut self, buffer: usize) -> Option<TxbInfo<E, S>> {
        self.info.get_mut(buffer)?.take()
    }

    /// Allocates the buffer at position `pos` for a frame of class `prio`
    ///
    /// The buffer moves to the end of the region of its class and the regions
    /// of `prio` and all lower classes grow by one.
    pub fn add(&mut self, pos: usize, prio: usize) {
        let prio = prio.min(PRIO_NR - 1);
        self.order = self.order.promote(pos, self.prio_tail[prio]);
        for tail in &mut self.prio_tail[..=prio] {
            *tail += 1;
        }
    }

    /// Frees the buffer at position `pos`
    ///
    /// The buffer moves to the last position and every region that contained
    /// it shrinks by one.
    pub fn free(&mut self, pos: usize) {
        self.order = self.order.demote(pos, self.ntxbufs - 1);
        for tail in self.prio_tail.iter_mut().rev() {
            if *tail > pos {
                *tail -= 1;
            }
        }
    }

    /// Verifies the order table against itself, the recorded frames and the
    /// hardware buffer status
    ///
    /// Reports the first violation found.
    pub fn check(&self, status: TxStatus) -> Result<(), Inconsistency> {
        let mut limit = self.ntxbufs;
        for (prio, &tail) in self.prio_tail.iter().enumerate() {
            if tail > self.ntxbufs {
                return Err(Inconsistency::TailOutOfRange { prio, tail });
            } else if tail > limit {
                return Err(Inconsistency::TailNotMonotonic { prio, tail, limit });
            }
            limit = tail;
        }

        let mut found = 0_u32;
        let mut allocated = 0_u32;
        for pos in 0..self.ntxbufs {
            let buffer = self.order.buffer_at(pos);
            if buffer >= self.ntxbufs {
                return Err(Inconsistency::BufferOutOfRange { pos, buffer });
            }
            let mask = 1 << buffer;
            if found & mask != 0 {
                return Err(Inconsistency::DuplicateBuffer { pos, buffer });
            }
            found |= mask;
            let empty = status.buffer(buffer) == TxtbStatus::Empty;
            if pos < self.prio_tail[0] {
                allocated |= mask;
                if empty {
                    return Err(Inconsistency::AllocatedButEmpty { pos, buffer });
                }
            } else if !empty {
                return Err(Inconsistency::FreeButNotEmpty { pos, buffer });
            }
        }
        if found != (1 << self.ntxbufs) - 1 {
            return Err(Inconsistency::MissingBuffers { found });
        }

        for buffer in 0..self.ntxbufs {
            match (allocated & (1 << buffer) != 0, self.info[buffer].is_some()) {
                (true, false) => return Err(Inconsistency::InfoMissing { buffer }),
                (false, true) => return Err(Inconsistency::InfoStale { buffer }),
                _ => {}
            }
        }
        Ok(())
    }
}

impl<E, S> fmt::Debug for TxbState<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxbState")
            .field("order", &self.order)
            .field("prio_tail", &self.prio_tail)
            .field("ntxbufs", &self.ntxbufs)
            .finish()
    }
}
