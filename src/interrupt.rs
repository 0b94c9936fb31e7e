//! Interrupt flags and the interrupt handler
//!
//! Interrupt handling is split in two. The handler registered with the
//! interrupt controller ([`InterruptHandle::on_interrupt`]) only disables
//! all interrupt sources and wakes the worker task; reading the status and
//! acting on it is left to the [`Worker`].
//!
//! [`Worker`]: crate::worker::Worker

use crate::bus::Chip;
use crate::reg;
use bitfield::bitfield;
use ctucanfd_core::{BinarySemaphore as _, Dependencies, Registers as _};

bitfield! {
    /// A set of CAN interrupts.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// TXT buffer status changed
    pub txbhci, set_txbhci: 11;
    /// RX buffer not empty
    pub rbnei, set_rbnei: 10;
    /// Bit rate shifted
    pub bsi, set_bsi: 9;
    /// RX buffer full
    pub rxfi, set_rxfi: 8;
    /// Overload frame
    pub ofi, set_ofi: 7;
    /// Bus error
    pub bei, set_bei: 6;
    /// Arbitration lost
    pub ali, set_ali: 5;
    /// Fault confinement state changed
    pub fcsi, set_fcsi: 4;
    /// Data overrun
    pub doi, set_doi: 3;
    /// Error warning limit reached
    pub ewli, set_ewli: 2;
    /// Frame transmitted
    pub txi, set_txi: 1;
    /// Frame received
    pub rxi, set_rxi: 0;
}

impl InterruptSet {
    /// Empty set
    pub const NONE: Self = InterruptSet(0);

    /// Mask covering every interrupt source of the core
    pub const ALL: u32 = 0xffff;

    /// Interrupts reported as error frames
    pub fn errors(self) -> Self {
        InterruptSet(
            self.0
                & [
                    Interrupt::ErrorWarningLimit,
                    Interrupt::FaultConfinementStateChanged,
                    Interrupt::ArbitrationLost,
                    Interrupt::BusError,
                    Interrupt::DataOverrun,
                ]
                .into_iter()
                .collect::<InterruptSet>()
                .0,
        )
    }

    /// True if no interrupt is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// An iterator visiting all elements in arbitrary order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u32;
        for int in iter.into_iter() {
            set |= u32::from(int);
        }
        InterruptSet(set)
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        for int in self.iter() {
            write!(f, "{:?} ", int)?;
        }
        write!(f, "}}")
    }
}

/// A single interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// RXI
    FrameReceived = 0,
    /// TXI
    FrameTransmitted = 1,
    /// EWLI
    ErrorWarningLimit = 2,
    /// DOI
    DataOverrun = 3,
    /// FCSI
    FaultConfinementStateChanged = 4,
    /// ALI
    ArbitrationLost = 5,
    /// BEI
    BusError = 6,
    /// OFI
    OverloadFrame = 7,
    /// RXFI
    RxBufferFull = 8,
    /// BSI
    BitRateShifted = 9,
    /// RBNEI
    RxBufferNotEmpty = 10,
    /// TXBHCI
    TxBufferHwCommand = 11,
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        1 << x as u32
    }
}

/// Interrupt number outside of the range of the core
#[derive(Debug)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Interrupt::*;
        let ret = match value {
            0 => FrameReceived,
            1 => FrameTransmitted,
            2 => ErrorWarningLimit,
            3 => DataOverrun,
            4 => FaultConfinementStateChanged,
            5 => ArbitrationLost,
            6 => BusError,
            7 => OverloadFrame,
            8 => RxBufferFull,
            9 => BitRateShifted,
            10 => RxBufferNotEmpty,
            11 => TxBufferHwCommand,
            12.. => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.index;
        self.index = self.index.saturating_add(1);
        // Since there are no gaps in the interrupt flags, this will be `Some` until all
        // interrupts have been checked.
        let int = i.try_into().ok()?;
        if self.flags.0 & (1 << i) != 0 {
            Some(int)
        } else {
            self.next()
        }
    }
}

/// Top half of the interrupt handling
///
/// Meant to be moved into the interrupt service routine of the platform.
pub struct InterruptHandle<'a, D: Dependencies> {
    chip: &'a Chip<D>,
}

impl<'a, D: Dependencies> InterruptHandle<'a, D> {
    pub(crate) fn new(chip: &'a Chip<D>) -> Self {
        Self { chip }
    }

    /// Handles a controller interrupt
    ///
    /// Disables all interrupt sources and wakes the worker. Sources are
    /// enabled again by the worker once it has processed them.
    pub fn on_interrupt(&self) {
        let deps = self.chip.dependencies();
        deps.registers().write32(reg::INT_ENA_CLR, InterruptSet::ALL);
        deps.worker_semaphore().post();
    }

    /// Wakes the worker without touching the hardware
    ///
    /// The queue layer calls this after frames were added to an outgoing
    /// queue.
    pub fn wake_worker(&self) {
        self.chip.dependencies().worker_semaphore().post();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn iter_preserves_length() {
        assert_eq!(InterruptSet(0).iter().count(), 0);
        assert_eq!(InterruptSet(1).iter().count(), 1);
        assert_eq!(InterruptSet(0x555).iter().count(), 6);
        assert_eq!(InterruptSet(0xaaa).iter().count(), 6);
        assert_eq!(InterruptSet(0xfff).iter().count(), 12);
        assert_eq!(InterruptSet(0xffff_ffff).iter().count(), 12);
    }

    fn iter_collect(int: u32) -> u32 {
        InterruptSet::from_iter(InterruptSet(int).iter()).0
    }

    #[test]
    fn iter_collect_preserves_interrupts() {
        assert_eq!(iter_collect(0), 0);
        assert_eq!(iter_collect(1), 1);
        assert_eq!(iter_collect(0x555), 0x555);
        assert_eq!(iter_collect(0xaaa), 0xaaa);
    }

    #[test]
    fn iter_collect_drops_reserved_bits() {
        assert_eq!(iter_collect(0xffff_ffff), 0xfff);
    }

    #[test]
    fn error_interrupts_exclude_rx_and_tx() {
        let mut set = InterruptSet(0xfff);
        assert_eq!(set.errors().0, 0b111_1100);
        set.set_doi(false);
        set.set_bei(false);
        assert!(!set.errors().doi());
        assert!(set.errors().fcsi());
        assert!(InterruptSet(0x0c03).errors().is_empty());
    }
}
