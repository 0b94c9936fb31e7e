//! Bottom half of the interrupt handling
//!
//! The [`Worker`] owns the TXT buffers. It is woken by the interrupt handler
//! or by the queue layer when new outgoing frames arrive and then
//! - drains the interrupt status: received frames, finished TXT buffers and
//!   error conditions, until nothing is pending
//! - fills free TXT buffers from the outgoing queues, aborting the least
//!   important pending transmission when a more important frame waits and
//!   all buffers are taken
//! - returns every frame to its sender as failed once the controller is
//!   being stopped
//!
//! and finally enables the interrupt sources again.

use crate::bus::Chip;
use crate::fault::{self, ErrorCounters};
use crate::interrupt::InterruptSet;
use crate::message::{rx, tx, FrameFlags};
use crate::queue::{OutSlot, QueueEdge, QueueEnds, PRIO_NR};
use crate::reg::{self, Command};
use crate::txb::{Inconsistency, TxStatus, TxbInfo, TxbState, TxtbCommand, TxtbStatus, MAX_TXBUFS};
use ctucanfd_core::{BinarySemaphore as _, Dependencies, Registers as _};

/// Worker processing the events of one controller
///
/// Meant to be run by a dedicated task through [`Worker::run`].
pub struct Worker<'a, D: Dependencies, Q: QueueEnds> {
    chip: &'a Chip<D>,
    queue: &'a Q,
    txb: TxbState<Q::Edge, Q::Slot>,
    abort_recheck: bool,
}

impl<'a, D: Dependencies, Q: QueueEnds> Worker<'a, D, Q> {
    pub(crate) fn new(chip: &'a Chip<D>, queue: &'a Q) -> Self {
        Self {
            chip,
            queue,
            txb: TxbState::new(chip.ntxbufs()),
            abort_recheck: false,
        }
    }

    /// Processes events forever, sleeping on the worker semaphore whenever
    /// there is nothing to do
    pub fn run(mut self) -> ! {
        loop {
            self.process();
            self.chip.dependencies().worker_semaphore().wait();
        }
    }

    /// Handles everything that is pending and enables interrupts again
    ///
    /// This is a single iteration of [`Worker::run`] without the wait.
    pub fn process(&mut self) {
        loop {
            self.process_interrupts();

            if !self.chip.is_running() {
                self.abort_all();
                break;
            } else if self.txb.has_free() {
                if !self.schedule() {
                    break;
                }
            } else if !self.preempt() {
                break;
            }
        }

        let regs = self.regs();
        let int_ena = self.chip.enabled_interrupts();
        regs.write32(reg::INT_ENA_SET, int_ena.0);
        regs.write32(reg::INT_MASK_CLR, int_ena.0);
        self.debug_check("before wait");
    }

    /// Bookkeeping of the TXT buffers
    pub fn txb(&self) -> &TxbState<Q::Edge, Q::Slot> {
        &self.txb
    }

    /// Whether an abort was requested and its completion not seen yet
    pub fn abort_recheck(&self) -> bool {
        self.abort_recheck
    }

    /// Verifies the buffer bookkeeping against the hardware
    pub fn check_state(&self) -> Result<(), Inconsistency> {
        let regs = self.regs();
        self.txb.check(TxStatus(regs.read32(reg::TX_STATUS)))
    }

    fn debug_check(&self, at: &str) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.check_state() {
                log::error!("TXT buffer state inconsistent {}: {:?} {:?}", at, e, self.txb);
            }
        }
    }

    fn regs(&self) -> &'a D::Registers {
        self.chip.dependencies().registers()
    }

    fn command(&self, command: TxtbCommand, buffer: usize) {
        self.regs().write32(reg::TX_COMMAND, command.word(buffer));
    }

    /// Services interrupts until the status register reads clear
    ///
    /// The status is level triggered, so re-reading it after each round
    /// cannot miss an event. A pending abort keeps the loop going even with
    /// a clear status since its completion is not always signalled in time.
    fn process_interrupts(&mut self) {
        let regs = self.regs();
        loop {
            self.debug_check("at interrupt loop start");

            let isr = InterruptSet(regs.read32(reg::INT_STAT));
            if isr.is_empty() && !self.abort_recheck {
                break;
            }

            if isr.rbnei() {
                let mut rbnei = InterruptSet::NONE;
                rbnei.set_rbnei(true);
                regs.write32(reg::INT_MASK_SET, rbnei.0);
                regs.write32(reg::INT_STAT, rbnei.0);
                self.receive();
                regs.write32(reg::INT_STAT, rbnei.0);
            }

            if isr.txbhci() || self.abort_recheck {
                self.abort_recheck = false;
                self.tx_interrupt();
            }

            let errors = isr.errors();
            if !errors.is_empty() {
                regs.write32(reg::INT_STAT, errors.0);
                self.err_interrupt(isr);
            }

            let mut handled = errors;
            handled.set_rbnei(true);
            handled.set_txbhci(true);
            let other = InterruptSet(isr.0 & !handled.0);
            if !other.is_empty() {
                log::warn!("unexpected interrupts {:?}", other);
                regs.write32(reg::INT_STAT, other.0);
            }
        }
    }

    /// Pops one frame from the RX FIFO and hands it to the queue layer
    fn receive(&mut self) {
        let regs = self.regs();
        match rx::receive(regs) {
            Ok(frame) => {
                self.chip.stats().add_rx_done(frame.header.dlen);
                self.queue
                    .filter_frame_to_edges(None, &frame, FrameFlags::empty());
            }
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(never)) => match never {},
        }
    }

    /// Reports error interrupts as an error frame
    fn err_interrupt(&mut self, isr: InterruptSet) {
        let regs = self.regs();
        let stats = self.chip.stats();

        let counters = ErrorCounters::read(regs);
        let state = fault::read_fault_state(regs);
        stats.set_state(state);

        if isr.bei() {
            stats.add_rx_error();
        }
        if isr.doi() {
            stats.add_rx_overflow();
            let mut command = Command(0);
            command.set_cdo(true);
            regs.write32(reg::COMMAND, command.0);
        }

        if let Some(frame) = fault::error_frame(isr, state, counters) {
            log::debug!("error frame {:#x} in state {:?}", frame.header.can_id, state);
            self.queue
                .filter_frame_to_edges(None, &frame, FrameFlags::empty());
        }
    }

    /// Completes every TXT buffer that reached a terminal state
    fn tx_interrupt(&mut self) {
        let regs = self.regs();
        let mut txbhci = InterruptSet::NONE;
        txbhci.set_txbhci(true);

        loop {
            regs.write32(reg::INT_STAT, txbhci.0);
            let status = TxStatus(regs.read32(reg::TX_STATUS));
            if !status.any_done() {
                break;
            }

            let Some(pos) =
                (0..MAX_TXBUFS).find(|&pos| status.is_done(self.txb.buffer_at(pos)))
            else {
                break;
            };
            let buffer = self.txb.buffer_at(pos);

            if pos >= self.txb.ntxbufs() {
                // Not one of ours, just release it
                self.command(TxtbCommand::SetEmpty, buffer);
                continue;
            }

            self.debug_check("before TX done processed");
            self.handle_txtb_done(buffer, pos, status.buffer(buffer));
            self.debug_check("after TX done processed");
        }
    }

    /// Releases buffer `buffer` at position `pos` after it reached the
    /// terminal state `status` and settles the fate of its frame
    fn handle_txtb_done(&mut self, buffer: usize, pos: usize, status: TxtbStatus) {
        self.command(TxtbCommand::SetEmpty, buffer);

        let Some(TxbInfo { edge, slot }) = self.txb.take_info(buffer) else {
            log::error!("TXT buffer {} finished with {:?} but owns no frame", buffer, status);
            return;
        };

        match status {
            TxtbStatus::Ok => {
                self.chip.stats().add_tx_done(slot.frame().header.dlen);
                self.queue
                    .filter_frame_to_edges(Some(&edge), slot.frame(), FrameFlags::LOCAL);
                self.queue.free_outslot(edge, slot);
                self.txb.free(pos);
            }
            TxtbStatus::Aborted if self.chip.is_running() => {
                // Preempted by a more important frame, retry later
                self.queue.push_back_outslot(edge, slot);
                self.txb.free(pos);
            }
            TxtbStatus::Aborted | TxtbStatus::Error => {
                log::debug!("TXT buffer {} failed with {:?}", buffer, status);
                self.return_failed(edge, slot);
                self.txb.free(pos);
            }
            status => {
                log::debug!("TXT buffer {} in unexpected state {:?}", buffer, status);
                self.queue.free_outslot(edge, slot);
                self.txb.free(pos);
            }
        }
    }

    /// Hands a frame that was not sent back to its sender
    fn return_frame(&self, edge: Q::Edge, slot: Q::Slot) {
        self.queue
            .filter_frame_to_edges(Some(&edge), slot.frame(), FrameFlags::TXERR);
        self.queue.free_outslot(edge, slot);
    }

    /// Like [`Self::return_frame`], counting a transmit error
    fn return_failed(&self, edge: Q::Edge, slot: Q::Slot) {
        self.return_frame(edge, slot);
        self.chip.stats().add_tx_error();
    }

    /// Moves one outgoing frame into the first free TXT buffer
    ///
    /// Returns `false` if there was nothing to send or the frame could not be
    /// inserted.
    fn schedule(&mut self) -> bool {
        let Some((edge, slot)) = self.queue.test_outslot() else {
            return false;
        };
        let regs = self.regs();
        let pos = self.txb.allocated();
        let buffer = self.txb.buffer_at(pos);

        self.debug_check("before insert");
        match tx::insert(regs, self.txb.ntxbufs(), buffer, slot.frame()) {
            Ok(()) => {
                let prio = edge.prio();
                self.txb.set_info(buffer, TxbInfo { edge, slot });
                self.txb.add(pos, prio);
                regs.write32(reg::TX_PRIORITY, self.txb.order().to_priorities());
                // A single SET_READY is occasionally lost by the core
                self.command(TxtbCommand::SetReady, buffer);
                self.command(TxtbCommand::SetReady, buffer);
                self.debug_check("after insert");
                true
            }
            Err(e) => {
                log::debug!("insertion into TXT buffer {} failed: {:?}", buffer, e);
                self.queue.push_back_outslot(edge, slot);
                false
            }
        }
    }

    /// Aborts the least important pending transmission if a more important
    /// frame waits and all buffers are taken
    ///
    /// Class 0 is the lowest priority and never preempts. Returns whether an
    /// abort was issued.
    fn preempt(&mut self) -> bool {
        let ntxbufs = self.txb.ntxbufs();
        let Some(avail) = (1..PRIO_NR).find(|&prio| self.txb.prio_tail(prio) < ntxbufs) else {
            return false;
        };
        match self.queue.pending_outslot_prio(avail) {
            Some(pending) if pending >= avail => {
                let victim = self.txb.buffer_at(ntxbufs - 1);
                self.command(TxtbCommand::SetAbort, victim);
                self.abort_recheck = true;
                true
            }
            _ => false,
        }
    }

    /// Shutdown pass: aborts every pending transmission and fails every
    /// queued frame
    ///
    /// Signals the stop semaphore once no buffer is allocated any more.
    fn abort_all(&mut self) {
        let regs = self.regs();
        for pos in (0..self.txb.allocated()).rev() {
            let buffer = self.txb.buffer_at(pos);
            let status = TxStatus(regs.read32(reg::TX_STATUS)).buffer(buffer);
            if status == TxtbStatus::Empty {
                // Returned without counting a transmit error
                if let Some(TxbInfo { edge, slot }) = self.txb.take_info(buffer) {
                    self.return_frame(edge, slot);
                }
                self.txb.free(pos);
            } else {
                self.command(TxtbCommand::SetAbort, buffer);
                self.abort_recheck = true;
            }
        }

        while let Some((edge, slot)) = self.queue.test_outslot() {
            self.return_failed(edge, slot);
        }

        if self.txb.allocated() == 0 {
            self.chip.dependencies().stop_semaphore().post();
        }
    }
}
