//! Controller instance and its control handle

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{BitTiming, BitTimingError, BitTimingKind, ControlMode};
use crate::fault::{self, ErrorCounters};
use crate::interrupt::{InterruptHandle, InterruptSet};
use crate::queue::QueueEnds;
use crate::reg::{self, Btr, BtrFd, Mode, TrvDelay, TxtbInfo};
use crate::stats::{CanState, ChipStats, StatsSnapshot};
use crate::txb::MAX_TXBUFS;
use crate::worker::Worker;
use bitflags::bitflags;
use fugit::{HertzU32, MicrosDurationU64};
use ctucanfd_core::{BinarySemaphore as _, Dependencies, Registers};

/// Number of `DEVICE_ID` polls after a soft reset before giving up
const RESET_POLLS: usize = 100;

/// Buffer count reported by cores synthesized before the count was
/// configurable
const LEGACY_TXT_BUFFER_COUNT: usize = 4;

/// Data bitrates above this use the secondary sample point
const SSP_MIN_BITRATE: u32 = 1_000_000;

/// Largest secondary sample point offset, in minimal time quanta
const SSP_OFFSET_MAX: u64 = 127;

/// Errors that may occur during construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// Zero TXT buffers were requested
    InvalidBufferCount,
    /// The register window does not belong to a CTU CAN FD core
    DeviceNotFound {
        /// Lower half of `DEVICE_ID` as read
        id: u16,
    },
    /// The core did not come out of the soft reset
    ResetTimeout,
}

/// Errors that may occur during configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The controller is running and has to be stopped first
    Running,
    /// Problems with the bit timing configuration
    BitTiming(BitTimingError),
    /// The nominal bit timing was never set
    NoBitTiming,
    /// The mode contains bits the controller does not support
    UnsupportedMode(ControlMode),
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::BitTiming(value)
    }
}

/// Errors that may occur while stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopError {
    /// Outgoing frames were not drained in time and got dropped. The
    /// controller is disabled anyway.
    Timeout,
}

bitflags! {
    /// Life cycle flags of a controller
    pub struct ChipFlags: u32 {
        /// Hardware was found and reset
        const CONFIGURED = 1 << 0;
        /// Controller takes part in bus communication
        const RUNNING = 1 << 1;
    }
}

/// State of a single controller shared by the control handle, the worker and
/// the interrupt handler
///
/// A `Chip` is created by [`Chip::init`] and then [`split`] into those three
/// parts.
///
/// [`split`]: Chip::split
pub struct Chip<D> {
    dependencies: D,
    ntxbufs: usize,
    running: AtomicBool,
    int_ena: AtomicU32,
    stats: ChipStats,
}

impl<D: Dependencies> Chip<D> {
    /// Probes and resets the controller
    ///
    /// `ntxbufs` is the number of TXT buffers the driver should use. It is
    /// limited to what the core was synthesized with and to [`MAX_TXBUFS`].
    pub fn init(dependencies: D, ntxbufs: usize) -> Result<Self, InitError> {
        if ntxbufs == 0 {
            return Err(InitError::InvalidBufferCount);
        }
        let regs = dependencies.registers();

        let id = (regs.read32(reg::DEVICE_ID) & 0xffff) as u16;
        if u32::from(id) != reg::DEVICE_ID_MAGIC {
            return Err(InitError::DeviceNotFound { id });
        }

        let hw_count = match TxtbInfo(regs.read32(reg::TX_COMMAND)).txt_buffer_count() {
            0 => LEGACY_TXT_BUFFER_COUNT,
            count => count as usize,
        };
        let ntxbufs = ntxbufs.min(hw_count).min(MAX_TXBUFS);

        reset(regs)?;
        log::debug!("CTU CAN FD found, using {} of {} TXT buffers", ntxbufs, hw_count);

        let chip = Self {
            dependencies,
            ntxbufs,
            running: AtomicBool::new(false),
            int_ena: AtomicU32::new(0),
            stats: ChipStats::new(),
        };
        chip.stats.set_state(CanState::Stopped);
        Ok(chip)
    }

    /// Splits the controller into its control handle, the worker and the
    /// interrupt handler
    ///
    /// `queue` is the queue layer the controller exchanges frames with.
    pub fn split<'a, Q: QueueEnds>(&'a mut self, queue: &'a Q) -> Parts<'a, D, Q> {
        let chip: &'a Self = self;
        Parts {
            can: Can {
                chip,
                queue,
                bit_timing: None,
                data_bit_timing: None,
                mode: ControlMode::FD,
            },
            worker: Worker::new(chip, queue),
            interrupt: InterruptHandle::new(chip),
        }
    }

    /// Number of TXT buffers in use
    pub fn ntxbufs(&self) -> usize {
        self.ntxbufs
    }

    /// Whether the controller is enabled
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Statistics counters
    pub fn stats(&self) -> &ChipStats {
        &self.stats
    }

    /// Releases the dependencies
    pub fn release(self) -> D {
        self.dependencies
    }

    pub(crate) fn dependencies(&self) -> &D {
        &self.dependencies
    }

    /// Interrupts the worker enables when going to sleep
    pub(crate) fn enabled_interrupts(&self) -> InterruptSet {
        InterruptSet(self.int_ena.load(Ordering::Acquire))
    }
}

/// Issues a soft reset and waits until the core answers again
fn reset<R: Registers>(regs: &R) -> Result<(), InitError> {
    let mut mode = Mode(0);
    mode.set_rst(true);
    regs.write32(reg::MODE, mode.0);
    (0..RESET_POLLS)
        .find(|_| regs.read32(reg::DEVICE_ID) & 0xffff == reg::DEVICE_ID_MAGIC)
        .map(|_| ())
        .ok_or(InitError::ResetTimeout)
}

/// The parts a [`Chip`] splits into. The fields are public to allow
/// destructuring.
pub struct Parts<'a, D: Dependencies, Q: QueueEnds> {
    /// Control handle
    pub can: Can<'a, D, Q>,
    /// Worker to be run by a dedicated task
    pub worker: Worker<'a, D, Q>,
    /// Handler to be called from the interrupt service routine
    pub interrupt: InterruptHandle<'a, D>,
}

/// Control handle of a controller
///
/// Configuration changes require exclusive access, so there is at most one
/// start or stop in progress at any time.
pub struct Can<'a, D: Dependencies, Q: QueueEnds> {
    chip: &'a Chip<D>,
    queue: &'a Q,
    bit_timing: Option<BitTiming>,
    data_bit_timing: Option<BitTiming>,
    mode: ControlMode,
}

impl<'a, D: Dependencies, Q: QueueEnds> Can<'a, D, Q> {
    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &D::Registers {
        self.regs()
    }

    fn regs(&self) -> &D::Registers {
        self.chip.dependencies().registers()
    }

    fn hw_enabled(&self) -> bool {
        Mode(self.regs().read32(reg::MODE)).ena()
    }

    /// Enables the controller
    ///
    /// Programs bit timing, the secondary sample point, the operating mode
    /// and the interrupt sources, then enables the core. Does nothing if the
    /// controller is running already.
    pub fn start(&mut self) -> Result<(), ConfigurationError> {
        if self.chip.is_running() {
            return Ok(());
        }
        let deps = self.chip.dependencies();
        let regs = deps.registers();

        self.chip.int_ena.store(0, Ordering::Release);
        regs.write32(reg::TX_PRIORITY, 0x0123_4567);
        regs.write32(reg::RX_STATUS, reg::RX_SETTINGS_RTSOP);

        let mut nominal = self.bit_timing.ok_or(ConfigurationError::NoBitTiming)?;
        self.program_bit_timing(BitTimingKind::Nominal, &mut nominal)?;
        self.bit_timing = Some(nominal);
        if let Some(mut data) = self.data_bit_timing {
            self.program_bit_timing(BitTimingKind::Data, &mut data)?;
            self.data_bit_timing = Some(data);
        }
        self.set_secondary_sample_point();
        self.apply_mode();

        let mut int_ena = InterruptSet::NONE;
        int_ena.set_rbnei(true);
        int_ena.set_txbhci(true);
        int_ena.set_ewli(true);
        int_ena.set_fcsi(true);
        int_ena.set_doi(true);
        if self.mode.contains(ControlMode::BERR_REPORTING) {
            int_ena.set_ali(true);
            int_ena.set_bei(true);
        }
        self.chip.int_ena.store(int_ena.0, Ordering::Release);
        regs.write32(reg::INT_MASK_CLR, int_ena.0);
        regs.write32(reg::INT_MASK_SET, !int_ena.0);
        regs.write32(reg::INT_ENA_SET, int_ena.0);

        let mut mode = Mode(regs.read32(reg::MODE));
        mode.set_ena(true);
        regs.write32(reg::MODE, mode.0);

        // Drop a completion left over from the previous stop
        deps.stop_semaphore().try_wait();
        self.chip.running.store(true, Ordering::Release);
        self.chip.stats.reset();
        self.chip.stats.set_state(CanState::ErrorActive);
        log::trace!("controller started in mode {:?}", self.mode);
        Ok(())
    }

    /// Disables the controller
    ///
    /// Asks the worker to abort all pending transmissions and to return them
    /// and all queued outgoing frames to their senders as failed, then waits
    /// for it to finish:
    /// - `None` waits as long as it takes
    /// - `Some(timeout)` waits at most `timeout`, a zero timeout only checks
    ///   whether the worker is done already
    ///
    /// If the worker did not finish in time the outgoing queues are flushed
    /// and [`StopError::Timeout`] is returned. The controller is disabled in
    /// either case. Does nothing if the controller is stopped already.
    pub fn stop(&mut self, timeout: Option<MicrosDurationU64>) -> Result<(), StopError> {
        if !self.chip.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let deps = self.chip.dependencies();
        let regs = deps.registers();

        let mut txbhci = InterruptSet::NONE;
        txbhci.set_txbhci(true);
        self.chip.int_ena.fetch_and(txbhci.0, Ordering::AcqRel);
        deps.worker_semaphore().post();

        let drained = match timeout {
            None => {
                deps.stop_semaphore().wait();
                true
            }
            Some(timeout) if timeout.ticks() == 0 => deps.stop_semaphore().try_wait(),
            Some(timeout) => deps.stop_semaphore().wait_timeout(timeout),
        };
        if !drained {
            log::warn!("outgoing frames not drained on stop, flushing");
            self.queue.flush_outlist();
        }

        self.chip.int_ena.store(0, Ordering::Release);
        regs.write32(reg::INT_ENA_CLR, InterruptSet::ALL);
        regs.write32(reg::INT_MASK_SET, InterruptSet::ALL);
        let mut mode = Mode(regs.read32(reg::MODE));
        mode.set_ena(false);
        deps.worker_semaphore().post();
        regs.write32(reg::MODE, mode.0);

        self.chip.stats.set_state(CanState::Stopped);
        self.queue.notify_chip_stop();
        log::trace!("controller stopped");

        if drained {
            Ok(())
        } else {
            Err(StopError::Timeout)
        }
    }

    /// Writes `timing` to the `BTR` or `BTR_FD` register
    ///
    /// `phase_seg1` is narrowed to the register field first, see
    /// [`BitTiming::fit_phase_seg1`].
    fn program_bit_timing(
        &self,
        kind: BitTimingKind,
        timing: &mut BitTiming,
    ) -> Result<(), ConfigurationError> {
        if self.hw_enabled() {
            return Err(ConfigurationError::Running);
        }
        timing.fit_phase_seg1(kind.limits().phase_seg1_max);
        match kind {
            BitTimingKind::Nominal => {
                let mut btr = Btr(0);
                btr.set_prop(timing.prop_seg);
                btr.set_ph1(timing.phase_seg1);
                btr.set_ph2(timing.phase_seg2);
                btr.set_brp(timing.brp);
                btr.set_sjw(timing.sjw);
                self.regs().write32(reg::BTR, btr.0);
            }
            BitTimingKind::Data => {
                let mut btr = BtrFd(0);
                btr.set_prop_fd(timing.prop_seg);
                btr.set_ph1_fd(timing.phase_seg1);
                btr.set_ph2_fd(timing.phase_seg2);
                btr.set_brp_fd(timing.brp);
                btr.set_sjw_fd(timing.sjw);
                self.regs().write32(reg::BTR_FD, btr.0);
            }
        }
        Ok(())
    }

    /// Uses the secondary sample point for fast data phases only
    fn set_secondary_sample_point(&self) {
        let mut ssp = TrvDelay(0);
        if let Some(data) = self.data_bit_timing {
            let bitrate = data.bitrate.to_Hz();
            if bitrate > SSP_MIN_BITRATE {
                let clock = u64::from(self.chip.dependencies().can_clock().to_Hz());
                let offset = (clock / 1000 * u64::from(data.sample_point) / u64::from(bitrate))
                    .min(SSP_OFFSET_MAX);
                ssp.set_ssp_offset(offset as u32);
                ssp.set_ssp_src(reg::SSP_SRC_MEAS_N_OFFSET);
            }
        }
        self.regs().write32(reg::TRV_DELAY, ssp.0);
    }

    fn apply_mode(&self) {
        let regs = self.regs();
        let mut mode = Mode(regs.read32(reg::MODE));
        mode.set_ilbp(self.mode.contains(ControlMode::LOOPBACK));
        mode.set_bmm(self.mode.contains(ControlMode::LISTEN_ONLY));
        mode.set_fde(self.mode.contains(ControlMode::FD));
        mode.set_stm(self.mode.contains(ControlMode::PRESUME_ACK));
        mode.set_nisofd(self.mode.contains(ControlMode::FD_NON_ISO));
        // One shot is a retransmit limit of zero
        mode.set_rtrth(0);
        mode.set_rtrle(self.mode.contains(ControlMode::ONE_SHOT));
        // Counters must not be writable while on the bus
        mode.set_tstm(false);
        regs.write32(reg::MODE, mode.0);
    }

    fn timing_mut(&mut self, kind: BitTimingKind) -> &mut Option<BitTiming> {
        match kind {
            BitTimingKind::Nominal => &mut self.bit_timing,
            BitTimingKind::Data => &mut self.data_bit_timing,
        }
    }

    /// Calculates the bit timing for `bitrate` and keeps it for the next
    /// start
    ///
    /// Returns the timing found. Rejected while the controller is running.
    pub fn calc_and_set_bit_timing(
        &mut self,
        kind: BitTimingKind,
        bitrate: HertzU32,
    ) -> Result<BitTiming, ConfigurationError> {
        if self.chip.is_running() {
            return Err(ConfigurationError::Running);
        }
        let can_clock = self.chip.dependencies().can_clock();
        let timing = BitTiming::calculate(bitrate, can_clock, kind.limits())?;
        *self.timing_mut(kind) = Some(timing);
        Ok(timing)
    }

    /// Validates `timing` against the limits of the controller, keeps it for
    /// the next start and writes it to the hardware right away
    ///
    /// Rejected while the controller is running.
    pub fn check_and_set_bit_timing(
        &mut self,
        kind: BitTimingKind,
        mut timing: BitTiming,
    ) -> Result<(), ConfigurationError> {
        if self.chip.is_running() {
            return Err(ConfigurationError::Running);
        }
        timing.check(kind.limits())?;
        self.program_bit_timing(kind, &mut timing)?;
        *self.timing_mut(kind) = Some(timing);
        Ok(())
    }

    /// Selects the operating mode used by the next start
    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), ConfigurationError> {
        if self.chip.is_running() {
            return Err(ConfigurationError::Running);
        }
        let unsupported = mode - ControlMode::SUPPORTED;
        if !unsupported.is_empty() {
            return Err(ConfigurationError::UnsupportedMode(unsupported));
        }
        self.mode = mode;
        Ok(())
    }

    /// Nominal bit timing
    pub fn bit_timing(&self) -> Option<&BitTiming> {
        self.bit_timing.as_ref()
    }

    /// Data phase bit timing
    pub fn data_bit_timing(&self) -> Option<&BitTiming> {
        self.data_bit_timing.as_ref()
    }

    /// Nominal bitrate
    pub fn bitrate(&self) -> Option<HertzU32> {
        self.bit_timing.map(|timing| timing.bitrate)
    }

    /// Data phase bitrate
    pub fn data_bitrate(&self) -> Option<HertzU32> {
        self.data_bit_timing.map(|timing| timing.bitrate)
    }

    /// Life cycle flags
    pub fn flags(&self) -> ChipFlags {
        let mut flags = ChipFlags::CONFIGURED;
        flags.set(ChipFlags::RUNNING, self.chip.is_running());
        flags
    }

    /// Operating mode
    pub fn control_mode(&self) -> ControlMode {
        self.mode
    }

    /// Operating modes the controller supports
    pub fn supported_control_mode(&self) -> ControlMode {
        ControlMode::SUPPORTED
    }

    /// Number of TXT buffers in use
    pub fn ntxbufs(&self) -> usize {
        self.chip.ntxbufs()
    }

    /// Free running 64-bit timestamp of the controller
    pub fn timestamp(&self) -> u64 {
        let regs = self.regs();
        let mut upper = regs.read32(reg::TIMESTAMP_HIGH);
        let mut lower = regs.read32(reg::TIMESTAMP_LOW);
        if regs.read32(reg::TIMESTAMP_HIGH) != upper {
            // The lower word wrapped in between
            upper = regs.read32(reg::TIMESTAMP_HIGH);
            lower = regs.read32(reg::TIMESTAMP_LOW);
        }
        u64::from(upper) << 32 | u64::from(lower)
    }

    /// Read error counters
    pub fn error_counters(&self) -> ErrorCounters {
        ErrorCounters::read(self.regs())
    }

    /// Fault confinement state as reported by the hardware
    pub fn fault_state(&self) -> CanState {
        fault::read_fault_state(self.regs())
    }

    /// Last state recorded by the driver
    pub fn state(&self) -> CanState {
        self.chip.stats.state()
    }

    /// Statistics counters
    pub fn stats(&self) -> StatsSnapshot {
        self.chip.stats.snapshot()
    }
}
