//! Fault confinement and error frames
//!
//! The core reports its fault confinement state through dedicated status
//! bits next to the error counters. Changes of that state as well as bus
//! errors, lost arbitration and RX overruns are turned into error frames
//! (see [`message::error`]) that travel the same path as received frames.
//!
//! [`message::error`]: crate::message::error

use crate::interrupt::InterruptSet;
use crate::message::error::{
    ControllerStatus, ErrorClass, DATA_BYTE_CNT_RX, DATA_BYTE_CNT_TX, DATA_BYTE_CTRL,
    DATA_BYTE_LOSTARB, DATA_BYTE_PROT, DATA_BYTE_PROT_LOC, ERROR_FRAME_DLEN, LOSTARB_UNSPEC,
    PROT_LOC_UNSPEC, PROT_UNSPEC,
};
use crate::message::{Frame, FrameFlags};
use crate::reg::{self, Ewl, Rec};
use crate::stats::CanState;
use ctucanfd_core::Registers;

/// Receive error counter above which an error passive node blames reception
const RX_PASSIVE_LIMIT: u8 = 127;

/// Receive and transmit error counters
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    /// Receive error counter
    pub rec: u16,
    /// Transmit error counter
    pub tec: u16,
}

impl From<Rec> for ErrorCounters {
    fn from(value: Rec) -> Self {
        Self {
            rec: value.rec_val() as u16,
            tec: value.tec_val() as u16,
        }
    }
}

impl ErrorCounters {
    /// Reads the counters from the controller
    pub fn read<R: Registers>(regs: &R) -> Self {
        Rec(regs.read32(reg::REC)).into()
    }

    /// Counters saturated to the single byte an error frame has for each
    fn as_bytes(self) -> (u8, u8) {
        let clamp = |value: u16| value.min(u8::MAX.into()) as u8;
        (clamp(self.tec), clamp(self.rec))
    }
}

/// Derives the fault confinement state from the status bits
///
/// The error active bit is refined into [`CanState::ErrorWarning`] when
/// either counter reached the warning limit. With no status bit set the node
/// is reported error passive.
pub fn fault_state(ewl: Ewl, counters: ErrorCounters) -> CanState {
    let limit = ewl.ew_limit();
    if ewl.era() {
        if limit > u32::from(counters.rec) && limit > u32::from(counters.tec) {
            CanState::ErrorActive
        } else {
            CanState::ErrorWarning
        }
    } else if ewl.erp() {
        CanState::ErrorPassive
    } else if ewl.bof() {
        CanState::BusOff
    } else {
        CanState::ErrorPassive
    }
}

/// Reads the fault confinement state from the controller
pub fn read_fault_state<R: Registers>(regs: &R) -> CanState {
    let ewl = Ewl(regs.read32(reg::EWL));
    fault_state(ewl, ErrorCounters::read(regs))
}

/// Builds the error frame reporting the error interrupts in `isr`
///
/// `state` and `counters` are the values read while handling the interrupt.
/// Returns `None` if none of the interrupts produces a report.
pub fn error_frame(isr: InterruptSet, state: CanState, counters: ErrorCounters) -> Option<Frame> {
    let mut frame = Frame::default();
    let mut class = ErrorClass::empty();
    let mut ctrl = ControllerStatus::empty();
    let mut report = false;
    let (tec, rec) = counters.as_bytes();

    if isr.fcsi() || isr.ewli() {
        let mut with_counters = true;
        match state {
            CanState::BusOff => {
                class |= ErrorClass::BUSOFF;
                with_counters = false;
            }
            CanState::ErrorPassive => {
                class |= ErrorClass::CRTL | ErrorClass::CNT;
                ctrl |= if rec > RX_PASSIVE_LIMIT {
                    ControllerStatus::RX_PASSIVE
                } else {
                    ControllerStatus::TX_PASSIVE
                };
            }
            CanState::ErrorWarning => {
                class |= ErrorClass::CRTL | ErrorClass::CNT;
                ctrl |= if tec > rec {
                    ControllerStatus::TX_WARNING
                } else {
                    ControllerStatus::RX_WARNING
                };
            }
            CanState::ErrorActive => {
                class |= ErrorClass::CRTL;
                ctrl |= ControllerStatus::ACTIVE;
            }
            // Nothing to report about a disabled controller
            CanState::Stopped => with_counters = false,
        }
        if with_counters {
            frame.data[DATA_BYTE_CNT_TX] = tec;
            frame.data[DATA_BYTE_CNT_RX] = rec;
        }
        report = !class.is_empty();
    }

    if isr.ali() {
        class |= ErrorClass::CRTL | ErrorClass::LOSTARB;
        frame.data[DATA_BYTE_LOSTARB] = LOSTARB_UNSPEC;
        report = true;
    }

    if isr.bei() {
        class |= ErrorClass::CRTL | ErrorClass::PROT | ErrorClass::BUSERROR;
        frame.data[DATA_BYTE_PROT] = PROT_UNSPEC;
        frame.data[DATA_BYTE_PROT_LOC] = PROT_LOC_UNSPEC;
        report = true;
    }

    if isr.doi() {
        class |= ErrorClass::CRTL;
        ctrl |= ControllerStatus::RX_OVERFLOW;
        report = true;
    }

    if !report {
        return None;
    }
    frame.data[DATA_BYTE_CTRL] = ctrl.bits();
    frame.header.can_id = class.bits();
    frame.header.flags = FrameFlags::ERR;
    frame.header.dlen = ERROR_FRAME_DLEN;
    Some(frame)
}
