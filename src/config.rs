//! CAN bus configuration

use bitflags::bitflags;
use core::ops::RangeInclusive;
use fugit::HertzU32;

/// Bitrate error tolerated by [`BitTiming::calculate`], in tenths of a percent
const MAX_BITRATE_ERROR: u64 = 50;

/// Bit-timing parameters
///
/// The bit time consists of the synchronization segment (one time quantum),
/// `prop_seg`, `phase_seg1` and `phase_seg2`, all expressed in time quanta of
/// `brp` CAN clock periods. These are *real* values, they are written to the
/// HW register as they are.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BitTiming {
    /// The bitrate of the bus
    pub bitrate: HertzU32,
    /// Sample point in tenths of a percent of the bit time
    pub sample_point: u32,
    /// Time quantum in nanoseconds
    pub tq: u32,
    /// Propagation segment
    pub prop_seg: u32,
    /// Phase segment before the sample point
    pub phase_seg1: u32,
    /// Phase segment after the sample point
    pub phase_seg2: u32,
    /// Synchronization jump width
    pub sjw: u32,
    /// Bit rate prescaler
    pub brp: u32,
}

/// Which of the two bit timings of a CAN FD controller is addressed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitTimingKind {
    /// Arbitration phase and classic frames
    Nominal,
    /// Data phase of bit rate switched FD frames
    Data,
}

/// Hardware limits of a bit timing
#[derive(Clone, Debug)]
pub struct BitTimingConst {
    /// Valid `prop_seg + phase_seg1`
    pub tseg1: RangeInclusive<u32>,
    /// Valid `phase_seg2`
    pub tseg2: RangeInclusive<u32>,
    /// Maximal synchronization jump width
    pub sjw_max: u32,
    /// Valid prescaler values
    pub brp: RangeInclusive<u32>,
    /// Prescaler step
    pub brp_inc: u32,
    /// Width of the `PH1` register field
    pub phase_seg1_max: u32,
    /// Width of the `PROP` register field
    pub prop_seg_max: u32,
}

/// Limits of the nominal bit timing
pub const NOMINAL_BIT_TIMING_CONST: BitTimingConst = BitTimingConst {
    tseg1: 2..=190,
    tseg2: 1..=63,
    sjw_max: 31,
    brp: 1..=8,
    brp_inc: 1,
    phase_seg1_max: 63,
    prop_seg_max: 127,
};

/// Limits of the data phase bit timing
pub const DATA_BIT_TIMING_CONST: BitTimingConst = BitTimingConst {
    tseg1: 2..=94,
    tseg2: 1..=31,
    sjw_max: 31,
    brp: 1..=2,
    brp_inc: 1,
    phase_seg1_max: 31,
    prop_seg_max: 63,
};

impl BitTimingKind {
    /// Hardware limits of this timing
    pub fn limits(self) -> &'static BitTimingConst {
        match self {
            Self::Nominal => &NOMINAL_BIT_TIMING_CONST,
            Self::Data => &DATA_BIT_TIMING_CONST,
        }
    }
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitTimingError {
    /// Bitrate or CAN clock is zero
    ZeroFrequency,
    /// `prop_seg + phase_seg1` is outside the wrapped `RangeInclusive`
    TimeSegment1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// Segments do not fit the register fields even after redistribution
    SegmentsDoNotFit,
    /// No combination of prescaler and time segments reaches the bitrate
    NoValidPrescaler {
        /// Provided CAN clock
        can_clock: HertzU32,
        /// Requested bitrate
        bitrate: HertzU32,
    },
    /// The closest reachable bitrate deviates too much
    BitrateErrorTooHigh {
        /// Requested bitrate
        bitrate: HertzU32,
        /// Closest reachable bitrate
        achieved: HertzU32,
    },
}

/// Sample point recommended by CiA for `bitrate`, in tenths of a percent
fn nominal_sample_point(bitrate: u32) -> u32 {
    if bitrate > 800_000 {
        750
    } else if bitrate > 500_000 {
        800
    } else {
        875
    }
}

/// Best split of `tseg` time quanta (excluding the synchronization segment)
/// into `tseg1` and `tseg2` for the requested sample point
///
/// Returns `(sample_point, tseg2, sample_point_error)`; the error is
/// `u32::MAX` if no split reaches the sample point from below.
fn update_sample_point(btc: &BitTimingConst, nominal: u32, tseg: u32) -> (u32, u32, u32) {
    let mut best = (0, 0, u32::MAX);
    let tseg = i64::from(tseg);
    let (tseg1_max, tseg2_min, tseg2_max) = (
        i64::from(*btc.tseg1.end()),
        i64::from(*btc.tseg2.start()),
        i64::from(*btc.tseg2.end()),
    );
    for i in 0..=1 {
        let mut tseg2 = tseg + 1 - (i64::from(nominal) * (tseg + 1)) / 1000 - i;
        tseg2 = tseg2.clamp(tseg2_min, tseg2_max);
        let mut tseg1 = tseg - tseg2;
        if tseg1 > tseg1_max {
            tseg1 = tseg1_max;
            tseg2 = tseg - tseg1;
        }
        let sample_point = (1000 * (tseg + 1 - tseg2) / (tseg + 1)) as u32;
        let error = nominal.abs_diff(sample_point);
        if sample_point <= nominal && error < best.2 {
            best = (sample_point, tseg2 as u32, error);
        }
    }
    best
}

impl BitTiming {
    /// Returns the number of time quanta that make up one bit time, `t_bit /
    /// t_q`
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + self.prop_seg + self.phase_seg1 + self.phase_seg2
    }

    /// Finds the timing closest to `bitrate` for a core running at
    /// `can_clock`
    ///
    /// Candidates are ranked by bitrate error first and by distance from the
    /// CiA recommended sample point second. Fails if the best candidate is
    /// more than 5 % off.
    pub fn calculate(
        bitrate: HertzU32,
        can_clock: HertzU32,
        btc: &BitTimingConst,
    ) -> Result<Self, BitTimingError> {
        let rate = bitrate.to_Hz();
        let clock = can_clock.to_Hz();
        if rate == 0 || clock == 0 {
            return Err(BitTimingError::ZeroFrequency);
        }
        let nominal = nominal_sample_point(rate);
        let brp_inc = btc.brp_inc.max(1);

        let mut best_rate_error = u32::MAX;
        let mut best_sp_error = u32::MAX;
        let mut best_tseg = 0;
        let mut best_brp = 0;

        let tseg_min = (btc.tseg1.start() + btc.tseg2.start()) * 2;
        let tseg_max = (btc.tseg1.end() + btc.tseg2.end()) * 2 + 1;
        for tseg in (tseg_min..=tseg_max).rev() {
            let tsegall = 1 + tseg / 2;
            // Odd `tseg` rounds the prescaler up instead of down
            let brp = (u64::from(clock) / (u64::from(tsegall) * u64::from(rate))) as u32 + tseg % 2;
            let brp = brp / brp_inc * brp_inc;
            if !btc.brp.contains(&brp) {
                continue;
            }
            let rate_error = rate.abs_diff(clock / (brp * tsegall));
            if rate_error > best_rate_error {
                continue;
            }
            if rate_error < best_rate_error {
                best_sp_error = u32::MAX;
            }
            let (_, _, sp_error) = update_sample_point(btc, nominal, tseg / 2);
            if sp_error >= best_sp_error {
                continue;
            }
            best_rate_error = rate_error;
            best_sp_error = sp_error;
            best_tseg = tseg / 2;
            best_brp = brp;
            if rate_error == 0 && sp_error == 0 {
                break;
            }
        }

        if best_brp == 0 {
            return Err(BitTimingError::NoValidPrescaler {
                can_clock,
                bitrate,
            });
        }

        let (sample_point, tseg2, _) = update_sample_point(btc, nominal, best_tseg);
        let tseg1 = best_tseg - tseg2;
        let achieved = clock / (best_brp * (tseg1 + tseg2 + 1));
        if best_rate_error != 0
            && u64::from(best_rate_error) * 1000 / u64::from(rate) > MAX_BITRATE_ERROR
        {
            return Err(BitTimingError::BitrateErrorTooHigh {
                bitrate,
                achieved: HertzU32::from_raw(achieved),
            });
        }

        let prop_seg = tseg1 / 2;
        Ok(Self {
            bitrate: HertzU32::from_raw(achieved),
            sample_point,
            tq: (u64::from(best_brp) * 1_000_000_000 / u64::from(clock)) as u32,
            prop_seg,
            phase_seg1: tseg1 - prop_seg,
            phase_seg2: tseg2,
            sjw: 1,
            brp: best_brp,
        })
    }

    /// Validates a caller supplied timing against the hardware limits
    pub fn check(&self, btc: &BitTimingConst) -> Result<(), BitTimingError> {
        if self.bitrate.to_Hz() == 0 {
            Err(BitTimingError::ZeroFrequency)
        } else if !self
            .prop_seg
            .checked_add(self.phase_seg1)
            .map_or(false, |tseg1| btc.tseg1.contains(&tseg1))
        {
            Err(BitTimingError::TimeSegment1OutOfRange(btc.tseg1.clone()))
        } else if !btc.tseg2.contains(&self.phase_seg2) {
            Err(BitTimingError::PhaseSeg2OutOfRange(btc.tseg2.clone()))
        } else if !(1..=btc.sjw_max).contains(&self.sjw) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                1..=btc.sjw_max,
            ))
        } else if !btc.brp.contains(&self.brp) {
            Err(BitTimingError::PrescalerOutOfRange(btc.brp.clone()))
        } else {
            let mut fitted = *self;
            fitted.fit_phase_seg1(btc.phase_seg1_max);
            if fitted.prop_seg > btc.prop_seg_max {
                Err(BitTimingError::SegmentsDoNotFit)
            } else {
                Ok(())
            }
        }
    }

    /// Moves the part of `phase_seg1` exceeding `max` into `prop_seg`
    ///
    /// The calculation only constrains the sum of both segments, while the
    /// `PH1` register field is narrower than `PROP`.
    pub fn fit_phase_seg1(&mut self, max: u32) {
        if self.phase_seg1 > max {
            self.prop_seg = self.prop_seg.saturating_add(self.phase_seg1 - max);
            self.phase_seg1 = max;
        }
    }
}

bitflags! {
    /// Controller operating modes
    #[derive(Default)]
    pub struct ControlMode: u32 {
        /// Internal loopback
        const LOOPBACK = 0x01;
        /// Bus monitoring, the controller never drives the bus
        const LISTEN_ONLY = 0x02;
        /// Triple sampling
        const TRIPLE_SAMPLING = 0x04;
        /// No automatic retransmission
        const ONE_SHOT = 0x08;
        /// Report bus errors and lost arbitration as error frames
        const BERR_REPORTING = 0x10;
        /// CAN FD frames
        const FD = 0x20;
        /// Do not require an acknowledge for transmitted frames
        const PRESUME_ACK = 0x40;
        /// Non-ISO CAN FD
        const FD_NON_ISO = 0x80;
    }
}

impl ControlMode {
    /// Modes the controller can be put in
    pub const SUPPORTED: Self = Self::from_bits_truncate(
        Self::LOOPBACK.bits
            | Self::LISTEN_ONLY.bits
            | Self::ONE_SHOT.bits
            | Self::BERR_REPORTING.bits
            | Self::FD.bits
            | Self::PRESUME_ACK.bits
            | Self::FD_NON_ISO.bits,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32 as _;

    #[test]
    fn nominal_500k_from_100m_is_exact() {
        let bt =
            BitTiming::calculate(500.kHz(), 100.MHz(), &NOMINAL_BIT_TIMING_CONST).unwrap();
        assert_eq!(bt.bitrate, HertzU32::from_raw(500_000));
        assert_eq!(bt.brp, 1);
        assert_eq!(bt.prop_seg + bt.phase_seg1, 174);
        assert_eq!(bt.phase_seg2, 25);
        assert_eq!(bt.sample_point, 875);
        assert_eq!(bt.time_quanta_per_bit(), 200);
        assert_eq!(bt.tq, 10);
        assert_eq!(bt.sjw, 1);
        assert!(bt.check(&NOMINAL_BIT_TIMING_CONST).is_ok());
    }

    #[test]
    fn data_2m_from_100m_stays_below_sample_point() {
        let bt = BitTiming::calculate(2.MHz(), 100.MHz(), &DATA_BIT_TIMING_CONST).unwrap();
        assert_eq!(bt.bitrate, HertzU32::from_raw(2_000_000));
        assert_eq!(bt.brp, 1);
        assert_eq!(bt.phase_seg2, 13);
        assert_eq!(bt.prop_seg + bt.phase_seg1, 36);
        assert_eq!(bt.sample_point, 740);
    }

    #[test]
    fn unreachable_bitrate_is_rejected() {
        assert_eq!(
            BitTiming::calculate(10.kHz(), 100.MHz(), &NOMINAL_BIT_TIMING_CONST),
            Err(BitTimingError::NoValidPrescaler {
                can_clock: 100.MHz(),
                bitrate: 10.kHz(),
            })
        );
        assert_eq!(
            BitTiming::calculate(0.Hz(), 100.MHz(), &NOMINAL_BIT_TIMING_CONST),
            Err(BitTimingError::ZeroFrequency)
        );
    }

    #[test]
    fn phase_seg1_excess_moves_to_prop_seg() {
        let mut bt = BitTiming {
            bitrate: 500.kHz(),
            sample_point: 875,
            tq: 10,
            prop_seg: 10,
            phase_seg1: 63 + 7,
            phase_seg2: 25,
            sjw: 5,
            brp: 2,
        };
        bt.fit_phase_seg1(NOMINAL_BIT_TIMING_CONST.phase_seg1_max);
        assert_eq!(bt.prop_seg, 17);
        assert_eq!(bt.phase_seg1, 63);
        assert_eq!(bt.phase_seg2, 25);
        assert_eq!(bt.sjw, 5);
        assert_eq!(bt.brp, 2);
    }

    #[test]
    fn phase_seg1_within_limit_is_untouched() {
        let mut bt = BitTiming::calculate(1.MHz(), 80.MHz(), &DATA_BIT_TIMING_CONST).unwrap();
        let before = bt;
        bt.fit_phase_seg1(200);
        assert_eq!(bt, before);
    }

    #[test]
    fn check_reports_first_violation() {
        let good = BitTiming::calculate(500.kHz(), 100.MHz(), &NOMINAL_BIT_TIMING_CONST).unwrap();
        let mut bad = good;
        bad.phase_seg2 = 64;
        assert_eq!(
            bad.check(&NOMINAL_BIT_TIMING_CONST),
            Err(BitTimingError::PhaseSeg2OutOfRange(1..=63))
        );
        let mut bad = good;
        bad.brp = 3;
        assert_eq!(
            bad.check(&DATA_BIT_TIMING_CONST),
            Err(BitTimingError::TimeSegment1OutOfRange(2..=94))
        );
        let mut bad = good;
        bad.sjw = 0;
        assert_eq!(
            bad.check(&NOMINAL_BIT_TIMING_CONST),
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(1..=31))
        );
    }

    #[test]
    fn huge_segments_are_out_of_range() {
        let good = BitTiming::calculate(500.kHz(), 100.MHz(), &NOMINAL_BIT_TIMING_CONST).unwrap();
        let mut bad = good;
        bad.prop_seg = u32::MAX;
        assert_eq!(
            bad.check(&NOMINAL_BIT_TIMING_CONST),
            Err(BitTimingError::TimeSegment1OutOfRange(2..=190))
        );
        let mut bad = good;
        bad.phase_seg1 = u32::MAX;
        bad.prop_seg = 1;
        assert_eq!(
            bad.check(&DATA_BIT_TIMING_CONST),
            Err(BitTimingError::TimeSegment1OutOfRange(2..=94))
        );

        bad.fit_phase_seg1(31);
        assert_eq!(bad.prop_seg, u32::MAX);
        assert_eq!(bad.phase_seg1, 31);
    }

    #[test]
    fn triple_sampling_is_not_supported() {
        assert!(!ControlMode::SUPPORTED.contains(ControlMode::TRIPLE_SAMPLING));
        assert!(ControlMode::SUPPORTED.contains(ControlMode::FD | ControlMode::ONE_SHOT));
    }
}
