//! Register map of the CTU CAN FD IP core
//!
//! All registers are accessed as 32-bit words. Registers the datasheet
//! describes as 8 or 16 bits wide are reached through the word they share
//! with their neighbours, e.g. `SETTINGS` lives in the upper half of the
//! `MODE` word.

use bitfield::bitfield;
use ctucanfd_core::Registers;
use vcell::VolatileCell;

/// Device identification; lower half holds [`DEVICE_ID_MAGIC`]
pub const DEVICE_ID: usize = 0x00;
/// `MODE` in the lower half, `SETTINGS` in the upper half
pub const MODE: usize = 0x04;
/// Controller status
pub const STATUS: usize = 0x08;
/// Controller commands
pub const COMMAND: usize = 0x0c;
/// Interrupt status; writing ones clears the flags
pub const INT_STAT: usize = 0x10;
/// Interrupt enable set
pub const INT_ENA_SET: usize = 0x14;
/// Interrupt enable clear
pub const INT_ENA_CLR: usize = 0x18;
/// Interrupt mask set
pub const INT_MASK_SET: usize = 0x1c;
/// Interrupt mask clear
pub const INT_MASK_CLR: usize = 0x20;
/// Nominal bit timing
pub const BTR: usize = 0x24;
/// Data phase bit timing
pub const BTR_FD: usize = 0x28;
/// Error limits and fault confinement state
pub const EWL: usize = 0x2c;
/// Receive and transmit error counters
pub const REC: usize = 0x30;
/// `RX_STATUS` in the lower half, `RX_SETTINGS` in the upper half
pub const RX_STATUS: usize = 0x68;
/// RX FIFO read port; every read pops one word
pub const RX_DATA: usize = 0x6c;
/// Status of all TXT buffers, one nibble per buffer
pub const TX_STATUS: usize = 0x70;
/// `TX_COMMAND` in the lower half, `TXTB_INFO` in the upper half
pub const TX_COMMAND: usize = 0x74;
/// Priority of all TXT buffers, one nibble per buffer
pub const TX_PRIORITY: usize = 0x78;
/// `TRV_DELAY` in the lower half, `SSP_CFG` in the upper half
pub const TRV_DELAY: usize = 0x80;
/// Lower word of the free running timestamp
pub const TIMESTAMP_LOW: usize = 0x94;
/// Upper word of the free running timestamp
pub const TIMESTAMP_HIGH: usize = 0x98;

/// Value read from the lower half of [`DEVICE_ID`] on a CTU CAN FD core
pub const DEVICE_ID_MAGIC: u32 = 0xcafd;

/// `RX_SETTINGS.RTSOP` as seen through the [`RX_STATUS`] word; captures the
/// timestamp at start of frame instead of end of frame
pub const RX_SETTINGS_RTSOP: u32 = 1 << 16;

/// Offsets of the words inside a TXT buffer window
pub mod txtb {
    /// Frame format word
    pub const FRAME_FORMAT_W: usize = 0x00;
    /// Identifier word
    pub const IDENTIFIER_W: usize = 0x04;
    /// Lower word of the transmit time
    pub const TIMESTAMP_L_W: usize = 0x08;
    /// Upper word of the transmit time
    pub const TIMESTAMP_U_W: usize = 0x0c;
    /// First payload word
    pub const DATA_1_4_W: usize = 0x10;

    /// Address of `word` in the window of TXT buffer `buffer`
    pub const fn offset(buffer: usize, word: usize) -> usize {
        (buffer + 1) * 0x100 + word
    }
}

bitfield! {
    /// `MODE` and `SETTINGS` registers
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Mode(u32);
    impl Debug;
    u32;
    /// Soft reset
    pub rst, set_rst: 0;
    /// Bus monitoring (listen only)
    pub bmm, set_bmm: 1;
    /// Self test, no acknowledge required
    pub stm, set_stm: 2;
    /// Acceptance filters
    pub afm, set_afm: 3;
    /// Flexible data-rate support
    pub fde, set_fde: 4;
    /// Time triggered transmission
    pub tttm, set_tttm: 5;
    /// Restricted operation
    pub rom, set_rom: 6;
    /// Acknowledge forbidden
    pub acf, set_acf: 7;
    /// Test mode
    pub tstm, set_tstm: 8;
    /// RX buffer automatic mode
    pub rxbam, set_rxbam: 9;
    /// TXT buffer backup mode
    pub txbbm, set_txbbm: 10;
    /// Self acknowledge
    pub sam, set_sam: 11;
    /// Retransmit limit enable
    pub rtrle, set_rtrle: 16;
    /// Retransmit threshold
    pub rtrth, set_rtrth: 20, 17;
    /// Internal loopback
    pub ilbp, set_ilbp: 21;
    /// Controller enable
    pub ena, set_ena: 22;
    /// Non-ISO CAN FD
    pub nisofd, set_nisofd: 23;
    /// Protocol exception handling
    pub pex, set_pex: 24;
    /// TXT buffers go to failed state on bus-off
    pub tbfbo, set_tbfbo: 25;
    /// Drop received frames with errors
    pub fdrf, set_fdrf: 26;
}

bitfield! {
    /// `COMMAND` register
    #[derive(Copy, Clone, Default)]
    pub struct Command(u32);
    impl Debug;
    /// Release receive buffer
    pub rrb, set_rrb: 2;
    /// Clear data overrun flag
    pub cdo, set_cdo: 3;
    /// Error counters reset
    pub ercrst, set_ercrst: 4;
    /// RX frame counter reset
    pub rxfcrst, set_rxfcrst: 5;
    /// TX frame counter reset
    pub txfcrst, set_txfcrst: 6;
}

bitfield! {
    /// `BTR` register, nominal bit timing
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Btr(u32);
    impl Debug;
    u32;
    /// Propagation segment
    pub prop, set_prop: 6, 0;
    /// Phase segment 1
    pub ph1, set_ph1: 12, 7;
    /// Phase segment 2
    pub ph2, set_ph2: 18, 13;
    /// Bit rate prescaler
    pub brp, set_brp: 26, 19;
    /// Synchronisation jump width
    pub sjw, set_sjw: 31, 27;
}

bitfield! {
    /// `BTR_FD` register, data phase bit timing
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct BtrFd(u32);
    impl Debug;
    u32;
    /// Propagation segment
    pub prop_fd, set_prop_fd: 5, 0;
    /// Phase segment 1
    pub ph1_fd, set_ph1_fd: 11, 7;
    /// Phase segment 2
    pub ph2_fd, set_ph2_fd: 17, 13;
    /// Bit rate prescaler
    pub brp_fd, set_brp_fd: 26, 19;
    /// Synchronisation jump width
    pub sjw_fd, set_sjw_fd: 31, 27;
}

bitfield! {
    /// `EWL`, `ERP` and `FAULT_STATE` registers
    #[derive(Copy, Clone, Default)]
    pub struct Ewl(u32);
    impl Debug;
    u32;
    /// Error warning limit
    pub ew_limit, _: 7, 0;
    /// Error passive limit
    pub erp_limit, _: 15, 8;
    /// Error active
    pub era, _: 16;
    /// Error passive
    pub erp, _: 17;
    /// Bus off
    pub bof, _: 18;
}

bitfield! {
    /// `REC` and `TEC` registers
    #[derive(Copy, Clone, Default)]
    pub struct Rec(u32);
    impl Debug;
    u32;
    /// Receive error counter
    pub rec_val, _: 8, 0;
    /// Transmit error counter
    pub tec_val, _: 24, 16;
}

bitfield! {
    /// `TRV_DELAY` and `SSP_CFG` registers
    #[derive(Copy, Clone, Default)]
    pub struct TrvDelay(u32);
    impl Debug;
    u32;
    /// Measured transceiver delay
    pub trv_delay_value, _: 15, 0;
    /// Secondary sample point offset
    pub ssp_offset, set_ssp_offset: 23, 16;
    /// Secondary sample point source
    pub ssp_src, set_ssp_src: 25, 24;
}

/// `SSP_CFG.SSP_SRC` value selecting measured delay plus offset
pub const SSP_SRC_MEAS_N_OFFSET: u32 = 0x1;

bitfield! {
    /// `TXTB_INFO` as seen through the [`TX_COMMAND`] word
    #[derive(Copy, Clone, Default)]
    pub struct TxtbInfo(u32);
    impl Debug;
    u32;
    /// Number of TXT buffers present; 0 on old cores that always have 4
    pub txt_buffer_count, _: 19, 16;
}

bitfield! {
    /// Frame format word shared by the RX FIFO and the TXT buffers
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FrameFormat(u32);
    impl Debug;
    u32;
    /// Data length code
    pub dlc, set_dlc: 3, 0;
    /// Remote transmission request
    pub rtr, set_rtr: 5;
    /// Identifier extension
    pub ide, set_ide: 6;
    /// Flexible data-rate format
    pub fdf, set_fdf: 7;
    /// Loopback frame
    pub lbpf, set_lbpf: 8;
    /// Bit rate shift
    pub brs, set_brs: 9;
    /// Error state indicator
    pub esi_rsv, set_esi_rsv: 10;
    /// Number of words following the frame format word in the RX FIFO
    pub rwcnt, set_rwcnt: 15, 11;
}

bitfield! {
    /// Identifier word shared by the RX FIFO and the TXT buffers
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Identifier(u32);
    impl Debug;
    u32;
    /// Extension part of a 29-bit identifier
    pub identifier_ext, set_identifier_ext: 17, 0;
    /// Base (11-bit) identifier
    pub identifier_base, set_identifier_base: 28, 18;
}

/// [`Registers`] implementation over a memory-mapped register window
pub struct Mmio {
    base: *const VolatileCell<u32>,
}

impl Mmio {
    /// # Safety
    /// `base` must point to the register window of a CTU CAN FD core that
    /// stays mapped for the lifetime of the returned object, and nothing else
    /// may access that window.
    pub const unsafe fn new(base: *const ()) -> Self {
        Self { base: base.cast() }
    }

    fn cell(&self, offset: usize) -> &VolatileCell<u32> {
        // Safety: Validity of the window is guaranteed by the contract of `new`.
        unsafe { &*self.base.add(offset / 4) }
    }
}

// Safety: All accesses are single volatile word accesses.
unsafe impl Registers for Mmio {
    fn read32(&self, offset: usize) -> u32 {
        self.cell(offset).get()
    }

    fn write32(&self, offset: usize, value: u32) {
        self.cell(offset).set(value)
    }
}

// Safety: `Mmio` is the sole owner of the window it points to.
unsafe impl Send for Mmio {}
// Safety: The hardware serialises word accesses.
unsafe impl Sync for Mmio {}
