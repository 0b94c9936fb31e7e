//! Layout of error frames
//!
//! Bus conditions are reported as frames carrying [`FrameFlags::ERR`]. The
//! identifier holds a set of [`ErrorClass`] bits, the payload holds details
//! at the byte positions listed below.
//!
//! [`FrameFlags::ERR`]: super::FrameFlags::ERR

use bitflags::bitflags;

/// Payload length of every error frame
pub const ERROR_FRAME_DLEN: u16 = 8;

/// Byte holding the bit position of a lost arbitration
pub const DATA_BYTE_LOSTARB: usize = 0;
/// Byte holding [`ControllerStatus`]
pub const DATA_BYTE_CTRL: usize = 1;
/// Byte holding the protocol violation type
pub const DATA_BYTE_PROT: usize = 2;
/// Byte holding the protocol violation location
pub const DATA_BYTE_PROT_LOC: usize = 3;
/// Byte holding the transmit error counter
pub const DATA_BYTE_CNT_TX: usize = 6;
/// Byte holding the receive error counter
pub const DATA_BYTE_CNT_RX: usize = 7;

/// Arbitration lost at an unknown bit
pub const LOSTARB_UNSPEC: u8 = 0x00;
/// Unspecified protocol violation
pub const PROT_UNSPEC: u8 = 0x00;
/// Unspecified protocol violation location
pub const PROT_LOC_UNSPEC: u8 = 0x00;

bitflags! {
    /// Error classes carried in the identifier of an error frame
    pub struct ErrorClass: u32 {
        /// TX timeout
        const TX_TIMEOUT = 0x001;
        /// Lost arbitration
        const LOSTARB = 0x002;
        /// Controller problem, see [`DATA_BYTE_CTRL`]
        const CRTL = 0x004;
        /// Protocol violation, see [`DATA_BYTE_PROT`]
        const PROT = 0x008;
        /// Transceiver status
        const TRX = 0x010;
        /// No acknowledge on transmission
        const ACK = 0x020;
        /// Bus off
        const BUSOFF = 0x040;
        /// Bus error
        const BUSERROR = 0x080;
        /// Controller restarted
        const RESTARTED = 0x100;
        /// Error counters are valid, see [`DATA_BYTE_CNT_TX`]
        const CNT = 0x200;
    }
}

bitflags! {
    /// Controller problems, stored at [`DATA_BYTE_CTRL`]
    pub struct ControllerStatus: u8 {
        /// RX buffer overflow
        const RX_OVERFLOW = 0x01;
        /// TX buffer overflow
        const TX_OVERFLOW = 0x02;
        /// Receive error warning level reached
        const RX_WARNING = 0x04;
        /// Transmit error warning level reached
        const TX_WARNING = 0x08;
        /// Receive error passive level reached
        const RX_PASSIVE = 0x10;
        /// Transmit error passive level reached
        const TX_PASSIVE = 0x20;
        /// Recovered to error active state
        const ACTIVE = 0x40;
    }
}
