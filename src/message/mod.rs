//! Handling of messages/frames

pub mod error;
pub mod rx;
pub mod tx;

use bitflags::bitflags;
use core::cmp::min;
use embedded_can::{ExtendedId, Id, StandardId};

/// Maximal payload of a CAN FD frame
pub const MAX_DATA_LEN: usize = 64;

/// Maximal payload of a classic CAN frame
pub const MAX_CLASSIC_DATA_LEN: usize = 8;

bitflags! {
    /// Frame properties and delivery tags
    ///
    /// The lower part describes the frame itself, the rest is attached by the
    /// driver when the frame is handed to the queue layer.
    #[derive(Default)]
    pub struct FrameFlags: u16 {
        /// 29-bit identifier
        const IDE = 1 << 0;
        /// Remote transmission request
        const RTR = 1 << 1;
        /// Frame is an echo of a frame sent by the receiving edge
        const ECHO = 1 << 2;
        /// Frame was sent by this controller
        const LOCAL = 1 << 3;
        /// Frame could not be sent
        const TXERR = 1 << 4;
        /// Error frame synthesized by the driver, see [`error`]
        const ERR = 1 << 5;
        /// Frames were lost before this one
        const FIFO_OVERFLOW = 1 << 6;
        /// CAN FD format
        const FDF = 1 << 7;
        /// Bit rate switch
        const BRS = 1 << 8;
        /// Error state indicator of the transmitter
        const ESI = 1 << 9;
    }
}

/// Metadata of a [`Frame`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    /// Controller timestamp of the start of frame; zero for outgoing frames
    pub timestamp: u64,
    /// Standard or extended identifier, or error class bits for error frames
    pub can_id: u32,
    /// Frame properties
    pub flags: FrameFlags,
    /// Payload length in bytes; the requested length for remote frames
    pub dlen: u16,
}

/// CAN frame as exchanged with the queue layer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame metadata
    pub header: FrameHeader,
    /// Payload; bytes past `header.dlen` are unspecified
    pub data: [u8; MAX_DATA_LEN],
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            header: FrameHeader::default(),
            data: [0; MAX_DATA_LEN],
        }
    }
}

/// Data does not fit in the frame
#[derive(Debug)]
pub struct TooMuchData;

impl Frame {
    fn with_id(id: Id) -> Self {
        let mut frame = Self::default();
        match id {
            Id::Standard(id) => frame.header.can_id = id.as_raw().into(),
            Id::Extended(id) => {
                frame.header.can_id = id.as_raw();
                frame.header.flags |= FrameFlags::IDE;
            }
        }
        frame
    }

    fn set_data(&mut self, data: &[u8]) {
        self.data[..data.len()].copy_from_slice(data);
        self.header.dlen = data.len() as u16;
    }

    /// Creates a CAN FD frame
    ///
    /// Lengths that are not representable by a data length code are padded by
    /// the controller to the next representable one.
    pub fn new_fd(
        id: impl Into<Id>,
        data: &[u8],
        bit_rate_switching: bool,
    ) -> Result<Self, TooMuchData> {
        if data.len() > MAX_DATA_LEN {
            return Err(TooMuchData);
        }
        let mut frame = Self::with_id(id.into());
        frame.header.flags |= FrameFlags::FDF;
        if bit_rate_switching {
            frame.header.flags |= FrameFlags::BRS;
        }
        frame.set_data(data);
        Ok(frame)
    }

    /// Frame properties
    pub fn flags(&self) -> FrameFlags {
        self.header.flags
    }

    /// True if the frame uses the CAN FD format
    pub fn fd_format(&self) -> bool {
        self.header.flags.contains(FrameFlags::FDF)
    }

    /// True if the frame was synthesized by the driver to report a bus
    /// condition
    pub fn is_error_frame(&self) -> bool {
        self.header.flags.contains(FrameFlags::ERR)
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_CLASSIC_DATA_LEN {
            return None;
        }
        let mut frame = Self::with_id(id.into());
        frame.set_data(data);
        Some(frame)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_CLASSIC_DATA_LEN {
            return None;
        }
        let mut frame = Self::with_id(id.into());
        frame.header.flags |= FrameFlags::RTR;
        frame.header.dlen = dlc as u16;
        Some(frame)
    }

    fn is_extended(&self) -> bool {
        self.header.flags.contains(FrameFlags::IDE)
    }

    fn is_remote_frame(&self) -> bool {
        self.header.flags.contains(FrameFlags::RTR)
    }

    fn id(&self) -> Id {
        // The masks keep both constructors from failing
        if self.is_extended() {
            let raw = self.header.can_id & ExtendedId::MAX.as_raw();
            Id::Extended(ExtendedId::new(raw).unwrap_or(ExtendedId::ZERO))
        } else {
            let raw = self.header.can_id as u16 & StandardId::MAX.as_raw();
            Id::Standard(StandardId::new(raw).unwrap_or(StandardId::ZERO))
        }
    }

    fn dlc(&self) -> usize {
        len_to_dlc(self.header.dlen.into()).map_or(15, usize::from)
    }

    fn data(&self) -> &[u8] {
        if self.is_remote_frame() {
            &[]
        } else {
            &self.data[..min(self.header.dlen.into(), MAX_DATA_LEN)]
        }
    }
}

/// Finds the smallest data length code that encodes at least len bytes
///
/// Uses the CAN FD encoding; for lengths up to 8 it coincides with the classic
/// one.
pub fn len_to_dlc(len: usize) -> Result<u8, TooMuchData> {
    match len {
        0..=8 => Ok(len as u8),
        9..=12 => Ok(9),
        13..=16 => Ok(10),
        17..=20 => Ok(11),
        21..=24 => Ok(12),
        25..=32 => Ok(13),
        33..=48 => Ok(14),
        49..=64 => Ok(15),
        _ => Err(TooMuchData),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::Frame as _;

    fn dlc_to_len(dlc: u8, fd_format: bool) -> usize {
        match (dlc, fd_format) {
            (0..=8, _) => dlc.into(),
            (_, false) => 8,
            (9, true) => 12,
            (10, true) => 16,
            (11, true) => 20,
            (12, true) => 24,
            (13, true) => 32,
            (14, true) => 48,
            (_, true) => 64,
        }
    }

    #[test]
    fn dlc_rounds_length_up() {
        assert_eq!(len_to_dlc(0).unwrap(), 0);
        assert_eq!(len_to_dlc(8).unwrap(), 8);
        assert_eq!(len_to_dlc(9).unwrap(), 9);
        assert_eq!(len_to_dlc(33).unwrap(), 14);
        assert_eq!(len_to_dlc(64).unwrap(), 15);
        assert!(len_to_dlc(65).is_err());
    }

    #[test]
    fn dlc_decodes_per_format() {
        assert_eq!(dlc_to_len(9, true), 12);
        assert_eq!(dlc_to_len(15, true), 64);
        assert_eq!(dlc_to_len(9, false), 8);
        assert_eq!(dlc_to_len(15, false), 8);
        for len in 0..=MAX_DATA_LEN {
            let dlc = len_to_dlc(len).unwrap();
            assert!(dlc_to_len(dlc, true) >= len);
        }
    }

    #[test]
    fn classic_frame_rejects_fd_payload() {
        let id = StandardId::new(0x123).unwrap();
        assert!(Frame::new(id, &[0; 9]).is_none());
        let frame = Frame::new(id, &[1, 2, 3]).unwrap();
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.id(), Id::Standard(id));
        assert!(!frame.is_extended());
    }

    #[test]
    fn id_ignores_bits_above_the_identifier() {
        let mut frame = Frame::new(StandardId::MAX, &[]).unwrap();
        frame.header.can_id |= 0xf800;
        assert_eq!(frame.id(), Id::Standard(StandardId::MAX));

        frame.header.flags |= FrameFlags::IDE;
        frame.header.can_id = 0xffff_ffff;
        assert_eq!(frame.id(), Id::Extended(ExtendedId::MAX));
    }

    #[test]
    fn remote_frame_has_no_data() {
        let id = ExtendedId::new(0x1234_5678).unwrap();
        let frame = Frame::new_remote(id, 4).unwrap();
        assert!(frame.is_remote_frame());
        assert!(frame.is_extended());
        assert_eq!(frame.dlc(), 4);
        assert!(frame.data().is_empty());
        assert_eq!(frame.id(), Id::Extended(id));
    }

    #[test]
    fn fd_frame_carries_flags() {
        let id = StandardId::new(0x7ff).unwrap();
        let frame = Frame::new_fd(id, &[0xaa; 20], true).unwrap();
        assert!(frame.fd_format());
        assert!(frame.flags().contains(FrameFlags::BRS));
        assert_eq!(frame.dlc(), 11);
        assert_eq!(frame.data().len(), 20);
        assert!(Frame::new_fd(id, &[0; 65], false).is_err());
    }
}
