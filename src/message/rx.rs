//! Reading frames from the RX FIFO

use super::{Frame, FrameFlags, MAX_CLASSIC_DATA_LEN, MAX_DATA_LEN};
use crate::reg::{self, FrameFormat, Identifier};
use core::convert::Infallible;
use ctucanfd_core::Registers;

/// Words following the frame format word that are not payload: identifier
/// and two timestamp words
const HEADER_WORDS: u32 = 3;

/// Pops one frame from the RX FIFO
///
/// The FIFO is a streaming port: every read of `RX_DATA` consumes a word. A
/// frame format word announcing zero following words means the FIFO is empty,
/// which is reported as [`nb::Error::WouldBlock`] after consuming just that
/// one word.
///
/// Exactly as many words as announced are consumed, even if the decoded
/// payload is shorter, so the next call starts on a frame boundary.
pub fn receive<R: Registers>(regs: &R) -> nb::Result<Frame, Infallible> {
    let ffw = FrameFormat(regs.read32(reg::RX_DATA));
    if ffw.rwcnt() == 0 {
        return Err(nb::Error::WouldBlock);
    }
    Ok(read_frame(regs, ffw))
}

fn read_frame<R: Registers>(regs: &R, ffw: FrameFormat) -> Frame {
    let mut frame = Frame::default();

    let idw = Identifier(regs.read32(reg::RX_DATA));
    if ffw.ide() {
        frame.header.can_id = idw.0 & 0x1fff_ffff;
        frame.header.flags |= FrameFlags::IDE;
    } else {
        frame.header.can_id = idw.identifier_base();
    }

    if ffw.fdf() {
        frame.header.flags |= FrameFlags::FDF;
        if ffw.brs() {
            frame.header.flags |= FrameFlags::BRS;
        }
        if ffw.esi_rsv() {
            frame.header.flags |= FrameFlags::ESI;
        }
    } else if ffw.rtr() {
        frame.header.flags |= FrameFlags::RTR;
    }

    let payload_bytes = (ffw.rwcnt().saturating_sub(HEADER_WORDS) * 4) as usize;
    let dlc = ffw.dlc() as usize;
    let len = if dlc <= MAX_CLASSIC_DATA_LEN {
        dlc
    } else if ffw.fdf() {
        payload_bytes
    } else {
        MAX_CLASSIC_DATA_LEN
    }
    .min(MAX_DATA_LEN);
    frame.header.dlen = len as u16;

    let low = regs.read32(reg::RX_DATA);
    let high = regs.read32(reg::RX_DATA);
    frame.header.timestamp = u64::from(high) << 32 | u64::from(low);

    let stored = len.min(payload_bytes);
    let mut consumed = 0;
    for chunk in frame.data[..stored].chunks_mut(4) {
        let word = regs.read32(reg::RX_DATA).to_le_bytes();
        chunk.copy_from_slice(&word[..chunk.len()]);
        consumed += 4;
    }
    while consumed < payload_bytes {
        regs.read32(reg::RX_DATA);
        consumed += 4;
    }

    frame
}
