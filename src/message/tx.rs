//! Writing frames into TXT buffers

use super::{len_to_dlc, Frame, FrameFlags, MAX_DATA_LEN};
use crate::reg::{self, txtb, FrameFormat, Identifier};
use crate::txb::{TxStatus, TxtbStatus};
use ctucanfd_core::Registers;

/// Reasons a frame could not be written to a TXT buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// Buffer index is not below the number of buffers in use
    InvalidBuffer(usize),
    /// Buffer content is owned by the hardware
    NotWritable(TxtbStatus),
    /// Payload longer than a CAN FD frame can carry
    TooLong(usize),
}

/// Frame format and identifier words for `frame`
pub fn encode_header(frame: &Frame) -> Result<(FrameFormat, Identifier), InsertError> {
    let len = usize::from(frame.header.dlen);
    let dlc = len_to_dlc(len).map_err(|_| InsertError::TooLong(len))?;
    let flags = frame.header.flags;

    let mut ffw = FrameFormat(0);
    ffw.set_rtr(flags.contains(FrameFlags::RTR));
    ffw.set_ide(flags.contains(FrameFlags::IDE));
    ffw.set_fdf(flags.contains(FrameFlags::FDF));
    if flags.contains(FrameFlags::FDF) {
        ffw.set_brs(flags.contains(FrameFlags::BRS));
    }
    ffw.set_dlc(dlc.into());

    let mut idw = Identifier(0);
    if flags.contains(FrameFlags::IDE) {
        idw.0 = frame.header.can_id & 0x1fff_ffff;
    } else {
        idw.set_identifier_base(frame.header.can_id & 0x7ff);
    }
    Ok((ffw, idw))
}

/// Writes `frame` to TXT buffer `buffer`
///
/// All preconditions are checked before the first write, a failed insertion
/// leaves the buffer untouched. The buffer is not marked ready; scheduling
/// commands are up to the caller.
pub fn insert<R: Registers>(
    regs: &R,
    ntxbufs: usize,
    buffer: usize,
    frame: &Frame,
) -> Result<(), InsertError> {
    if buffer >= ntxbufs {
        return Err(InsertError::InvalidBuffer(buffer));
    }
    let status = TxStatus(regs.read32(reg::TX_STATUS)).buffer(buffer);
    if status.is_busy() {
        return Err(InsertError::NotWritable(status));
    }
    let len = usize::from(frame.header.dlen);
    if len > MAX_DATA_LEN {
        return Err(InsertError::TooLong(len));
    }
    let (ffw, idw) = encode_header(frame)?;

    regs.write32(txtb::offset(buffer, txtb::FRAME_FORMAT_W), ffw.0);
    regs.write32(txtb::offset(buffer, txtb::IDENTIFIER_W), idw.0);

    if !frame.header.flags.contains(FrameFlags::RTR) {
        for (i, chunk) in frame.data[..len].chunks(4).enumerate() {
            let mut word = [0; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            regs.write32(
                txtb::offset(buffer, txtb::DATA_1_4_W + i * 4),
                u32::from_le_bytes(word),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_can::{ExtendedId, Frame as _, StandardId};

    #[test]
    fn standard_id_goes_to_base_field() {
        let frame = Frame::new(StandardId::new(0x155).unwrap(), &[]).unwrap();
        let (ffw, idw) = encode_header(&frame).unwrap();
        assert_eq!(idw.identifier_base(), 0x155);
        assert_eq!(idw.identifier_ext(), 0);
        assert!(!ffw.ide());
        assert_eq!(ffw.dlc(), 0);
    }

    #[test]
    fn extended_id_is_written_verbatim() {
        let frame = Frame::new_remote(ExtendedId::new(0x1abc_def0).unwrap(), 2).unwrap();
        let (ffw, idw) = encode_header(&frame).unwrap();
        assert_eq!(idw.0, 0x1abc_def0);
        assert!(ffw.ide());
        assert!(ffw.rtr());
        assert_eq!(ffw.dlc(), 2);
    }

    #[test]
    fn brs_only_set_for_fd_frames() {
        let mut frame = Frame::new(StandardId::ZERO, &[0; 8]).unwrap();
        frame.header.flags |= FrameFlags::BRS;
        let (ffw, _) = encode_header(&frame).unwrap();
        assert!(!ffw.brs());

        let frame = Frame::new_fd(StandardId::ZERO, &[0; 48], true).unwrap();
        let (ffw, _) = encode_header(&frame).unwrap();
        assert!(ffw.fdf());
        assert!(ffw.brs());
        assert_eq!(ffw.dlc(), 14);
    }
}
