use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;
use thiserror::Error;

use crate::topology::NodeAddr;

const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// CRC-16/CCITT over the serialized frame, computed with the checksum field itself set to zero
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Checksum(pub u16);
impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x?}", self.0)
    }
}
impl Checksum {
    /// `frame_buf` is a complete serialized frame, at least [Frame::HEADER_LEN] bytes long. The
    ///  bytes at the checksum's offset are treated as zero regardless of their actual content.
    fn over_frame(frame_buf: &[u8]) -> Checksum {
        debug_assert!(frame_buf.len() >= Frame::HEADER_LEN, "checksum over a truncated frame");
        let mut digest = CRC_CCITT.digest();
        digest.update(&frame_buf[..Frame::CHECKSUM_OFFSET]);
        digest.update(&[0, 0]);
        digest.update(&frame_buf[Frame::CHECKSUM_OFFSET + 2..]);
        Checksum(digest.finalize())
    }
}

/// Sequence and acknowledgement numbers. They are transmitted as signed 32 bit values with -1 as
///  the 'absent' sentinel, so they wrap around from `i32::MAX` to zero.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SeqNo(u32);

impl Display for SeqNo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SeqNo {
    pub const ZERO: SeqNo = SeqNo(0);
    const MAX_RAW: u32 = i32::MAX as u32;

    pub fn from_raw(value: u32) -> Option<SeqNo> {
        (value <= Self::MAX_RAW).then_some(SeqNo(value))
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> SeqNo {
        if self.0 == Self::MAX_RAW {
            SeqNo::ZERO
        }
        else {
            SeqNo(self.0 + 1)
        }
    }

    fn to_wire(slot: Option<SeqNo>) -> i32 {
        match slot {
            // NB: MAX_RAW ensures the value fits
            Some(n) => n.0 as i32,
            None => Frame::NO_NUMBER,
        }
    }

    fn from_wire(raw: i32) -> Result<Option<SeqNo>, FrameError> {
        match raw {
            Frame::NO_NUMBER => Ok(None),
            n if n >= 0 => Ok(Some(SeqNo(n as u32))),
            n => Err(FrameError::InvalidNumber(n)),
        }
    }
}

/// A frame is either a data frame or an acknowledgement, never both and never neither.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameKind {
    Data { seq: SeqNo },
    Ack { ack: SeqNo },
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum FrameError {
    #[error("frame of {0} bytes is shorter than the frame header")]
    Truncated(usize),
    #[error("frame checksum mismatch: stored {stored:?}, computed {computed:?}")]
    Checksum { stored: Checksum, computed: Checksum },
    #[error("declared payload length {declared} does not match the {actual} bytes received")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("frame has both a sequence and an acknowledgement number")]
    BothDataAndAck,
    #[error("frame has neither a sequence nor an acknowledgement number")]
    NeitherDataNorAck,
    #[error("invalid sequence / acknowledgement number {0}")]
    InvalidNumber(i32),
}

/// The unit that travels over a link.
///
/// Wire format, all numbers in network byte order (BE):
/// ```ascii
///  0: payload length (u16)
///  2: checksum (u16) - CRC-16/CCITT over the entire frame with this field zeroed
///  4: sequence number (i32) - -1 if this is not a data frame
///  8: acknowledgement number (i32) - -1 if this is not an ack frame
/// 12: destination address (u32)
/// 16: source address (u32)
/// 20: payload
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub dest: NodeAddr,
    pub src: NodeAddr,
    pub payload: Bytes,
}

impl Frame {
    pub const HEADER_LEN: usize = 20;
    /// the most the 16 bit length field can hold
    pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
    const CHECKSUM_OFFSET: usize = 2;
    const NO_NUMBER: i32 = -1;

    pub fn data(src: NodeAddr, dest: NodeAddr, seq: SeqNo, payload: Bytes) -> Frame {
        Frame {
            kind: FrameKind::Data { seq },
            dest,
            src,
            payload,
        }
    }

    /// acknowledgements carry no payload
    pub fn ack(src: NodeAddr, dest: NodeAddr, ack: SeqNo) -> Frame {
        Frame {
            kind: FrameKind::Ack { ack },
            dest,
            src,
            payload: Bytes::new(),
        }
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    /// Serializes the frame with a zero placeholder for the checksum, then patches the actual
    ///  checksum in. The caller is responsible for bounding the payload length to
    ///  [Frame::MAX_PAYLOAD_LEN].
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(self.payload.len() <= Self::MAX_PAYLOAD_LEN, "payload of {} bytes does not fit the length field", self.payload.len());
        let start = buf.len();

        let (seq, ack) = match self.kind {
            FrameKind::Data { seq } => (Some(seq), None),
            FrameKind::Ack { ack } => (None, Some(ack)),
        };

        buf.put_u16(self.payload.len() as u16);
        buf.put_u16(0);
        buf.put_i32(SeqNo::to_wire(seq));
        buf.put_i32(SeqNo::to_wire(ack));
        buf.put_u32(self.dest.0);
        buf.put_u32(self.src.0);
        buf.put_slice(&self.payload);

        let checksum = Checksum::over_frame(&buf[start..]);
        buf[start + Self::CHECKSUM_OFFSET..start + Self::CHECKSUM_OFFSET + 2]
            .copy_from_slice(&checksum.0.to_be_bytes());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parses a complete frame as received from a link. The checksum is verified before anything
    ///  else is interpreted, so a corrupted frame always fails with [FrameError::Checksum] rather
    ///  than some other error caused by a corrupted header field.
    pub fn decode(frame_buf: &[u8], max_payload_len: usize) -> Result<Frame, FrameError> {
        if frame_buf.len() < Self::HEADER_LEN {
            return Err(FrameError::Truncated(frame_buf.len()));
        }

        let mut buf = frame_buf;
        let declared_len = buf.get_u16() as usize;
        let stored = Checksum(buf.get_u16());
        let computed = Checksum::over_frame(frame_buf);
        if stored != computed {
            return Err(FrameError::Checksum { stored, computed });
        }

        let seq = SeqNo::from_wire(buf.get_i32())?;
        let ack = SeqNo::from_wire(buf.get_i32())?;
        let dest = NodeAddr(buf.get_u32());
        let src = NodeAddr(buf.get_u32());

        if declared_len != buf.remaining() {
            return Err(FrameError::LengthMismatch { declared: declared_len, actual: buf.remaining() });
        }
        if declared_len > max_payload_len {
            return Err(FrameError::PayloadTooLarge { len: declared_len, max: max_payload_len });
        }

        let kind = match (seq, ack) {
            (Some(seq), None) => FrameKind::Data { seq },
            (None, Some(ack)) => FrameKind::Ack { ack },
            (Some(_), Some(_)) => return Err(FrameError::BothDataAndAck),
            (None, None) => return Err(FrameError::NeitherDataNorAck),
        };

        Ok(Frame {
            kind,
            dest,
            src,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
