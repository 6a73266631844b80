//! RFC 6455 data framing.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                 Masking-key (if MASK set), 4 bytes            |
//! +---------------------------------------------------------------+
//! |                          Payload Data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Only single-frame messages are produced. Fragmented messages are
//! decoded frame by frame but never reassembled.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN_MASK: u8 = 0x7F;

/// 7-bit length marker announcing a 16-bit extended length.
const LEN_16: u8 = 126;
/// 7-bit length marker announcing a 64-bit extended length.
const LEN_64: u8 = 127;

/// Frame opcode (low nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & OPCODE_MASK {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// One decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// A complete (FIN) text frame, the only kind that gets dispatched.
    pub fn is_final_text(&self) -> bool {
        self.fin && self.opcode == Opcode::Text
    }

    /// Payload interpreted as UTF-8 text.
    pub fn text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.payload).map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Decode the frame at the start of `data`.
///
/// Bytes past the end of the first frame are ignored.
pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    decode_prefix(data).map(|(frame, _)| frame)
}

/// Decode the frame at the start of `data` and return it together with
/// the number of bytes it occupied.
pub fn decode_prefix(data: &[u8]) -> Result<(Frame, usize), FrameError> {
    let header = take(data, 0, 2)?;
    let (b0, b1) = (header[0], header[1]);

    let fin = b0 & FIN_BIT != 0;
    let opcode = Opcode::from_u8(b0).ok_or(FrameError::UnknownOpcode(b0 & OPCODE_MASK))?;
    let masked = b1 & MASK_BIT != 0;

    let mut offset = 2;
    let len = match b1 & LEN_MASK {
        LEN_16 => {
            let ext = take(data, offset, 2)?;
            offset += 2;
            u64::from(u16::from_be_bytes([ext[0], ext[1]]))
        }
        LEN_64 => {
            let ext = take(data, offset, 8)?;
            offset += 8;
            let mut be = [0u8; 8];
            be.copy_from_slice(ext);
            u64::from_be_bytes(be)
        }
        short => u64::from(short),
    };

    let mask = if masked {
        let key = take(data, offset, 4)?;
        offset += 4;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    let len = usize::try_from(len).map_err(|_| FrameError::TooLarge(len))?;
    let mut payload = BytesMut::from(take(data, offset, len)?);
    if let Some(mask) = mask {
        apply_mask(&mut payload, mask);
    }

    let frame = Frame {
        fin,
        opcode,
        mask,
        payload: payload.freeze(),
    };
    Ok((frame, offset + len))
}

/// Encode `text` as a single unmasked, final text frame (server → client).
pub fn encode(text: &str) -> Bytes {
    encode_frame(Opcode::Text, text.as_bytes(), None)
}

/// Encode `text` as a masked text frame, the way clients must send it.
pub fn encode_masked(text: &str, mask: [u8; 4]) -> Bytes {
    encode_frame(Opcode::Text, text.as_bytes(), Some(mask))
}

/// Encode one final frame with the given opcode.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let len = payload.len();
    let ext_len = if len < usize::from(LEN_16) {
        0
    } else if len <= usize::from(u16::MAX) {
        2
    } else {
        8
    };
    let mask_len = if mask.is_some() { 4 } else { 0 };

    let mut buf = BytesMut::with_capacity(2 + ext_len + mask_len + len);
    buf.put_u8(FIN_BIT | opcode as u8);

    let mask_flag = if mask.is_some() { MASK_BIT } else { 0 };
    match ext_len {
        0 => buf.put_u8(mask_flag | len as u8),
        2 => {
            buf.put_u8(mask_flag | LEN_16);
            buf.put_u16(len as u16);
        }
        _ => {
            buf.put_u8(mask_flag | LEN_64);
            buf.put_u64(len as u64);
        }
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.put_slice(payload),
    }

    buf.freeze()
}

/// XOR each byte with `mask[i % 4]`. Applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

fn take(data: &[u8], offset: usize, len: usize) -> Result<&[u8], FrameError> {
    let end = offset
        .checked_add(len)
        .ok_or(FrameError::TooLarge(len as u64))?;
    data.get(offset..end).ok_or(FrameError::Truncated {
        needed: end,
        available: data.len(),
    })
}
