//! RFC 6455 frame codec.
//!
//! A [`WebFrame`] is one logical message. Wire frames are fed to
//! [`WebFrame::deserialize`] as bytes arrive; fragments of a message
//! accumulate into the same frame until a wire frame with FIN set completes
//! it.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                               |  Masking-key, if MASK set     |
//! +-------------------------------+-------------------------------+
//! |                          Payload Data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! The payload buffer is always a multiple of four bytes long so masking can
//! run a word at a time; text frames keep one spare zero byte past the
//! payload.

use bytes::{BufMut, BytesMut};

use crate::transport::SocketId;

/// Longest possible wire header: 2 + 8 (length) + 4 (mask).
const MAX_HEADER: usize = 14;

/// Control frame payloads are capped by the protocol.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,

    #[error("continuation frame without a message to continue")]
    UnexpectedContinuation,

    #[error("{0:?} frame inside a fragmented message")]
    ExpectedContinuation(Opcode),

    #[error("fragmented control frame")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes")]
    ControlTooLong(u64),

    #[error("message of {len} bytes exceeds limit of {max}")]
    TooLarge { len: u64, max: usize },
}

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
        match value & 0x0F {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        (*self as u8) & 0x8 != 0
    }
}

/// True if `first_byte` opens a control frame.
pub fn is_control_byte(first_byte: u8) -> bool {
    first_byte & 0x08 != 0
}

fn round_up4(n: usize) -> usize {
    n.div_ceil(4) * 4
}

/// XOR `data` with `mask`, where `data` starts `offset` bytes into the
/// masked payload.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4], offset: usize) {
    let shift = offset % 4;
    let key = [
        mask[shift],
        mask[(shift + 1) % 4],
        mask[(shift + 2) % 4],
        mask[(shift + 3) % 4],
    ];
    let word = u32::from_ne_bytes(key);

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let masked = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }
}

/// One logical WebSocket message.
#[derive(Debug, Clone)]
pub struct WebFrame {
    opcode: Opcode,
    fin: bool,
    data: Vec<u8>,
    /// Payload bytes written so far.
    len: usize,
    max_size: usize,
    socket: Option<SocketId>,

    header: [u8; MAX_HEADER],
    header_len: usize,
    in_payload: bool,
    /// Payload bytes left in the current wire frame.
    remaining: usize,
    mask: Option<[u8; 4]>,
    mask_offset: usize,
    started: bool,
    complete: bool,
}

impl Default for WebFrame {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl WebFrame {
    /// An empty frame ready to receive, refusing messages over `max_size`.
    pub fn new(max_size: usize) -> Self {
        Self {
            opcode: Opcode::Binary,
            fin: false,
            data: Vec::new(),
            len: 0,
            max_size,
            socket: None,
            header: [0; MAX_HEADER],
            header_len: 0,
            in_payload: false,
            remaining: 0,
            mask: None,
            mask_offset: 0,
            started: false,
            complete: false,
        }
    }

    /// A complete outbound frame.
    pub fn message(opcode: Opcode, payload: &[u8]) -> Self {
        let mut frame = Self::new(payload.len().max(DEFAULT_MAX_MESSAGE_SIZE));
        frame.opcode = opcode;
        frame.fin = true;
        frame.grow(payload.len());
        frame.data[..payload.len()].copy_from_slice(payload);
        frame.len = payload.len();
        frame.started = true;
        frame.complete = true;
        frame
    }

    pub fn text(text: &str) -> Self {
        Self::message(Opcode::Text, text.as_bytes())
    }

    pub fn binary(payload: &[u8]) -> Self {
        Self::message(Opcode::Binary, payload)
    }

    pub fn ping(payload: &[u8]) -> Self {
        Self::message(Opcode::Ping, &payload[..payload.len().min(MAX_CONTROL_PAYLOAD)])
    }

    pub fn pong(payload: &[u8]) -> Self {
        Self::message(Opcode::Pong, &payload[..payload.len().min(MAX_CONTROL_PAYLOAD)])
    }

    /// A close frame carrying `code` and a reason trimmed to fit.
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = Vec::new();
        if let Some(code) = code {
            payload.extend_from_slice(&code.to_be_bytes());
            let room = MAX_CONTROL_PAYLOAD - 2;
            let mut end = reason.len().min(room);
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            payload.extend_from_slice(&reason.as_bytes()[..end]);
        }
        Self::message(Opcode::Close, &payload)
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn is_fin(&self) -> bool {
        self.fin
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the backing buffer.
    pub fn buffer_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_text(&self) -> Option<&str> {
        match self.opcode {
            Opcode::Text => std::str::from_utf8(self.payload()).ok(),
            _ => None,
        }
    }

    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode, self.payload()) {
            (Opcode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    pub fn set_socket(&mut self, socket: Option<SocketId>) {
        self.socket = socket;
    }

    /// The whole message has arrived.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Some bytes of a message have been read but it is not complete.
    pub fn in_progress(&self) -> bool {
        !self.complete && (self.started || self.header_len > 0)
    }

    /// Between wire frames: the next byte starts a new wire header.
    pub fn at_boundary(&self) -> bool {
        !self.in_payload && self.header_len == 0
    }

    /// Release the buffer and get ready for the next message.
    pub fn reset(&mut self) {
        let max_size = self.max_size;
        let socket = self.socket;
        *self = Self::new(max_size);
        self.socket = socket;
    }

    /// Hand out the finished message, leaving an empty frame for the next.
    pub fn take(&mut self) -> WebFrame {
        let mut next = Self::new(self.max_size);
        next.socket = self.socket;
        std::mem::replace(self, next)
    }

    fn extra(&self) -> usize {
        usize::from(self.opcode == Opcode::Text)
    }

    /// Make room for `payload_len` bytes. A larger buffer is allocated and
    /// the payload copied over.
    fn grow(&mut self, payload_len: usize) {
        let need = round_up4(payload_len + self.extra());
        if need > self.data.len() {
            let mut grown = vec![0u8; need];
            grown[..self.len].copy_from_slice(&self.data[..self.len]);
            self.data = grown;
        }
    }

    fn header_needed(&self) -> usize {
        if self.header_len < 2 {
            return 2;
        }
        let second = self.header[1];
        let extended = match second & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask = if second & 0x80 != 0 { 4 } else { 0 };
        2 + extended + mask
    }

    /// Consume bytes of at most one wire frame. Returns the bytes used;
    /// check [`WebFrame::is_complete`] afterwards.
    pub fn deserialize(&mut self, buf: &[u8]) -> Result<usize, FrameError> {
        if self.complete {
            return Ok(0);
        }

        let mut consumed = 0;
        if !self.in_payload {
            loop {
                let need = self.header_needed();
                if self.header_len >= need {
                    break;
                }
                if consumed == buf.len() {
                    return Ok(consumed);
                }
                let take = (need - self.header_len).min(buf.len() - consumed);
                self.header[self.header_len..self.header_len + take]
                    .copy_from_slice(&buf[consumed..consumed + take]);
                self.header_len += take;
                consumed += take;
            }
            self.begin_payload()?;
        }

        if self.remaining > 0 && consumed < buf.len() {
            let take = self.remaining.min(buf.len() - consumed);
            let dest = &mut self.data[self.len..self.len + take];
            dest.copy_from_slice(&buf[consumed..consumed + take]);
            if let Some(mask) = self.mask {
                apply_mask(dest, mask, self.mask_offset);
            }
            self.mask_offset += take;
            self.len += take;
            self.remaining -= take;
            consumed += take;
        }

        if self.in_payload && self.remaining == 0 {
            self.in_payload = false;
            if self.fin {
                self.complete = true;
            }
        }
        Ok(consumed)
    }

    fn begin_payload(&mut self) -> Result<(), FrameError> {
        let first = self.header[0];
        let second = self.header[1];

        if first & 0x70 != 0 {
            return Err(FrameError::ReservedBits);
        }
        let opcode = Opcode::from_u8(first).ok_or(FrameError::UnknownOpcode(first & 0x0F))?;
        let fin = first & 0x80 != 0;

        let (payload_len, mask_at) = match second & 0x7F {
            126 => (u64::from(u16::from_be_bytes([self.header[2], self.header[3]])), 4),
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.header[2..10]);
                (u64::from_be_bytes(raw), 10)
            }
            n => (u64::from(n), 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControl);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlTooLong(payload_len));
            }
        }

        if !self.started {
            if opcode == Opcode::Continuation {
                return Err(FrameError::UnexpectedContinuation);
            }
            self.opcode = opcode;
            self.started = true;
        } else if opcode != Opcode::Continuation {
            return Err(FrameError::ExpectedContinuation(opcode));
        }

        let total = self.len as u64 + payload_len;
        if total > self.max_size as u64 {
            return Err(FrameError::TooLarge {
                len: total,
                max: self.max_size,
            });
        }
        self.grow(total as usize);

        self.mask = (second & 0x80 != 0).then(|| {
            [
                self.header[mask_at],
                self.header[mask_at + 1],
                self.header[mask_at + 2],
                self.header[mask_at + 3],
            ]
        });
        self.fin = fin;
        self.remaining = payload_len as usize;
        self.mask_offset = 0;
        self.in_payload = true;
        self.header_len = 0;
        Ok(())
    }

    /// Write the frame as a single wire frame with FIN set. Client frames
    /// pass a mask.
    pub fn serialize(&self, out: &mut BytesMut, mask: Option<[u8; 4]>) -> usize {
        let start = out.len();
        let payload = self.payload();
        let mask_bit = if mask.is_some() { 0x80 } else { 0 };

        out.put_u8(0x80 | self.opcode as u8);
        match payload.len() {
            n if n < 126 => out.put_u8(mask_bit | n as u8),
            n if n <= usize::from(u16::MAX) => {
                out.put_u8(mask_bit | 126);
                out.put_u16(n as u16);
            }
            n => {
                out.put_u8(mask_bit | 127);
                out.put_u64(n as u64);
            }
        }

        match mask {
            Some(key) => {
                out.put_slice(&key);
                let at = out.len();
                out.put_slice(payload);
                apply_mask(&mut out[at..], key, 0);
            }
            None => out.put_slice(payload),
        }
        out.len() - start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmasked_text_frame() {
        let mut frame = WebFrame::default();
        let consumed = frame.deserialize(&[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']).unwrap();
        assert_eq!(consumed, 7);
        assert!(frame.is_complete());
        assert_eq!(frame.as_text(), Some("Hello"));
        assert_eq!(frame.buffer_len(), 8);
    }

    #[test]
    fn masked_frame_from_rfc() {
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let mut frame = WebFrame::default();
        frame.deserialize(&wire).unwrap();
        assert_eq!(frame.as_text(), Some("Hello"));
    }

    #[test]
    fn mask_offset_matches_whole_buffer() {
        let mask = [1, 2, 3, 4];
        let original: Vec<u8> = (0..23).collect();

        let mut whole = original.clone();
        apply_mask(&mut whole, mask, 0);

        let mut split = original.clone();
        let (head, tail) = split.split_at_mut(7);
        apply_mask(head, mask, 0);
        apply_mask(tail, mask, 7);
        assert_eq!(whole, split);
    }

    #[test]
    fn control_frames_are_bounded() {
        let mut frame = WebFrame::default();
        assert_eq!(
            frame.deserialize(&[0x09, 0x00]),
            Err(FrameError::FragmentedControl)
        );

        let mut frame = WebFrame::default();
        assert_eq!(
            frame.deserialize(&[0x89, 126, 0x00, 0x80]),
            Err(FrameError::ControlTooLong(128))
        );
    }

    #[test]
    fn close_payload_carries_code() {
        let frame = WebFrame::close(Some(1000), "bye");
        assert_eq!(frame.close_code(), Some(1000));
        assert_eq!(&frame.payload()[2..], b"bye");
    }
}
