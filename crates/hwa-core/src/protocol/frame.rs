//! WebSocket frame codec.
//!
//! Wire format of one frame (RFC 6455 §5.2):
//! ```text
//! [FIN|RSV1-3|opcode:1][MASK|len7:1][ext_len:0|2|8][mask_key:0|4][payload:N]
//! ```
//! `len7` values 0-125 are the payload length itself; 126 means a 2-byte
//! big-endian length follows; 127 means an 8-byte big-endian length follows.
//! Clients must mask every frame they send; servers never mask.

use thiserror::Error;

const FIN_BIT: u8 = 0x80;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN7_BITS: u8 = 0x7F;

/// `len7` marker announcing a 16-bit extended length.
const LEN_EXT16: u8 = 126;
/// `len7` marker announcing a 64-bit extended length.
const LEN_EXT64: u8 = 127;

/// Largest payload length that fits in the 7-bit length field.
pub const MAX_INLINE_PAYLOAD: usize = 125;

/// Minimum header size: the two fixed bytes.
pub const BASE_HEADER_SIZE: usize = 2;

/// Size of the client masking key.
pub const MASK_KEY_SIZE: usize = 4;

/// Errors that can occur while decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer does not yet hold the whole header or the whole payload.
    ///
    /// This is not a failure: the caller should wait for more bytes.
    #[error("incomplete frame: need {needed} bytes, got {available}")]
    Incomplete { needed: u64, available: usize },

    /// The declared payload length exceeds the configured limit.
    #[error("frame payload of {length} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { length: u64, limit: usize },

    /// A text frame carried bytes that are not valid UTF-8.
    #[error("text frame payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Frame opcode (low nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any of the reserved values 3-7 and 0xB-0xF.
    Reserved(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value & OPCODE_BITS {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
            Opcode::Reserved(value) => value & OPCODE_BITS,
        }
    }
}

/// Decoded frame header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_length: u64,
    /// `2 + (0 | 2 | 8) + (0 | 4)` bytes.
    pub header_size: usize,
    pub mask: Option<[u8; MASK_KEY_SIZE]>,
}

impl FrameHeader {
    /// Total number of bytes the whole frame occupies on the wire.
    ///
    /// Saturates at `u64::MAX` for declared lengths near the top of the range.
    pub fn frame_len(&self) -> u64 {
        (self.header_size as u64).saturating_add(self.payload_length)
    }
}

/// A fully received frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_length: u64,
    pub header_size: usize,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Returns `true` for a final text frame, the only kind the bridge acts on.
    pub fn is_text(&self) -> bool {
        self.fin && self.opcode == Opcode::Text
    }

    /// Borrows the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidUtf8`] if the payload is not valid UTF-8.
    pub fn text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.payload).map_err(|_| FrameError::InvalidUtf8)
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes `message` as a single unmasked, final text frame.
///
/// This is the server-to-client path: the result is always a complete frame.
///
/// # Examples
///
/// ```rust
/// use hwa_core::encode_text_frame;
///
/// assert_eq!(encode_text_frame("hi"), vec![0x81, 0x02, b'h', b'i']);
/// ```
pub fn encode_text_frame(message: &str) -> Vec<u8> {
    encode_frame(Opcode::Text, message.as_bytes(), None)
}

/// Encodes one final frame with the given opcode.
///
/// When `mask` is `Some`, the MASK bit is set, the key is written after the
/// length field and the payload is XOR-masked.  Only clients mask, so the
/// server uses `None`; tests and client tooling pass a key.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: Option<[u8; MASK_KEY_SIZE]>) -> Vec<u8> {
    let len = payload.len();
    let mut buf = Vec::with_capacity(BASE_HEADER_SIZE + 8 + MASK_KEY_SIZE + len);

    buf.push(FIN_BIT | u8::from(opcode));

    let mask_flag = if mask.is_some() { MASK_BIT } else { 0 };
    if len <= MAX_INLINE_PAYLOAD {
        buf.push(mask_flag | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(mask_flag | LEN_EXT16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_flag | LEN_EXT64);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(payload),
    }
    buf
}

/// XORs `data` in place with the repeating 4-byte `mask` key.
///
/// Masking is its own inverse, so the same call masks and unmasks.
pub fn apply_mask(data: &mut [u8], mask: [u8; MASK_KEY_SIZE]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % MASK_KEY_SIZE];
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes the header at the start of `buf`.
///
/// `buf.len()` is the number of bytes available.  The payload itself does not
/// need to be present yet.
///
/// # Errors
///
/// Returns [`FrameError::Incomplete`] when the fixed bytes, the extended length
/// field, or the mask key have not fully arrived.  The buffer is never read
/// out of bounds.
pub fn decode_frame_header(buf: &[u8]) -> Result<FrameHeader, FrameError> {
    if buf.len() < BASE_HEADER_SIZE {
        return Err(FrameError::Incomplete {
            needed: BASE_HEADER_SIZE as u64,
            available: buf.len(),
        });
    }

    let fin = buf[0] & FIN_BIT != 0;
    let opcode = Opcode::from(buf[0]);
    let masked = buf[1] & MASK_BIT != 0;
    let len7 = buf[1] & LEN7_BITS;

    let ext_len = match len7 {
        LEN_EXT16 => 2,
        LEN_EXT64 => 8,
        _ => 0,
    };
    let header_size = BASE_HEADER_SIZE + ext_len + if masked { MASK_KEY_SIZE } else { 0 };

    if buf.len() < header_size {
        return Err(FrameError::Incomplete {
            needed: header_size as u64,
            available: buf.len(),
        });
    }

    let payload_length = match len7 {
        LEN_EXT16 => u16::from_be_bytes([buf[2], buf[3]]) as u64,
        LEN_EXT64 => {
            let mut be = [0u8; 8];
            be.copy_from_slice(&buf[2..10]);
            u64::from_be_bytes(be)
        }
        short => short as u64,
    };

    let mask = masked.then(|| {
        let at = BASE_HEADER_SIZE + ext_len;
        [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
    });

    Ok(FrameHeader {
        fin,
        opcode,
        masked,
        payload_length,
        header_size,
        mask,
    })
}

/// Decodes one complete frame from the start of `buf`.
///
/// Returns the frame (payload unmasked) and the number of bytes it occupied,
/// so the caller can advance past it.
///
/// # Errors
///
/// Returns [`FrameError::Incomplete`] until `buf` holds
/// `header_size + payload_length` bytes.
///
/// # Examples
///
/// ```rust
/// use hwa_core::{decode_frame, encode_frame, Opcode};
///
/// let wire = encode_frame(Opcode::Text, b"ping", Some([1, 2, 3, 4]));
/// let (frame, used) = decode_frame(&wire).unwrap();
/// assert_eq!(frame.payload, b"ping");
/// assert_eq!(used, wire.len());
/// ```
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    let header = decode_frame_header(buf)?;

    let total = header.frame_len();
    if (buf.len() as u64) < total {
        return Err(FrameError::Incomplete {
            needed: total,
            available: buf.len(),
        });
    }

    // `total` fits in usize because it is no larger than `buf.len()`.
    let total = total as usize;
    let mut payload = buf[header.header_size..total].to_vec();
    if let Some(key) = header.mask {
        apply_mask(&mut payload, key);
    }

    Ok((
        Frame {
            fin: header.fin,
            opcode: header.opcode,
            masked: header.masked,
            payload_length: header.payload_length,
            header_size: header.header_size,
            payload,
        },
        total,
    ))
}

// ── Reassembly ────────────────────────────────────────────────────────────────

/// Per-connection buffer that turns a stream of socket reads into frames.
///
/// Bytes are appended with [`push`](Self::push); [`next_frame`](Self::next_frame)
/// yields a frame only once every byte of it has arrived and then drops those
/// bytes from the buffer.  A frame whose declared payload exceeds the limit is
/// reported once and its bytes are skipped as they arrive, keeping the stream
/// aligned on the next frame boundary.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
    max_payload: usize,
    /// Bytes of an oversized frame still to be discarded.
    skip: u64,
}

impl FrameAccumulator {
    /// Creates an empty accumulator accepting payloads up to `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_payload,
            skip: 0,
        }
    }

    /// Appends freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.skip > 0 {
            let dropped = usize::try_from(self.skip)
                .unwrap_or(usize::MAX)
                .min(bytes.len());
            self.skip -= dropped as u64;
            self.buf.extend_from_slice(&bytes[dropped..]);
        } else {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete frame, if any.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] once per oversized frame; the
    /// accumulator stays usable afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let header = match decode_frame_header(&self.buf) {
            Ok(header) => header,
            Err(FrameError::Incomplete { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if header.payload_length > self.max_payload as u64 {
            let total = header.frame_len();
            let buffered = self.buf.len() as u64;
            if buffered >= total {
                self.buf.drain(..total as usize);
            } else {
                self.skip = total - buffered;
                self.buf.clear();
            }
            tracing::debug!(
                length = header.payload_length,
                limit = self.max_payload,
                "skipping oversized frame"
            );
            return Err(FrameError::PayloadTooLarge {
                length: header.payload_length,
                limit: self.max_payload,
            });
        }

        match decode_frame(&self.buf) {
            Ok((frame, used)) => {
                self.buf.drain(..used);
                Ok(Some(frame))
            }
            Err(FrameError::Incomplete { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
