//! Protocol module containing the frame codec and the handshake engine.

pub mod frame;
pub mod handshake;

pub use frame::{decode_frame, encode_text_frame, Frame, FrameAccumulator, FrameError, Opcode};
pub use handshake::{compute_accept_key, handle_handshake, HandshakeError};
