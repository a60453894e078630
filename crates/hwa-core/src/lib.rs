//! # hwa-core
//!
//! Pure protocol building blocks for the HW Analyzer serial bridge: the
//! WebSocket frame codec and the opening-handshake engine.
//!
//! This crate performs no I/O.  It has no dependency on sockets, async
//! runtimes, or serial devices, so everything in it can be exercised with
//! plain byte slices.
//!
//! - **`protocol::frame`** – Encodes server-to-client text frames and decodes
//!   client-to-server frames (including the 16- and 64-bit extended length
//!   fields and payload masking).  [`FrameAccumulator`] reassembles frames that
//!   arrive split across several socket reads.
//!
//! - **`protocol::handshake`** – Derives the `Sec-WebSocket-Accept` token from
//!   the client's `Sec-WebSocket-Key` and builds the `101 Switching Protocols`
//!   response.
//!
//! Only single, unfragmented text frames carry meaning for the bridge.  Other
//! opcodes are decoded so they can be skipped cleanly, but no ping/pong or
//! close replies are generated.

pub mod protocol;

pub use protocol::frame::{
    apply_mask, decode_frame, decode_frame_header, encode_frame, encode_text_frame, Frame,
    FrameAccumulator, FrameError, FrameHeader, Opcode,
};
pub use protocol::handshake::{
    build_handshake_response, compute_accept_key, handle_handshake, header_end, HandshakeError,
};
