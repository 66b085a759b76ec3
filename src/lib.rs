//! HTTP/3 stream engine core.
//!
//! This crate implements the per-stream send/receive pipeline of an HTTP/3
//! endpoint, designed to sit between a QUIC transport and an HTTP layer:
//!
//! - an outbound queue of *frame intents* that a serializer drains into
//!   transport-ready byte buffers ([`Stream::frq_add`] / [`Stream::fill_outq`]),
//!   coordinating with a QPACK encoder that may emit side-channel bytes on a
//!   separate encoder-control stream;
//! - vectored readout and acknowledgement accounting
//!   ([`Stream::writev`], [`Stream::add_outq_offset`],
//!   [`Stream::add_ack_offset`]) that the transport drives;
//! - a receive-side HTTP state machine ([`http::RxHttp`]) that validates
//!   HEADERS/DATA frame orderings per RFC 9114 Section 4.1.
//!
//! The QUIC transport itself (packetization, loss recovery, crypto), the
//! QPACK codec internals, and the priority dependency tree are external
//! collaborators reached through the traits in [`qpack`] and [`sched`].

#![forbid(unsafe_code)]

pub mod buf;
pub mod error;
pub mod frame;
pub mod http;
pub mod qpack;
pub mod ringbuf;
pub mod sched;
pub mod stream;
pub mod varint;

pub use buf::{Chunk, TypedBuf};
pub use error::{Error, ErrorCode, Result};
pub use frame::{FrameEntry, PriorityFrame, Settings};
pub use qpack::{EncodedFieldSection, FieldLine, QpackDecoder, QpackEncoder};
pub use sched::{NodeId, PriorityTree};
pub use stream::{
    DataRead, DataSource, FillContext, MaxPushIdState, Stream, StreamCallbacks, StreamKind,
};
pub use varint::VarintReader;
