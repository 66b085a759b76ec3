//! Per-stream send/receive pipeline.
//!
//! A [`Stream`] owns four FIFOs: `frq` (frame intents awaiting
//! serialization), `chunks` (the pool backing shared writes), `outq`
//! (serialized buffers awaiting transport readout and acknowledgement), and
//! `inq` (received payload bytes awaiting frame parsing). The transport
//! drives the outbound side with [`Stream::writev`] /
//! [`Stream::add_outq_offset`] / [`Stream::add_ack_offset`]; the HTTP layer
//! enqueues intents with [`Stream::frq_add`] and drains them with
//! [`Stream::fill_outq`].
//!
//! Serialization never copies payloads: frame headers go into pooled
//! chunks as `Shared` buffers, QPACK output rides as `Private` buffers, and
//! application DATA is wrapped as `Alien` buffers whose acknowledgement is
//! reported back through [`StreamCallbacks::acked_data`].

use crate::buf::{Chunk, TypedBuf, CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::frame::{self, FrameEntry, FrameType, PriorityFrame, Settings};
use crate::http::RxHttp;
use crate::qpack::{QpackDecoder, QpackEncoder};
use crate::ringbuf::RingBuf;
use crate::sched::{NodeId, PriorityTree};
use bytes::Bytes;
use tracing::{debug, trace};

/// Stop draining the frame-intent queue once this many serialized bytes are
/// waiting for the transport.
pub const MIN_UNSENT_BYTES: usize = 4096;

/// Hard cap on output-queue entries per drain.
pub const OUTQ_MAX_ENTRIES: usize = 1024;

/// Allocation size for inbound accumulation buffers.
pub const INQ_BUF_SIZE: usize = 16384;

/// Role of a stream once known.
///
/// Bidirectional streams carry requests; unidirectional streams declare
/// their role with a type varint and stay [`Unknown`](Self::Unknown) until
/// it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Unknown,
    Request,
    Control,
    Push,
    QpackEncoder,
    QpackDecoder,
}

impl StreamKind {
    /// Wire identifier for unidirectional stream types per RFC 9114
    /// Section 6.2.
    pub fn type_id(self) -> Option<u64> {
        match self {
            StreamKind::Control => Some(0x00),
            StreamKind::Push => Some(0x01),
            StreamKind::QpackEncoder => Some(0x02),
            StreamKind::QpackDecoder => Some(0x03),
            StreamKind::Unknown | StreamKind::Request => None,
        }
    }

    pub fn from_type_id(value: u64) -> Option<Self> {
        match value {
            0x00 => Some(StreamKind::Control),
            0x01 => Some(StreamKind::Push),
            0x02 => Some(StreamKind::QpackEncoder),
            0x03 => Some(StreamKind::QpackDecoder),
            _ => None,
        }
    }
}

/// One pull from the application's DATA source.
pub enum DataRead {
    /// Payload bytes. `eof` marks the end of the message body;
    /// `no_end_stream` suppresses the stream FIN (trailers follow).
    Chunk {
        data: Bytes,
        eof: bool,
        no_end_stream: bool,
    },
    /// No data available right now; the stream parks until the application
    /// resumes it.
    Blocked,
}

/// Application callback supplying DATA frame payload.
///
/// Travels inside the DATA frame intent, so each queued DATA frame pulls
/// from its own source.
pub trait DataSource {
    fn read_data(&mut self, stream_id: i64) -> Result<DataRead>;
}

/// Per-stream user callbacks.
pub trait StreamCallbacks {
    /// The peer acknowledged `nbytes` more of application-owned DATA.
    /// Deliveries are in increasing offset order and never zero-length.
    fn acked_data(&mut self, stream_id: i64, nbytes: u64) -> Result<()> {
        let _ = (stream_id, nbytes);
        Ok(())
    }
}

/// Connection-level MAX_PUSH_ID bookkeeping, updated when the frame is
/// serialized.
#[derive(Debug, Default)]
pub struct MaxPushIdState {
    /// Push limit the application has granted but not yet announced.
    pub unsent_max_pushes: u64,
    /// Push limit announced to the peer.
    pub max_pushes: u64,
    /// A MAX_PUSH_ID intent is queued on the control stream.
    pub queued: bool,
}

/// Connection-scoped collaborators a serializer drain may need.
///
/// Streams never hold references to each other; the QPACK cross-stream
/// write goes through `qpack_encoder_stream` here.
pub struct FillContext<'a> {
    pub qpack: Option<&'a mut dyn QpackEncoder>,
    pub qpack_encoder_stream: Option<&'a mut Stream>,
    pub max_push: Option<&'a mut MaxPushIdState>,
}

impl Default for FillContext<'_> {
    fn default() -> Self {
        Self {
            qpack: None,
            qpack_encoder_stream: None,
            max_push: None,
        }
    }
}

/// Head-of-queue dispatch token; carries the copyable intents by value so
/// the frq borrow ends before serialization starts.
enum HeadIntent {
    Settings(Settings),
    Priority(PriorityFrame),
    CancelPush(u64),
    MaxPushId,
    Headers,
    PushPromise,
    Data,
}

/// A single QUIC stream as seen by the HTTP/3 layer.
pub struct Stream {
    id: i64,
    kind: StreamKind,
    /// Push-promise node this stream schedules through instead of its own
    /// node; only set on PUSH streams.
    pp_push_id: Option<u64>,

    frq: RingBuf<FrameEntry>,
    chunks: RingBuf<Chunk>,
    next_chunk_id: u64,
    outq: RingBuf<TypedBuf>,
    inq: RingBuf<Vec<u8>>,

    /// Serialized bytes not yet taken by the transport.
    unsent_bytes: usize,
    /// Index of the outq entry holding the read cursor.
    outq_idx: usize,
    /// Byte offset of the read cursor inside that entry.
    outq_offset: usize,
    /// Byte offset of the ack cursor inside the head entry.
    ack_offset: usize,
    /// Bytes of the head ALIEN entry already reported via `acked_data`.
    ack_done: usize,
    /// Bytes taken by the transport since the last schedule.
    unscheduled_nwrite: usize,

    fc_blocked: bool,
    read_data_blocked: bool,
    write_end_stream: bool,

    rx: RxHttp,
    callbacks: Option<Box<dyn StreamCallbacks>>,
}

impl Stream {
    pub fn new(id: i64) -> Self {
        let kind = if stream_uni(id) {
            StreamKind::Unknown
        } else {
            StreamKind::Request
        };
        debug!(stream_id = id, ?kind, "stream created");

        Self {
            id,
            kind,
            pp_push_id: None,
            frq: RingBuf::with_capacity(16),
            chunks: RingBuf::with_capacity(16),
            next_chunk_id: 0,
            outq: RingBuf::with_capacity(16),
            inq: RingBuf::with_capacity(16),
            unsent_bytes: 0,
            outq_idx: 0,
            outq_offset: 0,
            ack_offset: 0,
            ack_done: 0,
            unscheduled_nwrite: 0,
            fc_blocked: false,
            read_data_blocked: false,
            write_end_stream: false,
            rx: RxHttp::new(),
            callbacks: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: StreamKind) {
        self.kind = kind;
    }

    /// Associate this PUSH stream with its push-promise node for
    /// scheduling.
    pub fn set_push_promise(&mut self, push_id: u64) {
        debug_assert_eq!(self.kind, StreamKind::Push);
        self.pp_push_id = Some(push_id);
    }

    pub fn set_callbacks(&mut self, callbacks: Box<dyn StreamCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub fn rx_http(&self) -> &RxHttp {
        &self.rx
    }

    pub fn rx_http_mut(&mut self) -> &mut RxHttp {
        &mut self.rx
    }

    pub fn unsent_bytes(&self) -> usize {
        self.unsent_bytes
    }

    pub fn frq_len(&self) -> usize {
        self.frq.len()
    }

    pub fn outq_len(&self) -> usize {
        self.outq.len()
    }

    pub fn write_end_stream(&self) -> bool {
        self.write_end_stream
    }

    pub fn set_fc_blocked(&mut self, on: bool) {
        self.fc_blocked = on;
    }

    /// Clear the DATA-read park after the application signals fresh data.
    pub fn resume_data(&mut self) {
        self.read_data_blocked = false;
    }

    pub fn is_read_data_blocked(&self) -> bool {
        self.read_data_blocked
    }

    // ------------------------------------------------------------------
    // Outbound: frame intents and serialization
    // ------------------------------------------------------------------

    /// Queue a frame intent for later serialization.
    pub fn frq_add(&mut self, entry: FrameEntry) {
        trace!(stream_id = self.id, frame = ?entry.frame_type(), "frq add");
        if self.frq.is_full() {
            let cap = self.frq.len() * 2;
            self.frq.reserve(cap);
        }
        self.frq.push_back(entry);
    }

    fn outq_is_full(&self) -> bool {
        self.outq.len() >= OUTQ_MAX_ENTRIES
    }

    /// Drain queued frame intents into the output queue.
    ///
    /// Stops when the intent queue is empty, the output queue is full, or
    /// enough unsent bytes have accumulated. A DATA intent that blocks or
    /// has more payload to pull stays at the head for the next drain.
    pub fn fill_outq(&mut self, ctx: &mut FillContext<'_>) -> Result<()> {
        while !self.frq.is_empty() && !self.outq_is_full() && self.unsent_bytes < MIN_UNSENT_BYTES
        {
            let head = match self.frq.front().expect("frq checked non-empty") {
                FrameEntry::Settings(local) => HeadIntent::Settings(*local),
                FrameEntry::Priority(fr) => HeadIntent::Priority(*fr),
                FrameEntry::CancelPush(push_id) => HeadIntent::CancelPush(*push_id),
                FrameEntry::MaxPushId => HeadIntent::MaxPushId,
                FrameEntry::Headers(_) => HeadIntent::Headers,
                FrameEntry::PushPromise { .. } => HeadIntent::PushPromise,
                FrameEntry::Data(_) => HeadIntent::Data,
            };

            match head {
                HeadIntent::Settings(local) => {
                    self.write_settings(&local);
                    self.frq.pop_front();
                }
                HeadIntent::Priority(fr) => {
                    self.write_priority(&fr);
                    self.frq.pop_front();
                }
                HeadIntent::CancelPush(push_id) => {
                    self.write_cancel_push(push_id);
                    self.frq.pop_front();
                }
                HeadIntent::MaxPushId => {
                    let push = ctx
                        .max_push
                        .as_deref_mut()
                        .ok_or(Error::InvalidArgument(
                            "MAX_PUSH_ID intent without connection push state",
                        ))?;
                    self.write_max_push_id(push);
                    self.frq.pop_front();
                }
                HeadIntent::Headers => {
                    let Some(FrameEntry::Headers(fields)) = self.frq.pop_front() else {
                        unreachable!("head intent was HEADERS");
                    };
                    if let Err(e) =
                        self.write_header_block(ctx, FrameType::Headers, None, &fields)
                    {
                        self.frq.push_front(FrameEntry::Headers(fields));
                        return Err(e);
                    }
                    // The header list is dropped here; the intent is done.
                }
                HeadIntent::PushPromise => {
                    let Some(FrameEntry::PushPromise { push_id, fields }) = self.frq.pop_front()
                    else {
                        unreachable!("head intent was PUSH_PROMISE");
                    };
                    if let Err(e) = self.write_header_block(
                        ctx,
                        FrameType::PushPromise,
                        Some(push_id),
                        &fields,
                    ) {
                        self.frq.push_front(FrameEntry::PushPromise { push_id, fields });
                        return Err(e);
                    }
                }
                HeadIntent::Data => {
                    let Some(FrameEntry::Data(mut source)) = self.frq.pop_front() else {
                        unreachable!("head intent was DATA");
                    };
                    match self.write_data(source.as_mut()) {
                        Ok(eof) => {
                            if self.read_data_blocked || !eof {
                                // Keep pulling from this intent on the next
                                // drain.
                                self.frq.push_front(FrameEntry::Data(source));
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            self.frq.push_front(FrameEntry::Data(source));
                            return Err(e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Make sure the tail chunk has `need` bytes free, allocating a new
    /// chunk if not, and return it.
    fn ensure_chunk(&mut self, need: usize) -> &mut Chunk {
        debug_assert!(need <= CHUNK_SIZE, "shared write larger than a chunk");

        let need_new = match self.chunks.back() {
            Some(chunk) => chunk.left() < need,
            None => true,
        };
        if need_new {
            if self.chunks.is_full() {
                let cap = self.chunks.len() * 2;
                self.chunks.reserve(cap);
            }
            let id = self.next_chunk_id;
            self.next_chunk_id += 1;
            self.chunks.push_back(Chunk::new(id));
        }

        self.chunks.back_mut().expect("chunk pool non-empty")
    }

    /// Append a buffer to the output queue, coalescing contiguous shared
    /// writes into the previous entry.
    ///
    /// Public so the connection can route cross-stream buffers here (QPACK
    /// encoder instructions produced while serializing another stream's
    /// HEADERS).
    pub fn outq_add(&mut self, tbuf: TypedBuf) {
        self.unsent_bytes += tbuf.len();

        match tbuf {
            TypedBuf::Shared { chunk_id, pos, last } => {
                if let Some(TypedBuf::Shared {
                    chunk_id: prev_chunk,
                    last: prev_last,
                    ..
                }) = self.outq.back_mut()
                {
                    if *prev_chunk == chunk_id {
                        debug_assert_eq!(*prev_last, pos, "non-contiguous shared write");
                        *prev_last = last;
                        return;
                    }
                }
                if self.outq.is_full() {
                    let cap = self.outq.len() * 2;
                    self.outq.reserve(cap);
                }
                self.outq.push_back(TypedBuf::Shared { chunk_id, pos, last });
            }
            other => {
                if self.outq.is_full() {
                    let cap = self.outq.len() * 2;
                    self.outq.reserve(cap);
                }
                self.outq.push_back(other);
            }
        }
    }

    /// Write the unidirectional stream type preamble.
    pub fn write_uni_stream_type(&mut self) -> Result<()> {
        let type_id = self
            .kind
            .type_id()
            .ok_or(Error::InvalidArgument("stream kind has no type preamble"))?;

        let len = crate::varint::encoded_len(type_id);
        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(type_id);
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });
        Ok(())
    }

    /// Write the PUSH stream preamble: stream type followed by push id.
    pub fn write_uni_stream_type_push_id(&mut self) -> Result<()> {
        debug_assert_eq!(self.kind, StreamKind::Push);
        let type_id = self
            .kind
            .type_id()
            .ok_or(Error::InvalidArgument("stream kind has no type preamble"))?;
        let push_id = self
            .pp_push_id
            .ok_or(Error::InvalidArgument("push stream without push id"))?;

        let len = crate::varint::encoded_len(type_id) + crate::varint::encoded_len(push_id);
        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(type_id);
        chunk.put_varint(push_id);
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });
        Ok(())
    }

    fn write_settings(&mut self, local: &Settings) {
        let payload_len = local.payload_len();
        let len = frame::header_len(FrameType::Settings, payload_len) + payload_len as usize;

        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(FrameType::Settings.to_u64());
        chunk.put_varint(payload_len);
        for (id, value) in local.entries() {
            chunk.put_varint(id);
            chunk.put_varint(value);
        }
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });
    }

    fn write_priority(&mut self, fr: &PriorityFrame) {
        let payload_len = fr.payload_len();
        let len = frame::header_len(FrameType::Priority, payload_len) + payload_len as usize;

        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(FrameType::Priority.to_u64());
        chunk.put_varint(payload_len);
        chunk.put_u8(fr.flags_byte());
        chunk.put_varint(fr.prioritized_id);
        if fr.dep_type != frame::ElemType::Root {
            chunk.put_varint(fr.dep_id);
        }
        debug_assert!((1..=256).contains(&fr.weight));
        chunk.put_u8((fr.weight - 1) as u8);
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });
    }

    fn write_cancel_push(&mut self, push_id: u64) {
        let payload_len = crate::varint::encoded_len(push_id) as u64;
        let len = frame::header_len(FrameType::CancelPush, payload_len) + payload_len as usize;

        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(FrameType::CancelPush.to_u64());
        chunk.put_varint(payload_len);
        chunk.put_varint(push_id);
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });
    }

    fn write_max_push_id(&mut self, push: &mut MaxPushIdState) {
        debug_assert!(push.queued, "MAX_PUSH_ID serialized without being queued");
        debug_assert!(push.unsent_max_pushes > 0);

        let push_id = push.unsent_max_pushes - 1;
        push.max_pushes = push.unsent_max_pushes;
        push.queued = false;

        let payload_len = crate::varint::encoded_len(push_id) as u64;
        let len = frame::header_len(FrameType::MaxPushId, payload_len) + payload_len as usize;

        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(FrameType::MaxPushId.to_u64());
        chunk.put_varint(payload_len);
        chunk.put_varint(push_id);
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });
    }

    /// Serialize a HEADERS or PUSH_PROMISE frame through the QPACK encoder.
    ///
    /// The frame header (and push id) is a shared write; the encoded prefix
    /// and representations are appended as private buffers. Encoder-stream
    /// instructions, when produced, go to the encoder-control stream's
    /// output queue, not this stream's.
    fn write_header_block(
        &mut self,
        ctx: &mut FillContext<'_>,
        frame_type: FrameType,
        push_id: Option<u64>,
        fields: &[crate::qpack::FieldLine],
    ) -> Result<()> {
        let qenc = ctx.qpack.as_deref_mut().ok_or(Error::InvalidArgument(
            "header block without a qpack encoder",
        ))?;
        let section = qenc.encode(self.id, fields)?;

        let push_idlen = push_id.map_or(0, crate::varint::encoded_len);
        let payload_len =
            (section.prefix.len() + section.representation.len() + push_idlen) as u64;
        let len = frame::header_len(frame_type, payload_len) + push_idlen;

        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(frame_type.to_u64());
        chunk.put_varint(payload_len);
        if let Some(push_id) = push_id {
            chunk.put_varint(push_id);
        }
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });

        self.outq_add(TypedBuf::Private(section.prefix));
        if !section.representation.is_empty() {
            self.outq_add(TypedBuf::Private(section.representation));
        }

        if !section.encoder_updates.is_empty() {
            let enc_stream = ctx.qpack_encoder_stream.as_deref_mut().ok_or(
                Error::InvalidArgument("encoder updates without an encoder-control stream"),
            )?;
            enc_stream.outq_add(TypedBuf::Private(section.encoder_updates));
        }

        Ok(())
    }

    /// Serialize one DATA frame by pulling from the application source.
    ///
    /// Returns whether the source reached end of data. A blocked source
    /// parks the stream instead of erroring.
    fn write_data(&mut self, source: &mut dyn DataSource) -> Result<bool> {
        debug_assert!(!self.read_data_blocked);

        let (data, eof, no_end_stream) = match source.read_data(self.id) {
            Ok(DataRead::Blocked) | Err(Error::WouldBlock) => {
                debug!(stream_id = self.id, "data source blocked");
                self.read_data_blocked = true;
                return Ok(false);
            }
            Ok(DataRead::Chunk {
                data,
                eof,
                no_end_stream,
            }) => (data, eof, no_end_stream),
            Err(_) => return Err(Error::CallbackFailure),
        };

        debug_assert!(!data.is_empty() || eof, "empty read without eof");

        if eof && !no_end_stream {
            self.write_end_stream = true;
        }

        let payload_len = data.len() as u64;
        let len = frame::header_len(FrameType::Data, payload_len);

        let chunk = self.ensure_chunk(len);
        let (chunk_id, pos) = (chunk.id(), chunk.last());
        chunk.put_varint(FrameType::Data.to_u64());
        chunk.put_varint(payload_len);
        let last = chunk.last();
        self.outq_add(TypedBuf::Shared { chunk_id, pos, last });

        if !data.is_empty() {
            self.outq_add(TypedBuf::Alien(data));
        }

        Ok(eof)
    }

    /// Drain pending QPACK decoder-stream instructions into this stream's
    /// output queue. Only meaningful on the decoder-control stream.
    pub fn write_qpack_decoder(&mut self, qdec: &mut dyn QpackDecoder) -> Result<()> {
        let updates = qdec.pull_updates()?;
        if updates.is_empty() {
            return Ok(());
        }
        self.outq_add(TypedBuf::Private(updates));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound: transport readout and acknowledgement
    // ------------------------------------------------------------------

    fn tbuf_bytes<'a>(&'a self, tbuf: &'a TypedBuf) -> &'a [u8] {
        match tbuf {
            TypedBuf::Shared { chunk_id, pos, last } => {
                self.chunk_by_id(*chunk_id).slice(*pos, *last)
            }
            TypedBuf::Private(b) | TypedBuf::Alien(b) => b,
        }
    }

    fn chunk_by_id(&self, id: u64) -> &Chunk {
        let head_id = self.chunks.front().expect("chunk pool non-empty").id();
        self.chunks
            .get((id - head_id) as usize)
            .expect("shared buffer's chunk still pooled")
    }

    /// Collect up to `veccnt` slices of ready bytes starting at the read
    /// cursor. Read-only; the transport reports what it took via
    /// [`add_outq_offset`](Self::add_outq_offset).
    ///
    /// The second return value is the FIN indication: true once every
    /// queued intent is serialized, the walk reached the end of the output
    /// queue, and end-of-stream was requested.
    pub fn writev(&self, veccnt: usize) -> (Vec<&[u8]>, bool) {
        let len = self.outq.len();
        let mut vec = Vec::with_capacity(veccnt.min(len));
        let mut offset = self.outq_offset;
        let mut i = self.outq_idx;

        while i < len {
            let tbuf = self.outq.get(i).expect("index in bounds");
            let buflen = tbuf.len();
            if offset >= buflen {
                offset -= buflen;
                i += 1;
                continue;
            }
            if veccnt == 0 {
                break;
            }
            vec.push(&self.tbuf_bytes(tbuf)[offset..]);
            i += 1;
            break;
        }

        while i < len && vec.len() < veccnt {
            let tbuf = self.outq.get(i).expect("index in bounds");
            vec.push(self.tbuf_bytes(tbuf));
            i += 1;
        }

        let fin = self.frq.is_empty() && i == len && self.write_end_stream;
        (vec, fin)
    }

    /// The read cursor reached the end of the output queue.
    pub fn outq_write_done(&self) -> bool {
        self.outq.is_empty() || self.outq_idx >= self.outq.len()
    }

    /// Advance the read cursor by `n` bytes the transport consumed.
    pub fn add_outq_offset(&mut self, n: usize) {
        let len = self.outq.len();
        let mut offset = self.outq_offset + n;
        let mut i = self.outq_idx;

        while i < len {
            let buflen = self.outq.get(i).expect("index in bounds").len();
            if offset < buflen {
                break;
            }
            offset -= buflen;
            i += 1;
        }
        debug_assert!(i < len || offset == 0, "read cursor past end of outq");

        self.unsent_bytes -= n;
        self.unscheduled_nwrite += n;
        self.outq_idx = i;
        self.outq_offset = offset;
    }

    /// The peer acknowledged `n` more bytes: report acked application data,
    /// release fully-acked entries, and free chunks whose bytes are all
    /// acked.
    pub fn add_ack_offset(&mut self, n: usize) -> Result<()> {
        let mut offset = self.ack_offset + n;
        let mut npopped = 0usize;

        loop {
            let (buflen, is_alien) = match self.outq.front() {
                Some(tbuf) => (tbuf.len(), tbuf.is_alien()),
                None => break,
            };

            if is_alien {
                let nack = offset.min(buflen) - self.ack_done;
                if nack > 0 {
                    if let Some(callbacks) = self.callbacks.as_mut() {
                        callbacks
                            .acked_data(self.id, nack as u64)
                            .map_err(|_| Error::CallbackFailure)?;
                    }
                    self.ack_done += nack;
                }
            }

            if offset < buflen {
                break;
            }

            self.pop_outq_entry();
            offset -= buflen;
            npopped += 1;
            self.ack_done = 0;

            // The entry under the read cursor was released: the cursor now
            // points at the new head.
            if self.outq_idx + 1 == npopped {
                self.outq_offset = 0;
                break;
            }
        }

        debug_assert!(self.outq_idx + 1 >= npopped);
        self.outq_idx = self.outq_idx.saturating_sub(npopped);
        self.ack_offset = offset;

        Ok(())
    }

    fn pop_outq_entry(&mut self) {
        let tbuf = self.outq.pop_front().expect("outq non-empty");

        if let TypedBuf::Shared { chunk_id, last, .. } = tbuf {
            let head = self.chunks.front().expect("chunk pool non-empty");
            debug_assert_eq!(head.id(), chunk_id, "shared buffer acked out of order");
            if head.last() == last {
                trace!(stream_id = self.id, chunk_id, "chunk released");
                self.chunks.pop_front();
            }
        }
        // Private/Alien: dropping the Bytes handle is the release.
    }

    // ------------------------------------------------------------------
    // Inbound buffering
    // ------------------------------------------------------------------

    /// Stash received payload bytes (frame headers already stripped) until
    /// the frame parser consumes them.
    pub fn buffer_data(&mut self, mut data: &[u8]) {
        if let Some(buf) = self.inq.back_mut() {
            let nwrite = data.len().min(INQ_BUF_SIZE - buf.len());
            buf.extend_from_slice(&data[..nwrite]);
            data = &data[nwrite..];
        }

        while !data.is_empty() {
            if self.inq.is_full() {
                let cap = self.inq.len() * 2;
                self.inq.reserve(cap);
            }
            let nwrite = data.len().min(INQ_BUF_SIZE);
            let mut buf = Vec::with_capacity(INQ_BUF_SIZE);
            buf.extend_from_slice(&data[..nwrite]);
            self.inq.push_back(buf);
            data = &data[nwrite..];
        }
    }

    pub fn buffered_datalen(&self) -> usize {
        self.inq.iter().map(Vec::len).sum()
    }

    pub fn clear_buffered_data(&mut self) {
        while self.inq.pop_front().is_some() {}
    }

    // ------------------------------------------------------------------
    // Scheduler glue
    // ------------------------------------------------------------------

    /// Node this stream schedules through: the push-promise node for PUSH
    /// streams, its own stream node otherwise.
    pub fn dependency_node(&self) -> NodeId {
        match self.pp_push_id {
            Some(push_id) => {
                debug_assert_eq!(self.kind, StreamKind::Push);
                NodeId::PushId(push_id)
            }
            None => NodeId::Stream(self.id),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.fc_blocked || self.read_data_blocked
    }

    pub fn is_active(&self) -> bool {
        (!self.outq_write_done() || !self.frq.is_empty()) && !self.is_blocked()
    }

    pub fn require_schedule(&self, tree: &dyn PriorityTree) -> bool {
        self.is_active() || tree.has_active_descendant(self.dependency_node())
    }

    /// Place this stream into the scheduling order, weighted by the bytes
    /// written since the last schedule.
    pub fn schedule(&mut self, tree: &mut dyn PriorityTree) {
        tree.schedule(self.dependency_node(), self.unscheduled_nwrite);
        self.unscheduled_nwrite = 0;
    }

    pub fn ensure_scheduled(&mut self, tree: &mut dyn PriorityTree) {
        if !tree.is_scheduled(self.dependency_node()) {
            self.schedule(tree);
        }
    }

    pub fn unschedule(&self, tree: &mut dyn PriorityTree) {
        tree.unschedule(self.dependency_node());
    }

    pub fn squash(&self, tree: &mut dyn PriorityTree) {
        tree.squash(self.dependency_node());
    }

    /// Whether this stream carries HTTP messages: bidirectional, or a PUSH
    /// stream.
    pub fn bidi_or_push(&self) -> bool {
        !stream_uni(self.id) || self.kind == StreamKind::Push
    }
}

// ----------------------------------------------------------------------
// Stream ID classification
// ----------------------------------------------------------------------

/// The stream is unidirectional.
pub fn stream_uni(stream_id: i64) -> bool {
    stream_id & 0x2 != 0
}

/// Client-initiated bidirectional stream.
pub fn client_stream_bidi(stream_id: i64) -> bool {
    stream_id & 0x3 == 0
}

/// Client-initiated unidirectional stream.
pub fn client_stream_uni(stream_id: i64) -> bool {
    stream_id & 0x3 == 0x2
}

/// Server-initiated unidirectional stream.
pub fn server_stream_uni(stream_id: i64) -> bool {
    stream_id & 0x3 == 0x3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_classification() {
        assert!(client_stream_bidi(0));
        assert!(client_stream_bidi(4));
        assert!(!client_stream_bidi(1));

        assert!(!stream_uni(0));
        assert!(!stream_uni(1));
        assert!(stream_uni(2));
        assert!(stream_uni(3));

        assert!(client_stream_uni(2));
        assert!(!client_stream_uni(3));
        assert!(server_stream_uni(3));
        assert!(server_stream_uni(7));
    }

    #[test]
    fn test_kind_inference_and_bidi_or_push() {
        let stream = Stream::new(0);
        assert_eq!(stream.kind(), StreamKind::Request);
        assert!(stream.bidi_or_push());

        let mut stream = Stream::new(3);
        assert_eq!(stream.kind(), StreamKind::Unknown);
        assert!(!stream.bidi_or_push());

        stream.set_kind(StreamKind::Push);
        stream.set_push_promise(4);
        assert!(stream.bidi_or_push());
        assert_eq!(stream.dependency_node(), NodeId::PushId(4));
    }

    #[test]
    fn test_uni_stream_type_preamble() {
        let mut stream = Stream::new(2);
        stream.set_kind(StreamKind::Control);
        stream.write_uni_stream_type().unwrap();

        let (vec, fin) = stream.writev(4);
        assert_eq!(vec, vec![&[0x00][..]]);
        assert!(!fin);

        let mut stream = Stream::new(6);
        stream.set_kind(StreamKind::Push);
        stream.set_push_promise(9);
        stream.write_uni_stream_type_push_id().unwrap();

        let (vec, _) = stream.writev(4);
        assert_eq!(vec, vec![&[0x01, 0x09][..]]);
    }

    #[test]
    fn test_request_stream_has_no_preamble() {
        let mut stream = Stream::new(0);
        assert!(stream.write_uni_stream_type().is_err());
    }

    #[test]
    fn test_stream_type_id_round_trip() {
        for kind in [
            StreamKind::Control,
            StreamKind::Push,
            StreamKind::QpackEncoder,
            StreamKind::QpackDecoder,
        ] {
            let id = kind.type_id().unwrap();
            assert_eq!(StreamKind::from_type_id(id), Some(kind));
        }
        assert_eq!(StreamKind::Request.type_id(), None);
        assert_eq!(StreamKind::from_type_id(0x40), None);
    }

    #[test]
    fn test_priority_frame_serialization() {
        let mut stream = Stream::new(2);
        stream.set_kind(StreamKind::Control);
        stream.frq_add(FrameEntry::Priority(PriorityFrame {
            prioritized_type: frame::ElemType::Request,
            prioritized_id: 4,
            dep_type: frame::ElemType::Root,
            dep_id: 0,
            weight: 32,
        }));
        stream.fill_outq(&mut FillContext::default()).unwrap();

        let (vec, _) = stream.writev(4);
        // type=2 len=3, flags (request<<6 | root<<4), id, weight-1
        assert_eq!(vec, vec![&[0x02, 0x03, 0x30, 0x04, 0x1f][..]]);
    }

    #[test]
    fn test_cancel_push_serialization() {
        let mut stream = Stream::new(2);
        stream.set_kind(StreamKind::Control);
        stream.frq_add(FrameEntry::CancelPush(3));
        stream.fill_outq(&mut FillContext::default()).unwrap();

        let (vec, _) = stream.writev(4);
        assert_eq!(vec, vec![&[0x03, 0x01, 0x03][..]]);
    }

    #[test]
    fn test_max_push_id_updates_connection_state() {
        let mut stream = Stream::new(2);
        stream.set_kind(StreamKind::Control);
        stream.frq_add(FrameEntry::MaxPushId);

        // Draining without connection push state is a caller bug and leaves
        // the intent queued.
        assert!(stream.fill_outq(&mut FillContext::default()).is_err());
        assert_eq!(stream.frq_len(), 1);

        let mut push = MaxPushIdState {
            unsent_max_pushes: 8,
            max_pushes: 0,
            queued: true,
        };
        let mut ctx = FillContext {
            max_push: Some(&mut push),
            ..Default::default()
        };
        stream.fill_outq(&mut ctx).unwrap();
        assert_eq!(stream.frq_len(), 0);
        assert_eq!(push.max_pushes, 8);
        assert!(!push.queued);

        let (vec, _) = stream.writev(4);
        assert_eq!(vec, vec![&[0x0d, 0x01, 0x07][..]]);
    }

    #[test]
    fn test_inbound_buffering() {
        let mut stream = Stream::new(0);
        assert_eq!(stream.buffered_datalen(), 0);

        stream.buffer_data(b"hello");
        stream.buffer_data(b" world");
        assert_eq!(stream.buffered_datalen(), 11);

        // Spill across the fixed-size accumulation buffers.
        let big = vec![0xabu8; INQ_BUF_SIZE + 17];
        stream.buffer_data(&big);
        assert_eq!(stream.buffered_datalen(), 11 + INQ_BUF_SIZE + 17);

        stream.clear_buffered_data();
        assert_eq!(stream.buffered_datalen(), 0);
    }
}
