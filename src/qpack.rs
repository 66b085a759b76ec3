//! QPACK boundary types.
//!
//! The stream engine does not implement field compression; it hands header
//! lists to an encoder behind [`QpackEncoder`] and routes the three output
//! blocks (field-section prefix, representations, encoder-stream
//! instructions) to the right output queues. The decoder side only surfaces
//! through [`QpackDecoder::pull_updates`], which drains pending
//! decoder-stream instructions for transmission.

use crate::error::Result;
use bytes::Bytes;
use std::fmt;

/// An HTTP field line (name-value pair).
///
/// Names are kept as raw bytes because pseudo-header names (`:method`,
/// `:status`) are part of the HTTP/3 wire image.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldLine {
    pub name: Bytes,
    pub value: Bytes,
}

impl FieldLine {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size for dynamic table accounting per RFC 9204 Section 3.2.1.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

impl fmt::Debug for FieldLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FieldLine({:?}: {:?})",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl From<(&'static str, &'static str)> for FieldLine {
    fn from((name, value): (&'static str, &'static str)) -> Self {
        Self::new(name, value)
    }
}

/// Output of encoding one header list for one stream.
#[derive(Debug, Default)]
pub struct EncodedFieldSection {
    /// Field section prefix (required insert count, base).
    pub prefix: Bytes,
    /// Field line representations; may be empty for an empty header list.
    pub representation: Bytes,
    /// Dynamic-table instructions destined for the encoder-control stream;
    /// empty when the encoder made no table changes.
    pub encoder_updates: Bytes,
}

/// Connection-scoped QPACK encoder contract.
pub trait QpackEncoder {
    /// Encode `fields` for the stream `stream_id`, producing the header
    /// block and any encoder-stream instructions it depends on.
    fn encode(&mut self, stream_id: i64, fields: &[FieldLine]) -> Result<EncodedFieldSection>;
}

/// Connection-scoped QPACK decoder contract, seen from the send side.
pub trait QpackDecoder {
    /// Drain pending decoder-stream instructions (section acknowledgements,
    /// stream cancellations). Returns an empty buffer when nothing is
    /// pending.
    fn pull_updates(&mut self) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_line_size() {
        let field = FieldLine::new("name", "value");
        assert_eq!(field.size(), 4 + 5 + 32);
    }

    #[test]
    fn test_field_line_from_tuple() {
        let field: FieldLine = (":method", "CONNECT").into();
        assert_eq!(&field.name[..], b":method");
        assert_eq!(&field.value[..], b"CONNECT");
    }
}
