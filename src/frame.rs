//! HTTP/3 frame definitions and wire-length helpers.
//!
//! Frames leave a stream as a frame *intent* ([`FrameEntry`]) queued on the
//! stream's frq; the serializers in [`crate::stream`] turn intents into
//! bytes. This module owns the frame type identifiers, the SETTINGS
//! snapshot, the draft-era PRIORITY frame fields, and the length arithmetic
//! the serializers need to size their chunk writes.

use crate::qpack::FieldLine;
use crate::stream::DataSource;
use crate::varint;
use std::fmt;

/// HTTP/3 frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum FrameType {
    Data = 0x00,
    Headers = 0x01,
    Priority = 0x02,
    CancelPush = 0x03,
    Settings = 0x04,
    PushPromise = 0x05,
    GoAway = 0x07,
    MaxPushId = 0x0d,
    DuplicatePush = 0x0e,
}

impl FrameType {
    pub fn to_u64(self) -> u64 {
        self as u64
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::Headers),
            0x02 => Some(Self::Priority),
            0x03 => Some(Self::CancelPush),
            0x04 => Some(Self::Settings),
            0x05 => Some(Self::PushPromise),
            0x07 => Some(Self::GoAway),
            0x0d => Some(Self::MaxPushId),
            0x0e => Some(Self::DuplicatePush),
            _ => None,
        }
    }
}

/// SETTINGS identifiers.
pub const SETTINGS_ID_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
pub const SETTINGS_ID_MAX_HEADER_LIST_SIZE: u64 = 0x06;
pub const SETTINGS_ID_QPACK_BLOCKED_STREAMS: u64 = 0x07;
pub const SETTINGS_ID_NUM_PLACEHOLDERS: u64 = 0x09;

/// Local settings snapshot carried by a SETTINGS intent.
///
/// Only non-zero values are emitted on the wire; a default snapshot
/// serializes as an empty SETTINGS frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings {
    pub max_header_list_size: u64,
    pub num_placeholders: u64,
    pub qpack_max_table_capacity: u64,
    pub qpack_blocked_streams: u64,
}

impl Settings {
    /// The (identifier, value) pairs to emit, in identifier order.
    pub fn entries(&self) -> Vec<(u64, u64)> {
        let mut iv = Vec::with_capacity(4);
        if self.max_header_list_size != 0 {
            iv.push((SETTINGS_ID_MAX_HEADER_LIST_SIZE, self.max_header_list_size));
        }
        if self.num_placeholders != 0 {
            iv.push((SETTINGS_ID_NUM_PLACEHOLDERS, self.num_placeholders));
        }
        if self.qpack_max_table_capacity != 0 {
            iv.push((
                SETTINGS_ID_QPACK_MAX_TABLE_CAPACITY,
                self.qpack_max_table_capacity,
            ));
        }
        if self.qpack_blocked_streams != 0 {
            iv.push((SETTINGS_ID_QPACK_BLOCKED_STREAMS, self.qpack_blocked_streams));
        }
        iv
    }

    /// Payload length of the SETTINGS frame for this snapshot.
    pub fn payload_len(&self) -> u64 {
        self.entries()
            .iter()
            .map(|(id, value)| (varint::encoded_len(*id) + varint::encoded_len(*value)) as u64)
            .sum()
    }
}

/// Element types referenced by a PRIORITY frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElemType {
    Request = 0x0,
    Push = 0x1,
    Placeholder = 0x2,
    /// Only valid as a dependency; asserting priority on the root is
    /// meaningless.
    Root = 0x3,
}

/// Priority dependency assertion.
///
/// Wire image: one flags byte (prioritized element type in the top two
/// bits, dependency type in the next two), the prioritized element id, the
/// dependency id (omitted when the dependency is the root), and a weight
/// byte holding `weight - 1`.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    pub prioritized_type: ElemType,
    pub prioritized_id: u64,
    pub dep_type: ElemType,
    pub dep_id: u64,
    /// Weight in `1..=256`.
    pub weight: u32,
}

impl PriorityFrame {
    pub fn payload_len(&self) -> u64 {
        let dep_id_len = if self.dep_type == ElemType::Root {
            0
        } else {
            varint::encoded_len(self.dep_id)
        };
        (1 + varint::encoded_len(self.prioritized_id) + dep_id_len + 1) as u64
    }

    pub fn flags_byte(&self) -> u8 {
        ((self.prioritized_type as u8) << 6) | ((self.dep_type as u8) << 4)
    }
}

/// Length of a frame header `type:varint length:varint`.
pub fn header_len(frame_type: FrameType, payload_len: u64) -> usize {
    varint::encoded_len(frame_type.to_u64()) + varint::encoded_len(payload_len)
}

/// A pending logical frame queued on a stream before serialization.
///
/// HEADERS and PUSH_PROMISE own their header lists; DATA carries the
/// application read callback it will pull payload from.
pub enum FrameEntry {
    Settings(Settings),
    Priority(PriorityFrame),
    Headers(Vec<FieldLine>),
    PushPromise { push_id: u64, fields: Vec<FieldLine> },
    CancelPush(u64),
    Data(Box<dyn DataSource>),
    MaxPushId,
}

impl FrameEntry {
    pub fn frame_type(&self) -> FrameType {
        match self {
            FrameEntry::Settings(_) => FrameType::Settings,
            FrameEntry::Priority(_) => FrameType::Priority,
            FrameEntry::Headers(_) => FrameType::Headers,
            FrameEntry::PushPromise { .. } => FrameType::PushPromise,
            FrameEntry::CancelPush(_) => FrameType::CancelPush,
            FrameEntry::Data(_) => FrameType::Data,
            FrameEntry::MaxPushId => FrameType::MaxPushId,
        }
    }
}

impl fmt::Debug for FrameEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameEntry::Settings(s) => f.debug_tuple("Settings").field(s).finish(),
            FrameEntry::Priority(p) => f.debug_tuple("Priority").field(p).finish(),
            FrameEntry::Headers(fields) => {
                f.debug_struct("Headers").field("fields", &fields.len()).finish()
            }
            FrameEntry::PushPromise { push_id, fields } => f
                .debug_struct("PushPromise")
                .field("push_id", push_id)
                .field("fields", &fields.len())
                .finish(),
            FrameEntry::CancelPush(id) => f.debug_tuple("CancelPush").field(id).finish(),
            FrameEntry::Data(_) => f.write_str("Data(..)"),
            FrameEntry::MaxPushId => f.write_str("MaxPushId"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_round_trip() {
        for ty in [
            FrameType::Data,
            FrameType::Headers,
            FrameType::Priority,
            FrameType::CancelPush,
            FrameType::Settings,
            FrameType::PushPromise,
            FrameType::GoAway,
            FrameType::MaxPushId,
            FrameType::DuplicatePush,
        ] {
            assert_eq!(FrameType::from_u64(ty.to_u64()), Some(ty));
        }
        assert_eq!(FrameType::from_u64(0x21), None);
    }

    #[test]
    fn test_settings_entries_skip_zero() {
        let settings = Settings::default();
        assert!(settings.entries().is_empty());
        assert_eq!(settings.payload_len(), 0);

        let settings = Settings {
            qpack_max_table_capacity: 4096,
            qpack_blocked_streams: 100,
            ..Default::default()
        };
        assert_eq!(
            settings.entries(),
            vec![
                (SETTINGS_ID_QPACK_MAX_TABLE_CAPACITY, 4096),
                (SETTINGS_ID_QPACK_BLOCKED_STREAMS, 100)
            ]
        );
        // id(1) + value(2) + id(1) + value(2)
        assert_eq!(settings.payload_len(), 6);
    }

    #[test]
    fn test_priority_payload_len() {
        let fr = PriorityFrame {
            prioritized_type: ElemType::Request,
            prioritized_id: 4,
            dep_type: ElemType::Root,
            dep_id: 0,
            weight: 16,
        };
        // flags + id varint + weight
        assert_eq!(fr.payload_len(), 3);
        assert_eq!(fr.flags_byte(), 0x30);

        let fr = PriorityFrame {
            prioritized_type: ElemType::Push,
            prioritized_id: 2,
            dep_type: ElemType::Placeholder,
            dep_id: 70,
            weight: 256,
        };
        // flags + id + dep id (2-byte varint) + weight
        assert_eq!(fr.payload_len(), 5);
        assert_eq!(fr.flags_byte(), 0x60);
    }

    #[test]
    fn test_header_len() {
        assert_eq!(header_len(FrameType::Settings, 0), 2);
        assert_eq!(header_len(FrameType::Data, 16384), 5);
        assert_eq!(header_len(FrameType::MaxPushId, 1), 2);
    }
}
