//! Subsequenced Message Block Codec
//!
//! A peek reply carries one *message block*: every committed record for one
//! storage team over a contiguous version range, framed for integrity.
//!
//! ## Block layout
//!
//! ```text
//! ┌───────────────┬──────────────┬───────────────┬───────────────┐
//! │ magic (u32)   │ team id (16) │ first_version │ last_version  │
//! ├───────────────┴──────────────┴───────────────┴───────────────┤
//! │ group_count (varint)                                          │
//! │ per version group:                                            │
//! │   version (varint)  item_count (varint)                       │
//! │   per item: subsequence (varint)  tag (u8)  payload           │
//! ├───────────────────────────────────────────────────────────────┤
//! │ crc32 of everything above (u32)                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are length-prefixed byte strings; `EmptyVersion` has none.
//!
//! ## Reading
//!
//! `MessageDeserializer` validates the frame once, then exposes a forward
//! iterator over `VersionSubsequenceMessage`. Decoded payloads are `Bytes`
//! slices of the block, so the backing buffer is shared, not copied. The
//! iterator can be rewound to the start of the block without re-decoding,
//! which is what lets cursors replay their last reply during `reset`.
//!
//! Empty-version records are emitted like any other record; whether they
//! are visible to a consumer is the cursor's decision, not the codec's.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::message::{Message, Mutation, VersionSubsequenceMessage};
use crate::types::{LogPosition, StorageTeamId, Subsequence, Version};
use crate::varint;

const MAGIC: u32 = 0x544C_5031; // "TLP1"

const TAG_MUTATION: u8 = 0;
const TAG_EMPTY_VERSION: u8 = 1;
const TAG_SPAN_CONTEXT: u8 = 2;
const TAG_LOG_PROTOCOL: u8 = 3;

// magic + team id + first/last version
const HEADER_LEN: usize = 4 + 16 + 8 + 8;
const TRAILER_LEN: usize = 4;

/// Builds a message block for one storage team.
///
/// Records must be appended in strictly increasing
/// `(version, subsequence)` order; `finish` seals the frame.
pub struct MessageSerializer {
    team_id: StorageTeamId,
    groups: Vec<(Version, Vec<(Subsequence, Message)>)>,
    last: Option<LogPosition>,
}

impl MessageSerializer {
    pub fn new(team_id: StorageTeamId) -> Self {
        Self {
            team_id,
            groups: Vec::new(),
            last: None,
        }
    }

    /// Append one record.
    pub fn append(
        &mut self,
        version: Version,
        subsequence: Subsequence,
        message: Message,
    ) -> Result<()> {
        let position = LogPosition::new(version, subsequence);
        if let Some(last) = self.last {
            if position <= last {
                return Err(CodecError::OutOfOrder {
                    version,
                    subsequence,
                    last_version: last.version,
                    last_subsequence: last.subsequence,
                });
            }
        }
        self.last = Some(position);

        match self.groups.last_mut() {
            Some((v, items)) if *v == version => items.push((subsequence, message)),
            _ => self.groups.push((version, vec![(subsequence, message)])),
        }
        Ok(())
    }

    /// Append the placeholder record for a version with no mutations.
    pub fn append_empty_version(&mut self, version: Version) -> Result<()> {
        self.append(version, 1, Message::EmptyVersion)
    }

    /// Seal the block and return its bytes.
    pub fn finish(self) -> Bytes {
        let first_version = self.groups.first().map_or(0, |(v, _)| *v);
        let last_version = self.groups.last().map_or(0, |(v, _)| *v);

        let mut buf = BytesMut::new();
        buf.put_u32(MAGIC);
        buf.put_slice(self.team_id.as_bytes());
        buf.put_u64(first_version);
        buf.put_u64(last_version);
        varint::encode_u64(&mut buf, self.groups.len() as u64);

        for (version, items) in &self.groups {
            varint::encode_u64(&mut buf, *version);
            varint::encode_u64(&mut buf, items.len() as u64);
            for (subsequence, message) in items {
                varint::encode_u64(&mut buf, u64::from(*subsequence));
                match message {
                    Message::Mutation(m) => {
                        buf.put_u8(TAG_MUTATION);
                        varint::encode_u64(&mut buf, m.key.len() as u64);
                        buf.put_slice(&m.key);
                        varint::encode_u64(&mut buf, m.value.len() as u64);
                        buf.put_slice(&m.value);
                    }
                    Message::EmptyVersion => buf.put_u8(TAG_EMPTY_VERSION),
                    Message::SpanContext(data) => {
                        buf.put_u8(TAG_SPAN_CONTEXT);
                        varint::encode_u64(&mut buf, data.len() as u64);
                        buf.put_slice(data);
                    }
                    Message::LogProtocol(data) => {
                        buf.put_u8(TAG_LOG_PROTOCOL);
                        varint::encode_u64(&mut buf, data.len() as u64);
                        buf.put_slice(data);
                    }
                }
            }
        }

        let crc = crc32fast::hash(&buf);
        buf.put_u32(crc);
        buf.freeze()
    }
}

/// Forward iterator over the records of one message block.
///
/// The frame is validated when the block is loaded; iteration itself never
/// fails. `rewind` returns to the first record of the current block and
/// `reset` loads a new block, which is exactly the pair of operations the
/// cursor layer needs for local replay versus remote refill.
#[derive(Debug)]
pub struct MessageDeserializer {
    team_id: StorageTeamId,
    first_version: Version,
    last_version: Version,
    records: Vec<VersionSubsequenceMessage>,
    pos: usize,
}

impl MessageDeserializer {
    /// A deserializer over a block with no records, used before the first
    /// reply arrives.
    pub fn empty(team_id: StorageTeamId) -> Self {
        Self {
            team_id,
            first_version: 0,
            last_version: 0,
            records: Vec::new(),
            pos: 0,
        }
    }

    /// Decode and validate a block.
    pub fn new(data: Bytes) -> Result<Self> {
        let (team_id, first_version, last_version, records) = decode_block(&data)?;
        Ok(Self {
            team_id,
            first_version,
            last_version,
            records,
            pos: 0,
        })
    }

    /// Replace the current block with a freshly received one and reposition
    /// to its first record.
    pub fn reset(&mut self, data: Bytes) -> Result<()> {
        let (team_id, first_version, last_version, records) = decode_block(&data)?;
        self.team_id = team_id;
        self.first_version = first_version;
        self.last_version = last_version;
        self.records = records;
        self.pos = 0;
        Ok(())
    }

    /// Reposition to the first record of the current block.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// The record at the current position, if any remain.
    pub fn peek(&self) -> Option<&VersionSubsequenceMessage> {
        self.records.get(self.pos)
    }

    /// Move past the current record. Does nothing at end of block.
    pub fn advance(&mut self) {
        if self.pos < self.records.len() {
            self.pos += 1;
        }
    }

    /// True if the block holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records not yet iterated past.
    pub fn remaining(&self) -> usize {
        self.records.len() - self.pos
    }

    pub fn team_id(&self) -> StorageTeamId {
        self.team_id
    }

    pub fn first_version(&self) -> Version {
        self.first_version
    }

    pub fn last_version(&self) -> Version {
        self.last_version
    }
}

type DecodedBlock = (StorageTeamId, Version, Version, Vec<VersionSubsequenceMessage>);

fn decode_block(data: &Bytes) -> Result<DecodedBlock> {
    if data.len() < HEADER_LEN + TRAILER_LEN {
        return Err(CodecError::Truncated {
            offset: data.len(),
            needed: HEADER_LEN + TRAILER_LEN - data.len(),
        });
    }

    let body_len = data.len() - TRAILER_LEN;
    let expected = u32::from_be_bytes(
        data[body_len..]
            .try_into()
            .map_err(|_| CodecError::Truncated {
                offset: body_len,
                needed: TRAILER_LEN,
            })?,
    );
    let computed = crc32fast::hash(&data[..body_len]);
    if expected != computed {
        return Err(CodecError::ChecksumMismatch { expected, computed });
    }

    let magic = u32::from_be_bytes(data[..4].try_into().unwrap_or_default());
    if magic != MAGIC {
        return Err(CodecError::BadMagic {
            expected: MAGIC,
            found: magic,
        });
    }

    let mut team_bytes = [0u8; 16];
    team_bytes.copy_from_slice(&data[4..20]);
    let team_id = StorageTeamId::from_bytes(team_bytes);
    let first_version = u64::from_be_bytes(data[20..28].try_into().unwrap_or_default());
    let last_version = u64::from_be_bytes(data[28..36].try_into().unwrap_or_default());

    let body = &data[..body_len];
    let mut pos = HEADER_LEN;
    let group_count = varint::decode_u64(body, &mut pos)?;

    let mut records = Vec::new();
    for _ in 0..group_count {
        let version = varint::decode_u64(body, &mut pos)?;
        let item_count = varint::decode_u64(body, &mut pos)?;
        for _ in 0..item_count {
            let subsequence = varint::decode_u32(body, &mut pos)?;
            let tag = *body.get(pos).ok_or(CodecError::Truncated {
                offset: pos,
                needed: 1,
            })?;
            pos += 1;
            let message = match tag {
                TAG_MUTATION => {
                    let key = read_bytes(data, body, &mut pos)?;
                    let value = read_bytes(data, body, &mut pos)?;
                    Message::Mutation(Mutation { key, value })
                }
                TAG_EMPTY_VERSION => Message::EmptyVersion,
                TAG_SPAN_CONTEXT => Message::SpanContext(read_bytes(data, body, &mut pos)?),
                TAG_LOG_PROTOCOL => Message::LogProtocol(read_bytes(data, body, &mut pos)?),
                other => return Err(CodecError::UnknownMessageTag(other)),
            };
            records.push(VersionSubsequenceMessage::new(version, subsequence, message));
        }
    }

    Ok((team_id, first_version, last_version, records))
}

/// Read a length-prefixed byte string as a zero-copy slice of the block.
fn read_bytes(data: &Bytes, body: &[u8], pos: &mut usize) -> Result<Bytes> {
    let len = varint::decode_u64(body, pos)? as usize;
    if body.len() - *pos < len {
        return Err(CodecError::Truncated {
            offset: *pos,
            needed: len - (body.len() - *pos),
        });
    }
    let slice = data.slice(*pos..*pos + len);
    *pos += len;
    Ok(slice)
}
