//! Tag/varint primitives for the fixed binding schema.
//!
//! Each field is a varint tag `(number << 3) | kind` followed by its payload.
//! Only two kinds exist on this wire: varints and length-delimited bytes.
//! Every read is checked against the bytes actually left in the buffer; the
//! declared lengths are never trusted.

use bytes::BufMut;

use crate::CodecError;

/// Longest legal encoding of a `u64` varint.
const MAX_VARINT_LEN: usize = 10;

/// Wire kind carried in the low 3 bits of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Varint = 0,
    Bytes = 2,
}

impl WireKind {
    fn from_tag(field: u64, bits: u8) -> Result<Self, CodecError> {
        match bits {
            0 => Ok(WireKind::Varint),
            2 => Ok(WireKind::Bytes),
            kind => Err(CodecError::UnknownWireKind { field, kind }),
        }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────

pub(crate) fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_tag(buf: &mut impl BufMut, field: u64, kind: WireKind) {
    put_varint(buf, (field << 3) | kind as u64);
}

/// Write a string field; empty strings are omitted.
pub(crate) fn put_string_field(buf: &mut impl BufMut, field: u64, value: &str) {
    if value.is_empty() {
        return;
    }
    put_tag(buf, field, WireKind::Bytes);
    put_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

/// Write a varint field; zero is omitted.
pub(crate) fn put_varint_field(buf: &mut impl BufMut, field: u64, value: u64) {
    if value == 0 {
        return;
    }
    put_tag(buf, field, WireKind::Varint);
    put_varint(buf, value);
}

// ── Decoding ──────────────────────────────────────────────────────────

/// A decoded field payload, borrowed from the frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Value<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

impl<'a> Value<'a> {
    fn kind(&self) -> WireKind {
        match self {
            Value::Varint(_) => WireKind::Varint,
            Value::Bytes(_) => WireKind::Bytes,
        }
    }

    /// Interpret as a UTF-8 string, failing on a varint payload.
    pub(crate) fn into_string(self, field: u64) -> Result<String, CodecError> {
        match self {
            Value::Bytes(raw) => std::str::from_utf8(raw)
                .map(str::to_owned)
                .map_err(|_| CodecError::InvalidUtf8 { field }),
            other => Err(mismatch(field, WireKind::Bytes, other.kind())),
        }
    }

    /// Interpret as an unsigned integer, failing on a bytes payload.
    pub(crate) fn into_u64(self, field: u64) -> Result<u64, CodecError> {
        match self {
            Value::Varint(v) => Ok(v),
            other => Err(mismatch(field, WireKind::Varint, other.kind())),
        }
    }
}

fn mismatch(field: u64, expected: WireKind, actual: WireKind) -> CodecError {
    CodecError::WireKindMismatch {
        field,
        expected: expected as u8,
        actual: actual as u8,
    }
}

/// Cursor over a frame body that yields one `(field, value)` at a time.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_varint(&mut self) -> Result<u64, CodecError> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(CodecError::Truncated {
                    offset: start,
                    needed: i + 1,
                    remaining: self.buf.len() - start,
                });
            };
            self.pos += 1;

            // The tenth byte may only contribute the single top bit.
            if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
                return Err(CodecError::VarintOverflow { offset: start });
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow { offset: start })
    }

    fn read_bytes(&mut self, len: u64) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        let needed = usize::try_from(len).unwrap_or(usize::MAX);
        if needed > remaining {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed,
                remaining,
            });
        }
        let out = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(out)
    }

    /// Next field, or `None` once the body is exhausted.
    pub(crate) fn next_field(&mut self) -> Result<Option<(u64, Value<'a>)>, CodecError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let tag = self.read_varint()?;
        let field = tag >> 3;
        let value = match WireKind::from_tag(field, (tag & 0x07) as u8)? {
            WireKind::Varint => Value::Varint(self.read_varint()?),
            WireKind::Bytes => {
                let len = self.read_varint()?;
                Value::Bytes(self.read_bytes(len)?)
            }
        };
        Ok(Some((field, value)))
    }
}
