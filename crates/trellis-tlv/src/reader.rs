//! TLV reader.
//!
//! The reader is a pull parser over a byte slice. Reads that run out of
//! input fail with [`TlvError::UnexpectedEnd`] *without* advancing the
//! cursor, which makes the reader resumable: recreate it over the same
//! buffer after more bytes arrive and re-issue the read.

use bytes::Bytes;

use crate::writer::{
    TYPE_ARRAY, TYPE_BYTES_1, TYPE_BYTES_2, TYPE_BYTES_4, TYPE_BYTES_8, TYPE_END, TYPE_F32,
    TYPE_F64, TYPE_FALSE, TYPE_I8, TYPE_I16, TYPE_I32, TYPE_I64, TYPE_LIST, TYPE_NULL,
    TYPE_STRUCT, TYPE_TRUE, TYPE_U8, TYPE_U16, TYPE_U32, TYPE_U64, TYPE_UTF8_1, TYPE_UTF8_2,
    TYPE_UTF8_4, TYPE_UTF8_8,
};
use crate::{TlvError, TlvTag, TlvValue};

/// Deepest container nesting the reader will follow.
///
/// Matter payloads in practice nest a handful of levels; the bound exists
/// so hostile input cannot recurse the stack.
const MAX_DEPTH: usize = 24;

/// Maximum string/bytes length the reader will buffer (1 MiB).
const MAX_STRING_LEN: u64 = 1 << 20;

/// One decoded element: the tag it carried and its (fully read) value.
#[derive(Debug, Clone, PartialEq)]
pub struct TlvElement {
    pub tag: TlvTag,
    pub value: TlvValue,
}

/// Pull parser over a TLV byte slice.
#[derive(Debug)]
pub struct TlvReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Current cursor offset into the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns true once all input has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Reads the next complete element (recursing into containers).
    ///
    /// On [`TlvError::UnexpectedEnd`] the cursor is left where it was, so
    /// the same read can be retried on a longer buffer.
    pub fn read_element(&mut self) -> Result<TlvElement, TlvError> {
        let start = self.pos;
        match self.element_at_depth(0) {
            Ok(element) => Ok(element),
            Err(e) => {
                if matches!(e, TlvError::UnexpectedEnd { .. }) {
                    self.pos = start;
                }
                Err(e)
            }
        }
    }

    /// Reads every remaining top-level element.
    pub fn read_all(&mut self) -> Result<Vec<TlvElement>, TlvError> {
        let mut elements = Vec::new();
        while !self.is_at_end() {
            elements.push(self.read_element()?);
        }
        Ok(elements)
    }

    fn element_at_depth(&mut self, depth: usize) -> Result<TlvElement, TlvError> {
        if depth > MAX_DEPTH {
            return Err(TlvError::DepthExceeded { max: MAX_DEPTH });
        }

        let control_offset = self.pos;
        let control = self.take_u8()?;
        let element_type = control & 0x1F;
        if element_type == TYPE_END {
            return Err(TlvError::UnbalancedContainerEnd {
                offset: control_offset,
            });
        }

        let tag = self.read_tag(control)?;
        let value = self.read_value(element_type, control_offset, depth)?;
        Ok(TlvElement { tag, value })
    }

    fn read_tag(&mut self, control: u8) -> Result<TlvTag, TlvError> {
        Ok(match control & 0xE0 {
            0x00 => TlvTag::Anonymous,
            0x20 => TlvTag::Context(self.take_u8()?),
            0x40 => TlvTag::CommonProfile16(self.take_u16()?),
            0x60 => TlvTag::CommonProfile32(self.take_u32()?),
            0x80 => TlvTag::ImplicitProfile16(self.take_u16()?),
            0xA0 => TlvTag::ImplicitProfile32(self.take_u32()?),
            0xC0 => {
                let vendor = self.take_u16()?;
                let profile = self.take_u16()?;
                let tag = self.take_u16()?;
                TlvTag::FullyQualified16 {
                    vendor,
                    profile,
                    tag,
                }
            }
            _ => {
                let vendor = self.take_u16()?;
                let profile = self.take_u16()?;
                let tag = self.take_u32()?;
                TlvTag::FullyQualified32 {
                    vendor,
                    profile,
                    tag,
                }
            }
        })
    }

    fn read_value(
        &mut self,
        element_type: u8,
        control_offset: usize,
        depth: usize,
    ) -> Result<TlvValue, TlvError> {
        Ok(match element_type {
            TYPE_I8 => TlvValue::SignedInt(i64::from(self.take_u8()? as i8)),
            TYPE_I16 => TlvValue::SignedInt(i64::from(self.take_u16()? as i16)),
            TYPE_I32 => TlvValue::SignedInt(i64::from(self.take_u32()? as i32)),
            TYPE_I64 => TlvValue::SignedInt(self.take_u64()? as i64),
            TYPE_U8 => TlvValue::UnsignedInt(u64::from(self.take_u8()?)),
            TYPE_U16 => TlvValue::UnsignedInt(u64::from(self.take_u16()?)),
            TYPE_U32 => TlvValue::UnsignedInt(u64::from(self.take_u32()?)),
            TYPE_U64 => TlvValue::UnsignedInt(self.take_u64()?),
            TYPE_FALSE => TlvValue::Bool(false),
            TYPE_TRUE => TlvValue::Bool(true),
            TYPE_F32 => TlvValue::Float(f32::from_le_bytes(self.take_array::<4>()?)),
            TYPE_F64 => TlvValue::Double(f64::from_le_bytes(self.take_array::<8>()?)),
            TYPE_UTF8_1 | TYPE_UTF8_2 | TYPE_UTF8_4 | TYPE_UTF8_8 => {
                let len = self.take_length(element_type - TYPE_UTF8_1, control_offset)?;
                let offset = self.pos;
                let data = self.take_slice(len)?;
                let s = std::str::from_utf8(data)
                    .map_err(|_| TlvError::InvalidUtf8 { offset })?
                    .to_string();
                TlvValue::Utf8(s)
            }
            TYPE_BYTES_1 | TYPE_BYTES_2 | TYPE_BYTES_4 | TYPE_BYTES_8 => {
                let len = self.take_length(element_type - TYPE_BYTES_1, control_offset)?;
                let data = self.take_slice(len)?;
                TlvValue::Bytes(Bytes::copy_from_slice(data))
            }
            TYPE_NULL => TlvValue::Null,
            TYPE_STRUCT => {
                TlvValue::Struct(self.read_members(control_offset, depth)?)
            }
            TYPE_ARRAY => {
                let members = self.read_members(control_offset, depth)?;
                TlvValue::Array(members.into_iter().map(|(_, v)| v).collect())
            }
            TYPE_LIST => TlvValue::List(self.read_members(control_offset, depth)?),
            other => {
                return Err(TlvError::InvalidControl {
                    control: other,
                    offset: control_offset,
                });
            }
        })
    }

    fn read_members(
        &mut self,
        start_offset: usize,
        depth: usize,
    ) -> Result<Vec<(TlvTag, TlvValue)>, TlvError> {
        let mut members = Vec::new();
        loop {
            let peek_offset = self.pos;
            let control = self.take_u8().map_err(|_| {
                // Missing close marker: the container is incomplete. Still
                // reported as UnexpectedEnd for resumability; the cursor
                // reset in read_element covers this path too.
                TlvError::UnexpectedEnd {
                    offset: start_offset,
                }
            })?;
            if control & 0x1F == TYPE_END {
                // Container close carries no tag bits.
                if control != TYPE_END {
                    return Err(TlvError::InvalidControl {
                        control,
                        offset: peek_offset,
                    });
                }
                return Ok(members);
            }
            // Re-parse the element from its control byte.
            self.pos = peek_offset;
            let element = self.element_at_depth(depth + 1)?;
            members.push((element.tag, element.value));
        }
    }

    fn take_length(&mut self, width_code: u8, control_offset: usize) -> Result<usize, TlvError> {
        let len = match width_code {
            0 => u64::from(self.take_u8()?),
            1 => u64::from(self.take_u16()?),
            2 => u64::from(self.take_u32()?),
            _ => self.take_u64()?,
        };
        if len > MAX_STRING_LEN {
            return Err(TlvError::LengthTooLarge {
                length: len,
                offset: control_offset,
            });
        }
        Ok(len as usize)
    }

    fn take_u8(&mut self) -> Result<u8, TlvError> {
        let [b] = self.take_array::<1>()?;
        Ok(b)
    }

    fn take_u16(&mut self) -> Result<u16, TlvError> {
        Ok(u16::from_le_bytes(self.take_array::<2>()?))
    }

    fn take_u32(&mut self) -> Result<u32, TlvError> {
        Ok(u32::from_le_bytes(self.take_array::<4>()?))
    }

    fn take_u64(&mut self) -> Result<u64, TlvError> {
        Ok(u64::from_le_bytes(self.take_array::<8>()?))
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], TlvError> {
        let slice = self.take_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], TlvError> {
        if self.input.len() - self.pos < len {
            return Err(TlvError::UnexpectedEnd { offset: self.pos });
        }
        let slice = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}
