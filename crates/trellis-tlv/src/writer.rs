//! TLV writer.

use bytes::Bytes;

use crate::{TlvTag, TlvValue};

// Element type codes (low 5 bits of the control byte).
pub(crate) const TYPE_I8: u8 = 0x00;
pub(crate) const TYPE_I16: u8 = 0x01;
pub(crate) const TYPE_I32: u8 = 0x02;
pub(crate) const TYPE_I64: u8 = 0x03;
pub(crate) const TYPE_U8: u8 = 0x04;
pub(crate) const TYPE_U16: u8 = 0x05;
pub(crate) const TYPE_U32: u8 = 0x06;
pub(crate) const TYPE_U64: u8 = 0x07;
pub(crate) const TYPE_FALSE: u8 = 0x08;
pub(crate) const TYPE_TRUE: u8 = 0x09;
pub(crate) const TYPE_F32: u8 = 0x0A;
pub(crate) const TYPE_F64: u8 = 0x0B;
pub(crate) const TYPE_UTF8_1: u8 = 0x0C;
pub(crate) const TYPE_UTF8_2: u8 = 0x0D;
pub(crate) const TYPE_UTF8_4: u8 = 0x0E;
pub(crate) const TYPE_UTF8_8: u8 = 0x0F;
pub(crate) const TYPE_BYTES_1: u8 = 0x10;
pub(crate) const TYPE_BYTES_2: u8 = 0x11;
pub(crate) const TYPE_BYTES_4: u8 = 0x12;
pub(crate) const TYPE_BYTES_8: u8 = 0x13;
pub(crate) const TYPE_NULL: u8 = 0x14;
pub(crate) const TYPE_STRUCT: u8 = 0x15;
pub(crate) const TYPE_ARRAY: u8 = 0x16;
pub(crate) const TYPE_LIST: u8 = 0x17;
pub(crate) const TYPE_END: u8 = 0x18;

/// Streaming TLV encoder.
///
/// Containers are opened with [`TlvWriter::start_struct`] /
/// [`TlvWriter::start_array`] / [`TlvWriter::start_list`] and must each be
/// balanced by [`TlvWriter::end_container`] before [`TlvWriter::finish`].
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
    open_containers: usize,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn control(&mut self, tag: TlvTag, element_type: u8) {
        self.buf.push(tag.control_bits() | element_type);
        tag.write_bytes(&mut self.buf);
    }

    /// Writes an unsigned integer at the smallest representable width.
    pub fn unsigned(&mut self, tag: TlvTag, value: u64) {
        if value <= u64::from(u8::MAX) {
            self.control(tag, TYPE_U8);
            self.buf.push(value as u8);
        } else if value <= u64::from(u16::MAX) {
            self.control(tag, TYPE_U16);
            self.buf.extend_from_slice(&(value as u16).to_le_bytes());
        } else if value <= u64::from(u32::MAX) {
            self.control(tag, TYPE_U32);
            self.buf.extend_from_slice(&(value as u32).to_le_bytes());
        } else {
            self.control(tag, TYPE_U64);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Writes a signed integer at the smallest representable width.
    pub fn signed(&mut self, tag: TlvTag, value: i64) {
        if let Ok(v) = i8::try_from(value) {
            self.control(tag, TYPE_I8);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = i16::try_from(value) {
            self.control(tag, TYPE_I16);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = i32::try_from(value) {
            self.control(tag, TYPE_I32);
            self.buf.extend_from_slice(&v.to_le_bytes());
        } else {
            self.control(tag, TYPE_I64);
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn boolean(&mut self, tag: TlvTag, value: bool) {
        self.control(tag, if value { TYPE_TRUE } else { TYPE_FALSE });
    }

    pub fn float(&mut self, tag: TlvTag, value: f32) {
        self.control(tag, TYPE_F32);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn double(&mut self, tag: TlvTag, value: f64) {
        self.control(tag, TYPE_F64);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn utf8(&mut self, tag: TlvTag, value: &str) {
        self.string_like(tag, TYPE_UTF8_1, value.as_bytes());
    }

    pub fn bytes(&mut self, tag: TlvTag, value: &[u8]) {
        self.string_like(tag, TYPE_BYTES_1, value);
    }

    // Base type code is the 1-byte-length variant; wider lengths offset it.
    fn string_like(&mut self, tag: TlvTag, base: u8, data: &[u8]) {
        let len = data.len();
        if let Ok(l) = u8::try_from(len) {
            self.control(tag, base);
            self.buf.push(l);
        } else if let Ok(l) = u16::try_from(len) {
            self.control(tag, base + 1);
            self.buf.extend_from_slice(&l.to_le_bytes());
        } else if let Ok(l) = u32::try_from(len) {
            self.control(tag, base + 2);
            self.buf.extend_from_slice(&l.to_le_bytes());
        } else {
            self.control(tag, base + 3);
            self.buf.extend_from_slice(&(len as u64).to_le_bytes());
        }
        self.buf.extend_from_slice(data);
    }

    pub fn null(&mut self, tag: TlvTag) {
        self.control(tag, TYPE_NULL);
    }

    pub fn start_struct(&mut self, tag: TlvTag) {
        self.control(tag, TYPE_STRUCT);
        self.open_containers += 1;
    }

    pub fn start_array(&mut self, tag: TlvTag) {
        self.control(tag, TYPE_ARRAY);
        self.open_containers += 1;
    }

    pub fn start_list(&mut self, tag: TlvTag) {
        self.control(tag, TYPE_LIST);
        self.open_containers += 1;
    }

    /// Closes the innermost open container.
    ///
    /// # Panics
    ///
    /// Panics if no container is open; that is a caller bug, not input
    /// dependent, and corrupt framing must never leave this writer.
    pub fn end_container(&mut self) {
        assert!(self.open_containers > 0, "end_container without start");
        self.open_containers -= 1;
        self.buf.push(TYPE_END);
    }

    /// Writes a whole decoded tree under the given tag.
    pub fn value(&mut self, tag: TlvTag, value: &TlvValue) {
        match value {
            TlvValue::UnsignedInt(v) => self.unsigned(tag, *v),
            TlvValue::SignedInt(v) => self.signed(tag, *v),
            TlvValue::Bool(v) => self.boolean(tag, *v),
            TlvValue::Float(v) => self.float(tag, *v),
            TlvValue::Double(v) => self.double(tag, *v),
            TlvValue::Utf8(v) => self.utf8(tag, v),
            TlvValue::Bytes(v) => self.bytes(tag, v),
            TlvValue::Null => self.null(tag),
            TlvValue::Struct(members) => {
                self.start_struct(tag);
                for (member_tag, member) in members {
                    self.value(*member_tag, member);
                }
                self.end_container();
            }
            TlvValue::Array(items) => {
                self.start_array(tag);
                for item in items {
                    self.value(TlvTag::Anonymous, item);
                }
                self.end_container();
            }
            TlvValue::List(members) => {
                self.start_list(tag);
                for (member_tag, member) in members {
                    self.value(*member_tag, member);
                }
                self.end_container();
            }
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finalizes the encoding.
    ///
    /// # Panics
    ///
    /// Panics if a container is still open (caller bug).
    pub fn finish(self) -> Bytes {
        assert_eq!(
            self.open_containers, 0,
            "finish with {} unterminated container(s)",
            self.open_containers
        );
        Bytes::from(self.buf)
    }
}
