//! # trellis-tlv: Matter TLV codec
//!
//! Little-endian tag-length-value encoding for the Matter type system.
//! Every wire payload and every persisted attribute blob in Trellis goes
//! through this codec.
//!
//! # Element Format
//!
//! ```text
//! [control:u8][tag:0-8B][value:variable]
//!
//! control = tag_control (high 3 bits) | element_type (low 5 bits)
//! ```
//!
//! Integers are emitted at the smallest width that represents the value
//! and widened to 64 bits on read, so `decode(encode(v)) == v` holds on
//! the [`TlvValue`] tree. The reader is resumable: a truncated buffer
//! yields [`TlvError::UnexpectedEnd`] without consuming input, so callers
//! can retry once more bytes arrive (chunked report reassembly).

mod error;
mod reader;
mod tag;
mod value;
mod writer;

pub use error::TlvError;
pub use reader::{TlvElement, TlvReader};
pub use tag::TlvTag;
pub use value::TlvValue;
pub use writer::TlvWriter;

use bytes::Bytes;

/// Encodes a single value (with an anonymous outer tag) to bytes.
pub fn encode(value: &TlvValue) -> Bytes {
    let mut writer = TlvWriter::new();
    writer.value(TlvTag::Anonymous, value);
    writer.finish()
}

/// Decodes a single value from bytes, ignoring the outer tag.
pub fn decode(bytes: &[u8]) -> Result<TlvValue, TlvError> {
    let mut reader = TlvReader::new(bytes);
    let element = reader.read_element()?;
    Ok(element.value)
}

#[cfg(test)]
mod tests;
