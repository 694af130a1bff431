//! TLV decode/encode errors.

/// Errors surfaced by the TLV reader and writer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    /// The input ended before the element was complete.
    ///
    /// The reader does not consume anything when it reports this, so the
    /// caller may retry the same read after appending more bytes.
    #[error("unexpected end of TLV data at offset {offset}")]
    UnexpectedEnd { offset: usize },

    /// The control byte does not encode a known element type.
    #[error("invalid TLV control byte 0x{control:02X} at offset {offset}")]
    InvalidControl { control: u8, offset: usize },

    /// An end-of-container element appeared with no open container.
    #[error("unbalanced end-of-container at offset {offset}")]
    UnbalancedContainerEnd { offset: usize },

    /// A string element carried bytes that are not valid UTF-8.
    #[error("invalid UTF-8 in string element at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// A length field exceeds what this implementation will buffer.
    #[error("TLV length {length} exceeds limit at offset {offset}")]
    LengthTooLarge { length: u64, offset: usize },

    /// Containers nested deeper than the supported bound.
    #[error("TLV nesting depth exceeds {max}")]
    DepthExceeded { max: usize },
}
