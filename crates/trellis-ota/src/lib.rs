//! # trellis-ota: OTA image format
//!
//! The software-update image container BDX carries:
//!
//! ```text
//! [magic:u32 = 0x1BEEF11E][total_size:u64][header_size:u32]
//! [header: TLV struct][payload: payload_size bytes]
//! ```
//!
//! The TLV header names the target (vendor, product), the software
//! version, the payload digest and optional applicability bounds. A
//! base64 checksum of the whole file travels out-of-band beside download
//! links.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use base64::Engine;
use trellis_crypto::CryptoProvider;
use trellis_tlv::{TlvTag, TlvValue, TlvWriter};
use trellis_types::VendorId;

/// Image container magic, little-endian on the wire.
pub const OTA_IMAGE_MAGIC: u32 = 0x1BEE_F11E;

/// Supported payload digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestType {
    Sha256,
}

impl DigestType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Sha256 => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// Errors raised while packing or parsing an image.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OtaImageError {
    #[error("not an OTA image (bad magic 0x{0:08X})")]
    BadMagic(u32),

    #[error("image truncated ({context})")]
    Truncated { context: &'static str },

    #[error("header field {field} missing or malformed")]
    BadHeader { field: &'static str },

    #[error("unsupported digest type {0}")]
    UnsupportedDigest(u8),

    #[error("payload digest mismatch")]
    DigestMismatch,

    #[error("header TLV malformed: {0}")]
    Tlv(#[from] trellis_tlv::TlvError),
}

/// Parsed image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaImageHeader {
    pub vendor_id: VendorId,
    pub product_id: u16,
    pub software_version: u32,
    pub software_version_string: String,
    pub payload_size: u64,
    pub digest_type: DigestType,
    pub image_digest: Bytes,
    pub min_applicable_version: Option<u32>,
    pub max_applicable_version: Option<u32>,
    pub release_notes_url: Option<String>,
}

// Header TLV context tags.
const TAG_VENDOR: u8 = 0;
const TAG_PRODUCT: u8 = 1;
const TAG_VERSION: u8 = 2;
const TAG_VERSION_STRING: u8 = 3;
const TAG_PAYLOAD_SIZE: u8 = 4;
const TAG_DIGEST_TYPE: u8 = 5;
const TAG_DIGEST: u8 = 6;
const TAG_MIN_VERSION: u8 = 7;
const TAG_MAX_VERSION: u8 = 8;
const TAG_RELEASE_NOTES: u8 = 9;

/// Builds OTA images.
#[derive(Debug, Clone)]
pub struct OtaImageWriter {
    pub vendor_id: VendorId,
    pub product_id: u16,
    pub software_version: u32,
    pub software_version_string: String,
    pub min_applicable_version: Option<u32>,
    pub max_applicable_version: Option<u32>,
    pub release_notes_url: Option<String>,
}

impl OtaImageWriter {
    pub fn new(
        vendor_id: VendorId,
        product_id: u16,
        software_version: u32,
        software_version_string: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            software_version,
            software_version_string: software_version_string.into(),
            min_applicable_version: None,
            max_applicable_version: None,
            release_notes_url: None,
        }
    }

    pub fn applicable_versions(mut self, min: u32, max: u32) -> Self {
        self.min_applicable_version = Some(min);
        self.max_applicable_version = Some(max);
        self
    }

    pub fn release_notes(mut self, url: impl Into<String>) -> Self {
        self.release_notes_url = Some(url.into());
        self
    }

    /// Packs the payload into a complete image.
    pub fn create(&self, crypto: &dyn CryptoProvider, payload: &Bytes) -> OtaImage {
        let digest = crypto.sha256(payload);

        let mut header = TlvWriter::new();
        header.start_struct(TlvTag::Anonymous);
        header.unsigned(TlvTag::context(TAG_VENDOR), u64::from(self.vendor_id.as_u16()));
        header.unsigned(TlvTag::context(TAG_PRODUCT), u64::from(self.product_id));
        header.unsigned(TlvTag::context(TAG_VERSION), u64::from(self.software_version));
        header.utf8(
            TlvTag::context(TAG_VERSION_STRING),
            &self.software_version_string,
        );
        header.unsigned(TlvTag::context(TAG_PAYLOAD_SIZE), payload.len() as u64);
        header.unsigned(
            TlvTag::context(TAG_DIGEST_TYPE),
            u64::from(DigestType::Sha256.as_u8()),
        );
        header.bytes(TlvTag::context(TAG_DIGEST), &digest);
        if let Some(min) = self.min_applicable_version {
            header.unsigned(TlvTag::context(TAG_MIN_VERSION), u64::from(min));
        }
        if let Some(max) = self.max_applicable_version {
            header.unsigned(TlvTag::context(TAG_MAX_VERSION), u64::from(max));
        }
        if let Some(url) = &self.release_notes_url {
            header.utf8(TlvTag::context(TAG_RELEASE_NOTES), url);
        }
        header.end_container();
        let header = header.finish();

        let total_size = 16 + header.len() + payload.len();
        let mut image = BytesMut::with_capacity(total_size);
        image.put_u32_le(OTA_IMAGE_MAGIC);
        image.put_u64_le(total_size as u64);
        image.put_u32_le(header.len() as u32);
        image.put_slice(&header);
        image.put_slice(payload);
        OtaImage {
            image: image.freeze(),
        }
    }
}

/// A packed image plus its out-of-band checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaImage {
    /// The complete image file bytes.
    pub image: Bytes,
}

impl OtaImage {
    /// Base64 checksum of the whole file, distributed out-of-band.
    pub fn checksum(&self, crypto: &dyn CryptoProvider) -> String {
        base64::engine::general_purpose::STANDARD.encode(crypto.sha256(&self.image))
    }

    /// Parses and digest-verifies an image file.
    pub fn parse(
        crypto: &dyn CryptoProvider,
        bytes: Bytes,
    ) -> Result<(OtaImageHeader, Bytes), OtaImageError> {
        let mut cursor = bytes.clone();
        if cursor.remaining() < 16 {
            return Err(OtaImageError::Truncated { context: "fixed header" });
        }
        let magic = cursor.get_u32_le();
        if magic != OTA_IMAGE_MAGIC {
            return Err(OtaImageError::BadMagic(magic));
        }
        let total_size = cursor.get_u64_le();
        if total_size != bytes.len() as u64 {
            return Err(OtaImageError::Truncated { context: "total size" });
        }
        let header_size = cursor.get_u32_le() as usize;
        if cursor.remaining() < header_size {
            return Err(OtaImageError::Truncated { context: "TLV header" });
        }
        let header_bytes = cursor.split_to(header_size);
        let header = parse_header(&header_bytes)?;

        if cursor.remaining() as u64 != header.payload_size {
            return Err(OtaImageError::Truncated { context: "payload" });
        }
        let payload = cursor;

        let digest = crypto.sha256(&payload);
        if digest.as_slice() != header.image_digest.as_ref() {
            return Err(OtaImageError::DigestMismatch);
        }
        Ok((header, payload))
    }
}

fn parse_header(bytes: &[u8]) -> Result<OtaImageHeader, OtaImageError> {
    let value = trellis_tlv::decode(bytes)?;
    let unsigned = |tag: u8, field: &'static str| {
        value
            .member(tag)
            .and_then(TlvValue::as_u64)
            .ok_or(OtaImageError::BadHeader { field })
    };

    let digest_type_raw = unsigned(TAG_DIGEST_TYPE, "imageDigestType")? as u8;
    let digest_type = DigestType::from_u8(digest_type_raw)
        .ok_or(OtaImageError::UnsupportedDigest(digest_type_raw))?;

    Ok(OtaImageHeader {
        vendor_id: VendorId::new(unsigned(TAG_VENDOR, "vendorId")? as u16),
        product_id: unsigned(TAG_PRODUCT, "productId")? as u16,
        software_version: unsigned(TAG_VERSION, "softwareVersion")? as u32,
        software_version_string: value
            .member(TAG_VERSION_STRING)
            .and_then(TlvValue::as_utf8)
            .ok_or(OtaImageError::BadHeader {
                field: "softwareVersionString",
            })?
            .to_string(),
        payload_size: unsigned(TAG_PAYLOAD_SIZE, "payloadSize")?,
        digest_type,
        image_digest: value
            .member(TAG_DIGEST)
            .and_then(TlvValue::as_bytes)
            .ok_or(OtaImageError::BadHeader { field: "imageDigest" })?
            .clone(),
        min_applicable_version: value
            .member(TAG_MIN_VERSION)
            .and_then(TlvValue::as_u64)
            .map(|v| v as u32),
        max_applicable_version: value
            .member(TAG_MAX_VERSION)
            .and_then(TlvValue::as_u64)
            .map(|v| v as u32),
        release_notes_url: value
            .member(TAG_RELEASE_NOTES)
            .and_then(TlvValue::as_utf8)
            .map(str::to_string),
    })
}
