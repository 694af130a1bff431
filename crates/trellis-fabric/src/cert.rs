//! Node operational certificates.
//!
//! A NOC is a TLV struct binding a node id and fabric id to a subject
//! public key, signed by the fabric CA's root key:
//!
//! ```text
//! { 1: subject node id, 2: fabric id, 9: subject public key,
//!   10: CA signature over the encoding of fields 1/2/9 }
//! ```
//!
//! Field 9 is load-bearing for the session layer, which pulls the
//! subject key out of a validated peer NOC during CASE.

use bytes::Bytes;
use trellis_crypto::{CryptoError, CryptoProvider, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use trellis_tlv::{TlvTag, TlvValue, TlvWriter};
use trellis_types::{FabricId, NodeId};

use crate::FabricError;

const TAG_NODE_ID: u8 = 1;
const TAG_FABRIC_ID: u8 = 2;
const TAG_PUBLIC_KEY: u8 = 9;
const TAG_SIGNATURE: u8 = 10;

/// The parsed contents of a NOC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NocContents {
    pub node_id: NodeId,
    pub fabric_id: FabricId,
    pub public_key: [u8; PUBLIC_KEY_LEN],
}

/// Encodes the to-be-signed portion.
fn encode_tbs(contents: &NocContents) -> Bytes {
    let mut writer = TlvWriter::new();
    writer.start_struct(TlvTag::Anonymous);
    writer.unsigned(TlvTag::context(TAG_NODE_ID), contents.node_id.as_u64());
    writer.unsigned(TlvTag::context(TAG_FABRIC_ID), contents.fabric_id.as_u64());
    writer.bytes(TlvTag::context(TAG_PUBLIC_KEY), &contents.public_key);
    writer.end_container();
    writer.finish()
}

/// Issues a signed certificate.
pub fn issue(
    crypto: &dyn CryptoProvider,
    ca_secret: &[u8; 32],
    contents: &NocContents,
) -> Bytes {
    let tbs = encode_tbs(contents);
    let signature = crypto.sign(ca_secret, &tbs);

    let mut writer = TlvWriter::new();
    writer.start_struct(TlvTag::Anonymous);
    writer.unsigned(TlvTag::context(TAG_NODE_ID), contents.node_id.as_u64());
    writer.unsigned(TlvTag::context(TAG_FABRIC_ID), contents.fabric_id.as_u64());
    writer.bytes(TlvTag::context(TAG_PUBLIC_KEY), &contents.public_key);
    writer.bytes(TlvTag::context(TAG_SIGNATURE), &signature);
    writer.end_container();
    writer.finish()
}

/// Parses a certificate without verifying its signature.
pub fn parse(noc: &[u8]) -> Result<NocContents, FabricError> {
    let value =
        trellis_tlv::decode(noc).map_err(|_| FabricError::Certificate("TLV malformed"))?;
    let node_id = value
        .member(TAG_NODE_ID)
        .and_then(TlvValue::as_u64)
        .ok_or(FabricError::Certificate("missing node id"))?;
    let fabric_id = value
        .member(TAG_FABRIC_ID)
        .and_then(TlvValue::as_u64)
        .ok_or(FabricError::Certificate("missing fabric id"))?;
    let public_key: [u8; PUBLIC_KEY_LEN] = value
        .member(TAG_PUBLIC_KEY)
        .and_then(TlvValue::as_bytes)
        .and_then(|b| <[u8; PUBLIC_KEY_LEN]>::try_from(b.as_ref()).ok())
        .ok_or(FabricError::Certificate("missing subject key"))?;
    Ok(NocContents {
        node_id: NodeId::new(node_id),
        fabric_id: FabricId::new(fabric_id),
        public_key,
    })
}

/// Parses and verifies a certificate against a CA root public key.
pub fn verify(
    crypto: &dyn CryptoProvider,
    root_public_key: &[u8; PUBLIC_KEY_LEN],
    noc: &[u8],
) -> Result<NocContents, FabricError> {
    let contents = parse(noc)?;
    let value = trellis_tlv::decode(noc).map_err(|_| FabricError::Certificate("TLV malformed"))?;
    let signature: [u8; SIGNATURE_LEN] = value
        .member(TAG_SIGNATURE)
        .and_then(TlvValue::as_bytes)
        .and_then(|b| <[u8; SIGNATURE_LEN]>::try_from(b.as_ref()).ok())
        .ok_or(FabricError::Certificate("missing signature"))?;

    let tbs = encode_tbs(&contents);
    crypto
        .verify(root_public_key, &tbs, &signature)
        .map_err(|_: CryptoError| FabricError::Certificate("signature invalid"))?;
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_crypto::SoftwareCrypto;

    #[test]
    fn issue_verify_roundtrip() {
        let crypto = SoftwareCrypto::seeded(1);
        let ca_secret = crypto.generate_signing_key();
        let ca_public = crypto.signing_public_key(&ca_secret);
        let subject_secret = crypto.generate_signing_key();

        let contents = NocContents {
            node_id: NodeId::new(0x42),
            fabric_id: FabricId::new(0x1001),
            public_key: crypto.signing_public_key(&subject_secret),
        };
        let noc = issue(&crypto, &ca_secret, &contents);
        assert_eq!(verify(&crypto, &ca_public, &noc).unwrap(), contents);
    }

    #[test]
    fn wrong_root_key_fails_verification() {
        let crypto = SoftwareCrypto::seeded(2);
        let ca_secret = crypto.generate_signing_key();
        let other_public = crypto.signing_public_key(&crypto.generate_signing_key());

        let contents = NocContents {
            node_id: NodeId::new(1),
            fabric_id: FabricId::new(2),
            public_key: [7; 32],
        };
        let noc = issue(&crypto, &ca_secret, &contents);
        assert!(verify(&crypto, &other_public, &noc).is_err());
    }

    #[test]
    fn tampered_subject_fails_verification() {
        let crypto = SoftwareCrypto::seeded(3);
        let ca_secret = crypto.generate_signing_key();
        let ca_public = crypto.signing_public_key(&ca_secret);
        let contents = NocContents {
            node_id: NodeId::new(1),
            fabric_id: FabricId::new(2),
            public_key: [7; 32],
        };
        let noc = issue(&crypto, &ca_secret, &contents);

        // Re-issue the struct with a different node id but the old
        // signature bytes.
        let tampered = issue(
            &crypto,
            &ca_secret,
            &NocContents {
                node_id: NodeId::new(99),
                ..contents
            },
        );
        let mut spliced = trellis_tlv::decode(&tampered).unwrap();
        if let trellis_tlv::TlvValue::Struct(members) = &mut spliced {
            let original = trellis_tlv::decode(&noc).unwrap();
            for (tag, member) in members.iter_mut() {
                if tag.context_number() == Some(TAG_SIGNATURE) {
                    *member = original.member(TAG_SIGNATURE).unwrap().clone();
                }
            }
        }
        let spliced = trellis_tlv::encode(&spliced);
        assert!(verify(&crypto, &ca_public, &spliced).is_err());
    }
}
