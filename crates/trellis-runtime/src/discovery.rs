//! Advertisement payloads for DNS-SD.
//!
//! The runtime only *builds* the advertisement data; an mDNS driver
//! (platform collaborator) publishes it. Commissionable nodes advertise
//! `_matterc._udp` with the pairing hints, operational nodes
//! `_matter._tcp` under an instance name derived from the fabric.

use trellis_types::{FabricId, NodeId, VendorId};

/// Service type of operational advertisements.
pub const OPERATIONAL_SERVICE: &str = "_matter._tcp";

/// Service type of commissionable advertisements.
pub const COMMISSIONABLE_SERVICE: &str = "_matterc._udp";

/// Data behind a commissionable-node advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionableAdvertisement {
    pub device_name: String,
    pub device_type: u32,
    pub discriminator: u16,
    pub vendor_id: VendorId,
    pub product_id: u16,
    /// Commissioning mode: 1 while the basic window is open.
    pub commissioning_mode: u8,
    /// Pairing hint bitmap.
    pub pairing_hint: u16,
    /// Pairing instructions text.
    pub pairing_instructions: String,
    pub port: u16,
}

impl CommissionableAdvertisement {
    /// Instance name: discriminator-scoped, unique per window.
    pub fn instance_name(&self) -> String {
        format!("TRL-{:04X}", self.discriminator)
    }

    /// The TXT records of the advertisement.
    pub fn txt_records(&self) -> Vec<(String, String)> {
        vec![
            ("DN".to_string(), self.device_name.clone()),
            ("DT".to_string(), self.device_type.to_string()),
            ("D".to_string(), self.discriminator.to_string()),
            ("CM".to_string(), self.commissioning_mode.to_string()),
            (
                "VP".to_string(),
                format!("{}+{}", self.vendor_id.as_u16(), self.product_id),
            ),
            ("PH".to_string(), self.pairing_hint.to_string()),
            ("PI".to_string(), self.pairing_instructions.clone()),
        ]
    }
}

/// Data behind an operational-node advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationalAdvertisement {
    /// Compressed fabric identifier (from root key + fabric id).
    pub compressed_fabric_id: u64,
    pub node_id: NodeId,
    pub port: u16,
}

impl OperationalAdvertisement {
    pub fn new(compressed_fabric_id: u64, node_id: NodeId, port: u16) -> Self {
        Self {
            compressed_fabric_id,
            node_id,
            port,
        }
    }

    /// Instance name `<compressed-fabric>-<node>`, both hex.
    pub fn instance_name(&self) -> String {
        format!(
            "{:016X}-{:016X}",
            self.compressed_fabric_id,
            self.node_id.as_u64()
        )
    }
}

/// Derives the compressed fabric id advertised operationally.
pub fn compressed_fabric_id(
    crypto: &dyn trellis_crypto::CryptoProvider,
    root_public_key: &[u8; 32],
    fabric_id: FabricId,
) -> u64 {
    let mut out = [0u8; 8];
    crypto.hkdf_sha256(
        &fabric_id.as_u64().to_be_bytes(),
        root_public_key,
        b"CompressedFabric",
        &mut out,
    );
    u64::from_be_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement() -> CommissionableAdvertisement {
        CommissionableAdvertisement {
            device_name: "Trellis Lamp".into(),
            device_type: 0x0101,
            discriminator: 3840,
            vendor_id: VendorId::new(0xFFF1),
            product_id: 0x8001,
            commissioning_mode: 1,
            pairing_hint: 33,
            pairing_instructions: "Hold the button".into(),
            port: 5540,
        }
    }

    #[test]
    fn txt_records_carry_the_full_key_set() {
        let records = advertisement().txt_records();
        let keys: Vec<&str> = records.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["DN", "DT", "D", "CM", "VP", "PH", "PI"]);

        let get = |key: &str| {
            records
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("D"), "3840");
        assert_eq!(get("VP"), "65521+32769");
        assert_eq!(get("CM"), "1");
    }

    #[test]
    fn operational_instance_name_is_hex_pair() {
        let ad = OperationalAdvertisement::new(0x1122, NodeId::new(0x42), 5540);
        assert_eq!(
            ad.instance_name(),
            "0000000000001122-0000000000000042"
        );
    }

    #[test]
    fn compressed_fabric_id_is_deterministic() {
        let crypto = trellis_crypto::SoftwareCrypto::seeded(1);
        let a = compressed_fabric_id(&crypto, &[1; 32], FabricId::new(7));
        let b = compressed_fabric_id(&crypto, &[1; 32], FabricId::new(7));
        let c = compressed_fabric_id(&crypto, &[2; 32], FabricId::new(7));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
