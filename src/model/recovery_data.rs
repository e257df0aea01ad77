use serde::{Deserialize, Serialize};

/// Payload kind of a recovery blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryDataType {
    /// Key pairs of a data owner (and possibly its parents)
    #[serde(rename = "KEYPAIR_RECOVERY")]
    KeypairRecovery,
    /// Exchange keys for a data owner that has no key yet
    #[serde(rename = "EXCHANGE_KEY_RECOVERY")]
    ExchangeKeyRecovery,
}

/// Server-stored, single-use recovery blob
///
/// The id is `hex(sha256(recoveryKey))`, so only the holder of the key can
/// find and open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryData {
    /// Blob id
    pub id: String,
    /// Revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Data owner that may consume the blob
    pub recipient: String,
    /// AES-256-GCM sealed payload (base64)
    pub encrypted_self: String,
    /// Payload kind
    #[serde(rename = "type")]
    pub data_type: RecoveryDataType,
    /// Expiry instant (epoch millis), absent when it never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_instant: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WireEntity;

    #[test]
    fn test_wire_shape() {
        let data = RecoveryData {
            id: "abc".into(),
            rev: None,
            recipient: "p-1".into(),
            encrypted_self: "AAAA".into(),
            data_type: RecoveryDataType::KeypairRecovery,
            expiration_instant: Some(42),
        };
        let json = data.to_json().unwrap();

        assert!(json.contains("\"type\":\"KEYPAIR_RECOVERY\""));
        assert!(json.contains("\"encryptedSelf\""));
        assert!(json.contains("\"expirationInstant\":42"));
        assert_eq!(RecoveryData::from_json(&json).unwrap(), data);
    }
}
