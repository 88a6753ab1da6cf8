//! Persisted login-tree node types.
//!
//! A [`LoginStash`] is ciphertext-only: identifiers are plaintext, every
//! secret sits inside an `EncryptedBox`. The stash mirrors the authority's
//! view of the account plus a handful of local-only fields (`username`,
//! `pin2_key`, `recovery2_key`) that never travel in server payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptedBox, Snrp};

/// Serde codec for binary fields: base64 strings on the wire and on disk.
pub(crate) mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(serde::de::Error::custom)
    }
}

/// Same codec for optional binary fields.
pub(crate) mod b64_opt {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => {
                ser.serialize_some(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(de)?;
        match text {
            Some(text) => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Lifecycle of a device-approval voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoucherStatus {
    Pending,
    Approved,
    Rejected,
}

/// A pending device-approval request attached to a login node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub voucher_id: String,
    pub status: VoucherStatus,
    /// Earliest time an auto-approval path may honor the voucher.
    pub activates: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub device_description: Option<String>,
    pub ip: Option<String>,
    pub ip_description: Option<String>,
}

/// One persisted login-tree node.
///
/// Every node except the root carries a `parent_box` wrapping its login
/// key under the parent's login key; `login_id` is unique across the tree
/// and `app_id` is unique among siblings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginStash {
    #[serde(with = "b64")]
    pub login_id: Vec<u8>,
    /// Local only: which username this device knows the root under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub app_id: String,
    #[serde(with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_box: Option<EncryptedBox>,

    // Password factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_auth_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_key_snrp: Option<Snrp>,

    // PIN factor. `pin2_key` is local only; the boxes sync.
    #[serde(with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub pin2_key: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin2_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin2_key_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin2_text_box: Option<EncryptedBox>,

    // Recovery factor. `recovery2_key` is local only.
    #[serde(with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub recovery2_key: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question2_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery2_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery2_key_box: Option<EncryptedBox>,

    // Key login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_auth_box: Option<EncryptedBox>,

    // Wallet key material.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_boxes: Vec<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_key_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_key_box: Option<EncryptedBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_text_box: Option<EncryptedBox>,

    // OTP enrollment. Presence of `otp_key` makes OTP mandatory here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_reset_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_timeout: Option<u32>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending_vouchers: Vec<Voucher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LoginStash>,
}

impl LoginStash {
    /// A bare node with just identifiers filled in.
    pub fn new(login_id: Vec<u8>, app_id: impl Into<String>) -> Self {
        Self {
            login_id,
            app_id: app_id.into(),
            ..Default::default()
        }
    }

    /// True when some online factor can prove this node to the authority.
    pub fn key_login_enabled(&self) -> bool {
        self.login_auth_box.is_some() || self.password_auth_box.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stash_serde_roundtrip() {
        let mut stash = LoginStash::new(vec![1u8; 32], "co.example.app");
        stash.username = Some("alice".into());
        stash.pin2_key = Some(vec![2u8; 32]);
        stash.children.push(LoginStash::new(vec![3u8; 32], "co.example.app.child"));

        let json = serde_json::to_string(&stash).unwrap();
        let parsed: LoginStash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stash);
    }

    #[test]
    fn binary_fields_encode_as_base64() {
        let stash = LoginStash::new(vec![0xffu8; 4], "");
        let json = serde_json::to_value(&stash).unwrap();
        assert_eq!(json["loginId"], "/////w==");
    }

    #[test]
    fn absent_fields_stay_off_disk() {
        let stash = LoginStash::new(vec![1u8; 32], "");
        let json = serde_json::to_value(&stash).unwrap();
        let map = json.as_object().unwrap();
        assert!(!map.contains_key("passwordBox"));
        assert!(!map.contains_key("pin2Key"));
        assert!(!map.contains_key("children"));
    }

    #[test]
    fn key_login_enabled_tracks_auth_boxes() {
        use crate::crypto::encryption::random_key;

        let mut stash = LoginStash::new(vec![1u8; 32], "");
        assert!(!stash.key_login_enabled());

        let key = random_key();
        stash.login_auth_box = Some(EncryptedBox::encrypt(b"auth", &key).unwrap());
        assert!(stash.key_login_enabled());
    }
}
