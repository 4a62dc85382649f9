/*++

Licensed under the Apache-2.0 license.

File Name:

   config.rs

Abstract:

    OTP config document and its validation against the field tables.

--*/

use std::collections::BTreeMap;

use log::error;
use serde_derive::Deserialize;
use serde_json::Value;
use socsec_error::{SocsecError, SocsecResult};
use socsec_image_types::{KeyOrder, KeyType, OtpRevision};

use crate::info::{FieldInfo, FieldKind, OtpInfo};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtpConfig {
    pub name: String,

    pub version: String,

    /// A3 only
    #[serde(default)]
    pub rsa_key_order: Option<KeyOrder>,

    #[serde(default)]
    pub data_region: Option<DataRegionConfig>,

    #[serde(default)]
    pub config_region: Option<BTreeMap<String, Value>>,

    #[serde(default)]
    pub otp_strap: Option<BTreeMap<String, StrapEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataRegionConfig {
    pub ecc_region: bool,

    /// Allow writes into the patch reserved range
    #[serde(default)]
    pub patch: bool,

    #[serde(default)]
    pub key: Vec<KeyConfig>,

    #[serde(default)]
    pub user_data: Vec<UserDataConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    pub types: KeyType,

    pub offset: String,

    #[serde(default)]
    pub number_id: Option<i64>,

    #[serde(default)]
    pub key_pem: Option<String>,

    #[serde(default)]
    pub key_bin: Option<String>,

    #[serde(default)]
    pub key_bin2: Option<String>,

    #[serde(default)]
    pub iv_bin: Option<String>,

    /// Informational only
    #[serde(default)]
    pub sha_mode: Option<String>,

    /// Informational only
    #[serde(default)]
    pub key_length: Option<u32>,

    /// Informational only
    #[serde(default)]
    pub rsa_pem: Option<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDataType {
    /// Raw bytes
    Bin,
    /// Text of 8 digit words, each stored little endian
    DwHex,
    /// Plain hex text
    Hex,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserDataConfig {
    pub types: UserDataType,
    pub file: String,
    pub offset: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrapEntry {
    pub value: Value,

    #[serde(default)]
    pub otp_protect: bool,

    #[serde(default)]
    pub reg_protect: bool,

    #[serde(default)]
    pub ignore: bool,
}

/// What a config or strap value programs into its field
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FieldSetting {
    Bit(bool),
    /// `bit_length` bits at the field offset
    Pattern(u64),
    /// A single set bit, relative to the field offset
    Shift(usize),
}

const SHA_MODES: [&str; 4] = ["SHA224", "SHA256", "SHA384", "SHA512"];

impl OtpConfig {
    pub fn from_json(text: &str) -> SocsecResult<Self> {
        serde_json::from_str(text).map_err(|err| {
            error!("OTP config: {err}");
            SocsecError::SCHEMA_INVALID_DOCUMENT
        })
    }

    pub fn revision(&self) -> SocsecResult<OtpRevision> {
        self.version.parse()
    }

    /// Key order of RSA keys in the data region
    pub fn key_order(&self) -> KeyOrder {
        self.rsa_key_order.unwrap_or_default()
    }

    /// Check every value against the schema and the revision's field tables
    pub fn validate(&self, info: &OtpInfo) -> SocsecResult<()> {
        if self.rsa_key_order.is_some() && !info.revision.supports_key_order() {
            error!("rsa_key_order is not supported by {}", info.revision);
            Err(SocsecError::SCHEMA_KEY_ORDER_NOT_ALLOWED)?;
        }

        if let Some(data) = &self.data_region {
            for key in &data.key {
                key.validate(info.revision)?;
            }
            for user_data in &data.user_data {
                parse_hex(&user_data.offset)?;
            }
        }

        for (key, value) in self.config_region.iter().flatten() {
            let field = info.config_field(key).ok_or_else(|| {
                error!("\"{key}\" config is not supported");
                SocsecError::SCHEMA_UNKNOWN_CONFIG_FIELD
            })?;
            field_setting(field, value)?;
        }

        for (key, entry) in self.otp_strap.iter().flatten() {
            let field = info.strap_field(key).ok_or_else(|| {
                error!("\"{key}\" strap is not supported");
                SocsecError::SCHEMA_UNKNOWN_STRAP_FIELD
            })?;
            field_setting(field, &entry.value)?;
        }
        Ok(())
    }
}

impl KeyConfig {
    pub fn id(&self) -> u32 {
        self.number_id.unwrap_or(0) as u32
    }

    fn validate(&self, revision: OtpRevision) -> SocsecResult<()> {
        parse_hex(&self.offset)?;
        if let Some(id) = self.number_id {
            if !(0..=7).contains(&id) {
                error!("number_id {id} is out of range");
                Err(SocsecError::SCHEMA_INVALID_NUMBER_ID)?;
            }
        }
        if let Some(sha) = &self.sha_mode {
            if !SHA_MODES.contains(&sha.as_str()) {
                Err(SocsecError::SCHEMA_INVALID_ENUM_VALUE)?;
            }
        }

        let files_present = match self.types {
            KeyType::RsaOem | KeyType::RsaSocPub | KeyType::RsaSocPri => self.key_pem.is_some(),
            KeyType::AesOem | KeyType::AesVault if revision.aes_key_has_iv() => {
                self.key_bin.is_some() && self.iv_bin.is_some()
            }
            KeyType::AesVault => self.key_bin.is_some() && self.key_bin2.is_some(),
            KeyType::AesOem => self.key_bin.is_some(),
        };
        if !files_present {
            error!("{} key at {} is missing a key file", self.types, self.offset);
            Err(SocsecError::SCHEMA_MISSING_KEY_FILE)?;
        }
        Ok(())
    }
}

/// Parse a `0x` prefixed hex string
pub fn parse_hex(text: &str) -> SocsecResult<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(|| {
            error!("\"{text}\" is not a hex value");
            SocsecError::SCHEMA_INVALID_HEX_VALUE
        })?;
    u64::from_str_radix(digits, 16).map_err(|_| SocsecError::SCHEMA_VALUE_OUT_OF_RANGE)
}

/// Check `value` against `field` and resolve what it programs
pub fn field_setting(field: &FieldInfo, value: &Value) -> SocsecResult<FieldSetting> {
    let wrong_type = || {
        error!("\"{}\": value has the wrong type", field.key);
        SocsecError::SCHEMA_INVALID_VALUE_TYPE
    };
    match field.kind {
        FieldKind::Boolean => value.as_bool().map(FieldSetting::Bit).ok_or_else(wrong_type),
        FieldKind::String => {
            let name = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => Err(wrong_type())?,
            };
            field.pattern(&name).map(FieldSetting::Pattern).ok_or_else(|| {
                error!("\"{}\": \"{name}\" is not an allowed value", field.key);
                SocsecError::SCHEMA_INVALID_ENUM_VALUE
            })
        }
        FieldKind::Hex => {
            let value = parse_hex(value.as_str().ok_or_else(wrong_type)?)?;
            if field.bit_length < 64 && value >> field.bit_length != 0 {
                error!("\"{}\": config value out of range", field.key);
                Err(SocsecError::SCHEMA_VALUE_OUT_OF_RANGE)?;
            }
            Ok(FieldSetting::Pattern(value))
        }
        FieldKind::BitShift => {
            let value = value.as_i64().ok_or_else(wrong_type)?;
            let shift = value - field.value_start as i64;
            if shift < 0 || shift >= field.bit_length as i64 {
                error!("\"{}\": value is out of range", field.key);
                Err(SocsecError::SCHEMA_VALUE_OUT_OF_RANGE)?;
            }
            Ok(FieldSetting::Shift(shift as usize))
        }
    }
}
