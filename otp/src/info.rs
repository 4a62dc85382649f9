/*++

Licensed under the Apache-2.0 license.

File Name:

   info.rs

Abstract:

    Per revision tables of the config and strap fields.

--*/

use serde_derive::Deserialize;
use socsec_error::{SocsecError, SocsecResult};
use socsec_image_types::{OtpLayout, OtpRevision};

const INFO_A0: &str = include_str!("info/a0.json");
const INFO_A1: &str = include_str!("info/a1.json");
const INFO_A2: &str = include_str!("info/a2.json");
const INFO_A3: &str = include_str!("info/a3.json");
const INFO_1030A0: &str = include_str!("info/1030a0.json");

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Boolean,
    /// Named values, each stored as a `bit_length` bit pattern
    String,
    Hex,
    /// Sets the single bit `value - value_start`
    BitShift,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldValue {
    pub bit: u64,
    pub value: String,
}

/// One named field of the config or strap region
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldInfo {
    pub key: String,

    #[serde(rename = "type")]
    pub kind: FieldKind,

    /// Config fields only; strap offsets count from bit 0 of the region
    #[serde(default)]
    pub dw_offset: usize,

    pub bit_offset: usize,

    #[serde(default = "one")]
    pub bit_length: usize,

    #[serde(default)]
    pub value_start: u64,

    #[serde(default)]
    pub value: Vec<FieldValue>,

    /// Booleans programmed when the config does not name them
    #[serde(default)]
    pub default: Option<bool>,

    #[serde(default)]
    pub info: Option<String>,
}

fn one() -> usize {
    1
}

impl FieldInfo {
    /// Absolute bit offset within the region
    pub fn offset(&self) -> usize {
        self.dw_offset * 32 + self.bit_offset
    }

    /// Bit pattern of a named value
    pub fn pattern(&self, value: &str) -> Option<u64> {
        self.value
            .iter()
            .find(|v| v.value == value)
            .map(|v| v.bit)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InfoTables {
    config: Vec<FieldInfo>,
    strap: Vec<FieldInfo>,
}

/// Field tables and region sizes of one OTP revision
#[derive(Debug, Clone)]
pub struct OtpInfo {
    pub revision: OtpRevision,
    pub layout: OtpLayout,
    pub config: Vec<FieldInfo>,
    pub strap: Vec<FieldInfo>,
}

impl OtpInfo {
    pub fn load(revision: OtpRevision) -> SocsecResult<Self> {
        let text = match revision {
            OtpRevision::A0 => INFO_A0,
            OtpRevision::A1 => INFO_A1,
            OtpRevision::A2 => INFO_A2,
            OtpRevision::A3 => INFO_A3,
            OtpRevision::Ast1030A0 => INFO_1030A0,
        };
        let tables: InfoTables =
            serde_json::from_str(text).map_err(|_| SocsecError::INTERNAL)?;
        Ok(Self {
            revision,
            layout: revision.layout(),
            config: tables.config,
            strap: tables.strap,
        })
    }

    pub fn config_field(&self, key: &str) -> Option<&FieldInfo> {
        self.config.iter().find(|field| field.key == key)
    }

    pub fn strap_field(&self, key: &str) -> Option<&FieldInfo> {
        self.strap.iter().find(|field| field.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVISIONS: [OtpRevision; 5] = [
        OtpRevision::A0,
        OtpRevision::A1,
        OtpRevision::A2,
        OtpRevision::A3,
        OtpRevision::Ast1030A0,
    ];

    #[test]
    fn test_tables_load() {
        for revision in REVISIONS {
            let info = OtpInfo::load(revision).unwrap();
            assert!(!info.config.is_empty(), "{revision}");
            assert!(!info.strap.is_empty(), "{revision}");
        }
    }

    #[test]
    fn test_tables_fit_regions() {
        for revision in REVISIONS {
            let info = OtpInfo::load(revision).unwrap();
            for field in &info.config {
                assert!(field.bit_offset < 32, "{revision} {}", field.key);
                assert!(
                    field.offset() + field.bit_length <= info.layout.config_region_size * 8,
                    "{revision} {}",
                    field.key
                );
                for value in &field.value {
                    assert!(value.bit < 1 << field.bit_length, "{revision} {}", field.key);
                }
            }
            for field in &info.strap {
                assert_eq!(field.dw_offset, 0);
                assert!(
                    field.bit_offset + field.bit_length <= info.layout.strap_bit_size,
                    "{revision} {}",
                    field.key
                );
            }
        }
    }

    #[test]
    fn test_secure_boot_fields() {
        // Positions the field verifier reads back
        for revision in REVISIONS {
            let info = OtpInfo::load(revision).unwrap();
            let field = |key| info.config_field(key).unwrap().offset();
            assert_eq!(field("Secure Boot Mode"), 7);
            assert_eq!(field("RSA Mode"), 10);
            assert_eq!(field("SHA Mode"), 12);
            assert_eq!(field("Secure Boot Header Offset"), 64);
            assert_eq!(field("Key Retire"), 96);
        }
        let a1 = OtpInfo::load(OtpRevision::A1).unwrap();
        assert_eq!(a1.config_field("Enable Image Encryption").unwrap().offset(), 27);
        assert_eq!(a1.config_field("RSA Mode").unwrap().pattern("RSA4096"), Some(3));
        assert_eq!(a1.config_field("RSA Mode").unwrap().pattern("RSA512"), None);
    }
}
