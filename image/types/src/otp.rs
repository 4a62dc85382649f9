/*++

Licensed under the Apache-2.0 license.

File Name:

   otp.rs

Abstract:

    OTP revisions, key types and the key header descriptor word.

--*/

use crate::KeyOrder;
use core::fmt;
use core::str::FromStr;
use serde_derive::Deserialize;
use socsec_error::{SocsecError, SocsecResult};

/// OTP memory revision
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OtpRevision {
    A0,
    A1,
    A2,
    A3,
    Ast1030A0,
}

/// Sizes of the OTP regions
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OtpLayout {
    pub data_region_size: usize,
    pub ecc_region_offset: usize,
    pub config_region_size: usize,
    pub strap_bit_size: usize,
}

impl OtpLayout {
    pub const fn strap_region_size(&self) -> usize {
        self.strap_bit_size / 8
    }
}

const OTP_LAYOUT: OtpLayout = OtpLayout {
    data_region_size: 8192,
    ecc_region_offset: 7168,
    config_region_size: 64,
    strap_bit_size: 64,
};

impl OtpRevision {
    pub const fn name(&self) -> &'static str {
        match self {
            OtpRevision::A0 => "A0",
            OtpRevision::A1 => "A1",
            OtpRevision::A2 => "A2",
            OtpRevision::A3 => "A3",
            OtpRevision::Ast1030A0 => "1030A0",
        }
    }

    /// Version field of the OTP image header, zero padded
    pub fn version_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        let name = self.name().as_bytes();
        bytes[..name.len()].copy_from_slice(name);
        bytes
    }

    /// Recover the revision from an OTP image version field
    pub fn from_version_bytes(version: &[u8]) -> SocsecResult<Self> {
        if version.starts_with(b"1030A0") {
            return Ok(OtpRevision::Ast1030A0);
        }
        match version.get(..2) {
            Some(b"A0") => Ok(OtpRevision::A0),
            Some(b"A1") => Ok(OtpRevision::A1),
            Some(b"A2") => Ok(OtpRevision::A2),
            Some(b"A3") => Ok(OtpRevision::A3),
            _ => Err(SocsecError::OTP_UNSUPPORTED_REVISION),
        }
    }

    pub const fn layout(&self) -> OtpLayout {
        OTP_LAYOUT
    }

    /// Only A3 parts can hold big endian RSA keys
    pub const fn supports_key_order(&self) -> bool {
        matches!(self, OtpRevision::A3)
    }

    /// A0 stores an IV after AES keys; later parts store a second key
    pub const fn aes_key_has_iv(&self) -> bool {
        matches!(self, OtpRevision::A0)
    }
}

impl fmt::Display for OtpRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OtpRevision {
    type Err = SocsecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A0" => Ok(OtpRevision::A0),
            "A1" => Ok(OtpRevision::A1),
            "A2" => Ok(OtpRevision::A2),
            "A3" => Ok(OtpRevision::A3),
            "1030A0" => Ok(OtpRevision::Ast1030A0),
            _ => Err(SocsecError::OTP_UNSUPPORTED_REVISION),
        }
    }
}

/// Kind of key stored in the OTP data region
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize)]
pub enum KeyType {
    #[serde(rename = "aes_oem")]
    AesOem,
    #[serde(rename = "aes_vault")]
    AesVault,
    #[serde(rename = "rsa_pub_oem")]
    RsaOem,
    #[serde(rename = "rsa_pub_aes")]
    RsaSocPub,
    #[serde(rename = "rsa_priv_aes")]
    RsaSocPri,
}

impl KeyType {
    pub const fn is_rsa(&self) -> bool {
        matches!(self, KeyType::RsaOem | KeyType::RsaSocPub | KeyType::RsaSocPri)
    }

    /// Stores the private exponent instead of the public one
    pub const fn is_private(&self) -> bool {
        matches!(self, KeyType::RsaSocPri)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::AesOem => "AES_OEM",
            KeyType::AesVault => "AES_VAULT",
            KeyType::RsaOem => "RSA_OEM",
            KeyType::RsaSocPub => "RSA_SOC_PUB",
            KeyType::RsaSocPri => "RSA_SOC_PRI",
        };
        f.write_str(name)
    }
}

/// Key type code table of one revision
#[derive(Debug, Eq, PartialEq)]
pub struct KeyTypeTable {
    entries: [(KeyType, u32); 5],
}

static KEY_TYPES_A0: KeyTypeTable = KeyTypeTable {
    entries: [
        (KeyType::AesOem, 0x0),
        (KeyType::AesVault, 0x1),
        (KeyType::RsaOem, 0x8),
        (KeyType::RsaSocPub, 0xa),
        (KeyType::RsaSocPri, 0xe),
    ],
};

static KEY_TYPES_A1: KeyTypeTable = KeyTypeTable {
    entries: [
        (KeyType::AesVault, 0x1),
        (KeyType::AesOem, 0x2),
        (KeyType::RsaOem, 0x8),
        (KeyType::RsaSocPub, 0xa),
        (KeyType::RsaSocPri, 0xe),
    ],
};

static KEY_TYPES_A3_LITTLE: KeyTypeTable = KeyTypeTable {
    entries: [
        (KeyType::AesVault, 0x1),
        (KeyType::AesOem, 0x2),
        (KeyType::RsaOem, 0x8),
        (KeyType::RsaSocPub, 0xa),
        (KeyType::RsaSocPri, 0xc),
    ],
};

static KEY_TYPES_A3_BIG: KeyTypeTable = KeyTypeTable {
    entries: [
        (KeyType::AesVault, 0x1),
        (KeyType::AesOem, 0x2),
        (KeyType::RsaOem, 0x9),
        (KeyType::RsaSocPub, 0xb),
        (KeyType::RsaSocPri, 0xd),
    ],
};

impl KeyTypeTable {
    pub fn for_revision(revision: OtpRevision, order: KeyOrder) -> &'static KeyTypeTable {
        match (revision, order) {
            (OtpRevision::A0, _) => &KEY_TYPES_A0,
            (OtpRevision::A3, KeyOrder::Little) => &KEY_TYPES_A3_LITTLE,
            (OtpRevision::A3, KeyOrder::Big) => &KEY_TYPES_A3_BIG,
            (OtpRevision::A1 | OtpRevision::A2 | OtpRevision::Ast1030A0, _) => &KEY_TYPES_A1,
        }
    }

    pub fn code(&self, key_type: KeyType) -> u32 {
        self.entries
            .iter()
            .find(|(kind, _)| *kind == key_type)
            .map_or(0, |(_, code)| *code)
    }

    pub fn key_type(&self, code: u32) -> Option<KeyType> {
        self.entries
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(kind, _)| *kind)
    }
}

/// One 32-bit entry of the key header table at the start of the data region
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct KeyDescriptor {
    pub id: u32,
    pub offset: u32,
    pub last: bool,
    pub type_code: u32,
    pub rsa_param: u32,
    pub exp_bits: u32,
}

const KEY_ID_MASK: u32 = 0x7;
const KEY_OFFSET_MASK: u32 = 0x3ff << 3;
const KEY_LAST: u32 = 1 << 13;
const KEY_TYPE_SHIFT: u32 = 14;
const KEY_PARAM_SHIFT: u32 = 18;
const KEY_EXP_SHIFT: u32 = 20;

impl KeyDescriptor {
    pub fn to_word(&self) -> u32 {
        let mut word = (self.id & KEY_ID_MASK) | (self.offset & KEY_OFFSET_MASK);
        if self.last {
            word |= KEY_LAST;
        }
        word | ((self.type_code & 0xf) << KEY_TYPE_SHIFT)
            | ((self.rsa_param & 0x3) << KEY_PARAM_SHIFT)
            | (self.exp_bits << KEY_EXP_SHIFT)
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            id: word & KEY_ID_MASK,
            offset: word & KEY_OFFSET_MASK,
            last: word & KEY_LAST != 0,
            type_code: (word >> KEY_TYPE_SHIFT) & 0xf,
            rsa_param: (word >> KEY_PARAM_SHIFT) & 0x3,
            exp_bits: word >> KEY_EXP_SHIFT,
        }
    }
}

/// Pack an OTP region offset and size into a header info word
pub const fn region_info(offset: usize, size: usize) -> u32 {
    (offset as u32) | ((size as u32) << 16)
}

/// Split a header info word into (offset, size)
pub const fn split_region_info(info: u32) -> (usize, usize) {
    ((info & 0xffff) as usize, (info >> 16) as usize)
}
