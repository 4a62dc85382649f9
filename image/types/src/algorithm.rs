/*++

Licensed under the Apache-2.0 license.

File Name:

   algorithm.rs

Abstract:

    Signing algorithms, RSA sizes, hash kinds and SoC variants.

--*/

use core::fmt;
use core::str::FromStr;
use serde_derive::Deserialize;
use socsec_error::{SocsecError, SocsecResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HashKind {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashKind {
    pub const fn digest_len(&self) -> usize {
        match self {
            HashKind::Sha224 => 28,
            HashKind::Sha256 => 32,
            HashKind::Sha384 => 48,
            HashKind::Sha512 => 64,
        }
    }

    /// Two bit code used by both the OTP config and the COT info word
    pub const fn code(&self) -> u32 {
        match self {
            HashKind::Sha224 => 0,
            HashKind::Sha256 => 1,
            HashKind::Sha384 => 2,
            HashKind::Sha512 => 3,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code & 0x3 {
            0 => HashKind::Sha224,
            1 => HashKind::Sha256,
            2 => HashKind::Sha384,
            _ => HashKind::Sha512,
        }
    }

    fn from_bits_str(bits: &str) -> Option<Self> {
        match bits {
            "224" => Some(HashKind::Sha224),
            "256" => Some(HashKind::Sha256),
            "384" => Some(HashKind::Sha384),
            "512" => Some(HashKind::Sha512),
            _ => None,
        }
    }

    pub const fn bits(&self) -> u32 {
        (self.digest_len() * 8) as u32
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SHA{}", self.bits())
    }
}

impl FromStr for HashKind {
    type Err = SocsecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("SHA")
            .and_then(Self::from_bits_str)
            .ok_or(SocsecError::ARG_INVALID_ALGORITHM)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RsaSize {
    Rsa1024,
    Rsa2048,
    Rsa3072,
    Rsa4096,
}

impl RsaSize {
    pub const fn signature_len(&self) -> usize {
        match self {
            RsaSize::Rsa1024 => 128,
            RsaSize::Rsa2048 => 256,
            RsaSize::Rsa3072 => 384,
            RsaSize::Rsa4096 => 512,
        }
    }

    /// Size of a modulus plus exponent blob
    pub const fn public_key_len(&self) -> usize {
        2 * self.signature_len()
    }

    pub const fn bits(&self) -> u32 {
        (self.signature_len() * 8) as u32
    }

    /// Two bit code used by key descriptors, OTP config and COT info words
    pub const fn code(&self) -> u32 {
        match self {
            RsaSize::Rsa1024 => 0,
            RsaSize::Rsa2048 => 1,
            RsaSize::Rsa3072 => 2,
            RsaSize::Rsa4096 => 3,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code & 0x3 {
            0 => RsaSize::Rsa1024,
            1 => RsaSize::Rsa2048,
            2 => RsaSize::Rsa3072,
            _ => RsaSize::Rsa4096,
        }
    }

    /// Exact modulus bit length to size; anything else is rejected
    pub fn from_modulus_bits(bits: usize) -> SocsecResult<Self> {
        match bits {
            1024 => Ok(RsaSize::Rsa1024),
            2048 => Ok(RsaSize::Rsa2048),
            3072 => Ok(RsaSize::Rsa3072),
            4096 => Ok(RsaSize::Rsa4096),
            _ => Err(SocsecError::KEY_SIZE_UNSUPPORTED),
        }
    }

    fn from_bits_str(bits: &str) -> Option<Self> {
        match bits {
            "1024" => Some(RsaSize::Rsa1024),
            "2048" => Some(RsaSize::Rsa2048),
            "3072" => Some(RsaSize::Rsa3072),
            "4096" => Some(RsaSize::Rsa4096),
            _ => None,
        }
    }
}

impl fmt::Display for RsaSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RSA{}", self.bits())
    }
}

/// Secure boot algorithm
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Algorithm {
    RsaSha { rsa: RsaSize, hash: HashKind },
    AesRsaSha { rsa: RsaSize, hash: HashKind },
    AesGcm,
    HashBinding { hash: HashKind },
}

const COT_INFO_RSA_SHA: u32 = 1;
const COT_INFO_HASH_SHIFT: u32 = 1;
const COT_INFO_RSA_SHIFT: u32 = 3;
const COT_INFO_EXP_SHIFT: u32 = 20;

impl Algorithm {
    pub fn rsa_size(&self) -> Option<RsaSize> {
        match self {
            Algorithm::RsaSha { rsa, .. } | Algorithm::AesRsaSha { rsa, .. } => Some(*rsa),
            Algorithm::AesGcm | Algorithm::HashBinding { .. } => None,
        }
    }

    pub fn hash_kind(&self) -> Option<HashKind> {
        match self {
            Algorithm::RsaSha { hash, .. }
            | Algorithm::AesRsaSha { hash, .. }
            | Algorithm::HashBinding { hash } => Some(*hash),
            Algorithm::AesGcm => None,
        }
    }

    /// Signature bytes, 0 for algorithms without an RSA signature
    pub fn signature_len(&self) -> usize {
        self.rsa_size().map_or(0, |rsa| rsa.signature_len())
    }

    pub fn public_key_len(&self) -> usize {
        self.rsa_size().map_or(0, |rsa| rsa.public_key_len())
    }

    pub fn digest_len(&self) -> usize {
        self.hash_kind().map_or(0, |hash| hash.digest_len())
    }

    /// Encode the COT info word describing this link algorithm
    pub fn cot_info(&self, exp_bits: u32) -> SocsecResult<u32> {
        match self {
            Algorithm::RsaSha { rsa, hash } => Ok(COT_INFO_RSA_SHA
                | (hash.code() << COT_INFO_HASH_SHIFT)
                | (rsa.code() << COT_INFO_RSA_SHIFT)
                | (exp_bits << COT_INFO_EXP_SHIFT)),
            Algorithm::HashBinding { hash } => Ok(hash.code() << COT_INFO_HASH_SHIFT),
            Algorithm::AesRsaSha { .. } | Algorithm::AesGcm => {
                Err(SocsecError::ARG_COT_ALGORITHM_UNSUPPORTED)
            }
        }
    }

    /// Decode a COT info word. Never fails: every bit pattern names an algorithm.
    pub fn from_cot_info(info: u32) -> Self {
        let hash = HashKind::from_code(info >> COT_INFO_HASH_SHIFT);
        if info & COT_INFO_RSA_SHA != 0 {
            Algorithm::RsaSha {
                rsa: RsaSize::from_code(info >> COT_INFO_RSA_SHIFT),
                hash,
            }
        } else {
            Algorithm::HashBinding { hash }
        }
    }

    /// Exponent bit length carried in an RSA_SHA COT info word
    pub fn cot_info_exp_bits(info: u32) -> u32 {
        info >> COT_INFO_EXP_SHIFT
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::RsaSha { rsa, hash } => write!(f, "{rsa}_{hash}"),
            Algorithm::AesRsaSha { rsa, hash } => write!(f, "AES_{rsa}_{hash}"),
            Algorithm::AesGcm => f.write_str("AES_GCM"),
            Algorithm::HashBinding { hash } => write!(f, "{hash}"),
        }
    }
}

fn parse_rsa_sha(s: &str) -> Option<(RsaSize, HashKind)> {
    let (rsa, hash) = s.strip_prefix("RSA")?.split_once("_SHA")?;
    Some((RsaSize::from_bits_str(rsa)?, HashKind::from_bits_str(hash)?))
}

impl FromStr for Algorithm {
    type Err = SocsecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "AES_GCM" {
            return Ok(Algorithm::AesGcm);
        }
        if let Some((rsa, hash)) = s.strip_prefix("AES_").and_then(parse_rsa_sha) {
            return Ok(Algorithm::AesRsaSha { rsa, hash });
        }
        if let Some((rsa, hash)) = parse_rsa_sha(s) {
            return Ok(Algorithm::RsaSha { rsa, hash });
        }
        s.parse::<HashKind>()
            .map(|hash| Algorithm::HashBinding { hash })
            .map_err(|_| SocsecError::ARG_INVALID_ALGORITHM)
    }
}

/// Byte order of RSA material in images and OTP
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrder {
    #[default]
    Little,
    Big,
}

impl KeyOrder {
    /// Reverse `bytes` in place for little order
    pub fn apply(&self, bytes: &mut [u8]) {
        if *self == KeyOrder::Little {
            bytes.reverse();
        }
    }
}

impl fmt::Display for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrder::Little => f.write_str("little"),
            KeyOrder::Big => f.write_str("big"),
        }
    }
}

impl FromStr for KeyOrder {
    type Err = SocsecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "little" => Ok(KeyOrder::Little),
            "big" => Ok(KeyOrder::Big),
            _ => Err(SocsecError::ARG_INVALID_KEY_ORDER),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SocVersion {
    #[default]
    Ast2600,
    Ast2605,
    Ast1030,
}

impl SocVersion {
    pub const fn default_header_offset(&self) -> u32 {
        match self {
            SocVersion::Ast2600 | SocVersion::Ast2605 => 0x20,
            SocVersion::Ast1030 => 0x400,
        }
    }

    pub const fn default_enc_offset(&self) -> u32 {
        match self {
            SocVersion::Ast2600 | SocVersion::Ast2605 => 0x50,
            SocVersion::Ast1030 => 0x430,
        }
    }

    /// Largest BL1 input accepted by the boot ROM.
    ///
    /// On 2600/2605 the last 4 KiB of the 64 KiB verifiable region may be
    /// used as stack unless the caller opts out.
    pub const fn max_bl1_len(&self, stack_intersects_verification_region: bool) -> usize {
        match self {
            SocVersion::Ast2600 | SocVersion::Ast2605 => {
                if stack_intersects_verification_region {
                    60 * 1024
                } else {
                    64 * 1024 - 512
                }
            }
            SocVersion::Ast1030 => 768 * 1024,
        }
    }

    pub const fn default_flash_patch_offset(&self) -> u32 {
        match self {
            SocVersion::Ast2605 => 0x50,
            SocVersion::Ast2600 | SocVersion::Ast1030 => 0,
        }
    }
}

impl fmt::Display for SocVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocVersion::Ast2600 => f.write_str("2600"),
            SocVersion::Ast2605 => f.write_str("2605"),
            SocVersion::Ast1030 => f.write_str("1030"),
        }
    }
}

impl FromStr for SocVersion {
    type Err = SocsecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2600" => Ok(SocVersion::Ast2600),
            "2605" => Ok(SocVersion::Ast2605),
            "1030" => Ok(SocVersion::Ast1030),
            _ => Err(SocsecError::ARG_INVALID_SOC_VERSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(
            "RSA4096_SHA512".parse::<Algorithm>(),
            Ok(Algorithm::RsaSha {
                rsa: RsaSize::Rsa4096,
                hash: HashKind::Sha512
            })
        );
        assert_eq!(
            "AES_RSA2048_SHA256".parse::<Algorithm>(),
            Ok(Algorithm::AesRsaSha {
                rsa: RsaSize::Rsa2048,
                hash: HashKind::Sha256
            })
        );
        assert_eq!("AES_GCM".parse::<Algorithm>(), Ok(Algorithm::AesGcm));
        assert_eq!(
            "SHA384".parse::<Algorithm>(),
            Ok(Algorithm::HashBinding {
                hash: HashKind::Sha384
            })
        );
    }

    #[test]
    fn test_parse_algorithm_invalid() {
        for name in [
            "NONE",
            "RSA1000_SHA256",
            "RSA2048_SHA1",
            "AES_GCM256",
            "SHA2566",
            "RSA2048_SHA256X",
            "aes_gcm",
            "AES_SHA256",
        ] {
            assert_eq!(
                name.parse::<Algorithm>(),
                Err(SocsecError::ARG_INVALID_ALGORITHM),
                "{name}"
            );
        }
    }

    #[test]
    fn test_algorithm_display_roundtrip() {
        for name in ["RSA1024_SHA224", "AES_RSA3072_SHA384", "AES_GCM", "SHA512"] {
            assert_eq!(name.parse::<Algorithm>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_algorithm_sizes() {
        let alg: Algorithm = "RSA3072_SHA384".parse().unwrap();
        assert_eq!(alg.signature_len(), 384);
        assert_eq!(alg.public_key_len(), 768);
        assert_eq!(alg.digest_len(), 48);
        assert_eq!(Algorithm::AesGcm.signature_len(), 0);
        assert_eq!(Algorithm::AesGcm.digest_len(), 0);
    }

    #[test]
    fn test_cot_info() {
        let alg: Algorithm = "RSA2048_SHA256".parse().unwrap();
        assert_eq!(alg.cot_info(17).unwrap(), 1 | (1 << 1) | (1 << 3) | (17 << 20));
        assert_eq!(Algorithm::from_cot_info(alg.cot_info(17).unwrap()), alg);
        assert_eq!(Algorithm::cot_info_exp_bits(alg.cot_info(17).unwrap()), 17);

        let alg: Algorithm = "SHA512".parse().unwrap();
        assert_eq!(alg.cot_info(0).unwrap(), 3 << 1);
        assert_eq!(Algorithm::from_cot_info(3 << 1), alg);

        assert_eq!(
            Algorithm::AesGcm.cot_info(0),
            Err(SocsecError::ARG_COT_ALGORITHM_UNSUPPORTED)
        );
    }

    #[test]
    fn test_key_order() {
        assert_eq!("big".parse::<KeyOrder>(), Ok(KeyOrder::Big));
        assert_eq!(
            "Big".parse::<KeyOrder>(),
            Err(SocsecError::ARG_INVALID_KEY_ORDER)
        );
        let mut bytes = [1u8, 2, 3];
        KeyOrder::Big.apply(&mut bytes);
        assert_eq!(bytes, [1, 2, 3]);
        KeyOrder::Little.apply(&mut bytes);
        assert_eq!(bytes, [3, 2, 1]);
    }

    #[test]
    fn test_soc_version() {
        let soc: SocVersion = "1030".parse().unwrap();
        assert_eq!(soc.default_header_offset(), 0x400);
        assert_eq!(soc.default_enc_offset(), 0x430);
        assert_eq!(soc.max_bl1_len(false), 768 * 1024);
        assert_eq!(SocVersion::Ast2600.max_bl1_len(true), 60 * 1024);
        assert_eq!(SocVersion::Ast2600.max_bl1_len(false), 65024);
        assert_eq!(SocVersion::Ast2605.default_flash_patch_offset(), 0x50);
        assert!("2700".parse::<SocVersion>().is_err());
    }
}
