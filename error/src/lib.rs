/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains API and macros used by the socsec crates for error handling

--*/
use core::convert::From;
use core::fmt;
use core::num::{NonZeroU32, TryFromIntError};

/// Socsec Error Type
/// Derives debug, copy, clone, eq, and partial eq
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SocsecError(pub NonZeroU32);

/// Error category, encoded in the upper half-word of every error code
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidArgument,
    SchemaValidation,
    RegionOverlap,
    RegionOutOfRange,
    MissingTerminator,
    ChecksumMismatch,
    Alignment,
    SizeLimit,
    SignatureVerify,
    Decrypt,
    UnsupportedVersion,
    SignerHelper,
    InvalidKey,
    InvalidFormat,
    Internal,
}

impl ErrorKind {
    fn from_class(class: u16) -> Self {
        match class {
            0x0001 => ErrorKind::InvalidArgument,
            0x0002 => ErrorKind::SchemaValidation,
            0x0003 => ErrorKind::RegionOverlap,
            0x0004 => ErrorKind::RegionOutOfRange,
            0x0005 => ErrorKind::MissingTerminator,
            0x0006 => ErrorKind::ChecksumMismatch,
            0x0007 => ErrorKind::Alignment,
            0x0008 => ErrorKind::SizeLimit,
            0x0009 => ErrorKind::SignatureVerify,
            0x000a => ErrorKind::Decrypt,
            0x000b => ErrorKind::UnsupportedVersion,
            0x000c => ErrorKind::SignerHelper,
            0x000d => ErrorKind::InvalidKey,
            0x000e => ErrorKind::InvalidFormat,
            _ => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "InvalidArgumentError",
            ErrorKind::SchemaValidation => "SchemaValidationError",
            ErrorKind::RegionOverlap => "RegionOverlapError",
            ErrorKind::RegionOutOfRange => "RegionOutOfRangeError",
            ErrorKind::MissingTerminator => "MissingTerminatorError",
            ErrorKind::ChecksumMismatch => "ChecksumMismatchError",
            ErrorKind::Alignment => "AlignmentError",
            ErrorKind::SizeLimit => "SizeLimitError",
            ErrorKind::SignatureVerify => "SignatureVerifyError",
            ErrorKind::Decrypt => "DecryptError",
            ErrorKind::UnsupportedVersion => "UnsupportedVersionError",
            ErrorKind::SignerHelper => "SignerHelperError",
            ErrorKind::InvalidKey => "InvalidKeyError",
            ErrorKind::InvalidFormat => "InvalidFormatError",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

/// Macro to define error constants ensuring uniqueness
///
/// This macro takes a list of (name, value, doc) tuples and generates
/// constant definitions for each error code.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:literal, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: SocsecError = SocsecError::new_const($value);
        )*

        /// Human readable description of the error code
        pub fn description(&self) -> &'static str {
            match self.0.get() {
                $(
                    $value => $doc,
                )*
                _ => "Unknown error",
            }
        }

        #[cfg(test)]
        /// Returns a vector of all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(&'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }
    };
}

impl SocsecError {
    /// Create a socsec error; intended to only be used from const contexts, as we don't want
    /// runtime panics if val is zero. The preferred way to get a SocsecError from a u32 is to
    /// use `SocsecError::try_from()` from the `TryFrom` trait impl.
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("SocsecError cannot be 0"),
        }
    }

    /// Error category of this code
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_class((self.0.get() >> 16) as u16)
    }

    define_error_constants![
        (ARG_INVALID_ALGORITHM, 0x0001_0001, "Algorithm is invalid"),
        (
            ARG_INVALID_KEY_ORDER,
            0x0001_0002,
            "RSA key order should be 'big' or 'little'"
        ),
        (ARG_INVALID_SOC_VERSION, 0x0001_0003, "SoC version is not available"),
        (
            ARG_ENC_OFFSET_BELOW_HEADER,
            0x0001_0004,
            "The enc_offset should be at least 0x30 more than header_offset"
        ),
        (ARG_MISSING_SIGN_KEY, 0x0001_0005, "Missing sign key"),
        (ARG_MISSING_AES_KEY, 0x0001_0006, "Missing aes_key for AES_RSA_SHA"),
        (
            ARG_MISSING_RSA_AES_KEY,
            0x0001_0007,
            "Missing rsa_aes key when the AES key is not in OTP"
        ),
        (ARG_MISSING_GCM_KEY, 0x0001_0008, "Missing gcm_aes_key for AES_GCM"),
        (
            ARG_COT_ALGORITHM_UNSUPPORTED,
            0x0001_0009,
            "COT only supports RSA_SHA and HASH_BINDING algorithms"
        ),
        (
            ARG_MALFORMED_CHAIN_PARTITION,
            0x0001_000a,
            "Malformed chained partition descriptor"
        ),
        (ARG_INVALID_AES_KEY_LENGTH, 0x0001_000b, "AES key length is invalid"),
        (ARG_EMPTY_CHAIN, 0x0001_000c, "Chain of trust has no partitions"),
        (ARG_MISSING_COT_DATA, 0x0001_000d, "Missing COT verify key or digest"),
        (
            ARG_ALGORITHM_NOT_SIGNING,
            0x0001_000e,
            "Algorithm cannot be used to sign a chain partition"
        ),
        (
            ARG_INVALID_COT_DIGEST_LENGTH,
            0x0001_000f,
            "COT digest length does not match the COT algorithm"
        ),
        (
            SCHEMA_INVALID_DOCUMENT,
            0x0002_0001,
            "OTP config document does not match the schema"
        ),
        (
            SCHEMA_UNKNOWN_CONFIG_FIELD,
            0x0002_0002,
            "Config field is not supported"
        ),
        (SCHEMA_UNKNOWN_STRAP_FIELD, 0x0002_0003, "Strap field is not supported"),
        (SCHEMA_INVALID_ENUM_VALUE, 0x0002_0004, "Value is not one of the allowed values"),
        (SCHEMA_INVALID_HEX_VALUE, 0x0002_0005, "Hex value is malformed"),
        (SCHEMA_VALUE_OUT_OF_RANGE, 0x0002_0006, "Value is out of range"),
        (SCHEMA_INVALID_VALUE_TYPE, 0x0002_0007, "Value has the wrong type"),
        (SCHEMA_INVALID_NUMBER_ID, 0x0002_0008, "Key number_id must be 0 to 7"),
        (SCHEMA_MISSING_KEY_FILE, 0x0002_0009, "Key entry is missing a key file"),
        (
            SCHEMA_KEY_ORDER_NOT_ALLOWED,
            0x0002_000a,
            "rsa_key_order is only supported by the A3 revision"
        ),
        (SCHEMA_INVALID_DW_HEX, 0x0002_000b, "Input string is not dw aligned"),
        (OTP_DATA_REGION_OVERLAP, 0x0003_0001, "Data region is overlapping"),
        (OTP_DATA_REGION_OUT_OF_RANGE, 0x0004_0001, "Data region is out of range"),
        (
            OTP_PATCH_REGION_RESERVED,
            0x0004_0002,
            "Region 0x1b80 to 0x1c00 is reserved for patch"
        ),
        (OTP_IMAGE_REGION_OUT_OF_BOUNDS, 0x0004_0003, "OTP image region lies outside the image"),
        (IMAGE_OUT_OF_BOUNDS, 0x0004_0004, "Secure image field lies outside the image"),
        (OTP_KEY_COUNT_EXCEEDED, 0x0004_0005, "Too many keys for the key header table"),
        (
            OTP_KEY_LIST_MISSING_TERMINATOR,
            0x0005_0001,
            "Can not find last key in OTP data region"
        ),
        (IMAGE_ROT_HEADER_CHECKSUM_MISMATCH, 0x0006_0001, "Header checksum verify failed"),
        (OTP_IMAGE_CHECKSUM_MISMATCH, 0x0006_0002, "OTP image checksum is invalid"),
        (IMAGE_COT_DIGEST_MISMATCH, 0x0006_0003, "Chained image digest mismatch"),
        (IMAGE_ENC_OFFSET_UNALIGNED, 0x0007_0001, "The enc_offset should be 16 bytes aligned"),
        (
            IMAGE_SIGN_SIZE_UNALIGNED,
            0x0007_0002,
            "The sign_image_size should be 512 bytes aligned"
        ),
        (OTP_KEY_OFFSET_UNALIGNED, 0x0007_0003, "Key offset should be 8 bytes aligned"),
        (IMAGE_TOO_LARGE, 0x0008_0001, "Image exceeds the maximum BL1 size"),
        (IMAGE_SIGNATURE_MISMATCH, 0x0009_0001, "Signature verify failed"),
        (FIELD_NO_MATCHING_OEM_KEY, 0x0009_0002, "Mode 2 verify failed"),
        (CHAIN_SIGNATURE_MISMATCH, 0x0009_0003, "Chained partition signature verify failed"),
        (IMAGE_CTR_ROUNDTRIP_MISMATCH, 0x000a_0001, "Image decrypt failed"),
        (IMAGE_GCM_AUTH_FAILED, 0x000a_0002, "GCM verify failed"),
        (FIELD_NO_DECRYPT_KEY, 0x000a_0003, "Cannot find decrypt key"),
        (OTP_UNSUPPORTED_REVISION, 0x000b_0001, "OTP version is invalid"),
        (FIELD_PFR_MODE_UNSUPPORTED, 0x000b_0002, "PFR mode is not supported"),
        (FIELD_KEY_TYPE_UNKNOWN, 0x000b_0003, "Unknown key type code in OTP key header"),
        (SIGNER_HELPER_SPAWN_FAILED, 0x000c_0001, "Failed to start signing helper"),
        (SIGNER_HELPER_EXIT_FAILURE, 0x000c_0002, "Signing helper returned an error"),
        (SIGNER_HELPER_IO, 0x000c_0003, "Failed to exchange data with signing helper"),
        (KEY_PEM_INVALID, 0x000d_0001, "RSA key file is not a valid PEM key"),
        (KEY_NOT_PRIVATE, 0x000d_0002, "RSA private key required"),
        (KEY_SIZE_UNSUPPORTED, 0x000d_0003, "RSA key length is not supported"),
        (
            KEY_SIZE_MISMATCH,
            0x000d_0004,
            "OTP key type is not compatible with config"
        ),
        (KEY_RSA_OPERATION_FAILED, 0x000d_0005, "RSA operation failed"),
        (INVALID_OTP_MAGIC, 0x000e_0001, "OTP image magic word is invalid"),
        (INVALID_COT_MAGIC, 0x000e_0002, "Header magic word verify failed"),
        (
            FIELD_IMAGE_ENCRYPTED_MISMATCH,
            0x000e_0003,
            "The secure image is encrypted, the OTP image does not match"
        ),
        (
            FIELD_IMAGE_NOT_ENCRYPTED,
            0x000e_0004,
            "The OTP config enables encryption, but the secure image is not encrypted"
        ),
        (IMAGE_TRUNCATED, 0x000e_0005, "Image is shorter than its header"),
        (INTERNAL, 0x000f_0001, "Internal error"),
    ];
}

impl fmt::Display for SocsecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (0x{:08x})",
            self.kind(),
            self.description(),
            self.0.get()
        )
    }
}

impl std::error::Error for SocsecError {}

impl From<core::num::NonZeroU32> for crate::SocsecError {
    fn from(val: core::num::NonZeroU32) -> Self {
        crate::SocsecError(val)
    }
}

impl From<SocsecError> for core::num::NonZeroU32 {
    fn from(val: SocsecError) -> Self {
        val.0
    }
}

impl From<SocsecError> for u32 {
    fn from(val: SocsecError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

impl TryFrom<u32> for SocsecError {
    type Error = TryFromIntError;
    fn try_from(val: u32) -> Result<Self, TryFromIntError> {
        match NonZeroU32::try_from(val) {
            Ok(val) => Ok(SocsecError(val)),
            Err(err) => Err(err),
        }
    }
}

pub type SocsecResult<T> = Result<T, SocsecError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_try_from() {
        assert!(SocsecError::try_from(0).is_err());
        assert_eq!(
            Ok(SocsecError::OTP_DATA_REGION_OVERLAP),
            SocsecError::try_from(0x0003_0001)
        );
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            SocsecError::IMAGE_ENC_OFFSET_UNALIGNED.kind(),
            ErrorKind::Alignment
        );
        assert_eq!(
            SocsecError::OTP_KEY_LIST_MISSING_TERMINATOR.kind(),
            ErrorKind::MissingTerminator
        );
        assert_eq!(SocsecError::SIGNER_HELPER_EXIT_FAILURE.kind(), ErrorKind::SignerHelper);
        assert_eq!(SocsecError::INTERNAL.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_display() {
        let text = SocsecError::IMAGE_GCM_AUTH_FAILED.to_string();
        assert_eq!(text, "DecryptError: GCM verify failed (0x000a0002)");
    }

    #[test]
    fn test_error_constants_uniqueness() {
        let constants = SocsecError::all_constants();
        let mut error_values = HashSet::new();
        let mut duplicates = Vec::new();

        for (name, value) in constants {
            if !error_values.insert(value) {
                duplicates.push((name, value));
            }
        }

        assert!(
            duplicates.is_empty(),
            "Found duplicate error codes: {:?}",
            duplicates
        );
    }
}
