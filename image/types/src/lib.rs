/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the secure boot images and OTP images.

--*/

mod algorithm;
mod key;
mod otp;

pub use algorithm::{Algorithm, HashKind, KeyOrder, RsaSize, SocVersion};
pub use key::{KeyPart, RsaComponent, RsaKey};
pub use otp::{
    region_info, split_region_info, KeyDescriptor, KeyType, KeyTypeTable, OtpLayout, OtpRevision,
};

use getset::{CopyGetters, Setters};
use socsec_error::{SocsecError, SocsecResult};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

pub const ROT_HEADER_SIZE: usize = core::mem::size_of::<RotHeader>();
pub const COT_INFO_SIZE: usize = core::mem::size_of::<CotInfo>();
pub const COT_HEADER_SIZE: usize = core::mem::size_of::<CotHeader>();
pub const COT_MAGIC: &[u8] = b"SOCSEC";
pub const COT_RESERVED_SIZE: usize = 472;

pub const OTP_MAGIC: &[u8] = b"SOCOTP";
pub const OTP_HEADER_SIZE: usize = core::mem::size_of::<OtpImageHeader>();
pub const OTP_CHECKSUM_SIZE: usize = 32;
pub const OTP_INC_DATA: u32 = 1 << 31;
pub const OTP_INC_CONF: u32 = 1 << 30;
pub const OTP_INC_STRAP: u32 = 1 << 29;
pub const OTP_INC_ECC: u32 = 1 << 28;
pub const OTP_INC_DUMP: u32 = 1 << 27;
pub const OTP_INC_ORDER: u32 = 1 << 26;
pub const OTP_KEY_HEADER_SLOTS: usize = 16;

pub const SIGN_IMAGE_ALIGN: usize = 512;
pub const SIGNATURE_FIELD_SIZE: usize = 512;
pub const AES_IV_SIZE: usize = 16;
pub const AES_KEY_SIZE: usize = 32;
pub const GCM_NONCE_SIZE: usize = 12;
pub const GCM_TAG_SIZE: usize = 16;
pub const GCM_COUNTER_SUFFIX: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Root-of-trust header consumed by the boot ROM
#[repr(C)]
#[derive(
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
    Default,
    Debug,
    CopyGetters,
    Setters,
    Copy,
    Clone,
    Eq,
    PartialEq,
)]
#[getset(get_copy = "pub", set = "pub")]
pub struct RotHeader {
    /// Offset of the IV / encrypted AES key blob
    pub aes_data_offset: u32,

    /// Start of the encrypted region (0 when not encrypted)
    pub enc_offset: u32,

    /// Size of the signed region, 512 byte aligned
    pub sign_image_size: u32,

    /// Offset of the signature or GCM tag
    pub signature_offset: u32,

    pub revision_low: u32,

    pub revision_high: u32,

    /// Reserved on AST2600, flash patch offset on AST2605
    pub flash_patch_offset: u32,

    /// Makes the eight words sum to zero
    pub checksum: u32,
}

impl RotHeader {
    /// Create a header with a valid checksum
    pub fn new(
        aes_data_offset: u32,
        enc_offset: u32,
        sign_image_size: u32,
        signature_offset: u32,
        flash_patch_offset: u32,
    ) -> Self {
        let mut header = Self {
            aes_data_offset,
            enc_offset,
            sign_image_size,
            signature_offset,
            flash_patch_offset,
            ..Default::default()
        };
        header.update_checksum();
        header
    }

    /// Recompute the checksum field from the other seven words
    pub fn update_checksum(&mut self) {
        self.checksum = 0;
        self.checksum = self.field_sum().wrapping_neg();
    }

    /// Wrapping sum of all eight words
    pub fn field_sum(&self) -> u32 {
        [
            self.aes_data_offset,
            self.enc_offset,
            self.sign_image_size,
            self.signature_offset,
            self.revision_low,
            self.revision_high,
            self.flash_patch_offset,
            self.checksum,
        ]
        .iter()
        .fold(0u32, |sum, word| sum.wrapping_add(*word))
    }

    pub fn checksum_valid(&self) -> bool {
        self.field_sum() == 0
    }

    /// Read the header located at `offset` of `image`
    pub fn read_at(image: &[u8], offset: usize) -> SocsecResult<Self> {
        let bytes = image
            .get(offset..)
            .ok_or(SocsecError::IMAGE_TRUNCATED)?;
        Self::read_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| SocsecError::IMAGE_TRUNCATED)
    }
}

/// Chain-of-trust record placed right after the ROT header of a BL1 image
#[repr(C)]
#[derive(
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
    Default,
    Debug,
    CopyGetters,
    Setters,
    Copy,
    Clone,
    Eq,
    PartialEq,
)]
#[getset(get_copy = "pub", set = "pub")]
pub struct CotInfo {
    pub info: u32,
    pub data_offset: u32,
}

impl CotInfo {
    pub fn read_at(image: &[u8], offset: usize) -> SocsecResult<Self> {
        let bytes = image
            .get(offset..)
            .ok_or(SocsecError::IMAGE_TRUNCATED)?;
        Self::read_from_prefix(bytes)
            .map(|(info, _)| info)
            .map_err(|_| SocsecError::IMAGE_TRUNCATED)
    }
}

/// Header prefixed to every chained partition image
#[repr(C)]
#[derive(
    IntoBytes, FromBytes, Immutable, KnownLayout, Debug, CopyGetters, Setters, Copy, Clone,
)]
pub struct CotHeader {
    pub magic: [u8; 16],

    #[getset(get_copy = "pub", set = "pub")]
    pub info: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub sign_image_size: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub signature_offset: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub next_pubkey_offset: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub revision_low: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub revision_high: u32,

    pub reserved: [u8; COT_RESERVED_SIZE],
}

impl CotHeader {
    pub fn new(
        info: u32,
        sign_image_size: u32,
        signature_offset: u32,
        next_pubkey_offset: u32,
    ) -> Self {
        let mut header = Self::new_zeroed();
        header.magic[..COT_MAGIC.len()].copy_from_slice(COT_MAGIC);
        header.info = info;
        header.sign_image_size = sign_image_size;
        header.signature_offset = signature_offset;
        header.next_pubkey_offset = next_pubkey_offset;
        header
    }

    pub fn magic_valid(&self) -> bool {
        self.magic.starts_with(COT_MAGIC)
    }

    pub fn read_from_image(image: &[u8]) -> SocsecResult<Self> {
        Self::read_from_prefix(image)
            .map(|(header, _)| header)
            .map_err(|_| SocsecError::IMAGE_TRUNCATED)
    }
}

/// OTP image header
#[repr(C)]
#[derive(
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
    Default,
    Debug,
    CopyGetters,
    Setters,
    Copy,
    Clone,
    Eq,
    PartialEq,
)]
pub struct OtpImageHeader {
    pub magic: [u8; 8],

    pub version: [u8; 8],

    /// Total size of header and regions, OR-ed with the inclusion flags
    #[getset(get_copy = "pub", set = "pub")]
    pub image_info: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub data_info: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub config_info: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub strap_info: u32,

    #[getset(get_copy = "pub", set = "pub")]
    pub checksum_offset: u32,
}

impl OtpImageHeader {
    pub fn new(revision: OtpRevision) -> Self {
        let mut header = Self::default();
        header.magic[..OTP_MAGIC.len()].copy_from_slice(OTP_MAGIC);
        header.version = revision.version_bytes();
        header
    }

    pub fn magic_valid(&self) -> bool {
        self.magic.starts_with(OTP_MAGIC)
    }

    /// Size of header plus regions, without the inclusion flags
    pub fn image_size(&self) -> usize {
        (self.image_info & 0xffff) as usize
    }

    pub fn read_from_image(image: &[u8]) -> SocsecResult<Self> {
        Self::read_from_prefix(image)
            .map(|(header, _)| header)
            .map_err(|_| SocsecError::IMAGE_TRUNCATED)
    }
}

/// Round `value` up to a multiple of `align` (a power of two)
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Copy `src` into `dst` at `offset`, growing `dst` with zeros if needed
pub fn insert_bytes(dst: &mut Vec<u8>, offset: usize, src: &[u8]) {
    let end = offset + src.len();
    if end > dst.len() {
        dst.resize(end, 0);
    }
    dst[offset..end].copy_from_slice(src);
}

/// Swap the order of the four 32-bit groups of a GCM tag.
///
/// The ROM stores the tag this way; applying the function twice restores
/// the original tag.
pub fn gcm_tag_rom_order(tag: &[u8; GCM_TAG_SIZE]) -> [u8; GCM_TAG_SIZE] {
    let mut out = [0u8; GCM_TAG_SIZE];
    for i in (0..GCM_TAG_SIZE).step_by(4) {
        out[i..i + 4].copy_from_slice(&tag[12 - i..16 - i]);
    }
    out
}
