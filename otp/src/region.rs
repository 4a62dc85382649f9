/*++

Licensed under the Apache-2.0 license.

File Name:

   region.rs

Abstract:

    OTP region buffers with their ignore masks.

--*/

use core::ops::Range;

use socsec_error::{SocsecError, SocsecResult};
use socsec_image_types::OtpLayout;

use crate::ecc::{ecc, ECC_WORD_SIZE};

/// Mask byte of a byte nothing was written to
const UNWRITTEN: u8 = 0xff;

/// Bytes reserved for patch code unless the config allows patching
pub const PATCH_RESERVED: Range<usize> = 0x1b80..0x1c00;

/// Data region value and ignore mask.
///
/// A mask byte is 0xff until the byte is written, and 0 afterwards.
#[derive(Debug, Clone)]
pub struct DataRegion {
    data: Vec<u8>,
    mask: Vec<u8>,
    ecc_offset: Option<usize>,
}

impl DataRegion {
    pub fn new(layout: &OtpLayout, ecc_enabled: bool) -> Self {
        Self {
            data: vec![0u8; layout.data_region_size],
            mask: vec![UNWRITTEN; layout.data_region_size],
            ecc_offset: ecc_enabled.then_some(layout.ecc_region_offset),
        }
    }

    /// End of the bytes that can hold keys and user data
    pub fn usable_end(&self) -> usize {
        self.ecc_offset.unwrap_or(self.data.len())
    }

    /// Write `bytes` at `offset`. Nothing is written if any byte of the
    /// range is out of range or already written.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> SocsecResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.usable_end())
            .ok_or(SocsecError::OTP_DATA_REGION_OUT_OF_RANGE)?;
        if self.mask[offset..end].iter().any(|m| *m != UNWRITTEN) {
            Err(SocsecError::OTP_DATA_REGION_OVERLAP)?;
        }

        if let Some(ecc_offset) = self.ecc_offset {
            let words = offset / ECC_WORD_SIZE..=(end - 1) / ECC_WORD_SIZE;
            for word in words {
                self.mask[ecc_offset + word] = 0;
            }
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.mask[offset..end].fill(0);
        Ok(())
    }

    /// Fail if anything was written into the patch reserved range
    pub fn check_patch_reserved(&self) -> SocsecResult<()> {
        let reserved = self.mask.get(PATCH_RESERVED).unwrap_or_default();
        if reserved.iter().any(|m| *m != UNWRITTEN) {
            Err(SocsecError::OTP_PATCH_REGION_RESERVED)?;
        }
        Ok(())
    }

    /// Insert the ECC bytes, if enabled, and return (value, mask)
    pub fn finish(mut self) -> (Vec<u8>, Vec<u8>) {
        if let Some(ecc_offset) = self.ecc_offset {
            let parity = ecc(&self.data);
            let len = parity.len().min(self.data.len() - ecc_offset);
            self.data[ecc_offset..ecc_offset + len].copy_from_slice(&parity[..len]);
        }
        (self.data, self.mask)
    }
}

/// Bit addressed plane, bit n is bit n % 8 of byte n / 8
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BitPlane {
    bytes: Vec<u8>,
}

impl BitPlane {
    pub fn zeros(bits: usize) -> Self {
        Self {
            bytes: vec![0u8; bits.div_ceil(8)],
        }
    }

    pub fn ones(bits: usize) -> Self {
        Self {
            bytes: vec![0xffu8; bits.div_ceil(8)],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, bit: usize) -> bool {
        self.bytes
            .get(bit / 8)
            .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
    }

    pub fn set(&mut self, bit: usize, value: bool) -> SocsecResult<()> {
        let byte = self
            .bytes
            .get_mut(bit / 8)
            .ok_or(SocsecError::SCHEMA_VALUE_OUT_OF_RANGE)?;
        if value {
            *byte |= 1 << (bit % 8);
        } else {
            *byte &= !(1 << (bit % 8));
        }
        Ok(())
    }

    /// Store the low `len` bits of `value` at `offset`, LSB first
    pub fn set_field(&mut self, offset: usize, len: usize, value: u64) -> SocsecResult<()> {
        for i in 0..len {
            let bit = i < 64 && (value >> i) & 1 != 0;
            self.set(offset + i, bit)?;
        }
        Ok(())
    }

    /// Set or clear every bit of `offset..offset + len`
    pub fn fill_field(&mut self, offset: usize, len: usize, value: bool) -> SocsecResult<()> {
        for i in 0..len {
            self.set(offset + i, value)?;
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
