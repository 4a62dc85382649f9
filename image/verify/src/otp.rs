/*++

Licensed under the Apache-2.0 license.

File Name:

    otp.rs

Abstract:

    Parsing and integrity checks of OTP images.

--*/

use crate::*;
use log::{debug, error};

/// Effective OTP content recovered from an OTP image
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OtpContents {
    pub revision: OtpRevision,
    pub key_order: KeyOrder,
    pub data: Vec<u8>,
    pub config: Vec<u8>,
}

impl OtpContents {
    /// Little endian config double word `index`
    pub fn config_dw(&self, index: usize) -> u32 {
        let mut word = [0u8; 4];
        if let Some(bytes) = self.config.get(index * 4..index * 4 + 4) {
            word.copy_from_slice(bytes);
        }
        u32::from_le_bytes(word)
    }
}

pub struct OtpImageParser<Env: ImageVerificationEnv> {
    env: Env,
}

impl<Env: ImageVerificationEnv> OtpImageParser<Env> {
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Check the OTP image and recover the data and config regions
    pub fn parse(&self, image: &[u8]) -> SocsecResult<OtpContents> {
        let header = OtpImageHeader::read_from_image(image)?;
        if !header.magic_valid() {
            error!("OTP image magic word is invalid");
            Err(SocsecError::INVALID_OTP_MAGIC)?;
        }

        let revision = OtpRevision::from_version_bytes(&header.version)?;
        let key_order = if revision.supports_key_order() && header.image_info() & OTP_INC_ORDER != 0
        {
            KeyOrder::Big
        } else {
            KeyOrder::Little
        };

        self.verify_checksum(image, &header)?;

        let layout = revision.layout();
        let dump = header.image_info() & OTP_INC_DUMP != 0;
        let data = read_region(image, header.data_info(), layout.data_region_size, dump)?;
        let config = read_region(image, header.config_info(), layout.config_region_size, dump)?;
        debug!(
            "OTP image {revision}, key order {key_order}, data {} bytes, config {} bytes",
            data.len(),
            config.len()
        );

        Ok(OtpContents {
            revision,
            key_order,
            data,
            config,
        })
    }

    fn verify_checksum(&self, image: &[u8], header: &OtpImageHeader) -> SocsecResult<()> {
        let covered = image
            .get(..header.image_size())
            .ok_or(SocsecError::OTP_IMAGE_REGION_OUT_OF_BOUNDS)?;
        let expected = image
            .get(header.checksum_offset() as usize..)
            .and_then(|rest| rest.get(..OTP_CHECKSUM_SIZE))
            .ok_or(SocsecError::OTP_IMAGE_REGION_OUT_OF_BOUNDS)?;
        if self.env.digest(HashKind::Sha256, covered)? != expected {
            error!("OTP image checksum is invalid");
            Err(SocsecError::OTP_IMAGE_CHECKSUM_MISMATCH)?;
        }
        Ok(())
    }
}

/// Extract one region.
///
/// Dumps store the raw region. Compiled images store the value followed by
/// an ignore mask of the same size; masked bits read as zero. A region that
/// is absent from the image reads as unprogrammed (all zero).
fn read_region(image: &[u8], info: u32, size: usize, dump: bool) -> SocsecResult<Vec<u8>> {
    let (offset, stored) = split_region_info(info);
    if stored == 0 {
        return Ok(vec![0u8; size]);
    }
    let region = |offset: usize, len: usize| {
        image
            .get(offset..offset + len)
            .ok_or(SocsecError::OTP_IMAGE_REGION_OUT_OF_BOUNDS)
    };
    if dump {
        return Ok(region(offset, stored)?.to_vec());
    }
    let value = region(offset, size)?;
    let mask = region(offset + size, size)?;
    Ok(value.iter().zip(mask).map(|(v, m)| v & !m).collect())
}
