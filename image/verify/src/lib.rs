/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Secure boot image verification library.

--*/

mod chain;
mod field;
mod otp;
mod rot;

use socsec_error::{SocsecError, SocsecResult};
use socsec_image_types::*;

pub use chain::{bl1_cot_trust, ChainVerifier, StageTrust};
pub use field::{
    FieldStage, FieldVerification, FieldVerifier, KeyMaterial, OtpKey, SecureBootConfig,
};
pub use otp::{OtpContents, OtpImageParser};
pub use rot::{Bl1VerifyArgs, ImageVerifier};

/// Image Verification Environment
pub trait ImageVerificationEnv {
    /// Calculate a digest of `data`
    fn digest(&self, hash: HashKind, data: &[u8]) -> SocsecResult<Vec<u8>>;

    /// Raw RSA: `base ^ exp mod modulus`.
    ///
    /// All operands are big endian. The result is left padded to the length
    /// of `modulus`.
    fn rsa_exp(&self, base: &[u8], exp: &[u8], modulus: &[u8]) -> SocsecResult<Vec<u8>>;

    /// Apply AES-CTR with a 128-bit big endian counter starting at `iv`
    fn aes_ctr_apply(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> SocsecResult<()>;

    /// Decrypt `data` in place and check the GCM `tag`
    fn aes_gcm_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        data: &mut [u8],
        tag: &[u8],
    ) -> SocsecResult<()>;
}

impl<T: ImageVerificationEnv + ?Sized> ImageVerificationEnv for &T {
    fn digest(&self, hash: HashKind, data: &[u8]) -> SocsecResult<Vec<u8>> {
        (**self).digest(hash, data)
    }

    fn rsa_exp(&self, base: &[u8], exp: &[u8], modulus: &[u8]) -> SocsecResult<Vec<u8>> {
        (**self).rsa_exp(base, exp, modulus)
    }

    fn aes_ctr_apply(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> SocsecResult<()> {
        (**self).aes_ctr_apply(key, iv, data)
    }

    fn aes_gcm_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        data: &mut [u8],
        tag: &[u8],
    ) -> SocsecResult<()> {
        (**self).aes_gcm_decrypt(key, nonce, aad, data, tag)
    }
}

/// Bounds checked sub slice
pub(crate) fn slice_at(image: &[u8], offset: usize, len: usize) -> SocsecResult<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| image.get(offset..end))
        .ok_or(SocsecError::IMAGE_OUT_OF_BOUNDS)
}

/// Convert key material stored in `order` to a big endian integer
pub(crate) fn to_big_endian(bytes: &[u8], order: KeyOrder) -> Vec<u8> {
    let mut be = bytes.to_vec();
    order.apply(&mut be);
    be
}

/// Check that `signature` over `digest` was produced by the key (`n`, `e`).
///
/// The signature is stored in `order`. The digest sits in the last bytes
/// of the recovered block, reversed for little order.
pub(crate) fn rsa_digest_matches<Env: ImageVerificationEnv>(
    env: &Env,
    signature: &[u8],
    e: &[u8],
    n: &[u8],
    digest: &[u8],
    order: KeyOrder,
) -> SocsecResult<bool> {
    let block = env.rsa_exp(&to_big_endian(signature, order), e, n)?;
    let Some(start) = block.len().checked_sub(digest.len()) else {
        return Ok(false);
    };
    let recovered = to_big_endian(&block[start..], order);
    Ok(recovered == digest)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use rsa::BigUint;
    use sha2::Digest;
    use zerocopy::IntoBytes;

    /// Environment with real digests and RSA, and a XOR stream for AES.
    ///
    /// The GCM "tag" is the first 16 bytes of the key XOR-ed with the first
    /// AAD byte, which is enough to tell keys apart.
    #[derive(Default)]
    pub struct TestEnv {}

    impl ImageVerificationEnv for TestEnv {
        fn digest(&self, hash: HashKind, data: &[u8]) -> SocsecResult<Vec<u8>> {
            Ok(match hash {
                HashKind::Sha224 => sha2::Sha224::digest(data).to_vec(),
                HashKind::Sha256 => sha2::Sha256::digest(data).to_vec(),
                HashKind::Sha384 => sha2::Sha384::digest(data).to_vec(),
                HashKind::Sha512 => sha2::Sha512::digest(data).to_vec(),
            })
        }

        fn rsa_exp(&self, base: &[u8], exp: &[u8], modulus: &[u8]) -> SocsecResult<Vec<u8>> {
            let n = BigUint::from_bytes_be(modulus);
            if n == BigUint::from(0u8) {
                return Err(SocsecError::KEY_RSA_OPERATION_FAILED);
            }
            let out = BigUint::from_bytes_be(base)
                .modpow(&BigUint::from_bytes_be(exp), &n)
                .to_bytes_be();
            let mut padded = vec![0u8; modulus.len().saturating_sub(out.len())];
            padded.extend(out);
            Ok(padded)
        }

        fn aes_ctr_apply(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> SocsecResult<()> {
            for (i, byte) in data.iter_mut().enumerate() {
                *byte ^= key[i % key.len()] ^ iv[i % iv.len()];
            }
            Ok(())
        }

        fn aes_gcm_decrypt(
            &self,
            key: &[u8],
            nonce: &[u8],
            aad: &[u8],
            data: &mut [u8],
            tag: &[u8],
        ) -> SocsecResult<()> {
            if tag != test_gcm_tag(key, aad).as_slice() {
                return Err(SocsecError::IMAGE_GCM_AUTH_FAILED);
            }
            self.aes_ctr_apply(key, nonce, data)
        }
    }

    /// Assemble an OTP image from optional (value, mask) data and config planes
    pub fn build_otp_image(
        revision: OtpRevision,
        flags: u32,
        data: Option<(&[u8], &[u8])>,
        config: Option<(&[u8], &[u8])>,
    ) -> Vec<u8> {
        let mut payload = Vec::new();
        let mut header = OtpImageHeader::new(revision);
        let mut offset = OTP_HEADER_SIZE;
        if let Some((value, mask)) = data {
            header.set_data_info(region_info(offset, value.len() + mask.len()));
            payload.extend_from_slice(value);
            payload.extend_from_slice(mask);
            offset += value.len() + mask.len();
        }
        if let Some((value, mask)) = config {
            header.set_config_info(region_info(offset, value.len() + mask.len()));
            payload.extend_from_slice(value);
            payload.extend_from_slice(mask);
            offset += value.len() + mask.len();
        }
        header.set_image_info(offset as u32 | flags);
        header.set_checksum_offset(offset as u32);

        let mut image = header.as_bytes().to_vec();
        image.extend(payload);
        let checksum = TestEnv::default()
            .digest(HashKind::Sha256, &image)
            .unwrap();
        image.extend(checksum);
        image
    }

    pub fn test_gcm_tag(key: &[u8], aad: &[u8]) -> Vec<u8> {
        let salt = aad.first().copied().unwrap_or(0);
        key[..16].iter().map(|b| b ^ salt).collect()
    }

    /// Small textbook RSA key: n = 3233 (61 * 53), e = 17, d = 2753.
    /// Blocks are two bytes wide.
    pub const TOY_N: [u8; 2] = [0x0c, 0xa1];
    pub const TOY_E: [u8; 1] = [17];
    pub const TOY_D: [u8; 2] = [0x0a, 0xc1];
}
