/*++

Licensed under the Apache-2.0 license.

File Name:

    rot.rs

Abstract:

    Verification of signed BL1 images against known keys.

--*/

use crate::*;
use log::{error, info};

/// Key material needed to check a freshly built BL1 image
pub struct Bl1VerifyArgs<'a> {
    pub header_offset: u32,
    pub algorithm: Algorithm,
    pub key_order: KeyOrder,
    /// Public part of the signing key (RSA modes)
    pub verify_key: Option<&'a RsaKey>,
    /// AES-CTR key, used when the key is provisioned in OTP
    pub aes_key: Option<&'a [u8]>,
    pub key_in_otp: bool,
    pub gcm_key: Option<&'a [u8]>,
}

/// Image Verifier
pub struct ImageVerifier<Env: ImageVerificationEnv> {
    /// Verification Environment
    env: Env,
}

impl<Env: ImageVerificationEnv> ImageVerifier<Env> {
    /// Create a new instance `ImageVerifier`
    ///
    /// # Arguments
    ///
    /// * `env` - Environment
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Verify a BL1 image
    ///
    /// # Arguments
    ///
    /// * `plain`     - Image before encryption, header and COT data included
    /// * `sec_image` - Signed (and possibly encrypted) image
    /// * `args`      - Keys and layout
    pub fn verify(&self, plain: &[u8], sec_image: &[u8], args: &Bl1VerifyArgs) -> SocsecResult<()> {
        let header = self.verify_header(sec_image, args.header_offset)?;
        info!("check header PASS");

        match args.algorithm {
            Algorithm::RsaSha { .. } => {
                self.verify_signature(sec_image, &header, args)?;
                info!("check integrity PASS");
            }
            Algorithm::AesRsaSha { .. } => {
                self.verify_signature(sec_image, &header, args)?;
                info!("check integrity PASS");
                if args.key_in_otp {
                    self.verify_ctr_roundtrip(plain, sec_image, &header, args)?;
                    info!("check aes decode PASS");
                }
            }
            Algorithm::AesGcm => {
                self.verify_gcm(plain, sec_image, &header, args)?;
                info!("check gcm integrity and decode PASS");
            }
            Algorithm::HashBinding { .. } => Err(SocsecError::ARG_INVALID_ALGORITHM)?,
        }
        Ok(())
    }

    /// Verify the ROT header checksum and signed size alignment
    pub fn verify_header(&self, sec_image: &[u8], header_offset: u32) -> SocsecResult<RotHeader> {
        let header = RotHeader::read_at(sec_image, header_offset as usize)?;
        if !header.checksum_valid() {
            error!("header checksum verify failed");
            Err(SocsecError::IMAGE_ROT_HEADER_CHECKSUM_MISMATCH)?;
        }
        if header.sign_image_size() as usize % SIGN_IMAGE_ALIGN != 0 {
            Err(SocsecError::IMAGE_SIGN_SIZE_UNALIGNED)?;
        }
        Ok(header)
    }

    fn verify_signature(
        &self,
        sec_image: &[u8],
        header: &RotHeader,
        args: &Bl1VerifyArgs,
    ) -> SocsecResult<()> {
        let key = args.verify_key.ok_or(SocsecError::ARG_MISSING_SIGN_KEY)?;
        let hash = args
            .algorithm
            .hash_kind()
            .ok_or(SocsecError::ARG_INVALID_ALGORITHM)?;
        let signed = slice_at(sec_image, 0, header.sign_image_size() as usize)?;
        let signature = slice_at(
            sec_image,
            header.signature_offset() as usize,
            args.algorithm.signature_len(),
        )?;
        let digest = self.env.digest(hash, signed)?;
        if !rsa_digest_matches(&self.env, signature, key.e(), key.n(), &digest, args.key_order)? {
            error!("signature verify failed");
            Err(SocsecError::IMAGE_SIGNATURE_MISMATCH)?;
        }
        Ok(())
    }

    fn verify_ctr_roundtrip(
        &self,
        plain: &[u8],
        sec_image: &[u8],
        header: &RotHeader,
        args: &Bl1VerifyArgs,
    ) -> SocsecResult<()> {
        let key = args.aes_key.ok_or(SocsecError::ARG_MISSING_AES_KEY)?;
        let range = encrypted_range(header)?;
        let iv = slice_at(sec_image, header.aes_data_offset() as usize, AES_IV_SIZE)?;
        let mut decrypted = slice_at(sec_image, range.0, range.1)?.to_vec();
        self.env.aes_ctr_apply(key, iv, &mut decrypted)?;
        if slice_at(plain, range.0, range.1)? != decrypted.as_slice() {
            error!("image decrypt failed");
            Err(SocsecError::IMAGE_CTR_ROUNDTRIP_MISMATCH)?;
        }
        Ok(())
    }

    fn verify_gcm(
        &self,
        plain: &[u8],
        sec_image: &[u8],
        header: &RotHeader,
        args: &Bl1VerifyArgs,
    ) -> SocsecResult<()> {
        let key = args.gcm_key.ok_or(SocsecError::ARG_MISSING_GCM_KEY)?;
        let (offset, len) = encrypted_range(header)?;
        let tag = rom_tag(sec_image, header)?;
        let nonce = slice_at(sec_image, header.aes_data_offset() as usize, GCM_NONCE_SIZE)?;
        let aad = slice_at(sec_image, 0, offset)?;
        let mut decrypted = slice_at(sec_image, offset, len)?.to_vec();
        self.env
            .aes_gcm_decrypt(key, nonce, aad, &mut decrypted, &tag)
            .map_err(|_| SocsecError::IMAGE_GCM_AUTH_FAILED)?;
        if slice_at(plain, offset, len)? != decrypted.as_slice() {
            error!("image decrypt failed");
            Err(SocsecError::IMAGE_CTR_ROUNDTRIP_MISMATCH)?;
        }
        Ok(())
    }
}

/// (offset, length) of the encrypted part of the signed region
pub(crate) fn encrypted_range(header: &RotHeader) -> SocsecResult<(usize, usize)> {
    let start = header.enc_offset() as usize;
    let len = (header.sign_image_size() as usize)
        .checked_sub(start)
        .ok_or(SocsecError::IMAGE_OUT_OF_BOUNDS)?;
    Ok((start, len))
}

/// GCM tag with the ROM word order undone
pub(crate) fn rom_tag(sec_image: &[u8], header: &RotHeader) -> SocsecResult<[u8; GCM_TAG_SIZE]> {
    let stored = slice_at(sec_image, header.signature_offset() as usize, GCM_TAG_SIZE)?;
    let mut tag = [0u8; GCM_TAG_SIZE];
    tag.copy_from_slice(stored);
    Ok(gcm_tag_rom_order(&tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use zerocopy::IntoBytes;

    fn toy_key() -> RsaKey {
        RsaKey::public(&TOY_N, &TOY_E).unwrap()
    }

    fn args<'a>(algorithm: Algorithm, key: &'a RsaKey) -> Bl1VerifyArgs<'a> {
        Bl1VerifyArgs {
            header_offset: 0x20,
            algorithm,
            key_order: KeyOrder::Big,
            verify_key: Some(key),
            aes_key: None,
            key_in_otp: false,
            gcm_key: None,
        }
    }

    fn image_with_header(header: RotHeader, len: usize) -> Vec<u8> {
        let mut image = vec![0x5au8; len];
        insert_bytes(&mut image, 0x20, header.as_bytes());
        image
    }

    #[test]
    fn test_header_checksum() {
        let verifier = ImageVerifier::new(TestEnv::default());
        let mut header = RotHeader::new(0, 0, 0x200, 0x200, 0);
        header.set_revision_low(1);
        let image = image_with_header(header, 0x400);
        assert_eq!(
            verifier.verify_header(&image, 0x20),
            Err(SocsecError::IMAGE_ROT_HEADER_CHECKSUM_MISMATCH)
        );
    }

    #[test]
    fn test_header_alignment() {
        let verifier = ImageVerifier::new(TestEnv::default());
        let image = image_with_header(RotHeader::new(0, 0, 0x210, 0x210, 0), 0x400);
        assert_eq!(
            verifier.verify_header(&image, 0x20),
            Err(SocsecError::IMAGE_SIGN_SIZE_UNALIGNED)
        );
    }

    #[test]
    fn test_header_truncated() {
        let verifier = ImageVerifier::new(TestEnv::default());
        assert_eq!(
            verifier.verify_header(&[0u8; 0x30], 0x20),
            Err(SocsecError::IMAGE_TRUNCATED)
        );
    }

    #[test]
    fn test_signature_mismatch() {
        let key = toy_key();
        let verifier = ImageVerifier::new(TestEnv::default());
        let image = image_with_header(RotHeader::new(0, 0, 0x200, 0x200, 0), 0x400);
        let alg: Algorithm = "RSA1024_SHA256".parse().unwrap();
        assert_eq!(
            verifier.verify(&image, &image, &args(alg, &key)),
            Err(SocsecError::IMAGE_SIGNATURE_MISMATCH)
        );
    }

    #[test]
    fn test_signature_out_of_bounds() {
        let key = toy_key();
        let verifier = ImageVerifier::new(TestEnv::default());
        let image = image_with_header(RotHeader::new(0, 0, 0x200, 0x200, 0), 0x210);
        let alg: Algorithm = "RSA1024_SHA256".parse().unwrap();
        assert_eq!(
            verifier.verify(&image, &image, &args(alg, &key)),
            Err(SocsecError::IMAGE_OUT_OF_BOUNDS)
        );
    }

    #[test]
    fn test_ctr_roundtrip() {
        let key = toy_key();
        let env = TestEnv::default();
        let verifier = ImageVerifier::new(&env);
        let aes_key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let header = RotHeader::new(0x200, 0x50, 0x200, 0x210, 0);
        let plain = image_with_header(header, 0x200);

        let mut sec_image = plain.clone();
        env.aes_ctr_apply(&aes_key, &iv, &mut sec_image[0x50..0x200])
            .unwrap();
        sec_image.extend_from_slice(&iv);

        let mut args = args("AES_RSA1024_SHA256".parse().unwrap(), &key);
        args.aes_key = Some(&aes_key);
        args.key_in_otp = true;
        assert_eq!(
            verifier.verify_ctr_roundtrip(&plain, &sec_image, &header, &args),
            Ok(())
        );

        sec_image[0x100] ^= 1;
        assert_eq!(
            verifier.verify_ctr_roundtrip(&plain, &sec_image, &header, &args),
            Err(SocsecError::IMAGE_CTR_ROUNDTRIP_MISMATCH)
        );
    }

    #[test]
    fn test_gcm() {
        let env = TestEnv::default();
        let verifier = ImageVerifier::new(&env);
        let gcm_key = [0x33u8; 32];
        let nonce = [0u8; 12];
        let header = RotHeader::new(0x200, 0x50, 0x200, 0x210, 0);
        let plain = image_with_header(header, 0x200);

        let mut sec_image = plain.clone();
        env.aes_ctr_apply(&gcm_key, &nonce, &mut sec_image[0x50..0x200])
            .unwrap();
        let tag: [u8; 16] = test_gcm_tag(&gcm_key, &sec_image[..0x50])
            .try_into()
            .unwrap();
        sec_image.extend_from_slice(&nonce);
        sec_image.extend_from_slice(&GCM_COUNTER_SUFFIX);
        sec_image.extend_from_slice(&gcm_tag_rom_order(&tag));

        let key = toy_key();
        let mut args = args(Algorithm::AesGcm, &key);
        args.gcm_key = Some(&gcm_key);
        assert_eq!(verifier.verify(&plain, &sec_image, &args), Ok(()));

        let wrong_key = [0x34u8; 32];
        args.gcm_key = Some(&wrong_key);
        assert_eq!(
            verifier.verify(&plain, &sec_image, &args),
            Err(SocsecError::IMAGE_GCM_AUTH_FAILED)
        );
    }
}
