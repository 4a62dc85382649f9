/*++

Licensed under the Apache-2.0 license.

File Name:

   bl1.rs

Abstract:

    BL1 secure image generation.

--*/
use anyhow::Context;
use log::{debug, info};
use socsec_image_verify::{Bl1VerifyArgs, ImageVerifier};
use zerocopy::IntoBytes;

use crate::*;

/// Minimum distance between the ROT header and the encrypted region
const ENC_OFFSET_HEADER_GAP: u32 = 0x30;

/// AES key blob sizes per key order
const KEY_BLOB_SIZE_LITTLE: usize = 48;
const KEY_BLOB_SIZE_BIG: usize = 64;
const KEY_BLOB_IV_OFFSET: usize = 0x20;

/// Offsets of a BL1 secure image
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Bl1Layout {
    pub header_offset: u32,
    pub enc_offset: u32,
    pub aes_data_offset: u32,
    pub sign_image_size: u32,
    pub signature_offset: u32,
    pub flash_patch_offset: u32,

    /// Offset of the next stage key or digest
    pub cot_data_offset: Option<u32>,
}

impl Bl1Layout {
    /// Derive the layout of the image described by `config`
    pub fn new(config: &Bl1Config) -> SocsecResult<Self> {
        let soc = config.soc;
        let image_len = config.image.len();
        let header_offset = config
            .header_offset
            .unwrap_or(soc.default_header_offset());
        let mut enc_offset = config.enc_offset.unwrap_or(soc.default_enc_offset());

        let max_len = soc.max_bl1_len(config.stack_intersects_verification_region);
        if image_len > max_len {
            Err(SocsecError::IMAGE_TOO_LARGE)?;
        }
        let header_end = (header_offset as usize).saturating_add(ROT_HEADER_SIZE);
        if header_end > max_len {
            Err(SocsecError::IMAGE_TOO_LARGE)?;
        }
        if enc_offset % 16 != 0 {
            Err(SocsecError::IMAGE_ENC_OFFSET_UNALIGNED)?;
        }
        let enc_floor = header_offset
            .checked_add(ENC_OFFSET_HEADER_GAP)
            .ok_or(SocsecError::ARG_ENC_OFFSET_BELOW_HEADER)?;
        if enc_offset < enc_floor {
            Err(SocsecError::ARG_ENC_OFFSET_BELOW_HEADER)?;
        }

        let flash_patch_offset = match soc {
            SocVersion::Ast2605 => config
                .flash_patch_offset
                .unwrap_or(soc.default_flash_patch_offset()),
            SocVersion::Ast2600 | SocVersion::Ast1030 => 0,
        };

        let (cot_data_offset, signed_len) = match &config.cot {
            Some(cot) => {
                let cot_info_offset = header_offset as usize + ROT_HEADER_SIZE;
                let offset = align_up(image_len, 16).max(align_up(cot_info_offset + COT_INFO_SIZE, 16));
                (Some(offset as u32), offset + cot.data_len())
            }
            None => (None, image_len),
        };
        let sign_image_size = align_up(signed_len, SIGN_IMAGE_ALIGN) as u32;
        // The ROT header must lie inside the signed region
        if (sign_image_size as usize) < header_end {
            Err(SocsecError::IMAGE_TRUNCATED)?;
        }

        let (aes_data_offset, signature_offset) = match config.algorithm {
            Algorithm::RsaSha { .. } => {
                enc_offset = 0;
                (0, sign_image_size)
            }
            Algorithm::AesRsaSha { rsa, .. } => {
                let aes_data_len = if config.key_in_otp {
                    AES_IV_SIZE
                } else {
                    rsa.signature_len()
                };
                (sign_image_size, sign_image_size + aes_data_len as u32)
            }
            Algorithm::AesGcm => (sign_image_size, sign_image_size + AES_IV_SIZE as u32),
            Algorithm::HashBinding { .. } => Err(SocsecError::ARG_INVALID_ALGORITHM)?,
        };

        Ok(Self {
            header_offset,
            enc_offset,
            aes_data_offset,
            sign_image_size,
            signature_offset,
            flash_patch_offset,
            cot_data_offset,
        })
    }

    pub fn rot_header(&self) -> RotHeader {
        RotHeader::new(
            self.aes_data_offset,
            self.enc_offset,
            self.sign_image_size,
            self.signature_offset,
            self.flash_patch_offset,
        )
    }

    fn encrypted_range(&self) -> core::ops::Range<usize> {
        self.enc_offset as usize..self.sign_image_size as usize
    }
}

impl<Crypto: ImageGeneratorCrypto, Signer: ImageSigner> ImageGenerator<Crypto, Signer> {
    /// Generate a BL1 secure image
    ///
    /// # Arguments
    ///
    /// * `config` - BL1 generator configuration
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - Secure image, verified against the configured keys
    pub fn generate_bl1(&self, config: &Bl1Config) -> anyhow::Result<Vec<u8>> {
        let layout = Bl1Layout::new(config)?;
        debug!("BL1 layout: {layout:x?}");

        let mut image = config.image.clone();
        image.resize(layout.sign_image_size as usize, 0);
        insert_bytes(
            &mut image,
            layout.header_offset as usize,
            layout.rot_header().as_bytes(),
        );
        if let (Some(cot), Some(data_offset)) = (&config.cot, layout.cot_data_offset) {
            self.insert_cot(&mut image, &layout, cot, data_offset, config.key_order)?;
        }
        let plain = image.clone();

        match config.algorithm {
            Algorithm::RsaSha { .. } => self.sign_bl1(&mut image, &layout, config)?,
            Algorithm::AesRsaSha { .. } => {
                self.encrypt_ctr(&mut image, &layout, config)?;
                self.sign_bl1(&mut image, &layout, config)?;
            }
            Algorithm::AesGcm => self.encrypt_gcm(&mut image, &layout, config)?,
            Algorithm::HashBinding { .. } => Err(SocsecError::ARG_INVALID_ALGORITHM)?,
        }

        self.verify_bl1(&plain, &image, &layout, config)
            .context("Secure image self verification failed")?;
        Ok(image)
    }

    fn insert_cot(
        &self,
        image: &mut Vec<u8>,
        layout: &Bl1Layout,
        cot: &CotBinding,
        data_offset: u32,
        order: KeyOrder,
    ) -> anyhow::Result<()> {
        let (info, data) = match cot {
            CotBinding::Key {
                algorithm,
                verify_key,
            } => {
                let (key, bin) = self
                    .public_key_binary(verify_key, *algorithm, order)
                    .with_context(|| format!("Failed to load COT key {}", verify_key.display()))?;
                let exp_bits = key.bit_length(RsaComponent::E)? as u32;
                (algorithm.cot_info(exp_bits)?, bin)
            }
            CotBinding::Digest { hash, digest } => {
                if digest.len() != hash.digest_len() {
                    Err(SocsecError::ARG_INVALID_COT_DIGEST_LENGTH)?;
                }
                (cot.algorithm().cot_info(0)?, digest.clone())
            }
        };
        let cot_info = CotInfo { info, data_offset };
        insert_bytes(
            image,
            layout.header_offset as usize + ROT_HEADER_SIZE,
            cot_info.as_bytes(),
        );
        insert_bytes(image, data_offset as usize, &data);
        debug!("COT info {info:#x}, data at {data_offset:#x}");
        Ok(())
    }

    fn sign_bl1(&self, image: &mut Vec<u8>, layout: &Bl1Layout, config: &Bl1Config) -> anyhow::Result<()> {
        let key = config
            .sign_key
            .as_deref()
            .ok_or(SocsecError::ARG_MISSING_SIGN_KEY)?;
        let signed = &image[..layout.sign_image_size as usize];
        let signature = self.sign_region(key, config.algorithm, signed, config.key_order)?;
        insert_bytes(image, layout.signature_offset as usize, &signature);
        Ok(())
    }

    fn encrypt_ctr(&self, image: &mut Vec<u8>, layout: &Bl1Layout, config: &Bl1Config) -> anyhow::Result<()> {
        let aes_key = config
            .aes_key
            .as_deref()
            .ok_or(SocsecError::ARG_MISSING_AES_KEY)?;
        check_aes_key_len(aes_key)?;
        if !config.key_in_otp && config.rsa_aes_key.is_none() {
            Err(SocsecError::ARG_MISSING_RSA_AES_KEY)?;
        }

        let iv = self.iv(AES_IV_SIZE, config.deterministic)?;
        self.crypto
            .aes_ctr_apply(aes_key, &iv, &mut image[layout.encrypted_range()])?;

        let aes_data = match &config.rsa_aes_key {
            Some(rsa_aes_key) if !config.key_in_otp => self
                .encrypt_key_blob(rsa_aes_key, aes_key, &iv, config)
                .with_context(|| format!("Failed to encrypt AES key with {}", rsa_aes_key.display()))?,
            _ => iv,
        };
        insert_bytes(image, layout.aes_data_offset as usize, &aes_data);
        Ok(())
    }

    /// RSA encrypt the `key || iv` blob the ROM decrypts with its SoC key
    fn encrypt_key_blob(
        &self,
        rsa_key_path: &Path,
        aes_key: &[u8],
        iv: &[u8],
        config: &Bl1Config,
    ) -> anyhow::Result<Vec<u8>> {
        let rsa_key = Crypto::rsa_key_from_pem(rsa_key_path)?;
        let mut blob = match config.key_order {
            KeyOrder::Little => vec![0u8; KEY_BLOB_SIZE_LITTLE],
            KeyOrder::Big => vec![0u8; KEY_BLOB_SIZE_BIG],
        };
        insert_bytes(&mut blob, 0, aes_key);
        insert_bytes(&mut blob, KEY_BLOB_IV_OFFSET, iv);
        config.key_order.apply(&mut blob);

        let block = pkcs1_type2_block(&blob, rsa_key.n().len(), |ps| {
            self.padding(ps, config.deterministic)
        })?;
        // A private key file encrypts with its private exponent
        let exponent = rsa_key.d().unwrap_or(rsa_key.e());
        let mut encrypted = self.crypto.rsa_exp(&block, exponent, rsa_key.n())?;
        config.key_order.apply(&mut encrypted);
        Ok(encrypted)
    }

    fn encrypt_gcm(&self, image: &mut Vec<u8>, layout: &Bl1Layout, config: &Bl1Config) -> anyhow::Result<()> {
        let gcm_key = config
            .gcm_key
            .as_deref()
            .ok_or(SocsecError::ARG_MISSING_GCM_KEY)?;
        check_aes_key_len(gcm_key)?;
        let mut nonce = self.iv(GCM_NONCE_SIZE, config.deterministic)?;

        let range = layout.encrypted_range();
        let (aad, rest) = image.split_at_mut(range.start);
        let tag = self
            .crypto
            .aes_gcm_encrypt(gcm_key, &nonce, aad, &mut rest[..range.len()])?;

        nonce.extend_from_slice(&GCM_COUNTER_SUFFIX);
        insert_bytes(image, layout.aes_data_offset as usize, &nonce);
        insert_bytes(image, layout.signature_offset as usize, &gcm_tag_rom_order(&tag));
        Ok(())
    }

    fn verify_bl1(
        &self,
        plain: &[u8],
        image: &[u8],
        layout: &Bl1Layout,
        config: &Bl1Config,
    ) -> anyhow::Result<()> {
        let verify_key = match (&config.algorithm, &config.sign_key) {
            (Algorithm::AesGcm, _) | (_, None) => None,
            (_, Some(path)) => Some(Crypto::rsa_key_from_pem(path)?),
        };
        let args = Bl1VerifyArgs {
            header_offset: layout.header_offset,
            algorithm: config.algorithm,
            key_order: config.key_order,
            verify_key: verify_key.as_ref(),
            aes_key: config.aes_key.as_deref(),
            key_in_otp: config.key_in_otp,
            gcm_key: config.gcm_key.as_deref(),
        };
        ImageVerifier::new(&self.crypto).verify(plain, image, &args)?;
        info!("BL1 secure image verified, {} bytes", image.len());
        Ok(())
    }
}

/// AES-128, AES-192 and AES-256 keys only
fn check_aes_key_len(key: &[u8]) -> SocsecResult<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        _ => Err(SocsecError::ARG_INVALID_AES_KEY_LENGTH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(soc: SocVersion, algorithm: &str, len: usize) -> Bl1Config {
        Bl1Config::new(soc, algorithm.parse().unwrap(), vec![0x5a; len])
    }

    #[test]
    fn test_layout_rsa() {
        let layout = Bl1Layout::new(&config(SocVersion::Ast2600, "RSA4096_SHA512", 0x1234)).unwrap();
        assert_eq!(layout.header_offset, 0x20);
        assert_eq!(layout.enc_offset, 0);
        assert_eq!(layout.aes_data_offset, 0);
        assert_eq!(layout.sign_image_size, 0x1400);
        assert_eq!(layout.signature_offset, 0x1400);
        assert_eq!(layout.flash_patch_offset, 0);
        assert_eq!(layout.cot_data_offset, None);
        assert!(layout.rot_header().checksum_valid());
    }

    #[test]
    fn test_layout_aes_modes() {
        let mut cfg = config(SocVersion::Ast1030, "AES_RSA2048_SHA256", 0x1000);
        let layout = Bl1Layout::new(&cfg).unwrap();
        assert_eq!(layout.header_offset, 0x400);
        assert_eq!(layout.enc_offset, 0x430);
        assert_eq!(layout.aes_data_offset, 0x1000);
        assert_eq!(layout.signature_offset, 0x1000 + 256);

        cfg.key_in_otp = true;
        let layout = Bl1Layout::new(&cfg).unwrap();
        assert_eq!(layout.signature_offset, 0x1000 + 16);

        let layout = Bl1Layout::new(&config(SocVersion::Ast2600, "AES_GCM", 0x1001)).unwrap();
        assert_eq!(layout.enc_offset, 0x50);
        assert_eq!(layout.aes_data_offset, 0x1200);
        assert_eq!(layout.signature_offset, 0x1210);
    }

    #[test]
    fn test_layout_flash_patch() {
        let mut cfg = config(SocVersion::Ast2605, "RSA2048_SHA256", 0x100);
        assert_eq!(Bl1Layout::new(&cfg).unwrap().flash_patch_offset, 0x50);
        cfg.flash_patch_offset = Some(0x80);
        assert_eq!(Bl1Layout::new(&cfg).unwrap().flash_patch_offset, 0x80);
        cfg.soc = SocVersion::Ast2600;
        assert_eq!(Bl1Layout::new(&cfg).unwrap().flash_patch_offset, 0);
    }

    #[test]
    fn test_layout_cot() {
        let mut cfg = config(SocVersion::Ast2600, "RSA2048_SHA256", 0x10);
        cfg.cot = Some(CotBinding::Digest {
            hash: HashKind::Sha256,
            digest: vec![0; 32],
        });
        let layout = Bl1Layout::new(&cfg).unwrap();
        // header 0x20 + ROT header 0x20 + COT info 8, aligned
        assert_eq!(layout.cot_data_offset, Some(0x50));
        assert_eq!(layout.sign_image_size, 0x200);

        cfg.image = vec![0; 0x3f1];
        cfg.cot = Some(CotBinding::Key {
            algorithm: "RSA4096_SHA512".parse().unwrap(),
            verify_key: PathBuf::from("unused.pem"),
        });
        let layout = Bl1Layout::new(&cfg).unwrap();
        assert_eq!(layout.cot_data_offset, Some(0x400));
        assert_eq!(layout.sign_image_size, 0x800);
    }

    #[test]
    fn test_layout_rejects() {
        let mut cfg = config(SocVersion::Ast2600, "RSA2048_SHA256", 0x100);
        cfg.enc_offset = Some(0x51);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::IMAGE_ENC_OFFSET_UNALIGNED));

        cfg.enc_offset = Some(0x40);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::ARG_ENC_OFFSET_BELOW_HEADER));

        let cfg = config(SocVersion::Ast2600, "RSA2048_SHA256", 60 * 1024 + 1);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::IMAGE_TOO_LARGE));

        let mut cfg = config(SocVersion::Ast2600, "RSA2048_SHA256", 60 * 1024 + 1);
        cfg.stack_intersects_verification_region = false;
        assert!(Bl1Layout::new(&cfg).is_ok());

        let cfg = config(SocVersion::Ast1030, "RSA2048_SHA256", 768 * 1024 + 1);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::IMAGE_TOO_LARGE));

        let cfg = config(SocVersion::Ast2600, "SHA256", 0x100);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::ARG_INVALID_ALGORITHM));
    }

    #[test]
    fn test_layout_rejects_header_offset_overflow() {
        let mut cfg = config(SocVersion::Ast2600, "AES_RSA2048_SHA256", 0x1000);
        cfg.header_offset = Some(u32::MAX - 0x10);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::IMAGE_TOO_LARGE));

        cfg.header_offset = Some(60 * 1024 - 0x10);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::IMAGE_TOO_LARGE));

        cfg.soc = SocVersion::Ast1030;
        cfg.image = vec![0x5a; 0x2000];
        cfg.header_offset = Some(0x1000);
        cfg.enc_offset = Some(0x1030);
        assert!(Bl1Layout::new(&cfg).is_ok());
    }

    #[test]
    fn test_layout_rejects_image_shorter_than_header() {
        let cfg = config(SocVersion::Ast2600, "RSA2048_SHA256", 0);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::IMAGE_TRUNCATED));

        let mut cfg = config(SocVersion::Ast2600, "RSA2048_SHA256", 0x100);
        cfg.header_offset = Some(0x200);
        cfg.enc_offset = Some(0x240);
        assert_eq!(Bl1Layout::new(&cfg), Err(SocsecError::IMAGE_TRUNCATED));

        // A short image is padded up to the signing alignment
        let cfg = config(SocVersion::Ast2600, "RSA2048_SHA256", 1);
        assert_eq!(Bl1Layout::new(&cfg).unwrap().sign_image_size, 0x200);
    }

    #[test]
    fn test_aes_key_len() {
        for len in [16, 24, 32] {
            assert_eq!(check_aes_key_len(&vec![0; len]), Ok(()));
        }
        for len in [0, 15, 20, 33] {
            assert_eq!(
                check_aes_key_len(&vec![0; len]),
                Err(SocsecError::ARG_INVALID_AES_KEY_LENGTH)
            );
        }
    }
}
