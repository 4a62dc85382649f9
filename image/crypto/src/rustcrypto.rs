/*++

Licensed under the Apache-2.0 license.

File Name:

   rustcrypto.rs

Abstract:

    Image crypto backed by the RustCrypto crates.

--*/

use std::path::Path;

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{AesGcm, Nonce, Tag};
use anyhow::anyhow;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::{rngs::OsRng, RngCore};
use rsa::BigUint;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use socsec_error::{SocsecError, SocsecResult};
use socsec_image_gen::ImageGeneratorCrypto;
use socsec_image_types::*;
use socsec_image_verify::ImageVerificationEnv;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

#[derive(Default)]
pub struct RustCrypto {}

fn ctr_apply<C: KeyIvInit + StreamCipher>(key: &[u8], iv: &[u8], data: &mut [u8]) -> SocsecResult<()> {
    let mut cipher =
        C::new_from_slices(key, iv).map_err(|_| SocsecError::ARG_INVALID_AES_KEY_LENGTH)?;
    cipher.apply_keystream(data);
    Ok(())
}

fn gcm_cipher<C: KeyInit>(key: &[u8]) -> SocsecResult<C> {
    C::new_from_slice(key).map_err(|_| SocsecError::ARG_INVALID_AES_KEY_LENGTH)
}

impl ImageVerificationEnv for RustCrypto {
    fn digest(&self, hash: HashKind, data: &[u8]) -> SocsecResult<Vec<u8>> {
        Ok(match hash {
            HashKind::Sha224 => Sha224::digest(data).to_vec(),
            HashKind::Sha256 => Sha256::digest(data).to_vec(),
            HashKind::Sha384 => Sha384::digest(data).to_vec(),
            HashKind::Sha512 => Sha512::digest(data).to_vec(),
        })
    }

    fn rsa_exp(&self, base: &[u8], exp: &[u8], modulus: &[u8]) -> SocsecResult<Vec<u8>> {
        let n = BigUint::from_bytes_be(modulus);
        if n == BigUint::from(0u8) {
            Err(SocsecError::KEY_RSA_OPERATION_FAILED)?;
        }
        let out = BigUint::from_bytes_be(base)
            .modpow(&BigUint::from_bytes_be(exp), &n)
            .to_bytes_be();
        let mut padded = vec![0u8; modulus.len().saturating_sub(out.len())];
        padded.extend(out);
        Ok(padded)
    }

    fn aes_ctr_apply(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> SocsecResult<()> {
        if iv.len() != AES_IV_SIZE {
            Err(SocsecError::INTERNAL)?;
        }
        match key.len() {
            16 => ctr_apply::<Aes128Ctr>(key, iv, data),
            24 => ctr_apply::<Aes192Ctr>(key, iv, data),
            32 => ctr_apply::<Aes256Ctr>(key, iv, data),
            _ => Err(SocsecError::ARG_INVALID_AES_KEY_LENGTH),
        }
    }

    fn aes_gcm_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        data: &mut [u8],
        tag: &[u8],
    ) -> SocsecResult<()> {
        if nonce.len() != GCM_NONCE_SIZE || tag.len() != GCM_TAG_SIZE {
            Err(SocsecError::IMAGE_GCM_AUTH_FAILED)?;
        }
        let nonce = Nonce::from_slice(nonce);
        let tag = Tag::from_slice(tag);
        let result = match key.len() {
            16 => gcm_cipher::<Aes128Gcm>(key)?.decrypt_in_place_detached(nonce, aad, data, tag),
            24 => gcm_cipher::<Aes192Gcm>(key)?.decrypt_in_place_detached(nonce, aad, data, tag),
            32 => gcm_cipher::<Aes256Gcm>(key)?.decrypt_in_place_detached(nonce, aad, data, tag),
            _ => Err(SocsecError::ARG_INVALID_AES_KEY_LENGTH)?,
        };
        result.map_err(|_| SocsecError::IMAGE_GCM_AUTH_FAILED)
    }
}

impl ImageGeneratorCrypto for RustCrypto {
    fn fill_random(&self, buf: &mut [u8]) -> anyhow::Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|err| anyhow!("Failed to read random bytes: {err}"))
    }

    fn aes_gcm_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        data: &mut [u8],
    ) -> anyhow::Result<[u8; GCM_TAG_SIZE]> {
        if nonce.len() != GCM_NONCE_SIZE {
            Err(SocsecError::INTERNAL)?;
        }
        let nonce = Nonce::from_slice(nonce);
        let tag = match key.len() {
            16 => gcm_cipher::<Aes128Gcm>(key)?.encrypt_in_place_detached(nonce, aad, data),
            24 => gcm_cipher::<Aes192Gcm>(key)?.encrypt_in_place_detached(nonce, aad, data),
            32 => gcm_cipher::<Aes256Gcm>(key)?.encrypt_in_place_detached(nonce, aad, data),
            _ => Err(SocsecError::ARG_INVALID_AES_KEY_LENGTH)?,
        }
        .map_err(|_| anyhow!("AES-GCM encryption failed"))?;
        Ok(tag.into())
    }

    fn rsa_key_from_pem(path: &Path) -> anyhow::Result<RsaKey> {
        crate::rsa_key_from_pem_file(path)
    }
}
