/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains crypto utilities needed to generate and verify images.

--*/

mod rustcrypto;
mod signer;

pub use rustcrypto::RustCrypto;
pub use signer::{ExternalSigner, HelperMode, LocalSigner};

use std::path::Path;

use anyhow::Context;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{RsaPrivateKey, RsaPublicKey};
use socsec_error::SocsecError;
use socsec_image_types::RsaKey;

const PEM_BEGIN: &str = "-----BEGIN ";

/// Read a PEM file holding an RSA private key (PKCS#1 or PKCS#8) or public
/// key (PKCS#1 or SubjectPublicKeyInfo)
pub fn rsa_key_from_pem_file(path: &Path) -> anyhow::Result<RsaKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;
    rsa_key_from_pem(&pem).with_context(|| format!("Failed to parse key file {}", path.display()))
}

/// Parse PEM text; anything before the first armor line is ignored
pub fn rsa_key_from_pem(pem: &str) -> anyhow::Result<RsaKey> {
    let start = pem.find(PEM_BEGIN).ok_or(SocsecError::KEY_PEM_INVALID)?;
    let pem = &pem[start..];

    if let Some(key) = private_key_from_pem(pem) {
        let n = key.n().to_bytes_be();
        let e = key.e().to_bytes_be();
        let d = key.d().to_bytes_be();
        return Ok(RsaKey::new(&n, &e, Some(&d))?);
    }
    if let Some(key) = public_key_from_pem(pem) {
        return Ok(RsaKey::public(&key.n().to_bytes_be(), &key.e().to_bytes_be())?);
    }
    Err(SocsecError::KEY_PEM_INVALID.into())
}

fn private_key_from_pem(pem: &str) -> Option<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .ok()
        .or_else(|| RsaPrivateKey::from_pkcs8_pem(pem).ok())
}

fn public_key_from_pem(pem: &str) -> Option<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .ok()
        .or_else(|| RsaPublicKey::from_pkcs1_pem(pem).ok())
}

/// Load a private key for signing
pub(crate) fn rsa_private_key_from_pem_file(path: &Path) -> anyhow::Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;
    let start = pem.find(PEM_BEGIN).ok_or(SocsecError::KEY_PEM_INVALID)?;
    if let Some(key) = private_key_from_pem(&pem[start..]) {
        return Ok(key);
    }
    if public_key_from_pem(&pem[start..]).is_some() {
        Err(SocsecError::KEY_NOT_PRIVATE)?;
    }
    Err(SocsecError::KEY_PEM_INVALID.into())
}
