/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for the secure boot image generator.

--*/

mod bl1;
mod chain;

pub use bl1::Bl1Layout;
pub use chain::{ChainImages, ChainStage};

use socsec_error::{SocsecError, SocsecResult};
use socsec_image_types::*;
use socsec_image_verify::ImageVerificationEnv;
use std::path::{Path, PathBuf};

/// Image Generator Crypto Trait
pub trait ImageGeneratorCrypto: ImageVerificationEnv {
    /// Fill `buf` from a cryptographically secure source
    fn fill_random(&self, buf: &mut [u8]) -> anyhow::Result<()>;

    /// Encrypt `data` in place with AES-GCM and return the tag
    fn aes_gcm_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        data: &mut [u8],
    ) -> anyhow::Result<[u8; GCM_TAG_SIZE]>;

    /// Read an RSA key (private or public) from a PEM file
    fn rsa_key_from_pem(path: &Path) -> anyhow::Result<RsaKey>;
}

/// Produces raw RSA signatures.
///
/// `message` is the block to sign, already in big endian order. The result
/// is the PKCS#1 v1.5 signature without a DigestInfo prefix, big endian.
pub trait ImageSigner {
    fn sign(&self, key_path: &Path, message: &[u8]) -> anyhow::Result<Vec<u8>>;
}

impl<T: ImageSigner + ?Sized> ImageSigner for &T {
    fn sign(&self, key_path: &Path, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        (**self).sign(key_path, message)
    }
}

/// Data a BL1 image carries for the next boot stage
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CotBinding {
    /// Public key that signs the next stage
    Key {
        algorithm: Algorithm,
        verify_key: PathBuf,
    },

    /// Digest of the next stage's signed region
    Digest { hash: HashKind, digest: Vec<u8> },
}

impl CotBinding {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            CotBinding::Key { algorithm, .. } => *algorithm,
            CotBinding::Digest { hash, .. } => Algorithm::HashBinding { hash: *hash },
        }
    }

    /// Bytes reserved for the binding data
    pub fn data_len(&self) -> usize {
        match self {
            CotBinding::Key { algorithm, .. } => algorithm.public_key_len(),
            CotBinding::Digest { hash, .. } => hash.digest_len(),
        }
    }
}

/// BL1 Image Generator Configuration
#[derive(Debug, Clone)]
pub struct Bl1Config {
    pub soc: SocVersion,

    pub algorithm: Algorithm,

    /// Plain BL1 binary
    pub image: Vec<u8>,

    pub header_offset: Option<u32>,

    pub enc_offset: Option<u32>,

    /// Only honoured on AST2605
    pub flash_patch_offset: Option<u32>,

    pub key_order: KeyOrder,

    pub stack_intersects_verification_region: bool,

    pub sign_key: Option<PathBuf>,

    pub aes_key: Option<Vec<u8>>,

    /// Key that encrypts the AES key blob when the AES key is not in OTP
    pub rsa_aes_key: Option<PathBuf>,

    pub key_in_otp: bool,

    pub gcm_key: Option<Vec<u8>>,

    pub cot: Option<CotBinding>,

    /// Zero IVs and fixed padding, for reproducible output
    pub deterministic: bool,
}

impl Bl1Config {
    pub fn new(soc: SocVersion, algorithm: Algorithm, image: Vec<u8>) -> Self {
        Self {
            soc,
            algorithm,
            image,
            header_offset: None,
            enc_offset: None,
            flash_patch_offset: None,
            key_order: KeyOrder::default(),
            stack_intersects_verification_region: true,
            sign_key: None,
            aes_key: None,
            rsa_aes_key: None,
            key_in_otp: false,
            gcm_key: None,
            cot: None,
            deterministic: false,
        }
    }
}

/// One `input:output:sign_key:verify_key` chain partition descriptor
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChainPartition {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sign_key: Option<PathBuf>,
    pub verify_key: Option<PathBuf>,
}

impl ChainPartition {
    /// Parse a descriptor; `relative_path` is prepended to both image paths.
    ///
    /// Key fields may be left empty for digest bound chains.
    pub fn parse(descriptor: &str, relative_path: &str) -> SocsecResult<Self> {
        let fields: Vec<&str> = descriptor.split(':').collect();
        let [input, output, sign_key, verify_key] = fields.as_slice() else {
            return Err(SocsecError::ARG_MALFORMED_CHAIN_PARTITION);
        };
        if input.is_empty() || output.is_empty() {
            return Err(SocsecError::ARG_MALFORMED_CHAIN_PARTITION);
        }
        let key = |field: &str| (!field.is_empty()).then(|| PathBuf::from(field));
        Ok(Self {
            input: PathBuf::from(format!("{relative_path}{input}")),
            output: PathBuf::from(format!("{relative_path}{output}")),
            sign_key: key(*sign_key),
            verify_key: key(*verify_key),
        })
    }
}

/// Chain Image Generator Configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// RSA_SHA for signed links, SHA* for digest links
    pub algorithm: Algorithm,

    pub key_order: KeyOrder,

    /// Partitions with their input images, in boot order
    pub stages: Vec<(ChainPartition, Vec<u8>)>,
}

/// Image generator
pub struct ImageGenerator<Crypto: ImageGeneratorCrypto, Signer: ImageSigner> {
    crypto: Crypto,
    signer: Signer,
}

impl<Crypto: ImageGeneratorCrypto, Signer: ImageSigner> ImageGenerator<Crypto, Signer> {
    /// Create an instance `ImageGenerator`
    pub fn new(crypto: Crypto, signer: Signer) -> Self {
        Self { crypto, signer }
    }

    /// Sign `signed` with the key at `key_path`.
    ///
    /// The returned field holds the signature in `order`, zero padded to
    /// the signature field size.
    fn sign_region(
        &self,
        key_path: &Path,
        algorithm: Algorithm,
        signed: &[u8],
        order: KeyOrder,
    ) -> anyhow::Result<Vec<u8>> {
        let hash = algorithm
            .hash_kind()
            .ok_or(SocsecError::ARG_ALGORITHM_NOT_SIGNING)?;
        let mut message = self.crypto.digest(hash, signed)?;
        order.apply(&mut message);

        let mut signature = self.signer.sign(key_path, &message)?;
        order.apply(&mut signature);
        if signature.len() < SIGNATURE_FIELD_SIZE {
            signature.resize(SIGNATURE_FIELD_SIZE, 0);
        }
        Ok(signature)
    }

    /// Random IV, or zeros in deterministic mode
    fn iv(&self, len: usize, deterministic: bool) -> anyhow::Result<Vec<u8>> {
        let mut iv = vec![0u8; len];
        if !deterministic {
            self.crypto.fill_random(&mut iv)?;
        }
        Ok(iv)
    }

    /// Non-zero padding bytes; 0xff in deterministic mode
    fn padding(&self, buf: &mut [u8], deterministic: bool) -> anyhow::Result<()> {
        if deterministic {
            buf.fill(0xff);
            return Ok(());
        }
        self.crypto.fill_random(buf)?;
        for byte in buf.iter_mut() {
            while *byte == 0 {
                let mut retry = [0u8; 1];
                self.crypto.fill_random(&mut retry)?;
                *byte = retry[0];
            }
        }
        Ok(())
    }

    /// Public key bytes of the PEM key at `path`, checked against `algorithm`
    fn public_key_binary(
        &self,
        path: &Path,
        algorithm: Algorithm,
        order: KeyOrder,
    ) -> anyhow::Result<(RsaKey, Vec<u8>)> {
        let key = Crypto::rsa_key_from_pem(path)?;
        if Some(key.rsa_size()?) != algorithm.rsa_size() {
            Err(SocsecError::KEY_SIZE_MISMATCH)?;
        }
        let bin = key.to_binary(KeyPart::Public, order)?;
        Ok((key, bin))
    }
}

/// EME-PKCS1-v1_5 block of `message` for a `k` byte modulus
pub(crate) fn pkcs1_type2_block(
    message: &[u8],
    k: usize,
    padding: impl FnOnce(&mut [u8]) -> anyhow::Result<()>,
) -> anyhow::Result<Vec<u8>> {
    let ps_len = k
        .checked_sub(message.len() + 3)
        .filter(|len| *len >= 8)
        .ok_or(SocsecError::KEY_SIZE_UNSUPPORTED)?;
    let mut block = vec![0u8; k];
    block[1] = 0x02;
    padding(&mut block[2..2 + ps_len])?;
    block[3 + ps_len..].copy_from_slice(message);
    Ok(block)
}
