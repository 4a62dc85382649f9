/*++

Licensed under the Apache-2.0 license.

File Name:

   chain.rs

Abstract:

    Chain-of-trust partition image generation.

--*/
use anyhow::Context;
use log::{debug, info};
use socsec_image_verify::{ChainVerifier, StageTrust};
use zerocopy::IntoBytes;

use crate::*;

/// One generated partition image
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChainStage {
    pub output: PathBuf,
    pub image: Vec<u8>,
}

/// Chain generator output
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChainImages {
    pub stages: Vec<ChainStage>,

    /// Digest of the first stage, for digest bound chains. This is what the
    /// BL1 image binds to.
    pub root_digest: Option<Vec<u8>>,
}

impl<Crypto: ImageGeneratorCrypto, Signer: ImageSigner> ImageGenerator<Crypto, Signer> {
    /// Generate the partition images of a chain of trust.
    ///
    /// The whole chain is verified before it is returned, so nothing needs
    /// to be written for a chain that does not verify.
    pub fn generate_chain(&self, config: &ChainConfig) -> anyhow::Result<ChainImages> {
        if config.stages.is_empty() {
            Err(SocsecError::ARG_EMPTY_CHAIN)?;
        }

        let (images, root) = match config.algorithm {
            Algorithm::RsaSha { .. } => self.rsa_chain(config)?,
            Algorithm::HashBinding { hash } => self.hash_chain(config, hash)?,
            Algorithm::AesRsaSha { .. } | Algorithm::AesGcm => {
                Err(SocsecError::ARG_COT_ALGORITHM_UNSUPPORTED)?
            }
        };

        let refs: Vec<&[u8]> = images.iter().map(|image| image.as_slice()).collect();
        ChainVerifier::new(&self.crypto)
            .verify(&refs, root.clone(), config.key_order)
            .context("Chain of trust self verification failed")?;

        let root_digest = match root {
            StageTrust::Digest { digest, .. } => {
                info!("BL2 digest: {}", hex::encode(&digest));
                Some(digest)
            }
            StageTrust::Key { .. } => None,
        };
        let stages = config
            .stages
            .iter()
            .zip(images)
            .map(|((partition, _), image)| ChainStage {
                output: partition.output.clone(),
                image,
            })
            .collect();
        Ok(ChainImages {
            stages,
            root_digest,
        })
    }

    /// Every stage signed by its own key and carrying the public key of the
    /// next stage's signing key
    fn rsa_chain(&self, config: &ChainConfig) -> anyhow::Result<(Vec<Vec<u8>>, StageTrust)> {
        let algorithm = config.algorithm;
        let order = config.key_order;
        let mut images = Vec::with_capacity(config.stages.len());

        for (i, (partition, payload)) in config.stages.iter().enumerate() {
            let sign_key = partition
                .sign_key
                .as_deref()
                .ok_or(SocsecError::ARG_MISSING_SIGN_KEY)?;

            let link = match config.stages.get(i + 1) {
                Some((next, _)) => {
                    let next_key = next
                        .sign_key
                        .as_deref()
                        .ok_or(SocsecError::ARG_MISSING_SIGN_KEY)?;
                    let (key, bin) = self
                        .public_key_binary(next_key, algorithm, order)
                        .with_context(|| format!("Failed to load key {}", next_key.display()))?;
                    let exp_bits = key.bit_length(RsaComponent::E)? as u32;
                    Some((algorithm.cot_info(exp_bits)?, bin))
                }
                None => None,
            };

            let mut image = stage_image(payload, link);
            let sign_size = CotHeader::read_from_image(&image)?.sign_image_size() as usize;
            let signature = self
                .sign_region(sign_key, algorithm, &image[..sign_size], order)
                .with_context(|| format!("Failed to sign {}", partition.input.display()))?;
            image.extend_from_slice(&signature);
            debug!("BL{} signed, {} bytes", i + 2, image.len());
            images.push(image);
        }

        let root_key = config.stages[0]
            .0
            .verify_key
            .as_deref()
            .ok_or(SocsecError::ARG_MALFORMED_CHAIN_PARTITION)?;
        let root = StageTrust::Key {
            key: Crypto::rsa_key_from_pem(root_key)?,
            algorithm,
        };
        Ok((images, root))
    }

    /// Every stage carrying the digest of the next one. Built from the last
    /// stage backwards.
    fn hash_chain(
        &self,
        config: &ChainConfig,
        hash: HashKind,
    ) -> anyhow::Result<(Vec<Vec<u8>>, StageTrust)> {
        let info = config.algorithm.cot_info(0)?;
        let mut images: Vec<Vec<u8>> = Vec::with_capacity(config.stages.len());
        let mut next_digest: Option<Vec<u8>> = None;

        for (_, payload) in config.stages.iter().rev() {
            let link = next_digest.take().map(|digest| (info, digest));
            let image = stage_image(payload, link);
            let sign_size = CotHeader::read_from_image(&image)?.sign_image_size() as usize;
            next_digest = Some(self.crypto.digest(hash, &image[..sign_size])?);
            images.push(image);
        }
        images.reverse();

        let digest = next_digest.ok_or(SocsecError::ARG_EMPTY_CHAIN)?;
        Ok((images, StageTrust::Digest { hash, digest }))
    }
}

/// COT header, payload and the optional link to the next stage, padded to
/// the signed size
fn stage_image(payload: &[u8], link: Option<(u32, Vec<u8>)>) -> Vec<u8> {
    let mut image = vec![0u8; COT_HEADER_SIZE];
    image.extend_from_slice(payload);

    let (info, next_offset, signed_len) = match link {
        Some((info, data)) => {
            let offset = align_up(image.len(), 16);
            insert_bytes(&mut image, offset, &data);
            (info, offset, offset + data.len())
        }
        None => (0, 0, align_up(image.len(), 16)),
    };
    let sign_image_size = align_up(signed_len, SIGN_IMAGE_ALIGN);
    image.resize(sign_image_size, 0);

    let header = CotHeader::new(
        info,
        sign_image_size as u32,
        sign_image_size as u32,
        next_offset as u32,
    );
    insert_bytes(&mut image, 0, header.as_bytes());
    image
}
