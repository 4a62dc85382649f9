/*++

Licensed under the Apache-2.0 license.

File Name:

    chain.rs

Abstract:

    Verification of chain-of-trust partition images.

--*/

use crate::*;
use log::{error, info};

/// What the previous stage vouches for
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StageTrust {
    /// The stage must carry a signature made by `key`
    Key { key: RsaKey, algorithm: Algorithm },

    /// The stage's signed region must hash to `digest`
    Digest { hash: HashKind, digest: Vec<u8> },
}

pub struct ChainVerifier<Env: ImageVerificationEnv> {
    env: Env,
}

impl<Env: ImageVerificationEnv> ChainVerifier<Env> {
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Verify every stage in order, starting from the trust anchor `root`.
    ///
    /// The trust for stage i+1 is read out of stage i only after stage i
    /// itself verified.
    pub fn verify(&self, images: &[&[u8]], root: StageTrust, order: KeyOrder) -> SocsecResult<()> {
        if images.is_empty() {
            Err(SocsecError::ARG_EMPTY_CHAIN)?;
        }

        let mut trust = root;
        for (i, image) in images.iter().enumerate() {
            info!("BL{} verifying", i + 2);
            let header = CotHeader::read_from_image(image)?;
            if !header.magic_valid() {
                error!("header magic word verify failed");
                Err(SocsecError::INVALID_COT_MAGIC)?;
            }
            info!("check header magic word PASS");

            self.verify_stage(image, &header, &trust, order)?;
            info!("check integrity PASS");

            if i + 1 < images.len() {
                trust = next_trust(image, &header, order)?;
            }
        }
        Ok(())
    }

    fn verify_stage(
        &self,
        image: &[u8],
        header: &CotHeader,
        trust: &StageTrust,
        order: KeyOrder,
    ) -> SocsecResult<()> {
        let signed = slice_at(image, 0, header.sign_image_size() as usize)?;
        match trust {
            StageTrust::Key { key, algorithm } => {
                let hash = algorithm
                    .hash_kind()
                    .ok_or(SocsecError::ARG_ALGORITHM_NOT_SIGNING)?;
                let signature = slice_at(
                    image,
                    header.signature_offset() as usize,
                    algorithm.signature_len(),
                )?;
                let digest = self.env.digest(hash, signed)?;
                if !rsa_digest_matches(&self.env, signature, key.e(), key.n(), &digest, order)? {
                    error!("signature verify failed");
                    Err(SocsecError::CHAIN_SIGNATURE_MISMATCH)?;
                }
            }
            StageTrust::Digest { hash, digest } => {
                if self.env.digest(*hash, signed)? != *digest {
                    error!("chained image digest mismatch");
                    Err(SocsecError::IMAGE_COT_DIGEST_MISMATCH)?;
                }
            }
        }
        Ok(())
    }
}

/// Read the trust anchor for the following stage out of a verified stage
fn next_trust(image: &[u8], header: &CotHeader, order: KeyOrder) -> SocsecResult<StageTrust> {
    link_trust(image, header.info(), header.next_pubkey_offset() as usize, order)
}

/// Trust anchor of the first chained stage, read from the COT info record of
/// a verified (and, when encrypted, decrypted) BL1 image
pub fn bl1_cot_trust(image: &[u8], header_offset: u32, order: KeyOrder) -> SocsecResult<StageTrust> {
    let cot_info = CotInfo::read_at(image, header_offset as usize + ROT_HEADER_SIZE)?;
    if cot_info.data_offset() == 0 {
        Err(SocsecError::ARG_MISSING_COT_DATA)?;
    }
    link_trust(image, cot_info.info(), cot_info.data_offset() as usize, order)
}

fn link_trust(image: &[u8], info: u32, offset: usize, order: KeyOrder) -> SocsecResult<StageTrust> {
    match Algorithm::from_cot_info(info) {
        algorithm @ Algorithm::RsaSha { .. } => {
            let bin = slice_at(image, offset, algorithm.public_key_len())?;
            Ok(StageTrust::Key {
                key: RsaKey::from_binary(bin, order)?,
                algorithm,
            })
        }
        Algorithm::HashBinding { hash } => Ok(StageTrust::Digest {
            hash,
            digest: slice_at(image, offset, hash.digest_len())?.to_vec(),
        }),
        Algorithm::AesRsaSha { .. } | Algorithm::AesGcm => {
            Err(SocsecError::ARG_COT_ALGORITHM_UNSUPPORTED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use zerocopy::IntoBytes;

    const HASH: HashKind = HashKind::Sha256;

    /// Stage whose next link is a digest of `next`, or nothing
    fn hash_stage(payload: &[u8], next: Option<&[u8]>) -> Vec<u8> {
        let env = TestEnv::default();
        let mut image = vec![0u8; COT_HEADER_SIZE];
        image.extend_from_slice(payload);
        let (info, next_offset, size) = match next {
            Some(next) => {
                let offset = align_up(image.len(), 16);
                let next_header = CotHeader::read_from_image(next).unwrap();
                let digest = env
                    .digest(HASH, &next[..next_header.sign_image_size() as usize])
                    .unwrap();
                insert_bytes(&mut image, offset, &digest);
                let info = Algorithm::HashBinding { hash: HASH }.cot_info(0).unwrap();
                (info, offset, offset + digest.len())
            }
            None => (0, 0, align_up(image.len(), 16)),
        };
        let size = align_up(size, SIGN_IMAGE_ALIGN);
        image.resize(size, 0);
        let header = CotHeader::new(info, size as u32, size as u32, next_offset as u32);
        insert_bytes(&mut image, 0, header.as_bytes());
        image
    }

    fn build_chain() -> Vec<Vec<u8>> {
        let last = hash_stage(b"stage three", None);
        let middle = hash_stage(b"stage two", Some(&last));
        let first = hash_stage(b"stage one", Some(&middle));
        vec![first, middle, last]
    }

    fn root_of(image: &[u8]) -> StageTrust {
        let header = CotHeader::read_from_image(image).unwrap();
        StageTrust::Digest {
            hash: HASH,
            digest: TestEnv::default()
                .digest(HASH, &image[..header.sign_image_size() as usize])
                .unwrap(),
        }
    }

    fn verify(chain: &[Vec<u8>], root: StageTrust) -> SocsecResult<()> {
        let images: Vec<&[u8]> = chain.iter().map(|image| image.as_slice()).collect();
        ChainVerifier::new(TestEnv::default()).verify(&images, root, KeyOrder::Little)
    }

    #[test]
    fn test_hash_chain() {
        let chain = build_chain();
        assert_eq!(verify(&chain, root_of(&chain[0])), Ok(()));
    }

    #[test]
    fn test_hash_chain_flipped_byte() {
        let chain = build_chain();
        let root = root_of(&chain[0]);
        for stage in 0..chain.len() {
            let mut tampered = chain.clone();
            tampered[stage][COT_HEADER_SIZE + 1] ^= 0x80;
            assert_eq!(
                verify(&tampered, root.clone()),
                Err(SocsecError::IMAGE_COT_DIGEST_MISMATCH),
                "stage {stage}"
            );
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut chain = build_chain();
        let root = root_of(&chain[0]);
        chain[1][0] = b'X';
        assert_eq!(verify(&chain, root), Err(SocsecError::INVALID_COT_MAGIC));
    }

    #[test]
    fn test_empty_chain() {
        assert_eq!(
            verify(&[], root_of(&build_chain()[0])),
            Err(SocsecError::ARG_EMPTY_CHAIN)
        );
    }

    #[test]
    fn test_rsa_root_mismatch() {
        let chain = build_chain();
        let root = StageTrust::Key {
            key: RsaKey::public(&TOY_N, &TOY_E).unwrap(),
            algorithm: "RSA1024_SHA256".parse().unwrap(),
        };
        // The unsigned stage has no room for a signature past its signed region
        assert_eq!(verify(&chain, root), Err(SocsecError::IMAGE_OUT_OF_BOUNDS));
    }

    #[test]
    fn test_bl1_cot_trust() {
        let chain = build_chain();
        let StageTrust::Digest { digest, .. } = root_of(&chain[0]) else {
            unreachable!()
        };
        let mut bl1 = vec![0u8; 0x200];
        let info = Algorithm::HashBinding { hash: HASH }.cot_info(0).unwrap();
        let cot_info = CotInfo {
            info,
            data_offset: 0x100,
        };
        insert_bytes(&mut bl1, 0x20 + ROT_HEADER_SIZE, cot_info.as_bytes());
        insert_bytes(&mut bl1, 0x100, &digest);

        let root = bl1_cot_trust(&bl1, 0x20, KeyOrder::Little).unwrap();
        assert_eq!(root, root_of(&chain[0]));
        assert_eq!(verify(&chain, root), Ok(()));

        assert_eq!(
            bl1_cot_trust(&[0u8; 0x200], 0x20, KeyOrder::Little),
            Err(SocsecError::ARG_MISSING_COT_DATA)
        );
    }
}
