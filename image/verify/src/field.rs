/*++

Licensed under the Apache-2.0 license.

File Name:

    field.rs

Abstract:

    Verification of a secure boot image against the keys and configuration
    burned into OTP, the way the boot ROM performs it.

--*/

use crate::rot::{encrypted_range, rom_tag};
use crate::*;
use core::fmt;
use log::{debug, error, info};

/// Bytes past the signed region that take part in ROT checks
const ROT_TRAILER_SIZE: usize = 1024;

/// Low-order exponent bytes the ROM reads for public keys
const PUBLIC_EXP_SIZE: usize = 3;

const AES_VAULT_KEY_SIZE: usize = 32;

/// Verification stages, in the order they run
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FieldStage {
    HeaderCheck,
    ConfigDecode,
    KeyListParse,
    SignatureVerify,
    Decrypt,
    Done,
}

impl fmt::Display for FieldStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldStage::HeaderCheck => "header check",
            FieldStage::ConfigDecode => "config decode",
            FieldStage::KeyListParse => "key list parse",
            FieldStage::SignatureVerify => "signature verify",
            FieldStage::Decrypt => "decrypt",
            FieldStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Secure boot settings decoded from the config region
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SecureBootConfig {
    pub algorithm: Algorithm,
    pub rsa_size: RsaSize,
    pub header_offset: u32,
    /// Bit n set: key id n is retired
    pub retire_bitmap: u32,
}

impl SecureBootConfig {
    pub fn decode(soc: SocVersion, otp: &OtpContents) -> SocsecResult<Self> {
        let cfg0 = otp.config_dw(0);
        let header_word = otp.config_dw(2);
        let retire_word = otp.config_dw(3);

        let mode_2 = (cfg0 >> 7) & 1 != 0;
        let rsa = RsaSize::from_code(cfg0 >> 10);
        let hash = HashKind::from_code(cfg0 >> 12);
        let encrypted = (cfg0 >> 27) & 1 != 0;

        let header_offset = match header_word & 0xffff {
            // 2605 shares the 2600 default
            0 => soc.default_header_offset(),
            offset => offset,
        };
        let retire_bitmap = (retire_word & 0x7f) | ((retire_word >> 16) & 0x7f);

        let algorithm = match soc {
            SocVersion::Ast2600 | SocVersion::Ast2605 if !mode_2 => Algorithm::AesGcm,
            SocVersion::Ast1030 if mode_2 => Err(SocsecError::FIELD_PFR_MODE_UNSUPPORTED)?,
            _ if encrypted => Algorithm::AesRsaSha { rsa, hash },
            _ => Algorithm::RsaSha { rsa, hash },
        };
        info!("Algorithm: {algorithm}");
        info!("RSA length: {}", rsa.bits());
        info!("HASH length: {}", hash.bits());

        Ok(Self {
            algorithm,
            rsa_size: rsa,
            header_offset,
            retire_bitmap,
        })
    }

    pub fn is_retired(&self, id: u32) -> bool {
        self.retire_bitmap & (1 << id) != 0
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum KeyMaterial {
    /// Modulus and exponent as stored, in the OTP key order
    Rsa { m: Vec<u8>, e: Vec<u8> },
    Aes(Vec<u8>),
    AesVault(Vec<u8>, Vec<u8>),
}

/// A key recovered from the OTP data region
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OtpKey {
    pub id: u32,
    pub key_type: KeyType,
    pub retired: bool,
    pub material: KeyMaterial,
}

impl OtpKey {
    fn rsa(&self) -> Option<(&[u8], &[u8])> {
        match &self.material {
            KeyMaterial::Rsa { m, e } => Some((m.as_slice(), e.as_slice())),
            _ => None,
        }
    }
}

/// Outcome of a successful verification
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FieldVerification {
    pub algorithm: Algorithm,
    /// Id of the OEM key that authenticated the image
    pub key_id: u32,
    pub header_offset: u32,
    pub key_order: KeyOrder,
    /// Decrypted image followed by everything past the signed region
    pub decrypted: Option<Vec<u8>>,
}

struct Session {
    config: SecureBootConfig,
    order: KeyOrder,
    keys: Vec<OtpKey>,
    header: RotHeader,
}

enum State {
    HeaderCheck,
    ConfigDecode(OtpContents),
    KeyListParse(OtpContents, SecureBootConfig),
    SignatureVerify(SecureBootConfig, KeyOrder, Vec<OtpKey>),
    Decrypt(Session, u32),
    Done(FieldVerification),
}

impl State {
    fn stage(&self) -> FieldStage {
        match self {
            State::HeaderCheck => FieldStage::HeaderCheck,
            State::ConfigDecode(..) => FieldStage::ConfigDecode,
            State::KeyListParse(..) => FieldStage::KeyListParse,
            State::SignatureVerify(..) => FieldStage::SignatureVerify,
            State::Decrypt(..) => FieldStage::Decrypt,
            State::Done(..) => FieldStage::Done,
        }
    }
}

pub struct FieldVerifier<Env: ImageVerificationEnv> {
    env: Env,
    soc: SocVersion,
}

impl<Env: ImageVerificationEnv> FieldVerifier<Env> {
    pub fn new(env: Env, soc: SocVersion) -> Self {
        Self { env, soc }
    }

    /// Verify `sec_image` against the OTP content in `otp_image`
    pub fn verify(&self, otp_image: &[u8], sec_image: &[u8]) -> SocsecResult<FieldVerification> {
        let mut state = State::HeaderCheck;
        loop {
            let stage = state.stage();
            debug!("field verifier stage: {stage}");
            state = match self.step(state, otp_image, sec_image) {
                Ok(State::Done(result)) => return Ok(result),
                Ok(next) => next,
                Err(err) => {
                    error!("{stage} failed: {err}");
                    return Err(err);
                }
            };
        }
    }

    fn step(&self, state: State, otp_image: &[u8], sec_image: &[u8]) -> SocsecResult<State> {
        match state {
            State::HeaderCheck => {
                let otp = OtpImageParser::new(&self.env).parse(otp_image)?;
                info!("check OTP image PASS");
                Ok(State::ConfigDecode(otp))
            }
            State::ConfigDecode(otp) => {
                let config = SecureBootConfig::decode(self.soc, &otp)?;
                Ok(State::KeyListParse(otp, config))
            }
            State::KeyListParse(otp, config) => {
                let keys = parse_key_list(&otp, &config)?;
                Ok(State::SignatureVerify(config, otp.key_order, keys))
            }
            State::SignatureVerify(config, order, keys) => {
                self.verify_signature(sec_image, config, order, keys)
            }
            State::Decrypt(session, key_id) => self.decrypt(sec_image, session, key_id),
            State::Done(result) => Ok(State::Done(result)),
        }
    }

    fn verify_signature(
        &self,
        sec_image: &[u8],
        config: SecureBootConfig,
        order: KeyOrder,
        keys: Vec<OtpKey>,
    ) -> SocsecResult<State> {
        let header = RotHeader::read_at(sec_image, config.header_offset as usize)?;
        if !header.checksum_valid() {
            Err(SocsecError::IMAGE_ROT_HEADER_CHECKSUM_MISMATCH)?;
        }
        if header.sign_image_size() as usize % SIGN_IMAGE_ALIGN != 0 {
            Err(SocsecError::IMAGE_SIGN_SIZE_UNALIGNED)?;
        }
        info!("check RoT header PASS");

        match (config.algorithm, header.enc_offset()) {
            (Algorithm::RsaSha { .. }, enc) if enc != 0 => {
                Err(SocsecError::FIELD_IMAGE_ENCRYPTED_MISMATCH)?
            }
            (Algorithm::AesRsaSha { .. } | Algorithm::AesGcm, 0) => {
                Err(SocsecError::FIELD_IMAGE_NOT_ENCRYPTED)?
            }
            _ => (),
        }

        let sign_size = header.sign_image_size() as usize;
        let rot_image = &sec_image[..sec_image.len().min(sign_size + ROT_TRAILER_SIZE)];
        let session = Session {
            config,
            order,
            keys,
            header,
        };

        match config.algorithm {
            Algorithm::RsaSha { hash, rsa } | Algorithm::AesRsaSha { hash, rsa } => {
                let key_id = self.find_oem_key(rot_image, &session, hash, rsa)?;
                info!("check RoT integrity PASS");
                if let Algorithm::AesRsaSha { .. } = config.algorithm {
                    Ok(State::Decrypt(session, key_id))
                } else {
                    Ok(State::Done(FieldVerification {
                        algorithm: config.algorithm,
                        key_id,
                        header_offset: config.header_offset,
                        key_order: order,
                        decrypted: None,
                    }))
                }
            }
            Algorithm::AesGcm => self.gcm_verify_decrypt(rot_image, sec_image, &session),
            Algorithm::HashBinding { .. } => Err(SocsecError::ARG_INVALID_ALGORITHM),
        }
    }

    /// First non-retired OEM key whose recovered digest matches wins
    fn find_oem_key(
        &self,
        rot_image: &[u8],
        session: &Session,
        hash: HashKind,
        rsa: RsaSize,
    ) -> SocsecResult<u32> {
        let header = &session.header;
        let signature = slice_at(rot_image, header.signature_offset() as usize, rsa.signature_len())?;
        let digest = self
            .env
            .digest(hash, slice_at(rot_image, 0, header.sign_image_size() as usize)?)?;

        for key in session.keys.iter() {
            if key.key_type != KeyType::RsaOem || key.retired {
                continue;
            }
            let Some((m, e)) = key.rsa() else {
                continue;
            };
            let m = to_big_endian(m, session.order);
            let e = to_big_endian(e, session.order);
            match rsa_digest_matches(&self.env, signature, &e, &m, &digest, session.order) {
                Ok(true) => {
                    info!("Verify key: OEM DSS public key, ID {}", key.id);
                    debug!("M: {}", hex::encode(&m));
                    debug!("E: {}", hex::encode(&e));
                    return Ok(key.id);
                }
                Ok(false) => (),
                Err(err) => debug!("key {} unusable: {err}", key.id),
            }
        }
        Err(SocsecError::FIELD_NO_MATCHING_OEM_KEY)
    }

    fn decrypt(&self, sec_image: &[u8], session: Session, key_id: u32) -> SocsecResult<State> {
        let header = &session.header;
        let aes_data_offset = header.aes_data_offset() as usize;
        let (aes_key, iv) = match self.select_decrypt_key(&session.keys, key_id)? {
            KeyMaterial::Aes(key) => (
                key.clone(),
                slice_at(sec_image, aes_data_offset, AES_IV_SIZE)?.to_vec(),
            ),
            KeyMaterial::Rsa { m, e } => {
                let blob_len = session.config.rsa_size.signature_len();
                let blob = slice_at(sec_image, aes_data_offset, blob_len)?;
                let m = to_big_endian(m, session.order);
                let e = to_big_endian(e, session.order);
                let mut object = self.env.rsa_exp(&to_big_endian(blob, session.order), &e, &m)?;
                session.order.apply(&mut object);
                aes_key_from_object(&object, session.order)?
            }
            KeyMaterial::AesVault(..) => Err(SocsecError::FIELD_NO_DECRYPT_KEY)?,
        };

        let (offset, len) = encrypted_range(header)?;
        let mut plain = slice_at(sec_image, offset, len)?.to_vec();
        self.env.aes_ctr_apply(&aes_key, &iv, &mut plain)?;
        info!("check aes decode PASS");

        Ok(State::Done(FieldVerification {
            algorithm: session.config.algorithm,
            key_id,
            header_offset: session.config.header_offset,
            key_order: session.order,
            decrypted: Some(assemble(sec_image, offset, &plain, header)),
        }))
    }

    /// AES key source order: OEM AES key, then the first SoC RSA key, then
    /// the key sharing the id of the verifying OEM key
    fn select_decrypt_key<'a>(&self, keys: &'a [OtpKey], key_id: u32) -> SocsecResult<&'a KeyMaterial> {
        keys.iter()
            .find(|key| key.key_type == KeyType::AesOem)
            .or_else(|| {
                keys.iter()
                    .find(|key| matches!(key.key_type, KeyType::RsaSocPub | KeyType::RsaSocPri))
            })
            .or_else(|| keys.iter().find(|key| key.id == key_id))
            .map(|key| &key.material)
            .ok_or(SocsecError::FIELD_NO_DECRYPT_KEY)
    }

    fn gcm_verify_decrypt(
        &self,
        rot_image: &[u8],
        sec_image: &[u8],
        session: &Session,
    ) -> SocsecResult<State> {
        let header = &session.header;
        let tag = rom_tag(rot_image, header)?;
        let nonce = slice_at(rot_image, header.aes_data_offset() as usize, GCM_NONCE_SIZE)?;
        let (offset, len) = encrypted_range(header)?;
        let aad = slice_at(rot_image, 0, offset)?;
        let cipher = slice_at(rot_image, offset, len)?;

        for key in session.keys.iter().filter(|key| key.key_type == KeyType::AesOem) {
            let KeyMaterial::Aes(aes_key) = &key.material else {
                continue;
            };
            let mut plain = cipher.to_vec();
            if self
                .env
                .aes_gcm_decrypt(aes_key, nonce, aad, &mut plain, &tag)
                .is_ok()
            {
                info!("check gcm integrity and decode PASS, key ID {}", key.id);
                return Ok(State::Done(FieldVerification {
                    algorithm: Algorithm::AesGcm,
                    key_id: key.id,
                    header_offset: session.config.header_offset,
                    key_order: session.order,
                    decrypted: Some(assemble(sec_image, offset, &plain, header)),
                }));
            }
        }
        Err(SocsecError::IMAGE_GCM_AUTH_FAILED)
    }
}

/// Split a decrypted key blob into (key, iv)
fn aes_key_from_object(object: &[u8], order: KeyOrder) -> SocsecResult<(Vec<u8>, Vec<u8>)> {
    const KEY: usize = AES_KEY_SIZE;
    let (key, iv) = match order {
        KeyOrder::Little => (
            object.get(..KEY),
            object.get(KEY..KEY + AES_IV_SIZE),
        ),
        KeyOrder::Big => {
            let start = object
                .len()
                .checked_sub(2 * KEY)
                .ok_or(SocsecError::FIELD_NO_DECRYPT_KEY)?;
            (
                object.get(start..start + KEY),
                object.get(start + KEY..start + KEY + AES_IV_SIZE),
            )
        }
    };
    match (key, iv) {
        (Some(key), Some(iv)) => Ok((key.to_vec(), iv.to_vec())),
        _ => Err(SocsecError::FIELD_NO_DECRYPT_KEY),
    }
}

/// Plain prefix, decrypted payload, then the rest of the original image
fn assemble(sec_image: &[u8], offset: usize, plain: &[u8], header: &RotHeader) -> Vec<u8> {
    let mut image = sec_image[..offset].to_vec();
    image.extend_from_slice(plain);
    image.extend_from_slice(&sec_image[header.sign_image_size() as usize..]);
    image
}

/// Walk the key header table until the entry flagged last
fn parse_key_list(otp: &OtpContents, config: &SecureBootConfig) -> SocsecResult<Vec<OtpKey>> {
    let table = KeyTypeTable::for_revision(otp.revision, otp.key_order);
    let mut keys = Vec::new();
    let mut found_last = false;

    for slot in 0..OTP_KEY_HEADER_SLOTS {
        let mut word = [0u8; 4];
        word.copy_from_slice(
            otp.data
                .get(slot * 4..slot * 4 + 4)
                .ok_or(SocsecError::OTP_IMAGE_REGION_OUT_OF_BOUNDS)?,
        );
        let desc = KeyDescriptor::from_word(u32::from_le_bytes(word));
        let key_type = table
            .key_type(desc.type_code)
            .ok_or(SocsecError::FIELD_KEY_TYPE_UNKNOWN)?;
        keys.push((desc, key_type));
        if desc.last {
            found_last = true;
            break;
        }
    }
    if !found_last {
        error!("Can not find last key in OTP data region");
        Err(SocsecError::OTP_KEY_LIST_MISSING_TERMINATOR)?;
    }

    keys.into_iter()
        .map(|(desc, key_type)| {
            let material = read_key_material(otp, config, &desc, key_type)?;
            debug!("OTP key {key_type} id {} at {:#x}", desc.id, desc.offset);
            Ok(OtpKey {
                id: desc.id,
                key_type,
                retired: config.is_retired(desc.id),
                material,
            })
        })
        .collect()
}

fn read_key_material(
    otp: &OtpContents,
    config: &SecureBootConfig,
    desc: &KeyDescriptor,
    key_type: KeyType,
) -> SocsecResult<KeyMaterial> {
    let offset = desc.offset as usize;
    let region = |start: usize, len: usize| -> SocsecResult<Vec<u8>> {
        otp.data
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or(SocsecError::OTP_IMAGE_REGION_OUT_OF_BOUNDS)
    };

    match key_type {
        KeyType::RsaOem | KeyType::RsaSocPub | KeyType::RsaSocPri => {
            let rsa = RsaSize::from_code(desc.rsa_param);
            if rsa != config.rsa_size {
                error!("OTP key type is not compatible with config");
                Err(SocsecError::KEY_SIZE_MISMATCH)?;
            }
            let len = rsa.signature_len();
            let m = region(offset, len)?;
            let e = if key_type.is_private() {
                region(offset + len, len)?
            } else {
                match otp.key_order {
                    KeyOrder::Little => region(offset + len, PUBLIC_EXP_SIZE)?,
                    KeyOrder::Big => region(offset + 2 * len - PUBLIC_EXP_SIZE, PUBLIC_EXP_SIZE)?,
                }
            };
            Ok(KeyMaterial::Rsa { m, e })
        }
        KeyType::AesOem => Ok(KeyMaterial::Aes(region(offset, AES_KEY_SIZE)?)),
        KeyType::AesVault => Ok(KeyMaterial::AesVault(
            region(offset, AES_VAULT_KEY_SIZE)?,
            region(offset + AES_VAULT_KEY_SIZE, AES_VAULT_KEY_SIZE)?,
        )),
    }
}
