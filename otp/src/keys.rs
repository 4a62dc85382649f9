/*++

Licensed under the Apache-2.0 license.

File Name:

   keys.rs

Abstract:

    Key header table, key bytes and user data of the OTP data region.

--*/

use std::path::Path;

use anyhow::Context;
use log::{debug, error};
use socsec_error::{SocsecError, SocsecResult};
use socsec_image_crypto::rsa_key_from_pem_file;
use socsec_image_types::{
    insert_bytes, KeyDescriptor, KeyOrder, KeyPart, KeyType, KeyTypeTable, OtpRevision,
    RsaComponent, OTP_KEY_HEADER_SLOTS,
};

use crate::config::{parse_hex, KeyConfig, UserDataConfig, UserDataType};

/// Offset of the second half (IV or second key) of an AES key entry
const AES_SECOND_HALF: usize = 0x20;

/// Highest offset a key descriptor can address
const KEY_OFFSET_MAX: usize = 0x1ff8;

/// One key ready to be written to the data region
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PreparedKey {
    pub descriptor: KeyDescriptor,
    pub offset: usize,
    pub bytes: Vec<u8>,
}

/// Resolve a key entry of the config into its descriptor and bytes
pub fn prepare_key(
    config: &KeyConfig,
    revision: OtpRevision,
    order: KeyOrder,
    key_folder: &Path,
) -> anyhow::Result<PreparedKey> {
    let offset = parse_hex(&config.offset)? as usize;
    if offset % 8 != 0 {
        error!("key offset {offset:#x} is not 8 bytes aligned");
        Err(SocsecError::OTP_KEY_OFFSET_UNALIGNED)?;
    }
    if offset > KEY_OFFSET_MAX {
        Err(SocsecError::OTP_DATA_REGION_OUT_OF_RANGE)?;
    }

    let mut descriptor = KeyDescriptor {
        id: config.id(),
        offset: offset as u32,
        last: false,
        type_code: KeyTypeTable::for_revision(revision, order).code(config.types),
        rsa_param: 0,
        exp_bits: 0,
    };

    let bytes = if config.types.is_rsa() {
        let file = config
            .key_pem
            .as_deref()
            .ok_or(SocsecError::SCHEMA_MISSING_KEY_FILE)?;
        let path = key_folder.join(file);
        let key = rsa_key_from_pem_file(&path)
            .with_context(|| format!("Failed to load key {}", path.display()))?;
        let (part, exp) = if config.types.is_private() {
            (KeyPart::Private, RsaComponent::D)
        } else {
            (KeyPart::Public, RsaComponent::E)
        };
        descriptor.rsa_param = key.rsa_size()?.code();
        descriptor.exp_bits = key.bit_length(exp)? as u32;
        key.to_binary(part, order)?
    } else {
        let mut bytes = read_key_file(key_folder, config.key_bin.as_deref())?;
        let second = match config.types {
            _ if revision.aes_key_has_iv() => Some(config.iv_bin.as_deref()),
            KeyType::AesVault => Some(config.key_bin2.as_deref()),
            _ => None,
        };
        if let Some(second) = second {
            let second = read_key_file(key_folder, second)?;
            insert_bytes(&mut bytes, AES_SECOND_HALF, &second);
        }
        bytes
    };

    debug!(
        "{} key id {} at {offset:#x}, {} bytes",
        config.types,
        descriptor.id,
        bytes.len()
    );
    Ok(PreparedKey {
        descriptor,
        offset,
        bytes,
    })
}

fn read_key_file(key_folder: &Path, file: Option<&str>) -> anyhow::Result<Vec<u8>> {
    let path = key_folder.join(file.ok_or(SocsecError::SCHEMA_MISSING_KEY_FILE)?);
    std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Little endian descriptor words, the last one flagged
pub fn key_header_table(keys: &[PreparedKey]) -> SocsecResult<Vec<u8>> {
    if keys.len() > OTP_KEY_HEADER_SLOTS {
        error!("{} keys, the key header holds {OTP_KEY_HEADER_SLOTS}", keys.len());
        Err(SocsecError::OTP_KEY_COUNT_EXCEEDED)?;
    }
    let mut table = Vec::with_capacity(keys.len() * 4);
    for (i, key) in keys.iter().enumerate() {
        let descriptor = KeyDescriptor {
            last: i + 1 == keys.len(),
            ..key.descriptor
        };
        table.extend_from_slice(&descriptor.to_word().to_le_bytes());
    }
    Ok(table)
}

/// Load a user data file and convert it to the bytes to store
pub fn user_data_bytes(config: &UserDataConfig, folder: &Path) -> anyhow::Result<Vec<u8>> {
    let path = folder.join(&config.file);
    let contents =
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bytes = match config.types {
        UserDataType::Bin => contents,
        UserDataType::DwHex => dw_hex_to_bin(&contents)
            .with_context(|| format!("Failed to convert {}", path.display()))?,
        UserDataType::Hex => hex_to_bin(&contents)
            .with_context(|| format!("Failed to convert {}", path.display()))?,
    };
    Ok(bytes)
}

/// Words of 8 hex digits, each stored little endian. Newlines are ignored.
pub fn dw_hex_to_bin(text: &[u8]) -> SocsecResult<Vec<u8>> {
    let digits: Vec<u8> = text.iter().copied().filter(|b| *b != b'\n').collect();
    if digits.len() % 8 != 0 {
        error!("input string is not dw aligned");
        Err(SocsecError::SCHEMA_INVALID_DW_HEX)?;
    }
    let mut bin = Vec::with_capacity(digits.len() / 2);
    for word in digits.chunks_exact(8) {
        let mut bytes = hex::decode(word).map_err(|_| SocsecError::SCHEMA_INVALID_HEX_VALUE)?;
        bytes.reverse();
        bin.extend(bytes);
    }
    Ok(bin)
}

/// Plain hex text; whitespace between digits is ignored
pub fn hex_to_bin(text: &[u8]) -> SocsecResult<Vec<u8>> {
    let digits: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    hex::decode(digits).map_err(|_| SocsecError::SCHEMA_INVALID_HEX_VALUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use socsec_image_fake_keys::{write_pem, OEM_KEY_0_PRIVATE, OEM_KEY_1_PUBLIC};
    use socsec_image_types::RsaSize;
    use std::path::PathBuf;

    fn key(types: KeyType, offset: &str) -> KeyConfig {
        KeyConfig {
            types,
            offset: offset.to_string(),
            number_id: None,
            key_pem: None,
            key_bin: None,
            key_bin2: None,
            iv_bin: None,
            sha_mode: None,
            key_length: None,
            rsa_pem: None,
        }
    }

    fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn error_of(err: anyhow::Error) -> Option<SocsecError> {
        err.downcast_ref::<SocsecError>().copied()
    }

    #[test]
    fn test_rsa_public_key() {
        let dir = tempfile::tempdir().unwrap();
        write_pem(dir.path(), "oem1_pub.pem", OEM_KEY_1_PUBLIC).unwrap();
        let mut config = key(KeyType::RsaOem, "0x40");
        config.key_pem = Some("oem1_pub.pem".into());
        config.number_id = Some(3);

        let prepared =
            prepare_key(&config, OtpRevision::A1, KeyOrder::Little, dir.path()).unwrap();
        assert_eq!(prepared.offset, 0x40);
        assert_eq!(prepared.bytes.len(), 512);
        assert_eq!(prepared.descriptor.id, 3);
        assert_eq!(prepared.descriptor.type_code, 8);
        assert_eq!(prepared.descriptor.rsa_param, RsaSize::Rsa2048.code());
        assert_eq!(prepared.descriptor.exp_bits, 17);

        let big = prepare_key(&config, OtpRevision::A3, KeyOrder::Big, dir.path()).unwrap();
        assert_eq!(big.descriptor.type_code, 9);
        let mut modulus = big.bytes[..256].to_vec();
        modulus.reverse();
        assert_eq!(&prepared.bytes[..256], modulus.as_slice());
    }

    #[test]
    fn test_rsa_private_key() {
        let dir = tempfile::tempdir().unwrap();
        write_pem(dir.path(), "soc.pem", OEM_KEY_0_PRIVATE).unwrap();
        write_pem(dir.path(), "pub.pem", OEM_KEY_1_PUBLIC).unwrap();
        let mut config = key(KeyType::RsaSocPri, "0x400");
        config.key_pem = Some("soc.pem".into());
        let prepared =
            prepare_key(&config, OtpRevision::A2, KeyOrder::Little, dir.path()).unwrap();
        assert_eq!(prepared.descriptor.type_code, 0xe);
        assert!(prepared.descriptor.exp_bits > 17);

        config.key_pem = Some("pub.pem".into());
        let err = prepare_key(&config, OtpRevision::A2, KeyOrder::Little, dir.path()).unwrap_err();
        assert_eq!(error_of(err), Some(SocsecError::KEY_NOT_PRIVATE));
    }

    #[test]
    fn test_aes_keys() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "key.bin", &[0x11; 32]);
        write(dir.path(), "key2.bin", &[0x22; 32]);
        write(dir.path(), "iv.bin", &[0x33; 16]);

        let mut vault = key(KeyType::AesVault, "0x80");
        vault.key_bin = Some("key.bin".into());
        vault.key_bin2 = Some("key2.bin".into());
        vault.iv_bin = Some("iv.bin".into());

        let a1 = prepare_key(&vault, OtpRevision::A1, KeyOrder::Little, dir.path()).unwrap();
        assert_eq!(a1.bytes.len(), 64);
        assert_eq!(&a1.bytes[32..], &[0x22; 32]);
        assert_eq!(a1.descriptor.type_code, 1);

        let a0 = prepare_key(&vault, OtpRevision::A0, KeyOrder::Little, dir.path()).unwrap();
        assert_eq!(a0.bytes.len(), 48);
        assert_eq!(&a0.bytes[32..], &[0x33; 16]);

        let mut oem = key(KeyType::AesOem, "0x80");
        oem.key_bin = Some("key.bin".into());
        let a2 = prepare_key(&oem, OtpRevision::A2, KeyOrder::Little, dir.path()).unwrap();
        assert_eq!(a2.bytes, vec![0x11; 32]);
        assert_eq!(a2.descriptor.type_code, 2);
    }

    #[test]
    fn test_key_offsets() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "key.bin", &[0x11; 32]);
        let mut oem = key(KeyType::AesOem, "0x44");
        oem.key_bin = Some("key.bin".into());
        let err = prepare_key(&oem, OtpRevision::A1, KeyOrder::Little, dir.path()).unwrap_err();
        assert_eq!(error_of(err), Some(SocsecError::OTP_KEY_OFFSET_UNALIGNED));

        oem.offset = "0x2000".into();
        let err = prepare_key(&oem, OtpRevision::A1, KeyOrder::Little, dir.path()).unwrap_err();
        assert_eq!(error_of(err), Some(SocsecError::OTP_DATA_REGION_OUT_OF_RANGE));
    }

    #[test]
    fn test_missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut oem = key(KeyType::AesOem, "0x40");
        oem.key_bin = Some("absent.bin".into());
        let err = prepare_key(&oem, OtpRevision::A1, KeyOrder::Little, dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("absent.bin"));
    }

    #[test]
    fn test_key_header_table() {
        let prepared = |id, offset| PreparedKey {
            descriptor: KeyDescriptor {
                id,
                offset,
                type_code: 8,
                ..Default::default()
            },
            offset: offset as usize,
            bytes: vec![],
        };
        let table = key_header_table(&[prepared(0, 0x40), prepared(1, 0x240)]).unwrap();
        assert_eq!(table.len(), 8);
        let first = KeyDescriptor::from_word(u32::from_le_bytes(table[..4].try_into().unwrap()));
        let second = KeyDescriptor::from_word(u32::from_le_bytes(table[4..].try_into().unwrap()));
        assert!(!first.last);
        assert!(second.last);
        assert_eq!(second.id, 1);
        assert_eq!(second.offset, 0x240);

        assert_eq!(key_header_table(&[]), Ok(vec![]));
        let many: Vec<PreparedKey> = (0..17).map(|i| prepared(i % 8, 0x40)).collect();
        assert_eq!(
            key_header_table(&many),
            Err(SocsecError::OTP_KEY_COUNT_EXCEEDED)
        );
    }

    #[test]
    fn test_dw_hex() {
        assert_eq!(
            dw_hex_to_bin(b"12345678\naabbccdd\n"),
            Ok(vec![0x78, 0x56, 0x34, 0x12, 0xdd, 0xcc, 0xbb, 0xaa])
        );
        assert_eq!(dw_hex_to_bin(b"1234567"), Err(SocsecError::SCHEMA_INVALID_DW_HEX));
        assert_eq!(dw_hex_to_bin(b"1234567z"), Err(SocsecError::SCHEMA_INVALID_HEX_VALUE));
    }

    #[test]
    fn test_hex_user_data() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "data.hex", b"de ad\nbe ef\n");
        write(dir.path(), "data.bin", &[1, 2, 3]);
        let config = |types, file: &str| UserDataConfig {
            types,
            file: file.to_string(),
            offset: "0x100".into(),
        };
        assert_eq!(
            user_data_bytes(&config(UserDataType::Hex, "data.hex"), dir.path()).unwrap(),
            vec![0xde, 0xad, 0xbe, 0xef]
        );
        assert_eq!(
            user_data_bytes(&config(UserDataType::Bin, "data.bin"), dir.path()).unwrap(),
            vec![1, 2, 3]
        );
        let err = user_data_bytes(&config(UserDataType::DwHex, "data.bin"), dir.path()).unwrap_err();
        assert_eq!(error_of(err), Some(SocsecError::SCHEMA_INVALID_DW_HEX));
    }
}
