// Licensed under the Apache-2.0 license

use std::path::Path;

use serde_json::{json, Value};
use socsec_error::SocsecError;
use socsec_image_crypto::{rsa_key_from_pem_file, RustCrypto};
use socsec_image_fake_keys::*;
use socsec_image_types::*;
use socsec_image_verify::{OtpImageParser, SecureBootConfig};
use socsec_otp::*;

struct Inputs {
    dir: tempfile::TempDir,
}

impl Inputs {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_pem(dir.path(), "oem0.pem", OEM_KEY_0_PRIVATE).unwrap();
        write_pem(dir.path(), "oem1_pub.pem", OEM_KEY_1_PUBLIC).unwrap();
        std::fs::write(dir.path().join("aes.bin"), AES_KEY).unwrap();
        std::fs::write(dir.path().join("user.hex"), "00c0ffee\n12345678\n").unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn folders(&self) -> OtpInputFolders {
        OtpInputFolders {
            key_folder: self.path().to_path_buf(),
            user_data_folder: self.path().to_path_buf(),
        }
    }

    fn compile(&self, doc: Value) -> anyhow::Result<OtpArtifacts> {
        let config = OtpConfig::from_json(&doc.to_string())?;
        OtpImageGenerator::new(RustCrypto::default()).generate(&config, &self.folders())
    }
}

fn full_config(version: &str) -> Value {
    json!({
        "name": "full",
        "version": version,
        "data_region": {
            "ecc_region": true,
            "key": [
                {"types": "rsa_pub_oem", "key_pem": "oem1_pub.pem", "offset": "0x40", "number_id": 1},
                {"types": "rsa_pub_oem", "key_pem": "oem0.pem", "offset": "0x240", "number_id": 0},
                {"types": "aes_oem", "key_bin": "aes.bin", "offset": "0x440", "number_id": 2}
            ],
            "user_data": [
                {"types": "dw_hex", "file": "user.hex", "offset": "0x1000"}
            ]
        },
        "config_region": {
            "Enable Secure Boot": true,
            "Secure Boot Mode": "Mode_2",
            "RSA Mode": "RSA2048",
            "SHA Mode": "SHA256",
            "Key Retire": 1
        },
        "otp_strap": {
            "Enable Secure Boot": {"value": true, "otp_protect": true}
        }
    })
}

fn downcast(err: &anyhow::Error) -> Option<SocsecError> {
    err.downcast_ref::<SocsecError>().copied()
}

#[test]
fn test_full_image_round_trip() {
    let inputs = Inputs::new();
    let artifacts = inputs.compile(full_config("A2")).unwrap();
    for name in [
        OTP_DATA_IMAGE,
        OTP_DATA_BIN,
        OTP_DATA_HEX,
        OTP_DATA_MASK_BIN,
        OTP_CONF_IMAGE,
        OTP_CONF_BIN,
        OTP_STRAP_IMAGE,
        OTP_STRAP_BIN,
        OTP_ALL_IMAGE,
    ] {
        assert!(artifacts.get(name).is_some(), "{name}");
    }

    let all = artifacts.get(OTP_ALL_IMAGE).unwrap();
    assert_eq!(all.len(), OTP_HEADER_SIZE + 2 * 8192 + 2 * 64 + 4 * 8 + OTP_CHECKSUM_SIZE);

    let otp = OtpImageParser::new(RustCrypto::default()).parse(all).unwrap();
    assert_eq!(otp.revision, OtpRevision::A2);
    assert_eq!(otp.key_order, KeyOrder::Little);

    let config = SecureBootConfig::decode(SocVersion::Ast2600, &otp).unwrap();
    assert_eq!(
        config.algorithm,
        Algorithm::RsaSha {
            rsa: RsaSize::Rsa2048,
            hash: HashKind::Sha256
        }
    );
    assert!(config.is_retired(1));
    assert!(!config.is_retired(0));

    // Key header table
    let word = |i: usize| {
        KeyDescriptor::from_word(u32::from_le_bytes(otp.data[i * 4..i * 4 + 4].try_into().unwrap()))
    };
    assert_eq!(word(0).id, 1);
    assert_eq!(word(0).offset, 0x40);
    assert!(!word(0).last);
    assert_eq!(word(1).type_code, 8);
    assert_eq!(word(2).type_code, 2);
    assert!(word(2).last);

    let oem0 = rsa_key_from_pem_file(&inputs.path().join("oem0.pem")).unwrap();
    assert_eq!(
        &otp.data[0x240..0x440],
        oem0.to_binary(KeyPart::Public, KeyOrder::Little).unwrap().as_slice()
    );
    assert_eq!(&otp.data[0x440..0x460], &AES_KEY);
    assert_eq!(&otp.data[0x1000..0x1008], &[0xee, 0xff, 0xc0, 0x00, 0x78, 0x56, 0x34, 0x12]);
}

#[test]
fn test_data_region_ecc() {
    let inputs = Inputs::new();
    let artifacts = inputs.compile(full_config("A1")).unwrap();
    let data = artifacts.get(OTP_DATA_BIN).unwrap();
    let mask = artifacts.get(OTP_DATA_MASK_BIN).unwrap();
    assert_eq!(data.len(), 8192);
    assert_eq!(&data[7168..7168 + 896], ecc(&data[..7168]).as_slice());

    // ECC bytes of written words are programmed, the rest stay ignored
    assert_eq!(mask[7168], 0);
    assert_eq!(mask[7168 + 0x1000 / 8], 0);
    assert_eq!(mask[7168 + 0x800 / 8], 0xff);

    let hex = String::from_utf8(artifacts.get(OTP_DATA_HEX).unwrap().to_vec()).unwrap();
    assert_eq!(hex.lines().count(), 2048);
    assert_eq!(hex.lines().nth(0x1000 / 4), Some("00c0ffee"));
}

#[test]
fn test_overlap_rejected() {
    let inputs = Inputs::new();
    let mut doc = full_config("A1");
    doc["data_region"]["key"][2]["offset"] = json!("0x438");
    let err = inputs.compile(doc).unwrap_err();
    assert_eq!(downcast(&err), Some(SocsecError::OTP_DATA_REGION_OVERLAP));
}

#[test]
fn test_patch_reserved() {
    let inputs = Inputs::new();
    let mut doc = full_config("A1");
    doc["data_region"]["user_data"][0]["offset"] = json!("0x1b80");
    let err = inputs.compile(doc.clone()).unwrap_err();
    assert_eq!(downcast(&err), Some(SocsecError::OTP_PATCH_REGION_RESERVED));

    doc["data_region"]["patch"] = json!(true);
    inputs.compile(doc).unwrap();
}

#[test]
fn test_out_of_range_with_ecc() {
    let inputs = Inputs::new();
    let mut doc = full_config("A1");
    doc["data_region"]["user_data"][0]["offset"] = json!("0x1bfc");
    let err = inputs.compile(doc.clone()).unwrap_err();
    assert_eq!(downcast(&err), Some(SocsecError::OTP_DATA_REGION_OUT_OF_RANGE));

    // Without ECC the whole region is usable
    doc["data_region"]["ecc_region"] = json!(false);
    doc["data_region"]["patch"] = json!(true);
    doc["data_region"]["user_data"][0]["offset"] = json!("0x1ff8");
    inputs.compile(doc).unwrap();
}

#[test]
fn test_a3_big_order() {
    let inputs = Inputs::new();
    let mut doc = full_config("A3");
    doc["rsa_key_order"] = json!("big");
    let artifacts = inputs.compile(doc).unwrap();
    let all = artifacts.get(OTP_ALL_IMAGE).unwrap();
    let header = OtpImageHeader::read_from_image(all).unwrap();
    assert_ne!(header.image_info() & OTP_INC_ORDER, 0);

    let otp = OtpImageParser::new(RustCrypto::default()).parse(all).unwrap();
    assert_eq!(otp.key_order, KeyOrder::Big);
    let first = KeyDescriptor::from_word(u32::from_le_bytes(otp.data[..4].try_into().unwrap()));
    assert_eq!(first.type_code, 9);

    let oem0 = rsa_key_from_pem_file(&inputs.path().join("oem0.pem")).unwrap();
    assert_eq!(
        &otp.data[0x240..0x440],
        oem0.to_binary(KeyPart::Public, KeyOrder::Big).unwrap().as_slice()
    );
}

#[test]
fn test_no_regions() {
    let inputs = Inputs::new();
    let artifacts = inputs.compile(json!({"name": "empty", "version": "1030A0"})).unwrap();
    assert_eq!(artifacts.artifacts.len(), 1);
    let all = artifacts.get(OTP_ALL_IMAGE).unwrap();
    assert_eq!(all.len(), OTP_HEADER_SIZE + OTP_CHECKSUM_SIZE);
    let otp = OtpImageParser::new(RustCrypto::default()).parse(all).unwrap();
    assert_eq!(otp.revision, OtpRevision::Ast1030A0);
    assert_eq!(otp.config, vec![0u8; 64]);
}

#[test]
fn test_config_file_errors() {
    let inputs = Inputs::new();
    let path = inputs.path().join("otp.json");
    std::fs::write(&path, "{\"name\": \"x\"").unwrap();
    let err = generate_from_file(RustCrypto::default(), &path, &inputs.folders()).unwrap_err();
    assert_eq!(downcast(&err), Some(SocsecError::SCHEMA_INVALID_DOCUMENT));
    assert!(format!("{err:#}").contains("otp.json"));

    std::fs::write(&path, full_config("A2").to_string()).unwrap();
    generate_from_file(RustCrypto::default(), &path, &inputs.folders()).unwrap();
}
