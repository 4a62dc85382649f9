/*++

Licensed under the Apache-2.0 license.

File Name:

   image.rs

Abstract:

    Compiles an OTP config into region images.

--*/

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;
use serde_json::Value;
use socsec_error::{SocsecError, SocsecResult};
use socsec_image_types::{
    region_info, HashKind, KeyOrder, OtpImageHeader, OtpRevision, OTP_HEADER_SIZE, OTP_INC_CONF,
    OTP_INC_DATA, OTP_INC_ORDER, OTP_INC_STRAP,
};
use socsec_image_verify::ImageVerificationEnv;
use zerocopy::IntoBytes;

use crate::config::{field_setting, parse_hex, DataRegionConfig, FieldSetting, OtpConfig, StrapEntry};
use crate::info::{FieldInfo, FieldKind, OtpInfo};
use crate::keys::{key_header_table, prepare_key, user_data_bytes, PreparedKey};
use crate::region::{BitPlane, DataRegion};

pub const OTP_ALL_IMAGE: &str = "otp-all.image";
pub const OTP_DATA_IMAGE: &str = "otp-data.image";
pub const OTP_DATA_BIN: &str = "otp-data.bin";
pub const OTP_DATA_HEX: &str = "otp-data.hex";
pub const OTP_DATA_MASK_BIN: &str = "otp-data_mask.bin";
pub const OTP_CONF_IMAGE: &str = "otp-conf.image";
pub const OTP_CONF_BIN: &str = "otp-conf.bin";
pub const OTP_STRAP_IMAGE: &str = "otp-strap.image";
pub const OTP_STRAP_BIN: &str = "otp-strap.bin";

/// Where key and user data files named by the config are found
#[derive(Debug, Default, Clone)]
pub struct OtpInputFolders {
    pub key_folder: PathBuf,
    pub user_data_folder: PathBuf,
}

/// Named output file
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OtpArtifact {
    pub name: &'static str,
    pub contents: Vec<u8>,
}

/// Everything compiled from one config, in memory
#[derive(Debug, Clone, Default)]
pub struct OtpArtifacts {
    pub artifacts: Vec<OtpArtifact>,
}

impl OtpArtifacts {
    fn add(&mut self, name: &'static str, contents: Vec<u8>) {
        self.artifacts.push(OtpArtifact { name, contents });
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.name == name)
            .map(|artifact| artifact.contents.as_slice())
    }
}

/// Data region value and ignore mask
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DataImage {
    pub value: Vec<u8>,
    pub mask: Vec<u8>,
}

/// Config region value and ignore planes
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConfigImage {
    pub value: BitPlane,
    pub ignore: BitPlane,
}

/// Strap value with its protect and ignore planes
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StrapImage {
    pub value: BitPlane,
    pub reg_protect: BitPlane,
    pub otp_protect: BitPlane,
    pub ignore: BitPlane,
}

impl StrapImage {
    fn payload(&self) -> Vec<u8> {
        [&self.value, &self.reg_protect, &self.otp_protect, &self.ignore]
            .iter()
            .flat_map(|plane| plane.as_bytes().iter().copied())
            .collect()
    }
}

pub struct OtpImageGenerator<Env: ImageVerificationEnv> {
    env: Env,
}

impl<Env: ImageVerificationEnv> OtpImageGenerator<Env> {
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Validate `config` and compile every region it names.
    ///
    /// Nothing is returned unless every region compiled.
    pub fn generate(
        &self,
        config: &OtpConfig,
        folders: &OtpInputFolders,
    ) -> anyhow::Result<OtpArtifacts> {
        let revision = config.revision()?;
        let info = OtpInfo::load(revision)?;
        config.validate(&info)?;
        let order = config.key_order();
        let order_flag = match order {
            KeyOrder::Big if revision.supports_key_order() => OTP_INC_ORDER,
            _ => 0,
        };

        let mut artifacts = OtpArtifacts::default();
        let mut data_payload = Vec::new();
        let mut config_payload = Vec::new();
        let mut strap_payload = Vec::new();

        if let Some(data_config) = &config.data_region {
            info!("Generating Data Image ...");
            let data = build_data_region(data_config, &info, order, folders)?;
            data_payload = [data.value.as_slice(), data.mask.as_slice()].concat();
            artifacts.add(
                OTP_DATA_IMAGE,
                self.image(revision, order_flag, &data_payload, &[], &[])?,
            );
            artifacts.add(OTP_DATA_HEX, dw_hex(&data.value).into_bytes());
            artifacts.add(OTP_DATA_BIN, data.value);
            artifacts.add(OTP_DATA_MASK_BIN, data.mask);
        }

        if let Some(values) = &config.config_region {
            info!("Generating Config Image ...");
            let conf = build_config_region(values, &info)?;
            config_payload = [conf.value.as_bytes(), conf.ignore.as_bytes()].concat();
            artifacts.add(
                OTP_CONF_IMAGE,
                self.image(revision, order_flag, &[], &config_payload, &[])?,
            );
            artifacts.add(OTP_CONF_BIN, conf.value.into_bytes());
        }

        if let Some(entries) = &config.otp_strap {
            info!("Generating Strap Image ...");
            let strap = build_strap_region(entries, &info)?;
            strap_payload = strap.payload();
            artifacts.add(
                OTP_STRAP_IMAGE,
                self.image(revision, order_flag, &[], &[], &strap_payload)?,
            );
            artifacts.add(OTP_STRAP_BIN, strap.value.into_bytes());
        }

        info!("Generating OTP-all Image ...");
        artifacts.add(
            OTP_ALL_IMAGE,
            self.image(
                revision,
                order_flag,
                &data_payload,
                &config_payload,
                &strap_payload,
            )?,
        );
        Ok(artifacts)
    }

    /// Header, the non-empty region payloads in data, config, strap order,
    /// and the SHA-256 of everything before it
    fn image(
        &self,
        revision: OtpRevision,
        extra_flags: u32,
        data: &[u8],
        config: &[u8],
        strap: &[u8],
    ) -> SocsecResult<Vec<u8>> {
        let mut header = OtpImageHeader::new(revision);
        let mut flags = extra_flags;
        let mut offset = OTP_HEADER_SIZE;

        let data_offset = offset;
        offset += data.len();
        let config_offset = offset;
        offset += config.len();
        let strap_offset = offset;
        offset += strap.len();

        if !data.is_empty() {
            flags |= OTP_INC_DATA;
            header.set_data_info(region_info(data_offset, data.len()));
        }
        if !config.is_empty() {
            flags |= OTP_INC_CONF;
            header.set_config_info(region_info(config_offset, config.len()));
        }
        if !strap.is_empty() {
            flags |= OTP_INC_STRAP;
            header.set_strap_info(region_info(strap_offset, strap.len()));
        }
        if offset > 0xffff {
            Err(SocsecError::INTERNAL)?;
        }
        header.set_image_info(offset as u32 | flags);
        header.set_checksum_offset(offset as u32);

        let mut image = header.as_bytes().to_vec();
        image.extend_from_slice(data);
        image.extend_from_slice(config);
        image.extend_from_slice(strap);
        let checksum = self.env.digest(HashKind::Sha256, &image)?;
        image.extend(checksum);
        Ok(image)
    }
}

/// Key header table, keys and user data, with ECC when enabled
pub fn build_data_region(
    config: &DataRegionConfig,
    info: &OtpInfo,
    order: KeyOrder,
    folders: &OtpInputFolders,
) -> anyhow::Result<DataImage> {
    let mut region = DataRegion::new(&info.layout, config.ecc_region);

    let keys = config
        .key
        .iter()
        .map(|key| prepare_key(key, info.revision, order, &folders.key_folder))
        .collect::<anyhow::Result<Vec<PreparedKey>>>()?;
    region
        .write(0, &key_header_table(&keys)?)
        .context("Failed to write the key header")?;
    for key in &keys {
        region
            .write(key.offset, &key.bytes)
            .with_context(|| format!("Failed to write the key at {:#x}", key.offset))?;
    }

    for user_data in &config.user_data {
        let offset = parse_hex(&user_data.offset)? as usize;
        let bytes = user_data_bytes(user_data, &folders.user_data_folder)?;
        region
            .write(offset, &bytes)
            .with_context(|| format!("Failed to write {} at {offset:#x}", user_data.file))?;
    }

    if !config.patch {
        region.check_patch_reserved()?;
    }
    let (value, mask) = region.finish();
    Ok(DataImage { value, mask })
}

/// Config region planes; booleans with a `true` default are programmed
/// unless the config names them
pub fn build_config_region(
    values: &BTreeMap<String, Value>,
    info: &OtpInfo,
) -> SocsecResult<ConfigImage> {
    let bits = info.layout.config_region_size * 8;
    let mut value = BitPlane::zeros(bits);
    let mut ignore = BitPlane::ones(bits);

    for field in &info.config {
        if field.kind == FieldKind::Boolean && field.default == Some(true) {
            value.set(field.offset(), true)?;
            ignore.set(field.offset(), false)?;
        }
    }

    for (key, setting) in values {
        let field = info
            .config_field(key)
            .ok_or(SocsecError::SCHEMA_UNKNOWN_CONFIG_FIELD)?;
        let setting = field_setting(field, setting)?;
        let (offset, len) = apply_setting(&mut value, field, setting)?;
        ignore.fill_field(offset, len, false)?;
    }
    Ok(ConfigImage { value, ignore })
}

pub fn build_strap_region(
    entries: &BTreeMap<String, StrapEntry>,
    info: &OtpInfo,
) -> SocsecResult<StrapImage> {
    let bits = info.layout.strap_bit_size;
    let mut strap = StrapImage {
        value: BitPlane::zeros(bits),
        reg_protect: BitPlane::zeros(bits),
        otp_protect: BitPlane::zeros(bits),
        ignore: BitPlane::ones(bits),
    };

    for (key, entry) in entries {
        let field = info
            .strap_field(key)
            .ok_or(SocsecError::SCHEMA_UNKNOWN_STRAP_FIELD)?;
        let setting = field_setting(field, &entry.value)?;
        let (offset, len) = apply_setting(&mut strap.value, field, setting)?;
        strap.ignore.fill_field(offset, len, entry.ignore)?;
        if entry.reg_protect {
            strap.reg_protect.fill_field(offset, len, true)?;
        }
        if entry.otp_protect {
            strap.otp_protect.fill_field(offset, len, true)?;
        }
    }
    Ok(strap)
}

/// Program `setting` into `plane` and return the bits it covers
fn apply_setting(
    plane: &mut BitPlane,
    field: &FieldInfo,
    setting: FieldSetting,
) -> SocsecResult<(usize, usize)> {
    let offset = field.offset();
    match setting {
        FieldSetting::Bit(bit) => {
            plane.set(offset, bit)?;
            Ok((offset, 1))
        }
        FieldSetting::Pattern(pattern) => {
            plane.set_field(offset, field.bit_length, pattern)?;
            Ok((offset, field.bit_length))
        }
        FieldSetting::Shift(shift) => {
            plane.set(offset + shift, true)?;
            Ok((offset + shift, 1))
        }
    }
}

/// One little endian double word per line, most significant digit first
pub fn dw_hex(data: &[u8]) -> String {
    let mut text = String::with_capacity(data.len() / 4 * 9);
    for word in data.chunks_exact(4) {
        for byte in word.iter().rev() {
            let _ = write!(text, "{byte:02x}");
        }
        text.push('\n');
    }
    text
}

/// Read and compile an OTP config file
pub fn generate_from_file<Env: ImageVerificationEnv>(
    env: Env,
    config_path: &Path,
    folders: &OtpInputFolders,
) -> anyhow::Result<OtpArtifacts> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let config = OtpConfig::from_json(&text)
        .with_context(|| format!("Invalid OTP config {}", config_path.display()))?;
    OtpImageGenerator::new(env)
        .generate(&config, folders)
        .with_context(|| format!("Failed to compile {}", config_path.display()))
}
