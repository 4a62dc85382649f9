/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    OTP region compiler: data, config and strap regions of ASPEED OTP
    memory built from a JSON config.

--*/

mod config;
mod ecc;
mod image;
mod info;
mod keys;
mod region;

pub use config::{
    field_setting, parse_hex, DataRegionConfig, FieldSetting, KeyConfig, OtpConfig, StrapEntry,
    UserDataConfig, UserDataType,
};
pub use ecc::{ecc, ecc_byte, ECC_WORD_SIZE};
pub use image::{
    build_config_region, build_data_region, build_strap_region, dw_hex, generate_from_file,
    ConfigImage, DataImage, OtpArtifact, OtpArtifacts, OtpImageGenerator, OtpInputFolders,
    StrapImage, OTP_ALL_IMAGE, OTP_CONF_BIN, OTP_CONF_IMAGE, OTP_DATA_BIN, OTP_DATA_HEX,
    OTP_DATA_IMAGE, OTP_DATA_MASK_BIN, OTP_STRAP_BIN, OTP_STRAP_IMAGE,
};
pub use info::{FieldInfo, FieldKind, FieldValue, OtpInfo};
pub use keys::{dw_hex_to_bin, hex_to_bin, key_header_table, prepare_key, PreparedKey};
pub use region::{BitPlane, DataRegion, PATCH_RESERVED};
