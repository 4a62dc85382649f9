/*++

Licensed under the Apache-2.0 license.

File Name:

   main.rs

Abstract:

    Main entry point of the socsec secure boot imaging application

--*/
use std::path::PathBuf;

use clap::{arg, value_parser, ArgAction, Command};
use log::error;
use socsec_image_crypto::{ExternalSigner, HelperMode, LocalSigner};
use socsec_image_gen::ImageSigner;

mod bl1;
mod chain;
mod otp;
mod profile;
mod verify;

/// Entry point
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let sub_cmds = vec![
        Command::new("make_secure_bl1_image")
            .about("Makes a signed bl1 image")
            .arg(
                arg!(--"profile" <FILE> "TOML signing profile supplying defaults for this command")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"soc" <SOC> "SoC id (2600, 2605, 1030) [default: 2600]")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"bl1_image" <FILE> "Bootloader 1 image, which will be verified by the SoC")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"header_offset" <U32> "RoT header offset")
                    .required(false)
                    .value_parser(parse_number),
            )
            .arg(
                arg!(--"flash_patch_offset" <U32> "Flash patch offset (AST2605 only)")
                    .required(false)
                    .value_parser(parse_number),
            )
            .arg(
                arg!(--"rsa_sign_key" <FILE> "RSA private key used to sign the BL1 image")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"gcm_aes_key" <FILE> "AES key used to sign the BL1 image in AES_GCM mode")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"output" <FILE> "Output file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"algorithm" <ALGORITHM> "AES_GCM, AES_RSA<n>_SHA<h> or RSA<n>_SHA<h>")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"key_order" <ORDER> "Byte order of RSA material: little or big")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"rollback_index" <U32> "Rollback index")
                    .required(false)
                    .value_parser(parse_number),
            )
            .arg(
                arg!(--"signing_helper" <APP> "Helper used for signing")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"signing_helper_with_files" <APP> "Helper used for signing using files")
                    .required(false)
                    .conflicts_with("signing_helper")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"enc_offset" <U32> "Offset where encryption starts")
                    .required(false)
                    .value_parser(parse_number),
            )
            .arg(
                arg!(--"aes_key" <FILE> "AES key file")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"key_in_otp" "The AES key is stored in OTP")
                    .required(false)
                    .action(ArgAction::SetTrue),
            )
            .arg(
                arg!(--"rsa_aes" <FILE> "RSA key used to encrypt the AES key")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"cot_algorithm" <ALGORITHM> "Chain of trust algorithm: RSA<n>_SHA<h> or SHA<h>")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"cot_verify_key" <FILE> "RSA public key verifying the next chain image (BL2)")
                    .required(false)
                    .conflicts_with("cot_digest")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"cot_digest" <FILE> "Digest of the next chain image")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"deterministic" "Zero IVs and fixed padding for reproducible output")
                    .required(false)
                    .action(ArgAction::SetTrue),
            ),
        Command::new("make_sv_chain_image")
            .about("Makes signature verified chain of trust images")
            .arg(
                arg!(--"algorithm" <ALGORITHM> "RSA<n>_SHA<h> for signed links, SHA<h> for digest links")
                    .required(true)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"cot_part" <PART> "IMAGE:OUT:SIGN_KEY:VERIFY_KEY, one per stage in boot order")
                    .required(true)
                    .num_args(1..)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"key_order" <ORDER> "Byte order of RSA material: little or big")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"rollback_index" <U32> "Rollback index")
                    .required(false)
                    .value_parser(parse_number),
            )
            .arg(
                arg!(--"image_relative_path" <DIR> "Prefix of every image path")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"digest_output" <FILE> "Write the first stage digest of a digest bound chain")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"signing_helper" <APP> "Helper used for signing")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"signing_helper_with_files" <APP> "Helper used for signing using files")
                    .required(false)
                    .conflicts_with("signing_helper")
                    .value_parser(value_parser!(PathBuf)),
            ),
        Command::new("verify")
            .about("Verifies a secure image against an OTP image")
            .arg(
                arg!(--"soc" <SOC> "SoC id (2600, 2605, 1030) [default: 2600]")
                    .required(false)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(--"sec_image" <IMAGE> "Secure image")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"output" <IMAGE> "Output for the decrypted image")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"otp_image" <IMAGE> "OTP image")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"cot_offset" <OFFSETS> "Offset of every chained image, e.g. 0x10000:0x100000")
                    .required(false)
                    .value_parser(parse_offsets),
            ),
        Command::new("make_otp_image")
            .about("Compiles an OTP image from a JSON configuration")
            .arg(
                arg!(<config> "OTP configuration file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"key_folder" <DIR> "Key folder")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"user_data_folder" <DIR> "User data folder")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"output_folder" <DIR> "Output folder")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            ),
    ];

    let cmd = Command::new("socsec")
        .arg_required_else_help(true)
        .subcommands(sub_cmds)
        .about("ASPEED secure boot imaging tools")
        .get_matches();

    let result = match cmd.subcommand() {
        Some(("make_secure_bl1_image", args)) => bl1::run_cmd(args),
        Some(("make_sv_chain_image", args)) => chain::run_cmd(args),
        Some(("verify", args)) => verify::run_cmd(args),
        Some(("make_otp_image", args)) => otp::run_cmd(args),
        _ => unreachable!(),
    };

    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}

/// Parse a decimal or `0x` prefixed hexadecimal number
fn parse_number(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => u32::from_str_radix(digits, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("{text}: {err}"))
}

/// Parse colon separated offsets
fn parse_offsets(text: &str) -> Result<Vec<u32>, String> {
    text.split(':').map(parse_number).collect()
}

/// External helper when one is named, otherwise sign with the PEM key itself
pub(crate) fn image_signer(
    helper: Option<&PathBuf>,
    helper_with_files: Option<&PathBuf>,
) -> Box<dyn ImageSigner> {
    match (helper, helper_with_files) {
        (Some(helper), _) => Box::new(ExternalSigner::new(helper, HelperMode::Stdio)),
        (None, Some(helper)) => Box::new(ExternalSigner::new(helper, HelperMode::Files)),
        (None, None) => Box::new(LocalSigner::default()),
    }
}
