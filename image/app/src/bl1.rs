/*++

Licensed under the Apache-2.0 license.

File Name:

   bl1.rs

Abstract:

    File contains implementation of the make_secure_bl1_image command.

--*/

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ArgMatches;
use log::{debug, info};
use socsec_error::SocsecError;
use socsec_image_crypto::RustCrypto;
use socsec_image_gen::{Bl1Config, CotBinding, ImageGenerator};
use socsec_image_serde::ArtifactWriter;
use socsec_image_types::{Algorithm, KeyOrder, SocVersion};

use crate::profile::{load_profile, Bl1Profile};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let profile = match args.get_one::<PathBuf>("profile") {
        Some(path) => load_profile(path)?.bl1,
        None => Bl1Profile::default(),
    };

    let bl1_image: &PathBuf = args
        .get_one::<PathBuf>("bl1_image")
        .with_context(|| "bl1_image arg not specified")?;

    let output: &PathBuf = args
        .get_one::<PathBuf>("output")
        .with_context(|| "output arg not specified")?;

    let path_arg = |name: &str, fallback: &Option<PathBuf>| {
        args.get_one::<PathBuf>(name).cloned().or_else(|| fallback.clone())
    };
    let number_arg =
        |name: &str, fallback: Option<u32>| args.get_one::<u32>(name).copied().or(fallback);
    let string_arg = |name: &str, fallback: &Option<String>| {
        args.get_one::<String>(name).cloned().or_else(|| fallback.clone())
    };

    let soc: SocVersion = match string_arg("soc", &profile.soc) {
        Some(soc) => soc.parse()?,
        None => SocVersion::Ast2600,
    };
    let algorithm: Algorithm = string_arg("algorithm", &profile.algorithm)
        .ok_or(SocsecError::ARG_INVALID_ALGORITHM)?
        .parse()?;
    let key_order: KeyOrder = match string_arg("key_order", &profile.key_order) {
        Some(order) => order.parse()?,
        None => KeyOrder::default(),
    };

    if let Some(index) = args.get_one::<u32>("rollback_index") {
        debug!("Rollback index {index} is not carried by BL1 images");
    }

    let image = std::fs::read(bl1_image)
        .with_context(|| format!("Failed to read {}", bl1_image.display()))?;

    let mut config = Bl1Config::new(soc, algorithm, image);
    config.key_order = key_order;
    config.header_offset = number_arg("header_offset", profile.header_offset);
    config.enc_offset = number_arg("enc_offset", profile.enc_offset);
    config.flash_patch_offset = number_arg("flash_patch_offset", profile.flash_patch_offset);
    config.sign_key = path_arg("rsa_sign_key", &profile.rsa_sign_key);
    config.rsa_aes_key = path_arg("rsa_aes", &profile.rsa_aes);
    config.aes_key = read_optional(path_arg("aes_key", &profile.aes_key))?;
    config.gcm_key = read_optional(path_arg("gcm_aes_key", &profile.gcm_aes_key))?;
    config.key_in_otp = args.get_flag("key_in_otp") || profile.key_in_otp.unwrap_or(false);
    config.deterministic =
        args.get_flag("deterministic") || profile.deterministic.unwrap_or(false);
    if let Some(intersects) = profile.stack_intersects_verification_region {
        config.stack_intersects_verification_region = intersects;
    }
    config.cot = cot_binding(
        string_arg("cot_algorithm", &profile.cot_algorithm),
        path_arg("cot_verify_key", &profile.cot_verify_key),
        path_arg("cot_digest", &profile.cot_digest),
    )?;

    let helper = path_arg("signing_helper", &profile.signing_helper);
    let helper_with_files = path_arg("signing_helper_with_files", &profile.signing_helper_with_files);
    let signer = crate::image_signer(helper.as_ref(), helper_with_files.as_ref());

    let gen = ImageGenerator::new(RustCrypto::default(), &*signer);
    let sec_image = gen.generate_bl1(&config)?;

    let mut writer = ArtifactWriter::new();
    writer.add(output, sec_image);
    writer.commit()?;
    info!("{algorithm} image written to {}", output.display());

    Ok(())
}

/// Next stage binding described by the COT arguments
fn cot_binding(
    algorithm: Option<String>,
    verify_key: Option<PathBuf>,
    digest: Option<PathBuf>,
) -> anyhow::Result<Option<CotBinding>> {
    let Some(algorithm) = algorithm else {
        return Ok(None);
    };
    let algorithm: Algorithm = algorithm.parse()?;
    let binding = match (algorithm, verify_key, digest) {
        (Algorithm::RsaSha { .. }, Some(verify_key), _) => CotBinding::Key {
            algorithm,
            verify_key,
        },
        (Algorithm::HashBinding { hash }, _, Some(path)) => CotBinding::Digest {
            hash,
            digest: read_file(&path)?,
        },
        (Algorithm::RsaSha { .. } | Algorithm::HashBinding { .. }, _, _) => {
            Err(SocsecError::ARG_MISSING_COT_DATA)?
        }
        (Algorithm::AesRsaSha { .. } | Algorithm::AesGcm, _, _) => {
            Err(SocsecError::ARG_COT_ALGORITHM_UNSUPPORTED)?
        }
    };
    Ok(Some(binding))
}

fn read_optional(path: Option<PathBuf>) -> anyhow::Result<Option<Vec<u8>>> {
    path.map(|path| read_file(&path)).transpose()
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}
