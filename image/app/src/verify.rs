/*++

Licensed under the Apache-2.0 license.

File Name:

   verify.rs

Abstract:

    File contains implementation of the verify command.

--*/

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ArgMatches;
use log::{info, warn};
use socsec_error::SocsecError;
use socsec_image_crypto::RustCrypto;
use socsec_image_serde::ArtifactWriter;
use socsec_image_types::SocVersion;
use socsec_image_verify::{bl1_cot_trust, ChainVerifier, FieldVerification, FieldVerifier};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let soc: SocVersion = match args.get_one::<String>("soc") {
        Some(soc) => soc.parse()?,
        None => SocVersion::Ast2600,
    };

    let sec_image_path: &PathBuf = args
        .get_one::<PathBuf>("sec_image")
        .with_context(|| "sec_image arg not specified")?;

    let otp_image_path: &PathBuf = args
        .get_one::<PathBuf>("otp_image")
        .with_context(|| "otp_image arg not specified")?;

    let sec_image = read_file(sec_image_path)?;
    let otp_image = read_file(otp_image_path)?;

    let result = FieldVerifier::new(RustCrypto::default(), soc)
        .verify(&otp_image, &sec_image)
        .with_context(|| format!("Failed to verify {}", sec_image_path.display()))?;
    info!(
        "{} verified ({}, OEM key ID {})",
        sec_image_path.display(),
        result.algorithm,
        result.key_id
    );

    if let Some(offsets) = args.get_one::<Vec<u32>>("cot_offset") {
        verify_chain(&sec_image, &result, offsets)?;
    }

    if let Some(output) = args.get_one::<PathBuf>("output") {
        match result.decrypted {
            Some(decrypted) => {
                let mut writer = ArtifactWriter::new();
                writer.add(output, decrypted);
                writer.commit()?;
                info!("write decrypt image to {}", output.display());
            }
            None => warn!("{} is not encrypted, nothing written", sec_image_path.display()),
        }
    }

    Ok(())
}

/// Verify the chained images placed at `offsets` behind the BL1 image
fn verify_chain(sec_image: &[u8], bl1: &FieldVerification, offsets: &[u32]) -> anyhow::Result<()> {
    let plain = bl1.decrypted.as_deref().unwrap_or(sec_image);
    let root = bl1_cot_trust(plain, bl1.header_offset, bl1.key_order)
        .context("BL1 image carries no chain of trust data")?;

    let images = offsets
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let end = offsets.get(i + 1).map_or(sec_image.len(), |end| *end as usize);
            sec_image
                .get(*start as usize..end)
                .ok_or(SocsecError::IMAGE_OUT_OF_BOUNDS)
        })
        .collect::<Result<Vec<_>, _>>()?;

    ChainVerifier::new(RustCrypto::default())
        .verify(&images, root, bl1.key_order)
        .context("Chain of trust verification failed")?;
    info!("Chain of trust verified ({} images)", images.len());
    Ok(())
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}
