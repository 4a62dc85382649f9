/*++

Licensed under the Apache-2.0 license.

File Name:

   otp.rs

Abstract:

    File contains implementation of the make_otp_image command.

--*/

use std::path::PathBuf;

use anyhow::Context;
use clap::ArgMatches;
use log::info;
use socsec_image_crypto::RustCrypto;
use socsec_image_serde::ArtifactWriter;
use socsec_otp::{generate_from_file, OtpInputFolders};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path: &PathBuf = args
        .get_one::<PathBuf>("config")
        .with_context(|| "config arg not specified")?;

    let folder = |name: &str| args.get_one::<PathBuf>(name).cloned().unwrap_or_default();
    let folders = OtpInputFolders {
        key_folder: folder("key_folder"),
        user_data_folder: folder("user_data_folder"),
    };
    let output_folder = folder("output_folder");

    let artifacts = generate_from_file(RustCrypto::default(), config_path, &folders)?;

    let mut writer = ArtifactWriter::new();
    for artifact in artifacts.artifacts {
        writer.add(output_folder.join(artifact.name), artifact.contents);
    }
    writer.commit()?;
    info!("Done, OTP images written to {}", output_folder.display());

    Ok(())
}
