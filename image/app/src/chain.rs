/*++

Licensed under the Apache-2.0 license.

File Name:

   chain.rs

Abstract:

    File contains implementation of the make_sv_chain_image command.

--*/

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ArgMatches;
use log::{debug, info};
use socsec_image_crypto::RustCrypto;
use socsec_image_gen::{ChainConfig, ChainPartition, ImageGenerator};
use socsec_image_serde::ArtifactWriter;
use socsec_image_types::{Algorithm, KeyOrder};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let algorithm: Algorithm = args
        .get_one::<String>("algorithm")
        .with_context(|| "algorithm arg not specified")?
        .parse()?;

    let key_order: KeyOrder = match args.get_one::<String>("key_order") {
        Some(order) => order.parse()?,
        None => KeyOrder::default(),
    };

    let relative_path = args
        .get_one::<String>("image_relative_path")
        .map_or("", String::as_str);

    if let Some(index) = args.get_one::<u32>("rollback_index") {
        debug!("Rollback index {index} is not carried by chain images");
    }

    let stages = args
        .get_many::<String>("cot_part")
        .with_context(|| "cot_part arg not specified")?
        .map(|descriptor| {
            let partition = ChainPartition::parse(descriptor, relative_path)
                .with_context(|| format!("Malformed chained partition \"{descriptor}\""))?;
            let image = std::fs::read(&partition.input)
                .with_context(|| format!("Failed to read {}", partition.input.display()))?;
            Ok((partition, image))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let signer = crate::image_signer(
        args.get_one::<PathBuf>("signing_helper"),
        args.get_one::<PathBuf>("signing_helper_with_files"),
    );
    let gen = ImageGenerator::new(RustCrypto::default(), &*signer);
    let chain = gen.generate_chain(&ChainConfig {
        algorithm,
        key_order,
        stages,
    })?;

    let mut writer = ArtifactWriter::new();
    for stage in chain.stages {
        writer.add(stage.output, stage.image);
    }
    if let Some(path) = args.get_one::<PathBuf>("digest_output") {
        let digest = chain
            .root_digest
            .with_context(|| "digest_output needs a SHA<h> chain algorithm")?;
        writer.add(path, digest);
    }
    let outputs: Vec<PathBuf> = writer.paths().map(Path::to_path_buf).collect();
    writer.commit()?;
    for path in outputs {
        info!("wrote {}", path.display());
    }

    Ok(())
}
