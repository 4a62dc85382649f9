/*++

Licensed under the Apache-2.0 license.

File Name:

   profile.rs

Abstract:

    File contains utilities for parsing signing profiles

--*/

use anyhow::Context;
use serde_derive::Deserialize;
use std::path::{Path, PathBuf};

/// BL1 signing defaults. Command line flags take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Bl1Profile {
    pub soc: Option<String>,

    pub algorithm: Option<String>,

    pub key_order: Option<String>,

    pub header_offset: Option<u32>,

    pub enc_offset: Option<u32>,

    pub flash_patch_offset: Option<u32>,

    pub rsa_sign_key: Option<PathBuf>,

    pub gcm_aes_key: Option<PathBuf>,

    pub aes_key: Option<PathBuf>,

    pub rsa_aes: Option<PathBuf>,

    pub key_in_otp: Option<bool>,

    pub stack_intersects_verification_region: Option<bool>,

    pub cot_algorithm: Option<String>,

    pub cot_verify_key: Option<PathBuf>,

    pub cot_digest: Option<PathBuf>,

    pub signing_helper: Option<PathBuf>,

    pub signing_helper_with_files: Option<PathBuf>,

    pub deterministic: Option<bool>,
}

/// Signing profile
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SigningProfile {
    #[serde(default)]
    pub bl1: Bl1Profile,
}

impl SigningProfile {
    /// Resolve relative paths against `base`
    fn rebase(mut self, base: &Path) -> Self {
        let bl1 = &mut self.bl1;
        for path in [
            &mut bl1.rsa_sign_key,
            &mut bl1.gcm_aes_key,
            &mut bl1.aes_key,
            &mut bl1.rsa_aes,
            &mut bl1.cot_verify_key,
            &mut bl1.cot_digest,
            &mut bl1.signing_helper,
            &mut bl1.signing_helper_with_files,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

/// Load a signing profile from file. Paths in the profile are relative to
/// the profile itself.
pub(crate) fn load_profile(path: &PathBuf) -> anyhow::Result<SigningProfile> {
    let profile_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read the profile {}", path.display()))?;

    let profile: SigningProfile = toml::from_str(&profile_str)
        .with_context(|| format!("Failed to parse profile {}", path.display()))?;

    let base = path.parent().unwrap_or(Path::new(""));
    Ok(profile.rebase(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_rebase() {
        let profile: SigningProfile = toml::from_str(
            r#"
            [bl1]
            soc = "2605"
            algorithm = "AES_RSA2048_SHA256"
            header_offset = 0x20
            rsa_sign_key = "keys/oem0.pem"
            aes_key = "/abs/aes.bin"
            key_in_otp = true
            "#,
        )
        .unwrap();
        let profile = profile.rebase(Path::new("/profiles"));
        assert_eq!(profile.bl1.soc.as_deref(), Some("2605"));
        assert_eq!(profile.bl1.header_offset, Some(0x20));
        assert_eq!(profile.bl1.key_in_otp, Some(true));
        assert_eq!(
            profile.bl1.rsa_sign_key,
            Some(PathBuf::from("/profiles/keys/oem0.pem"))
        );
        assert_eq!(profile.bl1.aes_key, Some(PathBuf::from("/abs/aes.bin")));
        assert_eq!(profile.bl1.enc_offset, None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<SigningProfile>("[bl1]\nrsa_key = \"k.pem\"\n").is_err());
        assert!(toml::from_str::<SigningProfile>("[bl2]\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_profile(&PathBuf::from("/nonexistent/profile.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/profile.toml"));
    }
}
