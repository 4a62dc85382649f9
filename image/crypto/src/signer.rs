/*++

Licensed under the Apache-2.0 license.

File Name:

   signer.rs

Abstract:

    Raw RSA signers: in process, or through an external signing helper.

--*/

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context;
use log::{debug, error};
use rsa::Pkcs1v15Sign;

use socsec_error::SocsecError;
use socsec_image_gen::ImageSigner;

/// Signs with a PEM private key read from disk
#[derive(Default)]
pub struct LocalSigner {}

impl ImageSigner for LocalSigner {
    fn sign(&self, key_path: &Path, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        let key = crate::rsa_private_key_from_pem_file(key_path)?;
        let signature = key
            .sign(Pkcs1v15Sign::new_unprefixed(), message)
            .map_err(|_| SocsecError::KEY_RSA_OPERATION_FAILED)
            .with_context(|| format!("Failed to sign with {}", key_path.display()))?;
        Ok(signature)
    }
}

/// How the message and signature are exchanged with a signing helper
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HelperMode {
    /// `helper <key>`, message on stdin, signature on stdout
    Stdio,

    /// `helper <key> <file>`; the helper replaces the message in the file
    /// with the signature
    Files,
}

/// Delegates signing to an external program, e.g. an HSM front end
pub struct ExternalSigner {
    program: PathBuf,
    mode: HelperMode,
}

impl ExternalSigner {
    pub fn new(program: impl Into<PathBuf>, mode: HelperMode) -> Self {
        Self {
            program: program.into(),
            mode,
        }
    }

    fn sign_stdio(&self, key_path: &Path, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .arg(key_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| SocsecError::SIGNER_HELPER_SPAWN_FAILED)
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        child
            .stdin
            .take()
            .ok_or(SocsecError::SIGNER_HELPER_IO)?
            .write_all(message)
            .map_err(|_| SocsecError::SIGNER_HELPER_IO)?;

        let output = child
            .wait_with_output()
            .map_err(|_| SocsecError::SIGNER_HELPER_IO)?;
        if !output.status.success() {
            error!(
                "Error signing: {}",
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
            Err(SocsecError::SIGNER_HELPER_EXIT_FAILURE)?;
        }
        Ok(output.stdout)
    }

    fn sign_files(&self, key_path: &Path, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut file = tempfile::NamedTempFile::new().map_err(|_| SocsecError::SIGNER_HELPER_IO)?;
        file.write_all(message)
            .and_then(|_| file.flush())
            .map_err(|_| SocsecError::SIGNER_HELPER_IO)?;

        let status = Command::new(&self.program)
            .arg(key_path)
            .arg(file.path())
            .status()
            .map_err(|_| SocsecError::SIGNER_HELPER_SPAWN_FAILED)
            .with_context(|| format!("Failed to run {}", self.program.display()))?;
        if !status.success() {
            error!("Error signing: {} exited with {status}", self.program.display());
            Err(SocsecError::SIGNER_HELPER_EXIT_FAILURE)?;
        }

        // The helper may have replaced the file, so read it back by path
        let mut signature = Vec::new();
        let mut reopened = file.reopen().map_err(|_| SocsecError::SIGNER_HELPER_IO)?;
        reopened
            .seek(SeekFrom::Start(0))
            .and_then(|_| reopened.read_to_end(&mut signature))
            .map_err(|_| SocsecError::SIGNER_HELPER_IO)?;
        Ok(signature)
    }
}

impl ImageSigner for ExternalSigner {
    fn sign(&self, key_path: &Path, message: &[u8]) -> anyhow::Result<Vec<u8>> {
        debug!(
            "Signing {} bytes with {} ({:?})",
            message.len(),
            self.program.display(),
            self.mode
        );
        match self.mode {
            HelperMode::Stdio => self.sign_stdio(key_path, message),
            HelperMode::Files => self.sign_files(key_path, message),
        }
    }
}
