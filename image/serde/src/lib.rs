/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    All-or-nothing output of generated artifacts.

--*/
use anyhow::Context;
use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Set of output files that is written either completely or not at all
#[derive(Debug, Default)]
pub struct ArtifactWriter {
    artifacts: Vec<(PathBuf, Vec<u8>)>,
}

impl ArtifactWriter {
    /// Create an empty instance of `ArtifactWriter`
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `contents` for `path`. A later entry for the same path wins.
    pub fn add(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        let path = path.into();
        self.artifacts.retain(|(queued, _)| *queued != path);
        self.artifacts.push((path, contents.into()));
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.artifacts.iter().map(|(path, _)| path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Write every queued artifact.
    ///
    /// All contents are staged in temporary files next to their targets
    /// first; targets are only replaced once every file has been staged.
    pub fn commit(self) -> anyhow::Result<()> {
        let mut staged = Vec::with_capacity(self.artifacts.len());
        for (path, contents) in &self.artifacts {
            staged.push((path, stage(path, contents)?));
        }
        for (path, file) in staged {
            file.persist(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            debug!("wrote {}", path.display());
        }
        Ok(())
    }
}

fn stage(path: &Path, contents: &[u8]) -> anyhow::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage {}", path.display()))?;
    file.write_all(contents)
        .and_then(|_| file.flush())
        .with_context(|| format!("Failed to stage {}", path.display()))?;
    Ok(file)
}
