use std::{io::ErrorKind, io::Write, path::Path};

use anyhow::{Context, Result};
use fs_err as fs;
use tracing::debug;

use super::MaterialStoreApi;
use crate::{CertificateMaterial, WorkDir};

/// Stores material as plain files under the configuration directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    workdir: WorkDir,
}

impl LocalStore {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: WorkDir::new(workdir),
        }
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }
}

impl MaterialStoreApi for LocalStore {
    async fn load_certificate_pem(&self) -> Result<Option<String>> {
        read_optional(&self.workdir.cert_path())
            .map(|data| data.map(|data| String::from_utf8_lossy(&data).into_owned()))
    }

    async fn save_certificate(&self, material: &CertificateMaterial) -> Result<()> {
        // Key first: a cert on disk must never point at a key that is not there yet.
        write_atomic(&self.workdir.key_path(), material.private_key_pem().as_bytes())?;
        write_atomic(
            &self.workdir.cert_path(),
            material.certificate_pem().as_bytes(),
        )
    }

    async fn load_key(&self) -> Result<Option<String>> {
        read_optional(&self.workdir.key_path())
            .map(|data| data.map(|data| String::from_utf8_lossy(&data).into_owned()))
    }

    async fn save_key(&self, key_pem: &str) -> Result<()> {
        write_atomic(&self.workdir.key_path(), key_pem.as_bytes())
    }

    async fn load_account_key(&self) -> Result<Option<Vec<u8>>> {
        read_optional(&self.workdir.account_credentials_path())
    }

    async fn save_account_key(&self, account_key: &[u8]) -> Result<()> {
        write_atomic(&self.workdir.account_credentials_path(), account_key)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context("failed to read stored material"),
    }
}

/// Write through a temporary file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().context("material path has no parent directory")?;
    fs::create_dir_all(dir).context("failed to create config directory")?;
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    file.write_all(data).context("failed to write temp file")?;
    file.as_file().sync_all().context("failed to sync temp file")?;
    file.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    debug!("stored {}", path.display());
    Ok(())
}
