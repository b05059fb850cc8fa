use std::path::{Path, PathBuf};

/// Layout of the local configuration directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    workdir: PathBuf,
}

impl WorkDir {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }

    pub fn workdir(&self) -> &PathBuf {
        &self.workdir
    }

    pub fn account_credentials_path(&self) -> PathBuf {
        self.workdir.join("account.json")
    }

    pub fn cert_path(&self) -> PathBuf {
        self.workdir.join("ssl.cert")
    }

    pub fn key_path(&self) -> PathBuf {
        self.workdir.join("ssl.key")
    }
}
