//! Secret store backed by a directory of files.
//!
//! Secret `name` lives in `<dir>/<name>`; its content is the secret value
//! with any trailing newline stripped. Names may contain `/` to address
//! nested files but never `..`, so lookups cannot leave `dir`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use construct::{CredentialError, SecretName, SecretStore};

/// [`SecretStore`] reading one file per secret.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &SecretName) -> Result<PathBuf, CredentialError> {
        let relative = Path::new(name.as_str());
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !contained {
            return Err(CredentialError::Store {
                name: name.to_string(),
                message: "secret names must be relative and must not contain '..'".into(),
            });
        }
        Ok(self.dir.join(relative))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret_value(&self, name: &SecretName) -> Result<String, CredentialError> {
        let path = self.path_for(name)?;
        debug!(secret = %name, path = %path.display(), "reading secret file");

        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(value.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CredentialError::SecretNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(CredentialError::Store {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
