// Credential store: keeps the API key in a small JSON file under the user's
// configuration directory so later runs do not have to ask for it again.
//
// The file holds the header map the requests are sent with
// (`{"Authorization": "luma-api-key=<key>"}`), which keeps key files written
// by older Luma clients readable.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of the `Authorization` header value expected by the Luma API.
pub const AUTH_HEADER_PREFIX: &str = "luma-api-key=";

const CONFIG_DIR_NAME: &str = "luma";
const AUTH_FILE_NAME: &str = "auth.json";
const LEGACY_DIR_NAME: &str = ".lumaapi";

/// The single persisted credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub api_key: String,
}

impl CredentialRecord {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        header_value(&self.api_key)
    }
}

/// Build the `Authorization` header value for a raw API key.
pub fn header_value(api_key: &str) -> String {
    format!("{AUTH_HEADER_PREFIX}{api_key}")
}

/// On-disk shape of the credential file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredAuth {
    #[serde(rename = "Authorization")]
    authorization: String,
}

/// Reads and writes the credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    legacy_path: Option<PathBuf>,
}

impl CredentialStore {
    /// Location of the credential file for the current user.
    pub fn path_for_current_user() -> Result<PathBuf, CredentialError> {
        let base = dirs::config_dir().ok_or(CredentialError::UnsupportedPlatform)?;
        Ok(base.join(CONFIG_DIR_NAME).join(AUTH_FILE_NAME))
    }

    /// Store at the per-user location. Falls back to reading the legacy
    /// `~/.lumaapi/auth.json` file when nothing has been saved yet.
    pub fn for_current_user() -> Result<Self, CredentialError> {
        let path = Self::path_for_current_user()?;
        let legacy_path = dirs::home_dir().map(|home| home.join(LEGACY_DIR_NAME).join(AUTH_FILE_NAME));
        Ok(Self { path, legacy_path })
    }

    /// Store backed by an explicit file (primarily for testing).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_path: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential. A missing file is not an error.
    pub fn load(&self) -> Result<Option<CredentialRecord>, CredentialError> {
        if let Some(record) = read_record(&self.path)? {
            return Ok(Some(record));
        }
        match &self.legacy_path {
            Some(legacy) => {
                let record = read_record(legacy)?;
                if record.is_some() {
                    debug!(path = %legacy.display(), "using legacy credential file");
                }
                Ok(record)
            }
            None => Ok(None),
        }
    }

    /// Replace the stored credential. The new content is written to a
    /// sibling temp file and renamed into place, so a crash never leaves a
    /// half-written key behind.
    pub fn save(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|source| CredentialError::Io {
            path: dir.clone(),
            source,
        })?;

        let contents = serde_json::to_vec(&StoredAuth {
            authorization: record.header_value(),
        })
        .map_err(|err| CredentialError::Corrupt {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;

        let io_err = |source| CredentialError::Io {
            path: self.path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        set_restricted_permissions(tmp.as_file()).map_err(io_err)?;
        tmp.write_all(&contents).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|err| io_err(err.error))?;
        debug!(path = %self.path.display(), "saved credential");
        Ok(())
    }

    /// Remove the stored credential, including a legacy file `load` would
    /// fall back to. Returns whether any file existed.
    pub fn clear(&self) -> Result<bool, CredentialError> {
        let mut removed = remove_if_present(&self.path)?;
        if let Some(legacy) = &self.legacy_path {
            removed |= remove_if_present(legacy)?;
        }
        Ok(removed)
    }
}

fn remove_if_present(path: &Path) -> Result<bool, CredentialError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed credential");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(CredentialError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn read_record(path: &Path) -> Result<Option<CredentialRecord>, CredentialError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CredentialError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let corrupt = |reason: String| CredentialError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let stored: StoredAuth =
        serde_json::from_str(&contents).map_err(|err| corrupt(err.to_string()))?;
    let api_key = stored
        .authorization
        .strip_prefix(AUTH_HEADER_PREFIX)
        .map(str::trim)
        .ok_or_else(|| corrupt("unexpected Authorization value".into()))?;
    if api_key.is_empty() {
        return Err(corrupt("stored API key is empty".into()));
    }
    Ok(Some(CredentialRecord::new(api_key)))
}

#[cfg(unix)]
fn set_restricted_permissions(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_restricted_permissions(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("failed to determine configuration directory for this platform")]
    UnsupportedPlatform,
    #[error("credential file {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("I/O error interacting with {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
