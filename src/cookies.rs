//! Cookie file persistence
//!
//! One file per configured account holding a JSON object of cookie name to
//! value. Reads are permissive: a missing file is an empty jar.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    #[error("cookie file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cookie file {path} is not a JSON object of strings: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Cookies = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional location of the cookie file for an account
    pub fn for_account(state_dir: &Path, account_id: &str) -> Self {
        Self::new(state_dir.join(format!("umnyeseti_cookies_{}.json", account_id)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read persisted cookies. A missing file yields an empty map.
    pub async fn load(&self) -> Result<Cookies, CookieError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Cookies::new()),
            Err(source) => {
                return Err(CookieError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| CookieError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn save(&self, cookies: &Cookies) -> Result<(), CookieError> {
        let io_err = |source| CookieError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(cookies).map_err(|source| CookieError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, json).await.map_err(io_err)
    }
}
