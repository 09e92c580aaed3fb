//! Durable operator diagnostics
//!
//! A failed poll cycle raises an issue for the account, a successful one
//! clears it. Unlike the sensor values the issue survives restarts, so an
//! operator can see that an account is stuck without watching the logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("issue store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode issue: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A raised issue as persisted on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub account: String,
    pub error: String,
    pub raised_at: DateTime<Utc>,
}

#[async_trait]
pub trait IssueReporter: Send + Sync {
    async fn raise(&self, account: &str, error: &str) -> Result<(), IssueError>;

    async fn clear(&self, account: &str) -> Result<(), IssueError>;
}

/// Keeps one JSON file per account with an open issue
#[derive(Debug, Clone)]
pub struct FileIssueReporter {
    dir: PathBuf,
}

impl FileIssueReporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, account: &str) -> PathBuf {
        self.dir.join(format!("umnyeseti_issue_{}.json", account))
    }

    /// Currently open issue for the account, if any
    pub async fn current(&self, account: &str) -> Result<Option<Issue>, IssueError> {
        let path = self.path_for(account);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IssueError::Io { path, source }),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> IssueError + '_ {
    move |source| IssueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl IssueReporter for FileIssueReporter {
    async fn raise(&self, account: &str, error: &str) -> Result<(), IssueError> {
        let path = self.path_for(account);
        // The same error raised again keeps its original time
        let raised_at = match self.current(account).await {
            Ok(Some(open)) if open.error == error => open.raised_at,
            _ => Utc::now(),
        };
        let issue = Issue {
            account: account.to_string(),
            error: error.to_string(),
            raised_at,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;
        let json = serde_json::to_string_pretty(&issue)?;
        tokio::fs::write(&path, json).await.map_err(io_error(&path))
    }

    async fn clear(&self, account: &str) -> Result<(), IssueError> {
        let path = self.path_for(account);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Cleared issue for account {}", account);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(IssueError::Io { path, source }),
        }
    }
}
