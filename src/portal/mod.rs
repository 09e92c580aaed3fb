//! Subscriber portal abstraction layer
//!
//! The poller only talks to the portal through the `SubscriberPortal` trait,
//! which keeps the poll state machine independent of HTTP details and lets
//! tests drive it with scripted responses.

pub mod umnyeseti;

pub use umnyeseti::UmnyeSetiPortal;

use crate::cookies::CookieError;
use crate::models::{AuthResult, Credentials, FetchResult};
use async_trait::async_trait;

/// Session-level operations against the subscriber portal
#[async_trait]
pub trait SubscriberPortal: Send + Sync {
    /// Human-readable name of this portal session
    fn name(&self) -> &str;

    /// Log in with the HTML token scrape + form POST flow
    async fn authenticate(&self, credentials: &Credentials) -> AuthResult;

    /// Fetch the account JSON using the current session
    async fn fetch(&self) -> FetchResult;

    /// Load persisted session cookies. Returns how many were restored.
    async fn restore_cookies(&self) -> Result<usize, CookieError> {
        Ok(0)
    }

    /// Write the current session cookies to durable storage
    async fn persist_cookies(&self) -> Result<(), CookieError> {
        Ok(())
    }
}
