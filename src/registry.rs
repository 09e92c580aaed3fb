//! Registry of running account monitors
//!
//! One monitor per configured account. Creating an entry starts its poll
//! task; removing it closes the session and waits for the task to finish.

use crate::config::{AccountConfig, Config};
use crate::issues::IssueReporter;
use crate::poller::{AccountMonitor, MonitorHandle};
use crate::portal::{SubscriberPortal, UmnyeSetiPortal};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct Entry {
    handle: MonitorHandle,
    task: JoinHandle<()>,
}

pub struct MonitorRegistry {
    issues: Arc<dyn IssueReporter>,
    monitors: BTreeMap<String, Entry>,
}

impl MonitorRegistry {
    /// Create a new empty registry
    pub fn new(issues: Arc<dyn IssueReporter>) -> Self {
        Self {
            issues,
            monitors: BTreeMap::new(),
        }
    }

    /// Build the portal session for an account and start polling it
    pub fn spawn_account(&mut self, cfg: &Config, account: &AccountConfig) -> Result<MonitorHandle> {
        let portal = UmnyeSetiPortal::new(account.portal_config(&cfg.global, cfg.timeout()))?;
        self.spawn_with_portal(account, Box::new(portal))
    }

    /// Start polling with an already built portal
    pub fn spawn_with_portal(
        &mut self,
        account: &AccountConfig,
        portal: Box<dyn SubscriberPortal>,
    ) -> Result<MonitorHandle> {
        self.spawn(AccountMonitor::new(
            account.monitor_settings()?,
            portal,
            Arc::clone(&self.issues),
        ))
    }

    fn spawn(&mut self, monitor: AccountMonitor) -> Result<MonitorHandle> {
        let id = monitor.id().to_string();
        if self.monitors.contains_key(&id) {
            bail!("Account '{}' is already registered", id);
        }

        let (handle, task) = monitor.spawn();
        tracing::debug!("Registered account: {}", id);
        self.monitors.insert(
            id,
            Entry {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<&MonitorHandle> {
        self.monitors.get(id).map(|e| &e.handle)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.monitors.keys().map(String::as_str).collect()
    }

    pub fn handles(&self) -> impl Iterator<Item = &MonitorHandle> {
        self.monitors.values().map(|e| &e.handle)
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Close one account's monitor. Returns false if it was not registered.
    pub async fn remove(&mut self, id: &str) -> bool {
        let Some(entry) = self.monitors.remove(id) else {
            return false;
        };
        shutdown(id, entry).await;
        true
    }

    /// Close every monitor, persisting their sessions
    pub async fn close_all(&mut self) {
        let ids: Vec<String> = self.monitors.keys().cloned().collect();
        for id in ids {
            self.remove(&id).await;
        }
    }
}

async fn shutdown(id: &str, entry: Entry) {
    entry.handle.close().await;
    if let Err(e) = entry.task.await {
        tracing::warn!("[{}] Monitor task ended abnormally: {}", id, e);
    }
    tracing::debug!("Unregistered account: {}", id);
}
