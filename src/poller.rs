//! Poll state machine for one configured account
//!
//! A cycle fetches the account JSON, re-authenticates at most once when the
//! session has expired, and ends in a new `State` snapshot. Failures never
//! escape a cycle: they become the snapshot's `error` while the last good
//! payload is kept.
//!
//! `AccountMonitor` owns the portal session and runs as a single task.
//! Hosts talk to it through a cloneable `MonitorHandle`, so cycles for one
//! account are strictly sequential without any locking.

use crate::issues::IssueReporter;
use crate::mapper::{self, Locale, MapContext, Zone};
use crate::models::{AuthResult, Credentials, FetchResult, NormalizedPayload, State};
use crate::portal::SubscriberPortal;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Why a poll cycle failed. `Display` is the tag stored in `State::error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("transport_error:{0}")]
    Transport(String),
    #[error("auth_failed:init_token_not_found")]
    TokenNotFound,
    #[error("{}", auth_failed_tag(.0))]
    AuthFailed(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid_json")]
    InvalidJson,
    #[error("invalid_response")]
    InvalidResponse,
    #[error("upstream_error:{0}")]
    Upstream(String),
    #[error("no_data")]
    NoData,
}

fn auth_failed_tag(message: &str) -> String {
    if message.is_empty() {
        "auth_failed".to_string()
    } else {
        format!("auth_failed:{}", message)
    }
}

/// Per-account polling settings
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Stable account id, used for issue and cookie file names
    pub id: String,
    pub credentials: Credentials,
    pub locale: Locale,
    pub zone: Zone,
    pub interval: Duration,
}

enum Command {
    Refresh(oneshot::Sender<State>),
    Close(oneshot::Sender<()>),
}

pub struct AccountMonitor {
    settings: MonitorSettings,
    portal: Box<dyn SubscriberPortal>,
    issues: Arc<dyn IssueReporter>,
    state: watch::Sender<State>,
    cookies_restored: bool,
}

impl AccountMonitor {
    pub fn new(
        settings: MonitorSettings,
        portal: Box<dyn SubscriberPortal>,
        issues: Arc<dyn IssueReporter>,
    ) -> Self {
        let (state, _) = watch::channel(State::default());
        Self {
            settings,
            portal,
            issues,
            state,
            cookies_restored: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    /// Run one full poll cycle and publish the resulting snapshot
    pub async fn poll(&mut self) -> State {
        if !self.cookies_restored {
            self.restore_cookies().await;
            self.cookies_restored = true;
        }

        let started = Utc::now();
        let previous = self.state.borrow().data.clone();

        let outcome = self.run_cycle().await;
        self.report(outcome.as_ref().map(|_| ())).await;

        let next = match outcome {
            Ok(payload) => {
                tracing::info!("[{}] Poll succeeded", self.settings.id);
                State {
                    data: Some(payload),
                    error: None,
                    last_attempt: Some(started),
                }
            }
            Err(e) => {
                tracing::warn!("[{}] Poll failed: {}", self.settings.id, e);
                State {
                    data: previous,
                    error: Some(e.to_string()),
                    last_attempt: Some(started),
                }
            }
        };

        self.state.send_replace(next.clone());
        next
    }

    async fn run_cycle(&self) -> Result<NormalizedPayload, CycleError> {
        let mut fetched = self.portal.fetch().await;

        if matches!(fetched, FetchResult::Unauthorized | FetchResult::InvalidJson) {
            tracing::info!(
                "[{}] Session not accepted ({:?}), re-authenticating...",
                self.settings.id,
                fetched
            );
            match self.portal.authenticate(&self.settings.credentials).await {
                AuthResult::Ok(_) => {}
                AuthResult::AuthFailed(message) => return Err(CycleError::AuthFailed(message)),
                AuthResult::TokenNotFound => return Err(CycleError::TokenNotFound),
                AuthResult::TransportError(message) => return Err(CycleError::Transport(message)),
            }
            // One retry only; a still-rejected session waits for the next cycle
            fetched = self.portal.fetch().await;
        }

        let json = match fetched {
            FetchResult::Ok(json) => json,
            FetchResult::Unauthorized => return Err(CycleError::Unauthorized),
            FetchResult::InvalidJson => return Err(CycleError::InvalidJson),
            FetchResult::TransportError(message) => return Err(CycleError::Transport(message)),
        };

        let obj = json.as_object().ok_or(CycleError::InvalidResponse)?;

        if let Some(error) = obj.get("error").filter(|e| mapper::is_truthy(e)) {
            let tag = mapper::value_to_string(error).unwrap_or_default();
            return Err(CycleError::Upstream(tag));
        }

        let data = obj
            .get("data")
            .filter(|d| !d.is_null())
            .ok_or(CycleError::NoData)?;

        let ctx = MapContext::current(self.settings.locale, self.settings.zone);
        Ok(mapper::map_payload(data, &ctx))
    }

    /// Raise or clear the account's issue. Reporter failures are only logged.
    async fn report(&self, outcome: Result<(), &CycleError>) {
        let result = match outcome {
            Ok(()) => self.issues.clear(&self.settings.id).await,
            Err(e) => self.issues.raise(&self.settings.id, &e.to_string()).await,
        };
        if let Err(e) = result {
            tracing::warn!("[{}] Failed to update issue: {}", self.settings.id, e);
        }
    }

    async fn restore_cookies(&self) {
        match self.portal.restore_cookies().await {
            Ok(0) => tracing::debug!("[{}] No saved session cookies", self.settings.id),
            Ok(n) => tracing::debug!("[{}] Restored {} session cookies", self.settings.id, n),
            Err(e) => tracing::warn!(
                "[{}] Ignoring saved cookies, starting unauthenticated: {}",
                self.settings.id,
                e
            ),
        }
    }

    /// Persist session cookies before the monitor goes away
    pub async fn close(&self) {
        tracing::info!("[{}] Closing session", self.settings.id);
        if let Err(e) = self.portal.persist_cookies().await {
            tracing::warn!("[{}] Failed to persist cookies: {}", self.settings.id, e);
        }
    }

    /// Start the periodic poll task. The first cycle runs immediately.
    pub fn spawn(self) -> (MonitorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let handle = MonitorHandle {
            id: self.settings.id.clone(),
            state: self.state.subscribe(),
            commands: commands_tx,
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!(
            "[{}] Polling {} every {} min",
            self.settings.id,
            self.portal.name(),
            self.settings.interval.as_secs() / 60
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll().await;
                }
                command = commands.recv() => match command {
                    Some(Command::Refresh(reply)) => {
                        let state = self.poll().await;
                        ticker.reset();
                        let _ = reply.send(state);
                    }
                    Some(Command::Close(reply)) => {
                        self.close().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.close().await;
                        break;
                    }
                }
            }
        }
    }
}

/// Host-facing handle of a running monitor
#[derive(Clone)]
pub struct MonitorHandle {
    id: String,
    state: watch::Receiver<State>,
    commands: mpsc::Sender<Command>,
}

impl MonitorHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published snapshot
    pub fn current_state(&self) -> State {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every new snapshot
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.clone()
    }

    /// Wait until the first cycle has published its snapshot
    pub async fn initial_state(&self) -> State {
        let mut updates = self.state.clone();
        let result = updates
            .wait_for(|s| s.last_attempt.is_some())
            .await
            .map(|s| s.clone());
        result.unwrap_or_else(|_| self.current_state())
    }

    /// Run a cycle now. A stopped monitor answers with its last snapshot.
    pub async fn force_refresh(&self) -> State {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Refresh(reply_tx)).await.is_err() {
            tracing::warn!("[{}] Monitor is stopped, returning last state", self.id);
            return self.current_state();
        }
        reply_rx.await.unwrap_or_else(|_| self.current_state())
    }

    /// Stop polling and persist the session. Idempotent.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Close(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}
