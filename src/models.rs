//! Data models for the subscriber portal

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Portal login credentials, fixed for the lifetime of a monitor
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// Outcome of an authenticated data fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Ok(serde_json::Value),
    /// Portal answered 401; the session has expired
    Unauthorized,
    /// Body was not JSON, usually the HTML login page
    InvalidJson,
    TransportError(String),
}

/// Outcome of a login attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResult {
    Ok(serde_json::Value),
    AuthFailed(String),
    /// Landing page no longer carries an authenticity token
    TokenNotFound,
    TransportError(String),
}

/// Snapshot produced at the end of every poll cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct State {
    pub data: Option<NormalizedPayload>,
    pub error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl State {
    pub fn is_ok(&self) -> bool {
        self.last_attempt.is_some() && self.error.is_none()
    }
}

/// Flat view of the subscriber payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPayload {
    pub account: Option<String>,
    pub balance: Option<f64>,
    pub subscriber: Option<String>,
    pub address: String,
    pub net: NetInfo,
    pub tariff: Tariff,
    pub pays: Vec<Payment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetInfo {
    pub ip: String,
    pub mac: String,
    pub vlan: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tariff {
    pub name: Option<String>,
    pub speed: Option<String>,
    pub amount: Option<f64>,
    pub period: Option<String>,
    pub end_subscribe: Option<String>,
    pub end_days: Option<i64>,
    /// Amount still missing to cover the next charge
    pub pay_subscribe: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub date: Option<String>,
    pub amount: Option<f64>,
}
