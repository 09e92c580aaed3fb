//! Umnye Seti subscriber portal (stat.umnyeseti.ru)
//!
//! Login is a Rails-style form: the landing page carries an authenticity
//! token, the form is posted to `/login`, and the session cookie is then
//! good for JSON fetches of the landing page until it expires.

use crate::cookies::{CookieError, CookieFile};
use crate::http::{HttpClient, RequestKind};
use crate::models::{AuthResult, Credentials, FetchResult};
use crate::parser;
use crate::portal::SubscriberPortal;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

pub const BASE_URL: &str = "https://stat.umnyeseti.ru";

/// Connection settings for one portal session
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub name: String,
    pub base_url: String,
    pub verify_tls: bool,
    pub timeout: Duration,
    /// Where session cookies are persisted; `None` keeps them in memory only
    pub cookie_file: Option<CookieFile>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            name: "Umnye Seti".to_string(),
            base_url: BASE_URL.to_string(),
            verify_tls: true,
            timeout: crate::http::DEFAULT_TIMEOUT,
            cookie_file: None,
        }
    }
}

pub struct UmnyeSetiPortal {
    config: PortalConfig,
    client: HttpClient,
    base_url: Url,
    login_url: Url,
}

impl UmnyeSetiPortal {
    pub fn new(config: PortalConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid portal URL: {}", config.base_url))?;
        let login_url = base_url.join("login").context("Failed to build login URL")?;
        let client = HttpClient::new(config.timeout, config.verify_tls)
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            client,
            base_url,
            login_url,
        })
    }

    /// Persist cookies after a successful exchange. Failures only get logged.
    async fn persist_quietly(&self) {
        if let Err(e) = self.persist_cookies().await {
            tracing::warn!("[{}] Failed to persist cookies: {}", self.config.name, e);
        }
    }

    /// Step 1: Load the landing page and scrape the authenticity token
    async fn scrape_token(&self) -> Result<Option<String>, reqwest::Error> {
        tracing::debug!("[{}] Loading login page...", self.config.name);

        let resp = self.client.get(&self.base_url, RequestKind::Html).await?;
        let html = resp.text().await?;
        Ok(parser::parse_authenticity_token(&html))
    }

    /// Step 2: Submit the login form
    async fn submit_login(
        &self,
        credentials: &Credentials,
        token: &str,
    ) -> Result<String, reqwest::Error> {
        tracing::debug!("[{}] Submitting login form...", self.config.name);

        let form = [
            ("user[login]", credentials.login.as_str()),
            ("user[password]", credentials.password.as_str()),
            ("authenticity_token", token),
            ("utf8", "&#x2713;"),
            ("commit", "Войти"),
        ];

        let resp = self.client.post_form(&self.login_url, &form).await?;
        resp.text().await
    }
}

/// Interpret the body returned by the login form
fn interpret_login_response(body: &str) -> AuthResult {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        return interpret_login_json(json);
    }

    match parser::parse_error_message(body) {
        Some(message) => AuthResult::AuthFailed(message),
        None => AuthResult::AuthFailed(String::new()),
    }
}

fn interpret_login_json(json: serde_json::Value) -> AuthResult {
    // null, false, 0, "", [] and {} all mean the login was not accepted
    if !crate::mapper::is_truthy(&json) {
        return AuthResult::AuthFailed(String::new());
    }
    let Some(obj) = json.as_object() else {
        return AuthResult::Ok(json);
    };

    let error = obj.get("error").filter(|e| crate::mapper::is_truthy(e)).map(|error| {
        obj.get("message")
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| crate::mapper::value_to_string(error).unwrap_or_default())
    });

    match error {
        Some(message) => AuthResult::AuthFailed(message),
        None => AuthResult::Ok(json),
    }
}

#[async_trait]
impl SubscriberPortal for UmnyeSetiPortal {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn authenticate(&self, credentials: &Credentials) -> AuthResult {
        tracing::info!("[{}] Authenticating as {}...", self.config.name, credentials.login);

        let token = match self.scrape_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!("[{}] Authenticity token not found on login page", self.config.name);
                return AuthResult::TokenNotFound;
            }
            Err(e) => return AuthResult::TransportError(e.to_string()),
        };

        let body = match self.submit_login(credentials, &token).await {
            Ok(body) => body,
            Err(e) => return AuthResult::TransportError(e.to_string()),
        };

        self.persist_quietly().await;

        let result = interpret_login_response(&body);
        match &result {
            AuthResult::Ok(_) => tracing::info!("[{}] Logged in", self.config.name),
            AuthResult::AuthFailed(msg) => {
                tracing::warn!("[{}] Login rejected: '{}'", self.config.name, msg)
            }
            _ => {}
        }
        result
    }

    async fn fetch(&self) -> FetchResult {
        tracing::debug!("[{}] Fetching account data...", self.config.name);

        let resp = match self.client.get(&self.base_url, RequestKind::Json).await {
            Ok(resp) => resp,
            Err(e) => return FetchResult::TransportError(e.to_string()),
        };

        if resp.status() == StatusCode::UNAUTHORIZED {
            return FetchResult::Unauthorized;
        }

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return FetchResult::TransportError(e.to_string()),
        };

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => {
                self.persist_quietly().await;
                FetchResult::Ok(json)
            }
            Err(_) => FetchResult::InvalidJson,
        }
    }

    async fn restore_cookies(&self) -> Result<usize, CookieError> {
        let Some(file) = &self.config.cookie_file else {
            return Ok(0);
        };
        tracing::debug!(
            "[{}] Loading session cookies from {}",
            self.config.name,
            file.path().display()
        );
        let cookies = file.load().await?;
        Ok(self.client.import_cookies(&self.base_url, &cookies))
    }

    async fn persist_cookies(&self) -> Result<(), CookieError> {
        let Some(file) = &self.config.cookie_file else {
            return Ok(());
        };
        let cookies = self.client.export_cookies(&self.base_url);
        file.save(&cookies).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN_PAGE: &str = r#"<html><form action="/login" method="post">
        <input type="hidden" name="authenticity_token" value="tok123">
        </form></html>"#;

    fn creds() -> Credentials {
        Credentials {
            login: "user1".to_string(),
            password: "secret".to_string(),
        }
    }

    fn portal_for(server: &MockServer, cookie_file: Option<CookieFile>) -> UmnyeSetiPortal {
        UmnyeSetiPortal::new(PortalConfig {
            name: "test".to_string(),
            base_url: server.uri(),
            cookie_file,
            ..PortalConfig::default()
        })
        .unwrap()
    }

    async fn mount_login_page(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .mount(server)
            .await;
    }

    #[test]
    fn test_interpret_login_json() {
        assert_eq!(
            interpret_login_response(r#"{"error":"auth_failed","message":"Bad password"}"#),
            AuthResult::AuthFailed("Bad password".to_string())
        );
        assert_eq!(
            interpret_login_response(r#"{"error":"locked"}"#),
            AuthResult::AuthFailed("locked".to_string())
        );
        assert_eq!(
            interpret_login_response("{}"),
            AuthResult::AuthFailed(String::new())
        );
        assert_eq!(
            interpret_login_response(r#"{"ok":true}"#),
            AuthResult::Ok(json!({"ok": true}))
        );
        assert_eq!(
            interpret_login_response("<html>nothing here</html>"),
            AuthResult::AuthFailed(String::new())
        );
    }

    #[test]
    fn test_falsy_login_json_is_rejected() {
        for body in ["null", "false", "0", "\"\"", "[]", "{}"] {
            assert_eq!(
                interpret_login_response(body),
                AuthResult::AuthFailed(String::new()),
                "body {}",
                body
            );
        }
        assert_eq!(interpret_login_response("true"), AuthResult::Ok(json!(true)));
        assert_eq!(interpret_login_response("[1]"), AuthResult::Ok(json!([1])));
    }

    #[tokio::test]
    async fn test_authenticate_posts_form() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(header(
                "content-type",
                "application/x-www-form-urlencoded; charset=UTF-8",
            ))
            .and(body_string_contains("authenticity_token=tok123"))
            .and(body_string_contains("user%5Blogin%5D=user1"))
            .and(body_string_contains("user%5Bpassword%5D=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"redirect": "/"})))
            .expect(1)
            .mount(&server)
            .await;

        let portal = portal_for(&server, None);
        assert_eq!(
            portal.authenticate(&creds()).await,
            AuthResult::Ok(json!({"redirect": "/"}))
        );
    }

    #[tokio::test]
    async fn test_authenticate_surfaces_html_error() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><div class="error_container"><p>Неверный логин</p></div></html>"#,
            ))
            .mount(&server)
            .await;

        let portal = portal_for(&server, None);
        assert_eq!(
            portal.authenticate(&creds()).await,
            AuthResult::AuthFailed("Неверный логин".to_string())
        );
    }

    #[tokio::test]
    async fn test_authenticate_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>down</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let portal = portal_for(&server, None);
        assert_eq!(portal.authenticate(&creds()).await, AuthResult::TokenNotFound);
    }

    #[tokio::test]
    async fn test_fetch_unauthorized_ignores_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"data": {}})))
            .mount(&server)
            .await;

        let portal = portal_for(&server, None);
        assert_eq!(portal.fetch().await, FetchResult::Unauthorized);
    }

    #[tokio::test]
    async fn test_fetch_html_is_invalid_json() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;

        let portal = portal_for(&server, None);
        assert_eq!(portal.fetch().await, FetchResult::InvalidJson);
    }

    #[tokio::test]
    async fn test_fetch_sends_json_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("accept", "application/json"))
            .and(header("x-requested-with", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"a": 1}})))
            .mount(&server)
            .await;

        let portal = portal_for(&server, None);
        assert_eq!(
            portal.fetch().await,
            FetchResult::Ok(json!({"data": {"a": 1}}))
        );
    }

    #[tokio::test]
    async fn test_fetch_transport_error() {
        let portal = UmnyeSetiPortal::new(PortalConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
            ..PortalConfig::default()
        })
        .unwrap();

        assert!(matches!(portal.fetch().await, FetchResult::TransportError(_)));
    }

    #[tokio::test]
    async fn test_session_cookies_persisted_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let file = CookieFile::for_account(dir.path(), "user1");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "_stat_session=s3cr3t; Path=/")
                    .set_body_json(json!({"data": {}})),
            )
            .mount(&server)
            .await;

        let portal = portal_for(&server, Some(file.clone()));
        assert!(matches!(portal.fetch().await, FetchResult::Ok(_)));

        let saved = file.load().await.unwrap();
        assert_eq!(saved.get("_stat_session").map(String::as_str), Some("s3cr3t"));

        let fresh = portal_for(&server, Some(file));
        assert_eq!(fresh.restore_cookies().await.unwrap(), 1);

        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("cookie", "_stat_session=s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"restored": true}})))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(
            fresh.fetch().await,
            FetchResult::Ok(json!({"data": {"restored": true}}))
        );
    }

    #[tokio::test]
    async fn test_restore_corrupt_cookie_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = CookieFile::for_account(dir.path(), "user1");
        std::fs::write(file.path(), "not json").unwrap();

        let server = MockServer::start().await;
        let portal = portal_for(&server, Some(file));
        assert!(portal.restore_cookies().await.is_err());
    }
}
