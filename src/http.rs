//! HTTP client with a shared cookie jar, fixed header sets and timeouts

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA, USER_AGENT,
};
use reqwest::{Client, Response, Url};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT_PREFIX: &str = "Mozilla/5.0 (compatible; SmartNetwork-HA/";
const USER_AGENT_SUFFIX: &str = "; +https://github.com/DevWorkTech/ha-smartnetworks)";

/// User-Agent sent with every portal request
pub fn user_agent() -> String {
    format!(
        "{}{}{}",
        USER_AGENT_PREFIX,
        env!("CARGO_PKG_VERSION"),
        USER_AGENT_SUFFIX
    )
}

/// Header sets, one per kind of portal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Login form submission
    Form,
    /// Authenticated data fetch
    Json,
    /// Plain page load (token scrape)
    Html,
}

impl RequestKind {
    pub fn headers(self, user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        if self == RequestKind::Form {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
            );
        }
        if matches!(self, RequestKind::Form | RequestKind::Json) {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
            headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));
        headers
    }
}

pub struct HttpClient {
    inner: Client,
    jar: Arc<Jar>,
    user_agent: String,
}

impl HttpClient {
    pub fn new(timeout: Duration, verify_tls: bool) -> reqwest::Result<Self> {
        let jar = Arc::new(Jar::default());

        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;

        if !verify_tls {
            tracing::warn!("TLS certificate verification is disabled");
        }

        Ok(Self {
            inner: client,
            jar,
            user_agent: user_agent(),
        })
    }

    pub async fn get(&self, url: &Url, kind: RequestKind) -> reqwest::Result<Response> {
        self.inner
            .get(url.clone())
            .headers(kind.headers(&self.user_agent))
            .send()
            .await
    }

    pub async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        url: &Url,
        form: &T,
    ) -> reqwest::Result<Response> {
        self.inner
            .post(url.clone())
            .headers(RequestKind::Form.headers(&self.user_agent))
            .form(form)
            .send()
            .await
    }

    /// Cookies the jar would send to `url`, as name -> value
    pub fn export_cookies(&self, url: &Url) -> BTreeMap<String, String> {
        let Some(header) = self.jar.cookies(url) else {
            return BTreeMap::new();
        };
        let Ok(raw) = header.to_str() else {
            return BTreeMap::new();
        };

        raw.split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Seed the jar with previously persisted cookies for `url`
    pub fn import_cookies<'a, I>(&self, url: &Url, cookies: I) -> usize
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut count = 0;
        for (name, value) in cookies {
            self.jar.add_cookie_str(&format!("{}={}; Path=/", name, value), url);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpClient {
        HttpClient::new(DEFAULT_TIMEOUT, true).unwrap()
    }

    #[test]
    fn test_user_agent_embeds_version() {
        let ua = user_agent();
        assert!(ua.starts_with("Mozilla/5.0 (compatible; SmartNetwork-HA/"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_header_sets() {
        let form = RequestKind::Form.headers("ua");
        assert_eq!(
            form.get(CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded; charset=UTF-8"
        );
        assert_eq!(form.get(ACCEPT).unwrap(), "application/json");

        let json = RequestKind::Json.headers("ua");
        assert!(json.get(CONTENT_TYPE).is_none());
        assert_eq!(json.get("X-Requested-With").unwrap(), "XMLHttpRequest");

        let html = RequestKind::Html.headers("ua");
        assert!(html.get(ACCEPT).is_none());
        assert_eq!(html.get(USER_AGENT).unwrap(), "ua");
        assert_eq!(html.get(EXPIRES).unwrap(), "0");
    }

    #[test]
    fn test_cookie_export_import() {
        let url = Url::parse("https://stat.umnyeseti.ru").unwrap();
        let http = client();
        assert!(http.export_cookies(&url).is_empty());

        let mut saved = BTreeMap::new();
        saved.insert("_session_id".to_string(), "abc123".to_string());
        saved.insert("remember".to_string(), "1".to_string());
        assert_eq!(http.import_cookies(&url, &saved), 2);

        assert_eq!(http.export_cookies(&url), saved);
    }

    #[test]
    fn test_cookies_scoped_to_host() {
        let url = Url::parse("https://stat.umnyeseti.ru").unwrap();
        let other = Url::parse("https://example.com").unwrap();
        let http = client();

        let mut saved = BTreeMap::new();
        saved.insert("sid".to_string(), "x".to_string());
        http.import_cookies(&url, &saved);

        assert!(http.export_cookies(&other).is_empty());
    }
}
