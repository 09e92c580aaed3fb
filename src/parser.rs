//! HTML scraping for the portal login flow

use regex::Regex;

const TOKEN_PATTERN: &str =
    r#"(?i)<input[^>]+name=["']authenticity_token["'][^>]+value=["']([^"']+)["']"#;
const ERROR_CONTAINER_PATTERN: &str = r#"(?is)<div\s+class=["']error_container["']\s*>(.*?)</div>"#;
const TAG_PATTERN: &str = r"<[^>]+>";

/// Extract the CSRF token from the login page
pub fn parse_authenticity_token(html: &str) -> Option<String> {
    Regex::new(TOKEN_PATTERN)
        .ok()?
        .captures(html)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Extract the plain-text message of the login error block, if any
pub fn parse_error_message(html: &str) -> Option<String> {
    let caps = Regex::new(ERROR_CONTAINER_PATTERN).ok()?.captures(html)?;
    let inner = caps.get(1)?.as_str();
    let text = Regex::new(TAG_PATTERN).ok()?.replace_all(inner, "");
    Some(text.trim().to_string())
}
