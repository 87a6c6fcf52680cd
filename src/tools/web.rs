//! `web_fetch`: HTTP(S) GET with a bounded, text-only response.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::{json, Value};

use crate::error::{ClawError, Result};

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

const WEB_USER_AGENT: &str = concat!("clawloop/", env!("CARGO_PKG_VERSION"));

/// Default cap on response bytes read from the network.
pub const DEFAULT_MAX_FETCH_BYTES: usize = 200_000;

static SCRIPT_OR_STYLE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").ok());
static TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").ok());
static BLANK_LINES: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\n\s*\n+").ok());

/// Tool for fetching a web page.
pub struct WebFetchTool {
    client: Client,
    max_bytes: usize,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebFetchTool {
    /// Create a fetch tool with a 30s request timeout.
    pub fn new() -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            max_bytes: DEFAULT_MAX_FETCH_BYTES,
        }
    }

    /// Cap the number of response bytes read.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }
}

/// Parse and vet a URL: http(s) only, no local or private hosts.
fn check_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ClawError::Tool(format!("Invalid URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClawError::Tool(
            "Only http/https URLs are allowed".to_string(),
        ));
    }
    if is_blocked_host(&url) {
        return Err(ClawError::SecurityViolation(
            "Blocked URL host (local or private network)".to_string(),
        ));
    }
    Ok(url)
}

fn is_blocked_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let host = host.to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }

    let ip_str = host
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(&host);
    match ip_str.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
        }
        Ok(IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (ip.segments()[0] & 0xfe00) == 0xfc00
                || (ip.segments()[0] & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

/// Reduce HTML to readable text. Non-HTML bodies pass through unchanged.
fn html_to_text(body: &str) -> String {
    let mut text = body.to_string();
    for re in [&*SCRIPT_OR_STYLE, &*TAG].into_iter().flatten() {
        text = re.replace_all(&text, "\n").into_owned();
    }
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    let text = match &*BLANK_LINES {
        Some(re) => re.replace_all(&text, "\n\n").into_owned(),
        None => text,
    };
    text.trim().to_string()
}

async fn read_body_limited(mut response: reqwest::Response, max_bytes: usize) -> Result<(String, bool)> {
    let mut buf: Vec<u8> = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ClawError::Tool(format!("Failed to read response body: {}", e)))?
    {
        let remaining = max_bytes.saturating_sub(buf.len());
        if chunk.len() > remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            truncated = true;
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page over HTTP(S) and return its text content"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute http:// or https:// URL"
                }
            },
            "required": ["url"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::NetworkRead
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let raw = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ClawError::Tool("Missing 'url' argument".into()))?;
        let url = check_url(raw)?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, WEB_USER_AGENT)
            .send()
            .await
            .map_err(|e| ClawError::Tool(format!("Web fetch failed: {}", e)))?;

        if is_blocked_host(response.url()) {
            return Err(ClawError::SecurityViolation(format!(
                "Redirect destination is blocked: {}",
                response.url()
            )));
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ClawError::Tool(format!("HTTP error: {}", status)));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        let (body, truncated) = read_body_limited(response, self.max_bytes).await?;
        let mut text = if is_html { html_to_text(&body) } else { body };
        if truncated {
            text.push_str(&format!("\n\n[truncated at {} bytes]", self.max_bytes));
        }
        Ok(ToolOutput::llm_only(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_url_schemes() {
        assert!(check_url("https://example.com/page").is_ok());
        assert!(check_url("http://example.com").is_ok());
        assert!(matches!(
            check_url("file:///etc/passwd"),
            Err(ClawError::Tool(_))
        ));
        assert!(check_url("not a url").is_err());
    }

    #[test]
    fn test_blocked_hosts() {
        for url in [
            "http://localhost:8080",
            "http://127.0.0.1",
            "http://10.1.2.3/admin",
            "http://192.168.0.1",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://printer.local",
        ] {
            assert!(
                matches!(check_url(url), Err(ClawError::SecurityViolation(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><style>p{}</style><script>x()</script></head>\
                    <body><h1>Title</h1><p>Tom &amp; Jerry</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Tom & Jerry"));
        assert!(!text.contains("x()"));
        assert!(!text.contains('<'));
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_scheme() {
        let err = WebFetchTool::new()
            .execute(json!({"url": "ftp://example.com"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("http/https"));
    }
}
