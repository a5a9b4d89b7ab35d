//! 联网工具：web_fetch 抓取 URL 内容，web_search 通过 DuckDuckGo HTML 端点搜索
//!
//! web_fetch 仅 http/https；配置了域名白名单时只放行白名单（含子域名）。HTML 响应用 html2text 提取可读文本，
//! 超过 max_chars 时截断。web_search 只访问配置的搜索端点，返回编号的标题、链接与摘要。

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::memory::truncate_chars;
use crate::tools::{capability, FieldType, ParameterSchema, Tool};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<head")
}

/// 从 URL 中提取 host
fn extract_domain(url: &str) -> Option<String> {
    let rest = url
        .trim()
        .strip_prefix("https://")
        .or_else(|| url.trim().strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?.split(':').next()?;
    (!host.is_empty()).then(|| host.to_lowercase())
}

pub struct WebFetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_chars: usize,
}

impl WebFetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            max_chars,
        }
    }

    fn check(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url).ok_or("URL must start with http:// or https://")?;
        if self.allowed_domains.is_empty()
            || self
                .allowed_domains
                .iter()
                .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
        {
            Ok(())
        } else {
            Err(format!("Domain not in allowlist: {domain}"))
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page or API response over HTTP(S) and return it as readable text. Optional prompt says what to look for."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("url", FieldType::String, "http:// or https:// URL")
            .optional("prompt", FieldType::String, "What to extract from the page")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::NETWORK]
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = args["url"].as_str().unwrap_or_default().trim();
        self.check(url)?;
        tracing::info!(url = %url, "web_fetch tool execute");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {status} from {url}"));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {e}"))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            match from_read(body.as_bytes(), 120) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => body.to_string(),
            }
        } else {
            body.to_string()
        };

        let mut out = format!("Fetched {url} (HTTP {})\n\n", status.as_u16());
        out.push_str(&truncate_chars(&text, self.max_chars));
        if let Some(prompt) = args["prompt"].as_str().filter(|p| !p.is_empty()) {
            out.push_str(&format!("\n\nLooking for: {prompt}"));
        }
        Ok(out)
    }
}

const MAX_SEARCH_RESULTS: u64 = 10;

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

static ANCHOR_RE: OnceLock<Option<Regex>> = OnceLock::new();
static HREF_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TAG_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// 去标签并还原常见实体
fn inline_text(fragment: &str) -> String {
    let stripped = match cached(&TAG_RE, r"<[^>]*>") {
        Some(re) => re.replace_all(fragment, ""),
        None => fragment.into(),
    };
    let decoded = stripped
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// DuckDuckGo 的结果链接是跳转地址，真实 URL 在 uddg 参数里
fn resolve_result_url(href: &str) -> String {
    let href = inline_text(href);
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.clone()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|u| u.query_pairs().find(|(k, _)| k == "uddg").map(|(_, v)| v.into_owned()))
        .unwrap_or(href)
}

/// 从结果页提取前 limit 条：result__a 开始一条结果，随后的 result__snippet 是它的摘要
pub fn parse_search_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let (Some(anchor), Some(href)) = (
        cached(&ANCHOR_RE, r"(?s)<a\b([^>]*)>(.*?)</a>"),
        cached(&HREF_RE, r#"href="([^"]*)""#),
    ) else {
        return Vec::new();
    };
    let mut hits: Vec<SearchHit> = Vec::new();
    for caps in anchor.captures_iter(html) {
        let attrs = &caps[1];
        if attrs.contains("result__a") {
            if hits.len() == limit {
                break;
            }
            let url = href
                .captures(attrs)
                .map(|h| resolve_result_url(&h[1]))
                .unwrap_or_default();
            hits.push(SearchHit {
                title: inline_text(&caps[2]),
                url,
                snippet: String::new(),
            });
        } else if attrs.contains("result__snippet") {
            if let Some(last) = hits.last_mut().filter(|h| h.snippet.is_empty()) {
                last.snippet = inline_text(&caps[2]);
            }
        }
    }
    hits
}

pub fn format_search_results(query: &str, hits: &[SearchHit]) -> String {
    let body = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. [{}]({})\n{}", i + 1, hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Web search results for '{query}':\n\n{body}")
}

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    max_chars: usize,
}

impl WebSearchTool {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64, max_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            max_chars,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for solutions and documentation. Returns numbered results with title, URL and snippet; use web_fetch to read a result."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("query", FieldType::String, "Search query")
            .with_default("num_results", FieldType::Integer, Value::from(5), "Number of results (1-10)")
    }

    fn capability_tags(&self) -> &'static [&'static str] {
        &[capability::NETWORK]
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args["query"].as_str().unwrap_or_default().trim();
        if query.is_empty() {
            return Err("Empty search query".to_string());
        }
        let limit = args["num_results"].as_u64().unwrap_or(5).clamp(1, MAX_SEARCH_RESULTS) as usize;
        let url = Url::parse_with_params(&self.endpoint, &[("q", query)])
            .map_err(|e| format!("Invalid search endpoint {}: {e}", self.endpoint))?;
        tracing::info!(query = %query, limit, "web_search tool execute");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Search request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {status} from search endpoint"));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {e}"))?;
        let hits = parse_search_results(&html, limit);
        if hits.is_empty() {
            return Err(format!("No results found for '{query}'"));
        }
        Ok(truncate_chars(&format_search_results(query, &hits), self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://docs.rs/tokio"), Some("docs.rs".into()));
        assert_eq!(extract_domain("http://Example.com:8080/x?y"), Some("example.com".into()));
        assert_eq!(extract_domain("ftp://x"), None);
    }

    #[test]
    fn test_allowlist_includes_subdomains() {
        let tool = WebFetchTool::new(vec!["rust-lang.org".into()], 5, 100);
        assert!(tool.check("https://doc.rust-lang.org/std").is_ok());
        assert!(tool.check("https://evil.org").is_err());
        let open = WebFetchTool::new(vec![], 5, 100);
        assert!(open.check("https://anything.dev").is_ok());
        assert!(open.check("file:///etc/passwd").is_err());
    }

    const RESULTS_PAGE: &str = r#"
        <div class="result results_links">
          <h2 class="result__title">
            <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fdocs.rs%2Ftokio%2Flatest%2Ftokio%2Ftime%2Ffn.timeout.html&amp;rut=abc">
              tokio::time::<b>timeout</b> - Rust
            </a>
          </h2>
          <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Requires a <b>Future</b> to complete before the specified duration &amp; more.</a>
        </div>
        <div class="result results_links">
          <a rel="nofollow" class="result__a" href="https://users.rust-lang.org/t/timeout/1">Timeout &quot;help&quot;</a>
          <a class="result__snippet">Forum thread</a>
        </div>
        <div class="result results_links">
          <a rel="nofollow" class="result__a" href="https://example.com/third">Third</a>
        </div>
    "#;

    #[test]
    fn test_search_results_are_parsed_in_page_order() {
        let hits = parse_search_results(RESULTS_PAGE, 5);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "tokio::time::timeout - Rust");
        assert_eq!(
            hits[0].url,
            "https://docs.rs/tokio/latest/tokio/time/fn.timeout.html"
        );
        assert_eq!(
            hits[0].snippet,
            "Requires a Future to complete before the specified duration & more."
        );
        assert_eq!(hits[1].title, "Timeout \"help\"");
        assert_eq!(hits[1].url, "https://users.rust-lang.org/t/timeout/1");
        assert_eq!(hits[2].snippet, "");

        assert_eq!(parse_search_results(RESULTS_PAGE, 1).len(), 1);
        assert!(parse_search_results("<html>nothing</html>", 5).is_empty());
    }

    #[test]
    fn test_search_results_formatting() {
        let hits = parse_search_results(RESULTS_PAGE, 2);
        let text = format_search_results("tokio timeout", &hits);
        assert!(text.starts_with("Web search results for 'tokio timeout':\n\n1. [tokio::time::timeout - Rust](https://docs.rs/"));
        assert!(text.contains("\n\n2. [Timeout \"help\"](https://users.rust-lang.org/t/timeout/1)\nForum thread"));
        assert!(!text.contains("3."));
    }

    #[test]
    fn test_web_search_descriptor() {
        let tool = WebSearchTool::new("https://html.duckduckgo.com/html/", 5, 1000);
        assert!(tool.is_read_only());
        assert_eq!(tool.capability_tags(), &[capability::NETWORK]);
        let args = tool.parameters().validate(&serde_json::json!({"query": "x"})).unwrap();
        assert_eq!(args["num_results"], 5);
    }

    #[test]
    fn test_html_detection() {
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("{\"json\": true}"));
    }
}
