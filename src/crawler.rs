//! Link crawler: fetch a page and scrape the parts the parser cares about.
//!
//! Deliberately regex-based; these are announcement pages, not arbitrary
//! markup, and the extracted text only feeds the LLM prompt.

use std::time::Duration;

use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::Client;

use crate::config::CrawlerConfig;
use crate::types::CrawlResult;

/// Cap on extracted visible text, characters.
const MAX_TEXT_CHARS: usize = 5000;
/// Cap on extracted image URLs.
const MAX_IMAGES: usize = 10;

pub struct ContentCrawler {
    http: Client,
    config: CrawlerConfig,
}

impl ContentCrawler {
    pub fn new(config: CrawlerConfig) -> Self {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("reqwest client");
        Self { http, config }
    }

    /// Fetch `url` with bounded retries and linear backoff, then scrape it.
    /// Never returns `Err`; failures are reported inside `CrawlResult`.
    pub async fn crawl(&self, url: &str) -> CrawlResult {
        if url::parse_ok(url).is_none() {
            return CrawlResult {
                success: false,
                content: None,
                title: None,
                description: None,
                images: Vec::new(),
                attempts: 0,
                error: Some(format!("invalid URL: {url}")),
            };
        }

        let mut attempts = 0u32;
        let mut last_error = String::new();
        while attempts < self.config.max_retries {
            attempts += 1;
            match self.fetch(url).await {
                Ok(html) => {
                    let page = scrape_html(&html);
                    return CrawlResult {
                        success: true,
                        content: Some(page.text),
                        title: page.title,
                        description: page.description,
                        images: page.images,
                        attempts,
                        error: None,
                    };
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempts < self.config.max_retries {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.delay_ms * attempts as u64,
                        ))
                        .await;
                    }
                }
            }
        }

        CrawlResult {
            success: false,
            content: None,
            title: None,
            description: None,
            images: Vec::new(),
            attempts,
            error: Some(format!("crawl failed after {attempts} attempts: {last_error}")),
        }
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let resp = self.http.get(url).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.text().await?)
    }
}

mod url {
    /// Minimal syntactic check: absolute http(s) URL with a host part.
    pub fn parse_ok(url: &str) -> Option<()> {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))?;
        let host = rest.split(['/', '?', '#']).next()?;
        if host.is_empty() || host.contains(char::is_whitespace) {
            return None;
        }
        Some(())
    }
}

pub(crate) struct ScrapedPage {
    pub text: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
}

/// Strip script/style and tags, collapse whitespace, pull title/meta/images.
pub(crate) fn scrape_html(html: &str) -> ScrapedPage {
    static RE_SCRIPT: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    static RE_DESC: OnceCell<Regex> = OnceCell::new();
    static RE_IMG: OnceCell<Regex> = OnceCell::new();

    let re_script = RE_SCRIPT
        .get_or_init(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    let re_title = RE_TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>([^<]*)</title>").unwrap());
    let re_desc = RE_DESC.get_or_init(|| {
        Regex::new(r#"(?is)<meta[^>]*name=["']description["'][^>]*content=["']([^"']*)["']"#)
            .unwrap()
    });
    let re_img =
        RE_IMG.get_or_init(|| Regex::new(r#"(?is)<img[^>]*src=["']([^"']+)["']"#).unwrap());

    let title = re_title
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty());
    let description = re_desc
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .filter(|d| !d.is_empty());

    let stripped = re_script.replace_all(html, " ");
    let stripped = re_tags.replace_all(&stripped, " ");
    let decoded = html_escape::decode_html_entities(&stripped).to_string();
    let mut text = re_ws.replace_all(&decoded, " ").trim().to_string();
    if text.chars().count() > MAX_TEXT_CHARS {
        text = text.chars().take(MAX_TEXT_CHARS).collect();
    }

    let images = re_img
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .take(MAX_IMAGES)
        .collect();

    ScrapedPage {
        text,
        title,
        description,
        images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head>
          <title> Open Call 2024 </title>
          <meta name="description" content="Annual juried exhibition">
          <style>body { color: red }</style>
        </head><body>
          <script>var tracking = "noise";</script>
          <h1>Call for&nbsp;Entries</h1>
          <p>Deadline: 2024-06-30</p>
          <img src="/a.jpg"><img src="/b.jpg">
        </body></html>"#;

    #[test]
    fn scrape_extracts_title_description_and_images() {
        let page = scrape_html(PAGE);
        assert_eq!(page.title.as_deref(), Some("Open Call 2024"));
        assert_eq!(page.description.as_deref(), Some("Annual juried exhibition"));
        assert_eq!(page.images, vec!["/a.jpg".to_string(), "/b.jpg".to_string()]);
    }

    #[test]
    fn scrape_strips_script_style_and_collapses_whitespace() {
        let page = scrape_html(PAGE);
        assert!(!page.text.contains("tracking"));
        assert!(!page.text.contains("color: red"));
        assert!(page.text.contains("Call for Entries"));
        assert!(page.text.contains("Deadline: 2024-06-30"));
        assert!(!page.text.contains("  "));
    }

    #[test]
    fn scrape_caps_text_length() {
        let long = format!("<body>{}</body>", "word ".repeat(3000));
        let page = scrape_html(&long);
        assert!(page.text.chars().count() <= MAX_TEXT_CHARS);
    }

    #[test]
    fn scrape_caps_image_count() {
        let many = (0..20)
            .map(|i| format!(r#"<img src="/i{i}.png">"#))
            .collect::<String>();
        let page = scrape_html(&many);
        assert_eq!(page.images.len(), MAX_IMAGES);
    }

    #[test]
    fn url_check_rejects_garbage() {
        assert!(url::parse_ok("https://example.com/call").is_some());
        assert!(url::parse_ok("http://example.com").is_some());
        assert!(url::parse_ok("ftp://example.com").is_none());
        assert!(url::parse_ok("not a url").is_none());
        assert!(url::parse_ok("https://").is_none());
    }
}
