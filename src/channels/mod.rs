//! Channel adapters: turn channel-specific webhook payloads into the one
//! `SubmitMessageRequest` shape the pipeline accepts.
//!
//! Each adapter owns its own validation and relevance filtering; anything
//! that passes is just a message with a source tag and metadata.

pub mod email;
pub mod social;
pub mod wechat;

use once_cell::sync::OnceCell;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("recipient not on the intake allow-list: {0}")]
    RecipientNotAllowed(String),
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("content not relevant to art submissions")]
    NotRelevant,
}

/// Extract absolute http(s) URLs from free text. URLs never contain
/// full-width CJK punctuation, so it terminates a match the same way
/// whitespace does.
pub(crate) fn extract_links(text: &str) -> Vec<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"'（）【】《》「」，。、；：！？]+"#).unwrap()
    });
    let mut links: Vec<String> = re
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', '!', '?']).to_string())
        .collect();
    links.dedup();
    links
}

/// Terms that mark a message as plausibly about an art opportunity.
pub(crate) const RELEVANCE_KEYWORDS: &[&str] = &[
    "征集", "投稿", "展览", "驻地", "比赛", "大赛", "申请", "截止", "基金", "资助",
    "艺术家", "作品", "评选", "入围", "open call", "exhibition", "residency",
    "competition", "submission", "deadline", "grant", "artist", "juried",
];

pub(crate) fn is_relevant(text: &str) -> bool {
    let lower = text.to_lowercase();
    RELEVANCE_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_links_finds_and_trims_urls() {
        let text = "详情见 https://example.com/call，或 http://example.org/page.";
        let links = extract_links(text);
        assert_eq!(
            links,
            vec![
                "https://example.com/call".to_string(),
                "http://example.org/page".to_string(),
            ]
        );
    }

    #[test]
    fn extract_links_stops_at_cjk_punctuation() {
        for (text, expected) in [
            ("详情见 https://example.com/call，申请截止6月30日", "https://example.com/call"),
            ("报名：https://a.example/x。欢迎投稿", "https://a.example/x"),
            ("（链接 https://b.example/y）", "https://b.example/y"),
            ("速来！https://c.example/z！", "https://c.example/z"),
        ] {
            assert_eq!(extract_links(text), vec![expected.to_string()], "{text}");
        }
    }

    #[test]
    fn relevance_filter_on_keywords() {
        assert!(is_relevant("2024年国际版画作品征集，截止6月30日"));
        assert!(is_relevant("Open call for emerging artists"));
        assert!(!is_relevant("lunch at noon tomorrow?"));
    }
}
