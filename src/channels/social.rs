//! Social-media intake: scraped or forwarded posts from supported platforms.

use serde::Deserialize;
use serde_json::json;

use crate::types::{MessageSource, Metadata, SubmitMessageRequest};

use super::{extract_links, is_relevant, ChannelError};

pub const SUPPORTED_PLATFORMS: &[&str] = &[
    "weibo",
    "douyin",
    "xiaohongshu",
    "instagram",
    "twitter",
    "facebook",
];

#[derive(Debug, Clone, Deserialize)]
pub struct SocialPayload {
    pub platform: String,
    pub content: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub post_url: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

pub fn intake(payload: SocialPayload) -> Result<SubmitMessageRequest, ChannelError> {
    let platform = payload.platform.trim().to_lowercase();
    if !SUPPORTED_PLATFORMS.contains(&platform.as_str()) {
        return Err(ChannelError::UnsupportedPlatform(payload.platform));
    }
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ChannelError::MissingField("content"));
    }
    if let Some(url) = payload.post_url.as_deref() {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ChannelError::InvalidUrl(url.to_string()));
        }
    }

    // hashtags count toward relevance; posts often carry the signal there
    let hashtag_text = payload.hashtags.join(" ");
    if !is_relevant(content) && !is_relevant(&hashtag_text) {
        return Err(ChannelError::NotRelevant);
    }

    let framed = match payload.author.as_deref() {
        Some(author) => format!("[{platform} post by {author}]\n{content}"),
        None => format!("[{platform} post]\n{content}"),
    };

    let mut links = extract_links(&framed);
    if let Some(url) = payload.post_url.clone() {
        if !links.contains(&url) {
            links.push(url);
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert("platform".into(), json!(platform));
    if let Some(author) = &payload.author {
        metadata.insert("author".into(), json!(author));
    }
    if !payload.hashtags.is_empty() {
        metadata.insert("hashtags".into(), json!(payload.hashtags));
    }

    Ok(SubmitMessageRequest {
        source: MessageSource::Social,
        content: framed,
        links,
        images: payload.images,
        attachments: Vec::new(),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SocialPayload {
        SocialPayload {
            platform: "weibo".into(),
            content: "2024国际摄影大赛征集开始，截止8月底".into(),
            author: Some("@artnews".into()),
            post_url: Some("https://weibo.com/status/123".into()),
            hashtags: vec![],
            images: vec![],
        }
    }

    #[test]
    fn supported_platform_post_is_framed() {
        let req = intake(payload()).unwrap();
        assert_eq!(req.source, MessageSource::Social);
        assert!(req.content.starts_with("[weibo post by @artnews]"));
        assert!(req.links.contains(&"https://weibo.com/status/123".to_string()));
        assert_eq!(req.metadata["platform"], "weibo");
    }

    #[test]
    fn unknown_platform_rejected() {
        let mut p = payload();
        p.platform = "myspace".into();
        assert!(matches!(
            intake(p).unwrap_err(),
            ChannelError::UnsupportedPlatform(_)
        ));
    }

    #[test]
    fn hashtags_rescue_relevance() {
        let mut p = payload();
        p.content = "不容错过的机会！链接见评论".into();
        p.hashtags = vec!["艺术家征集".into()];
        assert!(intake(p).is_ok());

        let mut q = payload();
        q.content = "今天天气不错".into();
        q.hashtags = vec!["日常".into()];
        assert!(matches!(intake(q).unwrap_err(), ChannelError::NotRelevant));
    }

    #[test]
    fn bad_post_url_rejected() {
        let mut p = payload();
        p.post_url = Some("weibo.com/status/123".into());
        assert!(matches!(intake(p).unwrap_err(), ChannelError::InvalidUrl(_)));
    }
}
