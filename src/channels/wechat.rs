//! WeChat intake: forwarded messages from the bridge bot.
//!
//! The bridge authenticates with `x-api-key` (checked at the HTTP layer);
//! here we filter for relevance, expand mini-program cards into something
//! the parser can read, and produce an auto-reply for the bot to send back.

use serde::Deserialize;
use serde_json::json;

use crate::types::{MessageSource, Metadata, SubmitMessageRequest};

use super::{extract_links, is_relevant, ChannelError};

#[derive(Debug, Clone, Deserialize)]
pub struct WechatPayload {
    /// Bridge-side sender handle, not a real OpenID.
    pub sender: String,
    #[serde(default)]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Present for mini-program card messages.
    #[serde(default)]
    pub miniprogram: Option<MiniProgramCard>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiniProgramCard {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub page_url: Option<String>,
}

#[derive(Debug)]
pub struct WechatIntake {
    pub request: SubmitMessageRequest,
    /// Text for the bridge bot to reply with.
    pub reply: String,
}

pub fn intake(payload: WechatPayload) -> Result<WechatIntake, ChannelError> {
    if payload.sender.trim().is_empty() {
        return Err(ChannelError::MissingField("sender"));
    }

    let mut content = payload.content.trim().to_string();
    if let Some(card) = &payload.miniprogram {
        let expanded = format!(
            "[mini-program] {} ({})",
            card.title.trim(),
            card.app_name.trim()
        );
        if content.is_empty() {
            content = expanded;
        } else {
            content = format!("{content}\n{expanded}");
        }
        if let Some(url) = card.page_url.as_deref() {
            content.push_str(&format!("\n{url}"));
        }
    }
    if content.is_empty() {
        return Err(ChannelError::MissingField("content"));
    }
    if !is_relevant(&content) {
        return Err(ChannelError::NotRelevant);
    }

    let links = extract_links(&content);
    let mut metadata = Metadata::new();
    metadata.insert("sender".into(), json!(payload.sender));
    if let Some(t) = &payload.msg_type {
        metadata.insert("msg_type".into(), json!(t));
    }

    Ok(WechatIntake {
        request: SubmitMessageRequest {
            source: MessageSource::Wechat,
            content,
            links,
            images: payload.images,
            attachments: Vec::new(),
            metadata,
        },
        reply: "已收到投稿信息，正在处理中，稍后可在平台查看。".into(),
    })
}
