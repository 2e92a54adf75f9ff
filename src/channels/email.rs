//! Email intake: inbound-mail webhook payloads (SendGrid/Mailgun style).

use serde::Deserialize;
use serde_json::json;

use crate::crawler::scrape_html;
use crate::types::{MessageSource, SubmitMessageRequest};

use super::{extract_links, ChannelError};

#[derive(Debug, Clone, Deserialize)]
pub struct EmailPayload {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Accept mail addressed to an allow-listed intake mailbox and fold it
/// into a submission request. Subject rides along in the content so the
/// parser sees it.
pub fn intake(payload: EmailPayload, allowed: &[String]) -> Result<SubmitMessageRequest, ChannelError> {
    if payload.from.trim().is_empty() {
        return Err(ChannelError::MissingField("from"));
    }
    let to = payload.to.trim().to_lowercase();
    if !allowed.iter().any(|a| a.to_lowercase() == to) {
        return Err(ChannelError::RecipientNotAllowed(payload.to));
    }

    // prefer plain text; fall back to stripped HTML
    let body = if !payload.text.trim().is_empty() {
        payload.text.trim().to_string()
    } else if let Some(html) = payload.html.as_deref() {
        scrape_html(html).text
    } else {
        String::new()
    };
    if body.is_empty() && payload.subject.trim().is_empty() {
        return Err(ChannelError::MissingField("text"));
    }

    let content = if payload.subject.trim().is_empty() {
        body.clone()
    } else {
        format!("Subject: {}\n\n{body}", payload.subject.trim())
    };

    let mut links = extract_links(&content);
    if let Some(html) = payload.html.as_deref() {
        for link in extract_links(html) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }

    let mut metadata = crate::types::Metadata::new();
    metadata.insert("from".into(), json!(payload.from));
    metadata.insert("to".into(), json!(to));
    metadata.insert("subject".into(), json!(payload.subject));

    Ok(SubmitMessageRequest {
        source: MessageSource::Email,
        content,
        links,
        images: Vec::new(),
        attachments: payload.attachments,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["intake@artslave.com".into()]
    }

    fn payload() -> EmailPayload {
        EmailPayload {
            from: "curator@museum.example".into(),
            to: "intake@artslave.com".into(),
            subject: "2024 Sculpture Open Call".into(),
            text: "Deadline June 30. Apply at https://museum.example/call".into(),
            html: None,
            attachments: vec![],
        }
    }

    #[test]
    fn accepts_allow_listed_recipient_and_extracts_links() {
        let req = intake(payload(), &allowed()).unwrap();
        assert_eq!(req.source, MessageSource::Email);
        assert!(req.content.starts_with("Subject: 2024 Sculpture Open Call"));
        assert_eq!(req.links, vec!["https://museum.example/call".to_string()]);
        assert_eq!(req.metadata["from"], "curator@museum.example");
    }

    #[test]
    fn rejects_unknown_recipient() {
        let mut p = payload();
        p.to = "ceo@artslave.com".into();
        let err = intake(p, &allowed()).unwrap_err();
        assert!(matches!(err, ChannelError::RecipientNotAllowed(_)));
    }

    #[test]
    fn recipient_match_is_case_insensitive() {
        let mut p = payload();
        p.to = "Intake@ArtSlave.com".into();
        assert!(intake(p, &allowed()).is_ok());
    }

    #[test]
    fn falls_back_to_html_body() {
        let mut p = payload();
        p.text = String::new();
        p.html = Some("<p>Annual juried <b>exhibition</b>, deadline soon.</p>".into());
        let req = intake(p, &allowed()).unwrap();
        assert!(req.content.contains("Annual juried exhibition"));
    }

    #[test]
    fn empty_mail_is_rejected() {
        let mut p = payload();
        p.subject = String::new();
        p.text = String::new();
        let err = intake(p, &allowed()).unwrap_err();
        assert!(matches!(err, ChannelError::MissingField("text")));
    }
}
