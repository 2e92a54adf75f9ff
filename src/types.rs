//! Shared domain types for the intake pipeline.
//!
//! Enum wire values are SCREAMING_SNAKE_CASE to match what the channel
//! webhooks and the review UI already exchange.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel a raw message arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSource {
    Email,
    Wechat,
    Web,
    Social,
    Api,
    Rss,
    Webhook,
}

/// Lifecycle state of a raw message as the pipeline drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    ManualReview,
    Cancelled,
}

/// Review state of a normalized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Pending,
    Verified,
    Rejected,
    Duplicate,
    Merged,
}

/// What kind of opportunity a resource describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionCategory {
    Exhibition,
    Residency,
    Competition,
    Grant,
    Conference,
    Publication,
    Other,
}

impl SubmissionCategory {
    /// Lenient parse for LLM output; unknown strings map to `None`.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXHIBITION" => Some(Self::Exhibition),
            "RESIDENCY" => Some(Self::Residency),
            "COMPETITION" => Some(Self::Competition),
            // The prompt historically said FUNDING for grants; accept both.
            "GRANT" | "FUNDING" => Some(Self::Grant),
            "CONFERENCE" => Some(Self::Conference),
            "PUBLICATION" => Some(Self::Publication),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.9 {
            Self::VeryHigh
        } else if confidence >= 0.7 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Open key-value bag attached to a message. Values are JSON scalars/arrays/
/// objects validated at the boundary, never free-typed further in.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// An inbound submission event, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: Uuid,
    pub source: MessageSource,
    pub content: String,
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub attachments: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: MessageStatus,
    pub processed: bool,
    pub resource_id: Option<Uuid>,
    /// Set when dedup short-circuited this message against an existing resource.
    pub duplicate_of: Option<Uuid>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A normalized, deduplicated submission-opportunity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResource {
    pub id: Uuid,
    pub title: String,
    pub category: SubmissionCategory,
    pub deadline: Option<NaiveDate>,
    pub event_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub organizer: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub fee: Option<String>,
    pub prize: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub original_url: Option<String>,
    pub tags: Vec<String>,
    pub source: MessageSource,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub status: ResourceStatus,
    pub language: String,
    /// sha256 over title|organizer|deadline|location; uniqueness key.
    pub content_hash: String,
    pub similarity_hash: Option<String>,
    pub version: u32,
    pub parent_id: Option<Uuid>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured extraction of one message's content. Transient; validated
/// before it becomes a `BaseResource`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParseResult {
    pub title: Option<String>,
    pub category: Option<SubmissionCategory>,
    pub deadline: Option<NaiveDate>,
    pub event_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub organizer: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub fee: Option<String>,
    pub prize: Option<String>,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub original_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub language: Option<String>,
    pub confidence: f32,
    pub reasoning: Option<String>,
    pub processing_time_ms: Option<u64>,
    pub llm_used: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckResult {
    Pass,
    Warning,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Completeness,
    Accuracy,
    Format,
}

/// One automated audit finding against a resource. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub check_type: CheckType,
    pub result: CheckResult,
    pub score: f32,
    pub details: serde_json::Value,
    pub suggestions: Option<String>,
    pub automated: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the three-stage duplicate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeduplicationResult {
    pub is_duplicate: bool,
    pub similarity_score: f32,
    pub duplicate_id: Option<Uuid>,
    pub reason: String,
}

impl DeduplicationResult {
    pub fn unique(reason: impl Into<String>) -> Self {
        Self {
            is_duplicate: false,
            similarity_score: 0.0,
            duplicate_id: None,
            reason: reason.into(),
        }
    }
}

/// What a link crawl produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub success: bool,
    pub content: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Submission request body, shared by all channel adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMessageRequest {
    pub source: MessageSource,
    pub content: String,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMessageResponse {
    pub success: bool,
    pub message_id: Uuid,
    pub message: String,
}

/// Aggregate counters over messages and resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfoReceiverStats {
    pub total_messages: usize,
    pub pending_messages: usize,
    pub processing_messages: usize,
    pub completed_messages: usize,
    pub failed_messages: usize,
    pub manual_review_messages: usize,
    pub total_resources: usize,
    pub verified_resources: usize,
    pub duplicate_resources: usize,
    pub average_confidence: f32,
    /// completed / total, in percent.
    pub processing_rate: f32,
    /// verified / completed, in percent.
    pub success_rate: f32,
    pub average_processing_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_with_original_wire_values() {
        assert_eq!(
            serde_json::to_value(MessageStatus::ManualReview).unwrap(),
            serde_json::json!("MANUAL_REVIEW")
        );
        assert_eq!(
            serde_json::to_value(ConfidenceLevel::VeryHigh).unwrap(),
            serde_json::json!("VERY_HIGH")
        );
        assert_eq!(
            serde_json::to_value(SubmissionCategory::Exhibition).unwrap(),
            serde_json::json!("EXHIBITION")
        );
        let src: MessageSource = serde_json::from_str("\"WECHAT\"").unwrap();
        assert_eq!(src, MessageSource::Wechat);
    }

    #[test]
    fn confidence_level_cutoffs() {
        assert_eq!(ConfidenceLevel::from_confidence(1.0), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_confidence(0.9), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_confidence(0.89), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_confidence(0.5), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_confidence(0.1), ConfidenceLevel::Low);
    }

    #[test]
    fn category_parse_accepts_legacy_funding_alias() {
        assert_eq!(
            SubmissionCategory::parse_loose("FUNDING"),
            Some(SubmissionCategory::Grant)
        );
        assert_eq!(SubmissionCategory::parse_loose("exhibition"), Some(SubmissionCategory::Exhibition));
        assert_eq!(SubmissionCategory::parse_loose("salsa"), None);
    }
}
