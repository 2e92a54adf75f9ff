//! Pipeline orchestration: intake, queue accounting, processing, routing.
//!
//! `submit_message` only validates and persists; the actual work happens in
//! the background worker, which drains due PENDING messages by priority and
//! drives each through crawl, parse, dedup, persist and quality checks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::InfoReceiverConfig;
use crate::crawler::ContentCrawler;
use crate::dedup::{content_hash, Deduplicator};
use crate::llm::{LlmError, LlmParser};
use crate::quality;
use crate::store::Store;
use crate::types::{
    BaseResource, ConfidenceLevel, MessageSource, MessageStatus, ParseResult, RawMessage,
    ResourceStatus, SubmitMessageRequest, SubmitMessageResponse,
};

const MIN_CONTENT_CHARS: usize = 10;
const MAX_CONTENT_CHARS: usize = 50_000;
/// Keywords that bump a message's priority; deadlines wait for no queue.
const URGENT_KEYWORDS: &[&str] = &["截止", "deadline", "申请"];
/// At most this many links are crawled per message.
const MAX_CRAWLED_LINKS: usize = 3;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("content must be at least {MIN_CONTENT_CHARS} characters")]
    ContentTooShort,
    #[error("content must be at most {MAX_CONTENT_CHARS} characters")]
    ContentTooLong,
    #[error("link is not an absolute http(s) URL: {0}")]
    InvalidLink(String),
}

pub struct InfoReceiverService {
    config: InfoReceiverConfig,
    store: Arc<Store>,
    crawler: ContentCrawler,
    parser: LlmParser,
    dedup: Deduplicator,
    /// Wakes the worker as soon as something is submitted.
    wake: Notify,
    /// Messages currently being processed; guards against double pickup.
    in_flight: Mutex<HashSet<Uuid>>,
}

impl InfoReceiverService {
    pub fn new(config: InfoReceiverConfig, store: Arc<Store>) -> Self {
        let crawler = ContentCrawler::new(config.crawler.clone());
        let parser = LlmParser::new(&config.llm);
        let dedup = Deduplicator::new(config.deduplication.clone());
        Self {
            config,
            store,
            crawler,
            parser,
            dedup,
            wake: Notify::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Test seam: same wiring, caller-supplied parser.
    pub fn with_parser(config: InfoReceiverConfig, store: Arc<Store>, parser: LlmParser) -> Self {
        let crawler = ContentCrawler::new(config.crawler.clone());
        let dedup = Deduplicator::new(config.deduplication.clone());
        Self {
            config,
            store,
            crawler,
            parser,
            dedup,
            wake: Notify::new(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &InfoReceiverConfig {
        &self.config
    }

    // ---- intake ----

    /// Validate and persist an inbound message. Never processes inline;
    /// the worker is woken instead.
    pub fn submit_message(
        &self,
        req: SubmitMessageRequest,
    ) -> Result<SubmitMessageResponse, SubmitError> {
        let content = req.content.trim();
        let chars = content.chars().count();
        if chars < MIN_CONTENT_CHARS {
            return Err(SubmitError::ContentTooShort);
        }
        if chars > MAX_CONTENT_CHARS {
            return Err(SubmitError::ContentTooLong);
        }
        for link in &req.links {
            if !(link.starts_with("http://") || link.starts_with("https://")) {
                return Err(SubmitError::InvalidLink(link.clone()));
            }
        }

        let now = Utc::now();
        let priority = message_priority(req.source, content);
        let message = RawMessage {
            id: Uuid::new_v4(),
            source: req.source,
            content: content.to_string(),
            links: req.links,
            images: req.images,
            attachments: req.attachments,
            metadata: req.metadata,
            status: MessageStatus::Pending,
            processed: false,
            resource_id: None,
            duplicate_of: None,
            error_message: None,
            retry_count: 0,
            priority,
            scheduled_at: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        let id = self.store.create_message(message);
        counter!("info_receiver_submitted_total", "source" => source_label(req.source))
            .increment(1);
        info!(message_id = %id, source = ?req.source, priority, "message accepted");
        self.wake.notify_one();

        Ok(SubmitMessageResponse {
            success: true,
            message_id: id,
            message: "message queued for processing".into(),
        })
    }

    // ---- processing ----

    /// Drain one batch of due PENDING messages, highest priority first,
    /// processing up to `max_concurrency` at a time. Returns how many
    /// messages were picked up.
    ///
    /// Associated function because the spawned tasks need an owned handle.
    pub async fn process_pending_messages(service: &Arc<Self>) -> usize {
        let batch = service
            .store
            .pending_due(Utc::now(), service.config.processing.batch_size);
        if batch.is_empty() {
            return 0;
        }
        debug!(count = batch.len(), "processing pending batch");

        let mut picked = 0usize;
        for chunk in batch.chunks(service.config.processing.max_concurrency.max(1)) {
            let mut set = JoinSet::new();
            for msg in chunk {
                let service = Arc::clone(service);
                let id = msg.id;
                picked += 1;
                set.spawn(async move { service.process_message(id).await });
            }
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    error!("processing task panicked: {e}");
                }
            }
        }
        picked
    }

    /// Drive one message through the pipeline. Safe to call twice; a
    /// message already in flight or not PENDING is skipped.
    pub async fn process_message(&self, id: Uuid) {
        {
            let mut in_flight = self.in_flight.lock().expect("in_flight mutex poisoned");
            if !in_flight.insert(id) {
                return;
            }
        }
        let started = Instant::now();
        self.process_message_inner(id, started).await;
        self.in_flight
            .lock()
            .expect("in_flight mutex poisoned")
            .remove(&id);
    }

    async fn process_message_inner(&self, id: Uuid, started: Instant) {
        let Some(message) = self.store.get_message(id) else {
            warn!(message_id = %id, "process requested for unknown message");
            return;
        };
        if message.status != MessageStatus::Pending {
            debug!(message_id = %id, status = ?message.status, "skipping non-pending message");
            return;
        }
        self.store
            .update_message(id, |m| m.status = MessageStatus::Processing);

        let content = preprocess(&message.content);
        let crawl_texts = self.crawl_links(&message.links).await;
        let enriched = if crawl_texts.is_empty() {
            content
        } else {
            format!("{content}\n\n{}", crawl_texts.join("\n\n"))
        };

        match self.parser.parse_content(&enriched, &message.links).await {
            Ok(parsed) => self.route_parsed(&message, parsed).await,
            Err(e) => self.handle_parse_error(&message, e),
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.store.record_processing_time(elapsed_ms);
        histogram!("info_receiver_processing_ms").record(elapsed_ms as f64);
    }

    async fn crawl_links(&self, links: &[String]) -> Vec<String> {
        let mut texts = Vec::new();
        for link in links.iter().take(MAX_CRAWLED_LINKS) {
            let result = self.crawler.crawl(link).await;
            if result.success {
                let mut parts = Vec::new();
                if let Some(title) = result.title {
                    parts.push(format!("Page title: {title}"));
                }
                if let Some(desc) = result.description {
                    parts.push(format!("Page description: {desc}"));
                }
                if let Some(body) = result.content {
                    parts.push(body);
                }
                texts.push(format!("[crawled from {link}]\n{}", parts.join("\n")));
            } else {
                warn!(link, error = ?result.error, "crawl failed");
            }
        }
        texts
    }

    /// Confidence routing: below the review floor the message parks in
    /// MANUAL_REVIEW with no resource; otherwise dedup decides between a
    /// duplicate completion and a new resource.
    async fn route_parsed(&self, message: &RawMessage, mut parsed: ParseResult) {
        if parsed.original_url.is_none() {
            parsed.original_url = message.links.first().cloned();
        }

        let review_floor = self.config.processing.manual_review_threshold;
        if parsed.confidence < review_floor || parsed.title.is_none() {
            let reason = if parsed.title.is_none() {
                "no title extracted".to_string()
            } else {
                format!(
                    "confidence {:.2} below review floor {review_floor:.2}",
                    parsed.confidence
                )
            };
            self.store.update_message(message.id, |m| {
                m.status = MessageStatus::ManualReview;
                m.error_message = Some(reason.clone());
            });
            counter!("info_receiver_manual_review_total").increment(1);
            info!(
                message_id = %message.id,
                confidence = parsed.confidence,
                reason = %reason,
                "routed to manual review"
            );
            return;
        }

        let dedup_result = self.dedup.check(&parsed, &self.store);
        if dedup_result.is_duplicate {
            let duplicate_id = dedup_result.duplicate_id;
            self.store.update_message(message.id, |m| {
                m.status = MessageStatus::Completed;
                m.processed = true;
                m.duplicate_of = duplicate_id;
                m.processed_at = Some(Utc::now());
            });
            counter!("info_receiver_duplicates_total").increment(1);
            info!(
                message_id = %message.id,
                duplicate_of = ?duplicate_id,
                score = dedup_result.similarity_score,
                reason = %dedup_result.reason,
                "duplicate, no resource created"
            );
            return;
        }

        let resource = self.build_resource(message, &parsed);
        let resource_id = resource.id;
        let resource_status = resource.status;
        self.store.create_resource(resource.clone());
        for check in quality::run_checks(&resource) {
            self.store.add_quality_check(check);
        }
        self.store.update_message(message.id, |m| {
            m.status = MessageStatus::Completed;
            m.processed = true;
            m.resource_id = Some(resource_id);
            m.processed_at = Some(Utc::now());
        });
        counter!("info_receiver_resources_created_total").increment(1);
        info!(
            message_id = %message.id,
            resource_id = %resource_id,
            status = ?resource_status,
            confidence = parsed.confidence,
            "resource created"
        );
    }

    fn build_resource(&self, message: &RawMessage, parsed: &ParseResult) -> BaseResource {
        let now = Utc::now();
        let confidence = parsed.confidence.clamp(0.0, 1.0);
        let status = if confidence >= self.config.processing.confidence_threshold {
            ResourceStatus::Verified
        } else {
            ResourceStatus::Pending
        };
        let title = parsed.title.clone().unwrap_or_default();
        let similarity_hash = {
            use sha2::{Digest, Sha256};
            let digest = Sha256::digest(title.trim().to_lowercase().as_bytes());
            Some(format!("{digest:x}"))
        };
        BaseResource {
            id: Uuid::new_v4(),
            title,
            category: parsed
                .category
                .unwrap_or(crate::types::SubmissionCategory::Other),
            deadline: parsed.deadline,
            event_date: parsed.event_date,
            end_date: parsed.end_date,
            location: parsed.location.clone(),
            city: parsed.city.clone(),
            country: parsed.country.clone(),
            latitude: None,
            longitude: None,
            organizer: parsed.organizer.clone(),
            description: parsed.description.clone(),
            requirements: parsed.requirements.clone(),
            fee: parsed.fee.clone(),
            prize: parsed.prize.clone(),
            contact: parsed.contact.clone(),
            email: parsed.email.clone(),
            phone: parsed.phone.clone(),
            website: parsed.website.clone(),
            original_url: parsed.original_url.clone(),
            tags: parsed.tags.clone(),
            source: message.source,
            confidence,
            confidence_level: ConfidenceLevel::from_confidence(confidence),
            status,
            language: parsed.language.clone().unwrap_or_else(|| "zh".into()),
            content_hash: content_hash(parsed),
            similarity_hash,
            version: 1,
            parent_id: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Retry accounting. Every failure counts one attempt; while the
    /// failure count stays below max_retries the message goes back to
    /// PENDING with a linearly growing delay, and the attempt that reaches
    /// max_retries is terminal FAILED. The policy is uniform across error
    /// kinds; `retryable` only annotates the logs.
    fn handle_parse_error(&self, message: &RawMessage, err: LlmError) {
        let max_retries = self.config.queue.max_retries;
        let retry_delay_ms = self.config.queue.retry_delay_ms;
        let next_count = message.retry_count + 1;
        if next_count < max_retries {
            let delay = chrono::Duration::milliseconds((retry_delay_ms * next_count as u64) as i64);
            self.store.update_message(message.id, |m| {
                m.status = MessageStatus::Pending;
                m.retry_count = next_count;
                m.scheduled_at = Some(Utc::now() + delay);
                m.error_message = Some(err.to_string());
            });
            counter!("info_receiver_retries_total").increment(1);
            warn!(
                message_id = %message.id,
                retry = next_count,
                max = max_retries,
                retryable = err.retryable(),
                "parse failed, retry scheduled: {err}"
            );
        } else {
            self.store.update_message(message.id, |m| {
                m.status = MessageStatus::Failed;
                m.retry_count = next_count;
                m.error_message = Some(err.to_string());
            });
            counter!("info_receiver_failed_total").increment(1);
            error!(message_id = %message.id, attempts = next_count, "parse failed terminally: {err}");
        }
    }

    // ---- worker ----

    /// Background worker: ticks on an interval and wakes early on submit.
    pub fn spawn_worker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tick = Duration::from_secs(self.config.queue.worker_interval_secs.max(1));
        tokio::spawn(async move {
            info!(interval_secs = tick.as_secs(), "intake worker started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {}
                    _ = self.wake.notified() => {}
                }
                let n = Self::process_pending_messages(&self).await;
                if n > 0 {
                    debug!(processed = n, "worker pass complete");
                }
            }
        })
    }
}

/// Source base priority plus an urgency bump for deadline language.
fn message_priority(source: MessageSource, content: &str) -> i32 {
    let base = match source {
        MessageSource::Email => 10,
        MessageSource::Api => 8,
        MessageSource::Web => 5,
        MessageSource::Wechat | MessageSource::Social => 3,
        _ => 1,
    };
    let lower = content.to_lowercase();
    let urgent = URGENT_KEYWORDS.iter().any(|k| lower.contains(k));
    base + if urgent { 5 } else { 0 }
}

fn source_label(source: MessageSource) -> &'static str {
    match source {
        MessageSource::Email => "email",
        MessageSource::Wechat => "wechat",
        MessageSource::Web => "web",
        MessageSource::Social => "social",
        MessageSource::Api => "api",
        MessageSource::Rss => "rss",
        MessageSource::Webhook => "webhook",
    }
}

/// Normalize whitespace before the content reaches the parser: CRLF to LF,
/// runs of blank lines collapsed, trailing space stripped.
fn preprocess(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = Vec::new();
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                out.push(line);
            }
        } else {
            blank_run = 0;
            out.push(line);
        }
    }
    out.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatProvider, LlmParser};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChatProvider for FailingProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Status {
                status: 503,
                body: "upstream unavailable".into(),
            })
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct NoTitleProvider;

    #[async_trait]
    impl ChatProvider for NoTitleProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Ok(serde_json::json!({
                "title": null,
                "category": "EXHIBITION",
                "organizer": "City Art Museum",
                "confidence": 0.9,
            })
            .to_string())
        }
        fn name(&self) -> &'static str {
            "no-title"
        }
    }

    struct BadJsonProvider;

    #[async_trait]
    impl ChatProvider for BadJsonProvider {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Ok("here is my answer: the deadline is June".into())
        }
        fn name(&self) -> &'static str {
            "bad-json"
        }
    }

    fn fast_config() -> InfoReceiverConfig {
        let mut cfg = InfoReceiverConfig::default();
        cfg.queue.retry_delay_ms = 1;
        cfg
    }

    fn request(source: MessageSource, content: &str) -> SubmitMessageRequest {
        SubmitMessageRequest {
            source,
            content: content.into(),
            links: vec![],
            images: vec![],
            attachments: vec![],
            metadata: Default::default(),
        }
    }

    fn service_with(provider: Arc<dyn ChatProvider>) -> Arc<InfoReceiverService> {
        Arc::new(InfoReceiverService::with_parser(
            fast_config(),
            Arc::new(Store::new()),
            LlmParser::with_provider(provider, "test"),
        ))
    }

    #[test]
    fn submit_validates_content_length() {
        let service = service_with(Arc::new(BadJsonProvider));
        let err = service
            .submit_message(request(MessageSource::Web, "short"))
            .unwrap_err();
        assert!(matches!(err, SubmitError::ContentTooShort));
        // rejected submissions leave no row behind
        assert_eq!(service.store().stats().total_messages, 0);

        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        let err = service
            .submit_message(request(MessageSource::Web, &long))
            .unwrap_err();
        assert!(matches!(err, SubmitError::ContentTooLong));
        assert_eq!(service.store().stats().total_messages, 0);
    }

    #[test]
    fn submit_rejects_non_http_links() {
        let service = service_with(Arc::new(BadJsonProvider));
        let mut req = request(MessageSource::Web, "long enough message content");
        req.links = vec!["ftp://example.com/file".into()];
        let err = service.submit_message(req).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidLink(_)));
    }

    #[test]
    fn submit_persists_pending_and_does_not_process_inline() {
        let service = service_with(Arc::new(BadJsonProvider));
        let resp = service
            .submit_message(request(MessageSource::Email, "a perfectly valid message body"))
            .unwrap();
        assert!(resp.success);

        let stored = service.store().get_message(resp.message_id).unwrap();
        assert_eq!(stored.status, MessageStatus::Pending);
        assert!(!stored.processed);
    }

    #[test]
    fn priority_by_source_and_urgency() {
        assert_eq!(message_priority(MessageSource::Email, "hello"), 10);
        assert_eq!(message_priority(MessageSource::Api, "hello"), 8);
        assert_eq!(message_priority(MessageSource::Web, "hello"), 5);
        assert_eq!(message_priority(MessageSource::Wechat, "hello"), 3);
        assert_eq!(message_priority(MessageSource::Rss, "hello"), 1);
        assert_eq!(message_priority(MessageSource::Web, "DEADLINE June 30"), 10);
        assert_eq!(message_priority(MessageSource::Wechat, "征集，截止6月30日"), 8);
    }

    #[test]
    fn preprocess_normalizes_newlines_and_blank_runs() {
        let raw = "Title\r\n\r\n\r\n\r\nBody line   \r\nmore";
        assert_eq!(preprocess(raw), "Title\n\nBody line\nmore");
    }

    #[tokio::test]
    async fn failing_message_requeues_then_fails_at_max_retries() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicU32::new(0),
        });
        let service = service_with(provider.clone());
        let resp = service
            .submit_message(request(MessageSource::Web, "a message destined to fail"))
            .unwrap();
        let id = resp.message_id;
        let max_retries = service.config().queue.max_retries;

        // attempts below max_retries requeue with growing retry_count
        for expected in 1..max_retries {
            service.process_message(id).await;
            let m = service.store().get_message(id).unwrap();
            assert_eq!(m.status, MessageStatus::Pending, "attempt {expected}");
            assert_eq!(m.retry_count, expected);
            assert!(m.scheduled_at.unwrap() > m.created_at);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // the attempt that reaches max_retries is terminal FAILED
        service.process_message(id).await;
        let m = service.store().get_message(id).unwrap();
        assert_eq!(m.status, MessageStatus::Failed);
        assert_eq!(m.retry_count, max_retries);
        assert!(m.error_message.is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), max_retries);
    }

    #[tokio::test]
    async fn malformed_llm_output_retries_like_any_other_failure() {
        let service = service_with(Arc::new(BadJsonProvider));
        let resp = service
            .submit_message(request(MessageSource::Web, "a message with unparseable reply"))
            .unwrap();
        let id = resp.message_id;
        let max_retries = service.config().queue.max_retries;

        // retry policy is uniform; a non-retryable error still consumes
        // the same budget
        for _ in 1..max_retries {
            service.process_message(id).await;
            let m = service.store().get_message(id).unwrap();
            assert_eq!(m.status, MessageStatus::Pending);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        service.process_message(id).await;

        let m = service.store().get_message(id).unwrap();
        assert_eq!(m.status, MessageStatus::Failed);
        assert_eq!(m.retry_count, max_retries);
    }

    #[tokio::test]
    async fn missing_title_parks_with_title_reason() {
        let service = service_with(Arc::new(NoTitleProvider));
        let resp = service
            .submit_message(request(
                MessageSource::Web,
                "exhibition announcement without a usable headline",
            ))
            .unwrap();
        service.process_message(resp.message_id).await;

        let m = service.store().get_message(resp.message_id).unwrap();
        assert_eq!(m.status, MessageStatus::ManualReview);
        // confidence is fine here; the recorded reason must name the title
        let reason = m.error_message.unwrap();
        assert!(reason.contains("title"), "got reason: {reason}");
        assert!(!reason.contains("confidence"), "got reason: {reason}");
        assert!(m.resource_id.is_none());
    }

    #[tokio::test]
    async fn processing_skips_messages_not_pending() {
        let service = service_with(Arc::new(BadJsonProvider));
        let resp = service
            .submit_message(request(MessageSource::Web, "some content to cancel later"))
            .unwrap();
        service
            .store()
            .update_message(resp.message_id, |m| m.status = MessageStatus::Cancelled);

        service.process_message(resp.message_id).await;
        let m = service.store().get_message(resp.message_id).unwrap();
        assert_eq!(m.status, MessageStatus::Cancelled);
    }
}
