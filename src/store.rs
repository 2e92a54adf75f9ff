//! In-memory storage façade over messages, resources and quality checks.
//!
//! The relational store lives outside this service; everything here is
//! process-local state behind one mutex, same discipline as the decision
//! history buffer. Lock sections are short and never await.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{
    BaseResource, InfoReceiverStats, MessageStatus, QualityCheck, RawMessage, ResourceStatus,
    SubmissionCategory,
};

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, RawMessage>,
    resources: HashMap<Uuid, BaseResource>,
    quality_checks: Vec<QualityCheck>,
    /// Wall-clock per-message pipeline durations, for the stats aggregate.
    processing_times_ms: Vec<u64>,
}

#[derive(Default)]
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- raw messages ----

    pub fn create_message(&self, message: RawMessage) -> Uuid {
        let id = message.id;
        let mut g = self.inner.lock().expect("store mutex poisoned");
        g.messages.insert(id, message);
        id
    }

    pub fn get_message(&self, id: Uuid) -> Option<RawMessage> {
        let g = self.inner.lock().expect("store mutex poisoned");
        g.messages.get(&id).cloned()
    }

    /// Apply `f` to the stored message in place; returns false if missing.
    pub fn update_message(&self, id: Uuid, f: impl FnOnce(&mut RawMessage)) -> bool {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        match g.messages.get_mut(&id) {
            Some(m) => {
                f(m);
                m.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// PENDING messages due at `now` (scheduled_at unset or elapsed),
    /// ordered by priority descending, then FIFO.
    pub fn pending_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<RawMessage> {
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut due: Vec<&RawMessage> = g
            .messages
            .values()
            .filter(|m| m.status == MessageStatus::Pending)
            .filter(|m| m.scheduled_at.map(|t| t <= now).unwrap_or(true))
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.into_iter().take(limit).cloned().collect()
    }

    pub fn messages_with_status(&self, status: MessageStatus) -> Vec<RawMessage> {
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<RawMessage> = g
            .messages
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        out
    }

    pub fn record_processing_time(&self, elapsed_ms: u64) {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        g.processing_times_ms.push(elapsed_ms);
        // keep a bounded sample
        if g.processing_times_ms.len() > 10_000 {
            let excess = g.processing_times_ms.len() - 10_000;
            g.processing_times_ms.drain(0..excess);
        }
    }

    // ---- resources ----

    pub fn create_resource(&self, resource: BaseResource) -> Uuid {
        let id = resource.id;
        let mut g = self.inner.lock().expect("store mutex poisoned");
        g.resources.insert(id, resource);
        id
    }

    pub fn get_resource(&self, id: Uuid) -> Option<BaseResource> {
        let g = self.inner.lock().expect("store mutex poisoned");
        g.resources.get(&id).cloned()
    }

    pub fn find_resource_by_url(&self, url: &str) -> Option<BaseResource> {
        let g = self.inner.lock().expect("store mutex poisoned");
        g.resources
            .values()
            .find(|r| r.original_url.as_deref() == Some(url))
            .cloned()
    }

    pub fn find_resource_by_hash(&self, content_hash: &str) -> Option<BaseResource> {
        let g = self.inner.lock().expect("store mutex poisoned");
        g.resources
            .values()
            .find(|r| r.content_hash == content_hash)
            .cloned()
    }

    /// Most-recent resources in a category, newest first.
    pub fn resources_by_category(
        &self,
        category: SubmissionCategory,
        limit: usize,
    ) -> Vec<BaseResource> {
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<BaseResource> = g
            .resources
            .values()
            .filter(|r| r.category == category)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        out
    }

    pub fn list_resources(
        &self,
        status: Option<ResourceStatus>,
        category: Option<SubmissionCategory>,
        limit: usize,
    ) -> Vec<BaseResource> {
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<BaseResource> = g
            .resources
            .values()
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .filter(|r| category.map(|c| r.category == c).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        out
    }

    /// Case-insensitive substring search over title/description/organizer/location.
    pub fn search_resources(
        &self,
        query: &str,
        category: Option<SubmissionCategory>,
    ) -> Vec<BaseResource> {
        let needle = query.to_lowercase();
        let matches = |field: &Option<String>| {
            field
                .as_deref()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        };
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut out: Vec<BaseResource> = g
            .resources
            .values()
            .filter(|r| category.map(|c| r.category == c).unwrap_or(true))
            .filter(|r| {
                r.title.to_lowercase().contains(&needle)
                    || matches(&r.description)
                    || matches(&r.organizer)
                    || matches(&r.location)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(100);
        out
    }

    pub fn update_resource_status(
        &self,
        id: Uuid,
        status: ResourceStatus,
    ) -> Option<BaseResource> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        let r = g.resources.get_mut(&id)?;
        r.status = status;
        r.version += 1;
        r.updated_at = Utc::now();
        Some(r.clone())
    }

    // ---- quality checks ----

    pub fn add_quality_check(&self, check: QualityCheck) {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        g.quality_checks.push(check);
    }

    pub fn quality_checks_for(&self, resource_id: Uuid) -> Vec<QualityCheck> {
        let g = self.inner.lock().expect("store mutex poisoned");
        g.quality_checks
            .iter()
            .filter(|c| c.resource_id == resource_id)
            .cloned()
            .collect()
    }

    // ---- aggregates ----

    pub fn stats(&self) -> InfoReceiverStats {
        let g = self.inner.lock().expect("store mutex poisoned");
        let count_msg = |s: MessageStatus| g.messages.values().filter(|m| m.status == s).count();
        let count_res = |s: ResourceStatus| g.resources.values().filter(|r| r.status == s).count();

        let total_messages = g.messages.len();
        let completed_messages = count_msg(MessageStatus::Completed);
        let total_resources = g.resources.len();
        let verified_resources = count_res(ResourceStatus::Verified);

        let average_confidence = if total_resources > 0 {
            g.resources.values().map(|r| r.confidence).sum::<f32>() / total_resources as f32
        } else {
            0.0
        };
        let average_processing_time_ms = if g.processing_times_ms.is_empty() {
            0.0
        } else {
            g.processing_times_ms.iter().sum::<u64>() as f64 / g.processing_times_ms.len() as f64
        };

        InfoReceiverStats {
            total_messages,
            pending_messages: count_msg(MessageStatus::Pending),
            processing_messages: count_msg(MessageStatus::Processing),
            completed_messages,
            failed_messages: count_msg(MessageStatus::Failed),
            manual_review_messages: count_msg(MessageStatus::ManualReview),
            total_resources,
            verified_resources,
            duplicate_resources: count_res(ResourceStatus::Duplicate),
            average_confidence,
            processing_rate: if total_messages > 0 {
                completed_messages as f32 / total_messages as f32 * 100.0
            } else {
                0.0
            },
            success_rate: if completed_messages > 0 {
                verified_resources as f32 / completed_messages as f32 * 100.0
            } else {
                0.0
            },
            average_processing_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(priority: i32, created_offset_secs: i64) -> RawMessage {
        let now = Utc::now();
        RawMessage {
            id: Uuid::new_v4(),
            source: crate::types::MessageSource::Web,
            content: "test content with enough length".into(),
            links: vec![],
            images: vec![],
            attachments: vec![],
            metadata: Default::default(),
            status: MessageStatus::Pending,
            processed: false,
            resource_id: None,
            duplicate_of: None,
            error_message: None,
            retry_count: 0,
            priority,
            scheduled_at: None,
            processed_at: None,
            created_at: now + Duration::seconds(created_offset_secs),
            updated_at: now,
        }
    }

    #[test]
    fn pending_due_orders_by_priority_then_fifo() {
        let store = Store::new();
        let low = store.create_message(msg(1, 0));
        let high = store.create_message(msg(10, 1));
        let mid_old = store.create_message(msg(5, 2));
        let mid_new = store.create_message(msg(5, 3));

        let due = store.pending_due(Utc::now() + Duration::seconds(10), 10);
        let ids: Vec<Uuid> = due.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![high, mid_old, mid_new, low]);
    }

    #[test]
    fn scheduled_messages_are_held_back_until_due() {
        let store = Store::new();
        let mut future = msg(5, 0);
        future.scheduled_at = Some(Utc::now() + Duration::seconds(3600));
        store.create_message(future);
        store.create_message(msg(1, 0));

        let due = store.pending_due(Utc::now(), 10);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].priority, 1);
    }

    #[test]
    fn stats_counts_and_rates() {
        let store = Store::new();
        let a = store.create_message(msg(1, 0));
        store.create_message(msg(1, 1));
        store.update_message(a, |m| m.status = MessageStatus::Completed);

        let stats = store.stats();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.completed_messages, 1);
        assert_eq!(stats.pending_messages, 1);
        assert!((stats.processing_rate - 50.0).abs() < 1e-3);
    }
}
