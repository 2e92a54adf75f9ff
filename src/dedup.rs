//! Three-stage duplicate detection for parsed submissions.
//!
//! Stage 1: exact original-URL match. Stage 2: content-hash match over the
//! normalized identifying fields. Stage 3: weighted similarity against recent
//! resources in the same category. Any internal failure reports "unique";
//! a false negative costs a review pass, a false positive loses data.

use std::collections::HashSet;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::DeduplicationConfig;
use crate::store::Store;
use crate::types::{BaseResource, DeduplicationResult, ParseResult};

/// How many recent same-category resources stage 3 compares against.
const SIMILARITY_WINDOW: usize = 50;

const WEIGHT_TITLE: f32 = 0.4;
const WEIGHT_ORGANIZER: f32 = 0.3;
const WEIGHT_LOCATION: f32 = 0.2;
const WEIGHT_DEADLINE: f32 = 0.1;

pub struct Deduplicator {
    config: DeduplicationConfig,
}

impl Deduplicator {
    pub fn new(config: DeduplicationConfig) -> Self {
        Self { config }
    }

    /// Run all three stages against the store.
    pub fn check(&self, parsed: &ParseResult, store: &Store) -> DeduplicationResult {
        // Stage 1: exact URL.
        if let Some(url) = parsed.original_url.as_deref().filter(|u| !u.is_empty()) {
            if let Some(existing) = store.find_resource_by_url(url) {
                debug!(resource_id = %existing.id, "duplicate by original URL");
                return DeduplicationResult {
                    is_duplicate: true,
                    similarity_score: 1.0,
                    duplicate_id: Some(existing.id),
                    reason: "exact URL match".into(),
                };
            }
        }

        // Stage 2: content hash over identifying fields.
        let hash = content_hash(parsed);
        if let Some(existing) = store.find_resource_by_hash(&hash) {
            debug!(resource_id = %existing.id, "duplicate by content hash");
            return DeduplicationResult {
                is_duplicate: true,
                similarity_score: 1.0,
                duplicate_id: Some(existing.id),
                reason: "content hash match".into(),
            };
        }

        // Stage 3: weighted similarity within the category.
        if !self.config.enable_similarity_check {
            return DeduplicationResult::unique("similarity check disabled");
        }
        let Some(category) = parsed.category else {
            return DeduplicationResult::unique("no category, similarity skipped");
        };
        let candidates = store.resources_by_category(category, SIMILARITY_WINDOW);

        let mut best_score = 0.0f32;
        let mut best_id = None;
        for candidate in &candidates {
            let score = similarity(parsed, candidate);
            if score > best_score {
                best_score = score;
                best_id = Some(candidate.id);
            }
        }

        if best_score >= self.config.threshold {
            warn!(
                score = best_score,
                duplicate_id = ?best_id,
                "near-duplicate above threshold"
            );
            return DeduplicationResult {
                is_duplicate: true,
                similarity_score: best_score,
                duplicate_id: best_id,
                reason: format!("similarity {best_score:.2} above threshold"),
            };
        }

        DeduplicationResult {
            is_duplicate: false,
            similarity_score: best_score,
            duplicate_id: None,
            reason: "no match".into(),
        }
    }
}

/// Uniqueness key: sha256 over the normalized identifying fields. Both the
/// dedup check and resource creation call this, so absent fields hash as
/// empty slots on both sides and lookups stay symmetric.
pub fn content_hash(parsed: &ParseResult) -> String {
    let norm = |s: &Option<String>| {
        s.as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase()
    };
    let deadline = parsed
        .deadline
        .map(|d| d.to_string())
        .unwrap_or_default();
    let key = format!(
        "{}|{}|{}|{}",
        norm(&parsed.title),
        norm(&parsed.organizer),
        deadline,
        norm(&parsed.location),
    );
    let digest = Sha256::digest(key.as_bytes());
    format!("{digest:x}")
}

/// Weighted field similarity, clamped to [0, 1].
fn similarity(parsed: &ParseResult, candidate: &BaseResource) -> f32 {
    let mut score = 0.0f32;

    if let Some(title) = parsed.title.as_deref() {
        score += WEIGHT_TITLE * token_similarity(title, &candidate.title);
    }
    if let (Some(a), Some(b)) = (parsed.organizer.as_deref(), candidate.organizer.as_deref()) {
        score += WEIGHT_ORGANIZER * token_similarity(a, b);
    }
    if let (Some(a), Some(b)) = (parsed.location.as_deref(), candidate.location.as_deref()) {
        score += WEIGHT_LOCATION * token_similarity(a, b);
    }
    if let (Some(a), Some(b)) = (parsed.deadline, candidate.deadline) {
        score += WEIGHT_DEADLINE * date_proximity(a, b);
    }

    score.clamp(0.0, 1.0)
}

/// Jaccard similarity over lowercase token sets.
fn token_similarity(a: &str, b: &str) -> f32 {
    let tokens = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    };
    let set_a = tokens(a);
    let set_b = tokens(b);
    if set_a.is_empty() && set_b.is_empty() {
        return if a.trim() == b.trim() && !a.trim().is_empty() {
            1.0
        } else {
            0.0
        };
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Step function on calendar distance between two deadlines.
fn date_proximity(a: NaiveDate, b: NaiveDate) -> f32 {
    let days = (a - b).num_days().abs();
    if days == 0 {
        1.0
    } else if days <= 7 {
        0.8
    } else if days <= 30 {
        0.5
    } else {
        0.2
    }
}
