//! Automated quality checks against freshly created resources.
//!
//! Three audits run after persistence: completeness of the core fields,
//! accuracy of machine-checkable formats, and presentation format. Results
//! are append-only findings, they never block the pipeline.

use chrono::Utc;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::json;
use uuid::Uuid;

use crate::types::{BaseResource, CheckResult, CheckType, QualityCheck};

const PASS_CUTOFF: f32 = 0.8;
const WARNING_CUTOFF: f32 = 0.5;

fn grade(score: f32) -> CheckResult {
    if score >= PASS_CUTOFF {
        CheckResult::Pass
    } else if score >= WARNING_CUTOFF {
        CheckResult::Warning
    } else {
        CheckResult::Fail
    }
}

fn email_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

/// Run all three checks and return the findings, newest resource state wins.
pub fn run_checks(resource: &BaseResource) -> Vec<QualityCheck> {
    vec![
        completeness_check(resource),
        accuracy_check(resource),
        format_check(resource),
    ]
}

/// Core identifying fields present: title, category (always set), organizer.
fn completeness_check(resource: &BaseResource) -> QualityCheck {
    let mut present = 0u32;
    let mut missing = Vec::new();

    if resource.title.trim().is_empty() {
        missing.push("title");
    } else {
        present += 1;
    }
    // category is an enum with an Other fallback, count it as present
    present += 1;
    if resource.organizer.as_deref().map(str::trim).unwrap_or("").is_empty() {
        missing.push("organizer");
    } else {
        present += 1;
    }

    let score = present as f32 / 3.0;
    finding(
        resource,
        CheckType::Completeness,
        score,
        json!({ "missing": missing }),
        if missing.is_empty() {
            None
        } else {
            Some(format!("fill in: {}", missing.join(", ")))
        },
    )
}

/// Machine-checkable field formats: email shape, website scheme, deadline
/// not absurdly far in the past.
fn accuracy_check(resource: &BaseResource) -> QualityCheck {
    let mut score = 1.0f32;
    let mut issues = Vec::new();

    if let Some(email) = resource.email.as_deref() {
        if !email_re().is_match(email) {
            score -= 0.3;
            issues.push("email format invalid");
        }
    }
    if let Some(site) = resource.website.as_deref() {
        if !(site.starts_with("http://") || site.starts_with("https://")) {
            score -= 0.2;
            issues.push("website is not an absolute http(s) URL");
        }
    }
    if let Some(deadline) = resource.deadline {
        let today = Utc::now().date_naive();
        if (today - deadline).num_days() > 365 {
            score -= 0.2;
            issues.push("deadline more than a year in the past");
        }
    }

    finding(
        resource,
        CheckType::Accuracy,
        score.max(0.0),
        json!({ "issues": issues }),
        if issues.is_empty() {
            None
        } else {
            Some(issues.join("; "))
        },
    )
}

/// Presentation: title and description long enough to be useful.
fn format_check(resource: &BaseResource) -> QualityCheck {
    let mut score = 1.0f32;
    let mut issues = Vec::new();

    if resource.title.chars().count() < 5 {
        score -= 0.3;
        issues.push("title shorter than 5 characters");
    }
    let desc_len = resource
        .description
        .as_deref()
        .map(|d| d.chars().count())
        .unwrap_or(0);
    if desc_len < 20 {
        score -= 0.2;
        issues.push("description shorter than 20 characters");
    }

    finding(
        resource,
        CheckType::Format,
        score.max(0.0),
        json!({ "issues": issues }),
        if issues.is_empty() {
            None
        } else {
            Some(issues.join("; "))
        },
    )
}

fn finding(
    resource: &BaseResource,
    check_type: CheckType,
    score: f32,
    details: serde_json::Value,
    suggestions: Option<String>,
) -> QualityCheck {
    QualityCheck {
        id: Uuid::new_v4(),
        resource_id: resource.id,
        check_type,
        result: grade(score),
        score,
        details,
        suggestions,
        automated: true,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfidenceLevel, MessageSource, ResourceStatus, SubmissionCategory};

    fn base(title: &str) -> BaseResource {
        let now = Utc::now();
        BaseResource {
            id: Uuid::new_v4(),
            title: title.into(),
            category: SubmissionCategory::Exhibition,
            deadline: None,
            event_date: None,
            end_date: None,
            location: None,
            city: None,
            country: None,
            latitude: None,
            longitude: None,
            organizer: None,
            description: None,
            requirements: None,
            fee: None,
            prize: None,
            contact: None,
            email: None,
            phone: None,
            website: None,
            original_url: None,
            tags: vec![],
            source: MessageSource::Web,
            confidence: 0.9,
            confidence_level: ConfidenceLevel::VeryHigh,
            status: ResourceStatus::Verified,
            language: "en".into(),
            content_hash: "x".into(),
            similarity_hash: None,
            version: 1,
            parent_id: None,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn complete_resource_passes_all_checks() {
        let mut r = base("International Sculpture Open Call");
        r.organizer = Some("City Arts Council".into());
        r.description = Some("Annual juried sculpture exhibition, all media welcome.".into());
        r.email = Some("apply@arts.example.org".into());
        r.website = Some("https://arts.example.org/call".into());

        for check in run_checks(&r) {
            assert_eq!(check.result, CheckResult::Pass, "{:?}", check.check_type);
        }
    }

    #[test]
    fn missing_organizer_degrades_completeness() {
        let r = base("Open Call");
        let checks = run_checks(&r);
        let completeness = checks
            .iter()
            .find(|c| c.check_type == CheckType::Completeness)
            .unwrap();
        assert!((completeness.score - 2.0 / 3.0).abs() < 1e-4);
        assert_eq!(completeness.result, CheckResult::Warning);
        assert!(completeness.suggestions.as_deref().unwrap().contains("organizer"));
    }

    #[test]
    fn bad_email_and_relative_website_fail_accuracy() {
        let mut r = base("Open Call");
        r.email = Some("not-an-email".into());
        r.website = Some("www.example.com".into());

        let checks = run_checks(&r);
        let accuracy = checks
            .iter()
            .find(|c| c.check_type == CheckType::Accuracy)
            .unwrap();
        assert!((accuracy.score - 0.5).abs() < 1e-4);
        assert_eq!(accuracy.result, CheckResult::Warning);
    }

    #[test]
    fn short_title_and_missing_description_degrade_format() {
        let r = base("Call");
        let checks = run_checks(&r);
        let format = checks
            .iter()
            .find(|c| c.check_type == CheckType::Format)
            .unwrap();
        assert!((format.score - 0.5).abs() < 1e-4);
        assert_eq!(format.result, CheckResult::Warning);
    }
}
