// tests/pipeline_e2e.rs
//
// End-to-end pipeline runs against the deterministic mock provider:
// submit, process, and inspect what landed in the store. No sockets,
// no live LLM.

use std::sync::Arc;

use artslave_info_receiver::config::InfoReceiverConfig;
use artslave_info_receiver::llm::{LlmParser, MockProvider};
use artslave_info_receiver::service::InfoReceiverService;
use artslave_info_receiver::store::Store;
use artslave_info_receiver::types::{
    MessageSource, MessageStatus, ResourceStatus, SubmissionCategory, SubmitMessageRequest,
};
use chrono::NaiveDate;

const EXHIBITION_SAMPLE: &str = "【征集通知】2024年国际当代艺术展\n\
    北京当代美术馆现面向全球艺术家征集作品，截止2024年6月30日。\n\
    联系邮箱：curator@bjcam.org";

const CHIT_CHAT: &str = "hey, are we still on for dinner on friday? let me know";

fn mock_service() -> Arc<InfoReceiverService> {
    let config = InfoReceiverConfig::default();
    let parser = LlmParser::with_provider(Arc::new(MockProvider), "mock");
    Arc::new(InfoReceiverService::with_parser(
        config,
        Arc::new(Store::new()),
        parser,
    ))
}

fn request(content: &str) -> SubmitMessageRequest {
    SubmitMessageRequest {
        source: MessageSource::Wechat,
        content: content.into(),
        links: vec![],
        images: vec![],
        attachments: vec![],
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn exhibition_announcement_becomes_verified_resource() {
    let service = mock_service();
    let resp = service.submit_message(request(EXHIBITION_SAMPLE)).unwrap();
    service.process_message(resp.message_id).await;

    let message = service.store().get_message(resp.message_id).unwrap();
    assert_eq!(message.status, MessageStatus::Completed);
    assert!(message.processed);

    let resource_id = message.resource_id.expect("message must link its resource");
    let resource = service.store().get_resource(resource_id).unwrap();
    assert_eq!(resource.category, SubmissionCategory::Exhibition);
    assert_eq!(resource.status, ResourceStatus::Verified);
    assert!(resource.confidence >= 0.6, "confidence {}", resource.confidence);
    assert_eq!(
        resource.deadline,
        Some(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap())
    );
    assert_eq!(resource.email.as_deref(), Some("curator@bjcam.org"));
    assert_eq!(resource.source, MessageSource::Wechat);

    // quality checks were recorded alongside
    let checks = service.store().quality_checks_for(resource_id);
    assert_eq!(checks.len(), 3);
}

#[tokio::test]
async fn second_identical_submission_is_marked_duplicate() {
    let service = mock_service();

    let first = service.submit_message(request(EXHIBITION_SAMPLE)).unwrap();
    service.process_message(first.message_id).await;
    let original = service
        .store()
        .get_message(first.message_id)
        .unwrap()
        .resource_id
        .unwrap();

    let second = service.submit_message(request(EXHIBITION_SAMPLE)).unwrap();
    service.process_message(second.message_id).await;

    let message = service.store().get_message(second.message_id).unwrap();
    assert_eq!(message.status, MessageStatus::Completed);
    assert_eq!(message.duplicate_of, Some(original));
    assert!(message.resource_id.is_none(), "duplicates create no resource");
    assert_eq!(service.store().stats().total_resources, 1);

    // running the duplicate again is idempotent
    service.process_message(second.message_id).await;
    assert_eq!(service.store().stats().total_resources, 1);
}

#[tokio::test]
async fn chit_chat_routes_to_manual_review_without_resource() {
    let service = mock_service();
    let resp = service.submit_message(request(CHIT_CHAT)).unwrap();
    service.process_message(resp.message_id).await;

    let message = service.store().get_message(resp.message_id).unwrap();
    assert_eq!(message.status, MessageStatus::ManualReview);
    assert!(message.resource_id.is_none());

    let stats = service.store().stats();
    assert_eq!(stats.total_resources, 0);
    assert_eq!(stats.verified_resources, 0);
    assert_eq!(stats.manual_review_messages, 1);
}

#[tokio::test]
async fn batch_processing_drains_pending_by_priority() {
    let service = mock_service();

    let mut low = request(EXHIBITION_SAMPLE);
    low.source = MessageSource::Rss;
    let low_id = service.submit_message(low).unwrap().message_id;

    let mut high = request("青年艺术家驻地项目开放申请，截止2024年9月1日");
    high.source = MessageSource::Email;
    let high_id = service.submit_message(high).unwrap().message_id;

    let picked = InfoReceiverService::process_pending_messages(&service).await;
    assert_eq!(picked, 2);

    for id in [low_id, high_id] {
        let m = service.store().get_message(id).unwrap();
        assert_eq!(m.status, MessageStatus::Completed, "message {id}");
    }

    // residency announcement lands in its own category
    let residencies = service
        .store()
        .list_resources(None, Some(SubmissionCategory::Residency), 10);
    assert_eq!(residencies.len(), 1);
}
