use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::channels::{email, social, wechat, ChannelError};
use crate::config::InfoReceiverConfig;
use crate::monitor::Monitor;
use crate::service::{InfoReceiverService, SubmitError};
use crate::types::{ResourceStatus, SubmissionCategory, SubmitMessageRequest};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InfoReceiverService>,
    pub monitor: Arc<Monitor>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/info-receiver/submit", post(submit).get(message_status))
        .route("/api/info-receiver/email", post(email_webhook).get(email_info))
        .route("/api/info-receiver/wechat", post(wechat_webhook).get(wechat_info))
        .route("/api/info-receiver/social", post(social_webhook).get(social_info))
        .route(
            "/api/info-receiver/resources",
            get(list_resources).post(resources_action).put(update_resource),
        )
        .route("/api/info-receiver/monitoring", get(monitoring))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn bad_request(msg: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": msg.to_string() })),
    )
}

fn channel_error(err: ChannelError) -> ApiError {
    let status = match err {
        ChannelError::NotRelevant => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
}

fn submit_error(err: SubmitError) -> ApiError {
    bad_request(err)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let report = state.monitor.health().await;
    Json(json!({
        "status": report.status,
        "score": report.score,
        "issues": report.issues,
        "activeAlerts": report.active_alerts.len(),
    }))
}

async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let resp = state.service.submit_message(body).map_err(submit_error)?;
    Ok(Json(json!({
        "success": true,
        "messageId": resp.message_id,
        "message": resp.message,
    })))
}

async fn email_webhook(
    State(state): State<AppState>,
    Json(payload): Json<email::EmailPayload>,
) -> Result<Json<Value>, ApiError> {
    let allowed = InfoReceiverConfig::intake_emails();
    let req = email::intake(payload, &allowed).map_err(channel_error)?;
    let resp = state.service.submit_message(req).map_err(submit_error)?;
    Ok(Json(json!({ "success": true, "messageId": resp.message_id })))
}

async fn wechat_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<wechat::WechatPayload>,
) -> Result<Json<Value>, ApiError> {
    let expected = std::env::var("WECHAT_API_KEY").unwrap_or_default();
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if expected.is_empty() || presented != expected {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "error": "invalid api key" })),
        ));
    }

    let out = wechat::intake(payload).map_err(channel_error)?;
    let resp = state.service.submit_message(out.request).map_err(submit_error)?;
    Ok(Json(json!({
        "success": true,
        "messageId": resp.message_id,
        "reply": out.reply,
    })))
}

async fn social_webhook(
    State(state): State<AppState>,
    Json(payload): Json<social::SocialPayload>,
) -> Result<Json<Value>, ApiError> {
    let req = social::intake(payload).map_err(channel_error)?;
    let resp = state.service.submit_message(req).map_err(submit_error)?;
    Ok(Json(json!({ "success": true, "messageId": resp.message_id })))
}

#[derive(serde::Deserialize)]
struct MessageStatusQuery {
    id: Uuid,
}

/// Status lookup for a previously submitted message.
async fn message_status(
    State(state): State<AppState>,
    Query(q): Query<MessageStatusQuery>,
) -> Result<Json<Value>, ApiError> {
    match state.service.store().get_message(q.id) {
        Some(m) => Ok(Json(json!({ "success": true, "message": m }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("unknown message: {}", q.id) })),
        )),
    }
}

async fn email_info() -> Json<Value> {
    Json(json!({
        "success": true,
        "channel": "email",
        "intakeEmails": InfoReceiverConfig::intake_emails(),
    }))
}

async fn wechat_info() -> Json<Value> {
    Json(json!({
        "success": true,
        "channel": "wechat",
        "auth": "x-api-key header",
        "messageTypes": ["text", "miniprogram"],
    }))
}

async fn social_info() -> Json<Value> {
    Json(json!({
        "success": true,
        "channel": "social",
        "platforms": social::SUPPORTED_PLATFORMS,
    }))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResourceRequest {
    resource_id: Uuid,
    status: String,
}

/// Single-resource status update; `POST action=batchUpdateStatus` is the
/// bulk form.
async fn update_resource(
    State(state): State<AppState>,
    Json(body): Json<UpdateResourceRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = parse_status(&body.status)?;
    match state
        .service
        .store()
        .update_resource_status(body.resource_id, status)
    {
        Some(resource) => Ok(Json(json!({ "success": true, "resource": resource }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("unknown resource: {}", body.resource_id),
            })),
        )),
    }
}

#[derive(serde::Deserialize)]
struct ListResourcesQuery {
    status: Option<String>,
    category: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

fn parse_status(s: &str) -> Result<ResourceStatus, ApiError> {
    serde_json::from_value(Value::String(s.to_uppercase()))
        .map_err(|_| bad_request(format!("unknown status: {s}")))
}

fn parse_category(s: &str) -> Result<SubmissionCategory, ApiError> {
    SubmissionCategory::parse_loose(s).ok_or_else(|| bad_request(format!("unknown category: {s}")))
}

async fn list_resources(
    State(state): State<AppState>,
    Query(q): Query<ListResourcesQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = q.status.as_deref().map(parse_status).transpose()?;
    let category = q.category.as_deref().map(parse_category).transpose()?;
    let resources = state
        .service
        .store()
        .list_resources(status, category, q.limit.min(200));
    Ok(Json(json!({ "success": true, "resources": resources })))
}

#[derive(serde::Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ResourcesAction {
    #[serde(rename_all = "camelCase")]
    Search {
        query: String,
        category: Option<String>,
    },
    Stats,
    #[serde(rename_all = "camelCase")]
    BatchUpdateStatus {
        resource_ids: Vec<Uuid>,
        status: String,
    },
    ProcessPending,
}

async fn resources_action(
    State(state): State<AppState>,
    Json(action): Json<ResourcesAction>,
) -> Result<Json<Value>, ApiError> {
    match action {
        ResourcesAction::Search { query, category } => {
            let category = category.as_deref().map(parse_category).transpose()?;
            let resources = state.service.store().search_resources(&query, category);
            Ok(Json(json!({ "success": true, "resources": resources })))
        }
        ResourcesAction::Stats => {
            let stats = state.service.store().stats();
            Ok(Json(json!({ "success": true, "stats": stats })))
        }
        ResourcesAction::BatchUpdateStatus {
            resource_ids,
            status,
        } => {
            let status = parse_status(&status)?;
            let mut updated = 0usize;
            for id in resource_ids {
                if state.service.store().update_resource_status(id, status).is_some() {
                    updated += 1;
                }
            }
            Ok(Json(json!({ "success": true, "updated": updated })))
        }
        ResourcesAction::ProcessPending => {
            let picked = InfoReceiverService::process_pending_messages(&state.service).await;
            Ok(Json(json!({ "success": true, "processed": picked })))
        }
    }
}

#[derive(serde::Deserialize)]
struct MonitoringQuery {
    #[serde(default)]
    view: Option<String>,
    since: Option<chrono::DateTime<chrono::Utc>>,
}

async fn monitoring(
    State(state): State<AppState>,
    Query(q): Query<MonitoringQuery>,
) -> Result<Json<Value>, ApiError> {
    match q.view.as_deref().unwrap_or("health") {
        "health" => {
            let report = state.monitor.health().await;
            Ok(Json(json!({ "success": true, "health": report })))
        }
        "metrics" => {
            let snapshot = state.monitor.collect().await;
            Ok(Json(json!({ "success": true, "metrics": snapshot })))
        }
        "alerts" => Ok(Json(
            json!({ "success": true, "alerts": state.monitor.active_alerts() }),
        )),
        "history" => Ok(Json(
            json!({ "success": true, "history": state.monitor.history(q.since) }),
        )),
        other => Err(bad_request(format!("unknown view: {other}"))),
    }
}
