/// HTTP handlers for the discovery API
use crate::error::{DiscoveryError, Result};
use crate::models::{Activity, Category, Context, FeedbackEvent, Mood, SignalType, TimeBucket};
use crate::services::{RecommendationEngine, RecommendationRequest, SummaryPeriod};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Recommendation request body. Missing context fields default to
/// neutral mood, no activity and the current local time bucket.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecommendationPayload {
    pub user_id: String,
    pub mood: Option<Mood>,
    pub activity: Option<Activity>,
    pub time_bucket: Option<TimeBucket>,
    pub count: Option<usize>,
    pub category: Option<Category>,
}

impl RecommendationPayload {
    fn into_request(self) -> RecommendationRequest {
        let context = Context::new(
            self.mood.unwrap_or_default(),
            self.activity.unwrap_or_default(),
            self.time_bucket.unwrap_or_else(TimeBucket::now),
        );
        RecommendationRequest {
            user_id: self.user_id,
            context,
            count: self.count,
            category: self.category,
            as_of: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedbackPayload {
    pub user_id: String,
    pub track_id: String,
    pub signal: SignalType,
    pub timestamp: Option<DateTime<Utc>>,
}

/// POST /api/v1/recommendations
pub async fn get_recommendations(
    engine: web::Data<Arc<RecommendationEngine>>,
    req: web::Json<RecommendationPayload>,
) -> Result<HttpResponse> {
    let response = engine.get_recommendations(req.into_inner().into_request()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/v1/feedback
pub async fn submit_feedback(
    engine: web::Data<Arc<RecommendationEngine>>,
    req: web::Json<FeedbackPayload>,
) -> Result<HttpResponse> {
    let payload = req.into_inner();
    if payload.user_id.trim().is_empty() || payload.track_id.trim().is_empty() {
        return Err(DiscoveryError::Validation(
            "user_id and track_id are required".to_string(),
        ));
    }

    let event = FeedbackEvent::new(
        &payload.user_id,
        &payload.track_id,
        payload.signal,
        payload.timestamp.unwrap_or_else(Utc::now),
    );
    let ack = engine.submit_feedback(event).await;
    Ok(HttpResponse::Accepted().json(ack))
}

/// GET /api/v1/users/{user_id}/state
pub async fn export_state(
    engine: web::Data<Arc<RecommendationEngine>>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let state = engine.export_state(&path.into_inner()).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/json")
        .body(state))
}

/// PUT /api/v1/users/{user_id}/state
pub async fn import_state(
    engine: web::Data<Arc<RecommendationEngine>>,
    path: web::Path<String>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    engine.import_state(&user_id, &body.into_inner().to_string()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    pub period: SummaryPeriod,
}

/// GET /api/v1/users/{user_id}/metrics?period=week|month|all
pub async fn metrics_summary(
    engine: web::Data<Arc<RecommendationEngine>>,
    path: web::Path<String>,
    query: web::Query<MetricsQuery>,
) -> Result<HttpResponse> {
    let summary = engine.metrics_summary(&path.into_inner(), query.period)?;
    Ok(HttpResponse::Ok().json(summary))
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "discovery-service"
    }))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/api/v1")
            .route("/recommendations", web::post().to(get_recommendations))
            .route("/feedback", web::post().to(submit_feedback))
            .route("/users/{user_id}/state", web::get().to(export_state))
            .route("/users/{user_id}/state", web::put().to(import_state))
            .route("/users/{user_id}/metrics", web::get().to(metrics_summary)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::services::StaticCatalog;
    use actix_web::{test, App};

    fn engine() -> web::Data<Arc<RecommendationEngine>> {
        let engine =
            RecommendationEngine::new(EngineConfig::default(), Arc::new(StaticCatalog::default()))
                .unwrap();
        web::Data::new(Arc::new(engine))
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(App::new().configure(register_routes)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_empty_user_is_bad_request() {
        let app =
            test::init_service(App::new().app_data(engine()).configure(register_routes)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/recommendations")
            .set_json(serde_json::json!({ "user_id": "  " }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_unknown_user_state_is_not_found() {
        let app =
            test::init_service(App::new().app_data(engine()).configure(register_routes)).await;
        let req = test::TestRequest::get()
            .uri("/api/v1/users/ghost/state")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_feedback_for_unknown_user_is_dropped() {
        let app =
            test::init_service(App::new().app_data(engine()).configure(register_routes)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/feedback")
            .set_json(serde_json::json!({
                "user_id": "ghost",
                "track_id": "t1",
                "signal": "skip"
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "dropped");
    }

    #[actix_rt::test]
    async fn test_metrics_summary_after_request() {
        let app =
            test::init_service(App::new().app_data(engine()).configure(register_routes)).await;
        let req = test::TestRequest::get()
            .uri("/api/v1/users/u1/metrics")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::post()
            .uri("/api/v1/recommendations")
            .set_json(serde_json::json!({ "user_id": "u1", "count": 3 }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::get()
            .uri("/api/v1/users/u1/metrics?period=week")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["samples"], 1);
        assert_eq!(body["period"], "week");
        assert!(body["metrics"]["overall_quality"]["mean"].is_number());
    }
}
