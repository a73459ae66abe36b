use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::db::{Highlight, HighlightIndex, RelevantHighlight, VideoOverview};
use crate::llm::Embedder;
use crate::pipeline;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<dyn HighlightIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub similarity_threshold: f64,
    pub retrieval_limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct Question {
    pub text: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(d) => (StatusCode::BAD_REQUEST, d),
            ApiError::NotFound(d) => (StatusCode::NOT_FOUND, d),
            ApiError::Internal(d) => (StatusCode::INTERNAL_SERVER_ERROR, d),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/question", post(ask_question))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/{video_id}/highlights", get(video_highlights))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn serve(state: AppState, addr: &str, cors_origins: &[String]) -> std::io::Result<()> {
    let app = build_router(state, cors_origins);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn ask_question(
    State(state): State<AppState>,
    body: Result<Json<Question>, JsonRejection>,
) -> Result<Json<Vec<RelevantHighlight>>, ApiError> {
    let Json(question) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let text = question.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Question text must not be empty".into()));
    }

    let found = pipeline::answer_question(
        state.embedder.as_ref(),
        state.index.as_ref(),
        text,
        state.similarity_threshold,
        state.retrieval_limit,
    )
    .await
    .map_err(|e| {
        error!("question failed: {e}");
        ApiError::Internal(format!("Error processing question: {e}"))
    })?;

    info!(results = found.len(), "answered question");
    Ok(Json(found))
}

async fn list_videos(State(state): State<AppState>) -> Result<Json<Vec<VideoOverview>>, ApiError> {
    state
        .index
        .list_videos()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Error listing videos: {e}")))
}

async fn video_highlights(
    State(state): State<AppState>,
    Path(video_id): Path<i32>,
) -> Result<Json<Vec<Highlight>>, ApiError> {
    let detail = state
        .index
        .get_video(video_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error loading video: {e}")))?
        .ok_or_else(|| ApiError::NotFound(format!("Video {video_id} not found")))?;
    Ok(Json(detail.highlights))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbError, SimilarHighlight, Video, VideoDetail};
    use crate::llm::{EMBEDDING_DIM, LlmError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_document(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            self.embed_query(text).await
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            if self.fail {
                return Err(LlmError::EmptyResponse);
            }
            Ok(vec![0.5; EMBEDDING_DIM])
        }
    }

    fn video() -> Video {
        Video {
            id: 1,
            filename: "office.mp4".into(),
            duration: 60.0,
            width: 1280,
            height: 720,
            fps: 30.0,
            summary: None,
            created_at: Utc::now(),
        }
    }

    struct MemoryIndex;

    #[async_trait]
    impl HighlightIndex for MemoryIndex {
        async fn find_relevant_highlights(
            &self,
            _embedding: &[f32],
            threshold: f64,
            limit: usize,
        ) -> Result<Vec<RelevantHighlight>, DbError> {
            let all = [0.9, 0.6, 0.31, 0.2].map(|score| RelevantHighlight {
                id: (score * 100.0) as i32,
                description: format!("highlight {score}"),
                timestamp: 1.0,
                similarity_score: score,
                video_name: "office.mp4".into(),
            });
            Ok(all
                .into_iter()
                .filter(|h| h.similarity_score >= threshold)
                .take(limit)
                .collect())
        }

        async fn list_videos(&self) -> Result<Vec<VideoOverview>, DbError> {
            Ok(vec![VideoOverview {
                video: video(),
                highlight_count: 2,
            }])
        }

        async fn get_video(&self, video_id: i32) -> Result<Option<VideoDetail>, DbError> {
            if video_id != 1 {
                return Ok(None);
            }
            let highlight = |id: i32, timestamp: f64| Highlight {
                id,
                video_id: 1,
                timestamp,
                description: format!("at {timestamp}"),
                summary: None,
                embedding: Some(vec![0.0; EMBEDDING_DIM]),
                created_at: Utc::now(),
            };
            Ok(Some(VideoDetail {
                video: video(),
                highlights: vec![highlight(3, 2.0), highlight(4, 9.5)],
            }))
        }

        async fn get_video_highlights(&self, video_id: i32) -> Result<Vec<Highlight>, DbError> {
            Ok(self
                .get_video(video_id)
                .await?
                .map(|d| d.highlights)
                .unwrap_or_default())
        }

        async fn find_similar_highlights(
            &self,
            _embedding: &[f32],
            _limit: usize,
        ) -> Result<Vec<SimilarHighlight>, DbError> {
            Ok(Vec::new())
        }
    }

    fn app(fail: bool) -> Router {
        let state = AppState {
            index: Arc::new(MemoryIndex),
            embedder: Arc::new(FixedEmbedder { fail }),
            similarity_threshold: 0.3,
            retrieval_limit: 2,
        };
        build_router(state, &["http://localhost:3000".to_string()])
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn question(text: &str) -> Request<Body> {
        Request::post("/api/chat/question")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "text": text }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health() {
        let (status, body) = call(app(false), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn question_returns_ranked_highlights() {
        let (status, body) = call(app(false), question("where is the coffee?")).await;
        assert_eq!(status, StatusCode::OK);

        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["similarity_score"], 0.9);
        assert_eq!(items[0]["video_name"], "office.mp4");
        for key in ["id", "description", "timestamp", "similarity_score", "video_name"] {
            assert!(items[1].get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let (status, body) = call(app(false), question("   ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn malformed_body_gets_a_json_detail() {
        for body in ["{\"question\": \"hi\"}", "not json"] {
            let request = Request::post("/api/chat/question")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap();
            let (status, body) = call(app(false), request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["detail"].is_string());
        }
    }

    #[tokio::test]
    async fn embedding_failure_is_a_500_with_detail() {
        let (status, body) = call(app(true), question("anything")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body["detail"]
                .as_str()
                .unwrap()
                .starts_with("Error processing question: ")
        );
    }

    #[tokio::test]
    async fn videos_and_their_highlights() {
        let (status, body) = call(app(false), Request::get("/api/videos").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["filename"], "office.mp4");
        assert_eq!(body[0]["highlight_count"], 2);

        let (status, body) = call(
            app(false),
            Request::get("/api/videos/1/highlights").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[1]["timestamp"], 9.5);
        assert!(body[0].get("embedding").is_none());

        let (status, _) = call(
            app(false),
            Request::get("/api/videos/42/highlights").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
