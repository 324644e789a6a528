use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::Query;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::annotate::{self, Config, Params};
use crate::capture::{FfmpegVideo, FrameStrategy};
use crate::document::Payload;
use crate::model::CaptionModel;

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn CaptionModel>,
    pub strategy: FrameStrategy,
    /// CLI-level parameter defaults, applied when a request omits them.
    pub frame_interval: u64,
    pub batch_size: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/annotate", post(annotate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn annotate_handler(
    State(state): State<AppState>,
    Query(mut params): Query<Params>,
    Json(mut payload): Json<Payload>,
) -> Result<Json<Payload>, (StatusCode, String)> {
    params.frame_interval.get_or_insert(state.frame_interval);
    params.batch_size.get_or_insert(state.batch_size);

    match run(&state, &params, &mut payload).await {
        Ok(()) => Ok(Json(payload)),
        Err(e) => {
            tracing::error!("annotate request failed: {e:#}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))
        }
    }
}

async fn run(state: &AppState, params: &Params, payload: &mut Payload) -> anyhow::Result<()> {
    let config = Config::new(params, state.strategy);
    let (view_index, items) = {
        let document = payload
            .video_document()
            .ok_or_else(|| anyhow!("payload has no video document"))?;
        let location = document
            .location
            .clone()
            .ok_or_else(|| anyhow!("video document {} has no location", document.id))?;
        // The decoder is dropped before inference; it cannot be held across
        // an await.
        let mut video = FfmpegVideo::open(Path::new(&location))?;
        annotate::resolve_items(payload, &mut video, &config, params)?
    };
    annotate::caption_items(payload, view_index, items, state.model.as_ref(), config.batch_size)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use image::RgbImage;
    use tower::ServiceExt;

    struct NullModel;

    #[async_trait]
    impl CaptionModel for NullModel {
        async fn generate(
            &self,
            prompts: &[String],
            _images: &[RgbImage],
        ) -> anyhow::Result<Vec<String>> {
            Ok(vec![String::new(); prompts.len()])
        }
    }

    fn test_state() -> AppState {
        AppState {
            model: Arc::new(NullModel),
            strategy: FrameStrategy::Midpoint,
            frame_interval: 10,
            batch_size: 4,
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = router(test_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn annotate_without_video_document_is_a_server_error() {
        let request = Request::post("/annotate")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = router(test_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
