use crate::app::ports::IdentityPort;
use crate::constants::get_supported_sources;
use crate::domain::ImportSource;
use crate::error::{ImportError, Result};
use crate::pipeline::{ImportPipeline, ImportRequest};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart},
    http::{HeaderMap, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Extension, Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state.
pub struct AppState {
    pub pipeline: ImportPipeline,
    pub identity: Arc<dyn IdentityPort>,
    pub max_upload_bytes: usize,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "watchlist-import",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

struct ImportUpload {
    content: Option<String>,
    source: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> std::result::Result<ImportUpload, String> {
    let mut upload = ImportUpload {
        content: None,
        source: None,
    };
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        match field.name() {
            Some("file") => {
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                upload.content = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            Some("source") => {
                upload.source = Some(field.text().await.map_err(|e| e.to_string())?);
            }
            _ => {}
        }
    }
    Ok(upload)
}

/// Starts an import and streams its progress as server-sent events.
async fn import_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    let Some(user_id) = state.identity.user_id(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Authentication required");
    };
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Expected a multipart upload: {}", rejection.body_text()),
            )
        }
    };

    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            warn!("Rejected malformed upload: {}", e);
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e));
        }
    };
    let (Some(content), Some(source)) = (upload.content, upload.source) else {
        return error_response(StatusCode::BAD_REQUEST, "Both 'file' and 'source' are required");
    };
    let source: ImportSource = match source.parse() {
        Ok(source) => source,
        Err(ImportError::UnsupportedSource(s)) => {
            let expected = get_supported_sources().join(", ");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Unsupported source '{}'; expected one of: {}", s, expected),
            );
        }
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    info!(%user_id, %source, bytes = content.len(), "Starting import");
    let events = state.pipeline.start(ImportRequest {
        user_id,
        source,
        content,
    });
    let stream = ReceiverStream::new(events)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_json())));
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Create the HTTP router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/api/import", post(import_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: Arc<AppState>, port: u16) -> Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("HTTP server running on http://localhost:{}", port);
    info!("Health check: http://localhost:{}/health", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::infra::HeaderIdentity;
    use crate::pipeline::matcher::test_support::ScriptedSearch;
    use crate::storage::InMemoryStorage;
    use axum::body::Body;
    use axum::http::{HeaderName, Request};
    use tower::ServiceExt;

    fn router() -> Router {
        let store = Arc::new(InMemoryStorage::new());
        let pipeline = ImportPipeline::new(
            Arc::new(ScriptedSearch::default()),
            store.clone(),
            store,
            ImportConfig::default(),
        );
        create_router(Arc::new(AppState {
            pipeline,
            identity: Arc::new(HeaderIdentity::new(HeaderName::from_static("x-user-id"))),
            max_upload_bytes: 1024 * 1024,
        }))
    }

    fn multipart_body(parts: &[(&str, &str)]) -> (String, String) {
        let boundary = "XBOUNDARYX".to_string();
        let mut body = String::new();
        for (name, value) in parts {
            body.push_str(&format!("--{}\r\n", boundary));
            if *name == "file" {
                body.push_str("Content-Disposition: form-data; name=\"file\"; filename=\"export.csv\"\r\n");
                body.push_str("Content-Type: text/csv\r\n\r\n");
            } else {
                body.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name));
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", boundary));
        (boundary, body)
    }

    fn import_request(user: Option<&str>, parts: &[(&str, &str)]) -> Request<Body> {
        let (boundary, body) = multipart_body(parts);
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/import")
            .header("content-type", format!("multipart/form-data; boundary={}", boundary));
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_import_requires_identity() {
        let request = import_request(None, &[("source", "imdb"), ("file", "Const,Title\n")]);
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_identity_checked_before_body_shape() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/import")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("POST")
            .uri("/api/import")
            .header("content-type", "application/json")
            .header("x-user-id", "u1")
            .body(Body::from("{}"))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_import_requires_file_and_source() {
        let request = import_request(Some("u1"), &[("source", "imdb")]);
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let request = import_request(Some("u1"), &[("source", "trakt"), ("file", "a,b\n")]);
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_import_streams_events() {
        let request = import_request(Some("u1"), &[("source", "letterboxd"), ("file", "Name,Year\n")]);
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let frames: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:").map(str::trim_start))
            .collect();
        assert!(frames.first().unwrap().contains("\"phase\":\"parsing\""));
        assert!(frames.last().unwrap().contains("\"phase\":\"error\""));
    }
}
